//! Input guards applied to untrusted tool arguments.
//!
//! - [`expression`]: arithmetic evaluation over an allow-listed expression tree
//! - [`egress`]: SSRF checks for outbound URLs
//! - [`sql`]: read-only SQL validation and row limiting

pub mod egress;
pub mod error;
pub mod expression;
pub mod sql;

pub use egress::{EgressDecision, EgressGuard, HostResolver, StaticResolver, SystemResolver};
pub use error::{GuardError, Result};
pub use expression::evaluate;
pub use sql::{QuerySanitizer, ValidationResult};
