//! The three reasoning strategies.

mod plan;
mod react;
mod structured;

pub use plan::{PlanExecuteStrategy, default_plan, format_plan};
pub use react::{MAX_CONSECUTIVE_MISSES, ReactStrategy};
pub use structured::StructuredStrategy;
