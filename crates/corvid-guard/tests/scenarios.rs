//! End-to-end checks across the three guards.

use std::sync::Arc;

use corvid_guard::{EgressGuard, GuardError, QuerySanitizer, StaticResolver, evaluate};

#[test]
fn test_expression_scenarios() {
    assert_eq!(evaluate("sqrt(16) + 2").unwrap(), 6.0);
    assert!(matches!(
        evaluate("__import__('os')"),
        Err(GuardError::InvalidExpression(_))
    ));
    assert!(matches!(
        evaluate("1 / (2 - 2)"),
        Err(GuardError::ArithmeticError(_))
    ));
}

#[tokio::test]
async fn test_metadata_endpoint_blocked() {
    let guard = EgressGuard::new().with_resolver(Arc::new(StaticResolver::new()));
    let decision = guard
        .validate("http://169.254.169.254/latest/meta-data")
        .await;
    assert!(!decision.allowed);
    assert!(decision.reason.contains("link-local"));
}

#[test]
fn test_stacked_statement_rejected() {
    let (_, result) = QuerySanitizer::default().sanitize("SELECT * FROM users; DROP TABLE users;");
    assert!(!result.is_valid);
    assert!(!result.errors.is_empty());
}
