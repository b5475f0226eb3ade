//! Error types for the guard crate.

use thiserror::Error;

/// Result type for guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;

/// A guard refused an input, or evaluation of an accepted input failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardError {
    /// Expression has a syntax error or uses something outside the allow-list.
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    /// Division by zero, overflow, or a math domain error.
    #[error("Arithmetic error: {0}")]
    ArithmeticError(String),

    /// Outbound URL rejected by the egress guard.
    #[error("Unsafe URL: {0}")]
    UnsafeUrl(String),

    /// SQL rejected by the query sanitizer.
    #[error("Unsafe query: {}", .0.join("; "))]
    UnsafeQuery(Vec<String>),
}

impl GuardError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidExpression(msg.into())
    }

    pub fn arithmetic(msg: impl Into<String>) -> Self {
        Self::ArithmeticError(msg.into())
    }

    /// True for rejections made on security grounds.
    pub fn is_security_rejection(&self) -> bool {
        !matches!(self, Self::ArithmeticError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            GuardError::invalid("unknown name 'x'").to_string(),
            "Invalid expression: unknown name 'x'"
        );
        assert_eq!(
            GuardError::UnsafeQuery(vec!["a".into(), "b".into()]).to_string(),
            "Unsafe query: a; b"
        );
    }

    #[test]
    fn test_is_security_rejection() {
        assert!(GuardError::UnsafeUrl("x".into()).is_security_rejection());
        assert!(!GuardError::arithmetic("division by zero").is_security_rejection());
    }
}
