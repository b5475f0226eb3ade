//! Calculator tool backed by the safe expression evaluator.

use async_trait::async_trait;
use serde_json::{Value, json};

use corvid_guard::GuardError;

use crate::error::Result;
use crate::tool::{ParamExt, ParamType, Tool, ToolContext, ToolParameter, ToolResult};

/// Evaluates arithmetic expressions; never executes code.
#[derive(Debug, Clone, Default)]
pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }
}

/// Render whole numbers without a trailing `.0`.
fn display_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Supports + - * / // % **, parentheses, the constants \
         pi, e and tau, and the functions abs, round, min, max, sum, pow, sqrt, sin, cos, tan, \
         asin, acos, atan, log, log10, log2, exp, floor and ceil."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "expression",
            ParamType::String,
            "The expression to evaluate, e.g. \"sqrt(16) + 2\"",
        )]
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let expression = params.required_str("expression")?;

        match corvid_guard::evaluate(expression) {
            Ok(value) => Ok(ToolResult::json(json!({
                "expression": expression,
                "result": value,
                "display": display_number(value),
            }))),
            Err(e @ GuardError::InvalidExpression(_)) => {
                tracing::warn!(expression = %expression, error = %e, "Expression rejected");
                Ok(ToolResult::error(e.to_string()))
            }
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(expression: &str) -> ToolResult {
        CalculatorTool::new()
            .execute(json!({"expression": expression}), &ToolContext::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_evaluates_expression() {
        let result = run("sqrt(16) + 2").await;
        let value = result.to_value();
        assert_eq!(value["success"], true);
        assert_eq!(value["result"], 6.0);
        assert_eq!(value["display"], "6");
    }

    #[tokio::test]
    async fn test_rejects_code() {
        let result = run("__import__('os')").await;
        assert!(result.is_error());
        assert!(result.error_message().unwrap().contains("Invalid expression"));
    }

    #[tokio::test]
    async fn test_division_by_zero_is_a_failure_result() {
        let result = run("1 / 0").await;
        assert!(result.error_message().unwrap().contains("Arithmetic error"));
    }

    #[test]
    fn test_display_number() {
        assert_eq!(display_number(6.0), "6");
        assert_eq!(display_number(2.5), "2.5");
        assert_eq!(display_number(-3.0), "-3");
    }
}
