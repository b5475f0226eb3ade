//! Tool framework for agent capabilities.
//!
//! This module defines the [`Tool`] trait that all agent tools must implement,
//! and the [`ToolRegistry`] that validates arguments, dispatches execution and
//! normalizes every outcome into a [`ToolResult`].
//!
//! # Example
//!
//! ```rust,ignore
//! use corvid_agent::{ParamType, Tool, ToolContext, ToolParameter, ToolResult, ToolRegistry};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Tool for Echo {
//!     fn name(&self) -> &str { "echo" }
//!     fn description(&self) -> &str { "Echo the input back" }
//!     fn parameters(&self) -> Vec<ToolParameter> {
//!         vec![ToolParameter::required("text", ParamType::String, "Text to echo")]
//!     }
//!
//!     async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
//!         Ok(ToolResult::text(params["text"].as_str().unwrap_or_default()))
//!     }
//! }
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(Echo);
//! let result = registry.execute("echo", json!({"text": "hi"}), &ToolContext::default()).await;
//! ```

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::RunId;

/// Timeout applied to a tool that does not declare its own.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

// ─────────────────────────────────────────────────────────────────────────────
// Parameter Declarations
// ─────────────────────────────────────────────────────────────────────────────

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Object,
    Array,
    Boolean,
}

impl ParamType {
    /// JSON Schema type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Object => "object",
            Self::Array => "array",
            Self::Boolean => "boolean",
        }
    }

    /// Whether a JSON value is acceptable for this type.
    ///
    /// Integers are accepted where numbers are expected, and whole floats
    /// (`3.0`) where integers are expected.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
            }
            Self::Number => value.is_number(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// Name of the JSON type of a value, for error messages.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One named input to a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParameter {
    /// Declare a required parameter.
    pub fn required(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            default: None,
        }
    }

    /// Declare an optional parameter.
    pub fn optional(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    /// Value substituted when the caller omits this parameter.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Self-description of a tool, used for prompt catalogs and call schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<ToolParameter>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// JSON Schema object describing the parameters.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut prop = json!({
                "type": param.param_type.as_str(),
                "description": param.description,
            });
            if let Some(default) = &param.default {
                prop["default"] = default.clone();
            }
            properties.insert(param.name.clone(), prop);
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Machine-readable definition for structured tool calling.
    pub fn to_definition(&self) -> corvid_llm::ToolDefinition {
        corvid_llm::ToolDefinition::new(&self.name, &self.description, self.json_schema())
    }

    /// Natural-language catalog entry for free-text prompting.
    pub fn catalog_entry(&self) -> String {
        let mut entry = format!("- {}: {}", self.name, self.description);
        if !self.parameters.is_empty() {
            let params: Vec<String> = self
                .parameters
                .iter()
                .map(|p| {
                    format!(
                        "{} ({}, {}): {}",
                        p.name,
                        p.param_type.as_str(),
                        if p.required { "required" } else { "optional" },
                        p.description
                    )
                })
                .collect();
            entry.push_str("\n  Parameters: ");
            entry.push_str(&params.join("; "));
        }
        entry
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameter Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Error type for tool parameter validation failures.
///
/// Provides detailed error messages that help the LLM understand what went wrong
/// and how to fix it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterValidationError {
    /// A required parameter is missing.
    #[error("missing required parameter '{name}': {hint}")]
    MissingRequired { name: String, hint: String },

    /// A parameter has an invalid type.
    #[error("invalid type for '{name}': expected {expected}, got {actual}")]
    InvalidType {
        name: String,
        expected: &'static str,
        actual: String,
    },

    /// A parameter value is out of range.
    #[error("'{name}' value {value} is out of range: {constraint}")]
    OutOfRange {
        name: String,
        value: String,
        constraint: String,
    },

    /// A parameter value doesn't match the expected pattern or enum.
    #[error("'{name}' has invalid value '{value}': {message}")]
    InvalidValue {
        name: String,
        value: String,
        message: String,
    },

    /// Multiple validation errors.
    #[error("parameter validation failed: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ParameterValidationError>),
}

impl ParameterValidationError {
    /// Create a missing required parameter error.
    pub fn missing(name: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            name: name.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid type error.
    pub fn invalid_type(
        name: impl Into<String>,
        expected: &'static str,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidType {
            name: name.into(),
            expected,
            actual: actual.into(),
        }
    }

    /// Create an out of range error.
    pub fn out_of_range(
        name: impl Into<String>,
        value: impl ToString,
        constraint: impl Into<String>,
    ) -> Self {
        Self::OutOfRange {
            name: name.into(),
            value: value.to_string(),
            constraint: constraint.into(),
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(
        name: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            name: name.into(),
            value: value.into(),
            message: message.into(),
        }
    }

    /// Collapse a list of errors: none, the single error, or `Multiple`.
    pub fn from_errors(mut errors: Vec<ParameterValidationError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// Names of every parameter involved in this error.
    pub fn parameter_names(&self) -> Vec<&str> {
        match self {
            Self::MissingRequired { name, .. }
            | Self::InvalidType { name, .. }
            | Self::OutOfRange { name, .. }
            | Self::InvalidValue { name, .. } => vec![name.as_str()],
            Self::Multiple(errors) => errors.iter().flat_map(|e| e.parameter_names()).collect(),
        }
    }
}

/// Result type for parameter validation.
pub type ParamResult<T> = std::result::Result<T, ParameterValidationError>;

/// Check arguments against declared parameters.
///
/// Every missing required parameter and every mistyped parameter is
/// reported, not just the first.
pub fn validate_parameters(declared: &[ToolParameter], args: &Value) -> ParamResult<()> {
    let Some(object) = args.as_object() else {
        return Err(ParameterValidationError::invalid_type(
            "arguments",
            "object",
            json_type_name(args),
        ));
    };

    let mut errors = Vec::new();
    for param in declared {
        match object.get(&param.name) {
            None | Some(Value::Null) => {
                if param.required && param.default.is_none() {
                    errors.push(ParameterValidationError::missing(
                        &param.name,
                        &param.description,
                    ));
                }
            }
            Some(value) if !param.param_type.accepts(value) => {
                errors.push(ParameterValidationError::invalid_type(
                    &param.name,
                    param.param_type.as_str(),
                    json_type_name(value),
                ));
            }
            Some(_) => {}
        }
    }

    match ParameterValidationError::from_errors(errors) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Fill in declared defaults for omitted parameters.
fn apply_defaults(declared: &[ToolParameter], args: &mut Value) {
    let Some(object) = args.as_object_mut() else {
        return;
    };
    for param in declared {
        if let Some(default) = &param.default {
            let absent = matches!(object.get(&param.name), None | Some(Value::Null));
            if absent {
                object.insert(param.name.clone(), default.clone());
            }
        }
    }
}

/// Helper trait for extracting parameters from JSON arguments.
pub trait ParamExt {
    /// Get a required string parameter.
    fn required_str(&self, name: &str) -> ParamResult<&str>;

    /// Get an optional string parameter.
    fn optional_str(&self, name: &str) -> Option<&str>;

    /// Get a required number parameter.
    fn required_f64(&self, name: &str) -> ParamResult<f64>;

    /// Get an optional integer parameter with default.
    fn optional_i64(&self, name: &str, default: i64) -> i64;

    /// Get an optional u64 parameter with default.
    fn optional_u64(&self, name: &str, default: u64) -> u64;

    /// Get an optional boolean parameter with default.
    fn optional_bool(&self, name: &str, default: bool) -> bool;

    /// Get an optional array parameter.
    fn optional_array(&self, name: &str) -> Option<&Vec<Value>>;
}

impl ParamExt for Value {
    fn required_str(&self, name: &str) -> ParamResult<&str> {
        self.get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ParameterValidationError::missing(name, "expected a string"))
    }

    fn optional_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_str())
    }

    fn required_f64(&self, name: &str) -> ParamResult<f64> {
        self.get(name)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ParameterValidationError::missing(name, "expected a number"))
    }

    fn optional_i64(&self, name: &str, default: i64) -> i64 {
        self.get(name).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    fn optional_u64(&self, name: &str, default: u64) -> u64 {
        self.get(name).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    fn optional_bool(&self, name: &str, default: bool) -> bool {
        self.get(name).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn optional_array(&self, name: &str) -> Option<&Vec<Value>> {
        self.get(name).and_then(|v| v.as_array())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum output size in bytes (100KB).
pub const DEFAULT_MAX_OUTPUT_SIZE: usize = 100 * 1024;

/// Configuration for sanitizing tool output.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Maximum size in bytes before truncation.
    pub max_size_bytes: usize,
    /// Message to append when output is truncated.
    pub truncation_message: String,
    /// Whether to strip control characters (except newlines, tabs).
    pub strip_control_chars: bool,
    /// Whether to strip null bytes.
    pub strip_null_bytes: bool,
    /// Whether to validate JSON structure for JSON outputs.
    pub validate_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_OUTPUT_SIZE,
            truncation_message: "\n\n[Output truncated - exceeded size limit]".to_string(),
            strip_control_chars: true,
            strip_null_bytes: true,
            validate_json: true,
        }
    }
}

impl OutputConfig {
    /// Create a new output config with the given size limit.
    pub fn with_max_size(max_size_bytes: usize) -> Self {
        Self {
            max_size_bytes,
            ..Default::default()
        }
    }

    /// HTTP response bodies (200KB).
    pub fn for_http() -> Self {
        Self::with_max_size(200 * 1024)
    }

    /// SQL result sets (100KB).
    pub fn for_sql() -> Self {
        Self::with_max_size(100 * 1024)
    }

    /// Search results (50KB).
    pub fn for_search() -> Self {
        Self::with_max_size(50 * 1024)
    }

    /// Set a custom truncation message.
    pub fn with_truncation_message(mut self, message: impl Into<String>) -> Self {
        self.truncation_message = message.into();
        self
    }
}

/// Error type for output sanitization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OutputSanitizationError {
    /// Output appears to be binary data.
    #[error(
        "output appears to be binary data (detected {null_bytes} null bytes in first {checked_bytes} bytes)"
    )]
    BinaryContent {
        null_bytes: usize,
        checked_bytes: usize,
    },

    /// JSON output is malformed.
    #[error("JSON output is malformed: {reason}")]
    MalformedJson { reason: String },
}

/// Sanitize a string according to the output configuration.
///
/// Rejects binary content, strips null bytes and control characters
/// (keeping newlines and tabs), then truncates on a UTF-8 boundary.
/// Returns the sanitized string and whether it was truncated.
pub fn sanitize_output(
    input: &str,
    config: &OutputConfig,
) -> std::result::Result<(String, bool), OutputSanitizationError> {
    let check_len = input.len().min(8 * 1024);
    let null_count = input.as_bytes()[..check_len]
        .iter()
        .filter(|&&b| b == 0)
        .count();

    // More than 1% null bytes reads as binary
    if null_count > check_len / 100 && null_count > 10 {
        return Err(OutputSanitizationError::BinaryContent {
            null_bytes: null_count,
            checked_bytes: check_len,
        });
    }

    let mut output = if config.strip_null_bytes {
        input.replace('\0', "")
    } else {
        input.to_string()
    };

    if config.strip_control_chars {
        output = output
            .chars()
            .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
            .collect();
    }

    if output.len() <= config.max_size_bytes {
        return Ok((output, false));
    }

    let budget = config
        .max_size_bytes
        .saturating_sub(config.truncation_message.len());
    let mut cut = budget.min(output.len());
    while cut > 0 && !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str(&config.truncation_message);
    Ok((output, true))
}

/// Reject excessively nested JSON values.
pub fn validate_json_output(value: &Value) -> std::result::Result<(), OutputSanitizationError> {
    const MAX_JSON_DEPTH: usize = 50;

    fn depth_ok(value: &Value, depth: usize) -> bool {
        if depth > MAX_JSON_DEPTH {
            return false;
        }
        match value {
            Value::Array(items) => items.iter().all(|v| depth_ok(v, depth + 1)),
            Value::Object(map) => map.values().all(|v| depth_ok(v, depth + 1)),
            _ => true,
        }
    }

    if depth_ok(value, 0) {
        Ok(())
    } else {
        Err(OutputSanitizationError::MalformedJson {
            reason: format!("JSON nesting exceeds maximum depth of {}", MAX_JSON_DEPTH),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for agent tools.
///
/// A tool declares its parameters, may refine validation, and executes
/// asynchronously. Expected failures (bad input, blocked URL, unsafe SQL,
/// backend down) should come back as [`ToolResult::error`]; an `Err` or a
/// panic is still caught by the registry and converted to the same shape.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the unique name of this tool.
    fn name(&self) -> &str;

    /// Get a human-readable description of what this tool does.
    fn description(&self) -> &str;

    /// Declared parameters, in display order.
    fn parameters(&self) -> Vec<ToolParameter>;

    /// Descriptor built from name, description and parameters.
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(self.name(), self.description(), self.parameters())
    }

    /// Validate arguments before execution.
    fn validate(&self, args: &Value) -> ParamResult<()> {
        validate_parameters(&self.parameters(), args)
    }

    /// Hard ceiling on execution time, enforced by the registry.
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    /// Execute the tool with validated arguments.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Context
// ─────────────────────────────────────────────────────────────────────────────

/// Context provided to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The run this call belongs to.
    pub run_id: RunId,
    /// Token to check for cancellation.
    pub cancellation: CancellationToken,
}

impl ToolContext {
    /// Create a new tool context.
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            cancellation: CancellationToken::new(),
        }
    }

    /// Create a context with a cancellation token.
    pub fn with_cancellation(run_id: RunId, cancellation: CancellationToken) -> Self {
        Self {
            run_id,
            cancellation,
        }
    }

    /// Check if execution has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new(RunId::new())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Result
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResult {
    /// Successful text output.
    Text { content: String },
    /// Successful JSON output.
    Json { content: Value },
    /// Tool execution failed.
    Error { message: String },
}

impl ToolResult {
    /// Create a text result.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    /// Create a JSON result.
    pub fn json(content: Value) -> Self {
        Self::Json { content }
    }

    /// Create an error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Check if this result is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Check if this result is successful.
    pub fn is_success(&self) -> bool {
        !self.is_error()
    }

    /// Error message, if this is a failure.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            _ => None,
        }
    }

    /// The uniform caller-facing shape.
    ///
    /// Success: `{"success": true, ...payload}` where an object payload is
    /// merged in, text goes under `output`, and other JSON under `result`.
    /// Failure: `{"success": false, "error": "<message>"}`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text { content } => json!({"success": true, "output": content}),
            Self::Json {
                content: Value::Object(map),
            } => {
                let mut out = Map::with_capacity(map.len() + 1);
                out.insert("success".to_string(), Value::Bool(true));
                for (k, v) in map {
                    if k != "success" {
                        out.insert(k.clone(), v.clone());
                    }
                }
                Value::Object(out)
            }
            Self::Json { content } => json!({"success": true, "result": content}),
            Self::Error { message } => json!({"success": false, "error": message}),
        }
    }

    /// Get the content as a string for LLM consumption.
    pub fn to_llm_content(&self) -> String {
        match self {
            Self::Text { content } => content.clone(),
            Self::Json { content } => {
                serde_json::to_string_pretty(content).unwrap_or_else(|_| content.to_string())
            }
            Self::Error { message } => format!("Error: {}", message),
        }
    }

    /// Sanitize this result according to the given configuration.
    ///
    /// Failures during sanitization turn the result into an error.
    pub fn sanitize(self, config: &OutputConfig) -> Self {
        match self {
            Self::Text { content } => match sanitize_output(&content, config) {
                Ok((sanitized, _)) => Self::Text { content: sanitized },
                Err(e) => Self::error(format!("Output sanitization failed: {}", e)),
            },
            Self::Json { content } => {
                if config.validate_json
                    && let Err(e) = validate_json_output(&content)
                {
                    return Self::error(format!("JSON validation failed: {}", e));
                }

                let json_str = match serde_json::to_string_pretty(&content) {
                    Ok(s) => s,
                    Err(e) => return Self::error(format!("Failed to serialize JSON: {}", e)),
                };

                match sanitize_output(&json_str, config) {
                    // Truncated JSON is no longer JSON
                    Ok((sanitized, true)) => Self::Text { content: sanitized },
                    Ok((sanitized, false)) => match serde_json::from_str(&sanitized) {
                        Ok(v) => Self::Json { content: v },
                        Err(_) => Self::Text { content: sanitized },
                    },
                    Err(e) => Self::error(format!("Output sanitization failed: {}", e)),
                }
            }
            Self::Error { message } => {
                let error_config = OutputConfig {
                    max_size_bytes: 10 * 1024,
                    ..config.clone()
                };
                match sanitize_output(&message, &error_config) {
                    Ok((sanitized, _)) => Self::Error { message: sanitized },
                    Err(_) => Self::error("[Error message contained invalid content]"),
                }
            }
        }
    }

    /// Check if this result was truncated (looks for truncation indicator).
    pub fn was_truncated(&self) -> bool {
        match self {
            Self::Text { content } => content.contains("[Output truncated"),
            Self::Json { .. } => false,
            Self::Error { message } => message.contains("[Output truncated"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Registry for managing available tools.
///
/// Read-mostly after construction; share it across runs behind an `Arc`.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Per-tool output config overrides from user configuration.
    output_overrides: HashMap<String, OutputConfig>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a per-tool output config override.
    pub fn set_output_config(&mut self, name: impl Into<String>, config: OutputConfig) {
        self.output_overrides.insert(name.into(), config);
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a tool from an Arc.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "Replaced registered tool");
        }
    }

    /// Remove a tool. Returns whether it was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.output_overrides.remove(name);
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Descriptors of all tools, sorted by name.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> =
            self.tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Convert all tools to LLM tool definitions.
    pub fn to_llm_definitions(&self) -> Vec<corvid_llm::ToolDefinition> {
        self.list().iter().map(ToolDescriptor::to_definition).collect()
    }

    /// Natural-language catalog of every tool, one entry per tool.
    pub fn catalog(&self) -> String {
        self.list()
            .iter()
            .map(ToolDescriptor::catalog_entry)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Execute a tool by name.
    ///
    /// Never fails: an unknown tool, invalid arguments, an `Err` from the
    /// tool, a panic or a timeout all come back as [`ToolResult::Error`].
    /// Successful output is sanitized with the tool's output config.
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(name) else {
            tracing::warn!(run_id = %ctx.run_id, tool = %name, "Tool not found");
            return ToolResult::error(format!("Tool not found: {}", name));
        };

        let mut args = match args {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        if let Err(e) = tool.validate(&args) {
            tracing::debug!(run_id = %ctx.run_id, tool = %name, error = %e, "Tool arguments rejected");
            return ToolResult::error(format!("Invalid parameters for '{}': {}", name, e));
        }
        apply_defaults(&tool.parameters(), &mut args);

        let timeout = tool.timeout();
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            timeout,
            AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind(),
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                tracing::warn!(run_id = %ctx.run_id, tool = %name, error = %e, duration_ms, "Tool execution failed");
                ToolResult::error(e.to_string())
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(run_id = %ctx.run_id, tool = %name, panic = %message, "Tool panicked");
                ToolResult::error(format!("Tool '{}' failed unexpectedly: {}", name, message))
            }
            Err(_) => {
                tracing::warn!(
                    run_id = %ctx.run_id,
                    tool = %name,
                    timeout_secs = timeout.as_secs_f64(),
                    "Tool timed out"
                );
                ToolResult::error(format!(
                    "Tool '{}' timed out after {}s",
                    name,
                    format_secs(timeout)
                ))
            }
        };

        tracing::debug!(
            run_id = %ctx.run_id,
            tool = %name,
            success = result.is_success(),
            duration_ms,
            "Tool finished"
        );

        result.sanitize(&self.output_config_for(name))
    }

    /// Create a new registry containing only tools whose names are in the allowlist.
    ///
    /// Names not matching any registered tool are silently ignored.
    pub fn filtered_by_names(&self, names: &[&str]) -> ToolRegistry {
        let tools = names
            .iter()
            .filter_map(|&name| {
                self.tools
                    .get(name)
                    .map(|tool| (name.to_string(), Arc::clone(tool)))
            })
            .collect();

        let output_overrides = names
            .iter()
            .filter_map(|&name| {
                self.output_overrides
                    .get(name)
                    .map(|config| (name.to_string(), config.clone()))
            })
            .collect();

        ToolRegistry {
            tools,
            output_overrides,
        }
    }

    /// Get the output config for a tool by name.
    ///
    /// Checks configured overrides first, then per-tool defaults.
    pub fn output_config_for(&self, name: &str) -> OutputConfig {
        if let Some(config) = self.output_overrides.get(name) {
            return config.clone();
        }

        match name {
            "http_request" => OutputConfig::for_http(),
            "sql_query" => OutputConfig::for_sql(),
            "vector_search" => OutputConfig::for_search(),
            _ => OutputConfig::default(),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn format_secs(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        d.as_secs().to_string()
    } else {
        format!("{:.1}", d.as_secs_f64())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock Tool (for testing)
// ─────────────────────────────────────────────────────────────────────────────

/// A mock tool for testing.
///
/// Returns a configurable response and records the arguments it was called with.
#[cfg(test)]
#[derive(Debug)]
pub struct MockTool {
    name: String,
    description: String,
    parameters: Vec<ToolParameter>,
    response: ToolResult,
    calls: std::sync::Mutex<Vec<Value>>,
}

#[cfg(test)]
impl MockTool {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: format!("Mock tool: {}", name),
            name,
            parameters: Vec::new(),
            response: ToolResult::text("mock response"),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<ToolParameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_response(mut self, response: ToolResult) -> Self {
        self.response = response;
        self
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        self.parameters.clone()
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
        self.calls.lock().unwrap().push(params);
        Ok(self.response.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            Vec::new()
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
            panic!("index out of bounds");
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "fails"
        }
        fn description(&self) -> &str {
            "Always returns Err"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            Vec::new()
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
            Err(AgentError::tool("backend unreachable"))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps past its timeout"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            Vec::new()
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(20)
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::text("late"))
        }
    }

    fn two_param_tool() -> MockTool {
        MockTool::new("lookup").with_parameters(vec![
            ToolParameter::required("table", ParamType::String, "Table name"),
            ToolParameter::required("key", ParamType::String, "Row key"),
            ToolParameter::optional("limit", ParamType::Integer, "Max rows")
                .with_default(json!(10)),
        ])
    }

    #[test]
    fn test_param_type_accepts() {
        assert!(ParamType::Integer.accepts(&json!(3)));
        assert!(ParamType::Integer.accepts(&json!(3.0)));
        assert!(!ParamType::Integer.accepts(&json!(3.5)));
        assert!(ParamType::Number.accepts(&json!(3)));
        assert!(!ParamType::String.accepts(&json!(3)));
        assert!(ParamType::Array.accepts(&json!([1, 2])));
    }

    #[test]
    fn test_validate_reports_every_missing_parameter() {
        let tool = two_param_tool();
        let err = tool.validate(&json!({})).unwrap_err();
        assert!(matches!(err, ParameterValidationError::Multiple(_)));
        assert_eq!(err.parameter_names(), vec!["table", "key"]);
        let msg = err.to_string();
        assert!(msg.contains("'table'"));
        assert!(msg.contains("'key'"));
    }

    #[test]
    fn test_validate_reports_wrong_type() {
        let tool = two_param_tool();
        let err = tool
            .validate(&json!({"table": "t", "key": 5, "limit": "ten"}))
            .unwrap_err();
        assert_eq!(err.parameter_names(), vec!["key", "limit"]);
    }

    #[test]
    fn test_validate_rejects_non_object() {
        let err = validate_parameters(&[], &json!([1])).unwrap_err();
        assert!(err.to_string().contains("expected object"));
    }

    #[test]
    fn test_descriptor_schema() {
        let schema = two_param_tool().descriptor().json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["table"]["type"], "string");
        assert_eq!(schema["properties"]["limit"]["default"], 10);
        assert_eq!(schema["required"], json!(["table", "key"]));
    }

    #[test]
    fn test_catalog_entry() {
        let entry = two_param_tool().descriptor().catalog_entry();
        assert!(entry.starts_with("- lookup: Mock tool: lookup"));
        assert!(entry.contains("table (string, required): Table name"));
        assert!(entry.contains("limit (integer, optional)"));
    }

    #[test]
    fn test_tool_result_to_value() {
        assert_eq!(
            ToolResult::json(json!({"result": 6.0})).to_value(),
            json!({"success": true, "result": 6.0})
        );
        assert_eq!(
            ToolResult::text("ok").to_value(),
            json!({"success": true, "output": "ok"})
        );
        assert_eq!(
            ToolResult::json(json!([1, 2])).to_value(),
            json!({"success": true, "result": [1, 2]})
        );
        assert_eq!(
            ToolResult::error("nope").to_value(),
            json!({"success": false, "error": "nope"})
        );
    }

    #[test]
    fn test_error_llm_content_prefix() {
        assert_eq!(ToolResult::error("bad").to_llm_content(), "Error: bad");
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let config = OutputConfig::with_max_size(40).with_truncation_message("[cut]");
        let (out, truncated) = sanitize_output(&"é".repeat(100), &config).unwrap();
        assert!(truncated);
        assert!(out.len() <= 40);
        assert!(out.ends_with("[cut]"));
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        let (out, truncated) =
            sanitize_output("a\u{0007}b\n\tc\0", &OutputConfig::default()).unwrap();
        assert_eq!(out, "ab\n\tc");
        assert!(!truncated);
    }

    #[test]
    fn test_sanitize_rejects_binary() {
        let binary = "\0".repeat(200);
        assert!(matches!(
            sanitize_output(&binary, &OutputConfig::default()),
            Err(OutputSanitizationError::BinaryContent { .. })
        ));
    }

    #[test]
    fn test_json_depth_limit() {
        let mut deep = json!(1);
        for _ in 0..60 {
            deep = json!([deep]);
        }
        assert!(validate_json_output(&deep).is_err());
        let result = ToolResult::json(deep).sanitize(&OutputConfig::default());
        assert!(result.is_error());
    }

    #[test]
    fn test_truncated_json_becomes_text() {
        let big = json!({"rows": vec!["x".repeat(50); 10]});
        let result = ToolResult::json(big).sanitize(&OutputConfig::with_max_size(100));
        assert!(matches!(result, ToolResult::Text { .. }));
        assert!(result.was_truncated());
    }

    #[tokio::test]
    async fn test_registry_unknown_tool() {
        let registry = ToolRegistry::new();
        let result = registry
            .execute("http_request", json!({}), &ToolContext::default())
            .await;
        assert_eq!(
            result.to_value(),
            json!({"success": false, "error": "Tool not found: http_request"})
        );
    }

    #[tokio::test]
    async fn test_registry_missing_params_not_executed() {
        let tool = Arc::new(two_param_tool());
        let mut registry = ToolRegistry::new();
        registry.register_arc(tool.clone());

        let result = registry
            .execute("lookup", json!({"table": "users"}), &ToolContext::default())
            .await;
        let msg = result.error_message().unwrap();
        assert!(msg.contains("'key'"));
        assert!(!msg.contains("'table'"));
        assert_eq!(tool.call_count(), 0);
    }

    #[tokio::test]
    async fn test_registry_applies_defaults() {
        let tool = Arc::new(two_param_tool());
        let mut registry = ToolRegistry::new();
        registry.register_arc(tool.clone());

        let result = registry
            .execute(
                "lookup",
                json!({"table": "users", "key": "1"}),
                &ToolContext::default(),
            )
            .await;
        assert!(result.is_success());
        assert_eq!(tool.calls()[0]["limit"], 10);
    }

    #[tokio::test]
    async fn test_registry_null_args_become_object() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new("noop"));
        let result = registry
            .execute("noop", Value::Null, &ToolContext::default())
            .await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_registry_catches_panic() {
        let mut registry = ToolRegistry::new();
        registry.register(PanickingTool);
        let result = registry
            .execute("boom", json!({}), &ToolContext::default())
            .await;
        let msg = result.error_message().unwrap();
        assert!(msg.contains("failed unexpectedly"));
        assert!(msg.contains("index out of bounds"));
    }

    #[tokio::test]
    async fn test_registry_converts_err() {
        let mut registry = ToolRegistry::new();
        registry.register(FailingTool);
        let result = registry
            .execute("fails", json!({}), &ToolContext::default())
            .await;
        assert_eq!(
            result.error_message(),
            Some("Tool error: backend unreachable")
        );
    }

    #[tokio::test]
    async fn test_registry_enforces_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let result = registry
            .execute("slow", json!({}), &ToolContext::default())
            .await;
        assert_eq!(
            result.error_message(),
            Some("Tool 'slow' timed out after 0.0s")
        );
    }

    #[test]
    fn test_register_unregister_list() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new("b"));
        registry.register(MockTool::new("a"));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.list()[0].name, "a");
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert!(registry.get("a").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_filtered_by_names() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new("calculator"));
        registry.register(MockTool::new("http_request"));
        registry.set_output_config("calculator", OutputConfig::with_max_size(10));

        let filtered = registry.filtered_by_names(&["calculator", "missing"]);
        assert_eq!(filtered.names(), vec!["calculator"]);
        assert_eq!(filtered.output_config_for("calculator").max_size_bytes, 10);
    }

    #[test]
    fn test_output_config_defaults() {
        let registry = ToolRegistry::new();
        assert_eq!(
            registry.output_config_for("http_request").max_size_bytes,
            200 * 1024
        );
        assert_eq!(
            registry.output_config_for("other").max_size_bytes,
            DEFAULT_MAX_OUTPUT_SIZE
        );
    }
}
