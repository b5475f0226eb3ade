//! Shared context for one pipeline run.
//!
//! The context maps each node id to that node's contribution, plus the
//! reserved `_initial_input` entry holding the caller's request payload.
//! Nodes get a read-only view; only the executor adds entries, and an entry
//! is never replaced once written.
//!
//! # Path Syntax
//!
//! - `_initial_input.question`: a field of the request payload
//! - `retrieve`: a node's whole contribution
//! - `retrieve.documents[0].text`: nested field and array index access
//!
//! Templates embed paths in text as `{{retrieve.documents[0].text}}`.

use corvid_agent::CancellationToken;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{PipelineError, Result};

/// Key holding the caller's original request payload.
pub const INITIAL_INPUT: &str = "_initial_input";

/// Accumulating node outputs for one run.
///
/// Also carries the run's cancellation token so long-running nodes can stop
/// early; the token is not part of the serialized form.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct NodeContext {
    entries: Map<String, Value>,
    #[serde(skip)]
    cancellation: CancellationToken,
}

impl PartialEq for NodeContext {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl NodeContext {
    /// Start a context from the caller's request payload.
    pub fn new(initial_input: Value) -> Self {
        let mut entries = Map::new();
        entries.insert(INITIAL_INPUT.to_string(), initial_input);
        Self {
            entries,
            cancellation: CancellationToken::new(),
        }
    }

    /// Tie the context to a run's cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Cancelled when the run is.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn initial_input(&self) -> &Value {
        self.entries.get(INITIAL_INPUT).unwrap_or(&Value::Null)
    }

    /// A node's contribution.
    pub fn get(&self, node_id: &str) -> Option<&Value> {
        self.entries.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.entries.contains_key(node_id)
    }

    /// Ids of nodes that have contributed, excluding the initial input.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .map(String::as_str)
            .filter(|k| *k != INITIAL_INPUT)
    }

    /// Resolve a dotted path against the context.
    pub fn resolve(&self, path: &str) -> Result<&Value> {
        let segments = parse_path_segments(path.trim());
        let Some(root) = segments.first() else {
            return Err(not_found(path, "empty path"));
        };

        let root_value = self
            .entries
            .get(root.name.as_str())
            .ok_or_else(|| not_found(path, format!("unknown node '{}'", root.name)))?;
        let mut current = match root.index {
            Some(i) => root_value
                .get(i)
                .ok_or_else(|| not_found(path, format!("cannot resolve segment '{root}'")))?,
            None => root_value,
        };

        for segment in &segments[1..] {
            current = navigate_segment(current, segment)
                .ok_or_else(|| not_found(path, format!("cannot resolve segment '{segment}'")))?;
        }
        Ok(current)
    }

    /// Resolve a path, treating a missing value as `None`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        self.resolve(path).ok()
    }

    /// Replace every `{{path}}` in `template` with the resolved value.
    pub fn render(&self, template: &str) -> Result<String> {
        let mut out = template.to_string();
        for expr in parse_template_expressions(template) {
            let value = self.resolve(&expr.path)?;
            out = out.replace(&expr.full_match, &value_to_string(value));
        }
        Ok(out)
    }

    /// Record a node's contribution. Each id is written at most once.
    pub(crate) fn insert(&mut self, node_id: &str, contribution: Value) -> Result<()> {
        if self.entries.contains_key(node_id) {
            return Err(PipelineError::DuplicateContribution(node_id.to_string()));
        }
        self.entries.insert(node_id.to_string(), contribution);
        Ok(())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.entries)
    }
}

fn not_found(path: &str, reason: impl Into<String>) -> PipelineError {
    PipelineError::PathNotFound {
        path: path.to_string(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Template expression parsing
// ---------------------------------------------------------------------------

/// A parsed `{{expression}}` occurrence in a string.
#[derive(Debug)]
struct TemplateExpression {
    /// The full match including braces.
    full_match: String,
    /// The inner path.
    path: String,
}

/// Find all `{{...}}` expressions in a string.
fn parse_template_expressions(s: &str) -> Vec<TemplateExpression> {
    let mut results = Vec::new();
    let mut remaining = s;

    while let Some(start) = remaining.find("{{") {
        let Some(end) = remaining[start..].find("}}") else {
            break; // Unclosed `{{`
        };
        let full_end = start + end + 2;
        let inner = remaining[start + 2..start + end].trim();
        if !inner.is_empty() {
            results.push(TemplateExpression {
                full_match: remaining[start..full_end].to_string(),
                path: inner.to_string(),
            });
        }
        remaining = &remaining[full_end..];
    }

    results
}

/// Paths referenced by `{{...}}` placeholders in a template.
pub(crate) fn template_paths(template: &str) -> Vec<String> {
    parse_template_expressions(template)
        .into_iter()
        .map(|expr| expr.path)
        .collect()
}

// ---------------------------------------------------------------------------
// Path navigation
// ---------------------------------------------------------------------------

/// A segment of a dotted path, optionally with an array index.
#[derive(Debug)]
struct PathSegment {
    name: String,
    index: Option<usize>,
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}[{}]", self.name, i),
            None => write!(f, "{}", self.name),
        }
    }
}

/// `"node.items[0].name"` → `[("node", None), ("items", Some(0)), ("name", None)]`
fn parse_path_segments(path: &str) -> Vec<PathSegment> {
    if path.is_empty() {
        return Vec::new();
    }
    path.split('.')
        .map(|part| {
            if let Some(bracket_start) = part.find('[')
                && let Some(bracket_end) = part.find(']')
                && bracket_end > bracket_start
            {
                return PathSegment {
                    name: part[..bracket_start].to_string(),
                    index: part[bracket_start + 1..bracket_end].parse::<usize>().ok(),
                };
            }
            PathSegment {
                name: part.to_string(),
                index: None,
            }
        })
        .collect()
}

fn navigate_segment<'a>(value: &'a Value, segment: &PathSegment) -> Option<&'a Value> {
    let field = if segment.name.is_empty() {
        value
    } else {
        value.get(&segment.name)?
    };

    match segment.index {
        Some(i) => field.get(i),
        None => Some(field),
    }
}

/// Text form of a value for interpolation into prompts.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "null".to_string()),
    }
}
