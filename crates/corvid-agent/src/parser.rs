//! Parsing of free-text model output.
//!
//! Each parser is an ordered list of attempts, each returning `Some` or
//! `None`; the first hit wins and callers supply the final default. Nothing
//! here performs I/O, so the state machines built on top can be tested
//! against fixed transcripts.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Maximum steps taken from a plan recovered line-by-line.
pub const MAX_FALLBACK_PLAN_STEPS: usize = 5;

struct Patterns {
    final_answer: Regex,
    thought: Regex,
    action: Regex,
    action_input: Regex,
    fence: Regex,
    list_marker: Regex,
}

static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| Patterns {
    final_answer: Regex::new(r"(?is)final\s+answer\s*:\s*(.*)$").expect("valid regex"),
    thought: Regex::new(
        r"(?is)thought\s*:\s*(.*?)(?:\n\s*(?:action|action\s+input|final\s+answer|observation)\s*:|$)",
    )
    .expect("valid regex"),
    action: Regex::new(r"(?im)^\s*action\s*:\s*`?([A-Za-z_][A-Za-z0-9_.\-]*)`?")
        .expect("valid regex"),
    action_input: Regex::new(
        r"(?is)action\s+input\s*:\s*(.*?)(?:\n\s*(?:observation|thought|final\s+answer)\s*:|$)",
    )
    .expect("valid regex"),
    fence: Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*\n?(.*?)```").expect("valid regex"),
    list_marker: Regex::new(r"(?i)^\s*(?:[-*+•]\s+|\d+\s*[.)]\s*|step\s*\d+\s*[:.)-]\s*)")
        .expect("valid regex"),
});

// ─────────────────────────────────────────────────────────────────────────────
// ReAct output
// ─────────────────────────────────────────────────────────────────────────────

/// Arguments following `Action Input:`.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionInput {
    /// Parsed JSON arguments.
    Json(Value),
    /// Text that could not be read as JSON.
    Malformed(String),
}

/// A tool invocation recovered from model text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAction {
    pub tool: String,
    pub input: ActionInput,
}

/// Everything recognised in one model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReactOutput {
    pub thought: Option<String>,
    pub action: Option<ParsedAction>,
    pub final_answer: Option<String>,
}

impl ReactOutput {
    /// Neither an action nor a final answer was found.
    pub fn is_no_match(&self) -> bool {
        self.action.is_none() && self.final_answer.is_none()
    }
}

/// Parse a `Thought: / Action: / Action Input: / Final Answer:` response.
///
/// A `Final Answer:` marker takes precedence over any action in the same
/// response.
pub fn parse_react_output(text: &str) -> ReactOutput {
    let patterns = &*PATTERNS;

    let thought = patterns
        .thought
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty());

    if let Some(answer) = patterns
        .final_answer
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
    {
        return ReactOutput {
            thought,
            action: None,
            final_answer: Some(answer),
        };
    }

    let action = patterns
        .action
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|tool| {
            let raw = patterns
                .action_input
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let input = match parse_action_input(raw) {
                Some(value) => ActionInput::Json(value),
                None => ActionInput::Malformed(raw.trim().to_string()),
            };
            ParsedAction {
                tool: tool.as_str().to_string(),
                input,
            }
        });

    ReactOutput {
        thought,
        action,
        final_answer: None,
    }
}

/// Read action arguments as JSON.
///
/// Tries the trimmed text as-is, then the outermost `{...}` span with line
/// breaks and tabs collapsed to spaces. Empty input means no arguments.
pub fn parse_action_input(raw: &str) -> Option<Value> {
    let text = strip_code_fences(raw);
    if text.is_empty() {
        return Some(Value::Object(serde_json::Map::new()));
    }

    let attempts: [fn(&str) -> Option<Value>; 2] = [parse_direct, parse_collapsed_object];
    attempts.iter().find_map(|attempt| attempt(&text))
}

fn parse_direct(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

fn parse_collapsed_object(text: &str) -> Option<Value> {
    let span = embedded_span(text, '{', '}')?;
    let collapsed: String = span
        .chars()
        .map(|c| if matches!(c, '\n' | '\r' | '\t') { ' ' } else { c })
        .collect();
    serde_json::from_str(collapsed.trim()).ok()
}

fn embedded_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (start < end).then(|| &text[start..=end])
}

/// Remove a surrounding Markdown code fence, if any, and trim.
pub fn strip_code_fences(text: &str) -> String {
    match PATTERNS.fence.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim().to_string(),
        None => text.trim().trim_matches('`').trim().to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plans
// ─────────────────────────────────────────────────────────────────────────────

/// Parse an ordered list of plan steps.
///
/// Tries a JSON array (strings, or objects with a `step`/`description`
/// field), then a line split with list markers stripped, capped at
/// [`MAX_FALLBACK_PLAN_STEPS`]. Returns `None` when nothing usable is found;
/// the caller supplies the default plan.
pub fn parse_plan(text: &str) -> Option<Vec<String>> {
    let attempts: [fn(&str) -> Option<Vec<String>>; 2] = [plan_from_json, plan_from_lines];
    attempts.iter().find_map(|attempt| attempt(text))
}

fn plan_from_json(text: &str) -> Option<Vec<String>> {
    let body = strip_code_fences(text);
    let value: Value = serde_json::from_str(&body)
        .ok()
        .or_else(|| serde_json::from_str(embedded_span(&body, '[', ']')?).ok())?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("steps").or_else(|| map.remove("plan")) {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };

    let steps: Vec<String> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s),
            Value::Object(map) => map
                .get("step")
                .or_else(|| map.get("description"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    (!steps.is_empty()).then_some(steps)
}

fn plan_from_lines(text: &str) -> Option<Vec<String>> {
    let body = strip_code_fences(text);
    let steps: Vec<String> = body
        .lines()
        .map(|line| PATTERNS.list_marker.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty() && !matches!(line.as_str(), "[" | "]"))
        .take(MAX_FALLBACK_PLAN_STEPS)
        .collect();

    (!steps.is_empty()).then_some(steps)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn arbitrary_text_never_panics(text in "\\PC{0,200}") {
            let _ = parse_react_output(&text);
            let _ = parse_plan(&text);
        }

        /// A final answer anywhere wins over an action earlier in the text.
        #[test]
        fn final_answer_beats_action(tool in "[a-z_]{1,20}", n in any::<i32>()) {
            let text = format!(
                "Action: {tool}\nAction Input: {{\"x\": {n}}}\nFinal Answer: done"
            );
            let out = parse_react_output(&text);
            prop_assert!(out.action.is_none());
            prop_assert_eq!(out.final_answer.as_deref(), Some("done"));
        }

        #[test]
        fn action_name_and_json_recovered(tool in "[a-z_]{1,20}", n in any::<i32>()) {
            let text = format!("Thought: go\nAction: {tool}\nAction Input: {{\"x\": {n}}}");
            let action = parse_react_output(&text).action.unwrap();
            prop_assert_eq!(action.tool, tool);
            prop_assert_eq!(action.input, ActionInput::Json(serde_json::json!({ "x": n })));
        }
    }
}
