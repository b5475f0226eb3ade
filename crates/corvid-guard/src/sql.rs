//! SQL validation and rewriting for read-only query tools.
//!
//! [`QuerySanitizer::sanitize`] is a pattern-based validator: it never parses
//! SQL, it only refuses anything that could mutate data, smuggle a second
//! statement, or carry a common injection fingerprint, and then bounds the
//! number of returned rows.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Default row cap when none is configured.
pub const DEFAULT_MAX_ROWS: u32 = 1000;

/// Keywords that make a statement unsafe wherever they appear.
pub const MUTATING_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "INSERT", "UPDATE", "REPLACE", "GRANT",
    "REVOKE", "MERGE", "ATTACH", "DETACH", "PRAGMA", "EXEC", "EXECUTE", "CALL",
];

struct Patterns {
    mutating: Regex,
    select_into: Regex,
    starts_with_select: Regex,
    tautology: Regex,
    always_true: Regex,
    union_select: Regex,
    time_based: Regex,
    trailing_limit: Regex,
}

static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| {
    let compile = |p: &str| Regex::new(p).expect("static SQL pattern compiles");
    Patterns {
        mutating: compile(&format!(r"(?i)\b({})\b", MUTATING_KEYWORDS.join("|"))),
        select_into: compile(r"(?i)\bINTO\b"),
        starts_with_select: compile(r"(?i)^SELECT\b"),
        tautology: compile(
            r#"(?i)\bOR\s+('[^']*'|"[^"]*"|[\w.]+)\s*=\s*('[^']*'|"[^"]*"|[\w.]+)"#,
        ),
        always_true: compile(r"(?i)\bOR\s+(TRUE|NOT\s+FALSE)\b"),
        union_select: compile(r"(?i)\bUNION\s+(ALL\s+|DISTINCT\s+)?\(?\s*SELECT\b"),
        time_based: compile(
            r"(?i)(\b(SLEEP|BENCHMARK|PG_SLEEP)\s*\(|\bWAITFOR\s+(DELAY|TIME)\b|\bDBMS_LOCK\s*\.\s*SLEEP\b)",
        ),
        trailing_limit: compile(r"(?i)\bLIMIT\s+(\d+)(?:\s*(,|OFFSET)\s*(\d+))?\s*$"),
    }
});

/// Outcome of validating one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

/// Validates and rewrites SQL for read-only execution.
#[derive(Debug, Clone)]
pub struct QuerySanitizer {
    max_rows: u32,
}

impl Default for QuerySanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ROWS)
    }
}

impl QuerySanitizer {
    pub fn new(max_rows: u32) -> Self {
        Self {
            max_rows: max_rows.max(1),
        }
    }

    pub fn max_rows(&self) -> u32 {
        self.max_rows
    }

    /// Validate `sql` and bound it by the configured maximum row count.
    pub fn sanitize(&self, sql: &str) -> (String, ValidationResult) {
        self.sanitize_with_limit(sql, None)
    }

    /// Validate `sql`; a `requested` limit smaller than the maximum is honored.
    ///
    /// The returned SQL is only meant to be executed when `is_valid` is true.
    pub fn sanitize_with_limit(
        &self,
        sql: &str,
        requested: Option<u32>,
    ) -> (String, ValidationResult) {
        let p = &*PATTERNS;
        let mut result = ValidationResult::new();
        let trimmed = sql.trim();

        if trimmed.is_empty() {
            result.error("Query is empty");
            return (String::new(), result);
        }

        // Keyword scan runs over the raw text, comments and literals included.
        let found: BTreeSet<String> = p
            .mutating
            .captures_iter(trimmed)
            .map(|c| c[1].to_ascii_uppercase())
            .collect();
        for keyword in found {
            result.error(format!("Forbidden keyword: {keyword}"));
        }
        if p.select_into.is_match(trimmed) {
            result.error("SELECT ... INTO is not allowed");
        }

        let statement = strip_trailing_semicolon(trimmed);
        if statement.contains(';') {
            result.error("Multiple statements are not allowed");
        }

        if !p.starts_with_select.is_match(statement) {
            result.error("Only SELECT statements are allowed");
        }

        if statement.contains("--") || statement.contains("/*") || statement.contains("*/") {
            result.error("SQL comments are not allowed");
        }

        let tautology = p.tautology.captures_iter(statement).any(|c| {
            let (left, right) = (unquote(&c[1]), unquote(&c[2]));
            left.eq_ignore_ascii_case(right)
        });
        if tautology || p.always_true.is_match(statement) {
            result.error("Always-true condition detected (possible injection)");
        }

        if p.union_select.is_match(statement) {
            result.error("UNION SELECT is not allowed");
        }

        if p.time_based.is_match(statement) {
            result.error("Time-delay functions are not allowed");
        }

        if !result.is_valid {
            tracing::warn!(
                errors = ?result.errors,
                sql = %truncate_for_log(trimmed),
                "Rejected unsafe SQL"
            );
            return (trimmed.to_string(), result);
        }

        let limit = requested.unwrap_or(self.max_rows).clamp(1, self.max_rows);
        let safe = self.apply_limit(statement, limit, &mut result);
        (safe, result)
    }

    fn apply_limit(&self, statement: &str, limit: u32, result: &mut ValidationResult) -> String {
        let p = &*PATTERNS;
        let Some(caps) = p.trailing_limit.captures(statement) else {
            return format!("{statement} LIMIT {limit}");
        };

        // `LIMIT offset, count` puts the row count second.
        let (count_group, existing) = match caps.get(2).map(|m| m.as_str()) {
            Some(",") => (3, &caps[3]),
            _ => (1, &caps[1]),
        };
        let existing: u64 = existing.parse().unwrap_or(u64::MAX);
        if existing <= u64::from(limit) {
            return statement.to_string();
        }

        let Some(m) = caps.get(count_group) else {
            return format!("{statement} LIMIT {limit}");
        };
        result.warn(format!("LIMIT {existing} reduced to {limit}"));
        format!(
            "{}{}{}",
            &statement[..m.start()],
            limit,
            &statement[m.end()..]
        )
    }
}

fn strip_trailing_semicolon(sql: &str) -> &str {
    let sql = sql.trim_end();
    sql.strip_suffix(';').map(str::trim_end).unwrap_or(sql)
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '\'' || c == '"')
}

fn truncate_for_log(sql: &str) -> String {
    if sql.chars().count() > 200 {
        let head: String = sql.chars().take(200).collect();
        format!("{head}...")
    } else {
        sql.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
