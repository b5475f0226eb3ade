//! Date and time arithmetic.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Value, json};
use std::fmt::Write;

use crate::error::Result;
use crate::tool::{ParamExt, ParamType, Tool, ToolContext, ToolParameter, ToolResult};

const OPERATIONS: &[&str] = &["now", "add", "subtract", "diff", "format", "parse", "weekday"];

/// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` (midnight UTC).
fn parse_instant(text: &str) -> std::result::Result<DateTime<Utc>, String> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::default()).and_utc());
    }
    Err(format!(
        "Cannot parse date '{text}'; use RFC 3339 or YYYY-MM-DD"
    ))
}

fn unit_duration(amount: i64, unit: &str) -> std::result::Result<ChronoDuration, String> {
    let duration = match unit {
        "weeks" | "week" => ChronoDuration::try_weeks(amount),
        "days" | "day" => ChronoDuration::try_days(amount),
        "hours" | "hour" => ChronoDuration::try_hours(amount),
        "minutes" | "minute" => ChronoDuration::try_minutes(amount),
        "seconds" | "second" => ChronoDuration::try_seconds(amount),
        other => {
            return Err(format!(
                "Unknown unit '{other}'; use weeks, days, hours, minutes or seconds"
            ));
        }
    };
    duration.ok_or_else(|| format!("{amount} {unit} is out of range"))
}

fn in_unit(duration: ChronoDuration, unit: &str) -> std::result::Result<f64, String> {
    let seconds = duration.num_milliseconds() as f64 / 1000.0;
    let divisor = match unit {
        "weeks" | "week" => 604_800.0,
        "days" | "day" => 86_400.0,
        "hours" | "hour" => 3_600.0,
        "minutes" | "minute" => 60.0,
        "seconds" | "second" => 1.0,
        other => return Err(format!("Unknown unit '{other}'")),
    };
    Ok(seconds / divisor)
}

fn describe(dt: DateTime<Utc>) -> Value {
    json!({
        "result": dt.to_rfc3339(),
        "date": dt.format("%Y-%m-%d").to_string(),
        "weekday": dt.format("%A").to_string(),
    })
}

/// Tool for date/time arithmetic over UTC instants.
#[derive(Debug, Clone, Default)]
pub struct DateTimeTool;

impl DateTimeTool {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, params: &Value) -> std::result::Result<Value, String> {
        let operation = params.optional_str("operation").unwrap_or("now");
        let date = || -> std::result::Result<DateTime<Utc>, String> {
            parse_instant(
                params
                    .optional_str("date")
                    .ok_or_else(|| format!("Operation '{operation}' needs 'date'"))?,
            )
        };
        let unit = params.optional_str("unit").unwrap_or("days");

        match operation {
            "now" => Ok(describe(Utc::now())),
            "add" | "subtract" => {
                let amount = params.optional_i64("amount", 0);
                let amount = if operation == "subtract" { -amount } else { amount };
                let shifted = date()?
                    .checked_add_signed(unit_duration(amount, unit)?)
                    .ok_or("Resulting date is out of range")?;
                Ok(describe(shifted))
            }
            "diff" => {
                let end = parse_instant(
                    params
                        .optional_str("end")
                        .ok_or("Operation 'diff' needs 'end'")?,
                )?;
                let value = in_unit(end - date()?, unit)?;
                Ok(json!({ "difference": value, "unit": unit }))
            }
            "format" => {
                let pattern = params.optional_str("format").unwrap_or("%Y-%m-%d");
                let mut out = String::new();
                write!(out, "{}", date()?.format(pattern))
                    .map_err(|_| format!("Invalid format string '{pattern}'"))?;
                Ok(json!({ "result": out }))
            }
            "parse" => {
                let dt = match params.optional_str("format") {
                    Some(pattern) => {
                        let text = params
                            .optional_str("date")
                            .ok_or("Operation 'parse' needs 'date'")?;
                        NaiveDateTime::parse_from_str(text, pattern)
                            .map(|n| n.and_utc())
                            .or_else(|_| {
                                NaiveDate::parse_from_str(text, pattern)
                                    .map(|d| d.and_time(chrono::NaiveTime::default()).and_utc())
                            })
                            .map_err(|e| format!("Cannot parse '{text}' with '{pattern}': {e}"))?
                    }
                    None => date()?,
                };
                Ok(describe(dt))
            }
            "weekday" => Ok(json!({ "weekday": date()?.format("%A").to_string() })),
            other => Err(format!(
                "Unknown operation '{other}'; expected one of {}",
                OPERATIONS.join(", ")
            )),
        }
    }
}

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "datetime"
    }

    fn description(&self) -> &str {
        "Date and time arithmetic in UTC. Operations: now, add, subtract, diff, format, parse, \
         weekday. Dates are RFC 3339 timestamps or YYYY-MM-DD."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required(
                "operation",
                ParamType::String,
                "now, add, subtract, diff, format, parse or weekday",
            ),
            ToolParameter::optional("date", ParamType::String, "The input date or timestamp"),
            ToolParameter::optional("end", ParamType::String, "End date for diff"),
            ToolParameter::optional("amount", ParamType::Integer, "Amount for add/subtract"),
            ToolParameter::optional(
                "unit",
                ParamType::String,
                "weeks, days, hours, minutes or seconds",
            )
            .with_default(json!("days")),
            ToolParameter::optional(
                "format",
                ParamType::String,
                "strftime pattern for format/parse, e.g. %d/%m/%Y",
            ),
        ]
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
        Ok(match self.run(&params) {
            Ok(value) => ToolResult::json(value),
            Err(message) => ToolResult::error(message),
        })
    }
}
