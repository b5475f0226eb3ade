//! Descriptive statistics over a list of numbers.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::error::Result;
use crate::tool::{
    ParamResult, ParamType, ParameterValidationError, Tool, ToolContext, ToolParameter, ToolResult,
    validate_parameters,
};

/// Statistics computed when the caller names none.
pub const DEFAULT_STATISTICS: &[&str] = &["count", "mean", "median", "min", "max", "stdev"];

const ALL_STATISTICS: &[&str] = &[
    "count", "sum", "mean", "median", "mode", "min", "max", "range", "variance", "stdev",
];

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Most frequent value; ties go to the smallest.
fn mode(sorted: &[f64]) -> f64 {
    let mut best = sorted[0];
    let mut best_run = 0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        if j - i > best_run {
            best_run = j - i;
            best = sorted[i];
        }
        i = j;
    }
    best
}

/// Sample variance; `None` below two points.
fn variance(data: &[f64]) -> Option<f64> {
    if data.len() < 2 {
        return None;
    }
    let m = mean(data);
    Some(data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64)
}

/// Compute the named statistics. `data` must be non-empty.
pub fn describe(data: &[f64], statistics: &[&str]) -> std::result::Result<Map<String, Value>, String> {
    if data.is_empty() {
        return Err("'data' must contain at least one number".to_string());
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut out = Map::new();
    for &name in statistics {
        let value = match name {
            "count" => json!(data.len()),
            "sum" => json!(data.iter().sum::<f64>()),
            "mean" => json!(mean(data)),
            "median" => json!(median(&sorted)),
            "mode" => json!(mode(&sorted)),
            "min" => json!(sorted[0]),
            "max" => json!(sorted[sorted.len() - 1]),
            "range" => json!(sorted[sorted.len() - 1] - sorted[0]),
            "variance" => json!(variance(data)),
            "stdev" => json!(variance(data).map(f64::sqrt)),
            other => {
                return Err(format!(
                    "Unknown statistic '{other}'; expected one of {}",
                    ALL_STATISTICS.join(", ")
                ));
            }
        };
        out.insert(name.to_string(), value);
    }
    Ok(out)
}

/// Tool computing summary statistics.
#[derive(Debug, Clone, Default)]
pub struct StatisticsTool;

impl StatisticsTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for StatisticsTool {
    fn name(&self) -> &str {
        "statistics"
    }

    fn description(&self) -> &str {
        "Compute summary statistics for a list of numbers: count, sum, mean, median, mode, \
         min, max, range, variance and stdev (sample)."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("data", ParamType::Array, "The numbers to summarize"),
            ToolParameter::optional(
                "statistics",
                ParamType::Array,
                "Which statistics to compute; defaults to count, mean, median, min, max, stdev",
            ),
        ]
    }

    fn validate(&self, args: &Value) -> ParamResult<()> {
        validate_parameters(&self.parameters(), args)?;
        let Some(names) = args.get("statistics").and_then(Value::as_array) else {
            return Ok(());
        };
        let errors = names
            .iter()
            .filter(|name| !name.as_str().is_some_and(|n| ALL_STATISTICS.contains(&n)))
            .map(|name| {
                ParameterValidationError::invalid_value(
                    "statistics",
                    name.as_str().map_or_else(|| name.to_string(), str::to_string),
                    format!("expected one of {}", ALL_STATISTICS.join(", ")),
                )
            })
            .collect();
        ParameterValidationError::from_errors(errors).map_or(Ok(()), Err)
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let raw = params
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut data = Vec::with_capacity(raw.len());
        for (i, item) in raw.iter().enumerate() {
            let number = match item {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match number {
                Some(n) if n.is_finite() => data.push(n),
                _ => {
                    return Ok(ToolResult::error(format!(
                        "data[{i}] is not a number: {item}"
                    )));
                }
            }
        }

        let requested: Vec<&str> = match params.get("statistics").and_then(Value::as_array) {
            Some(names) if !names.is_empty() => names.iter().filter_map(Value::as_str).collect(),
            _ => DEFAULT_STATISTICS.to_vec(),
        };

        Ok(match describe(&data, &requested) {
            Ok(stats) => ToolResult::json(Value::Object(stats)),
            Err(message) => ToolResult::error(message),
        })
    }
}
