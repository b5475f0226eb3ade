//! Natural language to SQL generation.

use async_trait::async_trait;
use serde_json::{Value, json};

use corvid_guard::QuerySanitizer;
use corvid_llm::{CompletionRequest, Message, SharedBackend};

use crate::error::Result;
use crate::parser::strip_code_fences;
use crate::tool::{ParamExt, ParamType, Tool, ToolContext, ToolParameter, ToolResult};

const SYSTEM_PROMPT: &str = "You translate questions into a single SQLite SELECT statement. \
Use only the tables and columns in the schema. Respond with the SQL only, no explanation.";

/// Tool that asks the model for SQL and validates what comes back.
///
/// The SQL is returned, not executed; `sql_query` runs it.
#[derive(Clone)]
pub struct TextToSqlTool {
    backend: SharedBackend,
    model: String,
    schema: String,
    sanitizer: QuerySanitizer,
}

impl TextToSqlTool {
    pub fn new(
        backend: SharedBackend,
        model: impl Into<String>,
        schema: impl Into<String>,
        sanitizer: QuerySanitizer,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            schema: schema.into(),
            sanitizer,
        }
    }
}

impl std::fmt::Debug for TextToSqlTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextToSqlTool")
            .field("backend", &self.backend.name())
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for TextToSqlTool {
    fn name(&self) -> &str {
        "text_to_sql"
    }

    fn description(&self) -> &str {
        "Generate a read-only SQL query from a natural language question about the database. \
         Returns the SQL and whether it passed validation; run it with sql_query."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "question",
            ParamType::String,
            "The question to answer with SQL",
        )]
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let question = params.required_str("question")?;

        let request = CompletionRequest::new(
            self.model.clone(),
            vec![
                Message::system(format!("{SYSTEM_PROMPT}\n\nSchema:\n{}", self.schema)),
                Message::user(question),
            ],
            512,
        )
        .with_temperature(0.0);

        let response = match self.backend.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(run_id = %ctx.run_id, error = %e, "SQL generation failed");
                return Ok(ToolResult::error(format!("SQL generation failed: {e}")));
            }
        };

        let generated = strip_code_fences(&response.text());
        if generated.is_empty() {
            return Ok(ToolResult::error("The model returned no SQL"));
        }
        let (sql, validation) = self.sanitizer.sanitize(&generated);

        Ok(ToolResult::json(json!({
            "question": question,
            "sql": sql,
            "valid": validation.is_valid,
            "errors": validation.errors,
            "warnings": validation.warnings,
        })))
    }
}
