//! Completion node: one call to the completion endpoint.

use std::time::Duration;

use async_trait::async_trait;
use corvid_llm::{CompletionRequest, Message, SharedBackend, with_retry};
use serde_json::{Value, json};

use crate::context::{NodeContext, value_to_string};
use crate::error::Result;
use crate::node::Node;

const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_RETRIES: u32 = 2;

/// Sends resolved user content (plus an optional context block) to the
/// model and contributes `{text, model, usage}`, or `{text: null, error}`
/// when the call fails.
pub struct CompletionNode {
    id: String,
    backend: SharedBackend,
    model: String,
    input_path: String,
    context_path: Option<String>,
    system: Option<String>,
    prompt: Option<String>,
    max_tokens: u32,
    temperature: Option<f32>,
    retries: u32,
    retry_backoff: Duration,
}

impl CompletionNode {
    pub fn new(
        id: impl Into<String>,
        backend: SharedBackend,
        model: impl Into<String>,
        input_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            backend,
            model: model.into(),
            input_path: input_path.into(),
            context_path: None,
            system: None,
            prompt: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            retries: DEFAULT_RETRIES,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Read supporting context (usually a retrieval node) from this path.
    pub fn with_context_path(mut self, path: impl Into<String>) -> Self {
        self.context_path = Some(path.into());
        self
    }

    /// System message template; `{{path}}` placeholders are rendered.
    pub fn with_system(mut self, template: impl Into<String>) -> Self {
        self.system = Some(template.into());
        self
    }

    /// User message template. Replaces the value at `input_path` when set.
    pub fn with_prompt(mut self, template: impl Into<String>) -> Self {
        self.prompt = Some(template.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.retry_backoff = backoff;
        self
    }

    fn user_content(&self, ctx: &NodeContext) -> Result<String> {
        let content = match &self.prompt {
            Some(template) => ctx.render(template)?,
            None => value_to_string(ctx.resolve(&self.input_path)?),
        };

        let Some(path) = &self.context_path else {
            return Ok(content);
        };
        let block = context_block(ctx.resolve(path)?);
        if block.is_empty() {
            Ok(content)
        } else {
            Ok(format!("{block}\n\nQuestion: {content}"))
        }
    }
}

impl std::fmt::Debug for CompletionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionNode")
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .field("model", &self.model)
            .field("input_path", &self.input_path)
            .field("context_path", &self.context_path)
            .finish_non_exhaustive()
    }
}

/// Flatten supporting context into a prompt block.
///
/// A retrieval contribution (or a bare list of documents) becomes a numbered
/// `Context:` list of document texts. A degraded retrieval with no documents
/// yields an empty block. Anything else is inserted as text.
pub fn context_block(value: &Value) -> String {
    let documents = match value {
        Value::Object(map) => map.get("documents").and_then(Value::as_array),
        Value::Array(items) => Some(items),
        _ => None,
    };

    let Some(documents) = documents else {
        let text = value_to_string(value);
        return if value.is_null() || text.trim().is_empty() {
            String::new()
        } else {
            format!("Context:\n{text}")
        };
    };

    let texts: Vec<String> = documents
        .iter()
        .map(|doc| match doc.get("text") {
            Some(text) => value_to_string(text),
            None => value_to_string(doc),
        })
        .filter(|text| !text.trim().is_empty())
        .collect();
    if texts.is_empty() {
        return String::new();
    }

    let mut block = String::from("Context:");
    for (i, text) in texts.iter().enumerate() {
        block.push_str(&format!("\n[{}] {}", i + 1, text));
    }
    block
}

#[async_trait]
impl Node for CompletionNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "completion"
    }

    async fn run(&self, ctx: &NodeContext) -> Result<Value> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system {
            messages.push(Message::system(ctx.render(system)?));
        }
        messages.push(Message::user(self.user_content(ctx)?));

        let mut request = CompletionRequest::new(&self.model, messages, self.max_tokens);
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }

        let backend = &self.backend;
        let outcome = with_retry(self.retries, self.retry_backoff, backend.name(), || {
            backend.complete(request.clone())
        })
        .await;

        match outcome {
            Ok(response) => {
                tracing::debug!(
                    node = %self.id,
                    total_tokens = response.usage.total_tokens,
                    "Completion finished"
                );
                Ok(json!({
                    "text": response.text(),
                    "model": response.model,
                    "usage": response.usage,
                    "finish_reason": response.finish_reason,
                }))
            }
            Err(e) => {
                tracing::warn!(node = %self.id, error = %e, "Completion failed");
                Ok(json!({ "text": null, "error": e.to_string() }))
            }
        }
    }
}
