//! Transform node: simple reshaping of an upstream value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::context::{NodeContext, value_to_string};
use crate::error::Result;
use crate::node::Node;

/// Reshaping applied by a [`TransformNode`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformOp {
    /// Copy the value; non-objects are wrapped as `{value: ...}`.
    #[default]
    Passthrough,
    /// Keep only the text of retrieved documents: `{texts, count}`.
    DocumentTexts,
}

#[derive(Debug, Clone)]
pub struct TransformNode {
    id: String,
    source_path: String,
    op: TransformOp,
}

impl TransformNode {
    pub fn new(id: impl Into<String>, source_path: impl Into<String>, op: TransformOp) -> Self {
        Self {
            id: id.into(),
            source_path: source_path.into(),
            op,
        }
    }
}

fn document_texts(value: &Value) -> Vec<String> {
    let documents = match value {
        Value::Object(map) => map.get("documents").and_then(Value::as_array),
        Value::Array(items) => Some(items),
        _ => None,
    };
    documents
        .map(|docs| {
            docs.iter()
                .map(|doc| match doc.get("text") {
                    Some(text) => value_to_string(text),
                    None => value_to_string(doc),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Node for TransformNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "transform"
    }

    async fn run(&self, ctx: &NodeContext) -> Result<Value> {
        let source = ctx.resolve(&self.source_path)?;
        Ok(match self.op {
            TransformOp::Passthrough => match source {
                Value::Object(_) => source.clone(),
                other => json!({ "value": other }),
            },
            TransformOp::DocumentTexts => {
                let texts = document_texts(source);
                json!({ "count": texts.len(), "texts": texts })
            }
        })
    }
}
