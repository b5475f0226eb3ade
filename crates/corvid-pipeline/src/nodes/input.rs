//! Input node: lifts a field out of the request payload.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::{INITIAL_INPUT, NodeContext};
use crate::error::Result;
use crate::node::Node;

/// Copies `field` from the initial payload into `{field: value}`.
///
/// Without a field the whole payload becomes the contribution (wrapped as
/// `{value: ...}` when it is not an object).
#[derive(Debug, Clone)]
pub struct InputNode {
    id: String,
    field: Option<String>,
}

impl InputNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

#[async_trait]
impl Node for InputNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "input"
    }

    async fn run(&self, ctx: &NodeContext) -> Result<Value> {
        let Some(field) = &self.field else {
            return Ok(match ctx.initial_input() {
                Value::Object(map) => Value::Object(map.clone()),
                other => serde_json::json!({ "value": other }),
            });
        };

        let value = ctx.resolve(&format!("{INITIAL_INPUT}.{field}"))?;
        let mut out = Map::new();
        out.insert(field.clone(), value.clone());
        Ok(Value::Object(out))
    }
}
