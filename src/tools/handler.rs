use async_trait::async_trait;
use serde_json::Value;

/// What a tool hands back: text for the model, plus the raw structured
/// result for the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub artifact: Value,
}

impl ToolOutput {
    pub fn new(content: impl Into<String>, artifact: Value) -> Self {
        Self {
            content: content.into(),
            artifact,
        }
    }
}

impl From<String> for ToolOutput {
    fn from(content: String) -> Self {
        Self {
            content,
            artifact: Value::Null,
        }
    }
}

/// A tool's execution handler. Consumers implement this for each tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: &Value) -> Result<ToolOutput, String>;
}

/// A tool definition: schema for the LLM + handler for execution.
pub struct ToolDef {
    pub name: String,
    pub schema: Value,
    pub(crate) handler: Box<dyn ToolHandler>,
}
