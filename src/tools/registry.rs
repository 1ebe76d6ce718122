use serde_json::{json, Value};

use super::handler::{ToolDef, ToolHandler, ToolOutput};
use crate::normalizer::CLARIFICATION_TOOL;

/// Catalog of available tools. Stores definitions, provides schemas, and
/// looks up handlers by name.
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. The schema is the complete JSON tool definition
    /// (name, description, input_schema) sent to the LLM.
    pub fn add(
        mut self,
        name: impl Into<String>,
        schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        self.tools.push(ToolDef {
            name: name.into(),
            schema,
            handler: Box::new(handler),
        });
        self
    }

    /// All tool schemas for the LLM API request.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.schema.clone()).collect()
    }

    /// Schema for a specific tool by name.
    pub fn schema(&self, name: &str) -> Option<&Value> {
        self.tools.iter().find(|t| t.name == name).map(|t| &t.schema)
    }

    /// Run a tool by name. Returns Err if the tool is unknown.
    pub async fn execute(&self, name: &str, input: &Value) -> Result<ToolOutput, String> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| format!("unknown tool: {name}"))?;
        tool.handler.call(input).await
    }

    /// Schema for the clarification tool. It has no handler: the runtime
    /// turns a call into an interrupt and the human's answers become its result.
    pub fn clarification_schema() -> Value {
        json!({
            "name": CLARIFICATION_TOOL,
            "description": "Ask the user one or more clarifying questions about their event (date, guest count, location, budget, style) when essential information is missing. The conversation pauses until the user answers.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "questions": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Questions to put to the user, asked together"
                    },
                    "reason": {
                        "type": "string",
                        "description": "Why the answers are needed"
                    }
                },
                "required": ["questions"]
            }
        })
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
