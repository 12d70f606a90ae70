//! Named collection of tools available to a conversation.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::arguments::ToolArguments;
use super::tool::{Tool, ToolExecutionContext};
use crate::error::ChatLoopError;
use crate::provider::ToolDefinition;
use crate::types::ToolCall;

/// Tools keyed by name. Registering a name twice replaces the earlier tool.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions advertised to the provider, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Run one tool call and return the payload to send back to the model.
    ///
    /// Unknown tools and tool failures produce an `{"error": ...}` payload
    /// so the model can recover; they never fault the turn.
    pub async fn invoke(&self, call: &ToolCall, ctx: &ToolExecutionContext) -> Value {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "model requested unknown tool");
            return json!({ "error": format!("unknown tool '{}'", call.name) });
        };

        let args = ToolArguments::new(call.arguments.clone());
        match tool.execute(&args, ctx).await {
            Ok(output) => {
                debug!(tool = %call.name, call_id = %call.id, "tool call completed");
                output
            }
            Err(e) => {
                let err = ChatLoopError::ToolExecution {
                    tool_name: call.name.clone(),
                    message: e.to_string(),
                };
                warn!(call_id = %call.id, error = %err, "tool call failed");
                json!({ "error": err.to_string() })
            }
        }
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet").field("tools", &self.names()).finish()
    }
}
