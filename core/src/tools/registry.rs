//! Name → tool mapping. Registration is latest-wins; `definitions()` lists tools in a
//! deterministic (name-sorted) order for sending to the model.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::request::ToolDefinition;

use super::exec_env::ExecutionEnvironment;
use super::r#trait::Tool;
use super::ToolError;

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tool`, replacing any prior tool registered under the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool definitions in deterministic (name-sorted) order, for the provider request's
    /// `tools` field.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Calls `name` with `args`. An unregistered name produces an `UnknownTool` error rather
    /// than a generic execution failure, matching the agent session's "Unknown tool: <name>"
    /// result-content convention.
    pub async fn call(&self, name: &str, args: Value, env: &dyn ExecutionEnvironment) -> Result<String, ToolError> {
        match self.tools.get(name) {
            Some(tool) => tool.call(args, env).await,
            None => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}
