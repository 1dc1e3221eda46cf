//! A single named, LLM-callable tool: a schema plus the executor that runs it against an
//! [`ExecutionEnvironment`].

use async_trait::async_trait;
use serde_json::Value;

use crate::request::ToolDefinition;

use super::exec_env::ExecutionEnvironment;
use super::ToolError;

#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, also the key under which [`super::ToolRegistry`] stores this tool.
    fn name(&self) -> &str;

    /// Description and JSON-schema arguments sent to the model; `ToolRegistry::definitions()`
    /// collects these for every registered tool.
    fn definition(&self) -> ToolDefinition;

    /// Runs the tool. `env` is the pluggable execution environment (real filesystem/shell, or an
    /// in-memory stand-in under test) this call's file/shell/grep/glob operations go through.
    async fn call(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String, ToolError>;
}
