//! Tool registry, pluggable execution environment, output truncation, and the built-in tools
//! the agent session dispatches against.

pub mod builtin;
pub mod exec_env;
pub mod registry;
#[path = "trait.rs"]
pub mod r#trait;
pub mod truncation;

pub use builtin::AgentSpawner;
pub use exec_env::{DirEntry, ExecutionEnvironment, GrepMatch, ShellOutput};
pub use r#trait::Tool;
pub use registry::ToolRegistry;

#[cfg(any(test, feature = "test-util"))]
pub use exec_env::MemoryExecutionEnvironment;

/// Failure to run a tool call. Distinct from [`crate::error::TransportError`] — this surfaces
/// inside a tool-result message back to the model rather than aborting the request, except
/// [`ToolError::UnknownTool`], which the session loop turns into an `Unknown tool: <name>`
/// result string per the registry dispatch convention.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("timed out")]
    Timeout,
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

impl ToolError {
    /// The string placed in a tool-result message's content when a call fails, matching the
    /// session loop's "record the error as the tool's output rather than aborting" behavior.
    pub fn as_result_string(&self) -> String {
        match self {
            ToolError::UnknownTool(name) => format!("Unknown tool: {name}"),
            other => other.to_string(),
        }
    }
}
