//! Error surface for the agent session loop and sub-agent orchestration.

use crate::error::TransportError;

#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("maximum subagent depth exceeded")]
    SubagentDepthExceeded,
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}
