//! Pipeline-scoped error types. Kept separate from `core`'s transport taxonomy since a
//! pipeline failure is a graph/checkpoint concern, not a provider-transport one.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("serialize checkpoint: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("checkpoint io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid checkpoint: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("no handler registered for node type: {0}")]
    HandlerNotFound(String),
    #[error("goal gate failed: run completed without satisfying graph.goal")]
    GoalGateFailed,
    #[error("pipeline io: {0}")]
    Io(#[from] std::io::Error),
}
