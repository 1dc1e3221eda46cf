//! Pipeline engine event shape (spec §4.15 "Events emitted").

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    PipelineStarted { goal: Option<String>, start_node: String },
    StageStarted { node_id: String },
    StageCompleted { node_id: String, status: String },
    StageFailed { node_id: String, failure_reason: String },
    StageRetrying { node_id: String, attempt: u32, delay_ms: u64 },
    ParallelStarted { node_id: String, branch_count: usize },
    BranchStarted { node_id: String, branch_id: String },
    BranchCompleted { node_id: String, branch_id: String, status: String },
    ParallelCompleted { node_id: String, success_count: usize, branch_count: usize },
    InterviewStarted { node_id: String, choices: Vec<String> },
    InterviewCompleted { node_id: String, selected_label: String },
    InterviewTimeout { node_id: String },
    CheckpointSaved { path: String, step: u64 },
    PipelineCompleted { final_node: String },
    PipelineFailed { node_id: String, failure_reason: String },
    /// Escape hatch for handler-specific telemetry that doesn't warrant its own variant.
    Custom { value: Value },
}
