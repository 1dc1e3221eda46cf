//! Agent session loop event shape (spec §6 "Event stream (agent loop)").
//!
//! `AgentEventKind` is the closed set an `AgentSession` emits while draining
//! `process_input`; each carries `kind, timestamp, data?`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event emitted by the agent session loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentEvent {
    pub kind: AgentEventKind,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl AgentEvent {
    pub fn new(kind: AgentEventKind, timestamp_ms: u64) -> Self {
        Self { kind, timestamp_ms, data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEventKind {
    SessionStart,
    SessionEnd,
    UserInput,
    AssistantTextStart,
    AssistantTextDelta,
    AssistantTextEnd,
    ToolCallStart,
    ToolCallOutputDelta,
    ToolCallEnd,
    SteeringInjected,
    TurnLimit,
    LoopDetection,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_screaming_snake_case() {
        let v = serde_json::to_value(AgentEventKind::ToolCallStart).unwrap();
        assert_eq!(v, "TOOL_CALL_START");
    }
}
