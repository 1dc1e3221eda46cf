//! Wire-level event shapes: the stream translator's `StreamEvent`, the agent session's
//! `AgentEvent`, the pipeline engine's `PipelineEvent`, and the envelope wrapping any of them
//! with `session_id` / `node_id` / `event_id` for transport over a socket or log stream.
//!
//! This crate has no dependency on the runtime crates that produce these events; they hand
//! it values to serialize and an `EnvelopeState` to thread through a run.

pub mod agent_event;
pub mod envelope;
pub mod pipeline_event;
pub mod stream_event;

pub use agent_event::{AgentEvent, AgentEventKind};
pub use envelope::{to_json, Envelope, EnvelopeState};
pub use pipeline_event::PipelineEvent;
pub use stream_event::{FinishReason, StreamEvent, ToolCall as StreamToolCall, Usage};
