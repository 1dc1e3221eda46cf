//! Unified response shape and the `Usage` arithmetic used by the accumulator and agent session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

pub use protocol::stream_event::{FinishReason, Usage};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinishDetail {
    pub reason: FinishReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub message: Message,
    pub finish_reason: FinishDetail,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}
