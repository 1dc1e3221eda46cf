//! Folds a `StreamEvent` sequence into a final [`Response`], for callers that want
//! `stream()`-then-block semantics (e.g. logging a unified response after a streamed turn, or a
//! CLI `--no-stream` fallback over the same adapter).

use std::collections::BTreeMap;

use protocol::stream_event::ToolCall as UnifiedToolCall;
use protocol::StreamEvent;

use crate::error::{ErrorKind, TransportError};
use crate::message::{ContentPart, Message, Role};
use crate::response::{FinishDetail, Response, Usage};

#[derive(Default, Clone)]
enum Block {
    #[default]
    Empty,
    Text(String),
    Reasoning(String),
    Tool {
        id: String,
        name: String,
        raw_arguments: String,
    },
}

/// Accumulates one turn's worth of `StreamEvent`s into a [`Response`]. Feed events with
/// [`StreamAccumulator::push`] in order; call [`StreamAccumulator::response`] once a `Finish`
/// has been observed. Calling `response()` again is idempotent — it returns a clone of the same
/// value rather than re-deriving it from (now possibly stale) internal state.
#[derive(Default)]
pub struct StreamAccumulator {
    id: Option<String>,
    model: Option<String>,
    provider: String,
    blocks: BTreeMap<u32, Block>,
    order: Vec<u32>,
    finish: Option<FinishDetail>,
    usage: Usage,
    warnings: Vec<String>,
    error: Option<TransportError>,
}

impl StreamAccumulator {
    pub fn new(provider: impl Into<String>) -> Self {
        Self { provider: provider.into(), ..Default::default() }
    }

    /// Folds one event into accumulator state. Returns `Err` only if an `Error` event arrives;
    /// the caller decides whether to keep accumulating (e.g. a recoverable `ProviderEvent`) or
    /// to stop, matching the rest of the crate's "caller owns control flow" convention.
    pub fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::StreamStart { id, model } => {
                self.id = id.clone();
                self.model = model.clone();
            }
            StreamEvent::TextStart { content_index } => {
                self.begin(*content_index, Block::Text(String::new()));
            }
            StreamEvent::TextDelta { content_index, delta } => {
                if let Some(Block::Text(s)) = self.blocks.get_mut(content_index) {
                    s.push_str(delta);
                }
            }
            StreamEvent::TextEnd { .. } => {}
            StreamEvent::ReasoningStart { content_index } => {
                self.begin(*content_index, Block::Reasoning(String::new()));
            }
            StreamEvent::ReasoningDelta { content_index, delta } => {
                if let Some(Block::Reasoning(s)) = self.blocks.get_mut(content_index) {
                    s.push_str(delta);
                }
            }
            StreamEvent::ReasoningEnd { .. } => {}
            StreamEvent::ToolCallStart { content_index, id, name } => {
                self.begin(*content_index, Block::Tool { id: id.clone(), name: name.clone(), raw_arguments: String::new() });
            }
            StreamEvent::ToolCallDelta { content_index, raw_arguments, .. } => {
                if let Some(Block::Tool { raw_arguments: acc, .. }) = self.blocks.get_mut(content_index) {
                    acc.push_str(raw_arguments);
                }
            }
            StreamEvent::ToolCallEnd { content_index, tool_call } => {
                // Prefer the translator's already-parsed tool_call over our own accumulated text,
                // since some adapters (Gemini) hand over a complete call in one non-partial delta.
                self.blocks.insert(
                    *content_index,
                    Block::Tool {
                        id: tool_call.id.clone(),
                        name: tool_call.name.clone(),
                        raw_arguments: tool_call
                            .raw_arguments
                            .clone()
                            .unwrap_or_else(|| tool_call.arguments.to_string()),
                    },
                );
            }
            StreamEvent::Finish { finish_reason, raw_finish_reason, usage, warnings, .. } => {
                self.finish = Some(FinishDetail { reason: *finish_reason, raw: raw_finish_reason.clone() });
                self.usage = *usage;
                self.warnings = warnings.clone();
            }
            StreamEvent::Error { message, kind, retryable } => {
                self.error = Some(TransportError {
                    kind: parse_error_kind(kind),
                    message: message.clone(),
                    provider: Some(self.provider.clone()),
                    status_code: None,
                    error_code: None,
                    retry_after: None,
                    raw: None,
                });
                let _ = retryable;
            }
            StreamEvent::ProviderEvent { .. } => {}
        }
    }

    fn begin(&mut self, content_index: u32, block: Block) {
        if !self.blocks.contains_key(&content_index) {
            self.order.push(content_index);
        }
        self.blocks.insert(content_index, block);
    }

    /// Materializes the accumulated state into a `Response`. Returns the transport error instead
    /// if the stream ended in an `Error` event rather than `Finish`.
    pub fn response(&self) -> Result<Response, TransportError> {
        if let Some(err) = &self.error {
            return Err(TransportError {
                kind: err.kind,
                message: err.message.clone(),
                provider: err.provider.clone(),
                status_code: err.status_code,
                error_code: err.error_code.clone(),
                retry_after: err.retry_after,
                raw: err.raw.clone(),
            });
        }
        let finish = self.finish.clone().unwrap_or(FinishDetail {
            reason: protocol::FinishReason::Other,
            raw: None,
        });
        let mut content = Vec::with_capacity(self.order.len());
        for index in &self.order {
            match self.blocks.get(index) {
                Some(Block::Text(text)) => content.push(ContentPart::Text { text: text.clone() }),
                Some(Block::Reasoning(text)) => content.push(ContentPart::Thinking { text: text.clone(), redacted: false }),
                Some(Block::Tool { id, name, raw_arguments }) => content.push(ContentPart::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: serde_json::from_str(raw_arguments).unwrap_or(serde_json::json!({})),
                    raw_arguments: Some(raw_arguments.clone()),
                }),
                Some(Block::Empty) | None => {}
            }
        }
        Ok(Response {
            id: self.id.clone().unwrap_or_default(),
            model: self.model.clone().unwrap_or_default(),
            provider: self.provider.clone(),
            message: Message { role: Role::Assistant, content },
            finish_reason: finish,
            usage: self.usage,
            warnings: self.warnings.clone(),
            raw: None,
        })
    }

    /// Collects every [`UnifiedToolCall`] observed so far, in start order — used by the agent
    /// session to dispatch tool calls without waiting for `response()` to be callable.
    pub fn tool_calls(&self) -> Vec<UnifiedToolCall> {
        self.order
            .iter()
            .filter_map(|index| match self.blocks.get(index) {
                Some(Block::Tool { id, name, raw_arguments }) => Some(UnifiedToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: serde_json::from_str(raw_arguments).unwrap_or(serde_json::json!({})),
                    raw_arguments: Some(raw_arguments.clone()),
                }),
                _ => None,
            })
            .collect()
    }
}

fn parse_error_kind(kind: &str) -> ErrorKind {
    match kind {
        "authentication" => ErrorKind::Authentication,
        "access_denied" => ErrorKind::AccessDenied,
        "not_found" => ErrorKind::NotFound,
        "invalid_request" => ErrorKind::InvalidRequest,
        "rate_limit" => ErrorKind::RateLimit,
        "context_length" => ErrorKind::ContextLength,
        "quota_exceeded" => ErrorKind::QuotaExceeded,
        "content_filter" => ErrorKind::ContentFilter,
        "request_timeout" => ErrorKind::RequestTimeout,
        "abort" => ErrorKind::Abort,
        "network_error" => ErrorKind::NetworkError,
        "invalid_tool_call" => ErrorKind::InvalidToolCall,
        "no_object_generated" => ErrorKind::NoObjectGenerated,
        "configuration" => ErrorKind::Configuration,
        _ => ErrorKind::StreamError,
    }
}
