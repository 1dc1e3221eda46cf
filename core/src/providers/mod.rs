//! Provider adapters: translate the unified [`Request`]/[`Response`]/`StreamEvent` model onto
//! each vendor's wire format.

pub mod anthropic;
pub mod gemini;
pub mod openai_chat;
pub mod openai_responses;
#[cfg(any(test, feature = "test-util"))]
pub mod stub;

use async_trait::async_trait;
use protocol::StreamEvent;

use crate::error::TransportError;
use crate::request::{Request, ToolChoiceMode};
use crate::response::Response;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai_chat::OpenAiChatAdapter;
pub use openai_responses::OpenAiResponsesAdapter;

pub type EventStream = std::pin::Pin<Box<dyn futures::Stream<Item = Result<StreamEvent, TransportError>> + Send>>;

/// One vendor's translation of the unified request/response/stream-event model.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &Request) -> Result<Response, TransportError>;

    async fn stream(&self, request: &Request) -> Result<EventStream, TransportError>;

    fn supports_tool_choice(&self, mode: ToolChoiceMode) -> bool;

    /// True when the provider can execute more than one tool call per turn concurrently from
    /// the caller's point of view (i.e. it returns multiple tool_calls in one response that the
    /// agent session is then free to dispatch in parallel).
    fn supports_parallel_tool_calls(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

/// One SSE frame in, zero or more unified `StreamEvent`s out. Each adapter's streaming state
/// machine (text/reasoning/tool_call start-delta-end bracketing, finish assembly) lives behind
/// this trait; [`drive_sse_stream`] owns the plumbing (byte reads, SSE framing, channel fan-out)
/// that's identical across providers.
pub trait SseTranslator: Send + 'static {
    fn on_event(&mut self, evt: crate::transport::SseEvent) -> Vec<StreamEvent>;

    /// Called once the byte stream ends, in case a frame never received its blank-line
    /// terminator or a synthetic finish event is still owed.
    fn on_finish(&mut self) -> Vec<StreamEvent> {
        Vec::new()
    }
}

/// Drives a [`crate::transport::StreamingResponse`] through an [`SseParser`] and a provider's
/// [`SseTranslator`], forwarding translated events over a channel as an [`EventStream`].
pub(crate) fn drive_sse_stream(
    mut streaming: crate::transport::StreamingResponse,
    mut translator: impl SseTranslator,
) -> EventStream {
    use futures_util::StreamExt;

    let (tx, rx) = tokio::sync::mpsc::channel(64);
    tokio::spawn(async move {
        let mut parser = crate::transport::SseParser::new();
        while let Some(chunk) = streaming.bytes.next().await {
            match chunk {
                Ok(bytes) => {
                    for evt in parser.push(&bytes) {
                        for se in translator.on_event(evt) {
                            if tx.send(Ok(se)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    let _ = tx
                        .send(Err(TransportError::new(crate::error::ErrorKind::StreamError, e.to_string())))
                        .await;
                    return;
                }
            }
        }
        for evt in parser.finish() {
            for se in translator.on_event(evt) {
                if tx.send(Ok(se)).await.is_err() {
                    return;
                }
            }
        }
        for se in translator.on_finish() {
            if tx.send(Ok(se)).await.is_err() {
                return;
            }
        }
    });
    Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
}

/// Maps a provider's raw finish signal to the unified [`protocol::FinishReason`], per the
/// translation contract's finish-reason table.
pub fn map_finish_reason(raw: &str) -> protocol::FinishReason {
    use protocol::FinishReason::*;
    match raw {
        "end_turn" | "STOP" | "stop" => Stop,
        "max_tokens" | "MAX_TOKENS" | "length" => Length,
        "tool_calls" | "tool_use" | "function_call" => ToolCalls,
        "SAFETY" | "RECITATION" | "content_filter" => ContentFilter,
        _ => Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_finish_reason_covers_known_raw_values() {
        assert_eq!(map_finish_reason("end_turn"), protocol::FinishReason::Stop);
        assert_eq!(map_finish_reason("MAX_TOKENS"), protocol::FinishReason::Length);
        assert_eq!(map_finish_reason("tool_use"), protocol::FinishReason::ToolCalls);
        assert_eq!(map_finish_reason("SAFETY"), protocol::FinishReason::ContentFilter);
        assert_eq!(map_finish_reason("weird"), protocol::FinishReason::Other);
    }
}
