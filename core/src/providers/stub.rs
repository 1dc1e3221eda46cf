//! A scripted [`ProviderAdapter`] for tests: callers push a queue of canned `Response`s and/or
//! `StreamEvent` sequences instead of hitting a real vendor endpoint. Used by the client
//! middleware tests, the stream accumulator tests, and the agent session's loop-detection and
//! retry scenario tests.

use std::sync::Mutex;

use async_trait::async_trait;
use protocol::StreamEvent;

use crate::error::TransportError;
use crate::request::{Request, ToolChoiceMode};
use crate::response::Response;

use super::EventStream;
use super::ProviderAdapter;

/// One scripted reply: either a complete response or a pre-built sequence of stream events
/// (already in `Finish`/`Error`-terminated order) to hand back from `stream()`.
pub enum Scripted {
    Complete(Response),
    Stream(Vec<Result<StreamEvent, TransportError>>),
    Error(TransportError),
}

#[derive(Default)]
pub struct StubAdapter {
    queue: Mutex<std::collections::VecDeque<Scripted>>,
    pub calls: Mutex<Vec<Request>>,
}

impl StubAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Scripted) -> &Self {
        self.queue.lock().unwrap().push_back(reply);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ProviderAdapter for StubAdapter {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: &Request) -> Result<Response, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        match self.queue.lock().unwrap().pop_front() {
            Some(Scripted::Complete(resp)) => Ok(resp),
            Some(Scripted::Error(err)) => Err(err),
            Some(Scripted::Stream(_)) => Err(TransportError::new(
                crate::error::ErrorKind::Configuration,
                "stub adapter: complete() called but a stream reply was queued",
            )),
            None => Err(TransportError::new(crate::error::ErrorKind::Configuration, "stub adapter: no scripted reply queued")),
        }
    }

    async fn stream(&self, request: &Request) -> Result<EventStream, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        match self.queue.lock().unwrap().pop_front() {
            Some(Scripted::Stream(events)) => {
                Ok(Box::pin(tokio_stream::iter(events)))
            }
            Some(Scripted::Error(err)) => Err(err),
            Some(Scripted::Complete(_)) => Err(TransportError::new(
                crate::error::ErrorKind::Configuration,
                "stub adapter: stream() called but a complete reply was queued",
            )),
            None => Err(TransportError::new(crate::error::ErrorKind::Configuration, "stub adapter: no scripted reply queued")),
        }
    }

    fn supports_tool_choice(&self, _mode: ToolChoiceMode) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Role};
    use crate::response::FinishDetail;
    use futures_util::StreamExt;
    use protocol::FinishReason;

    fn sample_response() -> Response {
        Response {
            id: "resp_1".into(),
            model: "stub-model".into(),
            provider: "stub".into(),
            message: Message::text(Role::Assistant, "hi"),
            finish_reason: FinishDetail { reason: FinishReason::Stop, raw: None },
            usage: Default::default(),
            warnings: Vec::new(),
            raw: None,
        }
    }

    #[tokio::test]
    async fn complete_returns_queued_response_in_order() {
        let stub = StubAdapter::new();
        stub.push(Scripted::Complete(sample_response()));
        let resp = stub.complete(&Request::new("stub-model", vec![])).await.unwrap();
        assert_eq!(resp.id, "resp_1");
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test]
    async fn stream_replays_scripted_events_in_order() {
        let stub = StubAdapter::new();
        stub.push(Scripted::Stream(vec![
            Ok(StreamEvent::StreamStart { id: None, model: None }),
            Ok(StreamEvent::TextStart { content_index: 0 }),
            Ok(StreamEvent::TextDelta { content_index: 0, delta: "hi".into() }),
            Ok(StreamEvent::TextEnd { content_index: 0 }),
            Ok(StreamEvent::Finish {
                finish_reason: FinishReason::Stop,
                raw_finish_reason: None,
                usage: Default::default(),
                response: None,
                warnings: Vec::new(),
            }),
        ]));
        let mut stream = stub.stream(&Request::new("stub-model", vec![])).await.unwrap();
        let mut count = 0;
        while stream.next().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn empty_queue_returns_configuration_error() {
        let stub = StubAdapter::new();
        let err = stub.complete(&Request::new("stub-model", vec![])).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
    }
}
