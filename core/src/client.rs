//! [`Client`]: resolves a [`crate::providers::ProviderAdapter`] (explicit or environment-based),
//! wraps every call in the retry policy, and runs requests/responses through an onion-pattern
//! middleware stack before and after the adapter call.

use std::sync::Arc;

use async_trait::async_trait;

use crate::accumulator::StreamAccumulator;
use crate::error::{retry, ErrorKind, RetryPolicy, TransportError};
use crate::providers::{
    AnthropicAdapter, EventStream, GeminiAdapter, OpenAiChatAdapter, OpenAiResponsesAdapter, ProviderAdapter,
};
use crate::request::Request;
use crate::response::Response;

/// Middleware observes (and may rewrite) a request before it reaches the adapter, and observes
/// (and may rewrite) the response on the way back out — the onion pattern: the first middleware
/// registered is outermost, seeing the unmodified caller request first and the final response
/// last.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn before(&self, request: Request) -> Result<Request, TransportError> {
        Ok(request)
    }

    async fn after(&self, response: Response) -> Result<Response, TransportError> {
        Ok(response)
    }
}

/// Picks a [`ProviderAdapter`] from whichever API key environment variable is set, in this
/// priority order: `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `GEMINI_API_KEY`/`GOOGLE_API_KEY`.
/// The first one present becomes the default adapter.
pub fn adapter_from_env() -> Result<Arc<dyn ProviderAdapter>, TransportError> {
    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        return Ok(Arc::new(AnthropicAdapter::new(key)));
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        return Ok(Arc::new(OpenAiResponsesAdapter::new(key)));
    }
    if let Ok(key) = std::env::var("GEMINI_API_KEY").or_else(|_| std::env::var("GOOGLE_API_KEY")) {
        return Ok(Arc::new(GeminiAdapter::new(key)));
    }
    Err(TransportError::new(
        ErrorKind::Configuration,
        "no provider API key found in ANTHROPIC_API_KEY, OPENAI_API_KEY, GEMINI_API_KEY or GOOGLE_API_KEY",
    ))
}

/// Builds an OpenAI-chat-compatible adapter (vLLM/Ollama/Together/Groq) pointed at `base_url`,
/// using `api_key` if non-empty (self-hosted servers often accept any bearer token or none).
pub fn openai_chat_compatible(base_url: impl Into<String>, api_key: impl Into<String>) -> Arc<dyn ProviderAdapter> {
    Arc::new(OpenAiChatAdapter::new(api_key).with_base_url(base_url))
}

/// Entry point for issuing unified requests against a provider. Owns the retry policy and the
/// middleware stack; hands off the actual wire call to a [`ProviderAdapter`].
pub struct Client {
    adapter: Arc<dyn ProviderAdapter>,
    middleware: Vec<Arc<dyn Middleware>>,
    retry_policy: RetryPolicy,
}

impl Client {
    pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self { adapter, middleware: Vec::new(), retry_policy: RetryPolicy::default() }
    }

    /// Builds a client from whichever provider API key is present in the environment.
    pub fn from_env() -> Result<Self, TransportError> {
        Ok(Self::new(adapter_from_env()?))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Registers `middleware` as the new outermost layer.
    pub fn use_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.adapter.name()
    }

    pub fn supports_parallel_tool_calls(&self) -> bool {
        self.adapter.supports_parallel_tool_calls()
    }

    async fn run_before(&self, mut request: Request) -> Result<Request, TransportError> {
        for mw in self.middleware.iter().rev() {
            request = mw.before(request).await?;
        }
        Ok(request)
    }

    async fn run_after(&self, mut response: Response) -> Result<Response, TransportError> {
        for mw in &self.middleware {
            response = mw.after(response).await?;
        }
        Ok(response)
    }

    /// Non-streaming completion, retried per `retry_policy`.
    pub async fn complete(&self, request: Request) -> Result<Response, TransportError> {
        let request = self.run_before(request).await?;
        let adapter = &self.adapter;
        let response = retry(&self.retry_policy, || adapter.complete(&request)).await?;
        self.run_after(response).await
    }

    /// Streaming completion. Middleware's `before` hook still runs on the request; `after` runs
    /// once on the response assembled by a [`StreamAccumulator`] over the full event sequence,
    /// returned alongside the raw stream so callers can forward events live as they arrive.
    pub async fn stream(&self, request: Request) -> Result<EventStream, TransportError> {
        let request = self.run_before(request).await?;
        retry(&self.retry_policy, || self.adapter.stream(&request)).await
    }

    /// Convenience wrapper driving [`Client::stream`] through a [`StreamAccumulator`] to produce
    /// a single [`Response`], for callers that want retried streaming without hand-rolling the
    /// accumulator loop themselves.
    pub async fn stream_to_response(&self, request: Request) -> Result<Response, TransportError> {
        use futures_util::StreamExt;

        let provider = self.adapter.name().to_string();
        let mut stream = self.stream(request).await?;
        let mut acc = StreamAccumulator::new(provider);
        while let Some(event) = stream.next().await {
            acc.push(&event?);
        }
        let response = acc.response()?;
        self.run_after(response).await
    }

    pub async fn close(&self) {
        self.adapter.close().await;
    }
}
