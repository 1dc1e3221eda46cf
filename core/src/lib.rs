//! # agentmesh-core
//!
//! Provider-neutral LLM transport, pluggable tool execution and the agent session loop.
//!
//! ## Main modules
//!
//! - [`message`]: [`Message`], content parts ([`ContentPart`]), roles.
//! - [`request`] / [`response`]: unified [`Request`] / [`Response`] shapes sent to and
//!   returned from provider adapters.
//! - [`error`]: [`TransportError`], [`ErrorKind`], the retry policy ([`RetryPolicy`], [`retry`]).
//! - [`transport`]: HTTP POST + SSE byte-stream parsing ([`transport::sse::SseParser`]).
//! - [`providers`]: [`providers::ProviderAdapter`] plus the four concrete adapters
//!   (Anthropic, OpenAI Responses, OpenAI-compatible Chat, Gemini).
//! - [`accumulator`]: [`accumulator::StreamAccumulator`] folding a `StreamEvent` stream into
//!   a [`Response`].
//! - [`client`]: [`client::Client`], onion-pattern middleware, environment-based factory.
//! - [`tools`]: [`tools::Tool`] trait, [`tools::ToolRegistry`], [`tools::ExecutionEnvironment`],
//!   output truncation, and the built-in tools.
//! - [`agent`]: [`agent::AgentSession`] (the iterative loop) and [`agent::SubAgentManager`].
//!
//! Key types are re-exported at the crate root.

pub mod accumulator;
pub mod agent;
pub mod client;
pub mod error;
pub mod message;
pub mod providers;
pub mod request;
pub mod response;
pub mod tools;
pub mod transport;

pub use accumulator::StreamAccumulator;
pub use agent::{AgentError, AgentSession, SessionConfig, SessionState, SubAgentManager};
pub use client::Client;
pub use error::{ErrorKind, RetryPolicy, TransportError};
pub use message::{ContentPart, Message, Role};
pub use providers::ProviderAdapter;
pub use request::{Request, ResponseFormat, ToolChoice, ToolDefinition};
pub use response::Response;
pub use tools::{ExecutionEnvironment, Tool, ToolRegistry};

/// Initializes `tracing` from `RUST_LOG` (default `warn`) once per test binary, so unit tests
/// under `src/**` can print logs with `--nocapture` without racing to install the subscriber.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
