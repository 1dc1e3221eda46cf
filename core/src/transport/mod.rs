//! HTTP/SSE transport: JSON POST (blocking or streaming) and chunk-boundary-safe SSE decoding.

pub mod http;
pub mod sse;

pub use http::{BlockingResponse, HttpTransport, PostOptions, StreamingResponse};
pub use sse::{SseEvent, SseParser};
