//! Thin HTTP POST layer: JSON-in, either a parsed JSON body or a raw byte stream out.
//!
//! Non-2xx is not an error here — callers inspect `status` and map it via
//! [`crate::error::TransportError::kind_for_status`]. Both blocking and streaming calls accept a
//! [`tokio_util::sync::CancellationToken`] and an optional timeout; whichever fires first wins.

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, TransportError};

#[derive(Debug)]
pub struct BlockingResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub parsed_body: Option<Value>,
    pub raw_text: String,
}

pub struct StreamingResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub bytes: std::pin::Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
}

#[derive(Clone, Default)]
pub struct PostOptions {
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_request(
        &self,
        url: &str,
        body: &Value,
        opts: &PostOptions,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        for (k, v) in &opts.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| TransportError::new(ErrorKind::InvalidRequest, e.to_string()))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| TransportError::new(ErrorKind::InvalidRequest, e.to_string()))?;
            headers.insert(name, value);
        }
        let mut req = self.client.post(url).headers(headers).json(body);
        if let Some(timeout) = opts.timeout {
            req = req.timeout(timeout);
        }
        Ok(req)
    }

    /// Issues a blocking POST: reads the full body, tries to parse it as JSON (non-JSON bodies
    /// leave `parsed_body = None`), and returns without interpreting the status code.
    pub async fn post(&self, url: &str, body: &Value, opts: PostOptions) -> Result<BlockingResponse, TransportError> {
        let req = self.build_request(url, body, &opts)?;
        let send = req.send();
        let response = match opts.cancel.clone() {
            Some(token) => tokio::select! {
                res = send => res,
                _ = token.cancelled() => return Err(TransportError::new(ErrorKind::Abort, "request cancelled")),
            },
            None => send.await,
        }
        .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let raw_text = response.text().await.map_err(map_reqwest_error)?;
        let parsed_body = serde_json::from_str(&raw_text).ok();
        Ok(BlockingResponse { status, headers, parsed_body, raw_text })
    }

    /// Issues a streaming POST: returns the status/headers immediately and a byte stream the
    /// caller feeds into [`crate::transport::sse::SseParser`].
    pub async fn post_stream(&self, url: &str, body: &Value, opts: PostOptions) -> Result<StreamingResponse, TransportError> {
        let req = self.build_request(url, body, &opts)?;
        let send = req.send();
        let response = match opts.cancel.clone() {
            Some(token) => tokio::select! {
                res = send => res,
                _ = token.cancelled() => return Err(TransportError::new(ErrorKind::Abort, "request cancelled")),
            },
            None => send.await,
        }
        .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let stream = if let Some(token) = opts.cancel {
            let byte_stream = response.bytes_stream();
            Box::pin(cancellable(byte_stream, token)) as std::pin::Pin<Box<dyn Stream<Item = _> + Send>>
        } else {
            Box::pin(response.bytes_stream())
        };
        Ok(StreamingResponse { status, headers, bytes: stream })
    }
}

fn cancellable(
    stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
    token: CancellationToken,
) -> impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send {
    async_stream_takeuntil(stream, token)
}

fn async_stream_takeuntil(
    stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
    token: CancellationToken,
) -> impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send {
    stream.take_while(move |_| {
        let cancelled = token.is_cancelled();
        async move { !cancelled }
    })
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::new(ErrorKind::RequestTimeout, err.to_string())
    } else if err.is_connect() {
        TransportError::new(ErrorKind::NetworkError, err.to_string())
    } else {
        TransportError::new(ErrorKind::NetworkError, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_options_default_has_no_timeout_or_cancel() {
        let opts = PostOptions::default();
        assert!(opts.timeout.is_none());
        assert!(opts.cancel.is_none());
    }
}
