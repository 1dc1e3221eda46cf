//! Anthropic Messages API adapter: `POST {base}/v1/messages`, `x-api-key` + `anthropic-version`
//! headers, SSE for streaming.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use protocol::stream_event::{ToolCall as UnifiedToolCall, Usage};
use protocol::{FinishReason, StreamEvent};

use crate::error::{ErrorKind, TransportError};
use crate::message::{ContentPart, Message, Role, ToolResultContent};
use crate::request::{Request, ToolChoiceMode};
use crate::response::{FinishDetail, Response};
use crate::transport::{HttpTransport, PostOptions, SseEvent};

use super::{drive_sse_stream, map_finish_reason, EventStream, ProviderAdapter, SseTranslator};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    api_key: String,
    base_url: String,
    http: HttpTransport,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http: HttpTransport::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("x-api-key".to_string(), self.api_key.clone()),
            ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
        ]
    }

    fn build_body(&self, request: &Request, stream: bool) -> Value {
        let mut system_text = String::new();
        let mut messages = Vec::new();
        for msg in &request.messages {
            match msg.role {
                Role::System | Role::Developer => {
                    if !system_text.is_empty() {
                        system_text.push('\n');
                    }
                    system_text.push_str(&msg.text_content());
                }
                Role::User | Role::Assistant => {
                    messages.push(json!({
                        "role": if msg.role == Role::User { "user" } else { "assistant" },
                        "content": content_parts_to_anthropic(&msg.content),
                    }));
                }
                Role::Tool => {
                    // Anthropic expects tool_result blocks inside a user-role message.
                    let blocks: Vec<Value> = msg
                        .content
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::ToolResult { tool_call_id, content, is_error } => Some(json!({
                                "type": "tool_result",
                                "tool_use_id": tool_call_id,
                                "content": content.as_text(),
                                "is_error": is_error,
                            })),
                            _ => None,
                        })
                        .collect();
                    messages.push(json!({ "role": "user", "content": blocks }));
                }
            }
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(4096),
            "stream": stream,
        });
        if !system_text.is_empty() {
            body["system"] = json!(system_text);
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(t) = request.top_p {
            body["top_p"] = json!(t);
        }
        if !request.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(request.stop_sequences);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request
                .tools
                .iter()
                .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.parameters }))
                .collect::<Vec<_>>());
            if let Some(choice) = &request.tool_choice {
                body["tool_choice"] = match choice.mode {
                    ToolChoiceMode::Auto => json!({ "type": "auto" }),
                    ToolChoiceMode::None => json!({ "type": "none" }),
                    ToolChoiceMode::Required => json!({ "type": "any" }),
                    ToolChoiceMode::Named => json!({ "type": "tool", "name": choice.tool_name }),
                };
            }
        }
        body
    }

    fn parse_response(&self, body: &Value) -> Response {
        let id = body.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let model = body.get("model").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let mut content = Vec::new();
        if let Some(blocks) = body.get("content").and_then(|v| v.as_array()) {
            for block in blocks {
                match block.get("type").and_then(|v| v.as_str()) {
                    Some("text") => content.push(ContentPart::Text {
                        text: block.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    }),
                    Some("thinking") => content.push(ContentPart::Thinking {
                        text: block.get("thinking").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        redacted: false,
                    }),
                    Some("tool_use") => content.push(ContentPart::ToolCall {
                        id: block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        name: block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        arguments: block.get("input").cloned().unwrap_or(json!({})),
                        raw_arguments: None,
                    }),
                    _ => {}
                }
            }
        }
        let raw_finish = body.get("stop_reason").and_then(|v| v.as_str()).unwrap_or("end_turn");
        let finish_reason = if content.iter().any(|p| matches!(p, ContentPart::ToolCall { .. })) {
            FinishReason::ToolCalls
        } else {
            map_finish_reason(raw_finish)
        };
        let usage = body.get("usage").map(|u| Usage {
            input_tokens: u.get("input_tokens").and_then(|v| v.as_u64()),
            output_tokens: u.get("output_tokens").and_then(|v| v.as_u64()),
            total_tokens: None,
            reasoning_tokens: None,
            cache_read_tokens: u.get("cache_read_input_tokens").and_then(|v| v.as_u64()),
            cache_write_tokens: u.get("cache_creation_input_tokens").and_then(|v| v.as_u64()),
        }).unwrap_or_default();

        Response {
            id,
            model,
            provider: "anthropic".to_string(),
            message: Message { role: Role::Assistant, content },
            finish_reason: FinishDetail { reason: finish_reason, raw: Some(raw_finish.to_string()) },
            usage,
            warnings: Vec::new(),
            raw: Some(body.clone()),
        }
    }
}

fn content_parts_to_anthropic(parts: &[ContentPart]) -> Value {
    let blocks: Vec<Value> = parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(json!({ "type": "text", "text": text })),
            ContentPart::ToolCall { id, name, arguments, .. } => Some(json!({
                "type": "tool_use", "id": id, "name": name, "input": arguments,
            })),
            ContentPart::Thinking { text, .. } => Some(json!({ "type": "thinking", "thinking": text })),
            ContentPart::Image { url: Some(url), .. } => Some(json!({
                "type": "image", "source": { "type": "url", "url": url },
            })),
            ContentPart::Image { data: Some(data), media_type, .. } => Some(json!({
                "type": "image",
                "source": { "type": "base64", "media_type": media_type, "data": data },
            })),
            _ => None,
        })
        .collect();
    json!(blocks)
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &Request) -> Result<Response, TransportError> {
        let body = self.build_body(request, false);
        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .http
            .post(&url, &body, PostOptions { headers: self.headers(), ..Default::default() })
            .await?;
        if resp.status >= 400 {
            return Err(map_error_body(resp.status, resp.parsed_body.as_ref()));
        }
        let parsed = resp.parsed_body.ok_or_else(|| {
            TransportError::new(ErrorKind::ServerError, "anthropic response was not valid JSON")
        })?;
        Ok(self.parse_response(&parsed))
    }

    async fn stream(&self, request: &Request) -> Result<EventStream, TransportError> {
        let body = self.build_body(request, true);
        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .http
            .post_stream(&url, &body, PostOptions { headers: self.headers(), ..Default::default() })
            .await?;
        if resp.status >= 400 {
            return Err(TransportError::new(ErrorKind::ServerError, format!("anthropic stream http {}", resp.status)));
        }
        Ok(drive_sse_stream(resp, AnthropicTranslator::default()))
    }

    fn supports_tool_choice(&self, _mode: ToolChoiceMode) -> bool {
        true
    }
}

fn map_error_body(status: u16, body: Option<&Value>) -> TransportError {
    let message = body
        .and_then(|b| b.get("error"))
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("anthropic error")
        .to_string();
    let kind = TransportError::kind_for_status(status, message.to_lowercase().contains("context"), false, false);
    let mut err = TransportError::new(kind, message).with_provider("anthropic").with_status(status);
    err.raw = body.cloned();
    err
}

#[derive(Default)]
struct AnthropicTranslator {
    started: bool,
    content_index_kind: HashMap<u32, BlockKind>,
    tool_ids: HashMap<u32, String>,
    accumulated_text: String,
    usage: Usage,
    final_stop_reason: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

impl SseTranslator for AnthropicTranslator {
    fn on_event(&mut self, evt: SseEvent) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        let Ok(data) = serde_json::from_str::<Value>(&evt.data) else { return out };
        match data.get("type").and_then(|v| v.as_str()) {
            Some("message_start") => {
                if !self.started {
                    self.started = true;
                    let id = data
                        .get("message")
                        .and_then(|m| m.get("id"))
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    let model = data
                        .get("message")
                        .and_then(|m| m.get("model"))
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    out.push(StreamEvent::StreamStart { id, model });
                }
                if let Some(u) = data.get("message").and_then(|m| m.get("usage")) {
                    self.usage.input_tokens = u.get("input_tokens").and_then(|v| v.as_u64());
                }
            }
            Some("content_block_start") => {
                let index = data.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                let block = data.get("content_block").cloned().unwrap_or_default();
                match block.get("type").and_then(|v| v.as_str()) {
                    Some("text") => {
                        self.content_index_kind.insert(index, BlockKind::Text);
                        out.push(StreamEvent::TextStart { content_index: index });
                    }
                    Some("thinking") => {
                        self.content_index_kind.insert(index, BlockKind::Thinking);
                        out.push(StreamEvent::ReasoningStart { content_index: index });
                    }
                    Some("tool_use") => {
                        self.content_index_kind.insert(index, BlockKind::ToolUse);
                        let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                        let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                        self.tool_ids.insert(index, id.clone());
                        out.push(StreamEvent::ToolCallStart { content_index: index, id, name });
                    }
                    _ => {}
                }
            }
            Some("content_block_delta") => {
                let index = data.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                let delta = data.get("delta").cloned().unwrap_or_default();
                match self.content_index_kind.get(&index).copied() {
                    Some(BlockKind::Text) => {
                        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                            self.accumulated_text.push_str(text);
                            out.push(StreamEvent::TextDelta { content_index: index, delta: text.to_string() });
                        }
                    }
                    Some(BlockKind::Thinking) => {
                        if let Some(text) = delta.get("thinking").and_then(|v| v.as_str()) {
                            out.push(StreamEvent::ReasoningDelta { content_index: index, delta: text.to_string() });
                        }
                    }
                    Some(BlockKind::ToolUse) => {
                        if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                            let id = self.tool_ids.get(&index).cloned().unwrap_or_default();
                            out.push(StreamEvent::ToolCallDelta {
                                content_index: index,
                                id,
                                raw_arguments: partial.to_string(),
                            });
                        }
                    }
                    None => {}
                }
            }
            Some("content_block_stop") => {
                let index = data.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                match self.content_index_kind.get(&index).copied() {
                    Some(BlockKind::Text) => out.push(StreamEvent::TextEnd { content_index: index }),
                    Some(BlockKind::Thinking) => out.push(StreamEvent::ReasoningEnd { content_index: index }),
                    Some(BlockKind::ToolUse) => {
                        let id = self.tool_ids.get(&index).cloned().unwrap_or_default();
                        out.push(StreamEvent::ToolCallEnd {
                            content_index: index,
                            tool_call: UnifiedToolCall { id, name: String::new(), arguments: json!({}), raw_arguments: None },
                        });
                    }
                    None => {}
                }
            }
            Some("message_delta") => {
                if let Some(stop) = data.get("delta").and_then(|d| d.get("stop_reason")).and_then(|v| v.as_str()) {
                    self.final_stop_reason = Some(stop.to_string());
                }
                if let Some(u) = data.get("usage") {
                    self.usage.output_tokens = u.get("output_tokens").and_then(|v| v.as_u64());
                }
            }
            Some("message_stop") => {
                let raw = self.final_stop_reason.clone().unwrap_or_else(|| "end_turn".to_string());
                let finish_reason = if !self.tool_ids.is_empty() { FinishReason::ToolCalls } else { map_finish_reason(&raw) };
                out.push(StreamEvent::Finish {
                    finish_reason,
                    raw_finish_reason: Some(raw),
                    usage: self.usage,
                    response: None,
                    warnings: Vec::new(),
                });
            }
            Some("error") => {
                let message = data
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("stream error")
                    .to_string();
                out.push(StreamEvent::Error { message, kind: "stream_error".to_string(), retryable: true });
            }
            _ => {}
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_delta_for_tool_use_emits_raw_arguments() {
        let mut t = AnthropicTranslator::default();
        t.on_event(SseEvent {
            event: None,
            data: json!({"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"call_1","name":"read"}}).to_string(),
            retry: None,
        });
        let events = t.on_event(SseEvent {
            event: None,
            data: json!({"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"path\""}}).to_string(),
            retry: None,
        });
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::ToolCallDelta { raw_arguments, id, .. } => {
                assert_eq!(raw_arguments, "{\"path\"");
                assert_eq!(id, "call_1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn message_stop_with_tool_use_reports_tool_calls_finish_reason() {
        let mut t = AnthropicTranslator::default();
        t.on_event(SseEvent {
            event: None,
            data: json!({"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"call_1","name":"read"}}).to_string(),
            retry: None,
        });
        let events = t.on_event(SseEvent { event: None, data: json!({"type":"message_stop"}).to_string(), retry: None });
        match &events[0] {
            StreamEvent::Finish { finish_reason, .. } => assert_eq!(*finish_reason, FinishReason::ToolCalls),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
