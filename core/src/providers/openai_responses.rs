//! OpenAI Responses API adapter: `POST {base}/v1/responses`, bearer auth, optional org/project
//! headers.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use protocol::stream_event::{ToolCall as UnifiedToolCall, Usage};
use protocol::{FinishReason, StreamEvent};

use crate::error::{ErrorKind, TransportError};
use crate::message::{ContentPart, Message, Role};
use crate::request::{Request, ToolChoiceMode};
use crate::response::{FinishDetail, Response};
use crate::transport::{HttpTransport, PostOptions, SseEvent};

use super::{drive_sse_stream, map_finish_reason, EventStream, ProviderAdapter, SseTranslator};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiResponsesAdapter {
    api_key: String,
    base_url: String,
    organization: Option<String>,
    project: Option<String>,
    http: HttpTransport,
}

impl OpenAiResponsesAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: None,
            project: None,
            http: HttpTransport::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut h = vec![("Authorization".to_string(), format!("Bearer {}", self.api_key))];
        if let Some(org) = &self.organization {
            h.push(("OpenAI-Organization".to_string(), org.clone()));
        }
        if let Some(project) = &self.project {
            h.push(("OpenAI-Project".to_string(), project.clone()));
        }
        h
    }

    fn build_body(&self, request: &Request, stream: bool) -> Value {
        let input: Vec<Value> = request
            .messages
            .iter()
            .flat_map(|msg| message_to_responses_items(msg))
            .collect();

        let mut body = json!({
            "model": request.model,
            "input": input,
            "stream": stream,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(t) = request.top_p {
            body["top_p"] = json!(t);
        }
        if let Some(m) = request.max_tokens {
            body["max_output_tokens"] = json!(m);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request
                .tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }))
                .collect::<Vec<_>>());
            if let Some(choice) = &request.tool_choice {
                body["tool_choice"] = match choice.mode {
                    ToolChoiceMode::Auto => json!("auto"),
                    ToolChoiceMode::None => json!("none"),
                    ToolChoiceMode::Required => json!("required"),
                    ToolChoiceMode::Named => json!({ "type": "function", "name": choice.tool_name }),
                };
            }
        }
        if let Some(fmt) = &request.response_format {
            body["text"] = json!({ "format": { "type": match fmt.kind {
                crate::request::ResponseFormatType::Text => "text",
                crate::request::ResponseFormatType::Json => "json_object",
                crate::request::ResponseFormatType::JsonSchema => "json_schema",
            }, "schema": fmt.schema } });
        }
        body
    }

    fn parse_response(&self, body: &Value) -> Response {
        let id = body.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let model = body.get("model").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let mut content = Vec::new();
        if let Some(output) = body.get("output").and_then(|v| v.as_array()) {
            for item in output {
                match item.get("type").and_then(|v| v.as_str()) {
                    Some("message") => {
                        if let Some(parts) = item.get("content").and_then(|v| v.as_array()) {
                            for part in parts {
                                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                                    content.push(ContentPart::Text { text: text.to_string() });
                                }
                            }
                        }
                    }
                    Some("function_call") => content.push(ContentPart::ToolCall {
                        id: item.get("call_id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        name: item.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        arguments: item
                            .get("arguments")
                            .and_then(|v| v.as_str())
                            .and_then(|s| serde_json::from_str(s).ok())
                            .unwrap_or(json!({})),
                        raw_arguments: item.get("arguments").and_then(|v| v.as_str()).map(String::from),
                    }),
                    Some("reasoning") => {
                        if let Some(text) = item.get("summary").and_then(|v| v.as_array()).and_then(|a| a.first()).and_then(|s| s.get("text")).and_then(|v| v.as_str()) {
                            content.push(ContentPart::Thinking { text: text.to_string(), redacted: false });
                        }
                    }
                    _ => {}
                }
            }
        }
        let raw_status = body.get("status").and_then(|v| v.as_str()).unwrap_or("completed");
        let finish_reason = if content.iter().any(|p| matches!(p, ContentPart::ToolCall { .. })) {
            FinishReason::ToolCalls
        } else {
            match raw_status {
                "completed" => FinishReason::Stop,
                "incomplete" => FinishReason::Length,
                _ => FinishReason::Other,
            }
        };
        let usage = body.get("usage").map(|u| Usage {
            input_tokens: u.get("input_tokens").and_then(|v| v.as_u64()),
            output_tokens: u.get("output_tokens").and_then(|v| v.as_u64()),
            total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()),
            reasoning_tokens: u
                .get("output_tokens_details")
                .and_then(|d| d.get("reasoning_tokens"))
                .and_then(|v| v.as_u64()),
            cache_read_tokens: u
                .get("input_tokens_details")
                .and_then(|d| d.get("cached_tokens"))
                .and_then(|v| v.as_u64()),
            cache_write_tokens: None,
        }).unwrap_or_default();

        Response {
            id,
            model,
            provider: "openai_responses".to_string(),
            message: Message { role: Role::Assistant, content },
            finish_reason: FinishDetail { reason: finish_reason, raw: Some(raw_status.to_string()) },
            usage,
            warnings: Vec::new(),
            raw: Some(body.clone()),
        }
    }
}

fn message_to_responses_items(msg: &Message) -> Vec<Value> {
    match msg.role {
        Role::System | Role::Developer => vec![json!({
            "role": "developer",
            "content": [{ "type": "input_text", "text": msg.text_content() }],
        })],
        Role::User => vec![json!({
            "role": "user",
            "content": msg
                .content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(json!({ "type": "input_text", "text": text })),
                    ContentPart::Image { url: Some(url), .. } => Some(json!({ "type": "input_image", "image_url": url })),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        })],
        Role::Assistant => {
            let mut items = Vec::new();
            let text_parts: Vec<Value> = msg
                .content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(json!({ "type": "output_text", "text": text })),
                    _ => None,
                })
                .collect();
            if !text_parts.is_empty() {
                items.push(json!({ "role": "assistant", "content": text_parts }));
            }
            for part in &msg.content {
                if let ContentPart::ToolCall { id, name, arguments, raw_arguments } = part {
                    items.push(json!({
                        "type": "function_call",
                        "call_id": id,
                        "name": name,
                        "arguments": raw_arguments.clone().unwrap_or_else(|| arguments.to_string()),
                    }));
                }
            }
            items
        }
        Role::Tool => msg
            .content
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult { tool_call_id, content, .. } => Some(json!({
                    "type": "function_call_output",
                    "call_id": tool_call_id,
                    "output": content.as_text(),
                })),
                _ => None,
            })
            .collect(),
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiResponsesAdapter {
    fn name(&self) -> &str {
        "openai_responses"
    }

    async fn complete(&self, request: &Request) -> Result<Response, TransportError> {
        let body = self.build_body(request, false);
        let url = format!("{}/v1/responses", self.base_url);
        let resp = self
            .http
            .post(&url, &body, PostOptions { headers: self.headers(), ..Default::default() })
            .await?;
        if resp.status >= 400 {
            return Err(map_error_body(resp.status, resp.parsed_body.as_ref()));
        }
        let parsed = resp
            .parsed_body
            .ok_or_else(|| TransportError::new(ErrorKind::ServerError, "openai responses body was not valid JSON"))?;
        Ok(self.parse_response(&parsed))
    }

    async fn stream(&self, request: &Request) -> Result<EventStream, TransportError> {
        let body = self.build_body(request, true);
        let url = format!("{}/v1/responses", self.base_url);
        let resp = self
            .http
            .post_stream(&url, &body, PostOptions { headers: self.headers(), ..Default::default() })
            .await?;
        if resp.status >= 400 {
            return Err(TransportError::new(ErrorKind::ServerError, format!("openai responses stream http {}", resp.status)));
        }
        Ok(drive_sse_stream(resp, ResponsesTranslator::default()))
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
        .unwrap_or("openai error")
        .to_string();
    let code = body
        .and_then(|b| b.get("error"))
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("");
    let kind = TransportError::kind_for_status(status, code.contains("context_length"), code.contains("insufficient_quota"), code.contains("content_filter"));
    let mut err = TransportError::new(kind, message).with_provider("openai_responses").with_status(status);
    err.error_code = Some(code.to_string());
    err.raw = body.cloned();
    err
}

#[derive(Default)]
struct ResponsesTranslator {
    started: bool,
    text_index: HashMap<String, u32>,
    tool_by_item: HashMap<String, (u32, String)>,
    next_index: u32,
    usage: Usage,
}

impl SseTranslator for ResponsesTranslator {
    fn on_event(&mut self, evt: SseEvent) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        let Ok(data) = serde_json::from_str::<Value>(&evt.data) else { return out };
        let event_type = evt.event.as_deref().or_else(|| data.get("type").and_then(|v| v.as_str())).unwrap_or("");
        match event_type {
            "response.created" => {
                if !self.started {
                    self.started = true;
                    let id = data.get("response").and_then(|r| r.get("id")).and_then(|v| v.as_str()).map(String::from);
                    let model = data.get("response").and_then(|r| r.get("model")).and_then(|v| v.as_str()).map(String::from);
                    out.push(StreamEvent::StreamStart { id, model });
                }
            }
            "response.output_text.delta" => {
                let item_id = data.get("item_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let index = *self.text_index.entry(item_id).or_insert_with(|| {
                    let i = self.next_index;
                    self.next_index += 1;
                    out.push(StreamEvent::TextStart { content_index: i });
                    i
                });
                if let Some(delta) = data.get("delta").and_then(|v| v.as_str()) {
                    out.push(StreamEvent::TextDelta { content_index: index, delta: delta.to_string() });
                }
            }
            "response.output_text.done" => {
                let item_id = data.get("item_id").and_then(|v| v.as_str()).unwrap_or_default();
                if let Some(&index) = self.text_index.get(item_id) {
                    out.push(StreamEvent::TextEnd { content_index: index });
                }
            }
            "response.output_item.added" => {
                let item = data.get("item").cloned().unwrap_or_default();
                if item.get("type").and_then(|v| v.as_str()) == Some("function_call") {
                    let item_id = item.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let call_id = item.get("call_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let name = item.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let index = self.next_index;
                    self.next_index += 1;
                    self.tool_by_item.insert(item_id, (index, call_id.clone()));
                    out.push(StreamEvent::ToolCallStart { content_index: index, id: call_id, name });
                }
            }
            "response.function_call_arguments.delta" => {
                let item_id = data.get("item_id").and_then(|v| v.as_str()).unwrap_or_default();
                if let Some((index, call_id)) = self.tool_by_item.get(item_id).cloned() {
                    if let Some(delta) = data.get("delta").and_then(|v| v.as_str()) {
                        out.push(StreamEvent::ToolCallDelta { content_index: index, id: call_id, raw_arguments: delta.to_string() });
                    }
                }
            }
            "response.output_item.done" => {
                let item = data.get("item").cloned().unwrap_or_default();
                if item.get("type").and_then(|v| v.as_str()) == Some("function_call") {
                    let item_id = item.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                    if let Some((index, call_id)) = self.tool_by_item.get(item_id).cloned() {
                        let args_raw = item.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}").to_string();
                        let arguments = serde_json::from_str(&args_raw).unwrap_or(json!({}));
                        let name = item.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                        out.push(StreamEvent::ToolCallEnd {
                            content_index: index,
                            tool_call: UnifiedToolCall { id: call_id, name, arguments, raw_arguments: Some(args_raw) },
                        });
                    }
                }
            }
            "response.completed" | "response.incomplete" | "response.failed" => {
                let response = data.get("response").cloned();
                if let Some(u) = response.as_ref().and_then(|r| r.get("usage")) {
                    self.usage = Usage {
                        input_tokens: u.get("input_tokens").and_then(|v| v.as_u64()),
                        output_tokens: u.get("output_tokens").and_then(|v| v.as_u64()),
                        total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()),
                        reasoning_tokens: u.get("output_tokens_details").and_then(|d| d.get("reasoning_tokens")).and_then(|v| v.as_u64()),
                        cache_read_tokens: u.get("input_tokens_details").and_then(|d| d.get("cached_tokens")).and_then(|v| v.as_u64()),
                        cache_write_tokens: None,
                    };
                }
                let status = response.as_ref().and_then(|r| r.get("status")).and_then(|v| v.as_str()).unwrap_or("completed").to_string();
                let finish_reason = if !self.tool_by_item.is_empty() {
                    FinishReason::ToolCalls
                } else {
                    match status.as_str() {
                        "completed" => FinishReason::Stop,
                        "incomplete" => FinishReason::Length,
                        _ => FinishReason::Other,
                    }
                };
                out.push(StreamEvent::Finish {
                    finish_reason,
                    raw_finish_reason: Some(status),
                    usage: self.usage,
                    response,
                    warnings: Vec::new(),
                });
            }
            "error" => {
                let message = data.get("message").and_then(|v| v.as_str()).unwrap_or("stream error").to_string();
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
    fn output_text_delta_starts_then_streams_text() {
        let mut t = ResponsesTranslator::default();
        let started = t.on_event(SseEvent {
            event: Some("response.output_text.delta".to_string()),
            data: json!({"item_id":"msg_1","delta":"hel"}).to_string(),
            retry: None,
        });
        assert!(matches!(started[0], StreamEvent::TextStart { content_index: 0 }));
        assert!(matches!(&started[1], StreamEvent::TextDelta { content_index: 0, delta } if delta == "hel"));
    }

    #[test]
    fn function_call_lifecycle_emits_start_delta_end() {
        let mut t = ResponsesTranslator::default();
        t.on_event(SseEvent {
            event: Some("response.output_item.added".to_string()),
            data: json!({"item":{"type":"function_call","id":"item_1","call_id":"call_1","name":"read"}}).to_string(),
            retry: None,
        });
        let deltas = t.on_event(SseEvent {
            event: Some("response.function_call_arguments.delta".to_string()),
            data: json!({"item_id":"item_1","delta":"{\"path\":1}"}).to_string(),
            retry: None,
        });
        assert_eq!(deltas.len(), 1);
        let ends = t.on_event(SseEvent {
            event: Some("response.output_item.done".to_string()),
            data: json!({"item":{"type":"function_call","id":"item_1","name":"read","arguments":"{\"path\":1}"}}).to_string(),
            retry: None,
        });
        match &ends[0] {
            StreamEvent::ToolCallEnd { tool_call, .. } => assert_eq!(tool_call.id, "call_1"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
