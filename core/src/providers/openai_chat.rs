//! OpenAI-compatible Chat Completions adapter: `POST {base}/v1/chat/completions`. Targets the
//! OpenAI API itself as well as vLLM/Ollama/Together/Groq-style servers that speak the same
//! wire shape.

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

pub struct OpenAiChatAdapter {
    api_key: String,
    base_url: String,
    http: HttpTransport,
}

impl OpenAiChatAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), base_url: DEFAULT_BASE_URL.to_string(), http: HttpTransport::default() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![("Authorization".to_string(), format!("Bearer {}", self.api_key))]
    }

    fn build_body(&self, request: &Request, stream: bool) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_to_chat_message).collect();
        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
        });
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(t) = request.top_p {
            body["top_p"] = json!(t);
        }
        if let Some(m) = request.max_tokens {
            body["max_tokens"] = json!(m);
        }
        if !request.stop_sequences.is_empty() {
            body["stop"] = json!(request.stop_sequences);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request
                .tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": { "name": t.name, "description": t.description, "parameters": t.parameters },
                }))
                .collect::<Vec<_>>());
            if let Some(choice) = &request.tool_choice {
                body["tool_choice"] = match choice.mode {
                    ToolChoiceMode::Auto => json!("auto"),
                    ToolChoiceMode::None => json!("none"),
                    ToolChoiceMode::Required => json!("required"),
                    ToolChoiceMode::Named => json!({ "type": "function", "function": { "name": choice.tool_name } }),
                };
            }
        }
        if let Some(fmt) = &request.response_format {
            body["response_format"] = match fmt.kind {
                crate::request::ResponseFormatType::Text => json!({ "type": "text" }),
                crate::request::ResponseFormatType::Json => json!({ "type": "json_object" }),
                crate::request::ResponseFormatType::JsonSchema => json!({
                    "type": "json_schema",
                    "json_schema": { "schema": fmt.schema, "strict": fmt.strict.unwrap_or(false) },
                }),
            };
        }
        body
    }

    fn parse_response(&self, body: &Value) -> Response {
        let id = body.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let model = body.get("model").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let choice = body.get("choices").and_then(|v| v.as_array()).and_then(|a| a.first());
        let mut content = Vec::new();
        if let Some(message) = choice.and_then(|c| c.get("message")) {
            if let Some(text) = message.get("content").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    content.push(ContentPart::Text { text: text.to_string() });
                }
            }
            if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
                for call in calls {
                    let args_raw = call
                        .get("function")
                        .and_then(|f| f.get("arguments"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("{}")
                        .to_string();
                    content.push(ContentPart::ToolCall {
                        id: call.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        name: call
                            .get("function")
                            .and_then(|f| f.get("name"))
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        arguments: serde_json::from_str(&args_raw).unwrap_or(json!({})),
                        raw_arguments: Some(args_raw),
                    });
                }
            }
        }
        let raw_finish = choice.and_then(|c| c.get("finish_reason")).and_then(|v| v.as_str()).unwrap_or("stop");
        let usage = body.get("usage").map(|u| Usage {
            input_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()),
            output_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()),
            total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()),
            reasoning_tokens: u.get("completion_tokens_details").and_then(|d| d.get("reasoning_tokens")).and_then(|v| v.as_u64()),
            cache_read_tokens: u.get("prompt_tokens_details").and_then(|d| d.get("cached_tokens")).and_then(|v| v.as_u64()),
            cache_write_tokens: None,
        }).unwrap_or_default();

        Response {
            id,
            model,
            provider: "openai_chat".to_string(),
            message: Message { role: Role::Assistant, content },
            finish_reason: FinishDetail { reason: map_finish_reason(raw_finish), raw: Some(raw_finish.to_string()) },
            usage,
            warnings: Vec::new(),
            raw: Some(body.clone()),
        }
    }
}

fn message_to_chat_message(msg: &Message) -> Value {
    match msg.role {
        Role::System => json!({ "role": "system", "content": msg.text_content() }),
        Role::Developer => json!({ "role": "developer", "content": msg.text_content() }),
        Role::User => json!({
            "role": "user",
            "content": msg
                .content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(json!({ "type": "text", "text": text })),
                    ContentPart::Image { url: Some(url), .. } => Some(json!({ "type": "image_url", "image_url": { "url": url } })),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        }),
        Role::Assistant => {
            let text = msg.text_content();
            let tool_calls: Vec<Value> = msg
                .content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ToolCall { id, name, arguments, raw_arguments } => Some(json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": raw_arguments.clone().unwrap_or_else(|| arguments.to_string()),
                        },
                    })),
                    _ => None,
                })
                .collect();
            let mut out = json!({ "role": "assistant", "content": if text.is_empty() { Value::Null } else { json!(text) } });
            if !tool_calls.is_empty() {
                out["tool_calls"] = json!(tool_calls);
            }
            out
        }
        Role::Tool => {
            let part = msg.content.iter().find_map(|p| match p {
                ContentPart::ToolResult { tool_call_id, content, .. } => Some((tool_call_id.clone(), content.as_text())),
                _ => None,
            });
            let (id, text) = part.unwrap_or_default();
            json!({ "role": "tool", "tool_call_id": id, "content": text })
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiChatAdapter {
    fn name(&self) -> &str {
        "openai_chat"
    }

    async fn complete(&self, request: &Request) -> Result<Response, TransportError> {
        let body = self.build_body(request, false);
        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url, &body, PostOptions { headers: self.headers(), ..Default::default() })
            .await?;
        if resp.status >= 400 {
            return Err(map_error_body(resp.status, resp.parsed_body.as_ref()));
        }
        let parsed = resp
            .parsed_body
            .ok_or_else(|| TransportError::new(ErrorKind::ServerError, "openai chat body was not valid JSON"))?;
        Ok(self.parse_response(&parsed))
    }

    async fn stream(&self, request: &Request) -> Result<EventStream, TransportError> {
        let body = self.build_body(request, true);
        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .http
            .post_stream(&url, &body, PostOptions { headers: self.headers(), ..Default::default() })
            .await?;
        if resp.status >= 400 {
            return Err(TransportError::new(ErrorKind::ServerError, format!("openai chat stream http {}", resp.status)));
        }
        Ok(drive_sse_stream(resp, ChatTranslator::default()))
    }

    fn supports_tool_choice(&self, mode: ToolChoiceMode) -> bool {
        !matches!(mode, ToolChoiceMode::Required)
    }

    fn supports_parallel_tool_calls(&self) -> bool {
        true
    }
}

fn map_error_body(status: u16, body: Option<&Value>) -> TransportError {
    let message = body
        .and_then(|b| b.get("error"))
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("openai chat error")
        .to_string();
    let code = body.and_then(|b| b.get("error")).and_then(|e| e.get("code")).and_then(|c| c.as_str()).unwrap_or("");
    let kind = TransportError::kind_for_status(status, code.contains("context_length"), code.contains("insufficient_quota"), code.contains("content_filter"));
    let mut err = TransportError::new(kind, message).with_provider("openai_chat").with_status(status);
    err.error_code = Some(code.to_string());
    err.raw = body.cloned();
    err
}

#[derive(Default)]
struct ChatTranslator {
    started: bool,
    text_index: Option<u32>,
    tool_index_by_position: HashMap<u32, (u32, String)>,
    next_index: u32,
    usage: Usage,
    raw_finish: Option<String>,
}

impl SseTranslator for ChatTranslator {
    fn on_event(&mut self, evt: SseEvent) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if evt.data.trim() == "[DONE]" {
            return out;
        }
        let Ok(data) = serde_json::from_str::<Value>(&evt.data) else { return out };
        if !self.started {
            self.started = true;
            let id = data.get("id").and_then(|v| v.as_str()).map(String::from);
            let model = data.get("model").and_then(|v| v.as_str()).map(String::from);
            out.push(StreamEvent::StreamStart { id, model });
        }
        if let Some(u) = data.get("usage") {
            self.usage = Usage {
                input_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()),
                output_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()),
                total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()),
                reasoning_tokens: None,
                cache_read_tokens: None,
                cache_write_tokens: None,
            };
        }
        let Some(choice) = data.get("choices").and_then(|v| v.as_array()).and_then(|a| a.first()) else {
            return out;
        };
        if let Some(finish) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            self.raw_finish = Some(finish.to_string());
        }
        let delta = choice.get("delta").cloned().unwrap_or_default();
        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            let index = *self.text_index.get_or_insert_with(|| {
                let i = self.next_index;
                self.next_index += 1;
                out.push(StreamEvent::TextStart { content_index: i });
                i
            });
            out.push(StreamEvent::TextDelta { content_index: index, delta: text.to_string() });
        }
        if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for call in calls {
                let position = call.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                let has_id = call.get("id").and_then(|v| v.as_str()).filter(|s| !s.is_empty());
                if let Some(id) = has_id {
                    let name = call.get("function").and_then(|f| f.get("name")).and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let index = self.next_index;
                    self.next_index += 1;
                    self.tool_index_by_position.insert(position, (index, id.to_string()));
                    out.push(StreamEvent::ToolCallStart { content_index: index, id: id.to_string(), name });
                }
                if let Some((index, id)) = self.tool_index_by_position.get(&position).cloned() {
                    if let Some(args) = call.get("function").and_then(|f| f.get("arguments")).and_then(|v| v.as_str()) {
                        out.push(StreamEvent::ToolCallDelta { content_index: index, id, raw_arguments: args.to_string() });
                    }
                }
            }
        }
        if choice.get("finish_reason").and_then(|v| v.as_str()).is_some() {
            if let Some(index) = self.text_index {
                out.push(StreamEvent::TextEnd { content_index: index });
            }
            for (index, id) in self.tool_index_by_position.values().cloned() {
                out.push(StreamEvent::ToolCallEnd {
                    content_index: index,
                    tool_call: UnifiedToolCall { id, name: String::new(), arguments: json!({}), raw_arguments: None },
                });
            }
            let raw = self.raw_finish.clone().unwrap_or_else(|| "stop".to_string());
            let finish_reason = if !self.tool_index_by_position.is_empty() { FinishReason::ToolCalls } else { map_finish_reason(&raw) };
            out.push(StreamEvent::Finish {
                finish_reason,
                raw_finish_reason: Some(raw),
                usage: self.usage,
                response: None,
                warnings: Vec::new(),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_sentinel_produces_no_events() {
        let mut t = ChatTranslator::default();
        let events = t.on_event(SseEvent { event: None, data: "[DONE]".to_string(), retry: None });
        assert!(events.is_empty());
    }

    #[test]
    fn text_delta_then_stop_closes_text_and_emits_finish() {
        let mut t = ChatTranslator::default();
        t.on_event(SseEvent {
            event: None,
            data: json!({"id":"x","model":"gpt-4o","choices":[{"delta":{"content":"hi"}}]}).to_string(),
            retry: None,
        });
        let events = t.on_event(SseEvent {
            event: None,
            data: json!({"choices":[{"delta":{},"finish_reason":"stop"}]}).to_string(),
            retry: None,
        });
        assert!(matches!(events[0], StreamEvent::TextEnd { .. }));
        assert!(matches!(events[1], StreamEvent::Finish { finish_reason: FinishReason::Stop, .. }));
    }
}
