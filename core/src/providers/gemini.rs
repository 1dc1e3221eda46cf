//! Gemini `generateContent` / `streamGenerateContent` adapter. Auth is a `?key=` query param
//! rather than a header. Gemini function calls have no stable id, so this adapter synthesizes
//! `call_<n>` ids per request and keeps a name-indexed map to stitch streamed argument chunks
//! (Gemini sends a function call's arguments as a single complete JSON object per chunk, never
//! split across deltas, but the unified stream model still wants a start/delta/end bracket).

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};

use protocol::stream_event::{ToolCall as UnifiedToolCall, Usage};
use protocol::{FinishReason, StreamEvent};

use crate::error::{ErrorKind, TransportError};
use crate::message::{ContentPart, Message, Role};
use crate::request::{Request, ToolChoiceMode};
use crate::response::{FinishDetail, Response};
use crate::transport::{HttpTransport, PostOptions, SseEvent};

use super::{drive_sse_stream, EventStream, ProviderAdapter, SseTranslator};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiAdapter {
    api_key: String,
    base_url: String,
    http: HttpTransport,
}

impl GeminiAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), base_url: DEFAULT_BASE_URL.to_string(), http: HttpTransport::default() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, request: &Request) -> Value {
        let mut system_parts: Vec<Value> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();
        for msg in &request.messages {
            match msg.role {
                Role::System | Role::Developer => {
                    system_parts.push(json!({ "text": msg.text_content() }));
                }
                Role::User => contents.push(json!({ "role": "user", "parts": content_to_gemini_parts(&msg.content) })),
                Role::Assistant => contents.push(json!({ "role": "model", "parts": content_to_gemini_parts(&msg.content) })),
                Role::Tool => {
                    let parts: Vec<Value> = msg
                        .content
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::ToolResult { content, .. } => Some(json!({
                                "functionResponse": { "name": "", "response": { "content": content.as_text() } },
                            })),
                            _ => None,
                        })
                        .collect();
                    contents.push(json!({ "role": "user", "parts": parts }));
                }
            }
        }

        let mut body = json!({ "contents": contents });
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({ "parts": system_parts });
        }
        let mut generation_config = json!({});
        if let Some(t) = request.temperature {
            generation_config["temperature"] = json!(t);
        }
        if let Some(t) = request.top_p {
            generation_config["topP"] = json!(t);
        }
        if let Some(m) = request.max_tokens {
            generation_config["maxOutputTokens"] = json!(m);
        }
        if !request.stop_sequences.is_empty() {
            generation_config["stopSequences"] = json!(request.stop_sequences);
        }
        if generation_config.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
            body["generationConfig"] = generation_config;
        }
        if !request.tools.is_empty() {
            body["tools"] = json!([{
                "functionDeclarations": request.tools.iter().map(|t| json!({
                    "name": t.name, "description": t.description, "parameters": t.parameters,
                })).collect::<Vec<_>>(),
            }]);
            if let Some(choice) = &request.tool_choice {
                let mode = match choice.mode {
                    ToolChoiceMode::Auto => "AUTO",
                    ToolChoiceMode::None => "NONE",
                    ToolChoiceMode::Required => "ANY",
                    ToolChoiceMode::Named => "ANY",
                };
                let mut fcc = json!({ "mode": mode });
                if let ToolChoiceMode::Named = choice.mode {
                    fcc["allowedFunctionNames"] = json!([choice.tool_name]);
                }
                body["toolConfig"] = json!({ "functionCallingConfig": fcc });
            }
        }
        body
    }

    fn parse_response(&self, model: &str, body: &Value, id_gen: &CallIdGenerator) -> Response {
        let candidate = body.get("candidates").and_then(|v| v.as_array()).and_then(|a| a.first());
        let mut content = Vec::new();
        if let Some(parts) = candidate.and_then(|c| c.get("content")).and_then(|c| c.get("parts")).and_then(|v| v.as_array()) {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    content.push(ContentPart::Text { text: text.to_string() });
                } else if let Some(fc) = part.get("functionCall") {
                    let name = fc.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    content.push(ContentPart::ToolCall {
                        id: id_gen.next_for(&name),
                        name,
                        arguments: fc.get("args").cloned().unwrap_or(json!({})),
                        raw_arguments: None,
                    });
                }
            }
        }
        let raw_finish = candidate.and_then(|c| c.get("finishReason")).and_then(|v| v.as_str()).unwrap_or("STOP");
        let finish_reason = if content.iter().any(|p| matches!(p, ContentPart::ToolCall { .. })) {
            FinishReason::ToolCalls
        } else {
            super::map_finish_reason(raw_finish)
        };
        let usage = body.get("usageMetadata").map(|u| Usage {
            input_tokens: u.get("promptTokenCount").and_then(|v| v.as_u64()),
            output_tokens: u.get("candidatesTokenCount").and_then(|v| v.as_u64()),
            total_tokens: u.get("totalTokenCount").and_then(|v| v.as_u64()),
            reasoning_tokens: u.get("thoughtsTokenCount").and_then(|v| v.as_u64()),
            cache_read_tokens: u.get("cachedContentTokenCount").and_then(|v| v.as_u64()),
            cache_write_tokens: None,
        }).unwrap_or_default();

        Response {
            id: String::new(),
            model: model.to_string(),
            provider: "gemini".to_string(),
            message: Message { role: Role::Assistant, content },
            finish_reason: FinishDetail { reason: finish_reason, raw: Some(raw_finish.to_string()) },
            usage,
            warnings: Vec::new(),
            raw: Some(body.clone()),
        }
    }
}

fn content_to_gemini_parts(parts: &[ContentPart]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(json!({ "text": text })),
            ContentPart::ToolCall { name, arguments, .. } => Some(json!({
                "functionCall": { "name": name, "args": arguments },
            })),
            ContentPart::Image { data: Some(data), media_type, .. } => Some(json!({
                "inlineData": { "mimeType": media_type, "data": data },
            })),
            _ => None,
        })
        .collect()
}

/// Synthesizes a stable-within-request `call_<n>` id the first time a function name is seen,
/// since Gemini itself never assigns one.
#[derive(Default)]
struct CallIdGenerator {
    counter: AtomicU32,
}

impl CallIdGenerator {
    fn next_for(&self, _name: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("call_{n}")
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: &Request) -> Result<Response, TransportError> {
        let body = self.build_body(request);
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, request.model, self.api_key
        );
        let resp = self.http.post(&url, &body, PostOptions::default()).await?;
        if resp.status >= 400 {
            return Err(map_error_body(resp.status, resp.parsed_body.as_ref()));
        }
        let parsed = resp
            .parsed_body
            .ok_or_else(|| TransportError::new(ErrorKind::ServerError, "gemini body was not valid JSON"))?;
        Ok(self.parse_response(&request.model, &parsed, &CallIdGenerator::default()))
    }

    async fn stream(&self, request: &Request) -> Result<EventStream, TransportError> {
        let body = self.build_body(request);
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, request.model, self.api_key
        );
        let resp = self.http.post_stream(&url, &body, PostOptions::default()).await?;
        if resp.status >= 400 {
            return Err(TransportError::new(ErrorKind::ServerError, format!("gemini stream http {}", resp.status)));
        }
        Ok(drive_sse_stream(resp, GeminiTranslator::new(request.model.clone())))
    }

    fn supports_tool_choice(&self, _mode: ToolChoiceMode) -> bool {
        true
    }
}

fn map_error_body(status: u16, body: Option<&Value>) -> TransportError {
    let error_obj = body.and_then(|b| b.get("error"));
    let message = error_obj.and_then(|e| e.get("message")).and_then(|m| m.as_str()).unwrap_or("gemini error").to_string();
    let status_str = error_obj.and_then(|e| e.get("status")).and_then(|v| v.as_str()).unwrap_or("");
    let kind = TransportError::kind_for_status(status, status_str == "INVALID_ARGUMENT" && message.to_lowercase().contains("token"), status_str == "RESOURCE_EXHAUSTED", false);
    let mut err = TransportError::new(kind, message).with_provider("gemini").with_status(status);
    err.raw = body.cloned();
    err
}

struct GeminiTranslator {
    model: String,
    started: bool,
    text_index: Option<u32>,
    next_index: u32,
    id_gen: CallIdGenerator,
    usage: Usage,
    final_finish: Option<String>,
    saw_tool_call: bool,
}

impl GeminiTranslator {
    fn new(model: String) -> Self {
        Self {
            model,
            started: false,
            text_index: None,
            next_index: 0,
            id_gen: CallIdGenerator::default(),
            usage: Usage::default(),
            final_finish: None,
            saw_tool_call: false,
        }
    }
}

impl SseTranslator for GeminiTranslator {
    fn on_event(&mut self, evt: SseEvent) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        let Ok(data) = serde_json::from_str::<Value>(&evt.data) else { return out };
        if !self.started {
            self.started = true;
            out.push(StreamEvent::StreamStart { id: None, model: Some(self.model.clone()) });
        }
        if let Some(u) = data.get("usageMetadata") {
            self.usage = Usage {
                input_tokens: u.get("promptTokenCount").and_then(|v| v.as_u64()),
                output_tokens: u.get("candidatesTokenCount").and_then(|v| v.as_u64()),
                total_tokens: u.get("totalTokenCount").and_then(|v| v.as_u64()),
                reasoning_tokens: u.get("thoughtsTokenCount").and_then(|v| v.as_u64()),
                cache_read_tokens: u.get("cachedContentTokenCount").and_then(|v| v.as_u64()),
                cache_write_tokens: None,
            };
        }
        let Some(candidate) = data.get("candidates").and_then(|v| v.as_array()).and_then(|a| a.first()) else {
            return out;
        };
        if let Some(finish) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            self.final_finish = Some(finish.to_string());
        }
        if let Some(parts) = candidate.get("content").and_then(|c| c.get("parts")).and_then(|v| v.as_array()) {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    let index = *self.text_index.get_or_insert_with(|| {
                        let i = self.next_index;
                        self.next_index += 1;
                        out.push(StreamEvent::TextStart { content_index: i });
                        i
                    });
                    out.push(StreamEvent::TextDelta { content_index: index, delta: text.to_string() });
                } else if let Some(fc) = part.get("functionCall") {
                    self.saw_tool_call = true;
                    let name = fc.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let id = self.id_gen.next_for(&name);
                    let index = self.next_index;
                    self.next_index += 1;
                    out.push(StreamEvent::ToolCallStart { content_index: index, id: id.clone(), name: name.clone() });
                    let args = fc.get("args").cloned().unwrap_or(json!({}));
                    out.push(StreamEvent::ToolCallDelta { content_index: index, id: id.clone(), raw_arguments: args.to_string() });
                    out.push(StreamEvent::ToolCallEnd {
                        content_index: index,
                        tool_call: UnifiedToolCall { id, name, arguments: args.clone(), raw_arguments: Some(args.to_string()) },
                    });
                }
            }
        }
        if self.final_finish.is_some() && data.get("candidates").is_some() {
            if let Some(index) = self.text_index.take() {
                out.push(StreamEvent::TextEnd { content_index: index });
            }
        }
        out
    }

    fn on_finish(&mut self) -> Vec<StreamEvent> {
        let raw = self.final_finish.clone().unwrap_or_else(|| "STOP".to_string());
        let finish_reason = if self.saw_tool_call { FinishReason::ToolCalls } else { super::map_finish_reason(&raw) };
        vec![StreamEvent::Finish {
            finish_reason,
            raw_finish_reason: Some(raw),
            usage: self.usage,
            response: None,
            warnings: Vec::new(),
        }]
    }
}
