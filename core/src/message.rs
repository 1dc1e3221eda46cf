//! Unified message shape: a role plus an ordered list of tagged content parts.
//!
//! Every provider adapter translates its own wire message format to and from this shape.
//! Invariants (checked by [`Message::validate`], not by the type system, since structurally
//! forbidding e.g. a `thinking` part in a `tool` message would need one struct per role):
//! assistant messages may mix `text`/`thinking`/`tool_call` parts; `tool` messages contain only
//! `tool_result` parts; `system`/`developer` messages contain only `text` parts; a `tool_result`
//! part's `tool_call_id` must reference a prior assistant `tool_call.id` earlier in the history.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Developer,
}

/// One piece of message content, tagged by `type`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Audio {
        data: String,
        media_type: String,
    },
    Document {
        data: String,
        media_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_arguments: Option<String>,
    },
    ToolResult {
        tool_call_id: String,
        content: ToolResultContent,
        is_error: bool,
    },
    Thinking {
        text: String,
        #[serde(default)]
        redacted: bool,
    },
}

/// A tool result's content: either plain text or a structured JSON value (some providers
/// accept structured tool outputs directly rather than stringified JSON).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Structured(Value),
}

impl ToolResultContent {
    pub fn as_text(&self) -> String {
        match self {
            ToolResultContent::Text(s) => s.clone(),
            ToolResultContent::Structured(v) => v.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("system/developer messages may only contain text parts")]
    NonTextInSystemMessage,
    #[error("tool messages may only contain tool_result parts")]
    NonToolResultInToolMessage,
    #[error("tool_result references unknown tool_call_id {0}")]
    DanglingToolResult(String),
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    /// Concatenates all `text` parts; used wherever a plain-string view of a message is needed
    /// (system prompt assembly, truncation, logging).
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> Vec<&ContentPart> {
        self.content
            .iter()
            .filter(|p| matches!(p, ContentPart::ToolCall { .. }))
            .collect()
    }

    /// Validates the role-shape invariants for this message against the tool-call ids known
    /// so far in the history (callers fold `validate` across a `&[Message]` in order).
    pub fn validate(&self, known_tool_call_ids: &std::collections::HashSet<String>) -> Result<(), MessageError> {
        match self.role {
            Role::System | Role::Developer => {
                if self.content.iter().any(|p| !matches!(p, ContentPart::Text { .. })) {
                    return Err(MessageError::NonTextInSystemMessage);
                }
            }
            Role::Tool => {
                for part in &self.content {
                    match part {
                        ContentPart::ToolResult { tool_call_id, .. } => {
                            if !known_tool_call_ids.contains(tool_call_id) {
                                return Err(MessageError::DanglingToolResult(tool_call_id.clone()));
                            }
                        }
                        _ => return Err(MessageError::NonToolResultInToolMessage),
                    }
                }
            }
            Role::User | Role::Assistant => {}
        }
        Ok(())
    }
}

/// Validates an entire ordered history, threading tool_call ids forward.
pub fn validate_history(messages: &[Message]) -> Result<(), MessageError> {
    let mut known = std::collections::HashSet::new();
    for message in messages {
        message.validate(&known)?;
        for part in &message.content {
            if let ContentPart::ToolCall { id, .. } = part {
                known.insert(id.clone());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_content_joins_text_parts_only() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![
                ContentPart::Text { text: "hi ".into() },
                ContentPart::ToolCall {
                    id: "call_1".into(),
                    name: "read".into(),
                    arguments: json!({}),
                    raw_arguments: None,
                },
                ContentPart::Text { text: "there".into() },
            ],
        };
        assert_eq!(msg.text_content(), "hi there");
    }

    #[test]
    fn system_message_rejects_non_text_part() {
        let msg = Message {
            role: Role::System,
            content: vec![ContentPart::ToolResult {
                tool_call_id: "x".into(),
                content: ToolResultContent::Text("y".into()),
                is_error: false,
            }],
        };
        assert_eq!(
            msg.validate(&Default::default()),
            Err(MessageError::NonTextInSystemMessage)
        );
    }

    #[test]
    fn tool_result_must_reference_known_call_id() {
        let assistant = Message {
            role: Role::Assistant,
            content: vec![ContentPart::ToolCall {
                id: "call_1".into(),
                name: "read".into(),
                arguments: json!({}),
                raw_arguments: None,
            }],
        };
        let tool = Message {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult {
                tool_call_id: "call_1".into(),
                content: ToolResultContent::Text("ok".into()),
                is_error: false,
            }],
        };
        assert!(validate_history(&[assistant, tool]).is_ok());

        let dangling = Message {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult {
                tool_call_id: "call_missing".into(),
                content: ToolResultContent::Text("ok".into()),
                is_error: false,
            }],
        };
        assert_eq!(
            validate_history(std::slice::from_ref(&dangling)),
            Err(MessageError::DanglingToolResult("call_missing".into()))
        );
    }
}
