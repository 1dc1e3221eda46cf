//! Unified request shape handed to a [`crate::providers::ProviderAdapter`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    None,
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoiceMode {
    Auto,
    None,
    Required,
    Named,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolChoice {
    pub mode: ToolChoiceMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ToolChoice {
    pub fn auto() -> Self {
        Self { mode: ToolChoiceMode::Auto, tool_name: None }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { mode: ToolChoiceMode::Named, tool_name: Some(name.into()) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormatType {
    Text,
    Json,
    JsonSchema,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: ResponseFormatType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, Value>,
    #[serde(default)]
    pub provider_options: std::collections::HashMap<String, Value>,
}

impl Request {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self { model: model.into(), messages, ..Default::default() }
    }

    /// True when the caller asked for parallel dispatch to be possible: ≥2 tools declared and
    /// the provider wasn't told `tool_choice = none`. Provider support is checked separately via
    /// `ProviderAdapter::supports_parallel_tool_calls`.
    pub fn wants_tools(&self) -> bool {
        !self.tools.is_empty()
            && !matches!(
                self.tool_choice,
                Some(ToolChoice { mode: ToolChoiceMode::None, .. })
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wants_tools_false_when_tool_choice_none() {
        let mut req = Request::new("gpt-4o", vec![]);
        req.tools.push(ToolDefinition {
            name: "read".into(),
            description: "reads a file".into(),
            parameters: serde_json::json!({}),
        });
        req.tool_choice = Some(ToolChoice { mode: ToolChoiceMode::None, tool_name: None });
        assert!(!req.wants_tools());
    }

    #[test]
    fn wants_tools_true_with_tools_and_auto_choice() {
        let mut req = Request::new("gpt-4o", vec![]);
        req.tools.push(ToolDefinition {
            name: "read".into(),
            description: "reads a file".into(),
            parameters: serde_json::json!({}),
        });
        assert!(req.wants_tools());
    }
}
