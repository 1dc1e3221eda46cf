//! Unified streaming event shape (data model §3, transport §4.3).
//!
//! Every provider adapter's `stream()` yields this single closed set of events instead of
//! its own vendor shape. A correct translator emits exactly one `StreamStart`, zero or more
//! text/reasoning/tool_call groups each bracketed by its own start/end, and exactly one of
//! `Finish` or `Error` as the last event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unified tool call: id, name and parsed (or best-effort) arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    /// Raw, not-yet-parsed argument text, kept for callers that want the exact provider bytes.
    pub raw_arguments: Option<String>,
}

/// Reason the model stopped generating, mapped per spec §4.3's finish-reason table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other,
}

/// Token usage for one completion; `total` defaults to `input + output` when unset upstream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub reasoning_tokens: Option<u64>,
    pub cache_read_tokens: Option<u64>,
    pub cache_write_tokens: Option<u64>,
}

fn add_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(x), Some(y)) => Some(x + y),
    }
}

impl std::ops::Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            input_tokens: add_opt(self.input_tokens, rhs.input_tokens),
            output_tokens: add_opt(self.output_tokens, rhs.output_tokens),
            total_tokens: add_opt(self.total_tokens, rhs.total_tokens),
            reasoning_tokens: add_opt(self.reasoning_tokens, rhs.reasoning_tokens),
            cache_read_tokens: add_opt(self.cache_read_tokens, rhs.cache_read_tokens),
            cache_write_tokens: add_opt(self.cache_write_tokens, rhs.cache_write_tokens),
        }
    }
}

impl Usage {
    /// Resolves `total_tokens`, falling back to `input + output` when the provider omitted it.
    pub fn resolved_total(&self) -> Option<u64> {
        self.total_tokens.or_else(|| add_opt(self.input_tokens, self.output_tokens))
    }
}

/// Unified streaming event; tagged by `type` in the closed set named in spec §3.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    StreamStart {
        id: Option<String>,
        model: Option<String>,
    },
    TextStart {
        content_index: u32,
    },
    TextDelta {
        content_index: u32,
        delta: String,
    },
    TextEnd {
        content_index: u32,
    },
    ReasoningStart {
        content_index: u32,
    },
    ReasoningDelta {
        content_index: u32,
        delta: String,
    },
    ReasoningEnd {
        content_index: u32,
    },
    ToolCallStart {
        content_index: u32,
        id: String,
        name: String,
    },
    ToolCallDelta {
        content_index: u32,
        id: String,
        raw_arguments: String,
    },
    ToolCallEnd {
        content_index: u32,
        tool_call: ToolCall,
    },
    Finish {
        finish_reason: FinishReason,
        raw_finish_reason: Option<String>,
        usage: Usage,
        /// The fully assembled response, when the adapter has enough state to build it inline.
        response: Option<Value>,
        warnings: Vec<String>,
    },
    Error {
        message: String,
        kind: String,
        retryable: bool,
    },
    /// Provider-specific event the translator chose to surface verbatim rather than drop.
    ProviderEvent {
        raw: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_add_propagates_undefined() {
        let a = Usage { input_tokens: Some(10), ..Default::default() };
        let b = Usage::default();
        let sum = a + b;
        assert_eq!(sum.input_tokens, Some(10));
        assert_eq!(sum.output_tokens, None);
    }

    #[test]
    fn usage_add_sums_both_defined() {
        let a = Usage { input_tokens: Some(10), output_tokens: Some(5), ..Default::default() };
        let b = Usage { input_tokens: Some(1), output_tokens: Some(2), ..Default::default() };
        let sum = a + b;
        assert_eq!(sum.input_tokens, Some(11));
        assert_eq!(sum.output_tokens, Some(7));
    }

    #[test]
    fn resolved_total_falls_back_to_input_plus_output() {
        let u = Usage { input_tokens: Some(3), output_tokens: Some(4), ..Default::default() };
        assert_eq!(u.resolved_total(), Some(7));
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let ev = StreamEvent::TextDelta { content_index: 0, delta: "hi".into() };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "text_delta");
        assert_eq!(v["delta"], "hi");
    }
}
