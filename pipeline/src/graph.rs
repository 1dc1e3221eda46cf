//! Parsed graph shape: `Graph`/`Node`/`Edge`/`GraphAttrs`, and the `Fidelity` mode a target
//! node or edge can pin for the next LLM call's context-carryover.
//!
//! Nodes and edges are parsed once (by whatever upstream step turns DOT/CSS into this JSON
//! shape — out of scope here per spec) and are read-only from the engine's point of view.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context-carryover mode for the next LLM call when entering a node, spec §4.12.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Fidelity {
    Full,
    Truncate,
    Compact,
    SummaryLow,
    SummaryMedium,
    SummaryHigh,
}

impl FromStr for Fidelity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Fidelity::Full),
            "truncate" => Ok(Fidelity::Truncate),
            "compact" => Ok(Fidelity::Compact),
            "summary:low" => Ok(Fidelity::SummaryLow),
            "summary:medium" => Ok(Fidelity::SummaryMedium),
            "summary:high" => Ok(Fidelity::SummaryHigh),
            other => Err(format!("unknown fidelity mode: {other}")),
        }
    }
}

impl std::fmt::Display for Fidelity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Fidelity::Full => "full",
            Fidelity::Truncate => "truncate",
            Fidelity::Compact => "compact",
            Fidelity::SummaryLow => "summary:low",
            Fidelity::SummaryMedium => "summary:medium",
            Fidelity::SummaryHigh => "summary:high",
        };
        f.write_str(s)
    }
}

impl TryFrom<String> for Fidelity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fidelity> for String {
    fn from(value: Fidelity) -> Self {
        value.to_string()
    }
}

impl Default for Fidelity {
    fn default() -> Self {
        Fidelity::Compact
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphAttrs {
    pub goal: Option<String>,
    pub label: Option<String>,
    #[serde(default)]
    pub default_max_retry: u32,
    pub retry_target: Option<String>,
    pub fallback_retry_target: Option<String>,
    #[serde(default)]
    pub default_fidelity: Fidelity,
    pub model_stylesheet: Option<String>,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub raw: HashMap<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub label: Option<String>,
    pub shape: Option<String>,
    #[serde(rename = "type")]
    pub node_type: Option<String>,
    pub prompt: Option<String>,
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub goal_gate: bool,
    pub retry_target: Option<String>,
    pub fallback_retry_target: Option<String>,
    pub fidelity: Option<Fidelity>,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub llm_model: Option<String>,
    pub llm_provider: Option<String>,
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub auto_status: bool,
    #[serde(default)]
    pub allow_partial: bool,
    /// Attribute keys the source graph set explicitly, distinguishing them from ones this
    /// struct defaulted, per spec §3.
    #[serde(default)]
    pub explicit: HashSet<String>,
    #[serde(default)]
    pub raw: HashMap<String, Value>,
}

impl Node {
    pub fn is_explicit(&self, key: &str) -> bool {
        self.explicit.contains(key)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub label: Option<String>,
    pub condition: Option<String>,
    #[serde(default)]
    pub weight: i64,
    pub fidelity: Option<Fidelity>,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub loop_restart: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Subgraph {
    pub id: String,
    pub label: Option<String>,
    #[serde(default)]
    pub node_ids: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Graph {
    pub id: String,
    #[serde(default)]
    pub attrs: GraphAttrs,
    pub nodes: HashMap<String, Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub subgraphs: Vec<Subgraph>,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Outgoing edges of `node_id`, in original declaration order.
    pub fn edges_from(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == node_id).collect()
    }

    /// The start node: the configured graph-level start, else the first node whose shape is
    /// `Mdiamond`, per spec §4.15.
    pub fn start_node(&self) -> Option<&Node> {
        if let Some(start_id) = self.attrs.raw.get("start_node").and_then(|v| v.as_str()) {
            if let Some(node) = self.nodes.get(start_id) {
                return Some(node);
            }
        }
        self.nodes.values().find(|n| n.shape.as_deref() == Some("Mdiamond"))
    }

    /// Enclosing subgraph label for `node_id`, if any, used by fidelity thread-key derivation.
    pub fn enclosing_subgraph_label(&self, node_id: &str) -> Option<&str> {
        self.subgraphs
            .iter()
            .find(|sg| sg.node_ids.iter().any(|id| id == node_id))
            .and_then(|sg| sg.label.as_deref().or(Some(sg.id.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fidelity_round_trips_through_string_form() {
        for mode in ["full", "truncate", "compact", "summary:low", "summary:medium", "summary:high"] {
            let parsed: Fidelity = mode.parse().unwrap();
            assert_eq!(parsed.to_string(), mode);
        }
    }

    #[test]
    fn fidelity_rejects_unknown_mode() {
        assert!("summary:extreme".parse::<Fidelity>().is_err());
    }

    #[test]
    fn fidelity_serializes_as_bare_string() {
        let v = serde_json::to_value(Fidelity::SummaryMedium).unwrap();
        assert_eq!(v, "summary:medium");
    }

    #[test]
    fn start_node_prefers_mdiamond_shape() {
        let mut graph = Graph { id: "g".into(), ..Default::default() };
        graph.nodes.insert("a".into(), Node { id: "a".into(), shape: Some("box".into()), ..Default::default() });
        graph.nodes.insert("b".into(), Node { id: "b".into(), shape: Some("Mdiamond".into()), ..Default::default() });
        assert_eq!(graph.start_node().unwrap().id, "b");
    }

    #[test]
    fn edges_from_preserves_declaration_order() {
        let mut graph = Graph { id: "g".into(), ..Default::default() };
        graph.edges.push(Edge { source: "a".into(), target: "x".into(), ..Default::default() });
        graph.edges.push(Edge { source: "a".into(), target: "y".into(), ..Default::default() });
        let out = graph.edges_from("a");
        assert_eq!(out.iter().map(|e| e.target.as_str()).collect::<Vec<_>>(), vec!["x", "y"]);
    }
}
