//! Fidelity resolver: picks how much prior context accompanies the next LLM call when
//! entering a node, and renders the corresponding preamble text, spec §4.12.

use crate::context::{Context, INTERNAL_PREFIX};
use crate::graph::{Edge, Fidelity, Graph, Node};
use crate::outcome::OutcomeStatus;

/// Approximate token budgets per mode. Informational only — nothing truncates output to fit
/// these; they exist for operators tuning prompts against a model's context window.
pub const TOKEN_BUDGET_LOW: u32 = 600;
pub const TOKEN_BUDGET_MEDIUM: u32 = 1_500;
pub const TOKEN_BUDGET_HIGH: u32 = 3_000;

#[derive(Clone, Debug)]
pub struct StageRecord {
    pub node_id: String,
    pub status: OutcomeStatus,
    pub notes: Option<String>,
}

/// Precedence: incoming-edge fidelity > target-node fidelity > graph default > `compact`
/// (the graph default itself defaults to `compact`, so the final fallback is implicit).
pub fn resolve_fidelity(edge: Option<&Edge>, target: &Node, graph: &Graph) -> Fidelity {
    edge.and_then(|e| e.fidelity).or(target.fidelity).unwrap_or(graph.attrs.default_fidelity)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn value_display(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn sanitize_thread_segment(label: &str) -> String {
    label
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' { '-' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}

/// Resolves the thread/session key `full` mode reuses, per §4.12's precedence chain.
pub fn resolve_thread_key(graph: &Graph, target: &Node, edge: Option<&Edge>, previous_node_id: &str) -> String {
    target
        .thread_id
        .clone()
        .or_else(|| edge.and_then(|e| e.thread_id.clone()))
        .or_else(|| graph.attrs.thread_id.clone())
        .or_else(|| graph.enclosing_subgraph_label(&target.id).map(sanitize_thread_segment))
        .unwrap_or_else(|| previous_node_id.to_string())
}

/// Renders the context preamble a node's prompt is prefixed with, per the active fidelity mode.
pub fn render_preamble(mode: Fidelity, graph: &Graph, context: &Context, run_id: &str, stages: &[StageRecord]) -> String {
    let goal = graph.attrs.goal.as_deref().unwrap_or("");

    match mode {
        Fidelity::Full => String::new(),
        Fidelity::Truncate => format!("Goal: {goal}\nRun: {run_id}"),
        Fidelity::Compact => {
            let completed = stages.iter().map(|s| s.node_id.as_str()).collect::<Vec<_>>().join(", ");
            let mut lines = vec![format!("Goal: {goal}"), format!("Completed: {completed}")];
            let mut keys: Vec<&String> = context.keys().filter(|k| !k.starts_with(INTERNAL_PREFIX)).collect();
            keys.sort();
            keys.truncate(10);
            for key in keys {
                if let Some(value) = context.get(key) {
                    lines.push(format!("{key}: {}", truncate_chars(&value_display(value), 100)));
                }
            }
            lines.join("\n")
        }
        Fidelity::SummaryLow => {
            let last = stages.last().map(|s| format!("{:?}", s.status)).unwrap_or_else(|| "none".to_string());
            format!("Goal: {goal}\nStages completed: {}\nLast outcome: {last}", stages.len())
        }
        Fidelity::SummaryMedium => {
            let mut lines = vec![format!("Goal: {goal}"), format!("Stages completed: {}", stages.len())];
            for stage in stages.iter().rev().take(5).collect::<Vec<_>>().into_iter().rev() {
                lines.push(format!("{}: {:?}", stage.node_id, stage.status));
            }
            let mut keys: Vec<&String> = context.keys().filter(|k| !k.starts_with(INTERNAL_PREFIX)).collect();
            keys.sort();
            keys.truncate(5);
            for key in keys {
                if let Some(value) = context.get(key) {
                    lines.push(format!("{key}: {}", truncate_chars(&value_display(value), 80)));
                }
            }
            lines.join("\n")
        }
        Fidelity::SummaryHigh => {
            let mut lines = vec![format!("Goal: {goal}"), format!("Total stages: {}", stages.len())];
            for stage in stages {
                let notes = stage.notes.as_deref().map(|n| truncate_chars(n, 100)).unwrap_or_default();
                lines.push(format!("{}: {:?} ({notes})", stage.node_id, stage.status));
            }
            let mut keys: Vec<&String> = context.keys().filter(|k| !k.starts_with(INTERNAL_PREFIX)).collect();
            keys.sort();
            for key in keys {
                if let Some(value) = context.get(key) {
                    lines.push(format!("{key}: {}", truncate_chars(&value_display(value), 150)));
                }
            }
            lines.join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphAttrs;

    fn graph_with_goal(goal: &str) -> Graph {
        Graph { id: "g".into(), attrs: GraphAttrs { goal: Some(goal.into()), ..Default::default() }, ..Default::default() }
    }

    #[test]
    fn resolve_fidelity_prefers_edge_over_node_over_graph_default() {
        let graph = Graph {
            attrs: GraphAttrs { default_fidelity: Fidelity::SummaryHigh, ..Default::default() },
            ..Default::default()
        };
        let node = Node { fidelity: Some(Fidelity::Compact), ..Default::default() };
        let edge = Edge { fidelity: Some(Fidelity::Full), ..Default::default() };
        assert_eq!(resolve_fidelity(Some(&edge), &node, &graph), Fidelity::Full);
        assert_eq!(resolve_fidelity(None, &node, &graph), Fidelity::Compact);
        let bare_node = Node::default();
        assert_eq!(resolve_fidelity(None, &bare_node, &graph), Fidelity::SummaryHigh);
    }

    #[test]
    fn full_mode_renders_empty_preamble() {
        let graph = graph_with_goal("ship it");
        let context = Context::new();
        assert_eq!(render_preamble(Fidelity::Full, &graph, &context, "run1", &[]), "");
    }

    #[test]
    fn compact_mode_excludes_internal_namespace_keys() {
        let graph = graph_with_goal("ship it");
        let mut context = Context::new();
        context.set("internal.secret", serde_json::json!("hide-me"));
        context.set("visible", serde_json::json!("show-me"));
        let rendered = render_preamble(Fidelity::Compact, &graph, &context, "run1", &[]);
        assert!(rendered.contains("show-me"));
        assert!(!rendered.contains("hide-me"));
    }

    #[test]
    fn thread_key_falls_back_through_precedence_chain() {
        let graph = Graph { id: "g".into(), ..Default::default() };
        let node = Node { id: "n".into(), ..Default::default() };
        assert_eq!(resolve_thread_key(&graph, &node, None, "prev"), "prev");

        let mut graph_with_thread = graph.clone();
        graph_with_thread.attrs.thread_id = Some("graph-thread".into());
        assert_eq!(resolve_thread_key(&graph_with_thread, &node, None, "prev"), "graph-thread");

        let node_with_thread = Node { id: "n".into(), thread_id: Some("node-thread".into()), ..Default::default() };
        assert_eq!(resolve_thread_key(&graph_with_thread, &node_with_thread, None, "prev"), "node-thread");
    }
}
