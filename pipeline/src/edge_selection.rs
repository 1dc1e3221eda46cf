//! Five-step priority algorithm picking the next edge out of the current node, spec §4.11.

use serde_json::Value;

use crate::accel::normalize_label;
use crate::context::Context;
use crate::graph::{Edge, Graph};
use crate::outcome::Outcome;

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn resolve_key(key: &str, outcome: &Outcome, context: &Context) -> String {
    if key == "outcome" {
        return serde_json::to_value(outcome.status).ok().map(|v| value_to_string(&v)).unwrap_or_default();
    }
    if key == "preferred_label" {
        return outcome.preferred_label.clone().unwrap_or_default();
    }
    if let Some(stripped) = key.strip_prefix("context.") {
        if let Some(v) = context.get(key) {
            return value_to_string(v);
        }
        if let Some(v) = context.get(stripped) {
            return value_to_string(v);
        }
        return String::new();
    }
    context.get(key).map(value_to_string).unwrap_or_default()
}

fn truthy(value: &str) -> bool {
    !value.is_empty() && value != "false" && value != "0"
}

fn eval_clause(clause: &str, outcome: &Outcome, context: &Context) -> bool {
    let clause = clause.trim();
    if let Some((key, value)) = clause.split_once("!=") {
        return resolve_key(key.trim(), outcome, context) != value.trim();
    }
    if let Some((key, value)) = clause.split_once('=') {
        return resolve_key(key.trim(), outcome, context) == value.trim();
    }
    truthy(&resolve_key(clause, outcome, context))
}

fn eval_condition(condition: &str, outcome: &Outcome, context: &Context) -> bool {
    condition.split("&&").all(|clause| eval_clause(clause, outcome, context))
}

/// Picks the best of `edges` by (weight desc, target-id asc).
fn best_by_weight<'a>(edges: &[&'a Edge]) -> Option<&'a Edge> {
    edges.iter().copied().max_by(|a, b| a.weight.cmp(&b.weight).then_with(|| b.target.cmp(&a.target)))
}

/// Runs the 5-step priority algorithm. Returns `None` iff `node_id` has no outgoing edges.
pub fn select_edge(graph: &Graph, node_id: &str, outcome: &Outcome, context: &Context) -> Option<Edge> {
    let outgoing = graph.edges_from(node_id);
    if outgoing.is_empty() {
        return None;
    }

    // Step 1: condition matching.
    let matching: Vec<&Edge> = outgoing
        .iter()
        .copied()
        .filter(|e| e.condition.as_deref().is_some_and(|c| !c.is_empty() && eval_condition(c, outcome, context)))
        .collect();
    if !matching.is_empty() {
        return best_by_weight(&matching).cloned();
    }

    // Step 2: preferred label.
    if let Some(preferred) = &outcome.preferred_label {
        let normalized_preferred = normalize_label(preferred);
        if let Some(edge) = outgoing
            .iter()
            .copied()
            .find(|e| e.label.as_deref().is_some_and(|l| normalize_label(l) == normalized_preferred))
        {
            return Some(edge.clone());
        }
    }

    // Step 3: suggested next ids, in order.
    for suggested in &outcome.suggested_next_ids {
        if let Some(edge) = outgoing.iter().copied().find(|e| &e.target == suggested) {
            return Some(edge.clone());
        }
    }

    // Step 4: weighted unconditional.
    let unconditional: Vec<&Edge> =
        outgoing.iter().copied().filter(|e| e.condition.as_deref().unwrap_or("").is_empty()).collect();
    if !unconditional.is_empty() {
        return best_by_weight(&unconditional).cloned();
    }

    // Step 5: fallback over all outgoing edges.
    best_by_weight(&outgoing).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    fn graph_with_edges(edges: Vec<Edge>) -> Graph {
        let mut graph = Graph { id: "g".into(), ..Default::default() };
        graph.nodes.insert("n".into(), Node { id: "n".into(), ..Default::default() });
        graph.edges = edges;
        graph
    }

    #[test]
    fn no_outgoing_edges_returns_none() {
        let graph = graph_with_edges(vec![]);
        let outcome = Outcome::success();
        let context = Context::new();
        assert!(select_edge(&graph, "n", &outcome, &context).is_none());
    }

    #[test]
    fn condition_match_wins_over_weighted_unconditional() {
        let graph = graph_with_edges(vec![
            Edge { source: "n".into(), target: "fallback".into(), weight: 100, ..Default::default() },
            Edge {
                source: "n".into(),
                target: "matched".into(),
                condition: Some("outcome=success".into()),
                ..Default::default()
            },
        ]);
        let outcome = Outcome::success();
        let context = Context::new();
        let edge = select_edge(&graph, "n", &outcome, &context).unwrap();
        assert_eq!(edge.target, "matched");
    }

    #[test]
    fn preferred_label_matches_normalized_edge_label() {
        let graph = graph_with_edges(vec![Edge {
            source: "n".into(),
            target: "approved".into(),
            label: Some("[A] Approve".into()),
            ..Default::default()
        }]);
        let mut outcome = Outcome::success();
        outcome.preferred_label = Some("approve".into());
        let context = Context::new();
        let edge = select_edge(&graph, "n", &outcome, &context).unwrap();
        assert_eq!(edge.target, "approved");
    }

    #[test]
    fn suggested_next_ids_checked_in_order() {
        let graph = graph_with_edges(vec![
            Edge { source: "n".into(), target: "b".into(), ..Default::default() },
            Edge { source: "n".into(), target: "a".into(), ..Default::default() },
        ]);
        let mut outcome = Outcome::success();
        outcome.suggested_next_ids = vec!["a".into(), "b".into()];
        let context = Context::new();
        let edge = select_edge(&graph, "n", &outcome, &context).unwrap();
        assert_eq!(edge.target, "a");
    }

    #[test]
    fn weighted_unconditional_breaks_ties_by_target_id_ascending() {
        let graph = graph_with_edges(vec![
            Edge { source: "n".into(), target: "z".into(), weight: 5, ..Default::default() },
            Edge { source: "n".into(), target: "a".into(), weight: 5, ..Default::default() },
        ]);
        let outcome = Outcome::success();
        let context = Context::new();
        let edge = select_edge(&graph, "n", &outcome, &context).unwrap();
        assert_eq!(edge.target, "a");
    }

    #[test]
    fn context_key_resolution_tries_full_key_then_stripped() {
        let graph = graph_with_edges(vec![Edge {
            source: "n".into(),
            target: "hit".into(),
            condition: Some("context.score=9".into()),
            ..Default::default()
        }]);
        let outcome = Outcome::success();
        let mut context = Context::new();
        context.set("score", serde_json::json!(9));
        let edge = select_edge(&graph, "n", &outcome, &context).unwrap();
        assert_eq!(edge.target, "hit");
    }

    #[test]
    fn and_joined_clauses_all_must_hold() {
        let graph = graph_with_edges(vec![Edge {
            source: "n".into(),
            target: "hit".into(),
            condition: Some("outcome=success && context.ready".into()),
            ..Default::default()
        }]);
        let outcome = Outcome::success();
        let mut context = Context::new();
        context.set("ready", serde_json::json!(true));
        assert_eq!(select_edge(&graph, "n", &outcome, &context).unwrap().target, "hit");
    }

    #[test]
    fn fallback_picks_among_all_edges_even_with_unsatisfied_conditions() {
        // No condition matches, no preferred label, no suggested ids, and no unconditional
        // edge exists either: step 5 still returns a result rather than None, since a
        // non-empty outgoing edge list always yields a fallback pick.
        let graph = graph_with_edges(vec![Edge {
            source: "n".into(),
            target: "hit".into(),
            condition: Some("context.ready".into()),
            ..Default::default()
        }]);
        let outcome = Outcome::success();
        let context = Context::new();
        assert_eq!(select_edge(&graph, "n", &outcome, &context).unwrap().target, "hit");
    }
}
