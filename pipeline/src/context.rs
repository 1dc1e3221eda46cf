//! In-memory keyed value map plus append-only run log that flows node-to-node, spec §3
//! `Context`. Mutated only by the engine at stage boundaries; parallel branches each see a
//! cloned copy and their updates are merged back in by the fan-in/engine, per §5.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::outcome::Outcome;

pub const KEY_OUTCOME: &str = "outcome";
pub const KEY_PREFERRED_LABEL: &str = "preferred_label";
pub const KEY_CURRENT_NODE: &str = "current_node";
pub const KEY_LAST_STAGE: &str = "last_stage";
pub const KEY_LAST_RESPONSE: &str = "last_response";
pub const KEY_GRAPH_GOAL: &str = "graph.goal";

/// Reserved namespace: keys under it are excluded from fidelity-mode context dumps (§4.12).
pub const INTERNAL_PREFIX: &str = "internal.";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Context {
    values: HashMap<String, Value>,
    #[serde(default)]
    log: Vec<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Shallow copy of the current value map, for read-only inspection.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values.clone()
    }

    /// Full copy, including the run log, used to isolate a parallel branch's context from its
    /// siblings (§5 "parallel branches see a cloned context").
    pub fn clone_for_branch(&self) -> Context {
        self.clone()
    }

    /// Merges `updates` into the value map, overwriting any existing keys.
    pub fn apply_updates(&mut self, updates: &HashMap<String, Value>) {
        for (k, v) in updates {
            self.values.insert(k.clone(), v.clone());
        }
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    pub fn logs(&self) -> &[String] {
        &self.log
    }

    /// Applies an outcome's context_updates, then sets the built-in `outcome`/
    /// `preferred_label`/`current_node` keys, spec §4.15 step 2.
    pub fn apply_outcome(&mut self, node_id: &str, outcome: &Outcome) {
        self.apply_updates(&outcome.context_updates);
        self.set(KEY_OUTCOME, serde_json::to_value(outcome.status).unwrap_or(Value::Null));
        if let Some(label) = &outcome.preferred_label {
            self.set(KEY_PREFERRED_LABEL, Value::String(label.clone()));
        } else {
            self.delete(KEY_PREFERRED_LABEL);
        }
        self.set(KEY_CURRENT_NODE, Value::String(node_id.to_string()));
        self.set(KEY_LAST_STAGE, Value::String(node_id.to_string()));
    }
}
