//! Handler trait, shape→type resolution, and the registry the engine dispatches nodes
//! through, spec §4.10.

pub mod builtin;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::PipelineError;
use crate::graph::{Edge, Graph, Node};
use crate::outcome::{Outcome, OutcomeStatus};

/// Executes one node and reports what happened. Handlers never propagate Rust errors past
/// their own boundary — an internal failure becomes `Outcome::fail(..)`, matching the
/// "exceptions become FAIL" convention §4.10 spells out for `Codergen` and generalized here.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn execute(&self, node: &Node, context: &Context, graph: &Graph, logs_root: &Path) -> Outcome;
}

/// Maps a DOT-style node shape to the handler type name registered for it.
pub fn shape_to_type(shape: &str) -> Option<&'static str> {
    match shape {
        "Mdiamond" => Some("start"),
        "Msquare" => Some("exit"),
        "box" => Some("codergen"),
        "hexagon" => Some("wait.human"),
        "diamond" => Some("conditional"),
        "component" => Some("parallel"),
        "tripleoctagon" => Some("parallel.fan_in"),
        "parallelogram" => Some("tool"),
        "house" => Some("stack.manager_loop"),
        _ => None,
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    default: Option<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(type_name.into(), handler);
    }

    pub fn set_default(&mut self, handler: Arc<dyn Handler>) {
        self.default = Some(handler);
    }

    /// Resolves `node` to a handler: (1) explicit `node.type` if registered, (2) its
    /// `shape→type` mapping if that type is registered, (3) the default handler. A missing
    /// default plus an unresolved type is fatal, spec §4.10.
    pub fn resolve(&self, node: &Node) -> Result<Arc<dyn Handler>, PipelineError> {
        if let Some(type_name) = &node.node_type {
            if let Some(handler) = self.handlers.get(type_name) {
                return Ok(handler.clone());
            }
        }
        if let Some(shape) = &node.shape {
            if let Some(mapped) = shape_to_type(shape) {
                if let Some(handler) = self.handlers.get(mapped) {
                    return Ok(handler.clone());
                }
            }
        }
        if let Some(handler) = &self.default {
            return Ok(handler.clone());
        }
        let unresolved = node.node_type.clone().or_else(|| node.shape.clone()).unwrap_or_else(|| node.id.clone());
        Err(PipelineError::HandlerNotFound(unresolved))
    }
}

/// A choice `WaitForHuman` presents to an interviewer, derived from one outgoing edge.
#[derive(Clone, Debug)]
pub struct Choice {
    pub key: char,
    pub label: String,
    pub target: String,
}

/// An interviewer's reply to a `WaitForHuman` question.
pub enum InterviewReply {
    Selected(char),
    Timeout,
    Skip,
}

#[async_trait]
pub trait Interviewer: Send + Sync {
    async fn ask(&self, node_id: &str, question: &str, choices: &[Choice]) -> InterviewReply;
}

/// What a `Codergen` backend call produced: free text to wrap in a success outcome, or a
/// fully-formed outcome the backend computed itself.
pub enum BackendOutcome {
    Text(String),
    Outcome(Outcome),
}

#[async_trait]
pub trait CodergenBackend: Send + Sync {
    async fn run(&self, node_id: &str, prompt: &str, context: &Context) -> Result<BackendOutcome, String>;
}

/// One parallel branch's result, persisted as JSON under the `parallel.results` context key
/// for `FanIn` to rank. `score` comes from the branch's own `context_updates["score"]` when it
/// supplies one (0.0 otherwise) — spec §4.10 names the ranking criterion but not the score's
/// source, so branches that care about fan-in ranking set it themselves.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BranchResult {
    pub id: String,
    pub outcome: OutcomeStatus,
    pub notes: Option<String>,
    pub score: f64,
}

#[async_trait]
pub trait BranchExecutor: Send + Sync {
    async fn run_branch(&self, edge: &Edge, context: &Context) -> Outcome;
}

#[async_trait]
pub trait ToolCallable: Send + Sync {
    async fn call(&self, node: &Node, context: &Context) -> Result<Outcome, String>;
}
