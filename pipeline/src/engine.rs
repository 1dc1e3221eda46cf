//! Drives a `Graph` from its start node to an exit, spec §4.15.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use config::{RetryDefaults, RuntimeDefaults};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use protocol::PipelineEvent;

use crate::artifact::ArtifactStore;
use crate::checkpoint::Checkpoint;
use crate::context::{Context, KEY_GRAPH_GOAL};
use crate::edge_selection::select_edge;
use crate::error::PipelineError;
use crate::graph::Graph;
use crate::handlers::HandlerRegistry;
use crate::outcome::OutcomeStatus;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn checkpoint_path(logs_root: &std::path::Path) -> PathBuf {
    logs_root.join("checkpoint.json")
}

/// Drives one graph run. Owns the mutable run state the step algorithm needs: current node,
/// completed nodes, per-node retry counters, context, and the artifact store.
pub struct PipelineEngine {
    graph: Graph,
    handlers: HandlerRegistry,
    logs_root: PathBuf,
    retry_defaults: RetryDefaults,
    checkpoint_every_n_steps: u32,
    context: Context,
    artifacts: ArtifactStore,
    completed_nodes: Vec<String>,
    node_retries: HashMap<String, u32>,
    sleep_enabled: bool,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl PipelineEngine {
    pub fn new(
        graph: Graph,
        handlers: HandlerRegistry,
        logs_root: PathBuf,
        defaults: RuntimeDefaults,
    ) -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let artifacts = ArtifactStore::new(Some(logs_root.join("artifacts")), defaults.artifact_file_threshold_bytes);
        let engine = Self {
            graph,
            handlers,
            logs_root,
            retry_defaults: defaults.retry,
            checkpoint_every_n_steps: defaults.checkpoint_every_n_steps.max(1),
            context: Context::new(),
            artifacts,
            completed_nodes: Vec::new(),
            node_retries: HashMap::new(),
            sleep_enabled: true,
            events: tx,
        };
        (engine, rx)
    }

    /// Disables the retry backoff sleep, so scenario tests run without real delay.
    pub fn disable_backoff_sleep(&mut self) {
        self.sleep_enabled = false;
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }

    fn compute_backoff_ms(&self, attempt: u32) -> u64 {
        let delay = self.retry_defaults.base_delay_ms as f64 * self.retry_defaults.multiplier.powi(attempt as i32);
        let capped = delay.min(self.retry_defaults.max_delay_ms as f64) as u64;
        if self.retry_defaults.jitter {
            let jitter_frac = 0.5 + (attempt as f64 * 0.137).fract();
            ((capped as f64) * jitter_frac) as u64
        } else {
            capped
        }
    }

    fn is_parallel_like(&self, node_type: Option<&str>, shape: Option<&str>) -> bool {
        node_type == Some("parallel") || shape == Some("component")
    }

    fn is_interview_like(&self, node_type: Option<&str>, shape: Option<&str>) -> bool {
        node_type == Some("wait.human") || shape == Some("hexagon")
    }

    fn is_exit_like(&self, node_type: Option<&str>, shape: Option<&str>) -> bool {
        node_type == Some("exit") || shape == Some("Msquare")
    }

    async fn maybe_checkpoint(&self, step: u64, current: &str) -> Result<(), PipelineError> {
        if step % self.checkpoint_every_n_steps as u64 != 0 {
            return Ok(());
        }
        let checkpoint = Checkpoint::create(current, &self.completed_nodes, &self.node_retries, &self.context, now_ms());
        let path = checkpoint_path(&self.logs_root);
        checkpoint.save(&path).await?;
        info!(path = %path.display(), step, "checkpoint saved");
        self.emit(PipelineEvent::CheckpointSaved { path: path.display().to_string(), step });
        Ok(())
    }

    /// Runs the graph to completion. `resume` loads the last checkpoint under `logs_root` (if
    /// any) and continues from its recorded `current_node`; a missing checkpoint falls back to
    /// a fresh run from the graph's start node.
    pub async fn run(&mut self, resume: bool) -> Result<(), PipelineError> {
        let mut current = if resume {
            match Checkpoint::load(&checkpoint_path(&self.logs_root)).await {
                Ok(checkpoint) => {
                    self.completed_nodes = checkpoint.completed_nodes;
                    self.node_retries = checkpoint.node_retries;
                    self.context = checkpoint.context;
                    checkpoint.current_node
                }
                Err(_) => self.start_node_id(),
            }
        } else {
            self.start_node_id()
        };

        if let Some(goal) = self.graph.attrs.goal.clone() {
            self.context.set(KEY_GRAPH_GOAL, json!(goal));
        }

        self.emit(PipelineEvent::PipelineStarted { goal: self.graph.attrs.goal.clone(), start_node: current.clone() });

        let mut step: u64 = 0;
        loop {
            step += 1;
            let finished = self.step(&mut current, step).await?;
            self.maybe_checkpoint(step, &current).await?;
            if finished {
                return Ok(());
            }
        }
    }

    fn start_node_id(&self) -> String {
        self.graph.start_node().map(|n| n.id.clone()).expect("graph must have a start node")
    }

    /// Runs one step of the algorithm. Returns `Ok(true)` once the run has reached a terminal
    /// state (success or failure); `current` is updated in place to the next node to execute.
    #[instrument(skip(self), fields(node_id = %current, attempt))]
    async fn step(&mut self, current: &mut String, step: u64) -> Result<bool, PipelineError> {
        let node = self.graph.node(current.as_str()).expect("edge target must reference an existing node").clone();
        let handler = self.handlers.resolve(&node)?;

        let parallel_like = self.is_parallel_like(node.node_type.as_deref(), node.shape.as_deref());
        let interview_like = self.is_interview_like(node.node_type.as_deref(), node.shape.as_deref());
        let exit_like = self.is_exit_like(node.node_type.as_deref(), node.shape.as_deref());

        self.emit(PipelineEvent::StageStarted { node_id: current.clone() });
        if parallel_like {
            let branch_count = self.graph.edges_from(current.as_str()).len();
            self.emit(PipelineEvent::ParallelStarted { node_id: current.clone(), branch_count });
        }
        if interview_like {
            let choices = self
                .graph
                .edges_from(current.as_str())
                .iter()
                .map(|e| e.label.clone().unwrap_or_else(|| e.target.clone()))
                .collect();
            self.emit(PipelineEvent::InterviewStarted { node_id: current.clone(), choices });
        }

        let outcome = handler.execute(&node, &self.context, &self.graph, &self.logs_root).await;
        self.context.apply_outcome(current.as_str(), &outcome);

        if parallel_like {
            let success_count =
                outcome.context_updates.get("parallel.success_count").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let branch_count =
                outcome.context_updates.get("parallel.branch_count").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            self.emit(PipelineEvent::ParallelCompleted { node_id: current.clone(), success_count, branch_count });
        }
        if interview_like {
            match outcome.status {
                OutcomeStatus::Retry => self.emit(PipelineEvent::InterviewTimeout { node_id: current.clone() }),
                _ => self.emit(PipelineEvent::InterviewCompleted {
                    node_id: current.clone(),
                    selected_label: outcome.preferred_label.clone().unwrap_or_default(),
                }),
            }
        }

        match outcome.status {
            OutcomeStatus::Retry => {
                let max = node.max_retries.unwrap_or(self.graph.attrs.default_max_retry);
                let attempts = self.node_retries.entry(current.clone()).or_insert(0);
                if *attempts < max {
                    *attempts += 1;
                    let attempt = *attempts;
                    let delay_ms = self.compute_backoff_ms(attempt);
                    warn!(node_id = %current, attempt, delay_ms, "retrying node");
                    self.emit(PipelineEvent::StageRetrying { node_id: current.clone(), attempt, delay_ms });
                    if self.sleep_enabled && delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    if let Some(target) = &node.retry_target {
                        *current = target.clone();
                    }
                    Ok(false)
                } else if let Some(fallback) = &node.fallback_retry_target {
                    self.completed_nodes.push(current.clone());
                    *current = fallback.clone();
                    Ok(false)
                } else {
                    let reason = outcome.failure_reason.clone().unwrap_or_else(|| "retries exhausted".to_string());
                    self.emit(PipelineEvent::StageFailed { node_id: current.clone(), failure_reason: reason.clone() });
                    self.emit(PipelineEvent::PipelineFailed { node_id: current.clone(), failure_reason: reason });
                    Ok(true)
                }
            }
            OutcomeStatus::Fail | OutcomeStatus::Skipped => {
                let reason = outcome.failure_reason.clone().unwrap_or_else(|| "node failed".to_string());
                self.emit(PipelineEvent::StageFailed { node_id: current.clone(), failure_reason: reason.clone() });
                self.emit(PipelineEvent::PipelineFailed { node_id: current.clone(), failure_reason: reason });
                Ok(true)
            }
            OutcomeStatus::Success | OutcomeStatus::PartialSuccess => {
                let status_value = serde_json::to_value(outcome.status).ok().and_then(|v| v.as_str().map(str::to_string));
                self.emit(PipelineEvent::StageCompleted {
                    node_id: current.clone(),
                    status: status_value.unwrap_or_default(),
                });

                let edge = select_edge(&self.graph, current.as_str(), &outcome, &self.context);
                self.completed_nodes.push(current.clone());

                match edge {
                    Some(edge) => {
                        if edge.loop_restart {
                            self.node_retries.insert(edge.target.clone(), 0);
                        }
                        *current = edge.target;
                        Ok(false)
                    }
                    None if exit_like => {
                        if self.context.has(KEY_GRAPH_GOAL) {
                            self.emit(PipelineEvent::PipelineCompleted { final_node: current.clone() });
                            Ok(true)
                        } else {
                            let reason = "goal gate failed: run completed without satisfying graph.goal".to_string();
                            self.emit(PipelineEvent::PipelineFailed { node_id: current.clone(), failure_reason: reason });
                            Err(PipelineError::GoalGateFailed)
                        }
                    }
                    None => {
                        let reason = "node has no outgoing edges and is not an exit node".to_string();
                        self.emit(PipelineEvent::PipelineFailed { node_id: current.clone(), failure_reason: reason });
                        Ok(true)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::graph::{Edge, GraphAttrs, Node};
    use crate::handlers::Handler;

    struct ScriptedHandler {
        outcomes: std::sync::Mutex<std::collections::VecDeque<crate::outcome::Outcome>>,
    }

    #[async_trait]
    impl Handler for ScriptedHandler {
        async fn execute(
            &self,
            _node: &Node,
            _context: &Context,
            _graph: &Graph,
            _logs_root: &std::path::Path,
        ) -> crate::outcome::Outcome {
            self.outcomes.lock().unwrap().pop_front().unwrap_or_else(crate::outcome::Outcome::success)
        }
    }

    fn linear_graph() -> Graph {
        let mut graph = Graph {
            id: "g".into(),
            attrs: GraphAttrs { goal: Some("ship it".into()), ..Default::default() },
            ..Default::default()
        };
        graph.nodes.insert("start".into(), Node { id: "start".into(), shape: Some("Mdiamond".into()), ..Default::default() });
        graph.nodes.insert("mid".into(), Node { id: "mid".into(), ..Default::default() });
        graph.nodes.insert("exit".into(), Node { id: "exit".into(), shape: Some("Msquare".into()), ..Default::default() });
        graph.edges.push(Edge { source: "start".into(), target: "mid".into(), ..Default::default() });
        graph.edges.push(Edge { source: "mid".into(), target: "exit".into(), ..Default::default() });
        graph
    }

    fn always_success() -> Arc<dyn Handler> {
        Arc::new(ScriptedHandler { outcomes: std::sync::Mutex::new(Default::default()) })
    }

    #[tokio::test]
    async fn linear_run_reaches_pipeline_completed() {
        let graph = linear_graph();
        let mut handlers = HandlerRegistry::new();
        handlers.set_default(always_success());
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, mut events) = PipelineEngine::new(graph, handlers, dir.path().to_path_buf(), RuntimeDefaults::default());
        engine.disable_backoff_sleep();
        engine.run(false).await.unwrap();

        let mut saw_completed = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PipelineEvent::PipelineCompleted { .. }) {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn exit_without_goal_key_fails_the_goal_gate() {
        let mut graph = linear_graph();
        graph.attrs.goal = None;
        let mut handlers = HandlerRegistry::new();
        handlers.set_default(always_success());
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _events) = PipelineEngine::new(graph, handlers, dir.path().to_path_buf(), RuntimeDefaults::default());
        engine.disable_backoff_sleep();
        let err = engine.run(false).await.unwrap_err();
        assert!(matches!(err, PipelineError::GoalGateFailed));
    }

    #[tokio::test]
    async fn retry_exhaustion_without_fallback_emits_pipeline_failed() {
        let mut graph = Graph { id: "g".into(), ..Default::default() };
        graph.nodes.insert("start".into(), Node {
            id: "start".into(),
            shape: Some("Mdiamond".into()),
            max_retries: Some(1),
            ..Default::default()
        });
        let mut handlers = HandlerRegistry::new();
        let retry_handler = Arc::new(ScriptedHandler {
            outcomes: std::sync::Mutex::new(std::collections::VecDeque::from(vec![
                crate::outcome::Outcome::retry("backend unavailable"),
                crate::outcome::Outcome::retry("still unavailable"),
            ])),
        });
        handlers.set_default(retry_handler);
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, mut events) = PipelineEngine::new(graph, handlers, dir.path().to_path_buf(), RuntimeDefaults::default());
        engine.disable_backoff_sleep();
        engine.run(false).await.unwrap();

        let mut saw_failed = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PipelineEvent::PipelineFailed { .. }) {
                saw_failed = true;
            }
        }
        assert!(saw_failed);
    }

    #[tokio::test]
    async fn checkpoint_is_persisted_under_logs_root() {
        let graph = linear_graph();
        let mut handlers = HandlerRegistry::new();
        handlers.set_default(always_success());
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _events) = PipelineEngine::new(graph, handlers, dir.path().to_path_buf(), RuntimeDefaults::default());
        engine.disable_backoff_sleep();
        engine.run(false).await.unwrap();
        assert!(dir.path().join("checkpoint.json").exists());
    }
}
