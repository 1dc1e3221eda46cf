//! Built-in handlers, spec §4.10.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use core::agent::{AgentSession, SessionConfig};
use core::client::Client;
use core::tools::ExecutionEnvironment;
use protocol::agent_event::AgentEventKind;

use crate::accel::extract_key;
use crate::context::Context;
use crate::graph::{Graph, Node};
use crate::outcome::{Outcome, OutcomeStatus};

use super::{BackendOutcome, BranchExecutor, BranchResult, CodergenBackend, Choice, Handler, InterviewReply, Interviewer, ToolCallable};

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Entry point into the graph. Always succeeds; nothing else to do.
pub struct StartHandler;

#[async_trait]
impl Handler for StartHandler {
    async fn execute(&self, _node: &Node, _context: &Context, _graph: &Graph, _logs_root: &Path) -> Outcome {
        Outcome::success()
    }
}

/// Sink node. Goal-gate enforcement happens in the engine, not here, since it needs the final
/// context rather than anything local to this handler.
pub struct ExitHandler;

#[async_trait]
impl Handler for ExitHandler {
    async fn execute(&self, _node: &Node, _context: &Context, _graph: &Graph, _logs_root: &Path) -> Outcome {
        Outcome::success()
    }
}

/// Non-routing: always succeeds. Branching on the node's outgoing `condition`s is
/// edge-selection's job, not this handler's.
pub struct ConditionalHandler;

#[async_trait]
impl Handler for ConditionalHandler {
    async fn execute(&self, _node: &Node, _context: &Context, _graph: &Graph, _logs_root: &Path) -> Outcome {
        Outcome::success()
    }
}

/// Expands `$goal`, writes `prompt.md`/`response.md`/`status.json` under `<logs_root>/<node>/`,
/// and optionally delegates to a backend. Without a backend, runs in simulation mode.
pub struct CodergenHandler {
    backend: Option<Arc<dyn CodergenBackend>>,
}

impl CodergenHandler {
    pub fn new(backend: Option<Arc<dyn CodergenBackend>>) -> Self {
        Self { backend }
    }

    async fn write_artifacts(&self, logs_root: &Path, node_id: &str, prompt: &str, response: &str, outcome: &Outcome) -> std::io::Result<()> {
        let dir = logs_root.join(node_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("prompt.md"), prompt).await?;
        tokio::fs::write(dir.join("response.md"), response).await?;
        let status = json!({
            "status": outcome.status,
            "notes": outcome.notes,
            "failure_reason": outcome.failure_reason,
        });
        tokio::fs::write(dir.join("status.json"), serde_json::to_vec_pretty(&status)?).await?;
        Ok(())
    }
}

#[async_trait]
impl Handler for CodergenHandler {
    async fn execute(&self, node: &Node, context: &Context, graph: &Graph, logs_root: &Path) -> Outcome {
        let goal = graph.attrs.goal.as_deref().unwrap_or("");
        let prompt = node.prompt.as_deref().unwrap_or("").replace("$goal", goal);

        let (mut outcome, response_text) = match &self.backend {
            Some(backend) => match backend.run(&node.id, &prompt, context).await {
                Ok(BackendOutcome::Text(text)) => (Outcome::success().with_notes(text.clone()), text),
                Ok(BackendOutcome::Outcome(o)) => {
                    let text = o.notes.clone().unwrap_or_default();
                    (o, text)
                }
                Err(message) => (Outcome::fail(message.clone()), message),
            },
            None => {
                let note = "simulated: no backend configured".to_string();
                (Outcome::success().with_notes(note.clone()), note)
            }
        };

        outcome = outcome.with_context_update("last_response", json!(truncate_chars(&response_text, 200)));

        if let Err(err) = self.write_artifacts(logs_root, &node.id, &prompt, &response_text, &outcome).await {
            return Outcome::fail(format!("codergen io error: {err}"));
        }

        outcome
    }
}

/// Presents a multiple-choice question derived from outgoing edges to an `Interviewer`.
pub struct WaitForHumanHandler {
    interviewer: Arc<dyn Interviewer>,
}

impl WaitForHumanHandler {
    pub fn new(interviewer: Arc<dyn Interviewer>) -> Self {
        Self { interviewer }
    }

    fn choices(graph: &Graph, node_id: &str) -> Vec<Choice> {
        graph
            .edges_from(node_id)
            .into_iter()
            .map(|edge| {
                let label = edge.label.clone().unwrap_or_else(|| edge.target.clone());
                let key = extract_key(&label).unwrap_or('?');
                Choice { key, label, target: edge.target.clone() }
            })
            .collect()
    }
}

#[async_trait]
impl Handler for WaitForHumanHandler {
    async fn execute(&self, node: &Node, _context: &Context, graph: &Graph, _logs_root: &Path) -> Outcome {
        let choices = Self::choices(graph, &node.id);
        let question = node.prompt.clone().unwrap_or_default();
        let reply = self.interviewer.ask(&node.id, &question, &choices).await;

        match reply {
            InterviewReply::Selected(key) => match choices.iter().find(|c| c.key == key) {
                Some(choice) => Outcome::success()
                    .with_context_update(format!("human.{}.selected", node.id), json!(choice.target))
                    .with_context_update(format!("human.{}.label", node.id), json!(choice.label))
                    .with_preferred(choice.label.clone(), vec![choice.target.clone()]),
                None => Outcome::fail("no edge matches the selected key"),
            },
            InterviewReply::Timeout => match node.raw.get("default_choice").and_then(|v| v.as_str()) {
                Some(target) => Outcome::success().with_preferred(target.to_string(), vec![target.to_string()]),
                None => Outcome::retry("interview timed out with no default_choice configured"),
            },
            InterviewReply::Skip => Outcome::fail("interview skipped"),
        }
    }
}

impl Outcome {
    fn with_preferred(mut self, label: String, suggested: Vec<String>) -> Self {
        self.preferred_label = Some(label);
        self.suggested_next_ids = suggested;
        self
    }
}

/// Join policy for `Parallel`'s fan-out, read from `node.raw["join_policy"]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JoinPolicy {
    WaitAll,
    FirstSuccess,
}

impl JoinPolicy {
    fn from_node(node: &Node) -> Self {
        match node.raw.get("join_policy").and_then(|v| v.as_str()) {
            Some("first_success") => JoinPolicy::FirstSuccess,
            _ => JoinPolicy::WaitAll,
        }
    }
}

/// Fans out one concurrent execution per outgoing edge, joining per `join_policy`.
pub struct ParallelHandler {
    executor: Option<Arc<dyn BranchExecutor>>,
}

impl ParallelHandler {
    pub fn new(executor: Option<Arc<dyn BranchExecutor>>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Handler for ParallelHandler {
    async fn execute(&self, node: &Node, context: &Context, graph: &Graph, _logs_root: &Path) -> Outcome {
        let edges = graph.edges_from(&node.id);
        let branch_count = edges.len();

        let branch_outcomes = futures::future::join_all(edges.iter().map(|edge| {
            let executor = self.executor.clone();
            let branch_context = context.clone_for_branch();
            async move {
                match &executor {
                    Some(exec) => exec.run_branch(edge, &branch_context).await,
                    None => Outcome::success().with_notes("simulated branch"),
                }
            }
        }))
        .await;

        let results: Vec<BranchResult> = edges
            .iter()
            .zip(branch_outcomes.iter())
            .map(|(edge, outcome)| BranchResult {
                id: edge.target.clone(),
                outcome: outcome.status,
                notes: outcome.notes.clone(),
                score: outcome.context_updates.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0),
            })
            .collect();

        let success_count = results.iter().filter(|r| r.outcome == OutcomeStatus::Success).count();
        let policy = JoinPolicy::from_node(node);
        let status = match policy {
            JoinPolicy::WaitAll => {
                if results.iter().all(|r| r.outcome == OutcomeStatus::Success) {
                    OutcomeStatus::Success
                } else if results.iter().any(|r| r.outcome == OutcomeStatus::Success) {
                    OutcomeStatus::PartialSuccess
                } else {
                    OutcomeStatus::Fail
                }
            }
            JoinPolicy::FirstSuccess => {
                if success_count > 0 {
                    OutcomeStatus::Success
                } else {
                    OutcomeStatus::Fail
                }
            }
        };

        let results_json = serde_json::to_value(&results).unwrap_or(json!([]));
        Outcome {
            status,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::from([
                ("parallel.results".to_string(), results_json),
                ("parallel.branch_count".to_string(), json!(branch_count)),
                ("parallel.success_count".to_string(), json!(success_count)),
            ]),
            notes: None,
            failure_reason: if status == OutcomeStatus::Fail { Some("all branches failed".to_string()) } else { None },
        }
    }
}

/// Ranks `parallel.results` by `(outcome_rank asc, score desc, id asc)` and records the winner.
pub struct FanInHandler;

#[async_trait]
impl Handler for FanInHandler {
    async fn execute(&self, _node: &Node, context: &Context, _graph: &Graph, _logs_root: &Path) -> Outcome {
        let results: Vec<BranchResult> = match context.get("parallel.results") {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_default(),
            None => Vec::new(),
        };

        if results.is_empty() || results.iter().all(|r| matches!(r.outcome, OutcomeStatus::Fail | OutcomeStatus::Skipped)) {
            return Outcome::fail("all parallel branches failed");
        }

        let best = results
            .iter()
            .min_by(|a, b| {
                a.outcome
                    .rank()
                    .cmp(&b.outcome.rank())
                    .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .expect("non-empty checked above");

        Outcome::success()
            .with_context_update("parallel.fan_in.best_id", json!(best.id))
            .with_context_update("parallel.fan_in.best_outcome", serde_json::to_value(best.outcome).unwrap_or(json!(null)))
    }
}

/// Invokes a named callable, resolved from `node.raw["tool_name"]` or falling back to the
/// node's own id, and maps its result/error to an `Outcome`.
pub struct ToolHandler {
    callables: HashMap<String, Arc<dyn ToolCallable>>,
}

impl ToolHandler {
    pub fn new(callables: HashMap<String, Arc<dyn ToolCallable>>) -> Self {
        Self { callables }
    }
}

#[async_trait]
impl Handler for ToolHandler {
    async fn execute(&self, node: &Node, context: &Context, _graph: &Graph, _logs_root: &Path) -> Outcome {
        let name = node.raw.get("tool_name").and_then(|v| v.as_str()).unwrap_or(&node.id);
        match self.callables.get(name) {
            Some(callable) => match callable.call(node, context).await {
                Ok(outcome) => outcome,
                Err(message) => Outcome::fail(message),
            },
            None => Outcome::fail(format!("no callable registered for tool: {name}")),
        }
    }
}

/// Treats `node.prompt` as a task for a fresh agent session, spec §4.10's `CodingAgent`
/// handler. Success/failure comes from the child's final assistant reply.
pub struct CodingAgentHandler {
    client: Arc<Client>,
    registry: Arc<core::tools::ToolRegistry>,
    env: Arc<dyn ExecutionEnvironment>,
    config_template: SessionConfig,
}

impl CodingAgentHandler {
    pub fn new(
        client: Arc<Client>,
        registry: Arc<core::tools::ToolRegistry>,
        env: Arc<dyn ExecutionEnvironment>,
        config_template: SessionConfig,
    ) -> Self {
        Self { client, registry, env, config_template }
    }
}

#[async_trait]
impl Handler for CodingAgentHandler {
    async fn execute(&self, node: &Node, context: &Context, graph: &Graph, _logs_root: &Path) -> Outcome {
        let goal = graph.attrs.goal.as_deref().unwrap_or("");
        let task = node.prompt.as_deref().unwrap_or("").replace("$goal", goal);

        let mut config = self.config_template.clone();
        if let Some(model) = &node.llm_model {
            config.model = model.clone();
        }
        if let Some(provider) = &node.llm_provider {
            config.provider = Some(provider.clone());
        }

        let (session, mut events) = AgentSession::new(self.client.clone(), self.registry.clone(), self.env.clone(), config);
        session.process_input(task).await;

        let mut last_text = String::new();
        while let Ok(event) = events.try_recv() {
            if event.kind == AgentEventKind::AssistantTextEnd {
                if let Some(text) = event.data.as_ref().and_then(|d| d.get("text")).and_then(|v| v.as_str()) {
                    if !text.is_empty() {
                        last_text = text.to_string();
                    }
                }
            }
        }
        let _ = context;

        if last_text.is_empty() {
            return Outcome::fail("coding agent produced no final reply");
        }

        Outcome::success()
            .with_context_update("last_response", json!(truncate_chars(&last_text, 200)))
            .with_notes(truncate_chars(&last_text, 500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Edge;
    use core::providers::stub::StubAdapter;
    use core::tools::exec_env::MemoryExecutionEnvironment;
    use core::tools::ToolRegistry;

    #[tokio::test]
    async fn start_and_exit_always_succeed() {
        let graph = Graph::default();
        let node = Node::default();
        let context = Context::new();
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(StartHandler.execute(&node, &context, &graph, dir.path()).await.status, OutcomeStatus::Success);
        assert_eq!(ExitHandler.execute(&node, &context, &graph, dir.path()).await.status, OutcomeStatus::Success);
    }

    #[tokio::test]
    async fn codergen_without_backend_runs_simulated() {
        let handler = CodergenHandler::new(None);
        let graph = Graph { attrs: crate::graph::GraphAttrs { goal: Some("ship it".into()), ..Default::default() }, ..Default::default() };
        let node = Node { id: "n1".into(), prompt: Some("Goal: $goal".into()), ..Default::default() };
        let context = Context::new();
        let dir = tempfile::tempdir().unwrap();
        let outcome = handler.execute(&node, &context, &graph, dir.path()).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(dir.path().join("n1").join("prompt.md").exists());
        let prompt = tokio::fs::read_to_string(dir.path().join("n1").join("prompt.md")).await.unwrap();
        assert_eq!(prompt, "Goal: ship it");
    }

    struct FixedInterviewer(InterviewReplyKind);

    enum InterviewReplyKind {
        Key(char),
        Timeout,
        Skip,
    }

    #[async_trait]
    impl Interviewer for FixedInterviewer {
        async fn ask(&self, _node_id: &str, _question: &str, _choices: &[Choice]) -> InterviewReply {
            match self.0 {
                InterviewReplyKind::Key(k) => InterviewReply::Selected(k),
                InterviewReplyKind::Timeout => InterviewReply::Timeout,
                InterviewReplyKind::Skip => InterviewReply::Skip,
            }
        }
    }

    #[tokio::test]
    async fn wait_for_human_maps_selected_key_to_edge() {
        let mut graph = Graph { id: "g".into(), ..Default::default() };
        graph.edges.push(Edge { source: "n".into(), target: "approved".into(), label: Some("[A] Approve".into()), ..Default::default() });
        graph.edges.push(Edge { source: "n".into(), target: "rejected".into(), label: Some("[R] Reject".into()), ..Default::default() });
        let node = Node { id: "n".into(), ..Default::default() };
        let context = Context::new();
        let dir = tempfile::tempdir().unwrap();

        let handler = WaitForHumanHandler::new(Arc::new(FixedInterviewer(InterviewReplyKind::Key('A'))));
        let outcome = handler.execute(&node, &context, &graph, dir.path()).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.suggested_next_ids, vec!["approved".to_string()]);
    }

    #[tokio::test]
    async fn wait_for_human_timeout_without_default_retries() {
        let graph = Graph { id: "g".into(), ..Default::default() };
        let node = Node { id: "n".into(), ..Default::default() };
        let context = Context::new();
        let dir = tempfile::tempdir().unwrap();
        let handler = WaitForHumanHandler::new(Arc::new(FixedInterviewer(InterviewReplyKind::Timeout)));
        let outcome = handler.execute(&node, &context, &graph, dir.path()).await;
        assert_eq!(outcome.status, OutcomeStatus::Retry);
    }

    #[tokio::test]
    async fn wait_for_human_skip_fails() {
        let graph = Graph { id: "g".into(), ..Default::default() };
        let node = Node { id: "n".into(), ..Default::default() };
        let context = Context::new();
        let dir = tempfile::tempdir().unwrap();
        let handler = WaitForHumanHandler::new(Arc::new(FixedInterviewer(InterviewReplyKind::Skip)));
        let outcome = handler.execute(&node, &context, &graph, dir.path()).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }

    struct AlwaysFailBranch;

    #[async_trait]
    impl BranchExecutor for AlwaysFailBranch {
        async fn run_branch(&self, _edge: &Edge, _context: &Context) -> Outcome {
            Outcome::fail("branch failed")
        }
    }

    #[tokio::test]
    async fn parallel_wait_all_fails_when_every_branch_fails() {
        let mut graph = Graph { id: "g".into(), ..Default::default() };
        graph.edges.push(Edge { source: "n".into(), target: "b1".into(), ..Default::default() });
        graph.edges.push(Edge { source: "n".into(), target: "b2".into(), ..Default::default() });
        let node = Node { id: "n".into(), ..Default::default() };
        let context = Context::new();
        let dir = tempfile::tempdir().unwrap();
        let handler = ParallelHandler::new(Some(Arc::new(AlwaysFailBranch)));
        let outcome = handler.execute(&node, &context, &graph, dir.path()).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }

    #[tokio::test]
    async fn parallel_without_executor_simulates_success() {
        let mut graph = Graph { id: "g".into(), ..Default::default() };
        graph.edges.push(Edge { source: "n".into(), target: "b1".into(), ..Default::default() });
        let node = Node { id: "n".into(), ..Default::default() };
        let context = Context::new();
        let dir = tempfile::tempdir().unwrap();
        let handler = ParallelHandler::new(None);
        let outcome = handler.execute(&node, &context, &graph, dir.path()).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.context_updates.get("parallel.branch_count").unwrap(), 1);
    }

    #[tokio::test]
    async fn fan_in_ranks_by_outcome_then_score_then_id() {
        let mut context = Context::new();
        let results = vec![
            BranchResult { id: "b".into(), outcome: OutcomeStatus::Success, notes: None, score: 1.0 },
            BranchResult { id: "a".into(), outcome: OutcomeStatus::Success, notes: None, score: 2.0 },
        ];
        context.set("parallel.results", serde_json::to_value(&results).unwrap());
        let graph = Graph::default();
        let node = Node::default();
        let dir = tempfile::tempdir().unwrap();
        let outcome = FanInHandler.execute(&node, &context, &graph, dir.path()).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.context_updates.get("parallel.fan_in.best_id").unwrap(), "a");
    }

    #[tokio::test]
    async fn fan_in_fails_when_all_branches_failed() {
        let mut context = Context::new();
        let results = vec![BranchResult { id: "a".into(), outcome: OutcomeStatus::Fail, notes: None, score: 0.0 }];
        context.set("parallel.results", serde_json::to_value(&results).unwrap());
        let graph = Graph::default();
        let node = Node::default();
        let dir = tempfile::tempdir().unwrap();
        let outcome = FanInHandler.execute(&node, &context, &graph, dir.path()).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }

    #[tokio::test]
    async fn tool_handler_reports_missing_callable_as_failure() {
        let handler = ToolHandler::new(HashMap::new());
        let node = Node { id: "missing".into(), ..Default::default() };
        let context = Context::new();
        let graph = Graph::default();
        let dir = tempfile::tempdir().unwrap();
        let outcome = handler.execute(&node, &context, &graph, dir.path()).await;
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }

    #[tokio::test]
    async fn coding_agent_handler_reports_final_assistant_text() {
        use core::message::{Message, Role};
        use core::response::{FinishDetail, Response};
        use core::providers::stub::Scripted;
        use protocol::FinishReason;

        let stub = Arc::new(StubAdapter::new());
        stub.push(Scripted::Complete(Response {
            id: "r1".into(),
            model: "stub".into(),
            provider: "stub".into(),
            message: Message::text(Role::Assistant, "done with the task"),
            finish_reason: FinishDetail { reason: FinishReason::Stop, raw: None },
            usage: Default::default(),
            warnings: Vec::new(),
            raw: None,
        }));
        let client = Arc::new(Client::new(stub));
        let registry = Arc::new(ToolRegistry::new());
        let env = Arc::new(MemoryExecutionEnvironment::new());
        let handler = CodingAgentHandler::new(client, registry, env, SessionConfig { model: "stub".into(), ..Default::default() });

        let node = Node { id: "n".into(), prompt: Some("do the thing".into()), ..Default::default() };
        let context = Context::new();
        let graph = Graph::default();
        let dir = tempfile::tempdir().unwrap();
        let outcome = handler.execute(&node, &context, &graph, dir.path()).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.context_updates.get("last_response").unwrap(), "done with the task");
    }
}
