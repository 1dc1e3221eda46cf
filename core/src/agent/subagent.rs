//! Child-session orchestration: a parent session spawns bounded-depth sub-agents sharing its
//! execution environment, waits for their final answer, and can steer or abort them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use protocol::agent_event::AgentEventKind;

use crate::client::Client;
use crate::tools::{AgentSpawner, ExecutionEnvironment, ToolError, ToolRegistry};

use super::error::AgentError;
use super::session::{AgentSession, SessionConfig, SessionState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubAgentStatus {
    Running,
    Completed,
    Failed,
}

/// A spawned child: its session, a background join handle driving `process_input` to
/// completion, and the last assistant text seen (the eventual `wait()` output).
pub struct SubAgentHandle {
    session: Arc<AgentSession>,
    join: Mutex<Option<JoinHandle<()>>>,
    status: Mutex<SubAgentStatus>,
    last_text: Mutex<String>,
}

/// Owns every child spawned from one parent session, enforcing `max_subagent_depth` and
/// cascading `abort()` from the parent down to all still-running children.
pub struct SubAgentManager {
    client: Arc<Client>,
    registry: Arc<ToolRegistry>,
    env: Arc<dyn ExecutionEnvironment>,
    parent_config: SessionConfig,
    current_depth: u32,
    max_subagent_depth: u32,
    children: Mutex<HashMap<String, Arc<SubAgentHandle>>>,
    next_id: Mutex<u64>,
}

impl SubAgentManager {
    pub fn new(
        client: Arc<Client>,
        registry: Arc<ToolRegistry>,
        env: Arc<dyn ExecutionEnvironment>,
        parent_config: SessionConfig,
        current_depth: u32,
        max_subagent_depth: u32,
    ) -> Self {
        Self {
            client,
            registry,
            env,
            parent_config,
            current_depth,
            max_subagent_depth,
            children: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        }
    }

    async fn allocate_id(&self) -> String {
        let mut next = self.next_id.lock().await;
        let id = format!("agent_{}", *next);
        *next += 1;
        id
    }

    pub async fn spawn(&self, task: String, max_turns: Option<u32>) -> Result<String, AgentError> {
        if self.current_depth >= self.max_subagent_depth {
            return Err(AgentError::SubagentDepthExceeded);
        }

        let mut child_config = self.parent_config.clone();
        if let Some(max_turns) = max_turns {
            child_config.max_turns = max_turns;
        }

        let (session, mut events) = AgentSession::new(
            self.client.clone(),
            self.registry.clone(),
            self.env.clone(),
            child_config,
        );
        let session = Arc::new(session);
        let handle = Arc::new(SubAgentHandle {
            session: session.clone(),
            join: Mutex::new(None),
            status: Mutex::new(SubAgentStatus::Running),
            last_text: Mutex::new(String::new()),
        });

        let id = self.allocate_id().await;
        self.children.lock().await.insert(id.clone(), handle.clone());

        let handle_for_events = handle.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.kind == AgentEventKind::AssistantTextEnd {
                    if let Some(text) = event.data.as_ref().and_then(|d| d.get("text")).and_then(|v| v.as_str()) {
                        if !text.is_empty() {
                            *handle_for_events.last_text.lock().await = text.to_string();
                        }
                    }
                }
            }
        });

        let handle_for_join = handle.clone();
        let join = tokio::spawn(async move {
            handle_for_join.session.process_input(task).await;
            let final_state = handle_for_join.session.state().await;
            let mut status = handle_for_join.status.lock().await;
            *status = if final_state == SessionState::Closed && handle_for_join.last_text.lock().await.is_empty() {
                SubAgentStatus::Failed
            } else {
                SubAgentStatus::Completed
            };
        });
        *handle.join.lock().await = Some(join);

        Ok(id)
    }

    /// Awaits the child's completion and returns `{output, success, turns_used}`.
    pub async fn wait(&self, agent_id: &str) -> Result<(String, bool, u32), AgentError> {
        let handle = self
            .children
            .lock()
            .await
            .get(agent_id)
            .cloned()
            .ok_or_else(|| AgentError::UnknownAgent(agent_id.to_string()))?;

        let join = handle.join.lock().await.take();
        if let Some(join) = join {
            let _ = join.await;
        }

        let output = handle.last_text.lock().await.clone();
        let success = *handle.status.lock().await == SubAgentStatus::Completed;
        let turns_used = handle.session.turns_used().await;
        Ok((output, success, turns_used))
    }

    pub async fn send_input(&self, agent_id: &str, msg: impl Into<String>) -> Result<(), AgentError> {
        let handle = self
            .children
            .lock()
            .await
            .get(agent_id)
            .cloned()
            .ok_or_else(|| AgentError::UnknownAgent(agent_id.to_string()))?;
        handle.session.follow_up(msg).await;
        Ok(())
    }

    pub async fn close(&self, agent_id: &str) -> Result<(), AgentError> {
        let handle = self
            .children
            .lock()
            .await
            .remove(agent_id)
            .ok_or_else(|| AgentError::UnknownAgent(agent_id.to_string()))?;
        handle.session.abort().await;
        if let Some(join) = handle.join.lock().await.take() {
            join.abort();
        }
        Ok(())
    }

    /// Cascades `abort()` to every still-running child. Called before the parent session's own
    /// `close()` returns, per the resolved parent-abort-cascade behavior.
    pub async fn abort_all(&self) {
        let children: Vec<Arc<SubAgentHandle>> = self.children.lock().await.values().cloned().collect();
        for child in children {
            child.session.abort().await;
        }
    }
}

fn as_tool_error(err: AgentError) -> ToolError {
    ToolError::Execution(err.to_string())
}

#[async_trait]
impl AgentSpawner for SubAgentManager {
    async fn spawn(&self, task: String, max_turns: Option<u32>) -> Result<String, ToolError> {
        SubAgentManager::spawn(self, task, max_turns).await.map_err(as_tool_error)
    }

    async fn wait(&self, agent_id: &str) -> Result<String, ToolError> {
        let (output, _success, _turns_used) = SubAgentManager::wait(self, agent_id).await.map_err(as_tool_error)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Role};
    use crate::providers::stub::{Scripted, StubAdapter};
    use crate::response::{FinishDetail, Response};
    use crate::tools::exec_env::MemoryExecutionEnvironment;
    use protocol::FinishReason;

    fn text_response(id: &str, text: &str) -> Response {
        Response {
            id: id.into(),
            model: "stub".into(),
            provider: "stub".into(),
            message: Message::text(Role::Assistant, text),
            finish_reason: FinishDetail { reason: FinishReason::Stop, raw: None },
            usage: Default::default(),
            warnings: Vec::new(),
            raw: None,
        }
    }

    fn make_manager(stub: Arc<StubAdapter>, depth: u32, max_depth: u32) -> SubAgentManager {
        let client = Arc::new(Client::new(stub));
        let registry = Arc::new(ToolRegistry::new());
        let env = Arc::new(MemoryExecutionEnvironment::new());
        SubAgentManager::new(client, registry, env, SessionConfig { model: "stub".into(), ..Default::default() }, depth, max_depth)
    }

    #[tokio::test]
    async fn spawn_beyond_max_depth_errors_with_maximum_depth() {
        let manager = make_manager(Arc::new(StubAdapter::new()), 2, 2);
        let err = manager.spawn("do something".into(), None).await.unwrap_err();
        assert!(matches!(err, AgentError::SubagentDepthExceeded));
    }

    #[tokio::test]
    async fn spawn_then_wait_returns_final_assistant_text() {
        let stub = Arc::new(StubAdapter::new());
        stub.push(Scripted::Complete(text_response("r1", "child done")));
        let manager = make_manager(stub, 0, 2);

        let id = manager.spawn("do something".into(), None).await.unwrap();
        let (output, success, _turns) = manager.wait(&id).await.unwrap();
        assert_eq!(output, "child done");
        assert!(success);
    }

    #[tokio::test]
    async fn wait_on_unknown_agent_errors_unknown_agent() {
        let manager = make_manager(Arc::new(StubAdapter::new()), 0, 2);
        let err = manager.wait("not_real").await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownAgent(ref id) if id == "not_real"));
    }

    #[tokio::test]
    async fn abort_all_marks_running_children_closed() {
        let stub = Arc::new(StubAdapter::new());
        // No scripted reply queued: the child's first `complete()` call errors immediately and
        // the session closes, which is fine for this test — we only assert abort_all runs without
        // panicking over the child map.
        let manager = make_manager(stub, 0, 2);
        let _id = manager.spawn("do something".into(), None).await.unwrap();
        manager.abort_all().await;
    }
}
