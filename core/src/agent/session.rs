//! The iterative agent loop: turn a user message into zero or more model calls, dispatching
//! tool calls in between, until the model answers without requesting one.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use protocol::agent_event::{AgentEvent, AgentEventKind};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use crate::client::Client;
use crate::message::{ContentPart, Message, Role, ToolResultContent};
use crate::request::{Request, ToolChoice};
use crate::request::ReasoningEffort;
use crate::tools::{ExecutionEnvironment, ToolRegistry};

/// Number of most recent tool calls inspected for repetition.
const LOOP_WINDOW: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Processing,
    AwaitingInput,
    Closed,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn event(kind: AgentEventKind) -> AgentEvent {
    AgentEvent::new(kind, now_ms())
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub model: String,
    pub provider: Option<String>,
    pub base_system_prompt: String,
    pub project_docs: Vec<String>,
    pub system_prompt_override: Option<String>,
    /// 0 means unlimited.
    pub max_rounds: u32,
    /// 0 means unlimited.
    pub max_turns: u32,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub provider_options: HashMap<String, Value>,
    pub working_dir: String,
    pub platform: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            provider: None,
            base_system_prompt: String::new(),
            project_docs: Vec::new(),
            system_prompt_override: None,
            max_rounds: 0,
            max_turns: 0,
            reasoning_effort: None,
            provider_options: HashMap::new(),
            working_dir: ".".to_string(),
            platform: std::env::consts::OS.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
struct ToolCallRequest {
    id: String,
    name: String,
    arguments: Value,
    raw_arguments: Option<String>,
}

#[derive(Clone, Debug)]
struct ToolResultEntry {
    tool_call_id: String,
    output: String,
    is_error: bool,
}

#[derive(Clone, Debug)]
enum Turn {
    User(String),
    Steering(String),
    Assistant { text: String, reasoning: Option<String>, tool_calls: Vec<ToolCallRequest> },
    ToolResults(Vec<ToolResultEntry>),
}

struct Inner {
    history: Vec<Turn>,
    steering_queue: VecDeque<String>,
    follow_up_queue: VecDeque<String>,
    abort_flag: bool,
    state: SessionState,
    recent_tool_calls: Vec<(String, Value)>,
    round_count: u32,
}

/// The iterative loop described by `processInput`: append the user turn, then alternate model
/// calls and tool dispatch until the model stops asking for tools, draining steering/follow-up
/// queues along the way.
pub struct AgentSession {
    client: Arc<Client>,
    registry: Arc<ToolRegistry>,
    env: Arc<dyn ExecutionEnvironment>,
    config: SessionConfig,
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<AgentEvent>,
}

impl AgentSession {
    pub fn new(
        client: Arc<Client>,
        registry: Arc<ToolRegistry>,
        env: Arc<dyn ExecutionEnvironment>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            client,
            registry,
            env,
            config,
            inner: Mutex::new(Inner {
                history: Vec::new(),
                steering_queue: VecDeque::new(),
                follow_up_queue: VecDeque::new(),
                abort_flag: false,
                state: SessionState::Idle,
                recent_tool_calls: Vec::new(),
                round_count: 0,
            }),
            events: tx,
        };
        (session, rx)
    }

    fn emit(&self, evt: AgentEvent) {
        let _ = self.events.send(evt);
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Count of user+assistant turns accumulated so far, the `turnsUsed` field `SubAgentManager`
    /// reports back from `wait()`.
    pub async fn turns_used(&self) -> u32 {
        Self::turn_count(&self.inner.lock().await.history)
    }

    /// Enqueues `msg` to be folded into history as a steering turn before the next model call.
    pub async fn steer(&self, msg: impl Into<String>) {
        self.inner.lock().await.steering_queue.push_back(msg.into());
    }

    /// Enqueues `msg` to be processed as a fresh `process_input` call once the current one
    /// completes.
    pub async fn follow_up(&self, msg: impl Into<String>) {
        self.inner.lock().await.follow_up_queue.push_back(msg.into());
    }

    /// Sets the abort flag; the loop checks it after every model call and tool dispatch round.
    pub async fn abort(&self) {
        let mut inner = self.inner.lock().await;
        inner.abort_flag = true;
        inner.state = SessionState::Closed;
    }

    fn build_system_prompt(&self) -> String {
        let mut parts = vec![self.config.base_system_prompt.clone()];
        parts.push(format!(
            "Environment: working_dir={} platform={} model={}",
            self.config.working_dir, self.config.platform, self.config.model
        ));
        parts.extend(self.config.project_docs.iter().cloned());
        if let Some(override_prompt) = &self.config.system_prompt_override {
            parts.push(override_prompt.clone());
        }
        parts.into_iter().filter(|p| !p.is_empty()).collect::<Vec<_>>().join("\n\n")
    }

    fn materialize_messages(&self, system_prompt: &str, history: &[Turn]) -> Vec<Message> {
        let mut messages = vec![Message::system(system_prompt)];
        for turn in history {
            match turn {
                Turn::User(text) => messages.push(Message::user(text.clone())),
                Turn::Steering(text) => messages.push(Message::user(text.clone())),
                Turn::Assistant { text, reasoning, tool_calls } => {
                    let mut content = Vec::new();
                    if let Some(reasoning) = reasoning {
                        content.push(ContentPart::Thinking { text: reasoning.clone(), redacted: false });
                    }
                    if !text.is_empty() {
                        content.push(ContentPart::Text { text: text.clone() });
                    }
                    for call in tool_calls {
                        content.push(ContentPart::ToolCall {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                            raw_arguments: call.raw_arguments.clone(),
                        });
                    }
                    messages.push(Message { role: Role::Assistant, content });
                }
                Turn::ToolResults(results) => {
                    for result in results {
                        messages.push(Message {
                            role: Role::Tool,
                            content: vec![ContentPart::ToolResult {
                                tool_call_id: result.tool_call_id.clone(),
                                content: ToolResultContent::Text(result.output.clone()),
                                is_error: result.is_error,
                            }],
                        });
                    }
                }
            }
        }
        messages
    }

    fn turn_count(history: &[Turn]) -> u32 {
        history.iter().filter(|t| matches!(t, Turn::User(_) | Turn::Assistant { .. })).count() as u32
    }

    fn detect_loop(recent: &[(String, Value)]) -> bool {
        if recent.len() < LOOP_WINDOW {
            return false;
        }
        let window = &recent[recent.len() - LOOP_WINDOW..];
        for period in 1..=3usize {
            if LOOP_WINDOW % period != 0 {
                continue;
            }
            if (0..LOOP_WINDOW).all(|i| window[i] == window[i % period]) {
                return true;
            }
        }
        false
    }

    async fn drain_steering(&self) {
        let mut msgs = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            while let Some(msg) = inner.steering_queue.pop_front() {
                msgs.push(msg);
            }
        }
        for msg in msgs {
            self.emit(event(AgentEventKind::SteeringInjected).with_data(json!({"text": msg})));
            self.inner.lock().await.history.push(Turn::Steering(msg));
        }
    }

    /// Runs the loop for one user message to natural completion (or a limit), then drains the
    /// follow-up queue recursively.
    pub async fn process_input(&self, text: impl Into<String>) {
        let text = text.into();
        self.emit(event(AgentEventKind::UserInput).with_data(json!({"text": text})));
        {
            let mut inner = self.inner.lock().await;
            inner.history.push(Turn::User(text));
            inner.state = SessionState::Processing;
        }
        self.drain_steering().await;

        loop {
            let (round, turns, aborted) = {
                let inner = self.inner.lock().await;
                (inner.round_count, Self::turn_count(&inner.history), inner.abort_flag)
            };
            let round_limited = self.config.max_rounds > 0 && round >= self.config.max_rounds;
            let turn_limited = self.config.max_turns > 0 && turns >= self.config.max_turns;
            if round_limited || turn_limited || aborted {
                self.emit(event(AgentEventKind::TurnLimit));
                break;
            }

            let system_prompt = self.build_system_prompt();
            let messages = {
                let inner = self.inner.lock().await;
                self.materialize_messages(&system_prompt, &inner.history)
            };

            let mut request = Request::new(self.config.model.clone(), messages);
            request.provider = self.config.provider.clone();
            request.tools = self.registry.definitions();
            if !request.tools.is_empty() {
                request.tool_choice = Some(ToolChoice::auto());
            }
            request.reasoning_effort = self.config.reasoning_effort;
            request.provider_options = self.config.provider_options.clone();

            let response = match self.client.complete(request).await {
                Ok(r) => r,
                Err(err) => {
                    self.emit(event(AgentEventKind::Error).with_data(json!({"message": err.message.clone()})));
                    let mut inner = self.inner.lock().await;
                    inner.state = SessionState::Closed;
                    return;
                }
            };

            let mut text_out = String::new();
            let mut reasoning_out: Option<String> = None;
            let mut tool_calls = Vec::new();
            for part in &response.message.content {
                match part {
                    ContentPart::Text { text } => text_out.push_str(text),
                    ContentPart::Thinking { text, .. } => {
                        reasoning_out.get_or_insert_with(String::new).push_str(text);
                    }
                    ContentPart::ToolCall { id, name, arguments, raw_arguments } => {
                        tool_calls.push(ToolCallRequest {
                            id: id.clone(),
                            name: name.clone(),
                            arguments: arguments.clone(),
                            raw_arguments: raw_arguments.clone(),
                        });
                    }
                    _ => {}
                }
            }

            self.emit(event(AgentEventKind::AssistantTextStart));
            self.emit(event(AgentEventKind::AssistantTextEnd).with_data(json!({"text": text_out.clone()})));
            {
                let mut inner = self.inner.lock().await;
                inner.history.push(Turn::Assistant {
                    text: text_out,
                    reasoning: reasoning_out,
                    tool_calls: tool_calls.clone(),
                });
            }

            if tool_calls.is_empty() {
                break;
            }

            {
                let mut inner = self.inner.lock().await;
                inner.round_count += 1;
            }

            let parallel = self.client.supports_parallel_tool_calls() && tool_calls.len() >= 2;
            let results = if parallel {
                let futures = tool_calls.iter().map(|call| self.dispatch_tool_call(call));
                futures::future::join_all(futures).await
            } else {
                let mut out = Vec::with_capacity(tool_calls.len());
                for call in &tool_calls {
                    out.push(self.dispatch_tool_call(call).await);
                }
                out
            };

            {
                let mut inner = self.inner.lock().await;
                for (call, (_, _)) in tool_calls.iter().zip(results.iter()) {
                    inner.recent_tool_calls.push((call.name.clone(), call.arguments.clone()));
                }
                inner.history.push(Turn::ToolResults(
                    tool_calls
                        .iter()
                        .zip(results.into_iter())
                        .map(|(call, (output, is_error))| ToolResultEntry {
                            tool_call_id: call.id.clone(),
                            output,
                            is_error,
                        })
                        .collect(),
                ));
            }

            self.drain_steering().await;

            let loop_detected = {
                let inner = self.inner.lock().await;
                Self::detect_loop(&inner.recent_tool_calls)
            };
            if loop_detected {
                self.emit(event(AgentEventKind::LoopDetection));
                self.inner.lock().await.history.push(Turn::Steering(
                    "Loop detected: the last several tool calls repeat a fixed cycle. Stop and reconsider the approach."
                        .to_string(),
                ));
            }
        }

        let next = self.inner.lock().await.follow_up_queue.pop_front();
        if let Some(next_input) = next {
            return Box::pin(self.process_input(next_input)).await;
        }

        let mut inner = self.inner.lock().await;
        if !inner.abort_flag {
            inner.state = SessionState::Idle;
            drop(inner);
            self.emit(event(AgentEventKind::SessionEnd));
        }
    }

    /// Calls the named tool, truncating its output before it re-enters history but emitting the
    /// full output in the `TOOL_CALL_END` event.
    async fn dispatch_tool_call(&self, call: &ToolCallRequest) -> (String, bool) {
        self.emit(event(AgentEventKind::ToolCallStart).with_data(json!({
            "id": call.id,
            "name": call.name,
            "arguments": call.arguments,
        })));
        let result = self.registry.call(&call.name, call.arguments.clone(), self.env.as_ref()).await;
        let (full_output, is_error) = match result {
            Ok(output) => (output, false),
            Err(err) => (err.as_result_string(), true),
        };
        self.emit(event(AgentEventKind::ToolCallEnd).with_data(json!({
            "id": call.id,
            "name": call.name,
            "output": full_output,
            "is_error": is_error,
        })));
        (full_output, is_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role as MsgRole;
    use crate::providers::stub::{Scripted, StubAdapter};
    use crate::response::FinishDetail;
    use crate::response::Response;
    use crate::tools::exec_env::MemoryExecutionEnvironment;
    use crate::tools::r#trait::Tool;
    use crate::request::ToolDefinition;
    use async_trait::async_trait;
    use protocol::FinishReason;

    fn text_response(id: &str, text: &str) -> Response {
        Response {
            id: id.into(),
            model: "stub".into(),
            provider: "stub".into(),
            message: Message::text(MsgRole::Assistant, text),
            finish_reason: FinishDetail { reason: FinishReason::Stop, raw: None },
            usage: Default::default(),
            warnings: Vec::new(),
            raw: None,
        }
    }

    fn tool_call_response(id: &str, call_id: &str, name: &str, args: Value) -> Response {
        Response {
            id: id.into(),
            model: "stub".into(),
            provider: "stub".into(),
            message: Message {
                role: MsgRole::Assistant,
                content: vec![ContentPart::ToolCall { id: call_id.into(), name: name.into(), arguments: args, raw_arguments: None }],
            },
            finish_reason: FinishDetail { reason: FinishReason::ToolCalls, raw: None },
            usage: Default::default(),
            warnings: Vec::new(),
            raw: None,
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition { name: "echo".into(), description: "echoes".into(), parameters: serde_json::json!({}) }
        }

        async fn call(&self, args: Value, _env: &dyn ExecutionEnvironment) -> Result<String, crate::tools::ToolError> {
            Ok(args.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string())
        }
    }

    #[tokio::test]
    async fn natural_completion_without_tool_calls_ends_session() {
        let stub = Arc::new(StubAdapter::new());
        stub.push(Scripted::Complete(text_response("r1", "hello there")));
        let client = Arc::new(Client::new(stub));
        let registry = Arc::new(ToolRegistry::new());
        let env = Arc::new(MemoryExecutionEnvironment::new());
        let (session, mut rx) = AgentSession::new(client, registry, env, SessionConfig { model: "stub".into(), ..Default::default() });

        session.process_input("hi").await;

        let mut saw_end = false;
        while let Ok(evt) = rx.try_recv() {
            if evt.kind == AgentEventKind::SessionEnd {
                saw_end = true;
            }
        }
        assert!(saw_end);
        assert_eq!(session.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn tool_call_then_final_text_dispatches_and_completes() {
        let stub = Arc::new(StubAdapter::new());
        stub.push(Scripted::Complete(tool_call_response("r1", "call_1", "echo", serde_json::json!({"text": "hi"}))));
        stub.push(Scripted::Complete(text_response("r2", "done")));
        let client = Arc::new(Client::new(stub));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let registry = Arc::new(registry);
        let env = Arc::new(MemoryExecutionEnvironment::new());
        let (session, mut rx) = AgentSession::new(client, registry, env, SessionConfig { model: "stub".into(), ..Default::default() });

        session.process_input("please echo hi").await;

        let mut tool_end_output = None;
        while let Ok(evt) = rx.try_recv() {
            if evt.kind == AgentEventKind::ToolCallEnd {
                tool_end_output = evt.data.as_ref().and_then(|d| d.get("output")).and_then(|v| v.as_str()).map(String::from);
            }
        }
        assert_eq!(tool_end_output, Some("hi".to_string()));
    }

    #[tokio::test]
    async fn unknown_tool_call_reports_unknown_tool_result() {
        let stub = Arc::new(StubAdapter::new());
        stub.push(Scripted::Complete(tool_call_response("r1", "call_1", "missing_tool", serde_json::json!({}))));
        stub.push(Scripted::Complete(text_response("r2", "done")));
        let client = Arc::new(Client::new(stub));
        let registry = Arc::new(ToolRegistry::new());
        let env = Arc::new(MemoryExecutionEnvironment::new());
        let (session, mut rx) = AgentSession::new(client, registry, env, SessionConfig { model: "stub".into(), ..Default::default() });

        session.process_input("call a missing tool").await;

        let mut saw_unknown = false;
        while let Ok(evt) = rx.try_recv() {
            if evt.kind == AgentEventKind::ToolCallEnd {
                if let Some(data) = &evt.data {
                    let is_error = data.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false);
                    let output = data.get("output").and_then(|v| v.as_str()).unwrap_or("");
                    if is_error && output.contains("Unknown tool") {
                        saw_unknown = true;
                    }
                }
            }
        }
        assert!(saw_unknown);
    }

    #[tokio::test]
    async fn max_turns_of_one_stops_before_any_model_call_completes() {
        let stub = Arc::new(StubAdapter::new());
        let client = Arc::new(Client::new(stub));
        let registry = Arc::new(ToolRegistry::new());
        let env = Arc::new(MemoryExecutionEnvironment::new());
        let (session, mut rx) =
            AgentSession::new(client, registry, env, SessionConfig { model: "stub".into(), max_turns: 1, ..Default::default() });

        session.process_input("hi").await;

        let mut saw_turn_limit = false;
        while let Ok(evt) = rx.try_recv() {
            if evt.kind == AgentEventKind::TurnLimit {
                saw_turn_limit = true;
            }
        }
        assert!(saw_turn_limit);
    }

    #[test]
    fn detect_loop_flags_period_one_repetition() {
        let calls: Vec<(String, Value)> = (0..LOOP_WINDOW).map(|_| ("same".to_string(), serde_json::json!({}))).collect();
        assert!(AgentSession::detect_loop(&calls));
    }

    #[test]
    fn detect_loop_requires_full_window() {
        let calls: Vec<(String, Value)> = (0..LOOP_WINDOW - 1).map(|_| ("same".to_string(), serde_json::json!({}))).collect();
        assert!(!AgentSession::detect_loop(&calls));
    }

    #[test]
    fn detect_loop_ignores_non_periodic_calls() {
        let calls: Vec<(String, Value)> =
            (0..LOOP_WINDOW).map(|i| (format!("tool_{i}"), serde_json::json!({}))).collect();
        assert!(!AgentSession::detect_loop(&calls));
    }
}
