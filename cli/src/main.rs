//! `agentmesh`: chat with an agent or run a pipeline graph from the command line.

mod logging;

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use core::agent::{AgentSession, SessionConfig};
use core::client::Client;
use core::tools::exec_env::LocalExecutionEnvironment;
use core::tools::builtin::{ApplyPatchTool, EditFileTool, GlobTool, GrepTool, ReadFileTool, ShellTool, WriteFileTool};
use core::tools::ToolRegistry;
use pipeline::handlers::builtin::{
    CodergenHandler, ConditionalHandler, ExitHandler, FanInHandler, ParallelHandler, StartHandler, ToolHandler,
    WaitForHumanHandler,
};
use pipeline::handlers::{Choice, InterviewReply, Interviewer};
use pipeline::{Graph, HandlerRegistry, PipelineEngine};
use protocol::agent_event::AgentEventKind;

const APP_NAME: &str = "agentmesh";

#[derive(Parser)]
#[command(name = "agentmesh", about = "Chat with an agent or run a pipeline graph")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Raise the default log level from warn to info.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Additionally mirror logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Send one message to an agent and print its reply.
    Chat {
        /// Provider adapter to use; defaults to whichever *_API_KEY env var is set.
        #[arg(long)]
        provider: Option<String>,

        /// Model name passed to the provider.
        #[arg(long, default_value = "")]
        model: String,

        /// Working directory the agent's file/shell tools operate in.
        #[arg(long, default_value = ".")]
        cwd: PathBuf,

        /// The message to send.
        message: Vec<String>,
    },

    /// Drive a pipeline graph to completion.
    Run {
        /// Path to the graph JSON file.
        #[arg(long)]
        graph: PathBuf,

        /// Directory for checkpoints, artifacts and per-stage codergen transcripts.
        #[arg(long, default_value = "./agentmesh-run")]
        logs_root: PathBuf,

        /// Resume from an existing checkpoint under logs_root, if one exists.
        #[arg(long)]
        resume: bool,
    },
}

/// Asks on stdin/stdout; used by the `run` subcommand's `WaitForHuman` nodes.
struct StdinInterviewer;

#[async_trait::async_trait]
impl Interviewer for StdinInterviewer {
    async fn ask(&self, node_id: &str, question: &str, choices: &[Choice]) -> InterviewReply {
        println!("[{node_id}] {question}");
        for choice in choices {
            println!("  ({}) {}", choice.key, choice.label);
        }
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return InterviewReply::Skip;
        }
        match_choice(line.trim(), choices)
    }
}

/// Resolves one line of interviewer input to a choice key, case-insensitively, by its first
/// character. Blank input or a character not among `choices` is a skip.
fn match_choice(input: &str, choices: &[Choice]) -> InterviewReply {
    match input.chars().next() {
        Some(c) => match choices.iter().map(|choice| choice.key).find(|k| k.eq_ignore_ascii_case(&c)) {
            Some(key) => InterviewReply::Selected(key),
            None => InterviewReply::Skip,
        },
        None => InterviewReply::Skip,
    }
}

fn build_tool_registry(truncation: config::TruncationDefaults) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ReadFileTool::new(truncation.clone())));
    registry.register(Arc::new(WriteFileTool::new(truncation.clone())));
    registry.register(Arc::new(EditFileTool::new(truncation.clone())));
    registry.register(Arc::new(ApplyPatchTool::new(truncation.clone())));
    registry.register(Arc::new(GrepTool::new(truncation.clone())));
    registry.register(Arc::new(GlobTool::new(truncation.clone())));
    registry.register(Arc::new(ShellTool::new(truncation)));
    registry
}

async fn run_chat(provider: Option<String>, model: String, cwd: PathBuf, message: Vec<String>) -> anyhow::Result<()> {
    let text = message.join(" ");
    if text.trim().is_empty() {
        anyhow::bail!("no message given");
    }

    let runtime_defaults = config::load_runtime_defaults(APP_NAME)?;
    let client = Arc::new(Client::from_env()?);
    let registry = Arc::new(build_tool_registry(runtime_defaults.truncation));
    let env = Arc::new(LocalExecutionEnvironment::new(cwd.clone()));

    let config = SessionConfig {
        model,
        provider,
        working_dir: cwd.display().to_string(),
        ..SessionConfig::default()
    };

    let (session, mut events) = AgentSession::new(client, registry, env, config);
    let session = Arc::new(session);

    let printer = tokio::spawn(async move {
        let mut final_text = String::new();
        while let Some(evt) = events.recv().await {
            match evt.kind {
                AgentEventKind::AssistantTextEnd => {
                    if let Some(text) = evt.data.as_ref().and_then(|d| d.get("text")).and_then(|v| v.as_str()) {
                        final_text = text.to_string();
                    }
                }
                AgentEventKind::ToolCallStart => {
                    if let Some(name) = evt.data.as_ref().and_then(|d| d.get("name")).and_then(|v| v.as_str()) {
                        info!(tool = name, "calling tool");
                    }
                }
                AgentEventKind::Error => {
                    if let Some(msg) = evt.data.as_ref().and_then(|d| d.get("message")).and_then(|v| v.as_str()) {
                        eprintln!("error: {msg}");
                    }
                }
                _ => {}
            }
        }
        final_text
    });

    session.process_input(text).await;
    drop(session);
    let final_text = printer.await?;
    println!("{final_text}");
    Ok(())
}

async fn run_pipeline(graph_path: PathBuf, logs_root: PathBuf, resume: bool) -> anyhow::Result<()> {
    let graph_json = std::fs::read_to_string(&graph_path)?;
    let graph: Graph = serde_json::from_str(&graph_json)?;

    let runtime_defaults = config::load_runtime_defaults(APP_NAME)?;

    let mut handlers = HandlerRegistry::new();
    handlers.register("start", Arc::new(StartHandler));
    handlers.register("exit", Arc::new(ExitHandler));
    handlers.register("conditional", Arc::new(ConditionalHandler));
    handlers.register("codergen", Arc::new(CodergenHandler::new(None)));
    handlers.register("wait.human", Arc::new(WaitForHumanHandler::new(Arc::new(StdinInterviewer))));
    handlers.register("parallel", Arc::new(ParallelHandler::new(None)));
    handlers.register("parallel.fan_in", Arc::new(FanInHandler));
    handlers.register("tool", Arc::new(ToolHandler::new(HashMap::new())));

    std::fs::create_dir_all(&logs_root)?;
    let (mut engine, mut events) = PipelineEngine::new(graph, handlers, logs_root, runtime_defaults);

    let printer = tokio::spawn(async move {
        while let Some(evt) = events.recv().await {
            println!("{}", serde_json::to_string(&evt).unwrap_or_default());
        }
    });

    let result = engine.run(resume).await;
    printer.await?;
    result.map_err(|e| e.into())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = logging::init(args.verbose, args.log_file.as_deref());

    config::load_and_apply(APP_NAME, None)?;

    match args.command {
        Command::Chat { provider, model, cwd, message } => run_chat(provider, model, cwd, message).await,
        Command::Run { graph, logs_root, resume } => run_pipeline(graph, logs_root, resume).await,
    }
}
