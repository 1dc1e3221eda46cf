//! Built-in tools the agent session registers by default: file read/write/edit, a patch
//! applier, a shell runner, grep/glob search, and sub-agent spawning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use config::TruncationDefaults;
use serde_json::{json, Value};

use crate::request::ToolDefinition;

use super::exec_env::ExecutionEnvironment;
use super::r#trait::Tool;
use super::truncation::truncate;
use super::ToolError;

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing {key}")))
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

pub const TOOL_READ_FILE: &str = "read_file";
const DEFAULT_READ_LIMIT: usize = 2_000;

pub struct ReadFileTool {
    truncation: TruncationDefaults,
}

impl ReadFileTool {
    pub fn new(truncation: TruncationDefaults) -> Self {
        Self { truncation }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        TOOL_READ_FILE
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_READ_FILE.into(),
            description: "Read a file's content. Path relative to the working folder. Output is \
                line-numbered (`NNN | content`). Optional offset (0-based line) and limit (default 2000)."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path relative to working folder."},
                    "offset": {"type": "integer", "minimum": 0, "description": "0-based line number to start reading from."},
                    "limit": {"type": "integer", "minimum": 1, "default": DEFAULT_READ_LIMIT, "description": "Max lines to read."}
                },
                "required": ["path"]
            }),
        }
    }

    async fn call(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String, ToolError> {
        let path = require_str(&args, "path")?;
        let offset = args.get("offset").and_then(|v| v.as_u64()).map(|n| n as usize);
        let limit = args.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize).or(Some(DEFAULT_READ_LIMIT));
        let content = env.read_file(path, offset, limit).await?;
        Ok(truncate(&content, &self.truncation.read_file))
    }
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

pub const TOOL_WRITE_FILE: &str = "write_file";

pub struct WriteFileTool {
    truncation: TruncationDefaults,
}

impl WriteFileTool {
    pub fn new(truncation: TruncationDefaults) -> Self {
        Self { truncation }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        TOOL_WRITE_FILE
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_WRITE_FILE.into(),
            description: "Write content to a file under the working folder, overwriting it and \
                creating parent directories as needed. Prefer editing existing files over creating new ones."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path relative to working folder."},
                    "content": {"type": "string", "description": "Full file content to write."}
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn call(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String, ToolError> {
        let path = require_str(&args, "path")?;
        let content = require_str(&args, "content")?;
        env.write_file(path, content).await?;
        Ok(truncate(&format!("Wrote {path}"), &self.truncation.write_file))
    }
}

// ---------------------------------------------------------------------------
// edit_file — exact string replacement with a cascade of fuzzy matching strategies
// ---------------------------------------------------------------------------

pub const TOOL_EDIT_FILE: &str = "edit_file";

pub struct EditFileTool {
    truncation: TruncationDefaults,
}

impl EditFileTool {
    pub fn new(truncation: TruncationDefaults) -> Self {
        Self { truncation }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        TOOL_EDIT_FILE
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_EDIT_FILE.into(),
            description: "Performs an exact string replacement in a file under the working \
                folder. You must read the file first. Fails if old_string is not found, or is \
                found more than once and replace_all is not set."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path relative to working folder."},
                    "old_string": {"type": "string", "description": "The text to replace."},
                    "new_string": {"type": "string", "description": "The replacement text (must differ from old_string)."},
                    "replace_all": {"type": "boolean", "default": false, "description": "Replace every occurrence."}
                },
                "required": ["path", "old_string", "new_string"]
            }),
        }
    }

    async fn call(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String, ToolError> {
        let path = require_str(&args, "path")?;
        let old_string = require_str(&args, "old_string")?;
        let new_string = require_str(&args, "new_string")?;
        let replace_all = args.get("replace_all").and_then(|v| v.as_bool()).unwrap_or(false);

        if old_string == new_string {
            return Err(ToolError::InvalidArguments("old_string and new_string must differ".into()));
        }

        if old_string.is_empty() {
            env.write_file(path, new_string).await?;
            return Ok(truncate("Edit applied successfully.", &self.truncation.edit_file));
        }

        let content = env.read_file_raw(path).await?;
        let new_content = replace(&content, old_string, new_string, replace_all).map_err(ToolError::InvalidArguments)?;
        env.write_file(path, &new_content).await?;
        Ok(truncate("Edit applied successfully.", &self.truncation.edit_file))
    }
}

/// Replaces `old` with `new` in `content`, trying strategies in order of strictness: exact
/// substring, then per-line-trimmed, then whitespace-collapsed. Falls through to the next
/// strategy only when the current one finds no match; a strategy that finds more than one
/// match (and `replace_all` is false) is itself a hard error, matching the "ask for more
/// context" failure mode rather than silently picking one.
fn replace(content: &str, old: &str, new: &str, replace_all: bool) -> Result<String, String> {
    let strategies: &[fn(&str, &str) -> Vec<(usize, usize)>] = &[exact_matches, line_trimmed_matches, whitespace_normalized_matches];

    let mut any_strategy_matched = false;
    for strategy in strategies {
        let spans = strategy(content, old);
        if spans.is_empty() {
            continue;
        }
        any_strategy_matched = true;
        if replace_all {
            return Ok(replace_spans(content, &spans, new));
        }
        if spans.len() > 1 {
            continue; // maybe a stricter/looser strategy disambiguates; else falls through to the error below
        }
        return Ok(replace_spans(content, &spans[..1], new));
    }

    if any_strategy_matched {
        Err("old_string matched more than once; add context to disambiguate or set replace_all".to_string())
    } else {
        Err("old_string not found in file".to_string())
    }
}

fn replace_spans(content: &str, spans: &[(usize, usize)], new: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    for &(start, end) in spans {
        out.push_str(&content[cursor..start]);
        out.push_str(new);
        cursor = end;
    }
    out.push_str(&content[cursor..]);
    out
}

fn exact_matches(content: &str, find: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start = 0;
    while let Some(idx) = content[start..].find(find) {
        let s = start + idx;
        out.push((s, s + find.len()));
        start = s + find.len();
    }
    out
}

fn line_trimmed_matches(content: &str, find: &str) -> Vec<(usize, usize)> {
    let find_trimmed: Vec<&str> = find.lines().collect();
    if find_trimmed.is_empty() {
        return vec![];
    }
    let content_lines: Vec<&str> = content.split('\n').collect();
    if find_trimmed.len() > content_lines.len() {
        return vec![];
    }
    let mut out = Vec::new();
    for i in 0..=(content_lines.len() - find_trimmed.len()) {
        let matches = (0..find_trimmed.len()).all(|j| content_lines[i + j].trim() == find_trimmed[j].trim());
        if !matches {
            continue;
        }
        let start: usize = content_lines[..i].iter().map(|l| l.len() + 1).sum();
        let end = start
            + content_lines[i..i + find_trimmed.len()]
                .iter()
                .enumerate()
                .map(|(k, l)| l.len() + if k + 1 < find_trimmed.len() { 1 } else { 0 })
                .sum::<usize>();
        out.push((start, end));
    }
    out
}

fn whitespace_normalized_matches(content: &str, find: &str) -> Vec<(usize, usize)> {
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    let target = normalize(find);
    if target.is_empty() {
        return vec![];
    }
    let mut out = Vec::new();
    let mut cursor = 0usize;
    for line in content.split_inclusive('\n') {
        if normalize(line) == target {
            out.push((cursor, cursor + line.len()));
        }
        cursor += line.len();
    }
    out
}

// ---------------------------------------------------------------------------
// apply_patch — multi-file Add/Update/Delete/Move patches
// ---------------------------------------------------------------------------

pub const TOOL_APPLY_PATCH: &str = "apply_patch";

pub struct ApplyPatchTool {
    truncation: TruncationDefaults,
}

impl ApplyPatchTool {
    pub fn new(truncation: TruncationDefaults) -> Self {
        Self { truncation }
    }
}

enum Hunk {
    Add { path: String, contents: String },
    Delete { path: String },
    Update { path: String, move_to: Option<String>, chunks: Vec<(String, String)> },
}

fn parse_patch(text: &str) -> Result<Vec<Hunk>, String> {
    let body = text.trim();
    let start = body.find("*** Begin Patch").ok_or("missing *** Begin Patch")?;
    let end = body[start..].find("*** End Patch").ok_or("missing *** End Patch")?;
    let body = body[start + "*** Begin Patch".len()..start + end].trim();
    let lines: Vec<&str> = body.split('\n').collect();

    let mut hunks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        if let Some(path) = line.strip_prefix("*** Add File:") {
            let path = path.trim().to_string();
            i += 1;
            let mut contents = String::new();
            while i < lines.len() && !lines[i].trim_start().starts_with("***") {
                if let Some(body) = lines[i].strip_prefix('+') {
                    contents.push_str(body);
                    contents.push('\n');
                }
                i += 1;
            }
            contents.pop();
            hunks.push(Hunk::Add { path, contents });
        } else if let Some(path) = line.strip_prefix("*** Delete File:") {
            hunks.push(Hunk::Delete { path: path.trim().to_string() });
            i += 1;
        } else if let Some(path) = line.strip_prefix("*** Update File:") {
            let path = path.trim().to_string();
            i += 1;
            let mut move_to = None;
            if i < lines.len() {
                if let Some(dest) = lines[i].trim().strip_prefix("*** Move to:") {
                    move_to = Some(dest.trim().to_string());
                    i += 1;
                }
            }
            let mut chunks = Vec::new();
            while i < lines.len() && !lines[i].trim_start().starts_with("***") {
                if lines[i].trim_start().starts_with("@@") {
                    i += 1;
                    let mut old_lines = Vec::new();
                    let mut new_lines = Vec::new();
                    while i < lines.len() && !lines[i].trim_start().starts_with("@@") && !lines[i].trim_start().starts_with("***") {
                        let l = lines[i];
                        if l.starts_with(' ') {
                            old_lines.push(l[1..].to_string());
                            new_lines.push(l[1..].to_string());
                        } else if let Some(body) = l.strip_prefix('-') {
                            old_lines.push(body.to_string());
                        } else if let Some(body) = l.strip_prefix('+') {
                            new_lines.push(body.to_string());
                        }
                        i += 1;
                    }
                    chunks.push((old_lines.join("\n"), new_lines.join("\n")));
                } else {
                    i += 1;
                }
            }
            hunks.push(Hunk::Update { path, move_to, chunks });
        } else {
            i += 1;
        }
    }
    Ok(hunks)
}

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &str {
        TOOL_APPLY_PATCH
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_APPLY_PATCH.into(),
            description: "Apply a multi-file patch. Format: *** Begin Patch / *** End Patch \
                wrapping any number of *** Add File: <path> (+ lines), *** Delete File: <path>, \
                or *** Update File: <path> (optional *** Move to: <path>) with @@ hunks using \
                leading space/-/+ per line."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {"patch": {"type": "string", "description": "Full patch text."}},
                "required": ["patch"]
            }),
        }
    }

    async fn call(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String, ToolError> {
        let patch = require_str(&args, "patch")?;
        let hunks = parse_patch(patch).map_err(ToolError::InvalidArguments)?;
        if hunks.is_empty() {
            return Err(ToolError::InvalidArguments("patch has no hunks or invalid format".into()));
        }

        let mut applied = 0usize;
        for hunk in hunks {
            match hunk {
                Hunk::Add { path, contents } => {
                    env.write_file(&path, &contents).await?;
                    applied += 1;
                }
                Hunk::Delete { path } => {
                    env.remove_path(&path).await?;
                    applied += 1;
                }
                Hunk::Update { path, move_to, chunks } => {
                    let mut content = env.read_file_raw(&path).await?;
                    for (old, new) in chunks {
                        if old.is_empty() {
                            if !new.is_empty() {
                                content.push('\n');
                                content.push_str(&new);
                            }
                        } else {
                            content = replace(&content, &old, &new, false).map_err(ToolError::InvalidArguments)?;
                        }
                    }
                    env.write_file(&path, &content).await?;
                    if let Some(dest) = move_to {
                        env.rename(&path, &dest).await?;
                    }
                    applied += 1;
                }
            }
        }

        Ok(truncate(&format!("Applied {applied} hunk(s) successfully."), &self.truncation.apply_patch))
    }
}

// ---------------------------------------------------------------------------
// shell
// ---------------------------------------------------------------------------

pub const TOOL_SHELL: &str = "shell";
const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 120;

pub struct ShellTool {
    truncation: TruncationDefaults,
}

impl ShellTool {
    pub fn new(truncation: TruncationDefaults) -> Self {
        Self { truncation }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        TOOL_SHELL
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_SHELL.into(),
            description: "Run a shell command (via `sh -c`) under the working folder. The \
                command and everything it spawns is killed (SIGTERM, then SIGKILL after 2s) if \
                it exceeds the timeout."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Command to run."},
                    "cwd": {"type": "string", "description": "Working directory relative to working folder."},
                    "timeout_secs": {"type": "integer", "minimum": 1, "default": DEFAULT_SHELL_TIMEOUT_SECS}
                },
                "required": ["command"]
            }),
        }
    }

    async fn call(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String, ToolError> {
        let command = require_str(&args, "command")?;
        let cwd = args.get("cwd").and_then(|v| v.as_str());
        let timeout_secs = args.get("timeout_secs").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_SHELL_TIMEOUT_SECS);
        let output = env.run_shell(command, cwd, Duration::from_secs(timeout_secs)).await?;

        let mut rendered = String::new();
        if output.timed_out {
            rendered.push_str("[command timed out]\n");
        }
        if let Some(code) = output.exit_code {
            if code != 0 {
                rendered.push_str(&format!("[exit code {code}]\n"));
            }
        }
        rendered.push_str(&output.stdout);
        if !output.stderr.is_empty() {
            rendered.push_str("\n--- stderr ---\n");
            rendered.push_str(&output.stderr);
        }
        Ok(truncate(&rendered, &self.truncation.shell))
    }
}

// ---------------------------------------------------------------------------
// grep
// ---------------------------------------------------------------------------

pub const TOOL_GREP: &str = "grep";
const DEFAULT_GREP_MAX_MATCHES: usize = 100;

pub struct GrepTool {
    truncation: TruncationDefaults,
}

impl GrepTool {
    pub fn new(truncation: TruncationDefaults) -> Self {
        Self { truncation }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        TOOL_GREP
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_GREP.into(),
            description: "Search file contents under the working folder using a regular \
                expression. Returns matching file paths and line numbers, most recently \
                modified files first."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Regular expression to search for."},
                    "path": {"type": "string", "default": ".", "description": "Directory to search in."}
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn call(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String, ToolError> {
        let pattern = require_str(&args, "pattern")?;
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let matches = env.grep(pattern, path, DEFAULT_GREP_MAX_MATCHES).await?;
        if matches.is_empty() {
            return Ok("No matches found".to_string());
        }
        let mut rendered = format!("Found {} match(es)\n", matches.len());
        for m in &matches {
            rendered.push_str(&format!("{}:{}: {}\n", m.path, m.line_number, m.line));
        }
        Ok(truncate(&rendered, &self.truncation.grep))
    }
}

// ---------------------------------------------------------------------------
// glob
// ---------------------------------------------------------------------------

pub const TOOL_GLOB: &str = "glob";

pub struct GlobTool {
    truncation: TruncationDefaults,
}

impl GlobTool {
    pub fn new(truncation: TruncationDefaults) -> Self {
        Self { truncation }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        TOOL_GLOB
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_GLOB.into(),
            description: "List files under the working folder matching a glob pattern, sorted \
                by modification time (newest first)."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Glob pattern, e.g. '**/*.rs'."},
                    "cwd": {"type": "string", "default": ".", "description": "Directory the pattern is relative to."}
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn call(&self, args: Value, env: &dyn ExecutionEnvironment) -> Result<String, ToolError> {
        let pattern = require_str(&args, "pattern")?;
        let cwd = args.get("cwd").and_then(|v| v.as_str()).unwrap_or(".");
        let matches = env.glob(pattern, cwd).await?;
        Ok(truncate(&matches.join("\n"), &self.truncation.glob))
    }
}

// ---------------------------------------------------------------------------
// spawn_agent
// ---------------------------------------------------------------------------

pub const TOOL_SPAWN_AGENT: &str = "spawn_agent";

/// What [`SpawnAgentTool`] needs from the agent session layer, kept as a trait here so `tools`
/// doesn't have to depend on `agent` (which itself depends on `tools`). Implemented by
/// `agent::SubAgentManager`.
#[async_trait]
pub trait AgentSpawner: Send + Sync {
    async fn spawn(&self, task: String, max_turns: Option<u32>) -> Result<String, ToolError>;
    async fn wait(&self, agent_id: &str) -> Result<String, ToolError>;
}

pub struct SpawnAgentTool {
    spawner: Arc<dyn AgentSpawner>,
    truncation: TruncationDefaults,
}

impl SpawnAgentTool {
    pub fn new(spawner: Arc<dyn AgentSpawner>, truncation: TruncationDefaults) -> Self {
        Self { spawner, truncation }
    }
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        TOOL_SPAWN_AGENT
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_SPAWN_AGENT.into(),
            description: "Spawn a sub-agent to carry out a self-contained task, then wait for \
                its final answer. The sub-agent shares this session's working folder but has its \
                own independent conversation history."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string", "description": "Task description for the sub-agent."},
                    "max_turns": {"type": "integer", "minimum": 1, "description": "Turn budget for the sub-agent."}
                },
                "required": ["task"]
            }),
        }
    }

    async fn call(&self, args: Value, _env: &dyn ExecutionEnvironment) -> Result<String, ToolError> {
        let task = require_str(&args, "task")?.to_string();
        let max_turns = args.get("max_turns").and_then(|v| v.as_u64()).map(|n| n as u32);
        let agent_id = self.spawner.spawn(task, max_turns).await?;
        let output = self.spawner.wait(&agent_id).await?;
        Ok(truncate(&output, &self.truncation.spawn_agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::exec_env::MemoryExecutionEnvironment;

    #[tokio::test]
    async fn read_file_tool_renders_line_numbers() {
        let tool = ReadFileTool::new(TruncationDefaults::default());
        let env = MemoryExecutionEnvironment::new().with_file("a.txt", "hello\nworld");
        let out = tool.call(json!({"path": "a.txt"}), &env).await.unwrap();
        assert!(out.contains("1 | hello"));
    }

    #[tokio::test]
    async fn edit_file_tool_rejects_identical_strings() {
        let tool = EditFileTool::new(TruncationDefaults::default());
        let env = MemoryExecutionEnvironment::new().with_file("a.txt", "hello");
        let err = tool.call(json!({"path": "a.txt", "old_string": "x", "new_string": "x"}), &env).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn edit_file_tool_replaces_unique_match() {
        let tool = EditFileTool::new(TruncationDefaults::default());
        let env = MemoryExecutionEnvironment::new().with_file("a.txt", "fn foo() {}\nfn bar() {}\n");
        tool.call(json!({"path": "a.txt", "old_string": "fn foo() {}", "new_string": "fn baz() {}"}), &env).await.unwrap();
        let content = env.read_file_raw("a.txt").await.unwrap();
        assert!(content.contains("fn baz() {}"));
    }

    #[tokio::test]
    async fn edit_file_tool_errors_on_multiple_matches_without_replace_all() {
        let tool = EditFileTool::new(TruncationDefaults::default());
        let env = MemoryExecutionEnvironment::new().with_file("a.txt", "a b a");
        let err = tool.call(json!({"path": "a.txt", "old_string": "a", "new_string": "z"}), &env).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn edit_file_tool_replace_all_replaces_every_occurrence() {
        let tool = EditFileTool::new(TruncationDefaults::default());
        let env = MemoryExecutionEnvironment::new().with_file("a.txt", "a b a");
        tool.call(json!({"path": "a.txt", "old_string": "a", "new_string": "z", "replace_all": true}), &env).await.unwrap();
        assert_eq!(env.read_file_raw("a.txt").await.unwrap(), "z b z");
    }

    #[tokio::test]
    async fn apply_patch_tool_adds_and_updates_files() {
        let tool = ApplyPatchTool::new(TruncationDefaults::default());
        let env = MemoryExecutionEnvironment::new().with_file("existing.txt", "old content\n");
        let patch = "*** Begin Patch\n\
                     *** Add File: new.txt\n\
                     +hello\n\
                     *** Update File: existing.txt\n\
                     @@\n\
                     -old content\n\
                     +new content\n\
                     *** End Patch";
        let out = tool.call(json!({"patch": patch}), &env).await.unwrap();
        assert!(out.contains("Applied 2 hunk"));
        assert_eq!(env.read_file_raw("new.txt").await.unwrap(), "hello");
        assert_eq!(env.read_file_raw("existing.txt").await.unwrap(), "new content\n");
    }

    #[tokio::test]
    async fn grep_tool_reports_no_matches_found() {
        let tool = GrepTool::new(TruncationDefaults::default());
        let env = MemoryExecutionEnvironment::new().with_file("a.txt", "hello");
        let out = tool.call(json!({"pattern": "xyz"}), &env).await.unwrap();
        assert_eq!(out, "No matches found");
    }

    struct StubSpawner;

    #[async_trait]
    impl AgentSpawner for StubSpawner {
        async fn spawn(&self, _task: String, _max_turns: Option<u32>) -> Result<String, ToolError> {
            Ok("agent-1".to_string())
        }

        async fn wait(&self, agent_id: &str) -> Result<String, ToolError> {
            Ok(format!("done: {agent_id}"))
        }
    }

    #[tokio::test]
    async fn spawn_agent_tool_spawns_then_waits() {
        let tool = SpawnAgentTool::new(Arc::new(StubSpawner), TruncationDefaults::default());
        let env = MemoryExecutionEnvironment::new();
        let out = tool.call(json!({"task": "do something"}), &env).await.unwrap();
        assert_eq!(out, "done: agent-1");
    }
}
