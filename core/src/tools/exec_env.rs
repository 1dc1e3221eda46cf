//! Pluggable execution environment: where a tool's file/shell/search operations actually run.
//! [`LocalExecutionEnvironment`] is the real filesystem/shell; [`MemoryExecutionEnvironment`] is
//! an in-memory stand-in for tests (gated the same way [`super::stub`] is — `cfg(test)` or the
//! `test-util` feature).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::ToolError;

pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// One filesystem entry from [`ExecutionEnvironment::list_dir`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub path: String,
    pub is_dir: bool,
}

/// One match from [`ExecutionEnvironment::grep`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrepMatch {
    pub path: String,
    pub line_number: u64,
    pub line: String,
}

const BINARY_SNIFF_WINDOW: usize = 8192;

/// Environment variables always forwarded to a spawned shell command, regardless of the
/// caller's own environment — matches what an interactive shell needs to behave normally.
const ALWAYS_INHERITED_VARS: &[&str] = &[
    "PATH", "HOME", "USER", "SHELL", "LANG", "TERM", "TMPDIR", "CARGO_HOME", "RUSTUP_HOME", "GOPATH", "NVM_DIR",
];

/// Env var name suffixes that mark a variable as a secret to strip before spawning a command.
const SECRET_VAR_SUFFIXES: &[&str] = &["_API_KEY", "_SECRET", "_TOKEN", "_PASSWORD", "_CREDENTIAL"];

/// Filters the process environment down to the inherited allow-list plus anything not matching
/// a secret-suffix pattern, per the env-filtering rule in the tool registry design.
pub fn filtered_env() -> Vec<(String, String)> {
    std::env::vars()
        .filter(|(k, _)| {
            ALWAYS_INHERITED_VARS.contains(&k.as_str())
                || !SECRET_VAR_SUFFIXES.iter().any(|suffix| k.ends_with(suffix))
        })
        .collect()
}

#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    /// Reads `path`, formatted as `NNN | content` per line, honoring `offset`/`limit` (both
    /// 0-based line counts). Rejects a file whose first 8 KiB contains a null byte as binary.
    async fn read_file(&self, path: &str, offset: Option<usize>, limit: Option<usize>) -> Result<String, ToolError>;

    /// Reads `path` verbatim, for internal callers that don't want the line-numbered framing
    /// (e.g. `edit_file`/`apply_patch` computing a diff against the raw bytes).
    async fn read_file_raw(&self, path: &str) -> Result<String, ToolError>;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), ToolError>;

    async fn exists(&self, path: &str) -> bool;

    /// Recursively lists `path` up to `max_depth` directories deep.
    async fn list_dir(&self, path: &str, max_depth: usize) -> Result<Vec<DirEntry>, ToolError>;

    async fn run_shell(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Duration,
    ) -> Result<ShellOutput, ToolError>;

    async fn grep(&self, pattern: &str, path: &str, max_matches: usize) -> Result<Vec<GrepMatch>, ToolError>;

    /// Globs under `cwd`, sorted by modification time descending (newest first).
    async fn glob(&self, pattern: &str, cwd: &str) -> Result<Vec<String>, ToolError>;

    /// Removes a file or (recursively) a directory. No-op-safe: callers check `exists` first
    /// when "delete only if present" semantics are wanted.
    async fn remove_path(&self, path: &str) -> Result<(), ToolError>;

    /// Renames/moves `from` to `to`, creating `to`'s parent directories if needed.
    async fn rename(&self, from: &str, to: &str) -> Result<(), ToolError>;
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_WINDOW).any(|&b| b == 0)
}

fn number_lines(content: &str, offset: usize, limit: Option<usize>) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let start = offset.min(lines.len());
    let end = limit.map(|l| (start + l).min(lines.len())).unwrap_or(lines.len());
    let mut out = String::new();
    for (i, line) in lines[start..end].iter().enumerate() {
        out.push_str(&format!("{:>4} | {}\n", start + i + 1, line));
    }
    out
}

/// The real filesystem and a real shell, rooted at `root` (all relative paths resolve under it;
/// `..`-escaping the root is rejected).
pub struct LocalExecutionEnvironment {
    root: PathBuf,
}

impl LocalExecutionEnvironment {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() { candidate.to_path_buf() } else { self.root.join(candidate) };
        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root) {
            return Err(ToolError::InvalidArguments(format!("path escapes working folder: {path}")));
        }
        Ok(normalized)
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[async_trait]
impl ExecutionEnvironment for LocalExecutionEnvironment {
    async fn read_file(&self, path: &str, offset: Option<usize>, limit: Option<usize>) -> Result<String, ToolError> {
        let content = self.read_file_raw(path).await?;
        Ok(number_lines(&content, offset.unwrap_or(0), limit))
    }

    async fn read_file_raw(&self, path: &str) -> Result<String, ToolError> {
        let resolved = self.resolve(path)?;
        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|e| ToolError::Execution(format!("failed to read {path}: {e}")))?;
        if looks_binary(&bytes) {
            return Err(ToolError::InvalidArguments(format!("{path} looks like a binary file")));
        }
        String::from_utf8(bytes).map_err(|e| ToolError::Execution(format!("{path} is not valid UTF-8: {e}")))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), ToolError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| ToolError::Execution(e.to_string()))?;
        }
        tokio::fs::write(&resolved, content).await.map_err(|e| ToolError::Execution(e.to_string()))
    }

    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(resolved) => tokio::fs::metadata(resolved).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn list_dir(&self, path: &str, max_depth: usize) -> Result<Vec<DirEntry>, ToolError> {
        let resolved = self.resolve(path)?;
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(&resolved).max_depth(max_depth).into_iter().filter_map(|e| e.ok()) {
            if entry.path() == resolved {
                continue;
            }
            let rel = entry.path().strip_prefix(&self.root).unwrap_or(entry.path()).to_string_lossy().into_owned();
            out.push(DirEntry { path: rel, is_dir: entry.file_type().is_dir() });
        }
        Ok(out)
    }

    async fn run_shell(&self, command: &str, cwd: Option<&str>, timeout: Duration) -> Result<ShellOutput, ToolError> {
        let workdir = match cwd {
            Some(dir) => self.resolve(dir)?,
            None => self.root.clone(),
        };
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&workdir).env_clear();
        for (k, v) in filtered_env() {
            cmd.env(k, v);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::Execution(format!("failed to spawn shell: {e}")))?;

        run_with_timeout(child, timeout).await
    }

    async fn grep(&self, pattern: &str, path: &str, max_matches: usize) -> Result<Vec<GrepMatch>, ToolError> {
        let resolved = self.resolve(path)?;
        let matcher = grep_regex::RegexMatcher::new(pattern).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let mut out = Vec::new();
        let root = self.root.clone();
        for entry in ignore::WalkBuilder::new(&resolved).build().filter_map(|e| e.ok()) {
            if out.len() >= max_matches {
                break;
            }
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path()).to_string_lossy().into_owned();
            let mut searcher = grep_searcher::Searcher::new();
            let mut matches = Vec::new();
            let _ = searcher.search_path(
                &matcher,
                entry.path(),
                grep_searcher::sinks::UTF8(|line_number, line| {
                    matches.push((line_number, line.to_string()));
                    Ok(true)
                }),
            );
            for (line_number, line) in matches {
                if out.len() >= max_matches {
                    break;
                }
                out.push(GrepMatch { path: rel.clone(), line_number, line });
            }
        }
        Ok(out)
    }

    async fn glob(&self, pattern: &str, cwd: &str) -> Result<Vec<String>, ToolError> {
        let base = self.resolve(cwd)?;
        let full_pattern = base.join(pattern);
        let pattern_str = full_pattern.to_string_lossy().into_owned();
        let mut entries: Vec<(std::time::SystemTime, String)> = glob::glob(&pattern_str)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?
            .filter_map(|r| r.ok())
            .filter_map(|p| {
                let mtime = p.metadata().and_then(|m| m.modified()).unwrap_or(std::time::UNIX_EPOCH);
                let rel = p.strip_prefix(&self.root).unwrap_or(&p).to_string_lossy().into_owned();
                Some((mtime, rel))
            })
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().map(|(_, p)| p).collect())
    }

    async fn remove_path(&self, path: &str) -> Result<(), ToolError> {
        let resolved = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&resolved).await.map_err(|e| ToolError::Execution(e.to_string()))?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&resolved).await.map_err(|e| ToolError::Execution(e.to_string()))
        } else {
            tokio::fs::remove_file(&resolved).await.map_err(|e| ToolError::Execution(e.to_string()))
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), ToolError> {
        let from_resolved = self.resolve(from)?;
        let to_resolved = self.resolve(to)?;
        if let Some(parent) = to_resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| ToolError::Execution(e.to_string()))?;
        }
        tokio::fs::rename(&from_resolved, &to_resolved).await.map_err(|e| ToolError::Execution(e.to_string()))
    }
}

#[cfg(unix)]
async fn run_with_timeout(mut child: tokio::process::Child, timeout: Duration) -> Result<ShellOutput, ToolError> {
    use tokio::io::AsyncReadExt;

    let pid = child.id().map(|p| p as i32);
    let wait = async {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_end(&mut stdout).await;
        }
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_end(&mut stderr).await;
        }
        let status = child.wait().await;
        (stdout, stderr, status)
    };

    if timeout.is_zero() {
        let (stdout, stderr, status) = wait.await;
        return Ok(ShellOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.ok().and_then(|s| s.code()),
            timed_out: false,
        });
    }

    match tokio::time::timeout(timeout, wait).await {
        Ok((stdout, stderr, status)) => Ok(ShellOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.ok().and_then(|s| s.code()),
            timed_out: false,
        }),
        Err(_) => {
            if let Some(pid) = pid {
                let _ = nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pid), nix::sys::signal::Signal::SIGTERM);
                tokio::time::sleep(Duration::from_secs(2)).await;
                let _ = nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pid), nix::sys::signal::Signal::SIGKILL);
            }
            let _ = child.kill().await;
            Ok(ShellOutput { stdout: String::new(), stderr: String::new(), exit_code: None, timed_out: true })
        }
    }
}

#[cfg(not(unix))]
async fn run_with_timeout(mut child: tokio::process::Child, timeout: Duration) -> Result<ShellOutput, ToolError> {
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ToolError::Timeout)?
        .map_err(|e| ToolError::Execution(e.to_string()))?;
    Ok(ShellOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
        timed_out: false,
    })
}

/// In-memory execution environment for tests: a `path -> content` map plus a scripted shell
/// reply queue, so agent/tool tests don't touch the real filesystem.
#[cfg(any(test, feature = "test-util"))]
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryExecutionEnvironment {
        files: Mutex<HashMap<String, String>>,
        shell_replies: Mutex<std::collections::VecDeque<ShellOutput>>,
    }

    impl MemoryExecutionEnvironment {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_file(self, path: impl Into<String>, content: impl Into<String>) -> Self {
            self.files.lock().unwrap().insert(path.into(), content.into());
            self
        }

        pub fn push_shell_reply(&self, output: ShellOutput) {
            self.shell_replies.lock().unwrap().push_back(output);
        }
    }

    #[async_trait]
    impl ExecutionEnvironment for MemoryExecutionEnvironment {
        async fn read_file(&self, path: &str, offset: Option<usize>, limit: Option<usize>) -> Result<String, ToolError> {
            let content = self.read_file_raw(path).await?;
            Ok(number_lines(&content, offset.unwrap_or(0), limit))
        }

        async fn read_file_raw(&self, path: &str) -> Result<String, ToolError> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| ToolError::InvalidArguments(format!("file not found: {path}")))
        }

        async fn write_file(&self, path: &str, content: &str) -> Result<(), ToolError> {
            self.files.lock().unwrap().insert(path.to_string(), content.to_string());
            Ok(())
        }

        async fn exists(&self, path: &str) -> bool {
            self.files.lock().unwrap().contains_key(path)
        }

        async fn list_dir(&self, path: &str, _max_depth: usize) -> Result<Vec<DirEntry>, ToolError> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .keys()
                .filter(|p| p.starts_with(path))
                .map(|p| DirEntry { path: p.clone(), is_dir: false })
                .collect())
        }

        async fn run_shell(&self, _command: &str, _cwd: Option<&str>, _timeout: Duration) -> Result<ShellOutput, ToolError> {
            self.shell_replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ToolError::Execution("no scripted shell reply queued".to_string()))
        }

        async fn grep(&self, pattern: &str, _path: &str, max_matches: usize) -> Result<Vec<GrepMatch>, ToolError> {
            let re = regex_lite_find(pattern);
            let mut out = Vec::new();
            for (path, content) in self.files.lock().unwrap().iter() {
                for (i, line) in content.lines().enumerate() {
                    if out.len() >= max_matches {
                        break;
                    }
                    if re(line) {
                        out.push(GrepMatch { path: path.clone(), line_number: (i + 1) as u64, line: line.to_string() });
                    }
                }
            }
            Ok(out)
        }

        async fn glob(&self, pattern: &str, _cwd: &str) -> Result<Vec<String>, ToolError> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .keys()
                .filter(|p| glob_match(pattern, p))
                .cloned()
                .collect())
        }

        async fn remove_path(&self, path: &str) -> Result<(), ToolError> {
            let mut files = self.files.lock().unwrap();
            let had_file = files.remove(path).is_some();
            let had_prefix = {
                let prefix = format!("{path}/");
                let keys: Vec<String> = files.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
                for k in &keys {
                    files.remove(k);
                }
                !keys.is_empty()
            };
            if had_file || had_prefix {
                Ok(())
            } else {
                Err(ToolError::InvalidArguments(format!("path not found: {path}")))
            }
        }

        async fn rename(&self, from: &str, to: &str) -> Result<(), ToolError> {
            let mut files = self.files.lock().unwrap();
            let content = files
                .remove(from)
                .ok_or_else(|| ToolError::InvalidArguments(format!("file not found: {from}")))?;
            files.insert(to.to_string(), content);
            Ok(())
        }
    }

    /// A minimal substring matcher for the in-memory grep so tests don't need a real regex
    /// engine; callers exercising real regex semantics should test against
    /// [`super::LocalExecutionEnvironment`] instead.
    fn regex_lite_find(pattern: &str) -> impl Fn(&str) -> bool + '_ {
        move |line: &str| line.contains(pattern)
    }

    fn glob_match(pattern: &str, path: &str) -> bool {
        match pattern.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == pattern,
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryExecutionEnvironment;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_lines_applies_offset_and_limit() {
        let out = number_lines("a\nb\nc\nd", 1, Some(2));
        assert_eq!(out, "   2 | b\n   3 | c\n");
    }

    #[test]
    fn looks_binary_detects_null_byte() {
        assert!(looks_binary(b"hello\0world"));
        assert!(!looks_binary(b"hello world"));
    }

    #[test]
    fn filtered_env_strips_api_key_suffixed_vars() {
        std::env::set_var("AGENTMESH_TEST_API_KEY", "secret");
        std::env::set_var("AGENTMESH_TEST_VISIBLE", "ok");
        let vars = filtered_env();
        assert!(!vars.iter().any(|(k, _)| k == "AGENTMESH_TEST_API_KEY"));
        assert!(vars.iter().any(|(k, _)| k == "AGENTMESH_TEST_VISIBLE"));
        std::env::remove_var("AGENTMESH_TEST_API_KEY");
        std::env::remove_var("AGENTMESH_TEST_VISIBLE");
    }

    #[tokio::test]
    async fn local_env_resolve_rejects_escaping_root() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalExecutionEnvironment::new(dir.path());
        let err = env.read_file_raw("../outside.txt").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn local_env_write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let env = LocalExecutionEnvironment::new(dir.path());
        env.write_file("a.txt", "hello").await.unwrap();
        let content = env.read_file_raw("a.txt").await.unwrap();
        assert_eq!(content, "hello");
    }
}
