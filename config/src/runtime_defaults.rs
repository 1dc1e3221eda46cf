//! Ambient runtime defaults: retry/backoff, per-tool output truncation, checkpoint cadence.
//!
//! These are the numeric knobs the provider transport, agent session and pipeline engine
//! crates read at startup. Centralizing them here keeps tuning a config-file change rather
//! than a recompile, mirroring how `RunConfigSummary` centralizes the loggable run config.

use serde::{Deserialize, Serialize};

/// Retry/backoff defaults for the provider transport's retry loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryDefaults {
    /// Number of retry attempts after the first call (so `1 + max_retries` calls total).
    pub max_retries: u32,
    /// Base delay in milliseconds for `base * mult^attempt` backoff.
    pub base_delay_ms: u64,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Ceiling on any single computed/honored delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Whether to apply +/-50% jitter to the computed delay.
    pub jitter: bool,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

/// One tool's truncation policy: char budget, mode, optional line cap.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TruncationRule {
    pub max_chars: usize,
    pub mode: TruncationModeDefault,
    pub max_lines: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationModeDefault {
    HeadTail,
    Tail,
}

/// Per-tool truncation defaults, spec §4.7.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TruncationDefaults {
    pub read_file: TruncationRule,
    pub shell: TruncationRule,
    pub grep: TruncationRule,
    pub glob: TruncationRule,
    pub apply_patch: TruncationRule,
    pub edit_file: TruncationRule,
    pub write_file: TruncationRule,
    pub spawn_agent: TruncationRule,
}

impl Default for TruncationDefaults {
    fn default() -> Self {
        use TruncationModeDefault::{HeadTail, Tail};
        Self {
            read_file: TruncationRule { max_chars: 50_000, mode: HeadTail, max_lines: None },
            shell: TruncationRule { max_chars: 30_000, mode: HeadTail, max_lines: Some(256) },
            grep: TruncationRule { max_chars: 20_000, mode: Tail, max_lines: Some(200) },
            glob: TruncationRule { max_chars: 20_000, mode: Tail, max_lines: Some(500) },
            apply_patch: TruncationRule { max_chars: 10_000, mode: Tail, max_lines: None },
            edit_file: TruncationRule { max_chars: 10_000, mode: Tail, max_lines: None },
            write_file: TruncationRule { max_chars: 1_000, mode: Tail, max_lines: None },
            spawn_agent: TruncationRule { max_chars: 20_000, mode: HeadTail, max_lines: None },
        }
    }
}

/// Top-level ambient defaults bundle, loadable from `[runtime]` in the XDG `config.toml`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuntimeDefaults {
    #[serde(default)]
    pub retry: RetryDefaults,
    #[serde(default)]
    pub truncation: TruncationDefaults,
    /// How many pipeline steps elapse between checkpoint writes (1 = every step).
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_every_n_steps: u32,
    /// Artifact store in-memory/file-backed threshold, in bytes.
    #[serde(default = "default_artifact_threshold")]
    pub artifact_file_threshold_bytes: u64,
}

fn default_checkpoint_interval() -> u32 {
    1
}

fn default_artifact_threshold() -> u64 {
    100 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_numbers() {
        let d = RuntimeDefaults::default();
        assert_eq!(d.retry.max_retries, 3);
        assert_eq!(d.retry.max_delay_ms, 60_000);
        assert_eq!(d.truncation.read_file.max_chars, 50_000);
        assert_eq!(d.truncation.write_file.max_chars, 1_000);
        assert_eq!(d.checkpoint_every_n_steps, 1);
        assert_eq!(d.artifact_file_threshold_bytes, 100 * 1024);
    }

    #[test]
    fn round_trips_through_toml() {
        let d = RuntimeDefaults::default();
        let s = toml::to_string(&d).unwrap();
        let back: RuntimeDefaults = toml::from_str(&s).unwrap();
        assert_eq!(back.retry.max_retries, d.retry.max_retries);
    }
}
