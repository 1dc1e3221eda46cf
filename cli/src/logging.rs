//! Tracing setup for the `agentmesh` binary. Always logs to stdout (the CLI's whole job is to
//! print assistant text and pipeline events, so logging never hides behind a file-only sink);
//! `--log-file` additionally mirrors the same events to a rolling file via `tracing-appender`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Holds the file appender's worker guard alive for the process lifetime; dropping it stops
/// the background flush thread.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

fn filter(verbose: bool) -> EnvFilter {
    if let Ok(f) = EnvFilter::try_from_default_env() {
        return f;
    }
    EnvFilter::new(if verbose { "info" } else { "warn" })
}

/// Installs a stdout layer (human-readable) plus an optional file layer (plain, no ANSI) when
/// `log_file` is given. `verbose` raises the default level from `warn` to `info` when `RUST_LOG`
/// isn't set.
pub fn init(verbose: bool, log_file: Option<&std::path::Path>) -> LoggingGuard {
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).with_filter(filter(verbose));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().map(|n| n.to_owned()).unwrap_or_else(|| "agentmesh.log".into());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(non_blocking)
                .with_filter(filter(verbose));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry().with(stdout_layer).with(file_layer).try_init();

    LoggingGuard { _file_guard: guard }
}
