//! Logging initialisation for the coracle binary.
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default `info`). Setting
//! `CORACLE_LOG=1` additionally writes structured logs to `coracle.log` in
//! the OS state directory. The returned guard must live for the duration of
//! the process so buffered lines are flushed on exit.

use std::path::PathBuf;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialise the global tracing subscriber. Call once from `main`.
pub fn init() -> LogGuard {
    let env_filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    if std::env::var("CORACLE_LOG").as_deref() == Ok("1") {
        let dir = log_dir().unwrap_or_else(std::env::temp_dir);
        let _ = std::fs::create_dir_all(&dir);
        let appender = tracing_appender::rolling::never(dir, "coracle.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(env_filter())
            .with(stderr_layer)
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .init();

        LogGuard {
            _file_guard: Some(guard),
        }
    } else {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(stderr_layer)
            .init();

        LogGuard { _file_guard: None }
    }
}

fn log_dir() -> Option<PathBuf> {
    if let Ok(state) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(state).join("coracle"));
    }
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".local").join("state").join("coracle"))
}
