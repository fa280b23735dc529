use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// # Logging Setup
///
/// Installs the global `tracing` subscriber:
///
/// - an ANSI console layer with targets,
/// - a JSON layer writing to `<log_dir>/<file_prefix>.<date>`, rotated daily
///   through a non-blocking writer.
///
/// `RUST_LOG` overrides `level` when set. The returned [`WorkerGuard`] flushes
/// the file writer when dropped, so the caller keeps it alive until exit.
pub fn setup_logging(log_dir: &Path, level: &str, file_prefix: &str) -> io::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, file_prefix);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

    tracing::info!("Logging initialized with level: {}", level);
    Ok(guard)
}
