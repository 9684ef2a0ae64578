//! Tracing setup for Reelfeed.
//!
//! Console output follows the level the user picked; a second layer writes
//! every event of the session to `reelfeed-last-run.log` so decoder and
//! disposal decisions can be reconstructed after the fact.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Name of the per-run trace file inside the logs directory.
pub const LAST_RUN_LOG: &str = "reelfeed-last-run.log";

/// Where and how verbosely to log.
#[derive(Debug, Clone)]
pub struct TracingSettings {
    /// Level for console output; `RUST_LOG` takes precedence when set
    pub console_level: Level,
    /// Directory receiving the full trace file (None disables the file layer)
    pub logs_dir: Option<PathBuf>,
}

impl Default for TracingSettings {
    fn default() -> Self {
        Self {
            console_level: Level::INFO,
            logs_dir: Some(PathBuf::from("logs")),
        }
    }
}

/// Installs the global subscriber.
///
/// Returns the path of the trace file when the file layer is enabled.
///
/// # Errors
///
/// - `std::io::Error` - logs directory cannot be created or the trace file cannot be opened
/// - `tracing_subscriber::util::TryInitError` - a global subscriber is already installed
pub fn init_tracing(
    settings: &TracingSettings,
) -> Result<Option<PathBuf>, Box<dyn std::error::Error + Send + Sync>> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.console_level.to_string()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_filter(console_filter);

    let (file_layer, log_path) = match settings.logs_dir.as_deref() {
        Some(dir) => {
            let (file, path) = open_trace_file(dir)?;
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(file)
                .with_filter(EnvFilter::new("trace"));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        console = %settings.console_level,
        trace_file = ?log_path,
        "Tracing initialized"
    );

    Ok(log_path)
}

fn open_trace_file(dir: &Path) -> std::io::Result<(File, PathBuf)> {
    create_dir_all(dir)?;
    let path = dir.join(LAST_RUN_LOG);
    let file = File::create(&path)?;
    Ok((file, path))
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Informational, warning, and error messages
    Info,
    /// Debug and above, including per-handle pool decisions
    Debug,
    /// Everything
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_level_conversion() {
        assert_eq!(Level::from(CliLogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(CliLogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_trace_file_is_created_in_logs_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (_file, path) = open_trace_file(&dir.path().join("nested")).unwrap();

        assert!(path.ends_with(LAST_RUN_LOG));
        assert!(path.exists());
    }
}
