//! Logging setup for hosts embedding the layer engine.
//!
//! The library itself only emits `tracing` events. Hosts that have no
//! subscriber of their own can call [`init_logging`]:
//! - stdout output, filtered by `RUST_LOG` (default `info`)
//! - optional file output under a log directory, cleared on start
//!
//! The returned [`LoggingGuard`] flushes the file writer when dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Where and how to log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Directory for the log file. `None` logs to stdout only.
    pub log_dir: Option<PathBuf>,
    pub log_file: String,
    /// Filter directives used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Colored stdout output.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: Some(PathBuf::from(default_log_dir())),
            log_file: default_log_file().to_string(),
            default_filter: DEFAULT_FILTER.to_string(),
            ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Stdout only.
    pub fn stdout_only() -> Self {
        Self {
            log_dir: None,
            ..Default::default()
        }
    }

    /// Full path of the log file, if file logging is enabled.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| dir.join(&self.log_file))
    }
}

/// Keeps the file writer alive. Drop it last.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

impl std::fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingGuard")
            .field("file", &self._file_guard.is_some())
            .finish()
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or the previous
/// log file cannot be cleared.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, io::Error> {
    let (file_layer, file_guard) = match &config.log_dir {
        Some(dir) => {
            prepare_log_file(dir, &config.log_file)?;
            let appender = tracing_appender::rolling::never(dir, &config.log_file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTime::rfc_3339());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(config.ansi)
        .compact();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Create the directory and truncate the log file.
fn prepare_log_file(dir: &Path, file: &str) -> Result<PathBuf, io::Error> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file);
    fs::write(&path, "")?;
    Ok(path)
}

pub fn default_log_dir() -> &'static str {
    "logs"
}

pub fn default_log_file() -> &'static str {
    "mapsync.log"
}
