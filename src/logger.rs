use std::path::PathBuf;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

pub const LOG_FILE_PREFIX: &str = "nodeflow.log";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LogConfig {
    /// An `EnvFilter` directive, e.g. `info` or `nodeflow=debug`.
    pub(crate) log_level: String,
    pub(crate) log_dir: Option<PathBuf>,
}

impl LogConfig {
    pub fn new(log_level: impl Into<String>, log_dir: Option<PathBuf>) -> Self {
        Self {
            log_level: log_level.into(),
            log_dir,
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn log_dir(&self) -> Option<&PathBuf> {
        self.log_dir.as_ref()
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info", None)
    }
}

/// Install the global subscriber: stdout always, plus a daily rolling file
/// under `log_dir` when one is configured.
///
/// Keep the returned guard alive for as long as file logs should be flushed.
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("invalid log level `{}`", config.log_level))?;
    let stdout_layer = fmt::layer().with_thread_names(true);

    match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("could not create log dir {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
            Registry::default()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init()
                .context("a global tracing subscriber is already installed")?;
            Ok(Some(guard))
        }
        None => {
            Registry::default()
                .with(filter)
                .with(stdout_layer)
                .try_init()
                .context("a global tracing subscriber is already installed")?;
            Ok(None)
        }
    }
}
