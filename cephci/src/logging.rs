//! Logging configuration module
//! Console output for interactive runs plus an optional JSON log file per run

use serde::{Deserialize, Serialize};
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_NAME: &str = "cephci.log";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,             // log level (trace, debug, info, warn, error)
    pub file_path: Option<String>, // directory for the log file
    pub rotation: LogRotation,     // log rotation policy
    pub json_format: bool,         // JSON on the console as well
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            rotation: LogRotation::Never,
            json_format: false,
        }
    }
}

impl LogRotation {
    fn schedule(self) -> Rotation {
        match self {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber.
    ///
    /// Keep the returned guard alive for the whole run, dropping it flushes
    /// and stops the file writer.
    pub fn init(&self) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        let console_layer = if self.json_format {
            fmt::layer().json().with_ansi(false).with_writer(io::stdout).boxed()
        } else {
            fmt::layer().with_thread_ids(false).with_writer(io::stdout).boxed()
        };

        let (file_layer, guard) = match self.file_path.as_deref() {
            Some(dir) => {
                let appender = RollingFileAppender::builder()
                    .rotation(self.rotation.schedule())
                    .filename_prefix(LOG_FILE_NAME)
                    .build(dir)?;
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .json()
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .with_writer(writer);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        tracing::info!(
            level = %self.level,
            file = ?self.file_path,
            "Logging initialized"
        );

        Ok(guard)
    }

    /// Initialize with environment variables
    pub fn init_from_env() -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
        let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let file_path = std::env::var("CEPHCI_LOG_PATH").ok();

        Self {
            level,
            file_path,
            ..Default::default()
        }
        .init()
    }
}
