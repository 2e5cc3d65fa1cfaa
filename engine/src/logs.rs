//! Logging configuration

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::errors::EngineError;
use crate::storage::settings::EngineSettings;

/// Rolling log file prefix inside the log directory
const LOG_FILE_PREFIX: &str = "shipyard.log";

/// Verbosity of the engine's own targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Filter directive: the chosen level for the engine, `warn` for
    /// everything else unless the engine itself is quieter
    fn directive(&self) -> String {
        match self {
            LogLevel::Warn | LogLevel::Error => self.as_str().to_string(),
            _ => format!("warn,shipyard={}", self.as_str()),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(EngineError::ConfigError(format!("unknown log level {:?}", other))),
        }
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Where and how log lines are written
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub log_level: LogLevel,

    /// Write to stdout
    pub stdout: bool,

    /// Directory for daily rolling files
    pub log_dir: Option<PathBuf>,

    /// JSON lines on stdout instead of the human format
    pub json_format: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            stdout: true,
            log_dir: None,
            json_format: false,
        }
    }
}

impl LogOptions {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            log_level: settings.log_level,
            stdout: true,
            log_dir: settings.log_dir.clone(),
            json_format: settings.log_json,
        }
    }

    /// `RUST_LOG` wins over the configured level
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.log_level.directive()))
    }
}

/// Install the global subscriber
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
pub fn init_logging(options: LogOptions) -> Result<Option<WorkerGuard>, EngineError> {
    let stdout_layer = options.stdout.then(|| {
        if options.json_format {
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).boxed()
        }
    });

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(options.filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| EngineError::ConfigError(format!("logging already initialized: {}", e)))?;

    Ok(guard)
}
