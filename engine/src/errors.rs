//! Error types for the orchestration engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Integrity error: {0}")]
    IntegrityError(String),

    #[error("Remote execution error: {0}")]
    RemoteExecError(String),

    #[error("Apply error: {0}")]
    ApplyError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Release {release_id} failed: {message}")]
    ReleaseFailed { release_id: i64, message: String },

    #[error("Bootstrap job {job_id} failed: {message}")]
    BootstrapFailed { job_id: i64, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable class name for the outer request layer
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ValidationError(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::IntegrityError(_) => "integrity",
            EngineError::RemoteExecError(_) => "remote_execution",
            EngineError::ApplyError(_) => "apply",
            EngineError::Conflict(_) => "conflict",
            EngineError::ConfigError(_) => "config",
            EngineError::CryptoError(_) => "crypto",
            EngineError::InvalidTransition(_) => "invalid_transition",
            EngineError::ReleaseFailed { .. } => "release_failed",
            EngineError::BootstrapFailed { .. } => "bootstrap_failed",
            EngineError::IoError(_)
            | EngineError::JsonError(_)
            | EngineError::YamlError(_)
            | EngineError::StorageError(_)
            | EngineError::Internal(_) => "internal",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

