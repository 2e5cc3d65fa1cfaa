//! Engine settings

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for daily rolling log files; stdout only when absent
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// JSON lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Directory holding `script/runtime/<runtime>/<version>/`
    #[serde(default = "default_package_base_dir")]
    pub package_base_dir: PathBuf,

    /// redb database file; in-memory only when absent
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// Environment given to targets created without one
    #[serde(default = "default_environment")]
    pub default_environment: String,

    /// Environments whose releases wait for approval
    #[serde(default = "default_production_environments")]
    pub production_environments: Vec<String>,

    /// Field manager used for server-side apply
    #[serde(default = "default_field_manager")]
    pub field_manager: String,

    /// Bytes of output and error kept per bootstrap step
    #[serde(default = "default_output_limit")]
    pub output_limit: usize,

    /// Re-apply the old manifest to the cluster when rolling back
    #[serde(default)]
    pub reapply_on_rollback: bool,

    /// Credential vault configuration
    #[serde(default)]
    pub vault: VaultSettings,

    /// Remote execution over SSH
    #[serde(default)]
    pub ssh: SshSettings,

    /// Cluster access through kubectl
    #[serde(default)]
    pub kubectl: KubectlSettings,
}

fn default_package_base_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_environment() -> String {
    shipyard_models::target::DEFAULT_ENVIRONMENT.to_string()
}

fn default_production_environments() -> Vec<String> {
    vec!["production".to_string()]
}

fn default_field_manager() -> String {
    "shipyard".to_string()
}

fn default_output_limit() -> usize {
    2000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_dir: None,
            log_json: false,
            package_base_dir: default_package_base_dir(),
            state_file: None,
            default_environment: default_environment(),
            production_environments: default_production_environments(),
            field_manager: default_field_manager(),
            output_limit: default_output_limit(),
            reapply_on_rollback: false,
            vault: VaultSettings::default(),
            ssh: SshSettings::default(),
            kubectl: KubectlSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Load settings from a JSON file
    pub async fn load(file: &File) -> Result<Self, EngineError> {
        file.read_json::<Self>()
            .await
            .map_err(|e| EngineError::ConfigError(format!("{}: {}", file.path().display(), e)))
    }
}

/// Credential vault settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    /// Inline secret; prefer the environment variable
    #[serde(default, skip_serializing)]
    pub key: Option<String>,

    /// Environment variable consulted when `key` is unset
    #[serde(default = "default_key_env")]
    pub key_env: String,
}

fn default_key_env() -> String {
    "SHIPYARD_VAULT_KEY".to_string()
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            key: None,
            key_env: default_key_env(),
        }
    }
}

impl VaultSettings {
    /// Settings with an inline key
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Default::default()
        }
    }

    /// Resolve the configured secret
    pub fn resolve_key(&self) -> Result<SecretString, EngineError> {
        let raw = match self.key.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(key) => key.to_string(),
            None => std::env::var(&self.key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    EngineError::ConfigError(format!(
                        "credential encryption key is not configured (set {})",
                        self.key_env
                    ))
                })?,
        };
        Ok(SecretString::from(raw))
    }
}

/// SSH settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_ssh_binary")]
    pub binary: String,

    /// Login user for hosts without one
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Port for hosts without one
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound for one remote command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    1800
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            binary: default_ssh_binary(),
            user: default_ssh_user(),
            port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// kubectl settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubectlSettings {
    #[serde(default = "default_kubectl_binary")]
    pub binary: String,

    /// Where short-lived kubeconfig files are written
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    #[serde(default = "default_kubectl_timeout")]
    pub timeout_secs: u64,
}

fn default_kubectl_binary() -> String {
    "kubectl".to_string()
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("shipyard")
}

fn default_kubectl_timeout() -> u64 {
    60
}

impl Default for KubectlSettings {
    fn default() -> Self {
        Self {
            binary: default_kubectl_binary(),
            scratch_dir: default_scratch_dir(),
            timeout_secs: default_kubectl_timeout(),
        }
    }
}
