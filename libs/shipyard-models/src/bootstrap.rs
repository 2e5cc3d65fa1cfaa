//! Environment bootstrap job models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime::RuntimeType;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// Step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Succeeded,
    Failed,
}

/// Bootstrap phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Preflight,
    Install,
    Verify,
    Rollback,
}

impl Phase {
    /// Forward phases in execution order
    pub const FORWARD: [Phase; 3] = [Phase::Preflight, Phase::Install, Phase::Verify];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Preflight => "preflight",
            Phase::Install => "install",
            Phase::Verify => "verify",
            Phase::Rollback => "rollback",
        }
    }

    /// Failures in this phase trigger a rollback
    pub fn rolls_back_on_failure(&self) -> bool {
        matches!(self, Phase::Preflight | Phase::Install)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role a host plays in a bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    Control,
    Worker,
    Member,
}

impl HostRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostRole::Control => "control",
            HostRole::Worker => "worker",
            HostRole::Member => "member",
        }
    }
}

/// Bootstrap request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapRequest {
    /// Display name for the job
    #[serde(default)]
    pub name: Option<String>,

    pub runtime_type: RuntimeType,
    pub version: String,

    /// Target environment label
    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub target_id: Option<i64>,

    #[serde(default)]
    pub cluster_id: Option<i64>,

    /// k8s control-plane host
    #[serde(default)]
    pub control_host_id: Option<i64>,

    /// k8s worker hosts
    #[serde(default)]
    pub worker_host_ids: Vec<i64>,

    /// compose host set
    #[serde(default)]
    pub host_ids: Vec<i64>,
}

/// Success payload of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapResult {
    pub host_count: usize,
    pub manifest_path: String,
}

/// One bootstrap attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInstallJob {
    pub id: i64,
    pub name: String,
    pub runtime_type: RuntimeType,
    pub environment: String,
    pub target_id: Option<i64>,
    pub cluster_id: Option<i64>,
    pub status: JobStatus,
    pub package_version: String,
    pub package_path: String,
    pub package_sha256: Option<String>,
    pub operator: String,
    pub result: Option<BootstrapResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One phase run on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInstallJobStep {
    pub id: i64,
    pub job_id: i64,
    pub phase: Phase,
    pub host_id: i64,
    pub status: StepStatus,

    /// Captured output, size bounded
    pub output: String,

    /// Error message, size bounded
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
