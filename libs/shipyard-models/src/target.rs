//! Deployment target models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime::RuntimeType;

pub const DEFAULT_ENVIRONMENT: &str = "staging";
pub const DEFAULT_NODE_ROLE: &str = "worker";
pub const DEFAULT_NODE_WEIGHT: i32 = 100;
pub const TARGET_STATUS_ACTIVE: &str = "active";

/// Whether the runtime behind a target has been bootstrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeReadiness {
    #[default]
    Unknown,
    Ready,
}

/// A named deployment destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub id: i64,
    pub name: String,

    /// Fixed at creation
    pub target_type: RuntimeType,

    pub project_id: Option<i64>,
    pub team_id: Option<i64>,

    /// Required for k8s targets
    pub cluster_id: Option<i64>,

    /// Free text, `staging` unless given
    pub environment: String,

    /// Lifecycle status
    pub status: String,

    /// Set by a successful bootstrap
    #[serde(default)]
    pub readiness: RuntimeReadiness,

    /// Bootstrap job that made the runtime ready
    #[serde(default)]
    pub bootstrap_job_id: Option<i64>,

    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Binding of a target to a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetNode {
    pub id: i64,
    pub target_id: i64,
    pub host_id: i64,

    /// `manager` or `worker`
    pub role: String,

    /// Scheduling weight, always > 0
    pub weight: i32,

    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Requested node binding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetNodeSpec {
    pub host_id: i64,

    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub weight: Option<i32>,
}

impl TargetNodeSpec {
    pub fn new(host_id: i64) -> Self {
        Self {
            host_id,
            ..Default::default()
        }
    }
}

/// Create request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,

    /// Raw type, validated against `k8s` / `compose`
    pub target_type: String,

    #[serde(default)]
    pub project_id: Option<i64>,

    #[serde(default)]
    pub team_id: Option<i64>,

    #[serde(default)]
    pub cluster_id: Option<i64>,

    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    /// Initial bindings
    #[serde(default)]
    pub nodes: Option<Vec<TargetNodeSpec>>,
}

/// Partial update request
///
/// Only non-empty fields overwrite. `nodes: None` leaves the bindings alone,
/// `Some(vec![])` clears them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetUpdate {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub project_id: Option<i64>,

    #[serde(default)]
    pub team_id: Option<i64>,

    #[serde(default)]
    pub cluster_id: Option<i64>,

    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub nodes: Option<Vec<TargetNodeSpec>>,
}

/// List filter, every field optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetFilter {
    #[serde(default)]
    pub project_id: Option<i64>,

    #[serde(default)]
    pub team_id: Option<i64>,

    #[serde(default)]
    pub target_type: Option<RuntimeType>,

    #[serde(default)]
    pub environment: Option<String>,
}

/// Node binding joined with its host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetNodeView {
    #[serde(flatten)]
    pub node: TargetNode,

    /// Empty when the host record no longer exists
    pub host_name: String,
    pub host_address: String,
    pub host_status: String,
}

/// A target with its hydrated bindings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDetail {
    #[serde(flatten)]
    pub target: DeploymentTarget,
    pub nodes: Vec<TargetNodeView>,
}
