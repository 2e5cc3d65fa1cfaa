//! Release models

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::finding::Finding;
use crate::runtime::RuntimeType;

/// Release status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    /// Row exists, nothing has happened yet
    Created,

    /// Waiting for an operator decision
    PendingApproval,

    /// Apply in progress
    Running,

    /// Applied to the cluster
    Succeeded,

    /// Recorded for a host-group runtime; the execution connector picks it up
    Accepted,

    Failed,
    Rejected,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Created => "created",
            ReleaseStatus::PendingApproval => "pending_approval",
            ReleaseStatus::Running => "running",
            ReleaseStatus::Succeeded => "succeeded",
            ReleaseStatus::Accepted => "accepted",
            ReleaseStatus::Failed => "failed",
            ReleaseStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReleaseStatus::Succeeded
                | ReleaseStatus::Accepted
                | ReleaseStatus::Failed
                | ReleaseStatus::Rejected
        )
    }

    /// The manifest of a release in this state reached the target
    pub fn is_live(&self) -> bool {
        matches!(self, ReleaseStatus::Succeeded | ReleaseStatus::Accepted)
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rollout strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStrategy {
    #[default]
    Rolling,
    Recreate,
    Rollback,
}

/// One attempt to materialize a service manifest on a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: i64,
    pub service_id: i64,
    pub target_id: i64,

    /// Namespace or project scope the manifest lands in
    pub namespace: String,

    /// Copied from the target when the row is written
    pub runtime_type: RuntimeType,

    pub strategy: ReleaseStrategy,

    /// Revision reference of the rendered service, if any
    pub revision: Option<String>,

    pub status: ReleaseStatus,

    /// Resolved environment label
    pub environment: String,

    /// Frozen manifest, never rewritten
    pub manifest: String,

    /// Opaque request parameters
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(default)]
    pub checks: Vec<Finding>,

    #[serde(default)]
    pub warnings: Vec<Finding>,

    #[serde(default)]
    pub diagnostics: Vec<Finding>,

    /// Release this row rolls back, for rollback rows
    #[serde(default)]
    pub rollback_of: Option<i64>,

    pub operator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Kind of an audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    Created,
    ApprovalRequired,
    Approved,
    Rejected,
    StatusChanged,
    RolledBack,
}

/// Append-only audit record for a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTimelineEvent {
    pub id: i64,
    pub release_id: i64,
    pub kind: TimelineEventKind,
    pub from_status: Option<ReleaseStatus>,
    pub to_status: Option<ReleaseStatus>,
    pub actor: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Operator decision on a gated release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseApproval {
    pub id: i64,
    pub release_id: i64,
    pub decision: ApprovalDecision,
    pub actor: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// Preview / apply request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub service_id: i64,
    pub target_id: i64,

    /// Overrides the target environment when non-empty
    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(default)]
    pub strategy: ReleaseStrategy,
}

/// Result of a dry run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasePreview {
    pub service_id: i64,
    pub target_id: i64,
    pub runtime_type: RuntimeType,
    pub namespace: String,
    pub environment: String,
    pub revision: Option<String>,
    pub manifest: String,
    pub checks: Vec<Finding>,
    pub warnings: Vec<Finding>,
}

/// List filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseFilter {
    #[serde(default)]
    pub service_id: Option<i64>,

    #[serde(default)]
    pub target_id: Option<i64>,
}
