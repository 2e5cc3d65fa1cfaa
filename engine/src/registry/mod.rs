//! Target registry
//!
//! Owns deployment targets and their node bindings. Node lists are only
//! ever replaced whole, inside the same transaction as the target write.
//! Writes to an existing target take its in-flight key, so they are refused
//! while a bootstrap is driving that target.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use shipyard_models::release::ReleaseStatus;
use shipyard_models::target::{
    DeploymentTarget, RuntimeReadiness, TargetDetail, TargetFilter, TargetNode, TargetNodeSpec,
    TargetNodeView, TargetSpec, TargetUpdate, DEFAULT_NODE_ROLE, DEFAULT_NODE_WEIGHT,
    TARGET_STATUS_ACTIVE,
};
use shipyard_models::RuntimeType;

use crate::context::OpContext;
use crate::errors::EngineError;
use crate::locks::{target_key, InFlight};
use crate::store::{names, Store, Tables};

pub struct TargetRegistry {
    store: Arc<Store>,
    in_flight: Arc<InFlight>,
    default_environment: String,
}

impl TargetRegistry {
    pub fn new(
        store: Arc<Store>,
        in_flight: Arc<InFlight>,
        default_environment: impl Into<String>,
    ) -> Self {
        Self {
            store,
            in_flight,
            default_environment: default_environment.into(),
        }
    }

    /// Create a target, binding its nodes in the same transaction
    pub async fn create_target(
        &self,
        ctx: &OpContext,
        spec: TargetSpec,
    ) -> Result<TargetDetail, EngineError> {
        let target_type: RuntimeType = spec
            .target_type
            .parse()
            .map_err(EngineError::ValidationError)?;

        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::ValidationError(
                "target name is required".to_string(),
            ));
        }
        let cluster_id = spec.cluster_id.filter(|id| *id > 0);
        if target_type == RuntimeType::K8s && cluster_id.is_none() {
            return Err(EngineError::ValidationError(
                "k8s targets require a cluster reference".to_string(),
            ));
        }

        let environment = non_empty(spec.environment)
            .unwrap_or_else(|| self.default_environment.clone());
        let status = non_empty(spec.status).unwrap_or_else(|| TARGET_STATUS_ACTIVE.to_string());
        let actor = ctx.actor.clone();

        let target_id = self
            .store
            .transaction(move |t| {
                ensure_unique_name(t, &name, None)?;
                if let Some(cluster_id) = cluster_id {
                    ensure_cluster(t, cluster_id)?;
                }

                let now = Utc::now();
                let target = DeploymentTarget {
                    id: t.next_id(names::TARGETS),
                    name,
                    target_type,
                    project_id: spec.project_id,
                    team_id: spec.team_id,
                    cluster_id,
                    environment,
                    status,
                    readiness: RuntimeReadiness::Unknown,
                    bootstrap_job_id: None,
                    created_by: actor,
                    created_at: now,
                    updated_at: now,
                };
                t.targets.insert(target.id, target.clone());

                if let Some(nodes) = &spec.nodes {
                    replace_nodes(t, &target, nodes)?;
                }
                Ok(target.id)
            })
            .await?;

        info!(
            trace_id = %ctx.trace_id,
            actor = %ctx.actor,
            "Created {} target {}",
            target_type, target_id
        );
        self.get_target(target_id)
    }

    /// Apply the non-empty fields of `update`
    pub async fn update_target(
        &self,
        ctx: &OpContext,
        target_id: i64,
        update: TargetUpdate,
    ) -> Result<TargetDetail, EngineError> {
        let _guard = self.in_flight.acquire(vec![target_key(target_id)])?;
        self.store
            .transaction(move |t| {
                let mut target = find_target(t, target_id)?.clone();

                if let Some(name) = non_empty(update.name) {
                    ensure_unique_name(t, &name, Some(target_id))?;
                    target.name = name;
                }
                if let Some(project_id) = update.project_id.filter(|id| *id > 0) {
                    target.project_id = Some(project_id);
                }
                if let Some(team_id) = update.team_id.filter(|id| *id > 0) {
                    target.team_id = Some(team_id);
                }
                if let Some(cluster_id) = update.cluster_id.filter(|id| *id > 0) {
                    ensure_cluster(t, cluster_id)?;
                    target.cluster_id = Some(cluster_id);
                }
                if let Some(environment) = non_empty(update.environment) {
                    target.environment = environment;
                }
                if let Some(status) = non_empty(update.status) {
                    target.status = status;
                }
                target.updated_at = Utc::now();

                if let Some(nodes) = &update.nodes {
                    replace_nodes(t, &target, nodes)?;
                }
                t.targets.insert(target_id, target);
                Ok(())
            })
            .await?;

        info!(trace_id = %ctx.trace_id, actor = %ctx.actor, "Updated target {}", target_id);
        self.get_target(target_id)
    }

    /// Target with its bindings joined to live host records
    pub fn get_target(&self, target_id: i64) -> Result<TargetDetail, EngineError> {
        self.store.read(|t| {
            let target = find_target(t, target_id)?.clone();
            let nodes = t
                .nodes_of(target_id)
                .into_iter()
                .map(|node| {
                    let host = t.hosts.get(&node.host_id);
                    TargetNodeView {
                        node: node.clone(),
                        host_name: host.map(|h| h.name.clone()).unwrap_or_default(),
                        host_address: host.map(|h| h.address.clone()).unwrap_or_default(),
                        host_status: host.map(|h| h.status.clone()).unwrap_or_default(),
                    }
                })
                .collect();
            Ok(TargetDetail { target, nodes })
        })
    }

    pub fn list_targets(&self, filter: &TargetFilter) -> Vec<DeploymentTarget> {
        let environment = filter.environment.as_deref().filter(|e| !e.is_empty());
        self.store.read(|t| {
            t.targets
                .values()
                .filter(|target| filter.project_id.map_or(true, |p| target.project_id == Some(p)))
                .filter(|target| filter.team_id.map_or(true, |p| target.team_id == Some(p)))
                .filter(|target| filter.target_type.map_or(true, |rt| target.target_type == rt))
                .filter(|target| environment.map_or(true, |e| target.environment == e))
                .cloned()
                .collect()
        })
    }

    /// Delete a target and its bindings together
    pub async fn delete_target(&self, ctx: &OpContext, target_id: i64) -> Result<(), EngineError> {
        let _guard = self.in_flight.acquire(vec![target_key(target_id)])?;
        let removed = self
            .store
            .transaction(|t| {
                find_target(t, target_id)?;
                if let Some(pending) = t.releases.values().find(|r| {
                    r.target_id == target_id && r.status == ReleaseStatus::PendingApproval
                }) {
                    return Err(EngineError::Conflict(format!(
                        "target {} has release {} awaiting approval",
                        target_id, pending.id
                    )));
                }
                let removed = t.delete_nodes_of(target_id);
                t.targets.remove(&target_id);
                Ok(removed)
            })
            .await?;

        info!(
            trace_id = %ctx.trace_id,
            actor = %ctx.actor,
            "Deleted target {} with {} node binding(s)",
            target_id, removed
        );
        Ok(())
    }

    /// Replace every binding of a target, all or nothing
    pub async fn replace_target_nodes(
        &self,
        ctx: &OpContext,
        target_id: i64,
        nodes: Vec<TargetNodeSpec>,
    ) -> Result<Vec<TargetNodeView>, EngineError> {
        let _guard = self.in_flight.acquire(vec![target_key(target_id)])?;
        let count = self
            .store
            .transaction(|t| {
                let target = find_target(t, target_id)?.clone();
                replace_nodes(t, &target, &nodes)
            })
            .await?;

        info!(
            trace_id = %ctx.trace_id,
            actor = %ctx.actor,
            "Bound {} node(s) to target {}",
            count, target_id
        );
        Ok(self.get_target(target_id)?.nodes)
    }

    /// Record that a bootstrap job made the target's runtime ready
    pub async fn mark_runtime_ready(
        &self,
        ctx: &OpContext,
        target_id: i64,
        job_id: i64,
    ) -> Result<(), EngineError> {
        self.store
            .transaction(|t| mark_ready(t, target_id, job_id))
            .await?;
        info!(
            trace_id = %ctx.trace_id,
            "Target {} runtime ready (job {})",
            target_id, job_id
        );
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn find_target(t: &Tables, target_id: i64) -> Result<&DeploymentTarget, EngineError> {
    t.targets
        .get(&target_id)
        .ok_or_else(|| EngineError::NotFound(format!("target {}", target_id)))
}

fn ensure_cluster(t: &Tables, cluster_id: i64) -> Result<(), EngineError> {
    if t.clusters.contains_key(&cluster_id) {
        Ok(())
    } else {
        Err(EngineError::NotFound(format!("cluster {}", cluster_id)))
    }
}

fn ensure_unique_name(t: &Tables, name: &str, except: Option<i64>) -> Result<(), EngineError> {
    let taken = t
        .targets
        .values()
        .any(|target| target.name == name && Some(target.id) != except);
    if taken {
        return Err(EngineError::ValidationError(format!(
            "target {:?} already exists",
            name
        )));
    }
    Ok(())
}

pub(crate) fn mark_ready(t: &mut Tables, target_id: i64, job_id: i64) -> Result<(), EngineError> {
    let target = t
        .targets
        .get_mut(&target_id)
        .ok_or_else(|| EngineError::NotFound(format!("target {}", target_id)))?;
    target.readiness = RuntimeReadiness::Ready;
    target.bootstrap_job_id = Some(job_id);
    target.updated_at = Utc::now();
    Ok(())
}

/// Delete-all then insert; the first rejected node fails the whole call
fn replace_nodes(
    t: &mut Tables,
    target: &DeploymentTarget,
    nodes: &[TargetNodeSpec],
) -> Result<usize, EngineError> {
    let mut seen = HashSet::new();
    for spec in nodes {
        if !seen.insert(spec.host_id) {
            return Err(EngineError::ValidationError(format!(
                "host {} is listed more than once",
                spec.host_id
            )));
        }
        if let Some(weight) = spec.weight {
            if weight <= 0 {
                return Err(EngineError::ValidationError(format!(
                    "node weight must be greater than 0, got {} for host {}",
                    weight, spec.host_id
                )));
            }
        }
        let host = t
            .hosts
            .get(&spec.host_id)
            .ok_or_else(|| EngineError::NotFound(format!("host {}", spec.host_id)))?;
        if target.target_type == RuntimeType::Compose && !host.is_active() {
            return Err(EngineError::ValidationError(format!(
                "host {} ({}) is {}, compose nodes must be active",
                host.id, host.name, host.status
            )));
        }
    }

    t.delete_nodes_of(target.id);
    let now = Utc::now();
    for spec in nodes {
        let node = TargetNode {
            id: t.next_id(names::TARGET_NODES),
            target_id: target.id,
            host_id: spec.host_id,
            role: spec
                .role
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or(DEFAULT_NODE_ROLE)
                .to_string(),
            weight: spec.weight.unwrap_or(DEFAULT_NODE_WEIGHT),
            status: TARGET_STATUS_ACTIVE.to_string(),
            created_at: now,
        };
        t.target_nodes.insert(node.id, node);
    }
    Ok(nodes.len())
}
