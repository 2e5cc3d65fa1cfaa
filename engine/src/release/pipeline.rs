//! Release state transitions and execution

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use shipyard_models::release::{
    ApprovalDecision, Release, ReleaseApproval, ReleaseFilter, ReleasePreview, ReleaseRequest,
    ReleaseStatus, ReleaseStrategy, ReleaseTimelineEvent, TimelineEventKind,
};
use shipyard_models::target::DeploymentTarget;
use shipyard_models::{Finding, RuntimeType};

use crate::context::OpContext;
use crate::deploy::cluster::{split_documents, ClusterApplier, DEFAULT_NAMESPACE};
use crate::deploy::fsm::{ReleaseEvent, ReleaseFsm};
use crate::deploy::renderer::ManifestRenderer;
use crate::errors::EngineError;
use crate::locks::{release_key, InFlight, InFlightGuard};
use crate::registry::find_target;
use crate::release::template::render_template;
use crate::storage::settings::EngineSettings;
use crate::store::{names, Store, Tables};
use crate::vault::CredentialVault;

/// Knobs taken from the engine settings
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Environments gated behind approval, compared case-insensitively
    pub production_environments: Vec<String>,
    pub field_manager: String,
    pub reapply_on_rollback: bool,
}

impl PipelineOptions {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            production_environments: settings.production_environments.clone(),
            field_manager: settings.field_manager.clone(),
            reapply_on_rollback: settings.reapply_on_rollback,
        }
    }

    fn requires_approval(&self, environment: &str) -> bool {
        self.production_environments
            .iter()
            .any(|p| p.trim().eq_ignore_ascii_case(environment.trim()))
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}

/// Manifest resolved against a target, not yet persisted
struct Resolution {
    target: DeploymentTarget,
    namespace: String,
    environment: String,
    revision: Option<String>,
    manifest: String,
    checks: Vec<Finding>,
    warnings: Vec<Finding>,
    approval_required: bool,
}

/// What execution decided for a running release
struct Outcome {
    event: ReleaseEvent,
    diagnostics: Vec<Finding>,
}

impl Outcome {
    fn failed(code: &str, message: String, mut diagnostics: Vec<Finding>) -> Self {
        diagnostics.push(Finding::error(code, message.clone()));
        Self {
            event: ReleaseEvent::Fail(message),
            diagnostics,
        }
    }
}

pub struct ReleasePipeline {
    store: Arc<Store>,
    renderer: Arc<dyn ManifestRenderer>,
    applier: Arc<dyn ClusterApplier>,
    vault: Arc<CredentialVault>,
    in_flight: Arc<InFlight>,
    options: PipelineOptions,
}

impl ReleasePipeline {
    pub fn new(
        store: Arc<Store>,
        renderer: Arc<dyn ManifestRenderer>,
        applier: Arc<dyn ClusterApplier>,
        vault: Arc<CredentialVault>,
        in_flight: Arc<InFlight>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            renderer,
            applier,
            vault,
            in_flight,
            options,
        }
    }

    /// Resolve and check a release without persisting anything
    pub async fn preview_release(&self, request: &ReleaseRequest) -> Result<ReleasePreview, EngineError> {
        let resolution = self.resolve(request).await?;
        Ok(ReleasePreview {
            service_id: request.service_id,
            target_id: request.target_id,
            runtime_type: resolution.target.target_type,
            namespace: resolution.namespace,
            environment: resolution.environment,
            revision: resolution.revision,
            manifest: resolution.manifest,
            checks: resolution.checks,
            warnings: resolution.warnings,
        })
    }

    /// Persist a release and run it, or park it behind the approval gate
    pub async fn apply_release(
        &self,
        ctx: &OpContext,
        request: ReleaseRequest,
    ) -> Result<Release, EngineError> {
        if request.strategy == ReleaseStrategy::Rollback {
            return Err(EngineError::ValidationError(
                "rollback releases are created through rollback, not apply".to_string(),
            ));
        }
        let resolution = self.resolve(&request).await?;
        let _guard = self.lock_pair(request.service_id, request.target_id)?;

        let now = Utc::now();
        let draft = Release {
            id: 0,
            service_id: request.service_id,
            target_id: request.target_id,
            namespace: resolution.namespace,
            runtime_type: resolution.target.target_type,
            strategy: request.strategy,
            revision: resolution.revision,
            status: ReleaseStatus::Created,
            environment: resolution.environment,
            manifest: resolution.manifest,
            variables: request.variables,
            checks: resolution.checks,
            warnings: resolution.warnings,
            diagnostics: Vec::new(),
            rollback_of: None,
            operator: ctx.actor.clone(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        };

        let gated = resolution.approval_required;
        let actor = ctx.actor.clone();
        let release = self
            .store
            .transaction(move |t| {
                let release_id = insert_release(t, draft, &actor)?;
                if gated {
                    let environment = t
                        .releases
                        .get(&release_id)
                        .map(|r| r.environment.clone())
                        .unwrap_or_default();
                    transition(
                        t,
                        release_id,
                        ReleaseEvent::Gate,
                        TimelineEventKind::ApprovalRequired,
                        &actor,
                        format!("environment {} requires approval", environment),
                    )
                } else {
                    transition(
                        t,
                        release_id,
                        ReleaseEvent::Start,
                        TimelineEventKind::StatusChanged,
                        &actor,
                        "release started".to_string(),
                    )
                }
            })
            .await?;

        if gated {
            info!(
                trace_id = %ctx.trace_id,
                actor = %ctx.actor,
                "Release {} for service {} awaits approval in {}",
                release.id, release.service_id, release.environment
            );
            return Ok(release);
        }

        info!(
            trace_id = %ctx.trace_id,
            actor = %ctx.actor,
            "Release {} for service {} on target {} started",
            release.id, release.service_id, release.target_id
        );
        self.execute(ctx, release).await
    }

    /// Approve a gated release and run it
    pub async fn approve_release(
        &self,
        ctx: &OpContext,
        release_id: i64,
        comment: &str,
    ) -> Result<Release, EngineError> {
        let pending = self.get_release(release_id)?;
        let _guard = self.lock_pair(pending.service_id, pending.target_id)?;

        let release = self
            .record_decision(ctx, release_id, ApprovalDecision::Approved, comment)
            .await?;
        info!(
            trace_id = %ctx.trace_id,
            actor = %ctx.actor,
            "Release {} approved",
            release_id
        );
        self.execute(ctx, release).await
    }

    /// Reject a gated release; terminal
    pub async fn reject_release(
        &self,
        ctx: &OpContext,
        release_id: i64,
        comment: &str,
    ) -> Result<Release, EngineError> {
        let release = self
            .record_decision(ctx, release_id, ApprovalDecision::Rejected, comment)
            .await?;
        info!(
            trace_id = %ctx.trace_id,
            actor = %ctx.actor,
            "Release {} rejected",
            release_id
        );
        Ok(release)
    }

    /// New release restoring the manifest of the nearest earlier live release
    /// of the same `(service, target)` pair
    pub async fn rollback_release(&self, ctx: &OpContext, release_id: i64) -> Result<Release, EngineError> {
        let current = self.get_release(release_id)?;
        if !current.status.is_terminal() || current.status == ReleaseStatus::Rejected {
            return Err(EngineError::InvalidTransition(format!(
                "release {} is {} and cannot be rolled back",
                release_id, current.status
            )));
        }

        let source = self
            .store
            .read(|t| {
                t.releases
                    .range(..release_id)
                    .rev()
                    .map(|(_, r)| r)
                    .find(|r| {
                        r.service_id == current.service_id
                            && r.target_id == current.target_id
                            && r.status.is_live()
                    })
                    .cloned()
            })
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "no previous release for service {} on target {}",
                    current.service_id, current.target_id
                ))
            })?;

        let _guard = self.lock_pair(current.service_id, current.target_id)?;
        let reapply = self.options.reapply_on_rollback && source.runtime_type == RuntimeType::K8s;

        let now = Utc::now();
        let draft = Release {
            id: 0,
            strategy: ReleaseStrategy::Rollback,
            status: ReleaseStatus::Created,
            checks: vec![Finding::info(
                "rollback_source",
                format!("restoring manifest of release {}", source.id),
            )],
            warnings: Vec::new(),
            diagnostics: Vec::new(),
            rollback_of: Some(release_id),
            operator: ctx.actor.clone(),
            created_at: now,
            updated_at: now,
            finished_at: None,
            ..source.clone()
        };

        let actor = ctx.actor.clone();
        let source_id = source.id;
        let release = self
            .store
            .transaction(move |t| {
                let new_id = insert_release(t, draft, &actor)?;
                let running = transition(
                    t,
                    new_id,
                    ReleaseEvent::Start,
                    TimelineEventKind::StatusChanged,
                    &actor,
                    format!("rolling back release {}", release_id),
                )?;
                if reapply {
                    return Ok(running);
                }
                transition(
                    t,
                    new_id,
                    ReleaseEvent::Succeed,
                    TimelineEventKind::RolledBack,
                    &actor,
                    format!("restored manifest of release {}", source_id),
                )
            })
            .await?;

        info!(
            trace_id = %ctx.trace_id,
            actor = %ctx.actor,
            "Release {} rolls back {} to the manifest of {} (reapply={})",
            release.id, release_id, source_id, reapply
        );

        if !reapply {
            return Ok(release);
        }

        let release = self.execute(ctx, release).await?;
        let actor = ctx.actor.clone();
        let rolled_back_id = release.id;
        self.store
            .transaction(move |t| {
                push_event(
                    t,
                    rolled_back_id,
                    TimelineEventKind::RolledBack,
                    None,
                    Some(ReleaseStatus::Succeeded),
                    &actor,
                    format!("re-applied manifest of release {}", source_id),
                );
                Ok(())
            })
            .await?;
        Ok(release)
    }

    pub fn get_release(&self, release_id: i64) -> Result<Release, EngineError> {
        self.store
            .read(|t| t.releases.get(&release_id).cloned())
            .ok_or_else(|| EngineError::NotFound(format!("release {}", release_id)))
    }

    /// Releases matching the filter, newest first
    pub fn list_releases(&self, filter: &ReleaseFilter) -> Vec<Release> {
        self.store.read(|t| {
            t.releases
                .values()
                .rev()
                .filter(|r| filter.service_id.map_or(true, |s| r.service_id == s))
                .filter(|r| filter.target_id.map_or(true, |s| r.target_id == s))
                .cloned()
                .collect()
        })
    }

    /// Audit events of a release in creation order
    pub fn list_release_timeline(&self, release_id: i64) -> Result<Vec<ReleaseTimelineEvent>, EngineError> {
        self.store.read(|t| {
            if !t.releases.contains_key(&release_id) {
                return Err(EngineError::NotFound(format!("release {}", release_id)));
            }
            Ok(t.release_timeline
                .values()
                .filter(|e| e.release_id == release_id)
                .cloned()
                .collect())
        })
    }

    pub fn list_release_approvals(&self, release_id: i64) -> Result<Vec<ReleaseApproval>, EngineError> {
        self.store.read(|t| {
            if !t.releases.contains_key(&release_id) {
                return Err(EngineError::NotFound(format!("release {}", release_id)));
            }
            Ok(t.release_approvals
                .values()
                .filter(|a| a.release_id == release_id)
                .cloned()
                .collect())
        })
    }

    fn lock_pair(&self, service_id: i64, target_id: i64) -> Result<InFlightGuard, EngineError> {
        self.in_flight
            .acquire(vec![release_key(service_id, target_id)])
    }

    async fn resolve(&self, request: &ReleaseRequest) -> Result<Resolution, EngineError> {
        let target = self
            .store
            .read(|t| find_target(t, request.target_id).cloned())?;
        let rendered = self.renderer.render(request.service_id, &target).await?;
        let manifest = render_template(&rendered.manifest, &request.variables)?;
        if manifest.trim().is_empty() {
            return Err(EngineError::ValidationError(format!(
                "empty_manifest: service {} rendered an empty manifest",
                request.service_id
            )));
        }

        let environment = request
            .environment
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(&target.environment)
            .to_string();
        let namespace = rendered
            .namespace
            .filter(|ns| !ns.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let mut checks = vec![
            Finding::info(
                "target_resolved",
                format!(
                    "target {} ({}) in environment {}",
                    target.name, target.target_type, environment
                ),
            ),
            Finding::info(
                "manifest_resolved",
                format!(
                    "service {} rendered {} bytes with {} variable(s)",
                    rendered.name,
                    manifest.len(),
                    request.variables.len()
                ),
            ),
        ];
        let mut warnings = Vec::new();

        match target.target_type {
            RuntimeType::Compose => {
                if !has_services_section(&manifest) {
                    warnings.push(Finding::warning(
                        "compose_services_missing",
                        "compose manifest has no services section",
                    ));
                }
            }
            RuntimeType::K8s => {
                let cluster_known = target
                    .cluster_id
                    .is_some_and(|id| self.store.get_cluster(id).is_some());
                if !cluster_known {
                    warnings.push(Finding::warning(
                        "cluster_not_found",
                        format!("cluster {:?} of target {} does not exist", target.cluster_id, target.id),
                    ));
                }
                for document in split_documents(&manifest) {
                    if let Some(parse_error) = &document.parse_error {
                        warnings.push(Finding::warning(
                            "k8s_document_invalid",
                            format!("{}: {}", document, parse_error),
                        ));
                    } else if document.kind.is_none() {
                        warnings.push(Finding::warning(
                            "k8s_kind_missing",
                            format!("{} has no kind", document),
                        ));
                    }
                }
            }
        }

        let approval_required = self.options.requires_approval(&environment);
        if approval_required {
            checks.push(Finding::info(
                "approval_required",
                format!("environment {} requires approval", environment),
            ));
        }

        Ok(Resolution {
            target,
            namespace,
            environment,
            revision: rendered.revision,
            manifest,
            checks,
            warnings,
            approval_required,
        })
    }

    async fn record_decision(
        &self,
        ctx: &OpContext,
        release_id: i64,
        decision: ApprovalDecision,
        comment: &str,
    ) -> Result<Release, EngineError> {
        let actor = ctx.actor.clone();
        let comment = comment.trim().to_string();
        self.store
            .transaction(move |t| {
                let (event, kind) = match decision {
                    ApprovalDecision::Approved => (ReleaseEvent::Approve, TimelineEventKind::Approved),
                    ApprovalDecision::Rejected => (ReleaseEvent::Reject, TimelineEventKind::Rejected),
                };
                let release = transition(t, release_id, event, kind, &actor, comment.clone())?;
                let approval = ReleaseApproval {
                    id: t.next_id(names::RELEASE_APPROVALS),
                    release_id,
                    decision,
                    actor,
                    comment,
                    created_at: Utc::now(),
                };
                t.release_approvals.insert(approval.id, approval);
                Ok(release)
            })
            .await
    }

    /// Run a release that is `running` and finalize it exactly once
    async fn execute(&self, ctx: &OpContext, release: Release) -> Result<Release, EngineError> {
        let outcome = match release.runtime_type {
            RuntimeType::K8s => self.apply_to_cluster(&release).await,
            RuntimeType::Compose => Outcome {
                event: ReleaseEvent::Accept,
                diagnostics: vec![Finding::info(
                    "handed_to_connector",
                    "recorded for the host-group connector",
                )],
            },
        };

        let failure = match &outcome.event {
            ReleaseEvent::Fail(message) => Some(message.clone()),
            _ => None,
        };
        let actor = ctx.actor.clone();
        let release_id = release.id;
        let finalized = self
            .store
            .transaction(move |t| {
                if let Some(row) = t.releases.get_mut(&release_id) {
                    row.diagnostics = outcome.diagnostics;
                }
                let message = match &outcome.event {
                    ReleaseEvent::Fail(message) => message.clone(),
                    ReleaseEvent::Accept => "accepted for the host-group connector".to_string(),
                    _ => "all documents applied".to_string(),
                };
                transition(
                    t,
                    release_id,
                    outcome.event,
                    TimelineEventKind::StatusChanged,
                    &actor,
                    message,
                )
            })
            .await?;

        match failure {
            Some(message) => {
                error!(
                    trace_id = %ctx.trace_id,
                    "Release {} failed: {}",
                    release_id, message
                );
                Err(EngineError::ReleaseFailed {
                    release_id,
                    message,
                })
            }
            None => {
                info!(
                    trace_id = %ctx.trace_id,
                    "Release {} finished as {}",
                    release_id, finalized.status
                );
                Ok(finalized)
            }
        }
    }

    /// Server-side apply every document; stop at the first failure
    async fn apply_to_cluster(&self, release: &Release) -> Outcome {
        let cluster_id = match self
            .store
            .read(|t| t.targets.get(&release.target_id).map(|target| target.cluster_id))
        {
            None => {
                return Outcome::failed(
                    "target_not_found",
                    format!("target {} no longer exists", release.target_id),
                    Vec::new(),
                )
            }
            Some(None) => {
                return Outcome::failed(
                    "cluster_not_found",
                    format!("target {} has no cluster reference", release.target_id),
                    Vec::new(),
                )
            }
            Some(Some(cluster_id)) => cluster_id,
        };
        if self.store.get_cluster(cluster_id).is_none() {
            return Outcome::failed(
                "cluster_not_found",
                format!("cluster {} no longer exists", cluster_id),
                Vec::new(),
            );
        }

        let connection = match self.vault.connection_for_cluster(cluster_id) {
            Ok(connection) => connection,
            Err(e) => {
                return Outcome::failed(
                    "credential_unavailable",
                    format!("no usable credential for cluster {}: {}", cluster_id, e),
                    Vec::new(),
                )
            }
        };

        let mut diagnostics = Vec::new();
        for document in split_documents(&release.manifest) {
            if let Some(parse_error) = &document.parse_error {
                return Outcome::failed(
                    "document_invalid",
                    format!("{}: {}", document, parse_error),
                    diagnostics,
                );
            }
            let namespace = document.effective_namespace(&release.namespace);
            debug!("Applying {} to cluster {} in {}", document, cluster_id, namespace);
            match self
                .applier
                .apply(&connection, &document, namespace, &self.options.field_manager)
                .await
            {
                Ok(()) => diagnostics.push(Finding::info(
                    "document_applied",
                    format!("{} in namespace {}", document, namespace),
                )),
                Err(e) => {
                    warn!("Apply of {} for release {} failed: {}", document, release.id, e);
                    return Outcome::failed(
                        "document_apply_failed",
                        format!("{}: {}", document, e),
                        diagnostics,
                    );
                }
            }
        }

        Outcome {
            event: ReleaseEvent::Succeed,
            diagnostics,
        }
    }
}

fn has_services_section(manifest: &str) -> bool {
    match serde_yaml::from_str::<serde_yaml::Value>(manifest) {
        Ok(serde_yaml::Value::Mapping(map)) => map
            .get("services")
            .is_some_and(|services| !services.is_null()),
        _ => false,
    }
}

/// Insert a fresh row in `created` and its creation event
fn insert_release(t: &mut Tables, mut release: Release, actor: &str) -> Result<i64, EngineError> {
    release.id = t.next_id(names::RELEASES);
    let release_id = release.id;
    t.releases.insert(release_id, release);
    push_event(
        t,
        release_id,
        TimelineEventKind::Created,
        None,
        Some(ReleaseStatus::Created),
        actor,
        "release created".to_string(),
    );
    Ok(release_id)
}

/// Move a row through the FSM and record the change
fn transition(
    t: &mut Tables,
    release_id: i64,
    event: ReleaseEvent,
    kind: TimelineEventKind,
    actor: &str,
    message: String,
) -> Result<Release, EngineError> {
    let release = t
        .releases
        .get_mut(&release_id)
        .ok_or_else(|| EngineError::NotFound(format!("release {}", release_id)))?;

    let from = release.status;
    let mut fsm = ReleaseFsm::resume(from);
    let to = fsm.process(event).map_err(EngineError::InvalidTransition)?;

    let now = Utc::now();
    release.status = to;
    release.updated_at = now;
    if to.is_terminal() {
        release.finished_at = Some(now);
    }
    let snapshot = release.clone();

    push_event(t, release_id, kind, Some(from), Some(to), actor, message);
    Ok(snapshot)
}

fn push_event(
    t: &mut Tables,
    release_id: i64,
    kind: TimelineEventKind,
    from_status: Option<ReleaseStatus>,
    to_status: Option<ReleaseStatus>,
    actor: &str,
    message: String,
) {
    let event = ReleaseTimelineEvent {
        id: t.next_id(names::RELEASE_TIMELINE),
        release_id,
        kind,
        from_status,
        to_status,
        actor: actor.to_string(),
        message,
        created_at: Utc::now(),
    };
    t.release_timeline.insert(event.id, event);
}
