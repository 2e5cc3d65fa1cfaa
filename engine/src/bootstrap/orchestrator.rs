//! Phase runner for bootstrap jobs

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use shipyard_models::bootstrap::{
    BootstrapRequest, BootstrapResult, EnvironmentInstallJob, EnvironmentInstallJobStep, HostRole,
    JobStatus, Phase, StepStatus,
};
use shipyard_models::target::DeploymentTarget;
use shipyard_models::RuntimeType;

use crate::bootstrap::package::{
    render_command, resolve_package, resolve_phase_action, PhaseAction, PhaseEnv, ResolvedPackage,
};
use crate::context::OpContext;
use crate::deploy::remote::{RemoteExecutor, RemoteHost};
use crate::errors::EngineError;
use crate::locks::{host_key, target_key, InFlight};
use crate::registry::{find_target, mark_ready};
use crate::storage::layout::PackageLayout;
use crate::store::{names, Store};
use crate::utils::truncate_output;

/// A host taking part in a job
#[derive(Debug, Clone)]
struct JobHost {
    remote: RemoteHost,
    role: HostRole,
}

/// Host ids a request asks for, before any lookup
struct HostPlan {
    target: Option<DeploymentTarget>,
    ids: Vec<(i64, HostRole)>,
}

pub struct BootstrapOrchestrator {
    store: Arc<Store>,
    executor: Arc<dyn RemoteExecutor>,
    layout: PackageLayout,
    in_flight: Arc<InFlight>,
    output_limit: usize,
    default_environment: String,
}

impl BootstrapOrchestrator {
    pub fn new(
        store: Arc<Store>,
        executor: Arc<dyn RemoteExecutor>,
        layout: PackageLayout,
        in_flight: Arc<InFlight>,
        output_limit: usize,
        default_environment: impl Into<String>,
    ) -> Self {
        Self {
            store,
            executor,
            layout,
            in_flight,
            output_limit,
            default_environment: default_environment.into(),
        }
    }

    /// Run a bootstrap to completion
    ///
    /// Package, checksum and phase actions are checked before a job row
    /// exists. Once the job exists every failure finalizes it `failed` and is
    /// returned as [`EngineError::BootstrapFailed`].
    pub async fn start_environment_bootstrap(
        &self,
        ctx: &OpContext,
        request: BootstrapRequest,
    ) -> Result<EnvironmentInstallJob, EngineError> {
        let version = request.version.trim().to_string();
        if version.is_empty() {
            return Err(EngineError::ValidationError(
                "package version is required".to_string(),
            ));
        }

        let plan = self.plan_hosts(&request)?;

        let mut keys: Vec<String> = plan.ids.iter().map(|(id, _)| host_key(*id)).collect();
        if let Some(target) = &plan.target {
            keys.push(target_key(target.id));
        }
        let _guard = self.in_flight.acquire(keys)?;

        let package = resolve_package(&self.layout, request.runtime_type, &version).await?;
        let mut forward = Vec::with_capacity(Phase::FORWARD.len());
        for phase in Phase::FORWARD {
            let action = resolve_phase_action(&self.layout, &package, phase)
                .await?
                .ok_or_else(|| {
                    EngineError::IntegrityError(format!(
                        "package {} {} declares no {} action",
                        package.runtime, package.version, phase
                    ))
                })?;
            forward.push((phase, action));
        }

        let job = self.create_job(ctx, &request, &plan, &package).await?;
        info!(
            trace_id = %ctx.trace_id,
            actor = %ctx.actor,
            "Bootstrap job {} started: {} {} on {} host(s)",
            job.id, package.runtime, package.version, plan.ids.len()
        );

        let hosts = match self.resolve_hosts(&plan) {
            Ok(hosts) => hosts,
            Err(e) => return Err(self.fail_job(ctx, job.id, e.to_string()).await),
        };
        let control_address = hosts
            .iter()
            .find(|h| h.role == HostRole::Control)
            .map(|h| h.remote.address.clone());

        let run = PhaseRun {
            job_id: job.id,
            package: &package,
            control_address: control_address.as_deref(),
        };

        for (phase, action) in &forward {
            let Err(failure) = self.run_phase(ctx, &run, *phase, action, &hosts).await else {
                continue;
            };

            let message = if phase.rolls_back_on_failure() {
                match self.rollback(ctx, &run, &hosts).await {
                    Ok(()) => format!("{}; rollback completed", failure),
                    Err(rollback) => format!("{}; {}", failure, rollback),
                }
            } else {
                failure
            };
            return Err(self.fail_job(ctx, job.id, message).await);
        }

        let result = BootstrapResult {
            host_count: hosts.len(),
            manifest_path: package.manifest_path.display().to_string(),
        };
        let target_id = plan.target.as_ref().map(|t| t.id);
        let job_id = job.id;
        let finalized = self
            .store
            .transaction(move |t| {
                if let Some(target_id) = target_id {
                    mark_ready(t, target_id, job_id)?;
                }
                let job = t
                    .install_jobs
                    .get_mut(&job_id)
                    .ok_or_else(|| EngineError::NotFound(format!("bootstrap job {}", job_id)))?;
                job.status = JobStatus::Succeeded;
                job.result = Some(result);
                job.finished_at = Some(Utc::now());
                Ok(job.clone())
            })
            .await;
        // the job row must never stay running once the phases are done
        let job = match finalized {
            Ok(job) => job,
            Err(e) => {
                let message = format!(
                    "every phase passed but the job could not be finalized: {}",
                    e
                );
                return Err(self.fail_job(ctx, job_id, message).await);
            }
        };

        info!(
            trace_id = %ctx.trace_id,
            "Bootstrap job {} succeeded on {} host(s)",
            job.id, hosts.len()
        );
        Ok(job)
    }

    pub fn get_environment_bootstrap_job(&self, job_id: i64) -> Result<EnvironmentInstallJob, EngineError> {
        self.store
            .read(|t| t.install_jobs.get(&job_id).cloned())
            .ok_or_else(|| EngineError::NotFound(format!("bootstrap job {}", job_id)))
    }

    /// Jobs, newest first, optionally for one target
    pub fn list_environment_bootstrap_jobs(&self, target_id: Option<i64>) -> Vec<EnvironmentInstallJob> {
        self.store.read(|t| {
            t.install_jobs
                .values()
                .rev()
                .filter(|job| target_id.map_or(true, |id| job.target_id == Some(id)))
                .cloned()
                .collect()
        })
    }

    /// Steps of a job in execution order
    pub fn list_environment_bootstrap_job_steps(
        &self,
        job_id: i64,
    ) -> Result<Vec<EnvironmentInstallJobStep>, EngineError> {
        self.store.read(|t| {
            if !t.install_jobs.contains_key(&job_id) {
                return Err(EngineError::NotFound(format!("bootstrap job {}", job_id)));
            }
            Ok(t.install_job_steps
                .values()
                .filter(|s| s.job_id == job_id)
                .cloned()
                .collect())
        })
    }

    /// Work out which host ids the job touches and in which role
    fn plan_hosts(&self, request: &BootstrapRequest) -> Result<HostPlan, EngineError> {
        let target = match request.target_id {
            Some(target_id) => Some(self.store.read(|t| find_target(t, target_id).cloned())?),
            None => None,
        };
        if let Some(target) = &target {
            if target.target_type != request.runtime_type {
                return Err(EngineError::ValidationError(format!(
                    "target {} is {}, cannot bootstrap {}",
                    target.id, target.target_type, request.runtime_type
                )));
            }
        }

        let ids = match request.runtime_type {
            RuntimeType::K8s => {
                let control = request.control_host_id.ok_or_else(|| {
                    EngineError::ValidationError(
                        "k8s bootstrap requires a control-plane host".to_string(),
                    )
                })?;
                let mut seen = HashSet::from([control]);
                let mut ids = vec![(control, HostRole::Control)];
                for worker in &request.worker_host_ids {
                    if !seen.insert(*worker) {
                        return Err(EngineError::ValidationError(format!(
                            "host {} is listed more than once",
                            worker
                        )));
                    }
                    ids.push((*worker, HostRole::Worker));
                }
                ids
            }
            RuntimeType::Compose => {
                let host_ids: Vec<i64> = if request.host_ids.is_empty() {
                    match &target {
                        Some(target) => self.store.read(|t| {
                            t.nodes_of(target.id).iter().map(|n| n.host_id).collect()
                        }),
                        None => Vec::new(),
                    }
                } else {
                    request.host_ids.clone()
                };
                if host_ids.is_empty() {
                    return Err(EngineError::ValidationError(
                        "compose bootstrap requires at least one host".to_string(),
                    ));
                }
                let mut seen = HashSet::new();
                for id in &host_ids {
                    if !seen.insert(*id) {
                        return Err(EngineError::ValidationError(format!(
                            "host {} is listed more than once",
                            id
                        )));
                    }
                }
                host_ids.into_iter().map(|id| (id, HostRole::Member)).collect()
            }
        };

        Ok(HostPlan { target, ids })
    }

    fn resolve_hosts(&self, plan: &HostPlan) -> Result<Vec<JobHost>, EngineError> {
        self.store.read(|t| {
            plan.ids
                .iter()
                .map(|(id, role)| {
                    let host = t
                        .hosts
                        .get(id)
                        .ok_or_else(|| EngineError::NotFound(format!("host {}", id)))?;
                    let remote = RemoteHost::from(host);
                    if remote.address.is_empty() {
                        return Err(EngineError::ValidationError(format!(
                            "host {} ({}) has no address",
                            host.id, host.name
                        )));
                    }
                    Ok(JobHost { remote, role: *role })
                })
                .collect()
        })
    }

    async fn create_job(
        &self,
        ctx: &OpContext,
        request: &BootstrapRequest,
        plan: &HostPlan,
        package: &ResolvedPackage,
    ) -> Result<EnvironmentInstallJob, EngineError> {
        let environment = request
            .environment
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .or_else(|| plan.target.as_ref().map(|t| t.environment.clone()))
            .unwrap_or_else(|| self.default_environment.clone());
        let name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-{}-{}", package.runtime, package.version, environment));

        let now = Utc::now();
        let draft = EnvironmentInstallJob {
            id: 0,
            name,
            runtime_type: package.runtime,
            environment,
            target_id: plan.target.as_ref().map(|t| t.id),
            cluster_id: request
                .cluster_id
                .or_else(|| plan.target.as_ref().and_then(|t| t.cluster_id)),
            status: JobStatus::Queued,
            package_version: package.version.clone(),
            package_path: package.dir.path().display().to_string(),
            package_sha256: package.sha256.clone(),
            operator: ctx.actor.clone(),
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        };

        let job_id = self
            .store
            .transaction(move |t| {
                let mut job = draft;
                job.id = t.next_id(names::INSTALL_JOBS);
                let id = job.id;
                t.install_jobs.insert(id, job);
                Ok(id)
            })
            .await?;
        debug!("Bootstrap job {} queued", job_id);

        self.store
            .transaction(move |t| {
                let job = t
                    .install_jobs
                    .get_mut(&job_id)
                    .ok_or_else(|| EngineError::NotFound(format!("bootstrap job {}", job_id)))?;
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
                Ok(job.clone())
            })
            .await
    }

    /// Run one phase host by host; the first failure ends the phase
    async fn run_phase(
        &self,
        ctx: &OpContext,
        run: &PhaseRun<'_>,
        phase: Phase,
        action: &PhaseAction,
        hosts: &[JobHost],
    ) -> Result<(), String> {
        for host in hosts {
            if let Err(e) = self.run_step(ctx, run, phase, action, host).await {
                return Err(format!(
                    "{} failed on host {} ({}): {}",
                    phase, host.remote.host_id, host.remote.name, e
                ));
            }
        }
        Ok(())
    }

    /// Uninstall on every host that had a preflight or install step
    async fn rollback(
        &self,
        ctx: &OpContext,
        run: &PhaseRun<'_>,
        hosts: &[JobHost],
    ) -> Result<(), String> {
        let touched: HashSet<i64> = self.store.read(|t| {
            t.install_job_steps
                .values()
                .filter(|s| s.job_id == run.job_id && s.phase.rolls_back_on_failure())
                .map(|s| s.host_id)
                .collect()
        });

        let action = match resolve_phase_action(&self.layout, run.package, Phase::Rollback).await {
            Ok(Some(action)) => action,
            Ok(None) => {
                warn!(trace_id = %ctx.trace_id, "Job {} has no uninstall action", run.job_id);
                return Err("rollback skipped: package declares no uninstall action".to_string());
            }
            Err(e) => return Err(format!("rollback skipped: {}", e)),
        };

        let hosts: Vec<&JobHost> = hosts
            .iter()
            .filter(|h| touched.contains(&h.remote.host_id))
            .collect();
        let mut errors = Vec::new();
        for host in &hosts {
            if let Err(e) = self.run_step(ctx, run, Phase::Rollback, &action, host).await {
                errors.push(format!("host {} ({}): {}", host.remote.host_id, host.remote.name, e));
            }
        }

        if errors.is_empty() {
            info!(trace_id = %ctx.trace_id, "Job {} rolled back on {} host(s)", run.job_id, hosts.len());
            Ok(())
        } else {
            Err(format!("rollback failed: {}", errors.join("; ")))
        }
    }

    /// Record a step, run it, finalize it once
    async fn run_step(
        &self,
        ctx: &OpContext,
        run: &PhaseRun<'_>,
        phase: Phase,
        action: &PhaseAction,
        host: &JobHost,
    ) -> Result<(), String> {
        let job_id = run.job_id;
        let host_id = host.remote.host_id;
        let step_id = self
            .store
            .transaction(move |t| {
                let step = EnvironmentInstallJobStep {
                    id: t.next_id(names::INSTALL_JOB_STEPS),
                    job_id,
                    phase,
                    host_id,
                    status: StepStatus::Running,
                    output: String::new(),
                    error: None,
                    started_at: Utc::now(),
                    finished_at: None,
                };
                let id = step.id;
                t.install_job_steps.insert(id, step);
                Ok(id)
            })
            .await
            .map_err(|e| e.to_string())?;

        let env = PhaseEnv {
            runtime: run.package.runtime,
            version: &run.package.version,
            phase,
            role: host.role,
            control_address: run.control_address,
            package_sha256: run.package.sha256.as_deref(),
        };
        let command = render_command(action, &env);
        debug!(
            trace_id = %ctx.trace_id,
            "Job {} {} on {} ({})",
            job_id, phase, host.remote.name, host.remote.address
        );

        let (output, failure) = match self.executor.run(&host.remote, &command).await {
            Ok(out) if out.success() => (out.output, None),
            Ok(out) => {
                let code = out
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                let message = format!("exit status {}", code);
                (out.output, Some(message))
            }
            Err(e) => (String::new(), Some(e.to_string())),
        };

        let limit = self.output_limit;
        let output = truncate_output(&output, limit);
        let error = failure.as_deref().map(|e| truncate_output(e, limit));
        self.store
            .transaction(move |t| {
                let step = t
                    .install_job_steps
                    .get_mut(&step_id)
                    .ok_or_else(|| EngineError::NotFound(format!("bootstrap step {}", step_id)))?;
                step.status = if error.is_some() {
                    StepStatus::Failed
                } else {
                    StepStatus::Succeeded
                };
                step.output = output;
                step.error = error;
                step.finished_at = Some(Utc::now());
                Ok(())
            })
            .await
            .map_err(|e| e.to_string())?;

        match failure {
            Some(message) => {
                warn!(
                    trace_id = %ctx.trace_id,
                    "Job {} {} failed on {}: {}",
                    job_id, phase, host.remote.name, message
                );
                Err(message)
            }
            None => Ok(()),
        }
    }

    /// Finalize a job `failed` and build the error returned to the caller
    async fn fail_job(&self, ctx: &OpContext, job_id: i64, message: String) -> EngineError {
        error!(trace_id = %ctx.trace_id, "Bootstrap job {} failed: {}", job_id, message);
        let recorded = message.clone();
        let finalized = self
            .store
            .transaction(move |t| {
                let job = t
                    .install_jobs
                    .get_mut(&job_id)
                    .ok_or_else(|| EngineError::NotFound(format!("bootstrap job {}", job_id)))?;
                job.status = JobStatus::Failed;
                job.error = Some(recorded);
                job.finished_at = Some(Utc::now());
                Ok(())
            })
            .await;
        if let Err(e) = finalized {
            error!("Could not finalize bootstrap job {}: {}", job_id, e);
        }
        EngineError::BootstrapFailed { job_id, message }
    }
}

/// Values shared by every step of one job
struct PhaseRun<'a> {
    job_id: i64,
    package: &'a ResolvedPackage,
    control_address: Option<&'a str>,
}
