//! Engine state
//!
//! Wires the four components over one datastore and one set of in-flight
//! guards.

use std::sync::Arc;

use tracing::{info, warn};

use crate::bootstrap::BootstrapOrchestrator;
use crate::deploy::cluster::{ClusterApplier, ConnectivityProbe};
use crate::deploy::kubectl::KubectlClient;
use crate::deploy::remote::RemoteExecutor;
use crate::deploy::renderer::ManifestRenderer;
use crate::deploy::ssh::SshExecutor;
use crate::errors::EngineError;
use crate::locks::InFlight;
use crate::registry::TargetRegistry;
use crate::release::{PipelineOptions, ReleasePipeline};
use crate::storage::layout::PackageLayout;
use crate::storage::settings::EngineSettings;
use crate::store::Store;
use crate::vault::CredentialVault;

/// External systems the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn ManifestRenderer>,
    pub applier: Arc<dyn ClusterApplier>,
    pub probe: Arc<dyn ConnectivityProbe>,
    pub executor: Arc<dyn RemoteExecutor>,
}

impl Collaborators {
    /// `kubectl` for clusters and `ssh` for hosts
    pub fn process_backed(settings: &EngineSettings, renderer: Arc<dyn ManifestRenderer>) -> Self {
        let kubectl = Arc::new(KubectlClient::new(settings.kubectl.clone()));
        Self {
            renderer,
            applier: kubectl.clone(),
            probe: kubectl,
            executor: Arc::new(SshExecutor::new(settings.ssh.clone())),
        }
    }
}

/// Main engine state
pub struct Engine {
    pub store: Arc<Store>,
    pub in_flight: Arc<InFlight>,
    pub targets: TargetRegistry,
    pub releases: ReleasePipeline,
    pub bootstrap: BootstrapOrchestrator,
    pub vault: Arc<CredentialVault>,
}

impl Engine {
    /// Build the engine over an existing store
    pub fn new(settings: &EngineSettings, store: Arc<Store>, collaborators: Collaborators) -> Self {
        let in_flight = InFlight::new();
        let vault = Arc::new(CredentialVault::new(
            store.clone(),
            settings.vault.clone(),
            collaborators.probe,
        ));

        let targets = TargetRegistry::new(
            store.clone(),
            in_flight.clone(),
            settings.default_environment.clone(),
        );
        let releases = ReleasePipeline::new(
            store.clone(),
            collaborators.renderer,
            collaborators.applier,
            vault.clone(),
            in_flight.clone(),
            PipelineOptions::from_settings(settings),
        );
        let bootstrap = BootstrapOrchestrator::new(
            store.clone(),
            collaborators.executor,
            PackageLayout::new(settings.package_base_dir.clone()),
            in_flight.clone(),
            settings.output_limit,
            settings.default_environment.clone(),
        );

        Self {
            store,
            in_flight,
            targets,
            releases,
            bootstrap,
            vault,
        }
    }

    /// Open the configured datastore and build the engine
    pub async fn init(settings: &EngineSettings, collaborators: Collaborators) -> Result<Self, EngineError> {
        info!("Initializing engine state...");
        let store = match &settings.state_file {
            Some(path) => Store::open(path).await?,
            None => Store::in_memory(),
        };
        Ok(Self::new(settings, Arc::new(store), collaborators))
    }

    /// Every transaction is already on disk; report anything still running
    pub fn shutdown(&self) {
        let busy = self.in_flight.held();
        if !busy.is_empty() {
            warn!("Shutting down with operations in flight: {:?}", busy);
        }
        info!("Shutting down engine state...");
    }
}
