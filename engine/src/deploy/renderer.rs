//! Manifest renderer seam

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use shipyard_models::target::DeploymentTarget;

use crate::errors::EngineError;

/// A service manifest as produced by the renderer
///
/// `manifest` is either final or a template with `{{name}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedService {
    pub service_id: i64,
    pub name: String,

    /// Namespace or project scope, `default` when absent
    pub namespace: Option<String>,

    pub revision: Option<String>,
    pub manifest: String,
}

/// Turns a service into a manifest for a target
#[async_trait]
pub trait ManifestRenderer: Send + Sync {
    /// Render `service_id` for `target`; `NotFound` for unknown services
    async fn render(
        &self,
        service_id: i64,
        target: &DeploymentTarget,
    ) -> Result<RenderedService, EngineError>;
}

/// Renderer serving pre-rendered manifests from memory
#[derive(Default)]
pub struct StaticRenderer {
    services: RwLock<HashMap<i64, RenderedService>>,
}

impl StaticRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, service: RenderedService) {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        services.insert(service.service_id, service);
    }

    pub fn remove(&self, service_id: i64) -> Option<RenderedService> {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        services.remove(&service_id)
    }
}

#[async_trait]
impl ManifestRenderer for StaticRenderer {
    async fn render(
        &self,
        service_id: i64,
        _target: &DeploymentTarget,
    ) -> Result<RenderedService, EngineError> {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        services
            .get(&service_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("service {}", service_id)))
    }
}
