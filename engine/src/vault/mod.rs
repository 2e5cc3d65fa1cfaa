//! Credential vault
//!
//! Stores connection material for clusters the engine does not otherwise
//! own. Secret fields are encrypted one by one before they reach the store
//! and are only decrypted into a transient [`ClusterConnection`].

pub mod cipher;
pub mod connection;
pub mod kubeconfig;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use shipyard_models::credential::{
    AuthMethod, ClusterCredential, ConnectivityOutcome, CredentialMaterial, CredentialSource,
    CredentialSpec, CredentialStatus, CredentialSummary,
};
use shipyard_models::RuntimeType;

use crate::context::OpContext;
use crate::deploy::cluster::ConnectivityProbe;
use crate::errors::EngineError;
use crate::storage::settings::VaultSettings;
use crate::store::{names, Store};

use self::cipher::VaultCipher;
use self::connection::ClusterConnection;
use self::kubeconfig::Kubeconfig;

mod fields {
    pub const KUBECONFIG: &str = "kubeconfig";
    pub const CA_CERT: &str = "ca_cert";
    pub const CLIENT_CERT: &str = "client_cert";
    pub const CLIENT_KEY: &str = "client_key";
    pub const TOKEN: &str = "token";
}

/// Material after validation, ready to encrypt
struct ValidatedMaterial {
    auth_method: AuthMethod,
    endpoint: String,
    kubeconfig: Option<String>,
    ca_cert: Option<String>,
    client_cert: Option<String>,
    client_key: Option<String>,
    token: Option<String>,
}

/// Encrypted store of cluster connection material
pub struct CredentialVault {
    store: Arc<Store>,
    settings: VaultSettings,
    probe: Arc<dyn ConnectivityProbe>,
}

impl CredentialVault {
    pub fn new(store: Arc<Store>, settings: VaultSettings, probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            store,
            settings,
            probe,
        }
    }

    fn cipher(&self) -> Result<VaultCipher, EngineError> {
        let key = self.settings.resolve_key()?;
        Ok(VaultCipher::from_secret(&key))
    }

    /// Register material for a cluster the platform manages
    pub async fn register_platform_credential(
        &self,
        ctx: &OpContext,
        spec: CredentialSpec,
    ) -> Result<CredentialSummary, EngineError> {
        self.store_credential(ctx, spec, CredentialSource::PlatformManaged)
            .await
    }

    /// Import material for a cluster managed elsewhere
    pub async fn import_external_credential(
        &self,
        ctx: &OpContext,
        spec: CredentialSpec,
    ) -> Result<CredentialSummary, EngineError> {
        self.store_credential(ctx, spec, CredentialSource::ExternalManaged)
            .await
    }

    async fn store_credential(
        &self,
        ctx: &OpContext,
        spec: CredentialSpec,
        source: CredentialSource,
    ) -> Result<CredentialSummary, EngineError> {
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::ValidationError(
                "credential name is required".to_string(),
            ));
        }
        if source == CredentialSource::PlatformManaged && spec.cluster_id.is_none() {
            return Err(EngineError::ValidationError(
                "platform-managed credentials must reference a cluster".to_string(),
            ));
        }

        let material = validate_material(&spec)?;
        let cipher = self.cipher()?;

        let seal = |field: &str, value: &Option<String>| -> Result<Option<String>, EngineError> {
            value.as_deref().map(|v| cipher.seal(field, v)).transpose()
        };
        let kubeconfig_enc = seal(fields::KUBECONFIG, &material.kubeconfig)?;
        let ca_cert_enc = seal(fields::CA_CERT, &material.ca_cert)?;
        let client_cert_enc = seal(fields::CLIENT_CERT, &material.client_cert)?;
        let client_key_enc = seal(fields::CLIENT_KEY, &material.client_key)?;
        let token_enc = seal(fields::TOKEN, &material.token)?;

        let actor = ctx.actor.clone();
        let runtime_type = spec.runtime_type;
        let cluster_id = spec.cluster_id;
        let credential = self
            .store
            .transaction(move |t| {
                if let Some(cluster_id) = cluster_id {
                    if !t.clusters.contains_key(&cluster_id) {
                        return Err(EngineError::NotFound(format!("cluster {}", cluster_id)));
                    }
                }
                if t.cluster_credentials.values().any(|c| c.name == name) {
                    return Err(EngineError::ValidationError(format!(
                        "credential {:?} already exists",
                        name
                    )));
                }

                let now = Utc::now();
                let credential = ClusterCredential {
                    id: t.next_id(names::CLUSTER_CREDENTIALS),
                    name,
                    runtime_type,
                    source,
                    cluster_id,
                    endpoint: material.endpoint,
                    auth_method: material.auth_method,
                    kubeconfig_enc,
                    ca_cert_enc,
                    client_cert_enc,
                    client_key_enc,
                    token_enc,
                    status: CredentialStatus::Untested,
                    last_test_at: None,
                    last_test_message: None,
                    last_test_latency_ms: None,
                    created_by: actor,
                    created_at: now,
                    updated_at: now,
                };
                t.cluster_credentials.insert(credential.id, credential.clone());
                Ok(credential)
            })
            .await?;

        info!(
            trace_id = %ctx.trace_id,
            actor = %ctx.actor,
            "Stored {:?} credential {} ({})",
            source, credential.id, credential.name
        );
        Ok(CredentialSummary::from(&credential))
    }

    /// Decrypt a credential into a connection descriptor
    pub fn connection(&self, credential_id: i64) -> Result<ClusterConnection, EngineError> {
        let credential = self
            .store
            .read(|t| t.cluster_credentials.get(&credential_id).cloned())
            .ok_or_else(|| EngineError::NotFound(format!("credential {}", credential_id)))?;
        self.decrypt(&credential)
    }

    /// Connection for a cluster, preferring a credential that last tested
    /// connected, then the newest one
    pub fn connection_for_cluster(&self, cluster_id: i64) -> Result<ClusterConnection, EngineError> {
        let credential = self
            .store
            .read(|t| {
                t.cluster_credentials
                    .values()
                    .filter(|c| c.cluster_id == Some(cluster_id))
                    .max_by_key(|c| (c.status == CredentialStatus::Connected, c.id))
                    .cloned()
            })
            .ok_or_else(|| {
                EngineError::NotFound(format!("no credential registered for cluster {}", cluster_id))
            })?;
        self.decrypt(&credential)
    }

    fn decrypt(&self, credential: &ClusterCredential) -> Result<ClusterConnection, EngineError> {
        let cipher = self.cipher()?;
        let open = |field: &str, value: &Option<String>| {
            value.as_deref().map(|v| cipher.open(field, v)).transpose()
        };

        Ok(ClusterConnection {
            credential_id: credential.id,
            endpoint: credential.endpoint.clone(),
            auth_method: credential.auth_method,
            kubeconfig: open(fields::KUBECONFIG, &credential.kubeconfig_enc)?,
            ca_cert: open(fields::CA_CERT, &credential.ca_cert_enc)?,
            client_cert: open(fields::CLIENT_CERT, &credential.client_cert_enc)?,
            client_key: open(fields::CLIENT_KEY, &credential.client_key_enc)?,
            token: open(fields::TOKEN, &credential.token_enc)?,
        })
    }

    /// Probe the cluster behind a credential and record the outcome
    pub async fn test_credential_connectivity(
        &self,
        ctx: &OpContext,
        credential_id: i64,
    ) -> Result<ConnectivityOutcome, EngineError> {
        let connection = self.connection(credential_id)?;

        let started = Instant::now();
        let probe = self.probe.server_identity(&connection).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        drop(connection);

        let (connected, message) = match probe {
            Ok(identity) => (true, format!("connected to server {}", identity.git_version)),
            Err(e) => {
                warn!(
                    trace_id = %ctx.trace_id,
                    "Connectivity test for credential {} failed: {}",
                    credential_id, e
                );
                (false, e.to_string())
            }
        };

        let outcome = ConnectivityOutcome {
            connected,
            message,
            latency_ms,
        };
        let recorded = outcome.clone();
        self.store
            .transaction(move |t| {
                let credential = t
                    .cluster_credentials
                    .get_mut(&credential_id)
                    .ok_or_else(|| EngineError::NotFound(format!("credential {}", credential_id)))?;
                let now = Utc::now();
                credential.status = if recorded.connected {
                    CredentialStatus::Connected
                } else {
                    CredentialStatus::Failed
                };
                credential.last_test_at = Some(now);
                credential.last_test_message = Some(recorded.message);
                credential.last_test_latency_ms = Some(recorded.latency_ms);
                credential.updated_at = now;
                Ok(())
            })
            .await?;

        info!(
            trace_id = %ctx.trace_id,
            actor = %ctx.actor,
            "Credential {} connectivity: connected={} latency={}ms",
            credential_id, outcome.connected, outcome.latency_ms
        );
        Ok(outcome)
    }

    /// Secret-free listing, optionally narrowed to one runtime
    pub fn list_credentials(&self, runtime_type: Option<RuntimeType>) -> Vec<CredentialSummary> {
        self.store.read(|t| {
            t.cluster_credentials
                .values()
                .filter(|c| runtime_type.map_or(true, |rt| c.runtime_type == rt))
                .map(CredentialSummary::from)
                .collect()
        })
    }

    pub fn get_credential(&self, credential_id: i64) -> Result<CredentialSummary, EngineError> {
        self.store
            .read(|t| t.cluster_credentials.get(&credential_id).map(CredentialSummary::from))
            .ok_or_else(|| EngineError::NotFound(format!("credential {}", credential_id)))
    }

    pub async fn delete_credential(&self, ctx: &OpContext, credential_id: i64) -> Result<(), EngineError> {
        self.store
            .transaction(|t| {
                t.cluster_credentials
                    .remove(&credential_id)
                    .map(|_| ())
                    .ok_or_else(|| EngineError::NotFound(format!("credential {}", credential_id)))
            })
            .await?;
        info!(trace_id = %ctx.trace_id, actor = %ctx.actor, "Deleted credential {}", credential_id);
        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn looks_like_pem(value: &str) -> bool {
    value.contains("-----BEGIN ") && value.contains("-----END ")
}

/// Check the material is exactly one complete, consistent form
fn validate_material(spec: &CredentialSpec) -> Result<ValidatedMaterial, EngineError> {
    let CredentialMaterial {
        kubeconfig,
        ca_cert,
        client_cert,
        client_key,
        token,
    } = &spec.material;
    let kubeconfig = non_empty(kubeconfig);
    let ca_cert = non_empty(ca_cert);
    let client_cert = non_empty(client_cert);
    let client_key = non_empty(client_key);
    let token = non_empty(token);
    let endpoint = non_empty(&spec.endpoint);

    let has_cert_parts =
        ca_cert.is_some() || client_cert.is_some() || client_key.is_some() || token.is_some();

    match (kubeconfig, has_cert_parts) {
        (Some(_), true) => Err(EngineError::ValidationError(
            "supply either a kubeconfig or certificate material, not both".to_string(),
        )),
        (None, false) => Err(EngineError::ValidationError(
            "credential material is empty".to_string(),
        )),
        (Some(raw), false) => {
            if spec.auth_method == Some(AuthMethod::Certificate) {
                return Err(EngineError::ValidationError(
                    "auth method certificate does not match kubeconfig material".to_string(),
                ));
            }
            let config = Kubeconfig::parse(&raw)?;
            let endpoint = endpoint
                .or_else(|| config.server().map(str::to_string))
                .ok_or_else(|| {
                    EngineError::ValidationError("kubeconfig has no server endpoint".to_string())
                })?;
            Ok(ValidatedMaterial {
                auth_method: AuthMethod::Kubeconfig,
                endpoint,
                kubeconfig: Some(raw),
                ca_cert: None,
                client_cert: None,
                client_key: None,
                token: None,
            })
        }
        (None, true) => {
            if spec.auth_method == Some(AuthMethod::Kubeconfig) {
                return Err(EngineError::ValidationError(
                    "auth method kubeconfig requires a kubeconfig payload".to_string(),
                ));
            }
            let (Some(endpoint), Some(ca_cert), Some(client_cert), Some(client_key)) =
                (endpoint, ca_cert, client_cert, client_key)
            else {
                return Err(EngineError::ValidationError(
                    "certificate credentials need endpoint, CA, client certificate and client key together"
                        .to_string(),
                ));
            };
            if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
                return Err(EngineError::ValidationError(format!(
                    "endpoint must be an http(s) URL, got {:?}",
                    endpoint
                )));
            }
            for (label, value) in [
                ("CA certificate", &ca_cert),
                ("client certificate", &client_cert),
                ("client key", &client_key),
            ] {
                if !looks_like_pem(value) {
                    return Err(EngineError::ValidationError(format!(
                        "{} is not PEM encoded",
                        label
                    )));
                }
            }
            Ok(ValidatedMaterial {
                auth_method: AuthMethod::Certificate,
                endpoint,
                kubeconfig: None,
                ca_cert: Some(ca_cert),
                client_cert: Some(client_cert),
                client_key: Some(client_key),
                token,
            })
        }
    }
}
