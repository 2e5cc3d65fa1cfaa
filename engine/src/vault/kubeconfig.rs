//! Kubeconfig documents
//!
//! Stored kubeconfigs must be self-contained: credentials inline, nothing
//! read from the engine's filesystem and no helper programs run on its
//! behalf.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::errors::EngineError;

const CONTEXT_NAME: &str = "shipyard";

/// Cluster keys that point at local files
const CLUSTER_FILE_KEYS: &[&str] = &["certificate-authority"];

/// User keys that read local files or run programs
const USER_INDIRECT_KEYS: &[&str] = &[
    "client-certificate",
    "client-key",
    "tokenFile",
    "token-file",
    "exec",
    "auth-provider",
];

/// The subset of a kubeconfig the engine validates and renders
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(default, rename = "apiVersion", skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default)]
    pub clusters: Vec<NamedCluster>,

    #[serde(default)]
    pub users: Vec<NamedUser>,

    #[serde(default)]
    pub contexts: Vec<NamedContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    #[serde(default)]
    pub server: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,

    /// TLS and proxy options passed through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: UserEntry,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextEntry {
    #[serde(default)]
    pub cluster: String,

    #[serde(default)]
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Kubeconfig {
    /// Parse and check a kubeconfig document
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let config: Kubeconfig = serde_yaml::from_str(raw)
            .map_err(|e| EngineError::ValidationError(format!("kubeconfig is not valid YAML: {}", e)))?;

        if let Some(kind) = config.kind.as_deref() {
            if kind != "Config" {
                return Err(EngineError::ValidationError(format!(
                    "kubeconfig kind must be Config, got {:?}",
                    kind
                )));
            }
        }
        if config.clusters.is_empty() {
            return Err(EngineError::ValidationError(
                "kubeconfig declares no clusters".to_string(),
            ));
        }
        if let Some(cluster) = config.clusters.iter().find(|c| c.cluster.server.trim().is_empty()) {
            return Err(EngineError::ValidationError(format!(
                "kubeconfig cluster {:?} has no server",
                cluster.name
            )));
        }
        for cluster in &config.clusters {
            if let Some(key) = CLUSTER_FILE_KEYS.iter().find(|k| cluster.cluster.extra.contains_key(**k)) {
                return Err(EngineError::ValidationError(format!(
                    "kubeconfig cluster {:?} uses {}; embed certificate-authority-data instead",
                    cluster.name, key
                )));
            }
        }
        for user in &config.users {
            if let Some(key) = USER_INDIRECT_KEYS.iter().find(|k| user.user.extra.contains_key(**k)) {
                return Err(EngineError::ValidationError(format!(
                    "kubeconfig user {:?} uses {}; only inline certificate data or a token is accepted",
                    user.name, key
                )));
            }
            if let Some(key) = user.user.extra.keys().next() {
                return Err(EngineError::ValidationError(format!(
                    "kubeconfig user {:?} has unsupported field {}",
                    user.name, key
                )));
            }
        }
        if let Some(current) = config.current_context.as_deref().filter(|c| !c.is_empty()) {
            let context = config
                .contexts
                .iter()
                .find(|c| c.name == current)
                .ok_or_else(|| {
                    EngineError::ValidationError(format!(
                        "kubeconfig current-context {:?} is not defined",
                        current
                    ))
                })?;
            if !config.clusters.iter().any(|c| c.name == context.context.cluster) {
                return Err(EngineError::ValidationError(format!(
                    "kubeconfig context {:?} references unknown cluster {:?}",
                    current, context.context.cluster
                )));
            }
        }

        Ok(config)
    }

    /// API server of the current context, or of the first cluster
    pub fn server(&self) -> Option<&str> {
        let from_context = self
            .current_context
            .as_deref()
            .and_then(|current| self.contexts.iter().find(|c| c.name == current))
            .and_then(|ctx| self.clusters.iter().find(|c| c.name == ctx.context.cluster));

        from_context
            .or_else(|| self.clusters.first())
            .map(|c| c.cluster.server.as_str())
    }

    /// Single-context kubeconfig from certificate material (base64 of PEM)
    pub fn from_certificates(
        server: &str,
        ca_data: String,
        client_cert_data: String,
        client_key_data: String,
        token: Option<String>,
    ) -> Self {
        Self {
            api_version: Some("v1".to_string()),
            kind: Some("Config".to_string()),
            clusters: vec![NamedCluster {
                name: CONTEXT_NAME.to_string(),
                cluster: ClusterEntry {
                    server: server.to_string(),
                    certificate_authority_data: Some(ca_data),
                    extra: BTreeMap::new(),
                },
            }],
            users: vec![NamedUser {
                name: CONTEXT_NAME.to_string(),
                user: UserEntry {
                    client_certificate_data: Some(client_cert_data),
                    client_key_data: Some(client_key_data),
                    token,
                    extra: BTreeMap::new(),
                },
            }],
            contexts: vec![NamedContext {
                name: CONTEXT_NAME.to_string(),
                context: ContextEntry {
                    cluster: CONTEXT_NAME.to_string(),
                    user: CONTEXT_NAME.to_string(),
                    namespace: None,
                },
            }],
            current_context: Some(CONTEXT_NAME.to_string()),
        }
    }
}
