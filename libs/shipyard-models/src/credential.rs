//! Cluster credential models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime::RuntimeType;

/// Who manages the cluster behind a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    PlatformManaged,
    ExternalManaged,
}

/// How the material authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Kubeconfig,
    Certificate,
}

/// Result of the last connectivity test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    #[default]
    Untested,
    Connected,
    Failed,
}

/// Plaintext connection material as supplied by a caller
///
/// Either `kubeconfig` alone, or `ca_cert` + `client_cert` + `client_key`
/// with an optional bearer `token`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialMaterial {
    #[serde(default)]
    pub kubeconfig: Option<String>,

    #[serde(default)]
    pub ca_cert: Option<String>,

    #[serde(default)]
    pub client_cert: Option<String>,

    #[serde(default)]
    pub client_key: Option<String>,

    #[serde(default)]
    pub token: Option<String>,
}

impl std::fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialMaterial")
            .field("kubeconfig", &self.kubeconfig.as_ref().map(|_| "[REDACTED]"))
            .field("ca_cert", &self.ca_cert.as_ref().map(|_| "[REDACTED]"))
            .field("client_cert", &self.client_cert.as_ref().map(|_| "[REDACTED]"))
            .field("client_key", &self.client_key.as_ref().map(|_| "[REDACTED]"))
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Register / import request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSpec {
    pub name: String,

    #[serde(default = "default_runtime")]
    pub runtime_type: RuntimeType,

    #[serde(default)]
    pub cluster_id: Option<i64>,

    /// API server endpoint; taken from the kubeconfig when absent
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Inferred from the material when absent
    #[serde(default)]
    pub auth_method: Option<AuthMethod>,

    pub material: CredentialMaterial,
}

fn default_runtime() -> RuntimeType {
    RuntimeType::K8s
}

/// Stored credential row; secret fields hold ciphertext only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCredential {
    pub id: i64,
    pub name: String,
    pub runtime_type: RuntimeType,
    pub source: CredentialSource,
    pub cluster_id: Option<i64>,
    pub endpoint: String,
    pub auth_method: AuthMethod,

    pub kubeconfig_enc: Option<String>,
    pub ca_cert_enc: Option<String>,
    pub client_cert_enc: Option<String>,
    pub client_key_enc: Option<String>,
    pub token_enc: Option<String>,

    pub status: CredentialStatus,
    pub last_test_at: Option<DateTime<Utc>>,
    pub last_test_message: Option<String>,
    pub last_test_latency_ms: Option<u64>,

    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Projection of a credential without any secret field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub id: i64,
    pub name: String,
    pub runtime_type: RuntimeType,
    pub source: CredentialSource,
    pub cluster_id: Option<i64>,
    pub endpoint: String,
    pub auth_method: AuthMethod,
    pub has_token: bool,
    pub status: CredentialStatus,
    pub last_test_at: Option<DateTime<Utc>>,
    pub last_test_message: Option<String>,
    pub last_test_latency_ms: Option<u64>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ClusterCredential> for CredentialSummary {
    fn from(c: &ClusterCredential) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            runtime_type: c.runtime_type,
            source: c.source,
            cluster_id: c.cluster_id,
            endpoint: c.endpoint.clone(),
            auth_method: c.auth_method,
            has_token: c.token_enc.is_some(),
            status: c.status,
            last_test_at: c.last_test_at,
            last_test_message: c.last_test_message.clone(),
            last_test_latency_ms: c.last_test_latency_ms,
            created_by: c.created_by.clone(),
            created_at: c.created_at,
        }
    }
}

/// Connectivity test outcome returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityOutcome {
    pub connected: bool,
    pub message: String,
    pub latency_ms: u64,
}
