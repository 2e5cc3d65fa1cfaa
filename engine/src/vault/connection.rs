//! Transient, decrypted connection descriptor

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use secrecy::{ExposeSecret, SecretString};

use shipyard_models::credential::AuthMethod;

use crate::errors::EngineError;
use crate::vault::kubeconfig::Kubeconfig;

/// Ready-to-use connection material for one cluster
///
/// Only ever held in memory for the duration of a call; secrets stay wrapped
/// so they never end up in logs or `Debug` output.
#[derive(Debug)]
pub struct ClusterConnection {
    pub credential_id: i64,
    pub endpoint: String,
    pub auth_method: AuthMethod,
    pub(crate) kubeconfig: Option<SecretString>,
    pub(crate) ca_cert: Option<SecretString>,
    pub(crate) client_cert: Option<SecretString>,
    pub(crate) client_key: Option<SecretString>,
    pub(crate) token: Option<SecretString>,
}

impl ClusterConnection {
    /// Connection backed by a complete kubeconfig
    pub fn from_kubeconfig(credential_id: i64, endpoint: &str, kubeconfig: SecretString) -> Self {
        Self {
            credential_id,
            endpoint: endpoint.to_string(),
            auth_method: AuthMethod::Kubeconfig,
            kubeconfig: Some(kubeconfig),
            ca_cert: None,
            client_cert: None,
            client_key: None,
            token: None,
        }
    }

    /// Kubeconfig for this connection, synthesized for certificate material
    pub fn render_kubeconfig(&self) -> Result<SecretString, EngineError> {
        if let Some(kubeconfig) = &self.kubeconfig {
            return Ok(SecretString::from(kubeconfig.expose_secret().to_string()));
        }

        let (Some(ca), Some(cert), Some(key)) = (&self.ca_cert, &self.client_cert, &self.client_key)
        else {
            return Err(EngineError::CryptoError(format!(
                "credential {} has incomplete certificate material",
                self.credential_id
            )));
        };

        let config = Kubeconfig::from_certificates(
            &self.endpoint,
            BASE64.encode(ca.expose_secret()),
            BASE64.encode(cert.expose_secret()),
            BASE64.encode(key.expose_secret()),
            self.token.as_ref().map(|t| t.expose_secret().to_string()),
        );
        let rendered = serde_yaml::to_string(&config)?;
        Ok(SecretString::from(rendered))
    }
}
