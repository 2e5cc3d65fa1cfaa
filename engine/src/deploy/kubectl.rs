//! Cluster access through the `kubectl` binary
//!
//! Each call writes the connection's kubeconfig to a private scratch file,
//! runs one kubectl command against it and removes the file again.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::deploy::cluster::{ClusterApplier, ConnectivityProbe, ManifestDocument, ServerIdentity};
use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::storage::settings::KubectlSettings;
use crate::vault::connection::ClusterConnection;

/// kubectl-backed cluster client
pub struct KubectlClient {
    settings: KubectlSettings,
}

#[derive(Deserialize)]
struct VersionOutput {
    #[serde(rename = "serverVersion")]
    server_version: Option<ServerVersion>,
}

#[derive(Deserialize)]
struct ServerVersion {
    #[serde(rename = "gitVersion")]
    git_version: String,
    #[serde(default)]
    platform: Option<String>,
}

impl KubectlClient {
    pub fn new(settings: KubectlSettings) -> Self {
        Self { settings }
    }

    async fn write_kubeconfig(&self, connection: &ClusterConnection) -> Result<File, EngineError> {
        let scratch = Dir::new(&self.settings.scratch_dir);
        scratch.create().await?;
        let file = scratch.file(&format!("kubeconfig-{}.yaml", crate::utils::generate_uuid()));
        let kubeconfig = connection.render_kubeconfig()?;
        file.write_private(kubeconfig.expose_secret().as_bytes()).await?;
        Ok(file)
    }

    async fn run(
        &self,
        kubeconfig: &File,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<std::process::Output, EngineError> {
        let mut cmd = Command::new(&self.settings.binary);
        cmd.arg("--kubeconfig")
            .arg(kubeconfig.path())
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::ApplyError(format!("failed to run kubectl: {}", e)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            drop(pipe);
        }

        let timeout = Duration::from_secs(self.settings.timeout_secs);
        tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                EngineError::ApplyError(format!("kubectl timed out after {}s", timeout.as_secs()))
            })?
            .map_err(EngineError::from)
    }

    /// Run with a scratch kubeconfig that is removed whatever the outcome
    async fn run_with_connection(
        &self,
        connection: &ClusterConnection,
        args: Vec<String>,
        stdin: Option<&str>,
    ) -> Result<std::process::Output, EngineError> {
        let kubeconfig = self.write_kubeconfig(connection).await?;
        let result = self.run(&kubeconfig, &args, stdin).await;
        if let Err(e) = kubeconfig.delete().await {
            warn!("Failed to remove scratch kubeconfig {:?}: {}", kubeconfig.path(), e);
        }
        result
    }
}

fn stderr_of(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("kubectl exited with {}", output.status)
    } else {
        stderr
    }
}

#[async_trait]
impl ClusterApplier for KubectlClient {
    async fn apply(
        &self,
        connection: &ClusterConnection,
        document: &ManifestDocument,
        namespace: &str,
        field_manager: &str,
    ) -> Result<(), EngineError> {
        debug!("kubectl apply {} into namespace {}", document, namespace);
        let args = vec![
            "apply".to_string(),
            "--server-side".to_string(),
            format!("--field-manager={}", field_manager),
            "--namespace".to_string(),
            namespace.to_string(),
            "-f".to_string(),
            "-".to_string(),
        ];
        let output = self
            .run_with_connection(connection, args, Some(&document.body))
            .await?;
        if !output.status.success() {
            return Err(EngineError::ApplyError(stderr_of(&output)));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectivityProbe for KubectlClient {
    async fn server_identity(
        &self,
        connection: &ClusterConnection,
    ) -> Result<ServerIdentity, EngineError> {
        let args = vec![
            "version".to_string(),
            "--output=json".to_string(),
            format!("--request-timeout={}s", self.settings.timeout_secs),
        ];
        let output = self.run_with_connection(connection, args, None).await?;
        if !output.status.success() {
            return Err(EngineError::RemoteExecError(stderr_of(&output)));
        }

        let version: VersionOutput = serde_json::from_slice(&output.stdout)?;
        let server = version.server_version.ok_or_else(|| {
            EngineError::RemoteExecError("cluster did not report a server version".to_string())
        })?;
        Ok(ServerIdentity {
            git_version: server.git_version,
            platform: server.platform,
        })
    }
}
