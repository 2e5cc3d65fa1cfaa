//! Remote execution over the system `ssh` client

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::deploy::remote::{CommandOutput, RemoteExecutor, RemoteHost};
use crate::errors::EngineError;
use crate::storage::settings::SshSettings;

/// Runs commands through `ssh` in batch mode
pub struct SshExecutor {
    settings: SshSettings,
}

impl SshExecutor {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    fn command_for(&self, host: &RemoteHost, remote_command: &str) -> Command {
        let user = host
            .user
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(&self.settings.user);
        let port = host.port.unwrap_or(self.settings.port);

        let mut cmd = Command::new(&self.settings.binary);
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.settings.connect_timeout_secs))
            .arg("-p")
            .arg(port.to_string())
            .arg(format!("{}@{}", user, host.address))
            .arg("--")
            .arg(remote_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &RemoteHost, command: &str) -> Result<CommandOutput, EngineError> {
        if host.address.is_empty() {
            return Err(EngineError::ValidationError(format!(
                "host {} has no address",
                host.host_id
            )));
        }

        debug!("Running remote command on {} ({})", host.name, host.address);
        let timeout = Duration::from_secs(self.settings.command_timeout_secs);
        let output = tokio::time::timeout(timeout, self.command_for(host, command).output())
            .await
            .map_err(|_| {
                warn!("Remote command on {} timed out", host.address);
                EngineError::RemoteExecError(format!(
                    "command on {} timed out after {}s",
                    host.address,
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                EngineError::RemoteExecError(format!("failed to run ssh to {}: {}", host.address, e))
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            output: combined,
            exit_code: output.status.code(),
        })
    }
}
