//! Remote execution seam

use async_trait::async_trait;

use shipyard_models::inventory::Host;

use crate::errors::EngineError;

/// Where to run a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub host_id: i64,
    pub name: String,
    pub address: String,
    pub port: Option<u16>,
    pub user: Option<String>,
}

impl From<&Host> for RemoteHost {
    fn from(host: &Host) -> Self {
        Self {
            host_id: host.id,
            name: host.name.clone(),
            address: host.address.trim().to_string(),
            port: host.port,
            user: host.user.clone(),
        }
    }
}

/// Combined output of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout followed by stderr
    pub output: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs shell commands on hosts
///
/// `Err` means the command could not be run at all; a command that ran and
/// exited non-zero is an `Ok` with a non-zero `exit_code`.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, host: &RemoteHost, command: &str) -> Result<CommandOutput, EngineError>;
}
