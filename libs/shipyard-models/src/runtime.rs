//! Runtime kinds a target or bootstrap job can carry

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Runtime backing a deployment target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Container-orchestrator cluster
    K8s,

    /// Plain host group running compose projects
    Compose,
}

impl RuntimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeType::K8s => "k8s",
            RuntimeType::Compose => "compose",
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "k8s" => Ok(RuntimeType::K8s),
            "compose" => Ok(RuntimeType::Compose),
            other => Err(format!("unsupported target type: {:?} (expected k8s or compose)", other)),
        }
    }
}
