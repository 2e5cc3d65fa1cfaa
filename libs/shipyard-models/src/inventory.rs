//! Host and cluster records
//!
//! These rows are owned by the inventory CRUD layer. The engine only reads
//! them, apart from the upserts exposed for that layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host status value that counts as reachable
pub const HOST_STATUS_ACTIVE: &str = "active";

/// An executable machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub name: String,

    /// Address used for remote execution
    pub address: String,

    /// SSH port, falls back to the engine default when absent
    #[serde(default)]
    pub port: Option<u16>,

    /// Login user, falls back to the engine default when absent
    #[serde(default)]
    pub user: Option<String>,

    /// Liveness status, e.g. `active` or `offline`
    pub status: String,
}

impl Host {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case(HOST_STATUS_ACTIVE)
    }
}

/// A cluster the platform knows about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
