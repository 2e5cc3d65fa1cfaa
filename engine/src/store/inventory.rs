//! Host and cluster records written by the inventory layer

use chrono::Utc;
use shipyard_models::inventory::{Cluster, Host};

use crate::errors::EngineError;
use crate::store::{names, Store};

impl Store {
    /// Insert or replace a host; an id of 0 allocates a new one
    pub async fn upsert_host(&self, mut host: Host) -> Result<Host, EngineError> {
        self.transaction(|t| {
            if host.id == 0 {
                host.id = t.next_id(names::HOSTS);
            } else {
                t.reserve_id(names::HOSTS, host.id);
            }
            t.hosts.insert(host.id, host.clone());
            Ok(host)
        })
        .await
    }

    pub async fn delete_host(&self, host_id: i64) -> Result<(), EngineError> {
        self.transaction(|t| {
            t.hosts
                .remove(&host_id)
                .map(|_| ())
                .ok_or_else(|| EngineError::NotFound(format!("host {}", host_id)))
        })
        .await
    }

    pub fn get_host(&self, host_id: i64) -> Option<Host> {
        self.read(|t| t.hosts.get(&host_id).cloned())
    }

    /// Insert a cluster record
    pub async fn create_cluster(&self, name: &str, status: &str) -> Result<Cluster, EngineError> {
        let name = name.to_string();
        let status = status.to_string();
        self.transaction(move |t| {
            let cluster = Cluster {
                id: t.next_id(names::CLUSTERS),
                name,
                status,
                created_at: Utc::now(),
            };
            t.clusters.insert(cluster.id, cluster.clone());
            Ok(cluster)
        })
        .await
    }

    pub async fn delete_cluster(&self, cluster_id: i64) -> Result<(), EngineError> {
        self.transaction(|t| {
            t.clusters
                .remove(&cluster_id)
                .map(|_| ())
                .ok_or_else(|| EngineError::NotFound(format!("cluster {}", cluster_id)))
        })
        .await
    }

    pub fn get_cluster(&self, cluster_id: i64) -> Option<Cluster> {
        self.read(|t| t.clusters.get(&cluster_id).cloned())
    }
}
