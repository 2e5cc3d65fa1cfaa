//! Logical tables
//!
//! Each [`Table`] keeps its rows in memory and journals the prior value of
//! every row a transaction touches. The journal is what gets undone on
//! failure and what gets written to disk on commit.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeBounds;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

use shipyard_models::bootstrap::{EnvironmentInstallJob, EnvironmentInstallJobStep};
use shipyard_models::credential::ClusterCredential;
use shipyard_models::inventory::{Cluster, Host};
use shipyard_models::release::{Release, ReleaseApproval, ReleaseTimelineEvent};
use shipyard_models::target::{DeploymentTarget, TargetNode};

use crate::errors::EngineError;

/// Table names, also used as id sequence keys
pub mod names {
    pub const HOSTS: &str = "hosts";
    pub const CLUSTERS: &str = "clusters";
    pub const TARGETS: &str = "deployment_targets";
    pub const TARGET_NODES: &str = "deployment_target_nodes";
    pub const RELEASES: &str = "deployment_releases";
    pub const RELEASE_TIMELINE: &str = "deployment_release_timeline";
    pub const RELEASE_APPROVALS: &str = "deployment_release_approvals";
    pub const INSTALL_JOBS: &str = "environment_install_jobs";
    pub const INSTALL_JOB_STEPS: &str = "environment_install_job_steps";
    pub const CLUSTER_CREDENTIALS: &str = "cluster_credentials";
}

/// Rows of one table touched by a transaction; `None` means deleted
#[derive(Debug)]
pub struct TableChanges {
    pub table: &'static str,
    pub rows: Vec<(i64, Option<Vec<u8>>)>,
}

/// Everything one committed transaction wrote
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub sequences: Vec<(String, i64)>,
    pub tables: Vec<TableChanges>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty() && self.tables.is_empty()
    }
}

/// Rows keyed by id, with a per-transaction undo journal
pub struct Table<T> {
    name: &'static str,
    rows: BTreeMap<i64, T>,
    undo: BTreeMap<i64, Option<T>>,
}

impl<T: Clone> Table<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: BTreeMap::new(),
            undo: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: &i64) -> Option<&T> {
        self.rows.get(id)
    }

    pub fn contains_key(&self, id: &i64) -> bool {
        self.rows.contains_key(id)
    }

    pub fn values(&self) -> btree_map::Values<'_, i64, T> {
        self.rows.values()
    }

    pub fn range<R: RangeBounds<i64>>(&self, range: R) -> btree_map::Range<'_, i64, T> {
        self.rows.range(range)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Remember the committed value of `id` before its first change
    fn touch(&mut self, id: i64) {
        if !self.undo.contains_key(&id) {
            let before = self.rows.get(&id).cloned();
            self.undo.insert(id, before);
        }
    }

    pub fn get_mut(&mut self, id: &i64) -> Option<&mut T> {
        if self.rows.contains_key(id) {
            self.touch(*id);
        }
        self.rows.get_mut(id)
    }

    pub fn insert(&mut self, id: i64, row: T) -> Option<T> {
        self.touch(id);
        self.rows.insert(id, row)
    }

    pub fn remove(&mut self, id: &i64) -> Option<T> {
        if self.rows.contains_key(id) {
            self.touch(*id);
        }
        self.rows.remove(id)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&i64, &T) -> bool) {
        let doomed: Vec<i64> = self
            .rows
            .iter()
            .filter(|(id, row)| !keep(id, row))
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            self.remove(&id);
        }
    }
}

impl<T: Serialize> Serialize for Table<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.rows.serialize(serializer)
    }
}

impl<T: fmt::Debug> fmt::Debug for Table<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("rows", &self.rows.len())
            .field("pending", &self.undo.len())
            .finish()
    }
}

/// Journal operations shared by every table regardless of row type
pub trait Journaled {
    fn name(&self) -> &'static str;

    /// Restore every touched row to its committed value
    fn rollback(&mut self);

    /// Serialized current value of every touched row
    fn staged(&self) -> Result<Option<TableChanges>, EngineError>;

    /// Accept the touched rows as committed
    fn settle(&mut self);

    /// Insert a row read back from disk, bypassing the journal
    fn load_row(&mut self, id: i64, bytes: &[u8]) -> Result<(), EngineError>;
}

impl<T: Clone + Serialize + DeserializeOwned> Journaled for Table<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn rollback(&mut self) {
        for (id, before) in std::mem::take(&mut self.undo) {
            match before {
                Some(row) => {
                    self.rows.insert(id, row);
                }
                None => {
                    self.rows.remove(&id);
                }
            }
        }
    }

    fn staged(&self) -> Result<Option<TableChanges>, EngineError> {
        if self.undo.is_empty() {
            return Ok(None);
        }
        let rows = self
            .undo
            .keys()
            .map(|id| -> Result<(i64, Option<Vec<u8>>), EngineError> {
                let value = self.rows.get(id).map(serde_json::to_vec).transpose()?;
                Ok((*id, value))
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok(Some(TableChanges {
            table: self.name,
            rows,
        }))
    }

    fn settle(&mut self) {
        self.undo.clear();
    }

    fn load_row(&mut self, id: i64, bytes: &[u8]) -> Result<(), EngineError> {
        let row = serde_json::from_slice(bytes).map_err(|e| {
            EngineError::StorageError(format!("corrupt row {} in {}: {}", id, self.name, e))
        })?;
        self.rows.insert(id, row);
        Ok(())
    }
}

/// Every row the engine owns or reads, keyed by id
#[derive(Debug, Serialize)]
pub struct Tables {
    /// Last id handed out per table
    sequences: BTreeMap<String, i64>,

    #[serde(skip)]
    sequences_committed: BTreeMap<String, i64>,

    pub hosts: Table<Host>,
    pub clusters: Table<Cluster>,
    pub targets: Table<DeploymentTarget>,
    pub target_nodes: Table<TargetNode>,
    pub releases: Table<Release>,
    pub release_timeline: Table<ReleaseTimelineEvent>,
    pub release_approvals: Table<ReleaseApproval>,
    pub install_jobs: Table<EnvironmentInstallJob>,
    pub install_job_steps: Table<EnvironmentInstallJobStep>,
    pub cluster_credentials: Table<ClusterCredential>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            sequences: BTreeMap::new(),
            sequences_committed: BTreeMap::new(),
            hosts: Table::new(names::HOSTS),
            clusters: Table::new(names::CLUSTERS),
            targets: Table::new(names::TARGETS),
            target_nodes: Table::new(names::TARGET_NODES),
            releases: Table::new(names::RELEASES),
            release_timeline: Table::new(names::RELEASE_TIMELINE),
            release_approvals: Table::new(names::RELEASE_APPROVALS),
            install_jobs: Table::new(names::INSTALL_JOBS),
            install_job_steps: Table::new(names::INSTALL_JOB_STEPS),
            cluster_credentials: Table::new(names::CLUSTER_CREDENTIALS),
        }
    }
}

impl Tables {
    /// Allocate the next id of a table
    pub fn next_id(&mut self, table: &str) -> i64 {
        let seq = self.sequences.entry(table.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }

    /// Keep the sequence of a table at or above an id assigned elsewhere
    pub fn reserve_id(&mut self, table: &str, id: i64) {
        let seq = self.sequences.entry(table.to_string()).or_insert(0);
        *seq = (*seq).max(id);
    }

    /// Last id handed out for a table
    pub fn last_id(&self, table: &str) -> Option<i64> {
        self.sequences.get(table).copied()
    }

    /// Node bindings of a target, in insertion order
    pub fn nodes_of(&self, target_id: i64) -> Vec<&TargetNode> {
        self.target_nodes
            .values()
            .filter(|n| n.target_id == target_id)
            .collect()
    }

    /// Drop every binding of a target
    pub fn delete_nodes_of(&mut self, target_id: i64) -> usize {
        let before = self.target_nodes.len();
        self.target_nodes.retain(|_, n| n.target_id != target_id);
        before - self.target_nodes.len()
    }

    pub(crate) fn journaled(&self) -> [&dyn Journaled; 10] {
        [
            &self.hosts,
            &self.clusters,
            &self.targets,
            &self.target_nodes,
            &self.releases,
            &self.release_timeline,
            &self.release_approvals,
            &self.install_jobs,
            &self.install_job_steps,
            &self.cluster_credentials,
        ]
    }

    pub(crate) fn journaled_mut(&mut self) -> [&mut dyn Journaled; 10] {
        [
            &mut self.hosts,
            &mut self.clusters,
            &mut self.targets,
            &mut self.target_nodes,
            &mut self.releases,
            &mut self.release_timeline,
            &mut self.release_approvals,
            &mut self.install_jobs,
            &mut self.install_job_steps,
            &mut self.cluster_credentials,
        ]
    }

    /// Undo whatever the open transaction changed
    pub(crate) fn rollback(&mut self) {
        self.sequences = self.sequences_committed.clone();
        for table in self.journaled_mut() {
            table.rollback();
        }
    }

    /// Rows and sequences changed since the last commit
    pub(crate) fn staged(&self) -> Result<ChangeSet, EngineError> {
        let sequences = self
            .sequences
            .iter()
            .filter(|(name, value)| self.sequences_committed.get(*name) != Some(*value))
            .map(|(name, value)| (name.clone(), *value))
            .collect();
        let tables = self
            .journaled()
            .into_iter()
            .filter_map(|table| table.staged().transpose())
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok(ChangeSet { sequences, tables })
    }

    /// Accept the open transaction as committed
    pub(crate) fn settle(&mut self) {
        self.sequences_committed = self.sequences.clone();
        for table in self.journaled_mut() {
            table.settle();
        }
    }

    /// Record a sequence read back from disk
    pub(crate) fn load_sequence(&mut self, table: &str, value: i64) {
        self.sequences.insert(table.to_string(), value);
        self.sequences_committed.insert(table.to_string(), value);
    }
}
