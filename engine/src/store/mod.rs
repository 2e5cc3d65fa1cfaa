//! Datastore
//!
//! A typed, in-process store for every table the engine reads and writes.
//! Mutations go through [`Store::transaction`]: the closure works on the
//! live tables under the write lock while each table journals what it
//! touched. On `Ok` only the touched rows are written to disk in one redb
//! transaction; on `Err`, or when that write fails, the journal is undone and
//! readers never see the change.

pub mod disk;
pub mod inventory;
pub mod tables;

use std::path::Path;
use std::sync::RwLock;

use tracing::{debug, error};

use crate::errors::EngineError;

use self::disk::{Backing, Disk};

pub use tables::{names, Tables};

/// Transactional store, durable when opened on a database file
pub struct Store {
    tables: RwLock<Tables>,
    backing: Option<Box<dyn Backing>>,
}

impl Store {
    /// Store that lives in memory only
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            backing: None,
        }
    }

    /// Store backed by a redb database file, loaded when it already exists
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let mut tables = Tables::default();
        let disk = Disk::open(path.as_ref(), &tables)?;
        disk.load(&mut tables)?;
        Ok(Self::with_backing(tables, Box::new(disk)))
    }

    pub(crate) fn with_backing(tables: Tables, backing: Box<dyn Backing>) -> Self {
        Self {
            tables: RwLock::new(tables),
            backing: Some(backing),
        }
    }

    /// Run a query against the committed tables
    pub fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        f(&tables)
    }

    /// Run a mutation atomically
    ///
    /// Nothing the closure does is visible to readers until it returns `Ok`
    /// and the change is on disk.
    pub async fn transaction<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        // a closure that panicked under the lock left its journal behind
        tables.rollback();

        let result = match f(&mut tables) {
            Ok(result) => result,
            Err(e) => {
                tables.rollback();
                return Err(e);
            }
        };

        if let Some(backing) = &self.backing {
            let written = tables.staged().and_then(|changes| {
                if changes.is_empty() {
                    return Ok(());
                }
                backing.write(&changes)
            });
            if let Err(e) = written {
                error!("Failed to commit datastore transaction: {}", e);
                tables.rollback();
                return Err(e);
            }
            debug!("Datastore transaction committed");
        }

        tables.settle();
        Ok(result)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::in_memory()
    }
}
