//! On-disk tables
//!
//! One redb table per logical table, keyed by row id with the row stored as
//! JSON, plus a `sequences` table for id allocation.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info};

use crate::errors::EngineError;
use crate::store::tables::{ChangeSet, Tables};

const SEQUENCES: TableDefinition<&str, i64> = TableDefinition::new("sequences");

fn rows(name: &'static str) -> TableDefinition<'static, i64, &'static [u8]> {
    TableDefinition::new(name)
}

fn db_err(err: impl Into<redb::Error>) -> EngineError {
    EngineError::StorageError(err.into().to_string())
}

/// Where committed changes go
pub trait Backing: Send + Sync {
    /// Write one transaction's changes atomically
    fn write(&self, changes: &ChangeSet) -> Result<(), EngineError>;
}

/// redb database file
pub struct Disk {
    db: Database,
}

impl Disk {
    /// Open or create the database and make sure every table exists
    pub fn open(path: &Path, tables: &Tables) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening datastore: {:?}", path);
        let db = Database::create(path).map_err(db_err)?;

        let txn = db.begin_write().map_err(db_err)?;
        {
            txn.open_table(SEQUENCES).map_err(db_err)?;
            for table in tables.journaled() {
                txn.open_table(rows(table.name())).map_err(db_err)?;
            }
        }
        txn.commit().map_err(db_err)?;

        Ok(Self { db })
    }

    /// Read every committed row into `tables`
    pub fn load(&self, tables: &mut Tables) -> Result<(), EngineError> {
        let txn = self.db.begin_read().map_err(db_err)?;

        let sequences = txn.open_table(SEQUENCES).map_err(db_err)?;
        for entry in sequences.iter().map_err(db_err)? {
            let (name, value) = entry.map_err(db_err)?;
            tables.load_sequence(name.value(), value.value());
        }

        for table in tables.journaled_mut() {
            let stored = txn.open_table(rows(table.name())).map_err(db_err)?;
            let mut count = 0usize;
            for entry in stored.iter().map_err(db_err)? {
                let (id, bytes) = entry.map_err(db_err)?;
                table.load_row(id.value(), bytes.value())?;
                count += 1;
            }
            debug!("Loaded {} rows from {}", count, table.name());
        }
        Ok(())
    }
}

impl Backing for Disk {
    fn write(&self, changes: &ChangeSet) -> Result<(), EngineError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut sequences = txn.open_table(SEQUENCES).map_err(db_err)?;
            for (name, value) in &changes.sequences {
                sequences.insert(name.as_str(), *value).map_err(db_err)?;
            }
        }
        for table in &changes.tables {
            let mut stored = txn.open_table(rows(table.table)).map_err(db_err)?;
            for (id, value) in &table.rows {
                match value {
                    Some(bytes) => {
                        stored.insert(*id, bytes.as_slice()).map_err(db_err)?;
                    }
                    None => {
                        stored.remove(*id).map_err(db_err)?;
                    }
                }
            }
        }
        txn.commit().map_err(db_err)?;
        Ok(())
    }
}
