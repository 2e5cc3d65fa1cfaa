//! In-flight guards
//!
//! Advisory locks taken before remote execution or cluster apply so that two
//! overlapping calls cannot drive the same target, host or
//! `(service, target)` pair at once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::errors::EngineError;

/// Lock key for a bootstrap against a target
pub fn target_key(target_id: i64) -> String {
    format!("target:{}", target_id)
}

/// Lock key for a bootstrap touching a host
pub fn host_key(host_id: i64) -> String {
    format!("host:{}", host_id)
}

/// Lock key for executing a release of a service onto a target
pub fn release_key(service_id: i64, target_id: i64) -> String {
    format!("release:{}:{}", service_id, target_id)
}

/// Set of keys currently held
#[derive(Debug, Default)]
pub struct InFlight {
    held: Mutex<HashSet<String>>,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take every key or none of them
    pub fn acquire(self: &Arc<Self>, keys: Vec<String>) -> Result<InFlightGuard, EngineError> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(busy) = keys.iter().find(|k| held.contains(*k)) {
            return Err(EngineError::Conflict(format!(
                "another operation is already in flight for {}",
                busy
            )));
        }

        for key in &keys {
            held.insert(key.clone());
        }
        debug!("Acquired in-flight keys: {:?}", keys);

        Ok(InFlightGuard {
            registry: Arc::clone(self),
            keys,
        })
    }

    /// Keys currently held, sorted
    pub fn held(&self) -> Vec<String> {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = held.iter().cloned().collect();
        keys.sort();
        keys
    }
}

/// Releases its keys on drop
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<InFlight>,
    keys: Vec<String>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut held = self.registry.held.lock().unwrap_or_else(|e| e.into_inner());
        for key in &self.keys {
            held.remove(key);
        }
    }
}
