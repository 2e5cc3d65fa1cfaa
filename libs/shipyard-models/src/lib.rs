//! Shared data models
//!
//! Plain data types for targets, releases, bootstrap jobs and cluster
//! credentials. These are the rows the engine persists and the values it
//! hands back to callers.

pub mod bootstrap;
pub mod credential;
pub mod finding;
pub mod inventory;
pub mod release;
pub mod runtime;
pub mod target;

pub use finding::{Finding, FindingLevel};
pub use runtime::RuntimeType;
