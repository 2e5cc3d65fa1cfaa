//! Shipyard
//!
//! Deployment target registry, release pipeline, environment bootstrap
//! orchestrator and credential vault.

pub mod app;
pub mod bootstrap;
pub mod context;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod locks;
pub mod logs;
pub mod registry;
pub mod release;
pub mod storage;
pub mod store;
pub mod utils;
pub mod vault;

pub use app::state::{Collaborators, Engine};
pub use context::OpContext;
pub use errors::EngineError;
