//! Environment bootstrap orchestrator
//!
//! Installs a versioned runtime package onto a set of hosts in ordered
//! phases, recording one step per host and phase.

pub mod orchestrator;
pub mod package;

pub use orchestrator::BootstrapOrchestrator;
