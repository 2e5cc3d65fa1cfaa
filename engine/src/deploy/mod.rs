//! Deployment seams
//!
//! Traits for the collaborators the engine drives (manifest rendering,
//! cluster apply, remote execution) with process-backed implementations,
//! plus the release state machine.

pub mod cluster;
pub mod fsm;
pub mod kubectl;
pub mod remote;
pub mod renderer;
pub mod ssh;
