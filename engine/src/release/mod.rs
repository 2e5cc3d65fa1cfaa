//! Release pipeline
//!
//! Preview, apply, approval gating and rollback of service manifests onto
//! deployment targets. Every status change is mirrored by an append-only
//! timeline event.

pub mod pipeline;
pub mod template;

pub use pipeline::{PipelineOptions, ReleasePipeline};
