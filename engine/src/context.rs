//! Per-call operation context

use std::fmt;

/// Who is calling and under which trace
///
/// Passed explicitly to every mutating operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpContext {
    pub trace_id: String,
    pub actor: String,
}

impl OpContext {
    /// New context with a fresh trace id
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            trace_id: crate::utils::generate_uuid(),
            actor: actor.into(),
        }
    }

    /// Context continuing an upstream trace
    pub fn with_trace(actor: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            actor: actor.into(),
        }
    }

    /// Context for work the engine does on its own behalf
    pub fn system() -> Self {
        Self::new("system")
    }
}

impl fmt::Display for OpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.actor, self.trace_id)
    }
}
