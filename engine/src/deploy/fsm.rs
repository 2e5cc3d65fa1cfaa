//! Finite state machine for a release row

use shipyard_models::release::ReleaseStatus;

/// Release event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseEvent {
    /// Production gate hit, wait for an operator
    Gate,

    /// Begin applying
    Start,

    /// Operator approved a gated release
    Approve,

    /// Operator rejected a gated release
    Reject,

    /// Every document applied
    Succeed,

    /// Handed to the host-group connector
    Accept,

    /// Apply failed
    Fail(String),
}

/// Release FSM
#[derive(Debug, Clone)]
pub struct ReleaseFsm {
    state: ReleaseStatus,
}

impl ReleaseFsm {
    /// Create a new FSM for a fresh row
    pub fn new() -> Self {
        Self::resume(ReleaseStatus::Created)
    }

    /// Pick up from a persisted status
    pub fn resume(state: ReleaseStatus) -> Self {
        Self { state }
    }

    /// Get current state
    pub fn state(&self) -> ReleaseStatus {
        self.state
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: ReleaseEvent) -> Result<ReleaseStatus, String> {
        let new_state = match (&self.state, &event) {
            (ReleaseStatus::Created, ReleaseEvent::Gate) => ReleaseStatus::PendingApproval,
            (ReleaseStatus::Created, ReleaseEvent::Start) => ReleaseStatus::Running,

            (ReleaseStatus::PendingApproval, ReleaseEvent::Approve) => ReleaseStatus::Running,
            (ReleaseStatus::PendingApproval, ReleaseEvent::Reject) => ReleaseStatus::Rejected,

            (ReleaseStatus::Running, ReleaseEvent::Succeed) => ReleaseStatus::Succeeded,
            (ReleaseStatus::Running, ReleaseEvent::Accept) => ReleaseStatus::Accepted,
            (ReleaseStatus::Running, ReleaseEvent::Fail(_)) => ReleaseStatus::Failed,

            (state, event) => {
                return Err(format!("invalid transition: {} on {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for ReleaseFsm {
    fn default() -> Self {
        Self::new()
    }
}
