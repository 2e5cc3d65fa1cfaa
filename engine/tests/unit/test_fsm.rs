//! Release FSM tests

use shipyard::deploy::fsm::{ReleaseEvent, ReleaseFsm};
use shipyard_models::release::ReleaseStatus;

#[test]
fn test_fsm_initial_state() {
    let fsm = ReleaseFsm::new();
    assert_eq!(fsm.state(), ReleaseStatus::Created);
}

#[test]
fn test_fsm_direct_apply_flow() {
    let mut fsm = ReleaseFsm::new();

    // Created -> Running
    fsm.process(ReleaseEvent::Start).unwrap();
    assert_eq!(fsm.state(), ReleaseStatus::Running);

    // Running -> Succeeded
    fsm.process(ReleaseEvent::Succeed).unwrap();
    assert_eq!(fsm.state(), ReleaseStatus::Succeeded);
    assert!(fsm.state().is_live());
}

#[test]
fn test_fsm_host_group_release_is_accepted() {
    let mut fsm = ReleaseFsm::new();
    fsm.process(ReleaseEvent::Start).unwrap();
    fsm.process(ReleaseEvent::Accept).unwrap();
    assert_eq!(fsm.state(), ReleaseStatus::Accepted);
    assert!(fsm.state().is_terminal());
}

#[test]
fn test_fsm_rejection_is_terminal() {
    let mut fsm = ReleaseFsm::new();
    fsm.process(ReleaseEvent::Gate).unwrap();
    fsm.process(ReleaseEvent::Reject).unwrap();
    assert_eq!(fsm.state(), ReleaseStatus::Rejected);

    assert!(fsm.process(ReleaseEvent::Approve).is_err());
    assert!(fsm.process(ReleaseEvent::Start).is_err());
    assert_eq!(fsm.state(), ReleaseStatus::Rejected);
}

#[test]
fn test_fsm_gate_blocks_direct_start() {
    let mut fsm = ReleaseFsm::new();
    fsm.process(ReleaseEvent::Gate).unwrap();

    let err = fsm.process(ReleaseEvent::Start).unwrap_err();
    assert!(err.contains("pending_approval"));
    assert_eq!(fsm.state(), ReleaseStatus::PendingApproval);
}

#[test]
fn test_fsm_cannot_finish_before_running() {
    let mut fsm = ReleaseFsm::new();
    assert!(fsm.process(ReleaseEvent::Succeed).is_err());
    assert!(fsm.process(ReleaseEvent::Fail("early".to_string())).is_err());
    assert_eq!(fsm.state(), ReleaseStatus::Created);
}

#[test]
fn test_fsm_resume_from_persisted_status() {
    let mut fsm = ReleaseFsm::resume(ReleaseStatus::PendingApproval);
    assert_eq!(fsm.process(ReleaseEvent::Approve).unwrap(), ReleaseStatus::Running);
    fsm.process(ReleaseEvent::Fail("document #2 Deployment/web rejected".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), ReleaseStatus::Failed);
}
