//! FSM unit tests

use dockyard::deploy::fsm::{ProjectEvent, ProjectFsm};
use dockyard::models::project::ProjectStatus;

#[test]
fn test_fsm_initial_state() {
    let fsm = ProjectFsm::new();
    assert_eq!(fsm.state(), ProjectStatus::Pending);
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_deploy_success_flow() {
    let mut fsm = ProjectFsm::new();

    // Pending -> Building
    fsm.process(ProjectEvent::Build).unwrap();
    assert_eq!(fsm.state(), ProjectStatus::Building);

    // Building -> Running
    fsm.process(ProjectEvent::Succeeded).unwrap();
    assert_eq!(fsm.state(), ProjectStatus::Running);
}

#[test]
fn test_fsm_deploy_failure_flow() {
    let mut fsm = ProjectFsm::new();

    fsm.process(ProjectEvent::Build).unwrap();
    fsm.process(ProjectEvent::Failed("exit code 2".to_string())).unwrap();

    assert_eq!(fsm.state(), ProjectStatus::Error);
    assert_eq!(fsm.error(), Some("exit code 2"));
}

#[test]
fn test_fsm_retry_after_failure() {
    let mut fsm = ProjectFsm::resume(ProjectStatus::Error);

    fsm.process(ProjectEvent::Build).unwrap();
    assert!(fsm.error().is_none());
    fsm.process(ProjectEvent::Succeeded).unwrap();
    assert_eq!(fsm.state(), ProjectStatus::Running);
}

#[test]
fn test_fsm_single_build_at_a_time() {
    let mut fsm = ProjectFsm::resume(ProjectStatus::Building);
    assert!(!fsm.accepts(&ProjectEvent::Build));
    assert!(fsm.process(ProjectEvent::Build).is_err());
    assert_eq!(fsm.state(), ProjectStatus::Building);
}

#[test]
fn test_fsm_stop_from_any_state() {
    for state in [
        ProjectStatus::Pending,
        ProjectStatus::Building,
        ProjectStatus::Running,
        ProjectStatus::Stopped,
        ProjectStatus::Error,
    ] {
        let mut fsm = ProjectFsm::resume(state);
        fsm.process(ProjectEvent::Stop).unwrap();
        assert_eq!(fsm.state(), ProjectStatus::Stopped);
    }
}

#[test]
fn test_fsm_completion_requires_build() {
    let mut fsm = ProjectFsm::resume(ProjectStatus::Stopped);
    assert!(fsm.process(ProjectEvent::Succeeded).is_err());
    assert!(fsm.process(ProjectEvent::Failed("late".to_string())).is_err());
    assert!(fsm.process(ProjectEvent::Cancel).is_err());
    assert_eq!(fsm.state(), ProjectStatus::Stopped);
}
