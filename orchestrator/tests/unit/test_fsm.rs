//! Status state machine tests

use shipyard::deploy::fsm::{AppStatus, StatusFsm};
use shipyard::models::deployment::DeployStatus;

#[test]
fn test_fsm_initial_state() {
    let fsm = StatusFsm::new();
    assert_eq!(fsm.state(), AppStatus::NotFound);
    assert_eq!(fsm.transitions(), 0);
    assert!(!fsm.state().is_terminal());
}

#[test]
fn test_fsm_build_failure_flow() {
    let mut fsm = StatusFsm::new();

    fsm.observe(AppStatus::Preparing).unwrap();
    fsm.observe(AppStatus::Building).unwrap();
    assert_eq!(fsm.observe(AppStatus::BuildError), Ok(true));
    assert!(fsm.state().is_terminal());

    // Nothing moves a failed build forward
    assert!(fsm.observe(AppStatus::Building).is_err());
    assert!(fsm.observe(AppStatus::Running).is_err());
}

#[test]
fn test_fsm_rejects_going_back_to_building() {
    let mut fsm = StatusFsm::new();
    fsm.observe(AppStatus::Building).unwrap();
    fsm.observe(AppStatus::Starting).unwrap();
    assert!(fsm.observe(AppStatus::Building).is_err());
    assert!(fsm.observe(AppStatus::BuildError).is_err());
    assert_eq!(fsm.state(), AppStatus::Starting);
}

#[test]
fn test_fsm_persisted_status_fallbacks() {
    // A backend outage surfaces the persisted status; it ranks with starting
    assert!(AppStatus::Deployed.can_follow(AppStatus::Building));
    assert!(AppStatus::Starting.can_follow(AppStatus::Deployed));
    assert!(AppStatus::Running.can_follow(AppStatus::Idle));
}

#[test]
fn test_persisted_status_mapping() {
    assert_eq!(AppStatus::from(DeployStatus::Error), AppStatus::BuildError);
    assert_eq!(AppStatus::from(DeployStatus::Preparing), AppStatus::Preparing);
    assert_eq!(AppStatus::from(DeployStatus::Idle).to_string(), "idle");
}
