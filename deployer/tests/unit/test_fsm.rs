//! Job FSM unit tests

use autodeploy::deploy::fsm::{JobEvent, JobFsm, JobState};
use autodeploy::errors::ErrorKind;
use autodeploy::models::job::{DeployOutcome, JobFailure};

fn outcome() -> DeployOutcome {
    DeployOutcome {
        url: "http://1.2.3.4:5000".to_string(),
        public_ip: Some("1.2.3.4".to_string()),
    }
}

fn failure() -> JobFailure {
    JobFailure {
        kind: ErrorKind::ServiceInstallFailed,
        message: "restart failed".to_string(),
    }
}

#[test]
fn test_fsm_initial_state() {
    let fsm = JobFsm::new();
    assert_eq!(fsm.state(), JobState::Running);
    assert!(!fsm.state().is_terminal());
    assert!(fsm.result().is_none());
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = JobFsm::new();
    fsm.process(JobEvent::Succeed(outcome())).unwrap();
    assert_eq!(fsm.state(), JobState::Succeeded);
    assert_eq!(fsm.result(), Some(&outcome()));
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_failure_flow() {
    let mut fsm = JobFsm::new();
    fsm.process(JobEvent::Fail(failure())).unwrap();
    assert_eq!(fsm.state(), JobState::Failed);
    assert_eq!(fsm.error(), Some(&failure()));
    assert!(fsm.result().is_none());
}

#[test]
fn test_fsm_single_forward_transition() {
    let mut fsm = JobFsm::new();
    fsm.process(JobEvent::Succeed(outcome())).unwrap();

    assert!(fsm.process(JobEvent::Fail(failure())).is_err());
    assert!(fsm.process(JobEvent::Succeed(outcome())).is_err());

    // Rejected transitions leave the job unchanged
    assert_eq!(fsm.state(), JobState::Succeeded);
    assert!(fsm.error().is_none());

    let mut fsm = JobFsm::new();
    fsm.process(JobEvent::Fail(failure())).unwrap();
    assert!(fsm.process(JobEvent::Succeed(outcome())).is_err());
    assert_eq!(fsm.state(), JobState::Failed);
    assert!(fsm.result().is_none());
}
