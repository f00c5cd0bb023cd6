//! Orchestrator state machine tests

use appdeploy::deploy::fsm::{OrchestratorEvent, OrchestratorFsm, OrchestratorState};

#[test]
fn test_fsm_initial_state() {
    let fsm = OrchestratorFsm::new();
    assert_eq!(fsm.state(), OrchestratorState::Idle);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.history(), &[OrchestratorState::Idle]);
}

#[test]
fn test_fsm_bare_host_success_flow() {
    let mut fsm = OrchestratorFsm::new();

    fsm.process(OrchestratorEvent::Begin).unwrap();
    fsm.process(OrchestratorEvent::HostProbed { containerized: false })
        .unwrap();
    assert_eq!(fsm.state(), OrchestratorState::Provisioning);

    fsm.process(OrchestratorEvent::Provisioned).unwrap();
    fsm.process(OrchestratorEvent::SupervisionConfigured).unwrap();
    fsm.process(OrchestratorEvent::ProxyConfigured).unwrap();
    assert_eq!(fsm.state(), OrchestratorState::VerifyingHealth);

    fsm.process(OrchestratorEvent::HealthChecked).unwrap();
    assert_eq!(fsm.state(), OrchestratorState::Succeeded);
    assert_eq!(
        fsm.history(),
        &[
            OrchestratorState::Idle,
            OrchestratorState::ProbingEnvironment,
            OrchestratorState::Provisioning,
            OrchestratorState::ConfiguringSupervision,
            OrchestratorState::ConfiguringProxy,
            OrchestratorState::VerifyingHealth,
            OrchestratorState::Succeeded,
        ]
    );
}

#[test]
fn test_fsm_proxy_cannot_precede_supervision() {
    let mut fsm = OrchestratorFsm::new();
    fsm.process(OrchestratorEvent::Begin).unwrap();
    fsm.process(OrchestratorEvent::HostProbed { containerized: false })
        .unwrap();

    assert!(fsm.process(OrchestratorEvent::ProxyConfigured).is_err());
    assert_eq!(fsm.state(), OrchestratorState::Provisioning);
}

#[test]
fn test_fsm_failure_records_state() {
    let mut fsm = OrchestratorFsm::new();
    fsm.process(OrchestratorEvent::Begin).unwrap();
    fsm.process(OrchestratorEvent::HostProbed { containerized: false })
        .unwrap();
    fsm.process(OrchestratorEvent::Provisioned).unwrap();
    fsm.process(OrchestratorEvent::Fail("unit failed".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), OrchestratorState::Failed);
    assert_eq!(fsm.error(), Some("unit failed"));
    assert_eq!(
        fsm.failed_in(),
        Some(OrchestratorState::ConfiguringSupervision)
    );
}

#[test]
fn test_fsm_cannot_begin_twice() {
    let mut fsm = OrchestratorFsm::new();
    fsm.process(OrchestratorEvent::Begin).unwrap();
    assert!(fsm.process(OrchestratorEvent::Begin).is_err());
}
