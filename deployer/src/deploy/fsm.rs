//! Finite State Machine for the deploy workflow

use serde::{Deserialize, Serialize};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    /// Nothing has happened yet
    Idle,

    /// Reading host facts
    ProbingEnvironment,

    /// Installing system packages
    Provisioning,

    /// Installing and starting the supervision unit
    ConfiguringSupervision,

    /// Activating the reverse proxy route
    ConfiguringProxy,

    /// Building and starting the container topology
    OrchestratingContainers,

    /// Polling the health endpoint
    VerifyingHealth,

    /// Run finished
    Succeeded,

    /// Run aborted by a fatal error
    Failed,
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestratorState::Succeeded | OrchestratorState::Failed)
    }
}

/// Orchestrator event
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Start the run
    Begin,

    /// Host profile produced
    HostProbed { containerized: bool },

    /// Packages present
    Provisioned,

    /// Unit installed and started
    SupervisionConfigured,

    /// Route active
    ProxyConfigured,

    /// Containers up
    ContainersUp,

    /// Health verification finished (healthy or not)
    HealthChecked,

    /// Fatal error from the active component
    Fail(String),
}

/// Deploy workflow FSM
#[derive(Debug, Clone)]
pub struct OrchestratorFsm {
    state: OrchestratorState,
    error: Option<String>,
    history: Vec<OrchestratorState>,
}

impl OrchestratorFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self {
            state: OrchestratorState::Idle,
            error: None,
            history: vec![OrchestratorState::Idle],
        }
    }

    /// Get current state
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[OrchestratorState] {
        &self.history
    }

    /// State the run failed in, if it failed
    pub fn failed_in(&self) -> Option<OrchestratorState> {
        match self.state {
            OrchestratorState::Failed => self.history.iter().rev().nth(1).copied(),
            _ => None,
        }
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: OrchestratorEvent) -> Result<OrchestratorState, String> {
        use OrchestratorState as S;

        let new_state = match (self.state, &event) {
            (S::Idle, OrchestratorEvent::Begin) => S::ProbingEnvironment,

            (S::ProbingEnvironment, OrchestratorEvent::HostProbed { containerized: false }) => {
                S::Provisioning
            }
            (S::ProbingEnvironment, OrchestratorEvent::HostProbed { containerized: true }) => {
                S::OrchestratingContainers
            }

            (S::Provisioning, OrchestratorEvent::Provisioned) => S::ConfiguringSupervision,
            (S::ConfiguringSupervision, OrchestratorEvent::SupervisionConfigured) => {
                S::ConfiguringProxy
            }
            (S::ConfiguringProxy, OrchestratorEvent::ProxyConfigured) => S::VerifyingHealth,

            (S::OrchestratingContainers, OrchestratorEvent::ContainersUp) => S::VerifyingHealth,

            (S::VerifyingHealth, OrchestratorEvent::HealthChecked) => S::Succeeded,

            (state, OrchestratorEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                S::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        self.history.push(new_state);
        Ok(new_state)
    }
}

impl Default for OrchestratorFsm {
    fn default() -> Self {
        Self::new()
    }
}
