//! Deployment run record

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::unit::ServiceUnitState;

/// Operator-facing verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestedCommand {
    Deploy,
    Start,
    Stop,
    Restart,
    Status,
    Logs,
    Update,
    FixRepos,
    Down,
    Build,
}

impl RequestedCommand {
    /// Commands that change host state and therefore take the run lock
    pub fn is_mutating(&self) -> bool {
        !matches!(self, RequestedCommand::Status | RequestedCommand::Logs)
    }
}

impl fmt::Display for RequestedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestedCommand::Deploy => "deploy",
            RequestedCommand::Start => "start",
            RequestedCommand::Stop => "stop",
            RequestedCommand::Restart => "restart",
            RequestedCommand::Status => "status",
            RequestedCommand::Logs => "logs",
            RequestedCommand::Update => "update",
            RequestedCommand::FixRepos => "fix-repos",
            RequestedCommand::Down => "down",
            RequestedCommand::Build => "build",
        };
        write!(f, "{}", name)
    }
}

/// Final result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Failure,
}

/// Completed mutating steps, in the order they happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ProbedEnvironment,
    RepairedRepositories,
    InstalledPackages,
    PreparedDependencies,
    OpenedFirewall,
    WroteEnvironmentFile,
    InstalledUnit,
    EnabledUnit,
    StartedUnit,
    StoppedUnit,
    AppliedProxyRoute,
    RequestedCertificate,
    SnapshotTaken,
    RefreshedSources,
    BuiltContainers,
    StartedContainers,
    StoppedContainers,
    VerifiedHealth,
}

/// Ephemeral record of one invocation, persisted as the last run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRun {
    pub id: String,
    pub requested_command: RequestedCommand,
    pub outcome: RunOutcome,
    pub steps_completed: Vec<Step>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub error: Option<String>,
    /// Unit state observed after a failed update settled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_state: Option<ServiceUnitState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeploymentRun {
    pub fn new(requested_command: RequestedCommand) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            requested_command,
            outcome: RunOutcome::Success,
            steps_completed: Vec::new(),
            warnings: Vec::new(),
            error: None,
            service_state: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn complete(&mut self, step: Step) {
        self.steps_completed.push(step);
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn has_completed(&self, step: Step) -> bool {
        self.steps_completed.contains(&step)
    }

    pub fn succeed(&mut self) {
        self.outcome = RunOutcome::Success;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.outcome = RunOutcome::Failure;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Success
    }
}
