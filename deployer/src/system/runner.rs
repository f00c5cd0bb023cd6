//! External tool invocation

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeployError;

/// One external command, fully described before it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Shell-like rendering, used for logging and by test fakes
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_line())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout and stderr joined, for operator-facing diagnostics
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        if !self.stderr.trim().is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(self.stderr.trim_end());
        }
        out
    }
}

/// Seam through which every external tool is invoked
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing output
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, DeployError>;

    /// Run with the operator's terminal attached (log tailing)
    async fn run_attached(&self, invocation: &Invocation) -> Result<Option<i32>, DeployError> {
        self.run(invocation).await.map(|output| {
            print!("{}", output.stdout);
            output.exit_code
        })
    }

    /// Whether `program` resolves on PATH
    async fn exists(&self, program: &str) -> bool {
        let script = format!("command -v {}", program);
        self.run(&Invocation::new("sh").args(["-c", script.as_str()]))
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }
}

/// Runs commands on the local host
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, DeployError> {
        debug!("Running: {}", invocation);
        let output = invocation
            .to_command()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                DeployError::CommandError(format!("Failed to run {}: {}", invocation.program, e))
            })?;

        let output = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("{} exited with {:?}", invocation.program, output.exit_code);
        Ok(output)
    }

    async fn run_attached(&self, invocation: &Invocation) -> Result<Option<i32>, DeployError> {
        debug!("Running attached: {}", invocation);
        let status = invocation.to_command().status().await.map_err(|e| {
            DeployError::CommandError(format!("Failed to run {}: {}", invocation.program, e))
        })?;
        Ok(status.code())
    }
}
