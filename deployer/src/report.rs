//! Operator-facing status lines

use colored::Colorize;
use tracing::{error, info, warn};

use crate::models::run::DeploymentRun;

/// Prints one leveled line per step and the final run summary.
///
/// Every line is mirrored to tracing so the file log carries the same story
/// the operator saw.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    quiet: bool,
}

impl Reporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn info(&self, message: &str) {
        info!("{}", message);
        if !self.quiet {
            println!("{} {}", "[INFO]".blue().bold(), message);
        }
    }

    pub fn success(&self, message: &str) {
        info!("{}", message);
        if !self.quiet {
            println!("{} {}", "[SUCCESS]".green().bold(), message);
        }
    }

    pub fn warning(&self, message: &str) {
        warn!("{}", message);
        if !self.quiet {
            println!("{} {}", "[WARNING]".yellow().bold(), message);
        }
    }

    pub fn error(&self, message: &str) {
        error!("{}", message);
        if !self.quiet {
            eprintln!("{} {}", "[ERROR]".red().bold(), message);
        }
    }

    /// Summary printed once at the end of a deploy, start or update
    pub fn summary(&self, run: &DeploymentRun, running: &[String], access_url: Option<&str>) {
        if run.succeeded() {
            self.success(&format!("{} finished", run.requested_command));
        } else {
            self.error(&format!(
                "{} failed: {}",
                run.requested_command,
                run.error.as_deref().unwrap_or("unknown error")
            ));
        }

        if running.is_empty() {
            self.info("No subsystems confirmed running");
        } else {
            self.info(&format!("Running: {}", running.join(", ")));
        }
        for warning in &run.warnings {
            self.warning(warning);
        }
        if let Some(url) = access_url.filter(|_| run.succeeded()) {
            self.success(&format!("Application available at {}", url));
        }
    }
}
