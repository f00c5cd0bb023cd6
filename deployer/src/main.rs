//! appdeploy - Entry Point
//!
//! Deploys one reverse-proxied web service onto the local host, either under
//! systemd behind nginx or as a docker compose topology.

use std::process::ExitCode;
use std::sync::Arc;

use appdeploy::cli::Cli;
use appdeploy::config::deployment::{DeploymentConfig, DeploymentOptions};
use appdeploy::deploy::health::{HealthOptions, HttpProbe};
use appdeploy::deploy::orchestrator::DeploymentOrchestrator;
use appdeploy::filesys::file::File;
use appdeploy::logs::{init_logging, LogLevel, LogOptions};
use appdeploy::report::Reporter;
use appdeploy::storage::layout::HostLayout;
use appdeploy::storage::settings::Settings;
use appdeploy::system::runner::SystemRunner;
use appdeploy::utils::version_info;

use clap::Parser;
use tracing::{debug, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let layout = HostLayout::new(&cli.root);
    let reporter = Reporter::default();

    // Retrieve the settings file
    let settings_file = cli
        .settings
        .clone()
        .map(File::new)
        .unwrap_or_else(|| layout.settings_file());
    let settings = match Settings::load_or_default(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            reporter.error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: if cli.verbose {
            LogLevel::Debug
        } else {
            settings.log_level
        },
        json_format: cli.json_logs || settings.json_logs,
        log_dir: settings.log_dir.as_ref().map(|dir| layout.resolve(dir)),
        ..Default::default()
    };
    let _guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let version = version_info();
    debug!(
        "appdeploy {} ({}, built {})",
        version.version, version.git_hash, version.build_time
    );

    // Validate before any component runs
    let command = cli.command.requested();
    let config = match DeploymentConfig::validate(DeploymentOptions::from(cli.deployment)) {
        Ok(config) => config,
        Err(e) => {
            reporter.error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    let probe = match HttpProbe::new(settings.health.request_timeout()) {
        Ok(probe) => probe,
        Err(e) => {
            reporter.error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };
    let health = HealthOptions {
        max_attempts: settings.health.max_attempts,
        interval: settings.health.interval(),
    };

    info!("Running {} with {:?}", command, config);
    let orchestrator = DeploymentOrchestrator::new(
        config,
        layout,
        Arc::new(SystemRunner),
        Arc::new(probe),
    )
    .with_health(health)
    .with_log_tail(cli.command.log_tail())
    .with_reporter(reporter);

    let run = orchestrator.execute(command).await;
    if run.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
