//! Command line surface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::deployment::{
    DeployMode, DeploymentOptions, DEFAULT_APP_MODULE, DEFAULT_APP_PORT, DEFAULT_APP_ROOT,
    DEFAULT_DOMAIN, DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT, DEFAULT_SERVICE_NAME,
};
use crate::deploy::orchestrator::LogTail;
use crate::models::run::RequestedCommand;

#[derive(Parser, Debug)]
#[command(
    name = "appdeploy",
    version,
    about = "Provision, configure and supervise a reverse-proxied web service on one host"
)]
pub struct Cli {
    #[command(flatten)]
    pub deployment: DeploymentArgs,

    /// Prefix under which every host path is resolved
    #[arg(long, global = true, env = "APPDEPLOY_ROOT", default_value = "/")]
    pub root: PathBuf,

    /// Settings file (defaults to /etc/appdeploy/settings.json under the root)
    #[arg(long, global = true, env = "APPDEPLOY_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Log at debug level on the console
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emit console logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Deployment configuration. Flags win over environment variables.
#[derive(Args, Debug, Clone)]
pub struct DeploymentArgs {
    #[arg(long, global = true, env = "DOMAIN", default_value = DEFAULT_DOMAIN)]
    pub domain: String,

    #[arg(long, global = true, env = "APP_PORT", default_value_t = DEFAULT_APP_PORT)]
    pub app_port: u32,

    #[arg(long, global = true, env = "HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u32,

    #[arg(long, global = true, env = "HTTPS_PORT", default_value_t = DEFAULT_HTTPS_PORT)]
    pub https_port: u32,

    #[arg(long, global = true, env = "APP_ROOT", default_value = DEFAULT_APP_ROOT)]
    pub app_root: PathBuf,

    /// Account the unit runs as (www-data on Debian, nginx on RHEL)
    #[arg(long, global = true, env = "SERVICE_USER")]
    pub service_user: Option<String>,

    #[arg(long, global = true, env = "SERVICE_NAME", default_value = DEFAULT_SERVICE_NAME)]
    pub service_name: String,

    /// WSGI entry point passed to gunicorn
    #[arg(long, global = true, env = "APP_MODULE", default_value = DEFAULT_APP_MODULE)]
    pub app_module: String,

    #[arg(long, global = true, env = "WORKERS", default_value_t = 2)]
    pub workers: u32,

    /// bare (systemd + nginx) or container (docker compose)
    #[arg(long, global = true, env = "DEPLOY_MODE", default_value = "bare")]
    pub mode: DeployMode,

    /// Request a certificate with certbot using this contact address
    #[arg(long, global = true, env = "TLS_EMAIL")]
    pub tls_email: Option<String>,

    /// Open the HTTP and HTTPS ports in the host firewall
    #[arg(long, global = true, env = "OPEN_FIREWALL", default_value_t = false)]
    pub open_firewall: bool,
}

impl From<DeploymentArgs> for DeploymentOptions {
    fn from(args: DeploymentArgs) -> Self {
        Self {
            domain: args.domain,
            app_port: args.app_port,
            http_port: args.http_port,
            https_port: args.https_port,
            app_root: args.app_root,
            service_user: args.service_user,
            service_name: args.service_name,
            app_module: args.app_module,
            workers: args.workers,
            mode: args.mode,
            tls_email: args.tls_email,
            open_firewall: args.open_firewall,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Full deployment: packages, unit, proxy route, health check
    Deploy,
    /// Start the service
    Start,
    /// Stop the service
    Stop,
    /// Restart the service
    Restart,
    /// Show service, proxy and health status
    Status,
    /// Show service logs
    Logs(LogsArgs),
    /// Pull new sources and restart. In container mode the containers are
    /// torn down and rebuilt, so this is not zero-downtime.
    Update,
    /// Remove broken nginx.org package sources (bare host only)
    FixRepos,
    /// Stop and remove the containers (container mode only)
    Down,
    /// Build images without starting them (container mode only)
    Build,
}

#[derive(Args, Debug, Clone)]
pub struct LogsArgs {
    #[arg(short = 'n', long, default_value_t = 100)]
    pub lines: u32,

    #[arg(short, long, default_value_t = false)]
    pub follow: bool,
}

impl Commands {
    pub fn requested(&self) -> RequestedCommand {
        match self {
            Commands::Deploy => RequestedCommand::Deploy,
            Commands::Start => RequestedCommand::Start,
            Commands::Stop => RequestedCommand::Stop,
            Commands::Restart => RequestedCommand::Restart,
            Commands::Status => RequestedCommand::Status,
            Commands::Logs(_) => RequestedCommand::Logs,
            Commands::Update => RequestedCommand::Update,
            Commands::FixRepos => RequestedCommand::FixRepos,
            Commands::Down => RequestedCommand::Down,
            Commands::Build => RequestedCommand::Build,
        }
    }

    pub fn log_tail(&self) -> LogTail {
        match self {
            Commands::Logs(args) => LogTail {
                lines: args.lines,
                follow: args.follow,
            },
            _ => LogTail::default(),
        }
    }
}
