//! Host firewall rules for the proxy ports

use tracing::{debug, info};

use crate::errors::DeployError;
use crate::models::host::{HostProfile, OsFamily};
use crate::system::runner::{CommandRunner, Invocation};

/// Open the given TCP ports with whichever firewall frontend the host uses.
///
/// Returns `Ok(false)` when no supported frontend is installed.
pub async fn open_ports(
    runner: &dyn CommandRunner,
    profile: &HostProfile,
    ports: &[u16],
) -> Result<bool, DeployError> {
    let commands: Vec<Invocation> = match profile.os_family {
        OsFamily::DebianLike if runner.exists("ufw").await => ports
            .iter()
            .map(|port| Invocation::new("ufw").args(["allow".to_string(), format!("{}/tcp", port)]))
            .collect(),
        OsFamily::RhelLike if runner.exists("firewall-cmd").await => ports
            .iter()
            .map(|port| {
                Invocation::new("firewall-cmd")
                    .args(["--permanent".to_string(), format!("--add-port={}/tcp", port)])
            })
            .chain(std::iter::once(Invocation::new("firewall-cmd").arg("--reload")))
            .collect(),
        _ => {
            debug!("No supported firewall frontend found");
            return Ok(false);
        }
    };

    for command in &commands {
        let output = runner.run(command).await?;
        if !output.success() {
            return Err(DeployError::CommandError(format!(
                "{} failed: {}",
                command,
                output.combined()
            )));
        }
    }
    info!("Opened firewall ports {:?}", ports);
    Ok(true)
}
