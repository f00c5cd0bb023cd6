//! Certificate issuance via certbot's nginx plugin

use tracing::info;

use crate::config::deployment::DeploymentConfig;
use crate::errors::DeployError;
use crate::system::runner::{CommandRunner, Invocation};

/// Ask certbot to obtain a certificate for the domain and wire it into the
/// active nginx route, redirecting plain HTTP.
pub async fn request_certificate(
    runner: &dyn CommandRunner,
    config: &DeploymentConfig,
) -> Result<(), DeployError> {
    let Some(email) = config.tls_email.as_deref() else {
        return Ok(());
    };
    if !runner.exists("certbot").await {
        return Err(DeployError::CommandError(
            "certbot is not installed; skipping certificate request".to_string(),
        ));
    }

    let certbot = Invocation::new("certbot")
        .args(["--nginx", "--non-interactive", "--agree-tos", "--redirect"])
        .args(["-d", config.domain.as_str(), "-m", email]);
    let output = runner.run(&certbot).await?;
    if !output.success() {
        return Err(DeployError::CommandError(format!(
            "certbot failed: {}",
            output.combined()
        )));
    }
    info!("Certificate installed for {}", config.domain);
    Ok(())
}
