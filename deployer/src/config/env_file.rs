//! Application environment file

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::config::deployment::DeploymentConfig;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::utils::generate_secret;

/// Key holding the application's session secret
pub const SECRET_KEY: &str = "FLASK_SECRET_KEY";

/// What `ensure_env_file` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvFileOutcome {
    /// A fresh file was rendered
    Created,
    /// An existing file was left untouched
    Kept,
}

/// Render the environment file once from `.env.example`.
///
/// An existing `.env` is never rewritten: it holds live secrets and
/// provider settings an operator may have edited by hand.
pub async fn ensure_env_file(config: &DeploymentConfig) -> Result<EnvFileOutcome, DeployError> {
    let env_file = File::new(config.app_root_path.join(".env"));
    if env_file.exists().await {
        debug!("Keeping existing {}", env_file.path().display());
        return Ok(EnvFileOutcome::Kept);
    }

    let template = File::new(config.app_root_path.join(".env.example"))
        .read_optional()
        .await?;
    let contents = render_env_file(template.as_deref(), config, &generate_secret());

    env_file.write_private(&contents).await?;
    info!("Rendered {}", env_file.path().display());
    Ok(EnvFileOutcome::Created)
}

/// Substitute environment-specific values into the template.
///
/// Template lines for keys we own are rewritten; every other line is copied
/// verbatim. Owned keys missing from the template are appended.
pub fn render_env_file(
    template: Option<&str>,
    config: &DeploymentConfig,
    secret: &SecretString,
) -> String {
    let app_port = config.app_port.to_string();
    let owned: [(&str, &str); 5] = [
        (SECRET_KEY, secret.expose_secret()),
        ("FLASK_ENV", "production"),
        ("FLASK_DEBUG", "False"),
        ("PORT", &app_port),
        ("DOMAIN", &config.domain),
    ];

    let mut seen = Vec::new();
    let mut out = String::new();
    for line in template.unwrap_or_default().lines() {
        let key = line
            .split_once('=')
            .map(|(k, _)| k.trim().trim_start_matches("export ").trim())
            .filter(|_| !line.trim_start().starts_with('#'));

        match key.and_then(|k| owned.iter().find(|(owned_key, _)| *owned_key == k)) {
            Some((k, v)) => {
                out.push_str(&format!("{}={}\n", k, v));
                seen.push(*k);
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    for (k, v) in owned.iter().filter(|(k, _)| !seen.contains(k)) {
        out.push_str(&format!("{}={}\n", k, v));
    }
    out
}
