//! Reverse proxy route models

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::deployment::DeploymentConfig;

/// Lifecycle of a proxy route.
///
/// A route only reaches `Active` after the proxy's validator accepted the
/// merged configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyRouteState {
    Absent,
    Rendered,
    Validated,
    Active,
}

impl fmt::Display for ProxyRouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProxyRouteState::Absent => "absent",
            ProxyRouteState::Rendered => "rendered",
            ProxyRouteState::Validated => "validated",
            ProxyRouteState::Active => "active",
        };
        write!(f, "{}", name)
    }
}

/// Virtual host forwarding the public port to the loopback backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub service_name: String,
    pub domain: String,
    pub listen_port: u16,
    pub upstream: String,
    pub static_dir: PathBuf,
    pub state: ProxyRouteState,
}

impl ProxyRoute {
    pub fn derive(config: &DeploymentConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            domain: config.domain.clone(),
            listen_port: config.http_port,
            upstream: format!("http://{}", config.bind_address()),
            static_dir: config.app_root_path.join("static"),
            state: ProxyRouteState::Absent,
        }
    }

    /// File name of the enabled reference
    pub fn enabled_name(&self) -> String {
        format!("{}.conf", self.service_name)
    }

    /// Render the nginx server block
    pub fn render(&self) -> String {
        format!(
            r#"# Managed by appdeploy; local edits are replaced on the next deploy.
server {{
    listen {port};
    listen [::]:{port};
    server_name {domain};

    client_max_body_size 16M;

    location / {{
        proxy_pass {upstream};
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_read_timeout 120s;
    }}

    location = /health {{
        proxy_pass {upstream}/health;
        access_log off;
    }}

    location /static/ {{
        alias {static_dir}/;
        expires 30d;
    }}
}}
"#,
            port = self.listen_port,
            domain = self.domain,
            upstream = self.upstream,
            static_dir = self.static_dir.display(),
        )
    }
}
