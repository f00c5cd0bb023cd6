//! Host profile models

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    DebianLike,
    RhelLike,
    Unknown,
}

impl OsFamily {
    /// Classify a distribution from os-release `ID` / `ID_LIKE` tokens
    pub fn classify<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        for id in ids {
            match id.trim().to_lowercase().as_str() {
                "debian" | "ubuntu" | "raspbian" | "linuxmint" | "pop" => {
                    return OsFamily::DebianLike
                }
                "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "amzn" | "ol" => {
                    return OsFamily::RhelLike
                }
                _ => {}
            }
        }
        OsFamily::Unknown
    }
}

/// Package manager backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    Apt,
    Yum,
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageManagerKind::Apt => write!(f, "apt"),
            PackageManagerKind::Yum => write!(f, "yum"),
        }
    }
}

/// How the installed reverse proxy organises its virtual hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyLayout {
    /// `sites-available` + `sites-enabled` (Debian packaging)
    SitesAvailableEnabled,
    /// Only `conf.d` is included (RHEL packaging)
    ConfD,
    /// Neither exists yet; the configurer creates the directories
    NeedsCreation,
}

/// Host environment, probed once per run and never mutated afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProfile {
    pub os_family: OsFamily,
    pub package_manager: PackageManagerKind,
    pub proxy_layout: ProxyLayout,

    /// Distribution id as reported by the host
    pub distribution: String,

    /// Hostname, for the status report
    pub hostname: String,
}

impl HostProfile {
    /// Account the service runs as when the operator does not choose one
    pub fn default_service_user(&self) -> &'static str {
        match self.os_family {
            OsFamily::RhelLike => "nginx",
            _ => "www-data",
        }
    }
}
