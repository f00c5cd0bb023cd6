//! Reverse proxy configuration

pub mod configurer;
pub mod tls;
