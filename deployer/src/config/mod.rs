//! Deployment configuration

pub mod deployment;
pub mod env_file;
