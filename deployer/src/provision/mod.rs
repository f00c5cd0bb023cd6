//! Host package provisioning

pub mod firewall;
pub mod packages;
pub mod repos;
