//! appdeploy Library
//!
//! Core modules for the single-host deployment orchestrator.

pub mod cli;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod host;
pub mod logs;
pub mod models;
pub mod provision;
pub mod proxy;
pub mod report;
pub mod storage;
pub mod supervise;
pub mod system;
pub mod utils;
