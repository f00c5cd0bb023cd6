//! Data models

pub mod host;
pub mod route;
pub mod run;
pub mod unit;
