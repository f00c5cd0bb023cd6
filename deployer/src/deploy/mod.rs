//! Deployment module

pub mod compose;
pub mod fsm;
pub mod health;
pub mod orchestrator;
pub mod snapshot;
pub mod source;
