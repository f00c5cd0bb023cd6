//! Integration tests for appdeploy

mod test_compose;
mod test_deploy;
mod test_fsm;
mod test_health;
mod test_provision;
mod test_proxy;
