//! Host layout, settings and run state

pub mod layout;
pub mod lock;
pub mod settings;
