//! Host environment detection

pub mod probe;
