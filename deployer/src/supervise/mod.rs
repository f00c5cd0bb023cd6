//! Process supervision

pub mod unit;
