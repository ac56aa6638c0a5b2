//! Data models

pub mod deployment;
pub mod port;
pub mod project;
