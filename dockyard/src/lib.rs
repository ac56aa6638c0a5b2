//! Dockyard Library
//!
//! Control plane that turns project source trees into running containers:
//! Dockerfile discovery, port allocation, compose manifests, supervised
//! builds with streamed output, live container logs and a browser shell.

pub mod app;
pub mod authn;
pub mod deploy;
pub mod domains;
pub mod engine;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod store;
pub mod terminal;
pub mod utils;
