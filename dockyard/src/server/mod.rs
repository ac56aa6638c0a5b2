//! HTTP and WebSocket surface

pub mod auth;
pub mod containers;
pub mod handlers;
pub mod ports;
pub mod projects;
pub mod serve;
pub mod state;
pub mod terminal;
