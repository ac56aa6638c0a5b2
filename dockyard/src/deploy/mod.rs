//! Deployment module

pub mod compose;
pub mod fsm;
pub mod git;
pub mod guard;
pub mod orchestrator;
pub mod ports;
pub mod scanner;
pub mod supervisor;
