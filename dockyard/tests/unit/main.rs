//! Integration tests

mod common;
mod test_fsm;
mod test_server;
mod test_terminal;
