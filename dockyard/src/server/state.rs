//! Server state

use secrecy::SecretString;

use crate::deploy::orchestrator::Orchestrator;
use crate::terminal::TerminalManager;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Orchestrator,
    pub terminal: TerminalManager,
    /// Verifies bearer tokens on every protected route
    pub jwt_secret: SecretString,
    /// Host printed in deploy endpoint summaries
    pub public_host: Option<String>,
}

impl ServerState {
    pub fn new(
        orchestrator: Orchestrator,
        terminal: TerminalManager,
        jwt_secret: SecretString,
        public_host: Option<String>,
    ) -> Self {
        Self {
            orchestrator,
            terminal,
            jwt_secret,
            public_host,
        }
    }
}
