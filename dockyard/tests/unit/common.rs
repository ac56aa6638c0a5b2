//! Shared fixtures

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use futures::StreamExt;
use secrecy::SecretString;

use dockyard::app::options::ServerOptions;
use dockyard::authn::access_token::issue_token;
use dockyard::deploy::orchestrator::{Orchestrator, OrchestratorConfig};
use dockyard::engine::{ContainerEngine, ContainerState, ContainerStats, LogByteStream};
use dockyard::errors::DockyardError;
use dockyard::models::port::PortRange;
use dockyard::server::serve::serve;
use dockyard::server::state::ServerState;
use dockyard::store::JsonStore;
use dockyard::terminal::{TerminalConfig, TerminalManager};

pub const SECRET: &str = "integration-secret";

/// Engine with no containers
pub struct NullEngine;

#[async_trait]
impl ContainerEngine for NullEngine {
    async fn inspect(&self, _: &str) -> Result<Option<ContainerState>, DockyardError> {
        Ok(None)
    }
    async fn logs(&self, _: &str, _: usize) -> Result<String, DockyardError> {
        Ok(String::new())
    }
    async fn stats(&self, _: &str) -> Result<Option<ContainerStats>, DockyardError> {
        Ok(None)
    }
    async fn follow_logs(&self, _: &str, _: usize) -> Result<LogByteStream, DockyardError> {
        Ok(futures::stream::empty().boxed())
    }
    async fn ensure_network(&self, _: &str) -> Result<(), DockyardError> {
        Ok(())
    }
}

pub fn secret() -> SecretString {
    SecretString::from(SECRET.to_string())
}

pub fn token() -> String {
    issue_token("user-1", Some("admin@example.com"), Duration::minutes(5), &secret()).unwrap()
}

pub fn server_state(
    store: Arc<JsonStore>,
    deployments: &Path,
    terminal: TerminalConfig,
) -> Arc<ServerState> {
    let mut config = OrchestratorConfig::new(deployments);
    config.port_range = PortRange::new(3001, 3003);
    let orchestrator = Orchestrator::new(store.clone(), Arc::new(NullEngine), config);
    let terminal = TerminalManager::new(store, terminal);
    Arc::new(ServerState::new(orchestrator, terminal, secret(), None))
}

/// Serve on an ephemeral port until the test ends
pub async fn spawn_server(state: Arc<ServerState>) -> SocketAddr {
    let options = ServerOptions {
        host: "127.0.0.1".to_string(),
        port: 0,
    };
    let (addr, _handle) = serve(&options, state, std::future::pending()).await.unwrap();
    addr
}
