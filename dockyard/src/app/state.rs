//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::deploy::orchestrator::Orchestrator;
use crate::engine::DockerCli;
use crate::errors::DockyardError;
use crate::filesys::dir::Dir;
use crate::store::{JsonStore, Store};
use crate::terminal::TerminalManager;

/// Main application state
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub orchestrator: Orchestrator,
    pub terminal: TerminalManager,
}

impl AppState {
    /// Open storage and build the orchestrator and terminal manager
    pub async fn init(options: &AppOptions) -> Result<Self, DockyardError> {
        info!("Initializing application state...");

        options.layout.setup().await?;
        Dir::new(&options.orchestrator.deployments_path).create().await?;

        let store: Arc<dyn Store> = Arc::new(JsonStore::open(options.layout.store_file()).await?);
        let engine = Arc::new(DockerCli::with_program(options.docker_program.clone()));
        let orchestrator = Orchestrator::new(store.clone(), engine, options.orchestrator.clone());
        let terminal = TerminalManager::new(store.clone(), options.terminal.clone());

        // nothing can be in flight yet, so open builds were interrupted
        match orchestrator.recover_interrupted().await {
            Ok(0) => {}
            Ok(n) => warn!("Marked {} interrupted build(s) as failed", n),
            Err(e) => warn!("Unable to recover interrupted builds: {}", e),
        }

        Ok(Self {
            store,
            orchestrator,
            terminal,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), DockyardError> {
        info!("Shutting down application state...");
        self.terminal.shutdown();
        Ok(())
    }
}
