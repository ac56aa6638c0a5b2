//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::deploy::orchestrator::OrchestratorConfig;
use crate::errors::DockyardError;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::terminal::TerminalConfig;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    pub server: ServerOptions,

    pub orchestrator: OrchestratorConfig,

    pub terminal: TerminalConfig,

    /// Container engine client binary
    pub docker_program: String,

    /// Shared secret for bearer token verification
    pub jwt_secret: SecretString,

    /// Host printed in deploy endpoint summaries
    pub public_host: Option<String>,
}

impl AppOptions {
    /// Derive options from validated settings
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Result<Self, DockyardError> {
        settings.validate()?;
        let jwt_secret = settings.jwt_secret.clone().ok_or_else(|| {
            DockyardError::ConfigError("jwt_secret is not configured (set JWT_SECRET)".to_string())
        })?;

        Ok(Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            orchestrator: settings.orchestrator_config(&layout),
            terminal: settings.terminal_config(),
            docker_program: settings.docker.program.clone(),
            jwt_secret,
            public_host: settings.server.public_host.clone(),
            layout,
        })
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}
