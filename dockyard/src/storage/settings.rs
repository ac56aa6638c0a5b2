//! Settings file management
//!
//! Every field has a serde default so a partial (or missing) settings file
//! is valid. Selected fields can be overridden from the environment.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::deploy::orchestrator::OrchestratorConfig;
use crate::deploy::scanner::DEFAULT_SCAN_DEPTH;
use crate::errors::DockyardError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::models::port::PortRange;
use crate::storage::layout::StorageLayout;
use crate::terminal::{default_cwd, TerminalConfig};

/// Control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    pub server: ServerSettings,

    /// Parent of the per-project source trees; the layout's
    /// `deployments/` directory when unset
    #[serde(default)]
    pub deployments_path: Option<PathBuf>,

    #[serde(default)]
    pub docker: DockerSettings,

    #[serde(default)]
    pub ports: PortSettings,

    #[serde(default = "default_scan_depth")]
    pub scan_depth: usize,

    #[serde(default)]
    pub terminal: TerminalSettings,

    /// HS256 secret shared with the dashboard that issues access tokens
    #[serde(default, skip_serializing, deserialize_with = "deserialize_secret")]
    pub jwt_secret: Option<SecretString>,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn default_scan_depth() -> usize {
    DEFAULT_SCAN_DEPTH
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            server: ServerSettings::default(),
            deployments_path: None,
            docker: DockerSettings::default(),
            ports: PortSettings::default(),
            scan_depth: DEFAULT_SCAN_DEPTH,
            terminal: TerminalSettings::default(),
            jwt_secret: None,
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Host printed in service endpoint URLs
    #[serde(default)]
    pub public_host: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_host: None,
        }
    }
}

/// Container engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerSettings {
    /// Client binary
    #[serde(default = "default_docker_program")]
    pub program: String,

    /// Shared external network
    #[serde(default = "default_network")]
    pub network: String,
}

fn default_docker_program() -> String {
    "docker".to_string()
}

fn default_network() -> String {
    "dockyard_network".to_string()
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            program: default_docker_program(),
            network: default_network(),
        }
    }
}

/// Host port range handed out to services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSettings {
    #[serde(default = "default_first_port")]
    pub first: u16,

    #[serde(default = "default_last_port")]
    pub last: u16,
}

fn default_first_port() -> u16 {
    3001
}

fn default_last_port() -> u16 {
    3100
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            first: default_first_port(),
            last: default_last_port(),
        }
    }
}

/// Interactive shell settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSettings {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: u32,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

fn default_max_sessions() -> usize {
    3
}

fn default_max_auth_attempts() -> u32 {
    5
}

fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_auth_attempts: default_max_auth_attempts(),
            idle_timeout_secs: default_idle_timeout_secs(),
            cwd: None,
        }
    }
}

impl Settings {
    /// Read the settings file, falling back to defaults when it is absent
    pub async fn load(file: &File) -> Result<Self, DockyardError> {
        if !file.exists().await {
            info!("No settings at {}, using defaults", file.path().display());
            return Ok(Self::default());
        }
        file.read_json().await.map_err(|e| {
            DockyardError::ConfigError(format!("Unable to read {}: {}", file.path().display(), e))
        })
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), DockyardError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), DockyardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("DOCKYARD_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| DockyardError::ConfigError(format!("Invalid DOCKYARD_PORT '{}'", port)))?;
        }
        if let Some(host) = lookup("DOCKYARD_HOST") {
            self.server.host = host;
        }
        if let Some(host) = lookup("DOCKYARD_PUBLIC_HOST") {
            self.server.public_host = Some(host);
        }
        if let Some(path) = lookup("DEPLOYMENTS_PATH") {
            self.deployments_path = Some(PathBuf::from(path));
        }
        if let Some(network) = lookup("DOCKER_NETWORK") {
            self.docker.network = network;
        }
        if let Some(secret) = lookup("JWT_SECRET") {
            self.jwt_secret = Some(SecretString::from(secret));
        }
        if let Some(level) = lookup("DOCKYARD_LOG_LEVEL") {
            self.log_level = level.parse().map_err(DockyardError::ConfigError)?;
        }
        Ok(())
    }

    /// Reject values the control plane cannot run with
    pub fn validate(&self) -> Result<(), DockyardError> {
        if self.ports.first == 0 || self.ports.first > self.ports.last {
            return Err(DockyardError::ConfigError(format!(
                "Invalid port range {}-{}",
                self.ports.first, self.ports.last
            )));
        }
        if self.docker.network.trim().is_empty() {
            return Err(DockyardError::ConfigError("Docker network name is empty".to_string()));
        }
        if self.terminal.max_sessions == 0 {
            return Err(DockyardError::ConfigError("terminal.max_sessions must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn deployments_path(&self, layout: &StorageLayout) -> PathBuf {
        self.deployments_path
            .clone()
            .unwrap_or_else(|| layout.deployment_dir().path().to_path_buf())
    }

    pub fn orchestrator_config(&self, layout: &StorageLayout) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::new(self.deployments_path(layout));
        config.network = self.docker.network.clone();
        config.compose_program = self.docker.program.clone();
        config.scan_depth = self.scan_depth;
        config.port_range = PortRange::new(self.ports.first, self.ports.last);
        config
    }

    pub fn terminal_config(&self) -> TerminalConfig {
        TerminalConfig {
            max_sessions: self.terminal.max_sessions,
            max_auth_attempts: self.terminal.max_auth_attempts,
            idle_timeout: Duration::from_secs(self.terminal.idle_timeout_secs),
            cwd: self.terminal.cwd.clone().unwrap_or_else(default_cwd),
            ..TerminalConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"server":{"port":8080}}"#).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.docker.network, "dockyard_network");
        assert_eq!((settings.ports.first, settings.ports.last), (3001, 3100));
        assert_eq!(settings.scan_depth, 2);
        assert_eq!(settings.terminal.idle_timeout_secs, 1800);
        assert!(settings.jwt_secret.is_none());
    }

    #[test]
    fn test_secret_from_file() {
        let settings: Settings = serde_json::from_str(r#"{"jwt_secret":"from-file"}"#).unwrap();
        assert_eq!(settings.jwt_secret.unwrap().expose_secret(), "from-file");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DOCKYARD_PORT", "4000"),
            ("DEPLOYMENTS_PATH", "/srv/projects"),
            ("DOCKER_NETWORK", "edge"),
            ("JWT_SECRET", "s3cret"),
            ("DOCKYARD_LOG_LEVEL", "debug"),
        ]);
        let mut settings = Settings::default();
        settings
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.deployments_path, Some(PathBuf::from("/srv/projects")));
        assert_eq!(settings.docker.network, "edge");
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.jwt_secret.as_ref().unwrap().expose_secret(), "s3cret");
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let mut settings = Settings::default();
        let err = settings
            .apply_overrides(|key| (key == "DOCKYARD_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, DockyardError::ConfigError(_)));
    }

    #[test]
    fn test_secret_is_never_serialized() {
        let mut settings = Settings::default();
        settings.jwt_secret = Some(SecretString::from("s3cret".to_string()));
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("s3cret"));
    }

    #[test]
    fn test_validate() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());
        settings.ports.first = 4000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_derived_configs() {
        let layout = StorageLayout::new("/tmp/dockyard-test");
        let settings = Settings::default();

        let orchestrator = settings.orchestrator_config(&layout);
        assert_eq!(orchestrator.deployments_path, PathBuf::from("/tmp/dockyard-test/deployments"));
        assert_eq!(orchestrator.port_range, PortRange::new(3001, 3100));

        let terminal = settings.terminal_config();
        assert_eq!(terminal.idle_timeout, Duration::from_secs(1800));
        assert_eq!(terminal.max_sessions, 3);
    }
}
