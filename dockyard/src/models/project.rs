//! Project and service models

use serde::{Deserialize, Serialize};

/// Lifecycle status of a project.
///
/// Not authoritative: the orchestrator overwrites it on every trigger and the
/// container listing re-syncs it from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Pending,
    Building,
    Running,
    Stopped,
    Error,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Pending => "pending",
            ProjectStatus::Building => "building",
            ProjectStatus::Running => "running",
            ProjectStatus::Stopped => "stopped",
            ProjectStatus::Error => "error",
        }
    }
}

/// Where the project's source tree comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Upload,
    Git,
}

/// Declared kind of project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    #[default]
    App,
    Database,
}

/// A deployable project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub source: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub kind: ProjectKind,
    #[serde(default)]
    pub status: ProjectStatus,
    /// Domain handed to the first service created for this project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl Project {
    pub fn is_git(&self) -> bool {
        self.source == SourceKind::Git && self.git_url.is_some()
    }
}

/// One container of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub dockerfile_path: String,
    pub container_name: String,
    pub internal_port: u16,
    #[serde(default)]
    pub port: Option<u16>,
    /// Comma-separated hostnames
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_service_status")]
    pub status: String,
}

fn default_service_status() -> String {
    "pending".to_string()
}

/// Deterministic container name for a project's service.
///
/// Keeps the name well under the 64 character hostname limit.
pub fn container_name(project_id: &str, service_name: &str) -> String {
    let short_id: String = project_id.chars().take(8).collect();
    let short_name: String = service_name.chars().take(50).collect();
    format!("dl_{}_{}", short_id, short_name)
}

/// Environment variable declared on a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
    /// Passed to the build as a build argument
    #[serde(default)]
    pub build_arg: bool,
    /// Passed to the running container
    #[serde(default = "default_true")]
    pub runtime: bool,
}

fn default_true() -> bool {
    true
}

/// The single account allowed to open an interactive shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAccount {
    pub email: String,
    /// argon2 PHC string
    pub password_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_is_deterministic() {
        let name = container_name("0123456789abcdef", "worker");
        assert_eq!(name, "dl_01234567_worker");
        assert_eq!(name, container_name("0123456789abcdef", "worker"));
    }

    #[test]
    fn test_container_name_truncates_long_service_names() {
        let long = "s".repeat(80);
        let name = container_name("abc", &long);
        assert_eq!(name, format!("dl_abc_{}", "s".repeat(50)));
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ProjectStatus::Building).unwrap();
        assert_eq!(json, "\"building\"");
        let status: ProjectStatus = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(status, ProjectStatus::Error);
    }

    #[test]
    fn test_env_var_defaults_to_runtime() {
        let var: EnvVar = serde_json::from_str(r#"{"key":"A","value":"1"}"#).unwrap();
        assert!(var.runtime);
        assert!(!var.build_arg);
    }
}
