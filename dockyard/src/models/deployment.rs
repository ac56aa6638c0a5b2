//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }
}

/// What started the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentTrigger {
    #[default]
    Manual,
    Webhook,
    Redeploy,
    Restart,
    Stop,
}

/// Audit record of one orchestration run.
///
/// Immutable once `status` is finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub project_id: String,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub trigger: DeploymentTrigger,
    #[serde(default)]
    pub logs: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn new(project_id: &str, status: DeploymentStatus, trigger: DeploymentTrigger) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            status,
            trigger,
            logs: String::new(),
            commit_message: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn success(&self) -> bool {
        self.status == DeploymentStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_deployment_is_open() {
        let deployment = Deployment::new("p1", DeploymentStatus::InProgress, DeploymentTrigger::Manual);
        assert_eq!(deployment.project_id, "p1");
        assert!(!deployment.status.is_finished());
        assert!(deployment.finished_at.is_none());
        assert!(!deployment.success());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&DeploymentStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
