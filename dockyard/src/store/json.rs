//! JSON-file backed store
//!
//! All records live in memory behind one async mutex, which is the single
//! writer for every mutation (port locks included). Each mutation is applied
//! to a copy, flushed to disk with an atomic temp-file rename, and becomes
//! visible only once the flush succeeded.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::DockyardError;
use crate::filesys::file::File;
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::models::port::{PortOwner, PortRange, PortRecord};
use crate::models::project::{AdminAccount, EnvVar, Project, ProjectStatus, Service};
use crate::store::Store;

/// Serialized store contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub projects: BTreeMap<String, Project>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, Vec<EnvVar>>,
    #[serde(default)]
    pub deployments: Vec<Deployment>,
    #[serde(default)]
    pub ports: BTreeMap<u16, PortRecord>,
    #[serde(default)]
    pub admin: Option<AdminAccount>,
}

/// Store persisted as a single JSON document
pub struct JsonStore {
    state: Mutex<StoreState>,
    file: Option<File>,
}

impl JsonStore {
    /// Store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            file: None,
        }
    }

    /// Open (or create) the store backed by `file`
    pub async fn open(file: File) -> Result<Self, DockyardError> {
        let state = if file.exists().await {
            let state: StoreState = file.read_json().await.map_err(|e| {
                DockyardError::StorageError(format!(
                    "Unable to read store {}: {}",
                    file.path().display(),
                    e
                ))
            })?;
            info!(
                "Loaded store from {} ({} projects, {} services)",
                file.path().display(),
                state.projects.len(),
                state.services.len()
            );
            state
        } else {
            info!("Creating new store at {}", file.path().display());
            StoreState::default()
        };

        Ok(Self {
            state: Mutex::new(state),
            file: Some(file),
        })
    }

    /// Insert or replace a project record
    pub async fn insert_project(&self, project: Project) -> Result<(), DockyardError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.clone();
        state.projects.insert(project.id.clone(), project);
        self.commit(&mut guard, state).await
    }

    /// Replace the environment variables of a project
    pub async fn set_env_vars(&self, project_id: &str, vars: Vec<EnvVar>) -> Result<(), DockyardError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.clone();
        state.env_vars.insert(project_id.to_string(), vars);
        self.commit(&mut guard, state).await
    }

    /// Snapshot of the whole state
    pub async fn snapshot(&self) -> StoreState {
        self.state.lock().await.clone()
    }

    /// Flush `next` and only then make it the live state
    async fn commit(&self, live: &mut StoreState, next: StoreState) -> Result<(), DockyardError> {
        self.persist(&next).await?;
        *live = next;
        Ok(())
    }

    async fn persist(&self, state: &StoreState) -> Result<(), DockyardError> {
        if let Some(file) = &self.file {
            let contents = serde_json::to_vec_pretty(state)?;
            file.write_atomic(&contents).await?;
            // holds the admin password hash
            file.set_permissions_600().await?;
            debug!("Store flushed to {}", file.path().display());
        }
        Ok(())
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, DockyardError> {
        Ok(self.state.lock().await.projects.get(project_id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, DockyardError> {
        Ok(self.state.lock().await.projects.values().cloned().collect())
    }

    async fn update_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
    ) -> Result<(), DockyardError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.clone();
        let project = state
            .projects
            .get_mut(project_id)
            .ok_or_else(|| DockyardError::NotFound(format!("Project {}", project_id)))?;
        project.status = status;
        self.commit(&mut guard, state).await
    }

    async fn list_services(&self, project_id: &str) -> Result<Vec<Service>, DockyardError> {
        Ok(self
            .state
            .lock()
            .await
            .services
            .iter()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn find_service(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Option<Service>, DockyardError> {
        Ok(self
            .state
            .lock()
            .await
            .services
            .iter()
            .find(|s| s.project_id == project_id && s.name == name)
            .cloned())
    }

    async fn find_service_by_container(
        &self,
        project_id: &str,
        container_name: &str,
    ) -> Result<Option<Service>, DockyardError> {
        Ok(self
            .state
            .lock()
            .await
            .services
            .iter()
            .find(|s| s.project_id == project_id && s.container_name == container_name)
            .cloned())
    }

    async fn upsert_service(&self, service: Service) -> Result<Service, DockyardError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.clone();
        match state.services.iter_mut().find(|s| s.id == service.id) {
            Some(existing) => *existing = service.clone(),
            None => state.services.push(service.clone()),
        }
        self.commit(&mut guard, state).await?;
        Ok(service)
    }

    async fn update_service_status(
        &self,
        service_id: &str,
        status: &str,
    ) -> Result<(), DockyardError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.clone();
        let service = state
            .services
            .iter_mut()
            .find(|s| s.id == service_id)
            .ok_or_else(|| DockyardError::NotFound(format!("Service {}", service_id)))?;
        service.status = status.to_string();
        self.commit(&mut guard, state).await
    }

    async fn update_services_for_project(
        &self,
        project_id: &str,
        status: &str,
    ) -> Result<usize, DockyardError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.clone();
        let mut count = 0;
        for service in state.services.iter_mut().filter(|s| s.project_id == project_id) {
            service.status = status.to_string();
            count += 1;
        }
        self.commit(&mut guard, state).await?;
        Ok(count)
    }

    async fn update_service_domain(
        &self,
        project_id: &str,
        service_id: &str,
        domain: Option<String>,
    ) -> Result<Option<Service>, DockyardError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.clone();
        let updated = match state
            .services
            .iter_mut()
            .find(|s| s.id == service_id && s.project_id == project_id)
        {
            Some(service) => {
                service.domain = domain;
                Some(service.clone())
            }
            None => None,
        };
        if updated.is_some() {
            self.commit(&mut guard, state).await?;
        }
        Ok(updated)
    }

    async fn list_env_vars(&self, project_id: &str) -> Result<Vec<EnvVar>, DockyardError> {
        Ok(self
            .state
            .lock()
            .await
            .env_vars
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_deployment(&self, deployment: Deployment) -> Result<Deployment, DockyardError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.clone();
        state.deployments.push(deployment.clone());
        self.commit(&mut guard, state).await?;
        Ok(deployment)
    }

    async fn update_deployment_logs(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        logs: &str,
    ) -> Result<(), DockyardError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.clone();
        let deployment = state
            .deployments
            .iter_mut()
            .find(|d| d.id == deployment_id)
            .ok_or_else(|| DockyardError::NotFound(format!("Deployment {}", deployment_id)))?;
        if deployment.status.is_finished() {
            return Err(DockyardError::StorageError(format!(
                "Deployment {} is already finished",
                deployment_id
            )));
        }
        deployment.status = status;
        deployment.logs = logs.to_string();
        self.commit(&mut guard, state).await
    }

    async fn finish_deployment(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        logs: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DockyardError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.clone();
        let deployment = state
            .deployments
            .iter_mut()
            .find(|d| d.id == deployment_id)
            .ok_or_else(|| DockyardError::NotFound(format!("Deployment {}", deployment_id)))?;
        if deployment.status.is_finished() {
            return Err(DockyardError::StorageError(format!(
                "Deployment {} is already finished",
                deployment_id
            )));
        }
        deployment.status = status;
        deployment.logs = logs.to_string();
        deployment.finished_at = Some(finished_at);
        self.commit(&mut guard, state).await
    }

    async fn list_deployments(
        &self,
        project_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Deployment>, DockyardError> {
        let state = self.state.lock().await;
        let mut deployments: Vec<Deployment> = state
            .deployments
            .iter()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect();
        deployments.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(deployments.into_iter().skip(offset).take(limit).collect())
    }

    async fn lock_port(&self, owner: &PortOwner, range: PortRange) -> Result<u16, DockyardError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.clone();

        if let Some(record) = state.ports.values().find(|r| r.held_by(owner)) {
            return Ok(record.port);
        }

        let port = range
            .iter()
            .find(|port| state.ports.get(port).map(|r| !r.locked).unwrap_or(true))
            .ok_or(DockyardError::PortsExhausted {
                first: range.first,
                last: range.last,
            })?;

        state.ports.insert(
            port,
            PortRecord {
                port,
                project_id: Some(owner.project_id.clone()),
                service_name: Some(owner.service_name.clone()),
                locked: true,
            },
        );
        self.commit(&mut guard, state).await?;
        Ok(port)
    }

    async fn release_port(&self, port: u16) -> Result<bool, DockyardError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.clone();
        let removed = state.ports.remove(&port).is_some();
        if removed {
            self.commit(&mut guard, state).await?;
        }
        Ok(removed)
    }

    async fn list_ports(&self) -> Result<Vec<PortRecord>, DockyardError> {
        Ok(self.state.lock().await.ports.values().cloned().collect())
    }

    async fn admin_account(&self) -> Result<Option<AdminAccount>, DockyardError> {
        Ok(self.state.lock().await.admin.clone())
    }

    async fn set_admin_account(&self, account: AdminAccount) -> Result<(), DockyardError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.clone();
        state.admin = Some(account);
        self.commit(&mut guard, state).await
    }
}
