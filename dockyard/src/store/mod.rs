//! Persistence collaborator
//!
//! The orchestrator never keeps projects, services, deployments or ports as
//! long-lived in-process state: it reads and writes them through [`Store`].

pub mod json;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::DockyardError;
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::models::port::{PortOwner, PortRange, PortRecord};
use crate::models::project::{AdminAccount, EnvVar, Project, ProjectStatus, Service};

pub use json::JsonStore;

/// Repository-style access to project metadata
#[async_trait]
pub trait Store: Send + Sync {
    // Projects
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, DockyardError>;
    async fn list_projects(&self) -> Result<Vec<Project>, DockyardError>;
    async fn update_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
    ) -> Result<(), DockyardError>;

    // Services
    async fn list_services(&self, project_id: &str) -> Result<Vec<Service>, DockyardError>;
    async fn find_service(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Option<Service>, DockyardError>;
    async fn find_service_by_container(
        &self,
        project_id: &str,
        container_name: &str,
    ) -> Result<Option<Service>, DockyardError>;
    async fn upsert_service(&self, service: Service) -> Result<Service, DockyardError>;
    async fn update_service_status(&self, service_id: &str, status: &str)
        -> Result<(), DockyardError>;
    /// Update every service of a project, returning how many matched
    async fn update_services_for_project(
        &self,
        project_id: &str,
        status: &str,
    ) -> Result<usize, DockyardError>;
    /// Returns the updated service, or `None` when it does not belong to the project
    async fn update_service_domain(
        &self,
        project_id: &str,
        service_id: &str,
        domain: Option<String>,
    ) -> Result<Option<Service>, DockyardError>;

    // Environment
    async fn list_env_vars(&self, project_id: &str) -> Result<Vec<EnvVar>, DockyardError>;

    // Deployments
    async fn create_deployment(&self, deployment: Deployment) -> Result<Deployment, DockyardError>;
    async fn update_deployment_logs(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        logs: &str,
    ) -> Result<(), DockyardError>;
    async fn finish_deployment(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        logs: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DockyardError>;
    async fn list_deployments(
        &self,
        project_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Deployment>, DockyardError>;

    // Ports
    /// Atomically create or update a port lock for `owner` inside `range`.
    ///
    /// A lock already held by the same owner is returned unchanged; otherwise
    /// the lowest port that is absent or unlocked is taken.
    async fn lock_port(&self, owner: &PortOwner, range: PortRange) -> Result<u16, DockyardError>;
    async fn release_port(&self, port: u16) -> Result<bool, DockyardError>;
    async fn list_ports(&self) -> Result<Vec<PortRecord>, DockyardError>;

    // Account
    async fn admin_account(&self) -> Result<Option<AdminAccount>, DockyardError>;
    async fn set_admin_account(&self, account: AdminAccount) -> Result<(), DockyardError>;
}
