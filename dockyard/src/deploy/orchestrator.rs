//! Project lifecycle orchestration
//!
//! Every trigger validates synchronously, then runs on a detached task that
//! streams output to the caller and persists the outcome whether or not the
//! caller is still listening.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::channel::mpsc as live;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::deploy::compose::{write_manifest, ComposeService};
use crate::deploy::fsm::{ProjectEvent, ProjectFsm};
use crate::deploy::git::{last_commit_message, sync_source};
use crate::deploy::guard::{GuardTicket, InFlight, ProjectGuards};
use crate::deploy::ports::PortAllocator;
use crate::deploy::scanner::{missing_build_args, scan_dockerfiles, BuildUnit, DEFAULT_SCAN_DEPTH};
use crate::deploy::supervisor::{
    validate_project_id, ChunkSink, ComposeCommand, LiveSink, OperationLog, ProcessSupervisor,
};
use crate::domains::normalize_domain_field;
use crate::filesys::dir::Dir;
use crate::engine::ContainerEngine;
use crate::errors::DockyardError;
use crate::models::deployment::{Deployment, DeploymentStatus, DeploymentTrigger};
use crate::models::port::PortRange;
use crate::models::project::{container_name, Project, ProjectStatus, Service};
use crate::store::Store;

/// Interval between log checkpoints while a process runs
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(2);

/// How long a cancel waits for the build to wind down before tearing down
const CANCEL_GRACE: Duration = Duration::from_secs(30);

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory holding one source tree per project id
    pub deployments_path: PathBuf,
    /// Shared external network every service joins
    pub network: String,
    pub scan_depth: usize,
    pub port_range: PortRange,
    /// Client binary the compose arguments are passed to
    pub compose_program: String,
    pub checkpoint_every: Duration,
}

impl OrchestratorConfig {
    pub fn new(deployments_path: impl Into<PathBuf>) -> Self {
        Self {
            deployments_path: deployments_path.into(),
            network: "dockyard_network".to_string(),
            scan_depth: DEFAULT_SCAN_DEPTH,
            port_range: PortRange::default(),
            compose_program: "docker".to_string(),
            checkpoint_every: CHECKPOINT_INTERVAL,
        }
    }
}

/// Caller-supplied deploy parameters
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    pub trigger: DeploymentTrigger,
    pub commit_message: Option<String>,
    /// Host used when printing service endpoints
    pub host: Option<String>,
}

/// A running operation: its audit record and its live output
#[derive(Debug)]
pub struct Operation {
    deployment_id: Option<String>,
    output: live::UnboundedReceiver<Vec<u8>>,
    task: JoinHandle<()>,
}

impl Operation {
    pub fn deployment_id(&self) -> Option<&str> {
        self.deployment_id.as_deref()
    }

    /// Live output; the operation keeps running if this is dropped
    pub fn into_output(self) -> live::UnboundedReceiver<Vec<u8>> {
        self.output
    }

    /// Wait for completion and return everything that was streamed
    pub async fn finish(self) -> Result<String, DockyardError> {
        self.task
            .await
            .map_err(|e| DockyardError::Internal(format!("Operation task failed: {}", e)))?;
        let chunks: Vec<Vec<u8>> = self.output.collect().await;
        Ok(String::from_utf8_lossy(&chunks.concat()).into_owned())
    }
}

/// State carried by one detached operation
struct RunContext {
    project: Project,
    deployment_id: Option<String>,
    ticket: Option<GuardTicket>,
    log: OperationLog,
    endpoints: Vec<(String, u16)>,
    host: String,
}

impl RunContext {
    fn flight(&self) -> Option<Arc<InFlight>> {
        self.ticket.as_ref().map(|t| t.flight().clone())
    }
}

/// Drives deploy, stop, restart, redeploy and cancel for projects
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn Store>,
    engine: Arc<dyn ContainerEngine>,
    ports: PortAllocator,
    supervisor: ProcessSupervisor,
    guards: ProjectGuards,
    config: Arc<OrchestratorConfig>,
}

fn heavy_rule() -> String {
    "━".repeat(50)
}

fn light_rule() -> String {
    "─".repeat(40)
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn ContainerEngine>,
        config: OrchestratorConfig,
    ) -> Self {
        let ports = PortAllocator::new(store.clone(), config.port_range);
        Self {
            store,
            engine,
            ports,
            supervisor: ProcessSupervisor::new(),
            guards: ProjectGuards::new(),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Source tree of a project
    pub fn project_root(&self, project_id: &str) -> PathBuf {
        self.config.deployments_path.join(project_id)
    }

    /// Load a project, rejecting ids that are unsafe as compose project names
    pub async fn require_project(&self, project_id: &str) -> Result<Project, DockyardError> {
        validate_project_id(project_id)?;
        self.store
            .get_project(project_id)
            .await?
            .ok_or_else(|| DockyardError::NotFound(format!("Project {}", project_id)))
    }

    // ----------------------------------------------------------------------
    // Triggers
    // ----------------------------------------------------------------------

    /// Scan, allocate, generate the manifest, then build and start
    pub async fn deploy(&self, project_id: &str, request: DeployRequest) -> Result<Operation, DockyardError> {
        let project = self.require_project(project_id).await?;
        let ticket = self.guards.acquire(project_id, "deploy")?;
        check_accepts(&project, &ProjectEvent::Build)?;

        let root = self.project_root(project_id);
        let root_exists = Dir::new(&root).exists().await;
        if root_exists {
            if self.scan(&root).await.is_empty() {
                return Err(DockyardError::ValidationError(
                    "No Dockerfile found in project. A Dockerfile is required to build and run the application."
                        .to_string(),
                ));
            }
        } else if !project.is_git() {
            return Err(DockyardError::ValidationError("Project files not found".to_string()));
        }

        let mut commit_message = request.commit_message.clone();
        if commit_message.is_none() && project.is_git() && root_exists {
            commit_message = last_commit_message(&root).await;
        }

        let mut deployment = Deployment::new(project_id, DeploymentStatus::InProgress, request.trigger);
        deployment.commit_message = commit_message;
        deployment.logs = "🚀 Starting deployment...\n".to_string();
        let deployment = self.store.create_deployment(deployment).await?;
        if let Err(e) = self.transition(project_id, ProjectEvent::Build).await {
            self.abandon(&deployment.id, &e).await;
            return Err(e);
        }

        info!("Deploying project {} (deployment {})", project_id, deployment.id);
        let host = request.host.unwrap_or_else(|| "localhost".to_string());
        Ok(self.launch(project, Some(deployment.id), Some(ticket), host, |this, ctx| {
            Box::pin(this.run_deploy(ctx))
        }))
    }

    /// Stop and remove all containers of a project
    pub async fn stop(&self, project_id: &str) -> Result<Operation, DockyardError> {
        let project = self.require_project(project_id).await?;
        let ticket = self.guards.acquire(project_id, "stop")?;
        self.require_root(project_id).await?;

        let deployment = self
            .open_deployment(project_id, DeploymentTrigger::Stop, "🛑 Stopping project...\n")
            .await?;

        info!("Stopping project {}", project_id);
        Ok(self.launch(project, Some(deployment.id), Some(ticket), String::new(), |this, ctx| {
            Box::pin(this.run_simple(
                ctx,
                ComposeCommand::Down,
                "🛑 STOPPING PROJECT",
                "STOP",
                ProjectEvent::Stop,
            ))
        }))
    }

    /// Restart all containers of a project
    pub async fn restart(&self, project_id: &str) -> Result<Operation, DockyardError> {
        let project = self.require_project(project_id).await?;
        let ticket = self.guards.acquire(project_id, "restart")?;
        check_accepts(&project, &ProjectEvent::Build)?;
        self.require_root(project_id).await?;

        let deployment = self
            .open_deployment(project_id, DeploymentTrigger::Restart, "🔄 Starting restart...\n")
            .await?;
        if let Err(e) = self.transition(project_id, ProjectEvent::Build).await {
            self.abandon(&deployment.id, &e).await;
            return Err(e);
        }

        info!("Restarting project {}", project_id);
        Ok(self.launch(project, Some(deployment.id), Some(ticket), String::new(), |this, ctx| {
            Box::pin(this.run_simple(
                ctx,
                ComposeCommand::Restart,
                "🔄 RESTARTING PROJECT",
                "RESTART",
                ProjectEvent::Succeeded,
            ))
        }))
    }

    /// Rebuild every service, forcing container recreation
    pub async fn redeploy(&self, project_id: &str) -> Result<Operation, DockyardError> {
        let project = self.require_project(project_id).await?;
        let ticket = self.guards.acquire(project_id, "redeploy")?;
        check_accepts(&project, &ProjectEvent::Build)?;
        self.require_root(project_id).await?;

        let deployment = self
            .open_deployment(project_id, DeploymentTrigger::Redeploy, "🔄 Starting redeploy...\n")
            .await?;
        if let Err(e) = self.transition(project_id, ProjectEvent::Build).await {
            self.abandon(&deployment.id, &e).await;
            return Err(e);
        }

        info!("Redeploying project {}", project_id);
        Ok(self.launch(project, Some(deployment.id), Some(ticket), String::new(), |this, ctx| {
            Box::pin(this.run_simple(
                ctx,
                ComposeCommand::Rebuild,
                "🔄 REDEPLOYING CONTAINER",
                "REDEPLOY",
                ProjectEvent::Succeeded,
            ))
        }))
    }

    /// Abort an in-flight build and force the project to stopped
    pub async fn cancel(&self, project_id: &str) -> Result<Operation, DockyardError> {
        let project = self.require_project(project_id).await?;
        let flight = self.guards.in_flight(project_id);
        if flight.is_none() && project.status != ProjectStatus::Building {
            return Err(DockyardError::ValidationError(format!(
                "No build in progress for project {}",
                project_id
            )));
        }
        if let Some(flight) = &flight {
            info!("Cancelling {} for project {}", flight.operation(), project_id);
            flight.cancel();
        }

        Ok(self.launch(project, None, None, String::new(), move |this, ctx| {
            Box::pin(this.run_cancel(ctx, flight))
        }))
    }

    /// Mark builds that were cut short by a restart of this process as failed
    pub async fn recover_interrupted(&self) -> Result<usize, DockyardError> {
        let mut recovered = 0;
        for project in self.store.list_projects().await? {
            if self.guards.in_flight(&project.id).is_some() {
                continue;
            }

            for deployment in self.store.list_deployments(&project.id, usize::MAX, 0).await? {
                if deployment.status.is_finished() {
                    continue;
                }
                let logs = format!(
                    "{}\n⚠️ Interrupted before completion\n",
                    deployment.logs
                );
                self.store
                    .finish_deployment(&deployment.id, DeploymentStatus::Failed, &logs, Utc::now())
                    .await?;
            }

            if project.status == ProjectStatus::Building {
                self.transition(&project.id, ProjectEvent::Failed("interrupted".to_string()))
                    .await?;
                warn!("Project {} was building when the control plane stopped", project.id);
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    // ----------------------------------------------------------------------
    // Operation bodies
    // ----------------------------------------------------------------------

    async fn run_deploy(self, mut ctx: RunContext) {
        ctx.log.line("🚀 Starting deployment...");

        let outcome = self.deploy_steps(&mut ctx).await;
        let success = match &outcome {
            Ok(0) => {
                banner(&mut ctx.log, &["✅ DEPLOY SUCCESSFUL!"]);
                ctx.log.line("🌐 ENDPOINTS:");
                for (name, port) in &ctx.endpoints {
                    ctx.log.line(&format!("  📍 {}: http://{}:{}", name, ctx.host, port));
                }
                true
            }
            Ok(code) => {
                let headline = format!("❌ DEPLOY FAILED (Exit Code: {})", code);
                banner(&mut ctx.log, &[headline.as_str()]);
                false
            }
            Err(e) => {
                ctx.log.line(&format!("\n❌ {}", e));
                banner(&mut ctx.log, &["❌ DEPLOY FAILED"]);
                false
            }
        };

        ctx.log.line(&format!(
            "\n📊 Deployment complete! Status: {}",
            if success { "SUCCESS ✅" } else { "FAILED ❌" }
        ));
        let reason = match &outcome {
            Ok(code) => format!("exit code {}", code),
            Err(e) => e.to_string(),
        };
        self.conclude(ctx, success, ProjectEvent::Succeeded, ProjectEvent::Failed(reason))
            .await;
    }

    async fn deploy_steps(&self, ctx: &mut RunContext) -> Result<i32, DockyardError> {
        let project_id = ctx.project.id.clone();
        let root = self.project_root(&project_id);

        if let (true, Some(url)) = (ctx.project.is_git(), ctx.project.git_url.clone()) {
            sync_source(
                &self.supervisor,
                &url,
                ctx.project.git_branch.as_deref(),
                &root,
                &mut ctx.log,
            )
            .await?;
        }
        check_cancelled(ctx)?;

        let units = self.scan(&root).await;
        if units.is_empty() {
            return Err(DockyardError::ValidationError(
                "No Dockerfile found in project".to_string(),
            ));
        }

        self.engine.ensure_network(&self.config.network).await?;
        check_cancelled(ctx)?;

        ctx.log.line(&format!("\n{}", heavy_rule()));
        ctx.log.line(&format!("📦 DETECTED {} DOCKERFILE(S)", units.len()));
        ctx.log.line(&format!("{}\n", heavy_rule()));

        let mut services = Vec::with_capacity(units.len());
        for (index, unit) in units.iter().enumerate() {
            ctx.log.line(&format!("  🐳 {}: {}", unit.name, unit.dockerfile_path));
            ctx.log.line(&format!("     Internal port: {}", unit.internal_port));

            let service = self.prepare_service(&ctx.project, unit, index == 0, &mut ctx.log).await?;
            let port = service.port.ok_or_else(|| {
                DockyardError::Internal(format!("Service {} has no port", service.name))
            })?;
            ctx.endpoints.push((service.name.clone(), port));
            services.push(ComposeService {
                name: service.name,
                container_name: service.container_name,
                dockerfile_path: unit.dockerfile_path.clone(),
                internal_port: unit.internal_port,
                external_port: port,
            });
        }

        ctx.log.line(&format!("\n{}", light_rule()));
        ctx.log.line("📝 Generating docker-compose.yml...");

        let env = self.store.list_env_vars(&project_id).await?;
        if !env.is_empty() {
            ctx.log.line(&format!("   🔐 Including {} environment variable(s)", env.len()));
        }
        let build_keys: Vec<String> = env.iter().filter(|v| v.build_arg).map(|v| v.key.clone()).collect();
        if !build_keys.is_empty() {
            for unit in &units {
                warn_missing_args(&root, unit, &build_keys, &mut ctx.log).await;
            }
        }

        check_cancelled(ctx)?;
        write_manifest(&root, &project_id, &services, &env, &self.config.network).await?;
        ctx.log.line(&format!(
            "✅ docker-compose.yml created with {} service(s)\n",
            services.len()
        ));

        ctx.log.line(&light_rule());
        ctx.log.line("🚀 Starting containers...");
        ctx.log.line(&format!("{}\n", light_rule()));

        self.run_compose(ctx, ComposeCommand::Up).await
    }

    /// Create or refresh the service record for a build unit
    async fn prepare_service(
        &self,
        project: &Project,
        unit: &BuildUnit,
        first: bool,
        log: &mut OperationLog,
    ) -> Result<Service, DockyardError> {
        let target_name = container_name(&project.id, &unit.name);
        let port = self.ports.allocate(&project.id, &unit.name).await?;

        let service = match self.store.find_service(&project.id, &unit.name).await? {
            None => {
                let domain = if first {
                    match normalize_domain_field(project.domain.as_deref()) {
                        Ok(domain) => domain,
                        Err(e) => {
                            log.line(&format!("     ⚠️ Ignoring project domain: {}", e));
                            None
                        }
                    }
                } else {
                    None
                };
                match &domain {
                    Some(domain) => log.line(&format!(
                        "     Assigned new service: {} (Port: {}) with domain: {}",
                        unit.name, port, domain
                    )),
                    None => log.line(&format!(
                        "     Assigned new service: {} (Port: {})",
                        unit.name, port
                    )),
                }
                Service {
                    id: uuid::Uuid::new_v4().to_string(),
                    project_id: project.id.clone(),
                    name: unit.name.clone(),
                    dockerfile_path: unit.dockerfile_path.clone(),
                    container_name: target_name,
                    internal_port: unit.internal_port,
                    port: Some(port),
                    domain,
                    status: ProjectStatus::Building.as_str().to_string(),
                }
            }
            Some(mut service) => {
                if service.container_name != target_name {
                    log.line(&format!(
                        "     🛠️ Renaming container {} to {}",
                        service.container_name, target_name
                    ));
                    service.container_name = target_name;
                }
                match service.port {
                    Some(previous) if previous == port => log.line(&format!(
                        "     Updating existing service: {} (Port: {})",
                        unit.name, port
                    )),
                    _ => log.line(&format!(
                        "     Assigned port to existing service: {} (Port: {})",
                        unit.name, port
                    )),
                }
                service.port = Some(port);
                service.dockerfile_path = unit.dockerfile_path.clone();
                service.internal_port = unit.internal_port;
                service.status = ProjectStatus::Building.as_str().to_string();
                service
            }
        };

        self.store.upsert_service(service).await
    }

    async fn run_simple(
        self,
        mut ctx: RunContext,
        command: ComposeCommand,
        title: &'static str,
        verb: &'static str,
        on_success: ProjectEvent,
    ) {
        if let Some(id) = &ctx.deployment_id {
            if let Err(e) = self
                .store
                .update_deployment_logs(id, DeploymentStatus::InProgress, &ctx.log.text())
                .await
            {
                warn!("Failed to mark deployment {} in progress: {}", id, e);
            }
        }

        let timestamp = format!("📅 {}", Utc::now().to_rfc3339());
        banner(&mut ctx.log, &[title, timestamp.as_str()]);
        if command == ComposeCommand::Rebuild {
            ctx.log.line("📦 Rebuilding with --force-recreate...");
            ctx.log.line(&light_rule());
        }

        let outcome = self.run_compose(&mut ctx, command).await;
        let (success, headline) = match &outcome {
            Ok(0) => (true, format!("✅ {} SUCCESSFUL!", verb)),
            Ok(code) => (false, format!("❌ {} FAILED (code {})", verb, code)),
            Err(e) => {
                ctx.log.line(&format!("\n❌ {}", e));
                (false, format!("❌ {} FAILED", verb))
            }
        };
        banner(&mut ctx.log, &[headline.as_str()]);

        // stopping leaves the project stopped whatever the exit code
        let on_failure = match on_success {
            ProjectEvent::Stop => ProjectEvent::Stop,
            _ => ProjectEvent::Failed(match outcome {
                Ok(code) => format!("exit code {}", code),
                Err(e) => e.to_string(),
            }),
        };
        self.conclude(ctx, success, on_success, on_failure).await;
    }

    async fn run_cancel(self, mut ctx: RunContext, flight: Option<Arc<InFlight>>) {
        let project_id = ctx.project.id.clone();
        ctx.log.line("❌ Cancelling build...");

        // teardown and the final status come after the build has let go
        if let Some(flight) = flight {
            if tokio::time::timeout(CANCEL_GRACE, flight.released()).await.is_err() {
                warn!(
                    "{} for project {} did not stop within {:?}",
                    flight.operation(),
                    project_id,
                    CANCEL_GRACE
                );
                ctx.log.line("⚠️ Build did not stop in time, tearing down anyway");
            }
        }

        if Dir::new(self.project_root(&project_id)).exists().await {
            match self.run_compose(&mut ctx, ComposeCommand::Down).await {
                Ok(0) => {}
                Ok(code) => ctx.log.line(&format!("⚠️ Stopping containers exited with code {}", code)),
                Err(e) => ctx.log.line(&format!("⚠️ {}", e)),
            }
        }

        // stopped regardless of how the teardown went
        let outcome = match self.transition(&project_id, ProjectEvent::Cancel).await {
            Ok(state) => Ok(state),
            Err(_) => self.transition(&project_id, ProjectEvent::Stop).await,
        };
        if let Err(e) = outcome {
            error!("Failed to reset status of project {}: {}", project_id, e);
            ctx.log.line(&format!("❌ Failed to reset status: {}", e));
        } else {
            ctx.log.line("✅ Build cancelled and status reset");
        }
        ctx.log.close_live();
    }

    /// Run a compose command, streaming into the context log
    async fn run_compose(&self, ctx: &mut RunContext, command: ComposeCommand) -> Result<i32, DockyardError> {
        if command != ComposeCommand::Down {
            check_cancelled(ctx)?;
        }
        let project_id = ctx.project.id.clone();
        let args = command.args(&project_id)?;
        let root = self.project_root(&project_id);
        let mut process = self
            .supervisor
            .spawn(&root, &self.config.compose_program, &args, &[])?;

        // only builds are killed on cancel; a stop always runs to the end
        let flight = match command {
            ComposeCommand::Down => None,
            _ => ctx.flight(),
        };
        let mut killed = false;

        loop {
            tokio::select! {
                chunk = process.next_chunk() => match chunk {
                    Some(chunk) => {
                        ctx.log.push(&chunk);
                        self.checkpoint(ctx).await;
                    }
                    None => break,
                },
                _ = wait_cancelled(flight.as_deref()), if !killed => {
                    killed = true;
                    ctx.log.line("\n⚠️ Cancellation requested, stopping build...");
                    process.kill();
                }
            }
        }

        process.wait().await
    }

    async fn checkpoint(&self, ctx: &mut RunContext) {
        let Some(id) = ctx.deployment_id.as_deref() else {
            return;
        };
        if let Some(text) = ctx.log.checkpoint() {
            if let Err(e) = self
                .store
                .update_deployment_logs(id, DeploymentStatus::InProgress, &text)
                .await
            {
                warn!("Failed to checkpoint deployment {}: {}", id, e);
            }
        }
    }

    /// Persist the outcome and release the caller's stream
    async fn conclude(
        &self,
        mut ctx: RunContext,
        success: bool,
        on_success: ProjectEvent,
        on_failure: ProjectEvent,
    ) {
        let project_id = ctx.project.id.clone();
        let cancelled = ctx
            .ticket
            .as_ref()
            .map(|t| t.flight().is_cancelled())
            .unwrap_or(false);
        if cancelled {
            ctx.log.line("⚠️ Operation was cancelled");
        }

        let status = if success && !cancelled {
            DeploymentStatus::Success
        } else {
            DeploymentStatus::Failed
        };
        if let Some(id) = &ctx.deployment_id {
            if let Err(e) = self
                .store
                .finish_deployment(id, status, &ctx.log.text(), Utc::now())
                .await
            {
                error!("Failed to persist deployment {}: {}", id, e);
            }
        }

        // cancel applies the stopped status once this ticket is released
        if !cancelled {
            let event = if success { on_success } else { on_failure };
            match self.transition(&project_id, event).await {
                Ok(state) => info!("Project {} is now {}", project_id, state.as_str()),
                Err(e) => error!("Failed to update project {}: {}", project_id, e),
            }
        }

        ctx.log.close_live();
        // ticket drops here, releasing the project
    }

    // ----------------------------------------------------------------------
    // Helpers
    // ----------------------------------------------------------------------

    fn launch<F>(
        &self,
        project: Project,
        deployment_id: Option<String>,
        ticket: Option<GuardTicket>,
        host: String,
        body: F,
    ) -> Operation
    where
        F: FnOnce(Orchestrator, RunContext) -> futures::future::BoxFuture<'static, ()>,
    {
        let (tx, rx) = live::unbounded();
        let ctx = RunContext {
            project,
            deployment_id: deployment_id.clone(),
            ticket,
            log: OperationLog::new(LiveSink::new(tx), self.config.checkpoint_every),
            endpoints: Vec::new(),
            host,
        };
        let task = tokio::spawn(body(self.clone(), ctx));
        Operation {
            deployment_id,
            output: rx,
            task,
        }
    }

    async fn open_deployment(
        &self,
        project_id: &str,
        trigger: DeploymentTrigger,
        initial: &str,
    ) -> Result<Deployment, DockyardError> {
        let mut deployment = Deployment::new(project_id, DeploymentStatus::Pending, trigger);
        deployment.logs = initial.to_string();
        self.store.create_deployment(deployment).await
    }

    /// Close a deployment that never got to run
    async fn abandon(&self, deployment_id: &str, cause: &DockyardError) {
        let logs = format!("❌ {}\n", cause);
        if let Err(e) = self
            .store
            .finish_deployment(deployment_id, DeploymentStatus::Failed, &logs, Utc::now())
            .await
        {
            error!("Failed to close deployment {}: {}", deployment_id, e);
        }
    }

    async fn require_root(&self, project_id: &str) -> Result<PathBuf, DockyardError> {
        let root = self.project_root(project_id);
        if !Dir::new(&root).exists().await {
            return Err(DockyardError::ValidationError("Project files not found".to_string()));
        }
        Ok(root)
    }

    async fn scan(&self, root: &Path) -> Vec<BuildUnit> {
        let root = root.to_path_buf();
        let depth = self.config.scan_depth;
        match tokio::task::spawn_blocking(move || scan_dockerfiles(&root, depth)).await {
            Ok(units) => units,
            Err(e) => {
                warn!("Dockerfile scan failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Apply a lifecycle event to the project and all its services
    async fn transition(&self, project_id: &str, event: ProjectEvent) -> Result<ProjectStatus, DockyardError> {
        let project = self.require_project(project_id).await?;
        let mut fsm = ProjectFsm::resume(project.status);
        fsm.process(event).map_err(DockyardError::Conflict)?;
        self.write_status(project_id, fsm.state()).await?;
        Ok(fsm.state())
    }

    async fn write_status(&self, project_id: &str, status: ProjectStatus) -> Result<(), DockyardError> {
        self.store.update_project_status(project_id, status).await?;
        self.store
            .update_services_for_project(project_id, status.as_str())
            .await?;
        Ok(())
    }
}

fn check_accepts(project: &Project, event: &ProjectEvent) -> Result<(), DockyardError> {
    if ProjectFsm::resume(project.status).accepts(event) {
        Ok(())
    } else {
        Err(DockyardError::Conflict(format!(
            "Project {} is {}",
            project.id,
            project.status.as_str()
        )))
    }
}

fn check_cancelled(ctx: &RunContext) -> Result<(), DockyardError> {
    match ctx.flight() {
        Some(flight) if flight.is_cancelled() => {
            Err(DockyardError::DeployError("Cancelled by request".to_string()))
        }
        _ => Ok(()),
    }
}

async fn wait_cancelled(flight: Option<&InFlight>) {
    match flight {
        Some(flight) => flight.cancelled().await,
        None => std::future::pending().await,
    }
}

fn banner(log: &mut OperationLog, lines: &[&str]) {
    log.line(&format!("\n{}", heavy_rule()));
    for line in lines {
        log.line(line);
    }
    log.line(&format!("{}\n", heavy_rule()));
}

async fn warn_missing_args(root: &Path, unit: &BuildUnit, keys: &[String], log: &mut OperationLog) {
    let Ok(recipe) = tokio::fs::read_to_string(root.join(&unit.dockerfile_path)).await else {
        return;
    };
    let missing = missing_build_args(&recipe, keys);
    if missing.is_empty() {
        return;
    }
    log.line(&format!(
        "\n⚠️  WARNING: build arguments configured without an 'ARG' instruction in {}:",
        unit.dockerfile_path
    ));
    for key in &missing {
        log.line(&format!("    - {}", key));
    }
    log.line(&format!(
        "    They will NOT be available during the build. Add \"ARG {}\" to the Dockerfile.\n",
        missing[0]
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ContainerState, ContainerStats, LogByteStream};
    use crate::models::project::{EnvVar, SourceKind};
    use crate::store::JsonStore;
    use async_trait::async_trait;

    struct NullEngine;

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

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        store: Arc<JsonStore>,
        orchestrator: Orchestrator,
    }

    /// `sh` runs the `compose` script in the project root with the compose
    /// arguments, standing in for the docker client.
    async fn fixture(compose_script: &str) -> Fixture {
        fixture_with_engine(compose_script, Arc::new(NullEngine)).await
    }

    /// Network setup takes long enough to cancel in the middle of it
    struct SlowNetworkEngine;

    #[async_trait]
    impl ContainerEngine for SlowNetworkEngine {
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
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        }
    }

    async fn fixture_with_engine(compose_script: &str, engine: Arc<dyn ContainerEngine>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("p1");
        std::fs::create_dir_all(root.join("worker")).unwrap();
        std::fs::write(root.join("Dockerfile"), "FROM node:20\nEXPOSE 3000\n").unwrap();
        std::fs::write(root.join("worker/Dockerfile"), "FROM python\nCMD uvicorn main:app\n").unwrap();
        std::fs::write(root.join("compose"), compose_script).unwrap();

        let store = Arc::new(JsonStore::in_memory());
        store
            .insert_project(Project {
                id: "p1".to_string(),
                name: "demo".to_string(),
                source: SourceKind::Upload,
                git_url: None,
                git_branch: None,
                kind: Default::default(),
                status: ProjectStatus::Pending,
                domain: Some("demo.example.com".to_string()),
            })
            .await
            .unwrap();

        let mut config = OrchestratorConfig::new(dir.path());
        config.compose_program = "sh".to_string();
        let orchestrator = Orchestrator::new(store.clone(), engine, config);

        Fixture {
            _dir: dir,
            root,
            store,
            orchestrator,
        }
    }

    async fn project_status(store: &JsonStore) -> ProjectStatus {
        store.get_project("p1").await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_deploy_success() {
        let fx = fixture("echo \"compose $*\"\nexit 0\n").await;

        let op = fx.orchestrator.deploy("p1", DeployRequest::default()).await.unwrap();
        let id = op.deployment_id().unwrap().to_string();
        let output = op.finish().await.unwrap();

        assert!(output.contains("compose -p p1 up -d --build"));
        assert!(output.contains("DEPLOY SUCCESSFUL"));
        assert!(output.contains("http://localhost:3001"));
        assert_eq!(project_status(&fx.store).await, ProjectStatus::Running);

        let deployments = fx.store.list_deployments("p1", 10, 0).await.unwrap();
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0].id, id);
        assert!(deployments[0].success());
        assert!(!deployments[0].logs.is_empty());
        assert!(deployments[0].finished_at.is_some());

        let services = fx.store.list_services("p1").await.unwrap();
        let app = services.iter().find(|s| s.name == "app").unwrap();
        let worker = services.iter().find(|s| s.name == "worker").unwrap();
        assert_eq!(app.port, Some(3001));
        assert_eq!(app.domain.as_deref(), Some("demo.example.com"));
        assert_eq!(worker.internal_port, 8000);
        assert_eq!(worker.domain, None);
        assert!(services.iter().all(|s| s.status == "running"));

        assert!(fx.root.join("docker-compose.yml").exists());
    }

    #[tokio::test]
    async fn test_deploy_failure() {
        let fx = fixture("echo boom 1>&2\nexit 2\n").await;

        let output = fx
            .orchestrator
            .deploy("p1", DeployRequest::default())
            .await
            .unwrap()
            .finish()
            .await
            .unwrap();

        assert!(output.contains("boom"));
        assert!(output.contains("DEPLOY FAILED (Exit Code: 2)"));
        assert_eq!(project_status(&fx.store).await, ProjectStatus::Error);
        let deployments = fx.store.list_deployments("p1", 10, 0).await.unwrap();
        assert!(!deployments[0].success());
    }

    #[tokio::test]
    async fn test_deploy_without_recipes_creates_no_deployment() {
        let fx = fixture("exit 0\n").await;
        std::fs::remove_file(fx.root.join("Dockerfile")).unwrap();
        std::fs::remove_file(fx.root.join("worker/Dockerfile")).unwrap();

        let err = fx
            .orchestrator
            .deploy("p1", DeployRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DockyardError::ValidationError(_)));
        assert!(fx.store.list_deployments("p1", 10, 0).await.unwrap().is_empty());
        assert_eq!(project_status(&fx.store).await, ProjectStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let fx = fixture("exit 0\n").await;
        let err = fx.orchestrator.stop("nope").await.unwrap_err();
        assert!(matches!(err, DockyardError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_overlapping_operations_conflict() {
        let fx = fixture("sleep 1\nexit 0\n").await;

        let op = fx.orchestrator.deploy("p1", DeployRequest::default()).await.unwrap();
        let err = fx.orchestrator.restart("p1").await.unwrap_err();
        assert!(matches!(err, DockyardError::Conflict(_)));

        op.finish().await.unwrap();
        let op = fx.orchestrator.stop("p1").await.unwrap();
        op.finish().await.unwrap();
        assert_eq!(project_status(&fx.store).await, ProjectStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_sets_stopped_even_on_failure() {
        let fx = fixture("exit 1\n").await;
        let output = fx.orchestrator.stop("p1").await.unwrap().finish().await.unwrap();
        assert!(output.contains("STOP FAILED (code 1)"));
        assert_eq!(project_status(&fx.store).await, ProjectStatus::Stopped);

        let deployments = fx.store.list_deployments("p1", 10, 0).await.unwrap();
        assert_eq!(deployments[0].trigger, DeploymentTrigger::Stop);
        assert_eq!(deployments[0].status, DeploymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_restart_and_redeploy() {
        let fx = fixture("echo \"compose $*\"\n").await;

        let output = fx.orchestrator.restart("p1").await.unwrap().finish().await.unwrap();
        assert!(output.contains("compose -p p1 restart"));
        assert_eq!(project_status(&fx.store).await, ProjectStatus::Running);

        let output = fx.orchestrator.redeploy("p1").await.unwrap().finish().await.unwrap();
        assert!(output.contains("--force-recreate"));
        assert!(output.contains("REDEPLOY SUCCESSFUL"));
    }

    #[tokio::test]
    async fn test_cancel_stops_build() {
        let fx = fixture("case \"$*\" in *up*) exec sleep 30 ;; esac\nexit 0\n").await;

        let deploy = fx.orchestrator.deploy("p1", DeployRequest::default()).await.unwrap();
        // wait until the build is running
        for _ in 0..100 {
            if fx.root.join("docker-compose.yml").exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let output = fx.orchestrator.cancel("p1").await.unwrap().finish().await.unwrap();
        assert!(output.contains("Build cancelled"));

        tokio::time::timeout(Duration::from_secs(10), deploy.finish())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(project_status(&fx.store).await, ProjectStatus::Stopped);
        let deployments = fx.store.list_deployments("p1", 10, 0).await.unwrap();
        assert_eq!(deployments[0].status, DeploymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_before_build_starts() {
        let fx = fixture_with_engine(
            "echo \"compose $*\" >> calls.log\nexit 0\n",
            Arc::new(SlowNetworkEngine),
        )
        .await;

        // a first deploy leaves services running
        fx.orchestrator
            .deploy("p1", DeployRequest::default())
            .await
            .unwrap()
            .finish()
            .await
            .unwrap();
        std::fs::remove_file(fx.root.join("docker-compose.yml")).unwrap();

        let deploy = fx.orchestrator.deploy("p1", DeployRequest::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let cancel = fx.orchestrator.cancel("p1").await.unwrap();

        let output = tokio::time::timeout(Duration::from_secs(10), deploy.finish())
            .await
            .unwrap()
            .unwrap();
        assert!(output.contains("Cancelled by request"));
        let output = cancel.finish().await.unwrap();
        assert!(output.contains("Build cancelled"));

        // the second build never reached compose
        assert!(!fx.root.join("docker-compose.yml").exists());
        let calls = std::fs::read_to_string(fx.root.join("calls.log")).unwrap();
        assert_eq!(calls.matches(" up ").count(), 1);
        assert!(calls.trim_end().ends_with("down"));

        assert_eq!(project_status(&fx.store).await, ProjectStatus::Stopped);
        let services = fx.store.list_services("p1").await.unwrap();
        assert_eq!(services.len(), 2);
        assert!(services.iter().all(|s| s.status == "stopped"));
        let deployments = fx.store.list_deployments("p1", 10, 0).await.unwrap();
        assert_eq!(deployments[0].status, DeploymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_without_build_is_rejected() {
        let fx = fixture("exit 0\n").await;
        assert!(fx.orchestrator.cancel("p1").await.is_err());
    }

    #[tokio::test]
    async fn test_build_args_without_arg_instruction_warn() {
        let fx = fixture("exit 0\n").await;
        fx.store
            .set_env_vars(
                "p1",
                vec![EnvVar {
                    key: "API_URL".to_string(),
                    value: "x".to_string(),
                    build_arg: true,
                    runtime: false,
                }],
            )
            .await
            .unwrap();

        let output = fx
            .orchestrator
            .deploy("p1", DeployRequest::default())
            .await
            .unwrap()
            .finish()
            .await
            .unwrap();
        assert!(output.contains("WARNING"));
        assert!(output.contains("- API_URL"));
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let fx = fixture("exit 0\n").await;
        fx.store
            .create_deployment(Deployment::new("p1", DeploymentStatus::InProgress, DeploymentTrigger::Manual))
            .await
            .unwrap();
        fx.store
            .update_project_status("p1", ProjectStatus::Building)
            .await
            .unwrap();

        assert_eq!(fx.orchestrator.recover_interrupted().await.unwrap(), 1);
        assert_eq!(project_status(&fx.store).await, ProjectStatus::Error);
        let deployments = fx.store.list_deployments("p1", 10, 0).await.unwrap();
        assert_eq!(deployments[0].status, DeploymentStatus::Failed);
    }
}
