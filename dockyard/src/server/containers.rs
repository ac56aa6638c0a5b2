//! Container inspection handlers and the live log stream

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::follow::{follow_events, DEFAULT_FOLLOW_TAIL};
use crate::engine::{ContainerState, ContainerStats};
use crate::errors::DockyardError;
use crate::models::project::Service;
use crate::server::state::ServerState;

const DEFAULT_LOG_TAIL: usize = 100;
const MAX_TAIL: usize = 5000;

/// A service with the engine's view of its container
#[derive(Debug, Serialize)]
pub struct ContainerView {
    #[serde(flatten)]
    pub service: Service,
    pub container_status: String,
    pub running: bool,
}

/// Services of a project with live container state.
///
/// A stored status that disagrees with the engine is corrected in passing.
pub async fn containers_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<ContainerView>>, DockyardError> {
    state.orchestrator.require_project(&project_id).await?;
    let store = state.orchestrator.store();
    let engine = state.orchestrator.engine();

    let mut views = Vec::new();
    for mut service in store.list_services(&project_id).await? {
        let live = match engine.inspect(&service.container_name).await {
            Ok(live) => live.unwrap_or_else(ContainerState::not_found),
            Err(e) => {
                warn!("Inspect of {} failed: {}", service.container_name, e);
                ContainerState::not_found()
            }
        };

        if live.status != "not_found" && live.status != service.status {
            debug!(
                "Service {} status {} -> {}",
                service.name, service.status, live.status
            );
            match store.update_service_status(&service.id, &live.status).await {
                Ok(()) => service.status = live.status.clone(),
                Err(e) => warn!("Failed to resync status of {}: {}", service.name, e),
            }
        }

        views.push(ContainerView {
            service,
            container_status: live.status,
            running: live.running,
        });
    }
    Ok(Json(views))
}

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    pub tail: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ServiceLogs {
    pub service: String,
    pub container: String,
    pub logs: String,
}

/// Recent log lines of every service
pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Query(query): Query<TailQuery>,
) -> Result<Json<Vec<ServiceLogs>>, DockyardError> {
    state.orchestrator.require_project(&project_id).await?;
    let tail = query.tail.unwrap_or(DEFAULT_LOG_TAIL).min(MAX_TAIL);
    let engine = state.orchestrator.engine();

    let mut result = Vec::new();
    for service in state.orchestrator.store().list_services(&project_id).await? {
        let logs = match engine.logs(&service.container_name, tail).await {
            Ok(logs) => logs,
            Err(e) => format!("Failed to fetch logs: {}", e),
        };
        result.push(ServiceLogs {
            service: service.name,
            container: service.container_name,
            logs,
        });
    }
    Ok(Json(result))
}

#[derive(Debug, Serialize)]
pub struct ServiceStats {
    pub service: String,
    pub container: String,
    pub stats: Option<ContainerStats>,
}

/// Point-in-time resource usage of every service
pub async fn stats_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<ServiceStats>>, DockyardError> {
    state.orchestrator.require_project(&project_id).await?;
    let engine = state.orchestrator.engine();

    let mut result = Vec::new();
    for service in state.orchestrator.store().list_services(&project_id).await? {
        let stats = engine.stats(&service.container_name).await.unwrap_or_else(|e| {
            warn!("Stats of {} failed: {}", service.container_name, e);
            None
        });
        result.push(ServiceStats {
            service: service.name,
            container: service.container_name,
            stats,
        });
    }
    Ok(Json(result))
}

/// Follow a container's log as server-sent events
pub async fn stream_handler(
    State(state): State<Arc<ServerState>>,
    Path((project_id, container)): Path<(String, String)>,
    Query(query): Query<TailQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, DockyardError> {
    state.orchestrator.require_project(&project_id).await?;
    state
        .orchestrator
        .store()
        .find_service_by_container(&project_id, &container)
        .await?
        .ok_or_else(|| {
            DockyardError::NotFound(format!("Container {} in project {}", container, project_id))
        })?;

    let tail = query.tail.unwrap_or(DEFAULT_FOLLOW_TAIL).min(MAX_TAIL);
    let events = follow_events(state.orchestrator.engine().clone(), container, tail)
        .map(|event| Ok(Event::default().data(event.to_json())));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
