//! Project lifecycle handlers
//!
//! Lifecycle triggers answer with a chunked `text/plain` body carrying the
//! operation's live output. The operation outlives the response, so a client
//! that disconnects does not abort it.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;

use crate::deploy::orchestrator::{DeployRequest, Operation};
use crate::domains::normalize_domain_field;
use crate::errors::DockyardError;
use crate::models::deployment::{Deployment, DeploymentTrigger};
use crate::models::project::Service;
use crate::server::state::ServerState;

pub const DEPLOYMENT_ID_HEADER: &str = "x-deployment-id";

const DEFAULT_PAGE: usize = 20;
const MAX_PAGE: usize = 100;

/// Optional JSON body of `POST /deploy`
#[derive(Debug, Default, Deserialize)]
pub struct DeployBody {
    #[serde(default)]
    pub trigger: Option<DeploymentTrigger>,
    #[serde(default)]
    pub commit_message: Option<String>,
}

fn streaming_response(operation: Operation) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Some(value) = operation
        .deployment_id()
        .and_then(|id| HeaderValue::from_str(id).ok())
    {
        headers.insert(DEPLOYMENT_ID_HEADER, value);
    }

    let body = Body::from_stream(operation.into_output().map(Ok::<_, Infallible>));
    (headers, body).into_response()
}

/// Host to print in endpoint URLs: configured, else the request's `Host`
fn endpoint_host(state: &ServerState, headers: &HeaderMap) -> Option<String> {
    if let Some(host) = &state.public_host {
        return Some(host.clone());
    }
    let host = headers.get(HOST)?.to_str().ok()?;
    let name = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    Some(name.to_string())
}

pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, DockyardError> {
    let body: DeployBody = if body.is_empty() {
        DeployBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| DockyardError::ValidationError(format!("Invalid deploy request: {}", e)))?
    };

    let request = DeployRequest {
        trigger: body.trigger.unwrap_or_default(),
        commit_message: body.commit_message,
        host: endpoint_host(&state, &headers),
    };
    let operation = state.orchestrator.deploy(&project_id, request).await?;
    Ok(streaming_response(operation))
}

pub async fn stop_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<Response, DockyardError> {
    Ok(streaming_response(state.orchestrator.stop(&project_id).await?))
}

pub async fn restart_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<Response, DockyardError> {
    Ok(streaming_response(state.orchestrator.restart(&project_id).await?))
}

pub async fn redeploy_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<Response, DockyardError> {
    Ok(streaming_response(state.orchestrator.redeploy(&project_id).await?))
}

pub async fn cancel_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<Response, DockyardError> {
    Ok(streaming_response(state.orchestrator.cancel(&project_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Deployment history, newest first
pub async fn deployments_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Deployment>>, DockyardError> {
    state.orchestrator.require_project(&project_id).await?;
    let limit = page.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let offset = page.offset.unwrap_or(0);
    let deployments = state
        .orchestrator
        .store()
        .list_deployments(&project_id, limit, offset)
        .await?;
    Ok(Json(deployments))
}

#[derive(Debug, Deserialize)]
pub struct ServiceUpdate {
    #[serde(default)]
    pub domain: Option<String>,
}

/// Set or clear the domains routed to a service
pub async fn update_service_handler(
    State(state): State<Arc<ServerState>>,
    Path((project_id, service_id)): Path<(String, String)>,
    Json(update): Json<ServiceUpdate>,
) -> Result<Json<Service>, DockyardError> {
    state.orchestrator.require_project(&project_id).await?;
    let domain = normalize_domain_field(update.domain.as_deref())?;
    state
        .orchestrator
        .store()
        .update_service_domain(&project_id, &service_id, domain)
        .await?
        .map(Json)
        .ok_or_else(|| DockyardError::NotFound(format!("Service {}", service_id)))
}
