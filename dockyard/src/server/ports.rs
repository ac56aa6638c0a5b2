//! Port range handlers

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::errors::DockyardError;
use crate::models::port::PortRecord;
use crate::server::state::ServerState;

#[derive(Debug, Serialize)]
pub struct PortsResponse {
    pub first: u16,
    pub last: u16,
    pub ports: Vec<PortRecord>,
}

/// Every port of the managed range and who holds it
pub async fn list_ports_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<PortsResponse>, DockyardError> {
    let allocator = state.orchestrator.ports();
    let range = allocator.range();
    Ok(Json(PortsResponse {
        first: range.first,
        last: range.last,
        ports: allocator.list().await?,
    }))
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub port: u16,
    pub released: bool,
}

pub async fn release_port_handler(
    State(state): State<Arc<ServerState>>,
    Path(port): Path<u16>,
) -> Result<Json<ReleaseResponse>, DockyardError> {
    let released = state.orchestrator.ports().release(port).await?;
    Ok(Json(ReleaseResponse { port, released }))
}
