//! HTTP server setup

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::DockyardError;
use crate::server::auth::require_bearer;
use crate::server::containers::{containers_handler, logs_handler, stats_handler, stream_handler};
use crate::server::handlers::{health_handler, version_handler};
use crate::server::ports::{list_ports_handler, release_port_handler};
use crate::server::projects::{
    cancel_handler, deploy_handler, deployments_handler, redeploy_handler, restart_handler,
    stop_handler, update_service_handler,
};
use crate::server::state::ServerState;
use crate::server::terminal::terminal_handler;

/// Path of the terminal WebSocket
pub const TERMINAL_PATH: &str = "/ws/terminal";

/// All routes; everything under `/api` except health and version needs a bearer token
pub fn router(state: Arc<ServerState>) -> Router {
    let protected = Router::new()
        // Lifecycle
        .route("/projects/{id}/deploy", post(deploy_handler))
        .route("/projects/{id}/stop", post(stop_handler))
        .route("/projects/{id}/restart", post(restart_handler))
        .route("/projects/{id}/redeploy", post(redeploy_handler))
        .route("/projects/{id}/cancel", post(cancel_handler))
        .route("/projects/{id}/deployments", get(deployments_handler))
        .route("/projects/{id}/services/{service_id}", put(update_service_handler))
        // Containers
        .route("/projects/{id}/containers", get(containers_handler))
        .route("/projects/{id}/logs", get(logs_handler))
        .route("/projects/{id}/stats", get(stats_handler))
        .route("/projects/{id}/stream/{container}", get(stream_handler))
        // Ports
        .route("/ports", get(list_ports_handler))
        .route("/ports/{port}", delete(release_port_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    let api = Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .merge(protected);

    Router::new()
        .nest("/api", api)
        .route(TERMINAL_PATH, get(terminal_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and start the HTTP server, returning the bound address
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, JoinHandle<Result<(), DockyardError>>), DockyardError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DockyardError::ServerError(format!("Unable to bind {}: {}", addr, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| DockyardError::ServerError(e.to_string()))?;
    info!("HTTP server listening on {}", local_addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DockyardError::ServerError(e.to_string()))
    });

    Ok((local_addr, handle))
}
