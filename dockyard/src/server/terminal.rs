//! Terminal WebSocket upgrade

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::warn;

use crate::authn::access_token::verify_token;
use crate::server::state::ServerState;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Verify the query token, then hand the socket to the terminal manager.
///
/// An invalid token is answered with 401 and the upgrade never completes.
pub async fn terminal_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<TokenQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query.token.unwrap_or_default();
    let claims = match verify_token(&token, &state.jwt_secret) {
        Ok(claims) => claims,
        Err(e) => {
            warn!("Terminal upgrade refused: {}", e);
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    let user = claims.email.unwrap_or(claims.sub);
    let manager = state.terminal.clone();
    ws.on_upgrade(move |socket| manager.serve(socket, user))
}
