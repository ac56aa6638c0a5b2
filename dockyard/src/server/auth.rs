//! Bearer token middleware

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::authn::access_token::{bearer_value, verify_token};
use crate::errors::DockyardError;
use crate::server::state::ServerState;

/// Reject requests without a valid `Authorization: Bearer` token.
///
/// The verified claims are stored in the request extensions.
pub async fn require_bearer(
    State(state): State<Arc<ServerState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, DockyardError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_value)
        .ok_or_else(|| DockyardError::AuthError("Missing bearer token".to_string()))?;

    let claims = verify_token(token, &state.jwt_secret)?;
    debug!("{} {} by {}", request.method(), request.uri().path(), claims.sub);
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
