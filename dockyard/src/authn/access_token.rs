//! Bearer access tokens
//!
//! Tokens are issued by the dashboard's login flow and signed with the
//! shared HS256 secret; the control plane only verifies them.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::DockyardError;

/// Access token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user id)
    pub sub: String,

    #[serde(default)]
    pub email: Option<String>,

    /// Expiration timestamp
    pub exp: i64,
}

/// Verify the signature and expiry of a bearer token
pub fn verify_token(token: &str, secret: &SecretString) -> Result<AccessClaims, DockyardError> {
    if token.is_empty() {
        return Err(DockyardError::AuthError("Missing access token".to_string()));
    }

    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &validation,
    )
    .map_err(|e| DockyardError::AuthError(format!("Invalid access token: {}", e)))?;

    Ok(data.claims)
}

/// Sign a token for `sub` valid for `ttl`
pub fn issue_token(
    sub: &str,
    email: Option<&str>,
    ttl: Duration,
    secret: &SecretString,
) -> Result<String, DockyardError> {
    let claims = AccessClaims {
        sub: sub.to_string(),
        email: email.map(str::to_string),
        exp: (Utc::now() + ttl).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .map_err(|e| DockyardError::Internal(format!("Failed to sign token: {}", e)))
}

/// Extract the token from an `Authorization: Bearer …` header value
pub fn bearer_value(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}
