//! Admin password hashing (argon2, PHC string format)

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::errors::DockyardError;

/// Hash `password` into a PHC string
pub fn hash_password(password: &str) -> Result<String, DockyardError> {
    if password.is_empty() {
        return Err(DockyardError::ValidationError("Password must not be empty".to_string()));
    }
    let salt = SaltString::encode_b64(uuid::Uuid::new_v4().as_bytes())
        .map_err(|e| DockyardError::Internal(format!("Failed to build salt: {}", e)))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| DockyardError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

/// Check `password` against a stored PHC string
pub fn verify_password(password: &str, phc: &str) -> Result<bool, DockyardError> {
    let parsed = PasswordHash::new(phc)
        .map_err(|e| DockyardError::AuthError(format!("Stored password hash is malformed: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
