//! Password gate in front of the shell

use std::time::Duration;

use tracing::warn;

use crate::authn::password::verify_password;
use crate::errors::DockyardError;
use crate::store::Store;

/// Failed attempts tolerated per connection
pub const MAX_AUTH_ATTEMPTS: u32 = 5;

/// Pause after every failed attempt
pub const AUTH_THROTTLE: Duration = Duration::from_millis(750);

/// Result of checking a password against the admin account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Valid,
    Invalid,
    NoAccount,
}

/// Per-connection attempt counter
#[derive(Debug, Clone)]
pub struct AuthGate {
    failures: u32,
    max_failures: u32,
    throttle: Duration,
}

impl AuthGate {
    pub fn new(max_failures: u32, throttle: Duration) -> Self {
        Self {
            failures: 0,
            max_failures,
            throttle,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// No further attempt may be evaluated
    pub fn is_locked(&self) -> bool {
        self.failures >= self.max_failures
    }

    /// Count a failure and hold the caller for the throttle delay
    pub async fn record_failure(&mut self) -> u32 {
        self.failures += 1;
        tokio::time::sleep(self.throttle).await;
        self.failures
    }
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::new(MAX_AUTH_ATTEMPTS, AUTH_THROTTLE)
    }
}

/// Verify `password` against the stored admin hash
///
/// The hash comparison is CPU bound and runs on the blocking pool.
pub async fn check_admin_password(store: &dyn Store, password: &str) -> Result<PasswordCheck, DockyardError> {
    let Some(account) = store.admin_account().await? else {
        warn!("Terminal login attempted but no admin account exists");
        return Ok(PasswordCheck::NoAccount);
    };

    let password = password.to_string();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &account.password_hash))
        .await
        .map_err(|e| DockyardError::Internal(format!("Password check failed: {}", e)))??;

    Ok(if valid {
        PasswordCheck::Valid
    } else {
        PasswordCheck::Invalid
    })
}
