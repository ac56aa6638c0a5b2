//! Per-project single-flight guard
//!
//! At most one deploy, stop, restart or redeploy runs per project. Cancel
//! does not take the guard; it flags the operation holding it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::errors::DockyardError;

/// Shared view of the operation currently running for a project
#[derive(Debug, Default)]
pub struct InFlight {
    operation: &'static str,
    cancelled: AtomicBool,
    notify: Notify,
    released: AtomicBool,
    release_notify: Notify,
}

impl InFlight {
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Resolves once the ticket holding the project has been dropped
    pub async fn released(&self) {
        loop {
            let notified = self.release_notify.notified();
            if self.released.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    fn mark_released(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.release_notify.notify_waiters();
    }
}

/// Registry of in-flight operations keyed by project id
#[derive(Debug, Clone, Default)]
pub struct ProjectGuards {
    inner: Arc<Mutex<HashMap<String, Arc<InFlight>>>>,
}

impl ProjectGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the project, failing if another operation holds it
    pub fn acquire(&self, project_id: &str, operation: &'static str) -> Result<GuardTicket, DockyardError> {
        let mut map = self.lock();
        if let Some(current) = map.get(project_id) {
            return Err(DockyardError::Conflict(format!(
                "{} is already running for project {}",
                current.operation, project_id
            )));
        }

        let flight = Arc::new(InFlight {
            operation,
            ..InFlight::default()
        });
        map.insert(project_id.to_string(), flight.clone());
        Ok(GuardTicket {
            guards: self.clone(),
            project_id: project_id.to_string(),
            flight,
        })
    }

    /// The operation holding the project, if any
    pub fn in_flight(&self, project_id: &str) -> Option<Arc<InFlight>> {
        self.lock().get(project_id).cloned()
    }

    fn release(&self, project_id: &str, flight: &Arc<InFlight>) {
        let mut map = self.lock();
        if map.get(project_id).is_some_and(|current| Arc::ptr_eq(current, flight)) {
            map.remove(project_id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<InFlight>>> {
        // the map stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Held for the duration of one operation; releases the project on drop
#[derive(Debug)]
pub struct GuardTicket {
    guards: ProjectGuards,
    project_id: String,
    flight: Arc<InFlight>,
}

impl GuardTicket {
    pub fn flight(&self) -> &Arc<InFlight> {
        &self.flight
    }
}

impl Drop for GuardTicket {
    fn drop(&mut self) {
        self.guards.release(&self.project_id, &self.flight);
        self.flight.mark_released();
    }
}
