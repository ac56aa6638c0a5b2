//! Registry of open shell sessions

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use portable_pty::ChildKiller;
use tracing::{debug, warn};
use uuid::Uuid;

/// Concurrent sessions allowed across all clients
pub const MAX_CONCURRENT_SESSIONS: usize = 3;

#[derive(Default)]
struct Slot {
    killer: Option<Box<dyn ChildKiller + Send + Sync>>,
}

/// Process-scoped set of live sessions with a fixed capacity
#[derive(Clone)]
pub struct SessionRegistry {
    slots: Arc<Mutex<HashMap<Uuid, Slot>>>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active(&self) -> usize {
        self.lock().len()
    }

    /// Claim a slot, `None` when the registry is full
    pub fn try_register(&self) -> Option<SessionTicket> {
        let mut slots = self.lock();
        if slots.len() >= self.capacity {
            return None;
        }
        let id = Uuid::new_v4();
        slots.insert(id, Slot::default());
        debug!("Terminal session {} registered ({}/{})", id, slots.len(), self.capacity);
        Some(SessionTicket {
            id,
            registry: self.clone(),
            released: false,
        })
    }

    /// Kill every registered shell, returning how many were signalled
    pub fn kill_all(&self) -> usize {
        let mut slots = self.lock();
        let mut killed = 0;
        for (id, slot) in slots.iter_mut() {
            if let Some(mut killer) = slot.killer.take() {
                if let Err(e) = killer.kill() {
                    warn!("Failed to kill shell of session {}: {}", id, e);
                }
                killed += 1;
            }
        }
        killed
    }

    fn attach(&self, id: Uuid, killer: Box<dyn ChildKiller + Send + Sync>) {
        if let Some(slot) = self.lock().get_mut(&id) {
            slot.killer = Some(killer);
        }
    }

    fn remove(&self, id: Uuid) {
        if self.lock().remove(&id).is_some() {
            debug!("Terminal session {} released", id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(MAX_CONCURRENT_SESSIONS)
    }
}

/// A claimed registry slot; released on drop
pub struct SessionTicket {
    id: Uuid,
    registry: SessionRegistry,
    released: bool,
}

impl SessionTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Let the registry kill this session's shell on shutdown
    pub fn attach_killer(&self, killer: Box<dyn ChildKiller + Send + Sync>) {
        self.registry.attach(self.id, killer);
    }

    /// Free the slot; later calls do nothing
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.remove(self.id);
        }
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.release();
    }
}
