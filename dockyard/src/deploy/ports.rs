//! External port allocation

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::DockyardError;
use crate::models::port::{PortOwner, PortRange, PortRecord};
use crate::store::Store;

/// Hands out external ports from a fixed range.
///
/// Uniqueness is enforced by the store's atomic lock, never by an in-process
/// map, so concurrent allocations for different services cannot collide.
#[derive(Clone)]
pub struct PortAllocator {
    store: Arc<dyn Store>,
    range: PortRange,
}

impl PortAllocator {
    pub fn new(store: Arc<dyn Store>, range: PortRange) -> Self {
        Self { store, range }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Lock a port for the service, reusing the one it already holds
    pub async fn allocate(&self, project_id: &str, service_name: &str) -> Result<u16, DockyardError> {
        let owner = PortOwner::new(project_id, service_name);
        let port = self.store.lock_port(&owner, self.range).await?;
        debug!("Port {} locked for {}/{}", port, project_id, service_name);
        Ok(port)
    }

    /// Unlock a port so it can be handed out again; false if it was not held
    pub async fn release(&self, port: u16) -> Result<bool, DockyardError> {
        if !self.range.contains(port) {
            return Err(DockyardError::ValidationError(format!(
                "Port {} is outside the managed range {}-{}",
                port, self.range.first, self.range.last
            )));
        }
        let released = self.store.release_port(port).await?;
        if released {
            info!("Released port {}", port);
        }
        Ok(released)
    }

    /// Every port of the range with its lock record, or a free placeholder
    pub async fn list(&self) -> Result<Vec<PortRecord>, DockyardError> {
        let mut records: HashMap<u16, PortRecord> = self
            .store
            .list_ports()
            .await?
            .into_iter()
            .map(|record| (record.port, record))
            .collect();

        Ok(self
            .range
            .iter()
            .map(|port| records.remove(&port).unwrap_or_else(|| PortRecord::free(port)))
            .collect())
    }
}
