//! Port allocation records

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Mapping of one external port to at most one project service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    pub port: u16,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub locked: bool,
}

impl PortRecord {
    pub fn free(port: u16) -> Self {
        Self {
            port,
            project_id: None,
            service_name: None,
            locked: false,
        }
    }

    /// Whether the record is a live lock held by the given service
    pub fn held_by(&self, owner: &PortOwner) -> bool {
        self.locked
            && self.project_id.as_deref() == Some(owner.project_id.as_str())
            && self.service_name.as_deref() == Some(owner.service_name.as_str())
    }
}

/// The service a port lock is taken for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortOwner {
    pub project_id: String,
    pub service_name: String,
}

impl PortOwner {
    pub fn new(project_id: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            service_name: service_name.into(),
        }
    }
}

/// Inclusive range of externally reachable ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub first: u16,
    pub last: u16,
}

impl PortRange {
    pub fn new(first: u16, last: u16) -> Self {
        Self { first, last }
    }

    pub fn iter(&self) -> RangeInclusive<u16> {
        self.first..=self.last
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.first..=self.last).contains(&port)
    }

    pub fn len(&self) -> usize {
        if self.last < self.first {
            0
        } else {
            (self.last - self.first) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(3001, 3100)
    }
}
