//! Container engine collaborator

pub mod demux;
pub mod docker;
pub mod follow;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::errors::DockyardError;

pub use docker::DockerCli;

/// Live state of one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub status: String,
    pub running: bool,
}

impl ContainerState {
    pub fn not_found() -> Self {
        Self {
            status: "not_found".to_string(),
            running: false,
        }
    }
}

/// Point-in-time resource usage of one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_percent: String,
    pub memory_usage: String,
    pub memory_percent: String,
    pub net_io: String,
    pub block_io: String,
}

/// Byte chunks of a followed log stream
pub type LogByteStream = BoxStream<'static, Result<Vec<u8>, DockyardError>>;

/// Operations the control plane needs from the container runtime
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// State of a container, `None` if it does not exist
    async fn inspect(&self, container: &str) -> Result<Option<ContainerState>, DockyardError>;

    /// The last `tail` lines of a container's log
    async fn logs(&self, container: &str, tail: usize) -> Result<String, DockyardError>;

    async fn stats(&self, container: &str) -> Result<Option<ContainerStats>, DockyardError>;

    /// Follow a container's log from `tail` lines back.
    ///
    /// Chunks may be either shape the daemon produces: 8-byte framed
    /// stdout/stderr records (attach or API streams of non-TTY containers)
    /// or raw text (TTY containers, CLI output). Consumers decode them with
    /// [`demux::LogDemuxer`], which detects the shape from the first chunk.
    async fn follow_logs(&self, container: &str, tail: usize) -> Result<LogByteStream, DockyardError>;

    /// Create the shared network if it is missing
    async fn ensure_network(&self, name: &str) -> Result<(), DockyardError>;
}
