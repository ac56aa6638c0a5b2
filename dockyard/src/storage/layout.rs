//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::DockyardError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the control plane
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Projects, services, deployments, ports and the admin account
    pub fn store_file(&self) -> File {
        File::new(self.base_dir.join("state.json"))
    }

    /// Default parent of the per-project source trees
    pub fn deployment_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployments"))
    }

    /// Create the directories
    pub async fn setup(&self) -> Result<(), DockyardError> {
        Dir::new(&self.base_dir).create().await?;
        self.deployment_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/dockyard");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dockyard");

        Self::new(base_dir)
    }
}
