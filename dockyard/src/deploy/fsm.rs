//! Finite state machine for project lifecycle

use crate::models::project::ProjectStatus;

/// Project lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectEvent {
    /// A build started (deploy, restart or redeploy)
    Build,

    /// The build process exited with code 0
    Succeeded,

    /// The build process failed
    Failed(String),

    /// Containers were stopped
    Stop,

    /// An in-flight build was cancelled
    Cancel,
}

/// Project FSM
#[derive(Debug, Clone)]
pub struct ProjectFsm {
    state: ProjectStatus,
    error: Option<String>,
}

impl ProjectFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self::resume(ProjectStatus::Pending)
    }

    /// Resume from a persisted status
    pub fn resume(state: ProjectStatus) -> Self {
        Self { state, error: None }
    }

    /// Get current state
    pub fn state(&self) -> ProjectStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether `event` is a valid transition from the current state
    pub fn accepts(&self, event: &ProjectEvent) -> bool {
        self.clone().process(event.clone()).is_ok()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: ProjectEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (ProjectStatus::Building, ProjectEvent::Build) => {
                return Err("A build is already in progress".to_string());
            }
            (_, ProjectEvent::Build) => {
                self.error = None;
                ProjectStatus::Building
            }

            // From Building
            (ProjectStatus::Building, ProjectEvent::Succeeded) => ProjectStatus::Running,
            (ProjectStatus::Building, ProjectEvent::Failed(err)) => {
                self.error = Some(err.clone());
                ProjectStatus::Error
            }
            (ProjectStatus::Building, ProjectEvent::Cancel) => ProjectStatus::Stopped,

            // Stop has no precondition
            (_, ProjectEvent::Stop) => ProjectStatus::Stopped,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for ProjectFsm {
    fn default() -> Self {
        Self::new()
    }
}
