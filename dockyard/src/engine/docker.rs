//! Docker CLI engine

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::deploy::supervisor::ProcessSupervisor;
use crate::engine::{ContainerEngine, ContainerState, ContainerStats, LogByteStream};
use crate::errors::DockyardError;

/// Engine backed by the `docker` command line client
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    supervisor: ProcessSupervisor,
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    /// Use a different client binary
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            supervisor: ProcessSupervisor::new(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, DockyardError> {
        debug!("{} {}", self.program, args.join(" "));
        Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| DockyardError::EngineError(format!("Failed to run {}: {}", self.program, e)))
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct InspectState {
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Running")]
    running: bool,
}

#[derive(Deserialize)]
struct StatsLine {
    #[serde(rename = "CPUPerc", default)]
    cpu: String,
    #[serde(rename = "MemUsage", default)]
    mem_usage: String,
    #[serde(rename = "MemPerc", default)]
    mem_percent: String,
    #[serde(rename = "NetIO", default)]
    net_io: String,
    #[serde(rename = "BlockIO", default)]
    block_io: String,
}

fn parse_state(stdout: &[u8]) -> Result<ContainerState, DockyardError> {
    let state: InspectState = serde_json::from_slice(stdout)?;
    Ok(ContainerState {
        status: state.status,
        running: state.running,
    })
}

fn parse_stats(stdout: &[u8]) -> Result<Option<ContainerStats>, DockyardError> {
    let text = String::from_utf8_lossy(stdout);
    let Some(line) = text.lines().find(|l| !l.trim().is_empty()) else {
        return Ok(None);
    };
    let stats: StatsLine = serde_json::from_str(line)?;
    Ok(Some(ContainerStats {
        cpu_percent: stats.cpu,
        memory_usage: stats.mem_usage,
        memory_percent: stats.mem_percent,
        net_io: stats.net_io,
        block_io: stats.block_io,
    }))
}

fn is_missing(stderr: &[u8]) -> bool {
    let text = String::from_utf8_lossy(stderr).to_lowercase();
    text.contains("no such")
}

/// Container and network names must not be read as options
fn validate_name(name: &str) -> Result<(), DockyardError> {
    if name.is_empty() || name.starts_with('-') {
        return Err(DockyardError::ValidationError(format!(
            "Invalid container name '{}'",
            name
        )));
    }
    Ok(())
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn inspect(&self, container: &str) -> Result<Option<ContainerState>, DockyardError> {
        validate_name(container)?;
        let output = self
            .run(&["inspect", "--type", "container", "--format", "{{json .State}}", container])
            .await?;

        if !output.status.success() {
            if is_missing(&output.stderr) {
                return Ok(None);
            }
            return Err(DockyardError::EngineError(format!(
                "docker inspect {} failed: {}",
                container,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_state(&output.stdout).map(Some)
    }

    async fn logs(&self, container: &str, tail: usize) -> Result<String, DockyardError> {
        validate_name(container)?;
        let tail = tail.to_string();
        let output = self.run(&["logs", "--tail", &tail, container]).await?;
        if !output.status.success() {
            if is_missing(&output.stderr) {
                return Ok(String::new());
            }
            return Err(DockyardError::EngineError(format!(
                "docker logs {} failed: {}",
                container,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    async fn stats(&self, container: &str) -> Result<Option<ContainerStats>, DockyardError> {
        validate_name(container)?;
        let output = self
            .run(&["stats", "--no-stream", "--format", "{{json .}}", container])
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        parse_stats(&output.stdout)
    }

    /// The CLI already demultiplexes, so this always yields raw text
    async fn follow_logs(&self, container: &str, tail: usize) -> Result<LogByteStream, DockyardError> {
        validate_name(container)?;
        let args = vec![
            "logs".to_string(),
            "--follow".to_string(),
            "--timestamps".to_string(),
            "--tail".to_string(),
            tail.to_string(),
            container.to_string(),
        ];
        let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let run = self.supervisor.spawn_scoped(&workdir, &self.program, &args)?;
        Ok(run.into_stream())
    }

    async fn ensure_network(&self, name: &str) -> Result<(), DockyardError> {
        validate_name(name)?;
        let inspect = self.run(&["network", "inspect", name]).await?;
        if inspect.status.success() {
            return Ok(());
        }

        let create = self.run(&["network", "create", "--driver", "bridge", name]).await?;
        if !create.status.success() {
            let stderr = String::from_utf8_lossy(&create.stderr);
            // lost a race with another creator
            if stderr.contains("already exists") {
                return Ok(());
            }
            return Err(DockyardError::EngineError(format!(
                "Failed to create network {}: {}",
                name,
                stderr.trim()
            )));
        }
        info!("Created network {}", name);
        Ok(())
    }
}
