//! Child process supervision
//!
//! Spawns a command without a shell, merges stdout and stderr into a single
//! chunk stream in arrival order and reports the exit code separately from
//! launch failures.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use futures::channel::mpsc as live;
use futures::stream::{BoxStream, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::DockyardError;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Exit code reported when the process was terminated by a signal
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// The process could not be started at all
#[derive(Debug, Error)]
#[error("Failed to launch {program}: {source}")]
pub struct SpawnError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

impl From<SpawnError> for DockyardError {
    fn from(err: SpawnError) -> Self {
        DockyardError::DeployError(err.to_string())
    }
}

/// Compose operations the engine runs against a project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeCommand {
    /// Build and start all services
    Up,
    /// Stop and remove all services
    Down,
    Restart,
    /// Rebuild, forcing container recreation
    Rebuild,
}

impl ComposeCommand {
    fn verb_args(&self) -> &'static [&'static str] {
        match self {
            ComposeCommand::Up => &["up", "-d", "--build"],
            ComposeCommand::Down => &["down"],
            ComposeCommand::Restart => &["restart"],
            ComposeCommand::Rebuild => &["up", "-d", "--build", "--force-recreate"],
        }
    }

    /// Full argument vector for `docker`, project id validated
    pub fn args(&self, project_id: &str) -> Result<Vec<String>, DockyardError> {
        validate_project_id(project_id)?;
        let mut args = vec!["compose".to_string(), "-p".to_string(), project_id.to_string()];
        args.extend(self.verb_args().iter().map(|a| a.to_string()));
        Ok(args)
    }
}

/// Compose project names: lowercase alphanumerics, `-` and `_`, not leading
pub fn validate_project_id(project_id: &str) -> Result<(), DockyardError> {
    let mut chars = project_id.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_lowercase() || first.is_ascii_digit())
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(DockyardError::ValidationError(format!(
            "Invalid project id '{}'",
            project_id
        )))
    }
}

/// Consumer of process output chunks
pub trait ChunkSink {
    fn push(&mut self, chunk: &[u8]);
}

/// Spawns supervised child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self
    }

    /// Start `program` with `args` in `workdir`.
    ///
    /// The child outlives the returned handle: a dropped caller never aborts
    /// a build.
    pub fn spawn(
        &self,
        workdir: &Path,
        program: &str,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<ProcessRun, SpawnError> {
        self.spawn_with(workdir, program, args, env, false)
    }

    /// Like [`spawn`](Self::spawn), but the child is killed when the handle
    /// is dropped. Used for open-ended commands such as log following.
    pub fn spawn_scoped(
        &self,
        workdir: &Path,
        program: &str,
        args: &[String],
    ) -> Result<ProcessRun, SpawnError> {
        self.spawn_with(workdir, program, args, &[], true)
    }

    fn spawn_with(
        &self,
        workdir: &Path,
        program: &str,
        args: &[String],
        env: &[(String, String)],
        kill_on_drop: bool,
    ) -> Result<ProcessRun, SpawnError> {
        debug!("Spawning {} {:?} in {}", program, args, workdir.display());

        let mut child = Command::new(program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(kill_on_drop)
            .spawn()
            .map_err(|source| SpawnError {
                program: program.to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx));
        }

        Ok(ProcessRun { child, chunks: rx })
    }
}

type Chunk = std::io::Result<Vec<u8>>;

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::UnboundedSender<Chunk>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Ok(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

/// A running child process
pub struct ProcessRun {
    child: Child,
    chunks: mpsc::UnboundedReceiver<Chunk>,
}

impl ProcessRun {
    /// Next output chunk from either stream; `None` once both are closed.
    ///
    /// Read failures end that stream and are logged.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.chunks.recv().await? {
                Ok(chunk) => return Some(chunk),
                Err(e) => warn!("Process output read failed: {}", e),
            }
        }
    }

    /// Output chunks as a stream, read failures included.
    ///
    /// The process handle travels with the stream, so dropping the stream
    /// drops the child.
    pub fn into_stream(self) -> BoxStream<'static, Result<Vec<u8>, DockyardError>> {
        futures::stream::unfold(self, |mut run| async move {
            let item = run.chunks.recv().await?;
            Some((item.map_err(DockyardError::from), run))
        })
        .boxed()
    }

    /// Wait for the process to exit and return its code
    pub async fn wait(&mut self) -> Result<i32, DockyardError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| DockyardError::DeployError(format!("Failed to wait for process: {}", e)))?;
        Ok(status.code().unwrap_or(SIGNAL_EXIT_CODE))
    }

    /// Ask the process to terminate; output keeps draining until it exits
    pub fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to kill process: {}", e);
        }
    }

    /// Push every chunk into `sink`, then return the exit code
    pub async fn drain_into<S: ChunkSink>(&mut self, sink: &mut S) -> Result<i32, DockyardError> {
        while let Some(chunk) = self.next_chunk().await {
            sink.push(&chunk);
        }
        self.wait().await
    }
}

/// Live output channel to a streaming HTTP response.
///
/// Sends to a disconnected receiver are dropped silently.
#[derive(Debug, Clone)]
pub struct LiveSink {
    tx: Option<live::UnboundedSender<Vec<u8>>>,
}

impl LiveSink {
    pub fn new(tx: live::UnboundedSender<Vec<u8>>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink with no listener
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, bytes: &[u8]) {
        if let Some(tx) = &self.tx {
            let _ = tx.unbounded_send(bytes.to_vec());
        }
    }

    /// End the live response
    pub fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.close_channel();
        }
    }
}

/// Accumulated output of one operation plus its live sink
#[derive(Debug)]
pub struct OperationLog {
    buffer: Vec<u8>,
    live: LiveSink,
    checkpoint_every: Duration,
    last_checkpoint: Instant,
}

impl OperationLog {
    pub fn new(live: LiveSink, checkpoint_every: Duration) -> Self {
        Self {
            buffer: Vec::new(),
            live,
            checkpoint_every,
            last_checkpoint: Instant::now(),
        }
    }

    /// Append a line of engine-authored text
    pub fn line(&mut self, text: &str) {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');
        self.push(&bytes);
    }

    /// Captured text so far
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    /// Captured text if a checkpoint is due, resetting the timer
    pub fn checkpoint(&mut self) -> Option<String> {
        if self.last_checkpoint.elapsed() < self.checkpoint_every {
            return None;
        }
        self.last_checkpoint = Instant::now();
        Some(self.text())
    }

    pub fn close_live(&mut self) {
        self.live.close();
    }
}

impl ChunkSink for OperationLog {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        self.live.send(chunk);
    }
}
