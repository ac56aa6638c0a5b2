//! PTY-backed interactive shell
//!
//! The shell runs inside a pseudo-terminal; a blocking reader thread decodes
//! its output and forwards it through an unbounded channel, followed by one
//! exit event once the shell is gone.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::DockyardError;
use crate::terminal::protocol::checked_geometry;

/// Exit code reported when the shell's status cannot be read
pub const UNKNOWN_EXIT_CODE: i32 = -1;

const PROMPT: &str = r"\[\e[1;36m\]dockyard\[\e[0m\]:\[\e[1;34m\]\w\[\e[0m\]\$ ";

/// What the reader thread reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Output(String),
    Exited(i32),
}

#[derive(Debug, Clone)]
pub struct ShellOptions {
    pub cols: u16,
    pub rows: u16,
    pub cwd: PathBuf,
}

/// Decodes a byte stream as UTF-8, holding back code points split across reads
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // incomplete sequence at the end; wait for more
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

fn detect_shell() -> &'static str {
    if Path::new("/bin/bash").exists() {
        "/bin/bash"
    } else {
        "/bin/sh"
    }
}

/// An interactive shell inside a PTY
pub struct ShellSession {
    master: Box<dyn MasterPty + Send>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    killed: bool,
}

impl ShellSession {
    /// Spawn the shell and start forwarding its output to `tx`
    pub fn spawn(options: &ShellOptions, tx: mpsc::UnboundedSender<ShellEvent>) -> Result<Self, DockyardError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| DockyardError::TerminalError(format!("openpty failed: {e}")))?;

        let shell = detect_shell();
        let mut cmd = CommandBuilder::new(shell);
        cmd.cwd(&options.cwd);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd.env("LANG", "en_US.UTF-8");
        cmd.env("PS1", PROMPT);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| DockyardError::TerminalError(format!("spawn_command failed: {e}")))?;
        // the master only sees EOF once every slave handle is closed
        drop(pair.slave);

        let killer = child.clone_killer();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| DockyardError::TerminalError(format!("clone_reader failed: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| DockyardError::TerminalError(format!("take_writer failed: {e}")))?;

        info!(
            "Spawned {} ({}x{}) in {}",
            shell,
            options.cols,
            options.rows,
            options.cwd.display()
        );

        tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut carry = Utf8Carry::default();
            let mut buf = [0u8; 4096];

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = carry.push(&buf[..n]);
                        if !text.is_empty() && tx.send(ShellEvent::Output(text)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // EIO once the shell has exited
                        debug!("Terminal read ended: {}", e);
                        break;
                    }
                }
            }

            let code = match child.wait() {
                Ok(status) => i32::try_from(status.exit_code()).unwrap_or(UNKNOWN_EXIT_CODE),
                Err(e) => {
                    warn!("Unable to read shell exit status: {}", e);
                    UNKNOWN_EXIT_CODE
                }
            };
            info!("Shell exited with code {}", code);
            let _ = tx.send(ShellEvent::Exited(code));
        });

        Ok(Self {
            master: pair.master,
            writer: Arc::new(Mutex::new(writer)),
            killer,
            killed: false,
        })
    }

    /// Write raw bytes (keystrokes) into the PTY
    pub fn write_input(&self, data: &[u8]) -> Result<(), DockyardError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DockyardError::TerminalError("Terminal writer lock poisoned".into()))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Apply a new geometry if both dimensions are in range
    pub fn resize(&self, cols: i64, rows: i64) -> Result<(u16, u16), DockyardError> {
        let (cols, rows) = checked_geometry(cols, rows).ok_or_else(|| {
            DockyardError::ValidationError(format!("Rejected terminal geometry {}x{}", cols, rows))
        })?;
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| DockyardError::TerminalError(format!("resize failed: {e}")))?;
        Ok((cols, rows))
    }

    /// Current geometry as (cols, rows)
    pub fn size(&self) -> Result<(u16, u16), DockyardError> {
        let size = self
            .master
            .get_size()
            .map_err(|e| DockyardError::TerminalError(format!("get_size failed: {e}")))?;
        Ok((size.cols, size.rows))
    }

    /// Separate handle able to kill this shell
    pub fn clone_killer(&self) -> Box<dyn ChildKiller + Send + Sync> {
        self.killer.clone_killer()
    }

    /// Force-kill the shell; later calls do nothing
    pub fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        if let Err(e) = self.killer.kill() {
            debug!("Shell already gone: {}", e);
        }
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.kill();
    }
}
