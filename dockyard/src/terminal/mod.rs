//! Interactive shell sessions over WebSocket
//!
//! A connection claims a registry slot, proves the admin password, and only
//! then gets a PTY shell. The loop below multiplexes client frames, shell
//! output and the idle deadline.

pub mod auth;
pub mod protocol;
pub mod registry;
pub mod session;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::store::Store;
use crate::terminal::auth::{check_admin_password, AuthGate, PasswordCheck, AUTH_THROTTLE, MAX_AUTH_ATTEMPTS};
use crate::terminal::protocol::{initial_geometry, ClientMessage, ServerMessage};
use crate::terminal::registry::{SessionRegistry, SessionTicket, MAX_CONCURRENT_SESSIONS};
use crate::terminal::session::{ShellEvent, ShellOptions, ShellSession, UNKNOWN_EXIT_CODE};

/// Idle period after which a shell is killed
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Close code sent when a session is evicted for inactivity
pub const IDLE_CLOSE_CODE: u16 = 4000;
pub const IDLE_REASON: &str = "idle_timeout";

const TOO_MANY_SESSIONS: &str = "Too many active terminal sessions. Close one first.";
const TOO_MANY_ATTEMPTS: &str = "Too many failed attempts. Reconnect to try again.";

#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub max_sessions: usize,
    pub max_auth_attempts: u32,
    pub auth_throttle: Duration,
    pub idle_timeout: Duration,
    /// Working directory of new shells
    pub cwd: PathBuf,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            max_sessions: MAX_CONCURRENT_SESSIONS,
            max_auth_attempts: MAX_AUTH_ATTEMPTS,
            auth_throttle: AUTH_THROTTLE,
            idle_timeout: IDLE_TIMEOUT,
            cwd: default_cwd(),
        }
    }
}

/// `/root` when present, otherwise `$HOME`, otherwise `/`
pub fn default_cwd() -> PathBuf {
    let root = PathBuf::from("/root");
    if root.is_dir() {
        return root;
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .filter(|p| p.is_dir())
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Owns the session registry and serves upgraded sockets
#[derive(Clone)]
pub struct TerminalManager {
    registry: SessionRegistry,
    store: Arc<dyn Store>,
    config: Arc<TerminalConfig>,
}

impl TerminalManager {
    pub fn new(store: Arc<dyn Store>, config: TerminalConfig) -> Self {
        Self {
            registry: SessionRegistry::new(config.max_sessions),
            store,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Kill every open shell; their sockets close as the shells exit
    pub fn shutdown(&self) {
        let killed = self.registry.kill_all();
        if killed > 0 {
            info!("Killed {} terminal session(s)", killed);
        }
    }

    /// Drive one upgraded socket until it closes
    pub async fn serve(self, mut socket: WebSocket, user: String) {
        let Some(ticket) = self.registry.try_register() else {
            warn!("Rejecting terminal for {}: session limit reached", user);
            send(&mut socket, &ServerMessage::auth_error(TOO_MANY_SESSIONS)).await;
            close(&mut socket, None).await;
            return;
        };

        info!("Terminal connected for {}", user);
        let mut conn = Connection {
            manager: &self,
            ticket,
            shell: None,
            events: None,
            gate: AuthGate::new(self.config.max_auth_attempts, self.config.auth_throttle),
            user,
        };
        conn.run(&mut socket).await;
        conn.cleanup();
    }
}

struct Connection<'a> {
    manager: &'a TerminalManager,
    ticket: SessionTicket,
    shell: Option<ShellSession>,
    events: Option<mpsc::UnboundedReceiver<ShellEvent>>,
    gate: AuthGate,
    user: String,
}

/// What the loop should do after handling a frame
enum Flow {
    Continue,
    Close,
}

impl Connection<'_> {
    async fn run(&mut self, socket: &mut WebSocket) {
        if !send(socket, &ServerMessage::AuthRequired).await {
            return;
        }

        let idle_timeout = self.manager.config.idle_timeout;
        let idle = sleep(idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                frame = socket.recv() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            debug!("Terminal socket error for {}: {}", self.user, e);
                            break;
                        }
                    };
                    let Some(message) = ClientMessage::parse(text.as_str()) else {
                        debug!("Ignoring malformed terminal message");
                        continue;
                    };
                    let activity = matches!(message, ClientMessage::Input { .. });
                    let had_shell = self.shell.is_some();
                    let flow = self.handle(socket, message).await;
                    // the idle clock starts once the shell exists
                    if activity || (!had_shell && self.shell.is_some()) {
                        idle.as_mut().reset(Instant::now() + idle_timeout);
                    }
                    if let Flow::Close = flow {
                        break;
                    }
                }
                event = next_event(&mut self.events) => {
                    match event {
                        Some(ShellEvent::Output(data)) => {
                            if !send(socket, &ServerMessage::Output { data }).await {
                                break;
                            }
                        }
                        Some(ShellEvent::Exited(code)) => {
                            send(socket, &ServerMessage::Exit { code, reason: None }).await;
                            close(socket, None).await;
                            break;
                        }
                        None => {
                            send(socket, &ServerMessage::Exit { code: UNKNOWN_EXIT_CODE, reason: None }).await;
                            close(socket, None).await;
                            break;
                        }
                    }
                }
                _ = &mut idle, if self.shell.is_some() => {
                    info!("Idle timeout for {}", self.user);
                    if let Some(shell) = self.shell.as_mut() {
                        shell.kill();
                    }
                    send(socket, &ServerMessage::Exit {
                        code: UNKNOWN_EXIT_CODE,
                        reason: Some(IDLE_REASON.to_string()),
                    })
                    .await;
                    close(socket, Some((IDLE_CLOSE_CODE, IDLE_REASON))).await;
                    break;
                }
            }
        }
    }

    async fn handle(&mut self, socket: &mut WebSocket, message: ClientMessage) -> Flow {
        match message {
            ClientMessage::Auth { password, cols, rows } => {
                if self.shell.is_some() {
                    return Flow::Continue;
                }
                self.authenticate(socket, password, initial_geometry(cols, rows)).await
            }
            ClientMessage::Input { data } => {
                let Some(shell) = self.shell.as_ref() else {
                    return Flow::Continue;
                };
                if !data.is_empty() {
                    if let Err(e) = shell.write_input(data.as_bytes()) {
                        warn!("Failed to write to shell: {}", e);
                    }
                }
                Flow::Continue
            }
            ClientMessage::Resize { cols, rows } => {
                let Some(shell) = self.shell.as_ref() else {
                    return Flow::Continue;
                };
                if let Err(e) = shell.resize(cols, rows) {
                    warn!("Ignoring resize from {}: {}", self.user, e);
                }
                Flow::Continue
            }
        }
    }

    async fn authenticate(
        &mut self,
        socket: &mut WebSocket,
        password: Option<String>,
        (cols, rows): (u16, u16),
    ) -> Flow {
        if self.gate.is_locked() {
            warn!("Too many failed terminal logins for {}", self.user);
            send(socket, &ServerMessage::auth_error(TOO_MANY_ATTEMPTS)).await;
            close(socket, None).await;
            return Flow::Close;
        }

        let Some(password) = password.filter(|p| !p.is_empty()) else {
            send(socket, &ServerMessage::auth_error("Password required")).await;
            return Flow::Continue;
        };

        match check_admin_password(self.manager.store.as_ref(), &password).await {
            Ok(PasswordCheck::Valid) => {}
            Ok(PasswordCheck::NoAccount) => {
                send(socket, &ServerMessage::auth_error("No user account found")).await;
                return Flow::Continue;
            }
            Ok(PasswordCheck::Invalid) => {
                let failures = self.gate.record_failure().await;
                warn!(
                    "Failed terminal login {}/{} for {}",
                    failures, self.manager.config.max_auth_attempts, self.user
                );
                send(socket, &ServerMessage::auth_error("Invalid password")).await;
                return Flow::Continue;
            }
            Err(e) => {
                error!("Terminal password check failed: {}", e);
                send(socket, &ServerMessage::auth_error("Authentication failed")).await;
                return Flow::Continue;
            }
        }

        let options = ShellOptions {
            cols,
            rows,
            cwd: self.manager.config.cwd.clone(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        match ShellSession::spawn(&options, tx) {
            Ok(shell) => {
                self.ticket.attach_killer(shell.clone_killer());
                self.shell = Some(shell);
                self.events = Some(rx);
                info!("{} authenticated for interactive terminal", self.user);
                send(socket, &ServerMessage::AuthSuccess).await;
            }
            Err(e) => {
                error!("Failed to spawn shell: {}", e);
                send(socket, &ServerMessage::auth_error("Failed to start terminal session")).await;
            }
        }
        Flow::Continue
    }

    /// Safe to call more than once
    fn cleanup(&mut self) {
        if let Some(mut shell) = self.shell.take() {
            shell.kill();
        }
        self.events = None;
        self.ticket.release();
        info!("Terminal disconnected for {}", self.user);
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<ShellEvent>>) -> Option<ShellEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Send a message, returning false once the peer is gone
async fn send(socket: &mut WebSocket, message: &ServerMessage) -> bool {
    socket.send(Message::Text(message.to_json().into())).await.is_ok()
}

async fn close(socket: &mut WebSocket, frame: Option<(u16, &str)>) {
    let frame = frame.map(|(code, reason)| CloseFrame {
        code,
        reason: reason.into(),
    });
    let _ = socket.send(Message::Close(frame)).await;
}
