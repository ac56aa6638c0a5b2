//! Terminal WebSocket handshake and authentication

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use dockyard::authn::password::hash_password;
use dockyard::models::project::AdminAccount;
use dockyard::store::{JsonStore, Store};
use dockyard::terminal::TerminalConfig;

use crate::common::{server_state, spawn_server, token};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PASSWORD: &str = "correct horse";

async fn start(config: TerminalConfig) -> (tempfile::TempDir, SocketAddr) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonStore::in_memory());
    store
        .set_admin_account(AdminAccount {
            email: "admin@example.com".to_string(),
            password_hash: hash_password(PASSWORD).unwrap(),
        })
        .await
        .unwrap();
    let addr = spawn_server(server_state(store, dir.path(), config)).await;
    (dir, addr)
}

fn fast_config() -> TerminalConfig {
    TerminalConfig {
        auth_throttle: Duration::from_millis(10),
        ..TerminalConfig::default()
    }
}

async fn connect(addr: SocketAddr) -> Socket {
    let url = format!("ws://{}/ws/terminal?token={}", addr, token());
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

/// Next text frame as JSON, `None` once the server closed
async fn next_json(socket: &mut Socket) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(10), socket.next())
            .await
            .expect("no frame within 10s")?;
        match frame {
            Ok(Message::Text(text)) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn send_json(socket: &mut Socket, value: Value) {
    socket.send(Message::text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_upgrade_without_token_is_unauthorized() {
    let (_dir, addr) = start(fast_config()).await;

    for url in [
        format!("ws://{}/ws/terminal", addr),
        format!("ws://{}/ws/terminal?token=garbage", addr),
    ] {
        match connect_async(url).await {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
            other => panic!("expected HTTP 401, got {:?}", other.map(|_| ())),
        }
    }
}

#[tokio::test]
async fn test_auth_errors_keep_socket_open() {
    let (_dir, addr) = start(fast_config()).await;
    let mut socket = connect(addr).await;

    assert_eq!(next_json(&mut socket).await.unwrap()["type"], "auth_required");

    send_json(&mut socket, json!({"type": "auth"})).await;
    let reply = next_json(&mut socket).await.unwrap();
    assert_eq!(reply, json!({"type": "auth_error", "message": "Password required"}));

    send_json(&mut socket, json!({"type": "auth", "password": "wrong"})).await;
    let reply = next_json(&mut socket).await.unwrap();
    assert_eq!(reply, json!({"type": "auth_error", "message": "Invalid password"}));

    // input before authentication is ignored, the socket stays usable
    send_json(&mut socket, json!({"type": "input", "data": "ls\n"})).await;
    send_json(&mut socket, json!({"type": "auth", "password": "wrong again"})).await;
    let reply = next_json(&mut socket).await.unwrap();
    assert_eq!(reply["message"], "Invalid password");
}

#[tokio::test]
async fn test_lockout_after_repeated_failures() {
    let config = TerminalConfig {
        max_auth_attempts: 2,
        ..fast_config()
    };
    let (_dir, addr) = start(config).await;
    let mut socket = connect(addr).await;
    next_json(&mut socket).await.unwrap();

    for _ in 0..2 {
        send_json(&mut socket, json!({"type": "auth", "password": "nope"})).await;
        assert_eq!(next_json(&mut socket).await.unwrap()["message"], "Invalid password");
    }

    // locked even with the right password
    send_json(&mut socket, json!({"type": "auth", "password": PASSWORD})).await;
    let reply = next_json(&mut socket).await.unwrap();
    assert_eq!(reply["message"], "Too many failed attempts. Reconnect to try again.");
    assert!(next_json(&mut socket).await.is_none());
}

#[tokio::test]
async fn test_session_limit() {
    let config = TerminalConfig {
        max_sessions: 1,
        ..fast_config()
    };
    let (_dir, addr) = start(config).await;

    let mut first = connect(addr).await;
    assert_eq!(next_json(&mut first).await.unwrap()["type"], "auth_required");

    let mut second = connect(addr).await;
    let reply = next_json(&mut second).await.unwrap();
    assert_eq!(
        reply,
        json!({"type": "auth_error", "message": "Too many active terminal sessions. Close one first."})
    );
    assert!(next_json(&mut second).await.is_none());

    // closing the first frees the slot
    first.close(None).await.unwrap();
    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut third = connect(addr).await;
    assert_eq!(next_json(&mut third).await.unwrap()["type"], "auth_required");
}

#[tokio::test]
async fn test_shell_session_round_trip() {
    let config = TerminalConfig {
        cwd: std::env::temp_dir(),
        ..fast_config()
    };
    let (_dir, addr) = start(config).await;
    let mut socket = connect(addr).await;
    next_json(&mut socket).await.unwrap();

    send_json(&mut socket, json!({"type": "auth", "password": PASSWORD, "cols": 100, "rows": 30})).await;
    assert_eq!(next_json(&mut socket).await.unwrap()["type"], "auth_success");

    send_json(&mut socket, json!({"type": "resize", "cols": 120, "rows": 40})).await;
    send_json(&mut socket, json!({"type": "input", "data": "echo dockyard-$((40+2))\n"})).await;
    send_json(&mut socket, json!({"type": "input", "data": "exit 7\n"})).await;

    let mut output = String::new();
    let exit = loop {
        let message = next_json(&mut socket).await.expect("socket closed before exit");
        match message["type"].as_str() {
            Some("output") => output.push_str(message["data"].as_str().unwrap()),
            Some("exit") => break message,
            other => panic!("unexpected message {:?}", other),
        }
    };

    assert!(output.contains("dockyard-42"));
    assert_eq!(exit["code"], 7);
    assert!(next_json(&mut socket).await.is_none());
}

async fn authenticated(config: TerminalConfig) -> (tempfile::TempDir, Socket) {
    let (dir, addr) = start(config).await;
    let mut socket = connect(addr).await;
    next_json(&mut socket).await.unwrap();
    send_json(&mut socket, json!({"type": "auth", "password": PASSWORD})).await;
    assert_eq!(next_json(&mut socket).await.unwrap()["type"], "auth_success");
    (dir, socket)
}

/// Skip shell output until the `exit` message
async fn wait_exit(socket: &mut Socket) -> Value {
    loop {
        let message = next_json(socket).await.expect("socket closed before exit");
        if message["type"] == "exit" {
            return message;
        }
        assert_eq!(message["type"], "output");
    }
}

#[tokio::test]
async fn test_idle_session_is_evicted() {
    let config = TerminalConfig {
        idle_timeout: Duration::from_millis(300),
        cwd: std::env::temp_dir(),
        ..fast_config()
    };
    let (_dir, mut socket) = authenticated(config).await;

    let exit = wait_exit(&mut socket).await;
    assert_eq!(exit, json!({"type": "exit", "code": -1, "reason": "idle_timeout"}));

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Message::Close(Some(CloseFrame { code, reason })) => {
            assert_eq!(u16::from(code), 4000);
            assert_eq!(reason.as_str(), "idle_timeout");
        }
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_input_keeps_session_alive() {
    let config = TerminalConfig {
        idle_timeout: Duration::from_millis(600),
        cwd: std::env::temp_dir(),
        ..fast_config()
    };
    let (_dir, mut socket) = authenticated(config).await;

    // well past one idle period in total, never idle for a whole one
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        send_json(&mut socket, json!({"type": "input", "data": "\n"})).await;
    }

    loop {
        match tokio::time::timeout(Duration::from_millis(100), socket.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let message: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(message["type"], "output", "session ended while active");
            }
            Ok(Some(Ok(Message::Close(frame)))) => panic!("session closed while active: {:?}", frame),
            Ok(Some(Ok(_))) => continue,
            Ok(other) => panic!("socket closed while active: {:?}", other.map(|r| r.is_ok())),
            Err(_) => break,
        }
    }

    // once input stops the timer runs out
    let exit = wait_exit(&mut socket).await;
    assert_eq!(exit["reason"], "idle_timeout");
}
