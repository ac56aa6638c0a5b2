//! Terminal WebSocket message envelopes

use serde::{Deserialize, Serialize};

/// Exclusive upper bound for terminal columns and rows
pub const MAX_DIMENSION: i64 = 500;

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// Messages sent by the browser
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        cols: Option<i64>,
        #[serde(default)]
        rows: Option<i64>,
    },
    Input {
        data: String,
    },
    Resize {
        cols: i64,
        rows: i64,
    },
}

impl ClientMessage {
    /// Parse a text frame, `None` for anything malformed
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Messages sent to the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthRequired,
    AuthSuccess,
    AuthError {
        message: String,
    },
    Output {
        data: String,
    },
    Exit {
        code: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ServerMessage {
    pub fn auth_error(message: impl Into<String>) -> Self {
        ServerMessage::AuthError {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // unit and string variants always serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Terminal geometry if both dimensions are within `1..MAX_DIMENSION`
pub fn checked_geometry(cols: i64, rows: i64) -> Option<(u16, u16)> {
    let valid = |v: i64| v > 0 && v < MAX_DIMENSION;
    if valid(cols) && valid(rows) {
        Some((cols as u16, rows as u16))
    } else {
        None
    }
}

/// Initial geometry from an auth message, falling back to 80x24
pub fn initial_geometry(cols: Option<i64>, rows: Option<i64>) -> (u16, u16) {
    let cols = cols
        .and_then(|c| checked_geometry(c, 1))
        .map(|(c, _)| c)
        .unwrap_or(DEFAULT_COLS);
    let rows = rows
        .and_then(|r| checked_geometry(1, r))
        .map(|(_, r)| r)
        .unwrap_or(DEFAULT_ROWS);
    (cols, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_messages() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"auth","password":"pw","cols":120,"rows":40}"#),
            Some(ClientMessage::Auth {
                password: Some("pw".into()),
                cols: Some(120),
                rows: Some(40),
            })
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"auth"}"#),
            Some(ClientMessage::Auth {
                password: None,
                cols: None,
                rows: None,
            })
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"input","data":"ls\r"}"#),
            Some(ClientMessage::Input { data: "ls\r".into() })
        );
    }

    #[test]
    fn test_malformed_messages_are_rejected() {
        assert!(ClientMessage::parse("not json").is_none());
        assert!(ClientMessage::parse(r#"{"type":"shell"}"#).is_none());
        // geometry must be numeric
        assert!(ClientMessage::parse(r#"{"type":"resize","cols":"80; reboot","rows":24}"#).is_none());
    }

    #[test]
    fn test_server_message_wire_format() {
        assert_eq!(ServerMessage::AuthRequired.to_json(), r#"{"type":"auth_required"}"#);
        assert_eq!(
            ServerMessage::auth_error("Invalid password").to_json(),
            r#"{"type":"auth_error","message":"Invalid password"}"#
        );
        assert_eq!(
            ServerMessage::Exit { code: 0, reason: None }.to_json(),
            r#"{"type":"exit","code":0}"#
        );
        assert_eq!(
            ServerMessage::Exit {
                code: -1,
                reason: Some("idle_timeout".into())
            }
            .to_json(),
            r#"{"type":"exit","code":-1,"reason":"idle_timeout"}"#
        );
    }

    #[test]
    fn test_checked_geometry() {
        assert_eq!(checked_geometry(120, 40), Some((120, 40)));
        assert_eq!(checked_geometry(499, 499), Some((499, 499)));
        assert_eq!(checked_geometry(100_000, 40), None);
        assert_eq!(checked_geometry(500, 40), None);
        assert_eq!(checked_geometry(0, 40), None);
        assert_eq!(checked_geometry(80, -1), None);
    }

    #[test]
    fn test_initial_geometry_defaults() {
        assert_eq!(initial_geometry(None, None), (80, 24));
        assert_eq!(initial_geometry(Some(132), Some(50)), (132, 50));
        assert_eq!(initial_geometry(Some(100_000), Some(50)), (80, 50));
    }
}
