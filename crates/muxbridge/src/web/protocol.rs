use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Number;

use muxbridge_types::{DeviceType, PaneEdge, RenderLayoutNode, SplitDirection};

/// Messages sent from a control-mode client to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Keystrokes for a pane, base64 encoded
    Input { pane_id: String, data: String },
    /// The client's terminal area changed size
    Resize { cols: u16, rows: u16 },
    Split { pane_id: String, direction: SplitDirection },
    ClosePane { pane_id: String },
    ResizePane { pane_id: String, cols: u16, rows: u16 },
    SelectPane { pane_id: String },
    /// Echoed back as `pong` for latency measurement
    Ping { timestamp: Number },
    ClientInfo { device_type: DeviceType },

    // Pane management beyond the basic set
    /// Positive scrolls back into history, negative scrolls forward
    Scroll { pane_id: String, lines: i32 },
    ZoomPane { pane_id: String },
    Equalize,
    AdjustPane { pane_id: String, edge: PaneEdge, amount: u16 },
}

/// Messages sent from the server to a control-mode client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Live pane output, base64 encoded
    Output { pane_id: String, data: String },
    /// Full capture of a pane, sent once per pane after the first resize
    InitialContent { pane_id: String, data: String },
    Layout { layout: RenderLayoutNode },
    NewSession { session_id: String, session_name: String },
    Pong { timestamp: Number },
    Error { message: String },
}

impl ServerMessage {
    pub fn output(pane_id: &str, data: &[u8]) -> Self {
        ServerMessage::Output {
            pane_id: pane_id.to_string(),
            data: BASE64.encode(data),
        }
    }

    pub fn initial_content(pane_id: &str, data: &[u8]) -> Self {
        ServerMessage::InitialContent {
            pane_id: pane_id.to_string(),
            data: BASE64.encode(data),
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        ServerMessage::Error { message: message.to_string() }
    }
}

/// JSON control frames accepted by the plain terminal endpoint. Anything else
/// is terminal input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TerminalControl {
    Resize { cols: u16, rows: u16 },
    Refresh,
    Ping { timestamp: Number },
}

/// Replies on the plain terminal endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TerminalReply {
    Pong { timestamp: Number },
    Error { message: String },
}

impl TerminalControl {
    /// Parse a text frame as a control frame, or `None` if it is input.
    pub fn parse(text: &str) -> Option<Self> {
        if !text.trim_start().starts_with('{') {
            return None;
        }
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_client_messages() {
        let input: ClientMessage =
            serde_json::from_str(r#"{"type":"input","paneId":"%1","data":"bHMNCg=="}"#).unwrap();
        assert_eq!(
            input,
            ClientMessage::Input { pane_id: "%1".to_string(), data: "bHMNCg==".to_string() }
        );

        let split: ClientMessage =
            serde_json::from_str(r#"{"type":"split","paneId":"%0","direction":"vertical"}"#).unwrap();
        assert_eq!(
            split,
            ClientMessage::Split { pane_id: "%0".to_string(), direction: SplitDirection::Vertical }
        );

        let resize: ClientMessage =
            serde_json::from_str(r#"{"type":"resize-pane","paneId":"%2","cols":80,"rows":20}"#).unwrap();
        assert_eq!(
            resize,
            ClientMessage::ResizePane { pane_id: "%2".to_string(), cols: 80, rows: 20 }
        );

        let info: ClientMessage =
            serde_json::from_str(r#"{"type":"client-info","deviceType":"tablet"}"#).unwrap();
        assert_eq!(info, ClientMessage::ClientInfo { device_type: DeviceType::Tablet });

        let equalize: ClientMessage = serde_json::from_str(r#"{"type":"equalize"}"#).unwrap();
        assert_eq!(equalize, ClientMessage::Equalize);

        let adjust: ClientMessage = serde_json::from_str(
            r#"{"type":"adjust-pane","paneId":"%3","edge":"left","amount":5}"#,
        )
        .unwrap();
        assert_eq!(
            adjust,
            ClientMessage::AdjustPane { pane_id: "%3".to_string(), edge: PaneEdge::Left, amount: 5 }
        );
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"detonate"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"resize","cols":"wide"}"#).is_err());
    }

    #[test]
    fn test_server_message_wire_shape() {
        assert_eq!(
            serde_json::to_value(ServerMessage::output("%1", b"hi")).unwrap(),
            json!({ "type": "output", "paneId": "%1", "data": "aGk=" })
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::NewSession {
                session_id: "$2".to_string(),
                session_name: "scratch".to_string(),
            })
            .unwrap(),
            json!({ "type": "new-session", "sessionId": "$2", "sessionName": "scratch" })
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::error("boom")).unwrap(),
            json!({ "type": "error", "message": "boom" })
        );
    }

    #[test]
    fn test_pong_echoes_timestamp_exactly() {
        let ping: ClientMessage =
            serde_json::from_str(r#"{"type":"ping","timestamp":1712345678901}"#).unwrap();
        let ClientMessage::Ping { timestamp } = ping else {
            panic!("expected ping");
        };
        let pong = serde_json::to_string(&ServerMessage::Pong { timestamp }).unwrap();
        assert_eq!(pong, r#"{"type":"pong","timestamp":1712345678901}"#);
    }

    #[test]
    fn test_terminal_control_frames() {
        assert_eq!(
            TerminalControl::parse(r#"{"type":"resize","cols":120,"rows":40}"#),
            Some(TerminalControl::Resize { cols: 120, rows: 40 })
        );
        assert_eq!(TerminalControl::parse(r#"{"type":"refresh"}"#), Some(TerminalControl::Refresh));
        assert_eq!(TerminalControl::parse("ls -la\r"), None);
        // Braces typed at a shell prompt are input, not control.
        assert_eq!(TerminalControl::parse("{ echo hi; }"), None);
    }
}
