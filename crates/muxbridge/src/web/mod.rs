// Web frontend module
pub mod control_socket;
pub mod protocol;
pub mod routes;
pub mod server;
pub mod terminal_socket;

pub use protocol::{ClientMessage, ServerMessage, TerminalControl, TerminalReply};
pub use routes::{create_router, AppState};
pub use server::WebServer;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use serde::Serialize;
use std::time::Duration;

/// How long a closing connection may take to flush queued frames.
pub(crate) const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Send one JSON frame and close the socket.
pub(crate) async fn reject<T: Serialize>(sink: &mut SplitSink<WebSocket, Message>, frame: &T) {
    match serde_json::to_string(frame) {
        Ok(json) => {
            let _ = sink.send(Message::Text(json)).await;
        }
        Err(e) => log::warn!("Failed to serialize rejection: {}", e),
    }
    let _ = sink.close().await;
}
