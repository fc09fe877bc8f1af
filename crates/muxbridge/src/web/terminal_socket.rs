//! Plain terminal WebSocket
//!
//! Raw terminal bytes in both directions through a shared pseudo-terminal
//! attach. Text frames that parse as a [`TerminalControl`] are handled here;
//! every other frame is written to the terminal as-is.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use muxbridge_types::{DEFAULT_COLS, DEFAULT_ROWS};

use crate::web::protocol::{TerminalControl, TerminalReply};
use crate::web::routes::AppState;
use crate::web::{reject, DRAIN_TIMEOUT};

/// Handle a plain terminal WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: AppState, session_name: String) {
    let client_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();

    if !state.tmux.has_session(&session_name).await {
        log::info!("Terminal client {} asked for missing session '{}'", client_id, session_name);
        let reply = TerminalReply::Error {
            message: format!("Session '{}' not found", session_name),
        };
        reject(&mut sink, &reply).await;
        return;
    }

    let (output, mut output_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (replies, mut replies_rx) = mpsc::unbounded_channel::<TerminalReply>();

    // A reconnecting client gets recent history before live output resumes.
    if state.pty.is_attached(&session_name) {
        match state
            .tmux
            .capture_scrollback(&session_name, state.config.pty_scrollback_lines)
            .await
        {
            Ok(history) => {
                let _ = output.send(history);
            }
            Err(e) => log::debug!("Scrollback capture for '{}' failed: {}", session_name, e),
        }
    }

    match state
        .pty
        .attach(&session_name, client_id, output, DEFAULT_COLS, DEFAULT_ROWS)
    {
        Ok(true) => log::info!("Terminal client {} reused PTY for '{}'", client_id, session_name),
        Ok(false) => log::info!("Terminal client {} started PTY for '{}'", client_id, session_name),
        Err(e) => {
            log::warn!("Failed to attach PTY to '{}': {}", session_name, e);
            reject(&mut sink, &TerminalReply::Error { message: e.to_string() }).await;
            return;
        }
    }

    let closed = CancellationToken::new();
    let send_closed = closed.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                bytes = output_rx.recv() => match bytes {
                    Some(bytes) => Message::Binary(bytes),
                    // PTY exited
                    None => break,
                },
                reply = replies_rx.recv() => match reply {
                    Some(reply) => match serde_json::to_string(&reply) {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            log::warn!("Failed to serialize reply: {}", e);
                            continue;
                        }
                    },
                    // Client loop finished
                    None => break,
                },
            };
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
        send_closed.cancel();
    });
    let abort_send = send_task.abort_handle();

    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = stream.next() => frame,
        };
        let result = match frame {
            Some(Ok(Message::Binary(bytes))) => state.pty.write(&session_name, &bytes),
            Some(Ok(Message::Text(text))) => match TerminalControl::parse(&text) {
                Some(TerminalControl::Resize { cols, rows }) => {
                    state.pty.resize(&session_name, cols, rows)
                }
                Some(TerminalControl::Refresh) => state.pty.refresh(&session_name).await,
                Some(TerminalControl::Ping { timestamp }) => {
                    let _ = replies.send(TerminalReply::Pong { timestamp });
                    Ok(())
                }
                None => state.pty.write(&session_name, text.as_bytes()),
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => {
                log::debug!("Terminal client {} read failed: {}", client_id, e);
                break;
            }
        };
        if let Err(e) = result {
            log::debug!("Terminal client {} on '{}': {}", client_id, session_name, e);
            let _ = replies.send(TerminalReply::Error { message: e.to_string() });
        }
    }

    // Client disconnected
    state.pty.detach(&session_name, client_id);
    drop(replies);
    if tokio::time::timeout(DRAIN_TIMEOUT, send_task).await.is_err() {
        abort_send.abort();
    }
}
