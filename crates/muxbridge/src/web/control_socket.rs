//! Control-mode WebSocket
//!
//! Bridges one browser connection to the shared [`ControlSession`] of a tmux
//! session. Pane output, layout changes and session exit are pushed to the
//! browser as JSON; browser messages are dispatched to session operations.
//! A failure while handling one message is reported to this client only.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use muxbridge_control::{codec, BridgeError, BridgeResult, ControlSession, ListenerToken};
use muxbridge_types::TerminalSize;

use crate::web::protocol::{ClientMessage, ServerMessage};
use crate::web::routes::AppState;
use crate::web::{reject, DRAIN_TIMEOUT};

/// Handle a control-mode WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: AppState, session_name: String) {
    let client_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();

    if !state.tmux.has_session(&session_name).await {
        log::info!("Control client {} asked for missing session '{}'", client_id, session_name);
        reject(&mut sink, &ServerMessage::error(format!("Session '{}' not found", session_name))).await;
        return;
    }

    let session = match state.registry.attach(&session_name, client_id) {
        Ok(session) => session,
        Err(e) => {
            log::warn!("Failed to attach to '{}': {}", session_name, e);
            reject(&mut sink, &ServerMessage::error(e)).await;
            return;
        }
    };

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let closed = CancellationToken::new();
    let registration = ClientRegistration::subscribe(session.clone(), client_id, &outbound, &closed);

    // Spawn task to send messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("Failed to serialize message: {}", e),
            }
        }
        let _ = sink.close().await;
    });
    let abort_send = send_task.abort_handle();

    let mut connection = ControlConnection::new(session, client_id, outbound);
    if let Err(e) = connection.wait_ready(state.config.command_timeout()).await {
        log::warn!("Session '{}' never became ready: {}", session_name, e);
        connection.send(ServerMessage::error(e));
        closed.cancel();
    } else {
        connection.send_current_layout().await;
    }

    // Handle incoming WebSocket messages
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => connection.handle_text(&text).await,
                Some(Ok(Message::Binary(_))) => {
                    log::debug!("Ignoring binary frame from control client {}", client_id);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("Control client {} read failed: {}", client_id, e);
                    break;
                }
            },
        }
    }

    // Client disconnected
    drop(registration);
    drop(connection);
    if tokio::time::timeout(DRAIN_TIMEOUT, send_task).await.is_err() {
        abort_send.abort();
    }
}

/// Listener tokens and the client slot owned by one connection. Dropping it
/// unsubscribes everything and releases the client.
struct ClientRegistration {
    session: Arc<ControlSession>,
    client_id: Uuid,
    tokens: Vec<ListenerToken>,
}

impl ClientRegistration {
    fn subscribe(
        session: Arc<ControlSession>,
        client_id: Uuid,
        outbound: &mpsc::UnboundedSender<ServerMessage>,
        closed: &CancellationToken,
    ) -> Self {
        let mut tokens = Vec::with_capacity(4);

        let tx = outbound.clone();
        tokens.push(session.on_output(move |pane_id, data| {
            let _ = tx.send(ServerMessage::output(pane_id, data));
        }));

        let tx = outbound.clone();
        tokens.push(session.on_layout_change(move |update| {
            let _ = tx.send(ServerMessage::Layout { layout: update.render.clone() });
        }));

        let tx = outbound.clone();
        tokens.push(session.on_session_changed(move |session_id, name| {
            let _ = tx.send(ServerMessage::NewSession {
                session_id: session_id.to_string(),
                session_name: name.to_string(),
            });
        }));

        let tx = outbound.clone();
        let closed = closed.clone();
        tokens.push(session.on_exit(move |reason| {
            let message = match reason {
                Some(reason) => format!("Session ended: {}", reason),
                None => "Session ended".to_string(),
            };
            let _ = tx.send(ServerMessage::error(message));
            closed.cancel();
        }));

        Self { session, client_id, tokens }
    }
}

impl Drop for ClientRegistration {
    fn drop(&mut self) {
        for token in self.tokens.drain(..) {
            self.session.unsubscribe(token);
        }
        let remaining = self.session.remove_client(self.client_id);
        log::info!(
            "Client {} left '{}' ({} remaining)",
            self.client_id,
            self.session.name(),
            remaining
        );
    }
}

/// Per-connection message dispatch.
struct ControlConnection {
    session: Arc<ControlSession>,
    client_id: Uuid,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    /// Set once the first resize has been applied and panes captured.
    sized: bool,
}

impl ControlConnection {
    fn new(
        session: Arc<ControlSession>,
        client_id: Uuid,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            session,
            client_id,
            outbound,
            sized: false,
        }
    }

    fn send(&self, message: ServerMessage) {
        let _ = self.outbound.send(message);
    }

    async fn wait_ready(&self, limit: Duration) -> BridgeResult<()> {
        match tokio::time::timeout(limit, self.session.wait_ready()).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout(limit.as_millis() as u64)),
        }
    }

    /// tmux does not resend the layout to a reattaching client, so ask for it.
    async fn send_current_layout(&self) {
        match self.session.current_window_layout().await {
            Ok(update) => self.send(ServerMessage::Layout { layout: update.render }),
            Err(e) => {
                log::warn!("Layout query on '{}' failed: {}", self.session.name(), e);
                self.send(ServerMessage::error(e));
            }
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Unparseable message from {}: {} ({})", self.client_id, text, e);
                self.send(ServerMessage::error(format!("Invalid message: {}", e)));
                return;
            }
        };
        if let Err(e) = self.handle_message(message).await {
            log::debug!("Message from {} failed: {}", self.client_id, e);
            self.send(ServerMessage::error(e));
        }
    }

    async fn handle_message(&mut self, message: ClientMessage) -> BridgeResult<()> {
        use ClientMessage::*;

        match message {
            Input { pane_id, data } => {
                let bytes = BASE64.decode(data)?;
                self.session.send_input(&pane_id, &bytes).await
            }
            Resize { cols, rows } => {
                let size = TerminalSize::new(cols, rows);
                if self.sized {
                    self.session.set_client_size(size);
                    return Ok(());
                }
                // Capture only once tmux has the client's real dimensions.
                self.session.apply_client_size_now(size).await?;
                self.sized = true;
                self.send_initial_content().await
            }
            Split { pane_id, direction } => {
                let new_pane = self.session.split_pane(&pane_id, direction).await?;
                log::debug!("Split {} ({}) into {}", pane_id, direction, new_pane);
                Ok(())
            }
            ClosePane { pane_id } => self.session.close_pane(&pane_id).await,
            ResizePane { pane_id, cols, rows } => {
                self.session.resize_pane(&pane_id, cols, rows).await
            }
            SelectPane { pane_id } => self.session.select_pane(&pane_id).await,
            Ping { timestamp } => {
                self.send(ServerMessage::Pong { timestamp });
                Ok(())
            }
            ClientInfo { device_type } => {
                self.session.set_device_type(self.client_id, device_type);
                Ok(())
            }
            Scroll { pane_id, lines } => self.session.scroll_pane(&pane_id, lines).await,
            ZoomPane { pane_id } => self.session.toggle_zoom(&pane_id).await,
            Equalize => self.session.equalize_panes(None).await,
            AdjustPane { pane_id, edge, amount } => {
                self.session.adjust_pane(&pane_id, edge, amount).await
            }
        }
    }

    async fn send_initial_content(&self) -> BridgeResult<()> {
        let panes = self.session.list_panes().await?;
        for pane in panes {
            match self.session.capture_pane(&pane.pane_id).await {
                Ok(text) => self.send(ServerMessage::initial_content(
                    &pane.pane_id,
                    &codec::to_terminal_lines(&text),
                )),
                Err(e) => {
                    log::debug!("Capture of {} failed: {}", pane.pane_id, e);
                    self.send(ServerMessage::error(format!(
                        "Capture of {} failed: {}",
                        pane.pane_id, e
                    )));
                }
            }
        }
        Ok(())
    }
}
