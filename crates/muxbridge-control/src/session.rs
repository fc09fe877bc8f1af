//! Control session
//!
//! One control-mode subprocess per multiplexer session. A reader task frames
//! and dispatches the notification stream strictly in arrival order; a writer
//! task owns the command stream. Replies carry no command id, so they are
//! matched to commands by submission order: every command is queued and
//! written under the same lock, and each reply block pops the oldest entry.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use muxbridge_types::{
    DeviceType, PaneEdge, PaneInfo, SessionState, SessionSummary, SplitDirection, TerminalSize,
};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec;
use crate::error::{BridgeError, BridgeResult};
use crate::layout::{parse_layout, to_render_layout};
use crate::listeners::{LayoutUpdate, ListenerToken, Listeners};
use crate::protocol::{classify, ControlLine, LineFramer};
use crate::registry::SessionMap;
use crate::spawner::{self, ControlProcess};
use crate::tmux::quote_arg;

pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
pub const GRACE_PERIOD: Duration = Duration::from_secs(30);
pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(100);

const READ_BUFFER_BYTES: usize = 16 * 1024;

/// Tunables for a control session.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub command_timeout: Duration,
    pub grace_period: Duration,
    pub resize_debounce: Duration,
    pub input_chunk_bytes: usize,
    /// Commands issued once the handshake completes; `{session}` expands to
    /// the quoted session name.
    pub setup_commands: Vec<String>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            command_timeout: COMMAND_TIMEOUT,
            grace_period: GRACE_PERIOD,
            resize_debounce: RESIZE_DEBOUNCE,
            input_chunk_bytes: codec::INPUT_CHUNK_BYTES,
            setup_commands: vec!["set-option -t {session} mouse off".to_string()],
        }
    }
}

struct PendingCommand {
    id: u64,
    reply: oneshot::Sender<BridgeResult<String>>,
}

#[derive(Default)]
struct ClientState {
    count: usize,
    grace_timer: Option<JoinHandle<()>>,
    devices: HashMap<Uuid, DeviceType>,
}

#[derive(Default)]
struct ResizeState {
    debounce: Option<JoinHandle<()>>,
    last_applied: Option<TerminalSize>,
}

/// Reply block being read by the reader task.
#[derive(Default)]
struct BlockState {
    open: Option<u64>,
    body: Vec<Vec<u8>>,
    handshake_done: bool,
}

enum LineOutcome {
    Continue,
    Exit(Option<String>),
}

/// A live control-mode connection to one multiplexer session.
pub struct ControlSession {
    name: String,
    config: ControlConfig,
    created_at: DateTime<Utc>,
    state: watch::Sender<SessionState>,
    degraded: AtomicBool,
    exit_notified: AtomicBool,
    exit_reason: Mutex<Option<String>>,
    commands: mpsc::UnboundedSender<Vec<u8>>,
    pending: Mutex<VecDeque<PendingCommand>>,
    next_command_id: AtomicU64,
    handshake: Mutex<Option<oneshot::Sender<()>>>,
    listeners: Mutex<Listeners>,
    layout: Mutex<Option<LayoutUpdate>>,
    clients: Mutex<ClientState>,
    resize: Mutex<ResizeState>,
    child: Mutex<Option<Child>>,
    cancel: CancellationToken,
    registry: Option<Weak<SessionMap>>,
}

impl std::fmt::Debug for ControlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSession")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("clients", &self.client_count())
            .finish()
    }
}

impl ControlSession {
    /// Start a session over an already spawned control process.
    pub fn start(name: &str, process: ControlProcess, config: ControlConfig) -> Arc<Self> {
        Self::start_with_registry(name, process, config, None)
    }

    pub(crate) fn start_with_registry(
        name: &str,
        process: ControlProcess,
        config: ControlConfig,
        registry: Option<Weak<SessionMap>>,
    ) -> Arc<Self> {
        let ControlProcess { stdout, stdin, child } = process;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (handshake_tx, handshake_rx) = oneshot::channel();
        let (state, _) = watch::channel(SessionState::Starting);

        let session = Arc::new(Self {
            name: name.to_string(),
            config,
            created_at: Utc::now(),
            state,
            degraded: AtomicBool::new(false),
            exit_notified: AtomicBool::new(false),
            exit_reason: Mutex::new(None),
            commands,
            pending: Mutex::new(VecDeque::new()),
            next_command_id: AtomicU64::new(1),
            handshake: Mutex::new(Some(handshake_tx)),
            listeners: Mutex::new(Listeners::new()),
            layout: Mutex::new(None),
            clients: Mutex::new(ClientState::default()),
            resize: Mutex::new(ResizeState::default()),
            child: Mutex::new(child),
            cancel: CancellationToken::new(),
            registry,
        });

        tokio::spawn(session.clone().read_loop(stdout));
        tokio::spawn(session.clone().write_loop(stdin, command_rx));
        tokio::spawn(session.clone().finish_startup(handshake_rx));

        session
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == SessionState::Destroyed
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Reason given by `%exit` or by a broken subprocess stream.
    pub fn exit_reason(&self) -> Option<String> {
        self.exit_reason.lock().clone()
    }

    /// Wait until the handshake and setup commands have completed.
    pub async fn wait_ready(&self) -> BridgeResult<()> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|state| *state != SessionState::Starting)
            .await
            .map_err(|_| BridgeError::Destroyed)?;
        match state {
            SessionState::Ready => Ok(()),
            _ => Err(BridgeError::Destroyed),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            name: self.name.clone(),
            state: self.state(),
            clients: self.client_count(),
            created_at: self.created_at,
            degraded: self.is_degraded(),
        }
    }

    // ── Protocol stream ────────────────────────────────────────────

    async fn read_loop(self: Arc<Self>, mut stdout: Box<dyn AsyncRead + Send + Unpin>) {
        let mut framer = LineFramer::new();
        let mut block = BlockState::default();
        let mut buf = vec![0u8; READ_BUFFER_BYTES];

        let reason = loop {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => return,
                read = stdout.read(&mut buf) => read,
            };
            match read {
                Ok(0) => break "control client closed its output".to_string(),
                Ok(n) => {
                    framer.push(&buf[..n]);
                    while let Some(line) = framer.next_line() {
                        if let LineOutcome::Exit(reason) = self.handle_line(&line, &mut block) {
                            log::info!(
                                "Control session '{}' exited: {}",
                                self.name,
                                reason.as_deref().unwrap_or("no reason given")
                            );
                            self.notify_exit(reason.as_deref());
                            self.destroy();
                            return;
                        }
                    }
                }
                Err(e) => break format!("read failed: {}", e),
            }
        };

        if !self.is_destroyed() {
            log::warn!("Control session '{}' lost its subprocess: {}", self.name, reason);
            self.notify_exit(Some(&reason));
            self.destroy();
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        mut stdin: Box<dyn AsyncWrite + Send + Unpin>,
        mut commands: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        loop {
            let line = tokio::select! {
                _ = self.cancel.cancelled() => break,
                line = commands.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };
            let written = async {
                stdin.write_all(&line).await?;
                stdin.flush().await
            }
            .await;
            if let Err(e) = written {
                log::warn!("Control session '{}' command stream failed: {}", self.name, e);
                self.notify_exit(Some(&format!("write failed: {}", e)));
                self.destroy();
                break;
            }
        }
        let _ = stdin.shutdown().await;
    }

    async fn finish_startup(self: Arc<Self>, handshake: oneshot::Receiver<()>) {
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            done = handshake => if done.is_err() { return },
        }

        let target = quote_arg(&self.name);
        for template in &self.config.setup_commands {
            let command = template.replace("{session}", &target);
            if let Err(e) = self.send_command(&command).await {
                log::warn!("Setup command '{}' failed on '{}': {}", command, self.name, e);
            }
        }

        let became_ready = self.state.send_if_modified(|state| {
            if *state == SessionState::Starting {
                *state = SessionState::Ready;
                true
            } else {
                false
            }
        });
        if became_ready {
            log::info!("Control session '{}' ready", self.name);
        }
    }

    fn handle_line(&self, line: &[u8], block: &mut BlockState) -> LineOutcome {
        if let Some(open) = block.open {
            match classify(line) {
                ControlLine::End { number } if number == open => self.finish_block(block, true),
                ControlLine::Error { number } if number == open => self.finish_block(block, false),
                _ => block.body.push(line.to_vec()),
            }
            return LineOutcome::Continue;
        }

        match classify(line) {
            ControlLine::Output { pane_id, payload } => {
                let data = codec::decode(payload);
                self.dispatch_output(pane_id, &data);
            }
            ControlLine::LayoutChange { window_id, layout } => self.apply_layout(window_id, layout),
            ControlLine::Begin { number } => {
                block.open = Some(number);
                block.body.clear();
            }
            ControlLine::End { number } | ControlLine::Error { number } => {
                log::warn!("Block {} ended on '{}' without a %begin", number, self.name);
            }
            ControlLine::Exit { reason } => return LineOutcome::Exit(reason),
            ControlLine::SessionChanged { session_id, name } => {
                let targets = self.listeners.lock().session_targets();
                for callback in targets {
                    callback(session_id, &name);
                }
            }
            ControlLine::Notification(raw) => {
                log::trace!("Ignoring notification: {}", String::from_utf8_lossy(raw));
            }
            ControlLine::Data(raw) => {
                log::debug!(
                    "Dropping line outside a reply block on '{}': {}",
                    self.name,
                    String::from_utf8_lossy(raw)
                );
            }
        }
        LineOutcome::Continue
    }

    fn finish_block(&self, block: &mut BlockState, success: bool) {
        let number = block.open.take();
        let mut body = Vec::new();
        for (i, line) in block.body.drain(..).enumerate() {
            if i > 0 {
                body.push(b'\n');
            }
            body.extend(codec::decode(&line));
        }

        if !block.handshake_done {
            block.handshake_done = true;
            if let Some(tx) = self.handshake.lock().take() {
                let _ = tx.send(());
            }
            return;
        }

        let text = String::from_utf8_lossy(&body).into_owned();
        match self.pending.lock().pop_front() {
            Some(command) => {
                let result = if success {
                    Ok(text)
                } else {
                    Err(BridgeError::CommandFailed(text))
                };
                // Receiver is gone if the caller timed out or was cancelled.
                let _ = command.reply.send(result);
            }
            None => log::warn!(
                "Reply block {:?} on '{}' has no pending command",
                number,
                self.name
            ),
        }
    }

    fn dispatch_output(&self, pane_id: &str, data: &[u8]) {
        let targets = self.listeners.lock().output_targets(pane_id);
        for callback in targets {
            callback(pane_id, data);
        }
    }

    fn apply_layout(&self, window_id: &str, layout: &str) {
        let parsed = match parse_layout(layout) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Dropping layout change on '{}': {}", self.name, e);
                return;
            }
        };
        let update = LayoutUpdate {
            window_id: window_id.to_string(),
            render: to_render_layout(&parsed),
            layout: parsed,
        };
        *self.layout.lock() = Some(update.clone());

        let targets = self.listeners.lock().layout_targets();
        for callback in targets {
            callback(&update);
        }
    }

    fn notify_exit(&self, reason: Option<&str>) {
        if self.exit_notified.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.exit_reason.lock() = reason.map(str::to_string);
        let targets = self.listeners.lock().exit_targets();
        for callback in targets {
            callback(reason);
        }
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Send one command line and wait for its reply body.
    pub async fn send_command(&self, command: &str) -> BridgeResult<String> {
        if self.is_degraded() {
            return Err(BridgeError::Degraded);
        }
        // One line in, one reply block out; anything else breaks correlation.
        if command.contains(['\n', '\r']) {
            return Err(BridgeError::InvalidCommand(command.to_string()));
        }

        let id = self.next_command_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(b'\n');

        {
            let mut pending = self.pending.lock();
            if self.is_destroyed() {
                return Err(BridgeError::Destroyed);
            }
            if self.commands.send(line).is_err() {
                return Err(BridgeError::Write("command stream closed".to_string()));
            }
            pending.push_back(PendingCommand { id, reply: tx });
        }
        log::debug!("[{}] > {}", self.name, command);

        match tokio::time::timeout(self.config.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::Destroyed),
            Err(_) => {
                self.pending.lock().retain(|pending| pending.id != id);
                if !self.degraded.swap(true, Ordering::SeqCst) {
                    log::warn!(
                        "Command '{}' on '{}' timed out; retiring the session",
                        command,
                        self.name
                    );
                    // A late reply would resolve the wrong command. Clients
                    // are told the session ended and reattach to a fresh one.
                    self.notify_exit(Some("tmux stopped answering commands"));
                    self.destroy();
                }
                Err(BridgeError::Timeout(self.config.command_timeout.as_millis() as u64))
            }
        }
    }

    /// Write raw input to a pane, 4 KiB per `send-keys -H`. Chunk failures are
    /// logged and skipped; the pane may have just closed.
    pub async fn send_input(&self, pane_id: &str, data: &[u8]) -> BridgeResult<()> {
        let pane_id = pane_target(pane_id)?;
        if self.is_destroyed() {
            return Err(BridgeError::Destroyed);
        }
        for chunk in codec::encode_chunks(data, self.config.input_chunk_bytes) {
            let command = format!("send-keys -t {} -H {}", pane_id, chunk);
            if let Err(e) = self.send_command(&command).await {
                log::debug!("Input chunk to {} dropped: {}", pane_id, e);
            }
        }
        Ok(())
    }

    /// Split a pane, returning the new pane's id.
    pub async fn split_pane(&self, pane_id: &str, direction: SplitDirection) -> BridgeResult<String> {
        let flag = match direction {
            SplitDirection::Horizontal => "-h",
            SplitDirection::Vertical => "-v",
        };
        let pane_id = pane_target(pane_id)?;
        let reply = self
            .send_command(&format!("split-window {} -t {} -P -F '#{{pane_id}}'", flag, pane_id))
            .await?;
        Ok(reply.trim().to_string())
    }

    pub async fn close_pane(&self, pane_id: &str) -> BridgeResult<()> {
        let pane_id = pane_target(pane_id)?;
        self.send_command(&format!("kill-pane -t {}", pane_id)).await.map(drop)
    }

    pub async fn resize_pane(&self, pane_id: &str, cols: u16, rows: u16) -> BridgeResult<()> {
        let pane_id = pane_target(pane_id)?;
        self.send_command(&format!("resize-pane -t {} -x {} -y {}", pane_id, cols, rows))
            .await
            .map(drop)
    }

    /// Grow or shrink a pane by `amount` cells towards `edge`.
    pub async fn adjust_pane(&self, pane_id: &str, edge: PaneEdge, amount: u16) -> BridgeResult<()> {
        let pane_id = pane_target(pane_id)?;
        self.send_command(&format!("resize-pane -t {} {} {}", pane_id, edge.flag(), amount))
            .await
            .map(drop)
    }

    /// Spread the panes of a window evenly. Defaults to the current window.
    ///
    /// `select-layout -E` only evens a pane and its neighbours, so it is
    /// applied to each pane of the window in turn.
    pub async fn equalize_panes(&self, window: Option<&str>) -> BridgeResult<()> {
        let target = match window {
            Some(window) => window_target(window)?.to_string(),
            None => quote_arg(&self.name),
        };
        let reply = self
            .send_command(&format!("list-panes -t {} -F '#{{pane_id}}'", target))
            .await?;
        for pane_id in reply.lines().map(str::trim).filter(|line| is_pane_id(line)) {
            self.send_command(&format!("select-layout -E -t {}", pane_id)).await?;
        }
        Ok(())
    }

    pub async fn select_pane(&self, pane_id: &str) -> BridgeResult<()> {
        let pane_id = pane_target(pane_id)?;
        self.send_command(&format!("select-pane -t {}", pane_id)).await.map(drop)
    }

    /// Toggle zoom on `pane_id`. Another zoomed pane is unzoomed first; if
    /// `pane_id` is the zoomed one, it is only unzoomed.
    pub async fn toggle_zoom(&self, pane_id: &str) -> BridgeResult<()> {
        let pane_id = pane_target(pane_id)?;
        let reply = self
            .send_command(&format!(
                "list-panes -t {} -F '#{{pane_id}} #{{pane_active}} #{{window_zoomed_flag}}'",
                pane_id
            ))
            .await?;

        let mut zoomed = false;
        let mut active = None;
        for line in reply.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if let [id, is_active, is_zoomed] = fields.as_slice() {
                zoomed |= *is_zoomed == "1";
                if *is_active == "1" {
                    active = Some(id.to_string());
                }
            }
        }

        if zoomed {
            if let Some(current) = active.as_deref().filter(|current| *current != pane_id) {
                self.send_command(&format!("resize-pane -Z -t {}", current)).await?;
            } else {
                return self.send_command(&format!("resize-pane -Z -t {}", pane_id)).await.map(drop);
            }
        }
        self.send_command(&format!("resize-pane -Z -t {}", pane_id)).await.map(drop)
    }

    /// Scroll a pane's history. Positive `lines` scroll back (entering copy
    /// mode), negative scroll forward.
    pub async fn scroll_pane(&self, pane_id: &str, lines: i32) -> BridgeResult<()> {
        let pane_id = pane_target(pane_id)?;
        if lines > 0 {
            self.send_command(&format!("copy-mode -t {}", pane_id)).await?;
            self.send_command(&format!("send-keys -t {} -X -N {} scroll-up", pane_id, lines))
                .await
                .map(drop)
        } else if lines < 0 {
            let command = format!("send-keys -t {} -X -N {} scroll-down", pane_id, lines.unsigned_abs());
            match self.send_command(&command).await {
                Err(BridgeError::CommandFailed(msg)) if msg.contains("not in a mode") => Ok(()),
                other => other.map(drop),
            }
        } else {
            Ok(())
        }
    }

    /// Full history plus visible screen of a pane, with escape sequences.
    pub async fn capture_pane(&self, pane_id: &str) -> BridgeResult<String> {
        let pane_id = pane_target(pane_id)?;
        self.send_command(&format!("capture-pane -p -e -S - -t {}", pane_id)).await
    }

    /// Panes of the current window with their geometry.
    pub async fn list_panes(&self) -> BridgeResult<Vec<PaneInfo>> {
        let reply = self
            .send_command(&format!(
                "list-panes -t {} -F '#{{pane_id}} #{{pane_width}} #{{pane_height}} #{{pane_left}} #{{pane_top}} #{{pane_active}}'",
                quote_arg(&self.name)
            ))
            .await?;
        Ok(reply.lines().filter_map(parse_pane_line).collect())
    }

    /// Query, store and return the current window's layout. The multiplexer
    /// does not resend it to a reattaching client.
    pub async fn current_window_layout(&self) -> BridgeResult<LayoutUpdate> {
        let reply = self
            .send_command(&format!(
                "display-message -p -t {} '#{{window_id}} #{{window_layout}}'",
                quote_arg(&self.name)
            ))
            .await?;
        let (window_id, layout) = reply
            .trim()
            .split_once(' ')
            .ok_or_else(|| BridgeError::InvalidLayout(reply.clone()))?;
        let parsed = parse_layout(layout)?;
        let update = LayoutUpdate {
            window_id: window_id.to_string(),
            render: to_render_layout(&parsed),
            layout: parsed,
        };
        *self.layout.lock() = Some(update.clone());
        Ok(update)
    }

    pub fn current_layout(&self) -> Option<LayoutUpdate> {
        self.layout.lock().clone()
    }

    // ── Client terminal size ───────────────────────────────────────

    /// Debounced size update; bursts collapse into the last size and a size
    /// equal to the applied one is skipped.
    pub fn set_client_size(self: &Arc<Self>, size: TerminalSize) {
        let mut resize = self.resize.lock();
        if let Some(timer) = resize.debounce.take() {
            timer.abort();
        }
        if resize.last_applied == Some(size) {
            return;
        }

        let session = Arc::downgrade(self);
        let delay = self.config.resize_debounce;
        resize.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(session) = session.upgrade() {
                if let Err(e) = session.apply_size(size).await {
                    log::debug!("Deferred resize of '{}' failed: {}", session.name, e);
                }
            }
        }));
    }

    /// Apply a size immediately, cancelling any deferred update.
    pub async fn apply_client_size_now(&self, size: TerminalSize) -> BridgeResult<()> {
        if let Some(timer) = self.resize.lock().debounce.take() {
            timer.abort();
        }
        self.apply_size(size).await
    }

    async fn apply_size(&self, size: TerminalSize) -> BridgeResult<()> {
        self.send_command(&format!("refresh-client -C {}x{}", size.cols, size.rows))
            .await?;
        self.resize.lock().last_applied = Some(size);
        Ok(())
    }

    pub fn last_applied_size(&self) -> Option<TerminalSize> {
        self.resize.lock().last_applied
    }

    // ── Listeners ──────────────────────────────────────────────────

    pub fn on_pane_output(
        &self,
        pane_id: &str,
        callback: impl Fn(&str, &[u8]) + Send + Sync + 'static,
    ) -> ListenerToken {
        self.listeners.lock().add_pane_output(pane_id, Arc::new(callback))
    }

    pub fn on_output(&self, callback: impl Fn(&str, &[u8]) + Send + Sync + 'static) -> ListenerToken {
        self.listeners.lock().add_output(Arc::new(callback))
    }

    pub fn on_layout_change(
        &self,
        callback: impl Fn(&LayoutUpdate) + Send + Sync + 'static,
    ) -> ListenerToken {
        self.listeners.lock().add_layout(Arc::new(callback))
    }

    pub fn on_exit(&self, callback: impl Fn(Option<&str>) + Send + Sync + 'static) -> ListenerToken {
        self.listeners.lock().add_exit(Arc::new(callback))
    }

    pub fn on_session_changed(
        &self,
        callback: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> ListenerToken {
        self.listeners.lock().add_session(Arc::new(callback))
    }

    pub fn unsubscribe(&self, token: ListenerToken) -> bool {
        self.listeners.lock().remove(token)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    // ── Client lifecycle ───────────────────────────────────────────

    /// Register a client, cancelling any pending destruction.
    pub fn add_client(&self, client_id: Uuid) -> BridgeResult<usize> {
        let mut clients = self.clients.lock();
        if self.is_destroyed() {
            return Err(BridgeError::Destroyed);
        }
        clients.count += 1;
        clients.devices.entry(client_id).or_default();
        if let Some(timer) = clients.grace_timer.take() {
            timer.abort();
            log::debug!("Client reattached to '{}', destruction cancelled", self.name);
        }
        Ok(clients.count)
    }

    /// Unregister a client. The last one out starts the grace timer.
    pub fn remove_client(self: &Arc<Self>, client_id: Uuid) -> usize {
        let mut clients = self.clients.lock();
        clients.devices.remove(&client_id);
        clients.count = clients.count.saturating_sub(1);
        if clients.count > 0 || self.is_destroyed() {
            return clients.count;
        }

        if let Some(timer) = clients.grace_timer.take() {
            timer.abort();
        }
        let session = Arc::downgrade(self);
        let grace = self.config.grace_period;
        log::debug!("Last client left '{}', destroying in {:?}", self.name, grace);
        clients.grace_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(session) = session.upgrade() {
                session.teardown(true);
            }
        }));
        0
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().count
    }

    /// Record the device class a client declared.
    pub fn set_device_type(&self, client_id: Uuid, device: DeviceType) {
        self.clients.lock().devices.insert(client_id, device);
    }

    pub fn device_types(&self) -> HashMap<Uuid, DeviceType> {
        self.clients.lock().devices.clone()
    }

    // ── Teardown ───────────────────────────────────────────────────

    /// Tear the session down. Idempotent.
    pub fn destroy(&self) {
        self.teardown(false);
    }

    fn teardown(&self, only_if_idle: bool) {
        let grace_timer = {
            let mut clients = self.clients.lock();
            if only_if_idle && clients.count > 0 {
                return;
            }
            if self.state.send_replace(SessionState::Destroyed) == SessionState::Destroyed {
                return;
            }
            clients.devices.clear();
            clients.grace_timer.take()
        };
        log::info!("Destroying control session '{}'", self.name);

        if let Some(timer) = grace_timer {
            timer.abort();
        }
        if let Some(timer) = self.resize.lock().debounce.take() {
            timer.abort();
        }
        self.cancel.cancel();

        let pending: Vec<PendingCommand> = self.pending.lock().drain(..).collect();
        for command in pending {
            let _ = command.reply.send(Err(BridgeError::Destroyed));
        }

        if let Some(mut child) = self.child.lock().take() {
            spawner::terminate(&mut child);
        }

        self.listeners.lock().clear();

        if let Some(map) = self.registry.as_ref().and_then(Weak::upgrade) {
            let mut sessions = map.lock();
            let is_current = sessions
                .get(&self.name)
                .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), self));
            if is_current {
                sessions.remove(&self.name);
            }
        }
    }
}

fn is_pane_id(id: &str) -> bool {
    id.strip_prefix('%')
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Pane ids come from clients and go verbatim into command lines.
fn pane_target(pane_id: &str) -> BridgeResult<&str> {
    if is_pane_id(pane_id) {
        Ok(pane_id)
    } else {
        Err(BridgeError::InvalidTarget(pane_id.to_string()))
    }
}

fn window_target(window_id: &str) -> BridgeResult<&str> {
    match window_id.strip_prefix('@') {
        Some(n) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => Ok(window_id),
        _ => Err(BridgeError::InvalidTarget(window_id.to_string())),
    }
}

/// `%1 80 24 0 0 1` -> PaneInfo
fn parse_pane_line(line: &str) -> Option<PaneInfo> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [pane_id, width, height, left, top, active] = fields.as_slice() else {
        log::debug!("Skipping malformed list-panes line: {}", line);
        return None;
    };
    Some(PaneInfo {
        pane_id: pane_id.to_string(),
        width: width.parse().ok()?,
        height: height.parse().ok()?,
        left: left.parse().ok()?,
        top: top.parse().ok()?,
        active: *active == "1",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pane_line() {
        assert_eq!(
            parse_pane_line("%3 80 24 0 0 1"),
            Some(PaneInfo {
                pane_id: "%3".to_string(),
                width: 80,
                height: 24,
                left: 0,
                top: 0,
                active: true,
            })
        );
        assert_eq!(parse_pane_line("%3 80 24"), None);
        assert_eq!(parse_pane_line("%3 wide 24 0 0 0"), None);
    }

    #[test]
    fn test_targets() {
        assert_eq!(pane_target("%12").ok(), Some("%12"));
        for bad in ["", "%", "12", "%1;kill-server", "%0\nlist-sessions", "%1 ", "{last}"] {
            assert!(matches!(pane_target(bad), Err(BridgeError::InvalidTarget(_))), "{:?}", bad);
        }
        assert_eq!(window_target("@3").ok(), Some("@3"));
        assert!(window_target("@3\n").is_err());
        assert!(window_target("%3").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = ControlConfig::default();
        assert_eq!(config.command_timeout, Duration::from_secs(10));
        assert_eq!(config.grace_period, Duration::from_secs(30));
        assert_eq!(config.resize_debounce, Duration::from_millis(100));
        assert_eq!(config.input_chunk_bytes, 4096);
    }
}
