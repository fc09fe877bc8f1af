//! Plain PTY bridge
//!
//! One `tmux attach-session` per session name, running in a pseudo-terminal.
//! A blocking reader thread fans raw output out to every connection attached
//! to that session. The last connection to leave starts a grace timer before
//! the attach process is killed.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};
use crate::tmux::TmuxCli;

pub type PtyOutput = mpsc::UnboundedSender<Vec<u8>>;

type ClientMap = Arc<Mutex<HashMap<Uuid, PtyOutput>>>;
type EntryMap = Mutex<HashMap<String, PtyEntry>>;

struct PtyEntry {
    generation: u64,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn portable_pty::Child + Send + Sync>,
    clients: ClientMap,
    grace_timer: Option<JoinHandle<()>>,
}

impl PtyEntry {
    /// Close every connection and kill the attach process. Must be called
    /// after the entry has left the map; the kill and reap run on the
    /// blocking pool when a runtime is available.
    fn retire(mut self, session: &str) {
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
        self.clients.lock().clear();

        let mut child = self.child;
        let session = session.to_string();
        let mut reap = move || {
            if let Err(e) = child.kill() {
                log::debug!("PTY child for '{}' already gone: {}", session, e);
            }
            match child.wait() {
                Ok(status) => log::debug!("PTY child for '{}' exited: {:?}", session, status),
                Err(e) => log::debug!("Failed to reap PTY child for '{}': {}", session, e),
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => drop(handle.spawn_blocking(reap)),
            // Reader thread
            Err(_) => reap(),
        }
    }
}

/// Shared pseudo-terminal attaches, keyed by session name.
#[derive(Clone)]
pub struct PtyBridge {
    entries: Arc<EntryMap>,
    tmux: TmuxCli,
    grace_period: Duration,
    next_generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for PtyBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyBridge")
            .field("sessions", &self.entries.lock().len())
            .field("grace_period", &self.grace_period)
            .finish()
    }
}

impl PtyBridge {
    pub fn new(tmux: TmuxCli, grace_period: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            tmux,
            grace_period,
            next_generation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Attach a connection to `session`. Returns `true` when an existing
    /// pseudo-terminal was reused, in which case the caller owes the client a
    /// scrollback replay.
    pub fn attach(
        &self,
        session: &str,
        client_id: Uuid,
        output: PtyOutput,
        cols: u16,
        rows: u16,
    ) -> BridgeResult<bool> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(session) {
            if let Some(timer) = entry.grace_timer.take() {
                timer.abort();
                log::debug!("PTY for '{}' reclaimed within grace period", session);
            }
            entry.clients.lock().insert(client_id, output);
            return Ok(true);
        }

        let entry = self.spawn_entry(session, cols, rows)?;
        entry.clients.lock().insert(client_id, output);
        entries.insert(session.to_string(), entry);
        Ok(false)
    }

    fn spawn_entry(&self, session: &str, cols: u16, rows: u16) -> BridgeResult<PtyEntry> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| BridgeError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(self.tmux.binary());
        cmd.args(["attach-session", "-t", session]);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| BridgeError::Spawn(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| BridgeError::Pty(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| BridgeError::Pty(e.to_string()))?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let clients: ClientMap = Arc::new(Mutex::new(HashMap::new()));
        self.start_reader(session.to_string(), generation, reader, clients.clone());

        log::info!("Spawned PTY attach for '{}' ({}x{})", session, cols, rows);
        Ok(PtyEntry {
            generation,
            master: pair.master,
            writer,
            child,
            clients,
            grace_timer: None,
        })
    }

    fn start_reader(
        &self,
        session: String,
        generation: u64,
        mut reader: Box<dyn Read + Send>,
        clients: ClientMap,
    ) {
        let entries = Arc::downgrade(&self.entries);
        std::thread::spawn(move || {
            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        log::info!("PTY attach for '{}' exited", session);
                        break;
                    }
                    Ok(n) => {
                        let chunk = &buffer[..n];
                        clients
                            .lock()
                            .retain(|_, output| output.send(chunk.to_vec()).is_ok());
                    }
                    Err(e) => {
                        log::debug!("PTY read for '{}' ended: {}", session, e);
                        break;
                    }
                }
            }
            // Dropping the senders closes every attached connection.
            clients.lock().clear();
            remove_generation(&entries, &session, generation);
        });
    }

    /// Write raw bytes to the session's pseudo-terminal.
    pub fn write(&self, session: &str, data: &[u8]) -> BridgeResult<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(session)
            .ok_or_else(|| BridgeError::SessionNotFound(session.to_string()))?;
        entry
            .writer
            .write_all(data)
            .and_then(|_| entry.writer.flush())
            .map_err(|e| BridgeError::Write(e.to_string()))
    }

    pub fn resize(&self, session: &str, cols: u16, rows: u16) -> BridgeResult<()> {
        let entries = self.entries.lock();
        let entry = entries
            .get(session)
            .ok_or_else(|| BridgeError::SessionNotFound(session.to_string()))?;
        entry
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| BridgeError::Pty(e.to_string()))?;
        log::debug!("Resized PTY for '{}' to {}x{}", session, cols, rows);
        Ok(())
    }

    /// Ask the multiplexer to redraw the client attached through this PTY.
    /// The attach process is the tmux client, so its pid identifies the
    /// client's tty.
    pub async fn refresh(&self, session: &str) -> BridgeResult<()> {
        let pid = {
            let entries = self.entries.lock();
            let entry = entries
                .get(session)
                .ok_or_else(|| BridgeError::SessionNotFound(session.to_string()))?;
            entry.child.process_id()
        };
        let pid = pid.ok_or_else(|| BridgeError::Pty("attach process has no pid".to_string()))?;
        let tty = self
            .tmux
            .client_tty(session, pid)
            .await?
            .ok_or_else(|| BridgeError::Pty(format!("no tmux client with pid {}", pid)))?;
        self.tmux.refresh_client(&tty).await
    }

    /// Detach a connection. The last one out schedules the kill.
    pub fn detach(&self, session: &str, client_id: Uuid) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(session) else {
            return;
        };
        let remaining = {
            let mut clients = entry.clients.lock();
            clients.remove(&client_id);
            clients.len()
        };
        if remaining > 0 {
            return;
        }

        if let Some(timer) = entry.grace_timer.take() {
            timer.abort();
        }
        let weak = Arc::downgrade(&self.entries);
        let name = session.to_string();
        let generation = entry.generation;
        let grace = self.grace_period;
        log::debug!("Last terminal client left '{}', killing PTY in {:?}", session, grace);
        entry.grace_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(entries) = weak.upgrade() else {
                return;
            };
            let idle = {
                let mut entries = entries.lock();
                let idle = entries
                    .get(&name)
                    .is_some_and(|e| e.generation == generation && e.clients.lock().is_empty());
                if idle {
                    entries.remove(&name)
                } else {
                    None
                }
            };
            if let Some(mut entry) = idle {
                // This task is the timer; don't abort it from inside.
                entry.grace_timer = None;
                entry.retire(&name);
                log::info!("Killed idle PTY for '{}'", name);
            }
        }));
    }

    pub fn is_attached(&self, session: &str) -> bool {
        self.entries.lock().contains_key(session)
    }

    pub fn client_count(&self, session: &str) -> usize {
        self.entries
            .lock()
            .get(session)
            .map_or(0, |entry| entry.clients.lock().len())
    }

    /// Kill every pseudo-terminal.
    pub fn shutdown(&self) {
        let drained: Vec<(String, PtyEntry)> = self.entries.lock().drain().collect();
        for (name, entry) in drained {
            log::debug!("Killing PTY for '{}'", name);
            entry.retire(&name);
        }
    }
}

/// Drop the entry for `session` only if it is still the given generation.
fn remove_generation(entries: &Weak<EntryMap>, session: &str, generation: u64) {
    let Some(entries) = entries.upgrade() else {
        return;
    };
    let removed = {
        let mut entries = entries.lock();
        if entries.get(session).is_some_and(|e| e.generation == generation) {
            entries.remove(session)
        } else {
            None
        }
    };
    if let Some(entry) = removed {
        entry.retire(session);
    }
}
