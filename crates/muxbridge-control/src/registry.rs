//! Session registry
//!
//! At most one live control session per multiplexer session name. Lookup and
//! creation happen under one lock so concurrent first connections share the
//! same subprocess. Destroyed and degraded sessions count as absent.

use std::collections::HashMap;
use std::sync::Arc;

use muxbridge_types::SessionSummary;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};
use crate::session::{ControlConfig, ControlSession};
use crate::spawner::ControlSpawner;

pub(crate) type SessionMap = Mutex<HashMap<String, Arc<ControlSession>>>;

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<SessionMap>,
    spawner: Arc<dyn ControlSpawner>,
    config: ControlConfig,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

impl SessionRegistry {
    pub fn new(spawner: Arc<dyn ControlSpawner>, config: ControlConfig) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            spawner,
            config,
        }
    }

    /// Return the live session for `name`, spawning one if needed.
    pub fn get_or_create(&self, name: &str) -> BridgeResult<Arc<ControlSession>> {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(name) {
            if is_usable(existing) {
                return Ok(existing.clone());
            }
        }

        let process = self.spawner.spawn(name)?;
        let session = ControlSession::start_with_registry(
            name,
            process,
            self.config.clone(),
            Some(Arc::downgrade(&self.sessions)),
        );
        sessions.insert(name.to_string(), session.clone());
        log::debug!("Registered control session '{}' ({} live)", name, sessions.len());
        Ok(session)
    }

    /// Get or create a session and register `client_id` on it.
    ///
    /// A session torn down between lookup and registration is replaced once.
    pub fn attach(&self, name: &str, client_id: Uuid) -> BridgeResult<Arc<ControlSession>> {
        for _ in 0..2 {
            let session = self.get_or_create(name)?;
            match session.add_client(client_id) {
                Ok(count) => {
                    log::info!("Client {} attached to '{}' ({} clients)", client_id, name, count);
                    return Ok(session);
                }
                Err(BridgeError::Destroyed) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(BridgeError::Destroyed)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ControlSession>> {
        self.sessions
            .lock()
            .get(name)
            .filter(|session| is_usable(session))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.sessions.lock().values().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Destroy every session.
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<ControlSession>> =
            self.sessions.lock().drain().map(|(_, session)| session).collect();
        if !sessions.is_empty() {
            log::info!("Shutting down {} control session(s)", sessions.len());
        }
        for session in sessions {
            session.destroy();
        }
    }
}

fn is_usable(session: &ControlSession) -> bool {
    !session.is_destroyed() && !session.is_degraded()
}
