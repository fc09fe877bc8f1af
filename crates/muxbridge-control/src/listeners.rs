//! Listener registry for control session events
//!
//! Subscriptions hand back a [`ListenerToken`]; passing it to
//! [`Listeners::remove`] drops the callback.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use muxbridge_types::{LayoutNode, RenderLayoutNode};

/// Called with the pane id and the decoded output bytes.
pub type OutputCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;
pub type LayoutCallback = Arc<dyn Fn(&LayoutUpdate) + Send + Sync>;
/// Called with the exit reason, if the multiplexer gave one.
pub type ExitCallback = Arc<dyn Fn(Option<&str>) + Send + Sync>;
/// Called with the session id (`$N`) and session name.
pub type SessionCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerToken(u64);

/// A layout-change notification, parsed and projected.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutUpdate {
    pub window_id: String,
    pub layout: LayoutNode,
    pub render: RenderLayoutNode,
}

#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    pane_output: HashMap<String, BTreeMap<u64, OutputCallback>>,
    output: BTreeMap<u64, OutputCallback>,
    layout: BTreeMap<u64, LayoutCallback>,
    exit: BTreeMap<u64, ExitCallback>,
    session: BTreeMap<u64, SessionCallback>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("pane_output", &self.pane_output.values().map(BTreeMap::len).sum::<usize>())
            .field("output", &self.output.len())
            .field("layout", &self.layout.len())
            .field("exit", &self.exit.len())
            .field("session", &self.session.len())
            .finish()
    }
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_token(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn add_pane_output(&mut self, pane_id: &str, callback: OutputCallback) -> ListenerToken {
        let id = self.next_token();
        self.pane_output.entry(pane_id.to_string()).or_default().insert(id, callback);
        ListenerToken(id)
    }

    pub fn add_output(&mut self, callback: OutputCallback) -> ListenerToken {
        let id = self.next_token();
        self.output.insert(id, callback);
        ListenerToken(id)
    }

    pub fn add_layout(&mut self, callback: LayoutCallback) -> ListenerToken {
        let id = self.next_token();
        self.layout.insert(id, callback);
        ListenerToken(id)
    }

    pub fn add_exit(&mut self, callback: ExitCallback) -> ListenerToken {
        let id = self.next_token();
        self.exit.insert(id, callback);
        ListenerToken(id)
    }

    pub fn add_session(&mut self, callback: SessionCallback) -> ListenerToken {
        let id = self.next_token();
        self.session.insert(id, callback);
        ListenerToken(id)
    }

    /// Drop a subscription. Returns false if the token was already removed.
    pub fn remove(&mut self, token: ListenerToken) -> bool {
        let id = token.0;
        if self.output.remove(&id).is_some()
            || self.layout.remove(&id).is_some()
            || self.exit.remove(&id).is_some()
            || self.session.remove(&id).is_some()
        {
            return true;
        }
        let mut removed = false;
        self.pane_output.retain(|_, listeners| {
            removed |= listeners.remove(&id).is_some();
            !listeners.is_empty()
        });
        removed
    }

    pub fn clear(&mut self) {
        self.pane_output.clear();
        self.output.clear();
        self.layout.clear();
        self.exit.clear();
        self.session.clear();
    }

    pub fn len(&self) -> usize {
        self.pane_output.values().map(BTreeMap::len).sum::<usize>()
            + self.output.len()
            + self.layout.len()
            + self.exit.len()
            + self.session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pane-specific listeners first, then global ones, each in subscription order.
    pub fn output_targets(&self, pane_id: &str) -> Vec<OutputCallback> {
        self.pane_output
            .get(pane_id)
            .into_iter()
            .flat_map(|listeners| listeners.values())
            .chain(self.output.values())
            .cloned()
            .collect()
    }

    pub fn layout_targets(&self) -> Vec<LayoutCallback> {
        self.layout.values().cloned().collect()
    }

    pub fn exit_targets(&self) -> Vec<ExitCallback> {
        self.exit.values().cloned().collect()
    }

    pub fn session_targets(&self) -> Vec<SessionCallback> {
        self.session.values().cloned().collect()
    }
}
