// Multiplexer control bridge
//
// Speaks tmux's control-mode protocol over a subprocess, rebuilds pane output
// byte-exactly, parses window layouts and fans everything out to any number
// of attached clients. A plain pseudo-terminal attach is provided for clients
// that only want a single terminal.

pub mod codec;
pub mod error;
pub mod layout;
pub mod listeners;
pub mod protocol;
mod pty_bridge;
mod registry;
mod session;
pub mod spawner;
pub mod tmux;

// Re-export public API
pub use error::{BridgeError, BridgeResult};
pub use listeners::{LayoutUpdate, ListenerToken};
pub use pty_bridge::{PtyBridge, PtyOutput};
pub use registry::SessionRegistry;
pub use session::{ControlConfig, ControlSession};
pub use spawner::{ControlProcess, ControlSpawner, TmuxSpawner};
pub use tmux::TmuxCli;

// Constants
pub const DEFAULT_PTY_SCROLLBACK_LINES: usize = 1000;
pub const PTY_GRACE_SECS: u64 = 30;
