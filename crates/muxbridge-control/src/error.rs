//! Error types for the control bridge.

use thiserror::Error;

/// Errors raised by control sessions, the session registry and the PTY bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The multiplexer subprocess could not be started
    #[error("failed to spawn multiplexer: {0}")]
    Spawn(String),

    /// Writing to the subprocess command stream failed
    #[error("failed to write command: {0}")]
    Write(String),

    /// The reply block for a command ended with `%error`
    #[error("{0}")]
    CommandFailed(String),

    /// No reply arrived within the command timeout
    #[error("command timed out after {0}ms")]
    Timeout(u64),

    /// The session was torn down before or while the command was pending
    #[error("control session destroyed")]
    Destroyed,

    /// A previous timeout left reply correlation untrustworthy
    #[error("control session degraded after a command timeout")]
    Degraded,

    /// The requested multiplexer session does not exist
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A pane or window id that is not `%N` / `@N`
    #[error("invalid target: {0:?}")]
    InvalidTarget(String),

    /// A command line containing a line break
    #[error("command contains a line break: {0:?}")]
    InvalidCommand(String),

    /// A layout string could not be parsed
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// Pseudo-terminal failure
    #[error("pty error: {0}")]
    Pty(String),

    /// Base64 payload could not be decoded
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
