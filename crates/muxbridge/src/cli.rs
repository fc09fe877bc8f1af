use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// CLI arguments for muxbridge
#[derive(Parser, Debug, Default)]
#[command(name = "muxbridge")]
#[command(about = "Attach browsers to tmux sessions over WebSockets")]
#[command(version)]
pub struct Cli {
    /// Address to listen on (default: 127.0.0.1:7681)
    #[arg(long, short, value_name = "ADDR", env = "MUXBRIDGE_BIND")]
    pub bind: Option<SocketAddr>,

    /// TOML configuration file
    #[arg(long, short, value_name = "PATH", env = "MUXBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// tmux binary to run
    #[arg(long, value_name = "PATH", env = "MUXBRIDGE_TMUX")]
    pub tmux: Option<String>,

    /// Directory served under /static
    #[arg(long, value_name = "DIR", env = "MUXBRIDGE_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// How long a control command may wait for its reply
    #[arg(long, value_name = "MS", env = "MUXBRIDGE_COMMAND_TIMEOUT_MS")]
    pub command_timeout_ms: Option<u64>,

    /// How long an unattached control session survives
    #[arg(long, value_name = "MS", env = "MUXBRIDGE_SESSION_GRACE_MS")]
    pub session_grace_ms: Option<u64>,

    /// Window over which client resizes are coalesced
    #[arg(long, value_name = "MS", env = "MUXBRIDGE_RESIZE_DEBOUNCE_MS")]
    pub resize_debounce_ms: Option<u64>,

    /// How long an unattached plain terminal survives
    #[arg(long, value_name = "MS", env = "MUXBRIDGE_PTY_GRACE_MS")]
    pub pty_grace_ms: Option<u64>,

    /// Lines of history replayed to a reconnecting plain terminal
    #[arg(long, value_name = "LINES", env = "MUXBRIDGE_PTY_SCROLLBACK_LINES")]
    pub pty_scrollback_lines: Option<usize>,

    /// Log level (error, warn, info, debug, trace). RUST_LOG takes precedence.
    #[arg(long, value_name = "LEVEL", env = "MUXBRIDGE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Debug logging for muxbridge itself
    #[arg(short, long)]
    pub verbose: bool,
}
