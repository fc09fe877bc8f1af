//! Application configuration
//!
//! Built-in defaults, overridden by an optional TOML file, overridden by CLI
//! flags (which clap already backs with `MUXBRIDGE_*` environment variables).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use muxbridge_control::{codec, ControlConfig, DEFAULT_PTY_SCROLLBACK_LINES};

use crate::cli::Cli;

pub const DEFAULT_BIND: &str = "127.0.0.1:7681";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub tmux_binary: String,
    pub command_timeout_ms: u64,
    pub session_grace_ms: u64,
    pub resize_debounce_ms: u64,
    pub input_chunk_bytes: usize,
    pub pty_grace_ms: u64,
    pub pty_scrollback_lines: usize,
    /// Run on every new control session; `{session}` is the quoted session name.
    pub setup_commands: Vec<String>,
    pub static_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let control = ControlConfig::default();
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 7681)),
            tmux_binary: "tmux".to_string(),
            command_timeout_ms: control.command_timeout.as_millis() as u64,
            session_grace_ms: control.grace_period.as_millis() as u64,
            resize_debounce_ms: control.resize_debounce.as_millis() as u64,
            input_chunk_bytes: codec::INPUT_CHUNK_BYTES,
            pty_grace_ms: muxbridge_control::PTY_GRACE_SECS * 1000,
            pty_scrollback_lines: DEFAULT_PTY_SCROLLBACK_LINES,
            setup_commands: control.setup_commands,
            static_dir: None,
            log_level: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Defaults, then the config file (if any), then CLI flags.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(bind) = cli.bind {
            self.bind = bind;
        }
        if let Some(tmux) = &cli.tmux {
            self.tmux_binary = tmux.clone();
        }
        if let Some(dir) = &cli.static_dir {
            self.static_dir = Some(dir.clone());
        }
        if let Some(ms) = cli.command_timeout_ms {
            self.command_timeout_ms = ms;
        }
        if let Some(ms) = cli.session_grace_ms {
            self.session_grace_ms = ms;
        }
        if let Some(ms) = cli.resize_debounce_ms {
            self.resize_debounce_ms = ms;
        }
        if let Some(ms) = cli.pty_grace_ms {
            self.pty_grace_ms = ms;
        }
        if let Some(lines) = cli.pty_scrollback_lines {
            self.pty_scrollback_lines = lines;
        }
        if let Some(level) = &cli.log_level {
            self.log_level = Some(level.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_ms == 0 {
            bail!("command_timeout_ms must be greater than zero");
        }
        if self.input_chunk_bytes == 0 {
            bail!("input_chunk_bytes must be greater than zero");
        }
        if self.tmux_binary.trim().is_empty() {
            bail!("tmux_binary must not be empty");
        }
        Ok(())
    }

    pub fn control_config(&self) -> ControlConfig {
        ControlConfig {
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            grace_period: Duration::from_millis(self.session_grace_ms),
            resize_debounce: Duration::from_millis(self.resize_debounce_ms),
            input_chunk_bytes: self.input_chunk_bytes,
            setup_commands: self.setup_commands.clone(),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn pty_grace(&self) -> Duration {
        Duration::from_millis(self.pty_grace_ms)
    }
}
