//! One-shot tmux invocations outside control mode

use tokio::process::Command;

use crate::codec;
use crate::error::{BridgeError, BridgeResult};

/// Runs individual tmux commands and collects their stdout.
#[derive(Debug, Clone)]
pub struct TmuxCli {
    binary: String,
}

impl Default for TmuxCli {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl TmuxCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Run a tmux command and return stdout
    pub async fn run(&self, args: &[&str]) -> BridgeResult<Vec<u8>> {
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BridgeError::Spawn(format!("{}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BridgeError::CommandFailed(format!(
                "tmux {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }

    /// `tmux -V`, used as an availability probe at startup
    pub async fn version(&self) -> BridgeResult<String> {
        let out = self.run(&["-V"]).await?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    /// Check if a tmux session exists
    pub async fn has_session(&self, name: &str) -> bool {
        let target = format!("={}", name);
        self.run(&["has-session", "-t", &target]).await.is_ok()
    }

    /// Whether the session's active pane is in copy or view mode
    pub async fn in_copy_mode(&self, name: &str) -> BridgeResult<bool> {
        let out = self
            .run(&["display-message", "-p", "-t", name, "#{pane_in_mode}"])
            .await?;
        Ok(String::from_utf8_lossy(&out).trim() == "1")
    }

    /// Last `lines` lines of history plus the visible screen, with colors,
    /// ready to write to a terminal
    pub async fn capture_scrollback(&self, name: &str, lines: usize) -> BridgeResult<Vec<u8>> {
        let start = format!("-{}", lines);
        let out = self
            .run(&["capture-pane", "-p", "-e", "-t", name, "-S", &start])
            .await?;
        let text = String::from_utf8_lossy(&out);
        Ok(codec::to_terminal_lines(text.trim_end_matches('\n')))
    }

    /// Tty of the session's client whose process id is `pid`
    pub async fn client_tty(&self, name: &str, pid: u32) -> BridgeResult<Option<String>> {
        let out = self
            .run(&["list-clients", "-t", name, "-F", "#{client_pid} #{client_tty}"])
            .await?;
        Ok(parse_client_tty(&String::from_utf8_lossy(&out), pid))
    }

    /// Force a redraw of the client attached on `tty`
    pub async fn refresh_client(&self, tty: &str) -> BridgeResult<()> {
        self.run(&["refresh-client", "-t", tty]).await.map(drop)
    }
}

fn parse_client_tty(listing: &str, pid: u32) -> Option<String> {
    listing.lines().find_map(|line| {
        let (client_pid, tty) = line.trim().split_once(' ')?;
        (client_pid.parse::<u32>().ok()? == pid).then(|| tty.to_string())
    })
}

/// Quote a string as a single tmux command argument.
///
/// Single quotes stop tmux from expanding `$VARS` and `#{formats}`.
pub fn quote_arg(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_arg() {
        assert_eq!(quote_arg("main"), "'main'");
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
        assert_eq!(quote_arg("#{pane_id} $HOME"), "'#{pane_id} $HOME'");
    }

    #[test]
    fn test_parse_client_tty() {
        let listing = "4100 /dev/pts/3\n4242 /dev/pts/7\n";
        assert_eq!(parse_client_tty(listing, 4242), Some("/dev/pts/7".to_string()));
        assert_eq!(parse_client_tty(listing, 1), None);
        assert_eq!(parse_client_tty("garbage\n", 1), None);
    }
}
