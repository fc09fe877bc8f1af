#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use muxbridge_control::{BridgeResult, ControlConfig, ControlProcess, ControlSpawner};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

/// In-memory stand-in for a `tmux -C` subprocess. Tests read the commands
/// the session writes and script the notification stream it reads.
pub struct FakeTmux {
    commands: Lines<BufReader<DuplexStream>>,
    output: DuplexStream,
    next_block: u64,
}

impl FakeTmux {
    /// Wire a fake subprocess to a fresh `ControlProcess`.
    pub fn pair() -> (ControlProcess, FakeTmux) {
        let (session_stdin, fake_commands) = tokio::io::duplex(64 * 1024);
        let (fake_output, session_stdout) = tokio::io::duplex(64 * 1024);
        let process = ControlProcess {
            stdout: Box::new(session_stdout),
            stdin: Box::new(session_stdin),
            child: None,
        };
        let fake = FakeTmux {
            commands: BufReader::new(fake_commands).lines(),
            output: fake_output,
            next_block: 100,
        };
        (process, fake)
    }

    pub async fn send(&mut self, raw: &[u8]) {
        self.output.write_all(raw).await.expect("fake output closed");
        self.output.flush().await.expect("fake output closed");
    }

    pub async fn send_line(&mut self, line: &str) {
        self.send(format!("{}\n", line).as_bytes()).await;
    }

    /// The unsolicited reply block tmux emits on attach.
    pub async fn handshake(&mut self) {
        self.send_line("%begin 1700000000 1 0").await;
        self.send_line("%end 1700000000 1 0").await;
    }

    /// Next command line written by the session.
    pub async fn next_command(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(2), self.commands.next_line())
            .await
            .expect("no command within 2s")
            .expect("command stream failed")
            .expect("command stream closed")
    }

    /// Next command, or `None` if nothing arrives within `wait`.
    pub async fn try_next_command(&mut self, wait: Duration) -> Option<String> {
        match tokio::time::timeout(wait, self.commands.next_line()).await {
            Ok(Ok(line)) => line,
            _ => None,
        }
    }

    pub async fn reply(&mut self, body: &[&str]) {
        self.block(body, "%end").await;
    }

    pub async fn reply_error(&mut self, body: &[&str]) {
        self.block(body, "%error").await;
    }

    async fn block(&mut self, body: &[&str], terminator: &str) {
        let number = self.next_block;
        self.next_block += 1;
        let mut text = format!("%begin 1700000000 {} 1\n", number);
        for line in body {
            text.push_str(line);
            text.push('\n');
        }
        text.push_str(&format!("{} 1700000000 {} 1\n", terminator, number));
        self.send(text.as_bytes()).await;
    }

    /// Answer the next command with an empty success block.
    pub async fn ack(&mut self) -> String {
        let command = self.next_command().await;
        self.reply(&[]).await;
        command
    }
}

/// Spawner handing out fake subprocesses and counting spawns.
#[derive(Default)]
pub struct FakeSpawner {
    spawned: AtomicUsize,
    fakes: Mutex<VecDeque<FakeTmux>>,
}

impl FakeSpawner {
    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn take_fake(&self) -> FakeTmux {
        self.fakes.lock().pop_front().expect("nothing was spawned")
    }
}

impl ControlSpawner for FakeSpawner {
    fn spawn(&self, _session_name: &str) -> BridgeResult<ControlProcess> {
        let (process, fake) = FakeTmux::pair();
        self.spawned.fetch_add(1, Ordering::SeqCst);
        self.fakes.lock().push_back(fake);
        Ok(process)
    }
}

/// Short timings and no setup commands.
pub fn test_config() -> ControlConfig {
    ControlConfig {
        command_timeout: Duration::from_millis(500),
        grace_period: Duration::from_millis(100),
        resize_debounce: Duration::from_millis(20),
        input_chunk_bytes: 4096,
        setup_commands: Vec::new(),
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
