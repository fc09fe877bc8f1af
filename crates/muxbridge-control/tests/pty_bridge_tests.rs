#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use common::wait_until;
use muxbridge_control::{PtyBridge, TmuxCli};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Stand-in for the tmux binary. `attach-session` becomes `cat`, or reads a
/// single line and exits for a session named `once`; the client pid and
/// refreshed tty are recorded next to the script.
const SCRIPT: &str = r#"#!/bin/sh
dir=$(dirname "$0")
case "$1" in
  attach-session)
    echo $$ > "$dir/client.pid"
    if [ "$3" = "once" ]; then
      read line
      echo "bye $line"
      exit 0
    fi
    exec cat
    ;;
  list-clients)
    printf '1 /dev/pts/other\n%s /dev/pts/fake\n' "$(cat "$dir/client.pid")"
    ;;
  refresh-client)
    echo "$3" > "$dir/refreshed"
    ;;
  *)
    exit 1
    ;;
esac
"#;

struct Fixture {
    dir: TempDir,
    bridge: PtyBridge,
}

impl Fixture {
    fn new(grace: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("tmux");
        std::fs::write(&script, SCRIPT).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let bridge = PtyBridge::new(TmuxCli::new(script.display().to_string()), grace);
        Self { dir, bridge }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn attach(&self, session: &str) -> (Uuid, mpsc::UnboundedReceiver<Vec<u8>>, bool) {
        let client_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let reused = self.bridge.attach(session, client_id, tx, 80, 24).unwrap();
        (client_id, rx, reused)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.bridge.shutdown();
    }
}

/// Collect output until `needle` shows up.
async fn read_until(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>, needle: &str) -> String {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(chunk)) => {
                seen.extend(chunk);
                let text = String::from_utf8_lossy(&seen).into_owned();
                if text.contains(needle) {
                    return text;
                }
            }
            other => panic!(
                "{:?} not seen (got {:?}, ended with {:?})",
                needle,
                String::from_utf8_lossy(&seen),
                other.map(|chunk| chunk.map(|c| c.len()))
            ),
        }
    }
}

#[tokio::test]
async fn test_output_fans_out_to_every_connection() {
    let fixture = Fixture::new(Duration::from_secs(30));

    let (_, mut first, reused) = fixture.attach("main");
    assert!(!reused);
    let (_, mut second, reused) = fixture.attach("main");
    assert!(reused);
    assert_eq!(fixture.bridge.client_count("main"), 2);

    fixture.bridge.write("main", b"hello\n").unwrap();
    read_until(&mut first, "hello").await;
    read_until(&mut second, "hello").await;
}

#[tokio::test]
async fn test_last_detach_kills_after_grace() {
    let fixture = Fixture::new(Duration::from_millis(100));

    let (client, mut output, _) = fixture.attach("main");
    fixture.bridge.detach("main", client);
    assert!(fixture.bridge.is_attached("main"));

    assert!(wait_until(|| !fixture.bridge.is_attached("main")).await);
    // Killing drops the connection's sender.
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while output.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn test_reattach_within_grace_keeps_pty() {
    let fixture = Fixture::new(Duration::from_millis(100));

    let (client, _first, _) = fixture.attach("main");
    fixture.bridge.detach("main", client);
    let (_, mut second, reused) = fixture.attach("main");
    assert!(reused);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(fixture.bridge.is_attached("main"));
    assert_eq!(fixture.bridge.client_count("main"), 1);

    fixture.bridge.write("main", b"still here\n").unwrap();
    read_until(&mut second, "still here").await;
}

#[tokio::test]
async fn test_exit_closes_connections_and_next_attach_respawns() {
    let fixture = Fixture::new(Duration::from_secs(30));

    let (_, mut output, _) = fixture.attach("once");
    fixture.bridge.write("once", b"x\n").unwrap();
    read_until(&mut output, "bye x").await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while output.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "output should end when the attach exits");
    assert!(wait_until(|| !fixture.bridge.is_attached("once")).await);

    let (_, _output, reused) = fixture.attach("once");
    assert!(!reused);
}

#[tokio::test]
async fn test_refresh_targets_the_attached_client() {
    let fixture = Fixture::new(Duration::from_secs(30));

    let (_, _output, _) = fixture.attach("main");
    let pid_file = fixture.path("client.pid");
    assert!(wait_until(|| std::fs::read_to_string(&pid_file).is_ok_and(|s| !s.is_empty())).await);

    fixture.bridge.refresh("main").await.unwrap();
    let refreshed = std::fs::read_to_string(fixture.path("refreshed")).unwrap();
    assert_eq!(refreshed.trim(), "/dev/pts/fake");
}
