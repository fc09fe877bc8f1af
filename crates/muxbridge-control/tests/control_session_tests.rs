mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{test_config, wait_until, FakeTmux};
use muxbridge_control::{BridgeError, ControlConfig, ControlSession};
use muxbridge_types::{SessionState, SplitDirection, TerminalSize};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use uuid::Uuid;

async fn ready_session(name: &str) -> (Arc<ControlSession>, FakeTmux) {
    let (process, mut fake) = FakeTmux::pair();
    let session = ControlSession::start(name, process, test_config());
    fake.handshake().await;
    session.wait_ready().await.expect("session should become ready");
    (session, fake)
}

#[tokio::test]
async fn test_replies_resolve_in_submission_order() {
    let (session, mut fake) = ready_session("fifo").await;

    let a = tokio::spawn({
        let session = session.clone();
        async move { session.send_command("display-message -p A").await }
    });
    assert_eq!(fake.next_command().await, "display-message -p A");
    let b = tokio::spawn({
        let session = session.clone();
        async move { session.send_command("display-message -p B").await }
    });
    assert_eq!(fake.next_command().await, "display-message -p B");
    let c = tokio::spawn({
        let session = session.clone();
        async move { session.send_command("display-message -p C").await }
    });
    assert_eq!(fake.next_command().await, "display-message -p C");

    fake.reply(&["a"]).await;
    fake.reply(&["b"]).await;
    fake.reply(&["c"]).await;

    assert_eq!(a.await.unwrap().unwrap(), "a");
    assert_eq!(b.await.unwrap().unwrap(), "b");
    assert_eq!(c.await.unwrap().unwrap(), "c");
}

#[tokio::test]
async fn test_empty_reply_block() {
    let (session, mut fake) = ready_session("empty").await;

    let split = tokio::spawn({
        let session = session.clone();
        async move { session.send_command("split-window -h -t %0").await }
    });
    fake.ack().await;
    assert_eq!(split.await.unwrap().unwrap(), "");
}

#[tokio::test]
async fn test_multiline_reply_is_decoded() {
    let (session, mut fake) = ready_session("multi").await;

    let capture = tokio::spawn({
        let session = session.clone();
        async move { session.capture_pane("%0").await }
    });
    assert_eq!(fake.next_command().await, "capture-pane -p -e -S - -t %0");
    fake.reply(&[r"\033[1mbold\033[0m", r"C:\\tmp"]).await;
    assert_eq!(capture.await.unwrap().unwrap(), "\x1b[1mbold\x1b[0m\nC:\\tmp");
}

#[tokio::test]
async fn test_error_reply_rejects_with_message() {
    let (session, mut fake) = ready_session("err").await;

    let kill = tokio::spawn({
        let session = session.clone();
        async move { session.close_pane("%9").await }
    });
    assert_eq!(fake.next_command().await, "kill-pane -t %9");
    fake.reply_error(&["can't find pane: %9"]).await;

    match kill.await.unwrap() {
        Err(BridgeError::CommandFailed(msg)) => assert_eq!(msg, "can't find pane: %9"),
        other => panic!("expected CommandFailed, got {:?}", other),
    }
    assert!(!session.is_degraded());
}

#[tokio::test]
async fn test_split_returns_new_pane_id() {
    let (session, mut fake) = ready_session("split").await;

    let split = tokio::spawn({
        let session = session.clone();
        async move { session.split_pane("%0", SplitDirection::Vertical).await }
    });
    assert_eq!(
        fake.next_command().await,
        "split-window -v -t %0 -P -F '#{pane_id}'"
    );
    fake.reply(&["%4"]).await;
    assert_eq!(split.await.unwrap().unwrap(), "%4");
}

#[tokio::test]
async fn test_destroy_rejects_pending_and_later_commands() {
    let (session, mut fake) = ready_session("gone").await;

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.send_command("list-windows").await }
    });
    fake.next_command().await;

    session.destroy();
    session.destroy();

    assert!(matches!(pending.await.unwrap(), Err(BridgeError::Destroyed)));
    assert!(matches!(
        session.send_command("list-windows").await,
        Err(BridgeError::Destroyed)
    ));
    assert_eq!(session.state(), SessionState::Destroyed);
    assert_eq!(session.listener_count(), 0);
    assert!(session.add_client(Uuid::new_v4()).is_err());
}

#[tokio::test]
async fn test_timeout_retires_session() {
    let (session, mut fake) = ready_session("slow").await;

    let reasons = Arc::new(Mutex::new(Vec::new()));
    session.on_exit({
        let reasons = reasons.clone();
        move |reason| reasons.lock().push(reason.map(str::to_string))
    });

    let result = session.send_command("list-windows").await;
    assert!(matches!(result, Err(BridgeError::Timeout(500))));
    assert_eq!(fake.next_command().await, "list-windows");
    assert!(session.is_degraded());
    assert!(session.summary().degraded);
    assert!(session.is_destroyed());
    assert_eq!(
        reasons.lock().clone(),
        vec![Some("tmux stopped answering commands".to_string())]
    );

    assert!(matches!(
        session.send_command("list-windows").await,
        Err(BridgeError::Degraded)
    ));
}

#[tokio::test]
async fn test_malformed_pane_id_is_never_written() {
    let (session, mut fake) = ready_session("guarded").await;

    let result = session.close_pane("%0\nlist-sessions").await;
    assert!(matches!(result, Err(BridgeError::InvalidTarget(_))));
    assert!(matches!(
        session.send_input("%1;kill-server", b"x").await,
        Err(BridgeError::InvalidTarget(_))
    ));
    assert!(matches!(
        session.send_command("kill-pane -t %0\nlist-sessions").await,
        Err(BridgeError::InvalidCommand(_))
    ));
    assert_eq!(fake.try_next_command(Duration::from_millis(100)).await, None);

    // Replies still line up with the commands that were sent.
    let capture = tokio::spawn({
        let session = session.clone();
        async move { session.capture_pane("%1").await }
    });
    assert_eq!(fake.next_command().await, "capture-pane -p -e -S - -t %1");
    fake.reply(&["pane one"]).await;
    assert_eq!(capture.await.unwrap().unwrap(), "pane one");
    assert!(!session.is_degraded());
}

#[tokio::test]
async fn test_equalize_evens_every_pane() {
    let (session, mut fake) = ready_session("even").await;

    let equalize = tokio::spawn({
        let session = session.clone();
        async move { session.equalize_panes(None).await }
    });
    assert_eq!(fake.next_command().await, "list-panes -t 'even' -F '#{pane_id}'");
    fake.reply(&["%0", "%1", "%4"]).await;
    for pane in ["%0", "%1", "%4"] {
        assert_eq!(fake.ack().await, format!("select-layout -E -t {}", pane));
    }
    equalize.await.unwrap().unwrap();

    assert!(matches!(
        session.equalize_panes(Some("@1 ; kill-server")).await,
        Err(BridgeError::InvalidTarget(_))
    ));
}

#[tokio::test]
async fn test_setup_commands_run_before_ready() {
    let (process, mut fake) = FakeTmux::pair();
    let config = ControlConfig {
        setup_commands: vec!["set-option -t {session} mouse off".to_string()],
        ..test_config()
    };
    let session = ControlSession::start("work", process, config);
    assert_eq!(session.state(), SessionState::Starting);

    let ready = tokio::spawn({
        let session = session.clone();
        async move { session.wait_ready().await }
    });
    fake.handshake().await;
    assert_eq!(fake.next_command().await, "set-option -t 'work' mouse off");
    assert_eq!(session.state(), SessionState::Starting);

    fake.ack().await;
    ready.await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_output_dispatch_keeps_split_characters() {
    let (session, mut fake) = ready_session("out").await;

    let pane_one = Arc::new(Mutex::new(Vec::new()));
    let pane_two = Arc::new(Mutex::new(Vec::new()));
    let everything = Arc::new(Mutex::new(Vec::new()));

    session.on_pane_output("%1", {
        let pane_one = pane_one.clone();
        move |_, data| pane_one.lock().extend_from_slice(data)
    });
    session.on_pane_output("%2", {
        let pane_two = pane_two.clone();
        move |_, data| pane_two.lock().extend_from_slice(data)
    });
    session.on_output({
        let everything = everything.clone();
        move |pane, data| everything.lock().push((pane.to_string(), data.to_vec()))
    });

    // "é" arrives split across two notifications.
    fake.send(b"%output %1 caf\xc3\n").await;
    fake.send(b"%output %1 \xa9\\015\\012\n").await;

    assert!(wait_until(|| everything.lock().len() == 2).await);
    assert_eq!(pane_one.lock().as_slice(), "café\r\n".as_bytes());
    assert!(pane_two.lock().is_empty());
    assert_eq!(everything.lock()[0], ("%1".to_string(), b"caf\xc3".to_vec()));
}

#[tokio::test]
async fn test_unsubscribed_listener_is_silent() {
    let (session, mut fake) = ready_session("unsub").await;

    let seen = Arc::new(Mutex::new(0usize));
    let token = session.on_output({
        let seen = seen.clone();
        move |_, _| *seen.lock() += 1
    });
    fake.send_line("%output %0 one").await;
    assert!(wait_until(|| *seen.lock() == 1).await);

    assert!(session.unsubscribe(token));
    assert!(!session.unsubscribe(token));
    fake.send_line("%output %0 two").await;

    // A command round trip guarantees the second line was processed.
    let query = tokio::spawn({
        let session = session.clone();
        async move { session.send_command("refresh-client").await }
    });
    fake.ack().await;
    query.await.unwrap().unwrap();
    assert_eq!(*seen.lock(), 1);
}

#[tokio::test]
async fn test_layout_change_is_parsed_and_stored() {
    let (session, mut fake) = ready_session("layout").await;

    let updates = Arc::new(Mutex::new(Vec::new()));
    session.on_layout_change({
        let updates = updates.clone();
        move |update| updates.lock().push(update.clone())
    });

    fake.send_line(
        "%layout-change @1 b25d,80x24,0,0{40x24,0,0,1,39x24,41,0,2} b25d,80x24,0,0{40x24,0,0,1,39x24,41,0,2} *",
    )
    .await;
    assert!(wait_until(|| updates.lock().len() == 1).await);

    let update = updates.lock()[0].clone();
    assert_eq!(update.window_id, "@1");
    assert_eq!(update.layout.pane_ids(), vec![1, 2]);
    assert_eq!(session.current_layout(), Some(update));

    // Malformed layouts are dropped without killing the session.
    fake.send_line("%layout-change @1 nonsense").await;
    let query = tokio::spawn({
        let session = session.clone();
        async move { session.send_command("refresh-client").await }
    });
    fake.ack().await;
    query.await.unwrap().unwrap();
    assert_eq!(updates.lock().len(), 1);
}

#[tokio::test]
async fn test_notifications_inside_block_belong_to_body() {
    let (session, mut fake) = ready_session("body").await;

    let seen = Arc::new(Mutex::new(0usize));
    session.on_output({
        let seen = seen.clone();
        move |_, _| *seen.lock() += 1
    });

    let list = tokio::spawn({
        let session = session.clone();
        async move { session.send_command("show-buffer").await }
    });
    fake.next_command().await;
    fake.reply(&["%output %0 not a notification", "%end 1 2 3"]).await;

    assert_eq!(
        list.await.unwrap().unwrap(),
        "%output %0 not a notification\n%end 1 2 3"
    );
    assert_eq!(*seen.lock(), 0);
}

#[tokio::test]
async fn test_exit_notifies_and_destroys() {
    let (session, mut fake) = ready_session("exit").await;

    let reasons = Arc::new(Mutex::new(Vec::new()));
    session.on_exit({
        let reasons = reasons.clone();
        move |reason| reasons.lock().push(reason.map(str::to_string))
    });

    fake.send_line("%exit server exited").await;
    assert!(wait_until(|| session.is_destroyed()).await);
    assert_eq!(reasons.lock().clone(), vec![Some("server exited".to_string())]);
    assert_eq!(session.exit_reason().as_deref(), Some("server exited"));
}

#[tokio::test]
async fn test_subprocess_eof_destroys() {
    let (session, fake) = ready_session("eof").await;

    let exits = Arc::new(Mutex::new(0usize));
    session.on_exit({
        let exits = exits.clone();
        move |_| *exits.lock() += 1
    });

    drop(fake);
    assert!(wait_until(|| session.is_destroyed()).await);
    assert_eq!(*exits.lock(), 1);
}

#[tokio::test]
async fn test_input_is_hex_encoded_in_chunks() {
    let (session, mut fake) = ready_session("input").await;

    let data = vec![b'x'; 5000];
    let send = tokio::spawn({
        let session = session.clone();
        async move { session.send_input("%3", &data).await }
    });

    let first = fake.ack().await;
    let second = fake.ack().await;
    send.await.unwrap().unwrap();

    let prefix = "send-keys -t %3 -H ";
    assert!(first.starts_with(prefix));
    assert_eq!(first[prefix.len()..].split(' ').count(), 4096);
    assert_eq!(second[prefix.len()..].split(' ').count(), 904);
    assert!(second.ends_with("78 78"));
}

#[tokio::test]
async fn test_input_chunk_failure_is_swallowed() {
    let (session, mut fake) = ready_session("dead-pane").await;

    let send = tokio::spawn({
        let session = session.clone();
        async move { session.send_input("%7", b"ls\r").await }
    });
    assert_eq!(fake.next_command().await, "send-keys -t %7 -H 6c 73 0d");
    fake.reply_error(&["can't find pane: %7"]).await;
    assert!(send.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_zoom_switches_from_other_pane() {
    let (session, mut fake) = ready_session("zoom").await;

    let zoom = tokio::spawn({
        let session = session.clone();
        async move { session.toggle_zoom("%2").await }
    });
    assert!(fake.next_command().await.starts_with("list-panes -t %2"));
    fake.reply(&["%1 1 1", "%2 0 1"]).await;
    assert_eq!(fake.ack().await, "resize-pane -Z -t %1");
    assert_eq!(fake.ack().await, "resize-pane -Z -t %2");
    zoom.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_zoom_on_zoomed_target_only_unzooms() {
    let (session, mut fake) = ready_session("unzoom").await;

    let zoom = tokio::spawn({
        let session = session.clone();
        async move { session.toggle_zoom("%2").await }
    });
    fake.next_command().await;
    fake.reply(&["%1 0 1", "%2 1 1"]).await;
    assert_eq!(fake.ack().await, "resize-pane -Z -t %2");
    zoom.await.unwrap().unwrap();
    assert_eq!(fake.try_next_command(Duration::from_millis(50)).await, None);
}

#[tokio::test]
async fn test_scroll_forward_outside_copy_mode_is_tolerated() {
    let (session, mut fake) = ready_session("scroll").await;

    let down = tokio::spawn({
        let session = session.clone();
        async move { session.scroll_pane("%0", -3).await }
    });
    assert_eq!(fake.next_command().await, "send-keys -t %0 -X -N 3 scroll-down");
    fake.reply_error(&["not in a mode"]).await;
    down.await.unwrap().unwrap();

    let up = tokio::spawn({
        let session = session.clone();
        async move { session.scroll_pane("%0", 5).await }
    });
    assert_eq!(fake.ack().await, "copy-mode -t %0");
    assert_eq!(fake.ack().await, "send-keys -t %0 -X -N 5 scroll-up");
    up.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_list_panes_parses_geometry() {
    let (session, mut fake) = ready_session("panes").await;

    let list = tokio::spawn({
        let session = session.clone();
        async move { session.list_panes().await }
    });
    assert!(fake.next_command().await.starts_with("list-panes -t 'panes' -F"));
    fake.reply(&["%0 40 24 0 0 1", "%1 39 24 41 0 0"]).await;

    let panes = list.await.unwrap().unwrap();
    assert_eq!(panes.len(), 2);
    assert_eq!(panes[1].pane_id, "%1");
    assert_eq!(panes[1].left, 41);
    assert!(panes[0].active);
}

#[tokio::test]
async fn test_current_window_layout_query() {
    let (session, mut fake) = ready_session("query").await;

    let query = tokio::spawn({
        let session = session.clone();
        async move { session.current_window_layout().await }
    });
    assert_eq!(
        fake.next_command().await,
        "display-message -p -t 'query' '#{window_id} #{window_layout}'"
    );
    fake.reply(&["@3 c3a1,80x24,0,0,5"]).await;

    let update = query.await.unwrap().unwrap();
    assert_eq!(update.window_id, "@3");
    assert_eq!(update.layout.pane_ids(), vec![5]);
    assert_eq!(session.current_layout(), Some(update));
}

#[tokio::test]
async fn test_client_size_is_debounced() {
    let (session, mut fake) = ready_session("size").await;

    session.set_client_size(TerminalSize::new(100, 30));
    session.set_client_size(TerminalSize::new(120, 40));
    session.set_client_size(TerminalSize::new(132, 43));

    assert_eq!(fake.ack().await, "refresh-client -C 132x43");
    assert_eq!(fake.try_next_command(Duration::from_millis(60)).await, None);
    assert!(wait_until(|| session.last_applied_size() == Some(TerminalSize::new(132, 43))).await);

    // Same size again is a no-op.
    session.set_client_size(TerminalSize::new(132, 43));
    assert_eq!(fake.try_next_command(Duration::from_millis(60)).await, None);
}

#[tokio::test]
async fn test_immediate_size_cancels_debounce() {
    let (session, mut fake) = ready_session("size-now").await;

    session.set_client_size(TerminalSize::new(100, 30));
    let apply = tokio::spawn({
        let session = session.clone();
        async move { session.apply_client_size_now(TerminalSize::new(90, 20)).await }
    });
    assert_eq!(fake.ack().await, "refresh-client -C 90x20");
    apply.await.unwrap().unwrap();
    assert_eq!(fake.try_next_command(Duration::from_millis(60)).await, None);
}

#[tokio::test]
async fn test_grace_period_absorbs_reconnect() {
    let (session, _fake) = ready_session("grace").await;
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    assert_eq!(session.add_client(first).unwrap(), 1);
    assert_eq!(session.remove_client(first), 0);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(session.add_client(second).unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!session.is_destroyed());

    session.remove_client(second);
    assert!(wait_until(|| session.is_destroyed()).await);
}

#[tokio::test]
async fn test_device_type_is_recorded() {
    let (session, _fake) = ready_session("devices").await;
    let client = Uuid::new_v4();

    session.add_client(client).unwrap();
    session.set_device_type(client, muxbridge_types::DeviceType::Mobile);
    assert_eq!(
        session.device_types().get(&client),
        Some(&muxbridge_types::DeviceType::Mobile)
    );
    assert_eq!(session.client_count(), 1);
}
