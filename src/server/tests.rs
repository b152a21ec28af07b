use super::*;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(ConnId, Message)>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<(ConnId, Message)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    fn instructions(&self) -> Vec<InstructionKind> {
        self.take().into_iter().map(|(_, m)| m.instruction).collect()
    }
}

impl ConnectionSink for RecordingSink {
    fn send_to(&self, conn: ConnId, msg: Message) -> Result<()> {
        self.sent.lock().unwrap().push((conn, msg));
        Ok(())
    }
}

#[derive(Default)]
struct CountingWol {
    woken: AtomicUsize,
}

#[async_trait]
impl WakeOnLan for CountingWol {
    async fn wake(&self, _mac: &MacAddr) -> Result<()> {
        self.woken.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    server: Server,
    sink: Arc<RecordingSink>,
    wol: Arc<CountingWol>,
    dir: tempfile::TempDir,
}

const CONN: ConnId = ConnId(1);

fn harness(job: Option<&str>, descriptor: Option<&str>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("req.json");
    if let Some(contents) = descriptor {
        std::fs::write(&path, contents).unwrap();
    }
    let settings = ServerSettings {
        scan_freq: 2,
        job_descriptor: path,
        job: job.map(str::to_string),
        mac_addr: Some(MacAddr([0, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e])),
        tick: Duration::from_millis(10),
    };
    let sink = Arc::new(RecordingSink::default());
    let wol = Arc::new(CountingWol::default());
    let server = Server::new(settings, sink.clone(), Some(wol.clone()));
    Harness {
        server,
        sink,
        wol,
        dir,
    }
}

async fn attach(h: &mut Harness) {
    h.server
        .handle_transport_event(TransportEvent::Connected(CONN))
        .await;
}

async fn respond(h: &mut Harness) {
    h.server
        .handle_transport_event(TransportEvent::Message(CONN, Message::response()))
        .await;
}

#[tokio::test]
async fn test_contact_sent_once_per_cycle() {
    let mut h = harness(Some("My Show"), None);
    h.server.on_tick().await;
    assert!(h.sink.take().is_empty());

    attach(&mut h).await;
    h.server.on_tick().await;
    h.server.on_tick().await;
    assert_eq!(h.sink.instructions(), vec![InstructionKind::Command]);
}

#[tokio::test]
async fn test_repeating_command_cycle() {
    let mut h = harness(Some("My Show"), None);
    attach(&mut h).await;
    h.server.on_tick().await;
    h.sink.take();

    respond(&mut h).await;
    assert_eq!(h.server.session().state, ServerState::FunctionSent);
    assert!(!h.server.session().accept);
    let sent = h.sink.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, CONN);
    assert_eq!(sent[0].1.instruction, InstructionKind::Function);
    assert_eq!(
        sent[0].1.body_text(),
        r#"{"rpc": "usenet_nzb_search_and_get", "args": ["My Show"]}"#
    );

    respond(&mut h).await;
    assert_eq!(h.server.session().state, ServerState::Operational);
    assert!(h.sink.take().is_empty());

    respond(&mut h).await;
    assert_eq!(h.server.session().state, ServerState::CommandSent);
    assert!(h.server.session().accept);
    assert_eq!(h.sink.instructions(), vec![InstructionKind::Command]);

    // The cycle's Command already went out; the tick must not repeat it
    h.server.on_tick().await;
    assert!(h.sink.take().is_empty());
}

#[tokio::test]
async fn test_function_body_from_descriptor() {
    let descriptor = r#"{"rpc": "usenet_nzb_search_and_get", "args": ["A", "B"]}"#;
    let h = harness(None, Some(&format!("{descriptor}\n")));
    assert_eq!(h.server.function_body().await, descriptor);
}

#[tokio::test]
async fn test_function_body_fallback_without_usable_descriptor() {
    let empty = r#"{"rpc": "usenet_nzb_search_and_get", "args": []}"#;

    let missing = harness(None, None);
    assert_eq!(missing.server.function_body().await, empty);

    let garbage = harness(None, Some("{\"args\": [1"));
    assert_eq!(garbage.server.function_body().await, empty);
}

#[tokio::test]
async fn test_second_connection_waits() {
    let mut h = harness(Some("x"), None);
    attach(&mut h).await;
    let other = ConnId(2);
    h.server
        .handle_transport_event(TransportEvent::Connected(other))
        .await;
    assert_eq!(h.server.session().active_conn, Some(CONN));

    h.server
        .handle_transport_event(TransportEvent::Message(other, Message::pulse()))
        .await;
    assert!(h.sink.take().is_empty());

    h.server
        .handle_transport_event(TransportEvent::Closed(other))
        .await;
    assert!(h.server.session().connected);
    assert!(h.server.session().waiting.is_empty());
}

#[tokio::test]
async fn test_waiting_connection_promoted_when_active_closes() {
    let mut h = harness(Some("x"), None);
    attach(&mut h).await;
    h.server.on_tick().await;
    respond(&mut h).await;
    h.sink.take();

    // The client reconnected before its old socket was noticed as dead
    let fresh = ConnId(2);
    h.server
        .handle_transport_event(TransportEvent::Connected(fresh))
        .await;
    assert_eq!(h.server.session().waiting, vec![fresh]);

    h.server
        .handle_transport_event(TransportEvent::Closed(CONN))
        .await;
    let session = h.server.session();
    assert!(session.connected);
    assert_eq!(session.active_conn, Some(fresh));
    assert!(session.waiting.is_empty());
    assert!(session.accept);
    assert_eq!(session.state, ServerState::CommandSent);

    h.server.on_tick().await;
    assert_eq!(h.sink.take(), vec![(fresh, Message::command())]);
    h.server
        .handle_transport_event(TransportEvent::Message(fresh, Message::response()))
        .await;
    let sent = h.sink.take();
    assert_eq!(sent[0].0, fresh);
    assert_eq!(sent[0].1.instruction, InstructionKind::Function);
}

#[tokio::test]
async fn test_closing_active_connection_resets_session() {
    let mut h = harness(Some("x"), None);
    attach(&mut h).await;
    h.server.on_tick().await;
    respond(&mut h).await;

    h.server
        .handle_transport_event(TransportEvent::Closed(CONN))
        .await;
    let session = h.server.session();
    assert!(!session.connected);
    assert_eq!(session.active_conn, None);
    assert!(!session.accept);
    assert_eq!(session.state, ServerState::CommandSent);

    let next = ConnId(3);
    h.server
        .handle_transport_event(TransportEvent::Connected(next))
        .await;
    h.sink.take();
    h.server.on_tick().await;
    let sent = h.sink.take();
    assert_eq!(sent, vec![(next, Message::command())]);
}

#[tokio::test]
async fn test_pulse_and_broadcast_are_echoed() {
    let mut h = harness(Some("x"), None);
    attach(&mut h).await;
    let progress = Message::broadcast(r#"{"rpc": "usenet_progress", "args": [0.25]}"#);

    h.server.handle_message(Message::pulse()).await;
    h.server.handle_message(progress.clone()).await;
    h.server
        .handle_message(Message::broadcast("not an envelope"))
        .await;

    let sent: Vec<Message> = h.sink.take().into_iter().map(|(_, m)| m).collect();
    assert_eq!(
        sent,
        vec![
            Message::pulse(),
            progress,
            Message::broadcast("not an envelope")
        ]
    );
}

#[tokio::test]
async fn test_descriptor_change_resets_client() {
    let mut h = harness(None, Some(r#"{"rpc": "usenet_nzb_search_and_get", "args": [A]}"#));
    attach(&mut h).await;
    h.server.on_tick().await;
    respond(&mut h).await;
    respond(&mut h).await;
    h.sink.take();

    assert!(!h.server.check_descriptor().await, "first check is the baseline");

    let path = h.dir.path().join("req.json");
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();
    drop(file);

    assert!(h.server.check_descriptor().await);
    assert_eq!(h.wol.woken.load(Ordering::SeqCst), 1);
    assert_eq!(h.sink.instructions(), vec![InstructionKind::Reset]);
    assert_eq!(h.server.session().state, ServerState::Operational);
    assert!(!h.server.session().accept);

    // The client's acknowledgment of the reset restarts the cycle
    respond(&mut h).await;
    assert_eq!(h.sink.instructions(), vec![InstructionKind::Command]);
    respond(&mut h).await;
    assert_eq!(h.sink.instructions(), vec![InstructionKind::Function]);

    assert!(!h.server.check_descriptor().await);
}

#[tokio::test]
async fn test_descriptor_change_without_client_only_wakes() {
    let mut h = harness(None, Some("{}"));
    assert!(!h.server.check_descriptor().await);
    let path = h.dir.path().join("req.json");
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();
    drop(file);

    assert!(h.server.check_descriptor().await);
    assert_eq!(h.wol.woken.load(Ordering::SeqCst), 1);
    assert!(h.sink.take().is_empty());
}

#[tokio::test]
async fn test_descriptor_created_after_start_is_a_change() {
    let mut h = harness(None, None);
    attach(&mut h).await;
    h.server.on_tick().await;
    respond(&mut h).await;
    respond(&mut h).await;
    h.sink.take();

    assert!(!h.server.check_descriptor().await);
    assert!(h.server.session().descriptor_checked);

    let path = h.dir.path().join("req.json");
    std::fs::write(&path, r#"{"rpc": "usenet_nzb_search_and_get", "args": ["New Show"]}"#).unwrap();

    assert!(h.server.check_descriptor().await);
    assert_eq!(h.wol.woken.load(Ordering::SeqCst), 1);
    assert_eq!(h.sink.instructions(), vec![InstructionKind::Reset]);

    respond(&mut h).await;
    respond(&mut h).await;
    let sent = h.sink.take();
    assert_eq!(sent[1].1.instruction, InstructionKind::Function);
    assert_eq!(
        sent[1].1.body_text(),
        r#"{"rpc": "usenet_nzb_search_and_get", "args": ["New Show"]}"#
    );

    assert!(!h.server.check_descriptor().await);
}

#[tokio::test]
async fn test_descriptor_checked_every_scan_freq_ticks() {
    let mut h = harness(None, Some("{}"));
    h.server.on_tick().await;
    assert!(h.server.session().descriptor_mtime.is_none());
    h.server.on_tick().await;
    assert!(h.server.session().descriptor_mtime.is_some());
}

#[tokio::test]
async fn test_run_wakes_at_startup() {
    let h = harness(Some("x"), None);
    let (_tx, rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    h.server.run(rx, shutdown).await.unwrap();
    assert_eq!(h.wol.woken.load(Ordering::SeqCst), 1);
}

#[test]
fn test_settings_from_config() {
    let mut config = Config::default();
    config.server.mac_addr = Some("00:1a:2b:3c:4d:5e".into());
    config.server.job = Some("Configured".into());

    let settings = ServerSettings::from_config(&config, None).unwrap();
    assert_eq!(settings.job.as_deref(), Some("Configured"));
    assert_eq!(settings.mac_addr, Some(MacAddr([0, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e])));

    let overridden = ServerSettings::from_config(&config, Some("Cli".into())).unwrap();
    assert_eq!(overridden.job.as_deref(), Some("Cli"));

    config.server.mac_addr = Some("nope".into());
    assert!(ServerSettings::from_config(&config, None).is_err());
}
