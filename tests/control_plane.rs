//! End-to-end control plane tests over loopback TCP
//!
//! A real server and client loop talk through the TCP transports; the
//! client's collaborators are in-memory fakes, so the full cycle (handshake,
//! job request, rescan relay, poll, rename, transfer, reset) runs in well under
//! a second of fast ticks.

mod common;

use common::{FakeDaemon, FakeProcess, FakeSearch, RecordingTransfer, assert_eventually, finished_job};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use usenet_ctl::config::LivenessPolicy;
use usenet_ctl::transport::{TcpClientTransport, TcpServerTransport};
use usenet_ctl::{Client, ClientSettings, Collaborators, Server, ServerSettings};

const TICK: Duration = Duration::from_millis(20);
const WAIT: Duration = Duration::from_secs(10);

struct Rig {
    search: Arc<FakeSearch>,
    daemon: Arc<FakeDaemon>,
    transfer: Arc<RecordingTransfer>,
    shutdown: CancellationToken,
    descriptor: std::path::PathBuf,
    dir: TempDir,
}

fn write_descriptor(path: &Path, shows: &[&str]) {
    let args = shows
        .iter()
        .map(|s| format!("\"{s}\""))
        .collect::<Vec<_>>()
        .join(", ");
    std::fs::write(
        path,
        format!(r#"{{"rpc": "usenet_nzb_search_and_get", "args": [{args}]}}"#),
    )
    .unwrap();
}

async fn start(shows: &[&str]) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = dir.path().join("req.json");
    write_descriptor(&descriptor, shows);
    let shutdown = CancellationToken::new();

    let listener = TcpServerTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (server_tx, server_rx) = mpsc::unbounded_channel();
    let (server_transport, _) = TcpServerTransport::spawn(listener, server_tx, shutdown.clone());
    let server = Server::new(
        ServerSettings {
            scan_freq: 2,
            job_descriptor: descriptor.clone(),
            job: None,
            mac_addr: None,
            tick: TICK,
        },
        Arc::new(server_transport),
        None,
    );
    tokio::spawn(server.run(server_rx, shutdown.clone()));

    let search = Arc::new(FakeSearch::default());
    let daemon = Arc::new(FakeDaemon::default());
    let transfer = Arc::new(RecordingTransfer::default());
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let (client_transport, _) =
        TcpClientTransport::spawn(addr, Duration::from_millis(50), client_tx, shutdown.clone());
    let client = Client::new(
        ClientSettings {
            pulse_gap: 2,
            liveness: LivenessPolicy::LogOnly,
            progress_update_interval: Duration::ZERO,
            job_file: None,
            success_statuses: vec!["SUCCESS/UNPACK".into(), "SUCCESS/ALL".into()],
            destination: dir.path().join("media"),
            process_name: "nzbget".into(),
            tick: TICK,
        },
        Collaborators {
            search: search.clone(),
            daemon: daemon.clone(),
            process: Arc::new(FakeProcess { pid: Some(4242) }),
            transfer: transfer.clone(),
        },
        Arc::new(client_transport),
    );
    tokio::spawn(client.run(client_rx, shutdown.clone()));

    Rig {
        search,
        daemon,
        transfer,
        shutdown,
        descriptor,
        dir,
    }
}

#[tokio::test]
async fn test_job_request_reaches_client_and_rescan_is_relayed() {
    let rig = start(&["My Show S01E02", "Other Show"]).await;

    assert_eventually(WAIT, "both searches", || rig.search.queries().len() == 2).await;
    assert_eq!(
        rig.search.queries(),
        vec!["My Show S01E02".to_string(), "Other Show".to_string()]
    );

    // usenet_update_list goes to the server and comes back as the scan trigger
    assert_eventually(WAIT, "daemon rescan", || rig.daemon.scans() >= 1).await;

    rig.shutdown.cancel();
}

#[tokio::test]
async fn test_finished_job_is_renamed_transferred_and_removed() {
    let rig = start(&["My Show S01E02"]).await;
    let job = finished_job(rig.dir.path(), 31, "My Show S01E02", "downloads/job31");
    rig.daemon.history.lock().unwrap().push(job);

    assert_eventually(WAIT, "transfer", || !rig.transfer.copies().is_empty()).await;
    let (source, dest) = rig.transfer.copies()[0].clone();
    assert_eq!(
        source,
        rig.dir.path().join("downloads/job31/My_Show_S01E02.mkv")
    );
    assert_eq!(
        dest,
        rig.dir.path().join("media/My_Show/My_Show_S01E02.mkv")
    );
    assert!(source.exists());

    assert_eventually(WAIT, "history cleanup", || rig.daemon.deleted() == vec![31]).await;

    // Single job, single transfer, even after more poll cycles
    tokio::time::sleep(TICK * 10).await;
    assert_eq!(rig.transfer.copies().len(), 1);

    rig.shutdown.cancel();
}

#[tokio::test]
async fn test_descriptor_change_delivers_new_job() {
    let rig = start(&["First Show"]).await;
    assert_eventually(WAIT, "first job", || rig.search.queries() == vec!["First Show".to_string()])
        .await;

    // Let the server record its baseline mtime before the edit
    tokio::time::sleep(TICK * 6).await;
    write_descriptor(&rig.descriptor, &["Second Show"]);
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&rig.descriptor)
        .unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();
    drop(file);

    assert_eventually(WAIT, "second job", || {
        rig.search.queries().contains(&"Second Show".to_string())
    })
    .await;
    assert_eq!(rig.search.queries().first().map(String::as_str), Some("First Show"));

    rig.shutdown.cancel();
}
