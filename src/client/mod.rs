//! Client control loop (the controlled machine)
//!
//! The client answers the server's handshake, turns job requests into NZB
//! downloads, and drives the download lifecycle from its pulse tick:
//!
//! ```text
//! AwaitingCommand --Command--> AwaitingFunction --Function--> Steady
//!        ^                                                      |
//!        +---------------------- Reset (any state) -------------+
//! ```
//!
//! All session state is owned by one task. Transport I/O, job-request tasks,
//! poll cycles and transfer workers report back through channels, so nothing
//! here is shared or locked and the loop never waits on the daemon.

mod jobs;
mod worker;

pub use jobs::PollSummary;
pub use worker::ProgressThrottle;

use crate::config::{Config, LivenessPolicy};
use crate::daemon::{DownloadDaemonClient, ProcessControl};
use crate::error::{Result, TransportError};
use crate::protocol::rpc::{self, RpcFunction};
use crate::search::SearchAndFetch;
use crate::transfer::FileTransfer;
use crate::transport::{MessageSink, TransportEvent};
use crate::types::{InstructionKind, Message, WorkerId};
use crate::utils::render_progress_bar;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default control-loop tick
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Handshake progress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// Waiting for the server's Command
    AwaitingCommand,
    /// Command acknowledged, waiting for the job request
    AwaitingFunction,
    /// Job request received; RPC broadcasts are dispatched
    Steady,
}

/// Process-wide client state
#[derive(Clone, Debug)]
pub struct ClientSession {
    /// Handshake progress
    pub state: ClientState,
    /// Ticks since startup
    pub pulse_counter: u64,
    /// A pulse went out and nothing has been received since
    pub pulse_sent: bool,
    /// Job currently being renamed/transferred, 0 when none
    pub act_nzb_id: i32,
    /// Worker transferring `act_nzb_id`
    pub active_worker: Option<WorkerId>,
    /// Pid of the download daemon once known
    pub daemon_pid: Option<u32>,
    /// Ask the server to relay a rescan on the next pulse
    pub probe: bool,
    /// Whether the transport currently has a connection
    pub connected: bool,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self {
            state: ClientState::AwaitingCommand,
            pulse_counter: 0,
            pulse_sent: false,
            act_nzb_id: 0,
            active_worker: None,
            daemon_pid: None,
            probe: false,
            connected: false,
        }
    }
}

/// Reports from tasks the loop spawned
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// The job request finished and the daemon is (now) running
    DaemonDetected {
        /// Daemon pid, if the process table already shows it
        pid: Option<u32>,
        /// Whether this client had to start it
        launched: bool,
    },
    /// A transfer worker ended
    TransferFinished {
        /// Worker that ended
        worker: WorkerId,
        /// Job it was transferring
        job_id: i32,
        /// Whether the copy succeeded
        success: bool,
    },
    /// A poll cycle ended
    PollFinished {
        /// Outcome, or `None` when the daemon could not be read
        summary: Option<PollSummary>,
    },
}

/// External services the client drives
#[derive(Clone)]
pub struct Collaborators {
    /// NZB search and fetch
    pub search: Arc<dyn SearchAndFetch>,
    /// Download daemon RPC
    pub daemon: Arc<dyn DownloadDaemonClient>,
    /// Process table and daemon launch
    pub process: Arc<dyn ProcessControl>,
    /// Payload copy
    pub transfer: Arc<dyn FileTransfer>,
}

/// Settings the client reads from [`Config`]
#[derive(Clone, Debug)]
pub struct ClientSettings {
    /// Ticks between pulses
    pub pulse_gap: u64,
    /// Reaction to a missed pulse acknowledgment
    pub liveness: LivenessPolicy,
    /// Minimum time between progress broadcasts
    pub progress_update_interval: Duration,
    /// Queries used when a job request has no args
    pub job_file: Option<PathBuf>,
    /// History statuses that mean success
    pub success_statuses: Vec<String>,
    /// Transfer destination root
    pub destination: PathBuf,
    /// Daemon process name
    pub process_name: String,
    /// Control-loop tick
    pub tick: Duration,
}

impl ClientSettings {
    /// Extract client settings from the full configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            pulse_gap: config.client.pulse_gap.max(1),
            liveness: config.client.liveness,
            progress_update_interval: config.client.progress_update_interval,
            job_file: config.client.job_file.clone(),
            success_statuses: config.daemon.success_statuses.clone(),
            destination: config.transfer.destination.clone(),
            process_name: config.daemon.process_name.clone(),
            tick: DEFAULT_TICK,
        }
    }
}

struct WorkerHandle {
    job_id: i32,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Client controller
pub struct Client {
    session: ClientSession,
    settings: ClientSettings,
    collab: Collaborators,
    sink: Arc<dyn MessageSink>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: mpsc::UnboundedReceiver<ClientEvent>,
    workers: HashMap<WorkerId, WorkerHandle>,
    tasks: Vec<JoinHandle<()>>,
    poll_task: Option<JoinHandle<()>>,
    next_worker: u32,
    daemon_requested: bool,
}

impl Client {
    /// Create a client that replies through `sink`
    pub fn new(settings: ClientSettings, collab: Collaborators, sink: Arc<dyn MessageSink>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            session: ClientSession::default(),
            settings,
            collab,
            sink,
            events_tx,
            events_rx,
            workers: HashMap::new(),
            tasks: Vec::new(),
            poll_task: None,
            next_worker: 1,
            daemon_requested: false,
        }
    }

    /// Current session state
    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// Ids of transfer workers that have not reported back
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<_> = self.workers.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Run until `shutdown` fires
    ///
    /// Returns an error only when the liveness policy is
    /// [`LivenessPolicy::Exit`] and a pulse went unacknowledged.
    pub async fn run(
        mut self,
        mut transport: mpsc::UnboundedReceiver<TransportEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(pulse_gap = self.settings.pulse_gap, "client loop started");

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.on_tick().await {
                        break Err(e);
                    }
                }
                Some(event) = transport.recv() => self.handle_transport_event(event).await,
                Some(event) = self.events_rx.recv() => self.handle_client_event(event),
            }
        };

        self.stop_all();
        info!("client loop stopped");
        result
    }

    /// Apply one transport event
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(conn) => {
                info!(%conn, "connected, awaiting handshake");
                self.session.connected = true;
                self.session.pulse_sent = false;
                // Handshake progress belongs to a connection; transfers survive it
                self.session.state = ClientState::AwaitingCommand;
            }
            TransportEvent::Closed(conn) => {
                warn!(%conn, "connection lost");
                self.session.connected = false;
            }
            TransportEvent::Message(_, msg) => self.handle_message(msg).await,
        }
    }

    /// Dispatch one inbound message
    pub async fn handle_message(&mut self, msg: Message) {
        self.session.pulse_sent = false;
        debug!(instruction = %msg.instruction, state = ?self.session.state, "message received");

        match msg.instruction {
            InstructionKind::Reset => {
                info!(state = ?self.session.state, "reset requested");
                self.send(Message::response());
                self.session.state = ClientState::AwaitingCommand;
                self.cancel_poll();
                self.cancel_workers();
                self.session.act_nzb_id = 0;
                self.session.active_worker = None;
                return;
            }
            InstructionKind::Pulse => return,
            _ => {}
        }

        match (self.session.state, msg.instruction) {
            (ClientState::AwaitingCommand, InstructionKind::Command) => {
                self.send(Message::response());
                self.session.state = ClientState::AwaitingFunction;
                info!("command acknowledged");
            }
            (ClientState::AwaitingFunction, InstructionKind::Function) => {
                self.send(Message::response());
                self.session.state = ClientState::Steady;
                info!("job request acknowledged");
                self.start_job_request(&msg.body_text());
            }
            (ClientState::Steady, _) => self.handle_rpc(&msg).await,
            (state, instruction) => {
                debug!(?state, %instruction, "message not expected in this state, ignored");
            }
        }
    }

    /// Steady-state handler for RPC envelopes
    async fn handle_rpc(&mut self, msg: &Message) {
        let envelope = match rpc::parse(&msg.body_text()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(instruction = %msg.instruction, error = %e, "dropping message with unreadable body");
                return;
            }
        };

        let Some(function) = envelope.known_function() else {
            debug!(function = %envelope.function, "ignoring unknown RPC function");
            return;
        };

        match function {
            RpcFunction::Complete => {
                let announced = envelope
                    .args
                    .first()
                    .and_then(|a| a.trim().parse::<u32>().ok());
                let pid = match announced {
                    Some(pid) => Some(pid),
                    None => {
                        self.collab
                            .process
                            .find_process(&self.settings.process_name)
                            .await
                    }
                };
                self.record_daemon(pid);
            }
            RpcFunction::UpdateList => {
                let daemon = self.collab.daemon.clone();
                self.tasks.push(tokio::spawn(async move {
                    match daemon.scan().await {
                        Ok(()) => info!("daemon rescan requested"),
                        Err(e) => warn!(error = %e, "daemon rescan failed"),
                    }
                }));
            }
            RpcFunction::ScpComplete => {
                let mut cleared = false;
                for worker in envelope.args.iter().filter_map(|a| a.parse::<WorkerId>().ok()) {
                    if let Some(handle) = self.workers.remove(&worker) {
                        debug!(%worker, job_id = handle.job_id, "terminating transfer worker");
                        handle.cancel.cancel();
                        handle.handle.abort();
                    }
                    if self.session.active_worker == Some(worker) {
                        cleared = true;
                    }
                }
                if cleared {
                    info!(job_id = self.session.act_nzb_id, "active job released");
                    self.session.act_nzb_id = 0;
                    self.session.active_worker = None;
                }
            }
            RpcFunction::Progress => match envelope.args.first().map(|a| a.trim().parse::<f64>()) {
                Some(Ok(fraction)) => info!("transfer {}", render_progress_bar(fraction)),
                _ => debug!(args = ?envelope.args, "progress without a fraction"),
            },
            RpcFunction::Done => info!("daemon history is empty"),
            RpcFunction::SearchAndGet => {
                debug!("job request outside the handshake ignored");
            }
        }
    }

    /// Apply a report from a spawned task
    pub fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::DaemonDetected { pid, launched } => {
                if launched {
                    info!(?pid, "download daemon launched");
                    self.record_daemon(pid);
                } else {
                    info!(?pid, "download daemon already running");
                    if let Some(pid) = pid {
                        self.session.daemon_pid = Some(pid);
                    }
                    self.broadcast(RpcFunction::UpdateList, &[]);
                }
            }
            ClientEvent::TransferFinished {
                worker,
                job_id,
                success,
            } => {
                self.workers.remove(&worker);
                if self.session.active_worker == Some(worker) {
                    self.session.act_nzb_id = 0;
                    self.session.active_worker = None;
                }
                if success {
                    info!(%worker, job_id, "transfer worker finished");
                } else {
                    warn!(%worker, job_id, "transfer worker failed, job will be retried");
                }
            }
            ClientEvent::PollFinished { summary } => {
                self.poll_task = None;
                if let Some(summary) = summary {
                    self.apply_poll(&summary);
                }
            }
        }
    }

    /// Record the daemon pid; a newly learned pid triggers a rescan on the next pulse
    fn record_daemon(&mut self, pid: Option<u32>) {
        match pid {
            Some(pid) if self.session.daemon_pid != Some(pid) => {
                self.session.daemon_pid = Some(pid);
                self.session.probe = true;
            }
            Some(_) => {}
            None => {
                // Not visible yet; the next pulse looks again
                self.session.probe = true;
            }
        }
    }

    /// Advance the tick counter and run the pulse actions every `pulse_gap` ticks
    pub async fn on_tick(&mut self) -> Result<()> {
        self.session.pulse_counter += 1;
        if self.session.pulse_counter % self.settings.pulse_gap != 0 {
            return Ok(());
        }
        self.pulse().await
    }

    /// Pulse actions: reap, probe, poll, liveness check, pulse
    pub async fn pulse(&mut self) -> Result<()> {
        self.reap();

        if self.daemon_requested && self.session.daemon_pid.is_none() {
            self.session.daemon_pid = self
                .collab
                .process
                .find_process(&self.settings.process_name)
                .await;
        }

        if self.session.probe {
            self.broadcast(RpcFunction::UpdateList, &[]);
            self.session.probe = false;
        }

        if self.session.daemon_pid.is_some() {
            self.start_poll();
        }

        if self.session.pulse_sent {
            warn!("previous pulse was not acknowledged");
            if self.settings.liveness == LivenessPolicy::Exit {
                return Err(TransportError::LivenessTimeout.into());
            }
        }

        match self.sink.send(Message::pulse()) {
            Ok(()) => self.session.pulse_sent = true,
            Err(e) => debug!(error = %e, "pulse not sent"),
        }
        Ok(())
    }

    /// Drop handles of tasks and workers that have already ended
    fn reap(&mut self) {
        self.tasks.retain(|t| !t.is_finished());
        // A poll that died without reporting must not block later ones
        if self.poll_task.as_ref().is_some_and(JoinHandle::is_finished) {
            self.poll_task = None;
        }
        self.workers.retain(|worker, w| {
            if w.handle.is_finished() {
                debug!(%worker, "reaped finished transfer worker");
                false
            } else {
                true
            }
        });
    }

    fn cancel_workers(&mut self) {
        for (worker, handle) in self.workers.drain() {
            info!(%worker, job_id = handle.job_id, "cancelling transfer worker");
            handle.cancel.cancel();
            handle.handle.abort();
        }
    }

    fn cancel_poll(&mut self) {
        if let Some(task) = self.poll_task.take() {
            debug!("abandoning in-flight poll");
            task.abort();
        }
    }

    fn stop_all(&mut self) {
        self.cancel_poll();
        self.cancel_workers();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn send(&self, msg: Message) {
        let instruction = msg.instruction;
        if let Err(e) = self.sink.send(msg) {
            warn!(%instruction, error = %e, "send failed");
        }
    }

    fn broadcast(&self, function: RpcFunction, args: &[String]) {
        debug!(%function, ?args, "broadcasting");
        self.send(Message::broadcast(rpc::build_call(function, args)));
    }

    /// Next event from a spawned task, for driving the client step by step
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events_rx.recv().await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop_all();
    }
}
