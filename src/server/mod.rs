//! Server control loop (the controller)
//!
//! The server accepts one client at a time and runs a repeating handshake
//! with it:
//!
//! ```text
//! CommandSent --Response--> FunctionSent --Response--> Operational
//!      ^                                                    |
//!      +--------------- Response (sends Command) -----------+
//! ```
//!
//! It also watches the job-descriptor file. When the file changes the
//! controlled machine is woken and the client is reset, which restarts the
//! cycle with the new job.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::rpc::{self, RpcFunction};
use crate::transport::{ConnectionSink, MacAddr, TransportEvent, WakeOnLan};
use crate::types::{ConnId, InstructionKind, Message};
use crate::utils::{read_file, render_progress_bar};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default control-loop tick
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Handshake progress with the active client
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    /// Command sent (or about to be); next Response gets the job request
    CommandSent,
    /// Job request sent; waiting for its acknowledgment
    FunctionSent,
    /// Handshake done; the next Response restarts the cycle
    Operational,
}

/// Process-wide server state
#[derive(Clone, Debug)]
pub struct ServerSession {
    /// Whether a client is attached
    pub connected: bool,
    /// The one connection being served
    pub active_conn: Option<ConnId>,
    /// Connections that arrived while another was active, oldest first
    pub waiting: Vec<ConnId>,
    /// A handshake may be started or continued
    pub accept: bool,
    /// Handshake progress
    pub state: ServerState,
    /// The Command for the current cycle has gone out
    pub contact_sent: bool,
    /// Last observed job-descriptor modification time
    pub descriptor_mtime: Option<SystemTime>,
    /// The descriptor has been looked at, whether or not it existed
    pub descriptor_checked: bool,
    /// Ticks since startup
    pub tick_counter: u64,
}

impl Default for ServerSession {
    fn default() -> Self {
        Self {
            connected: false,
            active_conn: None,
            waiting: Vec::new(),
            accept: false,
            state: ServerState::CommandSent,
            contact_sent: false,
            descriptor_mtime: None,
            descriptor_checked: false,
            tick_counter: 0,
        }
    }
}

impl ServerSession {
    fn attach(&mut self, conn: ConnId) {
        self.connected = true;
        self.active_conn = Some(conn);
        self.accept = true;
        self.state = ServerState::CommandSent;
        self.contact_sent = false;
    }

    fn detach(&mut self) {
        self.connected = false;
        self.active_conn = None;
        self.accept = false;
        self.state = ServerState::CommandSent;
        self.contact_sent = false;
    }
}

/// Settings the server reads from [`Config`]
#[derive(Clone, Debug)]
pub struct ServerSettings {
    /// Ticks between descriptor checks
    pub scan_freq: u64,
    /// Job-descriptor file
    pub job_descriptor: PathBuf,
    /// Ad-hoc job sent instead of the descriptor contents
    pub job: Option<String>,
    /// Controlled machine to wake, if any
    pub mac_addr: Option<MacAddr>,
    /// Control-loop tick
    pub tick: Duration,
}

impl ServerSettings {
    /// Extract server settings; `job` overrides `server.job`
    pub fn from_config(config: &Config, job: Option<String>) -> Result<Self> {
        let mac_addr = config
            .server
            .mac_addr
            .as_deref()
            .map(str::parse::<MacAddr>)
            .transpose()
            .map_err(|e| Error::config("server.mac_addr", e.to_string()))?;
        Ok(Self {
            scan_freq: config.server.scan_freq.max(1),
            job_descriptor: config.server.job_descriptor.clone(),
            job: job.or_else(|| config.server.job.clone()),
            mac_addr,
            tick: DEFAULT_TICK,
        })
    }
}

/// Server controller
pub struct Server {
    session: ServerSession,
    settings: ServerSettings,
    sink: Arc<dyn ConnectionSink>,
    wol: Option<Arc<dyn WakeOnLan>>,
}

impl Server {
    /// Create a server replying through `sink`; `wol` is used when a MAC is configured
    pub fn new(
        settings: ServerSettings,
        sink: Arc<dyn ConnectionSink>,
        wol: Option<Arc<dyn WakeOnLan>>,
    ) -> Self {
        Self {
            session: ServerSession::default(),
            settings,
            sink,
            wol,
        }
    }

    /// Current session state
    pub fn session(&self) -> &ServerSession {
        &self.session
    }

    /// Wake the controlled machine, then run until `shutdown` fires
    pub async fn run(
        mut self,
        mut transport: mpsc::UnboundedReceiver<TransportEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        self.wake().await;

        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            scan_freq = self.settings.scan_freq,
            descriptor = %self.settings.job_descriptor.display(),
            "server loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.on_tick().await,
                Some(event) = transport.recv() => self.handle_transport_event(event).await,
            }
        }

        info!("server loop stopped");
        Ok(())
    }

    /// Apply one transport event
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(conn) => {
                if let Some(active) = self.session.active_conn {
                    info!(%conn, %active, "client already attached, new connection waits");
                    self.session.waiting.push(conn);
                    return;
                }
                info!(%conn, "client attached");
                self.session.attach(conn);
            }
            TransportEvent::Closed(conn) => {
                if self.session.active_conn == Some(conn) {
                    info!(%conn, "client detached");
                    self.session.detach();
                    if !self.session.waiting.is_empty() {
                        let next = self.session.waiting.remove(0);
                        info!(conn = %next, "promoting waiting connection");
                        self.session.attach(next);
                    }
                } else {
                    debug!(%conn, "inactive connection closed");
                    self.session.waiting.retain(|c| *c != conn);
                }
            }
            TransportEvent::Message(conn, msg) => {
                if self.session.active_conn != Some(conn) {
                    debug!(%conn, instruction = %msg.instruction, "message from inactive connection ignored");
                    return;
                }
                self.handle_message(msg).await;
            }
        }
    }

    /// Dispatch one message from the active client
    pub async fn handle_message(&mut self, msg: Message) {
        match msg.instruction {
            InstructionKind::Pulse => self.send(msg),
            InstructionKind::Broadcast => {
                log_broadcast(&msg);
                self.send(msg);
            }
            InstructionKind::Response => self.on_response().await,
            other => debug!(instruction = %other, "unexpected instruction from client"),
        }
    }

    async fn on_response(&mut self) {
        match self.session.state {
            ServerState::CommandSent if self.session.accept => {
                self.session.accept = false;
                let body = self.function_body().await;
                info!(body = %body, "sending job request");
                self.send(Message::function(body));
                self.session.state = ServerState::FunctionSent;
            }
            ServerState::CommandSent => debug!("acknowledgment outside a handshake ignored"),
            ServerState::FunctionSent => {
                info!("job request acknowledged");
                self.session.state = ServerState::Operational;
            }
            ServerState::Operational => {
                debug!("restarting command cycle");
                self.send(Message::command());
                self.session.state = ServerState::CommandSent;
                self.session.accept = true;
                self.session.contact_sent = true;
            }
        }
    }

    /// Body of the job request
    ///
    /// The ad-hoc job wins; otherwise the descriptor file is used when it
    /// holds a readable envelope; otherwise a request with no queries.
    pub async fn function_body(&self) -> String {
        if let Some(job) = &self.settings.job {
            return rpc::build_call(RpcFunction::SearchAndGet, std::slice::from_ref(job));
        }

        let path = &self.settings.job_descriptor;
        match read_file(path).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).trim().to_string();
                match rpc::parse(&text) {
                    Ok(_) => return text,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "job descriptor unreadable")
                    }
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "job descriptor missing"),
        }
        rpc::build_call(RpcFunction::SearchAndGet, &[])
    }

    /// Per-tick work: contact the client, and every `scan_freq` ticks check the descriptor
    pub async fn on_tick(&mut self) {
        self.session.tick_counter += 1;
        self.initialise_contact();
        if self.session.tick_counter % self.settings.scan_freq == 0 {
            self.check_descriptor().await;
        }
    }

    fn initialise_contact(&mut self) {
        let s = &self.session;
        if s.connected
            && s.active_conn.is_some()
            && s.accept
            && s.state == ServerState::CommandSent
            && !s.contact_sent
        {
            info!("starting handshake");
            self.send(Message::command());
            self.session.contact_sent = true;
        }
    }

    /// Compare the descriptor's mtime with the last one seen
    ///
    /// A file present at the very first check only records a baseline; one
    /// that appears after a check found it missing counts as a change.
    /// Returns whether a change was acted on.
    pub async fn check_descriptor(&mut self) -> bool {
        let first_check = !std::mem::replace(&mut self.session.descriptor_checked, true);
        let path = &self.settings.job_descriptor;
        let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "job descriptor not readable");
                return false;
            }
        };

        match self.session.descriptor_mtime.replace(modified) {
            None if first_check => false,
            Some(previous) if previous == modified => false,
            _ => {
                info!(path = %path.display(), "job descriptor changed");
                self.on_descriptor_changed().await;
                true
            }
        }
    }

    async fn on_descriptor_changed(&mut self) {
        self.wake().await;
        if self.session.connected && self.session.active_conn.is_some() {
            self.send(Message::reset());
            self.session.state = ServerState::Operational;
            self.session.accept = false;
        }
    }

    /// Send a magic packet to the configured MAC, if any
    pub async fn wake(&self) {
        let (Some(wol), Some(mac)) = (&self.wol, &self.settings.mac_addr) else {
            return;
        };
        match wol.wake(mac).await {
            Ok(()) => info!(%mac, "wake-on-LAN sent"),
            Err(e) => warn!(%mac, error = %e, "wake-on-LAN failed"),
        }
    }

    fn send(&self, msg: Message) {
        let Some(conn) = self.session.active_conn else {
            debug!(instruction = %msg.instruction, "no client attached, message dropped");
            return;
        };
        let instruction = msg.instruction;
        if let Err(e) = self.sink.send_to(conn, msg) {
            warn!(%conn, %instruction, error = %e, "send failed");
        }
    }
}

fn log_broadcast(msg: &Message) {
    let Ok(envelope) = rpc::parse(&msg.body_text()) else {
        debug!("relaying unreadable broadcast");
        return;
    };
    match envelope.known_function() {
        Some(RpcFunction::Progress) => {
            if let Some(Ok(fraction)) = envelope.args.first().map(|a| a.parse::<f64>()) {
                info!("client transfer {}", render_progress_bar(fraction));
            }
        }
        Some(RpcFunction::Done) => info!("client reports no remaining work"),
        Some(function) => info!(%function, args = ?envelope.args, "relaying broadcast"),
        None => debug!(function = %envelope.function, "relaying unknown broadcast"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
