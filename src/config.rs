//! Configuration types for usenet-ctl
//!
//! One JSON document configures both binaries; each reads the sections it
//! needs. Every field has a default so a minimal file only names the peer
//! host and whatever paths differ from the defaults.

use crate::error::{Error, Result};
use crate::transport::wol::MacAddr;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Control-plane connection (client connects, server listens)
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Controller settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Controlled-machine settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Download daemon RPC and process settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// NZB search settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Secure copy settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Retry behavior for collaborator network calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Control-plane connection
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server host name or address (client side); bind address (server side)
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Delay between client reconnect attempts (default: 5 seconds)
    #[serde(default = "default_reconnect_interval", with = "duration_serde")]
    pub reconnect_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            reconnect_interval: default_reconnect_interval(),
        }
    }
}

impl ConnectionConfig {
    /// `host:port` string for connecting or binding
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Controller settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// MAC address of the controlled machine for wake-on-LAN (None = never wake)
    #[serde(default)]
    pub mac_addr: Option<String>,

    /// Destination of the magic packet (default: 255.255.255.255:9)
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: String,

    /// Ticks between job-descriptor modification checks (default: 10)
    #[serde(default = "default_scan_freq")]
    pub scan_freq: u64,

    /// Job-descriptor file whose contents become the Function body
    #[serde(default = "default_job_descriptor")]
    pub job_descriptor: PathBuf,

    /// Single ad-hoc job name sent instead of the descriptor contents
    #[serde(default)]
    pub job: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mac_addr: None,
            broadcast_addr: default_broadcast_addr(),
            scan_freq: default_scan_freq(),
            job_descriptor: default_job_descriptor(),
            job: None,
        }
    }
}

/// What the client does when a pulse goes unacknowledged
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessPolicy {
    /// Log a warning and keep running (default)
    #[default]
    LogOnly,
    /// Stop the client loop with a liveness error
    Exit,
}

/// Controlled-machine settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Ticks between pulses and poll cycles (default: 5)
    #[serde(default = "default_pulse_gap")]
    pub pulse_gap: u64,

    /// Reaction to a missed pulse acknowledgment
    #[serde(default)]
    pub liveness: LivenessPolicy,

    /// Minimum time between progress broadcasts (default: 10 seconds)
    #[serde(default = "default_progress_update_interval", with = "duration_serde")]
    pub progress_update_interval: Duration,

    /// Default job list (one query per line) used when a job request has no args
    #[serde(default)]
    pub job_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pulse_gap: default_pulse_gap(),
            liveness: LivenessPolicy::default(),
            progress_update_interval: default_progress_update_interval(),
            job_file: None,
        }
    }
}

/// Download daemon settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// JSON-RPC endpoint (default: http://127.0.0.1:6789/jsonrpc)
    #[serde(default = "default_daemon_url")]
    pub url: String,

    /// RPC user name
    #[serde(default = "default_daemon_username")]
    pub username: String,

    /// RPC password
    #[serde(default = "default_daemon_password")]
    pub password: String,

    /// Process name looked up in the process table (default: nzbget)
    #[serde(default = "default_process_name")]
    pub process_name: String,

    /// Daemon binary (None = find `process_name` on PATH)
    #[serde(default)]
    pub binary: Option<PathBuf>,

    /// Arguments that start the daemon in the background (default: ["-D"])
    #[serde(default = "default_launch_args")]
    pub launch_args: Vec<String>,

    /// History status strings that mean "finished successfully"
    #[serde(default = "default_success_statuses")]
    pub success_statuses: Vec<String>,

    /// RPC request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            url: default_daemon_url(),
            username: default_daemon_username(),
            password: default_daemon_password(),
            process_name: default_process_name(),
            binary: None,
            launch_args: default_launch_args(),
            success_statuses: default_success_statuses(),
            timeout: default_request_timeout(),
        }
    }
}

/// NZB search settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// RSS search URL; the encoded query is appended
    #[serde(default = "default_search_url")]
    pub url: String,

    /// Directory fetched NZBs are written to (the daemon's scan directory)
    #[serde(default = "default_nzb_dir")]
    pub nzb_dir: PathBuf,

    /// Number of largest results considered (default: 5)
    #[serde(default = "default_top_items")]
    pub top_items: usize,

    /// Results more than this many MB smaller than the largest are dropped (0 = keep all)
    #[serde(default)]
    pub size_tolerance_mb: u64,

    /// HTTP timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// User agent sent with search requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: default_search_url(),
            nzb_dir: default_nzb_dir(),
            top_items: default_top_items(),
            size_tolerance_mb: 0,
            timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Secure copy settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Destination host (None = copy into a local or mounted destination)
    #[serde(default)]
    pub host: Option<String>,

    /// Remote user
    #[serde(default)]
    pub user: Option<String>,

    /// SSH port (default: 22)
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key passed to ssh/scp with `-i`
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Destination folder root
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            port: default_ssh_port(),
            identity_file: None,
            destination: default_destination(),
        }
    }
}

/// Retry configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Log output
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset (default: "info")
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Write to `file` instead of stdout
    #[serde(default)]
    pub log_to_file: bool,

    /// Log file path
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            log_to_file: false,
            file: default_log_file(),
        }
    }
}

impl Config {
    /// Load `path`, or validated defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {e}", path.display()),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the control loops cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.connection.host.trim().is_empty() {
            return Err(Error::config("connection.host", "must not be empty"));
        }
        if self.connection.port == 0 {
            return Err(Error::config("connection.port", "must not be zero"));
        }
        if self.server.scan_freq == 0 {
            return Err(Error::config("server.scan_freq", "must be greater than zero"));
        }
        if self.client.pulse_gap == 0 {
            return Err(Error::config("client.pulse_gap", "must be greater than zero"));
        }
        if let Some(mac) = &self.server.mac_addr {
            mac.parse::<MacAddr>()
                .map_err(|e| Error::config("server.mac_addr", e.to_string()))?;
        }
        url::Url::parse(&self.daemon.url)
            .map_err(|e| Error::config("daemon.url", e.to_string()))?;
        if self.daemon.success_statuses.is_empty() {
            return Err(Error::config(
                "daemon.success_statuses",
                "at least one success status is required",
            ));
        }
        if self.search.top_items == 0 {
            return Err(Error::config("search.top_items", "must be greater than zero"));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7700
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_broadcast_addr() -> String {
    "255.255.255.255:9".to_string()
}

fn default_scan_freq() -> u64 {
    10
}

fn default_job_descriptor() -> PathBuf {
    PathBuf::from("resource/req.json")
}

fn default_pulse_gap() -> u64 {
    5
}

fn default_progress_update_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_daemon_url() -> String {
    "http://127.0.0.1:6789/jsonrpc".to_string()
}

fn default_daemon_username() -> String {
    "nzbget".to_string()
}

fn default_daemon_password() -> String {
    "tegbzn6789".to_string()
}

fn default_process_name() -> String {
    "nzbget".to_string()
}

fn default_launch_args() -> Vec<String> {
    vec!["-D".to_string()]
}

fn default_success_statuses() -> Vec<String> {
    vec!["SUCCESS/UNPACK".to_string(), "SUCCESS/ALL".to_string()]
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_search_url() -> String {
    "http://nzbclub.com/nzbrss.aspx?q=".to_string()
}

fn default_nzb_dir() -> PathBuf {
    PathBuf::from("nzb")
}

fn default_top_items() -> usize {
    5
}

fn default_user_agent() -> String {
    format!("usenet-ctl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_ssh_port() -> u16 {
    22
}

fn default_destination() -> PathBuf {
    PathBuf::from("media")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("usenet-ctl.log")
}

// Duration serialization helper (stored as whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
