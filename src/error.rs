//! Error types for usenet-ctl
//!
//! Errors are grouped by the layer that produces them:
//! - [`CodecError`] for binary framing of control-plane messages
//! - [`ParseError`] for the JSON-lite tokenizer and RPC envelopes
//! - [`TransportError`] for connections, sends and the wake packet
//! - [`CollaboratorError`] for the search, daemon, process and copy collaborators
//!
//! None of these are fatal to a running control loop. Inbound codec and parse
//! failures drop the message, collaborator failures skip the job for one cycle.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for usenet-ctl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for usenet-ctl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "client.pulse_gap")
        key: Option<String>,
    },

    /// Message framing error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// JSON-lite or RPC envelope error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Connection or send failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An external collaborator (search, daemon, copy) failed
    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Binary framing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Buffer ended before the header or the declared body was complete
    #[error("truncated frame: expected {expected} bytes, {available} available")]
    Truncated {
        /// Bytes required by the header and declared body length
        expected: usize,
        /// Bytes actually present
        available: usize,
    },

    /// Instruction tag outside the known range
    #[error("unknown instruction tag {0}")]
    UnknownInstruction(u8),

    /// Declared body length exceeds what a stream reader will accept
    #[error("frame body of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Declared body length
        len: u64,
        /// Accepted maximum
        max: u64,
    },
}

/// JSON-lite tokenizer and RPC envelope errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Unbalanced braces/brackets, unterminated string or stray characters
    #[error("malformed document: {0}")]
    Malformed(String),

    /// A required key is absent
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Token was not of the kind the accessor needs
    #[error("expected {expected}, found {found}")]
    UnexpectedKind {
        /// Kind the accessor required
        expected: &'static str,
        /// Kind that was present
        found: &'static str,
    },
}

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// No peer connection is currently established
    #[error("not connected")]
    NotConnected,

    /// The peer connection was closed while an operation was in progress
    #[error("connection lost")]
    ConnectionLost,

    /// Queuing or writing a message failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Listening socket could not be bound
    #[error("failed to bind {addr}: {reason}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying failure
        reason: String,
    },

    /// MAC address string could not be parsed
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    /// Magic packet could not be sent
    #[error("magic packet failed: {0}")]
    MagicPacket(String),

    /// The previous pulse was never acknowledged
    #[error("peer did not acknowledge pulse")]
    LivenessTimeout,
}

/// Failures reported by the external collaborators
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Search or NZB fetch failed
    #[error("search failed: {0}")]
    Search(String),

    /// Download daemon RPC failed or returned an error object
    #[error("download daemon error: {0}")]
    Daemon(String),

    /// Secure copy failed
    #[error("transfer of {} to {dest} failed: {reason}", path.display())]
    Transfer {
        /// Local source file
        path: PathBuf,
        /// Remote or local destination
        dest: String,
        /// Underlying failure
        reason: String,
    },

    /// Process lookup or daemon launch failed
    #[error("process error: {0}")]
    Process(String),

    /// No eligible video file in a finished job's directory
    #[error("no video file found in {}", dir.display())]
    VideoNotFound {
        /// Directory that was scanned
        dir: PathBuf,
    },
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
