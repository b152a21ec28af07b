//! # usenet-ctl
//!
//! Control plane for a remote Usenet download box.
//!
//! Two processes talk over a small framed protocol:
//!
//! - the **server** (controller) wakes the download machine, hands it a job
//!   request read from a job-descriptor file, and restarts the cycle when that
//!   file changes;
//! - the **client** (controlled machine) searches for and fetches NZBs, makes
//!   sure the NZBGet daemon is running, then polls its history, renames each
//!   finished payload and copies it to the media destination.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use usenet_ctl::{Config, Server, ServerSettings, shutdown_on_signal};
//! use usenet_ctl::transport::{TcpServerTransport, UdpWakeOnLan};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let shutdown = shutdown_on_signal();
//!
//!     let (tx, rx) = mpsc::unbounded_channel();
//!     let listener = TcpServerTransport::bind(&config.connection.address()).await?;
//!     let (transport, _io) = TcpServerTransport::spawn(listener, tx, shutdown.clone());
//!
//!     let wol = Arc::new(UdpWakeOnLan::new(config.server.broadcast_addr.clone()));
//!     let server = Server::new(
//!         ServerSettings::from_config(&config, None)?,
//!         Arc::new(transport),
//!         Some(wol),
//!     );
//!     server.run(rx, shutdown).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Client control loop
pub mod client;
/// Configuration types
pub mod config;
/// Download daemon RPC and process control
pub mod daemon;
/// Error types
pub mod error;
/// Daemon job records and payload renaming
pub mod job;
/// Log subscriber setup
pub mod logging;
/// Wire codec and RPC envelopes
pub mod protocol;
/// Retry logic with exponential backoff
pub mod retry;
/// NZB search and fetch
pub mod search;
/// Server control loop
pub mod server;
/// Payload transfer
pub mod transfer;
/// Connection transports and wake-on-LAN
pub mod transport;
/// Core protocol types
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use client::{Client, ClientEvent, ClientSession, ClientSettings, ClientState, Collaborators};
pub use config::Config;
pub use error::{CodecError, CollaboratorError, Error, ParseError, Result, TransportError};
pub use job::JobRecord;
pub use protocol::{RpcEnvelope, RpcFunction};
pub use server::{Server, ServerSession, ServerSettings, ServerState};
pub use types::{ConnId, InstructionKind, Message, WorkerId};

use tokio_util::sync::CancellationToken;

/// Token that is cancelled on the first termination signal
///
/// Both control loops check it every tick, so a signal stops them between
/// handlers rather than mid-dispatch.
///
/// # Example
///
/// ```no_run
/// # async fn demo() {
/// let shutdown = usenet_ctl::shutdown_on_signal();
/// shutdown.cancelled().await;
/// # }
/// ```
pub fn shutdown_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });
    token
}

/// Wait for a termination signal
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("received SIGINT, shutting down");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("received SIGTERM, shutting down");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

/// Wait for a termination signal (Ctrl+C)
#[cfg(not(unix))]
pub async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received Ctrl+C, shutting down"),
        Err(e) => tracing::error!(error = %e, "failed to listen for Ctrl+C"),
    }
}
