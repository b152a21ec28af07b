//! Message transport between the controller and the controlled machine
//!
//! I/O runs on transport-owned tasks. Everything they observe is forwarded as a
//! [`TransportEvent`] over a channel to the single control loop that owns the
//! session state, and the loop replies through a non-blocking sink.

use crate::error::Result;
use crate::types::{ConnId, Message};
use async_trait::async_trait;

pub mod tcp;
pub mod wol;

pub use tcp::{TcpClientTransport, TcpServerTransport};
pub use wol::{MacAddr, UdpWakeOnLan};

/// Something that happened on a connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer connection was established
    Connected(ConnId),
    /// A complete message arrived
    Message(ConnId, Message),
    /// The connection ended, cleanly or not
    Closed(ConnId),
}

/// Outbound path to the single peer of a client
pub trait MessageSink: Send + Sync {
    /// Queue a message for the current connection
    ///
    /// Fails with [`TransportError::NotConnected`](crate::error::TransportError::NotConnected)
    /// when there is no connection. Never blocks.
    fn send(&self, msg: Message) -> Result<()>;
}

/// Outbound path to a specific accepted connection
pub trait ConnectionSink: Send + Sync {
    /// Queue a message for `conn`
    fn send_to(&self, conn: ConnId, msg: Message) -> Result<()>;
}

/// Wake-on-LAN sender
#[async_trait]
pub trait WakeOnLan: Send + Sync {
    /// Send a magic packet for `mac`
    async fn wake(&self, mac: &MacAddr) -> Result<()>;
}
