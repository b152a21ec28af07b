//! Wake-on-LAN magic packets

use super::WakeOnLan;
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use tokio::net::UdpSocket;

/// Length of a magic packet: 6 sync bytes plus 16 copies of the MAC
pub const MAGIC_PACKET_LEN: usize = 6 + 16 * 6;

/// 48-bit hardware address
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = TransportError;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(TransportError::InvalidMac(s.to_string()));
        }
        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(&parts) {
            if part.len() != 2 {
                return Err(TransportError::InvalidMac(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| TransportError::InvalidMac(s.to_string()))?;
        }
        Ok(MacAddr(bytes))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Build the magic packet for `mac`
pub fn magic_packet(mac: &MacAddr) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac.0);
    }
    packet
}

/// Sends magic packets as UDP broadcasts
#[derive(Clone, Debug)]
pub struct UdpWakeOnLan {
    target: String,
}

impl UdpWakeOnLan {
    /// Send to `target`, usually `255.255.255.255:9`
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

#[async_trait]
impl WakeOnLan for UdpWakeOnLan {
    async fn wake(&self, mac: &MacAddr) -> Result<()> {
        let packet = magic_packet(mac);
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| TransportError::MagicPacket(e.to_string()))?;
        socket
            .set_broadcast(true)
            .map_err(|e| TransportError::MagicPacket(e.to_string()))?;
        socket
            .send_to(&packet, &self.target)
            .await
            .map_err(|e| TransportError::MagicPacket(format!("{}: {e}", self.target)))?;
        tracing::info!(%mac, target = %self.target, "magic packet sent");
        Ok(())
    }
}
