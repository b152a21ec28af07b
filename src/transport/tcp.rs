//! TCP transport: framed messages over one stream per peer

use super::{ConnectionSink, MessageSink, TransportEvent};
use crate::error::{Result, TransportError};
use crate::protocol::codec::{read_message, write_message};
use crate::types::{ConnId, Message};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Outbox = mpsc::UnboundedSender<Message>;

/// Client side: keeps one connection to the server alive, reconnecting as needed
#[derive(Clone)]
pub struct TcpClientTransport {
    outbox: Arc<RwLock<Option<Outbox>>>,
}

impl TcpClientTransport {
    /// Start the connect/reconnect task
    ///
    /// Events are delivered on `events` until `cancel` fires.
    pub fn spawn(
        addr: String,
        reconnect_interval: Duration,
        events: mpsc::UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let transport = Self {
            outbox: Arc::new(RwLock::new(None)),
        };
        let outbox = transport.outbox.clone();
        let handle = tokio::spawn(async move {
            run_client(addr, reconnect_interval, outbox, events, cancel).await;
        });
        (transport, handle)
    }

    /// Whether a connection is currently established
    pub fn is_connected(&self) -> bool {
        self.outbox
            .read()
            .map(|guard| guard.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }
}

impl MessageSink for TcpClientTransport {
    fn send(&self, msg: Message) -> Result<()> {
        let guard = self
            .outbox
            .read()
            .map_err(|_| TransportError::SendFailed("outbox lock poisoned".into()))?;
        let tx = guard.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(msg).map_err(|_| TransportError::ConnectionLost)?;
        Ok(())
    }
}

fn set_outbox(outbox: &RwLock<Option<Outbox>>, value: Option<Outbox>) {
    match outbox.write() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}

async fn run_client(
    addr: String,
    reconnect_interval: Duration,
    outbox: Arc<RwLock<Option<Outbox>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    let mut next_id = 0u64;

    loop {
        let connect = tokio::select! {
            _ = cancel.cancelled() => return,
            result = TcpStream::connect(&addr) => result,
        };

        match connect {
            Ok(stream) => {
                next_id += 1;
                let conn = ConnId(next_id);
                tracing::info!(%addr, %conn, "connected to server");
                let _ = stream.set_nodelay(true);
                let (reader, writer) = stream.into_split();

                let (tx, rx) = mpsc::unbounded_channel();
                set_outbox(&outbox, Some(tx));
                let writer_task = tokio::spawn(write_loop(conn, writer, rx));

                if events.send(TransportEvent::Connected(conn)).is_err() {
                    writer_task.abort();
                    return;
                }
                let stopped = read_loop(conn, reader, &events, &cancel).await;

                set_outbox(&outbox, None);
                writer_task.abort();
                let _ = events.send(TransportEvent::Closed(conn));
                tracing::info!(%conn, "disconnected from server");
                if stopped {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connect failed");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(reconnect_interval) => {}
        }
    }
}

/// Reads until the stream ends; returns true when stopped by cancellation
async fn read_loop(
    conn: ConnId,
    mut reader: OwnedReadHalf,
    events: &mpsc::UnboundedSender<TransportEvent>,
    cancel: &CancellationToken,
) -> bool {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return true,
            next = read_message(&mut reader) => next,
        };
        match next {
            Ok(Some(msg)) => {
                tracing::trace!(%conn, instruction = %msg.instruction, len = msg.body.len(), "frame received");
                if events.send(TransportEvent::Message(conn, msg)).is_err() {
                    return true;
                }
            }
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(%conn, error = %e, "dropping connection after read error");
                return false;
            }
        }
    }
}

async fn write_loop(conn: ConnId, mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_message(&mut writer, &msg).await {
            tracing::warn!(%conn, instruction = %msg.instruction, error = %e, "send failed");
            break;
        }
    }
}

/// Server side: accepts any number of connections and routes replies by [`ConnId`]
#[derive(Clone, Default)]
pub struct TcpServerTransport {
    conns: Arc<RwLock<HashMap<ConnId, Outbox>>>,
}

impl TcpServerTransport {
    /// Bind the listening socket
    ///
    /// This is the only transport failure that is fatal at startup.
    pub async fn bind(addr: &str) -> Result<TcpListener> {
        TcpListener::bind(addr).await.map_err(|e| {
            TransportError::Bind {
                addr: addr.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Start accepting on `listener`
    pub fn spawn(
        listener: TcpListener,
        events: mpsc::UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let transport = Self::default();
        let conns = transport.conns.clone();
        let handle = tokio::spawn(async move {
            accept_loop(listener, conns, events, cancel).await;
        });
        (transport, handle)
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.conns.read().map(|c| c.len()).unwrap_or(0)
    }
}

impl ConnectionSink for TcpServerTransport {
    fn send_to(&self, conn: ConnId, msg: Message) -> Result<()> {
        let conns = self
            .conns
            .read()
            .map_err(|_| TransportError::SendFailed("connection table lock poisoned".into()))?;
        let tx = conns.get(&conn).ok_or(TransportError::NotConnected)?;
        tx.send(msg).map_err(|_| TransportError::ConnectionLost)?;
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    conns: Arc<RwLock<HashMap<ConnId, Outbox>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    let mut next_id = 0u64;

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };

        next_id += 1;
        let conn = ConnId(next_id);
        tracing::info!(%conn, %peer, "client connected");
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut table) = conns.write() {
            table.insert(conn, tx);
        }
        if events.send(TransportEvent::Connected(conn)).is_err() {
            return;
        }

        let conns = conns.clone();
        let events = events.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let writer_task = tokio::spawn(write_loop(conn, writer, rx));
            read_loop(conn, reader, &events, &cancel).await;
            if let Ok(mut table) = conns.write() {
                table.remove(&conn);
            }
            writer_task.abort();
            let _ = events.send(TransportEvent::Closed(conn));
            tracing::info!(%conn, "client disconnected");
        });
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::InstructionKind;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_client_send_without_connection_fails() {
        let (events, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        // Port 9 on loopback is not listening in test environments
        let (client, handle) =
            TcpClientTransport::spawn("127.0.0.1:9".into(), Duration::from_secs(60), events, cancel.clone());

        let err = client.send(Message::pulse()).unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::NotConnected)));
        assert!(!client.is_connected());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_round_trip_between_client_and_server() {
        let cancel = CancellationToken::new();
        let listener = TcpServerTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (server_tx, mut server_rx) = mpsc::unbounded_channel();
        let (server, _server_task) = TcpServerTransport::spawn(listener, server_tx, cancel.clone());

        let (client_tx, mut client_rx) = mpsc::unbounded_channel();
        let (client, _client_task) =
            TcpClientTransport::spawn(addr, Duration::from_millis(50), client_tx, cancel.clone());

        let conn = match next_event(&mut server_rx).await {
            TransportEvent::Connected(conn) => conn,
            other => panic!("unexpected event {other:?}"),
        };
        assert!(matches!(next_event(&mut client_rx).await, TransportEvent::Connected(_)));

        server.send_to(conn, Message::command()).unwrap();
        match next_event(&mut client_rx).await {
            TransportEvent::Message(_, msg) => assert_eq!(msg.instruction, InstructionKind::Command),
            other => panic!("unexpected event {other:?}"),
        }

        client.send(Message::response()).unwrap();
        assert_eq!(
            next_event(&mut server_rx).await,
            TransportEvent::Message(conn, Message::response())
        );

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_server_reports_close_and_forgets_connection() {
        let cancel = CancellationToken::new();
        let listener = TcpServerTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (server, _task) = TcpServerTransport::spawn(listener, tx, cancel.clone());

        let stream = TcpStream::connect(addr).await.unwrap();
        let conn = match next_event(&mut rx).await {
            TransportEvent::Connected(conn) => conn,
            other => panic!("unexpected event {other:?}"),
        };
        drop(stream);

        assert_eq!(next_event(&mut rx).await, TransportEvent::Closed(conn));
        assert_eq!(server.connection_count(), 0);
        assert!(server.send_to(conn, Message::pulse()).is_err());

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_bind_failure_is_bind_error() {
        let err = TcpServerTransport::bind("127.0.0.1").await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Bind { .. })));
    }
}
