use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use mesh_protocol::{Frame, PeerAddress, ProtocolError, Record, RecordCodec};

use crate::error::NetworkError;

/// Local handle of one TCP link, unique for the lifetime of a [`PeerLinks`].
pub type ConnectionId = u64;

/// Two zero bytes: a frame of declared length 0.
const CLOSE_MARKER: [u8; 2] = [0, 0];

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    /// Capacity of the shared inbound event channel.
    pub channel_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            send_timeout: Duration::from_secs(1),
            channel_capacity: 1024,
        }
    }
}

/// Something that happened on a link's read side.
#[derive(Debug)]
pub enum LinkEvent {
    Record { conn: ConnectionId, record: Record },
    /// Orderly close (zero-length frame) or EOF.
    Closed { conn: ConnectionId },
    /// Undecodable input; the reader has stopped.
    Failed { conn: ConnectionId, error: ProtocolError },
}

impl LinkEvent {
    pub fn conn(&self) -> ConnectionId {
        match self {
            Self::Record { conn, .. } | Self::Closed { conn } | Self::Failed { conn, .. } => *conn,
        }
    }
}

struct Connection {
    writer: FramedWrite<OwnedWriteHalf, RecordCodec>,
    reader: JoinHandle<()>,
    peer: Option<PeerAddress>,
}

/// Every open link, inbound and outbound.
///
/// An accepted connection is anonymous until [`bind`](PeerLinks::bind) ties
/// it to the reply address found in one of its records. Liveness is not
/// tracked here; send failures are only reported.
pub struct PeerLinks {
    config: LinkConfig,
    next_id: ConnectionId,
    connections: HashMap<ConnectionId, Connection>,
    by_peer: HashMap<PeerAddress, ConnectionId>,
    events_tx: mpsc::Sender<LinkEvent>,
}

impl PeerLinks {
    pub fn new(config: LinkConfig) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity.max(1));
        let links = Self {
            config,
            next_id: 0,
            connections: HashMap::new(),
            by_peer: HashMap::new(),
            events_tx,
        };
        (links, events_rx)
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Open a link to `address`. A link already held for that address is
    /// replaced and closed.
    pub async fn connect(&mut self, address: &PeerAddress) -> Result<ConnectionId, NetworkError> {
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(address.as_str()),
        )
        .await
        .map_err(|_| NetworkError::Connect {
            address: address.clone(),
            reason: "timed out".to_string(),
        })?
        .map_err(|e| NetworkError::Connect {
            address: address.clone(),
            reason: e.to_string(),
        })?;

        let conn = self.register(stream);
        if let Some(old) = self.by_peer.remove(address) {
            tracing::debug!(peer = %address, old, new = conn, "Replacing existing link");
            self.shutdown(old, true);
        }
        self.by_peer.insert(address.clone(), conn);
        if let Some(c) = self.connections.get_mut(&conn) {
            c.peer = Some(address.clone());
        }
        tracing::debug!(peer = %address, conn, "Connected");
        Ok(conn)
    }

    /// Start reading from a stream. Used for accepted connections and by
    /// [`connect`](PeerLinks::connect).
    pub fn register(&mut self, stream: TcpStream) -> ConnectionId {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();
        let conn = self.next_id;
        self.next_id += 1;

        let reader = tokio::spawn(read_loop(conn, read_half, self.events_tx.clone()));
        self.connections.insert(
            conn,
            Connection {
                writer: FramedWrite::new(write_half, RecordCodec::new()),
                reader,
                peer: None,
            },
        );
        conn
    }

    /// Tie an anonymous link to `address`, unless `address` already has a
    /// link. Returns whether the binding happened.
    pub fn bind(&mut self, conn: ConnectionId, address: &PeerAddress) -> bool {
        if self.by_peer.contains_key(address) {
            return false;
        }
        let Some(connection) = self.connections.get_mut(&conn) else {
            return false;
        };
        if connection.peer.is_some() {
            return false;
        }
        connection.peer = Some(address.clone());
        self.by_peer.insert(address.clone(), conn);
        tracing::debug!(peer = %address, conn, "Bound inbound link");
        true
    }

    pub fn peer_of(&self, conn: ConnectionId) -> Option<&PeerAddress> {
        self.connections.get(&conn).and_then(|c| c.peer.as_ref())
    }

    pub fn is_connected(&self, address: &PeerAddress) -> bool {
        self.by_peer.contains_key(address)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Write one record to the link held for `address`.
    pub async fn send(&mut self, address: &PeerAddress, record: &Record) -> Result<(), NetworkError> {
        let connection = self
            .by_peer
            .get(address)
            .and_then(|conn| self.connections.get_mut(conn))
            .ok_or_else(|| NetworkError::NotConnected(address.clone()))?;

        match tokio::time::timeout(self.config.send_timeout, connection.writer.send(record)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(NetworkError::Send {
                address: address.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(NetworkError::Send {
                address: address.clone(),
                reason: "timed out".to_string(),
            }),
        }
    }

    /// Drop a link whose reader has stopped. Returns the peer it was bound
    /// to, if any.
    pub fn close(&mut self, conn: ConnectionId) -> Option<PeerAddress> {
        self.shutdown(conn, false)
    }

    /// Close the link to `address`, telling the peer with a close marker.
    pub fn disconnect(&mut self, address: &PeerAddress) {
        if let Some(conn) = self.by_peer.get(address).copied() {
            self.shutdown(conn, true);
        }
    }

    fn shutdown(&mut self, conn: ConnectionId, notify: bool) -> Option<PeerAddress> {
        let connection = self.connections.remove(&conn)?;
        connection.reader.abort();
        if let Some(peer) = &connection.peer {
            if self.by_peer.get(peer) == Some(&conn) {
                self.by_peer.remove(peer);
            }
        }
        if notify {
            let mut write_half = connection.writer.into_inner();
            tokio::spawn(async move {
                let _ = write_half.write_all(&CLOSE_MARKER).await;
                let _ = write_half.shutdown().await;
            });
        }
        connection.peer
    }
}

async fn read_loop(conn: ConnectionId, read_half: OwnedReadHalf, events: mpsc::Sender<LinkEvent>) {
    let mut frames = FramedRead::new(read_half, RecordCodec::new());
    loop {
        let event = match frames.next().await {
            Some(Ok(Frame::Record(record))) => LinkEvent::Record { conn, record },
            Some(Ok(Frame::Closed)) | None => LinkEvent::Closed { conn },
            Some(Err(error)) => LinkEvent::Failed { conn, error },
        };
        let last = !matches!(event, LinkEvent::Record { .. });
        if events.send(event).await.is_err() || last {
            break;
        }
    }
}
