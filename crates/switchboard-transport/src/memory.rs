//! In-memory connection pair.
//!
//! [`pair`] returns a [`MemoryConnection`] that behaves like an accepted
//! socket and a [`MemoryPeer`] that plays the remote client. The peer's
//! receive buffer is bounded, so a peer that stops reading stalls writes the
//! same way a dead TCP peer does.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::warn;

use crate::socket::with_deadline;
use crate::traits::{
    Connection, ConnectionConfig, ConnectionId, FrameReader, FrameWriter, TransportError,
};

/// What the connection wrote towards the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// A data frame.
    Frame(Bytes),
    /// A keepalive probe.
    Ping,
    /// A close frame.
    Close,
}

enum PeerInput {
    Frame(Bytes),
    Pong,
}

/// Create a connected pair.
///
/// `wire_capacity` bounds how many events the peer may leave unread before
/// writes on the connection start to block.
#[must_use]
pub fn pair(config: ConnectionConfig, wire_capacity: usize) -> (MemoryConnection, MemoryPeer) {
    let (input_tx, input_rx) = mpsc::channel(wire_capacity.max(1));
    let (wire_tx, wire_rx) = mpsc::channel(wire_capacity.max(1));

    let connection = MemoryConnection {
        id: ConnectionId::generate(),
        config,
        input: input_rx,
        wire: wire_tx,
    };
    let peer = MemoryPeer {
        input: input_tx,
        wire: wire_rx,
    };

    (connection, peer)
}

/// Server side of an in-memory pair.
pub struct MemoryConnection {
    id: ConnectionId,
    config: ConnectionConfig,
    input: mpsc::Receiver<PeerInput>,
    wire: mpsc::Sender<WireEvent>,
}

impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let this = *self;
        let reader = MemoryReader {
            input: this.input,
            max_frame_size: this.config.max_frame_size,
            idle_timeout: this.config.idle_timeout,
        };
        let writer = MemoryWriter {
            wire: this.wire,
            write_timeout: this.config.write_timeout,
        };
        (Box::new(reader), Box::new(writer))
    }
}

struct MemoryReader {
    input: mpsc::Receiver<PeerInput>,
    max_frame_size: usize,
    idle_timeout: std::time::Duration,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Bytes, TransportError> {
        loop {
            let next = timeout(self.idle_timeout, self.input.recv())
                .await
                .map_err(|_| TransportError::IdleTimeout(self.idle_timeout))?;

            match next {
                Some(PeerInput::Frame(data)) => {
                    if data.len() > self.max_frame_size {
                        warn!(size = data.len(), max = self.max_frame_size, "Frame too large");
                        return Err(TransportError::FrameTooLarge {
                            size: data.len(),
                            max: self.max_frame_size,
                        });
                    }
                    return Ok(data);
                }
                Some(PeerInput::Pong) => continue,
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }
}

struct MemoryWriter {
    wire: mpsc::Sender<WireEvent>,
    write_timeout: std::time::Duration,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, payload: Bytes) -> Result<(), TransportError> {
        with_deadline(self.write_timeout, self.wire.send(WireEvent::Frame(payload))).await
    }

    async fn write_ping(&mut self) -> Result<(), TransportError> {
        with_deadline(self.write_timeout, self.wire.send(WireEvent::Ping)).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        with_deadline(self.write_timeout, self.wire.send(WireEvent::Close)).await
    }
}

/// Client side of an in-memory pair.
pub struct MemoryPeer {
    input: mpsc::Sender<PeerInput>,
    wire: mpsc::Receiver<WireEvent>,
}

impl MemoryPeer {
    /// Send a data frame to the connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the reading half is gone.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<(), TransportError> {
        self.input
            .send(PeerInput::Frame(payload.into()))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Answer a keepalive probe.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the reading half is gone.
    pub async fn pong(&self) -> Result<(), TransportError> {
        self.input
            .send(PeerInput::Pong)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Wait for the next thing the connection wrote.
    ///
    /// Returns `None` once the writing half has been dropped.
    pub async fn recv(&mut self) -> Option<WireEvent> {
        self.wire.recv().await
    }

    /// Wait for the next data frame, skipping pings.
    ///
    /// Returns `None` on a close frame or once the writing half is gone.
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.wire.recv().await? {
                WireEvent::Frame(data) => return Some(data),
                WireEvent::Ping => continue,
                WireEvent::Close => return None,
            }
        }
    }

    /// Take whatever the connection wrote without waiting.
    pub fn try_recv(&mut self) -> Option<WireEvent> {
        self.wire.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            max_frame_size: 8,
            write_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pair_exchanges_frames() {
        let (conn, mut peer) = pair(config(), 4);
        let (mut reader, mut writer) = Box::new(conn).split();

        peer.send(&b"ping"[..]).await.unwrap();
        assert_eq!(&reader.read_frame().await.unwrap()[..], b"ping");

        writer.write_frame(Bytes::from_static(b"pong")).await.unwrap();
        writer.write_ping().await.unwrap();
        assert_eq!(peer.recv().await, Some(WireEvent::Frame(Bytes::from_static(b"pong"))));
        assert_eq!(peer.recv().await, Some(WireEvent::Ping));
    }

    #[tokio::test]
    async fn test_oversize_frame() {
        let (conn, peer) = pair(config(), 4);
        let (mut reader, _writer) = Box::new(conn).split();

        peer.send(vec![0u8; 9]).await.unwrap();
        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::FrameTooLarge { size: 9, max: 8 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_resets_idle_window() {
        let (conn, peer) = pair(config(), 4);
        let (mut reader, _writer) = Box::new(conn).split();

        let read = tokio::spawn(async move { reader.read_frame().await });

        tokio::time::sleep(Duration::from_secs(4)).await;
        peer.pong().await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        peer.send(&b"late"[..]).await.unwrap();

        assert_eq!(&read.await.unwrap().unwrap()[..], b"late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let (conn, _peer) = pair(config(), 4);
        let (mut reader, _writer) = Box::new(conn).split();

        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::IdleTimeout(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_peer_hits_write_deadline() {
        let (conn, _peer) = pair(config(), 1);
        let (_reader, mut writer) = Box::new(conn).split();

        writer.write_frame(Bytes::from_static(b"one")).await.unwrap();
        assert!(matches!(
            writer.write_frame(Bytes::from_static(b"two")).await,
            Err(TransportError::WriteTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_peer_closes_reader() {
        let (conn, peer) = pair(config(), 1);
        let (mut reader, _writer) = Box::new(conn).split();

        drop(peer);
        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
