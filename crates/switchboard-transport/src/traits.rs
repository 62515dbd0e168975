//! Transport abstraction traits for Switchboard.
//!
//! A [`Connection`] is split into a [`FrameReader`] and a [`FrameWriter`] so
//! the inbound and outbound pumps of a session can each own one half and
//! run without sharing a lock.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Counter mixed into generated IDs so two connections accepted within the
/// same nanosecond still differ.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
///
/// Every variant is fatal to the connection that produced it.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the connection, or the stream ended.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Nothing arrived from the peer within the idle window.
    #[error("No inbound traffic for {0:?}")]
    IdleTimeout(Duration),

    /// A write did not complete before its deadline.
    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    /// The peer sent a frame larger than allowed.
    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The WebSocket handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How outbound payloads are framed on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameKind {
    /// Text frames. Payloads that are not valid UTF-8 go out as binary.
    #[default]
    Text,
    /// Binary frames.
    Binary,
}

/// Limits and deadlines applied to every connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_size: usize,
    /// Deadline for a single write (or batch of writes) to complete.
    pub write_timeout: Duration,
    /// Read fails when nothing, not even a pong, arrives within this window.
    pub idle_timeout: Duration,
    /// Framing for outbound payloads.
    pub frame_kind: FrameKind,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 512,
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            frame_kind: FrameKind::Text,
        }
    }
}

/// The receiving half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Wait for the next inbound data frame.
    ///
    /// Control traffic (pings, pongs) is consumed internally and only resets
    /// the idle window.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] when the peer closes,
    /// [`TransportError::IdleTimeout`] when the idle window lapses and
    /// [`TransportError::FrameTooLarge`] for an oversize frame.
    async fn read_frame(&mut self) -> Result<Bytes, TransportError>;
}

/// The sending half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one frame and flush it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or misses its deadline.
    async fn write_frame(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Write several frames, in order.
    ///
    /// Adapters that can buffer override this to flush once for the batch.
    ///
    /// # Errors
    ///
    /// Returns an error on the first frame that fails.
    async fn write_batch(&mut self, frames: Vec<Bytes>) -> Result<(), TransportError> {
        for frame in frames {
            self.write_frame(frame).await?;
        }
        Ok(())
    }

    /// Send a keepalive probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or misses its deadline.
    async fn write_ping(&mut self) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close frame could not be sent.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An accepted connection, ready to be split between two pumps.
pub trait Connection: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Split into independently owned read and write halves.
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);
}

/// A transport that can accept connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method blocks until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;
}
