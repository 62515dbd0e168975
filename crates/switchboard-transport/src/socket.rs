//! Frame reader and writer shared by the WebSocket adapters.
//!
//! axum and tokio-tungstenite each have their own message type; both are
//! mapped onto [`WsMessage`] so the deadline and size rules live in one place.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{trace, warn};

use crate::traits::{ConnectionConfig, ConnectionId, FrameKind, FrameReader, FrameWriter, TransportError};

/// What an inbound WebSocket message means to a reader.
pub(crate) enum Incoming {
    /// Application data.
    Data(Bytes),
    /// Ping, pong or raw frame. Only counts as liveness.
    Control,
    /// The peer is closing.
    Close,
}

/// A WebSocket message type from one of the supported libraries.
pub(crate) trait WsMessage: Sized + Send {
    fn classify(self) -> Incoming;
    fn data(payload: Bytes, kind: FrameKind) -> Self;
    fn ping() -> Self;
}

/// Run a write under the connection's deadline.
pub(crate) async fn with_deadline<F, E>(limit: Duration, write: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    match timeout(limit, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransportError::SendFailed(e.to_string())),
        Err(_) => Err(TransportError::WriteTimeout(limit)),
    }
}

/// Split text payloads from binary ones, falling back to binary for
/// anything that is not UTF-8.
pub(crate) fn text_or_binary(payload: Bytes, kind: FrameKind) -> Result<String, Vec<u8>> {
    match kind {
        FrameKind::Text => String::from_utf8(payload.to_vec()).map_err(|e| e.into_bytes()),
        FrameKind::Binary => Err(payload.to_vec()),
    }
}

/// Reading half of a WebSocket.
pub(crate) struct SocketReader<S> {
    stream: S,
    id: ConnectionId,
    max_frame_size: usize,
    idle_timeout: Duration,
}

impl<S> SocketReader<S> {
    pub(crate) fn new(stream: S, id: ConnectionId, config: &ConnectionConfig) -> Self {
        Self {
            stream,
            id,
            max_frame_size: config.max_frame_size,
            idle_timeout: config.idle_timeout,
        }
    }
}

#[async_trait]
impl<S, M, E> FrameReader for SocketReader<S>
where
    S: Stream<Item = Result<M, E>> + Unpin + Send,
    M: WsMessage,
    E: fmt::Display + Send,
{
    async fn read_frame(&mut self) -> Result<Bytes, TransportError> {
        loop {
            let next = timeout(self.idle_timeout, self.stream.next())
                .await
                .map_err(|_| TransportError::IdleTimeout(self.idle_timeout))?;

            match next {
                Some(Ok(message)) => match message.classify() {
                    Incoming::Data(data) => {
                        if data.len() > self.max_frame_size {
                            warn!(
                                connection = %self.id,
                                size = data.len(),
                                max = self.max_frame_size,
                                "Frame too large"
                            );
                            return Err(TransportError::FrameTooLarge {
                                size: data.len(),
                                max: self.max_frame_size,
                            });
                        }
                        return Ok(data);
                    }
                    Incoming::Control => {
                        trace!(connection = %self.id, "Control frame");
                    }
                    Incoming::Close => return Err(TransportError::ConnectionClosed),
                },
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }
}

/// Writing half of a WebSocket.
pub(crate) struct SocketWriter<K, M> {
    sink: K,
    write_timeout: Duration,
    frame_kind: FrameKind,
    _message: PhantomData<fn(M)>,
}

impl<K, M> SocketWriter<K, M> {
    pub(crate) fn new(sink: K, config: &ConnectionConfig) -> Self {
        Self {
            sink,
            write_timeout: config.write_timeout,
            frame_kind: config.frame_kind,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<K, M> FrameWriter for SocketWriter<K, M>
where
    K: Sink<M> + Unpin + Send,
    K::Error: fmt::Display + Send,
    M: WsMessage,
{
    async fn write_frame(&mut self, payload: Bytes) -> Result<(), TransportError> {
        let message = M::data(payload, self.frame_kind);
        with_deadline(self.write_timeout, self.sink.send(message)).await
    }

    async fn write_batch(&mut self, frames: Vec<Bytes>) -> Result<(), TransportError> {
        let kind = self.frame_kind;
        let sink = &mut self.sink;
        with_deadline(self.write_timeout, async move {
            for frame in frames {
                sink.feed(M::data(frame, kind)).await?;
            }
            sink.flush().await
        })
        .await
    }

    async fn write_ping(&mut self) -> Result<(), TransportError> {
        with_deadline(self.write_timeout, self.sink.send(M::ping())).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        with_deadline(self.write_timeout, self.sink.close()).await
    }
}
