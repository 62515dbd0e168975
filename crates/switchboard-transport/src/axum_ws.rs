//! Adapter for sockets produced by axum's `WebSocketUpgrade`.
//!
//! The upgrade handler is responsible for applying the frame size limit at
//! handshake time (`WebSocketUpgrade::max_message_size`); the reader checks
//! it again so the limit holds whichever way the socket was built.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::StreamExt;
use std::net::SocketAddr;

use crate::socket::{text_or_binary, Incoming, SocketReader, SocketWriter, WsMessage};
use crate::traits::{
    Connection, ConnectionConfig, ConnectionId, FrameKind, FrameReader, FrameWriter,
};

impl WsMessage for Message {
    fn classify(self) -> Incoming {
        match self {
            Message::Binary(data) => Incoming::Data(Bytes::from(data)),
            Message::Text(text) => Incoming::Data(Bytes::from(text.into_bytes())),
            Message::Ping(_) | Message::Pong(_) => Incoming::Control,
            Message::Close(_) => Incoming::Close,
        }
    }

    fn data(payload: Bytes, kind: FrameKind) -> Self {
        match text_or_binary(payload, kind) {
            Ok(text) => Message::Text(text),
            Err(binary) => Message::Binary(binary),
        }
    }

    fn ping() -> Self {
        Message::Ping(Vec::new())
    }
}

/// A WebSocket handed over by axum after a successful upgrade.
pub struct AxumConnection {
    id: ConnectionId,
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    config: ConnectionConfig,
}

impl AxumConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket, config: ConnectionConfig) -> Self {
        Self {
            id: ConnectionId::generate(),
            socket,
            remote_addr: None,
            config,
        }
    }

    /// Record the peer address, when the server knows it.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl Connection for AxumConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let this = *self;
        let (sink, stream) = this.socket.split();
        let reader = SocketReader::new(stream, this.id, &this.config);
        let writer = SocketWriter::<_, Message>::new(sink, &this.config);
        (Box::new(reader), Box::new(writer))
    }
}
