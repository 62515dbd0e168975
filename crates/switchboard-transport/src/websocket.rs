//! WebSocket transport implementation.
//!
//! This module provides a standalone WebSocket listener using tokio-tungstenite,
//! for deployments that do not route the upgrade through axum.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async_with_config,
    tungstenite::{protocol::WebSocketConfig as TungsteniteConfig, Message},
    WebSocketStream,
};
use tracing::{debug, info};

use crate::socket::{text_or_binary, Incoming, SocketReader, SocketWriter, WsMessage};
use crate::traits::{
    Connection, ConnectionConfig, ConnectionId, FrameKind, FrameReader, FrameWriter, Transport,
    TransportError,
};

impl WsMessage for Message {
    fn classify(self) -> Incoming {
        match self {
            Message::Binary(data) => Incoming::Data(Bytes::from(data)),
            Message::Text(text) => Incoming::Data(Bytes::from(text.into_bytes())),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Incoming::Control,
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

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Limits applied to every accepted connection.
    pub connection: ConnectionConfig,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            connection: ConnectionConfig::default(),
        }
    }
}

/// WebSocket transport.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr).await?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new WebSocket transport with default limits.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    fn handshake_config(&self) -> TungsteniteConfig {
        let mut ws_config = TungsteniteConfig::default();
        ws_config.max_message_size = Some(self.config.connection.max_frame_size);
        ws_config.max_frame_size = Some(self.config.connection.max_frame_size);
        ws_config
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, addr) = self.listener.accept().await?;

        debug!("Accepted TCP connection from {}", addr);

        let ws_stream = accept_async_with_config(stream, Some(self.handshake_config()))
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        debug!("WebSocket handshake completed with {}", addr);

        let conn = WebSocketConnection::new(ws_stream, addr, self.config.connection.clone());
        Ok(Box::new(conn))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A WebSocket connection accepted by [`WebSocketTransport`].
pub struct WebSocketConnection {
    id: ConnectionId,
    stream: WebSocketStream<TcpStream>,
    remote_addr: SocketAddr,
    config: ConnectionConfig,
}

impl WebSocketConnection {
    fn new(
        stream: WebSocketStream<TcpStream>,
        remote_addr: SocketAddr,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            stream,
            remote_addr,
            config,
        }
    }
}

impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.remote_addr.to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let this = *self;
        let (sink, stream) = this.stream.split();
        let reader = SocketReader::new(stream, this.id, &this.config);
        let writer = SocketWriter::<_, Message>::new(sink, &this.config);
        (Box::new(reader), Box::new(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    async fn listen(connection: ConnectionConfig) -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::new(WebSocketConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            connection,
        })
        .await
        .unwrap();
        let url = format!("ws://{}", transport.local_addr().unwrap());
        (transport, url)
    }

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.connection.max_frame_size, 512);
    }

    #[tokio::test]
    async fn test_frames_cross_the_wire() {
        let (transport, url) = listen(ConnectionConfig::default()).await;

        let client = tokio::spawn(async move {
            let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
            ws.send(Message::Text("hello".into())).await.unwrap();
            let echoed = ws.next().await.unwrap().unwrap();
            assert_eq!(echoed, Message::Text("hello".into()));
        });

        let conn = transport.accept().await.unwrap();
        assert!(conn.remote_addr().is_some());
        let (mut reader, mut writer) = conn.split();

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(&frame[..], b"hello");
        writer.write_batch(vec![frame]).await.unwrap();

        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversize_frame_is_rejected() {
        let config = ConnectionConfig {
            max_frame_size: 16,
            ..Default::default()
        };
        let (transport, url) = listen(config).await;

        let client = tokio::spawn(async move {
            let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
            let _ = ws.send(Message::Binary(vec![0u8; 64])).await;
            // Hold the socket open until the server gives up on it
            while let Some(Ok(_)) = ws.next().await {}
        });

        let conn = transport.accept().await.unwrap();
        let (mut reader, _writer) = conn.split();

        assert!(reader.read_frame().await.is_err());
        client.abort();
    }

    #[tokio::test]
    async fn test_idle_peer_times_out() {
        let config = ConnectionConfig {
            idle_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let (transport, url) = listen(config).await;

        let client = tokio::spawn(async move {
            let (_ws, _) = connect_async(url.as_str()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let conn = transport.accept().await.unwrap();
        let (mut reader, _writer) = conn.split();

        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::IdleTimeout(_))
        ));
        client.abort();
    }
}
