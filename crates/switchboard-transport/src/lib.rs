//! # switchboard-transport
//!
//! Connection adapters for the Switchboard delivery hub.
//!
//! An adapter wraps one physical bidirectional stream and exposes it as
//! frame-level reads and writes plus keepalive probes:
//!
//! - **WebSocket** - a standalone tokio-tungstenite listener
//! - **axum** - sockets handed over by axum's `WebSocketUpgrade`
//! - **memory** - an in-process pair for exercising sessions without a network
//!
//! Every adapter enforces the same [`ConnectionConfig`]: a maximum inbound
//! frame size, a write deadline and a read idle window. Any failure is
//! reported as a [`TransportError`] and is fatal to the connection.
//!
//! ```rust,ignore
//! use switchboard_transport::Connection;
//!
//! async fn drain(conn: Box<dyn Connection>) {
//!     let (mut reader, mut writer) = conn.split();
//!     while let Ok(frame) = reader.read_frame().await {
//!         if writer.write_frame(frame).await.is_err() {
//!             break;
//!         }
//!     }
//! }
//! ```

pub mod axum_ws;
pub mod memory;
mod socket;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{
    Connection, ConnectionConfig, ConnectionId, FrameKind, FrameReader, FrameWriter, Transport,
    TransportError,
};

pub use axum_ws::AxumConnection;

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};
