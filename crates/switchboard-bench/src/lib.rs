//! Shared fixtures for the Switchboard benchmarks.

use bytes::Bytes;
use serde_json::json;
use switchboard_core::{Hub, HubError, SessionHandle};
use switchboard_protocol::{encode, Envelope, ProtocolError, WireFormat};
use tokio::sync::mpsc;

/// A session registered without a connection; the benchmark reads its
/// queue directly.
pub struct RawSession {
    pub user_id: String,
    pub queue: mpsc::Receiver<Bytes>,
}

/// Start a hub and register `count` raw sessions for users `user-0..`.
///
/// Must be called from within a tokio runtime.
pub async fn populated_hub(
    count: usize,
    capacity: usize,
) -> Result<(Hub, Vec<RawSession>), HubError> {
    let hub = Hub::default();
    hub.spawn()?;

    let mut sessions = Vec::with_capacity(count);
    for i in 0..count {
        let user_id = format!("user-{i}");
        let (tx, queue) = mpsc::channel(capacity);
        hub.register(SessionHandle::new(user_id.clone(), tx))
            .await?;
        sessions.push(RawSession { user_id, queue });
    }

    Ok((hub, sessions))
}

/// Empty every queue, returning how many frames were waiting.
pub fn drain(sessions: &mut [RawSession]) -> usize {
    let mut frames = 0;
    for session in sessions {
        while session.queue.try_recv().is_ok() {
            frames += 1;
        }
    }
    frames
}

/// A private chat message of roughly `content_len` bytes, encoded once.
pub fn chat_payload(content_len: usize, format: WireFormat) -> Result<Bytes, ProtocolError> {
    let envelope = Envelope::private(json!({
        "from": 3,
        "to": 7,
        "content": "x".repeat(content_len),
    }));
    encode(&envelope, format)
}
