//! # switchboard-protocol
//!
//! The delivery envelope convention shared by Switchboard and the business
//! layer that feeds it.
//!
//! The hub itself never looks inside a frame. By convention, though, every
//! payload pushed to a client is an [`Envelope`] wrapped in a `data` object:
//!
//! ```json
//! {"data": {"type": "private", "message": {"from": 3, "to": 7, "content": "hi"}}}
//! ```
//!
//! The `type` discriminator tells the client how to interpret `message`.
//!
//! ## Example
//!
//! ```rust
//! use switchboard_protocol::{codec, Envelope, WireFormat};
//! use serde_json::json;
//!
//! let envelope = Envelope::private(json!({"from": 3, "to": 7, "content": "hi"}));
//!
//! let encoded = codec::encode(&envelope, WireFormat::Json).unwrap();
//! let decoded = codec::decode(&encoded, WireFormat::Json).unwrap();
//! assert_eq!(envelope, decoded);
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, EnvelopeCodec, ProtocolError, WireFormat};
pub use envelope::{Envelope, EnvelopeKind};
