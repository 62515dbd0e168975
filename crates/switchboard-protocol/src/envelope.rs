//! Envelope types for the delivery convention.
//!
//! An envelope pairs a discriminator with an embedded message. The message
//! body is free-form JSON owned by the business layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// One-to-one chat message.
    Private,
    /// Message posted to a group, fanned out to each member.
    Group,
}

impl EnvelopeKind {
    /// The wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Private => "private",
            EnvelopeKind::Group => "group",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed payload addressed to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// What kind of message this is.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// The embedded message.
    pub message: serde_json::Value,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(kind: EnvelopeKind, message: serde_json::Value) -> Self {
        Self { kind, message }
    }

    /// Create a private-message envelope.
    #[must_use]
    pub fn private(message: serde_json::Value) -> Self {
        Self::new(EnvelopeKind::Private, message)
    }

    /// Create a group-message envelope.
    #[must_use]
    pub fn group(message: serde_json::Value) -> Self {
        Self::new(EnvelopeKind::Group, message)
    }
}

/// Outer wrapper placed around every envelope on the wire.
#[derive(Serialize)]
pub(crate) struct WireRef<'a> {
    pub data: &'a Envelope,
}

#[derive(Deserialize)]
pub(crate) struct WireOwned {
    pub data: Envelope,
}
