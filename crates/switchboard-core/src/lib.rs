//! # switchboard-core
//!
//! The real-time delivery hub for Switchboard.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Hub** - the process-wide routing authority: who is online, targeted
//!   delivery by user id, broadcast to everyone
//! - **Session** - one live connection with a bounded outbound queue and two
//!   pumps moving frames across the wire
//!
//! ## Architecture
//!
//! ```text
//!  business layer ──send_to_user / broadcast──▶ ┌─────────┐
//!                                               │   Hub   │◀── register / unregister
//!  inbound pump ───────────inbound frames─────▶ └────┬────┘
//!                                                    │ try_send (evict when full)
//!                                                    ▼
//!                                             ┌──────────────┐     ┌────────────┐
//!                                             │ outbound pump│────▶│ Connection │
//!                                             └──────────────┘     └────────────┘
//! ```
//!
//! Slow consumers are never allowed to push back on the hub: a session whose
//! queue is full is disconnected.

pub mod hub;
mod registry;
pub mod session;

pub use hub::{DeliveryReport, Hub, HubConfig, HubError, HubStats, InboundPolicy};
pub use session::{admit, SessionConfig, SessionHandle, SessionId};
