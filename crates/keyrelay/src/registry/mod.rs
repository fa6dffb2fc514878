//! Connection Registry for identity claiming and envelope delivery.
//!
//! This module provides a thread-safe registry that maps each claimed
//! username to the outbound queue of the connection that owns it. It is the
//! single source of truth for "who is online".
//!
//! ## Architecture
//!
//! Each session registers a channel sender when its `register` succeeds.
//! Envelopes can then be routed to any online identity by name.
//!
//! ```text
//! Session (alice) <-> ConnectionRegistry <-> Session (bob)
//!       |                    |                     |
//!       v                    v                     v
//! mpsc::Sender       DashMap<Identity,       mpsc::Sender
//!                     ConnectionHandle>
//! ```

mod connection_registry;

pub use connection_registry::{ConnectionHandle, ConnectionRegistry, OutboundFrame, SendResult};
