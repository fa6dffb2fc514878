//! # keyrelay
//!
//! Identity registry and envelope router for end-to-end encrypted chat.
//!
//! Clients keep their keypairs locally and use the relay purely as a
//! transport: they claim a username, swap armored public keys through
//! `pubkey_request`/`pubkey_response` envelopes, and then exchange `msg`
//! envelopes whose ciphertext the relay never looks at.
//!
//! ## Architecture
//!
//! - **Registry**: [`ConnectionRegistry`] maps each claimed [`Identity`] to the
//!   outbound queue of the connection that owns it
//! - **Sessions**: one [`Session`] state machine per WebSocket connection,
//!   enforcing register-before-route
//! - **Routing**: [`EnvelopeRouter`] stamps `from` and forwards envelopes to
//!   the target's queue, or reports why it could not
//! - **Server**: [`RelayServer`] exposes the relay stream and health probes
//!   over axum
//!
//! ```text
//! Session (alice) --route--> EnvelopeRouter --lookup--> ConnectionRegistry
//!                                  |
//!                                  v
//!                        mpsc::Sender (bob) --> writer task --> bob's socket
//! ```

pub mod connection;
pub mod envelope;
pub mod metrics;
pub mod registry;
pub mod routing;
pub mod server;
pub mod session;

mod error;
mod types;

pub use envelope::{Envelope, ServerEnvelope};
pub use error::{ProtocolError, RelayError};
pub use registry::{ConnectionHandle, ConnectionRegistry, OutboundFrame, SendResult};
pub use routing::{EnvelopeRouter, RoutingResult};
pub use server::{RelayServer, RelayServerConfig};
pub use session::{Flow, Session, SessionState};
pub use types::*;
