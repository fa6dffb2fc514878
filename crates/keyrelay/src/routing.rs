//! Envelope routing between registered identities.
//!
//! The router is type-agnostic: `pubkey_request`, `pubkey_response`, `msg`
//! and any future envelope carrying `to` all take the same path.
//!
//! # Routing Logic
//!
//! For each envelope from a registered sender, the router:
//! 1. Extracts the target identity from `to`
//! 2. Looks the target up in the `ConnectionRegistry`
//! 3. Stamps `from` with the sender's registered identity
//! 4. Enqueues the serialized envelope on the target's outbound queue
//!
//! Delivery is immediate-or-fail; nothing is queued for offline users.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::metrics;
use crate::registry::{ConnectionRegistry, OutboundFrame, SendResult};
use crate::{Envelope, Identity, ProtocolError};

/// Result of a routing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingResult {
    /// Envelope was queued on the target's connection
    Delivered {
        /// The identity it was delivered to
        to: String,
    },
    /// Envelope was dropped; the sender gets this error
    Rejected(ProtocolError),
}

/// Forwards envelopes from one registered identity to another.
#[derive(Debug, Clone)]
pub struct EnvelopeRouter {
    connection_registry: Arc<ConnectionRegistry>,
}

impl EnvelopeRouter {
    /// Create a router over the shared registry.
    pub fn new(connection_registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            connection_registry,
        }
    }

    /// Route `envelope` on behalf of `sender`.
    ///
    /// Never waits: a full target queue is reported as
    /// [`ProtocolError::RecipientBusy`] rather than stalling the sender.
    #[instrument(skip(self, envelope), fields(from = %sender, kind = %envelope.kind()))]
    pub fn route(&self, sender: &Identity, envelope: Envelope) -> RoutingResult {
        let kind = envelope.kind().to_string();

        let Some(to) = envelope.recipient().map(str::to_string) else {
            debug!("Envelope has no recipient");
            metrics::record_route(&kind, ProtocolError::MissingRecipient.label());
            return RoutingResult::Rejected(ProtocolError::MissingRecipient);
        };

        let frame = OutboundFrame::new(envelope.stamp_sender(sender).to_string());

        let result = match self.connection_registry.send_to(&to, frame) {
            SendResult::Sent => RoutingResult::Delivered { to },
            SendResult::NotConnected | SendResult::ChannelClosed => {
                RoutingResult::Rejected(ProtocolError::RecipientOffline)
            }
            SendResult::ChannelFull => RoutingResult::Rejected(ProtocolError::RecipientBusy),
        };

        match &result {
            RoutingResult::Delivered { to } => {
                debug!(to = %to, "Envelope delivered");
                metrics::record_route(&kind, "delivered");
            }
            RoutingResult::Rejected(err) => {
                debug!(error = %err, "Envelope rejected");
                metrics::record_route(&kind, err.label());
            }
        }

        result
    }
}
