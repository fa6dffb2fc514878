//! Per-connection session state machine.
//!
//! ```text
//! UNREGISTERED --register ok--> REGISTERED
//!      |                            |
//!      +---- close / "taken" -------+----> CLOSED
//! ```
//!
//! A session owns its connection's outbound queue sender and is the only
//! code that mutates the registry on that connection's behalf.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::registry::{ConnectionHandle, ConnectionRegistry, OutboundFrame};
use crate::routing::{EnvelopeRouter, RoutingResult};
use crate::{ConnectionId, Envelope, Identity, ProtocolError, ServerEnvelope};

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no identity claimed yet
    Unregistered,
    /// Bound to an identity
    Registered(Identity),
    /// Torn down (terminal)
    Closed,
}

/// What the connection driver should do after a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading
    Continue,
    /// Flush pending output and close the connection
    Close,
}

/// Protocol state for one connection.
pub struct Session {
    id: ConnectionId,
    state: SessionState,
    outbound: mpsc::Sender<OutboundFrame>,
    connection_registry: Arc<ConnectionRegistry>,
    router: EnvelopeRouter,
}

impl Session {
    /// Create an unregistered session writing to `outbound`.
    pub fn new(
        id: ConnectionId,
        outbound: mpsc::Sender<OutboundFrame>,
        connection_registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let router = EnvelopeRouter::new(Arc::clone(&connection_registry));
        Self {
            id,
            state: SessionState::Unregistered,
            outbound,
            connection_registry,
            router,
        }
    }

    /// Id of the connection this session belongs to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The bound identity, once registered.
    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::Registered(identity) => Some(identity),
            _ => None,
        }
    }

    /// Handle one inbound text frame.
    ///
    /// Frames are handled strictly in arrival order. Any reply is queued on
    /// this connection's own outbound queue before returning.
    pub async fn handle_frame(&mut self, frame: &str) -> Flow {
        if self.state == SessionState::Closed {
            return Flow::Close;
        }

        let envelope = match Envelope::parse(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(error = %err, len = frame.len(), "Malformed frame");
                return self.reply_error(err).await;
            }
        };

        let sender = match &self.state {
            SessionState::Registered(identity) => Some(identity.clone()),
            SessionState::Unregistered | SessionState::Closed => None,
        };

        match sender {
            None if envelope.is_register() => self.register(&envelope).await,
            None => {
                debug!(kind = %envelope.kind(), "Envelope before registration");
                self.reply_error(ProtocolError::NotRegistered).await
            }
            Some(_) if envelope.is_register() => {
                self.reply_error(ProtocolError::AlreadyRegistered).await
            }
            Some(identity) => match self.router.route(&identity, envelope) {
                RoutingResult::Delivered { .. } => Flow::Continue,
                RoutingResult::Rejected(err) => self.reply_error(err).await,
            },
        }
    }

    async fn register(&mut self, envelope: &Envelope) -> Flow {
        let Some(identity) = envelope.username().and_then(Identity::new) else {
            metrics::record_registration(ProtocolError::UsernameRequired.label());
            return self.reply_error(ProtocolError::UsernameRequired).await;
        };

        let handle = ConnectionHandle::new(self.id, self.outbound.clone());
        if !self.connection_registry.register(identity.clone(), handle) {
            info!(identity = %identity, "Username already taken, closing connection");
            metrics::record_registration(ProtocolError::UsernameTaken.label());
            return self.reply_error(ProtocolError::UsernameTaken).await;
        }

        // Record the identity in the parent span (relay.connection)
        tracing::Span::current().record("identity", identity.as_str());
        info!(identity = %identity, "Identity registered");
        metrics::record_registration("registered");
        metrics::record_online_count(self.connection_registry.connection_count());

        self.state = SessionState::Registered(identity.clone());
        self.reply(ServerEnvelope::registered(&identity)).await;
        Flow::Continue
    }

    /// Report `err` to this connection; fatal errors end the session.
    async fn reply_error(&self, err: ProtocolError) -> Flow {
        self.reply(ServerEnvelope::error(err)).await;
        if err.is_fatal() {
            Flow::Close
        } else {
            Flow::Continue
        }
    }

    async fn reply(&self, envelope: ServerEnvelope) {
        if self
            .outbound
            .send(OutboundFrame::new(envelope.to_string()))
            .await
            .is_err()
        {
            warn!(conn_id = %self.id, "Outbound queue closed, dropping reply");
        }
    }

    /// Tear the session down.
    ///
    /// Releases the identity if this connection still holds it. Safe to call
    /// any number of times; only the first call has an effect.
    pub fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Registered(identity) = previous {
            if self.connection_registry.unregister(&identity, self.id) {
                info!(identity = %identity, "Identity released");
            }
            metrics::record_online_count(self.connection_registry.connection_count());
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
