//! Connection Registry implementation.
//!
//! Tracks which connection currently owns each identity.

use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::metrics;
use crate::{ConnectionId, Identity};

/// A serialized text frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// The JSON text to put on the wire
    pub text: String,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// The send capability of one live connection.
///
/// Cloning is cheap; a clone taken during a lookup is a snapshot that can be
/// used after the registry lock is released.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<OutboundFrame>,
}

impl ConnectionHandle {
    /// Bind a connection id to its outbound queue.
    pub fn new(id: ConnectionId, sender: mpsc::Sender<OutboundFrame>) -> Self {
        Self { id, sender }
    }

    /// Id of the owning connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueue a frame without waiting.
    pub fn try_deliver(&self, frame: OutboundFrame) -> SendResult {
        match self.sender.try_send(frame) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendResult::ChannelFull,
            Err(mpsc::error::TrySendError::Closed(_)) => SendResult::ChannelClosed,
        }
    }
}

/// Result of attempting to send a frame to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Frame was queued for delivery
    Sent,
    /// No connection holds the identity
    NotConnected,
    /// The recipient's queue is full (backpressure)
    ChannelFull,
    /// The recipient's queue is closed; the stale binding was removed
    ChannelClosed,
}

/// Registry of claimed identities.
///
/// Thread-safe map from [`Identity`] to [`ConnectionHandle`]. Every operation
/// holds a DashMap shard lock for its own duration only and never performs
/// I/O while holding it, so `register`, `lookup` and `unregister` are
/// linearizable with respect to one another.
///
/// ## Usage
///
/// ```ignore
/// let registry = ConnectionRegistry::new();
///
/// // When a session registers:
/// let (tx, rx) = mpsc::channel(64);
/// let claimed = registry.register(identity.clone(), ConnectionHandle::new(conn_id, tx));
///
/// // When routing an envelope:
/// let result = registry.send_to("bob", OutboundFrame::new(text));
///
/// // When the connection closes:
/// registry.unregister(&identity, conn_id);
/// ```
pub struct ConnectionRegistry {
    connections: DashMap<Identity, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create a new connection registry.
    pub fn new() -> Self {
        info!("Creating connection registry");
        Self {
            connections: DashMap::new(),
        }
    }

    /// Claim `identity` for a connection.
    ///
    /// Inserts only if the identity is free. Returns false, without touching
    /// the existing binding, if another connection already holds it.
    #[instrument(skip(self, handle), fields(identity = %identity, conn_id = %handle.id()))]
    pub fn register(&self, identity: Identity, handle: ConnectionHandle) -> bool {
        match self.connections.entry(identity) {
            Entry::Occupied(existing) => {
                debug!(holder = %existing.get().id(), "Identity already claimed");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
                debug!("Registered identity");
                true
            }
        }
    }

    /// The live connection bound to `identity`, if any.
    pub fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.connections
            .get(identity)
            .map(|entry| entry.value().clone())
    }

    /// Release `identity`, but only if `conn_id` still owns it.
    ///
    /// A late teardown from an old connection therefore never removes a newer
    /// registration of the same name. Returns true if a binding was removed.
    #[instrument(skip(self), fields(identity = %identity, conn_id = %conn_id))]
    pub fn unregister(&self, identity: &Identity, conn_id: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(identity.as_str(), |_, handle| handle.id() == conn_id)
            .is_some();
        if removed {
            debug!("Unregistered identity");
        } else {
            debug!("Identity not held by this connection");
        }
        removed
    }

    /// Check if an identity is currently online.
    pub fn is_online(&self, identity: &str) -> bool {
        self.connections.contains_key(identity)
    }

    /// Get the number of registered identities.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// List all online identities.
    ///
    /// Useful for debugging and monitoring.
    pub fn list_identities(&self) -> Vec<Identity> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }

    /// Send a frame to whoever holds `identity`.
    ///
    /// The handle is cloned under the lock and the frame is enqueued after the
    /// lock is released. Never waits on a slow recipient.
    #[instrument(skip(self, frame), fields(to = %identity))]
    pub fn send_to(&self, identity: &str, frame: OutboundFrame) -> SendResult {
        let Some(handle) = self.lookup(identity) else {
            debug!("Recipient not connected");
            return SendResult::NotConnected;
        };

        let result = handle.try_deliver(frame);
        match result {
            SendResult::Sent => debug!("Frame queued for delivery"),
            SendResult::ChannelFull => warn!("Outbound queue full, applying backpressure"),
            SendResult::ChannelClosed => {
                debug!("Outbound queue closed, connection may have dropped");
                if self
                    .connections
                    .remove_if(identity, |_, current| current.id() == handle.id())
                    .is_some()
                {
                    metrics::record_online_count(self.connection_count());
                }
            }
            SendResult::NotConnected => {}
        }
        result
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connections.len())
            .finish()
    }
}
