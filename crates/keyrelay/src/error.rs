//! Error types for the relay.

use thiserror::Error;

/// Relay server errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO error (bind, accept)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Protocol failures reported back to the offending connection.
///
/// The `Display` text of each variant is exactly the `message` field of the
/// `error` envelope sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON
    #[error("invalid json")]
    InvalidJson,

    /// Frame is JSON but not an object with a string `type`
    #[error("invalid envelope")]
    InvalidEnvelope,

    /// `register` without a non-empty `username`
    #[error("username required")]
    UsernameRequired,

    /// `register` for a name another connection holds
    #[error("username taken")]
    UsernameTaken,

    /// Second `register` on an already bound connection
    #[error("already registered")]
    AlreadyRegistered,

    /// Routing attempted before registration
    #[error("not registered")]
    NotRegistered,

    /// Peer-directed envelope without a `to`
    #[error("missing 'to'")]
    MissingRecipient,

    /// Target identity has no live connection
    #[error("user not online")]
    RecipientOffline,

    /// Target's outbound queue is full
    #[error("user busy")]
    RecipientBusy,
}

impl ProtocolError {
    /// Whether the connection must be closed after reporting this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UsernameTaken)
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::InvalidEnvelope => "invalid_envelope",
            Self::UsernameRequired => "username_required",
            Self::UsernameTaken => "username_taken",
            Self::AlreadyRegistered => "already_registered",
            Self::NotRegistered => "not_registered",
            Self::MissingRecipient => "missing_to",
            Self::RecipientOffline => "offline",
            Self::RecipientBusy => "busy",
        }
    }
}
