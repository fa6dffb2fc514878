//! Envelope parsing and serialization.
//!
//! Every frame on the relay stream is a UTF-8 JSON object with a string
//! `type`. The relay only reads the routing fields (`type`, `username`, `to`)
//! and writes `from`; every other field is carried through untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Identity, ProtocolError};

/// Envelope `type` values the relay knows about.
pub mod kinds {
    /// Client claims a username
    pub const REGISTER: &str = "register";
    /// Server confirms a claimed username
    pub const REGISTERED: &str = "registered";
    /// Client asks a peer for its public key
    pub const PUBKEY_REQUEST: &str = "pubkey_request";
    /// Client answers with its armored public key
    pub const PUBKEY_RESPONSE: &str = "pubkey_response";
    /// Client delivers armored ciphertext
    pub const MSG: &str = "msg";
    /// Server reports a protocol failure
    pub const ERROR: &str = "error";
}

const TYPE_FIELD: &str = "type";
const USERNAME_FIELD: &str = "username";
const TO_FIELD: &str = "to";
const FROM_FIELD: &str = "from";

/// A client-originated envelope.
///
/// Holds the full JSON object so that forwarding is verbatim apart from the
/// relay-stamped `from`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    /// Parse a text frame.
    ///
    /// Non-JSON input is [`ProtocolError::InvalidJson`]; JSON that is not an
    /// object carrying a string `type` is [`ProtocolError::InvalidEnvelope`].
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(frame).map_err(|_| ProtocolError::InvalidJson)?;
        let Value::Object(fields) = value else {
            return Err(ProtocolError::InvalidEnvelope);
        };
        match fields.get(TYPE_FIELD) {
            Some(Value::String(_)) => Ok(Self { fields }),
            _ => Err(ProtocolError::InvalidEnvelope),
        }
    }

    /// The envelope's `type`.
    pub fn kind(&self) -> &str {
        self.str_field(TYPE_FIELD).unwrap_or_default()
    }

    /// Whether this is a `register` request.
    pub fn is_register(&self) -> bool {
        self.kind() == kinds::REGISTER
    }

    /// The non-empty `username` of a `register` request.
    pub fn username(&self) -> Option<&str> {
        self.str_field(USERNAME_FIELD).filter(|name| !name.is_empty())
    }

    /// The non-empty target identity in `to`.
    pub fn recipient(&self) -> Option<&str> {
        self.str_field(TO_FIELD).filter(|to| !to.is_empty())
    }

    /// The `from` field, if any. Only meaningful on envelopes the relay built
    /// or stamped.
    pub fn sender(&self) -> Option<&str> {
        self.str_field(FROM_FIELD)
    }

    /// Raw access to any field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Overwrite `from` with the sender's registered identity.
    ///
    /// Whatever `from` the client supplied is discarded.
    pub fn stamp_sender(mut self, sender: &Identity) -> Self {
        self.fields
            .insert(FROM_FIELD.to_string(), Value::String(sender.as_str().to_string()));
        self
    }

    fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(&self.fields).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Envelopes the relay itself originates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Registration succeeded
    Registered {
        /// The claimed username
        username: String,
    },
    /// Something the client sent could not be handled
    Error {
        /// Human readable reason
        message: String,
    },
}

impl ServerEnvelope {
    /// Confirmation for a successful `register`.
    pub fn registered(identity: &Identity) -> Self {
        Self::Registered {
            username: identity.as_str().to_string(),
        }
    }

    /// Error reply for a protocol failure.
    pub fn error(err: ProtocolError) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ServerEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}
