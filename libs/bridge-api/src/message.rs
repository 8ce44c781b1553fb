use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Message
// ════════════════════════════════════════════════════════════════

/// Broker message: opaque payload plus string attributes.
///
/// Attributes are kept sorted by key so that every consumer sees the same
/// attribute order for the same message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    payload: Vec<u8>,
    attributes: BTreeMap<String, String>,
}

impl Message {
    pub fn new(payload: impl Into<Vec<u8>>, attributes: BTreeMap<String, String>) -> Self {
        Self { payload: payload.into(), attributes }
    }

    /// Message without attributes.
    pub fn from_payload(payload: impl Into<Vec<u8>>) -> Self {
        Self { payload: payload.into(), attributes: BTreeMap::new() }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

// ════════════════════════════════════════════════════════════════
//  DeliveryToken
// ════════════════════════════════════════════════════════════════

/// Ack id of one delivery attempt. A redelivery of the same logical message
/// carries a different token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryToken(String);

impl DeliveryToken {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeliveryToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeliveryToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ════════════════════════════════════════════════════════════════
//  ReceivedMessage
// ════════════════════════════════════════════════════════════════

/// One entry of a pull response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub ack_id: DeliveryToken,
    pub message: Message,
    /// Server-assigned publish time, Unix ms.
    pub publish_time_ms: i64,
}

impl ReceivedMessage {
    pub fn new(ack_id: impl Into<DeliveryToken>, message: Message, publish_time_ms: i64) -> Self {
        Self { ack_id: ack_id.into(), message, publish_time_ms }
    }
}
