//! Message types flowing through the stream, including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated logical queue name following SQS naming rules
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Maximum queue name length accepted by SQS, including a `.fifo` suffix
    pub const MAX_LENGTH: usize = 80;

    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > Self::MAX_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("must be 1-{} characters", Self::MAX_LENGTH),
            });
        }

        let base = name.strip_suffix(".fifo").unwrap_or(&name);
        if base.is_empty() {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "name cannot consist of the .fifo suffix alone".to_string(),
            });
        }

        if !base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Check if the name designates a FIFO queue
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(".fifo")
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Network address of a queue, as returned by the queue service
///
/// For SQS this is the queue URL. The adapter treats it as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueAddress(String);

impl QueueAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message received from the queue
///
/// The receipt token is only meaningful to the queue service that issued it;
/// it is required to delete the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub receipt_token: String,
    pub body: String,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        receipt_token: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            receipt_token: receipt_token.into(),
            body: body.into(),
        }
    }

    /// Build the entry that acknowledges this message
    pub fn delete_entry(&self) -> DeleteEntry {
        DeleteEntry {
            id: self.id.clone(),
            receipt_token: self.receipt_token.clone(),
        }
    }
}

/// One entry of a batch send request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendEntry {
    /// Identifier unique within the batch
    pub id: String,
    pub body: String,
}

/// One entry of a batch delete request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEntry {
    /// Identifier unique within the batch
    pub id: String,
    pub receipt_token: String,
}

// ============================================================================
// Write Payloads
// ============================================================================

/// Value accepted by the writable side of the stream
///
/// Every variant has a total conversion to the text submitted to the queue:
/// binary data is decoded as UTF-8 (invalid sequences are replaced),
/// structured values are serialized as JSON and text is used as is.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Binary(Bytes),
    Text(String),
    Structured(serde_json::Value),
}

impl Payload {
    /// Wrap any displayable value as text
    pub fn display(value: impl std::fmt::Display) -> Self {
        Self::Text(value.to_string())
    }

    /// Convert to the text that is submitted to the queue
    pub fn into_text(self) -> String {
        match self {
            Self::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Self::Text(text) => text,
            Self::Structured(value) => value.to_string(),
        }
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(value))
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(value))
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
