//! Error types for queue operations and the stream adapter.
//!
//! Two layers mirror the two sides of the adapter:
//!
//! - [`QueueError`] is what a [`QueueService`](crate::service::QueueService)
//!   reports for a single call.
//! - [`StreamError`] is what the adapter reports to its consumer, classified
//!   by which pump operation failed.
//!
//! Fatal stream errors are published once through an [`ErrorChannel`]; every
//! consumer observes the same error through an [`ErrorWatcher`].

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

/// Error reported by a queue service call
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Batch size {size} exceeds maximum {max_size}")]
    BatchTooLarge { size: usize, max_size: usize },

    #[error("{failed} of {total} batch entries failed: {message}")]
    BatchEntriesFailed {
        failed: usize,
        total: usize,
        message: String,
    },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Response could not be parsed: {message}")]
    Serialization { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl QueueError {
    /// Check if error is transient and the same call may succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::BatchTooLarge { .. } => false,
            Self::BatchEntriesFailed { .. } => true,
            Self::ProviderError { .. } => true,
            Self::Serialization { .. } => false,
            Self::Validation(_) => false,
        }
    }
}

/// Error reported by the stream adapter
///
/// `AddressResolution` is retryable: the address cache is left empty and the
/// next operation looks the queue up again. `SendBatch`, `DeleteBatch` and
/// `Receive` are fatal and halt the side of the adapter that raised them.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Failed to resolve address of queue '{queue}': {source}")]
    AddressResolution {
        queue: String,
        #[source]
        source: QueueError,
    },

    #[error("Failed to send batch of {entries} messages: {source}")]
    SendBatch {
        entries: usize,
        #[source]
        source: QueueError,
    },

    #[error("Failed to delete batch of {entries} received messages: {source}")]
    DeleteBatch {
        entries: usize,
        #[source]
        source: QueueError,
    },

    #[error("Failed to receive messages: {source}")]
    Receive {
        #[source]
        source: QueueError,
    },

    #[error("Payload of {size} bytes can never fit a batch (limit: {max_size} bytes, doubled)")]
    PayloadTooLarge { size: usize, max_size: usize },

    #[error("The {side} side of the stream halted after a fatal error")]
    Halted { side: StreamSide },

    #[error("The write side of the stream is closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl StreamError {
    /// Check if the error stops the side of the adapter that raised it
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SendBatch { .. } | Self::DeleteBatch { .. } | Self::Receive { .. }
        )
    }
}

/// Identifies one of the two pumps of the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSide {
    Read,
    Write,
}

impl std::fmt::Display for StreamSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

// ============================================================================
// Fatal Error Channel
// ============================================================================

/// Publishing half of the single fatal error channel
///
/// Only the first reported error is published. Later errors are logged and
/// dropped so that the consumer is notified exactly once.
#[derive(Debug)]
pub struct ErrorChannel {
    slot: watch::Sender<Option<Arc<StreamError>>>,
}

impl ErrorChannel {
    /// Create a channel with no error published
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot }
    }

    /// Publish a fatal error; returns `false` if one was already published
    pub fn report(&self, error: StreamError) -> bool {
        let mut pending = Some(error);
        let published = self.slot.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = pending.take().map(Arc::new);
            true
        });

        if let Some(dropped) = pending {
            warn!(error = %dropped, "Fatal error suppressed, one was already reported");
        }

        published
    }

    /// Get the published error, if any
    pub fn current(&self) -> Option<Arc<StreamError>> {
        self.slot.borrow().clone()
    }

    /// Create a watcher observing this channel
    pub fn subscribe(&self) -> ErrorWatcher {
        ErrorWatcher {
            slot: self.slot.subscribe(),
        }
    }
}

impl Default for ErrorChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of the fatal error channel
#[derive(Debug, Clone)]
pub struct ErrorWatcher {
    slot: watch::Receiver<Option<Arc<StreamError>>>,
}

impl ErrorWatcher {
    /// Get the published error without waiting
    pub fn current(&self) -> Option<Arc<StreamError>> {
        self.slot.borrow().clone()
    }

    /// Wait until a fatal error is published
    ///
    /// Returns `None` if the adapter is dropped without ever failing.
    pub async fn wait(&mut self) -> Option<Arc<StreamError>> {
        match self.slot.wait_for(Option::is_some).await {
            Ok(error) => error.clone(),
            Err(_) => None,
        }
    }
}
