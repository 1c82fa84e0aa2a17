//! Boundary between the stream adapter and the remote queue service.

use crate::error::QueueError;
use crate::message::{DeleteEntry, Message, QueueAddress, QueueName, SendEntry};
use async_trait::async_trait;

/// Operations the adapter needs from an at-least-once queue service
///
/// Implementations must be safe to share between the read and write pumps.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Look up the address of a queue by its logical name
    async fn resolve_address(&self, queue: &QueueName) -> Result<QueueAddress, QueueError>;

    /// Receive up to `max_messages` messages, hiding them for `visibility_timeout_seconds`
    ///
    /// An empty result means no messages are currently available.
    async fn receive(
        &self,
        address: &QueueAddress,
        max_messages: u32,
        visibility_timeout_seconds: u32,
    ) -> Result<Vec<Message>, QueueError>;

    /// Delete received messages; any failed entry fails the whole call
    async fn delete_batch(
        &self,
        address: &QueueAddress,
        entries: &[DeleteEntry],
    ) -> Result<(), QueueError>;

    /// Send a batch of messages; any failed entry fails the whole call
    async fn send_batch(&self, address: &QueueAddress, entries: &[SendEntry])
        -> Result<(), QueueError>;

    /// Maximum number of entries accepted by one batch call
    fn max_batch_size(&self) -> usize {
        10
    }
}
