//! In-memory queue service for testing and development.
//!
//! Behaves like an SQS standard queue within one process:
//! - queues must be created before their address can be resolved
//! - received messages stay hidden for their visibility timeout and become
//!   visible again unless deleted with their receipt token
//! - each receive hands out a fresh receipt token; stale tokens cannot delete
//!
//! Time is measured with `tokio::time::Instant`, so tests running on a paused
//! clock control when visibility timeouts expire.

use crate::error::QueueError;
use crate::message::{DeleteEntry, Message, QueueAddress, QueueName, SendEntry};
use crate::service::QueueService;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const ADDRESS_PREFIX: &str = "memory://queues/";

/// Largest batch accepted by the in-memory service
pub const MEMORY_MAX_BATCH: usize = 10;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Internal queue state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    /// Messages waiting to be received, oldest first
    messages: VecDeque<StoredMessage>,
    /// Received messages keyed by their current receipt token
    in_flight: HashMap<String, InFlightMessage>,
}

impl InMemoryQueue {
    /// Return messages whose visibility timeout expired to the queue
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, m)| m.is_expired(now))
            .map(|(receipt, _)| receipt.clone())
            .collect();

        let mut released: Vec<StoredMessage> = expired
            .iter()
            .filter_map(|receipt| self.in_flight.remove(receipt))
            .map(|m| m.message)
            .collect();
        released.sort_by_key(|m| m.sequence);

        for message in released.into_iter().rev() {
            self.messages.push_front(message);
        }
    }
}

#[derive(Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    sequence: u64,
}

struct InFlightMessage {
    message: StoredMessage,
    visible_at: Instant,
}

impl InFlightMessage {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.visible_at
    }
}

#[derive(Default)]
struct QueueStorage {
    queues: HashMap<QueueAddress, InMemoryQueue>,
    next_sequence: u64,
}

// ============================================================================
// InMemoryQueueService
// ============================================================================

/// In-process queue service
///
/// Clones share the same queues.
#[derive(Clone, Default)]
pub struct InMemoryQueueService {
    storage: Arc<RwLock<QueueStorage>>,
}

impl InMemoryQueueService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue, returning its address; existing queues are kept
    pub fn create_queue(&self, queue: &QueueName) -> QueueAddress {
        let address = Self::address_of(queue);
        self.storage()
            .queues
            .entry(address.clone())
            .or_default();
        address
    }

    /// Number of messages waiting to be received
    pub fn visible_count(&self, queue: &QueueName) -> usize {
        let mut storage = self.storage();
        match storage.queues.get_mut(&Self::address_of(queue)) {
            Some(q) => {
                q.release_expired(Instant::now());
                q.messages.len()
            }
            None => 0,
        }
    }

    /// Number of received messages that are neither deleted nor visible again
    pub fn in_flight_count(&self, queue: &QueueName) -> usize {
        let mut storage = self.storage();
        match storage.queues.get_mut(&Self::address_of(queue)) {
            Some(q) => {
                q.release_expired(Instant::now());
                q.in_flight.len()
            }
            None => 0,
        }
    }

    fn address_of(queue: &QueueName) -> QueueAddress {
        QueueAddress::new(format!("{}{}", ADDRESS_PREFIX, queue.as_str()))
    }

    fn storage(&self) -> RwLockWriteGuard<'_, QueueStorage> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_batch_size(size: usize) -> Result<(), QueueError> {
        if size > MEMORY_MAX_BATCH {
            return Err(QueueError::BatchTooLarge {
                size,
                max_size: MEMORY_MAX_BATCH,
            });
        }
        Ok(())
    }
}

fn queue_not_found(address: &QueueAddress) -> QueueError {
    QueueError::QueueNotFound {
        queue_name: address
            .as_str()
            .trim_start_matches(ADDRESS_PREFIX)
            .to_string(),
    }
}

impl std::fmt::Debug for InMemoryQueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = self.storage.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InMemoryQueueService")
            .field("queues", &storage.queues.len())
            .finish()
    }
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn resolve_address(&self, queue: &QueueName) -> Result<QueueAddress, QueueError> {
        let address = Self::address_of(queue);
        if self.storage().queues.contains_key(&address) {
            Ok(address)
        } else {
            Err(QueueError::QueueNotFound {
                queue_name: queue.to_string(),
            })
        }
    }

    async fn receive(
        &self,
        address: &QueueAddress,
        max_messages: u32,
        visibility_timeout_seconds: u32,
    ) -> Result<Vec<Message>, QueueError> {
        let now = Instant::now();
        let visible_at = now + Duration::from_secs(u64::from(visibility_timeout_seconds));

        let mut storage = self.storage();
        let queue = storage
            .queues
            .get_mut(address)
            .ok_or_else(|| queue_not_found(address))?;
        queue.release_expired(now);

        let count = (max_messages as usize).min(MEMORY_MAX_BATCH).min(queue.messages.len());
        let mut received = Vec::with_capacity(count);
        for stored in queue.messages.drain(..count) {
            let receipt = uuid::Uuid::new_v4().to_string();
            received.push(Message::new(
                stored.message_id.clone(),
                receipt.clone(),
                stored.body.clone(),
            ));
            queue.in_flight.insert(
                receipt,
                InFlightMessage {
                    message: stored,
                    visible_at,
                },
            );
        }

        debug!(queue = %address, received = received.len(), "In-memory receive");
        Ok(received)
    }

    async fn delete_batch(
        &self,
        address: &QueueAddress,
        entries: &[DeleteEntry],
    ) -> Result<(), QueueError> {
        Self::check_batch_size(entries.len())?;

        let mut storage = self.storage();
        let queue = storage
            .queues
            .get_mut(address)
            .ok_or_else(|| queue_not_found(address))?;
        queue.release_expired(Instant::now());

        let missing: Vec<&str> = entries
            .iter()
            .filter(|entry| queue.in_flight.remove(&entry.receipt_token).is_none())
            .map(|entry| entry.id.as_str())
            .collect();

        match missing.first() {
            None => Ok(()),
            Some(first) => Err(QueueError::BatchEntriesFailed {
                failed: missing.len(),
                total: entries.len(),
                message: format!("entry {}: receipt handle is invalid or expired", first),
            }),
        }
    }

    async fn send_batch(
        &self,
        address: &QueueAddress,
        entries: &[SendEntry],
    ) -> Result<(), QueueError> {
        Self::check_batch_size(entries.len())?;

        let mut storage = self.storage();
        let mut sequence = storage.next_sequence;
        let queue = storage
            .queues
            .get_mut(address)
            .ok_or_else(|| queue_not_found(address))?;

        for entry in entries {
            queue.messages.push_back(StoredMessage {
                message_id: uuid::Uuid::new_v4().to_string(),
                body: entry.body.clone(),
                sequence,
            });
            sequence += 1;
        }
        storage.next_sequence = sequence;

        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        MEMORY_MAX_BATCH
    }
}
