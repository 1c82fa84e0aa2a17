//! Lazily resolved, cached queue address shared by both pumps.

use crate::error::StreamError;
use crate::message::{QueueAddress, QueueName};
use crate::service::QueueService;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "address_tests.rs"]
mod tests;

/// Resolves the address of one queue and caches it for the adapter's lifetime
///
/// Concurrent callers share a single in-flight lookup. A failed lookup is
/// not cached; the next call looks the queue up again.
pub struct AddressCache {
    service: Arc<dyn QueueService>,
    queue: QueueName,
    address: OnceCell<QueueAddress>,
}

impl AddressCache {
    pub fn new(service: Arc<dyn QueueService>, queue: QueueName) -> Self {
        Self {
            service,
            queue,
            address: OnceCell::new(),
        }
    }

    /// Get the queue address, looking it up on first use
    pub async fn resolve(&self) -> Result<QueueAddress, StreamError> {
        let address = self
            .address
            .get_or_try_init(|| async {
                debug!(queue = %self.queue, "Resolving queue address");
                self.service
                    .resolve_address(&self.queue)
                    .await
                    .map_err(|source| {
                        warn!(queue = %self.queue, error = %source, "Queue address lookup failed");
                        StreamError::AddressResolution {
                            queue: self.queue.to_string(),
                            source,
                        }
                    })
            })
            .await?;

        Ok(address.clone())
    }

    /// Get the address if it has already been resolved
    pub fn cached(&self) -> Option<&QueueAddress> {
        self.address.get()
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }
}

impl std::fmt::Debug for AddressCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressCache")
            .field("queue", &self.queue)
            .field("address", &self.address.get())
            .finish()
    }
}
