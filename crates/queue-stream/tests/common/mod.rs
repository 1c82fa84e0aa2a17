//! Common test utilities for queue-stream integration tests
//!
//! This module provides:
//! - A failure-injecting wrapper around the in-memory queue service
//! - Helpers for building streams and initializing test logging

use async_trait::async_trait;
use queue_stream::message::{DeleteEntry, SendEntry};
use queue_stream::{
    InMemoryQueueService, Message, QueueAddress, QueueError, QueueName, QueueService,
    QueueStream, StreamConfig,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Install a test subscriber once; honors `RUST_LOG`
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[allow(dead_code)]
pub fn queue_name(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

// ============================================================================
// Flaky Queue Service
// ============================================================================

/// In-memory queue service with injectable failures and call recording
#[derive(Clone)]
#[allow(dead_code)]
pub struct FlakyQueueService {
    inner: InMemoryQueueService,
    send_failures: Arc<Mutex<VecDeque<QueueError>>>,
    delete_failures: Arc<Mutex<VecDeque<QueueError>>>,
    sent_batches: Arc<Mutex<Vec<Vec<SendEntry>>>>,
}

impl FlakyQueueService {
    #[allow(dead_code)]
    pub fn new(inner: InMemoryQueueService) -> Self {
        Self {
            inner,
            send_failures: Arc::new(Mutex::new(VecDeque::new())),
            delete_failures: Arc::new(Mutex::new(VecDeque::new())),
            sent_batches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[allow(dead_code)]
    pub fn fail_next_send(&self, message: &str) {
        self.send_failures
            .lock()
            .unwrap()
            .push_back(QueueError::ConnectionFailed {
                message: message.to_string(),
            });
    }

    #[allow(dead_code)]
    pub fn fail_next_delete(&self, message: &str) {
        self.delete_failures
            .lock()
            .unwrap()
            .push_back(QueueError::ConnectionFailed {
                message: message.to_string(),
            });
    }

    #[allow(dead_code)]
    pub fn sent_batches(&self) -> Vec<Vec<SendEntry>> {
        self.sent_batches.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn inner(&self) -> &InMemoryQueueService {
        &self.inner
    }
}

#[async_trait]
impl QueueService for FlakyQueueService {
    async fn resolve_address(&self, queue: &QueueName) -> Result<QueueAddress, QueueError> {
        self.inner.resolve_address(queue).await
    }

    async fn receive(
        &self,
        address: &QueueAddress,
        max_messages: u32,
        visibility_timeout_seconds: u32,
    ) -> Result<Vec<Message>, QueueError> {
        self.inner
            .receive(address, max_messages, visibility_timeout_seconds)
            .await
    }

    async fn delete_batch(
        &self,
        address: &QueueAddress,
        entries: &[DeleteEntry],
    ) -> Result<(), QueueError> {
        let failure = self.delete_failures.lock().unwrap().pop_front();
        match failure {
            Some(error) => Err(error),
            None => self.inner.delete_batch(address, entries).await,
        }
    }

    async fn send_batch(
        &self,
        address: &QueueAddress,
        entries: &[SendEntry],
    ) -> Result<(), QueueError> {
        self.sent_batches.lock().unwrap().push(entries.to_vec());
        let failure = self.send_failures.lock().unwrap().pop_front();
        match failure {
            Some(error) => Err(error),
            None => self.inner.send_batch(address, entries).await,
        }
    }
}

/// Build a stream with default configuration over `service`
#[allow(dead_code)]
pub fn stream_over(service: &FlakyQueueService, queue: &QueueName) -> QueueStream {
    QueueStream::new(
        Arc::new(service.clone()),
        queue.clone(),
        &StreamConfig::default(),
    )
    .unwrap()
}

/// Create `queue` in a fresh in-memory service wrapped for failure injection
#[allow(dead_code)]
pub fn service_with_queue(queue: &QueueName) -> FlakyQueueService {
    let inner = InMemoryQueueService::new();
    inner.create_queue(queue);
    FlakyQueueService::new(inner)
}
