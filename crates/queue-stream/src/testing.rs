//! Scripted queue service used by the unit tests of the pumps.

use crate::error::QueueError;
use crate::message::{DeleteEntry, Message, QueueAddress, QueueName, SendEntry};
use crate::service::QueueService;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub const TEST_ADDRESS: &str = "https://sqs.us-east-1.amazonaws.com/123456789012/test-queue";

pub fn test_queue() -> QueueName {
    QueueName::new("test-queue".to_string()).unwrap()
}

pub fn messages(count: usize) -> Vec<Message> {
    (0..count)
        .map(|i| Message::new(format!("m-{}", i), format!("r-{}", i), format!("body-{}", i)))
        .collect()
}

pub fn connection_failed(message: &str) -> QueueError {
    QueueError::ConnectionFailed {
        message: message.to_string(),
    }
}

/// Queue service whose responses are scripted per call
///
/// Unscripted calls succeed: resolve returns [`TEST_ADDRESS`], receive
/// returns no messages, delete and send accept everything. Gates block a
/// call until the test adds a permit.
#[derive(Default)]
pub struct ScriptedQueueService {
    pub resolve_calls: AtomicUsize,
    pub receive_calls: AtomicUsize,
    resolve_failures: Mutex<VecDeque<QueueError>>,
    receives: Mutex<VecDeque<Result<Vec<Message>, QueueError>>>,
    delete_failures: Mutex<VecDeque<QueueError>>,
    send_failures: Mutex<VecDeque<QueueError>>,
    pub deleted: Mutex<Vec<Vec<DeleteEntry>>>,
    pub sent: Mutex<Vec<Vec<SendEntry>>>,
    resolve_gate: Option<Arc<Semaphore>>,
    receive_gate: Option<Arc<Semaphore>>,
    delete_gate: Option<Arc<Semaphore>>,
    send_gate: Option<Arc<Semaphore>>,
}

impl ScriptedQueueService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_receive(self, result: Result<Vec<Message>, QueueError>) -> Self {
        self.receives.lock().unwrap().push_back(result);
        self
    }

    pub fn with_resolve_failure(self, error: QueueError) -> Self {
        self.resolve_failures.lock().unwrap().push_back(error);
        self
    }

    pub fn with_delete_failure(self, error: QueueError) -> Self {
        self.delete_failures.lock().unwrap().push_back(error);
        self
    }

    pub fn with_send_failure(self, error: QueueError) -> Self {
        self.send_failures.lock().unwrap().push_back(error);
        self
    }

    pub fn with_resolve_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.resolve_gate = Some(gate);
        self
    }

    pub fn with_receive_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.receive_gate = Some(gate);
        self
    }

    pub fn with_delete_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.delete_gate = Some(gate);
        self
    }

    pub fn with_send_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.send_gate = Some(gate);
        self
    }

    pub fn sent_batches(&self) -> Vec<Vec<SendEntry>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn deleted_batches(&self) -> Vec<Vec<DeleteEntry>> {
        self.deleted.lock().unwrap().clone()
    }

    async fn pass(gate: &Option<Arc<Semaphore>>) {
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
    }
}

#[async_trait]
impl QueueService for ScriptedQueueService {
    async fn resolve_address(&self, _queue: &QueueName) -> Result<QueueAddress, QueueError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        Self::pass(&self.resolve_gate).await;
        match self.resolve_failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(QueueAddress::new(TEST_ADDRESS)),
        }
    }

    async fn receive(
        &self,
        _address: &QueueAddress,
        _max_messages: u32,
        _visibility_timeout_seconds: u32,
    ) -> Result<Vec<Message>, QueueError> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);
        Self::pass(&self.receive_gate).await;
        self.receives
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn delete_batch(
        &self,
        _address: &QueueAddress,
        entries: &[DeleteEntry],
    ) -> Result<(), QueueError> {
        Self::pass(&self.delete_gate).await;
        self.deleted.lock().unwrap().push(entries.to_vec());
        match self.delete_failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn send_batch(
        &self,
        _address: &QueueAddress,
        entries: &[SendEntry],
    ) -> Result<(), QueueError> {
        Self::pass(&self.send_gate).await;
        self.sent.lock().unwrap().push(entries.to_vec());
        match self.send_failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
