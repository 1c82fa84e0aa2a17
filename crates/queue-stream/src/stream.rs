//! Bidirectional stream over a remote queue.
//!
//! [`QueueStream`] composes the address cache, the write batcher and the read
//! pump. Writes are batched into the queue; reads poll it, acknowledge what
//! they receive and yield messages in received order until the queue reports
//! no messages.
//!
//! ## Example
//!
//! ```no_run
//! use queue_stream::{QueueName, QueueStream, StreamConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StreamConfig::load(None)?;
//! let stream = QueueStream::connect_sqs(QueueName::new("jobs".to_string())?, &config)?;
//!
//! stream.write("first job").await?;
//! stream.close().await?;
//!
//! while let Some(message) = stream.read().await? {
//!     println!("{}", message.body);
//! }
//! # Ok(())
//! # }
//! ```

use crate::address::AddressCache;
use crate::batcher::{BatchLimits, WriteBatcher};
use crate::config::StreamConfig;
use crate::error::{ErrorChannel, ErrorWatcher, StreamError, StreamSide};
use crate::message::{Message, Payload, QueueName};
use crate::providers::SqsQueueService;
use crate::pump::{AdapterState, ReadPump, ReceiveSettings};
use crate::service::QueueService;
use futures::stream::{self, Stream};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;

/// Writable and readable view of one queue
///
/// The writable end is [`write`](Self::write) and [`close`](Self::close).
/// The readable end is [`read`](Self::read) or [`messages`](Self::messages).
/// Both ends share one queue address and one error channel.
pub struct QueueStream {
    address: Arc<AddressCache>,
    writer: WriteBatcher,
    pump: ReadPump,
    inbox: Mutex<mpsc::UnboundedReceiver<Message>>,
    errors: Arc<ErrorChannel>,
}

impl QueueStream {
    /// Create a stream over `queue` served by `service`
    ///
    /// The queue address is not resolved until the first read or flush.
    pub fn new(
        service: Arc<dyn QueueService>,
        queue: QueueName,
        config: &StreamConfig,
    ) -> Result<Self, StreamError> {
        config.validate()?;

        let address = Arc::new(AddressCache::new(Arc::clone(&service), queue));
        let errors = Arc::new(ErrorChannel::new());

        let limits = BatchLimits::from_config(config, service.max_batch_size());
        let writer = WriteBatcher::new(
            Arc::clone(&service),
            Arc::clone(&address),
            limits,
            Arc::clone(&errors),
        );

        let (pump, inbox) = ReadPump::new(
            service,
            Arc::clone(&address),
            ReceiveSettings::from_config(config),
            Arc::clone(&errors),
        );

        info!(queue = %address.queue(), "Queue stream created");

        Ok(Self {
            address,
            writer,
            pump,
            inbox: Mutex::new(inbox),
            errors,
        })
    }

    /// Create a stream over an SQS queue using the `sqs` section of `config`
    pub fn connect_sqs(queue: QueueName, config: &StreamConfig) -> Result<Self, StreamError> {
        let service = SqsQueueService::new(config.sqs.clone())?;
        Self::new(Arc::new(service), queue, config)
    }

    /// Write one payload
    ///
    /// Returns once the payload is buffered, which may wait for a running
    /// flush. Binary and structured payloads are converted to text first.
    pub async fn write(&self, payload: impl Into<Payload>) -> Result<(), StreamError> {
        self.writer.submit(payload).await
    }

    /// Signal the end of writes and flush the remaining payloads
    pub async fn close(&self) -> Result<(), StreamError> {
        self.writer.close().await
    }

    /// Read the next message
    ///
    /// Polls the queue only when no acknowledged message is waiting. Returns
    /// `Ok(None)` once the queue reported no messages and every acknowledgment
    /// in flight has completed.
    pub async fn read(&self) -> Result<Option<Message>, StreamError> {
        let mut inbox = self.inbox.lock().await;

        loop {
            if let Ok(message) = inbox.try_recv() {
                return Ok(Some(message));
            }

            match self.pump.state() {
                AdapterState::Closed => return Ok(None),
                AdapterState::Draining => {
                    self.pump.wait_closed().await;
                    if self.pump.is_halted() {
                        return Err(StreamError::Halted {
                            side: StreamSide::Read,
                        });
                    }
                    continue;
                }
                AdapterState::Active => {}
            }

            // Delivered messages and end-of-input are both picked up by the next pass
            self.pump.poll_once().await?;
        }
    }

    /// Messages of the stream as a [`Stream`]
    ///
    /// Ends after end-of-input or after yielding the first error.
    pub fn messages(&self) -> impl Stream<Item = Result<Message, StreamError>> + '_ {
        stream::unfold(Some(self), |state| async move {
            let this = state?;
            match this.read().await {
                Ok(Some(message)) => Some((Ok(message), Some(this))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Watch for the first fatal error of either side
    pub fn errors(&self) -> ErrorWatcher {
        self.errors.subscribe()
    }

    /// State of the readable end
    pub fn state(&self) -> AdapterState {
        self.pump.state()
    }

    /// True once `close` flushed every written payload
    pub fn is_write_finished(&self) -> bool {
        self.writer.is_finished()
    }

    /// True once both ends have finished
    pub fn is_finished(&self) -> bool {
        self.writer.is_finished() && self.pump.state() == AdapterState::Closed
    }

    pub fn queue(&self) -> &QueueName {
        self.address.queue()
    }
}

impl std::fmt::Debug for QueueStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStream")
            .field("address", &self.address)
            .field("writer", &self.writer)
            .field("pump", &self.pump)
            .finish()
    }
}
