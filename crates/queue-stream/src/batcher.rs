//! Write side of the stream: accumulates payloads into bounded batches.
//!
//! ## Admission
//!
//! A payload is admitted into the buffer when
//!
//! - the buffer holds fewer than `max_entries` payloads,
//! - no flush is in progress, and
//! - twice the byte size of the buffered payloads plus the candidate is below
//!   `max_bytes`.
//!
//! The doubled size check halves the usable batch payload compared to the
//! service limit. It is kept as is; changing it alters which writes share a
//! batch.
//!
//! A payload that is not admissible waits until a flush completes, re-checking
//! at least every `retry_interval`. Only one flush runs at a time.

use crate::address::AddressCache;
use crate::config::StreamConfig;
use crate::error::{ErrorChannel, StreamError, StreamSide};
use crate::message::{Payload, SendEntry};
use crate::service::QueueService;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info};

#[cfg(test)]
#[path = "batcher_tests.rs"]
mod tests;

/// Size and count limits of one send batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub retry_interval: Duration,
}

impl BatchLimits {
    pub fn from_config(config: &StreamConfig, service_max_entries: usize) -> Self {
        Self {
            max_entries: config.max_send_batch.min(service_max_entries).max(1),
            max_bytes: config.max_message_bytes,
            retry_interval: config.write_retry_interval(),
        }
    }

    /// Check the doubled size rule for a buffer of `buffered` bytes plus `candidate` bytes
    fn size_fits(&self, buffered: usize, candidate: usize) -> bool {
        buffered.saturating_add(candidate).saturating_mul(2) < self.max_bytes
    }
}

/// Outcome of one admission attempt
enum Admission {
    /// Payload buffered; carries the batch to flush if the buffer became full
    Admitted(Option<Vec<String>>),
    /// Payload does not fit; carries the current buffer to flush to make room
    MakeRoom(Vec<String>),
    /// A flush is in progress
    Wait,
    Halted,
    Closed,
}

#[derive(Debug, Default)]
struct WriteBuffer {
    entries: Vec<String>,
    bytes: usize,
    flushing: bool,
    halted: bool,
    closed: bool,
    finished: bool,
}

impl WriteBuffer {
    fn admit(&mut self, payload: &mut Option<String>, limits: &BatchLimits) -> Admission {
        if self.halted {
            return Admission::Halted;
        }
        if self.closed {
            return Admission::Closed;
        }
        if self.flushing {
            return Admission::Wait;
        }

        let size = payload.as_ref().map_or(0, String::len);
        let fits = self.entries.len() < limits.max_entries && limits.size_fits(self.bytes, size);

        if !fits {
            return Admission::MakeRoom(self.take());
        }

        if let Some(text) = payload.take() {
            self.bytes += text.len();
            self.entries.push(text);
        }

        if self.is_full(limits) {
            Admission::Admitted(Some(self.take()))
        } else {
            Admission::Admitted(None)
        }
    }

    /// Full when no further payload, however small, could be admitted
    fn is_full(&self, limits: &BatchLimits) -> bool {
        self.entries.len() >= limits.max_entries || !limits.size_fits(self.bytes, 1)
    }

    /// Swap out the buffer and mark a flush as running
    fn take(&mut self) -> Vec<String> {
        self.flushing = true;
        self.bytes = 0;
        std::mem::take(&mut self.entries)
    }
}

struct BatcherShared {
    service: Arc<dyn QueueService>,
    address: Arc<AddressCache>,
    limits: BatchLimits,
    buffer: Mutex<WriteBuffer>,
    flushed: Notify,
    errors: Arc<ErrorChannel>,
}

impl BatcherShared {
    fn buffer(&self) -> MutexGuard<'_, WriteBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit one batch and release the flush slot
    async fn flush(&self, batch: Vec<String>) -> Result<(), StreamError> {
        let count = batch.len();
        let entries: Vec<SendEntry> = batch
            .into_iter()
            .enumerate()
            .map(|(index, body)| SendEntry {
                id: index.to_string(),
                body,
            })
            .collect();

        let result = if entries.is_empty() {
            Ok(())
        } else {
            debug!(queue = %self.address.queue(), batch_size = count, "Flushing write batch");
            self.send(&entries).await
        };

        {
            let mut buffer = self.buffer();
            buffer.flushing = false;
            if result.is_err() {
                buffer.halted = true;
            }
        }
        self.flushed.notify_waiters();

        if let Err(ref e) = result {
            error!(
                queue = %self.address.queue(),
                batch_size = count,
                error = %e,
                "Write batch lost, halting write side"
            );
        }

        result
    }

    /// Flush the last batch and record the outcome of the write side
    async fn finish(&self, batch: Vec<String>) -> Result<(), StreamError> {
        let remaining = batch.len();
        match self.flush(batch).await {
            Ok(()) => {
                self.buffer().finished = true;
                info!(
                    queue = %self.address.queue(),
                    flushed = remaining,
                    "Write side finished"
                );
                Ok(())
            }
            Err(e) => {
                self.errors.report(e);
                Err(StreamError::Halted {
                    side: StreamSide::Write,
                })
            }
        }
    }

    async fn send(&self, entries: &[SendEntry]) -> Result<(), StreamError> {
        let address = self.address.resolve().await.map_err(|e| match e {
            StreamError::AddressResolution { source, .. } => StreamError::SendBatch {
                entries: entries.len(),
                source,
            },
            other => other,
        })?;

        self.service
            .send_batch(&address, entries)
            .await
            .map_err(|source| StreamError::SendBatch {
                entries: entries.len(),
                source,
            })
    }
}

/// Buffers written payloads and submits them in batches
#[derive(Clone)]
pub struct WriteBatcher {
    shared: Arc<BatcherShared>,
}

impl WriteBatcher {
    pub fn new(
        service: Arc<dyn QueueService>,
        address: Arc<AddressCache>,
        limits: BatchLimits,
        errors: Arc<ErrorChannel>,
    ) -> Self {
        Self {
            shared: Arc::new(BatcherShared {
                service,
                address,
                limits,
                buffer: Mutex::new(WriteBuffer::default()),
                flushed: Notify::new(),
                errors,
            }),
        }
    }

    /// Accept one payload, waiting while the buffer cannot take it
    ///
    /// Returns once the payload is buffered. A flush triggered by the payload
    /// runs in the background; its failure is reported through the error
    /// channel and halts the write side.
    pub async fn submit(&self, payload: impl Into<Payload>) -> Result<(), StreamError> {
        let text = payload.into().into_text();
        let limits = self.shared.limits;

        if !limits.size_fits(0, text.len()) {
            return Err(StreamError::PayloadTooLarge {
                size: text.len(),
                max_size: limits.max_bytes,
            });
        }

        let mut pending = Some(text);
        loop {
            let notified = self.shared.flushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let admission = self.shared.buffer().admit(&mut pending, &limits);
            match admission {
                Admission::Admitted(None) => return Ok(()),
                Admission::Admitted(Some(batch)) => {
                    self.spawn_flush(batch);
                    return Ok(());
                }
                Admission::MakeRoom(batch) => self.spawn_flush(batch),
                Admission::Wait => {
                    // Either a flush completes or the interval elapses; both re-check admission
                    let _ = tokio::time::timeout(limits.retry_interval, notified).await;
                }
                Admission::Halted => {
                    return Err(StreamError::Halted {
                        side: StreamSide::Write,
                    })
                }
                Admission::Closed => return Err(StreamError::Closed),
            }
        }
    }

    /// Close the write side and flush what is still buffered
    ///
    /// Waits for a running flush, then submits the remaining payloads as one
    /// batch before returning. Calling `close` again is a no-op. If the
    /// returned future is dropped, the final flush still completes and a
    /// later `close` reports its outcome.
    pub async fn close(&self) -> Result<(), StreamError> {
        let batch = loop {
            let notified = self.shared.flushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut buffer = self.shared.buffer();
                if buffer.halted {
                    buffer.closed = true;
                    return Err(StreamError::Halted {
                        side: StreamSide::Write,
                    });
                }
                if buffer.finished {
                    return Ok(());
                }
                buffer.closed = true;
                if !buffer.flushing {
                    break buffer.take();
                }
            }

            let _ = tokio::time::timeout(self.shared.limits.retry_interval, notified).await;
        };

        // Detached from this future; a dropped close still completes the flush
        let shared = Arc::clone(&self.shared);
        match tokio::spawn(async move { shared.finish(batch).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(StreamError::Halted {
                side: StreamSide::Write,
            }),
        }
    }

    /// Number of payloads buffered and not yet part of a flush
    pub fn pending(&self) -> usize {
        self.shared.buffer().entries.len()
    }

    pub fn is_flushing(&self) -> bool {
        self.shared.buffer().flushing
    }

    /// True once `close` has flushed every buffered payload
    pub fn is_finished(&self) -> bool {
        self.shared.buffer().finished
    }

    pub fn is_halted(&self) -> bool {
        self.shared.buffer().halted
    }

    fn spawn_flush(&self, batch: Vec<String>) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if let Err(e) = shared.flush(batch).await {
                shared.errors.report(e);
            }
        });
    }
}

impl std::fmt::Debug for WriteBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buffer = self.shared.buffer();
        f.debug_struct("WriteBatcher")
            .field("limits", &self.shared.limits)
            .field("pending", &buffer.entries.len())
            .field("flushing", &buffer.flushing)
            .field("closed", &buffer.closed)
            .finish()
    }
}
