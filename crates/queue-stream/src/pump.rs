//! Read side of the stream: polls the queue, acknowledges and emits messages.
//!
//! A poll that returns messages deletes them from the queue before emitting
//! them. Messages whose delete fails are never emitted; the queue service
//! redelivers them once their visibility timeout expires.
//!
//! A poll that returns no messages starts draining: the pump waits until no
//! delete-then-emit sequence is in flight, then closes. Results of polls
//! that arrive after draining started are discarded.

use crate::address::AddressCache;
use crate::config::StreamConfig;
use crate::error::{ErrorChannel, StreamError, StreamSide};
use crate::message::{DeleteEntry, Message};
use crate::service::QueueService;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info};

#[cfg(test)]
#[path = "pump_tests.rs"]
mod tests;

/// Lifecycle of the read side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Polling for messages
    Active,
    /// The queue reported no messages; waiting for in-flight acknowledgments
    Draining,
    /// End-of-input signaled; no further messages are emitted
    Closed,
}

/// Result of a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Messages were acknowledged and emitted
    Delivered(usize),
    /// Nothing was emitted; the pump is draining or closed
    NoProgress,
    /// This poll observed the end of input and closed the pump
    EndOfInput,
}

/// Receive parameters of the pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveSettings {
    pub max_messages: u32,
    pub visibility_timeout_seconds: u32,
    pub drain_interval: Duration,
}

impl ReceiveSettings {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            max_messages: config.max_receive_batch,
            visibility_timeout_seconds: config.visibility_timeout_seconds,
            drain_interval: config.drain_poll_interval(),
        }
    }
}

#[derive(Debug)]
struct PumpState {
    phase: AdapterState,
    in_flight: usize,
    halted: bool,
}

/// Decrements the in-flight count when a delete-then-emit sequence ends
struct InFlight<'a> {
    pump: &'a PumpShared,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.pump.lock_state().in_flight -= 1;
        self.pump.acknowledged.notify_waiters();
    }
}

struct PumpShared {
    service: Arc<dyn QueueService>,
    address: Arc<AddressCache>,
    settings: ReceiveSettings,
    state: Mutex<PumpState>,
    acknowledged: Notify,
    closed: Notify,
    outbox: mpsc::UnboundedSender<Message>,
    errors: Arc<ErrorChannel>,
}

impl PumpShared {
    async fn poll(&self) -> Result<PollOutcome, StreamError> {
        {
            let state = self.lock_state();
            if state.halted {
                return Err(StreamError::Halted {
                    side: StreamSide::Read,
                });
            }
            if state.phase != AdapterState::Active {
                return Ok(PollOutcome::NoProgress);
            }
        }

        let address = self.address.resolve().await?;

        let received = match self
            .service
            .receive(
                &address,
                self.settings.max_messages,
                self.settings.visibility_timeout_seconds,
            )
            .await
        {
            Ok(messages) => messages,
            Err(source) => return Err(self.halt(StreamError::Receive { source })),
        };

        if received.is_empty() {
            return Ok(self.drain().await);
        }

        let count = received.len();
        {
            let mut state = self.lock_state();
            if state.phase != AdapterState::Active {
                debug!(
                    queue = %self.address.queue(),
                    discarded = count,
                    "Discarding poll result that arrived after draining started"
                );
                return Ok(PollOutcome::NoProgress);
            }
            state.in_flight += 1;
        }
        let _in_flight = InFlight { pump: self };

        let entries: Vec<DeleteEntry> = received.iter().map(Message::delete_entry).collect();
        if let Err(source) = self.service.delete_batch(&address, &entries).await {
            return Err(self.halt(StreamError::DeleteBatch {
                entries: count,
                source,
            }));
        }

        debug!(queue = %self.address.queue(), batch_size = count, "Acknowledged received batch");
        for message in received {
            if self.outbox.send(message).is_err() {
                debug!(queue = %self.address.queue(), "Reader dropped, message not emitted");
                break;
            }
        }

        Ok(PollOutcome::Delivered(count))
    }

    async fn drain(&self) -> PollOutcome {
        {
            let mut state = self.lock_state();
            if state.phase != AdapterState::Active {
                return PollOutcome::NoProgress;
            }
            state.phase = AdapterState::Draining;
            info!(
                queue = %self.address.queue(),
                in_flight = state.in_flight,
                "Queue reported no messages, draining"
            );
        }

        loop {
            let notified = self.acknowledged.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.lock_state().in_flight == 0 {
                break;
            }
            let _ = tokio::time::timeout(self.settings.drain_interval, notified).await;
        }

        self.lock_state().phase = AdapterState::Closed;
        self.closed.notify_waiters();
        info!(queue = %self.address.queue(), "Read side finished");

        PollOutcome::EndOfInput
    }

    fn halt(&self, error: StreamError) -> StreamError {
        self.lock_state().halted = true;
        error!(queue = %self.address.queue(), error = %error, "Halting read side");
        self.errors.report(error);
        self.closed.notify_waiters();
        StreamError::Halted {
            side: StreamSide::Read,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PumpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Polls the queue and emits acknowledged messages to an outbox channel
pub struct ReadPump {
    shared: Arc<PumpShared>,
}

impl ReadPump {
    /// Create a pump and the receiver its emitted messages arrive on
    pub fn new(
        service: Arc<dyn QueueService>,
        address: Arc<AddressCache>,
        settings: ReceiveSettings,
        errors: Arc<ErrorChannel>,
    ) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let pump = Self {
            shared: Arc::new(PumpShared {
                service,
                address,
                settings,
                state: Mutex::new(PumpState {
                    phase: AdapterState::Active,
                    in_flight: 0,
                    halted: false,
                }),
                acknowledged: Notify::new(),
                closed: Notify::new(),
                outbox,
                errors,
            }),
        };
        (pump, inbox)
    }

    /// Poll the queue once
    ///
    /// The poll runs on its own task. Dropping the returned future does not
    /// stop it: acknowledged messages still reach the outbox and draining
    /// still completes.
    ///
    /// Address resolution failures are returned as is and may be retried.
    /// Receive and delete failures are published on the error channel and
    /// halt the pump; this and every later call then return
    /// [`StreamError::Halted`].
    pub async fn poll_once(&self) -> Result<PollOutcome, StreamError> {
        let shared = Arc::clone(&self.shared);
        match tokio::spawn(async move { shared.poll().await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(StreamError::Halted {
                side: StreamSide::Read,
            }),
        }
    }

    /// Wait until the pump has closed or halted
    pub async fn wait_closed(&self) {
        loop {
            let notified = self.shared.closed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.shared.lock_state();
                if state.phase == AdapterState::Closed || state.halted {
                    return;
                }
            }
            notified.await;
        }
    }

    pub fn state(&self) -> AdapterState {
        self.shared.lock_state().phase
    }

    /// Number of delete-then-emit sequences currently running
    pub fn in_flight(&self) -> usize {
        self.shared.lock_state().in_flight
    }

    pub fn is_halted(&self) -> bool {
        self.shared.lock_state().halted
    }
}

impl std::fmt::Debug for ReadPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPump")
            .field("address", &self.shared.address)
            .field("settings", &self.shared.settings)
            .field("state", &*self.shared.lock_state())
            .finish()
    }
}
