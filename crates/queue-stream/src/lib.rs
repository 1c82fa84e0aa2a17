//! # Queue Stream
//!
//! Bidirectional stream adapter over a remote at-least-once message queue.
//!
//! Writes are buffered into bounded batches and submitted to the queue; reads
//! poll the queue, delete what they receive and emit it in received order
//! until the queue reports no messages. Both directions share one lazily
//! resolved queue address and report fatal errors through one channel.
//!
//! ## Module Organization
//!
//! - [`stream`] - The [`QueueStream`] adapter
//! - [`batcher`] - Write side: batching and flushing
//! - [`pump`] - Read side: polling, acknowledgment and draining
//! - [`address`] - Lazily resolved queue address
//! - [`service`] - The [`QueueService`] boundary to the queue
//! - [`providers`] - SQS and in-memory queue services
//! - [`message`] - Queue names, messages and write payloads
//! - [`config`] - Layered configuration
//! - [`error`] - Error types and the fatal error channel

// Module declarations
pub mod address;
pub mod batcher;
pub mod config;
pub mod error;
pub mod message;
pub mod providers;
pub mod pump;
pub mod service;
pub mod stream;

#[cfg(test)]
mod testing;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// Re-export commonly used types at crate root for convenience
pub use crate::config::{SqsConfig, StreamConfig};
pub use error::{
    ConfigurationError, ErrorWatcher, QueueError, StreamError, StreamSide, ValidationError,
};
pub use message::{Message, Payload, QueueAddress, QueueName};
pub use providers::{InMemoryQueueService, SqsQueueService};
pub use pump::AdapterState;
pub use service::QueueService;
pub use stream::QueueStream;
