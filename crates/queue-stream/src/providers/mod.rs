//! Queue service implementations.
//!
//! This module contains concrete implementations of the
//! [`QueueService`](crate::service::QueueService) trait.

pub mod memory;
pub mod sqs;

pub use memory::InMemoryQueueService;
pub use sqs::{SqsError, SqsQueueService};
