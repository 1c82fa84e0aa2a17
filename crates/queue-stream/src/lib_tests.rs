//! Tests for the queue-stream library module.

use super::*;
use std::sync::Arc;

#[test]
fn test_default_config_is_valid() {
    assert!(StreamConfig::default().validate().is_ok());
}

#[tokio::test]
async fn test_stream_round_trip_through_memory_service() {
    let service = InMemoryQueueService::new();
    let queue = QueueName::new("round-trip".to_string()).unwrap();
    service.create_queue(&queue);

    let stream = QueueStream::new(Arc::new(service), queue, &StreamConfig::default()).unwrap();

    stream.write("hello").await.unwrap();
    stream.write(Payload::display(42)).await.unwrap();
    stream.close().await.unwrap();

    let first = stream.read().await.unwrap().unwrap();
    let second = stream.read().await.unwrap().unwrap();
    assert_eq!(first.body, "hello");
    assert_eq!(second.body, "42");

    assert!(stream.read().await.unwrap().is_none());
    assert!(stream.is_finished());
    assert!(stream.errors().current().is_none());
}
