//! Tests for error types.

use super::*;

#[test]
fn test_error_transience() {
    assert!(QueueError::ConnectionFailed {
        message: "network error".to_string(),
    }
    .is_transient());

    assert!(!QueueError::QueueNotFound {
        queue_name: "test".to_string(),
    }
    .is_transient());

    assert!(!QueueError::BatchTooLarge {
        size: 11,
        max_size: 10
    }
    .is_transient());
}

#[test]
fn test_fatal_classification() {
    let send = StreamError::SendBatch {
        entries: 3,
        source: QueueError::ConnectionFailed {
            message: "reset".to_string(),
        },
    };
    assert!(send.is_fatal());

    let resolve = StreamError::AddressResolution {
        queue: "orders".to_string(),
        source: QueueError::QueueNotFound {
            queue_name: "orders".to_string(),
        },
    };
    assert!(!resolve.is_fatal(), "Address resolution is retryable");

    assert!(!StreamError::Closed.is_fatal());
}

#[test]
fn test_error_channel_publishes_first_error_only() {
    let channel = ErrorChannel::new();
    let watcher = channel.subscribe();

    assert!(channel.current().is_none());

    let first = channel.report(StreamError::Receive {
        source: QueueError::ConnectionFailed {
            message: "first".to_string(),
        },
    });
    let second = channel.report(StreamError::DeleteBatch {
        entries: 1,
        source: QueueError::ConnectionFailed {
            message: "second".to_string(),
        },
    });

    assert!(first);
    assert!(!second, "Only one fatal error is ever published");

    let published = watcher.current().expect("error should be published");
    assert!(matches!(*published, StreamError::Receive { .. }));
}

#[tokio::test]
async fn test_error_watcher_waits_for_report() {
    let channel = std::sync::Arc::new(ErrorChannel::new());
    let mut watcher = channel.subscribe();

    let reporter = std::sync::Arc::clone(&channel);
    tokio::spawn(async move {
        reporter.report(StreamError::Receive {
            source: QueueError::ConnectionFailed {
                message: "boom".to_string(),
            },
        });
    });

    let error = watcher.wait().await.expect("error should arrive");
    assert!(error.is_fatal());
}

#[tokio::test]
async fn test_error_watcher_returns_none_when_channel_dropped() {
    let channel = ErrorChannel::new();
    let mut watcher = channel.subscribe();
    drop(channel);

    assert!(watcher.wait().await.is_none());
}

#[test]
fn test_stream_side_display() {
    let error = StreamError::Halted {
        side: StreamSide::Write,
    };
    assert_eq!(
        error.to_string(),
        "The write side of the stream halted after a fatal error"
    );
}
