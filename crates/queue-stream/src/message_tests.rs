//! Tests for message types.

use super::*;
use serde_json::json;

#[test]
fn test_queue_name_validation() {
    // Valid names
    assert!(QueueName::new("test-queue".to_string()).is_ok());
    assert!(QueueName::new("queue_123".to_string()).is_ok());
    assert!(QueueName::new("orders.fifo".to_string()).is_ok());
    assert!(QueueName::new("a".repeat(80)).is_ok());

    // Invalid names
    assert!(QueueName::new("".to_string()).is_err());
    assert!(QueueName::new("a".repeat(81)).is_err());
    assert!(QueueName::new(".fifo".to_string()).is_err());
    assert!(QueueName::new("special@chars".to_string()).is_err());
    assert!(QueueName::new("has.dot".to_string()).is_err());
}

#[test]
fn test_queue_name_fifo_detection() {
    let fifo: QueueName = "orders.fifo".parse().unwrap();
    let standard: QueueName = "orders".parse().unwrap();

    assert!(fifo.is_fifo());
    assert!(!standard.is_fifo());
    assert_eq!(standard.to_string(), "orders");
}

#[test]
fn test_queue_name_deserialization_validates() {
    let valid: Result<QueueName, _> = serde_json::from_value(json!("events"));
    assert!(valid.is_ok());

    let invalid: Result<QueueName, _> = serde_json::from_value(json!("not valid!"));
    assert!(invalid.is_err());
}

#[test]
fn test_delete_entry_from_message() {
    let message = Message::new("m-1", "receipt-1", "hello");
    let entry = message.delete_entry();

    assert_eq!(entry.id, "m-1");
    assert_eq!(entry.receipt_token, "receipt-1");
}

// ============================================================================
// Payload Conversion Tests
// ============================================================================

mod payload_tests {
    use super::*;

    #[test]
    fn test_text_payload_is_used_as_is() {
        assert_eq!(Payload::from("hello").into_text(), "hello");
        assert_eq!(Payload::from("héllo".to_string()).into_text(), "héllo");
    }

    #[test]
    fn test_binary_payload_is_decoded() {
        assert_eq!(Payload::from(b"bytes".to_vec()).into_text(), "bytes");
        assert_eq!(Payload::from(&b"slice"[..]).into_text(), "slice");
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_rejected() {
        let text = Payload::from(vec![0x66, 0x6f, 0xff]).into_text();
        assert_eq!(text, "fo\u{fffd}");
    }

    #[test]
    fn test_structured_payload_is_serialized() {
        let payload = Payload::from(json!({ "id": 7 }));
        assert_eq!(payload.into_text(), r#"{"id":7}"#);

        assert_eq!(Payload::from(json!(42)).into_text(), "42");
        assert_eq!(Payload::from(json!(null)).into_text(), "null");
    }

    #[test]
    fn test_display_payload() {
        assert_eq!(Payload::display(3.5).into_text(), "3.5");
    }
}
