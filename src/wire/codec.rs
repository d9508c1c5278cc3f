//! Frame parsing and serialization for the relay's JSON-array wire protocol (§4.3, §6).
//!
//! Frames are untagged JSON arrays: `["EVENT", subscription_id, <event>]`,
//! `["OK", event_id, accepted, message]`, `["EOSE", subscription_id]`,
//! `["REQ", subscription_id, <filter>, ...]`, `["CLOSE", subscription_id]`,
//! `["NOTICE", message]`. Parsing never panics: malformed input becomes
//! [`Frame::Invalid`] so callers can log and continue.

use serde_json::Value;

use super::event::EventData;

/// A frame received from or sent to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `["EVENT", subscription_id, <event>]` from the relay, or
    /// `["EVENT", <event>]` published to it.
    Event {
        /// Present on relay-to-client frames; absent on publish.
        subscription_id: Option<String>,
        /// The event payload.
        data: EventData,
    },
    /// `["OK", event_id, accepted, message]`.
    Ok {
        /// The id of the event being acknowledged.
        event_id: String,
        /// Whether the relay accepted it.
        accepted: bool,
        /// Human-readable relay message, often empty.
        message: String,
    },
    /// `["EOSE", subscription_id]`: end of stored events for a subscription.
    Eose {
        /// The subscription that reached end-of-stored-events.
        subscription_id: String,
    },
    /// `["NOTICE", message]`: informational text from the relay.
    Notice {
        /// The notice text.
        message: String,
    },
    /// A syntactically valid frame this node does not act on.
    Unknown(Value),
    /// Not a valid frame at all (not JSON, not an array, or too short).
    Invalid,
}

/// Parse a single relay-to-client frame from raw bytes.
#[must_use]
pub fn parse_frame(bytes: &[u8]) -> Frame {
    let Ok(value) = serde_json::from_slice::<Value>(bytes) else {
        return Frame::Invalid;
    };
    parse_value(&value)
}

fn parse_value(value: &Value) -> Frame {
    let Some(items) = value.as_array() else {
        return Frame::Invalid;
    };
    let Some(label) = items.first().and_then(Value::as_str) else {
        return Frame::Invalid;
    };

    match label {
        "EVENT" => parse_event_frame(items),
        "OK" => parse_ok_frame(items),
        "EOSE" => parse_eose_frame(items),
        "NOTICE" => parse_notice_frame(items),
        _ => Frame::Unknown(value.clone()),
    }
}

fn parse_event_frame(items: &[Value]) -> Frame {
    match items.len() {
        2 => match serde_json::from_value::<EventData>(items[1].clone()) {
            Ok(data) => Frame::Event { subscription_id: None, data },
            Err(_) => Frame::Invalid,
        },
        3 => {
            let Some(subscription_id) = items[1].as_str() else {
                return Frame::Invalid;
            };
            match serde_json::from_value::<EventData>(items[2].clone()) {
                Ok(data) => Frame::Event {
                    subscription_id: Some(subscription_id.to_string()),
                    data,
                },
                Err(_) => Frame::Invalid,
            }
        }
        _ => Frame::Invalid,
    }
}

fn parse_ok_frame(items: &[Value]) -> Frame {
    if items.len() < 3 {
        return Frame::Invalid;
    }
    let (Some(event_id), Some(accepted)) = (items[1].as_str(), items[2].as_bool()) else {
        return Frame::Invalid;
    };
    let message = items.get(3).and_then(Value::as_str).unwrap_or_default();
    Frame::Ok {
        event_id: event_id.to_string(),
        accepted,
        message: message.to_string(),
    }
}

fn parse_eose_frame(items: &[Value]) -> Frame {
    match items.get(1).and_then(Value::as_str) {
        Some(subscription_id) => Frame::Eose { subscription_id: subscription_id.to_string() },
        None => Frame::Invalid,
    }
}

fn parse_notice_frame(items: &[Value]) -> Frame {
    match items.get(1).and_then(Value::as_str) {
        Some(message) => Frame::Notice { message: message.to_string() },
        None => Frame::Invalid,
    }
}

/// Serialize `["EVENT", <event>]` for publishing to the relay.
pub fn serialize_event(event: &EventData) -> String {
    serde_json::to_string(&serde_json::json!(["EVENT", event]))
        .expect("event frame always serializes")
}

/// Serialize `["REQ", subscription_id, <filter>]`.
///
/// `subscription_id` must satisfy [`super::MAX_SUBSCRIPTION_ID_LENGTH`];
/// callers validate before calling (`validate_subscription_id`).
pub fn serialize_req(subscription_id: &str, filter: &Value) -> String {
    serde_json::to_string(&serde_json::json!(["REQ", subscription_id, filter]))
        .expect("req frame always serializes")
}

/// Serialize `["CLOSE", subscription_id]`.
pub fn serialize_close(subscription_id: &str) -> String {
    serde_json::to_string(&serde_json::json!(["CLOSE", subscription_id]))
        .expect("close frame always serializes")
}

/// Validate a subscription id against the relay's length limit (§6).
pub fn validate_subscription_id(subscription_id: &str) -> Result<(), String> {
    if subscription_id.is_empty() {
        return Err("subscription id cannot be empty".to_string());
    }
    if subscription_id.len() > super::MAX_SUBSCRIPTION_ID_LENGTH {
        return Err(format!(
            "subscription id exceeds maximum length of {} characters",
            super::MAX_SUBSCRIPTION_ID_LENGTH
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> EventData {
        EventData {
            id: "abc123".to_string(),
            pubkey: "deadbeef".to_string(),
            created_at: 1_700_000_000,
            kind: 40001,
            tags: vec![vec!["p".to_string(), "feedface".to_string()]],
            content: "ciphertext".to_string(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn test_parse_event_frame_with_subscription() {
        let raw = serde_json::json!(["EVENT", "sub1", sample_event()]).to_string();
        match parse_frame(raw.as_bytes()) {
            Frame::Event { subscription_id, data } => {
                assert_eq!(subscription_id.as_deref(), Some("sub1"));
                assert_eq!(data.id, "abc123");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_parse_event_frame_without_subscription() {
        let raw = serde_json::json!(["EVENT", sample_event()]).to_string();
        match parse_frame(raw.as_bytes()) {
            Frame::Event { subscription_id, .. } => assert!(subscription_id.is_none()),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ok_frame() {
        let raw = serde_json::json!(["OK", "abc123", true, "stored"]).to_string();
        match parse_frame(raw.as_bytes()) {
            Frame::Ok { event_id, accepted, message } => {
                assert_eq!(event_id, "abc123");
                assert!(accepted);
                assert_eq!(message, "stored");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_parse_eose_frame() {
        let raw = serde_json::json!(["EOSE", "sub1"]).to_string();
        assert_eq!(parse_frame(raw.as_bytes()), Frame::Eose { subscription_id: "sub1".to_string() });
    }

    #[test]
    fn test_parse_notice_frame() {
        let raw = serde_json::json!(["NOTICE", "rate limited"]).to_string();
        assert_eq!(parse_frame(raw.as_bytes()), Frame::Notice { message: "rate limited".to_string() });
    }

    #[test]
    fn test_parse_unknown_label_is_unknown_not_invalid() {
        let raw = serde_json::json!(["AUTH", "challenge"]).to_string();
        assert!(matches!(parse_frame(raw.as_bytes()), Frame::Unknown(_)));
    }

    #[test]
    fn test_parse_garbage_is_invalid() {
        assert_eq!(parse_frame(b"not json"), Frame::Invalid);
        assert_eq!(parse_frame(b"{}"), Frame::Invalid);
        assert_eq!(parse_frame(b"[]"), Frame::Invalid);
        assert_eq!(parse_frame(b"[\"EVENT\"]"), Frame::Invalid);
    }

    #[test]
    fn test_serialize_event_roundtrips_through_parse() {
        let event = sample_event();
        let raw = serialize_event(&event);
        match parse_frame(raw.as_bytes()) {
            Frame::Event { subscription_id, data } => {
                assert!(subscription_id.is_none());
                assert_eq!(data, event);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_validate_subscription_id() {
        assert!(validate_subscription_id("").is_err());
        assert!(validate_subscription_id(&"x".repeat(65)).is_err());
        assert!(validate_subscription_id(&"x".repeat(64)).is_ok());
        assert!(validate_subscription_id("sub1").is_ok());
    }
}
