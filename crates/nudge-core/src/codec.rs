//! JSON codec for the push control stream.
//!
//! Every frame on the wire is a JSON object. Inbound frames parse into a
//! string-keyed map and classify into an [`Envelope`]; outbound replies are
//! built here so every code path echoes `messageType` the same way.

use crate::error::{PushError, PushResult};
use crate::messages::{
    AckRequest, ClientMessage, Envelope, HelloRequest, RegisterRequest, UnregisterRequest,
};
use serde_json::{json, Map, Value};

/// Parse a raw frame into the JSON object every protocol message must be.
///
/// Anything that is not a JSON object (including valid JSON of another
/// shape) is a decode failure, which the caller treats as terminal.
pub fn parse_frame(raw: &[u8]) -> PushResult<Map<String, Value>> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) | Err(_) => Err(PushError::InvalidData),
    }
}

/// Classify a decoded frame.
///
/// An empty object is a ping. A missing or non-string `messageType`
/// classifies as [`ClientMessage::Unknown`] with an empty echoed type;
/// an unrecognized `messageType` (after lower-casing) is `Unknown` with
/// the original string preserved for the error reply.
pub fn classify(frame: Map<String, Value>) -> Envelope {
    if frame.is_empty() {
        return Envelope {
            message_type: "ping".to_owned(),
            body: ClientMessage::Ping,
        };
    }

    let message_type = match frame.get("messageType").and_then(Value::as_str) {
        Some(t) => t.to_owned(),
        None => {
            return Envelope {
                message_type: String::new(),
                body: ClientMessage::Unknown,
            }
        }
    };

    let body = match message_type.to_lowercase().as_str() {
        "hello" => ClientMessage::Hello(HelloRequest {
            uaid: field(&frame, "uaid"),
            channel_ids: field(&frame, "channelIDs"),
        }),
        "register" => ClientMessage::Register(RegisterRequest {
            channel_id: field(&frame, "channelID"),
        }),
        "unregister" => ClientMessage::Unregister(UnregisterRequest {
            channel_id: field(&frame, "channelID"),
        }),
        "ack" => ClientMessage::Ack(AckRequest {
            updates: field(&frame, "updates"),
        }),
        "ping" => ClientMessage::Ping,
        _ => ClientMessage::Unknown,
    };

    Envelope { message_type, body }
}

/// A field counts as present only when it exists and is not JSON null.
fn field(frame: &Map<String, Value>, key: &str) -> Option<Value> {
    frame.get(key).filter(|v| !v.is_null()).cloned()
}

/// Serialize an outbound reply.
pub fn encode(reply: &Value) -> PushResult<Vec<u8>> {
    serde_json::to_vec(reply).map_err(|e| PushError::Transport(format!("encode failed: {e}")))
}

/// Error reply: taxonomy status and message, echoing `messageType` only
/// when the request carried one.
pub fn error_reply(message_type: &str, err: &PushError) -> Value {
    let (status, error) = err.to_status();
    let mut reply = json!({
        "status": status,
        "error": error,
    });
    if !message_type.is_empty() {
        reply["messageType"] = Value::String(message_type.to_owned());
    }
    reply
}

/// Stamp a stored-updates object as a notification frame.
pub fn notification(mut updates: Value) -> Value {
    if let Some(obj) = updates.as_object_mut() {
        obj.insert(
            "messageType".to_owned(),
            Value::String("notification".to_owned()),
        );
    }
    updates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_str(raw: &str) -> Envelope {
        classify(parse_frame(raw.as_bytes()).unwrap())
    }

    #[test]
    fn empty_object_is_ping() {
        let envelope = classify_str("{}");
        assert_eq!(envelope.message_type, "ping");
        assert!(matches!(envelope.body, ClientMessage::Ping));
    }

    #[test]
    fn missing_message_type_is_unknown() {
        let envelope = classify_str(r#"{"foo": 1}"#);
        assert!(envelope.message_type.is_empty());
        assert!(matches!(envelope.body, ClientMessage::Unknown));
    }

    #[test]
    fn non_string_message_type_is_unknown() {
        let envelope = classify_str(r#"{"messageType": 42}"#);
        assert!(envelope.message_type.is_empty());
        assert!(matches!(envelope.body, ClientMessage::Unknown));
    }

    #[test]
    fn unrecognized_type_keeps_original_string() {
        let envelope = classify_str(r#"{"messageType": "bogus"}"#);
        assert_eq!(envelope.message_type, "bogus");
        assert!(matches!(envelope.body, ClientMessage::Unknown));
    }

    #[test]
    fn message_type_matching_is_case_insensitive() {
        let envelope = classify_str(r#"{"messageType": "HeLLo", "channelIDs": []}"#);
        assert_eq!(envelope.message_type, "HeLLo");
        match envelope.body {
            ClientMessage::Hello(req) => {
                assert!(req.uaid.is_none());
                assert_eq!(req.channel_ids, Some(json!([])));
            }
            other => panic!("expected hello, got {other:?}"),
        }
    }

    #[test]
    fn null_fields_count_as_absent() {
        let envelope = classify_str(r#"{"messageType": "register", "channelID": null}"#);
        match envelope.body {
            ClientMessage::Register(req) => assert!(req.channel_id.is_none()),
            other => panic!("expected register, got {other:?}"),
        }
    }

    #[test]
    fn non_object_frames_fail_to_parse() {
        assert!(parse_frame(b"[1, 2]").is_err());
        assert!(parse_frame(b"\"hello\"").is_err());
        assert!(parse_frame(b"not json").is_err());
    }

    #[test]
    fn error_reply_echoes_message_type_when_present() {
        let reply = error_reply("register", &PushError::InvalidCommand);
        assert_eq!(reply["messageType"], "register");
        assert_eq!(reply["status"], 401);
        assert_eq!(reply["error"], "Invalid Command");
    }

    #[test]
    fn error_reply_omits_empty_message_type() {
        let reply = error_reply("", &PushError::UnknownCommand);
        assert!(reply.get("messageType").is_none());
        assert_eq!(reply["status"], 401);
    }

    #[test]
    fn notification_stamps_message_type() {
        let frame = notification(json!({"updates": [{"channelID": "c1", "version": 7}]}));
        assert_eq!(frame["messageType"], "notification");
        assert_eq!(frame["updates"][0]["version"], 7);
    }

    #[test]
    fn encode_round_trips() {
        let reply = json!({"messageType": "ping", "status": 200});
        let bytes = encode(&reply).unwrap();
        let back: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, reply);
    }
}
