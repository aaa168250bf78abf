//! JSON wire codec for inbound chat payloads and outbound frames.

use axum::extract::ws::Message;
use serde::Serialize;

use crate::chat::message::ChatMessage;
use crate::error::CourierError;

/// Decode a raw inbound payload into a chat message.
/// Rejects malformed JSON and messages without a sender.
pub fn decode_inbound(raw: &[u8]) -> Result<ChatMessage, CourierError> {
    let message: ChatMessage =
        serde_json::from_slice(raw).map_err(|e| CourierError::Decode(e.to_string()))?;

    if message.sender.trim().is_empty() {
        return Err(CourierError::Decode("missing sender".to_string()));
    }

    Ok(message)
}

/// Serialize any payload into an outbound text frame.
pub fn encode_frame<T: Serialize>(payload: &T) -> Result<Message, CourierError> {
    let json = serde_json::to_string(payload)?;
    Ok(Message::Text(json.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_message() {
        let raw = br#"{
            "sender": "alice",
            "receiver": "bob",
            "content": "hi",
            "type": "TEXT",
            "fileName": "notes.txt",
            "fileSize": 12
        }"#;
        let msg = decode_inbound(raw).unwrap();
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.receiver.as_deref(), Some("bob"));
        assert_eq!(msg.kind.as_deref(), Some("TEXT"));
        assert_eq!(msg.file_name.as_deref(), Some("notes.txt"));
        assert_eq!(msg.file_size, Some(12));
        assert_eq!(msg.room_id, None);
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let msg = decode_inbound(br#"{"sender":"alice","deletedFor":["bob"]}"#).unwrap();
        assert_eq!(msg.sender, "alice");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_inbound(b"not json").unwrap_err();
        assert!(matches!(err, CourierError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_missing_or_blank_sender() {
        assert!(matches!(
            decode_inbound(br#"{"content":"hi"}"#),
            Err(CourierError::Decode(_))
        ));
        assert!(matches!(
            decode_inbound(br#"{"sender":"  ","content":"hi"}"#),
            Err(CourierError::Decode(_))
        ));
    }

    #[test]
    fn test_encode_reflects_current_fields() {
        let mut msg = decode_inbound(br#"{"sender":"alice","content":"hi"}"#).unwrap();
        msg.id = Some("m-1".to_string());
        msg.timestamp = Some("2026-01-01T00:00:00Z".to_string());

        let frame = encode_frame(&msg).unwrap();
        let text = match frame {
            Message::Text(text) => text,
            other => panic!("Expected text frame, got: {:?}", other),
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["id"], "m-1");
        assert_eq!(value["timestamp"], "2026-01-01T00:00:00Z");
        assert_eq!(value["content"], "hi");
    }
}
