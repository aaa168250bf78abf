//! Chat message as it travels over the wire and into storage.

use serde::{Deserialize, Serialize};

/// Receiver value that addresses every online user.
pub const BROADCAST_RECEIVER: &str = "ALL";

/// A chat message. Content and attachment fields are opaque to routing and
/// pass through unchanged; storage may fill in `id` and `timestamp`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// RFC 3339, stamped by storage when the client leaves it out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    /// TEXT, FILE, IMAGE or VIDEO.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
}

impl ChatMessage {
    /// Room id if present and non-blank.
    pub fn room(&self) -> Option<&str> {
        non_blank(self.room_id.as_deref())
    }

    /// True when the receiver is missing, blank, or `ALL` in any case.
    pub fn is_broadcast(&self) -> bool {
        match non_blank(self.receiver.as_deref()) {
            None => true,
            Some(receiver) => receiver.eq_ignore_ascii_case(BROADCAST_RECEIVER),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(receiver: Option<&str>, room_id: Option<&str>) -> ChatMessage {
        ChatMessage {
            sender: "alice".to_string(),
            receiver: receiver.map(str::to_string),
            room_id: room_id.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_broadcast_receivers() {
        assert!(message(None, None).is_broadcast());
        assert!(message(Some(""), None).is_broadcast());
        assert!(message(Some("  "), None).is_broadcast());
        assert!(message(Some("ALL"), None).is_broadcast());
        assert!(message(Some("all"), None).is_broadcast());
        assert!(message(Some("All"), None).is_broadcast());
        assert!(!message(Some("bob"), None).is_broadcast());
        assert!(!message(Some("allison"), None).is_broadcast());
    }

    #[test]
    fn test_blank_room_is_no_room() {
        assert_eq!(message(None, Some("")).room(), None);
        assert_eq!(message(None, Some(" ")).room(), None);
        assert_eq!(message(None, Some("r1")).room(), Some("r1"));
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(ChatMessage {
            sender: "alice".to_string(),
            room_id: Some("r1".to_string()),
            kind: Some("FILE".to_string()),
            file_size: Some(42),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(json["sender"], "alice");
        assert_eq!(json["roomId"], "r1");
        assert_eq!(json["type"], "FILE");
        assert_eq!(json["fileSize"], 42);
        assert!(json.get("receiver").is_none());
        assert!(json.get("id").is_none());
    }
}
