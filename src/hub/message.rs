use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Vote,
    Comment,
    Online,
    Offline,
    Text,
}

/// A point-to-point notification between two users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub kind: MessageKind,
    pub from: i64,
    pub to: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl NotificationMessage {
    pub fn new(kind: MessageKind, from: i64, to: i64, payload: serde_json::Value) -> Self {
        Self {
            kind,
            from,
            to,
            payload,
        }
    }

    pub fn text(from: i64, to: i64, body: &str) -> Self {
        Self::new(MessageKind::Text, from, to, serde_json::json!({ "body": body }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_uses_lowercase_kinds() {
        let msg = NotificationMessage::text(1, 2, "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["payload"]["body"], "hi");

        let parsed: NotificationMessage =
            serde_json::from_str(r#"{"kind":"vote","from":3,"to":4}"#).unwrap();
        assert_eq!(parsed.kind, MessageKind::Vote);
        assert!(parsed.payload.is_null());
    }
}
