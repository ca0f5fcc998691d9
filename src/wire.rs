//! Socket wire protocol.
//!
//! Canonical inbound taxonomy (what the server's hub emits today):
//! `message`, `user_connected`, `user_disconnected`. Earlier server builds
//! used `chat` / `user_connect` / `user_disconnect` and put the presence user
//! id in `sender_id`; those spellings are accepted as decode aliases so a
//! client update can ship ahead of the server. Unknown types are logged and
//! dropped by the connection manager; a bad frame never tears the socket down.

use serde::{Deserialize, Serialize};

use crate::api::MessageRecord;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(alias = "chat")]
    Message { content: MessageRecord },

    #[serde(alias = "user_connect")]
    UserConnected {
        #[serde(alias = "sender_id")]
        user_id: i64,
    },

    #[serde(alias = "user_disconnect")]
    UserDisconnected {
        #[serde(alias = "sender_id")]
        user_id: i64,
    },
}

/// Outbound chat frame, mirrored to the durable POST.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ClientFrame {
    pub receiver_id: i64,
    pub content: String,
    pub sender_id: i64,
}

pub fn decode(text: &str) -> Result<ServerEvent, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn encode(frame: &ClientFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_canonical_message() {
        let ev = decode(
            r#"{"type":"message","content":{"id":9,"sender_id":5,"receiver_id":1,
                "content":"hi","created_at":"2024-03-01T10:00:00Z"}}"#,
        )
        .unwrap();
        match ev {
            ServerEvent::Message { content } => {
                assert_eq!(content.id, 9);
                assert_eq!(content.sender_id, 5);
                assert_eq!(content.content, "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decodes_legacy_chat_alias() {
        let ev = decode(
            r#"{"type":"chat","content":{"id":3,"sender_id":2,"receiver_id":1,
                "content":"old","created_at":"2024-03-01T10:00:00Z"}}"#,
        )
        .unwrap();
        assert!(matches!(ev, ServerEvent::Message { .. }));
    }

    #[test]
    fn decodes_presence_both_vocabularies() {
        let a = decode(r#"{"type":"user_connected","user_id":7}"#).unwrap();
        assert_eq!(a, ServerEvent::UserConnected { user_id: 7 });

        let b = decode(r#"{"type":"user_connect","sender_id":7}"#).unwrap();
        assert_eq!(b, ServerEvent::UserConnected { user_id: 7 });

        let c = decode(r#"{"type":"user_disconnect","sender_id":4}"#).unwrap();
        assert_eq!(c, ServerEvent::UserDisconnected { user_id: 4 });
    }

    #[test]
    fn unknown_type_is_an_error_not_a_panic() {
        assert!(decode(r#"{"type":"typing","user_id":1}"#).is_err());
        assert!(decode("not json").is_err());
    }

    #[test]
    fn outbound_frame_shape() {
        let json = encode(&ClientFrame {
            receiver_id: 2,
            content: "hi".into(),
            sender_id: 1,
        })
        .unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["receiver_id"], 2);
        assert_eq!(v["content"], "hi");
        assert_eq!(v["sender_id"], 1);
    }
}
