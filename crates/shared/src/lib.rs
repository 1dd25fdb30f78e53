pub mod domain;
pub mod error;
pub mod protocol;

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{
        domain::{ConversationId, MessageId, MessageKind, PresenceStatus, UserId},
        protocol::{MessageRow, MutationOutcome, PresenceNotification, RealtimeEvent},
        error::ErrorCode,
    };

    #[test]
    fn message_kind_is_tagged_by_type() {
        let kind = MessageKind::Voice {
            audio_ref: "https://cdn/voice.webm".into(),
            duration_seconds: 3,
        };
        let json = serde_json::to_value(&kind).expect("serialize");
        assert_eq!(json["type"], "voice");
        assert_eq!(json["duration_seconds"], 3);
    }

    #[test]
    fn realtime_row_defaults_missing_flags() {
        let raw = r#"{
            "type": "message_inserted",
            "payload": { "row": {
                "id": "m1",
                "conversation_id": "c1",
                "sender_id": "u2",
                "kind": { "type": "text" },
                "content": "hey",
                "created_at": "2026-10-16T09:00:00Z"
            } }
        }"#;
        let event: RealtimeEvent = serde_json::from_str(raw).expect("parse");
        let expected = MessageRow {
            id: MessageId::new("m1"),
            conversation_id: ConversationId::new("c1"),
            sender_id: UserId::new("u2"),
            kind: MessageKind::Text,
            content: "hey".into(),
            created_at: Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap(),
            is_deleted: false,
            is_edited: false,
        };
        assert_eq!(event.row(), &expected);
    }

    #[test]
    fn rejected_outcome_carries_error_code() {
        let outcome = MutationOutcome::rejected(ErrorCode::EditWindowExpired, "too late");
        let json = serde_json::to_string(&outcome).expect("serialize");
        assert!(json.contains("edit_window_expired"));
        assert!(serde_json::to_string(&MutationOutcome::ok())
            .expect("serialize")
            .ends_with("true}"));
    }

    #[test]
    fn presence_status_uses_lowercase_wire_names() {
        assert_eq!(PresenceStatus::Away.to_string(), "away");
        let note: PresenceNotification =
            serde_json::from_str(r#"{"type":"leave","user_id":"u9"}"#).expect("parse");
        assert_eq!(
            note,
            PresenceNotification::Leave {
                user_id: UserId::new("u9")
            }
        );
    }

    #[test]
    fn attachment_ref_swap_keeps_metadata() {
        let kind = MessageKind::Document {
            attachment_ref: "local:tmp".into(),
            file_name: "plan.pdf".into(),
            file_size_bytes: 2048,
        };
        let swapped = kind.with_attachment_ref("https://cdn/plan.pdf");
        assert_eq!(swapped.attachment_ref(), Some("https://cdn/plan.pdf"));
        assert_eq!(swapped.placeholder_content().as_deref(), Some("plan.pdf"));
    }
}
