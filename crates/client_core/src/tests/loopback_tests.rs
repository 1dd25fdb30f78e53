use super::*;

use chrono::{TimeZone, Utc};
use shared::domain::AttachmentKind;

use crate::clock::ManualClock;

fn backend() -> (Arc<ManualClock>, Arc<LoopbackBackend>) {
    let start = Utc
        .timestamp_opt(1_700_000_000, 0)
        .single()
        .expect("valid timestamp");
    let clock = Arc::new(ManualClock::new(start));
    let backend = LoopbackBackend::with_clock(clock.clone(), Duration::from_secs(180), 64);
    (clock, backend)
}

fn insert(conversation: &str, sender: &str, content: &str) -> InsertMessageRequest {
    InsertMessageRequest {
        conversation_id: ConversationId::new(conversation),
        sender_id: UserId::new(sender),
        kind: MessageKind::Text,
        content: content.to_string(),
    }
}

#[tokio::test]
async fn inserts_are_broadcast_to_their_conversation_only() {
    let (_, backend) = backend();
    let mut c1 = RealtimeChannel::subscribe(&*backend, &ConversationId::new("c1"))
        .await
        .expect("subscribe");
    let mut c2 = RealtimeChannel::subscribe(&*backend, &ConversationId::new("c2"))
        .await
        .expect("subscribe");

    let inserted = backend
        .insert_message(insert("c1", "me", "hi"))
        .await
        .expect("insert");

    let event = c1.try_recv().expect("pushed");
    assert_eq!(event.row().id, inserted.id);
    assert!(c2.try_recv().is_err());
}

#[tokio::test]
async fn mutations_follow_owner_and_window_rules() {
    let (clock, backend) = backend();
    let inserted = backend
        .insert_message(insert("c1", "me", "hi"))
        .await
        .expect("insert");

    let by_other = backend
        .unsend_message(UnsendMessageRequest {
            message_id: inserted.id.clone(),
            sender_id: UserId::new("other"),
        })
        .await
        .expect("call");
    assert_eq!(by_other.error.map(|e| e.code), Some(ErrorCode::NotOwner));

    clock.advance(TimeDelta::seconds(180));
    let late = backend
        .edit_message(EditMessageRequest {
            message_id: inserted.id.clone(),
            sender_id: UserId::new("me"),
            new_content: "edited".into(),
        })
        .await
        .expect("call");
    assert!(!late.success);
    assert_eq!(late.error.map(|e| e.code), Some(ErrorCode::EditWindowExpired));

    let missing = backend
        .unsend_message(UnsendMessageRequest {
            message_id: MessageId::new("nope"),
            sender_id: UserId::new("me"),
        })
        .await
        .expect("call");
    assert_eq!(missing.error.map(|e| e.code), Some(ErrorCode::NotFound));
}

#[tokio::test]
async fn offline_and_injected_failures_surface_as_errors() {
    let (_, backend) = backend();
    backend.fail_next_inserts(1);
    assert!(backend.insert_message(insert("c1", "me", "a")).await.is_err());
    assert!(backend.insert_message(insert("c1", "me", "a")).await.is_ok());

    backend.set_offline(true);
    assert!(backend
        .fetch_messages(&ConversationId::new("c1"))
        .await
        .is_err());
    backend.set_offline(false);
    assert_eq!(backend.calls().inserts, 2);
    assert_eq!(backend.calls().fetches, 1);
}

#[tokio::test]
async fn presence_snapshot_leaves_out_offline_users() {
    let (_, backend) = backend();
    let mut notifications = PresenceBackend::subscribe(&*backend)
        .await
        .expect("subscribe");

    backend.set_presence(&UserId::new("ana"), PresenceStatus::Online);
    backend.set_presence(&UserId::new("bo"), PresenceStatus::Away);
    backend.set_presence(&UserId::new("bo"), PresenceStatus::Offline);

    let online = backend.get_online_users().await.expect("snapshot");
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].user_id, UserId::new("ana"));
    assert_eq!(
        notifications.try_recv().expect("join"),
        PresenceNotification::Join {
            user_id: UserId::new("ana")
        }
    );
}

#[tokio::test]
async fn uploads_enforce_the_size_limit() {
    let (_, backend) = backend();
    let upload = |bytes: Vec<u8>| AttachmentUpload {
        owner_id: UserId::new("me"),
        kind: AttachmentKind::Image,
        object_name: "me/pic.png".into(),
        content_type: "image/png".into(),
        bytes,
    };

    let url = backend.upload(upload(vec![1; 8])).await.expect("upload");
    assert_eq!(url, "https://storage.loopback/chat-images/me/pic.png");
    assert_eq!(
        backend.blob("chat-images/me/pic.png").map(|b| b.bytes.len()),
        Some(8)
    );
    assert!(backend.upload(upload(vec![1; 65])).await.is_err());
}
