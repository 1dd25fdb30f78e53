use super::*;

use chrono::TimeZone;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn own_message(me: &UserId) -> Message {
    let mut message = Message::pending(
        TempId::new(),
        ConversationId::new("c1"),
        me.clone(),
        "hello".to_string(),
        MessageKind::Text,
        t0(),
    );
    message.key = MessageKey::Durable(MessageId::new("m1"));
    message
}

const WINDOW: Duration = Duration::from_secs(180);

#[test]
fn edit_window_is_half_open() {
    let me = UserId::new("me");
    let message = own_message(&me);

    assert!(message.can_modify(&me, t0(), WINDOW));
    assert!(message.can_modify(&me, t0() + TimeDelta::seconds(179), WINDOW));
    assert!(message.can_modify(
        &me,
        t0() + TimeDelta::milliseconds(179_999),
        WINDOW
    ));
    assert!(!message.can_modify(&me, t0() + TimeDelta::seconds(180), WINDOW));
    assert_eq!(
        message.check_modifiable(&me, t0() + TimeDelta::seconds(181), WINDOW),
        Err(Rejection::EditWindowElapsed { window: WINDOW })
    );
}

#[test]
fn time_left_counts_down_to_zero() {
    let me = UserId::new("me");
    let message = own_message(&me);
    assert_eq!(
        message.time_left(t0() + TimeDelta::seconds(60), WINDOW),
        Duration::from_secs(120)
    );
    assert_eq!(
        message.time_left(t0() + TimeDelta::seconds(500), WINDOW),
        Duration::ZERO
    );
}

#[test]
fn only_sender_may_modify() {
    let me = UserId::new("me");
    let message = own_message(&me);
    assert_eq!(
        message.check_modifiable(&UserId::new("other"), t0(), WINDOW),
        Err(Rejection::NotOwnMessage)
    );
}

#[test]
fn deleted_message_is_never_modifiable() {
    let me = UserId::new("me");
    let mut message = own_message(&me);
    message.mark_deleted();
    assert_eq!(message.content, TOMBSTONE);
    assert_eq!(
        message.check_modifiable(&me, t0(), WINDOW),
        Err(Rejection::Deleted)
    );
}

#[test]
fn deleted_rows_arrive_as_tombstones() {
    let row = MessageRow {
        id: MessageId::new("m9"),
        conversation_id: ConversationId::new("c1"),
        sender_id: UserId::new("other"),
        kind: MessageKind::Text,
        content: "secret".to_string(),
        created_at: t0(),
        is_deleted: true,
        is_edited: false,
    };
    let message = Message::from_row(row);
    assert!(message.deleted);
    assert_eq!(message.content, TOMBSTONE);
    assert_eq!(message.status, DeliveryStatus::Delivered);
}

#[test]
fn temp_ids_render_with_prefix() {
    let temp = TempId::new();
    assert!(temp.to_string().starts_with("temp-"));
    assert!(MessageKey::from(temp).is_temporary());
    assert_eq!(
        MessageKey::from(MessageId::new("m1")).durable(),
        Some(&MessageId::new("m1"))
    );
}
