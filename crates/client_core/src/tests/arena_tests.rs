use super::*;

use chrono::TimeZone;
use shared::domain::{ConversationId, MessageKind};

use crate::messages::model::TOMBSTONE;

const DEDUP: Duration = Duration::from_secs(10);

fn me() -> UserId {
    UserId::new("me")
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("valid timestamp")
}

fn pending(temp: TempId, content: &str) -> Message {
    Message::pending(
        temp,
        ConversationId::new("c1"),
        me(),
        content.to_string(),
        MessageKind::Text,
        at(0),
    )
}

fn row(id: &str, sender: &str, content: &str) -> MessageRow {
    MessageRow {
        id: MessageId::new(id),
        conversation_id: ConversationId::new("c1"),
        sender_id: UserId::new(sender),
        kind: MessageKind::Text,
        content: content.to_string(),
        created_at: at(1),
        is_deleted: false,
        is_edited: false,
    }
}

fn contents(arena: &MessageArena) -> Vec<String> {
    arena.iter().map(|m| m.content.clone()).collect()
}

#[test]
fn acknowledgment_replaces_in_place() {
    let mut arena = MessageArena::new(me(), DEDUP);
    arena.apply(ArenaEvent::Inbound {
        row: row("m0", "other", "before"),
        at: at(0),
    });
    let temp = TempId::new();
    arena.apply(ArenaEvent::LocalSend(pending(temp, "Hello")));
    arena.apply(ArenaEvent::Inbound {
        row: row("m2", "other", "after"),
        at: at(1),
    });
    let position = arena.position(&MessageKey::Temp(temp));

    let applied = arena.apply(ArenaEvent::Acknowledged {
        temp,
        id: MessageId::new("m1"),
        at: at(2),
    });

    assert_eq!(
        applied,
        Applied::Reconciled {
            id: MessageId::new("m1"),
            dropped_echo: false
        }
    );
    let key = MessageKey::Durable(MessageId::new("m1"));
    assert_eq!(arena.position(&key), position);
    assert!(arena.get(&MessageKey::Temp(temp)).is_none());
    let message = arena.get(&key).expect("reconciled message");
    assert_eq!(message.status, DeliveryStatus::Delivered);
    assert_eq!(message.created_at, at(0));
    assert_eq!(contents(&arena), vec!["before", "Hello", "after"]);
}

#[test]
fn duplicate_acknowledgment_is_a_no_op() {
    let temp = TempId::new();
    let mut arena = MessageArena::new(me(), DEDUP);
    arena.apply(ArenaEvent::LocalSend(pending(temp, "Hello")));
    let ack = ArenaEvent::Acknowledged {
        temp,
        id: MessageId::new("m1"),
        at: at(1),
    };

    let (once, _) = arena.reduce(ack.clone());
    let (twice, applied) = once.reduce(ack);

    assert_eq!(applied, Applied::Ignored);
    assert_eq!(once.to_vec(), twice.to_vec());
    assert_eq!(twice.durable_for(temp), Some(&MessageId::new("m1")));
}

#[test]
fn reduce_leaves_the_source_untouched() {
    let arena = MessageArena::new(me(), DEDUP);
    let (next, applied) = arena.reduce(ArenaEvent::LocalSend(pending(TempId::new(), "x")));
    assert!(matches!(applied, Applied::Appended(_)));
    assert!(arena.is_empty());
    assert_eq!(next.len(), 1);
}

#[test]
fn echo_after_ack_is_not_inserted() {
    let temp = TempId::new();
    let mut arena = MessageArena::new(me(), DEDUP);
    arena.apply(ArenaEvent::LocalSend(pending(temp, "Hello")));
    arena.apply(ArenaEvent::Acknowledged {
        temp,
        id: MessageId::new("m1"),
        at: at(1),
    });

    let applied = arena.apply(ArenaEvent::Inbound {
        row: row("m1", "me", "Hello"),
        at: at(2),
    });

    assert_eq!(applied, Applied::EchoOfAcknowledged(MessageId::new("m1")));
    assert_eq!(arena.len(), 1);

    // Past the dedup window the index still prevents a second copy.
    let late = arena.apply(ArenaEvent::Inbound {
        row: row("m1", "me", "Hello"),
        at: at(60),
    });
    assert_eq!(late, Applied::Duplicate(MessageKey::Durable(MessageId::new("m1"))));
    assert_eq!(arena.len(), 1);
}

#[test]
fn push_before_ack_folds_into_the_optimistic_slot() {
    let temp = TempId::new();
    let mut arena = MessageArena::new(me(), DEDUP);
    arena.apply(ArenaEvent::LocalSend(pending(temp, "Hello")));
    arena.apply(ArenaEvent::Inbound {
        row: row("m1", "me", "Hello"),
        at: at(1),
    });
    assert_eq!(arena.len(), 2);

    let applied = arena.apply(ArenaEvent::Acknowledged {
        temp,
        id: MessageId::new("m1"),
        at: at(2),
    });

    assert_eq!(
        applied,
        Applied::Reconciled {
            id: MessageId::new("m1"),
            dropped_echo: true
        }
    );
    assert_eq!(arena.len(), 1);
    assert_eq!(arena.position(&MessageKey::Durable(MessageId::new("m1"))), Some(0));
}

#[test]
fn identical_rapid_sends_stay_separate() {
    let first = TempId::new();
    let second = TempId::new();
    let mut arena = MessageArena::new(me(), DEDUP);
    arena.apply(ArenaEvent::LocalSend(pending(first, "same")));
    arena.apply(ArenaEvent::LocalSend(pending(second, "same")));

    arena.apply(ArenaEvent::Acknowledged {
        temp: second,
        id: MessageId::new("m2"),
        at: at(1),
    });
    arena.apply(ArenaEvent::Acknowledged {
        temp: first,
        id: MessageId::new("m1"),
        at: at(1),
    });

    let ids: Vec<_> = arena.iter().map(|m| m.key.to_string()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
}

#[test]
fn failed_send_removes_the_entry() {
    let temp = TempId::new();
    let mut arena = MessageArena::new(me(), DEDUP);
    arena.apply(ArenaEvent::LocalSend(pending(temp, "Hi")));
    assert_eq!(
        arena.apply(ArenaEvent::SendFailed { temp }),
        Applied::Removed(MessageKey::Temp(temp))
    );
    assert!(arena.is_empty());
    assert_eq!(arena.apply(ArenaEvent::SendFailed { temp }), Applied::Ignored);
}

#[test]
fn upload_marks_sent_and_swaps_ref() {
    let temp = TempId::new();
    let mut arena = MessageArena::new(me(), DEDUP);
    let mut message = pending(temp, "Image");
    message.kind = MessageKind::Image {
        attachment_ref: "local:preview".to_string(),
        file_name: "cat.png".to_string(),
    };
    arena.apply(ArenaEvent::LocalSend(message));

    arena.apply(ArenaEvent::AttachmentUploaded {
        temp,
        public_url: "https://cdn/cat.png".to_string(),
    });

    let message = arena.get(&MessageKey::Temp(temp)).expect("entry");
    assert_eq!(message.status, DeliveryStatus::Sent);
    assert_eq!(message.kind.attachment_ref(), Some("https://cdn/cat.png"));
}

#[test]
fn remote_updates_do_not_resurrect_deleted_messages() {
    let mut arena = MessageArena::new(me(), DEDUP);
    arena.apply(ArenaEvent::Inbound {
        row: row("m1", "other", "first"),
        at: at(0),
    });

    let mut edited = row("m1", "other", "second");
    edited.is_edited = true;
    arena.apply(ArenaEvent::RemoteUpdate(edited));
    let key = MessageKey::Durable(MessageId::new("m1"));
    let message = arena.get(&key).expect("message");
    assert_eq!(message.content, "second");
    assert!(message.edited);

    let mut deleted = row("m1", "other", "second");
    deleted.is_deleted = true;
    arena.apply(ArenaEvent::RemoteUpdate(deleted));
    assert_eq!(
        arena.apply(ArenaEvent::RemoteUpdate(row("m1", "other", "third"))),
        Applied::Ignored
    );
    let message = arena.get(&key).expect("message");
    assert!(message.deleted);
    assert_eq!(message.content, TOMBSTONE);
}

#[test]
fn local_edit_and_unsend_keep_position() {
    let mut arena = MessageArena::new(me(), DEDUP);
    for id in ["m1", "m2", "m3"] {
        arena.apply(ArenaEvent::Inbound {
            row: row(id, "me", id),
            at: at(0),
        });
    }

    arena.apply(ArenaEvent::Edited {
        id: MessageId::new("m2"),
        content: "changed".to_string(),
    });
    arena.apply(ArenaEvent::Unsent {
        id: MessageId::new("m2"),
    });

    assert_eq!(contents(&arena), vec!["m1", TOMBSTONE, "m3"]);
    assert_eq!(
        arena.apply(ArenaEvent::Edited {
            id: MessageId::new("m2"),
            content: "again".to_string(),
        }),
        Applied::Ignored
    );
}
