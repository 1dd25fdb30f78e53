use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use shared::{
    domain::{MessageId, UserId},
    protocol::MessageRow,
};

use super::model::{DeliveryStatus, Message, MessageKey, TempId};

/// One write against the arena. Every source of change (local intents, the
/// server acknowledgment, pushed rows, history loads) is expressed as one of
/// these so the arena stays a plain state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ArenaEvent {
    LocalSend(Message),
    AttachmentUploaded {
        temp: TempId,
        public_url: String,
    },
    Acknowledged {
        temp: TempId,
        id: MessageId,
        at: DateTime<Utc>,
    },
    SendFailed {
        temp: TempId,
    },
    Inbound {
        row: MessageRow,
        at: DateTime<Utc>,
    },
    RemoteUpdate(MessageRow),
    Edited {
        id: MessageId,
        content: String,
    },
    Unsent {
        id: MessageId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Appended(MessageKey),
    /// The temp entry now carries its durable id. `dropped_echo` is set when a
    /// pushed copy of the same row had already been appended and was folded in.
    Reconciled {
        id: MessageId,
        dropped_echo: bool,
    },
    Updated(MessageKey),
    Removed(MessageKey),
    /// Echo of a send that was reconciled within the dedup window.
    EchoOfAcknowledged(MessageId),
    Duplicate(MessageKey),
    Ignored,
}

impl Applied {
    pub fn changed(&self) -> bool {
        matches!(
            self,
            Self::Appended(_) | Self::Reconciled { .. } | Self::Updated(_) | Self::Removed(_)
        )
    }
}

/// Ordered message storage for one conversation, indexed by stable key.
///
/// Slots are keyed by an insertion sequence number, so replacing a temporary
/// key with a durable one keeps the slot (and its list position) intact.
#[derive(Debug, Clone)]
pub struct MessageArena {
    me: UserId,
    dedup_window: Duration,
    next_seq: u64,
    slots: BTreeMap<u64, Message>,
    index: HashMap<MessageKey, u64>,
    reconciled: HashMap<TempId, MessageId>,
    recent_acks: VecDeque<(MessageId, DateTime<Utc>)>,
}

impl MessageArena {
    pub fn new(me: UserId, dedup_window: Duration) -> Self {
        Self {
            me,
            dedup_window,
            next_seq: 0,
            slots: BTreeMap::new(),
            index: HashMap::new(),
            reconciled: HashMap::new(),
            recent_acks: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Messages in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.slots.values()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.slots.values().cloned().collect()
    }

    pub fn get(&self, key: &MessageKey) -> Option<&Message> {
        self.index.get(key).and_then(|seq| self.slots.get(seq))
    }

    pub fn position(&self, key: &MessageKey) -> Option<usize> {
        let seq = self.index.get(key)?;
        Some(self.slots.range(..*seq).count())
    }

    pub fn durable_for(&self, temp: TempId) -> Option<&MessageId> {
        self.reconciled.get(&temp)
    }

    /// Applies `event` to a copy of `self`, leaving `self` untouched.
    pub fn reduce(&self, event: ArenaEvent) -> (Self, Applied) {
        let mut next = self.clone();
        let applied = next.apply(event);
        (next, applied)
    }

    pub fn apply(&mut self, event: ArenaEvent) -> Applied {
        match event {
            ArenaEvent::LocalSend(message) => self.append(message),
            ArenaEvent::AttachmentUploaded { temp, public_url } => {
                let key = MessageKey::Temp(temp);
                match self.get_mut(&key) {
                    Some(message) if message.status == DeliveryStatus::Pending => {
                        message.kind = message.kind.with_attachment_ref(public_url);
                        message.status = DeliveryStatus::Sent;
                        Applied::Updated(key)
                    }
                    _ => Applied::Ignored,
                }
            }
            ArenaEvent::Acknowledged { temp, id, at } => self.acknowledge(temp, id, at),
            ArenaEvent::SendFailed { temp } => {
                let key = MessageKey::Temp(temp);
                match self.index.remove(&key) {
                    Some(seq) => {
                        self.slots.remove(&seq);
                        Applied::Removed(key)
                    }
                    None => Applied::Ignored,
                }
            }
            ArenaEvent::Inbound { row, at } => self.inbound(row, at),
            ArenaEvent::RemoteUpdate(row) => self.remote_update(row),
            ArenaEvent::Edited { id, content } => {
                let key = MessageKey::Durable(id);
                match self.get_mut(&key) {
                    Some(message) if !message.deleted => {
                        message.content = content;
                        message.edited = true;
                        Applied::Updated(key)
                    }
                    _ => Applied::Ignored,
                }
            }
            ArenaEvent::Unsent { id } => {
                let key = MessageKey::Durable(id);
                match self.get_mut(&key) {
                    Some(message) if !message.deleted => {
                        message.mark_deleted();
                        Applied::Updated(key)
                    }
                    _ => Applied::Ignored,
                }
            }
        }
    }

    fn get_mut(&mut self, key: &MessageKey) -> Option<&mut Message> {
        let seq = self.index.get(key)?;
        self.slots.get_mut(seq)
    }

    fn append(&mut self, message: Message) -> Applied {
        let key = message.key.clone();
        if self.index.contains_key(&key) {
            return Applied::Duplicate(key);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(key.clone(), seq);
        self.slots.insert(seq, message);
        Applied::Appended(key)
    }

    fn acknowledge(&mut self, temp: TempId, id: MessageId, at: DateTime<Utc>) -> Applied {
        if self.reconciled.contains_key(&temp) {
            return Applied::Ignored;
        }
        let temp_key = MessageKey::Temp(temp);
        let Some(seq) = self.index.remove(&temp_key) else {
            return Applied::Ignored;
        };

        let durable_key = MessageKey::Durable(id.clone());
        // The push for this row beat the acknowledgment; keep the original slot.
        let dropped_echo = match self.index.remove(&durable_key) {
            Some(echo_seq) => {
                self.slots.remove(&echo_seq);
                true
            }
            None => false,
        };

        if let Some(message) = self.slots.get_mut(&seq) {
            message.key = durable_key.clone();
            message.status = DeliveryStatus::Delivered;
        }
        self.index.insert(durable_key, seq);
        self.reconciled.insert(temp, id.clone());
        self.remember_ack(id.clone(), at);
        Applied::Reconciled { id, dropped_echo }
    }

    fn inbound(&mut self, row: MessageRow, at: DateTime<Utc>) -> Applied {
        self.prune_acks(at);
        let key = MessageKey::Durable(row.id.clone());
        if self.index.contains_key(&key) {
            if row.sender_id == self.me && self.recent_acks.iter().any(|(id, _)| id == &row.id) {
                return Applied::EchoOfAcknowledged(row.id);
            }
            return Applied::Duplicate(key);
        }
        self.append(Message::from_row(row))
    }

    fn remote_update(&mut self, row: MessageRow) -> Applied {
        let key = MessageKey::Durable(row.id.clone());
        let Some(message) = self.get_mut(&key) else {
            return Applied::Ignored;
        };
        if message.deleted {
            return Applied::Ignored;
        }
        if row.is_deleted {
            message.mark_deleted();
        } else {
            message.content = row.content;
            message.kind = row.kind;
            message.edited = message.edited || row.is_edited;
        }
        Applied::Updated(key)
    }

    fn remember_ack(&mut self, id: MessageId, at: DateTime<Utc>) {
        self.prune_acks(at);
        self.recent_acks.push_back((id, at));
    }

    fn prune_acks(&mut self, now: DateTime<Utc>) {
        let window = TimeDelta::from_std(self.dedup_window).unwrap_or(TimeDelta::MAX);
        while let Some((_, at)) = self.recent_acks.front() {
            if now - *at >= window {
                self.recent_acks.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "../tests/arena_tests.rs"]
mod tests;
