use std::{fmt, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use shared::{
    domain::{ConversationId, MessageId, MessageKind, UserId},
    protocol::MessageRow,
};
use uuid::Uuid;

use crate::error::Rejection;

pub const TOMBSTONE: &str = "This message was unsent";

/// Locally generated identifier of a send that the server has not acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempId(Uuid);

impl TempId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "temp-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Temp(TempId),
    Durable(MessageId),
}

impl MessageKey {
    pub fn durable(&self) -> Option<&MessageId> {
        match self {
            Self::Durable(id) => Some(id),
            Self::Temp(_) => None,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temp(_))
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temp(temp) => temp.fmt(f),
            Self::Durable(id) => id.fmt(f),
        }
    }
}

impl From<MessageId> for MessageKey {
    fn from(value: MessageId) -> Self {
        Self::Durable(value)
    }
}

impl From<TempId> for MessageKey {
    fn from(value: TempId) -> Self {
        Self::Temp(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    /// Terminal; the entry leaves the list right after it is reported.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub key: MessageKey,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub kind: MessageKind,
    pub status: DeliveryStatus,
    pub deleted: bool,
    pub edited: bool,
}

impl Message {
    pub fn pending(
        temp: TempId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
        kind: MessageKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: MessageKey::Temp(temp),
            conversation_id,
            sender_id,
            content,
            created_at,
            kind,
            status: DeliveryStatus::Pending,
            deleted: false,
            edited: false,
        }
    }

    pub fn from_row(row: MessageRow) -> Self {
        let content = if row.is_deleted {
            TOMBSTONE.to_string()
        } else {
            row.content
        };
        Self {
            key: MessageKey::Durable(row.id),
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            content,
            created_at: row.created_at,
            kind: row.kind,
            status: DeliveryStatus::Delivered,
            deleted: row.is_deleted,
            edited: row.is_edited,
        }
    }

    pub fn durable_id(&self) -> Option<&MessageId> {
        self.key.durable()
    }

    pub fn is_own(&self, me: &UserId) -> bool {
        &self.sender_id == me
    }

    /// Checks the edit/unsend rule: own message, not deleted, and strictly
    /// inside the window measured from `created_at`.
    pub fn check_modifiable(
        &self,
        me: &UserId,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<(), Rejection> {
        if !self.is_own(me) {
            return Err(Rejection::NotOwnMessage);
        }
        if self.deleted {
            return Err(Rejection::Deleted);
        }
        if self.time_left(now, window).is_zero() {
            return Err(Rejection::EditWindowElapsed { window });
        }
        Ok(())
    }

    pub fn can_modify(&self, me: &UserId, now: DateTime<Utc>, window: Duration) -> bool {
        self.check_modifiable(me, now, window).is_ok()
    }

    /// Remaining edit/unsend time; zero once `now >= created_at + window`.
    pub fn time_left(&self, now: DateTime<Utc>, window: Duration) -> Duration {
        let Some(deadline) = TimeDelta::from_std(window)
            .ok()
            .and_then(|window| self.created_at.checked_add_signed(window))
        else {
            return Duration::MAX;
        };
        (deadline - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
        self.content = TOMBSTONE.to_string();
    }
}

#[cfg(test)]
#[path = "../tests/model_tests.rs"]
mod tests;
