use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AttachmentKind, ConversationId, MessageId, MessageKind, PresenceStatus, UserId},
    error::{ApiError, ErrorCode},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertMessageRequest {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
}

impl InsertMessageRequest {
    pub fn attachment_ref(&self) -> Option<&str> {
        self.kind.attachment_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertedMessage {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditMessageRequest {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub new_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsendMessageRequest {
    pub message_id: MessageId,
    pub sender_id: UserId,
}

/// Result of an edit or unsend call. The server is the authoritative gate, so
/// a well-formed call can still come back with `success: false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl MutationOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(ApiError::new(code, message)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_edited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RealtimeEvent {
    MessageInserted { row: MessageRow },
    MessageUpdated { row: MessageRow },
}

impl RealtimeEvent {
    pub fn row(&self) -> &MessageRow {
        match self {
            Self::MessageInserted { row } | Self::MessageUpdated { row } => row,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub online_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Change notification from the presence broadcast. Receivers re-fetch the
/// full snapshot rather than patching from the notification itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceNotification {
    Sync,
    Join { user_id: UserId },
    Leave { user_id: UserId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    pub owner_id: UserId,
    pub kind: AttachmentKind,
    pub object_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl AttachmentUpload {
    pub fn bucket(&self) -> &'static str {
        self.kind.bucket()
    }

    pub fn object_path(&self) -> String {
        format!("{}/{}", self.kind.bucket(), self.object_name)
    }
}
