use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::ConversationId,
    protocol::{
        AttachmentUpload, EditMessageRequest, InsertMessageRequest, InsertedMessage, MessageRow,
        MutationOutcome, PresenceNotification, PresenceRecord, PresenceUpdate, RealtimeEvent,
        UnsendMessageRequest,
    },
};
use tokio::sync::broadcast;

/// Authoritative persistence for message rows. Client-side eligibility
/// checks only short-circuit calls; the outcome returned here decides.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn insert_message(&self, request: InsertMessageRequest) -> Result<InsertedMessage>;
    async fn edit_message(&self, request: EditMessageRequest) -> Result<MutationOutcome>;
    async fn unsend_message(&self, request: UnsendMessageRequest) -> Result<MutationOutcome>;
    async fn fetch_messages(&self, conversation_id: &ConversationId) -> Result<Vec<MessageRow>>;
}

#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<broadcast::Receiver<RealtimeEvent>>;
}

#[async_trait]
pub trait PresenceBackend: Send + Sync {
    async fn update_presence(&self, update: PresenceUpdate) -> Result<()>;
    async fn get_online_users(&self) -> Result<Vec<PresenceRecord>>;
    async fn subscribe(&self) -> Result<broadcast::Receiver<PresenceNotification>>;
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Stores the blob and returns its public URL.
    async fn upload(&self, upload: AttachmentUpload) -> Result<String>;
}

pub struct MissingMessageTransport;

#[async_trait]
impl MessageTransport for MissingMessageTransport {
    async fn insert_message(&self, request: InsertMessageRequest) -> Result<InsertedMessage> {
        Err(anyhow!(
            "message transport unavailable for conversation {}",
            request.conversation_id
        ))
    }

    async fn edit_message(&self, request: EditMessageRequest) -> Result<MutationOutcome> {
        Err(anyhow!(
            "message transport unavailable for message {}",
            request.message_id
        ))
    }

    async fn unsend_message(&self, request: UnsendMessageRequest) -> Result<MutationOutcome> {
        Err(anyhow!(
            "message transport unavailable for message {}",
            request.message_id
        ))
    }

    async fn fetch_messages(&self, conversation_id: &ConversationId) -> Result<Vec<MessageRow>> {
        Err(anyhow!(
            "message transport unavailable for conversation {conversation_id}"
        ))
    }
}

pub struct MissingRealtimeChannel;

#[async_trait]
impl RealtimeChannel for MissingRealtimeChannel {
    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<broadcast::Receiver<RealtimeEvent>> {
        Err(anyhow!(
            "realtime channel unavailable for conversation {conversation_id}"
        ))
    }
}

pub struct MissingPresenceBackend;

#[async_trait]
impl PresenceBackend for MissingPresenceBackend {
    async fn update_presence(&self, update: PresenceUpdate) -> Result<()> {
        Err(anyhow!(
            "presence backend unavailable for user {}",
            update.user_id
        ))
    }

    async fn get_online_users(&self) -> Result<Vec<PresenceRecord>> {
        Err(anyhow!("presence backend unavailable"))
    }

    async fn subscribe(&self) -> Result<broadcast::Receiver<PresenceNotification>> {
        Err(anyhow!("presence backend unavailable"))
    }
}

pub struct MissingAttachmentStore;

#[async_trait]
impl AttachmentStore for MissingAttachmentStore {
    async fn upload(&self, upload: AttachmentUpload) -> Result<String> {
        Err(anyhow!(
            "attachment store unavailable for {}",
            upload.object_path()
        ))
    }
}
