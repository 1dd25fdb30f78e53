use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::TimeDelta;
use parking_lot::Mutex;
use shared::{
    domain::{ConversationId, MessageId, MessageKind, PresenceStatus, UserId},
    error::ErrorCode,
    protocol::{
        AttachmentUpload, EditMessageRequest, InsertMessageRequest, InsertedMessage, MessageRow,
        MutationOutcome, PresenceNotification, PresenceRecord, PresenceUpdate, RealtimeEvent,
        UnsendMessageRequest,
    },
};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    clock::{Clock, SystemClock},
    transport::{AttachmentStore, MessageTransport, PresenceBackend, RealtimeChannel},
};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub inserts: usize,
    pub edits: usize,
    pub unsends: usize,
    pub fetches: usize,
    pub presence_updates: usize,
    pub uploads: usize,
}

#[derive(Default)]
struct Failures {
    inserts: usize,
    uploads: usize,
    presence_updates: usize,
    offline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

struct LoopbackState {
    next_id: u64,
    rows: Vec<MessageRow>,
    presence: HashMap<UserId, PresenceRecord>,
    blobs: HashMap<String, StoredBlob>,
    calls: CallCounts,
    failures: Failures,
    insert_delay: Option<Duration>,
    ack_delay: Option<Duration>,
}

/// In-process stand-in for every remote collaborator: message persistence,
/// the realtime channel, presence and blob storage. It enforces the same
/// ownership, deletion and edit-window rules a real server would.
pub struct LoopbackBackend {
    clock: Arc<dyn Clock>,
    edit_window: Duration,
    max_attachment_bytes: u64,
    state: Mutex<LoopbackState>,
    channels: Mutex<HashMap<ConversationId, broadcast::Sender<RealtimeEvent>>>,
    presence_tx: broadcast::Sender<PresenceNotification>,
}

impl LoopbackBackend {
    pub fn new(edit_window: Duration, max_attachment_bytes: u64) -> Arc<Self> {
        Self::with_clock(Arc::new(SystemClock), edit_window, max_attachment_bytes)
    }

    pub fn with_clock(
        clock: Arc<dyn Clock>,
        edit_window: Duration,
        max_attachment_bytes: u64,
    ) -> Arc<Self> {
        let (presence_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Arc::new(Self {
            clock,
            edit_window,
            max_attachment_bytes,
            state: Mutex::new(LoopbackState {
                next_id: 1,
                rows: Vec::new(),
                presence: HashMap::new(),
                blobs: HashMap::new(),
                calls: CallCounts::default(),
                failures: Failures::default(),
                insert_delay: None,
                ack_delay: None,
            }),
            channels: Mutex::new(HashMap::new()),
            presence_tx,
        })
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    pub fn rows(&self, conversation_id: &ConversationId) -> Vec<MessageRow> {
        self.state
            .lock()
            .rows
            .iter()
            .filter(|row| &row.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn blob(&self, object_path: &str) -> Option<StoredBlob> {
        self.state.lock().blobs.get(object_path).cloned()
    }

    pub fn fail_next_inserts(&self, count: usize) {
        self.state.lock().failures.inserts = count;
    }

    pub fn fail_next_uploads(&self, count: usize) {
        self.state.lock().failures.uploads = count;
    }

    pub fn fail_next_presence_updates(&self, count: usize) {
        self.state.lock().failures.presence_updates = count;
    }

    /// While offline every call fails as a network error would.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().failures.offline = offline;
    }

    /// Delays each insert, before the row is stored or pushed, by `delay`.
    pub fn set_insert_delay(&self, delay: Option<Duration>) {
        self.state.lock().insert_delay = delay;
    }

    /// Stores and broadcasts each insert right away but holds its
    /// acknowledgment back by `delay`, so the push reaches listeners first.
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        self.state.lock().ack_delay = delay;
    }

    /// Stores and broadcasts a message from another participant.
    pub fn publish_message(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
    ) -> MessageRow {
        let row = self.store_row(InsertMessageRequest {
            conversation_id: conversation_id.clone(),
            sender_id: sender_id.clone(),
            kind: MessageKind::Text,
            content: content.to_string(),
        });
        self.broadcast(RealtimeEvent::MessageInserted { row: row.clone() });
        row
    }

    /// Marks `user_id` with `status` as another client would and notifies
    /// presence subscribers.
    pub fn set_presence(&self, user_id: &UserId, status: PresenceStatus) {
        self.record_presence(user_id.clone(), status);
        let notification = match status {
            PresenceStatus::Offline => PresenceNotification::Leave {
                user_id: user_id.clone(),
            },
            _ => PresenceNotification::Join {
                user_id: user_id.clone(),
            },
        };
        let _ = self.presence_tx.send(notification);
    }

    fn record_presence(&self, user_id: UserId, status: PresenceStatus) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let username = state
            .presence
            .get(&user_id)
            .and_then(|record| record.username.clone());
        state.presence.insert(
            user_id.clone(),
            PresenceRecord {
                user_id,
                status,
                last_seen_at: now,
                username,
            },
        );
    }

    fn store_row(&self, request: InsertMessageRequest) -> MessageRow {
        let mut state = self.state.lock();
        let id = MessageId::new(format!("m{}", state.next_id));
        state.next_id += 1;
        let row = MessageRow {
            id,
            conversation_id: request.conversation_id,
            sender_id: request.sender_id,
            kind: request.kind,
            content: request.content,
            created_at: self.clock.now(),
            is_deleted: false,
            is_edited: false,
        };
        state.rows.push(row.clone());
        row
    }

    fn broadcast(&self, event: RealtimeEvent) {
        let conversation_id = event.row().conversation_id.clone();
        if let Some(tx) = self.channels.lock().get(&conversation_id) {
            let _ = tx.send(event);
        }
    }

    fn check_online(&self) -> Result<()> {
        if self.state.lock().failures.offline {
            return Err(anyhow!("loopback backend offline"));
        }
        Ok(())
    }

    /// Applies the server-side rules for edit/unsend and runs `mutate` on the
    /// row when they pass.
    fn mutate_row(
        &self,
        message_id: &MessageId,
        sender_id: &UserId,
        mutate: impl FnOnce(&mut MessageRow),
    ) -> MutationOutcome {
        let now = self.clock.now();
        let window = TimeDelta::from_std(self.edit_window).unwrap_or(TimeDelta::MAX);
        let updated = {
            let mut state = self.state.lock();
            let Some(row) = state.rows.iter_mut().find(|row| &row.id == message_id) else {
                return MutationOutcome::rejected(ErrorCode::NotFound, "message not found");
            };
            if &row.sender_id != sender_id {
                return MutationOutcome::rejected(ErrorCode::NotOwner, "not the sender");
            }
            if row.is_deleted {
                return MutationOutcome::rejected(ErrorCode::AlreadyDeleted, "message was unsent");
            }
            if now - row.created_at >= window {
                return MutationOutcome::rejected(
                    ErrorCode::EditWindowExpired,
                    "edit window has expired",
                );
            }
            mutate(row);
            row.clone()
        };
        self.broadcast(RealtimeEvent::MessageUpdated { row: updated });
        MutationOutcome::ok()
    }
}

#[async_trait]
impl MessageTransport for LoopbackBackend {
    async fn insert_message(&self, request: InsertMessageRequest) -> Result<InsertedMessage> {
        let (delay, ack_delay) = {
            let mut state = self.state.lock();
            state.calls.inserts += 1;
            if state.failures.offline {
                return Err(anyhow!("loopback backend offline"));
            }
            if state.failures.inserts > 0 {
                state.failures.inserts -= 1;
                return Err(anyhow!("insert rejected by injected failure"));
            }
            (state.insert_delay, state.ack_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let row = self.store_row(request);
        debug!(message_id = %row.id, "loopback stored message");
        let inserted = InsertedMessage {
            id: row.id.clone(),
            created_at: row.created_at,
        };
        self.broadcast(RealtimeEvent::MessageInserted { row });
        if let Some(delay) = ack_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(inserted)
    }

    async fn edit_message(&self, request: EditMessageRequest) -> Result<MutationOutcome> {
        self.state.lock().calls.edits += 1;
        self.check_online()?;
        let new_content = request.new_content;
        Ok(self.mutate_row(&request.message_id, &request.sender_id, |row| {
            row.content = new_content;
            row.is_edited = true;
        }))
    }

    async fn unsend_message(&self, request: UnsendMessageRequest) -> Result<MutationOutcome> {
        self.state.lock().calls.unsends += 1;
        self.check_online()?;
        Ok(self.mutate_row(&request.message_id, &request.sender_id, |row| {
            row.is_deleted = true;
        }))
    }

    async fn fetch_messages(&self, conversation_id: &ConversationId) -> Result<Vec<MessageRow>> {
        self.state.lock().calls.fetches += 1;
        self.check_online()?;
        Ok(self.rows(conversation_id))
    }
}

#[async_trait]
impl RealtimeChannel for LoopbackBackend {
    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<broadcast::Receiver<RealtimeEvent>> {
        self.check_online()?;
        let mut channels = self.channels.lock();
        let tx = channels
            .entry(conversation_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(tx.subscribe())
    }
}

#[async_trait]
impl PresenceBackend for LoopbackBackend {
    async fn update_presence(&self, update: PresenceUpdate) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.calls.presence_updates += 1;
            if state.failures.offline {
                return Err(anyhow!("loopback backend offline"));
            }
            if state.failures.presence_updates > 0 {
                state.failures.presence_updates -= 1;
                return Err(anyhow!("presence update rejected by injected failure"));
            }
        }
        self.record_presence(update.user_id, update.status);
        let _ = self.presence_tx.send(PresenceNotification::Sync);
        Ok(())
    }

    async fn get_online_users(&self) -> Result<Vec<PresenceRecord>> {
        self.check_online()?;
        Ok(self
            .state
            .lock()
            .presence
            .values()
            .filter(|record| record.status != PresenceStatus::Offline)
            .cloned()
            .collect())
    }

    async fn subscribe(&self) -> Result<broadcast::Receiver<PresenceNotification>> {
        self.check_online()?;
        Ok(self.presence_tx.subscribe())
    }
}

#[async_trait]
impl AttachmentStore for LoopbackBackend {
    async fn upload(&self, upload: AttachmentUpload) -> Result<String> {
        let path = upload.object_path();
        let mut state = self.state.lock();
        state.calls.uploads += 1;
        if state.failures.offline {
            return Err(anyhow!("loopback backend offline"));
        }
        if state.failures.uploads > 0 {
            state.failures.uploads -= 1;
            return Err(anyhow!("upload of {path} rejected by injected failure"));
        }
        if upload.bytes.len() as u64 > self.max_attachment_bytes {
            return Err(anyhow!("{path} exceeds {} bytes", self.max_attachment_bytes));
        }
        state.blobs.insert(
            path.clone(),
            StoredBlob {
                content_type: upload.content_type,
                bytes: upload.bytes,
            },
        );
        Ok(format!("https://storage.loopback/{path}"))
    }
}

#[cfg(test)]
#[path = "tests/loopback_tests.rs"]
mod tests;
