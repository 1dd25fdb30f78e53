use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{AttachmentKind, ConversationId, MessageKind},
    error::{ApiError, ErrorCode},
    protocol::{
        EditMessageRequest, InsertMessageRequest, MutationOutcome, RealtimeEvent,
        UnsendMessageRequest,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{
    arena::{Applied, ArenaEvent, MessageArena},
    model::{DeliveryStatus, Message, MessageKey, TempId},
    timeline::{group_by_day, DayGroup},
};
use crate::{
    attachments::{extension_for_mime, AttachmentCoordinator, OutgoingFile},
    capture::{FinishedRecording, VoiceMessageSink},
    context::ClientContext,
    error::{Rejection, SyncError, SyncResult},
    transport::{
        AttachmentStore, MessageTransport, MissingAttachmentStore, MissingRealtimeChannel,
        RealtimeChannel,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    MessageAppended(Message),
    /// The pending entry `temp` now carries its durable key. When the push
    /// for the same row arrived first, a `MessageRemoved` for that durable
    /// key precedes this event and drops the pushed copy.
    MessageReconciled { temp: TempId, message: Message },
    MessageUpdated(Message),
    MessageRemoved(MessageKey),
    /// Last sight of a send that did not go through, in `Failed` status. A
    /// `MessageRemoved` for its temporary key follows.
    SendFailed(Message),
    HistoryLoaded { appended: usize },
    /// Non-blocking user-visible notification, e.g. a failed send.
    Notice(String),
}

#[derive(Debug, Clone)]
struct PendingSend {
    kind_label: &'static str,
    started_at: DateTime<Utc>,
}

struct EngineState {
    arena: MessageArena,
    pending: HashMap<TempId, PendingSend>,
}

/// Owns the ordered message list of one open conversation.
pub struct MessageSyncEngine {
    context: Arc<ClientContext>,
    conversation_id: ConversationId,
    transport: Arc<dyn MessageTransport>,
    realtime: Arc<dyn RealtimeChannel>,
    attachments: AttachmentCoordinator,
    state: Mutex<EngineState>,
    realtime_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SyncEvent>,
}

impl MessageSyncEngine {
    pub fn new(
        context: Arc<ClientContext>,
        conversation_id: ConversationId,
        transport: Arc<dyn MessageTransport>,
    ) -> Arc<Self> {
        Self::new_with_dependencies(
            context,
            conversation_id,
            transport,
            Arc::new(MissingRealtimeChannel),
            Arc::new(MissingAttachmentStore),
        )
    }

    pub fn new_with_dependencies(
        context: Arc<ClientContext>,
        conversation_id: ConversationId,
        transport: Arc<dyn MessageTransport>,
        realtime: Arc<dyn RealtimeChannel>,
        attachment_store: Arc<dyn AttachmentStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(context.settings().event_buffer.max(1));
        let arena = MessageArena::new(
            context.self_id().clone(),
            context.settings().dedup_window(),
        );
        let attachments = AttachmentCoordinator::new(&context, attachment_store);
        Arc::new(Self {
            context,
            conversation_id,
            transport,
            realtime,
            attachments,
            state: Mutex::new(EngineState {
                arena,
                pending: HashMap::new(),
            }),
            realtime_task: Mutex::new(None),
            events,
        })
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Messages in list order.
    pub async fn snapshot(&self) -> Vec<Message> {
        self.state.lock().await.arena.to_vec()
    }

    pub async fn get(&self, key: &MessageKey) -> Option<Message> {
        self.state.lock().await.arena.get(key).cloned()
    }

    pub async fn position(&self, key: &MessageKey) -> Option<usize> {
        self.state.lock().await.arena.position(key)
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn timeline<Tz: TimeZone>(&self, tz: &Tz) -> Vec<DayGroup> {
        let guard = self.state.lock().await;
        group_by_day(guard.arena.iter(), tz)
    }

    pub async fn can_modify(&self, key: &MessageKey) -> bool {
        let guard = self.state.lock().await;
        guard.arena.get(key).is_some_and(|message| {
            message.can_modify(
                self.context.self_id(),
                self.context.now(),
                self.context.settings().edit_window(),
            )
        })
    }

    /// Remaining edit/unsend time for `key`, zero when it can no longer be
    /// modified.
    pub async fn modify_time_left(&self, key: &MessageKey) -> Duration {
        let guard = self.state.lock().await;
        match guard.arena.get(key) {
            Some(message)
                if message.is_own(self.context.self_id()) && !message.deleted =>
            {
                message.time_left(self.context.now(), self.context.settings().edit_window())
            }
            _ => Duration::ZERO,
        }
    }

    /// Sends a message. The Pending entry is visible before the transport is
    /// called; on success it becomes Delivered in place, on failure it is
    /// removed and the error returned.
    pub async fn send(&self, content: &str, kind: MessageKind) -> SyncResult<Message> {
        let content = match &kind {
            MessageKind::Text => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    return Err(Rejection::EmptyContent.into());
                }
                trimmed.to_string()
            }
            _ => content.to_string(),
        };
        let temp = TempId::new();
        self.begin_send(temp, content, kind).await;
        self.deliver(temp).await
    }

    pub async fn send_text(&self, content: &str) -> SyncResult<Message> {
        self.send(content, MessageKind::Text).await
    }

    pub async fn send_voice(&self, recording: FinishedRecording) -> SyncResult<Message> {
        self.attachments.check_size(recording.bytes.len() as u64)?;
        let kind = MessageKind::Voice {
            audio_ref: String::new(),
            duration_seconds: recording.duration_seconds,
        };
        let extension = extension_for_mime(&recording.mime_type);
        self.send_with_upload(
            kind,
            AttachmentKind::Voice,
            recording.mime_type,
            extension,
            recording.bytes,
        )
        .await
    }

    pub async fn send_attachment(
        &self,
        file: OutgoingFile,
        attachment_kind: AttachmentKind,
    ) -> SyncResult<Message> {
        self.attachments.check_size(file.size())?;
        let kind = match attachment_kind {
            AttachmentKind::Image => MessageKind::Image {
                attachment_ref: String::new(),
                file_name: file.file_name.clone(),
            },
            AttachmentKind::Document => MessageKind::Document {
                attachment_ref: String::new(),
                file_name: file.file_name.clone(),
                file_size_bytes: file.size(),
            },
            AttachmentKind::Voice => MessageKind::Voice {
                audio_ref: String::new(),
                duration_seconds: 0,
            },
        };
        let content_type = file.resolved_content_type();
        let extension = file.extension();
        self.send_with_upload(kind, attachment_kind, content_type, extension, file.bytes)
            .await
    }

    async fn send_with_upload(
        &self,
        kind: MessageKind,
        attachment_kind: AttachmentKind,
        content_type: String,
        extension: String,
        bytes: Vec<u8>,
    ) -> SyncResult<Message> {
        let temp = TempId::new();
        let content = kind.placeholder_content().unwrap_or_default();
        // Preview handle until the blob lands and the public URL replaces it.
        let kind = kind.with_attachment_ref(format!("local:{temp}"));
        self.begin_send(temp, content, kind).await;

        let public_url = match self
            .attachments
            .upload(attachment_kind, content_type, &extension, bytes)
            .await
        {
            Ok(url) => url,
            Err(err) => {
                self.fail_send(temp, &err).await;
                return Err(err);
            }
        };
        self.apply_event(ArenaEvent::AttachmentUploaded { temp, public_url })
            .await;
        self.deliver(temp).await
    }

    async fn begin_send(&self, temp: TempId, content: String, kind: MessageKind) {
        let now = self.context.now();
        let message = Message::pending(
            temp,
            self.conversation_id.clone(),
            self.context.self_id().clone(),
            content,
            kind,
            now,
        );
        let kind_label = message.kind.label();
        let mut guard = self.state.lock().await;
        guard.pending.insert(
            temp,
            PendingSend {
                kind_label,
                started_at: now,
            },
        );
        let applied = guard.arena.apply(ArenaEvent::LocalSend(message));
        self.publish(&guard.arena, temp, &applied);
        debug!(temp = %temp, kind = kind_label, "optimistic entry appended");
    }

    async fn deliver(&self, temp: TempId) -> SyncResult<Message> {
        let request = {
            let guard = self.state.lock().await;
            let Some(message) = guard.arena.get(&MessageKey::Temp(temp)) else {
                return Err(SyncError::MessageNotFound(temp.to_string()));
            };
            InsertMessageRequest {
                conversation_id: self.conversation_id.clone(),
                sender_id: message.sender_id.clone(),
                kind: message.kind.clone(),
                content: message.content.clone(),
            }
        };

        match self.transport.insert_message(request).await {
            Ok(inserted) => {
                let mut guard = self.state.lock().await;
                let pending = guard.pending.remove(&temp);
                let applied = guard.arena.apply(ArenaEvent::Acknowledged {
                    temp,
                    id: inserted.id.clone(),
                    at: self.context.now(),
                });
                self.publish(&guard.arena, temp, &applied);
                if let Some(pending) = pending {
                    let elapsed = self.context.now() - pending.started_at;
                    info!(
                        conversation_id = %self.conversation_id,
                        temp = %temp,
                        message_id = %inserted.id,
                        kind = pending.kind_label,
                        elapsed_ms = elapsed.num_milliseconds(),
                        "send acknowledged"
                    );
                }
                guard
                    .arena
                    .get(&MessageKey::Durable(inserted.id.clone()))
                    .cloned()
                    .ok_or_else(|| SyncError::MessageNotFound(inserted.id.to_string()))
            }
            Err(err) => {
                let err = SyncError::transport(err);
                self.fail_send(temp, &err).await;
                Err(err)
            }
        }
    }

    async fn fail_send(&self, temp: TempId, err: &SyncError) {
        let mut guard = self.state.lock().await;
        guard.pending.remove(&temp);
        if let Some(mut failed) = guard.arena.get(&MessageKey::Temp(temp)).cloned() {
            failed.status = DeliveryStatus::Failed;
            let _ = self.events.send(SyncEvent::SendFailed(failed));
        }
        let applied = guard.arena.apply(ArenaEvent::SendFailed { temp });
        self.publish(&guard.arena, temp, &applied);
        drop(guard);
        warn!(
            conversation_id = %self.conversation_id,
            temp = %temp,
            error = %err,
            "send failed, optimistic entry removed"
        );
        let _ = self
            .events
            .send(SyncEvent::Notice(format!("Message could not be sent: {err}")));
    }

    /// Applies one pushed realtime event.
    pub async fn on_inbound_event(&self, event: RealtimeEvent) -> Applied {
        match event {
            RealtimeEvent::MessageInserted { row } => {
                if row.conversation_id != self.conversation_id {
                    debug!(
                        conversation_id = %row.conversation_id,
                        "ignoring row for another conversation"
                    );
                    return Applied::Ignored;
                }
                let message_id = row.id.clone();
                let applied = self
                    .apply_event(ArenaEvent::Inbound {
                        row,
                        at: self.context.now(),
                    })
                    .await;
                match &applied {
                    Applied::EchoOfAcknowledged(_) => {
                        debug!(message_id = %message_id, "echo of acknowledged send")
                    }
                    Applied::Duplicate(_) => {
                        debug!(message_id = %message_id, "duplicate inbound row")
                    }
                    _ => {}
                }
                applied
            }
            RealtimeEvent::MessageUpdated { row } => {
                if row.conversation_id != self.conversation_id {
                    return Applied::Ignored;
                }
                self.apply_event(ArenaEvent::RemoteUpdate(row)).await
            }
        }
    }

    pub async fn edit(&self, key: &MessageKey, new_content: &str) -> SyncResult<Message> {
        let new_content = new_content.trim();
        if new_content.is_empty() {
            return Err(Rejection::EmptyContent.into());
        }
        let id = self.check_modifiable(key).await?;

        let outcome = self
            .transport
            .edit_message(EditMessageRequest {
                message_id: id.clone(),
                sender_id: self.context.self_id().clone(),
                new_content: new_content.to_string(),
            })
            .await;
        self.finish_mutation("edit", key, outcome).await?;

        self.apply_event(ArenaEvent::Edited {
            id: id.clone(),
            content: new_content.to_string(),
        })
        .await;
        info!(message_id = %id, "message edited");
        self.get(key)
            .await
            .ok_or_else(|| SyncError::MessageNotFound(id.to_string()))
    }

    pub async fn unsend(&self, key: &MessageKey) -> SyncResult<Message> {
        let id = self.check_modifiable(key).await?;

        let outcome = self
            .transport
            .unsend_message(UnsendMessageRequest {
                message_id: id.clone(),
                sender_id: self.context.self_id().clone(),
            })
            .await;
        self.finish_mutation("unsend", key, outcome).await?;

        self.apply_event(ArenaEvent::Unsent { id: id.clone() }).await;
        info!(message_id = %id, "message unsent");
        self.get(key)
            .await
            .ok_or_else(|| SyncError::MessageNotFound(id.to_string()))
    }

    async fn check_modifiable(&self, key: &MessageKey) -> SyncResult<shared::domain::MessageId> {
        let guard = self.state.lock().await;
        let Some(message) = guard.arena.get(key) else {
            return Err(SyncError::MessageNotFound(key.to_string()));
        };
        message.check_modifiable(
            self.context.self_id(),
            self.context.now(),
            self.context.settings().edit_window(),
        )?;
        message
            .durable_id()
            .cloned()
            .ok_or_else(|| Rejection::NotYetAcknowledged.into())
    }

    async fn finish_mutation(
        &self,
        action: &'static str,
        key: &MessageKey,
        outcome: anyhow::Result<MutationOutcome>,
    ) -> SyncResult<()> {
        let err = match outcome {
            Ok(outcome) if outcome.success => return Ok(()),
            Ok(outcome) => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| ApiError::new(ErrorCode::Internal, "rejected"));
                SyncError::ValidationRejected(Rejection::Server(error))
            }
            Err(err) => SyncError::transport(err),
        };
        warn!(action, key = %key, error = %err, "message change refused");
        let _ = self
            .events
            .send(SyncEvent::Notice(format!("Could not {action} message: {err}")));
        Err(err)
    }

    /// Fetches the stored rows for the conversation and merges them in.
    /// Rows already present are refreshed in place.
    pub async fn load_history(&self) -> SyncResult<usize> {
        let rows = self
            .transport
            .fetch_messages(&self.conversation_id)
            .await
            .map_err(|err| {
                warn!(conversation_id = %self.conversation_id, error = %err, "history load failed");
                SyncError::transport(err)
            })?;

        let mut appended = 0;
        for row in rows {
            let applied = self
                .apply_event(ArenaEvent::Inbound {
                    row: row.clone(),
                    at: self.context.now(),
                })
                .await;
            match applied {
                Applied::Appended(_) => appended += 1,
                Applied::Duplicate(_) | Applied::EchoOfAcknowledged(_) => {
                    self.apply_event(ArenaEvent::RemoteUpdate(row)).await;
                }
                _ => {}
            }
        }
        info!(conversation_id = %self.conversation_id, appended, "history loaded");
        let _ = self.events.send(SyncEvent::HistoryLoaded { appended });
        Ok(appended)
    }

    /// Subscribes to the realtime channel and consumes it on a background
    /// task until `detach_realtime` or the channel closes.
    pub async fn attach_realtime(self: &Arc<Self>) -> SyncResult<()> {
        let mut receiver = self
            .realtime
            .subscribe(&self.conversation_id)
            .await
            .map_err(SyncError::transport)?;

        let engine: Weak<Self> = Arc::downgrade(self);
        let conversation_id = self.conversation_id.clone();
        let task = tokio::spawn(async move {
            loop {
                let received = receiver.recv().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                match received {
                    Ok(event) => {
                        engine.on_inbound_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            conversation_id = %conversation_id,
                            skipped,
                            "realtime receiver lagged, reloading history"
                        );
                        let _ = engine.load_history().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(conversation_id = %conversation_id, "realtime channel closed");
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.realtime_task.lock().await.replace(task) {
            previous.abort();
        }
        info!(conversation_id = %self.conversation_id, "realtime attached");
        Ok(())
    }

    pub async fn detach_realtime(&self) -> bool {
        match self.realtime_task.lock().await.take() {
            Some(task) => {
                task.abort();
                info!(conversation_id = %self.conversation_id, "realtime detached");
                true
            }
            None => false,
        }
    }

    async fn apply_event(&self, event: ArenaEvent) -> Applied {
        let temp = match &event {
            ArenaEvent::AttachmentUploaded { temp, .. }
            | ArenaEvent::Acknowledged { temp, .. }
            | ArenaEvent::SendFailed { temp } => Some(*temp),
            _ => None,
        };
        let mut guard = self.state.lock().await;
        let applied = guard.arena.apply(event);
        match temp {
            Some(temp) => self.publish(&guard.arena, temp, &applied),
            None => self.publish_untracked(&guard.arena, &applied),
        }
        applied
    }

    fn publish(&self, arena: &MessageArena, temp: TempId, applied: &Applied) {
        let event = match applied {
            Applied::Reconciled { id, dropped_echo } => {
                if *dropped_echo {
                    let _ = self
                        .events
                        .send(SyncEvent::MessageRemoved(MessageKey::Durable(id.clone())));
                }
                arena
                    .get(&MessageKey::Durable(id.clone()))
                    .cloned()
                    .map(|message| SyncEvent::MessageReconciled { temp, message })
            }
            _ => return self.publish_untracked(arena, applied),
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }

    fn publish_untracked(&self, arena: &MessageArena, applied: &Applied) {
        let event = match applied {
            Applied::Appended(key) => arena.get(key).cloned().map(SyncEvent::MessageAppended),
            Applied::Updated(key) => arena.get(key).cloned().map(SyncEvent::MessageUpdated),
            Applied::Removed(key) => Some(SyncEvent::MessageRemoved(key.clone())),
            _ => None,
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }
}

impl Drop for MessageSyncEngine {
    fn drop(&mut self) {
        if let Some(task) = self.realtime_task.get_mut().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl VoiceMessageSink for MessageSyncEngine {
    async fn send_voice(&self, recording: FinishedRecording) -> SyncResult<()> {
        MessageSyncEngine::send_voice(self, recording).await.map(|_| ())
    }
}

#[cfg(test)]
#[path = "../tests/engine_tests.rs"]
mod tests;
