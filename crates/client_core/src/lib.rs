//! Client-side synchronization core for one user: optimistic message sync,
//! presence tracking and voice capture, each driven through pluggable
//! collaborator traits.

pub mod attachments;
pub mod capture;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod loopback;
pub mod messages;
pub mod presence;
pub mod subscriptions;
pub mod transport;

pub use attachments::{AttachmentCoordinator, OutgoingFile};
pub use capture::{
    FinishedRecording, LevelSample, PlaybackState, RecordingState, VoiceCapturePipeline,
    VoiceMessageSink,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_settings, SyncSettings};
pub use context::ClientContext;
pub use error::{Rejection, SyncError, SyncResult};
pub use loopback::LoopbackBackend;
pub use messages::{DeliveryStatus, Message, MessageKey, MessageSyncEngine, SyncEvent, TempId};
pub use presence::{ActivitySignal, PresenceEvent, PresenceTracker};
pub use subscriptions::{SubscriptionRegistry, SubscriptionToken};
pub use transport::{AttachmentStore, MessageTransport, PresenceBackend, RealtimeChannel};
