use std::time::Duration;

use shared::error::ApiError;
use thiserror::Error;

use crate::capture::RecordingState;

/// Why an edit, unsend or send was refused before (or by) the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("message content is empty")]
    EmptyContent,
    #[error("only the sender may modify a message")]
    NotOwnMessage,
    #[error("message was already unsent")]
    Deleted,
    #[error("edit window of {window:?} has elapsed")]
    EditWindowElapsed { window: Duration },
    #[error("message has not been acknowledged by the server yet")]
    NotYetAcknowledged,
    #[error("attachment is {size} bytes, limit is {limit} bytes")]
    AttachmentTooLarge { size: u64, limit: u64 },
    #[error("server rejected the change: {0}")]
    Server(ApiError),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport failure: {0}")]
    TransportFailure(String),
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("validation rejected: {0}")]
    ValidationRejected(#[from] Rejection),
    #[error("no supported audio encoder, tried {tried:?}")]
    EncoderUnavailable { tried: Vec<String> },
    #[error("message {0} not found")]
    MessageNotFound(String),
    #[error("cannot {action} while recording is {state:?}")]
    InvalidRecordingState {
        action: &'static str,
        state: RecordingState,
    },
    #[error("audio device error: {0}")]
    Device(String),
}

impl SyncError {
    pub(crate) fn transport(err: anyhow::Error) -> Self {
        Self::TransportFailure(format!("{err:#}"))
    }

    /// Whether the caller can simply try the same operation again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure(_) | Self::Device(_) | Self::PermissionDenied
        )
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
