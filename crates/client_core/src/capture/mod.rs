pub mod analyzer;
pub mod dsp;
pub mod graph;
pub mod pipeline;
mod session;

use async_trait::async_trait;

use crate::error::SyncResult;

pub use analyzer::{level_from_bins, MIN_LEVEL};
pub use graph::{CaptureGraph, GraphSettings};
pub use pipeline::VoiceCapturePipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordingState {
    Idle,
    RequestingPermission,
    Recording,
    Reviewing,
    Cancelled,
    Sent,
}

impl RecordingState {
    /// Whether a new recording may start from here.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Cancelled | Self::Sent)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Sent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevelSample {
    pub level: f32,
    pub frequency_bins: Vec<u8>,
}

impl LevelSample {
    pub fn silence() -> Self {
        Self {
            level: 0.0,
            frequency_bins: vec![0; 256],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedRecording {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub duration_seconds: u32,
}

/// Receives a finished recording when the user sends it.
#[async_trait]
pub trait VoiceMessageSink: Send + Sync {
    async fn send_voice(&self, recording: FinishedRecording) -> SyncResult<()>;
}

/// Formats whole seconds as `m:ss`.
pub fn format_clock(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_format_pads_seconds() {
        assert_eq!(format_clock(0), "0:00");
        assert_eq!(format_clock(7), "0:07");
        assert_eq!(format_clock(65), "1:05");
        assert_eq!(format_clock(600), "10:00");
    }

    #[test]
    fn only_idle_or_terminal_states_can_start() {
        assert!(RecordingState::Idle.can_start());
        assert!(RecordingState::Sent.can_start());
        assert!(!RecordingState::Recording.can_start());
        assert!(!RecordingState::Reviewing.can_start());
        assert!(RecordingState::Cancelled.is_terminal());
    }
}
