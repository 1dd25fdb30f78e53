use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    sync::{mpsc, Mutex},
    time::{Interval, MissedTickBehavior},
};

mod synthetic;
mod wav;

pub use synthetic::{SyntheticMicrophone, SyntheticTrack};
pub use wav::{WavEncoder, WavEncoderFactory, WAV_MIME_TYPE};

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    pub channel_count: u16,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            sample_rate: 48_000,
            channel_count: 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no input device available")]
    NoInputDevice,
    #[error("audio device error: {0}")]
    Device(String),
}

/// One hardware track of an open input stream.
pub trait InputTrack: Send + Sync {
    fn id(&self) -> &str;
    fn stop(&self);
    fn is_live(&self) -> bool;
}

/// An open microphone stream. Frames arrive as mono `f32` buffers until every
/// track is stopped, after which the sender side is dropped by the device.
pub struct InputStream {
    pub sample_rate: u32,
    pub tracks: Vec<Arc<dyn InputTrack>>,
    pub frames: mpsc::Receiver<Vec<f32>>,
}

impl InputStream {
    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|track| track.is_live()).count()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

#[async_trait]
pub trait AudioInputDevice: Send + Sync {
    /// Prompts for microphone access when needed and opens a stream.
    async fn open(&self, constraints: CaptureConstraints) -> Result<InputStream, DeviceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderOptions {
    pub mime_type: String,
    pub bits_per_second: u32,
    pub sample_rate: u32,
}

pub trait AudioEncoder: Send {
    fn mime_type(&self) -> &str;
    /// Feeds processed samples, returning any bytes the encoder is ready to emit.
    fn encode(&mut self, samples: &[f32]) -> anyhow::Result<Vec<u8>>;
    /// Flushes the trailing bytes. The encoder is unusable afterwards.
    fn finish(&mut self) -> anyhow::Result<Vec<u8>>;
}

pub trait EncoderFactory: Send + Sync {
    fn is_supported(&self, mime_type: &str) -> bool;
    fn create(&self, options: &EncoderOptions) -> anyhow::Result<Box<dyn AudioEncoder>>;
}

/// Host frame clock used to pace visualization sampling.
#[async_trait]
pub trait FrameScheduler: Send + Sync {
    async fn next_frame(&self);
}

pub struct IntervalFrameScheduler {
    period: Duration,
    interval: Mutex<Option<Interval>>,
}

impl IntervalFrameScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[async_trait]
impl FrameScheduler for IntervalFrameScheduler {
    async fn next_frame(&self) {
        let mut guard = self.interval.lock().await;
        let interval = guard.get_or_insert_with(|| {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + self.period, self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        interval.tick().await;
    }
}

pub trait AudioPlayer: Send + Sync {
    fn load(&self, mime_type: &str, bytes: &[u8]) -> anyhow::Result<()>;
    fn play(&self) -> anyhow::Result<()>;
    fn pause(&self);
    fn unload(&self);
}

/// Player for headless hosts; it accepts every call and plays nothing.
pub struct SilentPlayer;

impl AudioPlayer for SilentPlayer {
    fn load(&self, _mime_type: &str, _bytes: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    fn play(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn pause(&self) {}

    fn unload(&self) {}
}
