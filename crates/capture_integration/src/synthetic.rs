use std::{
    f32::consts::TAU,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{AudioInputDevice, CaptureConstraints, DeviceError, InputStream, InputTrack};

const FRAME_DURATION: Duration = Duration::from_millis(20);

pub struct SyntheticTrack {
    id: String,
    live: AtomicBool,
    stop_calls: AtomicUsize,
}

impl SyntheticTrack {
    fn new(id: String) -> Self {
        Self {
            id,
            live: AtomicBool::new(true),
            stop_calls: AtomicUsize::new(0),
        }
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl InputTrack for SyntheticTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Microphone that emits a sine tone in 20 ms frames at real-time pace.
///
/// Every track it ever opened stays inspectable, which lets hosts without
/// audio hardware verify stream cleanup.
pub struct SyntheticMicrophone {
    grant_permission: bool,
    tone_hz: f32,
    amplitude: f32,
    opened: parking_lot::Mutex<Vec<Arc<SyntheticTrack>>>,
}

impl SyntheticMicrophone {
    pub fn new(tone_hz: f32, amplitude: f32) -> Self {
        Self {
            grant_permission: true,
            tone_hz,
            amplitude,
            opened: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn denying() -> Self {
        Self {
            grant_permission: false,
            ..Self::new(440.0, 0.5)
        }
    }

    pub fn opened_tracks(&self) -> Vec<Arc<SyntheticTrack>> {
        self.opened.lock().clone()
    }

    pub fn live_track_count(&self) -> usize {
        self.opened
            .lock()
            .iter()
            .filter(|track| track.is_live())
            .count()
    }
}

impl Default for SyntheticMicrophone {
    fn default() -> Self {
        Self::new(440.0, 0.5)
    }
}

#[async_trait]
impl AudioInputDevice for SyntheticMicrophone {
    async fn open(&self, constraints: CaptureConstraints) -> Result<InputStream, DeviceError> {
        if !self.grant_permission {
            return Err(DeviceError::PermissionDenied);
        }
        if constraints.sample_rate == 0 {
            return Err(DeviceError::Device("sample rate must be non-zero".into()));
        }

        let track = {
            let mut opened = self.opened.lock();
            let track = Arc::new(SyntheticTrack::new(format!("synthetic-mic-{}", opened.len())));
            opened.push(Arc::clone(&track));
            track
        };

        let sample_rate = constraints.sample_rate;
        let frame_len = (sample_rate as usize * FRAME_DURATION.as_millis() as usize) / 1000;
        let step = TAU * self.tone_hz / sample_rate as f32;
        let amplitude = self.amplitude;
        let (tx, rx) = mpsc::channel(64);
        let feeder_track = Arc::clone(&track);

        tokio::spawn(async move {
            let mut phase = 0.0f32;
            let mut ticker = tokio::time::interval(FRAME_DURATION);
            loop {
                ticker.tick().await;
                if !feeder_track.is_live() {
                    break;
                }
                let frame: Vec<f32> = (0..frame_len)
                    .map(|_| {
                        let sample = phase.sin() * amplitude;
                        phase = (phase + step) % TAU;
                        sample
                    })
                    .collect();
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            debug!(track = feeder_track.id(), "synthetic microphone feeder stopped");
        });

        let tracks: Vec<Arc<dyn InputTrack>> = vec![track];
        Ok(InputStream {
            sample_rate,
            tracks,
            frames: rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn emits_frames_until_track_stops() {
        let mic = SyntheticMicrophone::default();
        let mut stream = mic
            .open(CaptureConstraints::default())
            .await
            .expect("open");

        let frame = stream.frames.recv().await.expect("first frame");
        assert_eq!(frame.len(), 960);
        assert!(frame.iter().any(|sample| sample.abs() > 0.1));
        assert_eq!(mic.live_track_count(), 1);

        stream.stop_all();
        assert_eq!(mic.live_track_count(), 0);
        while stream.frames.recv().await.is_some() {}
        assert_eq!(mic.opened_tracks()[0].stop_calls(), 1);
    }

    #[tokio::test]
    async fn denying_microphone_refuses_to_open() {
        let err = SyntheticMicrophone::denying()
            .open(CaptureConstraints::default())
            .await
            .err()
            .expect("must be denied");
        assert!(matches!(err, DeviceError::PermissionDenied));
    }
}
