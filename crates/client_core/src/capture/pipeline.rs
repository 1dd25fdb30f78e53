use std::{sync::Arc, time::Duration};

use capture_integration::{
    AudioEncoder, AudioInputDevice, AudioPlayer, CaptureConstraints, DeviceError, EncoderFactory,
    EncoderOptions, FrameScheduler, IntervalFrameScheduler, SilentPlayer,
};
use parking_lot::Mutex;
use tokio::{sync::watch, time::Instant};
use tracing::{debug, info, warn};

use super::{
    graph::{CaptureGraph, GraphSettings},
    session::{ActiveSession, SessionResources},
    FinishedRecording, LevelSample, PlaybackState, RecordingState, VoiceMessageSink,
};
use crate::{
    context::ClientContext,
    error::{SyncError, SyncResult},
    subscriptions::{SubscriptionRegistry, SubscriptionToken},
};

struct PipelineInner {
    state: RecordingState,
    /// Bumped on every start and cancel so a permission prompt that resolves
    /// late can tell it was abandoned.
    attempt: u64,
    session: Option<ActiveSession>,
    review: Option<FinishedRecording>,
    playback: PlaybackState,
}

/// Voice-message recorder.
///
/// `Idle -> RequestingPermission -> Recording -> {Reviewing | Cancelled}`,
/// then `Reviewing -> {Sent | Cancelled}`. Each recording exclusively owns its
/// input stream, processing graph, encoder and sampling loop until it reaches
/// a terminal state.
pub struct VoiceCapturePipeline {
    context: Arc<ClientContext>,
    device: Arc<dyn AudioInputDevice>,
    encoders: Arc<dyn EncoderFactory>,
    scheduler: Arc<dyn FrameScheduler>,
    player: Arc<dyn AudioPlayer>,
    constraints: CaptureConstraints,
    graph_settings: GraphSettings,
    inner: Mutex<PipelineInner>,
    levels: Arc<watch::Sender<LevelSample>>,
    observers: SubscriptionRegistry<RecordingState>,
}

impl VoiceCapturePipeline {
    pub fn new(
        context: Arc<ClientContext>,
        device: Arc<dyn AudioInputDevice>,
        encoders: Arc<dyn EncoderFactory>,
    ) -> Self {
        let scheduler = Arc::new(IntervalFrameScheduler::new(
            context.settings().sampler_frame(),
        ));
        Self::new_with_dependencies(context, device, encoders, scheduler, Arc::new(SilentPlayer))
    }

    pub fn new_with_dependencies(
        context: Arc<ClientContext>,
        device: Arc<dyn AudioInputDevice>,
        encoders: Arc<dyn EncoderFactory>,
        scheduler: Arc<dyn FrameScheduler>,
        player: Arc<dyn AudioPlayer>,
    ) -> Self {
        let (levels, _) = watch::channel(LevelSample::silence());
        Self {
            context,
            device,
            encoders,
            scheduler,
            player,
            constraints: CaptureConstraints::default(),
            graph_settings: GraphSettings::default(),
            inner: Mutex::new(PipelineInner {
                state: RecordingState::Idle,
                attempt: 0,
                session: None,
                review: None,
                playback: PlaybackState::Stopped,
            }),
            levels: Arc::new(levels),
            observers: SubscriptionRegistry::new(),
        }
    }

    pub fn state(&self) -> RecordingState {
        self.inner.lock().state
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.inner.lock().playback
    }

    /// The finished take while reviewing.
    pub fn recording(&self) -> Option<FinishedRecording> {
        self.inner.lock().review.clone()
    }

    pub fn level_sample(&self) -> LevelSample {
        self.levels.borrow().clone()
    }

    pub fn subscribe_levels(&self) -> watch::Receiver<LevelSample> {
        self.levels.subscribe()
    }

    /// Whole seconds recorded so far; zero unless recording.
    pub fn elapsed_seconds(&self) -> u64 {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|session| session.started_at.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Live tracks of the current recording's input stream.
    pub fn live_track_count(&self) -> usize {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|session| session.resources.live_track_count())
            .unwrap_or(0)
    }

    pub fn on_state_change(
        &self,
        name: &'static str,
        handler: impl Fn(&RecordingState) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.observers.register(name, handler)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.observers.unsubscribe(token)
    }

    /// Asks for the microphone and starts recording.
    pub async fn start(&self) -> SyncResult<()> {
        let attempt = {
            let mut inner = self.inner.lock();
            if !inner.state.can_start() || inner.session.is_some() {
                return Err(SyncError::InvalidRecordingState {
                    action: "start",
                    state: inner.state,
                });
            }
            inner.attempt += 1;
            inner.review = None;
            inner.playback = PlaybackState::Stopped;
            inner.state = RecordingState::RequestingPermission;
            inner.attempt
        };
        self.observers.emit(&RecordingState::RequestingPermission);

        let opened = self.device.open(self.constraints.clone()).await;
        let stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                let err = match err {
                    DeviceError::PermissionDenied => SyncError::PermissionDenied,
                    other => SyncError::Device(other.to_string()),
                };
                warn!(error = %err, "microphone unavailable");
                if self.still_requesting(attempt) {
                    self.transition(RecordingState::Idle);
                }
                return Err(err);
            }
        };

        if !self.still_requesting(attempt) {
            stream.stop_all();
            debug!("recording cancelled while waiting for permission");
            return Err(SyncError::InvalidRecordingState {
                action: "start",
                state: self.state(),
            });
        }

        let (encoder, mime_type) = match self.select_encoder(stream.sample_rate) {
            Ok(selected) => selected,
            Err(err) => {
                stream.stop_all();
                self.transition(RecordingState::Idle);
                return Err(err);
            }
        };

        let (graph, reader) = CaptureGraph::build(self.graph_settings, stream.sample_rate);
        let resources = SessionResources::spawn(
            stream.tracks,
            stream.frames,
            graph,
            reader,
            encoder,
            Arc::clone(&self.scheduler),
            Arc::clone(&self.levels),
        );

        {
            let mut inner = self.inner.lock();
            if inner.attempt != attempt || inner.state != RecordingState::RequestingPermission {
                // Cancelled between the checks above; dropping releases.
                drop(resources);
                return Err(SyncError::InvalidRecordingState {
                    action: "start",
                    state: inner.state,
                });
            }
            inner.session = Some(ActiveSession {
                started_at: Instant::now(),
                mime_type: mime_type.clone(),
                resources,
            });
        }
        info!(mime_type = %mime_type, "recording started");
        self.transition(RecordingState::Recording);
        Ok(())
    }

    /// Stops recording. Takes shorter than the minimum length are cancelled;
    /// otherwise the finished take moves to review. Stopping when not
    /// recording does nothing.
    pub async fn stop(&self) -> SyncResult<RecordingState> {
        let (session, attempt) = {
            let mut inner = self.inner.lock();
            let state = inner.state;
            match state {
                RecordingState::Recording => match inner.session.take() {
                    Some(session) => (session, inner.attempt),
                    None => return Ok(state),
                },
                RecordingState::RequestingPermission => {
                    drop(inner);
                    self.cancel();
                    return Ok(self.state());
                }
                state => return Ok(state),
            }
        };

        let ActiveSession {
            started_at,
            mime_type,
            mut resources,
        } = session;
        let elapsed = started_at.elapsed();
        let encoded = resources.finish().await;
        drop(resources);

        // A cancel that landed while the encoder was flushing wins.
        if !self.still_stopping(attempt) {
            debug!("recording cancelled while finalizing");
            return Ok(self.state());
        }

        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "recording could not be finalized");
                self.transition(RecordingState::Cancelled);
                return Err(SyncError::Device(format!("{err:#}")));
            }
        };

        let min = self.context.settings().min_recording();
        if elapsed < min {
            info!(elapsed_ms = elapsed.as_millis() as u64, "recording too short, discarded");
            self.transition(RecordingState::Cancelled);
            return Ok(RecordingState::Cancelled);
        }

        let recording = FinishedRecording {
            duration_seconds: duration_seconds(elapsed),
            bytes,
            mime_type,
        };
        if let Err(err) = self.player.load(&recording.mime_type, &recording.bytes) {
            warn!(error = %err, "playback unavailable for recording");
        }
        info!(
            duration_seconds = recording.duration_seconds,
            size = recording.bytes.len(),
            "recording ready for review"
        );
        {
            let mut inner = self.inner.lock();
            if inner.attempt != attempt || inner.state != RecordingState::Recording {
                drop(inner);
                self.player.unload();
                return Ok(self.state());
            }
            inner.review = Some(recording);
            inner.playback = PlaybackState::Stopped;
            inner.state = RecordingState::Reviewing;
        }
        debug!(
            from = ?RecordingState::Recording,
            to = ?RecordingState::Reviewing,
            "recording state changed"
        );
        self.observers.emit(&RecordingState::Reviewing);
        Ok(RecordingState::Reviewing)
    }

    /// Abandons the current recording from any state before `Sent`.
    pub fn cancel(&self) {
        let (session, had_review) = {
            let mut inner = self.inner.lock();
            let state = inner.state;
            match state {
                RecordingState::RequestingPermission
                | RecordingState::Recording
                | RecordingState::Reviewing => {}
                _ => return,
            }
            inner.attempt += 1;
            inner.playback = PlaybackState::Stopped;
            (inner.session.take(), inner.review.take().is_some())
        };
        if let Some(mut session) = session {
            session.resources.release();
        }
        if had_review {
            self.player.pause();
            self.player.unload();
        }
        info!("recording cancelled");
        self.transition(RecordingState::Cancelled);
    }

    /// Hands the reviewed take to `sink`. The pipeline moves to `Sent` once
    /// the sink accepts it; on failure the take stays in review.
    pub async fn send(&self, sink: &dyn VoiceMessageSink) -> SyncResult<()> {
        let recording = {
            let inner = self.inner.lock();
            match (&inner.state, &inner.review) {
                (RecordingState::Reviewing, Some(recording)) => recording.clone(),
                _ => {
                    return Err(SyncError::InvalidRecordingState {
                        action: "send",
                        state: inner.state,
                    })
                }
            }
        };

        sink.send_voice(recording).await?;

        let sent = {
            let mut inner = self.inner.lock();
            if inner.state == RecordingState::Reviewing {
                inner.review = None;
                inner.playback = PlaybackState::Stopped;
                true
            } else {
                false
            }
        };
        if sent {
            self.player.pause();
            self.player.unload();
            self.transition(RecordingState::Sent);
        }
        Ok(())
    }

    pub fn play(&self) -> SyncResult<()> {
        self.with_review("play", |pipeline| {
            pipeline
                .player
                .play()
                .map_err(|err| SyncError::Device(format!("{err:#}")))?;
            Ok(PlaybackState::Playing)
        })
    }

    pub fn pause(&self) -> SyncResult<()> {
        self.with_review("pause", |pipeline| {
            pipeline.player.pause();
            Ok(PlaybackState::Paused)
        })
    }

    pub fn toggle_playback(&self) -> SyncResult<()> {
        match self.playback_state() {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Stopped | PlaybackState::Paused => self.play(),
        }
    }

    /// Owner teardown: releases any live recording and drops every state
    /// observer.
    pub fn teardown(&self) {
        self.cancel();
        let removed = self.observers.clear();
        debug!(removed, "capture observers cleared");
    }

    fn with_review(
        &self,
        action: &'static str,
        apply: impl FnOnce(&Self) -> SyncResult<PlaybackState>,
    ) -> SyncResult<()> {
        let state = self.state();
        if state != RecordingState::Reviewing {
            return Err(SyncError::InvalidRecordingState { action, state });
        }
        let playback = apply(self)?;
        self.inner.lock().playback = playback;
        Ok(())
    }

    fn still_stopping(&self, attempt: u64) -> bool {
        let inner = self.inner.lock();
        inner.attempt == attempt && inner.state == RecordingState::Recording
    }

    fn still_requesting(&self, attempt: u64) -> bool {
        let inner = self.inner.lock();
        inner.attempt == attempt && inner.state == RecordingState::RequestingPermission
    }

    /// Walks the preferred formats in order and returns the first encoder the
    /// host can build.
    fn select_encoder(&self, sample_rate: u32) -> SyncResult<(Box<dyn AudioEncoder>, String)> {
        let settings = self.context.settings();
        let mut tried = Vec::new();
        for mime_type in &settings.preferred_audio_formats {
            tried.push(mime_type.clone());
            if !self.encoders.is_supported(mime_type) {
                debug!(mime_type = %mime_type, "encoder format unsupported");
                continue;
            }
            let options = EncoderOptions {
                mime_type: mime_type.clone(),
                bits_per_second: settings.encoder_bits_per_second,
                sample_rate,
            };
            match self.encoders.create(&options) {
                Ok(encoder) => return Ok((encoder, mime_type.clone())),
                Err(err) => {
                    warn!(mime_type = %mime_type, error = %err, "encoder creation failed");
                }
            }
        }
        Err(SyncError::EncoderUnavailable { tried })
    }

    fn transition(&self, next: RecordingState) {
        let previous = std::mem::replace(&mut self.inner.lock().state, next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "recording state changed");
            self.observers.emit(&next);
        }
    }
}

impl Drop for VoiceCapturePipeline {
    fn drop(&mut self) {
        if let Some(mut session) = self.inner.get_mut().session.take() {
            session.resources.release();
        }
    }
}

/// Wall-clock length in whole seconds, at least one.
fn duration_seconds(elapsed: Duration) -> u32 {
    u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX).max(1)
}

#[cfg(test)]
#[path = "../tests/pipeline_tests.rs"]
mod tests;
