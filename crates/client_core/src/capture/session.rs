use std::sync::Arc;

use anyhow::anyhow;
use capture_integration::{AudioEncoder, FrameScheduler, InputTrack};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, warn};

use super::{
    analyzer::{level_from_bins, AnalyzerReader},
    graph::CaptureGraph,
    LevelSample,
};

/// Everything one recording owns: the input tracks, the pump task (which
/// owns the graph and encoder) and the sampling loop. Released exactly once,
/// on `finish`, `release` or drop.
pub(crate) struct SessionResources {
    tracks: Vec<Arc<dyn InputTrack>>,
    stop_pump: Option<oneshot::Sender<()>>,
    pump: Option<JoinHandle<anyhow::Result<Vec<u8>>>>,
    sampler: Option<JoinHandle<()>>,
    levels: Arc<watch::Sender<LevelSample>>,
    released: bool,
}

pub(crate) struct ActiveSession {
    pub started_at: Instant,
    pub mime_type: String,
    pub resources: SessionResources,
}

impl SessionResources {
    pub fn spawn(
        tracks: Vec<Arc<dyn InputTrack>>,
        frames: mpsc::Receiver<Vec<f32>>,
        graph: CaptureGraph,
        reader: AnalyzerReader,
        encoder: Box<dyn AudioEncoder>,
        scheduler: Arc<dyn FrameScheduler>,
        levels: Arc<watch::Sender<LevelSample>>,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let pump = tokio::spawn(pump_frames(frames, graph, encoder, stop_rx));
        let sampler = tokio::spawn(sample_levels(scheduler, reader, Arc::clone(&levels)));
        Self {
            tracks,
            stop_pump: Some(stop_tx),
            pump: Some(pump),
            sampler: Some(sampler),
            levels,
            released: false,
        }
    }

    pub fn live_track_count(&self) -> usize {
        self.tracks.iter().filter(|track| track.is_live()).count()
    }

    /// Stops capture and returns everything the encoder produced.
    pub async fn finish(&mut self) -> anyhow::Result<Vec<u8>> {
        if let Some(stop) = self.stop_pump.take() {
            let _ = stop.send(());
        }
        let pump = self.pump.take();
        self.release();
        match pump {
            Some(pump) => pump
                .await
                .map_err(|err| anyhow!("capture pump failed: {err}"))?,
            None => Err(anyhow!("recording already released")),
        }
    }

    /// Stops every track, cancels the sampling loop and drops the pump along
    /// with its graph. Later calls do nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for track in &self.tracks {
            track.stop();
        }
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.stop_pump = None;
        self.levels.send_replace(LevelSample::silence());
        debug!(tracks = self.tracks.len(), "capture resources released");
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        self.release();
    }
}

async fn pump_frames(
    mut frames: mpsc::Receiver<Vec<f32>>,
    mut graph: CaptureGraph,
    mut encoder: Box<dyn AudioEncoder>,
    mut stop: oneshot::Receiver<()>,
) -> anyhow::Result<Vec<u8>> {
    let mut chunks = Vec::new();
    let result = async {
        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                frame = frames.recv() => match frame {
                    Some(mut frame) => {
                        graph.process(&mut frame);
                        chunks.extend(encoder.encode(&frame)?);
                    }
                    None => break,
                },
            }
        }
        // Frames already captured before the stop still belong to the take.
        while let Ok(mut frame) = frames.try_recv() {
            graph.process(&mut frame);
            chunks.extend(encoder.encode(&frame)?);
        }
        chunks.extend(encoder.finish()?);
        Ok::<_, anyhow::Error>(())
    }
    .await;
    graph.teardown();
    if let Err(err) = &result {
        warn!(mime_type = encoder.mime_type(), error = %err, "encoder failed");
    }
    result.map(|()| chunks)
}

async fn sample_levels(
    scheduler: Arc<dyn FrameScheduler>,
    reader: AnalyzerReader,
    levels: Arc<watch::Sender<LevelSample>>,
) {
    loop {
        scheduler.next_frame().await;
        let bins = reader.read_bins();
        levels.send_replace(LevelSample {
            level: level_from_bins(&bins),
            frequency_bins: bins,
        });
    }
}
