use super::{
    analyzer::{analyzer_pair, AnalyzerReader, AnalyzerSettings, AnalyzerTap},
    dsp::{Compressor, CompressorSettings, Gain, HighPass},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphSettings {
    pub gain: f32,
    pub compressor: CompressorSettings,
    pub highpass_hz: f32,
    pub highpass_q: f32,
    pub analyzer: AnalyzerSettings,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            gain: 3.0,
            compressor: CompressorSettings::default(),
            highpass_hz: 80.0,
            highpass_q: 1.0,
            analyzer: AnalyzerSettings::default(),
        }
    }
}

/// Processing chain for one recording:
/// input -> gain -> compressor -> high-pass -> encoder, with the raw input
/// also feeding the spectrum analyzer.
pub struct CaptureGraph {
    gain: Gain,
    compressor: Compressor,
    highpass: HighPass,
    tap: AnalyzerTap,
    torn_down: bool,
}

impl CaptureGraph {
    /// Builds the chain and returns the analyzer's only reader alongside it.
    pub fn build(settings: GraphSettings, sample_rate: u32) -> (Self, AnalyzerReader) {
        let (tap, reader) = analyzer_pair(settings.analyzer);
        let graph = Self {
            gain: Gain::new(settings.gain),
            compressor: Compressor::new(settings.compressor, sample_rate),
            highpass: HighPass::new(settings.highpass_hz, settings.highpass_q, sample_rate),
            tap,
            torn_down: false,
        };
        (graph, reader)
    }

    /// Runs one frame through the chain in place. The analyzer sees the frame
    /// before any processing.
    pub fn process(&mut self, frame: &mut [f32]) {
        if self.torn_down {
            frame.iter_mut().for_each(|s| *s = 0.0);
            return;
        }
        self.tap.feed(frame);
        self.gain.process(frame);
        self.compressor.process(frame);
        self.highpass.process(frame);
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.highpass.reset();
        self.tap.reset();
    }
}
