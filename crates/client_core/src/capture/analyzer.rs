use std::{f32::consts::PI, sync::Arc};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyzerSettings {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            fft_size: 512,
            smoothing: 0.3,
            min_db: -90.0,
            max_db: -10.0,
        }
    }
}

/// Byte-scaled magnitude spectrum over the most recent `fft_size` samples,
/// with the same time smoothing and dB mapping browsers use for analyser
/// nodes.
#[derive(Debug, Clone)]
pub struct SpectrumAnalyzer {
    settings: AnalyzerSettings,
    window: Vec<f32>,
    history: Vec<f32>,
    smoothed: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(settings: AnalyzerSettings) -> Self {
        let fft_size = settings.fft_size.max(2).next_power_of_two();
        let settings = AnalyzerSettings {
            fft_size,
            ..settings
        };
        Self {
            window: blackman(fft_size),
            history: vec![0.0; fft_size],
            smoothed: vec![0.0; fft_size / 2],
            settings,
        }
    }

    pub fn bin_count(&self) -> usize {
        self.settings.fft_size / 2
    }

    /// Appends raw input, keeping only the last `fft_size` samples.
    pub fn push(&mut self, samples: &[f32]) {
        let size = self.settings.fft_size;
        if samples.len() >= size {
            self.history.copy_from_slice(&samples[samples.len() - size..]);
            return;
        }
        self.history.drain(..samples.len());
        self.history.extend_from_slice(samples);
    }

    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        let size = self.settings.fft_size;
        let mut buffer: Vec<Complex> = self
            .history
            .iter()
            .zip(&self.window)
            .map(|(sample, w)| Complex::new(sample * w, 0.0))
            .collect();
        fft(&mut buffer);

        let tau = self.settings.smoothing.clamp(0.0, 1.0);
        let range = (self.settings.max_db - self.settings.min_db).max(f32::EPSILON);
        let mut bytes = Vec::with_capacity(size / 2);
        for (bin, value) in buffer.iter().take(size / 2).enumerate() {
            let magnitude = value.norm() / size as f32;
            let smoothed = tau * self.smoothed[bin] + (1.0 - tau) * magnitude;
            self.smoothed[bin] = smoothed;
            let db = super::dsp::linear_to_db(smoothed);
            let scaled = 255.0 * (db - self.settings.min_db) / range;
            bytes.push(scaled.clamp(0.0, 255.0) as u8);
        }
        bytes
    }

    pub fn reset(&mut self) {
        self.history.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
    }
}

/// Writer half of the analyzer, held by the processing graph.
#[derive(Clone)]
pub struct AnalyzerTap {
    analyzer: Arc<Mutex<SpectrumAnalyzer>>,
}

/// The single reading handle for an analyzer. Only one exists per tap.
pub struct AnalyzerReader {
    analyzer: Arc<Mutex<SpectrumAnalyzer>>,
}

/// Creates the writer/reader pair for one capture graph.
pub fn analyzer_pair(settings: AnalyzerSettings) -> (AnalyzerTap, AnalyzerReader) {
    let analyzer = Arc::new(Mutex::new(SpectrumAnalyzer::new(settings)));
    (
        AnalyzerTap {
            analyzer: Arc::clone(&analyzer),
        },
        AnalyzerReader { analyzer },
    )
}

impl AnalyzerTap {
    pub fn feed(&self, samples: &[f32]) {
        self.analyzer.lock().push(samples);
    }

    pub fn reset(&self) {
        self.analyzer.lock().reset();
    }
}

impl AnalyzerReader {
    pub fn read_bins(&self) -> Vec<u8> {
        self.analyzer.lock().byte_frequency_data()
    }

    pub fn bin_count(&self) -> usize {
        self.analyzer.lock().bin_count()
    }
}

/// Scalar activity level for visualization: mean bin value over 64,
/// clamped to `[0.1, 1.0]` so the UI always shows a baseline.
pub fn level_from_bins(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return MIN_LEVEL;
    }
    let mean = bins.iter().map(|b| f32::from(*b)).sum::<f32>() / bins.len() as f32;
    (mean / 64.0).min(1.0).max(MIN_LEVEL)
}

pub const MIN_LEVEL: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Complex {
    re: f32,
    im: f32,
}

impl Complex {
    fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }

    fn norm(self) -> f32 {
        (self.re * self.re + self.im * self.im).sqrt()
    }

    fn mul(self, other: Self) -> Self {
        Self::new(
            self.re * other.re - self.im * other.im,
            self.re * other.im + self.im * other.re,
        )
    }

    fn add(self, other: Self) -> Self {
        Self::new(self.re + other.re, self.im + other.im)
    }

    fn sub(self, other: Self) -> Self {
        Self::new(self.re - other.re, self.im - other.im)
    }
}

/// In-place iterative radix-2 FFT. `buffer.len()` must be a power of two.
fn fft(buffer: &mut [Complex]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }

    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            buffer.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let angle = -2.0 * PI / len as f32;
        let step = Complex::new(angle.cos(), angle.sin());
        for start in (0..n).step_by(len) {
            let mut twiddle = Complex::new(1.0, 0.0);
            for k in 0..len / 2 {
                let even = buffer[start + k];
                let odd = buffer[start + k + len / 2].mul(twiddle);
                buffer[start + k] = even.add(odd);
                buffer[start + k + len / 2] = even.sub(odd);
                twiddle = twiddle.mul(step);
            }
        }
        len <<= 1;
    }
}

fn blackman(size: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = (1.0 - ALPHA) / 2.0;
    let a1 = 0.5;
    let a2 = ALPHA / 2.0;
    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
#[path = "../tests/analyzer_tests.rs"]
mod tests;
