//! Sample-by-sample processing stages of the capture chain.

use std::f32::consts::PI;

pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

pub fn linear_to_db(value: f32) -> f32 {
    if value <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * value.log10()
    }
}

#[derive(Debug, Clone)]
pub struct Gain {
    factor: f32,
}

impl Gain {
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples {
            *sample *= self.factor;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorSettings {
    pub threshold_db: f32,
    pub knee_db: f32,
    pub ratio: f32,
    pub attack_secs: f32,
    pub release_secs: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold_db: -24.0,
            knee_db: 30.0,
            ratio: 12.0,
            attack_secs: 0.003,
            release_secs: 0.25,
        }
    }
}

/// Feed-forward soft-knee compressor with separate attack and release
/// smoothing of the gain reduction.
#[derive(Debug, Clone)]
pub struct Compressor {
    settings: CompressorSettings,
    attack_coef: f32,
    release_coef: f32,
    reduction_db: f32,
}

impl Compressor {
    pub fn new(settings: CompressorSettings, sample_rate: u32) -> Self {
        let rate = sample_rate.max(1) as f32;
        Self {
            attack_coef: smoothing_coef(settings.attack_secs, rate),
            release_coef: smoothing_coef(settings.release_secs, rate),
            settings,
            reduction_db: 0.0,
        }
    }

    /// Static curve: gain reduction in dB (zero or negative) for an input level.
    pub fn static_reduction_db(&self, level_db: f32) -> f32 {
        let CompressorSettings {
            threshold_db,
            knee_db,
            ratio,
            ..
        } = self.settings;
        let over = level_db - threshold_db;
        let slope = 1.0 / ratio - 1.0;
        if knee_db > 0.0 && 2.0 * over.abs() <= knee_db {
            slope * (over + knee_db / 2.0).powi(2) / (2.0 * knee_db)
        } else if over > 0.0 {
            slope * over
        } else {
            0.0
        }
    }

    pub fn reduction_db(&self) -> f32 {
        self.reduction_db
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples {
            let target = self.static_reduction_db(linear_to_db(sample.abs()));
            let coef = if target < self.reduction_db {
                self.attack_coef
            } else {
                self.release_coef
            };
            self.reduction_db = target + coef * (self.reduction_db - target);
            *sample *= db_to_linear(self.reduction_db);
        }
    }
}

fn smoothing_coef(time_secs: f32, sample_rate: f32) -> f32 {
    if time_secs <= 0.0 {
        0.0
    } else {
        (-1.0 / (time_secs * sample_rate)).exp()
    }
}

/// Second-order high-pass section (RBJ cookbook), direct form I.
#[derive(Debug, Clone)]
pub struct HighPass {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl HighPass {
    pub fn new(cutoff_hz: f32, q: f32, sample_rate: u32) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate.max(1) as f32;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 + cos) / 2.0 / a0,
            b1: -(1.0 + cos) / a0,
            b2: (1.0 + cos) / 2.0 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples {
            let x0 = *sample;
            let y0 = self.b0 * x0 + self.b1 * self.x1 + self.b2 * self.x2
                - self.a1 * self.y1
                - self.a2 * self.y2;
            self.x2 = self.x1;
            self.x1 = x0;
            self.y2 = self.y1;
            self.y1 = y0;
            *sample = y0;
        }
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn gain_scales_samples() {
        let mut samples = vec![0.1, -0.2];
        Gain::new(3.0).process(&mut samples);
        assert!((samples[0] - 0.3).abs() < 1e-6);
        assert!((samples[1] + 0.6).abs() < 1e-6);
    }

    #[test]
    fn compressor_leaves_quiet_signal_alone_and_squashes_loud_one() {
        let compressor = Compressor::new(CompressorSettings::default(), 48_000);
        assert_eq!(compressor.static_reduction_db(-80.0), 0.0);
        // Well above the knee the slope is 1/ratio.
        let reduction = compressor.static_reduction_db(6.0);
        assert!((reduction - (1.0 / 12.0 - 1.0) * 30.0).abs() < 1e-3);

        let mut loud = sine(440.0, 48_000, 48_000, 0.9);
        let before = rms(&loud[24_000..]);
        let mut compressor = Compressor::new(CompressorSettings::default(), 48_000);
        compressor.process(&mut loud);
        assert!(rms(&loud[24_000..]) < before * 0.5);
        assert!(compressor.reduction_db() < 0.0);
    }

    #[test]
    fn high_pass_removes_rumble_but_keeps_voice() {
        let rate = 48_000;
        let mut rumble = sine(20.0, rate, rate as usize, 0.5);
        let mut voice = sine(1_000.0, rate, rate as usize, 0.5);
        let rumble_before = rms(&rumble);
        let voice_before = rms(&voice);

        HighPass::new(80.0, 1.0, rate).process(&mut rumble);
        HighPass::new(80.0, 1.0, rate).process(&mut voice);

        assert!(rms(&rumble[4_800..]) < rumble_before * 0.1);
        assert!(rms(&voice[4_800..]) > voice_before * 0.95);
    }
}
