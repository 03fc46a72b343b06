//! Spectrum analyzer tap for the capture path
//!
//! Behaves like a Web Audio analyser node: it keeps the most recent
//! `FFT_SIZE` samples, applies a Blackman window, smooths magnitudes over
//! time and maps decibels onto a byte range. Only the visualizer reads it.

use std::sync::{Arc, Mutex, Weak};

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Analysis window length
pub const FFT_SIZE: usize = 512;

/// Number of frequency bins produced per snapshot
pub const BIN_COUNT: usize = FFT_SIZE / 2;

const SMOOTHING: f32 = 0.8;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Shared analyzer owned by a capture pipeline
pub type AnalyzerHandle = Arc<Mutex<SpectrumAnalyzer>>;

/// Non-owning analyzer reference held by the visualizer
pub type WeakAnalyzer = Weak<Mutex<SpectrumAnalyzer>>;

/// Sliding-window frequency analyzer
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    ring: Vec<f32>,
    write_index: usize,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    /// Create an analyzer with an empty (silent) window
    #[must_use]
    pub fn new() -> Self {
        let fft = FftPlanner::new().plan_fft_forward(FFT_SIZE);

        #[allow(clippy::cast_precision_loss)]
        let window = (0..FFT_SIZE)
            .map(|i| {
                let x = i as f32 / FFT_SIZE as f32;
                0.08f32.mul_add(
                    (4.0 * std::f32::consts::PI * x).cos(),
                    0.5f32.mul_add(-(2.0 * std::f32::consts::PI * x).cos(), 0.42),
                )
            })
            .collect();

        Self {
            fft,
            window,
            ring: vec![0.0; FFT_SIZE],
            write_index: 0,
            smoothed: vec![0.0; BIN_COUNT],
            scratch: vec![Complex::new(0.0, 0.0); FFT_SIZE],
        }
    }

    /// Wrap a fresh analyzer in a shareable handle
    #[must_use]
    pub fn shared() -> AnalyzerHandle {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Feed captured samples into the analysis window
    pub fn push(&mut self, samples: &[f32]) {
        let tail = if samples.len() > FFT_SIZE {
            &samples[samples.len() - FFT_SIZE..]
        } else {
            samples
        };

        for &sample in tail {
            self.ring[self.write_index] = sample;
            self.write_index = (self.write_index + 1) % FFT_SIZE;
        }
    }

    /// Compute the current byte-scaled frequency snapshot
    ///
    /// Each call advances the time smoothing by one step, the same way a
    /// browser analyser does per read.
    pub fn byte_frequency_data(&mut self, out: &mut [u8; BIN_COUNT]) {
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = self.ring[(self.write_index + i) % FFT_SIZE];
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / FFT_SIZE as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;

        for (k, byte) in out.iter_mut().enumerate() {
            let magnitude = self.scratch[k].norm() * scale;
            let value = SMOOTHING.mul_add(self.smoothed[k], (1.0 - SMOOTHING) * magnitude);
            self.smoothed[k] = if value.is_finite() { value } else { 0.0 };

            let db = if self.smoothed[k] > 0.0 {
                20.0 * self.smoothed[k].log10()
            } else {
                f32::NEG_INFINITY
            };

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let scaled = (255.0 / range * (db - MIN_DECIBELS)).clamp(0.0, 255.0) as u8;
            *byte = scaled;
        }
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.8 * (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn silence_is_all_zero() {
        let mut analyzer = SpectrumAnalyzer::new();
        analyzer.push(&[0.0; FFT_SIZE]);

        let mut bins = [0u8; BIN_COUNT];
        analyzer.byte_frequency_data(&mut bins);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn tone_energy_lands_near_its_bin() {
        let mut analyzer = SpectrumAnalyzer::new();
        // 1 kHz at 16 kHz: bin = 1000 / (16000 / 512) = 32
        analyzer.push(&sine(1000.0, 16_000.0, 4096));

        let mut bins = [0u8; BIN_COUNT];
        for _ in 0..20 {
            analyzer.byte_frequency_data(&mut bins);
        }

        let peak = bins
            .iter()
            .enumerate()
            .max_by_key(|(_, v)| **v)
            .map(|(i, _)| i)
            .unwrap();
        assert!((30..=34).contains(&peak), "peak at bin {peak}");
        assert!(bins[peak] > 100);
    }

    #[test]
    fn long_blocks_keep_only_the_latest_window() {
        let mut analyzer = SpectrumAnalyzer::new();
        analyzer.push(&sine(1000.0, 16_000.0, 4096));
        analyzer.push(&[0.0; FFT_SIZE * 2]);

        let mut bins = [0u8; BIN_COUNT];
        analyzer.byte_frequency_data(&mut bins);
        assert!(bins.iter().all(|&b| b == 0));
    }
}
