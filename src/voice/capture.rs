//! Audio capture from microphone

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleRate, Stream};

use super::analyzer::{AnalyzerHandle, SpectrumAnalyzer, WeakAnalyzer};
use super::backend::{AudioBackend, CaptureStream, SampleHandler};
use crate::{Error, Result};

/// Re-chunks arbitrary device buffers into fixed-size blocks
#[derive(Debug)]
pub struct BlockAssembler {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockAssembler {
    /// Create an assembler emitting blocks of `block_size` samples
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append samples, calling `emit` once for every completed block
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(Vec<f32>)) {
        while !samples.is_empty() {
            let room = self.block_size - self.pending.len();
            let take = room.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_size {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                emit(block);
            }
        }
    }

    /// Samples held towards the next block
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Microphone source wired to an analyzer tap and a fixed-block processor
///
/// Every block is handed to `on_block` synchronously on the audio thread.
pub struct CapturePipeline {
    analyzer: AnalyzerHandle,
    stream: Option<Box<dyn CaptureStream>>,
}

impl CapturePipeline {
    /// Acquire the microphone and start delivering blocks
    ///
    /// # Errors
    ///
    /// Returns `Error::Permission` if the microphone cannot be opened
    pub fn start<F>(
        backend: &dyn AudioBackend,
        sample_rate: u32,
        block_size: usize,
        mut on_block: F,
    ) -> Result<Self>
    where
        F: FnMut(Vec<f32>) + Send + 'static,
    {
        let analyzer = SpectrumAnalyzer::shared();
        let tap = Arc::clone(&analyzer);
        let mut assembler = BlockAssembler::new(block_size);

        let handler: SampleHandler = Box::new(move |samples: &[f32]| {
            if let Ok(mut analyzer) = tap.lock() {
                analyzer.push(samples);
            }
            assembler.push(samples, &mut on_block);
        });

        let stream = backend.open_capture(sample_rate, handler)?;

        tracing::debug!(sample_rate, block_size, "capture pipeline started");

        Ok(Self {
            analyzer,
            stream: Some(stream),
        })
    }

    /// Weak handle to the analyzer for the visualizer
    #[must_use]
    pub fn analyzer(&self) -> WeakAnalyzer {
        Arc::downgrade(&self.analyzer)
    }

    /// Stop the stream and release the device
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::debug!("capture pipeline stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Captures audio from the default input device
pub struct DeviceCapture {
    stream: Option<Stream>,
}

impl DeviceCapture {
    /// Open the default input device and start streaming
    ///
    /// Multi-channel devices are downmixed to mono before `on_samples`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Permission` if there is no usable input device
    pub fn open(sample_rate: u32, mut on_samples: SampleHandler) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Permission("no input device available".to_string()))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::Permission(e.to_string()))?
            .filter(|c| {
                c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported.with_sample_rate(SampleRate(sample_rate)).config();
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio capture initialized"
        );

        let mut mono = Vec::new();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if channels == 1 {
                        on_samples(data);
                        return;
                    }
                    mono.clear();
                    #[allow(clippy::cast_precision_loss)]
                    mono.extend(
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                    );
                    on_samples(&mono);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| match e {
                BuildStreamError::DeviceNotAvailable => Error::Permission(e.to_string()),
                other => Error::Audio(other.to_string()),
            })?;

        stream.play().map_err(|e| Error::Permission(e.to_string()))?;

        tracing::debug!("audio capture started");
        Ok(Self {
            stream: Some(stream),
        })
    }
}

impl CaptureStream for DeviceCapture {
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "failed to pause capture stream");
            }
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_emits_exact_blocks() {
        let mut assembler = BlockAssembler::new(4);
        let mut blocks = Vec::new();

        assembler.push(&[1.0, 2.0, 3.0], |b| blocks.push(b));
        assert!(blocks.is_empty());
        assert_eq!(assembler.buffered(), 3);

        assembler.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |b| blocks.push(b));
        assert_eq!(blocks, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);
        assert_eq!(assembler.buffered(), 1);
    }

    #[test]
    fn zero_block_size_is_clamped() {
        let mut assembler = BlockAssembler::new(0);
        let mut count = 0;
        assembler.push(&[0.1, 0.2], |_| count += 1);
        assert_eq!(count, 2);
    }
}
