//! Voice processing module
//!
//! Handles microphone capture, the PCM wire codec, gapless playback
//! scheduling, and the amplitude visualizer fed by the capture analyzer.

mod analyzer;
mod backend;
mod capture;
mod codec;
mod mixer;
mod playback;
mod visualizer;

pub use analyzer::{AnalyzerHandle, BIN_COUNT, FFT_SIZE, SpectrumAnalyzer, WeakAnalyzer};
pub use backend::{AudioBackend, CaptureStream, CpalBackend, EndedHandler, OutputSink, SampleHandler};
pub use capture::{BlockAssembler, CapturePipeline};
pub use codec::{WireChunk, decode_inbound, duration_secs, encode_outbound, pcm_mime_type};
pub use mixer::{Mixer, SourceId};
pub use playback::{PlaybackScheduler, ScheduledChunk};
pub use visualizer::{
    BAR_COUNT, IDLE_LEVEL, IDLE_LEVELS, LEVEL_FLOOR, Levels, Visualizer, levels_from_spectrum,
};

/// Sample rate for audio capture (16kHz for speech)
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized speech from the live service
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Samples per captured block handed to the uplink
pub const BLOCK_SIZE: usize = 4096;
