//! Audio hardware seams
//!
//! The session never talks to `cpal` directly: it asks an `AudioBackend` for
//! a capture stream and an output sink. `CpalBackend` opens the default
//! devices; tests substitute fakes.

use std::sync::Arc;

use super::capture::DeviceCapture;
use super::mixer::SourceId;
use super::playback::DeviceOutput;
use crate::Result;

/// Receives mono samples on the audio thread
///
/// Must not block; it runs inside the hardware callback.
pub type SampleHandler = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Told when a scheduled source finishes playing on its own
pub type EndedHandler = Arc<dyn Fn(SourceId) + Send + Sync + 'static>;

/// A running microphone stream
pub trait CaptureStream {
    /// Stop the hardware stream and release the device
    ///
    /// Safe to call more than once.
    fn stop(&mut self);
}

/// An output context with its own clock
pub trait OutputSink {
    /// Output clock in seconds
    fn now(&self) -> f64;

    /// Schedule `samples` to begin at `at` seconds on the output clock
    fn start(&mut self, id: SourceId, samples: Arc<[f32]>, at: f64);

    /// Silence a scheduled source immediately
    fn stop(&mut self, id: SourceId);

    /// Silence everything and release the device
    ///
    /// Safe to call more than once.
    fn close(&mut self);
}

/// Factory for capture streams and output sinks
pub trait AudioBackend {
    /// Open the microphone at `sample_rate`, delivering mono samples
    ///
    /// # Errors
    ///
    /// Returns `Error::Permission` if no input device can be used
    fn open_capture(&self, sample_rate: u32, on_samples: SampleHandler)
    -> Result<Box<dyn CaptureStream>>;

    /// Open an output context at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if no output device can be used
    fn open_output(&self, sample_rate: u32, on_ended: EndedHandler) -> Result<Box<dyn OutputSink>>;
}

/// Default input and output devices of the default `cpal` host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_capture(
        &self,
        sample_rate: u32,
        on_samples: SampleHandler,
    ) -> Result<Box<dyn CaptureStream>> {
        let capture = DeviceCapture::open(sample_rate, on_samples)?;
        Ok(Box::new(capture))
    }

    fn open_output(&self, sample_rate: u32, on_ended: EndedHandler) -> Result<Box<dyn OutputSink>> {
        let output = DeviceOutput::open(sample_rate, on_ended)?;
        Ok(Box::new(output))
    }
}
