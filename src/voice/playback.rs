//! Audio playback to speakers
//!
//! Inbound speech arrives as independent chunks. Each one is placed on the
//! output clock exactly where the previous one ends, so a reply plays
//! gaplessly no matter how unevenly the network delivers it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};

use super::backend::{EndedHandler, OutputSink};
use super::codec::{decode_inbound, duration_secs};
use super::mixer::{Mixer, SourceId};
use crate::{Error, Result};

/// Placement of one chunk on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    /// Source identifier, never reused within a scheduler
    pub id: SourceId,
    /// Start time in seconds
    pub start: f64,
    /// Length in seconds
    pub duration: f64,
}

impl ScheduledChunk {
    /// Time at which this chunk stops sounding
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Gapless scheduler for inbound speech chunks
pub struct PlaybackScheduler {
    sink: Option<Box<dyn OutputSink>>,
    sample_rate: u32,
    running_clock: f64,
    in_flight: BTreeMap<SourceId, ScheduledChunk>,
    next_id: SourceId,
}

impl PlaybackScheduler {
    /// Create a scheduler over an output context running at `sample_rate`
    #[must_use]
    pub fn new(sink: Box<dyn OutputSink>, sample_rate: u32) -> Self {
        Self {
            sink: Some(sink),
            sample_rate,
            running_clock: 0.0,
            in_flight: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Decode a base64 PCM chunk and schedule it after everything queued
    ///
    /// Returns `Ok(None)` for empty chunks or after teardown.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` for a malformed payload; nothing is scheduled
    pub fn enqueue(&mut self, data: &str) -> Result<Option<ScheduledChunk>> {
        let samples = decode_inbound(data)?;
        Ok(self.enqueue_samples(samples))
    }

    /// Schedule already-decoded samples after everything queued
    pub fn enqueue_samples(&mut self, samples: Vec<f32>) -> Option<ScheduledChunk> {
        if samples.is_empty() {
            return None;
        }
        let sink = self.sink.as_mut()?;

        let start = self.running_clock.max(sink.now());
        let duration = duration_secs(samples.len(), self.sample_rate);

        self.next_id += 1;
        let chunk = ScheduledChunk {
            id: self.next_id,
            start,
            duration,
        };

        sink.start(chunk.id, samples.into(), start);
        self.running_clock = chunk.end();
        self.in_flight.insert(chunk.id, chunk);

        tracing::trace!(
            id = chunk.id,
            start = chunk.start,
            duration = chunk.duration,
            queued = self.in_flight.len(),
            "scheduled playback chunk"
        );

        Some(chunk)
    }

    /// Cut off all scheduled speech and reset the clock
    ///
    /// Returns how many sources were silenced.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.in_flight.len();
        if let Some(sink) = self.sink.as_mut() {
            for id in self.in_flight.keys() {
                sink.stop(*id);
            }
        }
        self.in_flight.clear();
        self.running_clock = 0.0;

        tracing::debug!(stopped, "playback interrupted");
        stopped
    }

    /// Record that a source finished playing on its own
    ///
    /// Completions for sources already cut off by `interrupt` or `teardown`
    /// are ignored; returns whether the source was still in flight.
    pub fn source_ended(&mut self, id: SourceId) -> bool {
        self.in_flight.remove(&id).is_some()
    }

    /// Stop everything and close the output context
    pub fn teardown(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            for id in self.in_flight.keys() {
                sink.stop(*id);
            }
            sink.close();
            tracing::debug!(dropped = self.in_flight.len(), "playback closed");
        }
        self.in_flight.clear();
        self.running_clock = 0.0;
    }

    /// End time of the last scheduled chunk, or 0 after a reset
    #[must_use]
    pub const fn running_clock(&self) -> f64 {
        self.running_clock
    }

    /// Chunks that will still produce sound
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether the output context has been closed
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.sink.is_none()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Plays scheduled audio to the default output device
pub struct DeviceOutput {
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<Stream>,
}

impl DeviceOutput {
    /// Open the default output device with a running mixer
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open(sample_rate: u32, on_ended: EndedHandler) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio playback initialized"
        );

        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate)));
        let render_mixer = Arc::clone(&mixer);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let ended = match render_mixer.lock() {
                        Ok(mut mixer) => mixer.render(data, channels),
                        Err(_) => {
                            data.fill(0.0);
                            return;
                        }
                    };
                    for id in ended {
                        on_ended(id);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            mixer,
            stream: Some(stream),
        })
    }
}

impl OutputSink for DeviceOutput {
    fn now(&self) -> f64 {
        self.mixer.lock().map(|m| m.now()).unwrap_or_default()
    }

    fn start(&mut self, id: SourceId, samples: Arc<[f32]>, at: f64) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.schedule(id, samples, at);
        }
    }

    fn stop(&mut self, id: SourceId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop(id);
        }
    }

    fn close(&mut self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop_all();
        }
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio playback stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorded {
        now: f64,
        started: Vec<(SourceId, f64, usize)>,
        stopped: Vec<SourceId>,
        closes: usize,
    }

    struct FakeSink(Rc<RefCell<Recorded>>);

    impl OutputSink for FakeSink {
        fn now(&self) -> f64 {
            self.0.borrow().now
        }
        fn start(&mut self, id: SourceId, samples: Arc<[f32]>, at: f64) {
            self.0.borrow_mut().started.push((id, at, samples.len()));
        }
        fn stop(&mut self, id: SourceId) {
            self.0.borrow_mut().stopped.push(id);
        }
        fn close(&mut self) {
            self.0.borrow_mut().closes += 1;
        }
    }

    fn scheduler() -> (PlaybackScheduler, Rc<RefCell<Recorded>>) {
        let recorded = Rc::new(RefCell::new(Recorded::default()));
        let sink = FakeSink(Rc::clone(&recorded));
        (PlaybackScheduler::new(Box::new(sink), 10), recorded)
    }

    #[test]
    fn chunks_are_contiguous_when_delivered_early() {
        let (mut playback, _) = scheduler();
        let a = playback.enqueue_samples(vec![0.1; 5]).unwrap();
        let b = playback.enqueue_samples(vec![0.1; 10]).unwrap();
        let c = playback.enqueue_samples(vec![0.1; 5]).unwrap();

        assert!((a.start - 0.0).abs() < 1e-9);
        assert!((b.start - a.end()).abs() < 1e-9);
        assert!((c.start - b.end()).abs() < 1e-9);
        assert!((playback.running_clock() - 2.0).abs() < 1e-9);
        assert_eq!(playback.in_flight(), 3);
    }

    #[test]
    fn late_chunk_starts_at_output_clock() {
        let (mut playback, recorded) = scheduler();
        playback.enqueue_samples(vec![0.1; 5]);
        recorded.borrow_mut().now = 3.0;

        let late = playback.enqueue_samples(vec![0.1; 5]).unwrap();
        assert!((late.start - 3.0).abs() < 1e-9);
    }

    #[test]
    fn interrupt_clears_everything() {
        let (mut playback, recorded) = scheduler();
        for _ in 0..4 {
            playback.enqueue_samples(vec![0.1; 5]);
        }

        assert_eq!(playback.interrupt(), 4);
        assert_eq!(playback.in_flight(), 0);
        assert!(playback.running_clock().abs() < f64::EPSILON);
        assert_eq!(recorded.borrow().stopped, vec![1, 2, 3, 4]);
    }

    #[test]
    fn completion_after_interrupt_is_ignored() {
        let (mut playback, _) = scheduler();
        let first = playback.enqueue_samples(vec![0.1; 5]).unwrap();
        playback.interrupt();

        let next = playback.enqueue_samples(vec![0.1; 5]).unwrap();
        assert!(!playback.source_ended(first.id));
        assert_eq!(playback.in_flight(), 1);
        assert!(playback.source_ended(next.id));
        assert_eq!(playback.in_flight(), 0);
    }

    #[test]
    fn natural_completion_leaves_the_clock_alone() {
        let (mut playback, _) = scheduler();
        let chunk = playback.enqueue_samples(vec![0.1; 5]).unwrap();
        assert!(playback.source_ended(chunk.id));
        assert!((playback.running_clock() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn teardown_is_idempotent() {
        let (mut playback, recorded) = scheduler();
        playback.enqueue_samples(vec![0.1; 5]);

        playback.teardown();
        playback.teardown();
        drop(playback);

        let recorded = recorded.borrow();
        assert_eq!(recorded.closes, 1);
        assert_eq!(recorded.stopped, vec![1]);
    }

    #[test]
    fn enqueue_after_teardown_is_a_no_op() {
        let (mut playback, recorded) = scheduler();
        playback.teardown();
        assert!(playback.enqueue_samples(vec![0.1; 5]).is_none());
        assert!(recorded.borrow().started.is_empty());
        assert!(playback.is_closed());
    }

    #[test]
    fn malformed_chunk_schedules_nothing() {
        let (mut playback, recorded) = scheduler();
        assert!(matches!(playback.enqueue("%%%"), Err(Error::Decode(_))));
        assert!(recorded.borrow().started.is_empty());
        assert!(playback.running_clock().abs() < f64::EPSILON);
    }
}
