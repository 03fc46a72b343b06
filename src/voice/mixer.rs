//! Software mixer behind the output device
//!
//! Sources are placed on a frame timeline and rendered when the device
//! callback reaches them. The count of rendered frames is the output clock.

use std::sync::Arc;

/// Identifier of a scheduled playback source
pub type SourceId = u64;

struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Arc<[f32]>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Frame-accurate mixer of scheduled mono sources
pub struct Mixer {
    sample_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    /// Create a mixer whose clock starts at zero
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_rendered: 0,
            voices: Vec::new(),
        }
    }

    /// Output clock in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn now(&self) -> f64 {
        self.frames_rendered as f64 / f64::from(self.sample_rate)
    }

    /// Place a source on the timeline starting at `at` seconds
    ///
    /// A start time already in the past begins at the next rendered frame.
    pub fn schedule(&mut self, id: SourceId, samples: Arc<[f32]>, at: f64) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let requested = (at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        self.voices.push(Voice {
            id,
            start_frame: requested.max(self.frames_rendered),
            samples,
        });
    }

    /// Remove a source immediately; returns whether it was still scheduled
    pub fn stop(&mut self, id: SourceId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        before != self.voices.len()
    }

    /// Remove every source
    pub fn stop_all(&mut self) {
        self.voices.clear();
    }

    /// Number of sources still scheduled or sounding
    #[must_use]
    pub fn active(&self) -> usize {
        self.voices.len()
    }

    /// Render interleaved output and return sources that finished naturally
    pub fn render(&mut self, out: &mut [f32], channels: usize) -> Vec<SourceId> {
        let channels = channels.max(1);
        let frames = (out.len() / channels) as u64;
        let block_start = self.frames_rendered;

        for (offset, frame) in out.chunks_mut(channels).enumerate() {
            let position = block_start + offset as u64;
            let mut mixed = 0.0f32;

            for voice in &self.voices {
                if position >= voice.start_frame && position < voice.end_frame() {
                    #[allow(clippy::cast_possible_truncation)]
                    let index = (position - voice.start_frame) as usize;
                    mixed += voice.samples[index];
                }
            }

            let sample = mixed.clamp(-1.0, 1.0);
            for slot in frame.iter_mut() {
                *slot = sample;
            }
        }

        self.frames_rendered = block_start + frames;

        let now = self.frames_rendered;
        let mut ended = Vec::new();
        self.voices.retain(|voice| {
            if voice.end_frame() <= now {
                ended.push(voice.id);
                false
            } else {
                true
            }
        });
        ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(len: usize) -> Arc<[f32]> {
        vec![0.5; len].into()
    }

    #[test]
    fn clock_advances_by_rendered_frames() {
        let mut mixer = Mixer::new(100);
        let mut out = vec![0.0; 50];
        mixer.render(&mut out, 1);
        assert!((mixer.now() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn back_to_back_sources_are_contiguous() {
        let mut mixer = Mixer::new(10);
        mixer.schedule(1, ones(5), 0.0);
        mixer.schedule(2, ones(5), 0.5);

        let mut out = vec![0.0; 12];
        let ended = mixer.render(&mut out, 1);

        assert_eq!(&out[..10], &[0.5; 10]);
        assert_eq!(&out[10..], &[0.0; 2]);
        assert_eq!(ended, vec![1, 2]);
    }

    #[test]
    fn stopped_source_is_silent_and_not_reported() {
        let mut mixer = Mixer::new(10);
        mixer.schedule(7, ones(5), 0.0);
        assert!(mixer.stop(7));
        assert!(!mixer.stop(7));

        let mut out = vec![0.0; 5];
        let ended = mixer.render(&mut out, 1);
        assert!(ended.is_empty());
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn past_start_time_begins_at_current_frame() {
        let mut mixer = Mixer::new(10);
        let mut out = vec![0.0; 10];
        mixer.render(&mut out, 1);

        mixer.schedule(1, ones(2), 0.0);
        let mut out = vec![0.0; 2];
        let ended = mixer.render(&mut out, 1);
        assert_eq!(out, vec![0.5, 0.5]);
        assert_eq!(ended, vec![1]);
    }

    #[test]
    fn stereo_duplicates_mono_frames() {
        let mut mixer = Mixer::new(10);
        mixer.schedule(1, vec![0.25, -0.25].into(), 0.0);
        let mut out = vec![0.0; 4];
        mixer.render(&mut out, 2);
        assert_eq!(out, vec![0.25, 0.25, -0.25, -0.25]);
    }
}
