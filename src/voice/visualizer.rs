//! Amplitude bars for the live view
//!
//! Samples the capture analyzer on a fixed cadence and republishes a short
//! vector of bar heights. Lossy: only the latest vector matters.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::analyzer::{BIN_COUNT, WeakAnalyzer};

/// Number of bars in the amplitude vector
pub const BAR_COUNT: usize = 12;

/// Bar height while no session is running
pub const IDLE_LEVEL: u8 = 8;

/// Minimum bar height while a session is live
pub const LEVEL_FLOOR: u8 = 10;

/// Bar heights in percent
pub type Levels = [u8; BAR_COUNT];

/// Vector published when no session is running
pub const IDLE_LEVELS: Levels = [IDLE_LEVEL; BAR_COUNT];

/// Reduce a byte spectrum to bar heights
///
/// The spectrum is split into `BAR_COUNT` equal contiguous buckets; each
/// bucket's mean is scaled from 0..=255 to 0..=100 and floored at
/// `LEVEL_FLOOR`.
#[must_use]
pub fn levels_from_spectrum(bins: &[u8]) -> Levels {
    let bucket = (bins.len() / BAR_COUNT).max(1);
    let mut levels = [LEVEL_FLOOR; BAR_COUNT];

    for (index, level) in levels.iter_mut().enumerate() {
        let start = (index * bucket).min(bins.len());
        let end = (start + bucket).min(bins.len());
        let slice = &bins[start..end];
        if slice.is_empty() {
            continue;
        }

        let sum: u32 = slice.iter().map(|&b| u32::from(b)).sum();
        #[allow(clippy::cast_precision_loss)]
        let avg = sum as f32 / slice.len() as f32;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = (avg / 255.0 * 100.0).round() as u8;
        *level = percent.max(LEVEL_FLOOR);
    }

    levels
}

/// Periodic task republishing analyzer levels
pub struct Visualizer {
    task: Option<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
}

impl Visualizer {
    /// Start sampling `analyzer` every `interval`
    ///
    /// The loop ends on its own once the analyzer is dropped. Nothing is
    /// published after `stop` returns, even from a tick already running on
    /// another worker.
    #[must_use]
    pub fn start(
        analyzer: WeakAnalyzer,
        interval: Duration,
        publish: Arc<watch::Sender<Levels>>,
    ) -> Self {
        let stopped = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::clone(&stopped);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut bins = [0u8; BIN_COUNT];

            loop {
                ticker.tick().await;

                let Some(analyzer) = analyzer.upgrade() else {
                    tracing::trace!("analyzer gone, visualizer exiting");
                    break;
                };
                match analyzer.lock() {
                    Ok(mut analyzer) => analyzer.byte_frequency_data(&mut bins),
                    Err(_) => break,
                }
                drop(analyzer);

                let levels = levels_from_spectrum(&bins);

                // Checked under the channel's write lock, so a reset
                // published after `stop` is never overwritten
                let published = publish.send_if_modified(|current| {
                    if cancelled.load(Ordering::Acquire) {
                        return false;
                    }
                    *current = levels;
                    true
                });
                if !published {
                    break;
                }
            }
        });

        Self {
            task: Some(task),
            stopped,
        }
    }

    /// Cancel the sampling loop
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Visualizer {
    fn drop(&mut self) {
        self.stop();
    }
}
