use crate::audio::{ActivitySampler, AudioInput};
use anyhow::Result;
use log::debug;
use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::sleep;

/// Pause between two samples of one detection window.
pub const SAMPLE_GAP: Duration = Duration::from_secs(1);

/// A single "was there audio activity" observation.
pub trait ActivitySource {
    fn sample(&mut self) -> impl Future<Output = bool>;

    fn release(&mut self) {}
}

impl<A: AudioInput> ActivitySource for ActivitySampler<A> {
    async fn sample(&mut self) -> bool {
        ActivitySampler::sample(self).await
    }

    fn release(&mut self) {
        ActivitySampler::release(self);
    }
}

/// What the control loop needs from call detection.
///
/// `Err` is reserved for unexpected failures; those stop the loop.
pub trait CallDetection {
    fn detect(&mut self) -> impl Future<Output = Result<bool>>;

    fn cleanup(&mut self);
}

/// Inclusive: a ratio exactly at the threshold counts as a call.
pub fn is_call(active: usize, total: NonZeroUsize, activity_ratio: f64) -> bool {
    active as f64 / total.get() as f64 >= activity_ratio
}

pub struct CallDetector<S> {
    source: S,
    samples: NonZeroUsize,
    activity_ratio: f64,
    sample_gap: Duration,
}

impl<S: ActivitySource> CallDetector<S> {
    pub fn new(source: S, samples: NonZeroUsize, activity_ratio: f64) -> Self {
        Self {
            source,
            samples,
            activity_ratio,
            sample_gap: SAMPLE_GAP,
        }
    }

    /// Take the whole window of samples, one after the other.
    pub async fn detect_call_activity(&mut self) -> bool {
        let total = self.samples.get();
        debug!(
            "Starting call detection: {} samples, threshold ratio: {}",
            total, self.activity_ratio
        );

        let mut active = 0;
        for i in 0..total {
            if self.source.sample().await {
                active += 1;
            }
            if i + 1 < total {
                sleep(self.sample_gap).await;
            }
        }

        let in_call = is_call(active, self.samples, self.activity_ratio);
        debug!(
            "Call detection complete: {}/{} active samples (ratio: {:.2}), In call: {}",
            active,
            total,
            active as f64 / total as f64,
            in_call
        );
        in_call
    }
}

impl<S: ActivitySource> CallDetection for CallDetector<S> {
    async fn detect(&mut self) -> Result<bool> {
        Ok(self.detect_call_activity().await)
    }

    fn cleanup(&mut self) {
        self.source.release();
    }
}
