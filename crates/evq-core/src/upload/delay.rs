//! Adaptive delay between upload cycles.

use std::time::Duration;

use evq_config::UploadPerformance;

/// Delay that shrinks while batches are being delivered and grows while they
/// are not, always within `[min, max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadDelay {
    current: Duration,
    min: Duration,
    max: Duration,
    change_rate: f64,
}

impl UploadDelay {
    pub fn new(performance: &UploadPerformance) -> Self {
        Self {
            current: performance.initial_upload_delay,
            min: performance.min_upload_delay,
            max: performance.max_upload_delay,
            change_rate: performance.upload_delay_change_rate,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// `max(min, current * (1 - rate))`
    pub fn decrease(&mut self) {
        self.current = scale(self.current, 1.0 - self.change_rate)
            .unwrap_or(self.min)
            .max(self.min);
    }

    /// `min(max, current * (1 + rate))`
    pub fn increase(&mut self) {
        self.current = scale(self.current, 1.0 + self.change_rate)
            .unwrap_or(self.max)
            .min(self.max);
    }
}

fn scale(duration: Duration, factor: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor).ok()
}
