use tokio::time::Instant;

const SMOOTHING: f64 = 1.0 / 16.0;
const INITIAL_PERIOD_SECS: f64 = 1.0;

/// Smoothed time between two notifications.
///
/// Sensors sometimes deliver a small burst of notifications, so the raw
/// interval goes through a simple low-pass filter.
#[derive(Debug, Clone)]
pub struct PeriodEstimator {
    period: f64,
    last_update: Option<Instant>,
}

impl Default for PeriodEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PeriodEstimator {
    pub fn new() -> Self {
        Self {
            period: INITIAL_PERIOD_SECS,
            last_update: None,
        }
    }

    /// Current estimate in seconds
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Feeds the receipt time of a notification, returning the new estimate.
    ///
    /// The first call only records `now`, there's nothing to measure against yet.
    pub fn update(&mut self, now: Instant) -> f64 {
        if let Some(last) = self.last_update {
            let delta = now.saturating_duration_since(last).as_secs_f64();
            self.period += SMOOTHING * (delta - self.period);
        }
        self.last_update = Some(now);
        self.period
    }
}
