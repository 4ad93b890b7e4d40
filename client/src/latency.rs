/// Running estimate of the one-way delay between the server sampling a
/// position and this client receiving it. Each observation is folded into an
/// equal-weight two-term average; the smoothed figure is diagnostic only,
/// position correction always uses the instantaneous sample.
#[derive(Debug, Default, Clone)]
pub struct LatencyEstimator {
    smoothed_ms: Option<f64>,
}

impl LatencyEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one timestamped message and return the instantaneous latency
    /// in milliseconds. A message stamped ahead of the local clock reads as
    /// zero rather than negative.
    pub fn observe(&mut self, message_timestamp_ms: u64, now_ms: u64) -> f64 {
        let latency_ms = now_ms.saturating_sub(message_timestamp_ms) as f64;
        self.smoothed_ms = Some(match self.smoothed_ms {
            Some(smoothed) => (smoothed + latency_ms) / 2.0,
            None => latency_ms,
        });
        latency_ms
    }

    /// Smoothed latency in milliseconds, if anything has been observed yet
    pub fn smoothed_ms(&self) -> Option<f64> {
        self.smoothed_ms
    }
}

/// Latency-compensated playback target: the position the authoritative
/// player has reached by the time the message arrived here.
pub fn adjusted_target(current_time_secs: f64, latency_ms: f64) -> f64 {
    current_time_secs + latency_ms / 1000.0
}
