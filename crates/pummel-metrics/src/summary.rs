//! Latency summary backed by an HDR histogram.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;

/// Quantile targets reported for `request_duration`.
///
/// The histogram keeps three significant figures, which bounds rank error
/// well inside the tightest tolerance the report cares about (0.001 at the
/// 0.99 target).
pub const QUANTILE_TARGETS: [f64; 5] = [0.5, 0.75, 0.8, 0.9, 0.99];

const SIGNIFICANT_FIGURES: u8 = 3;

/// Lowest and highest trackable latencies, in microseconds. Observations
/// outside the range saturate instead of erroring.
const LOW_MICROS: u64 = 1;
const HIGH_MICROS: u64 = 600_000_000;

/// Records request durations and answers quantile queries.
#[derive(Debug)]
pub struct LatencySummary {
    histogram: Mutex<Histogram<u64>>,
}

impl LatencySummary {
    pub fn new() -> Self {
        Self {
            histogram: Mutex::new(new_histogram()),
        }
    }

    /// Records one observation.
    pub fn observe(&self, latency: Duration) {
        let micros = (latency.as_micros() as u64).clamp(LOW_MICROS, HIGH_MICROS);
        self.histogram.lock().unwrap().saturating_record(micros);
    }

    /// The latency at quantile `q` (0.0 ..= 1.0).
    pub fn quantile(&self, q: f64) -> Duration {
        let micros = self.histogram.lock().unwrap().value_at_quantile(q);
        Duration::from_micros(micros)
    }

    /// All configured quantile targets with their current values.
    pub fn quantiles(&self) -> Vec<(f64, Duration)> {
        let histogram = self.histogram.lock().unwrap();
        QUANTILE_TARGETS
            .iter()
            .map(|&q| (q, Duration::from_micros(histogram.value_at_quantile(q))))
            .collect()
    }

    /// Number of recorded observations.
    pub fn count(&self) -> u64 {
        self.histogram.lock().unwrap().len()
    }

    /// Sum of all recorded observations, approximated from the histogram
    /// mean. Used only for the Prometheus summary exposition.
    pub fn sum(&self) -> Duration {
        let histogram = self.histogram.lock().unwrap();
        let total_micros = histogram.mean() * histogram.len() as f64;
        Duration::from_micros(total_micros as u64)
    }

    pub fn reset(&self) {
        self.histogram.lock().unwrap().reset();
    }
}

impl Default for LatencySummary {
    fn default() -> Self {
        Self::new()
    }
}

fn new_histogram() -> Histogram<u64> {
    // The bounds and precision are compile-time constants; construction
    // cannot fail for them.
    Histogram::new_with_bounds(LOW_MICROS, HIGH_MICROS, SIGNIFICANT_FIGURES)
        .expect("histogram bounds are valid")
}
