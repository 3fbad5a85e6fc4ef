//! The run's time series and its HTML rendering.
//!
//! A [`Report`] collects one row per sample tick: counter readings, the
//! open-connection gauge, the limiter rate in force, and the latency
//! quantiles. The sequences are parallel and grow-only; a row's index is
//! its sample number and its timestamp is implied by the sample period.
//! Rendering produces a single self-contained HTML file with no external
//! assets.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use pummel_metrics::MetricsSnapshot;
use serde::Serialize;

/// Rendering or persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to encode report data: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

/// The parallel sequences, one entry per sample.
#[derive(Debug, Default, Serialize)]
pub struct Series {
    pub sample_period_ms: u64,
    pub conn_open: Vec<i64>,
    pub request_sum: Vec<u64>,
    pub request_success: Vec<u64>,
    pub errors: Vec<u64>,
    pub timeouts: Vec<u64>,
    pub bytes_written: Vec<u64>,
    pub bytes_read: Vec<u64>,
    pub qps: Vec<f64>,
    /// Quantile target (as a string key, e.g. `"0.99"`) to observed
    /// latency in seconds.
    pub latency: BTreeMap<String, Vec<f64>>,
}

impl Series {
    /// Number of samples taken so far.
    pub fn len(&self) -> usize {
        self.request_sum.len()
    }
}

/// Append-only sample store shared between the sampler (writer) and the
/// renderer (reader).
#[derive(Debug)]
pub struct Report {
    series: RwLock<Series>,
}

impl Report {
    pub fn new(sample_period: Duration) -> Self {
        Self {
            series: RwLock::new(Series {
                sample_period_ms: sample_period.as_millis() as u64,
                ..Series::default()
            }),
        }
    }

    /// Appends one sample row. All fields of the row become visible to
    /// readers atomically.
    pub fn append(&self, snapshot: &MetricsSnapshot, qps: f64) {
        let mut series = self.series.write().unwrap();
        series.conn_open.push(snapshot.conn_open);
        series.request_sum.push(snapshot.request_sum);
        series.request_success.push(snapshot.request_success);
        series.errors.push(snapshot.request_errors);
        series.timeouts.push(snapshot.request_timeouts);
        series.bytes_written.push(snapshot.bytes_written);
        series.bytes_read.push(snapshot.bytes_read);
        series.qps.push(qps);
        for (quantile, latency) in &snapshot.latency {
            series
                .latency
                .entry(quantile.to_string())
                .or_default()
                .push(latency.as_secs_f64());
        }
    }

    pub fn len(&self) -> usize {
        self.series.read().unwrap().len()
    }

    /// Runs `f` with a read view of the series.
    pub fn with_series<R>(&self, f: impl FnOnce(&Series) -> R) -> R {
        f(&self.series.read().unwrap())
    }

    /// Renders the self-contained HTML document.
    pub fn render_html(&self) -> Result<String, ReportError> {
        let series = self.series.read().unwrap();
        let data = serde_json::to_string(&*series)?;
        Ok(include_str!("template.html").replace("/*__SERIES__*/null", &data))
    }

    /// Renders and writes the report to `path`.
    pub fn write_html(&self, path: &Path) -> Result<(), ReportError> {
        let html = self.render_html()?;
        std::fs::write(path, html)?;
        Ok(())
    }
}

/// Converts a cumulative counter series into per-second rates over the
/// given sample step.
///
/// A negative delta means the counter was flushed between samples; it is
/// clamped to zero so phase boundaries do not render as unnatural dips.
pub fn rate(samples: &[u64], step_secs: f64) -> Vec<f64> {
    let mut result = vec![0.0; samples.len()];
    if samples.len() < 2 {
        return result;
    }
    for i in 1..samples.len() {
        let previous = samples[i - 1];
        let current = samples[i].max(previous);
        result[i] = (current - previous) as f64 / step_secs;
    }
    result
}
