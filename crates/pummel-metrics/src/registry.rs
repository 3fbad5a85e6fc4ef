//! The shared metrics registry.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::counter::{Counter, Gauge, LabeledCounters};
use crate::summary::LatencySummary;

/// Every metric the loader maintains, by its exposition name.
///
/// `request_success` is incremented only when a response status equals the
/// configured success code; `request_errors` counts transport failures and
/// timeouts and is orthogonal to it, so `request_sum` is not the sum of the
/// two.
#[derive(Debug)]
pub struct Registry {
    pub request_sum: Counter,
    pub request_success: Counter,
    pub request_errors: Counter,
    pub request_timeouts: Counter,
    pub conn_errors: Counter,
    pub bytes_written: Counter,
    pub bytes_read: Counter,
    pub write_errors: Counter,
    pub read_errors: Counter,
    pub conn_open: Gauge,
    pub status_codes: LabeledCounters,
    pub error_messages: LabeledCounters,
    pub request_duration: LatencySummary,
    generation: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            request_sum: Counter::new(),
            request_success: Counter::new(),
            request_errors: Counter::new(),
            request_timeouts: Counter::new(),
            conn_errors: Counter::new(),
            bytes_written: Counter::new(),
            bytes_read: Counter::new(),
            write_errors: Counter::new(),
            read_errors: Counter::new(),
            conn_open: Gauge::new(),
            status_codes: LabeledCounters::new("code"),
            error_messages: LabeledCounters::new("message"),
            request_duration: LatencySummary::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// The current flush generation. Bumped by every [`flush`](Self::flush).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Resets every metric in place and bumps the generation.
    ///
    /// Callers must have quiesced all writers first (the worker pool joins
    /// its workers before flushing); a sample whose generation differs from
    /// the one it was armed with spans a flush and must be discarded.
    pub fn flush(&self) {
        self.request_sum.reset();
        self.request_success.reset();
        self.request_errors.reset();
        self.request_timeouts.reset();
        self.conn_errors.reset();
        self.bytes_written.reset();
        self.bytes_read.reset();
        self.write_errors.reset();
        self.read_errors.reset();
        self.conn_open.reset();
        self.status_codes.reset();
        self.error_messages.reset();
        self.request_duration.reset();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(generation, "metrics flushed");
    }

    /// Copies all current readings.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            generation: self.generation(),
            request_sum: self.request_sum.get(),
            request_success: self.request_success.get(),
            request_errors: self.request_errors.get(),
            request_timeouts: self.request_timeouts.get(),
            conn_errors: self.conn_errors.get(),
            bytes_written: self.bytes_written.get(),
            bytes_read: self.bytes_read.get(),
            write_errors: self.write_errors.get(),
            read_errors: self.read_errors.get(),
            conn_open: self.conn_open.get(),
            latency: self.request_duration.quantiles(),
        }
    }

    /// Renders the registry in the Prometheus text exposition format, for
    /// the optional push-gateway integration.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(1024);
        for (name, counter) in [
            ("request_timeouts", &self.request_timeouts),
            ("request_errors", &self.request_errors),
            ("request_sum", &self.request_sum),
            ("request_success", &self.request_success),
            ("conn_errors", &self.conn_errors),
            ("bytes_written", &self.bytes_written),
            ("bytes_read", &self.bytes_read),
            ("request_write_errors", &self.write_errors),
            ("request_read_errors", &self.read_errors),
        ] {
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {}", counter.get());
        }

        let _ = writeln!(out, "# TYPE conn_open gauge");
        let _ = writeln!(out, "conn_open {}", self.conn_open.get());

        let _ = writeln!(out, "# TYPE status_codes counter");
        for (code, count) in self.status_codes.snapshot() {
            let _ = writeln!(out, "status_codes{{code=\"{}\"}} {count}", escape_label(&code));
        }
        let _ = writeln!(out, "# TYPE errors counter");
        for (message, count) in self.error_messages.snapshot() {
            let _ = writeln!(out, "errors{{message=\"{}\"}} {count}", escape_label(&message));
        }

        let _ = writeln!(out, "# TYPE request_duration summary");
        for (q, latency) in self.request_duration.quantiles() {
            let _ = writeln!(
                out,
                "request_duration{{quantile=\"{q}\"}} {}",
                latency.as_secs_f64()
            );
        }
        let _ = writeln!(
            out,
            "request_duration_sum {}",
            self.request_duration.sum().as_secs_f64()
        );
        let _ = writeln!(out, "request_duration_count {}", self.request_duration.count());
        out
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// One copy of all registry readings, stamped with the flush generation it
/// was taken under.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub generation: u64,
    pub request_sum: u64,
    pub request_success: u64,
    pub request_errors: u64,
    pub request_timeouts: u64,
    pub conn_errors: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub write_errors: u64,
    pub read_errors: u64,
    pub conn_open: i64,
    pub latency: Vec<(f64, Duration)>,
}
