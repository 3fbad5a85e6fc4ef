//! Counter and gauge primitives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A monotonically increasing counter.
///
/// Updates are relaxed atomics: no ordering is guaranteed between two
/// different counters, and readers must tolerate seeing one incremented
/// before another that was logically written first.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// A gauge that can move in both directions.
///
/// Used for the open-connection count; pairing every increment with exactly
/// one decrement keeps it non-negative.
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub const fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// A family of counters keyed by a single label value.
///
/// Insertion is idempotent and first-writer-wins: the first `with` call for
/// a label creates the counter, later calls return the same handle. The
/// guarding mutex is uncontended in practice because the label sets
/// (status codes, distinct error messages) are small and bounded.
#[derive(Debug)]
pub struct LabeledCounters {
    label: &'static str,
    counters: Mutex<HashMap<String, Arc<Counter>>>,
}

impl LabeledCounters {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// The label key, e.g. `code` for `status_codes{code}`.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Returns the counter for `value`, creating it on first use.
    pub fn with(&self, value: &str) -> Arc<Counter> {
        let mut counters = self.counters.lock().unwrap();
        if let Some(counter) = counters.get(value) {
            return Arc::clone(counter);
        }
        let counter = Arc::new(Counter::new());
        counters.insert(value.to_string(), Arc::clone(&counter));
        counter
    }

    /// Copies out all `(label value, count)` pairs, sorted by label value.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let counters = self.counters.lock().unwrap();
        let mut pairs: Vec<_> = counters
            .iter()
            .map(|(value, counter)| (value.clone(), counter.get()))
            .collect();
        pairs.sort();
        pairs
    }

    /// Drops all label series. Handles returned by earlier `with` calls
    /// keep counting but are no longer visible to `snapshot`.
    pub fn reset(&self) {
        self.counters.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_counts() {
        let c = Counter::new();
        c.inc();
        c.add(41);
        assert_eq!(c.get(), 42);
        c.reset();
        assert_eq!(c.get(), 0);
    }

    #[test]
    fn gauge_moves_both_ways() {
        let g = Gauge::new();
        g.inc();
        g.inc();
        g.dec();
        assert_eq!(g.get(), 1);
        g.reset();
        assert_eq!(g.get(), 0);
    }

    #[test]
    fn labeled_insertion_is_idempotent() {
        let family = LabeledCounters::new("code");
        let first = family.with("200");
        first.inc();
        let second = family.with("200");
        second.inc();
        // Both handles point at the same counter.
        assert_eq!(first.get(), 2);
        assert_eq!(family.snapshot(), vec![("200".to_string(), 2)]);
    }

    #[test]
    fn labeled_snapshot_is_sorted() {
        let family = LabeledCounters::new("code");
        family.with("500").inc();
        family.with("200").inc();
        let snapshot = family.snapshot();
        assert_eq!(snapshot[0].0, "200");
        assert_eq!(snapshot[1].0, "500");
    }

    #[test]
    fn labeled_reset_clears_series() {
        let family = LabeledCounters::new("message");
        family.with("connection refused").inc();
        family.reset();
        assert!(family.snapshot().is_empty());
    }
}
