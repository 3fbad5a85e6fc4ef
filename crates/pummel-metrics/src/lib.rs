//! Process-scoped metrics for the load generator.
//!
//! Every component of the loader shares one [`Registry`]: the dialer counts
//! connection bytes and errors, workers classify request outcomes, and the
//! controller reads the same counters to decide how to grow load. Raw
//! counters are lock-free atomics; the labeled counters
//! (`status_codes{code}`, `errors{message}`) sit behind a mutex because
//! their cardinality is small and insertions are rare.
//!
//! A registry is never unregistered. Instead [`Registry::flush`] resets
//! every metric in place and bumps a generation counter; readers that hold
//! a [`MetricsSnapshot`] can compare generations to discard data that
//! straddles a flush boundary.

pub mod counter;
pub mod registry;
pub mod summary;

pub use counter::{Counter, Gauge, LabeledCounters};
pub use registry::{MetricsSnapshot, Registry};
pub use summary::{LatencySummary, QUANTILE_TARGETS};
