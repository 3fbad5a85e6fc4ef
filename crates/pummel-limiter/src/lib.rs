//! Token-pacing rate limiter.
//!
//! A [`Limiter`] emits unit tokens into a bounded ring at a configurable
//! rate. A 5 ms ticker computes how many tokens the elapsed wall-clock time
//! entitles the consumer to (`elapsed * rate + surplus`), tops the ring up
//! to that amount, and carries the fractional remainder forward. Ticks that
//! find the ring already holding the entitlement are no-ops, which smooths
//! transient backlog instead of stacking it.
//!
//! Consumers pull tokens from the receiver returned by
//! [`Limiter::tokens`]; one token means "issue one request now".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

/// Ring capacity. Bounds memory if the rate is misconfigured far above
/// what the consumer can drain.
pub const RING_CAPACITY: usize = 1_000_000;

/// Ticker period of the token producer.
pub const TICK_PERIOD: Duration = Duration::from_millis(5);

/// Rates below this are clamped up to it; see [`Limiter::set_limit`].
pub const MIN_RATE: f64 = 1.0;

/// A stream of pacing tokens, one per permitted request.
pub type TokenStream = flume::Receiver<()>;

#[derive(Debug)]
struct Pace {
    rate: f64,
    last_event: Instant,
    surplus: f64,
}

/// Closed-loop rate limiter with a background token producer.
///
/// The limiter is single-use: after [`stop`](Limiter::stop) it emits no
/// further tokens and rate changes are ignored.
#[derive(Debug)]
pub struct Limiter {
    pace: Arc<Mutex<Pace>>,
    tx: flume::Sender<()>,
    rx: flume::Receiver<()>,
    stopped: Arc<AtomicBool>,
    producer: JoinHandle<()>,
}

impl Limiter {
    /// Creates a limiter with rate 0; no tokens flow until
    /// [`set_limit`](Limiter::set_limit) installs a rate.
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(RING_CAPACITY);
        let pace = Arc::new(Mutex::new(Pace {
            rate: 0.0,
            last_event: Instant::now(),
            surplus: 0.0,
        }));
        let stopped = Arc::new(AtomicBool::new(false));
        let producer = tokio::spawn(produce(
            Arc::clone(&pace),
            tx.clone(),
            Arc::clone(&stopped),
        ));
        Self {
            pace,
            tx,
            rx,
            stopped,
            producer,
        }
    }

    /// Installs a new rate, in tokens per second.
    ///
    /// Rates below 1.0 are clamped to 1.0: the producer cannot represent a
    /// sub-1 QPS schedule, so `set_limit(0.5)` behaves as `set_limit(1.0)`.
    /// The change drains the ring first, so no token granted under the
    /// old rate survives into the new one.
    pub fn set_limit(&self, rate: f64) {
        if self.stopped.load(Ordering::Acquire) {
            tracing::debug!("set_limit ignored: limiter is stopped");
            return;
        }
        let rate = rate.max(MIN_RATE);
        self.install(0.0);
        self.drain();
        self.install(rate);
        tracing::debug!(rate, "rate limit installed");
    }

    /// The currently installed rate; 0 before the first `set_limit` and
    /// after `stop`.
    pub fn rate(&self) -> f64 {
        self.pace.lock().unwrap().rate
    }

    /// Number of tokens waiting in the ring.
    pub fn backlog(&self) -> usize {
        self.rx.len()
    }

    /// A handle to the token stream. May be cloned; each token is
    /// delivered to exactly one receiver.
    pub fn tokens(&self) -> TokenStream {
        self.rx.clone()
    }

    /// Halts token production and drains the ring. The limiter cannot be
    /// restarted.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        // Installing rate 0 serializes with an in-flight tick: the producer
        // emits while holding the pace lock, so once this returns no more
        // tokens can appear and the drain below is final.
        self.install(0.0);
        self.drain();
        self.producer.abort();
        tracing::debug!("limiter stopped");
    }

    fn install(&self, rate: f64) {
        let mut pace = self.pace.lock().unwrap();
        pace.rate = rate;
        pace.last_event = Instant::now();
        pace.surplus = 0.0;
    }

    fn drain(&self) {
        for _ in self.rx.drain() {}
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Limiter {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

async fn produce(pace: Arc<Mutex<Pace>>, tx: flume::Sender<()>, stopped: Arc<AtomicBool>) {
    let mut ticker = tokio::time::interval(TICK_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if stopped.load(Ordering::Acquire) {
            return;
        }
        // Emission happens under the pace lock so that rate changes and
        // stop() observe a consistent ring. try_send never blocks, so the
        // lock is held only for the in-memory pushes.
        let mut guard = pace.lock().unwrap();
        let now = Instant::now();
        let tokens =
            now.duration_since(guard.last_event).as_secs_f64() * guard.rate + guard.surplus;
        let entitled = tokens as u64;
        let backlog = tx.len() as u64;
        if entitled == 0 || entitled <= backlog {
            continue;
        }
        let emit = entitled - backlog;
        for _ in 0..emit {
            if tx.try_send(()).is_err() {
                break;
            }
        }
        guard.surplus = tokens - entitled as f64;
        guard.last_event = now;
    }
}
