//! The three-phase adaptive controller.
//!
//! Phase A (*burst*) floods the target with no rate cap to measure a
//! ceiling QPS and a viable worker count. Phase B (*calibrate*) probes
//! upward from that seed with multiplicative increases, backing off when
//! the error counter moves. Phase C (*load*) is the user-visible window:
//! a deterministic ten-step ramp to the calibrated operating point,
//! sampled into the report. A user-supplied `-q` skips A and B and holds
//! the fixed rate for the whole window.
//!
//! The controller never aborts on in-flight errors; the only signal it
//! reacts to is the delta of `request_errors` between samples.

use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use pummel_client::Client;
use pummel_limiter::{Limiter, MIN_RATE};
use pummel_metrics::{MetricsSnapshot, Registry};
use pummel_report::Report;
use tokio_util::sync::CancellationToken;

use crate::driver::{drive_paced, drive_unpaced};
use crate::pushgateway::{self, GatewayConfig};

/// Cadence of metric snapshots and calibration decisions.
pub const SAMPLE_PERIOD: Duration = Duration::from_millis(500);

/// Length of the uncapped burst window.
pub const BURST_DURATION: Duration = Duration::from_secs(5);

/// Length of the calibration window.
pub const ADJUSTMENT_DURATION: Duration = Duration::from_secs(30);

/// Starting step aggressiveness for calibration.
const INITIAL_MULTIPLIER: f64 = 0.1;

/// Shrink factor applied to the multiplier on an error-triggered backoff.
const BACKOFF_DIVISOR: f64 = 1.2;

/// Burst error percentage above which the measured seed is halved.
const FLAWED_ERROR_PERCENT: f64 = 2.0;

/// Number of ramp steps in the load phase.
const RAMP_STEPS: usize = 10;

/// Controller settings distilled from the CLI.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Load-phase duration (`-d`).
    pub duration: Duration,
    /// Fixed QPS (`-q`); 0 auto-calibrates.
    pub qps: f64,
    /// Initial worker count (`-c`).
    pub workers: usize,
    /// Show a terminal progress bar during the load phase.
    pub progress: bool,
    /// Push metrics on every sample tick.
    pub gateway: Option<GatewayConfig>,
}

/// An operating point carried between phases.
#[derive(Debug, Clone, Copy)]
pub struct Operating {
    pub qps: f64,
    pub workers: usize,
    /// Whether the burst that produced this point saw a degraded target.
    pub flawed: bool,
}

/// Everything the run produced, captured before the final flush.
#[derive(Debug)]
pub struct RunOutcome {
    pub snapshot: MetricsSnapshot,
    pub status_codes: Vec<(String, u64)>,
    pub error_messages: Vec<(String, u64)>,
    pub calibrated: Operating,
    /// Step aggressiveness at the end of calibration; starts at 0.1 and
    /// shrinks every time errors forced a backoff.
    pub multiplier: f64,
    pub elapsed: Duration,
}

/// The closed-loop controller.
pub struct Loader {
    client: Client,
    limiter: Arc<Limiter>,
    metrics: Arc<Registry>,
    report: Arc<Report>,
    config: LoaderConfig,
    multiplier: f64,
    await_ticks: u32,
    errors_watermark: u64,
    /// `request_errors` as of the previous sample, for the per-tick delta
    /// in the sample diagnostics.
    sampled_errors: u64,
    prev: Operating,
}

impl Loader {
    pub fn new(
        client: Client,
        limiter: Arc<Limiter>,
        metrics: Arc<Registry>,
        report: Arc<Report>,
        config: LoaderConfig,
    ) -> Self {
        let prev = Operating {
            qps: config.qps,
            workers: config.workers,
            flawed: false,
        };
        Self {
            client,
            limiter,
            metrics,
            report,
            config,
            multiplier: INITIAL_MULTIPLIER,
            await_ticks: 0,
            errors_watermark: 0,
            sampled_errors: 0,
            prev,
        }
    }

    /// Runs the configured phases to completion and returns the final
    /// readings. The limiter is stopped and the pool flushed on return.
    pub async fn run(&mut self) -> RunOutcome {
        if self.config.qps > 0.0 {
            self.prev = Operating {
                qps: self.config.qps,
                workers: self.config.workers,
                flawed: false,
            };
            tracing::info!(
                qps = self.prev.qps,
                workers = self.prev.workers,
                "fixed-rate mode, skipping calibration"
            );
        } else {
            self.burst().await;
            self.calibrate().await;
        }
        self.load().await
    }

    /// Phase A: run uncapped to let the slowest component self-limit; the
    /// steady rate it settles at is a safe upper bound to probe from.
    async fn burst(&mut self) {
        tracing::info!(workers = self.config.workers, "burst phase: measuring ceiling");
        self.client.run_workers(self.config.workers);
        let cancel = CancellationToken::new();
        let driver = tokio::spawn(drive_unpaced(self.client.clone(), cancel.clone()));

        tokio::time::sleep(BURST_DURATION).await;

        let snapshot = self.metrics.snapshot();
        let mut qps = snapshot.request_sum as f64 / BURST_DURATION.as_secs_f64();
        let mut workers = self.client.amount();
        let error_percent = if snapshot.request_sum > 0 {
            snapshot.request_errors as f64 / snapshot.request_sum as f64 * 100.0
        } else {
            100.0
        };
        let flawed = error_percent > FLAWED_ERROR_PERCENT;
        if flawed {
            qps /= 2.0;
            workers /= 2;
        }

        cancel.cancel();
        let _ = driver.await;

        self.prev = Operating {
            qps: qps.max(MIN_RATE),
            workers: workers.max(1),
            flawed,
        };
        tracing::info!(
            qps = self.prev.qps,
            workers = self.prev.workers,
            flawed,
            "burst ceiling measured"
        );
    }

    /// Phase B: multiplicative-increase hunt for the largest sustainable
    /// operating point, with error-triggered backoff.
    async fn calibrate(&mut self) {
        tracing::info!(
            qps = self.prev.qps,
            workers = self.prev.workers,
            "calibrate phase: probing sustainable load"
        );
        self.limiter.set_limit(self.prev.qps);
        self.client.run_workers(self.prev.workers);
        let cancel = CancellationToken::new();
        let driver = tokio::spawn(drive_paced(
            self.client.clone(),
            self.limiter.tokens(),
            cancel.clone(),
        ));

        self.multiplier = INITIAL_MULTIPLIER;
        self.await_ticks = 0;
        self.errors_watermark = 0;

        let start = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval_at(start + SAMPLE_PERIOD, SAMPLE_PERIOD);
        let deadline = tokio::time::sleep(ADJUSTMENT_DURATION);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = ticker.tick() => {
                    self.sample();
                    self.calibrate_step();
                }
            }
        }

        self.prev = Operating {
            qps: self.limiter.rate(),
            workers: self.client.amount(),
            flawed: self.prev.flawed,
        };
        cancel.cancel();
        let _ = driver.await;
        tracing::info!(
            qps = self.prev.qps,
            workers = self.prev.workers,
            "calibrated operating point"
        );
    }

    /// One calibration decision. Invoked every sample tick during
    /// Phase B.
    fn calibrate_step(&mut self) {
        // Debounce: a change made at tick T must be judged only on data
        // from after T.
        if self.await_ticks > 0 {
            self.await_ticks -= 1;
            return;
        }

        let errors = self.metrics.request_errors.get();
        let flawed = errors > 0 && errors != self.errors_watermark;
        self.errors_watermark = errors;

        if flawed {
            self.multiplier /= BACKOFF_DIVISOR;
            self.await_ticks += 3;
            tracing::debug!(multiplier = self.multiplier, "errors rose: backing off");
            return;
        }

        if self.client.overflow() > 0 {
            // Jobs are piling up, so consumption is the bottleneck.
            let grow = (self.client.amount() as f64 * self.multiplier) as usize;
            self.client.run_workers(grow);
            self.await_ticks += 1;
            tracing::debug!(workers = self.client.amount(), "queue backlog: grew workers");
        } else {
            // The queue is drained as fast as it fills; admission is the
            // bottleneck.
            let rate = self.limiter.rate() * (1.0 + self.multiplier);
            self.limiter.set_limit(rate);
            self.await_ticks += 1;
            tracing::debug!(rate, "queue drained: raised rate");
        }
    }

    /// Phase C: the measured window. Calibrated runs ramp rate and
    /// workers in ten 1 s steps and then hold; fixed-rate runs hold the
    /// configured point for the whole window.
    async fn load(&mut self) -> RunOutcome {
        let fixed = self.config.qps > 0.0;
        let (qps_step, worker_step) = if fixed {
            (self.prev.qps, self.prev.workers)
        } else {
            (
                (self.prev.qps / RAMP_STEPS as f64).max(MIN_RATE),
                (self.prev.workers / RAMP_STEPS).max(1),
            )
        };
        tracing::info!(
            duration = ?self.config.duration,
            qps_step,
            worker_step,
            fixed,
            "load phase"
        );

        self.limiter.set_limit(qps_step);
        self.client.run_workers(worker_step);
        let cancel = CancellationToken::new();
        let driver = tokio::spawn(drive_paced(
            self.client.clone(),
            self.limiter.tokens(),
            cancel.clone(),
        ));

        let bar = self.config.progress.then(|| {
            let bar = ProgressBar::new(self.config.duration.as_secs());
            bar.set_style(ProgressStyle::default_bar());
            bar
        });

        let started = Instant::now();
        let phase_start = tokio::time::Instant::now();
        let mut sample_ticker = tokio::time::interval_at(phase_start + SAMPLE_PERIOD, SAMPLE_PERIOD);
        let mut ramp_ticker =
            tokio::time::interval_at(phase_start + Duration::from_secs(1), Duration::from_secs(1));
        let deadline = tokio::time::sleep(self.config.duration);
        tokio::pin!(deadline);
        let mut steps = 1usize;
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = ramp_ticker.tick(), if !fixed && steps < RAMP_STEPS => {
                    steps += 1;
                    self.limiter.set_limit(qps_step * steps as f64);
                    self.client.run_workers(worker_step);
                }
                _ = sample_ticker.tick() => {
                    self.sample();
                    if let Some(bar) = &bar {
                        bar.set_position(started.elapsed().as_secs());
                    }
                }
            }
        }
        if let Some(bar) = &bar {
            bar.finish_and_clear();
        }

        self.limiter.stop();
        let outcome = RunOutcome {
            snapshot: self.metrics.snapshot(),
            status_codes: self.metrics.status_codes.snapshot(),
            error_messages: self.metrics.error_messages.snapshot(),
            calibrated: self.prev,
            multiplier: self.multiplier,
            elapsed: started.elapsed(),
        };
        cancel.cancel();
        let _ = driver.await;
        outcome
    }

    /// Snapshots the registry into the report and, when configured,
    /// pushes the exposition to the gateway.
    fn sample(&mut self) {
        let snapshot = self.metrics.snapshot();
        // A flush between phases resets the counter below the watermark;
        // saturating keeps the delta at zero across that boundary.
        let error_delta = snapshot.request_errors.saturating_sub(self.sampled_errors);
        self.sampled_errors = snapshot.request_errors;
        tracing::debug!(
            qps = self.limiter.rate(),
            workers = self.client.amount(),
            backlog = self.client.overflow(),
            requests = snapshot.request_sum,
            errors = snapshot.request_errors,
            error_delta,
            timeouts = snapshot.request_timeouts,
            multiplier = self.multiplier,
            "sample"
        );
        self.report.append(&snapshot, self.limiter.rate());

        if let Some(gateway) = &self.config.gateway {
            let gateway = gateway.clone();
            let body = self.metrics.render_prometheus();
            tokio::spawn(async move {
                if let Err(err) = pushgateway::push(&gateway, body).await {
                    tracing::warn!(error = %err, "metrics push failed");
                }
            });
        }
    }
}
