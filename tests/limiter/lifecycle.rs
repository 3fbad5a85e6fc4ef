//! Stop and rate-change lifecycle invariants.

use std::time::Duration;

use pummel_limiter::Limiter;

#[tokio::test(flavor = "multi_thread")]
async fn stop_leaves_an_empty_ring() {
    let limiter = Limiter::new();
    limiter.set_limit(1_000.0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    limiter.stop();
    assert_eq!(limiter.backlog(), 0);
    assert_eq!(limiter.rate(), 0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_change_discards_queued_tokens() {
    let limiter = Limiter::new();
    limiter.set_limit(1_000.0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    limiter.set_limit(1.0);
    // A tick period after the change, nothing from the old regime may
    // remain; at 1 QPS the new regime contributes at most one token.
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(limiter.backlog() <= 1, "backlog: {}", limiter.backlog());
    limiter.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_set_limit_is_idempotent() {
    let limiter = Limiter::new();
    limiter.set_limit(250.0);
    limiter.set_limit(250.0);
    assert_eq!(limiter.rate(), 250.0);
    assert_eq!(limiter.backlog(), 0);
    limiter.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn sub_unit_rates_clamp_to_one() {
    let limiter = Limiter::new();
    limiter.set_limit(0.25);
    assert_eq!(limiter.rate(), 1.0);
    limiter.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn a_stopped_limiter_stays_stopped() {
    let limiter = Limiter::new();
    limiter.set_limit(100.0);
    limiter.stop();
    limiter.set_limit(100.0);
    assert_eq!(limiter.rate(), 0.0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(limiter.backlog(), 0);
}
