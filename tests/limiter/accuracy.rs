//! Emission accuracy over wall-clock windows.

use std::time::Duration;

use pummel_limiter::Limiter;
use serial_test::serial;

/// Installs `rate` and counts tokens for one second. The measurement
/// window is armed before the rate is installed so that it strictly
/// covers the emission window; the limiter can then never look like it
/// overdelivered because of setup latency.
async fn emitted_in_one_second(rate: f64) -> u64 {
    let limiter = Limiter::new();
    let tokens = limiter.tokens();
    let deadline = tokio::time::sleep(Duration::from_secs(1));
    tokio::pin!(deadline);
    limiter.set_limit(rate);

    let mut count = 0u64;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            token = tokens.recv_async() => {
                if token.is_err() {
                    break;
                }
                count += 1;
            }
        }
    }
    limiter.stop();
    count
}

async fn assert_rate_within_tolerance(rate: u64) {
    let emitted = emitted_in_one_second(rate as f64).await;
    assert!(
        emitted <= rate,
        "rate {rate}: overdelivered, got {emitted} tokens"
    );
    let percent = emitted as f64 / rate as f64 * 100.0;
    assert!(
        percent >= 90.0,
        "rate {rate}: underdelivered, got {emitted} tokens ({percent:.2}%)"
    );
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn low_rate_is_accurate() {
    assert_rate_within_tolerance(10).await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn mid_rate_is_accurate() {
    assert_rate_within_tolerance(1_000).await;
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn high_rate_delivers_at_least_ninety_percent() {
    let emitted = emitted_in_one_second(100_000.0).await;
    assert!(emitted >= 90_000, "got {emitted} tokens");
    assert!(emitted <= 100_000, "got {emitted} tokens");
}
