//! Outcome classification against a live fixture server.

use std::sync::Arc;
use std::time::Duration;

use http::Uri;
use pummel_client::{Client, ClientConfig, RequestTemplate, Target};
use pummel_metrics::Registry;

use crate::support::{FixtureServer, ServerOptions};

fn client_for(url: &str, config: ClientConfig) -> Client {
    let uri: Uri = url.parse().unwrap();
    let target = Target::from_uri(&uri).unwrap();
    let template = RequestTemplate::builder().build(&uri, &target);
    Client::new(template, target, config, Arc::new(Registry::new()))
}

/// Runs `jobs` jobs through `workers` workers and waits for every attempt
/// to be recorded.
async fn run_jobs(client: &Client, workers: usize, jobs: u64) {
    client.run_workers(workers);
    let sender = client.job_sender().unwrap();
    for _ in 0..jobs {
        sender.send_async(()).await.unwrap();
    }
    drop(sender);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while client.metrics().request_sum.get() < jobs {
        assert!(
            tokio::time::Instant::now() < deadline,
            "attempts were not all recorded in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn success_status_counts_as_success() {
    let server = FixtureServer::start(ServerOptions::default()).await;
    let client = client_for(&server.url(), ClientConfig::default());
    run_jobs(&client, 2, 20).await;

    let metrics = client.metrics();
    assert_eq!(metrics.request_sum.get(), 20);
    assert_eq!(metrics.request_success.get(), 20);
    assert_eq!(metrics.request_errors.get(), 0);
    assert_eq!(
        metrics.status_codes.snapshot(),
        vec![("200".to_string(), 20)]
    );
    assert!(metrics.bytes_written.get() > 0);
    assert!(metrics.bytes_read.get() > 0);
    client.flush().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn non_success_status_is_not_an_error() {
    let server = FixtureServer::start(ServerOptions {
        status: 404,
        ..ServerOptions::default()
    })
    .await;
    let client = client_for(&server.url(), ClientConfig::default());
    run_jobs(&client, 2, 10).await;

    let metrics = client.metrics();
    assert_eq!(metrics.request_sum.get(), 10);
    assert_eq!(metrics.request_success.get(), 0);
    // A 404 is tallied, not counted as a transport error.
    assert_eq!(metrics.request_errors.get(), 0);
    assert_eq!(
        metrics.status_codes.snapshot(),
        vec![("404".to_string(), 10)]
    );
    client.flush().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_connections_count_as_errors() {
    // Every request gets its connection dropped without a response.
    let server = FixtureServer::start(ServerOptions {
        reset_every: 1,
        ..ServerOptions::default()
    })
    .await;
    let client = client_for(&server.url(), ClientConfig::default());
    run_jobs(&client, 2, 10).await;

    let metrics = client.metrics();
    assert_eq!(metrics.request_sum.get(), 10);
    assert_eq!(metrics.request_errors.get(), 10);
    assert_eq!(metrics.request_success.get(), 0);
    // No response head was observed, so no status label exists.
    assert!(metrics.status_codes.snapshot().is_empty());
    // The failure is labeled by message.
    let labeled: u64 = metrics
        .error_messages
        .snapshot()
        .iter()
        .map(|(_, count)| count)
        .sum();
    assert_eq!(labeled, 10);
    client.flush().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_responses_time_out() {
    let server = FixtureServer::start(ServerOptions {
        delay: Duration::from_secs(2),
        ..ServerOptions::default()
    })
    .await;
    let client = client_for(
        &server.url(),
        ClientConfig {
            timeout: Duration::from_millis(200),
            ..ClientConfig::default()
        },
    );
    run_jobs(&client, 2, 4).await;

    let metrics = client.metrics();
    assert_eq!(metrics.request_timeouts.get(), 4);
    // Timeouts are also errors.
    assert_eq!(metrics.request_errors.get(), 4);
    assert_eq!(metrics.request_success.get(), 0);
    client.flush().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn request_sum_never_trails_success() {
    let server = FixtureServer::start(ServerOptions::default()).await;
    let client = client_for(&server.url(), ClientConfig::default());
    run_jobs(&client, 4, 50).await;

    let metrics = client.metrics();
    assert!(metrics.request_sum.get() >= metrics.request_success.get());
    client.flush().await;
}
