//! Flush and worker-accounting invariants.

use std::sync::Arc;
use std::time::Duration;

use http::Uri;
use pummel_client::{Client, ClientConfig, RequestTemplate, Target};
use pummel_metrics::Registry;

use crate::support::{FixtureServer, ServerOptions};

fn client_for(url: &str) -> Client {
    let uri: Uri = url.parse().unwrap();
    let target = Target::from_uri(&uri).unwrap();
    let template = RequestTemplate::builder().build(&uri, &target);
    Client::new(
        template,
        target,
        ClientConfig::default(),
        Arc::new(Registry::new()),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn flush_resets_workers_metrics_and_queue() {
    let server = FixtureServer::start(ServerOptions::default()).await;
    let client = client_for(&server.url());

    client.run_workers(4);
    let sender = client.job_sender().unwrap();
    for _ in 0..20 {
        sender.send_async(()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(sender);
    client.flush().await;

    assert_eq!(client.amount(), 0);
    assert_eq!(client.overflow(), 0);
    let metrics = client.metrics();
    assert_eq!(metrics.request_sum.get(), 0);
    assert_eq!(metrics.request_success.get(), 0);
    assert_eq!(metrics.bytes_written.get(), 0);
    // All worker connections have been joined and closed.
    assert_eq!(metrics.conn_open.get(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn flush_bumps_the_metrics_generation() {
    let server = FixtureServer::start(ServerOptions::default()).await;
    let client = client_for(&server.url());
    let generation = client.metrics().generation();
    client.flush().await;
    assert_eq!(client.metrics().generation(), generation + 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn pool_is_reusable_after_flush() {
    let server = FixtureServer::start(ServerOptions::default()).await;
    let client = client_for(&server.url());

    client.run_workers(2);
    let sender = client.job_sender().unwrap();
    for _ in 0..5 {
        sender.send_async(()).await.unwrap();
    }
    drop(sender);
    client.flush().await;

    // The fresh queue feeds fresh workers.
    client.run_workers(2);
    let sender = client.job_sender().unwrap();
    for _ in 0..5 {
        sender.send_async(()).await.unwrap();
    }
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while client.metrics().request_sum.get() < 5 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(client.amount(), 2);
    drop(sender);
    client.flush().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn run_workers_clamps_to_at_least_one() {
    let server = FixtureServer::start(ServerOptions::default()).await;
    let client = client_for(&server.url());
    client.run_workers(0);
    assert_eq!(client.amount(), 1);
    client.flush().await;
    assert_eq!(client.amount(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn keep_alive_off_redials_per_request() {
    let server = FixtureServer::start(ServerOptions::default()).await;
    let uri: Uri = server.url().parse().unwrap();
    let target = Target::from_uri(&uri).unwrap();
    let template = RequestTemplate::builder()
        .keep_alive(false)
        .build(&uri, &target);
    let client = Client::new(
        template,
        target,
        ClientConfig {
            keep_alive: false,
            ..ClientConfig::default()
        },
        Arc::new(Registry::new()),
    );

    client.run_workers(1);
    let sender = client.job_sender().unwrap();
    for _ in 0..5 {
        sender.send_async(()).await.unwrap();
    }
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while client.metrics().request_sum.get() < 5 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // One worker, five requests, no reuse: the open-connection gauge kept
    // returning to zero, which only happens when each request dialed anew.
    assert_eq!(client.metrics().request_success.get(), 5);
    drop(sender);
    client.flush().await;
    assert_eq!(client.metrics().conn_open.get(), 0);
}
