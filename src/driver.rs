//! The load driver: turns tokens into queued jobs.

use pummel_client::Client;
use pummel_limiter::TokenStream;
use tokio_util::sync::CancellationToken;

/// Enqueues jobs as fast as the queue accepts them. Used during the burst
/// phase, where the slowest component is meant to self-limit.
///
/// On cancellation the driver drops its queue handle and flushes the pool,
/// which is what lets the workers drain out and the metrics reset.
pub async fn drive_unpaced(client: Client, cancel: CancellationToken) {
    let Some(jobs) = client.job_sender() else {
        return;
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = jobs.send_async(()) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    drop(jobs);
    client.flush().await;
}

/// Enqueues one job per limiter token.
pub async fn drive_paced(client: Client, tokens: TokenStream, cancel: CancellationToken) {
    let Some(jobs) = client.job_sender() else {
        return;
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            token = tokens.recv_async() => {
                if token.is_err() || jobs.send_async(()).await.is_err() {
                    break;
                }
            }
        }
    }
    drop(jobs);
    drop(tokens);
    client.flush().await;
}
