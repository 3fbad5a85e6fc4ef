//! A minimal HTTP/1.1 fixture server for integration tests.
//!
//! Hand-rolled on a tokio listener so the tests exercise the client's real
//! wire path without pulling in a server framework. Supports keep-alive,
//! artificial latency, a global throughput cap, and connection resets for
//! error-injection scenarios.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Status code of every response.
    pub status: u16,
    pub body: &'static str,
    /// Artificial processing latency per request.
    pub delay: Duration,
    /// Every Nth request is dropped by closing the connection without a
    /// response; 0 disables.
    pub reset_every: u64,
    /// Global responses-per-second ceiling; 0 means unlimited.
    pub max_rps: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            status: 200,
            body: "ok",
            delay: Duration::ZERO,
            reset_every: 0,
            max_rps: 0,
        }
    }
}

pub struct FixtureServer {
    addr: SocketAddr,
    requests: Arc<AtomicU64>,
    accept_task: JoinHandle<()>,
    refill_task: Option<JoinHandle<()>>,
}

impl FixtureServer {
    pub async fn start(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicU64::new(0));

        // A capped server grants response permits in 100 ms slices so the
        // ceiling is smooth rather than bursty.
        let (permits, refill_task) = if options.max_rps > 0 {
            let permits = Arc::new(Semaphore::new(0));
            let refill = Arc::clone(&permits);
            let slice = (options.max_rps / 10).max(1) as usize;
            let cap = slice * 2;
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(100));
                loop {
                    ticker.tick().await;
                    let missing = cap.saturating_sub(refill.available_permits());
                    refill.add_permits(missing.min(slice));
                }
            });
            (Some(permits), Some(task))
        } else {
            (None, None)
        };

        let counter = Arc::clone(&requests);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((sock, _)) = listener.accept().await else {
                    return;
                };
                let options = options.clone();
                let counter = Arc::clone(&counter);
                let permits = permits.clone();
                tokio::spawn(serve_connection(sock, options, counter, permits));
            }
        });

        Self {
            addr,
            requests,
            accept_task,
            refill_task,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Total requests the server has parsed, including ones it reset.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        if let Some(task) = &self.refill_task {
            task.abort();
        }
    }
}

async fn serve_connection(
    mut sock: TcpStream,
    options: ServerOptions,
    counter: Arc<AtomicU64>,
    permits: Option<Arc<Semaphore>>,
) {
    let mut buf = Vec::with_capacity(2048);
    let mut chunk = [0u8; 2048];
    loop {
        // Read one request head; the tests never send bodies.
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            match sock.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
        buf.clear();

        let seen = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if options.reset_every > 0 && seen % options.reset_every == 0 {
            return;
        }
        if let Some(permits) = &permits {
            let Ok(permit) = permits.acquire().await else {
                return;
            };
            permit.forget();
        }
        if !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }

        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n\r\n{}",
            options.status,
            reason(options.status),
            options.body.len(),
            options.body,
        );
        if sock.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}
