//! Optional metrics push to a Prometheus push gateway.
//!
//! The push rides its own short-lived plain connection so gateway traffic
//! never leaks into the run's byte and connection counters.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and as whom to push.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// `host:port` of the gateway.
    pub addr: String,
    /// Job name, becomes the `/metrics/job/<name>` path segment.
    pub job: String,
}

/// POSTs one text exposition to the gateway.
pub async fn push(gateway: &GatewayConfig, body: String) -> Result<()> {
    tokio::time::timeout(PUSH_TIMEOUT, push_inner(gateway, body))
        .await
        .context("push timed out")?
}

async fn push_inner(gateway: &GatewayConfig, body: String) -> Result<()> {
    let mut stream = TcpStream::connect(&gateway.addr)
        .await
        .with_context(|| format!("cannot reach gateway {}", gateway.addr))?;

    let request = format!(
        "POST /metrics/job/{job} HTTP/1.1\r\nHost: {host}\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n{body}",
        job = gateway.job,
        host = gateway.addr,
        len = body.len(),
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = [0u8; 256];
    let n = stream.read(&mut response).await?;
    let head = String::from_utf8_lossy(&response[..n]);
    let status = head
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string();
    if !status.starts_with('2') {
        bail!("gateway answered status {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn gateway_fixture(status_line: &'static str) -> (GatewayConfig, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            sock.write_all(status_line.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (
            GatewayConfig {
                addr: addr.to_string(),
                job: "pummel".to_string(),
            },
            server,
        )
    }

    #[tokio::test]
    async fn push_posts_the_exposition() {
        let (gateway, server) =
            gateway_fixture("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
        push(&gateway, "request_sum 42\n".to_string()).await.unwrap();

        let seen = server.await.unwrap();
        assert!(seen.starts_with("POST /metrics/job/pummel HTTP/1.1\r\n"));
        assert!(seen.contains("request_sum 42"));
    }

    #[tokio::test]
    async fn push_surfaces_gateway_errors() {
        let (gateway, server) =
            gateway_fixture("HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n")
                .await;
        let result = push(&gateway, String::new()).await;
        assert!(result.is_err());
        let _ = server.await;
    }
}
