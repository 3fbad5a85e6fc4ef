//! TCP dialing with socket tuning and byte-level instrumentation.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project_lite::pin_project;
use pummel_metrics::Registry;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::error::ClientError;
use crate::request::Target;

/// Socket-level dial settings.
#[derive(Debug, Clone)]
pub struct DialConfig {
    /// Connect deadline. Set equal to the per-request timeout.
    pub timeout: Duration,
    /// Kernel receive buffer size; 0 leaves the default.
    pub read_buffer_size: usize,
    /// Kernel send buffer size; 0 leaves the default.
    pub write_buffer_size: usize,
    /// TCP keepalive probe period; 0 disables keepalive.
    pub keepalive_period: Duration,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            read_buffer_size: 8 * 1024,
            write_buffer_size: 8 * 1024,
            keepalive_period: Duration::from_secs(5),
        }
    }
}

/// Opens a tuned TCP connection to the target and wraps it so that every
/// read and write is accounted into the registry.
///
/// Tuning failures close the socket and count into `conn_errors`; a
/// successful dial increments `conn_open`, and dropping the returned
/// stream decrements it exactly once.
pub(crate) async fn dial(
    target: &Target,
    config: &DialConfig,
    metrics: &Arc<Registry>,
) -> Result<CountedStream, ClientError> {
    let addr = target.addr();
    let stream = tokio::time::timeout(config.timeout, TcpStream::connect(addr.as_str()))
        .await
        .map_err(|_| ClientError::DialTimeout)??;

    if let Err(err) = tune(&stream, config) {
        metrics.conn_errors.inc();
        tracing::debug!(addr = %addr, error = %err, "socket tuning failed");
        return Err(err.into());
    }

    metrics.conn_open.inc();
    Ok(CountedStream::new(stream, Arc::clone(metrics)))
}

fn tune(stream: &TcpStream, config: &DialConfig) -> io::Result<()> {
    let sock = SockRef::from(stream);
    if config.read_buffer_size > 0 {
        sock.set_recv_buffer_size(config.read_buffer_size)?;
    }
    if config.write_buffer_size > 0 {
        sock.set_send_buffer_size(config.write_buffer_size)?;
    }
    if !config.keepalive_period.is_zero() {
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_period)
            .with_interval(config.keepalive_period);
        sock.set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}

/// Decrements `conn_open` when the connection goes away, however the
/// stream is dropped.
#[derive(Debug)]
struct OpenGuard {
    metrics: Arc<Registry>,
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.metrics.conn_open.dec();
    }
}

pin_project! {
    /// A TCP stream that accounts bytes and transport errors.
    ///
    /// Successful reads and writes accumulate into `bytes_read` /
    /// `bytes_written`; failures increment `request_read_errors` /
    /// `request_write_errors`. End-of-stream is a normal read of zero
    /// bytes, not an error.
    #[derive(Debug)]
    pub struct CountedStream {
        #[pin]
        inner: TcpStream,
        metrics: Arc<Registry>,
        guard: OpenGuard,
    }
}

impl CountedStream {
    fn new(inner: TcpStream, metrics: Arc<Registry>) -> Self {
        let guard = OpenGuard {
            metrics: Arc::clone(&metrics),
        };
        Self {
            inner,
            metrics,
            guard,
        }
    }
}

impl AsyncRead for CountedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        match this.inner.poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                this.metrics
                    .bytes_read
                    .add((buf.filled().len() - before) as u64);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => {
                this.metrics.read_errors.inc();
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for CountedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        match this.inner.poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.metrics.bytes_written.add(n as u64);
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(err)) => {
                this.metrics.write_errors.inc();
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
