//! One persistent HTTP/1.1 connection and its response parsing.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_rustls::client::TlsStream;

use crate::dial::CountedStream;
use crate::error::ClientError;

const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 8 * 1024;

/// Plain or TLS transport under a connection. Both variants are `Unpin`,
/// so the delegation below needs no projection.
pub(crate) enum ConnStream {
    Plain(CountedStream),
    Tls(Box<TlsStream<CountedStream>>),
}

impl AsyncRead for ConnStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            ConnStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ConnStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            ConnStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ConnStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            ConnStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ConnStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            ConnStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ConnStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// What a round trip observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseSummary {
    pub status: u16,
    pub content_length: u64,
    /// The connection must not be reused (peer asked to close, HTTP/1.0
    /// without keep-alive, or close-delimited body).
    pub close: bool,
}

enum Head {
    Partial,
    Complete {
        head_len: usize,
        status: u16,
        content_length: Option<u64>,
        chunked: bool,
        close: bool,
    },
}

/// A keep-alive connection with a reusable response buffer.
pub(crate) struct HttpConnection {
    stream: ConnStream,
    /// Response accumulation buffer, owned by the worker holding this
    /// connection. Cleared per response, capacity retained.
    rbuf: Vec<u8>,
    last_used: Instant,
    head_only: bool,
}

impl HttpConnection {
    pub(crate) fn new(stream: ConnStream, head_only: bool) -> Self {
        Self {
            stream,
            rbuf: Vec::with_capacity(READ_CHUNK),
            last_used: Instant::now(),
            head_only,
        }
    }

    /// How long the connection has been sitting unused.
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Writes the pre-encoded request and reads one full response.
    pub(crate) async fn round_trip(&mut self, wire: &[u8]) -> Result<ResponseSummary, ClientError> {
        self.stream.write_all(wire).await?;
        self.stream.flush().await?;
        let summary = self.read_response().await?;
        self.last_used = Instant::now();
        Ok(summary)
    }

    /// Reads one more chunk from the transport into the buffer. Returns
    /// the number of bytes read; zero means end of stream.
    async fn fill(&mut self) -> Result<usize, ClientError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.stream.read(&mut chunk).await?;
        if n > 0 {
            self.rbuf.extend_from_slice(&chunk[..n]);
        }
        Ok(n)
    }

    async fn read_response(&mut self) -> Result<ResponseSummary, ClientError> {
        self.rbuf.clear();

        // Response head.
        let (head_len, status, content_length, chunked, mut close) = loop {
            match self.parse_head()? {
                Head::Complete {
                    head_len,
                    status,
                    content_length,
                    chunked,
                    close,
                } => break (head_len, status, content_length, chunked, close),
                Head::Partial => {
                    if self.fill().await? == 0 {
                        return Err(ClientError::ConnectionClosed);
                    }
                }
            }
        };
        self.rbuf.drain(..head_len);

        // Body.
        let content_length = if self.head_only || !status_has_body(status) {
            0
        } else if chunked {
            self.read_chunked_body().await?
        } else if let Some(length) = content_length {
            while (self.rbuf.len() as u64) < length {
                if self.fill().await? == 0 {
                    return Err(ClientError::ConnectionClosed);
                }
            }
            length
        } else {
            // Neither length nor chunking: the body runs to end of stream
            // and the connection cannot be reused.
            while self.fill().await? > 0 {}
            close = true;
            self.rbuf.len() as u64
        };

        Ok(ResponseSummary {
            status,
            content_length,
            close,
        })
    }

    fn parse_head(&self) -> Result<Head, ClientError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);
        let parsed = response
            .parse(&self.rbuf)
            .map_err(|err| ClientError::Protocol(err.to_string()))?;

        let head_len = match parsed {
            httparse::Status::Complete(n) => n,
            httparse::Status::Partial => return Ok(Head::Partial),
        };

        let status = response
            .code
            .ok_or_else(|| ClientError::Protocol("missing status code".to_string()))?;
        // HTTP/1.0 closes by default; HTTP/1.1 keeps alive by default.
        let mut close = response.version == Some(0);
        let mut content_length = None;
        let mut chunked = false;
        for header in response.headers.iter() {
            if header.name.eq_ignore_ascii_case("content-length") {
                let text = std::str::from_utf8(header.value)
                    .map_err(|_| ClientError::Protocol("invalid content-length".to_string()))?;
                let length = text
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ClientError::Protocol("invalid content-length".to_string()))?;
                content_length = Some(length);
            } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
                if contains_token(header.value, "chunked") {
                    chunked = true;
                }
            } else if header.name.eq_ignore_ascii_case("connection") {
                if contains_token(header.value, "close") {
                    close = true;
                } else if contains_token(header.value, "keep-alive") {
                    close = false;
                }
            }
        }

        Ok(Head::Complete {
            head_len,
            status,
            content_length,
            chunked,
            close,
        })
    }

    /// Consumes a chunked body starting at the front of `rbuf`. Returns
    /// the decoded body length.
    async fn read_chunked_body(&mut self) -> Result<u64, ClientError> {
        let mut pos = 0usize;
        let mut body_len = 0u64;
        loop {
            match httparse::parse_chunk_size(&self.rbuf[pos..]) {
                Ok(httparse::Status::Complete((consumed, size))) => {
                    if size == 0 {
                        // Final chunk: expect the terminating CRLF (any
                        // trailers are not supported by this client).
                        let end = pos + consumed + 2;
                        while self.rbuf.len() < end {
                            if self.fill().await? == 0 {
                                return Err(ClientError::ConnectionClosed);
                            }
                        }
                        return Ok(body_len);
                    }
                    // Chunk data plus its trailing CRLF.
                    let end = pos + consumed + size as usize + 2;
                    while self.rbuf.len() < end {
                        if self.fill().await? == 0 {
                            return Err(ClientError::ConnectionClosed);
                        }
                    }
                    body_len += size;
                    pos = end;
                }
                Ok(httparse::Status::Partial) => {
                    if self.fill().await? == 0 {
                        return Err(ClientError::ConnectionClosed);
                    }
                }
                Err(_) => {
                    return Err(ClientError::Protocol("invalid chunk size".to_string()));
                }
            }
        }
    }
}

fn status_has_body(status: u16) -> bool {
    !(status < 200 || status == 204 || status == 304)
}

fn contains_token(value: &[u8], token: &str) -> bool {
    std::str::from_utf8(value)
        .map(|v| {
            v.split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
        .unwrap_or(false)
}
