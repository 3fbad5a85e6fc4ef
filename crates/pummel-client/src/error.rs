//! Error types for the client.

/// Per-request transport failures.
///
/// The `Display` rendering doubles as the `errors{message}` label value, so
/// variants keep their messages short and free of per-request detail (no
/// addresses, no sequence numbers) to bound label cardinality.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request missed its deadline.
    #[error("request timed out")]
    Timeout,
    /// The TCP connect missed the dial deadline.
    #[error("dial timed out")]
    DialTimeout,
    /// A transport-level read/write/connect failure.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The target host is not a valid TLS server name.
    #[error("invalid server name: {0}")]
    ServerName(String),
    /// The peer sent something that does not parse as HTTP/1.1.
    #[error("malformed response: {0}")]
    Protocol(String),
    /// The peer closed the connection mid-response.
    #[error("connection closed by peer")]
    ConnectionClosed,
}

impl ClientError {
    /// True for the deadline miss the worker pool counts separately in
    /// `request_timeouts`.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout)
    }
}

/// Startup-fatal problems with the target address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("address cannot be empty")]
    EmptyHost,
    #[error("unsupported scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
