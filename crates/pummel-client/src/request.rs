//! The immutable request template and the resolved target address.

use http::{HeaderName, HeaderValue, Method, Uri};

use crate::error::TargetError;

/// `(host, port, is_tls)` resolved from the request URI.
///
/// Immutable once built; the port defaults to 80/443 by scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub is_tls: bool,
}

impl Target {
    /// Resolves the target from a URI. The host must be non-empty and the
    /// scheme, when present, must be `http` or `https`.
    pub fn from_uri(uri: &Uri) -> Result<Self, TargetError> {
        let is_tls = match uri.scheme_str() {
            None | Some("http") => false,
            Some("https") => true,
            Some(other) => return Err(TargetError::UnsupportedScheme(other.to_string())),
        };
        let host = uri.host().unwrap_or_default();
        if host.is_empty() {
            return Err(TargetError::EmptyHost);
        }
        let port = uri
            .port_u16()
            .unwrap_or(if is_tls { 443 } else { 80 });
        Ok(Self {
            host: host.to_string(),
            port,
            is_tls,
        })
    }

    pub fn new(host: impl Into<String>, port: u16, is_tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            is_tls,
        }
    }

    /// The `host:port` dial address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The `Host` header value: the bare host on the scheme-default port,
    /// `host:port` otherwise.
    pub fn host_header(&self) -> String {
        let default = if self.is_tls { 443 } else { 80 };
        if self.port == default {
            self.host.clone()
        } else {
            self.addr()
        }
    }
}

/// The request every worker issues, encoded to wire bytes exactly once.
///
/// Workers share the template; each owns only its response buffer.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    method: Method,
    wire: Vec<u8>,
}

impl RequestTemplate {
    pub fn builder() -> TemplateBuilder {
        TemplateBuilder::new()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The pre-encoded HTTP/1.1 request: request line, headers, body.
    pub fn wire(&self) -> &[u8] {
        &self.wire
    }
}

/// Builder assembling the template from CLI-shaped inputs.
///
/// Header order on the wire is Content-Type, custom headers in input
/// order, Accept, Accept-Encoding, Connection, Content-Length.
#[derive(Debug)]
pub struct TemplateBuilder {
    method: Method,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Vec<u8>,
    content_type: String,
    accept: Option<HeaderValue>,
    keep_alive: bool,
    compression: bool,
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: Vec::new(),
            content_type: "text/html".to_string(),
            accept: None,
            keep_alive: true,
            compression: true,
        }
    }

    /// HTTP method. Default: GET.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Appends a custom header. Ordering is preserved.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    /// Request body bytes.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Content-Type header. Default: `text/html`.
    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = value.into();
        self
    }

    /// Optional Accept header.
    pub fn accept(mut self, value: HeaderValue) -> Self {
        self.accept = Some(value);
        self
    }

    /// Whether to request a keep-alive connection. Default: true. When
    /// false the template carries `Connection: close` and workers redial
    /// per request.
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Whether to advertise `Accept-Encoding: gzip`. Default: true.
    pub fn compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Encodes the wire bytes for `uri` against the already-resolved
    /// `target` (the target supplies the Host header).
    pub fn build(self, uri: &Uri, target: &Target) -> RequestTemplate {
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let mut wire = Vec::with_capacity(256 + self.body.len());
        wire.extend_from_slice(self.method.as_str().as_bytes());
        wire.extend_from_slice(b" ");
        wire.extend_from_slice(path.as_bytes());
        wire.extend_from_slice(b" HTTP/1.1\r\n");

        push_header(&mut wire, "Host", target.host_header().as_bytes());
        push_header(&mut wire, "Content-Type", self.content_type.as_bytes());
        for (name, value) in &self.headers {
            push_header(&mut wire, name.as_str(), value.as_bytes());
        }
        if let Some(accept) = &self.accept {
            push_header(&mut wire, "Accept", accept.as_bytes());
        }
        if self.compression {
            push_header(&mut wire, "Accept-Encoding", b"gzip");
        }
        if self.keep_alive {
            push_header(&mut wire, "Connection", b"keep-alive");
        } else {
            push_header(&mut wire, "Connection", b"close");
        }
        if !self.body.is_empty() {
            push_header(&mut wire, "Content-Length", self.body.len().to_string().as_bytes());
        }
        wire.extend_from_slice(b"\r\n");
        wire.extend_from_slice(&self.body);

        RequestTemplate {
            method: self.method,
            wire,
        }
    }
}

impl Default for TemplateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn push_header(wire: &mut Vec<u8>, name: &str, value: &[u8]) {
    wire.extend_from_slice(name.as_bytes());
    wire.extend_from_slice(b": ");
    wire.extend_from_slice(value);
    wire.extend_from_slice(b"\r\n");
}
