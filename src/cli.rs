//! Command-line surface.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use http::{HeaderName, HeaderValue, Method, Uri};
use pummel_client::{RequestTemplate, Target};

/// Shortest permitted measurement window.
const MIN_DURATION: Duration = Duration::from_secs(20);

/// Adaptive HTTP load generator.
///
/// Without `-q`, pummel bursts the target to measure its ceiling,
/// calibrates a sustainable (QPS, worker) operating point, then ramps into
/// a timed measurement window and writes an HTML report.
#[derive(Debug, Parser)]
#[command(name = "pummel", version, disable_help_flag = true)]
pub struct Args {
    /// HTTP method.
    #[arg(short = 'm', long = "method", default_value = "GET")]
    pub method: String,

    /// Custom headers, `name1:value1;name2:value2`.
    #[arg(short = 'h', long = "headers", value_name = "HEADERS")]
    pub headers: Option<String>,

    /// Request body.
    #[arg(short = 'b', long = "body")]
    pub body: Option<String>,

    /// Accept header.
    #[arg(short = 'A', long = "accept")]
    pub accept: Option<String>,

    /// Content-Type header.
    #[arg(short = 'T', long = "content-type", default_value = "text/html")]
    pub content_type: String,

    /// Report file path.
    #[arg(short = 'r', long = "report", default_value = "report.html")]
    pub report: PathBuf,

    /// Test duration (at least 20s).
    #[arg(short = 'd', long = "duration", default_value = "20s", value_parser = humantime::parse_duration)]
    pub duration: Duration,

    /// Per-request timeout.
    #[arg(short = 't', long = "timeout", default_value = "5s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// QPS target; 0 auto-calibrates. Values below 1 are treated as 1 by
    /// the rate limiter.
    #[arg(short = 'q', long = "qps", default_value_t = 0.0)]
    pub qps: f64,

    /// Initial worker count.
    #[arg(short = 'c', long = "workers", default_value_t = 500)]
    pub workers: usize,

    /// Disable HTTP keep-alive (one connection per request).
    #[arg(short = 'k', long = "disable-keepalive")]
    pub disable_keepalive: bool,

    /// Do not advertise `Accept-Encoding: gzip`.
    #[arg(long = "disable-compression")]
    pub disable_compression: bool,

    /// Verbose per-sample diagnostics.
    #[arg(long)]
    pub debug: bool,

    /// Push metrics to a Prometheus push gateway at `host:port`.
    #[arg(long = "gateway-addr", value_name = "ADDR")]
    pub gateway_addr: Option<String>,

    /// Job name for the push gateway.
    #[arg(long = "gateway-job", default_value = "pummel")]
    pub gateway_job: String,

    /// Print help.
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,

    /// Target URL.
    #[arg(value_name = "URL")]
    pub url: String,
}

impl Args {
    /// Semantic validation beyond what clap enforces.
    pub fn validate(&self) -> Result<()> {
        if self.duration < MIN_DURATION {
            bail!("-d must be at least 20s");
        }
        if self.qps < 0.0 {
            bail!("-q cannot be negative");
        }
        if self.workers == 0 {
            bail!("-c cannot be zero");
        }
        Ok(())
    }

    /// Resolves the target address and encodes the request template.
    pub fn build_request(&self) -> Result<(Target, RequestTemplate)> {
        let uri: Uri = self
            .url
            .parse()
            .with_context(|| format!("invalid target url {:?}", self.url))?;
        let target = Target::from_uri(&uri)?;

        let method = Method::from_bytes(self.method.to_uppercase().as_bytes())
            .with_context(|| format!("invalid method {:?}", self.method))?;

        let mut builder = RequestTemplate::builder()
            .method(method)
            .content_type(self.content_type.clone())
            .keep_alive(!self.disable_keepalive)
            .compression(!self.disable_compression);
        for (name, value) in parse_headers(self.headers.as_deref().unwrap_or_default())? {
            builder = builder.header(name, value);
        }
        if let Some(accept) = &self.accept {
            let value = HeaderValue::from_str(accept)
                .with_context(|| format!("invalid accept header {accept:?}"))?;
            builder = builder.accept(value);
        }
        if let Some(body) = &self.body {
            builder = builder.body(body.clone().into_bytes());
        }

        Ok((target.clone(), builder.build(&uri, &target)))
    }
}

/// Parses the `-h` flag's `name1:value1;name2:value2` syntax.
pub fn parse_headers(input: &str) -> Result<Vec<(HeaderName, HeaderValue)>> {
    let mut headers = Vec::new();
    for pair in input.split(';').filter(|pair| !pair.trim().is_empty()) {
        let (name, value) = pair
            .split_once(':')
            .ok_or_else(|| anyhow!("could not parse header {pair:?}, expected name:value"))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("invalid header name in {pair:?}"))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("invalid header value in {pair:?}"))?;
        headers.push((name, value));
    }
    Ok(headers)
}
