//! Instrumented HTTP/1.1 client and worker pool.
//!
//! The client is built for sustained load generation rather than general
//! HTTP use: one immutable request template is encoded to wire bytes once,
//! and a dynamic pool of workers replays it over persistent connections,
//! one connection per worker. Every socket is wrapped so that bytes and
//! transport errors land in the shared metrics registry, which is what
//! lets the adaptive controller watch the target degrade in real time.
//!
//! Out of scope by design: redirect following, request pipelining, and
//! certificate-policy configuration.

pub mod conn;
pub mod dial;
pub mod error;
pub mod pool;
pub mod request;

pub use conn::ResponseSummary;
pub use dial::DialConfig;
pub use error::{ClientError, TargetError};
pub use pool::{Client, ClientConfig, JOB_CAPACITY};
pub use request::{RequestTemplate, Target, TemplateBuilder};
