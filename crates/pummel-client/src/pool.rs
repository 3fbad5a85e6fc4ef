//! The worker pool: a job queue and the workers that serve it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use http::Method;
use pummel_metrics::Registry;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{rustls, TlsConnector};

use crate::conn::{ConnStream, HttpConnection, ResponseSummary};
use crate::dial::{dial, DialConfig};
use crate::error::ClientError;
use crate::request::{RequestTemplate, Target};

/// Capacity of the job queue. A full queue exerts backpressure on the load
/// driver, which is the signal the controller reads via
/// [`Client::overflow`].
pub const JOB_CAPACITY: usize = 10_000;

/// Client-wide settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request deadline; also used as the dial timeout.
    pub timeout: Duration,
    /// The one status code counted as `request_success`. Compared with
    /// strict equality; a 201 is not a success unless configured so.
    pub success_status: u16,
    /// When false, every request rides its own connection.
    pub keep_alive: bool,
    /// Connections idle longer than this are retired before reuse.
    pub max_idle_conn_duration: Duration,
    pub dial: DialConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            success_status: 200,
            keep_alive: true,
            max_idle_conn_duration: Duration::from_secs(1),
            dial: DialConfig::default(),
        }
    }
}

struct PoolState {
    /// `None` only transiently during a flush.
    jobs_tx: Option<flume::Sender<()>>,
    jobs_rx: flume::Receiver<()>,
    workers: usize,
    tasks: Vec<JoinHandle<()>>,
}

struct Shared {
    template: RequestTemplate,
    target: Target,
    config: ClientConfig,
    metrics: Arc<Registry>,
    tls: Option<TlsConnector>,
    state: Mutex<PoolState>,
}

/// The worker pool. Cheap to clone; all clones share one pool.
///
/// Workers consume unit jobs from a bounded queue and perform one request
/// round trip per job on a connection they own. The pool's lock guards the
/// worker count and the queue handles; request traffic itself never takes
/// it.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    pub fn new(
        template: RequestTemplate,
        target: Target,
        mut config: ClientConfig,
        metrics: Arc<Registry>,
    ) -> Self {
        config.dial.timeout = config.timeout;
        let tls = target.is_tls.then(|| {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            TlsConnector::from(Arc::new(tls_config))
        });
        let (jobs_tx, jobs_rx) = flume::bounded(JOB_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                template,
                target,
                config,
                metrics,
                tls,
                state: Mutex::new(PoolState {
                    jobs_tx: Some(jobs_tx),
                    jobs_rx,
                    workers: 0,
                    tasks: Vec::new(),
                }),
            }),
        }
    }

    /// Spawns `n` more workers (clamped to at least 1), each holding its
    /// own keep-alive connection once it serves its first job.
    pub fn run_workers(&self, n: usize) {
        let n = n.max(1);
        let mut state = self.shared.state.lock().unwrap();
        for _ in 0..n {
            let jobs = state.jobs_rx.clone();
            let shared = Arc::clone(&self.shared);
            state.tasks.push(tokio::spawn(run_worker(shared, jobs)));
        }
        state.workers += n;
        tracing::debug!(added = n, total = state.workers, "workers started");
    }

    /// Number of live workers. Zero again after [`flush`](Client::flush).
    pub fn amount(&self) -> usize {
        self.shared.state.lock().unwrap().workers
    }

    /// Current job-queue depth. A non-zero depth means admission outpaces
    /// consumption.
    pub fn overflow(&self) -> usize {
        self.shared.state.lock().unwrap().jobs_rx.len()
    }

    /// A producer handle for the job queue. The load driver holds exactly
    /// one and must drop it before [`flush`](Client::flush) so the queue
    /// can disconnect.
    pub fn job_sender(&self) -> Option<flume::Sender<()>> {
        self.shared.state.lock().unwrap().jobs_tx.clone()
    }

    /// Shuts the pool down and resets it: drains the queue, disconnects
    /// it, joins every worker, flushes all metrics, and installs a fresh
    /// queue with the worker count back at zero.
    ///
    /// This is the only sanctioned way to move between load phases; it
    /// guarantees no counter update from the old phase lands after the
    /// reset.
    pub async fn flush(&self) {
        let tasks = {
            let mut state = self.shared.state.lock().unwrap();
            for _ in state.jobs_rx.drain() {}
            state.jobs_tx = None;
            std::mem::take(&mut state.tasks)
        };
        for joined in futures::future::join_all(tasks).await {
            if let Err(err) = joined {
                tracing::warn!(error = %err, "worker task aborted abnormally");
            }
        }
        self.shared.metrics.flush();

        let mut state = self.shared.state.lock().unwrap();
        let (jobs_tx, jobs_rx) = flume::bounded(JOB_CAPACITY);
        state.jobs_tx = Some(jobs_tx);
        state.jobs_rx = jobs_rx;
        state.workers = 0;
        tracing::debug!("worker pool flushed");
    }

    pub fn metrics(&self) -> &Arc<Registry> {
        &self.shared.metrics
    }

    pub fn target(&self) -> &Target {
        &self.shared.target
    }
}

async fn run_worker(shared: Arc<Shared>, jobs: flume::Receiver<()>) {
    // Each worker owns a copy of the wire bytes and, lazily, one
    // connection with its response buffer.
    let wire = shared.template.wire().to_vec();
    let mut conn: Option<HttpConnection> = None;
    while jobs.recv_async().await.is_ok() {
        if let Some(existing) = &conn {
            if existing.idle_for() > shared.config.max_idle_conn_duration {
                conn = None;
            }
        }
        let started = Instant::now();
        let outcome = shared.perform(&mut conn, &wire).await;
        shared.observe(started.elapsed(), outcome);
    }
    // Dropping the connection here closes it and releases its
    // open-connection slot.
}

impl Shared {
    async fn connect(&self) -> Result<HttpConnection, ClientError> {
        let counted = dial(&self.target, &self.config.dial, &self.metrics).await?;
        let stream = match &self.tls {
            Some(connector) => {
                let name = ServerName::try_from(self.target.host.clone())
                    .map_err(|_| ClientError::ServerName(self.target.host.clone()))?;
                ConnStream::Tls(Box::new(connector.connect(name, counted).await?))
            }
            None => ConnStream::Plain(counted),
        };
        Ok(HttpConnection::new(
            stream,
            self.template.method() == &Method::HEAD,
        ))
    }

    /// One attempt under the request deadline: dial if needed, then a full
    /// round trip. Any failure retires the connection.
    async fn perform(
        &self,
        conn: &mut Option<HttpConnection>,
        wire: &[u8],
    ) -> Result<ResponseSummary, ClientError> {
        let attempt = async {
            let connection = match conn.as_mut() {
                Some(connection) => connection,
                None => {
                    let fresh = self.connect().await?;
                    conn.insert(fresh)
                }
            };
            connection.round_trip(wire).await
        };

        match tokio::time::timeout(self.config.timeout, attempt).await {
            Ok(Ok(summary)) => {
                if summary.close || !self.config.keep_alive {
                    *conn = None;
                }
                Ok(summary)
            }
            Ok(Err(err)) => {
                *conn = None;
                Err(err)
            }
            Err(_) => {
                *conn = None;
                Err(ClientError::Timeout)
            }
        }
    }

    fn observe(&self, elapsed: Duration, outcome: Result<ResponseSummary, ClientError>) {
        match outcome {
            Ok(summary) => {
                if summary.status == self.config.success_status {
                    self.metrics.request_success.inc();
                }
                self.metrics
                    .status_codes
                    .with(&summary.status.to_string())
                    .inc();
            }
            Err(err) => {
                if err.is_timeout() {
                    self.metrics.request_timeouts.inc();
                }
                self.metrics.request_errors.inc();
                self.metrics.error_messages.with(&err.to_string()).inc();
                tracing::trace!(error = %err, "request failed");
            }
        }
        self.metrics.request_duration.observe(elapsed);
        self.metrics.request_sum.inc();
    }
}
