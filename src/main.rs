//! pummel: adaptive HTTP load generator.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pummel_client::{Client, ClientConfig};
use pummel_limiter::Limiter;
use pummel_metrics::Registry;
use pummel_report::Report;
use tracing_subscriber::EnvFilter;

use pummel::cli::Args;
use pummel::loader::{Loader, LoaderConfig, SAMPLE_PERIOD};
use pummel::pushgateway::GatewayConfig;
use pummel::summary;

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Help and version land on stdout with success; misuse is an
            // error on stderr with exit code 1.
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(args.debug);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("pummel: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let default = format!(
        "pummel={level},pummel_client={level},pummel_limiter={level},pummel_metrics={level},pummel_report={level}"
    );
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<()> {
    args.validate()?;
    let (target, template) = args.build_request()?;

    // Fail before generating any load if the report cannot be written.
    std::fs::File::create(&args.report)
        .with_context(|| format!("cannot create report file {}", args.report.display()))?;

    let metrics = Arc::new(Registry::new());
    let client = Client::new(
        template,
        target.clone(),
        ClientConfig {
            timeout: args.timeout,
            keep_alive: !args.disable_keepalive,
            ..ClientConfig::default()
        },
        Arc::clone(&metrics),
    );
    let limiter = Arc::new(Limiter::new());
    let report = Arc::new(Report::new(SAMPLE_PERIOD));

    tracing::info!(
        target = %target.addr(),
        tls = target.is_tls,
        duration = ?args.duration,
        "starting load run"
    );

    let mut loader = Loader::new(
        client,
        limiter,
        metrics,
        Arc::clone(&report),
        LoaderConfig {
            duration: args.duration,
            qps: args.qps,
            workers: args.workers,
            progress: !args.debug,
            gateway: args.gateway_addr.clone().map(|addr| GatewayConfig {
                addr,
                job: args.gateway_job.clone(),
            }),
        },
    );
    let outcome = loader.run().await;

    summary::print(&outcome);
    report
        .write_html(&args.report)
        .context("rendering the report failed")?;
    tracing::info!(path = %args.report.display(), "report written");
    Ok(())
}
