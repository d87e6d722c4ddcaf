use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use stampede::core::{DEFAULT_CONCURRENT_USERS, DEFAULT_OPERATIONS_PER_USER};
use stampede::prelude::*;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Launch concurrent virtual users against a target and report how it held up.
#[derive(Parser, Debug)]
#[command(name = "stampede", version)]
struct Cli {
    /// Target URL every operation navigates to.
    target: String,

    /// Number of concurrent virtual users.
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENT_USERS)]
    users: usize,

    /// Operations issued by each user.
    #[arg(short('n'), long, default_value_t = DEFAULT_OPERATIONS_PER_USER)]
    operations: usize,

    /// Pause between two operations of one user.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10ms")]
    delay: Duration,

    /// Per-operation timeout.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    timeout: Duration,

    /// How long a user waits for a session before giving up.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    acquire_timeout: Duration,

    /// Upper bound on simultaneously open sessions.
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Stop a user after this many failures in a row.
    #[arg(long)]
    max_consecutive_failures: Option<NonZeroUsize>,

    /// Cancel the whole run after this long.
    #[arg(long, value_parser = humantime::parse_duration)]
    deadline: Option<Duration>,

    /// Log running totals at this interval while the run is in progress.
    #[arg(long, value_parser = humantime::parse_duration)]
    progress: Option<Duration>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Expose Prometheus metrics on this address while running.
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
}

impl Cli {
    fn config(&self) -> RunConfig {
        let mut config = RunConfig::new(&self.target);
        config.concurrent_users = self.users;
        config.operations_per_user = self.operations;
        config.inter_operation_delay = self.delay;
        config.operation_timeout = self.timeout;
        config.session_acquisition_timeout = self.acquire_timeout;
        config.max_consecutive_failures = self.max_consecutive_failures;
        config.deadline = self.deadline;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stampede=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!("Serving metrics on {addr}");
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; stopping users");
                cancel.cancel();
            }
        });
    }

    let provider = match cli.max_sessions {
        Some(max) => HttpSessionProvider::new(max),
        None => HttpSessionProvider::unbounded(),
    };

    let test = LoadTest::from_config(cli.config(), provider).cancel_on(cancel);
    if let Some(every) = cli.progress.filter(|every| !every.is_zero()) {
        tokio::spawn(log_progress(test.status(), every));
    }
    let report = test.await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }

    Ok(())
}

async fn log_progress(status: watch::Receiver<RunStatus>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // The sender is dropped once the run is over.
    while status.has_changed().is_ok() {
        ticker.tick().await;
        let current = status.borrow().clone();
        if !current.running {
            continue;
        }
        let progress = current.progress;
        info!(
            "{} attempted, {} succeeded, {} failed, {} timed out, mean latency {:?}",
            progress.attempted,
            progress.succeeded,
            progress.failed,
            progress.timed_out,
            progress.mean_latency,
        );
        if let Some(last_error) = progress.last_error {
            info!("Last error: {last_error}");
        }
    }
}
