//! Run coordination
use crate::pool::UserPool;
use crate::session::SessionProvider;
use crate::sink;
use stampede_core::{ConfigError, ReportBuilder, RunConfig, RunReport, RunStatus};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

/// Errors that stop a run from starting at all.
///
/// Everything that goes wrong once users are running (unavailable sessions, failing or slow
/// targets, cancellation) ends up in the [`RunReport`] instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Run one load test to completion.
///
/// Validates `config`, launches `config.concurrent_users` virtual users against its target and
/// waits for all of them. Cancelling `cancel` (or reaching `config.deadline`) stops the users at
/// their next suspension point; the report is then marked incomplete.
pub async fn run<P: SessionProvider>(
    config: RunConfig,
    provider: P,
    cancel: CancellationToken,
) -> Result<RunReport, RunError> {
    let (status, _) = watch::channel(RunStatus::default());
    run_with_status(config, provider, cancel, status).await
}

/// [`run`], publishing a [`RunStatus`] snapshot to `status` as results come in.
///
/// `status` reads `running` from the moment users are launched until the report is built.
/// A configuration that fails validation leaves it untouched.
#[instrument(name = "run", skip_all, fields(target = %config.target_url))]
pub async fn run_with_status<P: SessionProvider>(
    config: RunConfig,
    provider: P,
    cancel: CancellationToken,
    status: watch::Sender<RunStatus>,
) -> Result<RunReport, RunError> {
    config.validate()?;
    let target = config.target()?;
    info!("Starting run with config {:?}", &config);
    status.send_replace(RunStatus {
        running: true,
        config: Some(config.clone()),
        progress: Default::default(),
    });

    let start = Instant::now();
    let config = Arc::new(config);
    let ctx = cancel.child_token();

    let deadline = config.deadline.map(|deadline| {
        let ctx = ctx.clone();
        tokio::spawn(
            async move {
                sleep(deadline).await;
                info!(
                    "Deadline of {} reached",
                    humantime::format_duration(deadline)
                );
                ctx.cancel();
            }
            .in_current_span(),
        )
    });

    let (sink, stream) = sink::channel();
    let pool = UserPool::start(config.clone(), target, Arc::new(provider), sink);

    let (completion, builder) = tokio::join!(
        pool.await_completion(&ctx),
        stream.fold_with_status(ReportBuilder::new(), &status)
    );

    if let Some(deadline) = deadline {
        deadline.abort();
    }

    status.send_modify(|current| {
        current.running = false;
        current.progress = builder.progress();
    });
    let report = builder.finish(start.elapsed(), completion.exits, completion.cancelled);
    if report.incomplete {
        warn!(
            "Run incomplete: {} of {} planned operations attempted",
            report.total_attempted,
            config.planned_operations()
        );
    }
    info!("Run finished: {}", report);

    Ok(report)
}
