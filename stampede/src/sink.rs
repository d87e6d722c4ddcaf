use stampede_core::{OperationResult, ReportBuilder, RunStatus};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

/// Metric names emitted for every recorded operation (with the `metrics` feature).
pub mod labels {
    pub const SUCCESS: &str = "stampede_operation_success";
    pub const FAILURE: &str = "stampede_operation_failure";
    pub const TIMEOUT: &str = "stampede_operation_timeout";
    pub const CANCELLED: &str = "stampede_operation_cancelled";
    pub const LATENCY: &str = "stampede_operation_latency";
    pub const ACTIVE_USERS: &str = "stampede_active_users";
}

/// Append-only handle virtual users push their results into.
///
/// Cloned once per user. Writes never block and are never dropped while the matching
/// [`ResultStream`] is alive.
#[derive(Clone, Debug)]
pub struct ResultSink {
    tx: UnboundedSender<OperationResult>,
}

/// Receiving end of a [`ResultSink`]. Ends once every sink clone has been dropped.
#[derive(Debug)]
pub struct ResultStream {
    rx: UnboundedReceiver<OperationResult>,
}

pub fn channel() -> (ResultSink, ResultStream) {
    let (tx, rx) = unbounded_channel();
    (ResultSink { tx }, ResultStream { rx })
}

impl ResultSink {
    pub fn record(&self, result: OperationResult) {
        #[cfg(feature = "metrics")]
        record_metrics(&result);

        trace!(
            user = result.user,
            sequence = result.sequence,
            "{:?} in {:?}",
            result.outcome,
            result.duration
        );

        if self.tx.send(result).is_err() {
            error!("Result stream closed; operation result lost.");
        }
    }
}

impl ResultStream {
    pub async fn next(&mut self) -> Option<OperationResult> {
        self.rx.recv().await
    }

    /// Drain the stream into `builder` until every sink is gone.
    pub async fn fold(mut self, mut builder: ReportBuilder) -> ReportBuilder {
        while let Some(result) = self.next().await {
            builder.record(&result);
        }
        builder
    }

    /// Like [`ResultStream::fold`], publishing the running totals to `status` after every
    /// result.
    pub async fn fold_with_status(
        mut self,
        mut builder: ReportBuilder,
        status: &watch::Sender<RunStatus>,
    ) -> ReportBuilder {
        while let Some(result) = self.next().await {
            builder.record(&result);
            status.send_modify(|current| current.progress = builder.progress());
        }
        builder
    }
}

#[cfg(feature = "metrics")]
fn record_metrics(result: &OperationResult) {
    use stampede_core::Outcome;

    match &result.outcome {
        Outcome::Success => metrics::counter!(labels::SUCCESS).increment(1),
        Outcome::Failure(reason) => {
            metrics::counter!(labels::FAILURE, "reason" => reason.category().into_owned())
                .increment(1)
        }
        Outcome::TimedOut => metrics::counter!(labels::TIMEOUT).increment(1),
        Outcome::Cancelled => metrics::counter!(labels::CANCELLED).increment(1),
    }

    if result.outcome.has_latency() {
        metrics::histogram!(labels::LATENCY).record(result.duration.as_secs_f64());
    }
}
