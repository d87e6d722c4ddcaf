use crate::session::{Operation, Session, SessionGuard, SessionProvider};
use crate::sink::ResultSink;
use stampede_core::{FailureReason, OperationResult, Outcome, RunConfig, UserExit};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

/// One simulated client: a single session driven through a fixed sequence of operations.
pub(crate) struct VirtualUser<P> {
    pub index: usize,
    pub config: Arc<RunConfig>,
    pub target: Arc<Url>,
    pub provider: Arc<P>,
    pub sink: ResultSink,
    pub cancel: CancellationToken,
    /// Reference point for [`OperationResult::started`].
    pub run_start: Instant,
}

impl<P: SessionProvider> VirtualUser<P> {
    #[instrument(name = "user", skip_all, fields(user = self.index))]
    pub async fn run(self) -> UserExit {
        let mut session = match self.acquire().await {
            Ok(session) => session,
            Err(exit) => {
                debug!("Exiting before the first operation: {exit:?}");
                return exit;
            }
        };

        let exit = self.drive(&mut session).await;
        session.release();

        debug!("Exiting: {exit:?}");
        exit
    }

    async fn acquire(&self) -> Result<SessionGuard<P::Session>, UserExit> {
        let start = Instant::now();
        let acquire = timeout(
            self.config.session_acquisition_timeout,
            self.provider.acquire(self.index),
        );

        let res = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UserExit::Cancelled),
            res = acquire => res,
        };

        match res {
            Ok(Ok(session)) => Ok(SessionGuard::new(self.index, session)),
            Ok(Err(err)) => {
                warn!("Could not acquire a session: {err}");
                self.emit_unavailable(start);
                Err(UserExit::SessionUnavailable)
            }
            Err(_) => {
                warn!(
                    "No session available within {}",
                    humantime::format_duration(self.config.session_acquisition_timeout)
                );
                self.emit_unavailable(start);
                Err(UserExit::SessionUnavailable)
            }
        }
    }

    async fn drive(&self, session: &mut SessionGuard<P::Session>) -> UserExit {
        let operations = self.config.operations_per_user;
        let mut consecutive_failures = 0;

        for sequence in 0..operations {
            if self.cancel.is_cancelled() {
                return UserExit::Cancelled;
            }

            let result = self.operation(session, sequence).await;
            let outcome = result.outcome.clone();
            self.sink.record(result);

            if outcome == Outcome::Cancelled {
                return UserExit::Cancelled;
            }

            if outcome.is_failure_like() {
                consecutive_failures += 1;
            } else {
                consecutive_failures = 0;
            }
            if let Some(limit) = self.config.max_consecutive_failures {
                if consecutive_failures >= limit.get() {
                    warn!("Stopping after {consecutive_failures} consecutive failures");
                    return UserExit::FailureLimit;
                }
            }

            if sequence + 1 < operations && !self.pace().await {
                return UserExit::Cancelled;
            }
        }

        UserExit::Completed
    }

    async fn operation<S: Session>(
        &self,
        session: &mut SessionGuard<S>,
        sequence: usize,
    ) -> OperationResult {
        let start = Instant::now();
        let op = Operation {
            target: &self.target,
            user: self.index,
            sequence,
        };

        let mut bytes = 0;
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Outcome::Cancelled,
            res = timeout(self.config.operation_timeout, session.execute(op)) => match res {
                Ok(Ok(response)) => {
                    bytes = response.bytes as u64;
                    if response.is_success() {
                        Outcome::Success
                    } else {
                        Outcome::Failure(FailureReason::Status(response.status))
                    }
                }
                Ok(Err(err)) => {
                    debug!(sequence, "Session error: {err}");
                    Outcome::Failure(FailureReason::Transport(err.to_string()))
                }
                Err(_) => Outcome::TimedOut,
            },
        };

        OperationResult {
            user: self.index,
            sequence,
            started: start.duration_since(self.run_start),
            duration: start.elapsed(),
            outcome,
            bytes,
        }
    }

    /// Wait out the pacing delay. Returns `false` if cancelled meanwhile.
    async fn pace(&self) -> bool {
        let delay = self.config.inter_operation_delay;
        if delay.is_zero() {
            return !self.cancel.is_cancelled();
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    fn emit_unavailable(&self, start: Instant) {
        self.sink.record(OperationResult {
            user: self.index,
            sequence: 0,
            started: start.duration_since(self.run_start),
            duration: start.elapsed(),
            outcome: Outcome::Failure(FailureReason::SessionUnavailable),
            bytes: 0,
        });
    }
}
