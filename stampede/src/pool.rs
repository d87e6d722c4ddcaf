use crate::session::SessionProvider;
use crate::sink::ResultSink;
use crate::user::VirtualUser;
use stampede_core::{RunConfig, UserExit};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn, Instrument};
use url::Url;

/// Launches virtual users and joins them.
pub struct UserPool;

impl UserPool {
    /// Spawn exactly `config.concurrent_users` users, each as its own task.
    ///
    /// The sink is handed to the users; once all of them have terminated, every clone is gone
    /// and the matching stream ends.
    pub fn start<P: SessionProvider>(
        config: Arc<RunConfig>,
        target: Url,
        provider: Arc<P>,
        sink: ResultSink,
    ) -> PoolHandle {
        let run_start = Instant::now();
        let users = config.concurrent_users;
        let target = Arc::new(target);
        let cancel = CancellationToken::new();
        let outstanding = Arc::new(Outstanding {
            count: AtomicUsize::new(users),
            done: Notify::new(),
        });

        let mut tasks = Vec::with_capacity(users);
        for index in 0..users {
            let user = VirtualUser {
                index,
                config: config.clone(),
                target: target.clone(),
                provider: provider.clone(),
                sink: sink.clone(),
                cancel: cancel.clone(),
                run_start,
            };
            let guard = OutstandingGuard::new(outstanding.clone());

            tasks.push((
                index,
                tokio::spawn(
                    async move {
                        let _guard = guard;
                        user.run().await
                    }
                    .in_current_span(),
                ),
            ));
        }
        if users == 0 {
            outstanding.done.notify_one();
        }
        debug!("Launched {users} virtual users");

        PoolHandle {
            tasks,
            outstanding,
            cancel,
            joined: false,
        }
    }
}

/// Outcome of joining every user of a pool.
#[derive(Debug)]
pub struct PoolCompletion {
    /// One entry per launched user, in launch order.
    pub exits: Vec<(usize, UserExit)>,
    /// Whether cancellation was forwarded to the users.
    pub cancelled: bool,
}

/// Handle to a running pool.
///
/// Dropping the handle without awaiting it cancels the users; they still release their
/// sessions on the way out.
pub struct PoolHandle {
    tasks: Vec<(usize, JoinHandle<UserExit>)>,
    outstanding: Arc<Outstanding>,
    cancel: CancellationToken,
    joined: bool,
}

impl PoolHandle {
    /// Users that have not terminated yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.count.load(Ordering::Acquire)
    }

    /// Forward cancellation to every in-flight user.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until every user has terminated.
    ///
    /// If `ctx` fires first, cancellation is forwarded to the users and the pool still waits
    /// for all of them before returning.
    pub async fn await_completion(mut self, ctx: &CancellationToken) -> PoolCompletion {
        let cancelled = tokio::select! {
            biased;
            _ = self.outstanding.done.notified() => false,
            _ = ctx.cancelled() => {
                info!("Cancelling {} outstanding users", self.outstanding());
                self.cancel();
                true
            }
        };

        let tasks = std::mem::take(&mut self.tasks);
        let mut exits = Vec::with_capacity(tasks.len());
        for (user, handle) in tasks {
            let exit = match handle.await {
                Ok(exit) => exit,
                Err(err) => {
                    error!(user, "Virtual user crashed: {err}");
                    UserExit::Panicked
                }
            };
            exits.push((user, exit));
        }
        self.joined = true;

        PoolCompletion { exits, cancelled }
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        if !self.joined {
            warn!("Pool dropped before completion; cancelling users");
            self.cancel.cancel();
        }
    }
}

struct Outstanding {
    count: AtomicUsize,
    done: Notify,
}

/// Decrements the outstanding count when its user task ends, however it ends. The last one
/// out signals completion.
struct OutstandingGuard(Arc<Outstanding>);

impl OutstandingGuard {
    fn new(outstanding: Arc<Outstanding>) -> Self {
        #[cfg(feature = "metrics")]
        metrics::gauge!(crate::sink::labels::ACTIVE_USERS).increment(1.);
        Self(outstanding)
    }
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        #[cfg(feature = "metrics")]
        metrics::gauge!(crate::sink::labels::ACTIVE_USERS).decrement(1.);

        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.done.notify_one();
        }
    }
}
