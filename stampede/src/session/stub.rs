//! In-memory session provider used by the unit tests.
use super::{Operation, Response, Session, SessionError, SessionProvider};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Body size of every page the stub serves.
pub(crate) const STUB_PAGE_BYTES: usize = 512;

#[derive(Default)]
pub(crate) struct StubStats {
    acquired: AtomicUsize,
    released: AtomicUsize,
    release_calls: AtomicUsize,
    started: AtomicUsize,
    executed: AtomicUsize,
    sequences: Mutex<BTreeMap<usize, Vec<usize>>>,
}

impl StubStats {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Sessions released at least once.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Raw number of `release` calls, including repeated ones.
    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Operations that ran to completion.
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    /// Sequence numbers seen by the target, per user, in arrival order.
    pub fn sequences(&self) -> BTreeMap<usize, Vec<usize>> {
        self.sequences.lock().unwrap().clone()
    }
}

struct StubBehaviour {
    latency: Duration,
    status: u16,
    failing_sequences: HashSet<usize>,
    erroring_sequences: HashSet<usize>,
    unavailable: HashSet<usize>,
    acquire_delay: Duration,
    panicking: HashSet<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
}

/// A deterministic target plus session pool.
///
/// Every operation sleeps for `latency` and answers with `status`. Users listed as unavailable
/// fail acquisition, users listed as panicking crash on their first operation.
pub(crate) struct StubProvider {
    behaviour: Arc<StubBehaviour>,
    stats: Arc<StubStats>,
}

impl StubProvider {
    pub fn new(latency: Duration) -> Self {
        Self {
            behaviour: Arc::new(StubBehaviour {
                latency,
                status: 200,
                failing_sequences: HashSet::new(),
                erroring_sequences: HashSet::new(),
                unavailable: HashSet::new(),
                acquire_delay: Duration::ZERO,
                panicking: HashSet::new(),
                cancel_after: None,
            }),
            stats: Arc::new(StubStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<StubStats> {
        self.stats.clone()
    }

    pub fn status(mut self, status: u16) -> Self {
        self.behaviour_mut().status = status;
        self
    }

    /// Answer 500 for these sequence numbers, for every user.
    pub fn failing_sequences(mut self, sequences: &[usize]) -> Self {
        self.behaviour_mut()
            .failing_sequences
            .extend(sequences.iter().copied());
        self
    }

    /// Raise a session error instead of answering for these sequence numbers.
    pub fn erroring(mut self, sequences: &[usize]) -> Self {
        self.behaviour_mut()
            .erroring_sequences
            .extend(sequences.iter().copied());
        self
    }

    pub fn unavailable(mut self, user: usize) -> Self {
        self.behaviour_mut().unavailable.insert(user);
        self
    }

    pub fn acquire_delay(mut self, delay: Duration) -> Self {
        self.behaviour_mut().acquire_delay = delay;
        self
    }

    pub fn panicking(mut self, user: usize) -> Self {
        self.behaviour_mut().panicking.insert(user);
        self
    }

    /// Cancel `token` once `count` operations have completed across all users.
    pub fn cancel_after(mut self, count: usize, token: CancellationToken) -> Self {
        self.behaviour_mut().cancel_after = Some((count, token));
        self
    }

    fn behaviour_mut(&mut self) -> &mut StubBehaviour {
        Arc::get_mut(&mut self.behaviour).expect("stub configured after first use")
    }
}

impl SessionProvider for StubProvider {
    type Session = StubSession;

    fn acquire(
        &self,
        user: usize,
    ) -> impl Future<Output = Result<Self::Session, SessionError>> + Send {
        let behaviour = self.behaviour.clone();
        let stats = self.stats.clone();
        async move {
            if !behaviour.acquire_delay.is_zero() {
                tokio::time::sleep(behaviour.acquire_delay).await;
            }
            if behaviour.unavailable.contains(&user) {
                return Err(SessionError::Unavailable(format!("no tab for user {user}")));
            }

            stats.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(StubSession {
                behaviour,
                stats,
                released: false,
            })
        }
    }
}

pub(crate) struct StubSession {
    behaviour: Arc<StubBehaviour>,
    stats: Arc<StubStats>,
    released: bool,
}

impl Session for StubSession {
    fn execute(
        &mut self,
        op: Operation<'_>,
    ) -> impl Future<Output = Result<Response, SessionError>> + Send {
        let behaviour = self.behaviour.clone();
        let stats = self.stats.clone();
        let Operation { user, sequence, .. } = op;
        async move {
            if behaviour.panicking.contains(&user) {
                panic!("stub session for user {user} crashed");
            }

            stats.started.fetch_add(1, Ordering::SeqCst);
            stats
                .sequences
                .lock()
                .unwrap()
                .entry(user)
                .or_default()
                .push(sequence);

            tokio::time::sleep(behaviour.latency).await;

            let done = stats.executed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((count, token)) = &behaviour.cancel_after {
                if done >= *count {
                    token.cancel();
                }
            }

            if behaviour.erroring_sequences.contains(&sequence) {
                return Err(SessionError::Operation(format!(
                    "connection reset during sequence {sequence}"
                )));
            }

            let status = if behaviour.failing_sequences.contains(&sequence) {
                500
            } else {
                behaviour.status
            };
            Ok(Response {
                status,
                bytes: STUB_PAGE_BYTES,
            })
        }
    }

    fn release(&mut self) {
        self.stats.release_calls.fetch_add(1, Ordering::SeqCst);
        if !self.released {
            self.released = true;
            self.stats.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}
