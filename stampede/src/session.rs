//! Session handles
//!
//! A session is the isolated execution context one virtual user drives its operations through,
//! the equivalent of a single browser tab. Sessions come from a [`SessionProvider`], are owned
//! by exactly one user, and are released when that user finishes.
#[cfg(feature = "http")]
mod http;
#[cfg(test)]
pub(crate) mod stub;

#[cfg(feature = "http")]
pub use http::{HttpSession, HttpSessionProvider};

use std::future::Future;
use thiserror::Error;
use tokio::time::Instant;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// One navigation issued by a virtual user.
#[derive(Debug, Clone, Copy)]
pub struct Operation<'a> {
    pub target: &'a Url,
    pub user: usize,
    pub sequence: usize,
}

/// What the target answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub bytes: usize,
}

impl Response {
    /// Navigation follows redirects, so anything below 400 is a loaded page.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// The backing resource could not hand out a session.
    #[error("session unavailable: {0}")]
    Unavailable(String),

    /// The session failed while talking to the target.
    #[error("{0}")]
    Operation(String),

    #[error("session was already released")]
    Released,
}

/// An acquired, exclusively owned execution context.
pub trait Session: Send {
    /// Issue one operation. Dropping the returned future aborts it and must leave the session
    /// in a state where [`Session::release`] still frees everything.
    fn execute(
        &mut self,
        op: Operation<'_>,
    ) -> impl Future<Output = Result<Response, SessionError>> + Send;

    /// Free the underlying resource. Must be idempotent.
    fn release(&mut self);
}

/// Hands out sessions, possibly blocking while its backing resource is exhausted.
pub trait SessionProvider: Send + Sync + 'static {
    type Session: Session + 'static;

    fn acquire(
        &self,
        user: usize,
    ) -> impl Future<Output = Result<Self::Session, SessionError>> + Send;
}

/// Scoped ownership of one [`Session`].
///
/// The session is released exactly once: on the first call to [`SessionGuard::release`] or,
/// failing that, when the guard is dropped. Early returns, cancellation and panics all go
/// through `Drop`.
pub struct SessionGuard<S: Session> {
    session: S,
    user: usize,
    acquired_at: Instant,
    released: bool,
}

impl<S: Session> SessionGuard<S> {
    pub fn new(user: usize, session: S) -> Self {
        Self {
            session,
            user,
            acquired_at: Instant::now(),
            released: false,
        }
    }

    pub async fn execute(&mut self, op: Operation<'_>) -> Result<Response, SessionError> {
        if self.released {
            return Err(SessionError::Released);
        }
        self.session.execute(op).await
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.session.release();

        debug!(
            user = self.user,
            "Released session after {}",
            humantime::format_duration(self.acquired_at.elapsed())
        );
    }
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}
