#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
#[cfg(feature = "serde")]
use serde_with::{serde_as, DurationMilliSeconds};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

/// Failure category for the `session_unavailable` bucket of [`crate::RunReport::failed`].
pub const SESSION_UNAVAILABLE: &str = "session_unavailable";

/// Why an operation (or a whole user) failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum FailureReason {
    /// No session could be acquired for the user.
    SessionUnavailable,
    /// The target answered with a status outside the accepted range.
    Status(u16),
    /// The session raised an error while talking to the target.
    Transport(String),
}

impl FailureReason {
    /// Key under which this failure is counted in a report.
    pub fn category(&self) -> Cow<'static, str> {
        match self {
            FailureReason::SessionUnavailable => Cow::Borrowed(SESSION_UNAVAILABLE),
            FailureReason::Status(status) => Cow::Owned(format!("http_{status}")),
            FailureReason::Transport(_) => Cow::Borrowed("transport"),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::SessionUnavailable => write!(f, "session unavailable"),
            FailureReason::Status(status) => write!(f, "status {status}"),
            FailureReason::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum Outcome {
    Success,
    Failure(FailureReason),
    TimedOut,
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Whether the outcome counts toward a consecutive-failure limit.
    pub fn is_failure_like(&self) -> bool {
        matches!(self, Outcome::Failure(_) | Outcome::TimedOut)
    }

    /// Whether the latency of this outcome belongs in the latency distribution. Timeouts are
    /// capped by the configured limit and cancelled operations never finished, so neither is
    /// a measurement of the target.
    pub fn has_latency(&self) -> bool {
        match self {
            Outcome::Success => true,
            Outcome::Failure(FailureReason::SessionUnavailable) => false,
            Outcome::Failure(_) => true,
            Outcome::TimedOut | Outcome::Cancelled => false,
        }
    }
}

/// One attempted operation. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", cfg_eval::cfg_eval, serde_as)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct OperationResult {
    pub user: usize,
    pub sequence: usize,
    /// Offset of the operation start from the start of the run.
    #[cfg_attr(feature = "serde", serde_as(as = "DurationMilliSeconds<u64>"))]
    pub started: Duration,
    #[cfg_attr(feature = "serde", serde_as(as = "DurationMilliSeconds<u64>"))]
    pub duration: Duration,
    pub outcome: Outcome,
    /// Body bytes received. Zero when the target never answered.
    pub bytes: u64,
}

/// How a virtual user terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum UserExit {
    /// Every configured operation was attempted.
    Completed,
    /// No session could be acquired; no operation was issued.
    SessionUnavailable,
    /// Cancellation was observed before the sequence finished.
    Cancelled,
    /// The consecutive-failure limit was reached.
    FailureLimit,
    /// The user task itself crashed. This is a generator failure, not a target failure.
    Panicked,
}

impl UserExit {
    pub fn is_truncated(&self) -> bool {
        !matches!(self, UserExit::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct UserSummary {
    pub user: usize,
    /// Number of operation results this user emitted.
    pub attempted: usize,
    pub exit: UserExit,
}
