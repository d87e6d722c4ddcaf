use crate::{OperationResult, Outcome, Progress, UserExit, UserSummary};
use pdatastructs::tdigest::{TDigest, K1};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
#[cfg(feature = "serde")]
use serde_with::{serde_as, DurationMilliSeconds, DurationMilliSecondsWithFrac};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::error;

const TDIGEST_BACKLOG_SIZE: usize = 100;

/// Aggregated outcome of one run.
///
/// Produced once per run by the coordinator after every virtual user has terminated. A report
/// with `incomplete` set was cut short by cancellation (or a crashed user) and only covers
/// the operations that were issued before that.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", cfg_eval::cfg_eval, serde_as)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct RunReport {
    pub total_attempted: u64,
    pub succeeded: u64,
    /// Failure counts keyed by [`crate::FailureReason::category`].
    pub failed: BTreeMap<String, u64>,
    pub timed_out: u64,
    /// In-flight operations aborted by cancellation.
    pub cancelled: u64,
    /// Most recent failure message per category, keyed like `failed`.
    pub last_errors: BTreeMap<String, String>,
    pub latency: LatencySummary,
    pub bytes_received: u64,
    #[cfg_attr(feature = "serde", serde(rename = "wallClockMs"))]
    #[cfg_attr(feature = "serde", serde_as(as = "DurationMilliSeconds<u64>"))]
    pub wall_clock: Duration,
    pub incomplete: bool,
    pub users: Vec<UserSummary>,
}

impl RunReport {
    pub fn total_failed(&self) -> u64 {
        self.failed.values().sum()
    }

    /// Users that did not attempt their full operation sequence.
    pub fn truncated_users(&self) -> impl Iterator<Item = &UserSummary> {
        self.users.iter().filter(|u| u.exit.is_truncated())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} operations in {}{}",
            self.total_attempted,
            humantime::format_duration(truncate_micros(self.wall_clock)),
            if self.incomplete { " (incomplete)" } else { "" },
        )?;
        writeln!(
            f,
            "  succeeded={}, failed={}, timed_out={}, cancelled={}",
            self.succeeded,
            self.total_failed(),
            self.timed_out,
            self.cancelled,
        )?;
        for (reason, count) in &self.failed {
            match self.last_errors.get(reason) {
                Some(last) => writeln!(f, "    {reason}: {count} (last: {last})")?,
                None => writeln!(f, "    {reason}: {count}")?,
            }
        }
        writeln!(f, "  latency: {}", self.latency)?;
        writeln!(f, "  received {} bytes", self.bytes_received)?;

        let truncated = self.truncated_users().count();
        if truncated > 0 {
            write!(f, "  {truncated}/{} users truncated", self.users.len())?;
        } else {
            write!(f, "  {} users completed", self.users.len())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", cfg_eval::cfg_eval, serde_as)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LatencySummary {
    #[cfg_attr(feature = "serde", serde_as(as = "DurationMilliSecondsWithFrac<f64>"))]
    pub min: Duration,
    #[cfg_attr(feature = "serde", serde_as(as = "DurationMilliSecondsWithFrac<f64>"))]
    pub max: Duration,
    #[cfg_attr(feature = "serde", serde_as(as = "DurationMilliSecondsWithFrac<f64>"))]
    pub mean: Duration,
    #[cfg_attr(feature = "serde", serde_as(as = "DurationMilliSecondsWithFrac<f64>"))]
    pub p50: Duration,
    #[cfg_attr(feature = "serde", serde_as(as = "DurationMilliSecondsWithFrac<f64>"))]
    pub p95: Duration,
    #[cfg_attr(feature = "serde", serde_as(as = "DurationMilliSecondsWithFrac<f64>"))]
    pub p99: Duration,
}

impl fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min={:?}, mean={:?}, p50={:?}, p95={:?}, p99={:?}, max={:?}",
            self.min, self.mean, self.p50, self.p95, self.p99, self.max,
        )
    }
}

/// Incrementally folds [`OperationResult`]s into a [`RunReport`].
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    total_attempted: u64,
    succeeded: u64,
    failed: BTreeMap<String, u64>,
    timed_out: u64,
    cancelled: u64,
    last_errors: BTreeMap<String, String>,
    last_error: Option<String>,
    bytes_received: u64,
    latency: TDigest<K1>,
    latency_count: u64,
    latency_sum: Duration,
    latency_min: Option<Duration>,
    latency_max: Duration,
    per_user: BTreeMap<usize, usize>,
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self {
            total_attempted: 0,
            succeeded: 0,
            failed: BTreeMap::new(),
            timed_out: 0,
            cancelled: 0,
            last_errors: BTreeMap::new(),
            last_error: None,
            bytes_received: 0,
            latency: default_tdigest(),
            latency_count: 0,
            latency_sum: Duration::ZERO,
            latency_min: None,
            latency_max: Duration::ZERO,
            per_user: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, result: &OperationResult) {
        self.total_attempted += 1;
        *self.per_user.entry(result.user).or_default() += 1;
        self.bytes_received += result.bytes;

        match &result.outcome {
            Outcome::Success => self.succeeded += 1,
            Outcome::Failure(reason) => {
                let category = reason.category().into_owned();
                let message = reason.to_string();
                *self.failed.entry(category.clone()).or_default() += 1;
                self.last_errors.insert(category, message.clone());
                self.last_error = Some(message);
            }
            Outcome::TimedOut => self.timed_out += 1,
            Outcome::Cancelled => self.cancelled += 1,
        }

        if result.outcome.has_latency() {
            self.push_latency(result.duration);
        }
    }

    /// Number of results recorded so far.
    pub fn attempted(&self) -> u64 {
        self.total_attempted
    }

    /// Totals so far, for publishing while the run is still going.
    pub fn progress(&self) -> Progress {
        Progress {
            attempted: self.total_attempted,
            succeeded: self.succeeded,
            failed: self.failed.values().sum(),
            timed_out: self.timed_out,
            cancelled: self.cancelled,
            mean_latency: self.mean_latency(),
            last_error: self.last_error.clone(),
        }
    }

    /// Finalize the report once every user has terminated. `exits` holds one entry per
    /// launched user; per-user attempted counts come from the recorded results.
    pub fn finish<I>(self, wall_clock: Duration, exits: I, cancelled: bool) -> RunReport
    where
        I: IntoIterator<Item = (usize, UserExit)>,
    {
        let mut users: Vec<_> = exits
            .into_iter()
            .map(|(user, exit)| UserSummary {
                user,
                attempted: self.per_user.get(&user).copied().unwrap_or(0),
                exit,
            })
            .collect();
        users.sort_by_key(|u| u.user);

        let incomplete = cancelled
            || users
                .iter()
                .any(|u| matches!(u.exit, UserExit::Cancelled | UserExit::Panicked));

        RunReport {
            latency: self.latency_summary(),
            total_attempted: self.total_attempted,
            succeeded: self.succeeded,
            failed: self.failed,
            timed_out: self.timed_out,
            cancelled: self.cancelled,
            last_errors: self.last_errors,
            bytes_received: self.bytes_received,
            wall_clock,
            incomplete,
            users,
        }
    }

    fn push_latency(&mut self, latency: Duration) {
        self.latency.insert(latency.as_secs_f64());
        self.latency_count += 1;
        self.latency_sum += latency;
        self.latency_max = self.latency_max.max(latency);
        self.latency_min = Some(match self.latency_min {
            Some(min) => min.min(latency),
            None => latency,
        });
    }

    fn latency_summary(&self) -> LatencySummary {
        let Some(min) = self.latency_min else {
            return LatencySummary::default();
        };
        let max = self.latency_max;
        let [p50, p95, p99] =
            crate::REPORTED_QUANTILES.map(|q| self.quantile(q).clamp(min, max));

        LatencySummary {
            min,
            max,
            mean: self.mean_latency(),
            p50,
            p95,
            p99,
        }
    }

    fn mean_latency(&self) -> Duration {
        if self.latency_count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.latency_sum.as_nanos() / u128::from(self.latency_count)) as u64)
    }

    fn quantile(&self, quantile: f64) -> Duration {
        let secs = self.latency.quantile(quantile);

        // TDigest occasionally yields NaN on tiny inputs.
        let secs = if secs.is_finite() && secs >= 0. {
            secs
        } else {
            error!("Non-finite latency quantile {quantile}; reporting zero.");
            0.
        };

        Duration::from_secs_f64(secs)
    }
}

fn default_tdigest() -> TDigest<K1> {
    TDigest::new(K1::new(10.), TDIGEST_BACKLOG_SIZE)
}

fn truncate_micros(dur: Duration) -> Duration {
    Duration::from_micros(dur.as_micros() as u64)
}
