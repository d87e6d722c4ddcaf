use crate::RunConfig;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
#[cfg(feature = "serde")]
use serde_with::{serde_as, DurationMilliSecondsWithFrac};
use std::time::Duration;

/// Live view of a run, published while it is in progress.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct RunStatus {
    pub running: bool,
    /// Configuration of the current (or last) run. `None` before any run started.
    pub config: Option<RunConfig>,
    pub progress: Progress,
}

/// Running totals of the results recorded so far.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", cfg_eval::cfg_eval, serde_as)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Progress {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    #[cfg_attr(feature = "serde", serde_as(as = "DurationMilliSecondsWithFrac<f64>"))]
    pub mean_latency: Duration,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}
