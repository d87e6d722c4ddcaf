use crate::{
    ConfigError, DEFAULT_CONCURRENT_USERS, DEFAULT_INTER_OPERATION_DELAY,
    DEFAULT_OPERATIONS_PER_USER, DEFAULT_OPERATION_TIMEOUT, DEFAULT_SESSION_ACQUISITION_TIMEOUT,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
#[cfg(feature = "serde")]
use serde_with::{serde_as, DurationMilliSeconds};
use std::num::NonZeroUsize;
use std::time::Duration;
use url::Url;

/// Parameters of a single run.
///
/// Created once and shared read-only with every virtual user. Use [`RunConfig::validate`] (or
/// let the coordinator do it) before starting a run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", cfg_eval::cfg_eval, serde_as)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct RunConfig {
    pub target_url: String,
    pub concurrent_users: usize,
    pub operations_per_user: usize,
    #[cfg_attr(feature = "serde", serde_as(as = "DurationMilliSeconds<u64>"))]
    pub inter_operation_delay: Duration,
    #[cfg_attr(feature = "serde", serde_as(as = "DurationMilliSeconds<u64>"))]
    pub operation_timeout: Duration,
    #[cfg_attr(feature = "serde", serde_as(as = "DurationMilliSeconds<u64>"))]
    pub session_acquisition_timeout: Duration,
    /// Stop a user after this many back-to-back failed or timed out operations.
    pub max_consecutive_failures: Option<NonZeroUsize>,
    /// Cancel the whole run once this much wall-clock time has passed.
    #[cfg_attr(feature = "serde", serde_as(as = "Option<DurationMilliSeconds<u64>>"))]
    pub deadline: Option<Duration>,
}

impl RunConfig {
    pub fn new(target_url: &str) -> Self {
        Self {
            target_url: target_url.to_string(),
            concurrent_users: DEFAULT_CONCURRENT_USERS,
            operations_per_user: DEFAULT_OPERATIONS_PER_USER,
            inter_operation_delay: DEFAULT_INTER_OPERATION_DELAY,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            session_acquisition_timeout: DEFAULT_SESSION_ACQUISITION_TIMEOUT,
            max_consecutive_failures: None,
            deadline: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrent_users == 0 {
            return Err(ConfigError::NoUsers);
        }
        if self.operations_per_user == 0 {
            return Err(ConfigError::NoOperations);
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::ZeroOperationTimeout);
        }
        if self.session_acquisition_timeout.is_zero() {
            return Err(ConfigError::ZeroAcquisitionTimeout);
        }
        if matches!(self.deadline, Some(d) if d.is_zero()) {
            return Err(ConfigError::ZeroDeadline);
        }
        self.target().map(|_| ())
    }

    /// Parsed form of `target_url`. Only `http` and `https` targets are accepted.
    pub fn target(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidTarget {
            url: self.target_url.clone(),
            reason,
        };

        let url = Url::parse(&self.target_url).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(invalid(format!("unsupported scheme `{scheme}`"))),
        }
    }

    /// Total number of operations a run of this config attempts when nothing truncates it.
    pub fn planned_operations(&self) -> usize {
        self.concurrent_users.saturating_mul(self.operations_per_user)
    }
}
