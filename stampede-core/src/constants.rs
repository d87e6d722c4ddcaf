use std::time::Duration;

/// Number of virtual users started when none is configured.
pub const DEFAULT_CONCURRENT_USERS: usize = 100;

/// Number of operations each virtual user issues when none is configured.
pub const DEFAULT_OPERATIONS_PER_USER: usize = 100;

/// Think-time between two operations of the same user.
pub const DEFAULT_INTER_OPERATION_DELAY: Duration = Duration::from_millis(10);

/// Upper bound on a single navigation before it is recorded as timed out.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on waiting for a session before the user gives up.
pub const DEFAULT_SESSION_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(30);

/// Quantiles reported in [`crate::LatencySummary`].
pub const REPORTED_QUANTILES: [f64; 3] = [0.50, 0.95, 0.99];
