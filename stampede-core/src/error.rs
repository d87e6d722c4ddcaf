use thiserror::Error;

/// Reasons a [`crate::RunConfig`] is rejected before any user starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("concurrent users must be at least 1")]
    NoUsers,

    #[error("operations per user must be at least 1")]
    NoOperations,

    #[error("operation timeout must be greater than zero")]
    ZeroOperationTimeout,

    #[error("session acquisition timeout must be greater than zero")]
    ZeroAcquisitionTimeout,

    #[error("run deadline must be greater than zero")]
    ZeroDeadline,

    #[error("invalid target url `{url}`: {reason}")]
    InvalidTarget { url: String, reason: String },
}
