#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod coordinator;
pub mod pool;
pub mod session;
pub mod sink;

pub(crate) mod user;

pub use stampede_core as core;

pub use coordinator::{run, run_with_status, RunError};
pub use load_test::LoadTest;
pub use pool::{PoolCompletion, PoolHandle, UserPool};
pub use session::{Operation, Response, Session, SessionError, SessionGuard, SessionProvider};
pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub use session::{HttpSession, HttpSessionProvider};

pub mod prelude {
    pub use crate::coordinator::{run, run_with_status, RunError};
    pub use crate::load_test::LoadTest;
    pub use crate::session::{Session, SessionProvider};
    pub use tokio_util::sync::CancellationToken;

    #[cfg(feature = "http")]
    pub use crate::session::HttpSessionProvider;

    pub use stampede_core::{Outcome, RunConfig, RunReport, RunStatus};
}
