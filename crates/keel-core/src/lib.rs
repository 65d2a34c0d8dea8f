//! # keel-core
//!
//! Lifecycle backbone for long-running services: start several [`Runner`]s together,
//! keep them alive until the shared [`CancellationToken`] is cancelled, and report
//! exactly which runner failed and why.
//!
//! ```text
//! shutdown_token() ──► run(&ctx, [runner, runner, …])
//!                           │ child token shared by all runners
//!                           ├─ runner 1 ─┐
//!                           ├─ runner 2 ─┼─ first return cancels the shared token
//!                           └─ runner N ─┘
//!                           ▼
//!                     Ok(()) | Err(RunError { (runner i) … })
//! ```

mod error;
pub use error::{BoxError, Canceled, RunError, RunnerError, find_source, is_canceled};

mod runner;
pub use runner::{RunFn, Runner, RunnerRef};

mod supervisor;
pub use supervisor::run;

pub mod signal;

pub use tokio_util::sync::CancellationToken;

pub mod prelude {
    pub use crate::signal::shutdown_token;
    pub use crate::{BoxError, Canceled, CancellationToken, RunError, RunFn, Runner, RunnerRef, run};
}
