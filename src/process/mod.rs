//! Process launching with fallback I/O configurations
//!
//! [`Launcher`] starts a single child process. [`FallbackSpawner`] wraps a
//! launcher with an ordered list of progressively more conservative
//! [`FallbackTier`]s and reports spawn outcomes to the recovery tracker and
//! to any registered [`SpawnObserver`].

mod command;
mod error;
mod fallback;
mod launcher;
mod options;

pub use command::ProcessHandle;
pub use error::{ErrorCode, ProcessError, ProcessResult};
pub use fallback::{
    FallbackPlan, FallbackSpawner, FallbackTier, OnFallback, SpawnObserver, SpawnSuccess,
};
pub use launcher::{Launcher, TokioLauncher};
pub use options::{OptionOverrides, SpawnAttempt, SpawnOptions, StdioMode};
