//! Spawn fallback and restart watchdogs for a supervised gateway service

pub mod config;
pub mod error;
#[cfg(feature = "monitor")]
pub mod monitor;
pub mod process;
pub mod recovery;
pub mod restart;
pub mod retry;
#[cfg(feature = "service")]
pub mod service;
pub mod supervisor;
pub mod util;
pub mod watchdog;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::config::{ConfigBuilder, LogLevel, SupervisorConfig};
    pub use crate::error::{Result, SupervisorError};
    pub use crate::process::{
        FallbackPlan, FallbackSpawner, FallbackTier, Launcher, ProcessError, SpawnOptions,
        StdioMode, TokioLauncher,
    };
    pub use crate::recovery::{RecoveryConfig, RecoveryTracker};
    pub use crate::restart::{RestartTrigger, ServiceLookup};
    pub use crate::retry::{RetryConfig, execute_with_retry};
    #[cfg(feature = "service")]
    pub use crate::service::{ServiceManager, ServiceManagerLookup, ServiceRestarter};
    pub use crate::supervisor::Supervisor;
    pub use crate::watchdog::{HealthWatchdog, WatchdogConfig};
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
