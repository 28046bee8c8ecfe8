//! Interfaces to the collaborators that restart the service

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Schedules a restart of the supervised service
///
/// Fire-and-forget: implementations dispatch the restart elsewhere and never
/// report back whether it succeeded.
pub trait RestartTrigger: Send + Sync {
    fn schedule_restart(&self, reason: &str, delay: Duration);
}

/// Resolves a service identifier to the pid of its running process
#[async_trait]
pub trait ServiceLookup: Send + Sync {
    /// `Ok(None)` when the service is known but not running, or unknown
    async fn lookup_pid(&self, label: &str) -> Result<Option<u32>>;
}
