//! Per-service supervision context
//!
//! One [`Supervisor`] owns the recovery tracker, the failure-rate watchdog
//! and the fallback spawner for a single supervised service, wired to a
//! shared [`RestartTrigger`].

use std::sync::Arc;

use log::{info, warn};

use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::process::{
    FallbackPlan, FallbackSpawner, FallbackTier, Launcher, OnFallback, ProcessError, ProcessResult,
    SpawnOptions, SpawnSuccess, TokioLauncher,
};
use crate::recovery::RecoveryTracker;
use crate::restart::RestartTrigger;
use crate::watchdog::HealthWatchdog;

/// Recovery, watchdog and spawning for one service
pub struct Supervisor<L: Launcher = TokioLauncher> {
    label: String,
    plan: FallbackPlan,
    recovery: Arc<RecoveryTracker>,
    watchdog: Arc<HealthWatchdog>,
    spawner: FallbackSpawner<L>,
}

impl Supervisor<TokioLauncher> {
    pub fn new(config: &SupervisorConfig, trigger: Arc<dyn RestartTrigger>) -> Self {
        Self::with_launcher(config, trigger, TokioLauncher)
    }
}

impl<L: Launcher> Supervisor<L> {
    pub fn with_launcher(
        config: &SupervisorConfig,
        trigger: Arc<dyn RestartTrigger>,
        launcher: L,
    ) -> Self {
        let recovery = Arc::new(RecoveryTracker::new(config.recovery.tracker_config()));
        let delay = config.recovery.restart_delay();
        let threshold = config.recovery.error_threshold;
        let recovery_trigger = trigger.clone();
        recovery.set_recovery_callback(Some(Arc::new(move || {
            let reason = format!("EBADF recovery after {} consecutive errors", threshold);
            recovery_trigger.schedule_restart(&reason, delay);
        })));

        let watchdog = Arc::new(HealthWatchdog::new(
            config.watchdog.watchdog_config(),
            trigger,
        ));

        let spawner = FallbackSpawner::new(launcher)
            .with_recovery(recovery.clone())
            .with_observer(watchdog.clone());

        Self {
            label: config.service_label.clone(),
            plan: config.spawn.clone(),
            recovery,
            watchdog,
            spawner,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn recovery(&self) -> &Arc<RecoveryTracker> {
        &self.recovery
    }

    pub fn watchdog(&self) -> &Arc<HealthWatchdog> {
        &self.watchdog
    }

    pub fn plan(&self) -> &FallbackPlan {
        &self.plan
    }

    /// Start the periodic health check; needs a tokio runtime
    pub fn start(&self) -> Result<()> {
        info!("Starting supervision of {}", self.label);
        self.watchdog.start()
    }

    pub fn stop(&self) {
        info!("Stopping supervision of {}", self.label);
        self.watchdog.stop();
    }

    /// Spawn `argv` with the configured fallback plan
    pub async fn spawn(
        &self,
        argv: &[String],
        base: &SpawnOptions,
    ) -> ProcessResult<SpawnSuccess<L::Handle>> {
        let label = self.label.as_str();
        let log_fallback: &OnFallback<'_> = &|err: &ProcessError, next: &FallbackTier| {
            warn!("[{}] spawn failed ({}), falling back to '{}'", label, err, next.label);
        };
        self.spawner
            .spawn_with_fallback(argv, base, &self.plan, Some(log_fallback))
            .await
    }
}
