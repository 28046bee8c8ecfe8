//! Failure-rate watchdog for spawn attempts
//!
//! Collects spawn failures over a trailing window and schedules a service
//! restart when too many land inside it. Unlike the
//! [`RecoveryTracker`](crate::recovery::RecoveryTracker), successes do not
//! forgive earlier failures; only the window expiring does.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::error::{Result, SupervisorError};
use crate::process::SpawnObserver;
use crate::restart::RestartTrigger;
use crate::util::call_guarded;

/// Configuration for the failure-rate watchdog
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// How often the failure window is evaluated
    pub check_interval: Duration,

    /// Trailing window failures are counted over
    pub failure_window: Duration,

    /// Failures inside the window that make the service unhealthy
    pub failure_threshold: usize,

    /// Minimum time between two restarts scheduled by the watchdog
    pub restart_cooldown: Duration,

    /// Delay handed to the restart trigger
    pub restart_delay: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            failure_window: Duration::from_secs(120),
            failure_threshold: 5,
            restart_cooldown: Duration::from_secs(300),
            restart_delay: Duration::from_secs(2),
        }
    }
}

/// Result of one health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// The watchdog is not started
    Stopped,
    /// Fewer failures than the threshold
    Healthy { failures: usize },
    /// Unhealthy, but a restart was scheduled too recently
    Suppressed { failures: usize },
    /// Unhealthy and a restart was handed to the trigger
    RestartScheduled { failures: usize },
}

#[derive(Debug, Default)]
struct WatchdogState {
    enabled: bool,
    failures: VecDeque<Instant>,
    last_restart_at: Option<Instant>,
}

impl WatchdogState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) <= window {
                break;
            }
            self.failures.pop_front();
        }
    }
}

/// Periodic failure-rate check with its own restart path
pub struct HealthWatchdog {
    config: WatchdogConfig,
    trigger: Arc<dyn RestartTrigger>,
    state: Mutex<WatchdogState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthWatchdog {
    pub fn new(config: WatchdogConfig, trigger: Arc<dyn RestartTrigger>) -> Self {
        Self {
            config,
            trigger,
            state: Mutex::new(WatchdogState::default()),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, WatchdogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enable recording and start the periodic check
    ///
    /// Calling it on a running watchdog does nothing. Must be called from
    /// within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut task = self.task();
        if task.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            SupervisorError::Other(format!("health watchdog needs a tokio runtime: {}", e))
        })?;

        self.state().enabled = true;
        *task = Some(runtime.spawn(run_health_checks(
            Arc::downgrade(self),
            self.config.check_interval,
        )));

        info!(
            "Starting health watchdog (interval: {:?}, threshold: {} failures in {:?})",
            self.config.check_interval, self.config.failure_threshold, self.config.failure_window
        );
        Ok(())
    }

    /// Stop the periodic check and ignore further events
    pub fn stop(&self) {
        if let Some(task) = self.task().take() {
            task.abort();
            info!("Health watchdog stopped");
        }
        self.state().enabled = false;
    }

    pub fn is_running(&self) -> bool {
        self.task().is_some()
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut state = self.state();
        if !state.enabled {
            return;
        }
        state.failures.push_back(now);
        state.prune(now, self.config.failure_window);
        trace!(
            "Spawn failure recorded ({} in window)",
            state.failures.len()
        );
    }

    /// Successes leave the failure window untouched
    pub fn record_success(&self) {
        if self.state().enabled {
            trace!("Spawn success recorded");
        }
    }

    /// Failures currently inside the window
    pub fn failure_count(&self) -> usize {
        let mut state = self.state();
        state.prune(Instant::now(), self.config.failure_window);
        state.failures.len()
    }

    pub fn check_health(&self) -> HealthVerdict {
        self.check_health_at(Instant::now())
    }

    pub fn check_health_at(&self, now: Instant) -> HealthVerdict {
        let mut state = self.state();
        if !state.enabled {
            return HealthVerdict::Stopped;
        }

        state.prune(now, self.config.failure_window);
        let failures = state.failures.len();

        if failures < self.config.failure_threshold {
            debug!("Health check passed ({} recent failures)", failures);
            return HealthVerdict::Healthy { failures };
        }

        if let Some(last) = state.last_restart_at {
            let since = now.saturating_duration_since(last);
            if since < self.config.restart_cooldown {
                warn!(
                    "{} spawn failures in {:?}, restart suppressed ({:?} since last restart)",
                    failures, self.config.failure_window, since
                );
                return HealthVerdict::Suppressed { failures };
            }
        }

        let reason = format!(
            "{} spawn failures within {}s",
            failures,
            self.config.failure_window.as_secs()
        );
        state.failures.clear();
        state.last_restart_at = Some(now);
        drop(state);

        error!("Health watchdog scheduling restart: {}", reason);
        call_guarded("watchdog restart", || {
            self.trigger
                .schedule_restart(&reason, self.config.restart_delay)
        });
        HealthVerdict::RestartScheduled { failures }
    }

    /// Forget failures and the last restart time
    pub fn clear(&self) {
        let mut state = self.state();
        state.failures.clear();
        state.last_restart_at = None;
    }
}

impl SpawnObserver for HealthWatchdog {
    fn on_failure(&self) {
        self.record_failure();
    }

    fn on_success(&self) {
        self.record_success();
    }
}

impl Drop for HealthWatchdog {
    fn drop(&mut self) {
        if let Some(task) = self.task().take() {
            task.abort();
        }
    }
}

/// Run the health check loop until the watchdog is dropped or stopped
async fn run_health_checks(watchdog: Weak<HealthWatchdog>, period: Duration) {
    let mut check_interval = interval_at(Instant::now() + period, period);
    check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        check_interval.tick().await;

        match watchdog.upgrade() {
            Some(watchdog) => {
                watchdog.check_health();
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingTrigger {
        calls: Mutex<Vec<(String, Duration)>>,
    }

    impl RecordingTrigger {
        fn calls(&self) -> Vec<(String, Duration)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RestartTrigger for RecordingTrigger {
        fn schedule_restart(&self, reason: &str, delay: Duration) {
            self.calls.lock().unwrap().push((reason.to_string(), delay));
        }
    }

    fn enabled_watchdog() -> (HealthWatchdog, Arc<RecordingTrigger>) {
        let trigger = Arc::new(RecordingTrigger::default());
        let watchdog = HealthWatchdog::new(WatchdogConfig::default(), trigger.clone());
        watchdog.state().enabled = true;
        (watchdog, trigger)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_inert_until_started() {
        let trigger = Arc::new(RecordingTrigger::default());
        let watchdog = HealthWatchdog::new(WatchdogConfig::default(), trigger.clone());
        let t0 = Instant::now();

        for i in 0..10 {
            watchdog.record_failure_at(t0 + secs(i));
        }
        assert_eq!(watchdog.check_health_at(t0 + secs(10)), HealthVerdict::Stopped);
        assert!(trigger.calls().is_empty());
    }

    #[test]
    fn test_below_threshold_is_healthy() {
        let (watchdog, trigger) = enabled_watchdog();
        let t0 = Instant::now();

        for i in 0..4 {
            watchdog.record_failure_at(t0 + secs(i));
        }
        assert_eq!(
            watchdog.check_health_at(t0 + secs(30)),
            HealthVerdict::Healthy { failures: 4 }
        );
        assert!(trigger.calls().is_empty());
    }

    #[test]
    fn test_threshold_schedules_restart_and_clears() {
        let (watchdog, trigger) = enabled_watchdog();
        let t0 = Instant::now();

        for i in 0..5 {
            watchdog.record_failure_at(t0 + secs(i));
        }
        assert_eq!(
            watchdog.check_health_at(t0 + secs(30)),
            HealthVerdict::RestartScheduled { failures: 5 }
        );

        let calls = trigger.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "5 spawn failures within 120s");
        assert_eq!(calls[0].1, secs(2));
        assert_eq!(
            watchdog.check_health_at(t0 + secs(60)),
            HealthVerdict::Healthy { failures: 0 }
        );
    }

    #[test]
    fn test_successes_do_not_forgive_failures() {
        let (watchdog, _) = enabled_watchdog();
        let t0 = Instant::now();

        for i in 0..5 {
            watchdog.record_failure_at(t0 + secs(i));
            watchdog.record_success();
        }
        assert_eq!(
            watchdog.check_health_at(t0 + secs(10)),
            HealthVerdict::RestartScheduled { failures: 5 }
        );
    }

    #[test]
    fn test_old_failures_fall_out_of_window() {
        let (watchdog, trigger) = enabled_watchdog();
        let t0 = Instant::now();

        for i in 0..3 {
            watchdog.record_failure_at(t0 + secs(i));
        }
        for i in 0..2 {
            watchdog.record_failure_at(t0 + secs(100 + i));
        }
        assert_eq!(
            watchdog.check_health_at(t0 + secs(125)),
            HealthVerdict::Healthy { failures: 2 }
        );
        assert!(trigger.calls().is_empty());
    }

    #[test]
    fn test_cooldown_suppresses_second_restart() {
        let (watchdog, trigger) = enabled_watchdog();
        let t0 = Instant::now();

        for i in 0..5 {
            watchdog.record_failure_at(t0 + secs(i));
        }
        watchdog.check_health_at(t0 + secs(30));

        for i in 0..5 {
            watchdog.record_failure_at(t0 + secs(40 + i));
        }
        assert_eq!(
            watchdog.check_health_at(t0 + secs(60)),
            HealthVerdict::Suppressed { failures: 5 }
        );
        assert_eq!(trigger.calls().len(), 1);

        // Past the 300s cooldown with a fresh burst
        for i in 0..5 {
            watchdog.record_failure_at(t0 + secs(320 + i));
        }
        assert_eq!(
            watchdog.check_health_at(t0 + secs(330)),
            HealthVerdict::RestartScheduled { failures: 5 }
        );
        assert_eq!(trigger.calls().len(), 2);
    }

    #[test]
    fn test_observer_feeds_failure_window() {
        let (watchdog, _) = enabled_watchdog();
        watchdog.on_failure();
        watchdog.on_success();
        watchdog.on_failure();
        assert_eq!(watchdog.failure_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_check_schedules_restart() {
        let trigger = Arc::new(RecordingTrigger::default());
        let watchdog = Arc::new(HealthWatchdog::new(
            WatchdogConfig::default(),
            trigger.clone(),
        ));
        watchdog.start().unwrap();
        watchdog.start().unwrap();
        assert!(watchdog.is_running());

        for _ in 0..5 {
            watchdog.record_failure();
        }
        tokio::time::sleep(secs(29)).await;
        assert!(trigger.calls().is_empty());

        tokio::time::sleep(secs(2)).await;
        assert_eq!(trigger.calls().len(), 1);
        assert_eq!(watchdog.failure_count(), 0);

        watchdog.stop();
        assert!(!watchdog.is_running());
    }

    /// Panics on its first call, records later ones
    #[derive(Default)]
    struct FlakyTrigger {
        calls: Mutex<usize>,
    }

    impl RestartTrigger for FlakyTrigger {
        fn schedule_restart(&self, _reason: &str, _delay: Duration) {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            *calls += 1;
            if *calls == 1 {
                drop(calls);
                panic!("launchctl unavailable");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_trigger_keeps_periodic_check_alive() {
        let trigger = Arc::new(FlakyTrigger::default());
        let config = WatchdogConfig {
            restart_cooldown: secs(1),
            ..Default::default()
        };
        let watchdog = Arc::new(HealthWatchdog::new(config, trigger.clone()));
        watchdog.start().unwrap();

        for _ in 0..5 {
            watchdog.record_failure();
        }
        tokio::time::sleep(secs(31)).await;
        assert_eq!(*trigger.calls.lock().unwrap(), 1);
        assert_eq!(watchdog.failure_count(), 0);

        for _ in 0..5 {
            watchdog.record_failure();
        }
        tokio::time::sleep(secs(60)).await;
        assert_eq!(*trigger.calls.lock().unwrap(), 2);
        assert!(watchdog.is_running());

        watchdog.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_disables_recording_and_checks() {
        let trigger = Arc::new(RecordingTrigger::default());
        let watchdog = Arc::new(HealthWatchdog::new(
            WatchdogConfig::default(),
            trigger.clone(),
        ));
        watchdog.start().unwrap();
        watchdog.stop();

        for _ in 0..5 {
            watchdog.record_failure();
        }
        tokio::time::sleep(secs(61)).await;

        assert_eq!(watchdog.failure_count(), 0);
        assert!(trigger.calls().is_empty());
    }
}
