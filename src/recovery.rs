//! EBADF escalation tracker
//!
//! Counts consecutive bad-file-descriptor spawn failures and runs a recovery
//! callback once a burst reaches the threshold. Two windows are involved:
//! the sliding window decides whether a new error continues the current
//! burst, and the cooldown limits how often the callback may fire.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;

use crate::util::call_guarded;

/// Callback run when the tracker decides a recovery is needed
pub type RecoveryCallback = Arc<dyn Fn() + Send + Sync>;

/// Thresholds for [`RecoveryTracker`]
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Consecutive qualifying errors needed to fire
    pub error_threshold: u32,

    /// A gap longer than this between two errors starts a new burst
    pub sliding_window: Duration,

    /// Minimum time between two firings
    pub cooldown: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            error_threshold: 3,
            sliding_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(120),
        }
    }
}

/// Counters kept by a [`RecoveryTracker`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryState {
    pub consecutive_errors: u32,
    pub last_error_at: Option<Instant>,
    pub last_recovery_at: Option<Instant>,
}

/// What a call to [`RecoveryTracker::record_error`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Below threshold
    Counted { consecutive: u32 },
    /// Threshold reached but the last firing is too recent
    CoolingDown { consecutive: u32 },
    /// Threshold reached but no callback is registered
    NoCallback { consecutive: u32 },
    /// Callback ran and the count was reset
    Fired,
}

struct Inner {
    state: RecoveryState,
    callback: Option<RecoveryCallback>,
}

/// Consecutive EBADF counter with threshold, window and cooldown
pub struct RecoveryTracker {
    config: RecoveryConfig,
    inner: Mutex<Inner>,
}

impl RecoveryTracker {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: RecoveryState::default(),
                callback: None,
            }),
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the recovery callback; `None` stops firing but keeps the counters
    pub fn set_recovery_callback(&self, callback: Option<RecoveryCallback>) {
        self.lock().callback = callback;
    }

    /// Record one qualifying error
    pub fn record_error(&self) -> RecoveryDecision {
        self.record_error_at(Instant::now())
    }

    pub fn record_error_at(&self, now: Instant) -> RecoveryDecision {
        let (decision, callback) = {
            let mut inner = self.lock();
            let state = &mut inner.state;

            if let Some(last) = state.last_error_at {
                if now.saturating_duration_since(last) > self.config.sliding_window
                    && state.consecutive_errors > 0
                {
                    debug!(
                        "EBADF burst expired after {:?}, restarting count",
                        now.saturating_duration_since(last)
                    );
                    state.consecutive_errors = 0;
                }
            }

            state.consecutive_errors += 1;
            state.last_error_at = Some(now);
            let consecutive = state.consecutive_errors;

            if consecutive < self.config.error_threshold {
                debug!(
                    "EBADF error {}/{}",
                    consecutive, self.config.error_threshold
                );
                (RecoveryDecision::Counted { consecutive }, None)
            } else if state
                .last_recovery_at
                .is_some_and(|at| now.saturating_duration_since(at) <= self.config.cooldown)
            {
                warn!(
                    "{} consecutive EBADF errors, recovery suppressed by cooldown ({:?})",
                    consecutive, self.config.cooldown
                );
                (RecoveryDecision::CoolingDown { consecutive }, None)
            } else {
                match inner.callback.clone() {
                    None => {
                        warn!(
                            "{} consecutive EBADF errors but no recovery callback registered",
                            consecutive
                        );
                        (RecoveryDecision::NoCallback { consecutive }, None)
                    }
                    Some(callback) => {
                        inner.state.last_recovery_at = Some(now);
                        inner.state.consecutive_errors = 0;
                        (RecoveryDecision::Fired, Some(callback))
                    }
                }
            }
        };

        // The lock is released so the callback may call back into the tracker
        if let Some(callback) = callback {
            info!("EBADF threshold reached, triggering recovery");
            call_guarded("EBADF recovery", || callback());
        }

        decision
    }

    /// Zero the consecutive count after a clean spawn
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.state.consecutive_errors > 0 {
            debug!(
                "Clearing {} consecutive EBADF errors",
                inner.state.consecutive_errors
            );
        }
        inner.state.consecutive_errors = 0;
    }

    /// Drop all counters and timestamps, keeping the callback
    pub fn clear(&self) {
        self.lock().state = RecoveryState::default();
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.lock().state.consecutive_errors
    }

    pub fn snapshot(&self) -> RecoveryState {
        self.lock().state.clone()
    }
}

impl Default for RecoveryTracker {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_tracker() -> (RecoveryTracker, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let tracker = RecoveryTracker::default();
        let counter = Arc::clone(&fired);
        tracker.set_recovery_callback(Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        (tracker, fired)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_below_threshold_never_fires() {
        let (tracker, fired) = counting_tracker();
        let t0 = Instant::now();

        assert_eq!(
            tracker.record_error_at(t0),
            RecoveryDecision::Counted { consecutive: 1 }
        );
        assert_eq!(
            tracker.record_error_at(t0 + secs(1)),
            RecoveryDecision::Counted { consecutive: 2 }
        );
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        assert_eq!(tracker.record_error_at(t0 + secs(2)), RecoveryDecision::Fired);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.consecutive_errors(), 0);
        assert_eq!(tracker.snapshot().last_recovery_at, Some(t0 + secs(2)));
    }

    #[test]
    fn test_reset_splits_bursts() {
        let (tracker, fired) = counting_tracker();
        let t0 = Instant::now();

        tracker.record_error_at(t0);
        tracker.record_error_at(t0 + secs(1));
        tracker.reset();
        tracker.record_error_at(t0 + secs(2));
        tracker.record_error_at(t0 + secs(3));

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.consecutive_errors(), 2);
    }

    #[test]
    fn test_cooldown_allows_one_firing() {
        let (tracker, fired) = counting_tracker();
        let t0 = Instant::now();

        for i in 0..3 {
            tracker.record_error_at(t0 + secs(i));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Second burst 30s later, well inside the 120s cooldown
        tracker.record_error_at(t0 + secs(30));
        tracker.record_error_at(t0 + secs(31));
        assert_eq!(
            tracker.record_error_at(t0 + secs(32)),
            RecoveryDecision::CoolingDown { consecutive: 3 }
        );
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Cooldown is measured from the firing at t0+2, not from the last error
        tracker.record_error_at(t0 + secs(121));
        tracker.record_error_at(t0 + secs(122));
        assert_eq!(tracker.record_error_at(t0 + secs(123)), RecoveryDecision::Fired);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_window_expiry_starts_fresh_count() {
        let (tracker, fired) = counting_tracker();
        let t0 = Instant::now();

        tracker.record_error_at(t0);
        tracker.record_error_at(t0 + secs(10));
        assert_eq!(
            tracker.record_error_at(t0 + secs(71)),
            RecoveryDecision::Counted { consecutive: 1 }
        );
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_gap_exactly_at_window_continues_burst() {
        let (tracker, fired) = counting_tracker();
        let t0 = Instant::now();

        tracker.record_error_at(t0);
        tracker.record_error_at(t0 + secs(60));
        tracker.record_error_at(t0 + secs(120));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_callback_keeps_counting() {
        let tracker = RecoveryTracker::default();
        let t0 = Instant::now();

        for i in 0..3 {
            tracker.record_error_at(t0 + secs(i));
        }
        assert_eq!(
            tracker.record_error_at(t0 + secs(3)),
            RecoveryDecision::NoCallback { consecutive: 4 }
        );
        assert_eq!(tracker.snapshot().last_recovery_at, None);
    }

    #[test]
    fn test_disabling_callback_keeps_counters() {
        let (tracker, fired) = counting_tracker();
        let t0 = Instant::now();

        tracker.record_error_at(t0);
        tracker.record_error_at(t0 + secs(1));
        tracker.set_recovery_callback(None);
        tracker.record_error_at(t0 + secs(2));

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.consecutive_errors(), 3);
    }

    #[test]
    fn test_panicking_callback_still_counts_as_fired() {
        fn failing_restart() {
            panic!("launchctl unavailable");
        }
        let tracker = RecoveryTracker::default();
        tracker.set_recovery_callback(Some(Arc::new(failing_restart)));
        let t0 = Instant::now();

        tracker.record_error_at(t0);
        tracker.record_error_at(t0 + secs(1));
        assert_eq!(tracker.record_error_at(t0 + secs(2)), RecoveryDecision::Fired);

        let state = tracker.snapshot();
        assert_eq!(state.consecutive_errors, 0);
        assert_eq!(state.last_recovery_at, Some(t0 + secs(2)));
    }

    #[test]
    fn test_callback_may_reenter_tracker() {
        let tracker = Arc::new(RecoveryTracker::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let (inner, seen_clone) = (Arc::downgrade(&tracker), Arc::clone(&seen));
        tracker.set_recovery_callback(Some(Arc::new(move || {
            if let Some(tracker) = inner.upgrade() {
                seen_clone.store(tracker.consecutive_errors() as usize + 10, Ordering::SeqCst);
            }
        })));
        let t0 = Instant::now();

        for i in 0..3 {
            tracker.record_error_at(t0 + secs(i));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_clear_drops_cooldown() {
        let (tracker, fired) = counting_tracker();
        let t0 = Instant::now();

        for i in 0..3 {
            tracker.record_error_at(t0 + secs(i));
        }
        tracker.clear();
        for i in 3..6 {
            tracker.record_error_at(t0 + secs(i));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
