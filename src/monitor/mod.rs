//! Out-of-process log monitor
//!
//! Tails the gateway's error log and applies the same threshold, window and
//! cooldown rules as [`RecoveryTracker`](crate::recovery::RecoveryTracker),
//! but from a separate process so it still acts when the gateway itself is
//! wedged. Restart statistics are persisted so the cooldown survives
//! restarts of the monitor.

mod matcher;
mod stats;
mod stream;
pub mod tail;

pub use matcher::{DEFAULT_PATTERN, LogMatcher};
pub use stats::WatchdogStats;
pub use stream::LineStream;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Deserialize;

use crate::error::Result;
use crate::restart::{RestartTrigger, ServiceLookup};
use crate::util::call_guarded;

/// How often `last_check` is refreshed while the log is quiet
const HEARTBEAT: Duration = Duration::from_secs(60);

/// Configuration for the log monitor
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Log file to follow
    pub log_path: PathBuf,
    /// Where restart statistics are kept
    pub stats_path: PathBuf,
    /// Regex for qualifying lines
    pub pattern: String,
    pub poll_interval_ms: u64,
    /// Process lines already in the log when the monitor starts
    pub from_start: bool,
    pub error_threshold: u32,
    pub sliding_window_secs: i64,
    pub cooldown_secs: i64,
    pub restart_delay_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("logs/gateway.err.log"),
            stats_path: PathBuf::from("logs/watchdog.stats"),
            pattern: DEFAULT_PATTERN.to_string(),
            poll_interval_ms: 500,
            from_start: false,
            error_threshold: 3,
            sliding_window_secs: 60,
            cooldown_secs: 120,
            restart_delay_ms: 0,
        }
    }
}

/// What the monitor did with one qualifying line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    Counted { consecutive: u32 },
    CoolingDown { consecutive: u32 },
    Restart,
}

/// Counts qualifying log lines and restarts the service on sustained bursts
pub struct LogMonitor {
    config: MonitorConfig,
    label: String,
    matcher: LogMatcher,
    trigger: Arc<dyn RestartTrigger>,
    lookup: Option<Arc<dyn ServiceLookup>>,
    stats: WatchdogStats,
    consecutive: u32,
    last_error_at: Option<i64>,
}

impl LogMonitor {
    /// Build a monitor, loading any stats left by a previous run
    pub fn new(
        config: MonitorConfig,
        label: impl Into<String>,
        trigger: Arc<dyn RestartTrigger>,
    ) -> Result<Self> {
        let matcher = LogMatcher::new(&config.pattern)?;
        let stats = WatchdogStats::load(&config.stats_path);
        debug!("Loaded watchdog stats: {:?}", stats);

        Ok(Self {
            config,
            label: label.into(),
            matcher,
            trigger,
            lookup: None,
            stats,
            consecutive: 0,
            last_error_at: None,
        })
    }

    /// Log the service pid before each restart
    pub fn with_lookup(mut self, lookup: Arc<dyn ServiceLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn stats(&self) -> WatchdogStats {
        self.stats
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive
    }

    pub fn is_qualifying(&self, line: &str) -> bool {
        self.matcher.is_match(line)
    }

    /// Count one qualifying event and decide, without side effects beyond the counters
    fn evaluate_at(&mut self, now: i64) -> MonitorAction {
        if self
            .last_error_at
            .is_some_and(|last| now - last > self.config.sliding_window_secs)
        {
            debug!("EBADF burst in log expired, restarting count");
            self.consecutive = 0;
        }
        self.consecutive += 1;
        self.last_error_at = Some(now);

        if self.consecutive < self.config.error_threshold {
            return MonitorAction::Counted {
                consecutive: self.consecutive,
            };
        }

        if self.stats.last_restart > 0
            && now - self.stats.last_restart <= self.config.cooldown_secs
        {
            warn!(
                "{} EBADF lines in log, restart suppressed (last restart {}s ago)",
                self.consecutive,
                now - self.stats.last_restart
            );
            return MonitorAction::CoolingDown {
                consecutive: self.consecutive,
            };
        }

        MonitorAction::Restart
    }

    fn fire_at(&mut self, now: i64) {
        let reason = format!("{} EBADF errors in gateway log", self.consecutive);
        error!("{}, restarting {}", reason, self.label);
        let delay = Duration::from_millis(self.config.restart_delay_ms);
        call_guarded("log monitor restart", || {
            self.trigger.schedule_restart(&reason, delay)
        });

        self.consecutive = 0;
        self.stats.last_restart = now;
        self.stats.total_restarts += 1;
        self.stats.last_check = now;
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.stats.save(&self.config.stats_path) {
            warn!("Could not persist watchdog stats: {}", e);
        }
    }

    /// Record a qualifying event at `now` (epoch seconds), restarting if due
    pub fn record_event_at(&mut self, now: i64) -> MonitorAction {
        let action = self.evaluate_at(now);
        if action == MonitorAction::Restart {
            self.fire_at(now);
        }
        action
    }

    /// Feed one log line; returns `None` for lines that do not qualify
    pub async fn handle_line(&mut self, line: &str) -> Option<MonitorAction> {
        if !self.is_qualifying(line) {
            return None;
        }

        let now = Utc::now().timestamp();
        let action = self.evaluate_at(now);
        if action == MonitorAction::Restart {
            if let Some(lookup) = &self.lookup {
                match lookup.lookup_pid(&self.label).await {
                    Ok(Some(pid)) => info!("{} is running as pid {}", self.label, pid),
                    Ok(None) => info!("{} has no running process", self.label),
                    Err(e) => warn!("Could not look up {}: {}", self.label, e),
                }
            }
            self.fire_at(now);
        }
        Some(action)
    }

    /// Refresh `last_check` and persist it
    pub fn touch(&mut self) {
        self.stats.last_check = Utc::now().timestamp();
        self.persist();
    }

    /// Process lines until the stream ends
    pub async fn run(&mut self, mut lines: LineStream) -> Result<()> {
        info!(
            "Monitoring {} for {} (threshold {}, window {}s, cooldown {}s, {} restarts so far)",
            self.config.log_path.display(),
            self.label,
            self.config.error_threshold,
            self.config.sliding_window_secs,
            self.config.cooldown_secs,
            self.stats.total_restarts
        );
        self.touch();

        let mut heartbeat = tokio::time::interval(HEARTBEAT);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                line = lines.next() => match line {
                    Some(line) => {
                        if let Some(action) = self.handle_line(&line).await {
                            debug!("Qualifying log line ({:?}): {}", action, line);
                        }
                    }
                    None => break,
                },
                _ = heartbeat.tick() => self.touch(),
            }
        }

        info!("Log stream for {} ended", self.label);
        self.touch();
        Ok(())
    }
}
