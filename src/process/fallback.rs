use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Deserialize;

use crate::process::launcher::split_argv;
use crate::process::{
    ErrorCode, Launcher, OptionOverrides, ProcessError, ProcessResult, SpawnAttempt,
    SpawnOptions, StdioMode,
};
use crate::recovery::RecoveryTracker;
use crate::util::call_guarded;

/// Receives the outcome of every launch attempt
pub trait SpawnObserver: Send + Sync {
    fn on_failure(&self);
    fn on_success(&self);
}

/// Side channel invoked before moving to the next fallback tier
///
/// May borrow from the caller for the duration of one spawn.
pub type OnFallback<'a> = dyn Fn(&ProcessError, &FallbackTier) + Send + Sync + 'a;

/// An alternative launch configuration tried after a retryable failure
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FallbackTier {
    pub label: String,
    #[serde(default)]
    pub options: OptionOverrides,
}

impl FallbackTier {
    pub fn new(label: impl Into<String>, options: OptionOverrides) -> Self {
        Self {
            label: label.into(),
            options,
        }
    }
}

/// Ordered fallback tiers plus the error codes that allow moving to the next one
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FallbackPlan {
    pub fallbacks: Vec<FallbackTier>,
    pub retryable_codes: HashSet<ErrorCode>,
}

impl Default for FallbackPlan {
    fn default() -> Self {
        Self::new(Self::default_tiers())
    }
}

impl FallbackPlan {
    /// Plan with the given tiers that retries on EBADF only
    pub fn new(fallbacks: Vec<FallbackTier>) -> Self {
        Self {
            fallbacks,
            retryable_codes: HashSet::from([ErrorCode::ebadf()]),
        }
    }

    /// A single attempt, no retries
    pub fn single() -> Self {
        Self::new(Vec::new())
    }

    pub fn retry_on(mut self, code: impl Into<ErrorCode>) -> Self {
        self.retryable_codes.insert(code.into());
        self
    }

    /// Tiers ordered from least to most conservative
    pub fn default_tiers() -> Vec<FallbackTier> {
        vec![
            FallbackTier::new(
                "safe-stdin",
                OptionOverrides {
                    stdio: Some([StdioMode::Ignore, StdioMode::Piped, StdioMode::Piped]),
                    ..Default::default()
                },
            ),
            FallbackTier::new(
                "no-detach",
                OptionOverrides {
                    stdio: Some([StdioMode::Ignore, StdioMode::Piped, StdioMode::Piped]),
                    detached: Some(false),
                    ..Default::default()
                },
            ),
            FallbackTier::new(
                "null-stdio",
                OptionOverrides {
                    stdio: Some([StdioMode::Ignore; 3]),
                    detached: Some(false),
                    ..Default::default()
                },
            ),
        ]
    }

    fn is_retryable(&self, err: &ProcessError) -> bool {
        err.code()
            .is_some_and(|code| self.retryable_codes.contains(code))
    }

    /// Attempt 0 uses `base` as is; attempt i uses `base` merged with tier i-1
    pub fn attempts(&self, argv: &[String], base: &SpawnOptions) -> Vec<SpawnAttempt> {
        std::iter::once(SpawnAttempt {
            argv: argv.to_vec(),
            options: base.clone(),
            label: None,
        })
        .chain(self.fallbacks.iter().map(|tier| SpawnAttempt {
            argv: argv.to_vec(),
            options: base.merged(&tier.options),
            label: Some(tier.label.clone()),
        }))
        .collect()
    }
}

/// A started process and the tier that started it
#[derive(Debug)]
pub struct SpawnSuccess<H> {
    pub handle: H,
    pub used_fallback: bool,
    pub fallback_label: Option<String>,
    /// Launch calls made, including the successful one
    pub attempts: usize,
}

/// Launches with progressively more conservative options on retryable failures
pub struct FallbackSpawner<L: Launcher> {
    launcher: L,
    recovery: Option<Arc<RecoveryTracker>>,
    observers: Vec<Arc<dyn SpawnObserver>>,
}

impl<L: Launcher> FallbackSpawner<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            recovery: None,
            observers: Vec::new(),
        }
    }

    /// Report EBADF failures and clean spawns to `tracker`
    pub fn with_recovery(mut self, tracker: Arc<RecoveryTracker>) -> Self {
        self.recovery = Some(tracker);
        self
    }

    /// Report every attempt outcome to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn SpawnObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    fn notify_failure(&self) {
        for observer in &self.observers {
            call_guarded("spawn failure observer", || observer.on_failure());
        }
    }

    fn notify_success(&self) {
        for observer in &self.observers {
            call_guarded("spawn success observer", || observer.on_success());
        }
    }

    /// Launch `argv`, walking the plan's fallback tiers on retryable failures
    ///
    /// Returns the final error once the tiers are exhausted or a failure is
    /// not retryable. An EBADF failure is reported to the recovery tracker
    /// even when no tier is left. The tracker is only reset by a success
    /// when no EBADF was seen during this call.
    pub async fn spawn_with_fallback(
        &self,
        argv: &[String],
        base: &SpawnOptions,
        plan: &FallbackPlan,
        on_fallback: Option<&OnFallback<'_>>,
    ) -> ProcessResult<SpawnSuccess<L::Handle>> {
        let (program, _) = split_argv(argv)?;
        let attempts = plan.attempts(argv, base);
        let mut saw_ebadf = false;
        let mut index = 0;

        loop {
            let attempt = &attempts[index];
            match self.launcher.launch(&attempt.argv, &attempt.options).await {
                Ok(handle) => {
                    self.notify_success();
                    if !saw_ebadf {
                        if let Some(recovery) = &self.recovery {
                            recovery.reset();
                        }
                    }

                    if let Some(label) = &attempt.label {
                        info!("{} started using fallback '{}'", program, label);
                    } else {
                        debug!("{} started", program);
                    }

                    return Ok(SpawnSuccess {
                        handle,
                        used_fallback: index > 0,
                        fallback_label: attempt.label.clone(),
                        attempts: index + 1,
                    });
                }
                Err(err) => {
                    if err.is_ebadf() {
                        saw_ebadf = true;
                        if let Some(recovery) = &self.recovery {
                            recovery.record_error();
                        }
                    }
                    self.notify_failure();

                    let next = match plan.fallbacks.get(index) {
                        Some(tier) if plan.is_retryable(&err) => tier,
                        _ => {
                            warn!(
                                "Spawning {} failed after {} attempt(s): {}",
                                program,
                                index + 1,
                                err
                            );
                            return Err(err);
                        }
                    };

                    warn!(
                        "Spawning {} failed ({}), retrying with fallback '{}'",
                        program, err, next.label
                    );
                    if let Some(on_fallback) = on_fallback {
                        call_guarded("fallback observer", || on_fallback(&err, next));
                    }
                    index += 1;
                }
            }
        }
    }
}
