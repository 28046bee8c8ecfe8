//! OS service-manager collaborators
//!
//! Restarts and pid lookups go through `launchctl` on macOS and through
//! `systemctl --user` elsewhere. Installing the service registration is not
//! handled here.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

use crate::error::{Result, SupervisorError};
use crate::restart::{RestartTrigger, ServiceLookup};
use crate::retry::{RetryConfig, execute_with_retry_if};

/// Service manager that owns the supervised service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceManager {
    Launchd,
    Systemd,
}

impl Default for ServiceManager {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            ServiceManager::Launchd
        } else {
            ServiceManager::Systemd
        }
    }
}

#[cfg(unix)]
fn gui_domain() -> String {
    format!("gui/{}", nix::unistd::getuid())
}

#[cfg(not(unix))]
fn gui_domain() -> String {
    "gui".to_string()
}

impl ServiceManager {
    /// Program and arguments that restart `label`
    pub fn restart_command(&self, label: &str) -> (String, Vec<String>) {
        match self {
            ServiceManager::Launchd => (
                "launchctl".to_string(),
                vec![
                    "kickstart".to_string(),
                    "-k".to_string(),
                    format!("{}/{}", gui_domain(), label),
                ],
            ),
            ServiceManager::Systemd => (
                "systemctl".to_string(),
                vec!["--user".to_string(), "restart".to_string(), label.to_string()],
            ),
        }
    }

    /// Program and arguments that report the pid of `label`
    pub fn lookup_command(&self, label: &str) -> (String, Vec<String>) {
        match self {
            ServiceManager::Launchd => (
                "launchctl".to_string(),
                vec!["list".to_string(), label.to_string()],
            ),
            ServiceManager::Systemd => (
                "systemctl".to_string(),
                vec![
                    "--user".to_string(),
                    "show".to_string(),
                    "-p".to_string(),
                    "MainPID".to_string(),
                    "--value".to_string(),
                    label.to_string(),
                ],
            ),
        }
    }

    /// Extract the pid from the lookup command's output
    pub fn parse_pid(&self, output: &str) -> Option<u32> {
        match self {
            // `launchctl list <label>` prints a plist-ish dictionary: "PID" = 1234;
            ServiceManager::Launchd => output.lines().find_map(|line| {
                let (key, value) = line.trim().split_once('=')?;
                if key.trim() != "\"PID\"" {
                    return None;
                }
                value.trim().trim_end_matches(';').trim().parse().ok()
            }),
            // MainPID is 0 when the unit is not running
            ServiceManager::Systemd => output
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|pid| *pid != 0),
        }
    }
}

/// Failure of one service-manager invocation
#[derive(Debug, Error)]
enum CommandError {
    #[error("could not run {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

impl CommandError {
    /// Whether repeating the same command could succeed
    fn is_transient(&self, manager: ServiceManager) -> bool {
        match self {
            CommandError::Launch { source, .. } => !matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            CommandError::Exit { status, .. } => status
                .code()
                .is_none_or(|code| !manager.is_permanent_exit(code)),
        }
    }
}

impl From<CommandError> for SupervisorError {
    fn from(err: CommandError) -> Self {
        SupervisorError::Restart(err.to_string())
    }
}

impl ServiceManager {
    /// Exit codes meaning the service is unknown to the manager
    fn is_permanent_exit(&self, code: i32) -> bool {
        match self {
            // "Could not find service"
            ServiceManager::Launchd => code == 113,
            // LSB "program not installed", and older "unit not loaded"
            ServiceManager::Systemd => matches!(code, 4 | 5),
        }
    }
}

/// Run a service-manager command, returning stdout on success
async fn run_command(program: &str, args: &[String]) -> std::result::Result<String, CommandError> {
    debug!("Running {} {:?}", program, args);
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| CommandError::Launch {
            program: program.to_string(),
            source,
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(CommandError::Exit {
            program: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// [`RestartTrigger`] that asks the service manager to restart the service
#[derive(Debug, Clone)]
pub struct ServiceRestarter {
    manager: ServiceManager,
    label: String,
    retry: RetryConfig,
}

impl ServiceRestarter {
    pub fn new(manager: ServiceManager, label: impl Into<String>) -> Self {
        Self {
            manager,
            label: label.into(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl RestartTrigger for ServiceRestarter {
    fn schedule_restart(&self, reason: &str, delay: Duration) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot schedule restart of {} ({}): {}", self.label, reason, e);
                return;
            }
        };

        let (program, args) = self.manager.restart_command(&self.label);
        let label = self.label.clone();
        let reason = reason.to_string();
        let retry = self.retry.clone();
        let manager = self.manager;

        info!(
            "Scheduling restart of {} in {:?}: {}",
            label, delay, reason
        );

        runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let context = format!("Restarting {} via {}", label, program);
            let restart = execute_with_retry_if(
                || run_command(&program, &args),
                retry,
                &context,
                |err: &CommandError| err.is_transient(manager),
            );
            match restart.await {
                Ok(_) => info!("Restart of {} requested ({})", label, reason),
                Err(e) => error!("Restart of {} failed: {}", label, e),
            }
        });
    }
}

/// [`ServiceLookup`] backed by the service manager's CLI
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceManagerLookup {
    manager: ServiceManager,
}

impl ServiceManagerLookup {
    pub fn new(manager: ServiceManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ServiceLookup for ServiceManagerLookup {
    async fn lookup_pid(&self, label: &str) -> Result<Option<u32>> {
        let (program, args) = self.manager.lookup_command(label);
        match run_command(&program, &args).await {
            Ok(output) => Ok(self.manager.parse_pid(&output)),
            // launchctl exits non-zero for unknown labels
            Err(err @ CommandError::Exit { .. }) => {
                warn!("Service {} not found: {}", label, err);
                Ok(None)
            }
            Err(err) => Err(SupervisorError::from(err).into()),
        }
    }
}
