use std::time::Duration;

use log::debug;
use tokio::process::{Child, Command as TokioCommand};
use tokio::time::timeout;

use crate::process::{ProcessError, ProcessResult, SpawnOptions};

/// Build a tokio command from an argument vector and spawn options
///
/// `argv` must be non-empty; the caller validates it.
pub(crate) fn build_command(program: &str, args: &[String], options: &SpawnOptions) -> TokioCommand {
    let mut cmd = TokioCommand::new(program);
    cmd.args(args);

    if let Some(dir) = &options.current_dir {
        cmd.current_dir(dir);
    }

    if let Some(env) = &options.env {
        cmd.envs(env);
    }

    let [stdin, stdout, stderr] = options.stdio;
    cmd.stdin(stdin.to_stdio());
    cmd.stdout(stdout.to_stdio());
    cmd.stderr(stderr.to_stdio());

    #[cfg(unix)]
    if options.detached {
        cmd.process_group(0);
    }

    cmd
}

/// Handle to a running process
#[derive(Debug)]
pub struct ProcessHandle {
    /// Child process
    child: Child,

    /// Program name
    program: String,

    /// Pid reported at spawn time
    pid: Option<u32>,
}

impl ProcessHandle {
    pub(crate) fn new(child: Child, program: impl Into<String>) -> Self {
        let pid = child.id();
        Self {
            child,
            program: program.into(),
            pid,
        }
    }

    /// Pid the OS assigned at spawn time
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get a reference to the child process
    pub fn child(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Wait for the process to exit with a timeout
    pub async fn wait_with_timeout(
        &mut self,
        timeout_duration: Duration,
    ) -> ProcessResult<std::process::ExitStatus> {
        match timeout(timeout_duration, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("[{}] exited with {}", self.program, status);
                Ok(status)
            }
            Ok(Err(e)) => Err(ProcessError::Wait(e)),
            Err(_) => Err(ProcessError::Timeout(timeout_duration)),
        }
    }

    /// Kill the process
    pub async fn kill(&mut self) -> ProcessResult<()> {
        self.child
            .kill()
            .await
            .map_err(|e| ProcessError::ProcessKilled(format!("Failed to kill process: {}", e)))
    }
}
