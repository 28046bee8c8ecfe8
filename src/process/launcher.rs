use async_trait::async_trait;
use log::{debug, trace};

use crate::process::command::{ProcessHandle, build_command};
use crate::process::{ProcessError, ProcessResult, SpawnOptions};

/// Backend that starts one child process per call
///
/// Implementations must not retry; fallback handling lives in
/// [`FallbackSpawner`](crate::process::FallbackSpawner).
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// Handle returned for a started process
    type Handle: Send;

    /// Start `argv[0]` with the remaining arguments, resolving once the OS has
    /// confirmed the start or refused it
    async fn launch(&self, argv: &[String], options: &SpawnOptions) -> ProcessResult<Self::Handle>;
}

/// Split an argument vector into program and arguments
pub(crate) fn split_argv(argv: &[String]) -> ProcessResult<(&str, &[String])> {
    match argv.split_first() {
        Some((program, args)) if !program.is_empty() => Ok((program.as_str(), args)),
        Some(_) => Err(ProcessError::Configuration("program name is empty".to_string())),
        None => Err(ProcessError::Configuration("argv is empty".to_string())),
    }
}

/// Launcher backed by `tokio::process`
///
/// `spawn` only returns a child after exec succeeded, so a returned child is
/// a confirmed start. A child without a pid has already been reaped, which
/// still means it started.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

#[async_trait]
impl Launcher for TokioLauncher {
    type Handle = ProcessHandle;

    async fn launch(&self, argv: &[String], options: &SpawnOptions) -> ProcessResult<ProcessHandle> {
        let (program, args) = split_argv(argv)?;
        debug!("Spawning command: {} {:?}", program, args);
        trace!("Spawn options: {:?}", options);

        let child = build_command(program, args, options)
            .spawn()
            .map_err(|e| ProcessError::startup(program, e))?;

        let handle = ProcessHandle::new(child, program);
        debug!("Started {} (pid {:?})", program, handle.pid());
        Ok(handle)
    }
}
