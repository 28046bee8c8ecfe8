use std::fmt;
use std::io;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Result type for process operations
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Machine-readable platform error code, e.g. `EBADF` or `ENOENT`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub struct ErrorCode(String);

impl ErrorCode {
    pub const EBADF: &'static str = "EBADF";

    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_ascii_uppercase())
    }

    pub fn ebadf() -> Self {
        Self::new(Self::EBADF)
    }

    /// Derive the code from an OS error, if the platform supplied one
    #[cfg(unix)]
    pub fn from_io(err: &io::Error) -> Option<Self> {
        err.raw_os_error()
            .map(|raw| Self(format!("{:?}", nix::errno::Errno::from_raw(raw))))
    }

    #[cfg(not(unix))]
    pub fn from_io(err: &io::Error) -> Option<Self> {
        err.raw_os_error().map(|raw| Self(format!("OS{}", raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_ebadf(&self) -> bool {
        self.0 == Self::EBADF
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Errors that can occur during process operations
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start `{program}`{}: {source}", code_suffix(.code))]
    Startup {
        program: String,
        code: Option<ErrorCode>,
        #[source]
        source: io::Error,
    },

    #[error("Invalid spawn request: {0}")]
    Configuration(String),

    #[error("Failed to wait for process: {0}")]
    Wait(io::Error),

    #[error("Process timed out after {0:?}")]
    Timeout(Duration),

    #[error("Process killed: {0}")]
    ProcessKilled(String),
}

fn code_suffix(code: &Option<ErrorCode>) -> String {
    match code {
        Some(code) => format!(" ({})", code),
        None => String::new(),
    }
}

impl ProcessError {
    /// Wrap a failed start call, deriving the code from the OS error
    pub fn startup(program: impl Into<String>, source: io::Error) -> Self {
        let code = ErrorCode::from_io(&source);
        ProcessError::Startup {
            program: program.into(),
            code,
            source,
        }
    }

    /// Startup failure with an explicit code, for backends that report codes
    /// without an OS errno
    pub fn startup_with_code(
        program: impl Into<String>,
        code: impl Into<ErrorCode>,
        message: impl Into<String>,
    ) -> Self {
        ProcessError::Startup {
            program: program.into(),
            code: Some(code.into()),
            source: io::Error::other(message.into()),
        }
    }

    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            ProcessError::Startup { code, .. } => code.as_ref(),
            _ => None,
        }
    }

    /// Whether this failure is the bad-file-descriptor condition
    ///
    /// Matches on the code first and falls back to the message text, since
    /// some backends only surface the description.
    pub fn is_ebadf(&self) -> bool {
        match self {
            ProcessError::Startup { code, source, .. } => {
                code.as_ref().is_some_and(ErrorCode::is_ebadf)
                    || mentions_bad_descriptor(&source.to_string())
            }
            _ => false,
        }
    }
}

fn mentions_bad_descriptor(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("ebadf") || message.contains("bad file descriptor")
}
