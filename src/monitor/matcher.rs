use regex::Regex;

use crate::error::{Result, SupervisorError};

/// Pattern for log lines reporting the bad-file-descriptor condition
pub const DEFAULT_PATTERN: &str = r"(?i)bad file descriptor|\bebadf\b";

/// Classifies log lines as qualifying EBADF events
#[derive(Debug, Clone)]
pub struct LogMatcher {
    pattern: Regex,
}

impl LogMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            SupervisorError::Config(format!("Invalid log pattern {}: {}", pattern, e))
        })?;
        Ok(Self { pattern })
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }
}
