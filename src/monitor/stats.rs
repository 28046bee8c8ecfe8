use std::fs;
use std::io::Write;
use std::path::Path;

use log::{debug, warn};

use crate::error::{Result, SupervisorError};

/// Restart statistics kept by the log monitor across its own restarts
///
/// Stored as flat `KEY=value` lines with epoch-second timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchdogStats {
    pub last_restart: i64,
    pub total_restarts: u64,
    pub last_check: i64,
}

impl WatchdogStats {
    /// Parse the stats text; `None` if any line is malformed
    pub fn parse(text: &str) -> Option<Self> {
        let mut stats = WatchdogStats::default();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            match key.trim() {
                "LAST_RESTART" => stats.last_restart = value.parse().ok()?,
                "TOTAL_RESTARTS" => stats.total_restarts = value.parse().ok()?,
                "LAST_CHECK" => stats.last_check = value.parse().ok()?,
                other => debug!("Ignoring unknown stats key {}", other),
            }
        }
        Some(stats)
    }

    pub fn render(&self) -> String {
        format!(
            "LAST_RESTART={}\nTOTAL_RESTARTS={}\nLAST_CHECK={}\n",
            self.last_restart, self.total_restarts, self.last_check
        )
    }

    /// Load stats, treating a missing or corrupt file as no prior stats
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).unwrap_or_else(|| {
                warn!("Ignoring corrupt watchdog stats in {}", path.display());
                Self::default()
            }),
            Err(e) => {
                debug!("No watchdog stats at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write the stats through a temporary file so readers never see half a record
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(self.render().as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        };
        write().map_err(|e| {
            SupervisorError::Stats(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}
