use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use serde::Deserialize;

/// Disposition of one of the child's standard streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioMode {
    /// Share the parent's stream
    Inherit,
    /// Connect the stream to a pipe owned by the handle
    #[serde(rename = "pipe")]
    Piped,
    /// Connect the stream to the null device
    Ignore,
}

impl StdioMode {
    pub fn to_stdio(self) -> Stdio {
        match self {
            StdioMode::Inherit => Stdio::inherit(),
            StdioMode::Piped => Stdio::piped(),
            StdioMode::Ignore => Stdio::null(),
        }
    }
}

/// I/O and environment configuration for one launch
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpawnOptions {
    /// stdin, stdout, stderr
    pub stdio: [StdioMode; 3],

    /// Extra environment variables; `None` leaves the inherited environment alone
    pub env: Option<HashMap<String, String>>,

    /// Working directory for the child
    pub current_dir: Option<PathBuf>,

    /// Start the child in its own process group
    pub detached: bool,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            stdio: [StdioMode::Inherit; 3],
            env: None,
            current_dir: None,
            detached: false,
        }
    }
}

impl SpawnOptions {
    pub fn stdio(mut self, stdin: StdioMode, stdout: StdioMode, stderr: StdioMode) -> Self {
        self.stdio = [stdin, stdout, stderr];
        self
    }

    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), val.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    /// Shallow merge: every field the overrides set replaces ours wholesale
    pub fn merged(&self, overrides: &OptionOverrides) -> SpawnOptions {
        SpawnOptions {
            stdio: overrides.stdio.unwrap_or(self.stdio),
            env: match &overrides.env {
                Some(env) => Some(env.clone()),
                None => self.env.clone(),
            },
            current_dir: match &overrides.current_dir {
                Some(dir) => Some(dir.clone()),
                None => self.current_dir.clone(),
            },
            detached: overrides.detached.unwrap_or(self.detached),
        }
    }
}

/// Partial [`SpawnOptions`] applied on top of the base options by a fallback tier
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct OptionOverrides {
    pub stdio: Option<[StdioMode; 3]>,
    pub env: Option<HashMap<String, String>>,
    pub current_dir: Option<PathBuf>,
    pub detached: Option<bool>,
}

/// One launch in a spawn sequence
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnAttempt {
    pub argv: Vec<String>,
    pub options: SpawnOptions,
    /// Fallback tier this attempt belongs to; `None` for the first attempt
    pub label: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_override_wins() {
        let base = SpawnOptions::default().detached(true).current_dir("/srv/gateway");
        let overrides = OptionOverrides {
            stdio: Some([StdioMode::Ignore, StdioMode::Piped, StdioMode::Piped]),
            detached: Some(false),
            ..Default::default()
        };

        let merged = base.merged(&overrides);
        assert_eq!(
            merged.stdio,
            [StdioMode::Ignore, StdioMode::Piped, StdioMode::Piped]
        );
        assert!(!merged.detached);
        assert_eq!(merged.current_dir, Some(PathBuf::from("/srv/gateway")));
    }

    #[test]
    fn test_merge_replaces_env_wholesale() {
        let base = SpawnOptions::default()
            .env("GATEWAY_PORT", "18789")
            .env("NODE_ENV", "production");
        let mut env = HashMap::new();
        env.insert("NODE_ENV".to_string(), "safe".to_string());
        let overrides = OptionOverrides {
            env: Some(env),
            ..Default::default()
        };

        let merged = base.merged(&overrides);
        let env = merged.env.unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("NODE_ENV").map(String::as_str), Some("safe"));
    }

    #[test]
    fn test_empty_overrides_keep_base() {
        let base = SpawnOptions::default().stdio(
            StdioMode::Piped,
            StdioMode::Piped,
            StdioMode::Inherit,
        );
        assert_eq!(base.merged(&OptionOverrides::default()), base);
    }

    #[test]
    fn test_overrides_deserialize_from_toml() {
        let overrides: OptionOverrides =
            toml_overrides(r#"stdio = ["ignore", "pipe", "pipe"]"#);
        assert_eq!(
            overrides.stdio,
            Some([StdioMode::Ignore, StdioMode::Piped, StdioMode::Piped])
        );
        assert_eq!(overrides.detached, None);
    }

    fn toml_overrides(source: &str) -> OptionOverrides {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }
}
