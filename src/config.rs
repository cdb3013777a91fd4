use crate::format::OutputFormat;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// User defaults. Command-line flags take precedence over every field.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Output format when `--format` is not given and stdout is a terminal.
    pub format: Option<OutputFormat>,
    pub hide_thinking: Option<bool>,
    pub hide_tool_results: Option<bool>,
    pub show_metadata: Option<bool>,
    pub line_numbers: Option<bool>,
    /// Watch mode poll interval in milliseconds.
    /// Default: 250
    pub poll_interval_ms: Option<u64>,
    /// Exclude patterns applied before any given on the command line.
    /// Example: ["^\\s*$", "Caveat:"]
    pub exclude: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from ~/.config/ccstream/config.toml
    ///
    /// - File missing: returns default config (Ok)
    /// - File exists but invalid TOML: returns Err so caller can show warning
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path, with the same rules as
    /// [`Config::load`].
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Poll interval; zero or missing falls back to the default.
    pub fn poll_interval(&self) -> Duration {
        let ms = self
            .poll_interval_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        Duration::from_millis(ms)
    }

    pub fn exclude_patterns(&self) -> &[String] {
        self.exclude.as_deref().unwrap_or_default()
    }

    fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|d| d.join(".config").join("ccstream").join("config.toml"))
    }
}
