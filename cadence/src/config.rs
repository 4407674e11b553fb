//! Cadence configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::scheduler::SchedulerConfig;

/// Project-local config file, relative to the working directory
const LOCAL_CONFIG: &str = ".cadence.yml";

/// Main Cadence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where keys and contexts are read from
    pub sources: SourcesConfig,

    /// Cooldown, delay and concurrency settings
    pub schedule: SchedulerConfig,

    /// Program run for each attempt
    pub executor: ExecutorConfig,

    /// Periodic status reporting
    pub monitor: MonitorConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.executor.program.trim().is_empty() {
            return Err(eyre::eyre!(
                "No executor program configured. Set executor.program in the config file."
            ));
        }
        if self.monitor.interval_secs == 0 {
            return Err(eyre::eyre!("monitor.interval-secs must be positive"));
        }
        self.schedule
            .validate()
            .map_err(|e| eyre::eyre!("Invalid schedule config: {}", e))
    }

    /// Load configuration
    ///
    /// An explicit path must load. Otherwise the first readable file from
    /// [`Config::search_paths`] wins; unreadable candidates are logged and
    /// skipped, and with none left the defaults apply.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        debug!(?config_path, "Config::load: called");
        if let Some(path) = config_path {
            return Self::load_from_file(path).with_context(|| format!("Failed to load config from {}", path.display()));
        }
        Self::load_first(&Self::search_paths())
    }

    /// Config files tried in order when no path is given
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("cadence").join("cadence.yml"));
        }
        paths
    }

    fn load_first(candidates: &[PathBuf]) -> Result<Self> {
        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => {
                    info!(path = %path.display(), "Loaded config");
                    return Ok(config);
                }
                Err(e) => warn!(path = %path.display(), error = %format!("{e:#}"), "Skipping unreadable config"),
            }
        }
        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}

/// Directory for logs and the status file (~/.local/share/cadence on Linux)
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cadence"))
        .unwrap_or_else(|| PathBuf::from(".cadence"))
}

/// Log file written by the daemon
pub fn log_path() -> PathBuf {
    data_dir().join("logs").join("cadence.log")
}

/// Key and context source files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// One key per line
    #[serde(rename = "keys-file")]
    pub keys_file: PathBuf,

    /// One execution context per line, assigned to keys round-robin
    #[serde(rename = "contexts-file")]
    pub contexts_file: PathBuf,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            keys_file: PathBuf::from("tokens.txt"),
            contexts_file: PathBuf::from("user_agents.txt"),
        }
    }
}

/// Attempt executor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Program run once per attempt
    pub program: String,

    /// Arguments passed to the program
    pub args: Vec<String>,
}

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between status reports
    #[serde(rename = "interval-secs")]
    pub interval_secs: u64,

    /// JSON status file rewritten on every report
    #[serde(rename = "status-file")]
    pub status_file: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            status_file: data_dir().join("status.json"),
        }
    }
}
