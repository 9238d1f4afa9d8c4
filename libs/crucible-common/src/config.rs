// Judge configuration management
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Runtime settings for the judge.
///
/// Loaded from a JSON file, then overlaid with `CRUCIBLE_*` environment
/// variables; every field has a default so a missing file still yields a
/// usable local configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
    #[serde(default = "default_uid_min")]
    pub runner_uid_min: u32,
    #[serde(default = "default_uid_max")]
    pub runner_uid_max: u32,
    #[serde(default = "default_gid_min")]
    pub runner_gid_min: u32,
    #[serde(default = "default_gid_max")]
    pub runner_gid_max: u32,
    /// RLIMIT_NPROC handed to each child via prlimit.
    #[serde(default = "default_max_process_count")]
    pub max_process_count: u32,
    /// RLIMIT_NOFILE handed to each child via prlimit.
    #[serde(default = "default_max_open_files")]
    pub max_open_files: u32,
    /// Per-stream capture cap in bytes; a child crossing it is killed.
    #[serde(default = "default_output_max_size")]
    pub output_max_size: usize,
    #[serde(default = "default_disable_networking")]
    pub disable_networking: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Listen address for the request layer; unused by the core.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("/var/lib/crucible")
}

fn default_uid_min() -> u32 {
    1001
}

fn default_uid_max() -> u32 {
    1500
}

fn default_gid_min() -> u32 {
    1001
}

fn default_gid_max() -> u32 {
    1500
}

fn default_max_process_count() -> u32 {
    64
}

fn default_max_open_files() -> u32 {
    2048
}

fn default_output_max_size() -> usize {
    1024
}

fn default_disable_networking() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:2000".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl Settings {
    /// Load settings from a JSON file, then apply environment overrides.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .context(format!("Failed to read {}", config_path.display()))?;

        let mut settings: Settings = serde_json::from_str(&content)
            .context(format!("Failed to parse {}", config_path.display()))?;

        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from the given path, falling back to defaults when no path is
    /// given and the default location does not exist. Environment
    /// overrides apply on every branch.
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new("config/crucible.json");
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    warn!("No config file found, using built-in defaults");
                    let mut settings = Self::default();
                    settings.apply_env_overrides()?;
                    settings.validate()?;
                    Ok(settings)
                }
            }
        }
    }

    /// Overlay `CRUCIBLE_*` environment variables onto these settings.
    /// Unset variables leave the file/default value in place; set-but-bad
    /// values are configuration errors.
    fn apply_env_overrides(&mut self) -> Result<()> {
        overlay_env("CRUCIBLE_DATA_DIRECTORY", &mut self.data_directory)?;
        overlay_env("CRUCIBLE_RUNNER_UID_MIN", &mut self.runner_uid_min)?;
        overlay_env("CRUCIBLE_RUNNER_UID_MAX", &mut self.runner_uid_max)?;
        overlay_env("CRUCIBLE_RUNNER_GID_MIN", &mut self.runner_gid_min)?;
        overlay_env("CRUCIBLE_RUNNER_GID_MAX", &mut self.runner_gid_max)?;
        overlay_env("CRUCIBLE_MAX_PROCESS_COUNT", &mut self.max_process_count)?;
        overlay_env("CRUCIBLE_MAX_OPEN_FILES", &mut self.max_open_files)?;
        overlay_env("CRUCIBLE_OUTPUT_MAX_SIZE", &mut self.output_max_size)?;
        overlay_env("CRUCIBLE_DISABLE_NETWORKING", &mut self.disable_networking)?;
        overlay_env("CRUCIBLE_LOG_LEVEL", &mut self.log_level)?;
        overlay_env("CRUCIBLE_BIND_ADDRESS", &mut self.bind_address)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.runner_uid_max < self.runner_uid_min {
            bail!(
                "runner_uid_max ({}) must be >= runner_uid_min ({})",
                self.runner_uid_max,
                self.runner_uid_min
            );
        }
        if self.runner_gid_max < self.runner_gid_min {
            bail!(
                "runner_gid_max ({}) must be >= runner_gid_min ({})",
                self.runner_gid_max,
                self.runner_gid_min
            );
        }
        if self.output_max_size == 0 {
            bail!("output_max_size must be positive");
        }
        Ok(())
    }

    /// Root of per-job workspaces.
    pub fn jobs_root(&self) -> PathBuf {
        self.data_directory.join("jobs")
    }

    /// Root of the installed-package tree.
    pub fn packages_root(&self) -> PathBuf {
        self.data_directory.join("packages")
    }
}

/// Replace `slot` with the parsed value of `key` when the variable is set.
fn overlay_env<T>(key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Ok(raw) = env::var(key) {
        *slot = raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}={}: {}", key, raw, e))?;
    }
    Ok(())
}
