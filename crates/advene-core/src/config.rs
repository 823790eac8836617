//! Library configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/advene/config.toml)
//! 3. Environment variables (ADVENE_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable prefix
const ENV_PREFIX: &str = "ADVENE";

/// Library configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for package stores and packaged content roots
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Number of rows a backend iterator fetches per round-trip
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,

    /// User name recorded in bookkeeping metadata
    #[serde(default = "default_user")]
    pub user: String,

    /// Check referential preconditions in the backend before writing
    #[serde(default)]
    pub debug_checks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            fetch_batch_size: default_fetch_batch_size(),
            user: default_user(),
            debug_checks: false,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (ADVENE_DATA_DIR, ADVENE_FETCH_BATCH_SIZE,
    ///    ADVENE_USER, ADVENE_DEBUG_CHECKS)
    /// 2. Config file (~/.config/advene/config.toml or ADVENE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Configuration rooted in a given directory, without env overrides
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // ADVENE_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // ADVENE_FETCH_BATCH_SIZE (ignored unless a positive integer)
        if let Ok(val) = std::env::var(format!("{}_FETCH_BATCH_SIZE", ENV_PREFIX)) {
            if let Ok(n) = val.parse::<usize>() {
                if n > 0 {
                    self.fetch_batch_size = n;
                }
            }
        }

        // ADVENE_USER
        if let Ok(val) = std::env::var(format!("{}_USER", ENV_PREFIX)) {
            if !val.is_empty() {
                self.user = val;
            }
        }

        // ADVENE_DEBUG_CHECKS
        if let Ok(val) = std::env::var(format!("{}_DEBUG_CHECKS", ENV_PREFIX)) {
            self.debug_checks = val.eq_ignore_ascii_case("true") || val == "1";
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with ADVENE_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("advene")
            .join("config.toml")
    }

    /// Directory under which packaged content roots are created
    pub fn packaged_root_dir(&self) -> PathBuf {
        self.data_dir.join("packaged")
    }

    /// Default package store, used when the CLI is given no url
    pub fn default_package_path(&self) -> PathBuf {
        self.data_dir.join("advene.db")
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("advene")
}

fn default_fetch_batch_size() -> usize {
    64
}

fn default_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
