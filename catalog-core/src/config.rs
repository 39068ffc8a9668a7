//! Configuration management for the catalog engine.
//!
//! Loads configuration from a TOML file with environment variable overrides.

use crate::utils::errors::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root for the control store, index databases, archive and sessions
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Seed for the process-wide inline checkpointing setting
    #[serde(default)]
    pub inline: bool,

    /// Attempts per snapshot/restore/synthesis sub-step
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// zstd level for archive objects
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Cycles kept for entities created without an explicit policy
    #[serde(default = "default_retention_cycles")]
    pub default_cycles: u32,

    /// Cron expression for the data-aging run (seconds field first)
    #[serde(default = "default_data_aging_cron")]
    pub data_aging_cron: String,

    /// Attempts per physical deletion during pruning
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/catalog")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_compression_level() -> i32 {
    3
}

fn default_retention_cycles() -> u32 {
    2
}

fn default_data_aging_cron() -> String {
    "0 0 2 * * *".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            inline: false,
            max_attempts: default_max_attempts(),
            compression_level: default_compression_level(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_cycles: default_retention_cycles(),
            data_aging_cron: default_data_aging_cron(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            checkpoint: CheckpointConfig::default(),
            retention: RetentionConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Configuration rooted at `data_dir` with every other field defaulted
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CATALOG_*` environment variables on top of the loaded values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup("CATALOG_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("CATALOG_INLINE_CHECKPOINTING") {
            self.checkpoint.inline = parse_bool(&v).ok_or_else(|| {
                CatalogError::Config(format!("CATALOG_INLINE_CHECKPOINTING: '{v}' is not a boolean"))
            })?;
        }
        if let Some(v) = lookup("CATALOG_MAX_ATTEMPTS") {
            let attempts: u32 = v
                .parse()
                .map_err(|_| CatalogError::Config(format!("CATALOG_MAX_ATTEMPTS: '{v}'")))?;
            self.checkpoint.max_attempts = attempts;
            self.retention.max_attempts = attempts;
        }
        if let Some(v) = lookup("CATALOG_RETENTION_CYCLES") {
            self.retention.default_cycles = v
                .parse()
                .map_err(|_| CatalogError::Config(format!("CATALOG_RETENTION_CYCLES: '{v}'")))?;
        }
        if let Some(cron) = lookup("CATALOG_DATA_AGING_CRON") {
            self.retention.data_aging_cron = cron;
        }
        if let Some(level) = lookup("CATALOG_LOG_LEVEL") {
            self.log.level = level;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention.default_cycles == 0 {
            return Err(CatalogError::Config(
                "retention.default_cycles must be at least 1".into(),
            ));
        }
        if self.checkpoint.max_attempts == 0 || self.retention.max_attempts == 0 {
            return Err(CatalogError::Config("max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn control_db_path(&self) -> PathBuf {
        self.data_dir.join("control.db")
    }

    pub fn index_root(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn archive_root(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    pub fn sessions_root(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
