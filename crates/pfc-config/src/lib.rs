//! # pfc-config
//!
//! Configuration management for pfc.
//!
//! Loads configuration from:
//! 1. `~/.pfc/config.toml` (global)
//! 2. `.pfc/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;

use once_cell::sync::Lazy;
use pfc_info::{DescriptorOptions, DEFAULT_MAX_BITMAP_BYTES, INFO_EXTENSION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

use crate::logging::LogLevel;

/// Default cache block size (1 MiB)
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(|e| e.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|e| e.into_inner()) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.pfc/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        // 2. Load project config (.pfc/config.toml) - overrides global
        let project_path = Path::new(".pfc/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let contents = std::fs::read_to_string(project_path)?;
            let project_config: toml::Table = toml::from_str(&contents)?;
            config.merge(&project_config)?;
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse a single config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.pfc/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".pfc/config.toml"))
    }

    /// Merge a project-level table: only keys present in it override.
    pub fn merge(&mut self, project: &toml::Table) -> Result<(), ConfigError> {
        let mut base = match toml::Value::try_from(&*self)? {
            toml::Value::Table(table) => table,
            _ => return Ok(()),
        };
        for (section, value) in project {
            match (base.get_mut(section), value) {
                (Some(toml::Value::Table(dst)), toml::Value::Table(src)) => {
                    for (k, v) in src {
                        dst.insert(k.clone(), v.clone());
                    }
                }
                _ => {
                    base.insert(section.clone(), value.clone());
                }
            }
        }
        *self = toml::Value::Table(base).try_into::<Config>()?;
        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("PFC_BLOCK_SIZE") {
            if let Ok(n) = size.parse() {
                self.cache.block_size = n;
            }
        }
        if let Ok(prefetch) = std::env::var("PFC_PREFETCH") {
            self.cache.prefetch = matches!(prefetch.as_str(), "1" | "true" | "yes" | "on");
        }
        if let Ok(level) = std::env::var("PFC_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Render this config as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Config::default().to_toml()
    }
}

/// Cache descriptor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Block size used for newly created descriptors
    pub block_size: u64,
    /// Track read-ahead in a prefetch bitmap
    pub prefetch: bool,
    /// Suffix appended to data files to name their descriptor
    pub info_extension: String,
    /// Reject stored headers that need a larger bitmap than this
    pub max_bitmap_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            prefetch: false,
            info_extension: INFO_EXTENSION.to_string(),
            max_bitmap_bytes: DEFAULT_MAX_BITMAP_BYTES,
        }
    }
}

impl CacheConfig {
    pub fn descriptor_options(&self) -> DescriptorOptions {
        DescriptorOptions {
            prefetch: self.prefetch,
            max_bitmap_bytes: self.max_bitmap_bytes,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// error, warn, info, debug or trace
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn log_level(&self) -> LogLevel {
        self.level.parse().unwrap_or(LogLevel::Warn)
    }
}
