//! Configuration file loading and resolution
//!
//! SkinScan reads an optional `skinscan.toml`. The file only carries overrides:
//! every section and every field may be omitted, in which case compiled
//! defaults apply. A missing file is never fatal; a malformed one is.
//!
//! Config file resolution priority:
//! 1. Explicit path (command-line argument)
//! 2. `SKINSCAN_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/skinscan/skinscan.toml`)
//! 4. None (compiled defaults)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SKINSCAN_CONFIG";

/// Config file name inside the platform config directory
pub const CONFIG_FILE_NAME: &str = "skinscan.toml";

/// Complete contents of `skinscan.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Analysis run configuration overrides
    pub analysis: AnalysisSettings,
    /// Recovery policy overrides
    pub recovery: RecoverySettings,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,
    /// Optional log file; stderr when absent
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
        }
    }
}

/// `[analysis]` section: named preset plus field-level overrides
///
/// Field values are validated when the analysis configuration is built,
/// not here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Preset name: "default", "fast", "low_memory" or "high_accuracy"
    pub preset: Option<String>,
    pub enable_classifier: Option<bool>,
    pub enable_feature_analysis: Option<bool>,
    pub enable_parallel: Option<bool>,
    pub total_timeout_ms: Option<u64>,
    pub classifier_timeout_ms: Option<u64>,
    pub feature_timeout_ms: Option<u64>,
    pub max_resolution_pixels: Option<u64>,
    pub compression_quality: Option<u8>,
}

/// `[recovery]` section overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    pub max_attempts: Option<u32>,
    pub timeout_multiplier: Option<f64>,
    pub resolution_factor: Option<f64>,
    pub min_pixels: Option<u64>,
    pub base_retry_delay_ms: Option<u64>,
}

/// Resolves which config file (if any) should be loaded
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit path from the command line (highest priority)
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Resolve config file path following the priority order
    ///
    /// Returns `None` when no source names a file, or when only the platform
    /// default was found and it does not exist.
    pub fn resolve(&self) -> Option<PathBuf> {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_path {
            return Some(path.clone());
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        // Priority 3: Platform config directory
        default_config_path().filter(|p| p.exists())
    }

    /// Resolve and load configuration, falling back to defaults
    ///
    /// A path that was named explicitly but does not exist logs a warning and
    /// yields defaults. Parse errors are returned.
    pub fn load(&self) -> Result<TomlConfig> {
        match self.resolve() {
            Some(path) if path.exists() => load_toml_config(&path),
            Some(path) => {
                warn!(
                    "Config file {} not found, using compiled defaults",
                    path.display()
                );
                Ok(TomlConfig::default())
            }
            None => {
                info!("No config file found, using compiled defaults");
                Ok(TomlConfig::default())
            }
        }
    }
}

/// Platform-specific default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("skinscan").join(CONFIG_FILE_NAME))
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, target: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = target.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;

    if let Err(e) = std::fs::rename(&temp_path, target) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(Error::Io(e));
    }

    Ok(())
}
