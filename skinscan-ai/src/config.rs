//! Analysis run configuration
//!
//! [`AnalysisConfig`] is an immutable value object. It can only be obtained
//! through [`AnalysisConfigBuilder::build`], which rejects invalid
//! combinations, so every config that reaches the orchestrator is valid.
//! Derived configs (device adjustment, recovery) are new values built the
//! same way.

use crate::error::{AnalysisError, AnalysisResult};
use crate::models::MIN_IMAGE_PIXELS;
use serde::{Deserialize, Serialize};
use skinscan_common::config::{AnalysisSettings, RecoverySettings};
use std::str::FromStr;
use std::time::Duration;

/// Named configuration presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigPreset {
    #[default]
    Default,
    Fast,
    LowMemory,
    HighAccuracy,
}

impl FromStr for ConfigPreset {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Ok(Self::Default),
            "fast" => Ok(Self::Fast),
            "low_memory" => Ok(Self::LowMemory),
            "high_accuracy" => Ok(Self::HighAccuracy),
            other => Err(AnalysisError::ConfigurationError(format!(
                "unknown preset '{}'",
                other
            ))),
        }
    }
}

/// Immutable analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisConfig {
    enable_classifier: bool,
    enable_feature_analysis: bool,
    enable_parallel: bool,
    #[serde(with = "duration_ms")]
    total_timeout: Duration,
    #[serde(with = "duration_ms")]
    classifier_timeout: Duration,
    #[serde(with = "duration_ms")]
    feature_timeout: Duration,
    max_resolution_pixels: u64,
    compression_quality: u8,
}

impl AnalysisConfig {
    /// Builder seeded from the default preset
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::from_preset(ConfigPreset::Default)
    }

    /// Valid config for a preset
    pub fn preset(preset: ConfigPreset) -> Self {
        AnalysisConfigBuilder::from_preset(preset).values
    }

    pub fn fast() -> Self {
        Self::preset(ConfigPreset::Fast)
    }

    pub fn low_memory() -> Self {
        Self::preset(ConfigPreset::LowMemory)
    }

    pub fn high_accuracy() -> Self {
        Self::preset(ConfigPreset::HighAccuracy)
    }

    /// Builder seeded with this config's values, for field-level overrides
    pub fn to_builder(&self) -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            values: self.clone(),
        }
    }

    /// Build from the `[analysis]` section of `skinscan.toml`
    pub fn from_settings(settings: &AnalysisSettings) -> AnalysisResult<Self> {
        let preset = match &settings.preset {
            Some(name) => name.parse()?,
            None => ConfigPreset::Default,
        };

        let mut builder = AnalysisConfigBuilder::from_preset(preset);
        if let Some(v) = settings.enable_classifier {
            builder = builder.enable_classifier(v);
        }
        if let Some(v) = settings.enable_feature_analysis {
            builder = builder.enable_feature_analysis(v);
        }
        if let Some(v) = settings.enable_parallel {
            builder = builder.enable_parallel(v);
        }
        if let Some(ms) = settings.total_timeout_ms {
            builder = builder.total_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = settings.classifier_timeout_ms {
            builder = builder.classifier_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = settings.feature_timeout_ms {
            builder = builder.feature_timeout(Duration::from_millis(ms));
        }
        if let Some(px) = settings.max_resolution_pixels {
            builder = builder.max_resolution_pixels(px);
        }
        if let Some(q) = settings.compression_quality {
            builder = builder.compression_quality(q);
        }
        builder.build()
    }

    /// Check all invariants
    pub fn validate(&self) -> AnalysisResult<()> {
        if !self.enable_classifier && !self.enable_feature_analysis {
            return Err(AnalysisError::ConfigurationError(
                "at least one of classifier or feature analysis must be enabled".to_string(),
            ));
        }
        for (name, timeout) in [
            ("total_timeout", self.total_timeout),
            ("classifier_timeout", self.classifier_timeout),
            ("feature_timeout", self.feature_timeout),
        ] {
            if timeout.is_zero() {
                return Err(AnalysisError::ConfigurationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if !(1..=100).contains(&self.compression_quality) {
            return Err(AnalysisError::ConfigurationError(format!(
                "compression_quality must be in 1..=100, got {}",
                self.compression_quality
            )));
        }
        if self.max_resolution_pixels < MIN_IMAGE_PIXELS {
            return Err(AnalysisError::ConfigurationError(format!(
                "max_resolution_pixels must be at least {}, got {}",
                MIN_IMAGE_PIXELS, self.max_resolution_pixels
            )));
        }
        Ok(())
    }

    /// Both analyzers run concurrently in this configuration
    pub fn runs_parallel(&self) -> bool {
        self.enable_parallel && self.enable_classifier && self.enable_feature_analysis
    }

    /// Classifier off, parallelism off, feature analysis kept
    pub fn without_classifier(&self) -> AnalysisResult<Self> {
        self.to_builder()
            .enable_classifier(false)
            .enable_feature_analysis(true)
            .enable_parallel(false)
            .build()
    }

    /// Every timeout multiplied by `factor`, never below one millisecond
    pub fn scale_timeouts(&self, factor: f64) -> AnalysisResult<Self> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(AnalysisError::ConfigurationError(format!(
                "invalid timeout factor {}",
                factor
            )));
        }
        let scale = |d: Duration| d.mul_f64(factor).max(Duration::from_millis(1));
        self.to_builder()
            .total_timeout(scale(self.total_timeout))
            .classifier_timeout(scale(self.classifier_timeout))
            .feature_timeout(scale(self.feature_timeout))
            .build()
    }

    pub fn enable_classifier(&self) -> bool {
        self.enable_classifier
    }

    pub fn enable_feature_analysis(&self) -> bool {
        self.enable_feature_analysis
    }

    pub fn enable_parallel(&self) -> bool {
        self.enable_parallel
    }

    pub fn total_timeout(&self) -> Duration {
        self.total_timeout
    }

    pub fn classifier_timeout(&self) -> Duration {
        self.classifier_timeout
    }

    pub fn feature_timeout(&self) -> Duration {
        self.feature_timeout
    }

    pub fn max_resolution_pixels(&self) -> u64 {
        self.max_resolution_pixels
    }

    pub fn compression_quality(&self) -> u8 {
        self.compression_quality
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::preset(ConfigPreset::Default)
    }
}

/// Field-level overrides on top of a preset
#[derive(Debug, Clone)]
pub struct AnalysisConfigBuilder {
    values: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn from_preset(preset: ConfigPreset) -> Self {
        let values = match preset {
            ConfigPreset::Default => AnalysisConfig {
                enable_classifier: true,
                enable_feature_analysis: true,
                enable_parallel: true,
                total_timeout: Duration::from_secs(30),
                classifier_timeout: Duration::from_secs(15),
                feature_timeout: Duration::from_secs(10),
                max_resolution_pixels: 2048 * 2048,
                compression_quality: 90,
            },
            ConfigPreset::Fast => AnalysisConfig {
                enable_classifier: true,
                enable_feature_analysis: true,
                enable_parallel: true,
                total_timeout: Duration::from_secs(15),
                classifier_timeout: Duration::from_secs(8),
                feature_timeout: Duration::from_secs(5),
                max_resolution_pixels: 1024 * 1024,
                compression_quality: 80,
            },
            ConfigPreset::LowMemory => AnalysisConfig {
                enable_classifier: true,
                enable_feature_analysis: true,
                enable_parallel: false,
                total_timeout: Duration::from_secs(45),
                classifier_timeout: Duration::from_secs(20),
                feature_timeout: Duration::from_secs(15),
                max_resolution_pixels: 800 * 800,
                compression_quality: 70,
            },
            ConfigPreset::HighAccuracy => AnalysisConfig {
                enable_classifier: true,
                enable_feature_analysis: true,
                enable_parallel: true,
                total_timeout: Duration::from_secs(60),
                classifier_timeout: Duration::from_secs(30),
                feature_timeout: Duration::from_secs(20),
                max_resolution_pixels: 3000 * 3000,
                compression_quality: 100,
            },
        };
        Self { values }
    }

    pub fn enable_classifier(mut self, enabled: bool) -> Self {
        self.values.enable_classifier = enabled;
        self
    }

    pub fn enable_feature_analysis(mut self, enabled: bool) -> Self {
        self.values.enable_feature_analysis = enabled;
        self
    }

    pub fn enable_parallel(mut self, enabled: bool) -> Self {
        self.values.enable_parallel = enabled;
        self
    }

    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.values.total_timeout = timeout;
        self
    }

    pub fn classifier_timeout(mut self, timeout: Duration) -> Self {
        self.values.classifier_timeout = timeout;
        self
    }

    pub fn feature_timeout(mut self, timeout: Duration) -> Self {
        self.values.feature_timeout = timeout;
        self
    }

    pub fn max_resolution_pixels(mut self, pixels: u64) -> Self {
        self.values.max_resolution_pixels = pixels;
        self
    }

    pub fn compression_quality(mut self, quality: u8) -> Self {
        self.values.compression_quality = quality;
        self
    }

    /// Validate and produce the config
    pub fn build(self) -> AnalysisResult<AnalysisConfig> {
        self.values.validate()?;
        Ok(self.values)
    }
}

/// Tunable constants of the recovery loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryPolicy {
    /// Recovery plans allowed per run; the next failure falls back
    pub max_attempts: u32,
    /// Timeout growth per attempt (`multiplier × attempt`)
    pub timeout_multiplier: f64,
    /// Pixel reduction per attempt (`current × factor / attempt`)
    pub resolution_factor: f64,
    /// Smallest pixel count worth retrying with (256×256)
    pub min_pixels: u64,
    /// Delay unit for network retries (`base × attempt`)
    #[serde(with = "duration_ms")]
    pub base_retry_delay: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_multiplier: 1.5,
            resolution_factor: 0.7,
            min_pixels: 256 * 256,
            base_retry_delay: Duration::from_secs(1),
        }
    }
}

impl RecoveryPolicy {
    /// Build from the `[recovery]` section of `skinscan.toml`
    pub fn from_settings(settings: &RecoverySettings) -> AnalysisResult<Self> {
        let defaults = Self::default();
        let policy = Self {
            max_attempts: settings.max_attempts.unwrap_or(defaults.max_attempts),
            timeout_multiplier: settings
                .timeout_multiplier
                .unwrap_or(defaults.timeout_multiplier),
            resolution_factor: settings
                .resolution_factor
                .unwrap_or(defaults.resolution_factor),
            min_pixels: settings.min_pixels.unwrap_or(defaults.min_pixels),
            base_retry_delay: settings
                .base_retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_retry_delay),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> AnalysisResult<()> {
        if self.max_attempts == 0 {
            return Err(AnalysisError::ConfigurationError(
                "recovery max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.timeout_multiplier.is_finite() || self.timeout_multiplier < 1.0 {
            return Err(AnalysisError::ConfigurationError(format!(
                "recovery timeout_multiplier must be >= 1.0, got {}",
                self.timeout_multiplier
            )));
        }
        if !(self.resolution_factor > 0.0 && self.resolution_factor < 1.0) {
            return Err(AnalysisError::ConfigurationError(format!(
                "recovery resolution_factor must be in (0, 1), got {}",
                self.resolution_factor
            )));
        }
        if self.min_pixels < MIN_IMAGE_PIXELS {
            return Err(AnalysisError::ConfigurationError(format!(
                "recovery min_pixels must be at least {}",
                MIN_IMAGE_PIXELS
            )));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
