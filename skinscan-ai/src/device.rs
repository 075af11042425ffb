//! Device performance profiling
//!
//! The profile is computed once per process ([`DeviceProfile::global`]) and
//! is read-only afterwards. It sizes the worker pool and adjusts each run's
//! configuration: weak devices get looser timeouts, a lower resolution
//! ceiling and sequential analysis; strong devices get tighter timeouts and
//! a higher ceiling.

use crate::config::AnalysisConfig;
use crate::error::AnalysisResult;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const MIB: u64 = 1024 * 1024;

/// Heap ceiling assumed when the platform does not report memory
pub const DEFAULT_HEAP_CEILING: u64 = 512 * MIB;

const LOW_TIER_MAX_PIXELS: u64 = 1024 * 1024;
const HIGH_TIER_MAX_PIXELS: u64 = 4096 * 4096;

static GLOBAL_PROFILE: Lazy<DeviceProfile> = Lazy::new(DeviceProfiler::detect);

/// Coarse device capability class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTier {
    Low,
    Medium,
    High,
}

/// CPU and memory capabilities of the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub cpu_cores: usize,
    /// Memory budget available to analysis, in bytes
    pub max_heap_bytes: u64,
    pub tier: PerformanceTier,
}

impl DeviceProfile {
    /// Process-wide profile, detected on first access
    pub fn global() -> &'static DeviceProfile {
        &GLOBAL_PROFILE
    }

    /// Analyzer worker count: one core is left for the caller's thread
    pub fn worker_pool_size(&self) -> usize {
        self.cpu_cores.saturating_sub(1).clamp(2, 4)
    }

    /// Config adapted to this device
    pub fn adjust(&self, config: &AnalysisConfig) -> AnalysisResult<AnalysisConfig> {
        let adjusted = match self.tier {
            PerformanceTier::Low => config
                .scale_timeouts(1.5)?
                .to_builder()
                .max_resolution_pixels(config.max_resolution_pixels().min(LOW_TIER_MAX_PIXELS))
                .enable_parallel(false)
                .build()?,
            PerformanceTier::Medium => config.clone(),
            PerformanceTier::High => {
                let current = config.max_resolution_pixels();
                let raised = (current as f64 * 1.5) as u64;
                config
                    .scale_timeouts(0.8)?
                    .to_builder()
                    .max_resolution_pixels(raised.min(HIGH_TIER_MAX_PIXELS).max(current))
                    .build()?
            }
        };

        debug!(
            tier = ?self.tier,
            parallel = adjusted.enable_parallel(),
            max_resolution_pixels = adjusted.max_resolution_pixels(),
            total_timeout_ms = adjusted.total_timeout().as_millis() as u64,
            "Configuration adjusted for device"
        );

        Ok(adjusted)
    }
}

/// Builds [`DeviceProfile`]s
pub struct DeviceProfiler;

impl DeviceProfiler {
    /// Inspect the host
    pub fn detect() -> DeviceProfile {
        let cores = num_cpus::get();
        let heap = detect_heap_ceiling().unwrap_or(DEFAULT_HEAP_CEILING);
        let profile = Self::profile(cores, heap);

        info!(
            cpu_cores = profile.cpu_cores,
            max_heap_mb = profile.max_heap_bytes / MIB,
            tier = ?profile.tier,
            "Device profile detected"
        );

        profile
    }

    /// Profile for known capabilities
    pub fn profile(cpu_cores: usize, max_heap_bytes: u64) -> DeviceProfile {
        DeviceProfile {
            cpu_cores,
            max_heap_bytes,
            tier: Self::tier(cpu_cores, max_heap_bytes),
        }
    }

    pub fn tier(cpu_cores: usize, max_heap_bytes: u64) -> PerformanceTier {
        if cpu_cores >= 8 && max_heap_bytes >= 512 * MIB {
            PerformanceTier::High
        } else if cpu_cores >= 4 && max_heap_bytes >= 256 * MIB {
            PerformanceTier::Medium
        } else {
            PerformanceTier::Low
        }
    }
}

/// A quarter of available memory, read from `/proc/meminfo`
fn detect_heap_ceiling() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available_kb(&meminfo).map(|kb| kb * 1024 / 4)
}

fn parse_mem_available_kb(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_tiers() {
        assert_eq!(DeviceProfiler::tier(8, 1024 * MIB), PerformanceTier::High);
        assert_eq!(DeviceProfiler::tier(8, 300 * MIB), PerformanceTier::Medium);
        assert_eq!(DeviceProfiler::tier(4, 256 * MIB), PerformanceTier::Medium);
        assert_eq!(DeviceProfiler::tier(4, 128 * MIB), PerformanceTier::Low);
        assert_eq!(DeviceProfiler::tier(2, 4096 * MIB), PerformanceTier::Low);
    }

    #[test]
    fn test_worker_pool_size_clamped() {
        assert_eq!(DeviceProfiler::profile(1, DEFAULT_HEAP_CEILING).worker_pool_size(), 2);
        assert_eq!(DeviceProfiler::profile(2, DEFAULT_HEAP_CEILING).worker_pool_size(), 2);
        assert_eq!(DeviceProfiler::profile(4, DEFAULT_HEAP_CEILING).worker_pool_size(), 3);
        assert_eq!(DeviceProfiler::profile(16, DEFAULT_HEAP_CEILING).worker_pool_size(), 4);
    }

    #[test]
    fn test_low_tier_adjustment() {
        let profile = DeviceProfiler::profile(2, 128 * MIB);
        let config = AnalysisConfig::default();
        let adjusted = profile.adjust(&config).unwrap();

        assert_eq!(adjusted.total_timeout(), Duration::from_secs(45));
        assert_eq!(adjusted.max_resolution_pixels(), 1024 * 1024);
        assert!(!adjusted.enable_parallel());
    }

    #[test]
    fn test_medium_tier_unchanged() {
        let profile = DeviceProfiler::profile(4, 512 * MIB);
        let config = AnalysisConfig::fast();
        assert_eq!(profile.adjust(&config).unwrap(), config);
    }

    #[test]
    fn test_high_tier_adjustment() {
        let profile = DeviceProfiler::profile(8, 2048 * MIB);
        let config = AnalysisConfig::default();
        let adjusted = profile.adjust(&config).unwrap();

        assert_eq!(adjusted.total_timeout(), Duration::from_secs(24));
        assert!(adjusted.max_resolution_pixels() > config.max_resolution_pixels());
        assert!(adjusted.max_resolution_pixels() <= HIGH_TIER_MAX_PIXELS);
        assert!(adjusted.enable_parallel());
    }

    #[test]
    fn test_parse_meminfo() {
        let sample = "MemTotal:       16314436 kB\nMemFree:         1234 kB\nMemAvailable:    8000000 kB\n";
        assert_eq!(parse_mem_available_kb(sample), Some(8_000_000));
        assert_eq!(parse_mem_available_kb("MemTotal: 1 kB"), None);
    }

    #[test]
    fn test_global_profile_is_stable() {
        let first = DeviceProfile::global();
        let second = DeviceProfile::global();
        assert!(std::ptr::eq(first, second));
        assert!(first.cpu_cores >= 1);
    }
}
