//! Memory pressure tracking and image downscaling
//!
//! Memory is measured through a [`MemoryProbe`]. The default probe counts the
//! decoded bytes of every image the orchestrator currently holds (tracked in
//! an [`ImagePool`]) against the device heap ceiling. Tests inject their own
//! probe to simulate pressure.

use crate::error::{AnalysisError, AnalysisResult};
use crate::models::LesionImage;
use dashmap::DashMap;
use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Usage ratio at which memory is reported as low
pub const LOW_MEMORY_RATIO: f64 = 0.70;

/// Usage ratio at which memory is critical; projected usage must stay below
pub const CRITICAL_MEMORY_RATIO: f64 = 0.85;

/// Peak memory of an analysis relative to the decoded input
pub const WORKING_SET_FACTOR: u64 = 3;

/// Memory pressure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Normal,
    Low,
    Critical,
}

/// Point-in-time memory reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub max_bytes: u64,
}

impl MemorySample {
    pub fn usage_ratio(&self) -> f64 {
        if self.max_bytes == 0 {
            return 1.0;
        }
        self.used_bytes as f64 / self.max_bytes as f64
    }

    /// Bytes that can still be allocated before reaching the critical ratio
    pub fn headroom(&self) -> u64 {
        let ceiling = (self.max_bytes as f64 * CRITICAL_MEMORY_RATIO) as u64;
        ceiling.saturating_sub(self.used_bytes)
    }
}

/// Source of memory readings
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> MemorySample;
}

/// Registry of images currently held by a run
///
/// Entries are weak, so the pool never keeps pixels alive by itself. Dead
/// entries are purged on [`ImagePool::purge_dead`]; the orchestrator clears
/// the pool when each run ends.
#[derive(Debug, Default)]
pub struct ImagePool {
    entries: DashMap<u64, Weak<DynamicImage>>,
    next_id: AtomicU64,
}

impl ImagePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an image until it is freed or the pool is cleared
    pub fn register(&self, image: &LesionImage) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, Arc::downgrade(image.shared_pixels()));
    }

    /// Decoded bytes of tracked images that are still alive
    ///
    /// Images registered more than once are counted once.
    pub fn live_bytes(&self) -> u64 {
        let mut seen = Vec::new();
        let mut total = 0u64;
        for entry in self.entries.iter() {
            if let Some(pixels) = entry.value().upgrade() {
                let ptr = Arc::as_ptr(&pixels);
                if !seen.contains(&ptr) {
                    seen.push(ptr);
                    total += pixels.as_bytes().len() as u64;
                }
            }
        }
        total
    }

    /// Drop entries whose image has been freed, returns how many
    pub fn purge_dead(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        before - self.entries.len()
    }

    /// Forget every entry, returns how many
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Measures the image pool against a fixed heap ceiling
pub struct ImagePoolProbe {
    pool: Arc<ImagePool>,
    max_bytes: u64,
}

impl ImagePoolProbe {
    pub fn new(pool: Arc<ImagePool>, max_bytes: u64) -> Self {
        Self { pool, max_bytes }
    }
}

impl MemoryProbe for ImagePoolProbe {
    fn sample(&self) -> MemorySample {
        MemorySample {
            used_bytes: self.pool.live_bytes(),
            max_bytes: self.max_bytes,
        }
    }
}

/// Memory checks and downscaling for the preprocessing stage
pub struct MemoryGuard {
    probe: Arc<dyn MemoryProbe>,
    pool: Arc<ImagePool>,
}

impl MemoryGuard {
    pub fn new(probe: Arc<dyn MemoryProbe>, pool: Arc<ImagePool>) -> Self {
        Self { probe, pool }
    }

    pub fn pool(&self) -> &Arc<ImagePool> {
        &self.pool
    }

    pub fn sample(&self) -> MemorySample {
        self.probe.sample()
    }

    pub fn status(&self) -> MemoryStatus {
        let ratio = self.sample().usage_ratio();
        if ratio >= CRITICAL_MEMORY_RATIO {
            MemoryStatus::Critical
        } else if ratio >= LOW_MEMORY_RATIO {
            MemoryStatus::Low
        } else {
            MemoryStatus::Normal
        }
    }

    /// Whether analyzing `image` keeps projected usage below the critical ratio
    pub fn fits(&self, image: &LesionImage) -> bool {
        image.byte_size().saturating_mul(WORKING_SET_FACTOR) <= self.sample().headroom()
    }

    /// Largest pixel count whose working set fits in the remaining headroom
    pub fn affordable_pixels(&self, bytes_per_pixel: u64) -> u64 {
        let per_pixel = bytes_per_pixel.max(1).saturating_mul(WORKING_SET_FACTOR);
        self.sample().headroom() / per_pixel
    }

    /// Aspect-preserving downscale to at most `target_pixels`
    ///
    /// Never upscales. Pixel density shrinks with the linear scale so
    /// millimetre measurements stay correct.
    pub fn downscale(&self, image: &LesionImage, target_pixels: u64) -> AnalysisResult<LesionImage> {
        let current = image.pixel_count();
        if current <= target_pixels {
            return Ok(image.clone());
        }

        let scale = (target_pixels as f64 / current as f64).sqrt();
        let width = (image.width() as f64 * scale).floor() as u32;
        let height = (image.height() as f64 * scale).floor() as u32;
        if width == 0 || height == 0 {
            return Err(AnalysisError::ImageProcessingError(format!(
                "cannot downscale {}x{} to {} pixels",
                image.width(),
                image.height(),
                target_pixels
            )));
        }

        let resized = image.pixels().resize_exact(width, height, FilterType::Triangle);
        let density = image.pixel_density() * (width as f32 / image.width() as f32);

        debug!(
            from_width = image.width(),
            from_height = image.height(),
            to_width = width,
            to_height = height,
            "Image downscaled"
        );

        Ok(LesionImage::new(resized, density))
    }

    /// Forced cleanup pass, returns the number of released entries
    pub fn cleanup(&self) -> usize {
        let released = self.pool.purge_dead();
        if released > 0 {
            debug!(released, "Memory cleanup released pooled images");
        }
        released
    }
}
