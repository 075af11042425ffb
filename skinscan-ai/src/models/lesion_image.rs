//! Lesion images and analysis requests

use crate::error::{AnalysisError, AnalysisResult, ErrorClassifier};
use image::DynamicImage;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Smallest pixel count accepted for analysis
pub const MIN_IMAGE_PIXELS: u64 = 1000;

/// Pixel density assumed when the capture device does not report one
pub const DEFAULT_PIXEL_DENSITY: f32 = 10.0;

/// Decoded lesion photograph
///
/// Pixels are shared behind an `Arc` so analyzer tasks can each hold the
/// image without copying. `pixel_density` is pixels per millimetre and is
/// what turns pixel measurements into the diameter criterion.
#[derive(Clone)]
pub struct LesionImage {
    pixels: Arc<DynamicImage>,
    pixel_density: f32,
}

impl LesionImage {
    pub fn new(pixels: DynamicImage, pixel_density: f32) -> Self {
        Self {
            pixels: Arc::new(pixels),
            pixel_density,
        }
    }

    /// Image with the default pixel density
    pub fn from_image(pixels: DynamicImage) -> Self {
        Self::new(pixels, DEFAULT_PIXEL_DENSITY)
    }

    /// Decode an image file
    pub fn open(path: impl AsRef<Path>, pixel_density: f32) -> AnalysisResult<Self> {
        let pixels = image::open(path.as_ref())
            .map_err(|e| ErrorClassifier::classify_image_error(&e))?;
        Ok(Self::new(pixels, pixel_density))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixel_count(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Decoded size in bytes
    pub fn byte_size(&self) -> u64 {
        self.pixels.as_bytes().len() as u64
    }

    pub fn pixel_density(&self) -> f32 {
        self.pixel_density
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub(crate) fn shared_pixels(&self) -> &Arc<DynamicImage> {
        &self.pixels
    }

    /// Reject images no analyzer can work with
    pub fn validate(&self, label: &str) -> AnalysisResult<()> {
        if self.width() == 0 || self.height() == 0 {
            return Err(AnalysisError::InvalidImageError(format!(
                "{} has zero dimension ({}x{})",
                label,
                self.width(),
                self.height()
            )));
        }
        if self.byte_size() == 0 {
            return Err(AnalysisError::InvalidImageError(format!(
                "{} has no pixel data",
                label
            )));
        }
        if self.pixel_count() < MIN_IMAGE_PIXELS {
            return Err(AnalysisError::InvalidImageError(format!(
                "{} has {} pixels, at least {} required",
                label,
                self.pixel_count(),
                MIN_IMAGE_PIXELS
            )));
        }
        if !self.pixel_density.is_finite() || self.pixel_density <= 0.0 {
            return Err(AnalysisError::InvalidImageError(format!(
                "{} has invalid pixel density {}",
                label, self.pixel_density
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for LesionImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LesionImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("pixel_density", &self.pixel_density)
            .finish()
    }
}

/// Input of one orchestrator run
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub image: LesionImage,
    /// Earlier photo of the same lesion, enables the evolution criterion
    pub previous_image: Option<LesionImage>,
}

impl AnalysisRequest {
    pub fn new(image: LesionImage) -> Self {
        Self {
            image,
            previous_image: None,
        }
    }

    pub fn with_previous(mut self, previous: LesionImage) -> Self {
        self.previous_image = Some(previous);
        self
    }
}
