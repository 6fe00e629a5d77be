use image::{DynamicImage, GenericImageView, GrayImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoreConfigError {
    #[error("quality weights must sum to 1.0, got {sum}")]
    WeightSum { sum: f64 },
}

/// Relative weight of each quality component. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityWeights {
    pub resolution: f64,
    pub file_size: f64,
    pub sharpness: f64,
}

impl QualityWeights {
    fn sum(&self) -> f64 {
        self.resolution + self.file_size + self.sharpness
    }
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            resolution: 0.4,
            file_size: 0.3,
            sharpness: 0.3,
        }
    }
}

/// Reference maxima used to normalize each component into [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    pub weights: QualityWeights,
    /// Pixel count at which the resolution component saturates (1920×1080).
    pub reference_pixels: u64,
    /// File size in bytes at which the size component saturates (10 MiB).
    pub reference_file_size: u64,
    /// Laplacian variance at or below which an image counts as fully blurred.
    pub blur_variance: f64,
    /// Laplacian variance at or above which an image counts as fully sharp.
    pub sharp_variance: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            reference_pixels: 1920 * 1080,
            reference_file_size: 10 * 1024 * 1024,
            blur_variance: 100.0,
            sharp_variance: 1000.0,
        }
    }
}

/// Per-component scores alongside the weighted composite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub overall: f64,
    pub resolution: f64,
    pub file_size: f64,
    pub sharpness: f64,
}

/// Scores a decoded image on resolution, on-disk size, and sharpness.
pub struct QualityScorer {
    config: QualityConfig,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Result<Self, ScoreConfigError> {
        let sum = config.weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ScoreConfigError::WeightSum { sum });
        }
        Ok(Self { config })
    }

    /// Composite quality score in [0, 1]; deterministic for identical input.
    pub fn score(&self, image: &DynamicImage, file_size: u64) -> QualityBreakdown {
        let (width, height) = image.dimensions();
        let pixels = u64::from(width) * u64::from(height);

        let resolution = (pixels as f64 / self.config.reference_pixels as f64).min(1.0);
        let size = (file_size as f64 / self.config.reference_file_size as f64).min(1.0);
        let sharpness = self.sharpness_score(&image.to_luma8());

        let weights = &self.config.weights;
        let overall = (resolution * weights.resolution
            + size * weights.file_size
            + sharpness * weights.sharpness)
            .clamp(0.0, 1.0);

        QualityBreakdown {
            overall,
            resolution,
            file_size: size,
            sharpness,
        }
    }

    fn sharpness_score(&self, gray: &GrayImage) -> f64 {
        let variance = laplacian_variance(gray);
        let span = self.config.sharp_variance - self.config.blur_variance;
        ((variance - self.config.blur_variance) / span).clamp(0.0, 1.0)
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self {
            config: QualityConfig::default(),
        }
    }
}

/// Variance of the 4-neighbour Laplacian over the interior pixels.
/// Crisp edges produce a wide response distribution; flat or blurred
/// images produce one concentrated near zero.
fn laplacian_variance(image: &GrayImage) -> f64 {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0u64;

    for y in 1..(height - 1) {
        for x in 1..(width - 1) {
            let center = f64::from(image.get_pixel(x, y)[0]);
            let up = f64::from(image.get_pixel(x, y - 1)[0]);
            let down = f64::from(image.get_pixel(x, y + 1)[0]);
            let left = f64::from(image.get_pixel(x - 1, y)[0]);
            let right = f64::from(image.get_pixel(x + 1, y)[0]);

            let response = 4.0 * center - up - down - left - right;
            sum += response;
            sum_sq += response * response;
            count += 1;
        }
    }

    let n = count as f64;
    let mean = sum / n;
    sum_sq / n - mean * mean
}
