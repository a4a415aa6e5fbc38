//! Capability contracts the registration pipeline is built against.
//!
//! Each trait is implementable by a different native library; the pipeline
//! never assumes a particular backend. All handles are shared across the
//! batch worker pool, hence the `Send + Sync` bounds.

use image::{DynamicImage, GrayImage, RgbImage};

use crate::transform::AffineTransform;
use crate::Result;

/// Keypoint location in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub x: f32,
    pub y: f32,
}

impl KeyPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &KeyPoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Keypoints and their descriptors, row `i` of `descriptors` describing
/// `keypoints[i]`.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Vec<Vec<u8>>,
}

/// A correspondence between a query descriptor and a train descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

/// Sparse keypoint and descriptor extraction.
pub trait FeatureDetector: Send + Sync {
    fn detect(&self, image: &GrayImage, max_features: usize) -> Result<FeatureSet>;
}

/// Descriptor correspondence with mutual-best (cross-check) semantics:
/// a pair is reported only if each descriptor is the other's nearest
/// neighbor.
pub trait DescriptorMatcher: Send + Sync {
    fn match_descriptors(
        &self,
        query: &[Vec<u8>],
        train: &[Vec<u8>],
    ) -> Result<Vec<DescriptorMatch>>;
}

/// Outlier-tolerant affine fit over matched point pairs (RANSAC-style).
pub trait RobustAffineEstimator: Send + Sync {
    /// Fits the transform mapping `from` onto `to`, running at least
    /// `refine_iters` refinement passes over the inlier set.
    fn fit(
        &self,
        from: &[(f32, f32)],
        to: &[(f32, f32)],
        refine_iters: u32,
    ) -> Result<AffineTransform>;
}

/// Dense intensity-based alignment of `image` onto `template`.
///
/// Any `Err` is treated as the optimizer failing to converge; the pipeline
/// owns the retry and fallback policy.
pub trait IntensityAligner: Send + Sync {
    fn align(
        &self,
        template: &GrayImage,
        image: &GrayImage,
        initial: AffineTransform,
        max_iterations: u32,
        epsilon: f64,
    ) -> Result<AffineTransform>;
}

/// Affine resampling of a color image.
pub trait ImageResampler: Send + Sync {
    /// Warps `image` by `transform` into an `output_size` buffer; with
    /// `inverse` the transform maps output pixels back into the input.
    fn warp(
        &self,
        image: &RgbImage,
        transform: &AffineTransform,
        output_size: (u32, u32),
        inverse: bool,
    ) -> Result<RgbImage>;
}

/// Structural similarity between two same-sized grayscale images, higher
/// meaning more alike.
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, a: &GrayImage, b: &GrayImage) -> Result<f64>;
}

/// Best-effort sink for debug artifacts. Write failures are reported to
/// the caller, which logs and continues.
pub trait DebugSink: Send + Sync {
    fn write(&self, name: &str, image: &DynamicImage) -> Result<()>;
}
