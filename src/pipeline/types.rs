use image::{GrayImage, RgbImage};

use crate::capabilities::{
    DebugSink, DescriptorMatcher, FeatureDetector, ImageResampler, IntensityAligner,
    RobustAffineEstimator, SimilarityScorer,
};
use crate::transform::AffineTransform;

/// One candidate image entering the pipeline.
#[derive(Debug, Clone)]
pub struct ImageInput {
    /// File name; also the identity used to re-associate parallel results.
    pub name: String,
    /// Denoised grayscale rendering used by the feature stage.
    pub feature_image: GrayImage,
    /// Equalized color image that is actually warped and returned.
    pub apply_image: RgbImage,
}

/// The reference template in the two renderings the stages need.
#[derive(Debug, Clone)]
pub struct TemplateImages {
    /// Equalized grayscale template driving intensity refinement and
    /// similarity scoring; its dimensions define the output frame.
    pub equalized: GrayImage,
    /// Denoised grayscale template used by the feature stage.
    pub reduced_noise: GrayImage,
}

impl TemplateImages {
    pub fn output_size(&self) -> (u32, u32) {
        (self.equalized.width(), self.equalized.height())
    }
}

/// Provenance of one pipeline stage.
#[derive(Debug, Clone, Copy)]
pub struct StageReport {
    pub transform: AffineTransform,
    pub score: f64,
    pub applied: bool,
}

impl StageReport {
    pub fn not_applied(transform: AffineTransform) -> Self {
        Self {
            score: transform.alignment_score(),
            transform,
            applied: false,
        }
    }
}

/// Per-image outcome of the registration decision pipeline.
///
/// `image` is `None` exactly when neither stage applied a transform; the
/// stage reports are always populated for provenance.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    pub name: String,
    pub image: Option<RgbImage>,
    pub coarse: StageReport,
    pub fine: StageReport,
}

impl RegistrationResult {
    pub fn is_aligned(&self) -> bool {
        self.image.is_some()
    }

    /// Placeholder for an image whose pipeline invocation errored out;
    /// recorded as unaligned with identity provenance.
    pub(crate) fn unaligned(name: String) -> Self {
        Self {
            name,
            image: None,
            coarse: StageReport::not_applied(AffineTransform::IDENTITY),
            fine: StageReport::not_applied(AffineTransform::IDENTITY),
        }
    }
}

/// Capability handles the pipeline runs against, shared across the batch
/// worker pool.
#[derive(Clone, Copy)]
pub struct Capabilities<'a> {
    pub detector: &'a dyn FeatureDetector,
    pub matcher: &'a dyn DescriptorMatcher,
    pub estimator: &'a dyn RobustAffineEstimator,
    pub intensity: &'a dyn IntensityAligner,
    pub resampler: &'a dyn ImageResampler,
    pub similarity: Option<&'a dyn SimilarityScorer>,
    pub debug: Option<&'a dyn DebugSink>,
}

impl Capabilities<'_> {
    /// Best-effort debug artifact write; failures are logged, never
    /// propagated.
    pub(crate) fn write_debug(&self, name: &str, image: &image::DynamicImage) {
        if let Some(sink) = self.debug {
            if let Err(err) = sink.write(name, image) {
                tracing::warn!(artifact = name, error = %err, "debug write failed");
            }
        }
    }
}
