//! Deterministic fake capability backends for integration tests.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use template_registration::{
    AffineTransform, DebugSink, DescriptorMatch, DescriptorMatcher, FeatureDetector, FeatureSet,
    ImageInput, ImageResampler, IntensityAligner, KeyPoint, RobustAffineEstimator,
    SimilarityScorer, TemplateImages,
};

// ---------------------------------------------------------------------------
// Fixtures

/// Black canvas with uniquely-valued single-pixel dots; each dot's
/// intensity doubles as its descriptor, so correspondences are exact.
pub fn dotted_image(width: u32, height: u32, dots: &[(u32, u32)]) -> GrayImage {
    let mut img = GrayImage::new(width, height);
    for (i, &(x, y)) in dots.iter().enumerate() {
        img.put_pixel(x, y, Luma([100 + (i as u8) * 10]));
    }
    img
}

pub fn to_rgb(gray: &GrayImage) -> RgbImage {
    let mut rgb = RgbImage::new(gray.width(), gray.height());
    for (x, y, p) in gray.enumerate_pixels() {
        rgb.put_pixel(x, y, Rgb([p[0], p[0], p[0]]));
    }
    rgb
}

/// Well-spread, non-collinear anchor points for a 200x200 frame.
pub fn anchor_dots() -> Vec<(u32, u32)> {
    vec![(30, 40), (160, 35), (45, 150), (150, 160), (100, 90)]
}

pub fn input_from(name: &str, gray: GrayImage) -> ImageInput {
    ImageInput {
        name: name.to_string(),
        apply_image: to_rgb(&gray),
        feature_image: gray,
    }
}

pub fn template_from(gray: GrayImage) -> TemplateImages {
    TemplateImages {
        equalized: gray.clone(),
        reduced_noise: gray,
    }
}

// ---------------------------------------------------------------------------
// Feature stage fakes

/// Reports every non-background pixel as a keypoint, its intensity as a
/// one-byte descriptor.
pub struct PointDetector;

impl FeatureDetector for PointDetector {
    fn detect(&self, image: &GrayImage, max_features: usize) -> anyhow::Result<FeatureSet> {
        let mut features = FeatureSet::default();
        for (x, y, p) in image.enumerate_pixels() {
            if p[0] >= 50 {
                features.keypoints.push(KeyPoint::new(x as f32, y as f32));
                features.descriptors.push(vec![p[0]]);
            }
            if features.keypoints.len() >= max_features {
                break;
            }
        }
        Ok(features)
    }
}

/// L1 nearest neighbor with cross-check agreement.
pub struct MutualBestMatcher;

impl DescriptorMatcher for MutualBestMatcher {
    fn match_descriptors(
        &self,
        query: &[Vec<u8>],
        train: &[Vec<u8>],
    ) -> anyhow::Result<Vec<DescriptorMatch>> {
        let nearest = |desc: &[u8], pool: &[Vec<u8>]| -> Option<(usize, f32)> {
            pool.iter()
                .enumerate()
                .map(|(i, other)| {
                    let dist: i32 = desc
                        .iter()
                        .zip(other.iter())
                        .map(|(a, b)| (*a as i32 - *b as i32).abs())
                        .sum();
                    (i, dist as f32)
                })
                .min_by(|a, b| a.1.total_cmp(&b.1))
        };

        let mut matches = Vec::new();
        for (qi, q) in query.iter().enumerate() {
            if let Some((ti, dist)) = nearest(q, train) {
                if let Some((back, _)) = nearest(&train[ti], query) {
                    if back == qi {
                        matches.push(DescriptorMatch {
                            query_idx: qi,
                            train_idx: ti,
                            distance: dist,
                        });
                    }
                }
            }
        }
        Ok(matches)
    }
}

/// Exact least-squares affine fit; errs on degenerate configurations.
/// Stands in for a RANSAC estimator on outlier-free fixtures.
pub struct LeastSquaresEstimator;

impl RobustAffineEstimator for LeastSquaresEstimator {
    fn fit(
        &self,
        from: &[(f32, f32)],
        to: &[(f32, f32)],
        _refine_iters: u32,
    ) -> anyhow::Result<AffineTransform> {
        if from.len() < 3 || from.len() != to.len() {
            anyhow::bail!("not enough correspondences for an affine fit");
        }

        // Normal equations A^T A x = A^T b with rows (x, y, 1), solved
        // independently for the two output coordinates.
        let mut ata = [[0.0f64; 3]; 3];
        let mut atb_x = [0.0f64; 3];
        let mut atb_y = [0.0f64; 3];
        for (&(x, y), &(u, v)) in from.iter().zip(to.iter()) {
            let row = [x as f64, y as f64, 1.0];
            for i in 0..3 {
                for j in 0..3 {
                    ata[i][j] += row[i] * row[j];
                }
                atb_x[i] += row[i] * u as f64;
                atb_y[i] += row[i] * v as f64;
            }
        }

        let top = solve3(ata, atb_x).ok_or_else(|| anyhow::anyhow!("degenerate point set"))?;
        let bottom = solve3(ata, atb_y).ok_or_else(|| anyhow::anyhow!("degenerate point set"))?;
        Ok(AffineTransform::new([top, bottom]))
    }
}

fn solve3(mut a: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-9 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in 0..3 {
            if row != col {
                let factor = a[row][col] / a[col][col];
                for k in 0..3 {
                    a[row][k] -= factor * a[col][k];
                }
                b[row] -= factor * b[col];
            }
        }
    }
    Some([b[0] / a[0][0], b[1] / a[1][1], b[2] / a[2][2]])
}

// ---------------------------------------------------------------------------
// Refinement stage fakes

/// Integer translation search minimizing the sum of squared differences
/// over the overlap; converges to identity on identical inputs.
pub struct TranslationSearchAligner {
    pub radius: i32,
    pub calls: AtomicUsize,
}

impl TranslationSearchAligner {
    pub fn new(radius: i32) -> Self {
        Self {
            radius,
            calls: AtomicUsize::new(0),
        }
    }
}

impl IntensityAligner for TranslationSearchAligner {
    fn align(
        &self,
        template: &GrayImage,
        image: &GrayImage,
        initial: AffineTransform,
        _max_iterations: u32,
        _epsilon: f64,
    ) -> anyhow::Result<AffineTransform> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut best = (0i32, 0i32);
        let mut best_cost = f64::INFINITY;
        for dy in -self.radius..=self.radius {
            for dx in -self.radius..=self.radius {
                let mut cost = 0.0f64;
                let mut count = 0u64;
                for (x, y, p) in template.enumerate_pixels() {
                    let sx = x as i32 + dx;
                    let sy = y as i32 + dy;
                    if sx >= 0 && sy >= 0 && (sx as u32) < image.width() && (sy as u32) < image.height()
                    {
                        let d = p[0] as f64 - image.get_pixel(sx as u32, sy as u32)[0] as f64;
                        cost += d * d;
                        count += 1;
                    }
                }
                if count > 0 {
                    let cost = cost / count as f64;
                    if cost < best_cost {
                        best_cost = cost;
                        best = (dx, dy);
                    }
                }
            }
        }

        let mut out = initial;
        out.matrix[0][2] += best.0 as f64;
        out.matrix[1][2] += best.1 as f64;
        Ok(out)
    }
}

/// Never converges.
pub struct FailingAligner {
    pub calls: AtomicUsize,
}

impl FailingAligner {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl IntensityAligner for FailingAligner {
    fn align(
        &self,
        _template: &GrayImage,
        _image: &GrayImage,
        _initial: AffineTransform,
        _max_iterations: u32,
        _epsilon: f64,
    ) -> anyhow::Result<AffineTransform> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("optimizer did not converge")
    }
}

/// Fails the first call, then returns the fixed transform: exercises the
/// retry-on-uncropped fallback.
pub struct FailOnceAligner {
    pub result: AffineTransform,
    pub calls: AtomicUsize,
}

impl FailOnceAligner {
    pub fn new(result: AffineTransform) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
        }
    }
}

impl IntensityAligner for FailOnceAligner {
    fn align(
        &self,
        _template: &GrayImage,
        _image: &GrayImage,
        _initial: AffineTransform,
        _max_iterations: u32,
        _epsilon: f64,
    ) -> anyhow::Result<AffineTransform> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("optimizer did not converge")
        }
        Ok(self.result)
    }
}

/// Always returns the same transform.
pub struct StubAligner {
    pub result: AffineTransform,
}

impl IntensityAligner for StubAligner {
    fn align(
        &self,
        _template: &GrayImage,
        _image: &GrayImage,
        _initial: AffineTransform,
        _max_iterations: u32,
        _epsilon: f64,
    ) -> anyhow::Result<AffineTransform> {
        Ok(self.result)
    }
}

// ---------------------------------------------------------------------------
// Resampling, similarity, debug sink

/// Nearest-neighbor affine warp; inverts the transform unless asked to
/// inverse-map directly.
pub struct NearestNeighborResampler;

impl ImageResampler for NearestNeighborResampler {
    fn warp(
        &self,
        image: &RgbImage,
        transform: &AffineTransform,
        output_size: (u32, u32),
        inverse: bool,
    ) -> anyhow::Result<RgbImage> {
        let m = if inverse {
            transform.matrix
        } else {
            invert(&transform.matrix)
                .ok_or_else(|| anyhow::anyhow!("singular transform cannot be resampled"))?
        };

        let mut out = RgbImage::new(output_size.0, output_size.1);
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let sx = m[0][0] * x as f64 + m[0][1] * y as f64 + m[0][2];
            let sy = m[1][0] * x as f64 + m[1][1] * y as f64 + m[1][2];
            let sx = sx.round();
            let sy = sy.round();
            if sx >= 0.0 && sy >= 0.0 && (sx as u32) < image.width() && (sy as u32) < image.height()
            {
                *pixel = *image.get_pixel(sx as u32, sy as u32);
            }
        }
        Ok(out)
    }
}

fn invert(m: &[[f64; 3]; 2]) -> Option<[[f64; 3]; 2]> {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if det.abs() < 1e-12 {
        return None;
    }
    let a = m[1][1] / det;
    let b = -m[0][1] / det;
    let c = -m[1][0] / det;
    let d = m[0][0] / det;
    Some([
        [a, b, -(a * m[0][2] + b * m[1][2])],
        [c, d, -(c * m[0][2] + d * m[1][2])],
    ])
}

/// `1 - mean absolute difference / 255` over the common frame.
pub struct MeanAbsDiffScorer;

impl SimilarityScorer for MeanAbsDiffScorer {
    fn score(&self, a: &GrayImage, b: &GrayImage) -> anyhow::Result<f64> {
        let width = a.width().min(b.width());
        let height = a.height().min(b.height());
        if width == 0 || height == 0 {
            anyhow::bail!("empty image pair");
        }

        let mut total = 0.0f64;
        for y in 0..height {
            for x in 0..width {
                total += (a.get_pixel(x, y)[0] as f64 - b.get_pixel(x, y)[0] as f64).abs();
            }
        }
        Ok(1.0 - total / (255.0 * width as f64 * height as f64))
    }
}

/// Returns a scripted sequence of scores, then repeats the last one.
pub struct ScriptedScorer {
    pub scores: Vec<f64>,
    pub calls: AtomicUsize,
}

impl ScriptedScorer {
    pub fn new(scores: Vec<f64>) -> Self {
        Self {
            scores,
            calls: AtomicUsize::new(0),
        }
    }
}

impl SimilarityScorer for ScriptedScorer {
    fn score(&self, _a: &GrayImage, _b: &GrayImage) -> anyhow::Result<f64> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self
            .scores
            .get(i)
            .or_else(|| self.scores.last())
            .expect("scripted scorer needs at least one score"))
    }
}

/// Writes artifacts under a root directory, creating subdirectories as
/// needed.
pub struct DirectorySink {
    pub root: PathBuf,
}

impl DebugSink for DirectorySink {
    fn write(&self, name: &str, image: &DynamicImage) -> anyhow::Result<()> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        image.save(&path)?;
        Ok(())
    }
}

/// Always fails; the pipeline must shrug it off.
pub struct FailingSink;

impl DebugSink for FailingSink {
    fn write(&self, _name: &str, _image: &DynamicImage) -> anyhow::Result<()> {
        anyhow::bail!("sink unavailable")
    }
}

// ---------------------------------------------------------------------------
// Capability bundle

/// Default fake backends; tests swap in the intensity aligner under test.
pub struct Fixture {
    pub detector: PointDetector,
    pub matcher: MutualBestMatcher,
    pub estimator: LeastSquaresEstimator,
    pub resampler: NearestNeighborResampler,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            detector: PointDetector,
            matcher: MutualBestMatcher,
            estimator: LeastSquaresEstimator,
            resampler: NearestNeighborResampler,
        }
    }

    pub fn caps<'a>(
        &'a self,
        intensity: &'a dyn IntensityAligner,
    ) -> template_registration::Capabilities<'a> {
        template_registration::Capabilities {
            detector: &self.detector,
            matcher: &self.matcher,
            estimator: &self.estimator,
            intensity,
            resampler: &self.resampler,
            similarity: None,
            debug: None,
        }
    }
}
