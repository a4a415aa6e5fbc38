use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use tracing::{debug, warn};

use crate::capabilities::{DescriptorMatch, FeatureSet, KeyPoint};
use crate::config::RegistrationConfig;
use crate::stats::QualityDataset;
use crate::transform::AffineTransform;
use crate::Result;

use super::types::{Capabilities, ImageInput, TemplateImages};
use super::suffixed;

/// Feature-stage output consumed by the refinement stage.
pub(crate) struct CoarseOutcome {
    /// The color apply-image, warped into the template frame when the
    /// stage applied.
    pub image: RgbImage,
    /// Grayscale rendering of `image`.
    pub gray: GrayImage,
    pub transform: AffineTransform,
    pub score: f64,
    pub applied: bool,
}

/// Coarse alignment: sparse keypoint correspondences, robust affine fit,
/// then the accept/reject gate.
pub(crate) fn align_features(
    input: &ImageInput,
    template: &TemplateImages,
    config: &RegistrationConfig,
    dataset: &QualityDataset,
    caps: &Capabilities<'_>,
) -> Result<CoarseOutcome> {
    let max_features = config.features.feature_count;
    let image_features = detect_or_empty(caps, &input.feature_image, max_features, &input.name);
    let template_features = detect_or_empty(caps, &template.reduced_noise, max_features, "template");

    let mut matches = match caps
        .matcher
        .match_descriptors(&image_features.descriptors, &template_features.descriptors)
    {
        Ok(matches) => matches,
        Err(err) => {
            warn!(image = %input.name, error = %err, "descriptor matching failed");
            Vec::new()
        }
    };
    matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    let filtered = filter_matches(
        &matches,
        &image_features.keypoints,
        &template_features.keypoints,
        template,
        config,
    );
    debug!(
        image = %input.name,
        raw = matches.len(),
        kept = filtered.len(),
        "feature matches filtered"
    );

    let transform = if config.mode.permits_features() && !filtered.is_empty() {
        let from: Vec<(f32, f32)> = filtered
            .iter()
            .map(|m| {
                let kp = image_features.keypoints[m.query_idx];
                (kp.x, kp.y)
            })
            .collect();
        let to: Vec<(f32, f32)> = filtered
            .iter()
            .map(|m| {
                let kp = template_features.keypoints[m.train_idx];
                (kp.x, kp.y)
            })
            .collect();

        match caps
            .estimator
            .fit(&from, &to, config.features.estimator_refine_iters)
        {
            Ok(transform) => transform,
            Err(err) => {
                // Estimation infeasible: fall back to identity, not fatal.
                warn!(image = %input.name, error = %err, "robust affine fit failed");
                AffineTransform::IDENTITY
            }
        }
    } else {
        AffineTransform::IDENTITY
    };

    let score = transform.alignment_score();
    let acceptable = dataset.is_acceptable(score, config.dataset.num_std_dev, &config.bounds);
    let valid = transform.is_within(&config.bounds);

    let (image, applied) = if acceptable && valid && config.mode.permits_features() {
        let warped = caps.resampler.warp(
            &input.apply_image,
            &transform,
            template.output_size(),
            false,
        )?;
        (warped, true)
    } else {
        if config.mode.permits_features() {
            debug!(
                image = %input.name,
                score,
                acceptable,
                valid,
                "feature transform rejected"
            );
        }
        (input.apply_image.clone(), false)
    };
    let gray = image::imageops::grayscale(&image);

    if caps.debug.is_some() {
        let overlay = match_overlay(
            &input.feature_image,
            &template.reduced_noise,
            &image_features.keypoints,
            &template_features.keypoints,
            &filtered,
        );
        caps.write_debug(
            &format!("matches/{}", input.name),
            &DynamicImage::ImageRgb8(overlay),
        );
        caps.write_debug(
            &format!("matches/{}", suffixed(&input.name, "-coarse")),
            &DynamicImage::ImageRgb8(image.clone()),
        );
    }

    Ok(CoarseOutcome {
        image,
        gray,
        transform,
        score,
        applied,
    })
}

fn detect_or_empty(
    caps: &Capabilities<'_>,
    image: &GrayImage,
    max_features: usize,
    label: &str,
) -> FeatureSet {
    match caps.detector.detect(image, max_features) {
        Ok(features) => features,
        Err(err) => {
            warn!(image = label, error = %err, "feature detection failed");
            FeatureSet::default()
        }
    }
}

/// Drops matches whose endpoints are further apart than the configured
/// fraction of the template diagonal; keeps at most `max_kept_matches`.
fn filter_matches(
    matches: &[DescriptorMatch],
    image_keypoints: &[KeyPoint],
    template_keypoints: &[KeyPoint],
    template: &TemplateImages,
    config: &RegistrationConfig,
) -> Vec<DescriptorMatch> {
    let (width, height) = template.output_size();
    let diagonal = ((height as f64).powi(2) + (width as f64).powi(2)).sqrt();
    let threshold = (config.features.match_distance_ratio_percent / 100.0) * diagonal;

    let mut kept = Vec::new();
    for m in matches {
        let a = image_keypoints[m.query_idx];
        let b = template_keypoints[m.train_idx];
        if (a.distance_to(&b) as f64) < threshold {
            kept.push(*m);
        }
        if kept.len() >= config.features.max_kept_matches {
            break;
        }
    }
    kept
}

/// Side-by-side composite of the image and template with the kept
/// correspondences drawn across it.
fn match_overlay(
    image: &GrayImage,
    template: &GrayImage,
    image_keypoints: &[KeyPoint],
    template_keypoints: &[KeyPoint],
    matches: &[DescriptorMatch],
) -> RgbImage {
    let width = image.width() + template.width();
    let height = image.height().max(template.height());
    let mut canvas = RgbImage::new(width, height);

    for (x, y, p) in image.enumerate_pixels() {
        canvas.put_pixel(x, y, Rgb([p[0], p[0], p[0]]));
    }
    for (x, y, p) in template.enumerate_pixels() {
        canvas.put_pixel(x + image.width(), y, Rgb([p[0], p[0], p[0]]));
    }

    for m in matches {
        let a = image_keypoints[m.query_idx];
        let b = template_keypoints[m.train_idx];
        draw_line(
            &mut canvas,
            (a.x, a.y),
            (b.x + image.width() as f32, b.y),
            Rgb([255, 64, 64]),
        );
    }
    canvas
}

fn draw_line(canvas: &mut RgbImage, from: (f32, f32), to: (f32, f32), color: Rgb<u8>) {
    let steps = (to.0 - from.0).abs().max((to.1 - from.1).abs()).ceil() as u32;
    for i in 0..=steps {
        let t = if steps == 0 { 0.0 } else { i as f32 / steps as f32 };
        let x = from.0 + (to.0 - from.0) * t;
        let y = from.1 + (to.1 - from.1) * t;
        if x >= 0.0 && y >= 0.0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
            canvas.put_pixel(x as u32, y as u32, color);
        }
    }
}
