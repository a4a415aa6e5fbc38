use image::{imageops, DynamicImage, RgbImage};
use tracing::{debug, warn};

use crate::config::RegistrationConfig;
use crate::stats::QualityDataset;
use crate::transform::AffineTransform;
use crate::Result;

use super::coarse::CoarseOutcome;
use super::suffixed;
use super::types::{Capabilities, TemplateImages};

/// Refinement-stage output consumed by the decision pipeline.
pub(crate) struct FineOutcome {
    pub image: RgbImage,
    pub transform: AffineTransform,
    pub score: f64,
    pub applied: bool,
    /// The optimizer failed on both the cropped and the fallback attempt;
    /// kept internal to the pipeline, never persisted.
    pub failed: bool,
}

/// Fine alignment: crop away the border introduced by the coarse
/// translation, run the intensity optimizer, then the accept/reject gate.
pub(crate) fn refine_alignment(
    name: &str,
    coarse: &CoarseOutcome,
    template: &TemplateImages,
    config: &RegistrationConfig,
    dataset: &QualityDataset,
    caps: &Capabilities<'_>,
) -> Result<FineOutcome> {
    let width = coarse.gray.width().min(template.equalized.width());
    let height = coarse.gray.height().min(template.equalized.height());
    let (crop_x, crop_y, crop_w, crop_h) = crop_window(&coarse.transform, width, height);

    let image_crop = imageops::crop_imm(&coarse.gray, crop_x, crop_y, crop_w, crop_h).to_image();
    let template_crop =
        imageops::crop_imm(&template.equalized, crop_x, crop_y, crop_w, crop_h).to_image();

    caps.write_debug(
        &format!("matches/{}", suffixed(name, "-crop")),
        &DynamicImage::ImageLuma8(image_crop.clone()),
    );
    caps.write_debug(
        &format!("matches/{}", suffixed(name, "-template-crop")),
        &DynamicImage::ImageLuma8(template_crop.clone()),
    );

    let mut transform = AffineTransform::IDENTITY;
    let mut failed = false;

    if config.mode.permits_refinement() {
        let (max_iterations, epsilon) = config.refinement.criteria(coarse.applied);
        match caps.intensity.align(
            &template_crop,
            &image_crop,
            AffineTransform::IDENTITY,
            max_iterations,
            epsilon,
        ) {
            Ok(refined) => transform = refined,
            Err(err) if coarse.applied => {
                // Retry once on the uncropped pair before giving up.
                debug!(image = name, error = %err, "optimizer failed on cropped pair, retrying uncropped");
                match caps.intensity.align(
                    &template.equalized,
                    &coarse.gray,
                    AffineTransform::IDENTITY,
                    max_iterations,
                    epsilon,
                ) {
                    Ok(refined) => transform = refined,
                    Err(err) => {
                        warn!(image = name, error = %err, "optimizer did not converge");
                        failed = true;
                    }
                }
            }
            Err(err) => {
                warn!(image = name, error = %err, "optimizer did not converge");
                failed = true;
            }
        }
    }

    let score = transform.alignment_score();
    let accept = !failed
        && config.mode.permits_refinement()
        && transform.is_within(&config.bounds)
        && dataset.is_acceptable(score, config.dataset.num_std_dev, &config.bounds);

    let (image, applied) = if accept {
        let warped = caps
            .resampler
            .warp(&coarse.image, &transform, template.output_size(), true)?;
        (warped, true)
    } else {
        if !failed && config.mode.permits_refinement() {
            debug!(image = name, score, "refined transform rejected");
        }
        (coarse.image.clone(), false)
    };

    Ok(FineOutcome {
        image,
        transform,
        score,
        applied,
        failed,
    })
}

/// Window over the overlap implied by the coarse translation: a positive
/// shift pulls the top/left edge in, a negative shift pulls the
/// bottom/right edge in. Clamped so at least one pixel survives.
fn crop_window(transform: &AffineTransform, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let (tx, ty) = transform.translation();

    let mut upper_x = 0.0;
    let mut upper_y = 0.0;
    let mut lower_x = width as f64;
    let mut lower_y = height as f64;

    if ty > 0.0 {
        upper_y += ty;
    } else {
        lower_y += ty;
    }
    if tx > 0.0 {
        upper_x += tx;
    } else {
        lower_x += tx;
    }

    let x0 = upper_x.clamp(0.0, width.saturating_sub(1) as f64) as u32;
    let y0 = upper_y.clamp(0.0, height.saturating_sub(1) as f64) as u32;
    let x1 = lower_x.clamp(x0 as f64 + 1.0, width as f64) as u32;
    let y1 = lower_y.clamp(y0 as f64 + 1.0, height as f64) as u32;

    (x0, y0, x1 - x0, y1 - y0)
}
