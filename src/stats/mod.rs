//! Adaptive quality statistics for registration acceptance.
//!
//! Alignment scores of past batches drive a per-deployment acceptance
//! threshold: once enough history exists the dataset is converted (by the
//! caller) from its bootstrap form into a running mean / standard
//! deviation, and new transforms are accepted relative to that history.

use serde::{Deserialize, Serialize};

use crate::transform::{AffineTransform, TransformBounds};

/// History of alignment scores, either still bootstrapping (raw samples)
/// or tracked as running statistics.
///
/// The bootstrap-to-tracked transition is owned by the caller; this crate
/// only reads and incrementally updates whichever form is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDataset {
    Bootstrap {
        samples: Vec<f64>,
    },
    Tracked {
        mean: f64,
        std_dev: f64,
        count: u64,
    },
}

impl Default for QualityDataset {
    fn default() -> Self {
        Self::Bootstrap {
            samples: Vec::new(),
        }
    }
}

/// Worst-case alignment score of a transform sitting exactly on the
/// validity boundary: rotation, translation and scaling all at their
/// configured maxima.
///
/// The rotation terms use `cos(max_rotation)` while the validator's upper
/// diagonal bound uses `cos(0)`; the envelope is intentionally asymmetric.
pub fn max_plausible_score(bounds: &TransformBounds) -> f64 {
    let scale = bounds.max_scale_percent.abs() / 100.0;
    let rot = bounds.max_rotation_deg.to_radians();
    let alpha = scale * rot.cos();
    let beta = scale * rot.sin();
    let t = bounds.max_translation;

    AffineTransform::new([[alpha, beta, t], [-beta, alpha, t]]).alignment_score()
}

impl QualityDataset {
    pub fn tracked(mean: f64, std_dev: f64, count: u64) -> Self {
        Self::Tracked {
            mean,
            std_dev,
            count,
        }
    }

    pub fn is_tracked(&self) -> bool {
        matches!(self, Self::Tracked { .. })
    }

    /// Whether a score is acceptable relative to history.
    ///
    /// Tracked datasets accept scores within `num_std_dev` standard
    /// deviations above the mean; a bootstrapping dataset falls back to
    /// the closed-form worst-case bound for the configured envelope.
    pub fn is_acceptable(&self, score: f64, num_std_dev: f64, bounds: &TransformBounds) -> bool {
        match self {
            Self::Tracked { mean, std_dev, .. } => score <= mean + std_dev * num_std_dev,
            Self::Bootstrap { .. } => score <= max_plausible_score(bounds),
        }
    }

    /// Folds new scores into the dataset, in input order.
    ///
    /// Tracked datasets apply a Welford-style online update per sample;
    /// the floating-point trajectory depends on sample order, the limit
    /// does not. Bootstrap datasets append the raw samples unchanged.
    pub fn update(&mut self, samples: &[f64]) {
        match self {
            Self::Tracked {
                mean,
                std_dev,
                count,
            } => {
                for &x in samples {
                    let next_count = *count + 1;
                    let next_mean = *mean + (x - *mean) / next_count as f64;
                    let var = *std_dev * *std_dev;
                    let next_var = var + ((x - *mean) * (x - next_mean) - var) / next_count as f64;

                    *mean = next_mean;
                    *std_dev = next_var.sqrt();
                    *count = next_count;
                }
            }
            Self::Bootstrap { samples: raw } => raw.extend_from_slice(samples),
        }
    }
}
