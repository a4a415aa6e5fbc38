use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use crate::transform::TransformBounds;

/// Which stages of the pipeline are allowed to warp the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistrationMode {
    /// Feature stage followed by intensity refinement.
    #[default]
    Combined,
    /// Feature stage only; refinement is never applied.
    FeatureOnly,
    /// Intensity refinement only; the feature stage never warps.
    RefinementOnly,
}

impl RegistrationMode {
    pub fn permits_features(&self) -> bool {
        matches!(self, Self::Combined | Self::FeatureOnly)
    }

    pub fn permits_refinement(&self) -> bool {
        matches!(self, Self::Combined | Self::RefinementOnly)
    }
}

// Scalar fields first so the TOML emitter never sees a value after a table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationConfig {
    pub mode: RegistrationMode,
    /// Compare pre- and post-refinement images against the template and
    /// keep whichever scores higher.
    pub similarity_check: bool,
    pub bounds: TransformBounds,
    pub features: FeatureConfig,
    pub refinement: RefinementConfig,
    pub dataset: DatasetConfig,
}

/// Feature (coarse) stage parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Keypoint budget per image.
    pub feature_count: usize,
    /// Match endpoint distance threshold as a percentage of the template
    /// diagonal.
    pub match_distance_ratio_percent: f64,
    /// Matches kept after filtering.
    pub max_kept_matches: usize,
    /// Minimum refinement iterations the robust estimator must run.
    pub estimator_refine_iters: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            feature_count: 2000,
            match_distance_ratio_percent: 10.0,
            max_kept_matches: 1000,
            estimator_refine_iters: 20,
        }
    }
}

/// Intensity (fine) stage parameters. The fallback set is used when the
/// feature stage did not apply and the optimizer starts from the raw image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementConfig {
    /// Convergence threshold exponent when the feature stage applied;
    /// the optimizer epsilon is `10^-order`.
    pub epsilon_order_combined: f64,
    pub max_iterations_combined: u32,
    /// Threshold exponent for the fallback path.
    pub epsilon_order_fallback: f64,
    pub max_iterations_fallback: u32,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            epsilon_order_combined: 7.0,
            max_iterations_combined: 100,
            epsilon_order_fallback: 6.0,
            max_iterations_fallback: 500,
        }
    }
}

impl RefinementConfig {
    /// (max_iterations, epsilon) for the given coarse-stage outcome.
    pub fn criteria(&self, coarse_applied: bool) -> (u32, f64) {
        if coarse_applied {
            (
                self.max_iterations_combined,
                10f64.powf(-self.epsilon_order_combined),
            )
        } else {
            (
                self.max_iterations_fallback,
                10f64.powf(-self.epsilon_order_fallback),
            )
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Gate acceptance on the adaptive quality dataset and fold each
    /// batch's scores back into it.
    pub robust_enabled: bool,
    /// Acceptable distance above the dataset mean, in standard deviations.
    pub num_std_dev: f64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            robust_enabled: false,
            num_std_dev: 2.0,
        }
    }
}

impl RegistrationConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path)?;

        if content.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.features.feature_count == 0 {
            errors.push("feature_count must be positive".to_string());
        }

        if self.features.match_distance_ratio_percent < 0.0 {
            errors.push("match_distance_ratio_percent must be non-negative".to_string());
        }

        if self.features.max_kept_matches == 0 {
            errors.push("max_kept_matches must be positive".to_string());
        }

        if self.refinement.max_iterations_combined == 0
            || self.refinement.max_iterations_fallback == 0
        {
            errors.push("refinement iteration counts must be positive".to_string());
        }

        if self.bounds.max_translation <= 0.0 {
            errors.push("max_translation must be positive".to_string());
        }

        if self.dataset.num_std_dev < 0.0 {
            errors.push("num_std_dev must be non-negative".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
