use serde::{Deserialize, Serialize};

/// 2x3 affine transform in row-major order:
/// `[[a00, a01, tx], [a10, a11, ty]]`.
///
/// Produced once by an estimation stage and treated as an immutable value
/// afterward; comparisons are element-wise, never by reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffineTransform {
    pub matrix: [[f64; 3]; 2],
}

/// Admissible transform magnitudes implied by the configured maximum
/// rotation, translation and scaling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransformBounds {
    /// Maximum allowable rotation, degrees.
    pub max_rotation_deg: f64,
    /// Maximum allowable translation, pixels (exclusive bound).
    pub max_translation: f64,
    /// Maximum allowable scaling, percent.
    pub max_scale_percent: f64,
}

impl Default for TransformBounds {
    fn default() -> Self {
        Self {
            max_rotation_deg: 5.0,
            max_translation: 50.0,
            max_scale_percent: 5.0,
        }
    }
}

impl AffineTransform {
    pub const IDENTITY: Self = Self {
        matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
    };

    pub fn new(matrix: [[f64; 3]; 2]) -> Self {
        Self { matrix }
    }

    pub fn translation(&self) -> (f64, f64) {
        (self.matrix[0][2], self.matrix[1][2])
    }

    /// Sum of squared element magnitudes, i.e. the squared distance from
    /// the all-zero matrix. Used as an acceptance proxy for "how much
    /// transform was applied", not as a geometric error metric.
    pub fn alignment_score(&self) -> f64 {
        self.matrix
            .iter()
            .flatten()
            .map(|v| v.abs() * v.abs())
            .sum()
    }

    /// Checks the transform against the validity envelope.
    ///
    /// The diagonal (scale x rotation) terms must lie, by absolute value,
    /// in `[(1 - s) * cos(max_rotation), (1 + s) * cos(0)]` where
    /// `s = |max_scale_percent| / 100`; both translation terms must be
    /// strictly below `max_translation` in magnitude. The band is a
    /// conservative envelope around the admissible motions, not a tight
    /// geometric bound.
    pub fn is_within(&self, bounds: &TransformBounds) -> bool {
        let scale = bounds.max_scale_percent.abs() / 100.0;
        let alpha_low = (1.0 - scale) * bounds.max_rotation_deg.to_radians().cos();
        let alpha_high = (1.0 + scale) * 0f64.cos();

        let a00 = self.matrix[0][0].abs();
        let a11 = self.matrix[1][1].abs();
        let (tx, ty) = self.translation();

        (alpha_low..=alpha_high).contains(&a00)
            && (alpha_low..=alpha_high).contains(&a11)
            && tx.abs() < bounds.max_translation
            && ty.abs() < bounds.max_translation
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}
