pub mod batch;
pub mod capabilities;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod stats;
pub mod transform;

pub use batch::{align_batch, align_batch_parallel, registration_record, BatchOutcome, BatchSummary};
pub use capabilities::*;
pub use config::{
    DatasetConfig, FeatureConfig, RefinementConfig, RegistrationConfig, RegistrationMode,
};
pub use pipeline::{
    register_image, Capabilities, ImageInput, RegistrationResult, StageReport, TemplateImages,
};
pub use stats::{max_plausible_score, QualityDataset};
pub use transform::{AffineTransform, TransformBounds};

pub type Result<T> = anyhow::Result<T>;
