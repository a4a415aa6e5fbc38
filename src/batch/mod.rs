//! Batch orchestration over the per-image pipeline.
//!
//! Images are independent units of work: the quality dataset is a
//! read-only snapshot while a batch runs and is folded forward exactly
//! once, serially, after every result is in. The sequential and parallel
//! entry points produce identical summaries.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::config::RegistrationConfig;
use crate::pipeline::{register_image, Capabilities, ImageInput, RegistrationResult, TemplateImages};
use crate::stats::QualityDataset;

/// Aggregate counts for one batch, recomputed per run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchSummary {
    pub coarse_aligned: usize,
    pub fine_aligned: usize,
    /// Mean coarse score over the aligned results; zero for an empty set.
    pub average_score: f64,
}

/// Everything a batch run produces: per-image provenance (unaligned
/// entries included), the summary, and the dataset carried forward.
#[derive(Debug)]
pub struct BatchOutcome {
    pub results: Vec<RegistrationResult>,
    pub summary: BatchSummary,
    pub dataset: QualityDataset,
}

impl BatchOutcome {
    /// Results that produced an aligned image.
    pub fn aligned(&self) -> impl Iterator<Item = &RegistrationResult> {
        self.results.iter().filter(|r| r.is_aligned())
    }
}

/// Registers every input against the template, sequentially.
pub fn align_batch(
    inputs: &[ImageInput],
    template: &TemplateImages,
    config: &RegistrationConfig,
    dataset: QualityDataset,
    caps: &Capabilities<'_>,
    record_dir: Option<&Path>,
) -> BatchOutcome {
    let span = info_span!("batch", run_id = %Uuid::new_v4(), images = inputs.len(), parallel = false);
    let _guard = span.enter();

    let results: Vec<RegistrationResult> = inputs
        .iter()
        .map(|input| run_one(input, template, config, &dataset, caps))
        .collect();

    finish(results, config, dataset, record_dir)
}

/// Registers every input against the template on the rayon worker pool.
///
/// Per-image work shares no mutable state; results carry the image name
/// and are re-associated by it, not by completion order.
pub fn align_batch_parallel(
    inputs: &[ImageInput],
    template: &TemplateImages,
    config: &RegistrationConfig,
    dataset: QualityDataset,
    caps: &Capabilities<'_>,
    record_dir: Option<&Path>,
) -> BatchOutcome {
    let span = info_span!("batch", run_id = %Uuid::new_v4(), images = inputs.len(), parallel = true);
    let _guard = span.enter();

    let results: Vec<RegistrationResult> = inputs
        .par_iter()
        .map(|input| run_one(input, template, config, &dataset, caps))
        .collect();

    finish(results, config, dataset, record_dir)
}

fn run_one(
    input: &ImageInput,
    template: &TemplateImages,
    config: &RegistrationConfig,
    dataset: &QualityDataset,
    caps: &Capabilities<'_>,
) -> RegistrationResult {
    register_image(input, template, config, dataset, caps).unwrap_or_else(|err| {
        // One bad image never aborts the batch; record it as unaligned.
        warn!(image = %input.name, error = %err, "registration failed");
        RegistrationResult::unaligned(input.name.clone())
    })
}

fn finish(
    results: Vec<RegistrationResult>,
    config: &RegistrationConfig,
    mut dataset: QualityDataset,
    record_dir: Option<&Path>,
) -> BatchOutcome {
    let summary = summarize(&results);

    if config.dataset.robust_enabled {
        let scores: Vec<f64> = results
            .iter()
            .filter(|r| r.is_aligned())
            .map(|r| r.coarse.score)
            .collect();
        dataset.update(&scores);
    }

    if let Some(dir) = record_dir {
        if let Err(err) = write_record(dir, &results) {
            warn!(directory = %dir.display(), error = %err, "failed to write registration record");
        }
    }

    info!(
        coarse_aligned = summary.coarse_aligned,
        fine_aligned = summary.fine_aligned,
        average_score = summary.average_score,
        "batch complete"
    );

    BatchOutcome {
        results,
        summary,
        dataset,
    }
}

fn summarize(results: &[RegistrationResult]) -> BatchSummary {
    let (coarse_aligned, fine_aligned) = results.iter().fold((0, 0), |(coarse, fine), r| {
        (
            coarse + r.coarse.applied as usize,
            fine + r.fine.applied as usize,
        )
    });

    let scores: Vec<f64> = results
        .iter()
        .filter(|r| r.is_aligned())
        .map(|r| r.coarse.score)
        .collect();
    let average_score = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };

    BatchSummary {
        coarse_aligned,
        fine_aligned,
        average_score,
    }
}

#[derive(Serialize)]
struct RecordEntry {
    #[serde(rename = "coarseApplied")]
    coarse_applied: bool,
    #[serde(rename = "coarseMatrix")]
    coarse_matrix: [[f64; 3]; 2],
    #[serde(rename = "fineApplied")]
    fine_applied: bool,
    #[serde(rename = "fineMatrix")]
    fine_matrix: [[f64; 3]; 2],
}

/// Renders the per-batch provenance record: one entry per image, keys
/// sorted, 4-space indentation. This is the one file format downstream
/// tooling consumes byte-for-byte.
pub fn registration_record(results: &[RegistrationResult]) -> crate::Result<String> {
    let record: BTreeMap<&str, RecordEntry> = results
        .iter()
        .map(|r| {
            (
                r.name.as_str(),
                RecordEntry {
                    coarse_applied: r.coarse.applied,
                    coarse_matrix: r.coarse.transform.matrix,
                    fine_applied: r.fine.applied,
                    fine_matrix: r.fine.transform.matrix,
                },
            )
        })
        .collect();

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    record.serialize(&mut ser)?;
    Ok(String::from_utf8(buf)?)
}

fn write_record(dir: &Path, results: &[RegistrationResult]) -> crate::Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join("registered.json"), registration_record(results)?)?;
    Ok(())
}
