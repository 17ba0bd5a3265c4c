//! Dataset export and loading.
//!
//! A participant's synchronized segments are written as one sample per
//! recorder timestamp under `<root>/<participant>/`, next to a
//! `manifest.json`. [`load_dataset`] reads several participants back into a
//! feature matrix with optional z-score normalization.

pub mod loader;
pub mod manifest;
pub mod sample;
pub mod writer;

pub use loader::{load_dataset, Dataset};
pub use manifest::{DatasetManifest, DatasetManifestBuilder};
pub use sample::DatasetSample;
pub use writer::{CsvSampleWriter, JsonSampleWriter, SampleWriter};

use crate::error::AppResult;
use crate::sync::SyncResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Sample file format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// One `sample_NNNNN.json` per sample
    #[default]
    Json,
    /// One `samples.csv` per participant
    Csv,
}

impl SampleFormat {
    /// Writer for this format.
    pub fn writer(self) -> Box<dyn SampleWriter> {
        match self {
            SampleFormat::Json => Box::new(JsonSampleWriter::new()),
            SampleFormat::Csv => Box::new(CsvSampleWriter::new()),
        }
    }
}

/// Z-scoring applied to the EIT features when loading.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Raw magnitudes
    None,
    /// One mean and deviation over the whole matrix
    #[default]
    Global,
    /// One mean and deviation per participant block
    Participant,
    /// Per-feature participant mean removed, then a z-score per block
    #[value(name = "participant_meanfree")]
    ParticipantMeanfree,
}

/// Write every synchronized sample of `result` into `dir`.
///
/// Returns the number of samples written.
pub fn export(result: &SyncResult, writer: &mut dyn SampleWriter, dir: &Path) -> AppResult<usize> {
    writer.init(dir)?;
    for segment in &result.segments {
        writer.write(&DatasetSample::from_segment(segment, &result.participant))?;
    }
    let written = writer.finish()?;
    info!(
        "Exported {} samples of {} to {}",
        written,
        result.participant,
        dir.display()
    );
    Ok(written)
}
