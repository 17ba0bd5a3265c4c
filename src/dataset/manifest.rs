//! Dataset manifest written next to the sample files.
//!
//! `manifest.json` records how a participant's samples came about so the
//! dataset can be re-created or audited later:
//!
//! - **`software_version`**: version of this crate at export time.
//! - **`participant`**, **`leg`**: who was measured.
//! - **`sync_mode`**, **`format`**: how frames were matched and stored.
//! - **`segments`**: per contraction the target force, sample count, time
//!   offsets and refinement correlation.
//! - **`skipped`**: contractions left out, with the reason.
//! - **`dropped_force_level`**: protocol level removed because the two torque
//!   recordings disagreed on the number of contractions.
//! - **`parameters`**: free key/value pairs (e.g. the sync tolerance).
//!
//! Use [`DatasetManifestBuilder`] to assemble one.

use super::SampleFormat;
use crate::error::AppResult;
use crate::sync::{SkippedSegment, SyncMode, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Manifest file name.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Summary of one exported contraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestSegment {
    /// Segment index in recording order
    pub index: usize,
    /// Target force (% MVC)
    pub target_force: i64,
    /// Samples written
    pub samples: usize,
    /// Recorder minus EIT time at the first sample (s)
    pub offset_start: f64,
    /// Recorder minus EIT time at the last sample (s)
    pub offset_end: f64,
    /// Correlation of the refined device segment
    pub refinement: Option<f64>,
}

/// Describes the samples exported for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    /// Version of the exporting software.
    pub software_version: String,
    /// Participant number.
    pub participant: String,
    /// Measured leg.
    pub leg: String,
    /// Frame lookup strategy.
    pub sync_mode: SyncMode,
    /// Sample file format.
    pub format: SampleFormat,
    /// Export time.
    pub created_at: DateTime<Utc>,
    /// Exported contractions.
    pub segments: Vec<ManifestSegment>,
    /// Contractions left out.
    pub skipped: Vec<SkippedSegment>,
    /// Force level removed on a segment count mismatch.
    pub dropped_force_level: Option<i64>,
    /// Samples over all segments.
    pub total_samples: usize,
    /// Free-form parameters.
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Notes carried over from the protocol.
    pub notes: String,
}

impl Default for DatasetManifest {
    fn default() -> Self {
        Self {
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            participant: String::new(),
            leg: String::new(),
            sync_mode: SyncMode::default(),
            format: SampleFormat::default(),
            created_at: Utc::now(),
            segments: Vec::new(),
            skipped: Vec::new(),
            dropped_force_level: None,
            total_samples: 0,
            parameters: BTreeMap::new(),
            notes: String::new(),
        }
    }
}

/// A builder for constructing `DatasetManifest` instances.
#[derive(Default)]
pub struct DatasetManifestBuilder {
    inner: DatasetManifest,
}

impl DatasetManifestBuilder {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the participant number.
    pub fn participant(mut self, participant: &str) -> Self {
        self.inner.participant = participant.to_string();
        self
    }

    /// Set the measured leg.
    pub fn leg(mut self, leg: &str) -> Self {
        self.inner.leg = leg.to_string();
        self
    }

    /// Set the sample file format.
    pub fn format(mut self, format: SampleFormat) -> Self {
        self.inner.format = format;
        self
    }

    /// Take segments, skips and mode from a sync result.
    pub fn sync_result(mut self, result: &SyncResult) -> Self {
        if self.inner.participant.is_empty() {
            self.inner.participant = result.participant.clone();
        }
        self.inner.sync_mode = result.mode;
        self.inner.segments = result
            .segments
            .iter()
            .map(|s| ManifestSegment {
                index: s.index,
                target_force: s.target_force,
                samples: s.len(),
                offset_start: s.offset_start,
                offset_end: s.offset_end,
                refinement: s.refinement,
            })
            .collect();
        self.inner.skipped = result.skipped.clone();
        self.inner.dropped_force_level = result.dropped_force_level;
        self.inner.total_samples = result.total_samples();
        self
    }

    /// Add a free-form parameter.
    pub fn parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.inner.parameters.insert(key.to_string(), value);
        self
    }

    /// Set the notes.
    pub fn notes(mut self, notes: &str) -> Self {
        self.inner.notes = notes.to_string();
        self
    }

    /// Finish the manifest.
    pub fn build(self) -> DatasetManifest {
        self.inner
    }
}

impl DatasetManifest {
    /// Validates the manifest.
    pub fn validate(&self) -> Result<(), String> {
        if self.participant.is_empty() {
            return Err("Participant cannot be empty.".to_string());
        }
        let counted: usize = self.segments.iter().map(|s| s.samples).sum();
        if counted != self.total_samples {
            return Err(format!(
                "Segment samples ({counted}) do not add up to total_samples ({})",
                self.total_samples
            ));
        }
        Ok(())
    }

    /// Write `manifest.json` into `dir`.
    pub fn write(&self, dir: &Path) -> AppResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(MANIFEST_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Read `manifest.json` from `dir`.
    pub fn load(dir: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&text)?)
    }
}
