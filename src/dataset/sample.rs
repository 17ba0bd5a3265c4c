//! One training sample: an EIT frame with its torque label.

use crate::sync::SyncedSegment;
use serde::{Deserialize, Serialize};

/// EIT magnitudes of one frame with the torque measured at the same time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSample {
    /// `|z|` of the `n_el × n_el` frame, row-major
    pub eit: Vec<f64>,
    /// Electrode count
    pub n_el: usize,
    /// Device torque (Nm)
    pub torque: f64,
    /// Recorder timestamp (unix seconds)
    pub ts_iso: f64,
    /// EIT frame timestamp (unix seconds)
    pub ts_eit: f64,
    /// Target force of the trial (% MVC)
    pub target_force: i64,
    /// Participant number
    pub participant: String,
}

impl DatasetSample {
    /// Samples of a synchronized segment, one per recorder timestamp.
    pub fn from_segment(segment: &SyncedSegment, participant: &str) -> Vec<Self> {
        segment
            .eit
            .iter()
            .zip(&segment.torque)
            .zip(segment.ts_recorder.iter().zip(&segment.ts_eit))
            .map(|((frame, &torque), (&ts_iso, &ts_eit))| Self {
                eit: frame.magnitudes(),
                n_el: frame.n_el,
                torque,
                ts_iso,
                ts_eit,
                target_force: segment.target_force,
                participant: participant.to_string(),
            })
            .collect()
    }

    /// Number of EIT features.
    pub fn n_features(&self) -> usize {
        self.eit.len()
    }
}
