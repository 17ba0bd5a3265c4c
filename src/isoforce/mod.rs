//! Torque recordings of the isokinetic dynamometer.
//!
//! The same contractions are captured twice: by the dynamometer itself
//! ([`device`]) and by the acquisition script sampling its analog outputs
//! ([`recorder`]). The device export has the calibrated torque, the
//! recorder chunks carry wall-clock timestamps. Both are cut into one
//! segment per contraction so the streams can be matched segment by segment.

pub mod device;
pub mod recorder;

pub use device::{clean_device_export, DeviceProcessor, DeviceRecording};
pub use recorder::{load_recorder, RecorderProcessor, RecorderRecording, RecorderSegmentation};

use crate::config::Settings;
use crate::error::{AppResult, SyncError};
use crate::protocol::Protocol;
use std::path::{Path, PathBuf};
use tracing::info;

/// Half-open sample range `start..stop` of one contraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// First sample
    pub start: usize,
    /// One past the last sample
    pub stop: usize,
}

impl Segment {
    /// Samples in the segment.
    pub fn len(&self) -> usize {
        self.stop.saturating_sub(self.start)
    }

    /// True when the segment holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A processed torque recording cut into contractions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
    /// Processed torque, zeroed outside the segments
    pub torque: Vec<f64>,
    /// Torque before filtering (sign-corrected)
    pub torque_raw: Vec<f64>,
    /// Processed angle
    pub angle: Vec<f64>,
    /// Speed as used for detection
    pub speed: Vec<f64>,
    /// Detected contractions in recording order
    pub segments: Vec<Segment>,
    /// 1.0 inside a segment, 0.0 outside
    pub exclude_window: Vec<f64>,
}

impl Segmentation {
    /// Cut `torque`/`angle` at `segments` and apply the exclusion window.
    pub(crate) fn build(
        torque: Vec<f64>,
        torque_raw: Vec<f64>,
        angle: Vec<f64>,
        speed: Vec<f64>,
        segments: Vec<Segment>,
    ) -> Self {
        let mut exclude_window = vec![0.0; torque.len()];
        for seg in &segments {
            let stop = seg.stop.min(exclude_window.len());
            if seg.start < stop {
                exclude_window[seg.start..stop].fill(1.0);
            }
        }
        let torque = torque
            .iter()
            .zip(&exclude_window)
            .map(|(t, w)| t * w)
            .collect();
        Self {
            torque,
            torque_raw,
            angle,
            speed,
            segments,
            exclude_window,
        }
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True when no contraction was found.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Torque samples of segment `idx`.
    pub fn torque_segment(&self, idx: usize) -> Option<&[f64]> {
        let seg = self.segments.get(idx)?;
        self.torque.get(seg.start..seg.stop)
    }

    /// Angle samples of segment `idx`.
    pub fn angle_segment(&self, idx: usize) -> Option<&[f64]> {
        let seg = self.segments.get(idx)?;
        self.angle.get(seg.start..seg.stop)
    }

    /// Lengths of all segments.
    pub fn segment_lengths(&self) -> Vec<usize> {
        self.segments.iter().map(Segment::len).collect()
    }
}

/// Raw inputs of one participant folder.
#[derive(Debug, Clone)]
pub struct ParticipantRecordings {
    /// Participant folder
    pub dir: PathBuf,
    /// Measurement protocol
    pub protocol: Protocol,
    /// Cleaned dynamometer export that was loaded
    pub device_csv: PathBuf,
    /// Dynamometer export
    pub device: DeviceRecording,
    /// Concatenated recorder chunks
    pub recorder: RecorderRecording,
}

impl ParticipantRecordings {
    /// Segment both recordings with the configured processors.
    pub fn segment(&self, settings: &Settings) -> AppResult<(Segmentation, RecorderSegmentation)> {
        let leg = self.protocol.participant.leg;
        let device = DeviceProcessor::new(settings.isoforce.device.clone(), leg)
            .process(&self.device)?;
        let recorder = RecorderProcessor::new(settings.isoforce.recorder.clone(), leg)
            .process(&self.recorder)?;
        info!(
            "Segmented {}: {} device / {} recorder contractions",
            self.dir.display(),
            device.len(),
            recorder.segmentation.len()
        );
        Ok((device, recorder))
    }
}

/// First `*.csv` of a folder by name.
pub fn find_device_csv(dir: &Path) -> AppResult<PathBuf> {
    let mut csvs: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| SyncError::MissingInput(format!("{}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    csvs.sort();
    csvs.into_iter()
        .next()
        .ok_or_else(|| SyncError::MissingInput(format!("no CSV file found in {}", dir.display())))
}

/// Load the protocol, the device CSV and the recorder chunks of a participant.
pub fn load_participant(dir: &Path, settings: &Settings) -> AppResult<ParticipantRecordings> {
    let device_csv = find_device_csv(dir)?;
    info!("Loading IsoForce CSV: {}", device_csv.display());
    let protocol = Protocol::load(dir)?;
    let device = DeviceRecording::from_csv(&device_csv)?;
    let recorder = load_recorder(&dir.join(&settings.isoforce.recorder.dir))?;
    Ok(ParticipantRecordings {
        dir: dir.to_path_buf(),
        protocol,
        device_csv,
        device,
        recorder,
    })
}
