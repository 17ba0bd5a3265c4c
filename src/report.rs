//! Data-quality summary of a participant folder.

use crate::config::Settings;
use crate::eit::convert::has_converted_frames;
use crate::eit::load_frames;
use crate::error::AppResult;
use crate::isoforce::load_participant;
use crate::protocol::Leg;
use crate::sync::refine_device_segments;
use std::fmt;
use std::path::Path;

/// Converted EIT frames of a participant.
#[derive(Debug, Clone, PartialEq)]
pub struct EitSummary {
    /// Frame count
    pub frames: usize,
    /// Seconds between the first and last frame
    pub span: f64,
    /// Mean frame rate (Hz)
    pub rate: Option<f64>,
}

/// Segment counts and lengths, refinement quality and EIT coverage.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantReport {
    /// Participant number from the protocol
    pub participant: String,
    /// Measured leg
    pub leg: Leg,
    /// Protocol force levels in recording order
    pub force_levels: Vec<i64>,
    /// Dynamometer export length
    pub device_samples: usize,
    /// Concatenated recorder length
    pub recorder_samples: usize,
    /// Length of every device segment
    pub device_segments: Vec<usize>,
    /// Length of every recorder segment
    pub recorder_segments: Vec<usize>,
    /// Correlation per refined segment, or why refinement failed
    pub refinement: Result<Vec<f64>, String>,
    /// `None` while the `.eit` files are not converted
    pub eit: Option<EitSummary>,
}

impl ParticipantReport {
    /// Load and segment a participant folder and summarize it.
    pub fn collect(dir: &Path, settings: &Settings) -> AppResult<Self> {
        let recordings = load_participant(dir, settings)?;
        let (device, recorder) = recordings.segment(settings)?;

        let refinement: Result<Vec<f64>, String> =
            refine_device_segments(&device, &recorder, settings.sync.refine_target_len)
                .map(|refined| refined.iter().map(|r| r.correlation).collect())
                .map_err(|e| e.to_string());

        let frames_dir = dir.join(&settings.eit.processed_dir);
        let eit = if has_converted_frames(&frames_dir) {
            let series = load_frames(&frames_dir)?;
            Some(EitSummary {
                frames: series.len(),
                span: series.span(),
                rate: series.mean_rate(),
            })
        } else {
            None
        };

        let protocol = &recordings.protocol;
        Ok(Self {
            participant: protocol.participant.number.clone(),
            leg: protocol.participant.leg,
            force_levels: protocol.isokinetic.force_levels.clone(),
            device_samples: recordings.device.len(),
            recorder_samples: recordings.recorder.len(),
            device_segments: device.segment_lengths(),
            recorder_segments: recorder.segmentation.segment_lengths(),
            refinement,
            eit,
        })
    }

    /// Device and recorder found a different number of contractions.
    pub fn count_mismatch(&self) -> bool {
        self.device_segments.len() != self.recorder_segments.len()
    }
}

impl fmt::Display for ParticipantReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Participant:        {}", self.participant)?;
        writeln!(f, "Leg:                {}", self.leg)?;
        writeln!(f, "Force levels:       {:?}", self.force_levels)?;
        writeln!(f, "Device samples:     {}", self.device_samples)?;
        writeln!(f, "Recorder samples:   {}", self.recorder_samples)?;
        writeln!(f, "Device segments:    {:?}", self.device_segments)?;
        writeln!(f, "Recorder segments:  {:?}", self.recorder_segments)?;
        if self.count_mismatch() {
            writeln!(
                f,
                "WARNING: segment count mismatch ({} vs {})",
                self.device_segments.len(),
                self.recorder_segments.len()
            )?;
        }
        match &self.refinement {
            Ok(corr) => {
                let corr: Vec<String> = corr.iter().map(|c| format!("{c:.3}")).collect();
                writeln!(f, "Refinement corr.:   [{}]", corr.join(", "))?;
            }
            Err(e) => writeln!(f, "Refinement failed:  {e}")?,
        }
        match &self.eit {
            Some(eit) => {
                writeln!(f, "EIT frames:         {}", eit.frames)?;
                writeln!(f, "EIT span:           {:.1} s", eit.span)?;
                if let Some(rate) = eit.rate {
                    writeln!(f, "EIT frame rate:     {rate:.2} Hz")?;
                }
            }
            None => writeln!(f, "EIT frames:         not converted")?,
        }
        Ok(())
    }
}
