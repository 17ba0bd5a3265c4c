//! Chunk files written by the acquisition script.
//!
//! The script saves the three analog channels of the dynamometer (angle,
//! torque, speed) every few seconds as
//! `<prefix>_YYYY-MM-DD_HH-MM-SS_<n>.json`, where the time is the start of
//! the recording block and `n` counts the samples saved so far. Later saves
//! of the same block supersede earlier ones, so only the highest `n` per
//! block time is read.

use super::{Segment, Segmentation};
use crate::config::RecorderConfig;
use crate::error::{AppResult, SyncError};
use crate::protocol::Leg;
use crate::signal::{edge_indices, find_peaks, scale_to_range, EdgeKind, LowPass};
use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

const NAME_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

static CHUNK_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"_(\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2})_(\d+)\.json$").ok()
});

/// Block start time (unix seconds) and sample count from a chunk file name.
pub fn parse_chunk_name(name: &str) -> Option<(f64, u64)> {
    let caps = CHUNK_NAME.as_ref()?.captures(name)?;
    let time = NaiveDateTime::parse_from_str(&caps[1], NAME_TIME_FORMAT).ok()?;
    let samples = caps[2].parse().ok()?;
    Some((time.and_utc().timestamp() as f64, samples))
}

/// One saved chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderChunk {
    /// Channels in the order angle, torque, speed
    pub data: Vec<Vec<f64>>,
    /// Sampling rate (Hz)
    pub sampling_rate: f64,
    /// Host clock readings taken while saving
    #[serde(default)]
    pub timestamps_current: Vec<f64>,
    /// Channel names as configured in the script
    #[serde(default)]
    pub channels: Vec<String>,
}

/// All chunks of a participant, concatenated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecorderRecording {
    /// Arm angle
    pub angle: Vec<f64>,
    /// Torque
    pub torque: Vec<f64>,
    /// Arm speed
    pub speed: Vec<f64>,
    /// Unix time of every sample
    pub timestamps: Vec<f64>,
    /// Host clock readings of all chunks
    pub timestamps_current: Vec<f64>,
    /// Sampling rate of the first chunk (Hz)
    pub sampling_rate: f64,
    /// Chunk files read, in order
    pub files: Vec<PathBuf>,
}

impl RecorderRecording {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.torque.len()
    }

    /// True when no samples were loaded.
    pub fn is_empty(&self) -> bool {
        self.torque.is_empty()
    }

    fn append(&mut self, chunk: RecorderChunk, start_time: f64, path: &Path) -> AppResult<()> {
        let [angle, torque, speed]: [Vec<f64>; 3] = chunk.data.try_into().map_err(|d: Vec<_>| {
            SyncError::Parse(format!(
                "{}: expected 3 channels, found {}",
                path.display(),
                d.len()
            ))
        })?;
        if angle.len() != torque.len() || torque.len() != speed.len() {
            return Err(SyncError::Parse(format!(
                "{}: channel lengths do not match ({}, {}, {})",
                path.display(),
                angle.len(),
                torque.len(),
                speed.len()
            )));
        }
        if !(chunk.sampling_rate > 0.0) {
            return Err(SyncError::Parse(format!(
                "{}: invalid sampling rate {}",
                path.display(),
                chunk.sampling_rate
            )));
        }
        if self.sampling_rate == 0.0 {
            self.sampling_rate = chunk.sampling_rate;
        } else if self.sampling_rate != chunk.sampling_rate {
            warn!(
                "{}: sampling rate {} differs from {}",
                path.display(),
                chunk.sampling_rate,
                self.sampling_rate
            );
        }

        let fs = chunk.sampling_rate;
        self.timestamps
            .extend((0..angle.len()).map(|i| start_time + i as f64 / fs));
        self.angle.extend(angle);
        self.torque.extend(torque);
        self.speed.extend(speed);
        self.timestamps_current.extend(chunk.timestamps_current);
        self.files.push(path.to_path_buf());
        Ok(())
    }
}

/// Load the chunk files of `dir`, keeping the last save of every block.
pub fn load_recorder(dir: &Path) -> AppResult<RecorderRecording> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| SyncError::MissingInput(format!("{}: {e}", dir.display())))?;

    // block start (as integer seconds) -> (sample count, start, path)
    let mut latest: BTreeMap<i64, (u64, f64, PathBuf)> = BTreeMap::new();
    for path in entries.filter_map(|e| e.ok().map(|e| e.path())) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((start, samples)) = parse_chunk_name(name) else {
            continue;
        };
        let key = start as i64;
        match latest.get(&key) {
            Some((n, _, _)) if *n >= samples => {}
            _ => {
                latest.insert(key, (samples, start, path));
            }
        }
    }

    if latest.is_empty() {
        return Err(SyncError::MissingInput(format!(
            "no recorder chunks in {}",
            dir.display()
        )));
    }

    let mut rec = RecorderRecording::default();
    for (_, (_, start, path)) in latest {
        let text = std::fs::read_to_string(&path)?;
        let chunk: RecorderChunk = serde_json::from_str(&text)?;
        rec.append(chunk, start, &path)?;
        debug!("Loaded recorder chunk {}", path.display());
    }
    info!(
        "Loaded {} recorder samples from {} chunks",
        rec.len(),
        rec.files.len()
    );
    Ok(rec)
}

/// Recorder segmentation with the matching sample times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecorderSegmentation {
    /// Torque/angle segments
    pub segmentation: Segmentation,
    /// Unix time of every sample
    pub timestamps: Vec<f64>,
    /// Binary movement window, padded at the front
    pub speed_window: Vec<f64>,
}

impl RecorderSegmentation {
    /// Sample times of segment `idx`.
    pub fn timestamp_segment(&self, idx: usize) -> Option<&[f64]> {
        let seg = self.segmentation.segments.get(idx)?;
        self.timestamps.get(seg.start..seg.stop)
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segmentation.len()
    }

    /// True when no contraction was found.
    pub fn is_empty(&self) -> bool {
        self.segmentation.is_empty()
    }
}

/// Filters, scales and segments a recorder recording.
#[derive(Debug, Clone)]
pub struct RecorderProcessor {
    config: RecorderConfig,
    leg: Leg,
}

impl RecorderProcessor {
    /// Processor for the given settings and measured leg.
    pub fn new(config: RecorderConfig, leg: Leg) -> Self {
        Self { config, leg }
    }

    /// Sign-correct, filter, scale and segment.
    pub fn process(&self, rec: &RecorderRecording) -> AppResult<RecorderSegmentation> {
        if rec.is_empty() {
            return Err(SyncError::Processing("empty recorder recording".to_string()));
        }
        let c = &self.config;
        let sign = self.leg.sign();
        let flip = |v: &[f64]| v.iter().map(|x| x * sign).collect::<Vec<_>>();
        let mut angle = flip(&rec.angle);
        let mut torque_raw = flip(&rec.torque);
        let mut speed = flip(&rec.speed);

        let mut torque = if c.filter_enabled {
            LowPass::butterworth(c.filter_order, c.cutoff_hz, c.filter_sample_rate)?
                .filtfilt(&torque_raw)?
        } else {
            torque_raw.clone()
        };

        if c.scale_unit_range {
            angle = scale_to_range(&angle, 0.0, 1.0);
            torque = scale_to_range(&torque, 0.0, 1.0);
            torque_raw = scale_to_range(&torque_raw, 0.0, 1.0);
            speed = scale_to_range(&speed, 0.0, 1.0);
        }

        let speed_window = self.speed_window(&speed);
        let segments = self.detect_segments(&angle, &speed_window);
        debug!("Recorder segments: {:?}", segments);

        Ok(RecorderSegmentation {
            segmentation: Segmentation::build(torque, torque_raw, angle, speed, segments),
            timestamps: rec.timestamps.clone(),
            speed_window,
        })
    }

    /// 1.0 where the speed exceeds the threshold, with zero padding in front.
    pub fn speed_window(&self, speed: &[f64]) -> Vec<f64> {
        let mut window = vec![0.0; self.config.window_padding];
        window.extend(
            speed
                .iter()
                .map(|&v| if v > self.config.speed_threshold { 1.0 } else { 0.0 }),
        );
        window
    }

    /// Contractions end at angle peaks and start at the closest preceding
    /// rising edge of the speed window.
    pub fn detect_segments(&self, angle: &[f64], speed_window: &[f64]) -> Vec<Segment> {
        let c = &self.config;
        let stops = find_peaks(angle, c.peak_distance, c.peak_height);

        // Edges are indices into the padded window, so starts trail the
        // first fast sample by window_padding - 1. Segment lengths rely on it.
        let edges = edge_indices(speed_window, EdgeKind::Rising, 1.0);
        let starts: Vec<usize> = edges
            .iter()
            .enumerate()
            .filter(|&(i, &e)| i == 0 || e - edges[i - 1] > c.start_gap)
            .map(|(_, &e)| e)
            .collect();

        stops
            .into_iter()
            .filter_map(|stop| {
                let start = starts.iter().rev().find(|&&s| s < stop)?;
                Some(Segment {
                    start: start.saturating_sub(c.phase_shift),
                    stop,
                })
            })
            .filter(|s| s.len() > c.min_segment_len)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_chunk(dir: &Path, name: &str, data: [Vec<f64>; 3], fs: f64) {
        let body = json!({
            "data": data,
            "sampling_rate": fs,
            "timestamps_current": [0.0],
            "channels": ["ai0", "ai1", "ai2"],
        });
        std::fs::write(dir.join(name), body.to_string()).unwrap();
    }

    #[test]
    fn test_parse_chunk_name() {
        let (t, n) = parse_chunk_name("iso_2025-01-15_10-20-30_1200.json").unwrap();
        assert_eq!(t, 1_736_936_430.0);
        assert_eq!(n, 1200);
        assert!(parse_chunk_name("iso_2025-01-15_10-20-30_1200.npz").is_none());
        assert!(parse_chunk_name("notes.json").is_none());
    }

    #[test]
    fn test_keeps_last_chunk_per_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        write_chunk(
            dir.path(),
            "iso_2025-01-15_10-20-30_2.json",
            [vec![1.0; 2], vec![1.0; 2], vec![1.0; 2]],
            10.0,
        );
        write_chunk(
            dir.path(),
            "iso_2025-01-15_10-20-30_4.json",
            [vec![2.0; 4], vec![2.0; 4], vec![2.0; 4]],
            10.0,
        );
        write_chunk(
            dir.path(),
            "iso_2025-01-15_10-20-40_3.json",
            [vec![3.0; 3], vec![3.0; 3], vec![3.0; 3]],
            10.0,
        );
        std::fs::write(dir.path().join("readme.txt"), "x").unwrap();

        let rec = load_recorder(dir.path()).unwrap();
        assert_eq!(rec.files.len(), 2);
        assert_eq!(rec.torque, vec![2.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0]);
        let t0 = 1_736_936_430.0;
        assert!((rec.timestamps[1] - (t0 + 0.1)).abs() < 1e-9);
        assert_eq!(rec.timestamps[4], t0 + 10.0);
        assert_eq!(rec.sampling_rate, 10.0);
    }

    #[test]
    fn test_mismatched_channels_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_chunk(
            dir.path(),
            "iso_2025-01-15_10-20-30_2.json",
            [vec![1.0; 2], vec![1.0; 3], vec![1.0; 2]],
            10.0,
        );
        assert!(matches!(load_recorder(dir.path()), Err(SyncError::Parse(_))));
    }

    #[test]
    fn test_speed_window_pads_and_thresholds() {
        let mut config = RecorderConfig::default();
        config.window_padding = 2;
        let p = RecorderProcessor::new(config, Leg::Right);
        assert_eq!(
            p.speed_window(&[0.2, 0.96, 1.0, 0.95]),
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0]
        );
    }

    #[test]
    fn test_detect_segments_pairs_nearest_start() {
        let mut config = RecorderConfig::default();
        config.peak_distance = 50;
        config.start_gap = 20;
        config.min_segment_len = 30;
        let p = RecorderProcessor::new(config, Leg::Right);

        let mut angle = vec![0.0; 400];
        angle[150] = 1.0;
        angle[350] = 1.0;
        let mut window = vec![0.0; 400];
        // double edge at 100/105 collapses to the first one
        window[101] = 1.0;
        window[106..110].fill(1.0);
        window[301..305].fill(1.0);
        let segments = p.detect_segments(&angle, &window);
        assert_eq!(
            segments,
            vec![
                Segment { start: 100, stop: 150 },
                Segment { start: 300, stop: 350 }
            ]
        );

        // both contractions are 50 samples, below a minimum of 60
        let mut tight = RecorderConfig::default();
        tight.peak_distance = 50;
        tight.start_gap = 20;
        tight.min_segment_len = 60;
        let p = RecorderProcessor::new(tight, Leg::Right);
        assert!(p.detect_segments(&angle, &window).is_empty());
    }

    #[test]
    fn test_start_trails_speed_by_padding() {
        let mut config = RecorderConfig::default();
        config.peak_distance = 50;
        config.start_gap = 20;
        config.min_segment_len = 30;
        config.window_padding = 10;
        let p = RecorderProcessor::new(config, Leg::Right);

        let mut angle = vec![0.0; 400];
        angle[150] = 1.0;
        let speed: Vec<f64> = (0..400)
            .map(|i| if (100..160).contains(&i) { 1.0 } else { 0.0 })
            .collect();
        let window = p.speed_window(&speed);
        // first fast sample is 100, the start lands at 100 + 10 - 1
        assert_eq!(
            p.detect_segments(&angle, &window),
            vec![Segment { start: 109, stop: 150 }]
        );
    }

    #[test]
    fn test_phase_shift_clamps_at_zero() {
        let mut config = RecorderConfig::default();
        config.peak_distance = 10;
        config.phase_shift = 50;
        config.min_segment_len = 10;
        let p = RecorderProcessor::new(config, Leg::Right);
        let mut angle = vec![0.0; 100];
        angle[60] = 1.0;
        let mut window = vec![0.0; 100];
        window[21..30].fill(1.0);
        assert_eq!(
            p.detect_segments(&angle, &window),
            vec![Segment { start: 0, stop: 60 }]
        );
    }
}
