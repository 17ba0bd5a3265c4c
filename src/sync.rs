//! Alignment of EIT frames with the torque recordings.
//!
//! Every contraction exists three times: as a device segment (calibrated
//! torque, no clock), as a recorder segment (scaled torque, wall-clock time
//! per sample) and as a run of EIT frames (wall-clock time per frame). The
//! device segment is stretched onto the recorder timestamps, then every
//! recorder timestamp is given an EIT frame, either the nearest one
//! ([`SyncMode::Fast`]) or a consecutive run found by dynamic time warping
//! ([`SyncMode::Slow`]).

use crate::config::SyncConfig;
use crate::eit::{EitFrame, EitSeries};
use crate::error::{AppResult, SyncError};
use crate::isoforce::{RecorderSegmentation, Segmentation};
use crate::protocol::Protocol;
use crate::signal::{
    detect_shift, linspace_indices, min_max, nearest_index, resample_pair, scale_to_range,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Frame lookup strategy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Nearest frame per recorder timestamp
    #[default]
    Fast,
    /// First frame by DTW, then consecutive frames
    Slow,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Fast => write!(f, "fast"),
            SyncMode::Slow => write!(f, "slow"),
        }
    }
}

/// Sample the device segment once per recorder timestamp.
///
/// # Errors
///
/// `Processing` if the recorder torque and timestamps differ in length.
pub fn align_device_to_recorder(
    device_segment: &[f64],
    recorder_torque: &[f64],
    recorder_ts: &[f64],
) -> AppResult<Vec<f64>> {
    if recorder_torque.len() != recorder_ts.len() {
        return Err(SyncError::Processing(format!(
            "Length mismatch: recorder torque ({}) vs timestamps ({})",
            recorder_torque.len(),
            recorder_ts.len()
        )));
    }
    Ok(linspace_indices(device_segment.len(), recorder_ts.len())
        .into_iter()
        .map(|i| device_segment[i])
        .collect())
}

/// Dynamic time warping distance without window constraint.
///
/// Steps cost the squared difference; the result is the square root of the
/// cheapest accumulated path cost.
pub fn dtw_distance(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return f64::INFINITY;
    }
    let m = b.len();
    let mut prev = vec![f64::INFINITY; m + 1];
    let mut curr = vec![f64::INFINITY; m + 1];
    prev[0] = 0.0;
    for &x in a {
        curr[0] = f64::INFINITY;
        for (j, &y) in b.iter().enumerate() {
            let cost = (x - y).powi(2);
            curr[j + 1] = cost + prev[j].min(prev[j + 1]).min(curr[j]);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m].sqrt()
}

/// Slide a `window`-long view over `long` and return the start with the
/// smallest DTW distance to `reference` (first one on ties).
pub fn best_dtw_match(long: &[f64], reference: &[f64], window: usize) -> Option<(usize, f64)> {
    if window == 0 || long.len() < window {
        return None;
    }
    let mut best: Option<(usize, f64)> = None;
    for (i, view) in long.windows(window).enumerate() {
        let dist = dtw_distance(reference, view);
        if best.map_or(true, |(_, d)| dist < d) {
            best = Some((i, dist));
        }
    }
    if let Some((idx, dist)) = best {
        debug!("Best DTW match at {} (distance={:.3})", idx, dist);
    }
    best
}

/// Device segment re-aligned to its recorder segment by cross-correlation.
#[derive(Debug, Clone, PartialEq)]
pub struct RefinedSegment {
    /// Device torque in its original range, `target_len` samples
    pub torque: Vec<f64>,
    /// Correlation lag on the common length (positive: device lags)
    pub shift: isize,
    /// Device samples dropped from the head
    pub device_trim: usize,
    /// Recorder samples dropped from the head
    pub recorder_trim: usize,
    /// `dot(device, recorder) / len` of the scaled, refined pair
    pub correlation: f64,
}

/// Shift-correct a device segment against its recorder segment.
///
/// Both are scaled to 0..1 and brought to a common length to measure the
/// lag. The lagging signal loses its leading samples, both are resampled to
/// `target_len` and the device torque is mapped back to its original range.
pub fn refine_device_segment(
    device: &[f64],
    recorder: &[f64],
    target_len: usize,
) -> AppResult<RefinedSegment> {
    let (Some((lo, hi)), false) = (min_max(device), recorder.is_empty()) else {
        return Err(SyncError::Processing(
            "cannot refine an empty segment".to_string(),
        ));
    };
    let dev = scale_to_range(device, 0.0, 1.0);
    let rec = scale_to_range(recorder, 0.0, 1.0);

    let (dev_c, rec_c) = resample_pair(&dev, &rec, None);
    let shift = detect_shift(&dev_c, &rec_c).unwrap_or(0);
    let common = dev_c.len() as f64;

    // lag measured on the common length, converted back per signal
    let to_samples =
        |len: usize| (shift.unsigned_abs() as f64 * len as f64 / common).round() as usize;
    let (device_trim, recorder_trim) = if shift >= 0 {
        (to_samples(dev.len()).min(dev.len() - 1), 0)
    } else {
        (0, to_samples(rec.len()).min(rec.len() - 1))
    };

    let (dev_r, rec_r) =
        resample_pair(&dev[device_trim..], &rec[recorder_trim..], Some(target_len));
    let correlation =
        dev_r.iter().zip(&rec_r).map(|(a, b)| a * b).sum::<f64>() / dev_r.len().max(1) as f64;
    debug!(
        "Refined segment: shift {} (device -{}, recorder -{}), correlation {:.3}",
        shift, device_trim, recorder_trim, correlation
    );

    Ok(RefinedSegment {
        torque: dev_r.iter().map(|v| v * (hi - lo) + lo).collect(),
        shift,
        device_trim,
        recorder_trim,
        correlation,
    })
}

/// Refine every device segment against the recorder segment of the same index.
pub fn refine_device_segments(
    device: &Segmentation,
    recorder: &RecorderSegmentation,
    target_len: usize,
) -> AppResult<Vec<RefinedSegment>> {
    let n = device.len().min(recorder.len());
    (0..n)
        .map(|idx| {
            let (Some(dev), Some(rec)) = (
                device.torque_segment(idx),
                recorder.segmentation.torque_segment(idx),
            ) else {
                return Err(SyncError::Processing(format!("segment {idx} out of range")));
            };
            refine_device_segment(dev, rec, target_len)
        })
        .collect()
}

/// One contraction with its EIT frames.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedSegment {
    /// Segment index in recording order
    pub index: usize,
    /// Target force of the trial (% MVC)
    pub target_force: i64,
    /// EIT frame matched to every recorder timestamp
    pub eit: Vec<EitFrame>,
    /// Device torque sampled at the recorder timestamps
    pub torque: Vec<f64>,
    /// Recorder timestamps
    pub ts_recorder: Vec<f64>,
    /// Timestamps of the matched frames
    pub ts_eit: Vec<f64>,
    /// Recorder minus EIT time at the first sample (s)
    pub offset_start: f64,
    /// Recorder minus EIT time at the last sample (s)
    pub offset_end: f64,
    /// Correlation of the refined device segment, if refinement ran
    pub refinement: Option<f64>,
}

impl SyncedSegment {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.torque.len()
    }

    /// True when the segment holds no samples.
    pub fn is_empty(&self) -> bool {
        self.torque.is_empty()
    }
}

/// A segment left out of the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSegment {
    /// Segment index
    pub index: usize,
    /// Why it was skipped
    pub reason: String,
}

/// Outcome of synchronizing one participant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    /// Participant number from the protocol
    pub participant: String,
    /// Frame lookup strategy used
    pub mode: SyncMode,
    /// Synchronized contractions
    pub segments: Vec<SyncedSegment>,
    /// Contractions left out
    pub skipped: Vec<SkippedSegment>,
    /// Force level dropped because the segment counts disagreed
    pub dropped_force_level: Option<i64>,
}

impl SyncResult {
    /// Samples over all segments.
    pub fn total_samples(&self) -> usize {
        self.segments.iter().map(SyncedSegment::len).sum()
    }

    /// Concatenated EIT frames.
    pub fn eit(&self) -> Vec<&EitFrame> {
        self.segments.iter().flat_map(|s| s.eit.iter()).collect()
    }

    /// Concatenated torque.
    pub fn torque(&self) -> Vec<f64> {
        self.segments.iter().flat_map(|s| s.torque.iter().copied()).collect()
    }

    /// Concatenated recorder timestamps.
    pub fn ts_recorder(&self) -> Vec<f64> {
        self.segments
            .iter()
            .flat_map(|s| s.ts_recorder.iter().copied())
            .collect()
    }

    /// Concatenated EIT timestamps.
    pub fn ts_eit(&self) -> Vec<f64> {
        self.segments.iter().flat_map(|s| s.ts_eit.iter().copied()).collect()
    }
}

/// EIT frame indices for a run of recorder timestamps.
fn frame_indices(
    eit_ts: &[f64],
    ts: &[f64],
    mode: SyncMode,
    config: &SyncConfig,
) -> Result<Vec<usize>, String> {
    match mode {
        SyncMode::Fast => ts
            .iter()
            .map(|&t| nearest_index(eit_ts, t).ok_or_else(|| "no EIT frames".to_string()))
            .collect(),
        SyncMode::Slow => {
            let reference = &ts[..ts.len().min(config.dtw_reference_len)];
            let (start, _) = best_dtw_match(eit_ts, reference, config.dtw_window)
                .ok_or_else(|| format!("fewer than {} EIT frames", config.dtw_window))?;
            if start + ts.len() > eit_ts.len() {
                return Err(format!(
                    "frames {}..{} run past the {} EIT frames",
                    start,
                    start + ts.len(),
                    eit_ts.len()
                ));
            }
            Ok((start..start + ts.len()).collect())
        }
    }
}

/// Synchronize one participant.
///
/// Segments are matched by index. If the device and recorder found a
/// different number of contractions, the common prefix is used and the first
/// protocol force level is dropped. Segments whose first or last sample is
/// further than `max_offset_s` from its frame are skipped.
pub fn synchronize(
    eit: &EitSeries,
    device: &Segmentation,
    recorder: &RecorderSegmentation,
    protocol: &Protocol,
    config: &SyncConfig,
) -> AppResult<SyncResult> {
    if eit.is_empty() {
        return Err(SyncError::MissingInput("no EIT frames to synchronize".to_string()));
    }

    let mut result = SyncResult {
        participant: protocol.participant.number.clone(),
        mode: config.mode,
        ..Default::default()
    };

    let mut force_levels = protocol.isokinetic.force_levels.clone();
    let count = device.len().min(recorder.len());
    if device.len() != recorder.len() {
        warn!(
            "Segment count mismatch: device {} vs recorder {}, using {}",
            device.len(),
            recorder.len(),
            count
        );
        if !force_levels.is_empty() {
            let dropped = force_levels.remove(0);
            info!("Target level {} was removed", dropped);
            result.dropped_force_level = Some(dropped);
        }
    }

    let refined = if config.refine_device_segments {
        Some(refine_device_segments(device, recorder, config.refine_target_len)?)
    } else {
        None
    };

    for idx in 0..count {
        let (Some(dev_seg), Some(rec_seg), Some(ts_seg)) = (
            device.torque_segment(idx),
            recorder.segmentation.torque_segment(idx),
            recorder.timestamp_segment(idx),
        ) else {
            return Err(SyncError::Processing(format!(
                "segment {idx} lies outside the recording"
            )));
        };

        let refined_seg = refined.as_ref().and_then(|r| r.get(idx));
        let (dev_seg, rec_seg, ts_seg, refinement) = match refined_seg {
            Some(r) => (
                r.torque.as_slice(),
                &rec_seg[r.recorder_trim..],
                &ts_seg[r.recorder_trim..],
                Some(r.correlation),
            ),
            None => (dev_seg, rec_seg, ts_seg, None),
        };

        let mut skip = |reason: String| {
            warn!("Skipping segment {}: {}", idx, reason);
            result.skipped.push(SkippedSegment { index: idx, reason });
        };

        let Some(&target_force) = force_levels.get(idx) else {
            skip("no force level in protocol".to_string());
            continue;
        };
        if ts_seg.is_empty() {
            skip("empty segment".to_string());
            continue;
        }

        let torque = align_device_to_recorder(dev_seg, rec_seg, ts_seg)?;
        let indices = match frame_indices(&eit.timestamps, ts_seg, config.mode, config) {
            Ok(indices) => indices,
            Err(reason) => {
                skip(reason);
                continue;
            }
        };

        let (Some(&first), Some(&last)) = (indices.first(), indices.last()) else {
            skip("no frames matched".to_string());
            continue;
        };
        let offset_start = ts_seg[0] - eit.timestamps[first];
        let offset_end = ts_seg[ts_seg.len() - 1] - eit.timestamps[last];
        if offset_start.abs() > config.max_offset_s || offset_end.abs() > config.max_offset_s {
            skip(format!(
                "time mismatch [{offset_start:.2}, {offset_end:.2}] s"
            ));
            continue;
        }

        debug!(
            "Segment {}: {} samples, target {}%, offsets [{:.3}, {:.3}]",
            idx,
            ts_seg.len(),
            target_force,
            offset_start,
            offset_end
        );
        result.segments.push(SyncedSegment {
            index: idx,
            target_force,
            eit: indices.iter().map(|&i| eit.frames[i].clone()).collect(),
            torque,
            ts_recorder: ts_seg.to_vec(),
            ts_eit: indices.iter().map(|&i| eit.timestamps[i]).collect(),
            offset_start,
            offset_end,
            refinement,
        });
    }

    info!(
        "Synchronized {} of {} segments ({} samples)",
        result.segments.len(),
        count,
        result.total_samples()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eit::FrequencyScale;
    use crate::isoforce::Segment;
    use crate::protocol::IsokineticMeasurement;
    use num_complex::Complex64;

    fn frame(ts: f64) -> EitFrame {
        EitFrame {
            setup_name: format!("{ts}"),
            timestamp: ts,
            n_el: 2,
            injection_skip: 0,
            f_scale: FrequencyScale::Linear,
            matrix: vec![Complex64::new(ts, 0.0); 4],
        }
    }

    /// EIT frames every 0.1 s from t = 100.
    fn eit_series(n: usize) -> EitSeries {
        EitSeries::from_frames((0..n).map(|i| frame(100.0 + i as f64 * 0.1)).collect())
    }

    fn segmentation(len: usize, segments: Vec<Segment>) -> Segmentation {
        Segmentation::build(
            (0..len).map(|i| i as f64).collect(),
            vec![0.0; len],
            vec![0.0; len],
            vec![0.0; len],
            segments,
        )
    }

    fn recorder(len: usize, t0: f64, fs: f64, segments: Vec<Segment>) -> RecorderSegmentation {
        RecorderSegmentation {
            segmentation: segmentation(len, segments),
            timestamps: (0..len).map(|i| t0 + i as f64 / fs).collect(),
            speed_window: Vec::new(),
        }
    }

    fn protocol(levels: Vec<i64>) -> Protocol {
        let mut p = Protocol {
            isokinetic: IsokineticMeasurement {
                rotation_velocity: 30,
                force_levels: levels,
            },
            ..Default::default()
        };
        p.participant.number = "P01".to_string();
        p
    }

    #[test]
    fn test_align_samples_device_by_linspace() {
        let device: Vec<f64> = (0..10).map(f64::from).collect();
        let aligned = align_device_to_recorder(&device, &[0.0; 4], &[0.0; 4]).unwrap();
        assert_eq!(aligned, vec![0.0, 3.0, 6.0, 9.0]);
        assert!(align_device_to_recorder(&device, &[0.0; 3], &[0.0; 4]).is_err());
    }

    #[test]
    fn test_dtw_identical_is_zero() {
        assert_eq!(dtw_distance(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 0.0);
        // warping absorbs the repeated sample
        assert_eq!(dtw_distance(&[1.0, 2.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(dtw_distance(&[0.0], &[3.0, 4.0]), 5.0);
    }

    #[test]
    fn test_best_dtw_match_finds_offset() {
        let long: Vec<f64> = (0..20).map(|i| i as f64 * 0.5).collect();
        let (start, dist) = best_dtw_match(&long, &[3.0, 3.5, 4.0, 4.5], 4).unwrap();
        assert_eq!(start, 6);
        assert_eq!(dist, 0.0);
        assert!(best_dtw_match(&long[..3], &[1.0], 4).is_none());
    }

    #[test]
    fn test_fast_sync_maps_to_nearest_frames() {
        let eit = eit_series(100);
        // recorder at 20 Hz from t = 101.02
        let rec = recorder(100, 101.02, 20.0, vec![Segment { start: 10, stop: 30 }]);
        let dev = segmentation(200, vec![Segment { start: 0, stop: 40 }]);
        let result =
            synchronize(&eit, &dev, &rec, &protocol(vec![40]), &SyncConfig::default()).unwrap();

        assert_eq!(result.segments.len(), 1);
        let seg = &result.segments[0];
        assert_eq!(seg.len(), 20);
        assert_eq!(seg.target_force, 40);
        // first sample at 101.52 -> frame at 101.5
        assert!((seg.ts_eit[0] - 101.5).abs() < 1e-9);
        assert!(seg.offset_start.abs() <= 0.05 + 1e-9);
        // device 0..40 stretched onto 20 samples
        assert_eq!(seg.torque[0], 0.0);
        assert_eq!(seg.torque[19], 39.0);
        assert_eq!(result.torque().len(), result.ts_eit().len());
    }

    #[test]
    fn test_segment_beyond_tolerance_is_skipped() {
        let eit = eit_series(50); // 100.0 .. 104.9
        let rec = recorder(
            400,
            100.0,
            20.0,
            vec![Segment { start: 0, stop: 20 }, Segment { start: 300, stop: 320 }],
        );
        let dev = segmentation(
            200,
            vec![Segment { start: 0, stop: 50 }, Segment { start: 100, stop: 150 }],
        );
        let result = synchronize(
            &eit,
            &dev,
            &rec,
            &protocol(vec![20, 30]),
            &SyncConfig::default(),
        )
        .unwrap();
        // second segment starts at t = 115, ten seconds after the last frame
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].index, 1);
    }

    #[test]
    fn test_count_mismatch_drops_first_force_level() {
        let eit = eit_series(100);
        let rec = recorder(
            200,
            100.0,
            20.0,
            vec![Segment { start: 0, stop: 20 }, Segment { start: 40, stop: 60 }],
        );
        let dev = segmentation(100, vec![Segment { start: 0, stop: 50 }]);
        let result = synchronize(
            &eit,
            &dev,
            &rec,
            &protocol(vec![20, 50, 70]),
            &SyncConfig::default(),
        )
        .unwrap();
        assert_eq!(result.dropped_force_level, Some(20));
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].target_force, 50);
    }

    #[test]
    fn test_slow_mode_takes_consecutive_frames() {
        let eit = eit_series(100);
        // recorder at the EIT rate, starting on frame 30
        let rec = recorder(60, 103.0, 10.0, vec![Segment { start: 0, stop: 20 }]);
        let dev = segmentation(60, vec![Segment { start: 0, stop: 20 }]);
        let config = SyncConfig {
            mode: SyncMode::Slow,
            ..Default::default()
        };
        let result = synchronize(&eit, &dev, &rec, &protocol(vec![60]), &config).unwrap();
        let seg = &result.segments[0];
        assert!((seg.ts_eit[0] - 103.0).abs() < 0.15);
        for w in seg.ts_eit.windows(2) {
            assert!((w[1] - w[0] - 0.1).abs() < 1e-9);
        }
    }

    #[test]
    fn test_slow_mode_overflow_is_skipped() {
        let eit = eit_series(10);
        let rec = recorder(60, 100.5, 10.0, vec![Segment { start: 0, stop: 20 }]);
        let dev = segmentation(60, vec![Segment { start: 0, stop: 20 }]);
        let config = SyncConfig {
            mode: SyncMode::Slow,
            ..Default::default()
        };
        let result = synchronize(&eit, &dev, &rec, &protocol(vec![60]), &config).unwrap();
        assert!(result.segments.is_empty());
        assert_eq!(result.skipped.len(), 1);
    }

    #[test]
    fn test_refine_recovers_lag_and_range() {
        let pulse = |i: usize, c: f64| (-((i as f64 - c) / 15.0).powi(2)).exp();
        let recorder: Vec<f64> = (0..200).map(|i| pulse(i, 80.0)).collect();
        // device lags the recorder by 20 samples and is in Nm
        let device: Vec<f64> = (0..200).map(|i| 10.0 + 50.0 * pulse(i, 100.0)).collect();
        let refined = refine_device_segment(&device, &recorder, 100).unwrap();
        assert_eq!(refined.shift, 20);
        assert_eq!(refined.device_trim, 20);
        assert_eq!(refined.recorder_trim, 0);
        assert_eq!(refined.torque.len(), 100);
        let (lo, hi) = min_max(&refined.torque).unwrap();
        assert!(lo > 9.0 && hi < 61.0);
        assert!(refined.correlation > 0.0);
    }
}
