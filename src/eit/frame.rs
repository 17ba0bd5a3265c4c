//! Electrode-ordered EIT frames and frame series.

use super::parser::{FrequencyScale, RawEitFile};
use crate::error::{AppResult, SyncError};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// One EIT frame as an `n_el × n_el` complex matrix.
///
/// Row `r` holds the voltages measured while injecting between electrode
/// `r + 1` and the electrode `skip + 1` positions further round the ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EitFrame {
    /// Setup name of the source file
    pub setup_name: String,
    /// Acquisition time (unix seconds)
    pub timestamp: f64,
    /// Electrode count
    pub n_el: usize,
    /// Injection skip used to pick the rows
    pub injection_skip: usize,
    /// Sweep spacing
    pub f_scale: FrequencyScale,
    /// Row-major matrix, `n_el * n_el` entries
    pub matrix: Vec<Complex64>,
}

impl EitFrame {
    /// Matrix entry at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Option<Complex64> {
        if row >= self.n_el || col >= self.n_el {
            return None;
        }
        self.matrix.get(row * self.n_el + col).copied()
    }

    /// Row-major magnitudes `|z|`.
    pub fn magnitudes(&self) -> Vec<f64> {
        self.matrix.iter().map(|z| z.norm()).collect()
    }
}

/// Channel label of the injection starting at `electrode` (1-based).
pub fn injection_pair(electrode: usize, n_el: usize, skip: usize) -> (usize, usize) {
    let partner = (electrode - 1 + skip + 1) % n_el + 1;
    (electrode, partner)
}

/// Arrange a parsed file into an electrode-ordered frame.
pub fn assemble_frame(raw: &RawEitFile, n_el: usize, skip: usize) -> AppResult<EitFrame> {
    if n_el == 0 {
        return Err(SyncError::Parse("electrode count must be > 0".to_string()));
    }
    let mut matrix = Vec::with_capacity(n_el * n_el);
    for electrode in 1..=n_el {
        let (a, b) = injection_pair(electrode, n_el, skip);
        let key = format!("{a}_{b}");
        let row = raw.channels.get(&key).ok_or_else(|| {
            SyncError::Parse(format!(
                "{}: missing injection channel {key}",
                raw.setup_name()
            ))
        })?;
        if row.len() < n_el {
            return Err(SyncError::Parse(format!(
                "{}: channel {key} has {} values, expected at least {n_el}",
                raw.setup_name(),
                row.len()
            )));
        }
        matrix.extend_from_slice(&row[..n_el]);
    }

    Ok(EitFrame {
        setup_name: raw.setup_name().to_string(),
        timestamp: raw.timestamp()?,
        n_el,
        injection_skip: skip,
        f_scale: raw.f_scale,
        matrix,
    })
}

/// Converted frames ordered by acquisition time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EitSeries {
    /// Frame timestamps (unix seconds), ascending
    pub timestamps: Vec<f64>,
    /// Frames matching `timestamps`
    pub frames: Vec<EitFrame>,
}

impl EitSeries {
    /// Build a series, sorting frames by timestamp.
    pub fn from_frames(mut frames: Vec<EitFrame>) -> Self {
        frames.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        let timestamps = frames.iter().map(|f| f.timestamp).collect();
        Self { timestamps, frames }
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when the series holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Seconds between the first and last frame.
    pub fn span(&self) -> f64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(a), Some(b)) => b - a,
            _ => 0.0,
        }
    }

    /// Mean frame rate over the series (Hz).
    pub fn mean_rate(&self) -> Option<f64> {
        let span = self.span();
        (self.len() > 1 && span > 0.0).then(|| (self.len() - 1) as f64 / span)
    }
}

/// Read every converted frame (`*.json`) in `dir`.
///
/// Files that fail to parse are logged and skipped.
pub fn load_frames(dir: &Path) -> AppResult<EitSeries> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| SyncError::MissingInput(format!("{}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for path in &paths {
        let text = std::fs::read_to_string(path)?;
        match serde_json::from_str::<EitFrame>(&text) {
            Ok(frame) => frames.push(frame),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    debug!("Loaded {} EIT frames from {}", frames.len(), dir.display());
    Ok(EitSeries::from_frames(frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn raw_file(n_el: usize, skip: usize) -> RawEitFile {
        let mut header = BTreeMap::new();
        header.insert("setup_name".to_string(), "setup_00042".to_string());
        header.insert("date_time".to_string(), "2025.01.15. 10:20:30.500".to_string());
        let mut channels = BTreeMap::new();
        for e in 1..=n_el {
            let (a, b) = injection_pair(e, n_el, skip);
            let row = (0..n_el + 2)
                .map(|c| Complex64::new(a as f64, c as f64))
                .collect();
            channels.insert(format!("{a}_{b}"), row);
        }
        // a channel of another injection pattern that must be ignored
        channels.insert("1_2".to_string(), vec![Complex64::new(-1.0, -1.0); n_el]);
        RawEitFile {
            header,
            f_scale: FrequencyScale::Linear,
            channels,
        }
    }

    #[test]
    fn test_injection_pairs_wrap_around() {
        assert_eq!(injection_pair(1, 16, 5), (1, 7));
        assert_eq!(injection_pair(10, 16, 5), (10, 16));
        assert_eq!(injection_pair(11, 16, 5), (11, 1));
        assert_eq!(injection_pair(16, 16, 5), (16, 6));
    }

    #[test]
    fn test_assemble_uses_skip_pattern() {
        let frame = assemble_frame(&raw_file(16, 5), 16, 5).unwrap();
        assert_eq!(frame.matrix.len(), 256);
        assert_eq!(frame.timestamp, 1_736_936_430.5);
        for row in 0..16 {
            // row r comes from the channel injecting at electrode r + 1
            assert_eq!(frame.get(row, 0).unwrap().re, (row + 1) as f64);
            // only the first n_el values are kept
            assert_eq!(frame.get(row, 15).unwrap().im, 15.0);
        }
    }

    #[test]
    fn test_missing_channel_is_error() {
        let mut raw = raw_file(16, 5);
        raw.channels.remove("11_1");
        let err = assemble_frame(&raw, 16, 5).unwrap_err();
        assert!(err.to_string().contains("11_1"));
    }

    #[test]
    fn test_magnitudes() {
        let frame = assemble_frame(&raw_file(4, 1), 4, 1).unwrap();
        let mags = frame.magnitudes();
        assert_eq!(mags.len(), 16);
        // row 0, col 0: |1 + 0i| = 1; row 2 (electrode 3), col 4 does not exist
        assert_eq!(mags[0], 1.0);
        assert_eq!(frame.get(2, 4), None);
    }

    #[test]
    fn test_series_sorted_and_rate() {
        let mut a = assemble_frame(&raw_file(4, 1), 4, 1).unwrap();
        let mut b = a.clone();
        a.timestamp = 11.0;
        b.timestamp = 10.0;
        let series = EitSeries::from_frames(vec![a, b]);
        assert_eq!(series.timestamps, vec![10.0, 11.0]);
        assert_eq!(series.mean_rate(), Some(1.0));
    }
}
