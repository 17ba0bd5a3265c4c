//! Parser for the EIT device's `.eit` text export.
//!
//! A file holds one frame. The first 18 lines are header values in a fixed
//! order, followed by line pairs: an electrode pair (`"1 7"`) and the
//! tab-separated measurement row of that injection, alternating real and
//! imaginary parts.

use crate::error::{AppResult, SyncError};
use chrono::{DateTime, NaiveDateTime, Utc};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header field names in file order.
pub const HEADER_KEYS: [&str; 18] = [
    "number_of_header",
    "file_version_number",
    "setup_name",
    "date_time",
    "f_min",
    "f_max",
    "f_scale",
    "f_count",
    "current_amplitude",
    "framerate",
    "phase_correct_parameter",
    "unknown_1",
    "unknown_2",
    "unknown_3",
    "unknown_4",
    "unknown_5",
    "measurement_channels",
    "measurement_channels_independent_from_injection_pattern",
];

/// Layout of the `date_time` header value.
pub const DATE_TIME_FORMAT: &str = "%Y.%m.%d. %H:%M:%S%.f";

/// Spacing of the excitation frequency sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyScale {
    /// Header value `0`
    Linear,
    /// Any other header value
    Logarithmic,
}

/// One `.eit` file before electrode assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEitFile {
    /// Header values keyed by [`HEADER_KEYS`]
    pub header: BTreeMap<String, String>,
    /// Sweep spacing decoded from `f_scale`
    pub f_scale: FrequencyScale,
    /// Measurement rows keyed `"<inject+>_<inject->"`
    pub channels: BTreeMap<String, Vec<Complex64>>,
}

impl RawEitFile {
    /// Header value by key.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.header.get(key).map(String::as_str)
    }

    /// Setup name, used as the output file stem.
    pub fn setup_name(&self) -> &str {
        self.header("setup_name").unwrap_or_default()
    }

    /// Acquisition time as unix seconds.
    pub fn timestamp(&self) -> AppResult<f64> {
        let raw = self
            .header("date_time")
            .ok_or_else(|| SyncError::Parse("missing date_time header".to_string()))?;
        parse_timestamp(raw)
    }
}

/// Parse the text of one `.eit` file.
pub fn parse_eit(text: &str) -> AppResult<RawEitFile> {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .collect();
    if lines.len() < HEADER_KEYS.len() {
        return Err(SyncError::Parse(format!(
            "expected {} header lines, found {}",
            HEADER_KEYS.len(),
            lines.len()
        )));
    }

    let header: BTreeMap<String, String> = HEADER_KEYS
        .iter()
        .zip(&lines)
        .map(|(k, v)| ((*k).to_string(), v.trim().to_string()))
        .collect();

    let f_scale = if header.get("f_scale").map(String::as_str) == Some("0") {
        FrequencyScale::Linear
    } else {
        FrequencyScale::Logarithmic
    };

    let mut channels = BTreeMap::new();
    let body = &lines[HEADER_KEYS.len()..];
    for pair in body.chunks_exact(2) {
        let (label, row) = (pair[0].trim(), pair[1].trim());
        if label.is_empty() {
            continue;
        }
        let key = label.split_whitespace().collect::<Vec<_>>().join("_");
        channels.insert(key, parse_row(row)?);
    }

    Ok(RawEitFile {
        header,
        f_scale,
        channels,
    })
}

fn parse_row(row: &str) -> AppResult<Vec<Complex64>> {
    let values = row
        .split('\t')
        .map(str::trim)
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            tok.replace('E', "e")
                .parse::<f64>()
                .map_err(|e| SyncError::Parse(format!("bad value '{tok}': {e}")))
        })
        .collect::<AppResult<Vec<f64>>>()?;
    if values.len() % 2 != 0 {
        return Err(SyncError::Parse(format!(
            "odd number of values ({}) in measurement row",
            values.len()
        )));
    }
    Ok(values
        .chunks_exact(2)
        .map(|c| Complex64::new(c[0], c[1]))
        .collect())
}

/// `YYYY.MM.DD. HH:MM:SS.FFF` to unix seconds. Naive times are read as UTC.
pub fn parse_timestamp(raw: &str) -> AppResult<f64> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), DATE_TIME_FORMAT)?;
    let utc = naive.and_utc();
    Ok(utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_micros()) / 1e6)
}

/// Unix seconds back to `YYYY.MM.DD. HH:MM:SS.ffffff`.
pub fn format_timestamp(seconds: f64) -> Option<String> {
    let micros = (seconds * 1e6).round() as i64;
    let dt: DateTime<Utc> = DateTime::from_timestamp_micros(micros)?;
    Some(dt.format("%Y.%m.%d. %H:%M:%S%.6f").to_string())
}
