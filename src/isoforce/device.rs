//! The dynamometer's own export.
//!
//! The device writes a tab-delimited text file with decimal commas. It is
//! cleaned once into a `Torque,Angle,Velocity` CSV which the pipeline reads
//! from then on.

use super::{Segment, Segmentation};
use crate::config::DeviceConfig;
use crate::error::{AppResult, SyncError};
use crate::protocol::Leg;
use crate::signal::{gradient, mean, LowPass};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Torque column header of the raw export.
pub const TORQUE_COLUMN: &str = "Torque (or Velocity - ISOT, or Force - CKC)";
/// Angle column header of the raw export.
pub const ANGLE_COLUMN: &str = "Angle (or Distance - CKC)";
/// Velocity column header of the raw export.
pub const VELOCITY_COLUMN: &str = "Velocity (or Torque - ISOT, or Force - CKC)";

#[derive(Debug, Serialize, Deserialize)]
struct DeviceRow {
    #[serde(rename = "Torque")]
    torque: f64,
    #[serde(rename = "Angle")]
    angle: f64,
    #[serde(rename = "Velocity")]
    velocity: f64,
}

/// Columns of a cleaned device export, all of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRecording {
    /// Torque (Nm)
    pub torque: Vec<f64>,
    /// Arm angle (deg)
    pub angle: Vec<f64>,
    /// Arm velocity (deg/s)
    pub velocity: Vec<f64>,
}

impl DeviceRecording {
    /// Read a cleaned `Torque,Angle,Velocity` CSV.
    pub fn from_csv(path: &Path) -> AppResult<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut rec = Self::default();
        for row in reader.deserialize::<DeviceRow>() {
            let row = row?;
            rec.torque.push(row.torque);
            rec.angle.push(row.angle);
            rec.velocity.push(row.velocity);
        }
        debug!("Read {} device samples from {}", rec.len(), path.display());
        Ok(rec)
    }

    /// Write as a `Torque,Angle,Velocity` CSV.
    pub fn to_csv(&self, path: &Path) -> AppResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for ((&torque, &angle), &velocity) in
            self.torque.iter().zip(&self.angle).zip(&self.velocity)
        {
            writer.serialize(DeviceRow {
                torque,
                angle,
                velocity,
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.torque.len()
    }

    /// True when the recording holds no samples.
    pub fn is_empty(&self) -> bool {
        self.torque.is_empty()
    }
}

/// Parse a value with a decimal comma, `None` for anything else.
fn parse_decimal(raw: &str) -> Option<f64> {
    let value = raw.trim().replace(',', ".");
    if value.is_empty() {
        return None;
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Clean a raw tab-delimited export into a CSV.
///
/// Unparsable cells are dropped per column, then all columns are truncated to
/// the shortest one.
pub fn clean_device_export(input: &Path, output: &Path) -> AppResult<DeviceRecording> {
    let bytes = std::fs::read(input)
        .map_err(|e| SyncError::MissingInput(format!("{}: {e}", input.display())))?;
    // exports are not always UTF-8 (degree signs in other columns)
    let text = String::from_utf8_lossy(&bytes);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| SyncError::Parse(format!("{}: missing column '{name}'", input.display())))
    };
    let (t_col, a_col, v_col) = (
        column(TORQUE_COLUMN)?,
        column(ANGLE_COLUMN)?,
        column(VELOCITY_COLUMN)?,
    );

    let mut rec = DeviceRecording::default();
    for record in reader.records() {
        let record = record?;
        let cell = |i: usize| record.get(i).and_then(parse_decimal);
        if let Some(v) = cell(t_col) {
            rec.torque.push(v);
        }
        if let Some(v) = cell(a_col) {
            rec.angle.push(v);
        }
        if let Some(v) = cell(v_col) {
            rec.velocity.push(v);
        }
    }

    let shortest = rec.torque.len().min(rec.angle.len()).min(rec.velocity.len());
    let longest = rec.torque.len().max(rec.angle.len()).max(rec.velocity.len());
    if shortest != longest {
        warn!(
            "Device columns differ in length ({}..{}), truncating to {}",
            shortest, longest, shortest
        );
    }
    rec.torque.truncate(shortest);
    rec.angle.truncate(shortest);
    rec.velocity.truncate(shortest);

    rec.to_csv(output)?;
    info!("Cleaned data saved to {}", output.display());
    Ok(rec)
}

/// Filters and segments a device recording.
#[derive(Debug, Clone)]
pub struct DeviceProcessor {
    config: DeviceConfig,
    leg: Leg,
}

impl DeviceProcessor {
    /// Processor for the given settings and measured leg.
    pub fn new(config: DeviceConfig, leg: Leg) -> Self {
        Self { config, leg }
    }

    /// Sign-correct, filter and segment.
    pub fn process(&self, rec: &DeviceRecording) -> AppResult<Segmentation> {
        if rec.is_empty() {
            return Err(SyncError::Processing("empty device recording".to_string()));
        }
        let sign = self.leg.sign();
        let torque_raw: Vec<f64> = rec.torque.iter().map(|t| t * sign).collect();
        let speed = rec.velocity.clone();

        let (torque, angle) = if self.config.filter_enabled {
            let c = &self.config;
            let torque = LowPass::butterworth(c.filter_order, c.cutoff_hz, c.torque_sample_rate)?
                .filtfilt(&torque_raw)?;
            let angle = LowPass::butterworth(c.filter_order, c.cutoff_hz, c.angle_sample_rate)?
                .filtfilt(&rec.angle)?;
            (torque, angle)
        } else {
            (torque_raw.clone(), rec.angle.clone())
        };

        let segments = self.detect_segments(&speed);
        debug!("Device segments: {:?}", segments);
        Ok(Segmentation::build(torque, torque_raw, angle, speed, segments))
    }

    /// Contractions from the speed gradient.
    ///
    /// Every second sample above the mean gradient (starting with the second)
    /// is a start, every second sample below the negated mean (starting with
    /// the first) a stop. Starts and stops pair up by position.
    pub fn detect_segments(&self, speed: &[f64]) -> Vec<Segment> {
        let g = gradient(speed);
        let m = mean(&g);
        let starts = g
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v > m)
            .map(|(i, _)| i)
            .skip(1)
            .step_by(2);
        let stops = g
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v < -m)
            .map(|(i, _)| i)
            .step_by(2);

        starts
            .zip(stops)
            .map(|(start, stop)| Segment { start, stop })
            .filter(|s| {
                s.stop > s.start
                    && s.len() >= self.config.min_segment_len
                    && s.len() <= self.config.max_segment_len
            })
            .collect()
    }
}
