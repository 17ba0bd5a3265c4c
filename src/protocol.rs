//! Measurement protocol files.
//!
//! Every participant folder carries one `*protocol.json` written at recording
//! time. It names the participant, the force level sequence of the isokinetic
//! trials and the EIT device setup:
//!
//! ```json
//! {
//!   "participant": {"Number": "P03", "age": "27", "gender": "female", "leg": "right"},
//!   "isokinetic_measurement": {"rotation_velocity": "30 deg/s", "force_levels": "[40 40 20 20]"},
//!   "eit_measurement": {"excitation_frequency": 100000, "burst_count": 1,
//!                       "amplitude": "1 mA", "frame_rate": 20, "n_el": 16, "injection_skip": 5},
//!   "notes": ""
//! }
//! ```
//!
//! Several fields hold numbers with units or bracketed lists as strings; the
//! parser accepts both that form and plain JSON numbers/arrays.

use crate::error::{AppResult, SyncError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix identifying protocol files.
pub const PROTOCOL_SUFFIX: &str = "protocol.json";

/// Measured leg. Torque of the left leg is recorded with inverted sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    /// Right leg (reference orientation)
    #[default]
    Right,
    /// Left leg
    Left,
}

impl Leg {
    /// Sign applied to the recorded torque.
    pub fn sign(self) -> f64 {
        match self {
            Leg::Right => 1.0,
            Leg::Left => -1.0,
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Right => write!(f, "right"),
            Leg::Left => write!(f, "left"),
        }
    }
}

impl<'de> Deserialize<'de> for Leg {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(if raw.trim().eq_ignore_ascii_case("left") {
            Leg::Left
        } else {
            Leg::Right
        })
    }
}

/// Participant block.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Participant {
    #[serde(
        rename = "Number",
        alias = "number",
        default,
        deserialize_with = "string_or_number"
    )]
    pub number: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub age: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub leg: Leg,
}

/// Isokinetic trial settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct IsokineticMeasurement {
    /// Dynamometer arm velocity (deg/s)
    pub rotation_velocity: i64,
    /// Target force level of each trial in recording order (% MVC)
    pub force_levels: Vec<i64>,
}

/// EIT device setup.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EitMeasurement {
    pub excitation_frequency: f64,
    pub burst_count: i64,
    pub amplitude: i64,
    pub frame_rate: i64,
    pub n_el: usize,
    pub injection_skip: usize,
}

/// A parsed protocol file.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Protocol {
    /// File the protocol was read from
    pub path: PathBuf,
    /// Participant details
    pub participant: Participant,
    /// Isokinetic trial settings
    pub isokinetic: IsokineticMeasurement,
    /// EIT device setup
    pub eit: EitMeasurement,
    /// Free-text notes
    pub notes: String,
}

impl Protocol {
    /// Find and parse the protocol file of a participant folder.
    pub fn load(dir: &Path) -> AppResult<Self> {
        let path = find_protocol_file(dir)?;
        let text = std::fs::read_to_string(&path)?;
        let mut protocol = Self::from_json(&text)?;
        debug!("Loaded protocol file: {}", path.display());
        protocol.path = path;
        Ok(protocol)
    }

    /// Parse protocol JSON text.
    pub fn from_json(text: &str) -> AppResult<Self> {
        let data: Value = serde_json::from_str(text)?;

        let participant = match data.get("participant") {
            Some(v) => serde_json::from_value(v.clone())?,
            None => Participant::default(),
        };

        let iso = data.get("isokinetic_measurement");
        let isokinetic = IsokineticMeasurement {
            rotation_velocity: iso
                .and_then(|v| v.get("rotation_velocity"))
                .map_or(0, leading_int),
            force_levels: iso
                .and_then(|v| v.get("force_levels"))
                .map_or_else(Vec::new, parse_force_levels),
        };

        let eit = data.get("eit_measurement");
        let field = |name: &str| eit.and_then(|v| v.get(name));
        let eit = EitMeasurement {
            excitation_frequency: field("excitation_frequency")
                .and_then(number_of)
                .unwrap_or(0.0),
            burst_count: field("burst_count").map_or(0, leading_int),
            amplitude: field("amplitude").map_or(0, leading_int),
            frame_rate: field("frame_rate").map_or(0, leading_int),
            n_el: field("n_el").map_or(0, |v| leading_int(v).max(0) as usize),
            injection_skip: field("injection_skip").map_or(0, |v| leading_int(v).max(0) as usize),
        };

        let notes = data
            .get("notes")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            path: PathBuf::new(),
            participant,
            isokinetic,
            eit,
            notes,
        })
    }
}

/// First `*protocol.json` in `dir` by name.
pub fn find_protocol_file(dir: &Path) -> AppResult<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| SyncError::MissingInput(format!("{}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(PROTOCOL_SUFFIX))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next().ok_or_else(|| {
        SyncError::MissingInput(format!("no *{PROTOCOL_SUFFIX} in {}", dir.display()))
    })
}

/// Leading integer of values such as `"30 deg/s"`, `"1 mA"` or `20`.
fn leading_int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s
            .split_whitespace()
            .next()
            .and_then(|tok| {
                tok.parse::<i64>()
                    .ok()
                    .or_else(|| tok.parse::<f64>().ok().map(|f| f as i64))
            })
            .unwrap_or(0),
        _ => 0,
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.split_whitespace().next()?.parse().ok(),
        _ => None,
    }
}

/// Force levels from `"[20 30 40]"`, `"[20, 30]"` or `[20, 30]`.
/// Anything unparsable yields an empty list.
fn parse_force_levels(value: &Value) -> Vec<i64> {
    match value {
        Value::String(s) => s
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|tok| !tok.is_empty())
            .map(str::parse::<i64>)
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_default(),
        Value::Array(items) => items
            .iter()
            .map(Value::as_i64)
            .collect::<Option<Vec<_>>>()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "participant": {"Number": "P03", "age": 27, "gender": "female", "leg": "Left"},
        "isokinetic_measurement": {"rotation_velocity": "30 deg/s", "force_levels": "[40 40 20 20 70]"},
        "eit_measurement": {"excitation_frequency": 100000, "burst_count": 1,
                            "amplitude": "1 mA", "frame_rate": 20, "n_el": 16, "injection_skip": 5},
        "notes": "second session"
    }"#;

    #[test]
    fn test_parse_full_protocol() {
        let p = Protocol::from_json(SAMPLE).unwrap();
        assert_eq!(p.participant.number, "P03");
        assert_eq!(p.participant.age, "27");
        assert_eq!(p.participant.leg, Leg::Left);
        assert_eq!(p.isokinetic.rotation_velocity, 30);
        assert_eq!(p.isokinetic.force_levels, vec![40, 40, 20, 20, 70]);
        assert_eq!(p.eit.amplitude, 1);
        assert_eq!(p.eit.n_el, 16);
        assert_eq!(p.eit.injection_skip, 5);
        assert_eq!(p.notes, "second session");
    }

    #[test]
    fn test_missing_sections_default() {
        let p = Protocol::from_json(r#"{"participant": {"Number": "P01"}}"#).unwrap();
        assert_eq!(p.participant.leg, Leg::Right);
        assert!(p.isokinetic.force_levels.is_empty());
        assert_eq!(p.eit.n_el, 0);
        assert_eq!(p.notes, "");
    }

    #[test]
    fn test_numeric_participant_number() {
        let p = Protocol::from_json(r#"{"participant": {"Number": 3, "age": null}}"#).unwrap();
        assert_eq!(p.participant.number, "3");
        assert_eq!(p.participant.age, "");
    }

    #[test]
    fn test_force_level_variants() {
        assert_eq!(parse_force_levels(&Value::from("[20, 30,40]")), vec![20, 30, 40]);
        assert_eq!(parse_force_levels(&serde_json::json!([50, 60])), vec![50, 60]);
        assert!(parse_force_levels(&Value::from("[20 abc]")).is_empty());
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("P03_protocol.json"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("other.json"), "{}").unwrap();
        let p = Protocol::load(dir.path()).unwrap();
        assert!(p.path.ends_with("P03_protocol.json"));
    }

    #[test]
    fn test_missing_protocol_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Protocol::load(dir.path()),
            Err(SyncError::MissingInput(_))
        ));
    }
}
