//! Layered configuration using Figment.
//!
//! Settings are merged in this order (later wins):
//! 1. Built-in defaults (`Settings::default()`)
//! 2. `eit-sync.toml` in the working directory, or the file given with `--config`
//! 3. Environment variables prefixed with `EITSYNC_`, using `__` between sections
//!
//! ```text
//! EITSYNC_APPLICATION__LOG_LEVEL=debug
//! EITSYNC_SYNC__MAX_OFFSET_S=2.5
//! EITSYNC_ISOFORCE__RECORDER__PEAK_DISTANCE=400
//! ```
//!
//! After loading, `Settings::validate` rejects values that parse but make no
//! sense for the pipeline (odd filter orders, cutoffs above Nyquist, ...).

use crate::analysis::FeatureScaling;
use crate::dataset::{Normalization, SampleFormat};
use crate::error::{AppResult, SyncError};
use crate::sync::SyncMode;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "eit-sync.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "EITSYNC_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logging and general behaviour
    pub application: ApplicationConfig,
    /// EIT file conversion
    pub eit: EitConfig,
    /// Torque recording processing
    pub isoforce: IsoforceConfig,
    /// Stream alignment
    pub sync: SyncConfig,
    /// Dataset export
    pub dataset: DatasetConfig,
    /// Post-processing analysis
    pub analysis: AnalysisConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// EIT conversion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EitConfig {
    /// Electrode count used when the protocol does not state one
    pub default_n_el: usize,
    /// Injection skip used when the protocol does not state one
    pub default_injection_skip: usize,
    /// Directory (relative to a participant folder) holding raw EIT sessions
    pub raw_dir: String,
    /// Directory (relative to a participant folder) receiving converted frames
    pub processed_dir: String,
}

impl Default for EitConfig {
    fn default() -> Self {
        Self {
            default_n_el: 16,
            default_injection_skip: 5,
            raw_dir: "eit_raw".to_string(),
            processed_dir: "eit_processed".to_string(),
        }
    }
}

/// Torque recording settings for both acquisition paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsoforceConfig {
    /// Dynamometer export processing
    pub device: DeviceConfig,
    /// Acquisition script chunk processing
    pub recorder: RecorderConfig,
}

/// Processing of the dynamometer's own export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Apply the zero-phase low-pass to torque and angle
    pub filter_enabled: bool,
    /// Torque sampling rate assumed by the filter (Hz)
    pub torque_sample_rate: f64,
    /// Angle sampling rate assumed by the filter (Hz)
    pub angle_sample_rate: f64,
    /// Low-pass cutoff (Hz)
    pub cutoff_hz: f64,
    /// Butterworth order (even)
    pub filter_order: usize,
    /// Shortest accepted contraction (samples)
    pub min_segment_len: usize,
    /// Longest accepted contraction (samples)
    pub max_segment_len: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            filter_enabled: true,
            torque_sample_rate: 100.0,
            angle_sample_rate: 400.0,
            cutoff_hz: 2.0,
            filter_order: 4,
            min_segment_len: 1000,
            max_segment_len: 2500,
        }
    }
}

/// Processing of the acquisition script's chunk files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Directory (relative to a participant folder) holding the chunk files
    pub dir: String,
    /// Apply the zero-phase low-pass to torque
    pub filter_enabled: bool,
    /// Sampling rate assumed by the filter (Hz)
    pub filter_sample_rate: f64,
    /// Low-pass cutoff (Hz)
    pub cutoff_hz: f64,
    /// Butterworth order (even)
    pub filter_order: usize,
    /// Scale every channel to 0..1 before segmentation
    pub scale_unit_range: bool,
    /// Minimum distance between angle peaks (samples)
    pub peak_distance: usize,
    /// Minimum scaled angle peak height
    pub peak_height: f64,
    /// Samples subtracted from each detected start
    pub phase_shift: usize,
    /// Scaled speed above which the arm counts as moving
    pub speed_threshold: f64,
    /// Zeros prepended to the speed window
    pub window_padding: usize,
    /// Minimum gap between accepted start edges (samples)
    pub start_gap: usize,
    /// Shortest accepted contraction (samples)
    pub min_segment_len: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            dir: "iso_raw".to_string(),
            filter_enabled: true,
            filter_sample_rate: 100.0,
            cutoff_hz: 2.0,
            filter_order: 4,
            scale_unit_range: true,
            peak_distance: 500,
            peak_height: 0.7,
            phase_shift: 0,
            speed_threshold: 0.95,
            window_padding: 10,
            start_gap: 400,
            min_segment_len: 300,
        }
    }
}

/// Alignment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Frame lookup strategy
    pub mode: SyncMode,
    /// Largest accepted start/end offset between streams (seconds)
    pub max_offset_s: f64,
    /// Recorder timestamps used as the DTW reference in slow mode
    pub dtw_reference_len: usize,
    /// Sliding window length of the DTW search
    pub dtw_window: usize,
    /// Refine device segments by cross-correlation against the recorder
    pub refine_device_segments: bool,
    /// Common length of refined segments
    pub refine_target_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Fast,
            max_offset_s: 5.0,
            dtw_reference_len: 5,
            dtw_window: 4,
            refine_device_segments: false,
            refine_target_len: 1500,
        }
    }
}

/// Dataset export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Root directory of the exported dataset
    pub output_dir: PathBuf,
    /// Sample file format
    pub format: SampleFormat,
    /// Participant folders P01..Pnn scanned by batch commands
    pub participant_count: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("dataset"),
            format: SampleFormat::Json,
            participant_count: 15,
        }
    }
}

/// Analysis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Principal components to compute
    pub components: usize,
    /// Dataset-level normalization applied when loading
    pub normalization: Normalization,
    /// Feature scaling applied before PCA
    pub scaling: FeatureScaling,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            components: 2,
            normalization: Normalization::Global,
            scaling: FeatureScaling::None,
        }
    }
}

impl Settings {
    /// Load settings from defaults, the config file and the environment.
    ///
    /// With `path == None` the default file is optional. An explicit path that
    /// does not exist is an error.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let file = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(SyncError::MissingInput(format!(
                        "configuration file {} not found",
                        p.display()
                    )));
                }
                p.to_path_buf()
            }
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(&file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(SyncError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.eit.default_n_el < 2 {
            return Err(SyncError::Configuration(format!(
                "Invalid default_n_el {}. Must be at least 2",
                self.eit.default_n_el
            )));
        }

        let device = &self.isoforce.device;
        validate_filter("device torque", device.filter_order, device.cutoff_hz, device.torque_sample_rate)?;
        validate_filter("device angle", device.filter_order, device.cutoff_hz, device.angle_sample_rate)?;
        if device.min_segment_len >= device.max_segment_len {
            return Err(SyncError::Configuration(format!(
                "Device segment bounds out of order: min {} >= max {}",
                device.min_segment_len, device.max_segment_len
            )));
        }

        let recorder = &self.isoforce.recorder;
        validate_filter(
            "recorder torque",
            recorder.filter_order,
            recorder.cutoff_hz,
            recorder.filter_sample_rate,
        )?;
        if recorder.peak_distance == 0 {
            return Err(SyncError::Configuration(
                "peak_distance must be > 0".to_string(),
            ));
        }

        if !(self.sync.max_offset_s > 0.0) {
            return Err(SyncError::Configuration(format!(
                "Invalid max_offset_s {}. Must be positive",
                self.sync.max_offset_s
            )));
        }
        if self.sync.dtw_window == 0 || self.sync.dtw_reference_len == 0 {
            return Err(SyncError::Configuration(
                "dtw_window and dtw_reference_len must be > 0".to_string(),
            ));
        }
        if self.sync.refine_target_len < 2 {
            return Err(SyncError::Configuration(format!(
                "Invalid refine_target_len {}. Must be at least 2",
                self.sync.refine_target_len
            )));
        }

        if self.analysis.components == 0 {
            return Err(SyncError::Configuration(
                "analysis.components must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SyncError::Configuration(format!("cannot render settings: {e}")))
    }
}

fn validate_filter(name: &str, order: usize, cutoff_hz: f64, sample_rate: f64) -> AppResult<()> {
    if order < 2 || order % 2 != 0 {
        return Err(SyncError::Configuration(format!(
            "Invalid {name} filter order {order}. Must be even and >= 2"
        )));
    }
    if !(cutoff_hz > 0.0) || cutoff_hz >= sample_rate / 2.0 {
        return Err(SyncError::Configuration(format!(
            "Invalid {name} cutoff {cutoff_hz} Hz for sample rate {sample_rate} Hz"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_odd_filter_order_rejected() {
        let mut settings = Settings::default();
        settings.isoforce.device.filter_order = 3;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("filter order"));
    }

    #[test]
    fn test_cutoff_above_nyquist_rejected() {
        let mut settings = Settings::default();
        settings.isoforce.recorder.cutoff_hz = 60.0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("cutoff"));
    }

    #[test]
    fn test_segment_bounds_out_of_order() {
        let mut settings = Settings::default();
        settings.isoforce.device.min_segment_len = 3000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_config_file() {
        let result = Settings::load(Some(Path::new("/nonexistent/eit-sync.toml")));
        assert!(matches!(result, Err(SyncError::MissingInput(_))));
    }

    #[test]
    fn test_file_and_env_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [sync]
                mode = "slow"
                max_offset_s = 3.0

                [isoforce.recorder]
                peak_distance = 400
                "#,
            )?;
            jail.set_env("EITSYNC_SYNC__MAX_OFFSET_S", "2.5");

            let settings = Settings::load(None).map_err(|e| e.to_string())?;
            assert_eq!(settings.sync.mode, SyncMode::Slow);
            assert_eq!(settings.sync.max_offset_s, 2.5);
            assert_eq!(settings.isoforce.recorder.peak_distance, 400);
            // untouched values keep their defaults
            assert_eq!(settings.eit.default_n_el, 16);
            Ok(())
        });
    }

    #[test]
    fn test_toml_rendering_round_trips() {
        let settings = Settings::default();
        let rendered = settings.to_toml().unwrap();
        let parsed: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, settings);
    }
}
