//! Batch conversion of raw `.eit` sessions into frame files.

use super::frame::assemble_frame;
use super::parser::parse_eit;
use crate::config::EitConfig;
use crate::error::{AppResult, SyncError};
use crate::protocol::Protocol;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Subdirectory of a session folder holding the `.eit` files.
pub const SETUP_DIR: &str = "setup";

/// Outcome of one directory conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionSummary {
    /// Session directory the files were read from
    pub source: PathBuf,
    /// Directory the frames were written to
    pub output: PathBuf,
    /// Frames written
    pub converted: usize,
    /// Files that could not be read, parsed or assembled
    pub skipped: Vec<PathBuf>,
}

/// Electrode count and injection skip for a participant.
///
/// A protocol value of 0 means "not recorded" and falls back to the
/// configured default.
pub fn electrode_setup(protocol: &Protocol, config: &EitConfig) -> (usize, usize) {
    let n_el = match protocol.eit.n_el {
        0 => config.default_n_el,
        n => n,
    };
    let skip = match protocol.eit.injection_skip {
        0 => config.default_injection_skip,
        s => s,
    };
    (n_el, skip)
}

/// First session folder under `<participant>/<raw_dir>` that has a `setup/`
/// subdirectory, in name order.
pub fn find_session_dir(participant_dir: &Path, config: &EitConfig) -> AppResult<PathBuf> {
    let raw_root = participant_dir.join(&config.raw_dir);
    let mut sessions: Vec<PathBuf> = std::fs::read_dir(&raw_root)
        .map_err(|e| SyncError::MissingInput(format!("{}: {e}", raw_root.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.join(SETUP_DIR).is_dir())
        .collect();
    sessions.sort();
    sessions
        .into_iter()
        .next()
        .map(|p| p.join(SETUP_DIR))
        .ok_or_else(|| {
            SyncError::MissingInput(format!("no EIT session in {}", raw_root.display()))
        })
}

/// Sorted `.eit` files of a directory.
pub fn list_eit_files(dir: &Path) -> AppResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "eit"))
        .collect();
    files.sort();
    Ok(files)
}

/// Convert the raw EIT session of a participant into frame files.
///
/// Frames are written as `<output>/<setup_name>.json`; `output` defaults to
/// `<participant>/<processed_dir>`. Files that fail are logged, counted in
/// the summary and skipped.
pub fn convert_directory(
    participant_dir: &Path,
    protocol: &Protocol,
    config: &EitConfig,
    output: Option<&Path>,
) -> AppResult<ConversionSummary> {
    let output = output.map_or_else(
        || participant_dir.join(&config.processed_dir),
        Path::to_path_buf,
    );
    std::fs::create_dir_all(&output)?;

    let source = find_session_dir(participant_dir, config)?;
    let files = list_eit_files(&source)?;
    if files.is_empty() {
        return Err(SyncError::MissingInput(format!(
            "no .eit files in {}",
            source.display()
        )));
    }

    let (n_el, skip) = electrode_setup(protocol, config);
    info!(
        "Converting {} EIT files from {} (n_el={}, skip={})",
        files.len(),
        source.display(),
        n_el,
        skip
    );

    let mut summary = ConversionSummary {
        source,
        output: output.clone(),
        ..Default::default()
    };

    for path in files {
        match convert_file(&path, n_el, skip, &output) {
            Ok(saved) => {
                debug!("Saved {}", saved.display());
                summary.converted += 1;
            }
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                summary.skipped.push(path);
            }
        }
    }

    info!(
        "Converted {} frames into {} ({} skipped)",
        summary.converted,
        output.display(),
        summary.skipped.len()
    );
    Ok(summary)
}

fn convert_file(path: &Path, n_el: usize, skip: usize, output: &Path) -> AppResult<PathBuf> {
    let text = std::fs::read_to_string(path)?;
    let raw = parse_eit(&text)?;
    let frame = assemble_frame(&raw, n_el, skip)?;
    if frame.setup_name.is_empty() {
        return Err(SyncError::Parse("empty setup_name header".to_string()));
    }
    let target = output.join(format!("{}.json", frame.setup_name));
    std::fs::write(&target, serde_json::to_vec(&frame)?)?;
    Ok(target)
}

/// True when `dir` already holds converted frames.
pub fn has_converted_frames(dir: &Path) -> bool {
    std::fs::read_dir(dir).is_ok_and(|mut entries| {
        entries.any(|e| {
            e.is_ok_and(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        })
    })
}
