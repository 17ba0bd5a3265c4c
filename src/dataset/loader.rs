//! Loading exported samples back into a feature matrix.

use super::sample::DatasetSample;
use super::writer::{list_sample_files, read_csv_samples, CSV_FILE};
use super::Normalization;
use crate::error::{AppResult, SyncError};
use crate::signal::z_score_in_place;
use std::path::Path;
use tracing::{debug, info, warn};

/// Samples of several participants as a row-major matrix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// `n_samples × n_features`, row-major
    pub x: Vec<f64>,
    /// Rows
    pub n_samples: usize,
    /// Columns
    pub n_features: usize,
    /// Torque label per row
    pub y: Vec<f64>,
    /// Target force per row
    pub target_force: Vec<i64>,
    /// Participant per row
    pub participants: Vec<String>,
}

impl Dataset {
    /// Feature row `i`.
    pub fn row(&self, i: usize) -> Option<&[f64]> {
        if i >= self.n_samples {
            return None;
        }
        self.x.get(i * self.n_features..(i + 1) * self.n_features)
    }

    /// True when no samples were loaded.
    pub fn is_empty(&self) -> bool {
        self.n_samples == 0
    }

    fn push_block(&mut self, samples: Vec<DatasetSample>, mut block: Vec<f64>) {
        self.n_samples += samples.len();
        self.x.append(&mut block);
        for s in samples {
            self.y.push(s.torque);
            self.target_force.push(s.target_force);
            self.participants.push(s.participant);
        }
    }
}

/// Subtract the per-feature mean of a row-major block.
fn remove_feature_mean(block: &mut [f64], n_features: usize) {
    if n_features == 0 || block.is_empty() {
        return;
    }
    let rows = block.len() / n_features;
    let mut means = vec![0.0; n_features];
    for row in block.chunks_exact(n_features) {
        for (m, v) in means.iter_mut().zip(row) {
            *m += v;
        }
    }
    for m in means.iter_mut() {
        *m /= rows as f64;
    }
    for row in block.chunks_exact_mut(n_features) {
        for (v, m) in row.iter_mut().zip(&means) {
            *v -= m;
        }
    }
}

/// Samples of one participant folder: the `sample_*.json` files in index
/// order, or `samples.csv` when the folder holds no JSON samples.
fn read_participant(folder: &Path) -> AppResult<Vec<DatasetSample>> {
    let files = match list_sample_files(folder) {
        Ok(files) => files,
        Err(_) => return Ok(Vec::new()),
    };
    if files.is_empty() {
        let csv = folder.join(CSV_FILE);
        return if csv.is_file() {
            read_csv_samples(&csv)
        } else {
            Ok(Vec::new())
        };
    }
    files
        .iter()
        .map(|path| -> AppResult<DatasetSample> {
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        })
        .collect()
}

/// Read the samples of every participant under `root`.
///
/// Participants without samples are logged and skipped. All samples must
/// have the same number of EIT features.
pub fn load_dataset(
    root: &Path,
    participants: &[String],
    normalization: Normalization,
) -> AppResult<Dataset> {
    info!(
        "Loading participants {:?} with normalization {:?}",
        participants, normalization
    );
    let mut dataset = Dataset::default();

    for participant in participants {
        let folder = root.join(participant);
        let samples = read_participant(&folder)?;
        if samples.is_empty() {
            warn!("No files for {} in {}", participant, folder.display());
            continue;
        }

        let mut block = Vec::with_capacity(samples.len() * samples[0].n_features());
        for sample in &samples {
            if dataset.n_features == 0 {
                dataset.n_features = sample.n_features();
            }
            if sample.n_features() != dataset.n_features {
                return Err(SyncError::Parse(format!(
                    "{}: {} features, expected {}",
                    folder.display(),
                    sample.n_features(),
                    dataset.n_features
                )));
            }
            block.extend_from_slice(&sample.eit);
        }

        match normalization {
            Normalization::Participant => {
                let (m, s) = z_score_in_place(&mut block);
                debug!("{}: participant z-score (mean={:.3}, std={:.3})", participant, m, s);
            }
            Normalization::ParticipantMeanfree => {
                remove_feature_mean(&mut block, dataset.n_features);
                let (m, s) = z_score_in_place(&mut block);
                debug!("{}: mean-free z-score (mean={:.3}, std={:.3})", participant, m, s);
            }
            Normalization::None | Normalization::Global => {}
        }
        dataset.push_block(samples, block);
    }

    if normalization == Normalization::Global && !dataset.is_empty() {
        let (m, s) = z_score_in_place(&mut dataset.x);
        debug!("Global z-score (mean={:.3}, std={:.3})", m, s);
    }

    info!(
        "Loaded {} samples with {} features",
        dataset.n_samples, dataset.n_features
    );
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::writer::{JsonSampleWriter, SampleWriter};
    use crate::signal::{mean, std_dev};

    fn write_participant(root: &Path, participant: &str, offset: f64) {
        let samples: Vec<DatasetSample> = (0..4)
            .map(|i| DatasetSample {
                eit: vec![offset + i as f64, offset + 2.0 * i as f64],
                n_el: 1,
                torque: i as f64,
                ts_iso: 0.0,
                ts_eit: 0.0,
                target_force: 30,
                participant: participant.to_string(),
            })
            .collect();
        let mut writer = JsonSampleWriter::new();
        writer.init(&root.join(participant)).unwrap();
        writer.write(&samples).unwrap();
        writer.finish().unwrap();
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_global_z_score() {
        let dir = tempfile::tempdir().unwrap();
        write_participant(dir.path(), "P01", 0.0);
        write_participant(dir.path(), "P02", 10.0);
        let ds = load_dataset(dir.path(), &names(&["P01", "P02", "P09"]), Normalization::Global)
            .unwrap();
        assert_eq!(ds.n_samples, 8);
        assert_eq!(ds.n_features, 2);
        assert!(mean(&ds.x).abs() < 1e-12);
        assert!((std_dev(&ds.x) - 1.0).abs() < 1e-12);
        assert_eq!(ds.participants[4], "P02");
        assert_eq!(ds.y[..4], [0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_participant_blocks_normalized_separately() {
        let dir = tempfile::tempdir().unwrap();
        write_participant(dir.path(), "P01", 0.0);
        write_participant(dir.path(), "P02", 100.0);
        let ds = load_dataset(dir.path(), &names(&["P01", "P02"]), Normalization::Participant)
            .unwrap();
        let (a, b) = ds.x.split_at(8);
        assert!(mean(a).abs() < 1e-12);
        assert!(mean(b).abs() < 1e-12);
        // same shape, different offset: identical after normalization
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_meanfree_removes_feature_means() {
        let dir = tempfile::tempdir().unwrap();
        write_participant(dir.path(), "P01", 5.0);
        let ds = load_dataset(
            dir.path(),
            &names(&["P01"]),
            Normalization::ParticipantMeanfree,
        )
        .unwrap();
        let col0: Vec<f64> = (0..4).map(|i| ds.row(i).unwrap()[0]).collect();
        let col1: Vec<f64> = (0..4).map(|i| ds.row(i).unwrap()[1]).collect();
        assert!(mean(&col0).abs() < 1e-12);
        assert!(mean(&col1).abs() < 1e-12);
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_csv_participant_loaded() {
        use crate::dataset::writer::CsvSampleWriter;

        let dir = tempfile::tempdir().unwrap();
        write_participant(dir.path(), "P01", 0.0);
        let samples: Vec<DatasetSample> = (0..3)
            .map(|i| DatasetSample {
                eit: vec![i as f64, 1.0],
                n_el: 1,
                torque: 10.0 + i as f64,
                ts_iso: 0.0,
                ts_eit: 0.0,
                target_force: 60,
                participant: "P02".to_string(),
            })
            .collect();
        let mut writer = CsvSampleWriter::new();
        writer.init(&dir.path().join("P02")).unwrap();
        writer.write(&samples).unwrap();
        writer.finish().unwrap();

        let ds = load_dataset(dir.path(), &names(&["P01", "P02"]), Normalization::None).unwrap();
        assert_eq!(ds.n_samples, 7);
        assert_eq!(ds.participants[4], "P02");
        assert_eq!(ds.y[4..], [10.0, 11.0, 12.0]);
        assert_eq!(ds.target_force[6], 60);
        assert_eq!(ds.row(6), Some(&[2.0, 1.0][..]));
    }

    #[test]
    fn test_no_normalization_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        write_participant(dir.path(), "P01", 1.0);
        let ds = load_dataset(dir.path(), &names(&["P01"]), Normalization::None).unwrap();
        assert_eq!(ds.row(1), Some(&[2.0, 3.0][..]));
        assert_eq!(ds.row(4), None);
    }
}
