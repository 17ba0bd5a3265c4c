//! Sample writers with feature flag handling.
use super::sample::DatasetSample;
use crate::error::{AppResult, SyncError};
use std::path::{Path, PathBuf};
use tracing::info;

/// File name prefix of per-sample JSON files.
pub const SAMPLE_PREFIX: &str = "sample_";

/// A sink for dataset samples.
pub trait SampleWriter {
    /// Prepare the output directory.
    fn init(&mut self, dir: &Path) -> AppResult<()>;
    /// Write a batch of samples.
    fn write(&mut self, samples: &[DatasetSample]) -> AppResult<()>;
    /// Flush and close. Returns the number of samples written.
    fn finish(&mut self) -> AppResult<usize>;
}

/// Index of a `sample_NNNNN.json` file name.
pub fn sample_index(name: &str) -> Option<usize> {
    name.strip_prefix(SAMPLE_PREFIX)?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// `sample_*.json` files of a directory, ordered by sample index.
pub fn list_sample_files(dir: &Path) -> AppResult<Vec<PathBuf>> {
    let mut files: Vec<(usize, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter_map(|p| {
            let index = p.file_name().and_then(|n| n.to_str()).and_then(sample_index)?;
            Some((index, p))
        })
        .collect();
    files.sort_by_key(|(index, _)| *index);
    Ok(files.into_iter().map(|(_, p)| p).collect())
}

// ============================================================================
// JSON Writer
// ============================================================================

/// One `sample_NNNNN.json` per sample.
#[derive(Debug, Default)]
pub struct JsonSampleWriter {
    dir: PathBuf,
    next_index: usize,
    written: usize,
}

impl JsonSampleWriter {
    /// New writer; call [`SampleWriter::init`] before writing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next sample will get.
    pub fn next_index(&self) -> usize {
        self.next_index
    }
}

impl SampleWriter for JsonSampleWriter {
    fn init(&mut self, dir: &Path) -> AppResult<()> {
        std::fs::create_dir_all(dir)?;
        self.dir = dir.to_path_buf();
        self.next_index = list_sample_files(dir)?
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).and_then(sample_index))
            .max()
            .map_or(0, |last| last + 1);
        self.written = 0;
        info!(
            "JSON writer initialized at '{}' (next sample {})",
            dir.display(),
            self.next_index
        );
        Ok(())
    }

    fn write(&mut self, samples: &[DatasetSample]) -> AppResult<()> {
        for sample in samples {
            let path = self
                .dir
                .join(format!("{SAMPLE_PREFIX}{:05}.json", self.next_index));
            std::fs::write(&path, serde_json::to_vec(sample)?)?;
            self.next_index += 1;
            self.written += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> AppResult<usize> {
        info!("JSON writer finished: {} samples", self.written);
        Ok(self.written)
    }
}

// ============================================================================
// CSV Writer
// ============================================================================

/// CSV file written by [`CsvSampleWriter`].
pub const CSV_FILE: &str = "samples.csv";

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::{File, OpenOptions};

    /// All samples of a directory in one `samples.csv`, appended across runs.
    #[derive(Default)]
    pub struct CsvSampleWriter {
        path: PathBuf,
        writer: Option<csv::Writer<File>>,
        header_written: bool,
        written: usize,
    }

    impl CsvSampleWriter {
        /// New writer; call [`SampleWriter::init`] before writing.
        pub fn new() -> Self {
            Self::default()
        }
    }

    /// Read back a `samples.csv` written by [`CsvSampleWriter`].
    pub fn read_csv_samples(path: &Path) -> AppResult<Vec<DatasetSample>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut samples = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let bad = |what: &str| {
                SyncError::Parse(format!("{} row {}: bad {what}", path.display(), line + 1))
            };
            let number = |i: usize, what: &str| -> AppResult<f64> {
                record
                    .get(i)
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| bad(what))
            };
            let eit = (5..record.len())
                .map(|i| number(i, "feature"))
                .collect::<AppResult<Vec<f64>>>()?;
            // frames are square, n_el × n_el
            let n_el = (eit.len() as f64).sqrt().round() as usize;
            samples.push(DatasetSample {
                participant: record.get(0).ok_or_else(|| bad("participant"))?.to_string(),
                target_force: record
                    .get(1)
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| bad("target_force"))?,
                torque: number(2, "torque")?,
                ts_iso: number(3, "ts_iso")?,
                ts_eit: number(4, "ts_eit")?,
                n_el,
                eit,
            });
        }
        Ok(samples)
    }

    impl SampleWriter for CsvSampleWriter {
        fn init(&mut self, dir: &Path) -> AppResult<()> {
            std::fs::create_dir_all(dir)?;
            self.path = dir.join(CSV_FILE);
            self.header_written = std::fs::metadata(&self.path).is_ok_and(|m| m.len() > 0);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.writer = Some(csv::Writer::from_writer(file));
            self.written = 0;
            info!("CSV writer initialized at '{}'.", self.path.display());
            Ok(())
        }

        fn write(&mut self, samples: &[DatasetSample]) -> AppResult<()> {
            let Some(writer) = self.writer.as_mut() else {
                return Err(SyncError::Processing(
                    "CSV writer used before init".to_string(),
                ));
            };
            for sample in samples {
                if !self.header_written {
                    let mut header: Vec<String> =
                        ["participant", "target_force", "torque", "ts_iso", "ts_eit"]
                            .iter()
                            .map(|s| s.to_string())
                            .collect();
                    header.extend((0..sample.n_features()).map(|i| format!("e{i}")));
                    writer.write_record(&header)?;
                    self.header_written = true;
                }
                let mut record = vec![
                    sample.participant.clone(),
                    sample.target_force.to_string(),
                    sample.torque.to_string(),
                    sample.ts_iso.to_string(),
                    sample.ts_eit.to_string(),
                ];
                record.extend(sample.eit.iter().map(f64::to_string));
                writer.write_record(&record)?;
                self.written += 1;
            }
            Ok(())
        }

        fn finish(&mut self) -> AppResult<usize> {
            if let Some(mut writer) = self.writer.take() {
                writer.flush()?;
            }
            info!("CSV writer finished: {} samples", self.written);
            Ok(self.written)
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    /// Placeholder when the `storage_csv` feature is off.
    #[derive(Default)]
    pub struct CsvSampleWriter;

    impl CsvSampleWriter {
        /// New writer.
        pub fn new() -> Self {
            Self
        }
    }

    /// CSV datasets need the `storage_csv` feature.
    pub fn read_csv_samples(_path: &Path) -> AppResult<Vec<DatasetSample>> {
        Err(SyncError::FeatureNotEnabled("storage_csv".to_string()))
    }

    impl SampleWriter for CsvSampleWriter {
        fn init(&mut self, _dir: &Path) -> AppResult<()> {
            Err(SyncError::FeatureNotEnabled("storage_csv".to_string()))
        }

        fn write(&mut self, _samples: &[DatasetSample]) -> AppResult<()> {
            Err(SyncError::FeatureNotEnabled("storage_csv".to_string()))
        }

        fn finish(&mut self) -> AppResult<usize> {
            Err(SyncError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::{read_csv_samples, CsvSampleWriter};

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::{read_csv_samples, CsvSampleWriter};

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(torque: f64) -> DatasetSample {
        DatasetSample {
            eit: vec![1.0, 2.0, 3.0, 4.0],
            n_el: 2,
            torque,
            ts_iso: 10.0,
            ts_eit: 10.01,
            target_force: 40,
            participant: "P01".to_string(),
        }
    }

    #[test]
    fn test_sample_index() {
        assert_eq!(sample_index("sample_00042.json"), Some(42));
        assert_eq!(sample_index("sample_00042.npz"), None);
        assert_eq!(sample_index("manifest.json"), None);
    }

    #[test]
    fn test_json_numbering_continues() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sample_00007.json"), "{}").unwrap();
        std::fs::write(dir.path().join("manifest.json"), "{}").unwrap();

        let mut writer = JsonSampleWriter::new();
        writer.init(dir.path()).unwrap();
        assert_eq!(writer.next_index(), 8);
        writer.write(&[sample(1.0), sample(2.0)]).unwrap();
        assert_eq!(writer.finish().unwrap(), 2);

        let text = std::fs::read_to_string(dir.path().join("sample_00009.json")).unwrap();
        let back: DatasetSample = serde_json::from_str(&text).unwrap();
        assert_eq!(back, sample(2.0));
        assert_eq!(list_sample_files(dir.path()).unwrap().len(), 3);
    }

    #[test]
    fn test_sample_files_ordered_by_index() {
        let dir = tempfile::tempdir().unwrap();
        for index in [100_000, 99_999, 2] {
            std::fs::write(dir.path().join(format!("sample_{index:05}.json")), "{}").unwrap();
        }
        let names: Vec<String> = list_sample_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            ["sample_00002.json", "sample_99999.json", "sample_100000.json"]
        );
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_csv_samples_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CsvSampleWriter::new();
        writer.init(dir.path()).unwrap();
        writer.write(&[sample(1.5), sample(-2.0)]).unwrap();
        writer.finish().unwrap();

        let back = read_csv_samples(&dir.path().join(CSV_FILE)).unwrap();
        assert_eq!(back, vec![sample(1.5), sample(-2.0)]);
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_csv_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        for _ in 0..2 {
            let mut writer = CsvSampleWriter::new();
            writer.init(dir.path()).unwrap();
            writer.write(&[sample(1.5)]).unwrap();
            writer.finish().unwrap();
        }
        let text = std::fs::read_to_string(dir.path().join(CSV_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "participant,target_force,torque,ts_iso,ts_eit,e0,e1,e2,e3");
        assert!(lines[1].starts_with("P01,40,1.5,"));
    }

    #[cfg(not(feature = "storage_csv"))]
    #[test]
    fn test_csv_writer_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = CsvSampleWriter::new();
        assert!(matches!(
            writer.init(dir.path()),
            Err(SyncError::FeatureNotEnabled(_))
        ));
    }
}
