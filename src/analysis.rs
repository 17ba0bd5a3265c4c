//! Feature scaling and principal component analysis of the dataset.
//!
//! PCA works on the sample covariance (`n - 1` divisor). Eigenvectors are
//! found one at a time by power iteration, each found component is deflated
//! from the covariance before the next one is computed. [`project_dataset`]
//! runs the whole chain on an exported dataset.

use crate::config::AnalysisConfig;
use crate::dataset::load_dataset;
use crate::error::{AppResult, SyncError};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

const MAX_ITERATIONS: usize = 1000;
const TOLERANCE: f64 = 1e-12;

/// Scaling applied to the feature matrix before PCA.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FeatureScaling {
    /// Leave features as loaded
    #[default]
    None,
    /// Per-feature zero mean, unit deviation
    #[value(name = "zscore")]
    ZScore,
    /// Per-feature 0..1, constant features to 0
    #[value(name = "minmax")]
    MinMax,
    /// Every sample scaled to unit length
    L2,
}

/// Scale a row-major `n_samples × n_features` matrix in place.
pub fn scale_features(x: &mut [f64], n_features: usize, scaling: FeatureScaling) {
    if n_features == 0 || x.is_empty() {
        return;
    }
    let n_samples = x.len() / n_features;
    let column = |x: &[f64], j: usize| -> Vec<f64> {
        (0..n_samples).map(|i| x[i * n_features + j]).collect()
    };
    match scaling {
        FeatureScaling::None => {}
        FeatureScaling::ZScore => {
            for j in 0..n_features {
                let col = column(x, j);
                let m = crate::signal::mean(&col);
                let s = crate::signal::std_dev(&col);
                let s = if s > 0.0 { s } else { 1.0 };
                for i in 0..n_samples {
                    x[i * n_features + j] = (x[i * n_features + j] - m) / s;
                }
            }
        }
        FeatureScaling::MinMax => {
            for j in 0..n_features {
                let col = column(x, j);
                let Some((lo, hi)) = crate::signal::min_max(&col) else {
                    continue;
                };
                let range = hi - lo;
                for i in 0..n_samples {
                    let v = &mut x[i * n_features + j];
                    *v = if range > 0.0 { (*v - lo) / range } else { 0.0 };
                }
            }
        }
        FeatureScaling::L2 => {
            for row in x.chunks_exact_mut(n_features) {
                let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
                if norm > 0.0 {
                    row.iter_mut().for_each(|v| *v /= norm);
                }
            }
        }
    }
}

/// Fitted principal component analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct Pca {
    /// Per-feature mean removed before projecting
    pub mean: Array1<f64>,
    /// Unit-length principal axes as rows, strongest first
    pub components: Array2<f64>,
    /// Variance along each axis
    pub explained_variance: Array1<f64>,
    /// Share of the total variance along each axis
    pub explained_variance_ratio: Array1<f64>,
}

impl Pca {
    /// Fit `n_components` axes to a row-major matrix.
    ///
    /// # Errors
    ///
    /// `Processing` for fewer than two samples, zero components, more
    /// components than features, or a matrix that does not match its shape.
    pub fn fit(
        x: &[f64],
        n_samples: usize,
        n_features: usize,
        n_components: usize,
    ) -> AppResult<Self> {
        if n_samples < 2 {
            return Err(SyncError::Processing(format!(
                "PCA needs at least 2 samples, got {n_samples}"
            )));
        }
        if n_components == 0 || n_components > n_features {
            return Err(SyncError::Processing(format!(
                "cannot compute {n_components} components from {n_features} features"
            )));
        }
        let data = matrix_view(x, n_features)?;
        if data.nrows() != n_samples {
            return Err(SyncError::Processing(format!(
                "matrix has {} rows, expected {n_samples}",
                data.nrows()
            )));
        }

        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| SyncError::Processing("empty matrix".to_string()))?;
        let centered = &data - &mean;
        let mut cov = centered.t().dot(&centered) / (n_samples - 1) as f64;
        let total = cov.diag().sum();

        let mut components = Array2::zeros((n_components, n_features));
        let mut explained_variance = Array1::zeros(n_components);
        for k in 0..n_components {
            let (value, mut vector) = dominant_eigen(&cov, components.slice(s![..k, ..]));
            orient(&mut vector);
            debug!("PC{}: eigenvalue {:.6}", k + 1, value);

            // deflate: C -= λ v vᵀ
            let column = vector.view().insert_axis(Axis(1));
            let row = vector.view().insert_axis(Axis(0));
            cov.scaled_add(-value, &column.dot(&row));

            components.row_mut(k).assign(&vector);
            explained_variance[k] = value;
        }

        let explained_variance_ratio = if total > 0.0 {
            &explained_variance / total
        } else {
            Array1::zeros(n_components)
        };

        Ok(Self {
            mean,
            components,
            explained_variance,
            explained_variance_ratio,
        })
    }

    /// Number of features the model was fitted on.
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Project a row-major matrix onto the components.
    ///
    /// Returns `n_samples × n_components`, row-major.
    pub fn transform(&self, x: &[f64]) -> AppResult<Vec<f64>> {
        let data = matrix_view(x, self.n_features())?;
        let projected = (&data - &self.mean).dot(&self.components.t());
        Ok(projected.iter().copied().collect())
    }
}

/// Dataset samples projected onto their principal components.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// `n_samples × n_components`, row-major
    pub scores: Vec<f64>,
    /// Columns of `scores`
    pub n_components: usize,
    /// Participant per row
    pub participants: Vec<String>,
    /// Torque label per row
    pub torque: Vec<f64>,
    /// Target force per row
    pub target_force: Vec<i64>,
    /// Share of the variance along each component
    pub explained_variance_ratio: Vec<f64>,
}

impl Projection {
    /// Number of projected samples.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// True when nothing was projected.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Write `participant,pc1..pcK,torque,target_force`.
    pub fn write_csv(&self, path: &Path) -> AppResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["participant".to_string()];
        header.extend((1..=self.n_components).map(|k| format!("pc{k}")));
        header.extend(["torque", "target_force"].map(String::from));
        writer.write_record(&header)?;
        for (i, row) in self.scores.chunks_exact(self.n_components).enumerate() {
            let mut record = vec![self.participants[i].clone()];
            record.extend(row.iter().map(f64::to_string));
            record.push(self.torque[i].to_string());
            record.push(self.target_force[i].to_string());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        info!("Projection of {} samples written to {}", self.len(), path.display());
        Ok(())
    }
}

/// Load participants from an exported dataset, scale, fit and project.
///
/// # Errors
///
/// `MissingInput` when none of the participants has samples, otherwise the
/// loading and [`Pca::fit`] errors.
pub fn project_dataset(
    root: &Path,
    participants: &[String],
    config: &AnalysisConfig,
) -> AppResult<Projection> {
    let mut data = load_dataset(root, participants, config.normalization)?;
    if data.is_empty() {
        return Err(SyncError::MissingInput(format!(
            "no samples for {:?} in {}",
            participants,
            root.display()
        )));
    }
    scale_features(&mut data.x, data.n_features, config.scaling);

    let pca = Pca::fit(&data.x, data.n_samples, data.n_features, config.components)?;
    for (k, ratio) in pca.explained_variance_ratio.iter().enumerate() {
        info!("PC{}: {:.2}% of variance", k + 1, ratio * 100.0);
    }
    Ok(Projection {
        scores: pca.transform(&data.x)?,
        n_components: config.components,
        participants: data.participants,
        torque: data.y,
        target_force: data.target_force,
        explained_variance_ratio: pca.explained_variance_ratio.to_vec(),
    })
}

fn matrix_view(x: &[f64], n_features: usize) -> AppResult<ArrayView2<'_, f64>> {
    if n_features == 0 || x.len() % n_features != 0 {
        return Err(SyncError::Processing(format!(
            "matrix of {} values does not have {n_features} columns",
            x.len()
        )));
    }
    ArrayView2::from_shape((x.len() / n_features, n_features), x)
        .map_err(|e| SyncError::Processing(format!("bad matrix shape: {e}")))
}

fn normalize(v: &mut Array1<f64>) -> f64 {
    let norm = v.dot(v).sqrt();
    if norm > 0.0 {
        *v /= norm;
    }
    norm
}

/// Remove the projections on the rows of `basis` (orthonormal).
fn orthogonalize(v: &mut Array1<f64>, basis: ArrayView2<'_, f64>) {
    for b in basis.rows() {
        let dot = v.dot(&b);
        v.scaled_add(-dot, &b);
    }
}

/// Largest eigenpair of a symmetric matrix, orthogonal to `found`.
fn dominant_eigen(m: &Array2<f64>, found: ArrayView2<'_, f64>) -> (f64, Array1<f64>) {
    let diag = m.diag();
    // start from the column with the largest diagonal entry
    let start = (0..diag.len())
        .max_by(|&a, &b| diag[a].total_cmp(&diag[b]))
        .unwrap_or(0);
    let mut v = m.column(start).to_owned();
    orthogonalize(&mut v, found);
    if normalize(&mut v) < TOLERANCE {
        return (0.0, fallback_vector(m.nrows(), found));
    }

    for _ in 0..MAX_ITERATIONS {
        let mut next = m.dot(&v);
        orthogonalize(&mut next, found);
        if normalize(&mut next) < TOLERANCE {
            return (0.0, v);
        }
        let delta = (&next - &v).fold(0.0_f64, |acc, d| acc.max(d.abs()));
        v = next;
        if delta < TOLERANCE {
            break;
        }
    }
    let value = v.dot(&m.dot(&v)).max(0.0);
    (value, v)
}

/// A unit vector orthogonal to `found` for directions without variance.
fn fallback_vector(n: usize, found: ArrayView2<'_, f64>) -> Array1<f64> {
    for k in 0..n {
        let mut e = Array1::zeros(n);
        e[k] = 1.0;
        orthogonalize(&mut e, found);
        if normalize(&mut e) > 1e-6 {
            return e;
        }
    }
    Array1::zeros(n)
}

/// Flip the sign so the largest-magnitude loading is positive.
fn orient(v: &mut Array1<f64>) {
    let largest = v
        .iter()
        .copied()
        .max_by(|a, b| a.abs().total_cmp(&b.abs()))
        .unwrap_or(0.0);
    if largest < 0.0 {
        v.mapv_inplace(|x| -x);
    }
}
