//! Zero-phase Butterworth low-pass filtering.
//!
//! The filter is realised as a cascade of second-order sections from the
//! `biquad` crate. Each section is a bilinear-transform low-pass with the pole
//! quality factor of the matching Butterworth pole pair:
//!
//! ```text
//! Q_k = 1 / (2 cos((2k - 1) π / 2n)),   k = 1 ..= n/2
//! ```
//!
//! `LowPass::filtfilt` runs the cascade forward and backward so torque curves
//! keep their timing. Before each pass the signal is extended by an odd
//! reflection of `3 * (order + 1)` samples and every section is settled on the
//! first sample, which gives the same edge behaviour as steady-state initial
//! conditions.

use crate::error::{AppResult, SyncError};
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

/// Samples fed per section to reach steady state on a constant input.
const SETTLE_SAMPLES: usize = 2048;

/// Even-order Butterworth low-pass.
#[derive(Debug, Clone)]
pub struct LowPass {
    order: usize,
    sections: Vec<Coefficients<f64>>,
}

impl LowPass {
    /// Design a low-pass of the given even `order`.
    ///
    /// # Errors
    ///
    /// Odd or zero orders, and cutoffs outside `(0, sample_rate / 2)`.
    pub fn butterworth(order: usize, cutoff_hz: f64, sample_rate: f64) -> AppResult<Self> {
        if order < 2 || order % 2 != 0 {
            return Err(SyncError::Processing(format!(
                "Butterworth order must be even and >= 2, got {order}"
            )));
        }
        if !(cutoff_hz > 0.0) || cutoff_hz >= sample_rate / 2.0 {
            return Err(SyncError::Processing(format!(
                "cutoff {cutoff_hz} Hz outside (0, {}) Hz",
                sample_rate / 2.0
            )));
        }

        let sections = (1..=order / 2)
            .map(|k| {
                let angle = (2 * k - 1) as f64 * std::f64::consts::PI / (2 * order) as f64;
                let q = 1.0 / (2.0 * angle.cos());
                Coefficients::<f64>::from_params(
                    Type::LowPass,
                    sample_rate.hz(),
                    cutoff_hz.hz(),
                    q,
                )
                .map_err(|e| SyncError::Processing(format!("filter design failed: {e:?}")))
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self { order, sections })
    }

    /// Filter order.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of samples added on each side before filtering.
    pub fn pad_len(&self) -> usize {
        3 * (self.order + 1)
    }

    /// Causal single pass, settled on the first sample.
    pub fn filter(&self, data: &[f64]) -> Vec<f64> {
        let Some(&first) = data.first() else {
            return Vec::new();
        };
        let mut stages: Vec<DirectForm2Transposed<f64>> = self
            .sections
            .iter()
            .map(|&c| DirectForm2Transposed::<f64>::new(c))
            .collect();
        for stage in stages.iter_mut() {
            for _ in 0..SETTLE_SAMPLES {
                stage.run(first);
            }
        }
        data.iter()
            .map(|&x| stages.iter_mut().fold(x, |acc, stage| stage.run(acc)))
            .collect()
    }

    /// Forward-backward (zero-phase) filtering.
    ///
    /// # Errors
    ///
    /// The input must be longer than [`LowPass::pad_len`].
    pub fn filtfilt(&self, data: &[f64]) -> AppResult<Vec<f64>> {
        let pad = self.pad_len();
        if data.len() <= pad {
            return Err(SyncError::Processing(format!(
                "signal of {} samples too short for zero-phase filtering (needs > {pad})",
                data.len()
            )));
        }

        let extended = odd_extension(data, pad);
        let forward = self.filter(&extended);
        let reversed: Vec<f64> = forward.into_iter().rev().collect();
        let backward = self.filter(&reversed);

        Ok(backward
            .into_iter()
            .rev()
            .skip(pad)
            .take(data.len())
            .collect())
    }
}

/// Extend `data` on both ends by point reflection around the end samples.
fn odd_extension(data: &[f64], pad: usize) -> Vec<f64> {
    let n = data.len();
    let first = data[0];
    let last = data[n - 1];
    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend((1..=pad).rev().map(|i| 2.0 * first - data[i]));
    out.extend_from_slice(data);
    out.extend((1..=pad).map(|i| 2.0 * last - data[n - 1 - i]));
    out
}
