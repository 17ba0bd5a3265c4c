//! Fourier-method resampling.
//!
//! The signal is transformed with `rustfft`, its spectrum is truncated or
//! zero-padded to the target length, and the inverse transform gives the
//! resampled signal. For even lengths the shared Nyquist bin is doubled when
//! downsampling and halved when upsampling so the result stays real and keeps
//! its amplitude.

use num_complex::Complex;
use rustfft::FftPlanner;
use tracing::debug;

/// Resample `values` to `num` samples using the Fourier method.
///
/// The signal is assumed periodic, so a strong mismatch between the first and
/// last sample shows up as ringing near the edges.
pub fn resample(values: &[f64], num: usize) -> Vec<f64> {
    let nx = values.len();
    if nx == 0 || num == 0 {
        return Vec::new();
    }
    if nx == num {
        return values.to_vec();
    }

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(nx);
    let inverse = planner.plan_fft_inverse(num);

    let mut spectrum: Vec<Complex<f64>> = values.iter().map(|&v| Complex::new(v, 0.0)).collect();
    forward.process(&mut spectrum);

    // One-sided spectrum of the output, length num / 2 + 1.
    let n = nx.min(num);
    let nyq = n / 2 + 1;
    let mut half = vec![Complex::new(0.0, 0.0); num / 2 + 1];
    half[..nyq].copy_from_slice(&spectrum[..nyq]);
    if n % 2 == 0 {
        if num < nx {
            half[n / 2] *= 2.0;
        } else {
            half[n / 2] *= 0.5;
        }
    }

    // Rebuild the Hermitian full spectrum.
    let mut full = vec![Complex::new(0.0, 0.0); num];
    full[0] = Complex::new(half[0].re, 0.0);
    for k in 1..half.len() {
        if num % 2 == 0 && k == num / 2 {
            full[k] = Complex::new(half[k].re, 0.0);
        } else {
            full[k] = half[k];
            full[num - k] = half[k].conj();
        }
    }

    inverse.process(&mut full);
    debug!("Resampled {} -> {} samples", nx, num);

    // rustfft does not normalize; num / nx rescales to the new rate.
    full.iter().map(|c| c.re / nx as f64).collect()
}

/// Bring two signals to a common length.
///
/// With a `target` both are resampled to it, otherwise the shorter signal is
/// resampled to the length of the longer one.
pub fn resample_pair(a: &[f64], b: &[f64], target: Option<usize>) -> (Vec<f64>, Vec<f64>) {
    match target {
        Some(len) => (resample(a, len), resample(b, len)),
        None => {
            let len = a.len().max(b.len());
            (resample(a, len), resample(b, len))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(len: usize, cycles: f64) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * PI * cycles * i as f64 / len as f64).sin())
            .collect()
    }

    #[test]
    fn test_upsample_periodic_sine() {
        let up = resample(&sine(64, 3.0), 256);
        let expected = sine(256, 3.0);
        for (a, b) in up.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_downsample_periodic_sine() {
        let down = resample(&sine(300, 2.0), 75);
        let expected = sine(75, 2.0);
        for (a, b) in down.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_constant_stays_constant() {
        let out = resample(&[2.0; 10], 17);
        assert_eq!(out.len(), 17);
        assert!(out.iter().all(|v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn test_pair_without_target_matches_longer() {
        let (a, b) = resample_pair(&[1.0; 8], &[1.0; 20], None);
        assert_eq!(a.len(), 20);
        assert_eq!(b.len(), 20);
    }

    #[test]
    fn test_empty_input() {
        assert!(resample(&[], 10).is_empty());
        assert!(resample(&[1.0, 2.0], 0).is_empty());
    }
}
