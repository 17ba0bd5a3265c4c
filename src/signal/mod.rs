//! Numeric helpers shared by the torque and EIT processing stages.
//!
//! Everything here works on plain `&[f64]` slices and mirrors the array
//! semantics the recordings were originally analysed with (gradient at the
//! edges, integer `linspace`, full-mode correlation lags).

pub mod filter;
pub mod peaks;
pub mod resample;

pub use filter::LowPass;
pub use peaks::find_peaks;
pub use resample::{resample, resample_pair};

/// Direction of a step in a binary signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// `x[i+1] - x[i] == threshold`
    Rising,
    /// `x[i+1] - x[i] == -threshold`
    Falling,
}

/// Linearly rescale `values` into `[new_min, new_max]`.
///
/// A constant signal maps to `new_min` everywhere.
pub fn scale_to_range(values: &[f64], new_min: f64, new_max: f64) -> Vec<f64> {
    let Some((old_min, old_max)) = min_max(values) else {
        return Vec::new();
    };
    if old_max == old_min {
        return vec![new_min; values.len()];
    }
    let factor = (new_max - new_min) / (old_max - old_min);
    values
        .iter()
        .map(|&v| new_min + (v - old_min) * factor)
        .collect()
}

/// Smallest and largest value, `None` for an empty slice.
pub fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
    )
}

/// Discrete gradient with unit spacing: central differences in the interior,
/// one-sided differences at both ends.
pub fn gradient(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut out = Vec::with_capacity(n);
    out.push(values[1] - values[0]);
    for i in 1..n - 1 {
        out.push((values[i + 1] - values[i - 1]) / 2.0);
    }
    out.push(values[n - 1] - values[n - 2]);
    out
}

/// Indices `i` where the step from `values[i]` to `values[i + 1]` equals the
/// threshold in the requested direction.
pub fn edge_indices(values: &[f64], kind: EdgeKind, threshold: f64) -> Vec<usize> {
    let target = match kind {
        EdgeKind::Rising => threshold,
        EdgeKind::Falling => -threshold,
    };
    values
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[1] - w[0] == target)
        .map(|(i, _)| i)
        .collect()
}

/// Full-mode cross-correlation: `c[k] = sum_n a[n + k] * v[n]` for lags
/// `k = -(v.len() - 1) ..= a.len() - 1`. Output index `i` holds lag
/// `i - (v.len() - 1)`.
pub fn cross_correlate(a: &[f64], v: &[f64]) -> Vec<f64> {
    if a.is_empty() || v.is_empty() {
        return Vec::new();
    }
    let offset = v.len() as isize - 1;
    let len = a.len() + v.len() - 1;
    (0..len)
        .map(|i| {
            let lag = i as isize - offset;
            v.iter()
                .enumerate()
                .filter_map(|(n, &vn)| {
                    let idx = n as isize + lag;
                    (idx >= 0 && (idx as usize) < a.len()).then(|| a[idx as usize] * vn)
                })
                .sum()
        })
        .collect()
}

/// Lag of the correlation maximum between `a` and `v`.
///
/// A positive lag means `a` runs behind `v` by that many samples.
pub fn detect_shift(a: &[f64], v: &[f64]) -> Option<isize> {
    let corr = cross_correlate(a, v);
    let best = argmax(&corr)?;
    Some(best as isize - (v.len() as isize - 1))
}

/// Index of the first maximum.
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Index of the element closest to `value` (first one on ties).
pub fn nearest_index(values: &[f64], value: f64) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| {
            let d = (v - value).abs();
            match best {
                Some((_, bd)) if bd <= d => best,
                _ => Some((i, d)),
            }
        })
        .map(|(i, _)| i)
}

/// `count` integer indices evenly spaced over `0..=len - 1`, truncated toward
/// zero.
pub fn linspace_indices(len: usize, count: usize) -> Vec<usize> {
    if len == 0 || count == 0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![0];
    }
    let step = (len - 1) as f64 / (count - 1) as f64;
    let mut indices: Vec<usize> = (0..count)
        .map(|i| ((i as f64 * step) as usize).min(len - 1))
        .collect();
    // the endpoint is exact, never rounded below len - 1
    indices[count - 1] = len - 1;
    indices
}

/// Arithmetic mean, `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Standardize in place with a single mean and deviation over all values.
///
/// A zero deviation only removes the mean.
pub fn z_score_in_place(values: &mut [f64]) -> (f64, f64) {
    let m = mean(values);
    let s = std_dev(values);
    let divisor = if s > 0.0 { s } else { 1.0 };
    for v in values.iter_mut() {
        *v = (*v - m) / divisor;
    }
    (m, s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_to_range() {
        let scaled = scale_to_range(&[2.0, 4.0, 6.0], 0.0, 1.0);
        assert_eq!(scaled, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_scale_constant_signal() {
        assert_eq!(scale_to_range(&[3.0; 4], -1.0, 1.0), vec![-1.0; 4]);
    }

    #[test]
    fn test_gradient_central_and_one_sided() {
        // np.gradient([1, 2, 4, 7, 11]) == [1, 1.5, 2.5, 3.5, 4]
        let g = gradient(&[1.0, 2.0, 4.0, 7.0, 11.0]);
        assert_eq!(g, vec![1.0, 1.5, 2.5, 3.5, 4.0]);
    }

    #[test]
    fn test_edge_indices() {
        let window = [0.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        assert_eq!(edge_indices(&window, EdgeKind::Rising, 1.0), vec![1, 4]);
        assert_eq!(edge_indices(&window, EdgeKind::Falling, 1.0), vec![3]);
    }

    #[test]
    fn test_cross_correlate_full_mode() {
        // np.correlate([1, 2, 3], [0, 1, 0.5], "full") == [0.5, 2, 3.5, 3, 0]
        let c = cross_correlate(&[1.0, 2.0, 3.0], &[0.0, 1.0, 0.5]);
        assert_eq!(c, vec![0.5, 2.0, 3.5, 3.0, 0.0]);
    }

    #[test]
    fn test_detect_shift_recovers_delay() {
        let base: Vec<f64> = (0..64).map(|i| (-((i as f64 - 20.0) / 4.0).powi(2)).exp()).collect();
        let mut delayed = vec![0.0; 7];
        delayed.extend_from_slice(&base[..57]);
        assert_eq!(detect_shift(&delayed, &base), Some(7));
        assert_eq!(detect_shift(&base, &delayed), Some(-7));
    }

    #[test]
    fn test_nearest_index() {
        let ts = [10.0, 10.5, 11.0, 11.5];
        assert_eq!(nearest_index(&ts, 10.74), Some(1));
        assert_eq!(nearest_index(&ts, 99.0), Some(3));
        assert_eq!(nearest_index(&[], 1.0), None);
    }

    #[test]
    fn test_linspace_indices_truncates() {
        // np.linspace(0, 9, 4, dtype=int) == [0, 3, 6, 9]
        assert_eq!(linspace_indices(10, 4), vec![0, 3, 6, 9]);
        // np.linspace(0, 4, 3, dtype=int) == [0, 2, 4]
        assert_eq!(linspace_indices(5, 3), vec![0, 2, 4]);
        assert_eq!(linspace_indices(5, 1), vec![0]);
    }

    #[test]
    fn test_linspace_indices_ends_on_last_index() {
        // (count - 1) * step lands just below len - 1 for these
        assert_eq!(linspace_indices(3, 50).last(), Some(&2));
        assert_eq!(linspace_indices(14, 24).last(), Some(&13));
        for len in 1..300 {
            for count in 2..60 {
                let idx = linspace_indices(len, count);
                assert_eq!(idx.len(), count);
                assert_eq!(idx[count - 1], len - 1, "len {len}, count {count}");
                assert!(idx.windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }

    #[test]
    fn test_z_score() {
        let mut values = vec![1.0, 2.0, 3.0, 4.0];
        z_score_in_place(&mut values);
        assert!(mean(&values).abs() < 1e-12);
        assert!((std_dev(&values) - 1.0).abs() < 1e-12);
    }
}
