//! Peak detection with minimum height and minimum spacing.

/// Indices of local maxima in `values`.
///
/// A maximum is a sample (or flat plateau) strictly higher than both
/// neighbours; plateaus report their middle index (rounded down). Samples at
/// the very ends are never peaks.
pub fn local_maxima(values: &[f64]) -> Vec<usize> {
    let n = values.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }
    let mut i = 1;
    while i < n - 1 {
        if values[i - 1] < values[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && values[ahead] == values[i] {
                ahead += 1;
            }
            if values[ahead] < values[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

/// Local maxima at least `height` high and at least `distance` samples apart.
///
/// When two peaks are closer than `distance`, the higher one survives (ties
/// keep the later peak in the scan order, matching a stable sort).
pub fn find_peaks(values: &[f64], distance: usize, height: f64) -> Vec<usize> {
    let peaks: Vec<usize> = local_maxima(values)
        .into_iter()
        .filter(|&p| values[p] >= height)
        .collect();
    if distance <= 1 || peaks.len() < 2 {
        return peaks;
    }

    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| values[peaks[a]].total_cmp(&values[peaks[b]]));

    let mut keep = vec![true; peaks.len()];
    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks
        .into_iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_maxima_with_plateau() {
        let x = [0.0, 1.0, 0.0, 2.0, 2.0, 2.0, 0.0, 1.0];
        assert_eq!(local_maxima(&x), vec![1, 4]);
    }

    #[test]
    fn test_height_filter() {
        let x = [0.0, 0.5, 0.0, 0.9, 0.0];
        assert_eq!(find_peaks(&x, 1, 0.7), vec![3]);
    }

    #[test]
    fn test_distance_keeps_higher_peak() {
        let x = [0.0, 0.8, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.9, 0.0];
        assert_eq!(find_peaks(&x, 3, 0.0), vec![3, 8]);
        assert_eq!(find_peaks(&x, 10, 0.0), vec![3]);
    }
}
