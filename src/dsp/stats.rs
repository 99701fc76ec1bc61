// Robust order statistics - selection-based median and MAD
//
// Both the onset gates and the tempo trackers threshold against
// median + MAD rather than mean + variance, so a single outlier frame
// cannot drag the threshold. Selection (`select_nth_unstable_by`) keeps the
// per-frame cost O(n) amortized instead of a full sort.

/// Median by selection; the input order is destroyed.
///
/// For an even count this is the mean of the two central order statistics:
/// the upper one comes from the selection itself, the lower one is the
/// maximum of the left partition.
///
/// Returns 0.0 for an empty slice.
pub fn median_in_place(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    if values.len() == 1 {
        return values[0];
    }

    let mid = values.len() / 2;
    values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = values[mid];

    if values.len() % 2 == 0 {
        let lower = values[..mid]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        (upper + lower) * 0.5
    } else {
        upper
    }
}

/// Raw median absolute deviation around `median`; the input is overwritten
/// with absolute deviations. Callers that want a normal-consistent scale
/// estimate multiply by 1.4826 themselves.
pub fn mad_in_place(values: &mut [f64], median: f64) -> f64 {
    for v in values.iter_mut() {
        *v = (*v - median).abs();
    }
    median_in_place(values)
}

/// Median and raw MAD of `values`, using `scratch` to avoid a per-call
/// allocation on the hot path.
pub fn median_mad(values: impl Iterator<Item = f64>, scratch: &mut Vec<f64>) -> (f64, f64) {
    scratch.clear();
    scratch.extend(values);
    let median = median_in_place(scratch);
    let mad = mad_in_place(scratch, median);
    (median, mad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_empty() {
        assert_eq!(median_in_place(&mut []), 0.0);
    }

    #[test]
    fn test_median_single() {
        assert_eq!(median_in_place(&mut [3.5]), 3.5);
    }

    #[test]
    fn test_median_odd_count() {
        let mut v = [5.0, 1.0, 3.0];
        assert_eq!(median_in_place(&mut v), 3.0);
    }

    #[test]
    fn test_median_even_count_is_mean_of_central_pair() {
        let mut v = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(median_in_place(&mut v), 2.5);
    }

    #[test]
    fn test_median_unsorted_large() {
        let mut v: Vec<f64> = (0..101).rev().map(|i| i as f64).collect();
        assert_eq!(median_in_place(&mut v), 50.0);
    }

    #[test]
    fn test_mad_symmetric() {
        // deviations around median 3: [2, 1, 0, 1, 2] -> median 1
        let mut v = [1.0, 2.0, 3.0, 4.0, 5.0];
        let m = median_in_place(&mut v.clone());
        assert_eq!(m, 3.0);
        assert_eq!(mad_in_place(&mut v, m), 1.0);
    }

    #[test]
    fn test_mad_constant_input_is_zero() {
        let mut v = [2.0; 8];
        let m = 2.0;
        assert_eq!(mad_in_place(&mut v, m), 0.0);
    }

    #[test]
    fn test_median_mad_with_scratch() {
        let mut scratch = Vec::new();
        let data = [0.5_f64, 0.5, 0.5, 0.5, 0.5, 0.5, 0.9, 0.5];
        let (median, mad) = median_mad(data.iter().copied(), &mut scratch);
        assert_eq!(median, 0.5);
        // one outlier out of eight cannot move the MAD off zero
        assert_eq!(mad, 0.0);
    }

    #[test]
    fn test_median_matches_sort_reference() {
        // spot-check selection against the sort definition on pseudo-random data
        let data: Vec<f64> = (0..37).map(|i| ((i * 7919) % 101) as f64).collect();

        let mut by_selection = data.clone();
        let selected = median_in_place(&mut by_selection);

        let mut sorted = data;
        sorted.sort_by(f64::total_cmp);
        let expected = if sorted.len() % 2 == 0 {
            (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) * 0.5
        } else {
            sorted[sorted.len() / 2]
        };

        assert_eq!(selected, expected);
    }
}
