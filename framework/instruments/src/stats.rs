/// Percentile of an ascending sorted slice, `p` in `[0, 100]`.
///
/// Uses linear interpolation between the two closest ranks, so `p = 50` over `[1, 2, 3, 4]` is
/// `2.5`. Returns `None` for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let (first, last) = (sorted.first()?, sorted.last()?);
    let p = p.clamp(0.0, 100.0);

    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        return sorted.get(lower).copied();
    }

    let (lo, hi) = (sorted[lower], sorted[upper]);
    let value = lo + (hi - lo) * (rank - lower as f64);

    // Interpolation can't leave the sampled range, clamp away float noise.
    Some(value.clamp(*first, *last))
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_is_none() {
        assert_eq!(None, percentile(&[], 95.0));
    }

    #[test]
    fn percentile_of_single_value() {
        assert_eq!(Some(42.0), percentile(&[42.0], 0.0));
        assert_eq!(Some(42.0), percentile(&[42.0], 99.0));
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(Some(2.5), percentile(&values, 50.0));
        assert_eq!(Some(1.0), percentile(&values, 0.0));
        assert_eq!(Some(4.0), percentile(&values, 100.0));
    }

    #[test]
    fn p95_of_three_samples() {
        // rank = 0.95 * 2 = 1.9, 200 + 0.9 * 19800
        let p95 = percentile(&[100.0, 200.0, 20000.0], 95.0).unwrap();
        assert!((p95 - 18020.0).abs() < 1e-6, "got {p95}");
    }

    #[test]
    fn mean_of_values() {
        assert_eq!(None, mean(&[]));
        assert_eq!(Some(2.0), mean(&[1.0, 2.0, 3.0]));
    }
}
