//! Error metric and exceptional-value predicates

/// `±inf` or `±FLT_MAX`, the two encodings of a saturated logit
#[inline]
pub fn isinf_or_max(f: f32) -> bool {
    f.is_infinite() || f == f32::MAX || f == -f32::MAX
}

/// Normalized mean squared error `Σ(aᵢ−bᵢ)² / Σaᵢ²` in f64.
///
/// With `Σaᵢ² == 0` the ratio is 0/0 or x/0: identical inputs give 0,
/// anything else gives `+inf`.
pub fn nmse(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let mut err = 0f64;
    let mut norm = 0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        err += (x - y) * (x - y);
        norm += x * x;
    }
    if norm == 0.0 {
        return if err == 0.0 { 0.0 } else { f64::INFINITY };
    }
    err / norm
}

/// NMSE over the pairs where neither value is exceptional
pub fn nmse_finite(a: &[f32], b: &[f32]) -> f64 {
    let (fa, fb): (Vec<f32>, Vec<f32>) = a
        .iter()
        .zip(b)
        .filter(|(x, y)| !isinf_or_max(**x) && !isinf_or_max(**y))
        .map(|(&x, &y)| (x, y))
        .unzip();
    nmse(&fa, &fb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_isinf_or_max() {
        assert!(isinf_or_max(f32::INFINITY));
        assert!(isinf_or_max(f32::NEG_INFINITY));
        assert!(isinf_or_max(f32::MAX));
        assert!(isinf_or_max(-f32::MAX));
        assert!(!isinf_or_max(f32::NAN));
        assert!(!isinf_or_max(1e38));
    }

    #[test]
    fn test_zero_reference() {
        assert_eq!(nmse(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(nmse(&[0.0], &[1.0]), f64::INFINITY);
        assert_eq!(nmse(&[], &[]), 0.0);
    }

    #[test]
    fn test_known_value() {
        // err = 1, norm = 9 + 16
        assert!((nmse(&[3.0, 4.0], &[3.0, 5.0]) - 1.0 / 25.0).abs() < 1e-15);
    }

    #[test]
    fn test_exceptional_pairs_excluded() {
        let a = [1.0, f32::NEG_INFINITY, 2.0];
        let b = [1.0, -f32::MAX, 2.0];
        assert_eq!(nmse_finite(&a, &b), 0.0);
    }

    fn vec_pair() -> impl Strategy<Value = (Vec<f32>, Vec<f32>)> {
        (1usize..64).prop_flat_map(|n| {
            (
                prop::collection::vec(-1e3f32..1e3, n),
                prop::collection::vec(-1e3f32..1e3, n),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_identity_is_zero((a, _) in vec_pair()) {
            prop_assert_eq!(nmse(&a, &a), 0.0);
        }

        #[test]
        fn prop_bounded_by_zero_split((a, b) in vec_pair()) {
            let zero = vec![0f32; a.len()];
            let lhs = nmse(&a, &b);
            let rhs = nmse(&a, &zero) + nmse(&zero, &b);
            prop_assert!(lhs <= rhs * (1.0 + 1e-9) + 1e-12, "{} > {}", lhs, rhs);
        }
    }
}
