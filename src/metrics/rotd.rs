//! Orientation-independent horizontal combination (RotD).
//!
//! For every rotation angle on a one-degree grid, the two horizontals
//! combine into `h1*cos(theta) + h2*sin(theta)`; the metric evaluates per
//! rotation and the requested percentile is taken across rotations.

/// Rotation grid step in degrees.
const THETA_STEP_DEG: usize = 1;

/// Evaluate `metric` over all rotations of a horizontal pair and return
/// the `percentile` across rotations.
///
/// The two inputs must share length and sampling.
pub fn rotd<F>(h1: &[f64], h2: &[f64], percentile: f64, metric: F) -> f64
where
    F: Fn(&[f64]) -> f64,
{
    debug_assert_eq!(h1.len(), h2.len());
    let mut values = Vec::with_capacity(180 / THETA_STEP_DEG);
    let mut rotated = vec![0.0; h1.len()];
    for deg in (0..180).step_by(THETA_STEP_DEG) {
        let theta = (deg as f64).to_radians();
        let (c, s) = (theta.cos(), theta.sin());
        for ((r, &a), &b) in rotated.iter_mut().zip(h1.iter()).zip(h2.iter()) {
            *r = a * c + b * s;
        }
        values.push(metric(&rotated));
    }
    percentile_of(&mut values, percentile)
}

/// Linear-interpolated percentile of a sample set. `values` is reordered.
pub fn percentile_of(values: &mut [f64], percentile: f64) -> f64 {
    debug_assert!(!values.is_empty());
    // total_cmp keeps NaN metric values (sorted last) from panicking;
    // callers screen the result with is_finite
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = percentile.clamp(0.0, 100.0) / 100.0 * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        values[lo]
    } else {
        let frac = rank - lo as f64;
        values[lo] * (1.0 - frac) + values[hi] * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(x: &[f64]) -> f64 {
        x.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
    }

    #[test]
    fn percentile_endpoints() {
        let mut v = vec![3.0, 1.0, 2.0];
        assert_eq!(percentile_of(&mut v.clone(), 0.0), 1.0);
        assert_eq!(percentile_of(&mut v.clone(), 100.0), 3.0);
        assert_eq!(percentile_of(&mut v, 50.0), 2.0);
    }

    #[test]
    fn rotd100_of_circular_motion_is_isotropic() {
        // h1 = cos(wt), h2 = sin(wt): every rotation has unit peak
        let n = 5000;
        let h1: Vec<f64> = (0..n).map(|i| (0.05 * i as f64).cos()).collect();
        let h2: Vec<f64> = (0..n).map(|i| (0.05 * i as f64).sin()).collect();
        let v50 = rotd(&h1, &h2, 50.0, peak);
        let v100 = rotd(&h1, &h2, 100.0, peak);
        assert!((v50 - 1.0).abs() < 1e-3);
        assert!((v100 - 1.0).abs() < 1e-3);
    }

    #[test]
    fn rotd_invariant_under_rigid_rotation() {
        // Rotating the input pair must not change RotD50 of the peak
        let n = 4000;
        let h1: Vec<f64> = (0..n)
            .map(|i| (0.013 * i as f64).sin() * (1.0 - (i as f64 / n as f64)))
            .collect();
        let h2: Vec<f64> = (0..n).map(|i| (0.007 * i as f64).cos() * 0.6).collect();

        let alpha = 37.0_f64.to_radians();
        let (c, s) = (alpha.cos(), alpha.sin());
        let r1: Vec<f64> = h1.iter().zip(h2.iter()).map(|(a, b)| a * c + b * s).collect();
        let r2: Vec<f64> = h1.iter().zip(h2.iter()).map(|(a, b)| -a * s + b * c).collect();

        let original = rotd(&h1, &h2, 50.0, peak);
        let rotated = rotd(&r1, &r2, 50.0, peak);
        assert!(
            (original - rotated).abs() / original < 0.02,
            "original {original}, rotated {rotated}"
        );
    }

    #[test]
    fn rotd100_at_least_rotd50() {
        let n = 3000;
        let h1: Vec<f64> = (0..n).map(|i| (0.011 * i as f64).sin()).collect();
        let h2: Vec<f64> = (0..n).map(|i| (0.023 * i as f64).sin() * 0.3).collect();
        let v50 = rotd(&h1, &h2, 50.0, peak);
        let v100 = rotd(&h1, &h2, 100.0, peak);
        assert!(v100 >= v50);
    }

    #[test]
    fn linear_polarization_rotd100_matches_resultant() {
        // Both components proportional: motion is a straight line whose
        // amplitude is the vector resultant
        let n = 2000;
        let base: Vec<f64> = (0..n).map(|i| (0.01 * i as f64).sin()).collect();
        let h1: Vec<f64> = base.iter().map(|v| 3.0 * v).collect();
        let h2: Vec<f64> = base.iter().map(|v| 4.0 * v).collect();
        let v100 = rotd(&h1, &h2, 100.0, peak);
        let resultant = 5.0 * base.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!((v100 - resultant).abs() / resultant < 1e-3);
    }
}
