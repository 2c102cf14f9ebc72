//! Detrending methods, from plain demean to sixth-order baseline
//! correction.
//!
//! The polynomial machinery fits in a normalized abscissa `u = t / T`
//! (record duration `T`) to keep the normal equations well conditioned at
//! order six over records minutes long.

use crate::dsp::integrate::cumtrapz;

/// Arithmetic mean.
pub fn mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

/// Subtract the mean in place.
pub fn demean(x: &mut [f64]) {
    let m = mean(x);
    for v in x.iter_mut() {
        *v -= m;
    }
}

/// Subtract the least-squares line in place.
pub fn detrend_linear(x: &mut [f64]) {
    let n = x.len() as f64;
    // Closed-form LS line over i = 0..n-1
    let sum_i = (n - 1.0) * n / 2.0;
    let sum_ii = (n - 1.0) * n * (2.0 * n - 1.0) / 6.0;
    let sum_y: f64 = x.iter().sum();
    let sum_iy: f64 = x.iter().enumerate().map(|(i, &v)| i as f64 * v).sum();
    let denom = n * sum_ii - sum_i * sum_i;
    if denom == 0.0 {
        return;
    }
    let slope = (n * sum_iy - sum_i * sum_y) / denom;
    let intercept = (sum_y - slope * sum_i) / n;
    for (i, v) in x.iter_mut().enumerate() {
        *v -= intercept + slope * i as f64;
    }
}

/// Subtract the line through the first and last samples in place.
pub fn detrend_simple(x: &mut [f64]) {
    let n = x.len();
    if n < 2 {
        return;
    }
    let first = x[0];
    let slope = (x[n - 1] - first) / (n - 1) as f64;
    for (i, v) in x.iter_mut().enumerate() {
        *v -= first + slope * i as f64;
    }
}

/// Subtract the mean of the pre-event noise window (`..split_idx`).
///
/// Returns the subtracted value; `None` when the window is empty.
pub fn detrend_pre_event(x: &mut [f64], split_idx: usize) -> Option<f64> {
    if split_idx == 0 || split_idx > x.len() {
        return None;
    }
    let m = mean(&x[..split_idx]);
    for v in x.iter_mut() {
        *v -= m;
    }
    Some(m)
}

// ─── Polynomial fitting ─────────────────────────────────────────────

/// A least-squares polynomial fit in the normalized abscissa `u = t / T`.
///
/// `coeffs[k]` multiplies `u^k`.
#[derive(Debug, Clone, PartialEq)]
pub struct PolyFit {
    pub coeffs: Vec<f64>,
    /// Abscissa scale (record duration) in seconds
    pub scale: f64,
}

impl PolyFit {
    /// Fit a polynomial of `order` to evenly sampled data.
    ///
    /// Returns `None` when the normal equations are singular (order too
    /// high for the record length).
    pub fn fit(y: &[f64], dt: f64, order: usize) -> Option<Self> {
        let n = y.len();
        if n <= order {
            return None;
        }
        let scale = dt * (n - 1) as f64;
        let m = order + 1;
        // Normal equations A c = b with A[j][k] = sum u^(j+k)
        let mut pow_sums = vec![0.0; 2 * order + 1];
        let mut b = vec![0.0; m];
        for (i, &yi) in y.iter().enumerate() {
            let u = i as f64 * dt / scale;
            let mut up = 1.0;
            for (j, bj) in b.iter_mut().enumerate() {
                *bj += up * yi;
                pow_sums[j] += up;
                up *= u;
            }
            for sum in pow_sums.iter_mut().take(2 * order + 1).skip(m) {
                *sum += up;
                up *= u;
            }
        }
        let a: Vec<Vec<f64>> = (0..m)
            .map(|j| (0..m).map(|k| pow_sums[j + k]).collect())
            .collect();
        let coeffs = solve_linear(a, b)?;
        Some(Self { coeffs, scale })
    }

    /// Evaluate at time `t` (seconds from the record start).
    pub fn eval(&self, t: f64) -> f64 {
        let u = t / self.scale;
        // Horner, highest order first
        self.coeffs.iter().rev().fold(0.0, |acc, &c| acc * u + c)
    }

    /// Second derivative with respect to `t`.
    pub fn second_derivative(&self, t: f64) -> f64 {
        let u = t / self.scale;
        let mut acc = 0.0;
        for (k, &c) in self.coeffs.iter().enumerate().skip(2) {
            acc += c * (k * (k - 1)) as f64 * u.powi(k as i32 - 2);
        }
        acc / (self.scale * self.scale)
    }
}

/// Subtract a least-squares polynomial of `order` in place.
pub fn detrend_polynomial(x: &mut [f64], dt: f64, order: usize) -> Option<PolyFit> {
    let fit = PolyFit::fit(x, dt, order)?;
    for (i, v) in x.iter_mut().enumerate() {
        *v -= fit.eval(i as f64 * dt);
    }
    Some(fit)
}

/// Gaussian elimination with partial pivoting.
fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut acc = b[row];
        for k in row + 1..n {
            acc -= a[row][k] * x[k];
        }
        x[row] = acc / a[row][row];
    }
    Some(x)
}

// ─── Spline detrend ─────────────────────────────────────────────────

/// Subtract a natural cubic spline fitted through knot-window means.
///
/// `dspline` is the knot spacing in samples. Returns `None` when the
/// record is too short for at least three knots.
pub fn detrend_spline(x: &mut [f64], dspline: usize) -> Option<()> {
    let n = x.len();
    let nknots = n / dspline.max(1) + 1;
    if nknots < 3 {
        return None;
    }
    // Knot ordinates from local means so single outliers don't steer the fit
    let mut knot_t = Vec::with_capacity(nknots);
    let mut knot_y = Vec::with_capacity(nknots);
    for k in 0..nknots {
        let centre = (k * (n - 1)) / (nknots - 1);
        let half = dspline / 2;
        let lo = centre.saturating_sub(half);
        let hi = (centre + half + 1).min(n);
        knot_t.push(centre as f64);
        knot_y.push(mean(&x[lo..hi]));
    }
    let spline = NaturalCubicSpline::new(&knot_t, &knot_y)?;
    for (i, v) in x.iter_mut().enumerate() {
        *v -= spline.eval(i as f64);
    }
    Some(())
}

/// Natural cubic spline interpolant.
struct NaturalCubicSpline {
    t: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at the knots
    m: Vec<f64>,
}

impl NaturalCubicSpline {
    fn new(t: &[f64], y: &[f64]) -> Option<Self> {
        let n = t.len();
        if n < 3 || y.len() != n {
            return None;
        }
        // Tridiagonal system for interior second derivatives
        let mut sub = vec![0.0; n];
        let mut diag = vec![1.0; n];
        let mut sup = vec![0.0; n];
        let mut rhs = vec![0.0; n];
        for i in 1..n - 1 {
            let h0 = t[i] - t[i - 1];
            let h1 = t[i + 1] - t[i];
            sub[i] = h0;
            diag[i] = 2.0 * (h0 + h1);
            sup[i] = h1;
            rhs[i] = 6.0 * ((y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0);
        }
        // Thomas algorithm
        for i in 1..n {
            let w = sub[i] / diag[i - 1];
            diag[i] -= w * sup[i - 1];
            rhs[i] -= w * rhs[i - 1];
        }
        let mut m = vec![0.0; n];
        m[n - 1] = rhs[n - 1] / diag[n - 1];
        for i in (0..n - 1).rev() {
            m[i] = (rhs[i] - sup[i] * m[i + 1]) / diag[i];
        }
        Some(Self {
            t: t.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    fn eval(&self, x: f64) -> f64 {
        let n = self.t.len();
        let i = match self
            .t
            .binary_search_by(|v| v.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Less))
        {
            Ok(i) => i.min(n - 2),
            Err(i) => i.clamp(1, n - 1) - 1,
        };
        let h = self.t[i + 1] - self.t[i];
        let a = (self.t[i + 1] - x) / h;
        let b = (x - self.t[i]) / h;
        a * self.y[i]
            + b * self.y[i + 1]
            + ((a * a * a - a) * self.m[i] + (b * b * b - b) * self.m[i + 1]) * h * h / 6.0
    }
}

// ─── Sixth-order baseline correction ────────────────────────────────

/// Baseline-correct an acceleration record.
///
/// Double-integrates to displacement (cumulative trapezoid, zero initial
/// conditions), fits a sixth-order polynomial constrained to zero constant
/// and linear terms, differentiates the fit twice analytically, and
/// subtracts it from the acceleration in place.
///
/// Returns the fitted displacement polynomial (terms `u^2..u^6` in the
/// normalized abscissa).
pub fn baseline_sixth_order(acc: &mut [f64], dt: f64) -> Option<PolyFit> {
    let vel = cumtrapz(acc, dt, 0.0);
    let disp = cumtrapz(&vel, dt, 0.0);
    let fit = fit_constrained_sixth(&disp, dt)?;
    for (i, v) in acc.iter_mut().enumerate() {
        *v -= fit.second_derivative(i as f64 * dt);
    }
    Some(fit)
}

/// Least-squares sixth-order fit over the basis `{u^2 .. u^6}` (constant
/// and linear terms fixed at zero).
pub fn fit_constrained_sixth(y: &[f64], dt: f64) -> Option<PolyFit> {
    let n = y.len();
    if n < 8 {
        return None;
    }
    let scale = dt * (n - 1) as f64;
    // Basis u^2..u^6: A[j][k] = sum u^(j+k+4), b[j] = sum y u^(j+2)
    let mut a = vec![vec![0.0; 5]; 5];
    let mut b = vec![0.0; 5];
    for (i, &yi) in y.iter().enumerate() {
        let u = i as f64 * dt / scale;
        let powers: Vec<f64> = (2..=6).map(|p| u.powi(p)).collect();
        for j in 0..5 {
            b[j] += powers[j] * yi;
            for k in 0..5 {
                a[j][k] += powers[j] * powers[k];
            }
        }
    }
    let c = solve_linear(a, b)?;
    let mut coeffs = vec![0.0, 0.0];
    coeffs.extend(c);
    Some(PolyFit { coeffs, scale })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demean_zeroes_mean() {
        let mut x = vec![1000.0, 1001.0, 999.0, 1000.0];
        demean(&mut x);
        assert!(mean(&x).abs() < 1e-12);
    }

    #[test]
    fn linear_removes_drift_and_offset() {
        // DC offset of 1000 counts plus a slow linear drift
        let mut x: Vec<f64> = (0..12000)
            .map(|i| 1000.0 + 0.003 * i as f64 + (i as f64 * 0.07).sin())
            .collect();
        let scale = x.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        detrend_linear(&mut x);
        demean(&mut x);
        assert!(mean(&x).abs() <= 1e-10 * scale);
        // Residual LS slope
        let n = x.len() as f64;
        let sum_i = (n - 1.0) * n / 2.0;
        let sum_ii = (n - 1.0) * n * (2.0 * n - 1.0) / 6.0;
        let sum_y: f64 = x.iter().sum();
        let sum_iy: f64 = x.iter().enumerate().map(|(i, &v)| i as f64 * v).sum();
        let slope = (n * sum_iy - sum_i * sum_y) / (n * sum_ii - sum_i * sum_i);
        assert!(slope.abs() <= 1e-10);
    }

    #[test]
    fn simple_zeroes_endpoints() {
        let mut x = vec![5.0, 7.0, 3.0, 9.0];
        detrend_simple(&mut x);
        assert_eq!(x[0], 0.0);
        assert_eq!(x[3], 0.0);
    }

    #[test]
    fn pre_event_uses_noise_window_only() {
        let mut x = vec![2.0, 2.0, 2.0, 2.0, 10.0, 10.0];
        let removed = detrend_pre_event(&mut x, 4).unwrap();
        assert_eq!(removed, 2.0);
        assert_eq!(x[0], 0.0);
        assert_eq!(x[5], 8.0);
    }

    #[test]
    fn pre_event_empty_window() {
        let mut x = vec![1.0; 4];
        assert!(detrend_pre_event(&mut x, 0).is_none());
    }

    #[test]
    fn polyfit_recovers_cubic() {
        let dt = 0.01;
        let y: Vec<f64> = (0..500)
            .map(|i| {
                let t = i as f64 * dt;
                1.0 + 2.0 * t - 0.5 * t * t + 0.1 * t * t * t
            })
            .collect();
        let fit = PolyFit::fit(&y, dt, 3).unwrap();
        for i in (0..500).step_by(50) {
            let t = i as f64 * dt;
            assert!((fit.eval(t) - y[i]).abs() < 1e-8, "at t={t}");
        }
    }

    #[test]
    fn polyfit_too_short_is_none() {
        assert!(PolyFit::fit(&[1.0, 2.0], 0.1, 3).is_none());
    }

    #[test]
    fn polynomial_detrend_kills_quadratic() {
        let dt = 0.01;
        let mut x: Vec<f64> = (0..1000)
            .map(|i| {
                let t = i as f64 * dt;
                3.0 * t * t - t + 0.5
            })
            .collect();
        detrend_polynomial(&mut x, dt, 2).unwrap();
        assert!(x.iter().all(|v| v.abs() < 1e-7));
    }

    #[test]
    fn second_derivative_of_quadratic() {
        // y = t^2 -> y'' = 2 everywhere
        let dt = 0.01;
        let y: Vec<f64> = (0..200)
            .map(|i| {
                let t = i as f64 * dt;
                t * t
            })
            .collect();
        let fit = PolyFit::fit(&y, dt, 2).unwrap();
        assert!((fit.second_derivative(0.5) - 2.0).abs() < 1e-6);
        assert!((fit.second_derivative(1.5) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn spline_detrend_removes_slow_wander() {
        let mut x: Vec<f64> = (0..2000)
            .map(|i| {
                let t = i as f64 * 0.01;
                (0.15 * t).sin() * 50.0 + (8.0 * t).sin()
            })
            .collect();
        let before = x.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        detrend_spline(&mut x, 200).unwrap();
        let after = x.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(after < before / 5.0, "before {before}, after {after}");
    }

    #[test]
    fn spline_too_short_is_none() {
        let mut x = vec![0.0; 10];
        assert!(detrend_spline(&mut x, 100).is_none());
    }

    #[test]
    fn baseline_sixth_order_removes_polynomial_drift() {
        // Acceleration whose displacement drifts like a high-order polynomial
        let dt = 0.01;
        let n = 6000;
        let mut acc: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64 * dt;
                (4.0 * t).sin() + 1e-4 * t * t // slow quadratic acc drift
            })
            .collect();
        let fit = baseline_sixth_order(&mut acc, dt).unwrap();
        assert_eq!(fit.coeffs.len(), 7);
        assert_eq!(fit.coeffs[0], 0.0);
        assert_eq!(fit.coeffs[1], 0.0);

        // The corrected displacement retains nothing the constrained basis
        // can express: refitting yields coefficients negligible against the
        // displacement scale.
        let vel = cumtrapz(&acc, dt, 0.0);
        let disp = cumtrapz(&vel, dt, 0.0);
        let disp_scale = disp.iter().fold(1e-30_f64, |m, v| m.max(v.abs()));
        let refit = fit_constrained_sixth(&disp, dt).unwrap();
        for c in &refit.coeffs[2..] {
            assert!(
                c.abs() <= 1e-6 * disp_scale.max(1.0),
                "residual coefficient {c}, scale {disp_scale}"
            );
        }
    }
}
