//! Integration and differentiation of sampled records.
//!
//! Both operations come in a time-domain and a frequency-domain flavour,
//! selected by configuration. The time-domain integral is trapezoidal and
//! cumulative; the frequency-domain versions divide/multiply the spectrum
//! by `i*2*pi*f` with the DC bin forced to zero.

use num_complex::Complex64;

use crate::dsp::fft::{irfft, next_pow2, rfft, rfftfreq};

/// Cumulative trapezoidal integration.
///
/// Output has the same length as the input; `initial` is the value of the
/// first output sample.
pub fn cumtrapz(data: &[f64], dt: f64, initial: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(data.len());
    let mut acc = initial;
    out.push(acc);
    for pair in data.windows(2) {
        acc += 0.5 * (pair[0] + pair[1]) * dt;
        out.push(acc);
    }
    out
}

/// Frequency-domain integration: divide by `i*omega`, zero at DC.
pub fn integrate_frequency(data: &[f64], dt: f64) -> Vec<f64> {
    let nfft = next_pow2(data.len());
    let mut spec = rfft(data, nfft);
    let freqs = rfftfreq(nfft, dt);
    spec[0] = Complex64::new(0.0, 0.0);
    for (c, &f) in spec.iter_mut().zip(freqs.iter()).skip(1) {
        let iw = Complex64::new(0.0, 2.0 * std::f64::consts::PI * f);
        *c /= iw;
    }
    irfft(&spec, nfft, data.len())
}

/// Central-difference differentiation (one-sided at the ends).
pub fn gradient(data: &[f64], dt: f64) -> Vec<f64> {
    let n = data.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut out = Vec::with_capacity(n);
    out.push((data[1] - data[0]) / dt);
    for i in 1..n - 1 {
        out.push((data[i + 1] - data[i - 1]) / (2.0 * dt));
    }
    out.push((data[n - 1] - data[n - 2]) / dt);
    out
}

/// Frequency-domain differentiation: multiply by `i*omega`.
pub fn differentiate_frequency(data: &[f64], dt: f64) -> Vec<f64> {
    let nfft = next_pow2(data.len());
    let mut spec = rfft(data, nfft);
    let freqs = rfftfreq(nfft, dt);
    for (c, &f) in spec.iter_mut().zip(freqs.iter()) {
        let iw = Complex64::new(0.0, 2.0 * std::f64::consts::PI * f);
        *c *= iw;
    }
    irfft(&spec, nfft, data.len())
}

/// How a record is integrated, from the `integration` config section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrationOptions {
    /// Frequency-domain integration instead of cumulative trapezoid
    pub frequency: bool,
    /// Initial value of the time-domain integral
    pub initial: f64,
    /// Remove the mean from the result
    pub demean: bool,
}

impl Default for IntegrationOptions {
    fn default() -> Self {
        Self {
            frequency: false,
            initial: 0.0,
            demean: false,
        }
    }
}

/// Integrate once with the configured scheme.
pub fn integrate(data: &[f64], dt: f64, opts: IntegrationOptions) -> Vec<f64> {
    let mut out = if opts.frequency {
        integrate_frequency(data, dt)
    } else {
        cumtrapz(data, dt, opts.initial)
    };
    if opts.demean {
        let m = out.iter().sum::<f64>() / out.len() as f64;
        for v in out.iter_mut() {
            *v -= m;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn cumtrapz_of_constant_is_ramp() {
        let x = vec![2.0; 101];
        let y = cumtrapz(&x, 0.1, 0.0);
        assert_eq!(y[0], 0.0);
        assert!((y[100] - 20.0).abs() < 1e-12);
    }

    #[test]
    fn cumtrapz_initial_offset() {
        let x = vec![0.0; 10];
        let y = cumtrapz(&x, 0.1, 5.0);
        assert!(y.iter().all(|&v| (v - 5.0).abs() < 1e-12));
    }

    #[test]
    fn cumtrapz_of_cosine_is_sine() {
        let dt = 0.001;
        let f = 2.0;
        let w = 2.0 * PI * f;
        let x: Vec<f64> = (0..5000).map(|i| (w * i as f64 * dt).cos()).collect();
        let y = cumtrapz(&x, dt, 0.0);
        for (i, v) in y.iter().enumerate().step_by(500) {
            let expect = (w * i as f64 * dt).sin() / w;
            assert!((v - expect).abs() < 1e-4, "at {i}: {v} vs {expect}");
        }
    }

    #[test]
    fn gradient_of_ramp_is_constant() {
        let x: Vec<f64> = (0..100).map(|i| 3.0 * i as f64 * 0.01).collect();
        let g = gradient(&x, 0.01);
        assert!(g.iter().all(|&v| (v - 3.0).abs() < 1e-9));
    }

    #[test]
    fn gradient_inverts_cumtrapz() {
        let dt = 0.01;
        let x: Vec<f64> = (0..1000)
            .map(|i| (2.0 * PI * 1.5 * i as f64 * dt).sin())
            .collect();
        let y = cumtrapz(&x, dt, 0.0);
        let back = gradient(&y, dt);
        // Central differencing of the trapezoid leaves an amplitude error
        // of about (w*dt/2)^2
        for (a, b) in x.iter().zip(back.iter()).skip(1).take(997) {
            assert!((a - b).abs() < 5e-3);
        }
    }

    #[test]
    fn frequency_integration_of_sine() {
        // Whole number of cycles over the transform length keeps the
        // frequency-domain integral leakage-free
        let dt = 0.01;
        let n = 1024;
        let f = 41.0 / (n as f64 * dt); // 41 cycles in 10.24 s
        let w = 2.0 * PI * f;
        let x: Vec<f64> = (0..n).map(|i| (w * i as f64 * dt).sin()).collect();
        let y = integrate_frequency(&x, dt);
        // Compare against -cos(wt)/w up to a constant: remove means first
        let expect: Vec<f64> = (0..n).map(|i| -(w * i as f64 * dt).cos() / w).collect();
        let my = y.iter().sum::<f64>() / n as f64;
        let me = expect.iter().sum::<f64>() / n as f64;
        for i in (50..n - 50).step_by(100) {
            assert!(
                ((y[i] - my) - (expect[i] - me)).abs() < 2e-3,
                "at {i}: {} vs {}",
                y[i] - my,
                expect[i] - me
            );
        }
    }

    #[test]
    fn frequency_differentiation_of_sine() {
        let dt = 0.01;
        let n = 1024;
        let f = 41.0 / (n as f64 * dt);
        let w = 2.0 * PI * f;
        let x: Vec<f64> = (0..n).map(|i| (w * i as f64 * dt).sin()).collect();
        let y = differentiate_frequency(&x, dt);
        for i in (100..n - 100).step_by(100) {
            let expect = w * (w * i as f64 * dt).cos();
            assert!((y[i] - expect).abs() < 0.5, "at {i}: {} vs {expect}", y[i]);
        }
    }

    #[test]
    fn integrate_demean_removes_mean() {
        let x = vec![1.0; 500];
        let y = integrate(
            &x,
            0.01,
            IntegrationOptions {
                frequency: false,
                initial: 0.0,
                demean: true,
            },
        );
        let m = y.iter().sum::<f64>() / y.len() as f64;
        assert!(m.abs() < 1e-12);
    }
}
