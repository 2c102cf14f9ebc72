//! Real FFT helpers built on rustfft.
//!
//! The engine only ever needs one-sided transforms of real signals. These
//! wrappers keep the scaling conventions in one place: the forward
//! transform is unscaled, the inverse divides by `nfft`, so
//! `irfft(rfft(x)) == x` and Parseval reads
//! `sum(x^2) == sum(|X|^2) / nfft` over the full (two-sided) spectrum.

use std::cell::RefCell;

use num_complex::Complex64;
use rustfft::FftPlanner;

thread_local! {
    // FFT plans are cached per worker thread; plans are cheap to reuse and
    // must not be shared across threads.
    static PLANNER: RefCell<FftPlanner<f64>> = RefCell::new(FftPlanner::new());
}

/// Smallest power of two >= `n`.
pub fn next_pow2(n: usize) -> usize {
    let mut p = 1;
    while p < n {
        p <<= 1;
    }
    p
}

/// Forward one-sided FFT of a real signal, zero-padded to `nfft`.
///
/// Returns `nfft/2 + 1` bins (DC through Nyquist).
pub fn rfft(data: &[f64], nfft: usize) -> Vec<Complex64> {
    debug_assert!(nfft >= data.len());
    let mut buf: Vec<Complex64> = data.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    buf.resize(nfft, Complex64::new(0.0, 0.0));
    PLANNER.with(|p| {
        let fft = p.borrow_mut().plan_fft_forward(nfft);
        fft.process(&mut buf);
    });
    buf.truncate(nfft / 2 + 1);
    buf
}

/// Inverse of [`rfft`]: reconstruct `nout` real samples from a one-sided
/// spectrum of `nfft/2 + 1` bins.
pub fn irfft(spectrum: &[Complex64], nfft: usize, nout: usize) -> Vec<f64> {
    debug_assert_eq!(spectrum.len(), nfft / 2 + 1);
    debug_assert!(nout <= nfft);
    let mut buf = Vec::with_capacity(nfft);
    buf.extend_from_slice(spectrum);
    // Hermitian symmetry for the negative frequencies
    for i in (1..nfft - nfft / 2).rev() {
        buf.push(spectrum[i].conj());
    }
    PLANNER.with(|p| {
        let fft = p.borrow_mut().plan_fft_inverse(nfft);
        fft.process(&mut buf);
    });
    buf.iter().take(nout).map(|c| c.re / nfft as f64).collect()
}

/// Frequency grid matching [`rfft`], in Hz.
pub fn rfftfreq(nfft: usize, dt: f64) -> Vec<f64> {
    let df = 1.0 / (nfft as f64 * dt);
    (0..=nfft / 2).map(|i| i as f64 * df).collect()
}

/// One-sided amplitude spectrum `|X(f)| * dt` of a real signal.
///
/// The `dt` scaling makes the result approximate the continuous Fourier
/// transform, which is the convention for Fourier amplitude spectra.
pub fn amplitude_spectrum(data: &[f64], dt: f64, nfft: usize) -> (Vec<f64>, Vec<f64>) {
    let spec = rfft(data, nfft);
    let freqs = rfftfreq(nfft, dt);
    let amps = spec.iter().map(|c| c.norm() * dt).collect();
    (freqs, amps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, dt: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 * dt).sin())
            .collect()
    }

    #[test]
    fn next_pow2_values() {
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(2), 2);
        assert_eq!(next_pow2(3), 4);
        assert_eq!(next_pow2(1000), 1024);
        assert_eq!(next_pow2(1024), 1024);
    }

    #[test]
    fn rfft_irfft_roundtrip() {
        let x = sine(3.0, 0.01, 500);
        let nfft = next_pow2(x.len());
        let spec = rfft(&x, nfft);
        let back = irfft(&spec, nfft, x.len());
        for (a, b) in x.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn parseval_holds() {
        let x = sine(5.0, 0.01, 1024);
        let nfft = 1024;
        let spec = rfft(&x, nfft);

        let time_energy: f64 = x.iter().map(|v| v * v).sum();
        // One-sided accounting: interior bins count twice
        let mut freq_energy = spec[0].norm_sqr() + spec[nfft / 2].norm_sqr();
        for c in &spec[1..nfft / 2] {
            freq_energy += 2.0 * c.norm_sqr();
        }
        freq_energy /= nfft as f64;

        let rel = (time_energy - freq_energy).abs() / time_energy;
        assert!(rel < 1e-8, "relative error {rel}");
    }

    #[test]
    fn spectral_peak_at_signal_frequency() {
        let dt = 0.01;
        let x = sine(10.0, dt, 2048);
        let (freqs, amps) = amplitude_spectrum(&x, dt, 2048);
        let (imax, _) = amps
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        assert!((freqs[imax] - 10.0).abs() < 0.1, "peak at {}", freqs[imax]);
    }

    #[test]
    fn rfftfreq_grid() {
        let freqs = rfftfreq(8, 0.125);
        // fs = 8 Hz, df = 1 Hz, Nyquist = 4 Hz
        assert_eq!(freqs.len(), 5);
        assert!((freqs[0] - 0.0).abs() < 1e-12);
        assert!((freqs[4] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn dc_component() {
        let x = vec![2.0; 64];
        let spec = rfft(&x, 64);
        assert!((spec[0].re - 128.0).abs() < 1e-9);
        assert!(spec[1].norm() < 1e-9);
    }
}
