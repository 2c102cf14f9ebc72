//! Fourier amplitude spectra.
//!
//! One-sided magnitude spectrum of acceleration (`|A(f)| * dt`, cm/s for
//! cm/s^2 input), Konno-Ohmachi smoothed onto the configured grid. The
//! horizontal combination is the quadratic mean of the component power
//! spectra, combined before smoothing.

use crate::dsp::fft::{amplitude_spectrum, next_pow2};
use crate::dsp::smoothing::konno_ohmachi_smooth;

/// Smoothed FAS of a single record on `grid`.
pub fn fas(acc: &[f64], dt: f64, grid: &[f64], bandwidth: f64, allow_nans: bool) -> Vec<f64> {
    let nfft = next_pow2(acc.len());
    let (freqs, amps) = amplitude_spectrum(acc, dt, nfft);
    let mut smoothed = konno_ohmachi_smooth(&freqs, &amps, grid, bandwidth);
    mask_out_of_band(&mut smoothed, grid, &freqs, allow_nans);
    smoothed
}

/// Smoothed quadratic-mean FAS of a horizontal pair.
pub fn fas_quadratic_mean(
    h1: &[f64],
    h2: &[f64],
    dt: f64,
    grid: &[f64],
    bandwidth: f64,
    allow_nans: bool,
) -> Vec<f64> {
    let nfft = next_pow2(h1.len().max(h2.len()));
    let (freqs, a1) = amplitude_spectrum(h1, dt, nfft);
    let (_, a2) = amplitude_spectrum(h2, dt, nfft);
    let combined: Vec<f64> = a1
        .iter()
        .zip(a2.iter())
        .map(|(x, y)| ((x * x + y * y) / 2.0).sqrt())
        .collect();
    let mut smoothed = konno_ohmachi_smooth(&freqs, &combined, grid, bandwidth);
    mask_out_of_band(&mut smoothed, grid, &freqs, allow_nans);
    smoothed
}

/// Grid points outside the resolvable band become NaN (or zero).
fn mask_out_of_band(smoothed: &mut [f64], grid: &[f64], freqs: &[f64], allow_nans: bool) {
    let fmin = freqs.iter().copied().find(|&f| f > 0.0).unwrap_or(0.0);
    let fmax = freqs.last().copied().unwrap_or(0.0);
    for (s, &fc) in smoothed.iter_mut().zip(grid.iter()) {
        if fc < fmin || fc > fmax {
            *s = if allow_nans { f64::NAN } else { 0.0 };
        }
    }
}
