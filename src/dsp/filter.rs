//! Butterworth filtering, tapering and zero padding.
//!
//! Two interchangeable implementations, selectable per call:
//!
//! - **frequency domain**: multiply the one-sided spectrum by the analog
//!   Butterworth magnitude response (squared for two passes, which is the
//!   acausal / zero-phase convention).
//! - **time domain**: a cascade of biquad sections with the Butterworth
//!   Q ladder, run forward only (causal) or forward-reverse (zero phase)
//!   for two passes.

use std::f64::consts::PI;

use crate::dsp::fft::{irfft, next_pow2, rfft, rfftfreq};

/// Filter band specification. Corner frequencies in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterBand {
    Lowpass { fc: f64 },
    Highpass { fc: f64 },
    Bandpass { f1: f64, f2: f64 },
    Bandstop { f1: f64, f2: f64 },
}

/// Which side(s) of the record a taper applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaperSide {
    Left,
    Right,
    Both,
}

// ─── Frequency-domain path ──────────────────────────────────────────

/// Analog Butterworth magnitude response at `f` for a single pass.
pub fn magnitude_response(band: FilterBand, order: u32, f: f64) -> f64 {
    let n2 = 2 * order as i32;
    match band {
        FilterBand::Lowpass { fc } => 1.0 / (1.0 + (f / fc).powi(n2)).sqrt(),
        FilterBand::Highpass { fc } => {
            if f <= 0.0 {
                0.0
            } else {
                1.0 / (1.0 + (fc / f).powi(n2)).sqrt()
            }
        }
        FilterBand::Bandpass { f1, f2 } => {
            if f <= 0.0 {
                0.0
            } else {
                let f0sq = f1 * f2;
                let omega = (f * f - f0sq) / (f * (f2 - f1));
                1.0 / (1.0 + omega.powi(n2)).sqrt()
            }
        }
        FilterBand::Bandstop { f1, f2 } => {
            let f0sq = f1 * f2;
            let denom = f0sq - f * f;
            if denom == 0.0 {
                return 0.0;
            }
            let omega = (f * (f2 - f1)) / denom;
            1.0 / (1.0 + omega.powi(n2)).sqrt()
        }
    }
}

/// Filter by spectral multiplication.
///
/// `number_of_passes == 2` squares the magnitude response, matching a
/// forward-reverse (acausal) time-domain filter with no phase shift.
pub fn filter_frequency_domain(
    data: &[f64],
    dt: f64,
    band: FilterBand,
    order: u32,
    number_of_passes: u32,
) -> Vec<f64> {
    let nfft = next_pow2(data.len());
    let mut spec = rfft(data, nfft);
    let freqs = rfftfreq(nfft, dt);
    for (c, &f) in spec.iter_mut().zip(freqs.iter()) {
        let mut h = magnitude_response(band, order, f);
        if number_of_passes == 2 {
            h *= h;
        }
        *c *= h;
    }
    irfft(&spec, nfft, data.len())
}

// ─── Time-domain path ───────────────────────────────────────────────

/// One second-order section, direct form II transposed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    /// Run the section over `data` in place (stateful, single pass).
    pub fn process(&self, data: &mut [f64]) {
        let mut z1 = 0.0;
        let mut z2 = 0.0;
        for x in data.iter_mut() {
            let input = *x;
            let output = self.b0 * input + z1;
            z1 = self.b1 * input - self.a1 * output + z2;
            z2 = self.b2 * input - self.a2 * output;
            *x = output;
        }
    }

    fn lowpass(fc: f64, fs: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * fc / fs;
        let (sw, cw) = (w0.sin(), w0.cos());
        let alpha = sw / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cw) / 2.0 / a0,
            b1: (1.0 - cw) / a0,
            b2: (1.0 - cw) / 2.0 / a0,
            a1: -2.0 * cw / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn highpass(fc: f64, fs: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * fc / fs;
        let (sw, cw) = (w0.sin(), w0.cos());
        let alpha = sw / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 + cw) / 2.0 / a0,
            b1: -(1.0 + cw) / a0,
            b2: (1.0 + cw) / 2.0 / a0,
            a1: -2.0 * cw / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn notch(f0: f64, fs: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * f0 / fs;
        let (sw, cw) = (w0.sin(), w0.cos());
        let alpha = sw / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: 1.0 / a0,
            b1: -2.0 * cw / a0,
            b2: 1.0 / a0,
            a1: -2.0 * cw / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// First-order section from the bilinear transform, expressed as a
    /// biquad with zeroed second-order terms.
    fn first_order(fc: f64, fs: f64, highpass: bool) -> Self {
        let k = (PI * fc / fs).tan();
        let a0 = k + 1.0;
        if highpass {
            Self {
                b0: 1.0 / a0,
                b1: -1.0 / a0,
                b2: 0.0,
                a1: (k - 1.0) / a0,
                a2: 0.0,
            }
        } else {
            Self {
                b0: k / a0,
                b1: k / a0,
                b2: 0.0,
                a1: (k - 1.0) / a0,
                a2: 0.0,
            }
        }
    }
}

/// Butterworth Q values for an order-`n` cascade.
///
/// Pole pair `k` sits at angle `phi` from the negative real axis with
/// `Q = 1 / (2 cos phi)`. Odd orders additionally carry one first-order
/// section, signalled by the returned `has_first_order` flag.
fn butterworth_q_ladder(order: u32) -> (Vec<f64>, bool) {
    let n = order as f64;
    let mut qs = Vec::new();
    if order % 2 == 0 {
        for k in 1..=(order / 2) {
            let phi = (2 * k - 1) as f64 * PI / (2.0 * n);
            qs.push(1.0 / (2.0 * phi.cos()));
        }
        (qs, false)
    } else {
        for k in 1..=((order - 1) / 2) {
            let phi = k as f64 * PI / n;
            qs.push(1.0 / (2.0 * phi.cos()));
        }
        (qs, true)
    }
}

/// Design the biquad cascade for a Butterworth filter.
pub fn design_sos(band: FilterBand, order: u32, fs: f64) -> Vec<Biquad> {
    let mut sos = Vec::new();
    match band {
        FilterBand::Lowpass { fc } => {
            let (qs, first) = butterworth_q_ladder(order);
            if first {
                sos.push(Biquad::first_order(fc, fs, false));
            }
            sos.extend(qs.iter().map(|&q| Biquad::lowpass(fc, fs, q)));
        }
        FilterBand::Highpass { fc } => {
            let (qs, first) = butterworth_q_ladder(order);
            if first {
                sos.push(Biquad::first_order(fc, fs, true));
            }
            sos.extend(qs.iter().map(|&q| Biquad::highpass(fc, fs, q)));
        }
        FilterBand::Bandpass { f1, f2 } => {
            sos.extend(design_sos(FilterBand::Highpass { fc: f1 }, order, fs));
            sos.extend(design_sos(FilterBand::Lowpass { fc: f2 }, order, fs));
        }
        FilterBand::Bandstop { f1, f2 } => {
            // Cascaded notch sections at the geometric centre; the notch Q
            // is set by the stop bandwidth.
            let f0 = (f1 * f2).sqrt();
            let q = f0 / (f2 - f1);
            for _ in 0..order {
                sos.push(Biquad::notch(f0, fs, q));
            }
        }
    }
    sos
}

/// Filter with cascaded biquads.
///
/// `number_of_passes == 2` runs forward then reverse for zero phase.
pub fn filter_time_domain(
    data: &[f64],
    dt: f64,
    band: FilterBand,
    order: u32,
    number_of_passes: u32,
) -> Vec<f64> {
    let fs = 1.0 / dt;
    let sos = design_sos(band, order, fs);
    let mut out = data.to_vec();
    for biquad in &sos {
        biquad.process(&mut out);
    }
    if number_of_passes == 2 {
        out.reverse();
        for biquad in &sos {
            biquad.process(&mut out);
        }
        out.reverse();
    }
    out
}

// ─── Tapering ───────────────────────────────────────────────────────

/// Apply a Hann taper of fractional `width` (of the record length, capped
/// at 0.5) to the requested side(s), in place.
pub fn hann_taper(data: &mut [f64], width: f64, side: TaperSide) {
    let n = data.len();
    if n < 2 {
        return;
    }
    let taper_len = ((width.clamp(0.0, 0.5)) * n as f64).floor() as usize;
    if taper_len == 0 {
        return;
    }
    let ramp = |i: usize| 0.5 * (1.0 - (PI * i as f64 / taper_len as f64).cos());
    if matches!(side, TaperSide::Left | TaperSide::Both) {
        for i in 0..taper_len.min(n) {
            data[i] *= ramp(i);
        }
    }
    if matches!(side, TaperSide::Right | TaperSide::Both) {
        for i in 0..taper_len.min(n) {
            data[n - 1 - i] *= ramp(i);
        }
    }
}

/// SAC-style cosine taper in the frequency domain over the band
/// `[f1, f2, f3, f4]`: zero below `f1` and above `f4`, unity in
/// `[f2, f3]`, cosine ramps between.
pub fn cosine_sac_taper(freqs: &[f64], f1: f64, f2: f64, f3: f64, f4: f64) -> Vec<f64> {
    freqs
        .iter()
        .map(|&f| {
            if f <= f1 || f >= f4 {
                0.0
            } else if f >= f2 && f <= f3 {
                1.0
            } else if f < f2 {
                0.5 * (1.0 - (PI * (f - f1) / (f2 - f1)).cos())
            } else {
                0.5 * (1.0 + (PI * (f - f3) / (f4 - f3)).cos())
            }
        })
        .collect()
}

// ─── Zero padding ───────────────────────────────────────────────────

/// Number of padding samples needed on each side to cover
/// `padding_factor / fhp` seconds.
pub fn pad_length(dt: f64, fhp: f64, padding_factor: f64) -> usize {
    (padding_factor / (fhp * dt)).ceil() as usize
}

/// Pad with zeros on both ends. Returns the padded buffer and the pad
/// length for the matching [`strip_pad`].
pub fn zero_pad(data: &[f64], pad: usize) -> Vec<f64> {
    let mut out = vec![0.0; data.len() + 2 * pad];
    out[pad..pad + data.len()].copy_from_slice(data);
    out
}

/// Remove symmetric padding added by [`zero_pad`].
pub fn strip_pad(data: &[f64], pad: usize) -> Vec<f64> {
    data[pad..data.len() - pad].to_vec()
}
