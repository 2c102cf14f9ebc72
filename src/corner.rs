//! Corner-frequency selection and refinement.
//!
//! Three selection methods (constant, SNR-driven, magnitude table), the
//! Nyquist/lowpass cap, a Ridder's-method search for the smallest usable
//! high-pass corner, and the displacement-drift corner adjustment.

use serde_json::json;

use crate::dsp::detrend::{PolyFit, demean};
use crate::dsp::filter::{FilterBand, filter_frequency_domain};
use crate::dsp::integrate::{cumtrapz, integrate_frequency};
use crate::error::{FailureKind, FailureReason, Result};
use crate::stream::Stream;
use crate::trace::{Trace, TraceParam, param_keys};

// ─── Selection methods ──────────────────────────────────────────────

/// Set fixed corners on every passing trace.
pub fn corners_constant(stream: &mut Stream, highpass: f64, lowpass: f64) -> Result<()> {
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        set_corners(tr, highpass, lowpass, "constant");
    }
    Ok(())
}

/// Corners from the magnitude table: the row with the largest `minmag`
/// not exceeding the event magnitude wins.
pub fn corners_magnitude(
    stream: &mut Stream,
    magnitude: f64,
    minmag: &[f64],
    highpass: &[f64],
    lowpass: &[f64],
) -> Result<()> {
    let mut row = 0usize;
    for (i, &m) in minmag.iter().enumerate() {
        if magnitude >= m {
            row = i;
        }
    }
    let (hp, lp) = (highpass[row.min(highpass.len() - 1)], lowpass[row.min(lowpass.len() - 1)]);
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        set_corners(tr, hp, lp, "magnitude");
    }
    Ok(())
}

/// Corners from the SNR curve.
///
/// Starting at the SNR peak and walking outward, the band where the SNR
/// stays at or above `threshold` sets the corners: its lower edge the
/// high-pass, its upper edge the low-pass. With `same_horiz`, both
/// horizontals adopt the more conservative corner pair.
pub fn corners_snr(stream: &mut Stream, threshold: f64, same_horiz: bool) -> Result<()> {
    let mut horiz_corners: Vec<(f64, f64)> = Vec::new();
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        match snr_corner_pair(tr, threshold) {
            Some((hp, lp)) => {
                if tr.stats().is_horizontal() {
                    horiz_corners.push((hp, lp));
                }
                set_corners(tr, hp, lp, "snr");
            }
            None => tr.fail(FailureReason::new(
                FailureKind::QaCheckFail,
                "get_corner_frequencies",
                "SNR never reaches threshold; no usable passband",
            )),
        }
    }

    if same_horiz && horiz_corners.len() >= 2 {
        let hp = horiz_corners.iter().map(|c| c.0).fold(0.0_f64, f64::max);
        let lp = horiz_corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
        for tr in stream.traces_mut() {
            if tr.passed() && tr.stats().is_horizontal() {
                set_corners(tr, hp, lp, "snr");
            }
        }
    }
    Ok(())
}

fn snr_corner_pair(tr: &Trace, threshold: f64) -> Option<(f64, f64)> {
    let Some(TraceParam::Snr { freq, snr }) = tr.param(param_keys::SNR) else {
        return None;
    };
    let peak = snr
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?
        .0;
    if snr[peak] < threshold {
        return None;
    }
    let mut lo = peak;
    while lo > 0 && snr[lo - 1] >= threshold {
        lo -= 1;
    }
    let mut hi = peak;
    while hi + 1 < snr.len() && snr[hi + 1] >= threshold {
        hi += 1;
    }
    Some((freq[lo], freq[hi]))
}

fn set_corners(tr: &mut Trace, highpass: f64, lowpass: f64, method: &str) {
    tr.set_param(
        param_keys::CORNER_FREQUENCIES,
        TraceParam::CornerFrequencies {
            highpass,
            lowpass,
            method: method.into(),
        },
    );
    tr.record_activity(
        "get_corner_frequencies",
        json!({"highpass": highpass, "lowpass": lowpass, "method": method}),
    );
}

// ─── Lowpass cap ────────────────────────────────────────────────────

/// Cap the low-pass corner at `fn_fac * Nyquist` and `lp_max`.
pub fn lowpass_max_frequency(stream: &mut Stream, fn_fac: f64, lp_max: f64) -> Result<()> {
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let Some((hp, lp)) = tr.corner_frequencies() else {
            tr.fail(FailureReason::new(
                FailureKind::MissingPrereq,
                "lowpass_max_frequency",
                "no corner_frequencies parameter",
            ));
            continue;
        };
        let nyquist = 0.5 * tr.sampling_rate();
        let capped = lp.min(fn_fac * nyquist).min(lp_max);
        if capped < lp {
            set_corners(tr, hp, capped, "capped");
        }
    }
    Ok(())
}

// ─── Ridder high-pass search ────────────────────────────────────────

/// Integration scheme used when the search converts acceleration to
/// displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FchpIntegration {
    FrequencyDomain,
    TimeDomainZeroInit,
    TimeDomainZeroMean,
}

/// Parameters of the Ridder high-pass corner search.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RidderOptions {
    /// Acceptable ratio of cubic-fit residual to peak displacement
    pub target: f64,
    pub tol: f64,
    pub maxiter: usize,
    /// Upper end of the corner search range, Hz
    pub maxfc: f64,
    /// Filter order used while probing corners
    pub filter_order: u32,
    pub integration: FchpIntegration,
}

impl Default for RidderOptions {
    fn default() -> Self {
        Self {
            target: 0.02,
            tol: 0.001,
            maxiter: 30,
            maxfc: 0.5,
            filter_order: 5,
            integration: FchpIntegration::TimeDomainZeroInit,
        }
    }
}

/// Drift ratio of the high-passed record: max |cubic fit| over
/// max |displacement|.
fn drift_ratio(acc: &[f64], dt: f64, fc: f64, opts: &RidderOptions) -> Option<f64> {
    let filtered = filter_frequency_domain(acc, dt, FilterBand::Highpass { fc }, opts.filter_order, 2);
    let disp = match opts.integration {
        FchpIntegration::FrequencyDomain => {
            integrate_frequency(&integrate_frequency(&filtered, dt), dt)
        }
        FchpIntegration::TimeDomainZeroInit => {
            let vel = cumtrapz(&filtered, dt, 0.0);
            cumtrapz(&vel, dt, 0.0)
        }
        FchpIntegration::TimeDomainZeroMean => {
            let mut vel = cumtrapz(&filtered, dt, 0.0);
            demean(&mut vel);
            let mut disp = cumtrapz(&vel, dt, 0.0);
            demean(&mut disp);
            disp
        }
    };
    let peak = disp.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if peak <= 0.0 || !peak.is_finite() {
        return None;
    }
    let fit = PolyFit::fit(&disp, dt, 3)?;
    let fit_peak = (0..disp.len())
        .map(|i| fit.eval(i as f64 * dt).abs())
        .fold(0.0_f64, f64::max);
    Some(fit_peak / peak)
}

/// Search for the smallest high-pass corner whose displacement drift
/// ratio meets the target, by Ridder's method on `ratio(fc) - target`.
///
/// Returns the corner, or `None` when even `maxfc` cannot meet the
/// target within `maxiter` iterations.
pub fn ridder_search(acc: &[f64], dt: f64, fc_init: f64, opts: &RidderOptions) -> Option<f64> {
    let f = |fc: f64| drift_ratio(acc, dt, fc, opts).map(|r| r - opts.target);

    let mut lo = fc_init;
    let mut flo = f(lo)?;
    if flo <= 0.0 {
        // The initial corner already satisfies the target; it is the
        // smallest corner considered.
        return Some(lo);
    }
    let mut hi = opts.maxfc;
    let mut fhi = f(hi)?;
    if fhi > 0.0 {
        return None;
    }

    // `hi` always satisfies the criterion (f <= 0); `lo` never does.
    let mut best = hi;
    for _ in 0..opts.maxiter {
        let mid = 0.5 * (lo + hi);
        let fmid = f(mid)?;
        if fmid <= 0.0 {
            best = best.min(mid);
        }
        let s = (fmid * fmid - flo * fhi).sqrt();
        if s == 0.0 {
            break;
        }
        // Ridder's exponential interpolation point
        let sign = if flo > fhi { 1.0 } else { -1.0 };
        let x = (mid + (mid - lo) * sign * fmid / s).clamp(lo, hi);
        let fx = f(x)?;
        if fx <= 0.0 {
            best = best.min(x);
        }
        if fx.abs() <= opts.tol {
            return Some(best);
        }
        if fx <= 0.0 {
            hi = x;
            fhi = fx;
            if fmid > 0.0 {
                lo = mid;
                flo = fmid;
            }
        } else {
            lo = x;
            flo = fx;
            if fmid <= 0.0 {
                hi = mid;
                fhi = fmid;
            }
        }
        if lo >= hi || (hi - lo).abs() < opts.tol {
            break;
        }
    }
    // The bracket upper end still satisfies the criterion.
    Some(best.min(hi))
}

/// Refine the stored high-pass corner of each passing trace with the
/// Ridder search. Traces with no satisfying corner fail.
pub fn ridder_fchp(stream: &mut Stream, opts: &RidderOptions) -> Result<()> {
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let Some((hp, lp)) = tr.corner_frequencies() else {
            tr.fail(FailureReason::new(
                FailureKind::MissingPrereq,
                "ridder_fchp",
                "no corner_frequencies parameter",
            ));
            continue;
        };
        match ridder_search(tr.data(), tr.delta(), hp, opts) {
            Some(fc) => {
                set_corners(tr, fc, lp, "ridder_fchp");
            }
            None => tr.fail(FailureReason::new(
                FailureKind::Processing,
                "ridder_fchp",
                format!(
                    "no corner in [{hp:.4}, {:.4}] Hz meets drift target {:.3}",
                    opts.maxfc, opts.target
                ),
            )),
        }
    }
    Ok(())
}

// ─── Highpass corner adjustment ─────────────────────────────────────

/// Parameters of the displacement-drift corner adjustment.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AdjustHighpassOptions {
    /// Maximum acceptable final displacement, cm
    pub max_final_displacement: f64,
    /// Maximum acceptable |final| / |peak| displacement ratio
    pub max_displacement_ratio: f64,
    /// Multiplicative corner step per round
    pub step_factor: f64,
    pub max_rounds: usize,
}

impl Default for AdjustHighpassOptions {
    fn default() -> Self {
        Self {
            max_final_displacement: 0.025,
            max_displacement_ratio: 0.2,
            step_factor: 1.5,
            max_rounds: 6,
        }
    }
}

/// Raise the high-pass corner until the filtered displacement settles.
///
/// The trace data is not modified; only the stored corner moves.
pub fn adjust_highpass_corner(stream: &mut Stream, opts: &AdjustHighpassOptions) -> Result<()> {
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let Some((mut hp, lp)) = tr.corner_frequencies() else {
            tr.fail(FailureReason::new(
                FailureKind::MissingPrereq,
                "adjust_highpass_corner",
                "no corner_frequencies parameter",
            ));
            continue;
        };
        let dt = tr.delta();
        let mut ok = false;
        for _ in 0..=opts.max_rounds {
            let filtered =
                filter_frequency_domain(tr.data(), dt, FilterBand::Highpass { fc: hp }, 5, 2);
            // Zero-mean velocity keeps a bounded oscillation from reading
            // as drift
            let mut vel = cumtrapz(&filtered, dt, 0.0);
            demean(&mut vel);
            let disp = cumtrapz(&vel, dt, 0.0);
            let peak = disp.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            let final_disp = disp.last().map(|v| v.abs()).unwrap_or(0.0);
            if peak <= 0.0 {
                break;
            }
            if final_disp <= opts.max_final_displacement
                || final_disp / peak <= opts.max_displacement_ratio
            {
                ok = true;
                break;
            }
            hp *= opts.step_factor;
        }
        if ok {
            set_corners(tr, hp, lp, "adjusted");
        } else {
            tr.fail(FailureReason::new(
                FailureKind::QaCheckFail,
                "adjust_highpass_corner",
                "displacement drift persists at maximum adjusted corner",
            ));
        }
    }
    Ok(())
}
