//! Stream and trace QA checks.
//!
//! Each check is callable as a pipeline step. Failures are recorded on
//! the stream or the offending trace, never raised; the failure text
//! carries the criterion and the measured value so the diagnostic table
//! stays useful without the waveforms.

use chrono::{DateTime, Utc};

use crate::dsp::integrate::cumtrapz;
use crate::error::{FailureKind, FailureReason, Result};
use crate::stream::Stream;
use crate::trace::{UnitsType, duration_to_secs};

// ─── Station / instrument checks ────────────────────────────────────

/// Fail the stream when any trace is marked as a non-free-field
/// installation.
pub fn check_free_field(stream: &mut Stream, reject_non_free_field: bool) -> Result<()> {
    if !reject_non_free_field {
        return Ok(());
    }
    let offender = stream
        .traces()
        .iter()
        .find(|t| !t.stats().is_free_field())
        .map(|t| (t.id(), t.stats().structure_type.clone()));
    if let Some((id, structure)) = offender {
        stream.fail(FailureReason::new(
            FailureKind::QaCheckFail,
            "check_free_field",
            format!(
                "{id} is not free field (structure type {:?})",
                structure.unwrap_or_default()
            ),
        ));
    }
    Ok(())
}

/// Fail the stream on the wrong trace count, or when two orthogonal
/// horizontals are required but absent.
pub fn check_instrument(
    stream: &mut Stream,
    n_max: usize,
    n_min: usize,
    require_two_horiz: bool,
) -> Result<()> {
    let n = stream.len();
    if n > n_max {
        stream.fail(FailureReason::new(
            FailureKind::QaCheckFail,
            "check_instrument",
            format!("{n} traces exceeds maximum {n_max}"),
        ));
    } else if n < n_min {
        stream.fail(FailureReason::new(
            FailureKind::QaCheckFail,
            "check_instrument",
            format!("{n} traces below minimum {n_min}"),
        ));
    }
    if require_two_horiz && stream.orthogonal_horizontals().is_none() {
        stream.fail(FailureReason::new(
            FailureKind::QaCheckFail,
            "check_instrument",
            "no orthogonal horizontal pair",
        ));
    }
    Ok(())
}

/// Fail the stream when the sampling rate is too low.
pub fn min_sample_rate(stream: &mut Stream, min_sps: f64) -> Result<()> {
    let rate = stream.traces()[0].sampling_rate();
    if rate < min_sps {
        stream.fail(FailureReason::new(
            FailureKind::QaCheckFail,
            "min_sample_rate",
            format!("sampling rate {rate} sps below minimum {min_sps}"),
        ));
    }
    Ok(())
}

/// Fail the stream when it carries more than `n_max` traces.
pub fn max_traces(stream: &mut Stream, n_max: usize) -> Result<()> {
    if stream.len() > n_max {
        stream.fail(FailureReason::new(
            FailureKind::QaCheckFail,
            "max_traces",
            format!("{} traces exceeds maximum {n_max}", stream.len()),
        ));
    }
    Ok(())
}

// ─── Amplitude checks ───────────────────────────────────────────────

/// Fail traces whose raw-count peak lies outside `[min, max]`.
///
/// Applies only to count data; physical-unit traces pass through.
pub fn check_max_amplitude(stream: &mut Stream, min: f64, max: f64) -> Result<()> {
    for tr in stream.traces_mut() {
        if !tr.passed() || tr.stats().units_type != UnitsType::Counts {
            continue;
        }
        let peak = tr.max_abs();
        if peak < min || peak > max {
            tr.fail(FailureReason::new(
                FailureKind::QaCheckFail,
                "check_max_amplitude",
                format!("peak amplitude {peak:.1} outside [{min}, {max}] counts"),
            ));
        }
    }
    Ok(())
}

// ─── Clipping ───────────────────────────────────────────────────────

/// Engineered clipping features of one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippingFeatures {
    /// Fraction of samples within 5% of the record peak
    pub saturated_fraction: f64,
    /// Longest run of repeated values, as a fraction of the record
    pub flat_run_fraction: f64,
    /// Fraction of sample-to-sample jumps beyond six standard deviations
    pub jerk_outlier_fraction: f64,
}

impl ClippingFeatures {
    pub fn extract(data: &[f64]) -> Self {
        let n = data.len();
        let peak = data.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        if peak <= 0.0 || n < 4 {
            return Self {
                saturated_fraction: 0.0,
                flat_run_fraction: 0.0,
                jerk_outlier_fraction: 0.0,
            };
        }
        let saturated = data.iter().filter(|v| v.abs() >= 0.95 * peak).count();

        let eps = 1e-9 * peak;
        let mut longest = 1usize;
        let mut run = 1usize;
        for pair in data.windows(2) {
            if (pair[1] - pair[0]).abs() <= eps {
                run += 1;
                longest = longest.max(run);
            } else {
                run = 1;
            }
        }

        let jerks: Vec<f64> = data.windows(2).map(|p| p[1] - p[0]).collect();
        let mean = jerks.iter().sum::<f64>() / jerks.len() as f64;
        let std = (jerks.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
            / jerks.len() as f64)
            .sqrt()
            .max(1e-300);
        let outliers = jerks.iter().filter(|v| (*v - mean).abs() > 6.0 * std).count();

        Self {
            saturated_fraction: saturated as f64 / n as f64,
            flat_run_fraction: longest as f64 / n as f64,
            jerk_outlier_fraction: outliers as f64 / jerks.len() as f64,
        }
    }
}

/// Clipping probability from a fixed-weight logistic model over the
/// engineered features.
pub fn clipping_probability(data: &[f64]) -> f64 {
    let f = ClippingFeatures::extract(data);
    let z = -5.0
        + 40.0 * f.saturated_fraction
        + 300.0 * f.flat_run_fraction
        + 30.0 * f.jerk_outlier_fraction;
    1.0 / (1.0 + (-z).exp())
}

/// Fail the stream when the clipping probability of any horizontal
/// component reaches `threshold`.
pub fn check_clipping(stream: &mut Stream, threshold: f64) -> Result<()> {
    let mut worst: Option<(String, f64)> = None;
    for tr in stream.traces() {
        if !tr.stats().is_horizontal() {
            continue;
        }
        let p = clipping_probability(tr.data());
        if worst.as_ref().is_none_or(|(_, w)| p > *w) {
            worst = Some((tr.id(), p));
        }
    }
    if let Some((id, p)) = worst
        && p >= threshold
    {
        stream.fail(FailureReason::new(
            FailureKind::QaCheckFail,
            "check_clipping",
            format!("{id}: clipping probability {p:.3} at or above threshold {threshold}"),
        ));
    }
    Ok(())
}

// ─── Transient presence ─────────────────────────────────────────────

/// Fail traces whose peak STA/LTA energy ratio stays below `threshold`.
pub fn check_sta_lta(
    stream: &mut Stream,
    sta_length: f64,
    lta_length: f64,
    threshold: f64,
) -> Result<()> {
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let dt = tr.delta();
        let sta_n = ((sta_length / dt) as usize).max(1);
        let lta_n = ((lta_length / dt) as usize).max(sta_n + 1);
        let ratio = max_sta_lta(tr.data(), sta_n, lta_n);
        if ratio < threshold {
            tr.fail(FailureReason::new(
                FailureKind::QaCheckFail,
                "check_sta_lta",
                format!("peak STA/LTA {ratio:.2} below threshold {threshold}"),
            ));
        }
    }
    Ok(())
}

/// Peak classic STA/LTA of the squared amplitude.
pub fn max_sta_lta(data: &[f64], sta_n: usize, lta_n: usize) -> f64 {
    let n = data.len();
    if n < lta_n + sta_n {
        return 0.0;
    }
    let sq: Vec<f64> = data.iter().map(|v| v * v).collect();
    // Prefix sums for O(1) window energies
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for v in &sq {
        prefix.push(prefix.last().unwrap() + v);
    }
    let window_mean =
        |end: usize, len: usize| (prefix[end] - prefix[end - len]) / len as f64;
    let mut best = 0.0_f64;
    for end in lta_n + sta_n..=n {
        let sta = window_mean(end, sta_n);
        let lta = window_mean(end - sta_n, lta_n);
        if lta > 0.0 {
            best = best.max(sta / lta);
        }
    }
    best
}

/// Fail traces whose zero-crossing rate is below `min_crossings` per
/// second.
pub fn check_zero_crossings(stream: &mut Stream, min_crossings: f64) -> Result<()> {
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let crossings = tr
            .data()
            .windows(2)
            .filter(|p| (p[0] >= 0.0) != (p[1] >= 0.0))
            .count();
        let rate = crossings as f64 / tr.duration_secs().max(1e-9);
        if rate < min_crossings {
            tr.fail(FailureReason::new(
                FailureKind::QaCheckFail,
                "check_zero_crossings",
                format!("{rate:.3} zero crossings per second below minimum {min_crossings}"),
            ));
        }
    }
    Ok(())
}

// ─── Tail check ─────────────────────────────────────────────────────

/// Fail traces whose tail velocity or displacement stays large relative
/// to the record peak, indicating unremoved drift or a second event.
pub fn check_tail(
    stream: &mut Stream,
    duration: f64,
    max_vel_ratio: f64,
    max_dis_ratio: f64,
) -> Result<()> {
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let dt = tr.delta();
        let tail_n = ((duration / dt) as usize).min(tr.npts());
        if tail_n == 0 {
            continue;
        }
        let vel = cumtrapz(tr.data(), dt, 0.0);
        let dis = cumtrapz(&vel, dt, 0.0);
        let peak = |x: &[f64]| x.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let vel_peak = peak(&vel);
        let dis_peak = peak(&dis);
        let tail_start = vel.len() - tail_n;
        let vel_ratio = if vel_peak > 0.0 {
            peak(&vel[tail_start..]) / vel_peak
        } else {
            0.0
        };
        let dis_ratio = if dis_peak > 0.0 {
            peak(&dis[tail_start..]) / dis_peak
        } else {
            0.0
        };
        if vel_ratio > max_vel_ratio {
            tr.fail(FailureReason::new(
                FailureKind::QaCheckFail,
                "check_tail",
                format!("max_vel_ratio_exceeded: {vel_ratio:.3} > {max_vel_ratio}"),
            ));
        } else if dis_ratio > max_dis_ratio {
            tr.fail(FailureReason::new(
                FailureKind::QaCheckFail,
                "check_tail",
                format!("max_dis_ratio_exceeded: {dis_ratio:.3} > {max_dis_ratio}"),
            ));
        }
    }
    Ok(())
}

// ─── Multi-event trim ───────────────────────────────────────────────

/// Screen the signal window against P arrivals of other catalogued
/// events.
///
/// An arrival inside the first `pct_window_reject` of the signal window
/// rejects the stream; a later arrival trims the signal end to just
/// before it.
pub fn trim_multiple_events(
    stream: &mut Stream,
    other_arrivals: &[DateTime<Utc>],
    pct_window_reject: f64,
) -> Result<()> {
    let mut reject: Option<String> = None;
    let mut new_ends: Vec<(usize, DateTime<Utc>)> = Vec::new();
    for (i, tr) in stream.traces().iter().enumerate() {
        let Some(split) = tr.signal_split() else {
            continue;
        };
        let end = tr.signal_end().unwrap_or_else(|| tr.end_time());
        let signal_dur = duration_to_secs(end - split);
        let earliest = other_arrivals
            .iter()
            .filter(|&&t| t > split && t < end)
            .min();
        if let Some(&arrival) = earliest {
            let offset = duration_to_secs(arrival - split);
            if offset <= pct_window_reject * signal_dur {
                reject = Some(format!(
                    "{}: secondary P arrival {offset:.1}s into the signal window",
                    tr.id()
                ));
            } else {
                new_ends.push((i, arrival - crate::trace::secs_to_duration(tr.delta())));
            }
        }
    }
    if let Some(text) = reject {
        stream.fail(FailureReason::new(
            FailureKind::QaCheckFail,
            "trim_multiple_events",
            text,
        ));
        return Ok(());
    }
    for (i, new_end) in new_ends {
        let tr = &mut stream.traces_mut()[i];
        tr.set_param(
            crate::trace::param_keys::SIGNAL_END,
            crate::trace::TraceParam::SignalEnd {
                end_time: new_end,
                method: "multi_event_trim".into(),
            },
        );
    }
    Ok(())
}
