//! Signal/noise windowing engine.
//!
//! Estimates the noise/signal boundary (P arrival), the signal end time,
//! validates the resulting window durations, and trims records. The split
//! and end times anchor every downstream step: SNR, corner selection and
//! the pre-event detrend all read them back off the trace parameters.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::{Config, SignalEndConfig, SignalEndMethod};
use crate::error::{FailureKind, FailureReason, Result};
use crate::event::ScalarEvent;
use crate::pickers::{combine_picks, p_travel_time};
use crate::stream::Stream;
use crate::trace::{TraceParam, duration_to_secs, param_keys, secs_to_duration};

/// Brune source corner frequency in Hz.
///
/// `stress_drop` in bars, `shear_vel` in km/s; seismic moment from the
/// standard moment-magnitude relation (dyne-cm).
pub fn brune_f0(magnitude: f64, stress_drop: f64, shear_vel: f64) -> f64 {
    let moment = 10f64.powf(1.5 * magnitude + 16.05);
    4.906e6 * shear_vel * (stress_drop / moment).powf(1.0 / 3.0)
}

// ─── Signal split ───────────────────────────────────────────────────

/// Estimate the noise/signal boundary and store it on every trace.
///
/// With `no_noise` set, the split is the record start. Otherwise picker
/// candidates from all traces pool around the travel-time estimate and
/// combine; an empty pool fails the stream with `no_valid_pick`.
pub fn signal_split(stream: &mut Stream, event: &ScalarEvent, config: &Config) -> Result<()> {
    if config.windows.no_noise {
        for tr in stream.traces_mut() {
            let start = tr.start_time();
            tr.set_param(
                param_keys::SIGNAL_SPLIT,
                TraceParam::SignalSplit {
                    split_time: start,
                    method: "no_noise".into(),
                },
            );
        }
        return Ok(());
    }

    let stats = stream.traces()[0].stats();
    let epi = event.epicentral_distance_km(stats.latitude, stats.longitude);
    let travel = p_travel_time(epi, event.depth_km, &config.pickers.travel_time);
    let arrival = event.origin_time + secs_to_duration(travel);

    // Pool candidate picks from every trace, in absolute time.
    let mut candidates: Vec<DateTime<Utc>> = Vec::new();
    for tr in stream.traces() {
        let tt_rel = duration_to_secs(arrival - tr.start_time());
        if let Some(combined) = combine_picks(tr.data(), tr.delta(), tt_rel, &config.pickers) {
            for p in &combined.candidates {
                candidates.push(tr.start_time() + secs_to_duration(p.seconds));
            }
        }
    }

    if candidates.is_empty() {
        stream.fail(FailureReason::new(
            FailureKind::Processing,
            "signal_split",
            "no_valid_pick",
        ));
        return Ok(());
    }

    candidates.sort();
    let mid = candidates.len() / 2;
    let median = if candidates.len() % 2 == 1 {
        candidates[mid]
    } else {
        let a = candidates[mid - 1];
        let b = candidates[mid];
        a + (b - a) / 2
    };
    let split = median + secs_to_duration(config.pickers.p_arrival_shift);

    for tr in stream.traces_mut() {
        tr.set_param(
            param_keys::SIGNAL_SPLIT,
            TraceParam::SignalSplit {
                split_time: split,
                method: "p_pick".into(),
            },
        );
    }
    Ok(())
}

// ─── Signal end ─────────────────────────────────────────────────────

/// Simplified magnitude/distance significant-duration model.
///
/// Coefficients are keyed by the model abbreviation from the
/// `gmm_selection` map. Source duration grows log-linearly with
/// magnitude, path duration linearly with distance; `epsilon` scales the
/// natural-log standard deviation.
fn duration_model(model: &str, magnitude: f64, dist_km: f64, epsilon: f64) -> f64 {
    // (magnitude slope, M5 source duration in s, path term in s/km,
    // ln sigma)
    let (slope, base, path_coeff, sigma) = match model {
        // Subduction
        "Pea20" => (0.85, 9.0_f64, 0.22, 0.3),
        // Stable continental
        "AB06" => (0.70, 6.0, 0.10, 0.3),
        // Active shallow crustal (AS16, Bea14, Ask14)
        _ => (0.75, 7.0, 0.15, 0.3),
    };
    let median = (slope * (magnitude - 5.0) + base.ln()).exp() + path_coeff * dist_km;
    median * (epsilon * sigma).exp()
}

/// Signal-end time for one trace.
fn end_time_for(
    cfg: &SignalEndConfig,
    model: &str,
    event: &ScalarEvent,
    split: DateTime<Utc>,
    epi_dist: f64,
    record_end: DateTime<Utc>,
) -> (DateTime<Utc>, &'static str) {
    let (end, label) = match cfg.method {
        SignalEndMethod::Model => {
            let dur = duration_model(model, event.magnitude, epi_dist, cfg.epsilon);
            (split + secs_to_duration(dur), "model")
        }
        SignalEndMethod::SourcePath => {
            let fc = brune_f0(event.magnitude, cfg.stress_drop, 3.7);
            let dur = 1.0 / fc + cfg.dur0 + cfg.dur1 * epi_dist;
            (split + secs_to_duration(dur), "source_path")
        }
        SignalEndMethod::Velocity => {
            let dur = (epi_dist / cfg.vmin).max(cfg.floor);
            (event.origin_time + secs_to_duration(dur), "velocity")
        }
        SignalEndMethod::Magnitude => {
            // magnitude / 2 minutes of shaking
            let dur = event.magnitude * 30.0;
            (event.origin_time + secs_to_duration(dur), "magnitude")
        }
        SignalEndMethod::None => (record_end, "none"),
    };
    (end.min(record_end), label)
}

/// Estimate the signal end and store it on every trace.
///
/// The tectonic regime (an explicit `region` argument, else the event's
/// classification) selects both the per-regime override from the
/// `regions` config section and, through the `gmm_selection` map, the
/// shaking-duration model abbreviation used by the `model` method.
pub fn signal_end(
    stream: &mut Stream,
    event: &ScalarEvent,
    config: &Config,
    region: Option<&str>,
) -> Result<()> {
    let regime = region.or(event.tectonic_regime.as_deref());
    let cfg = regime
        .and_then(|r| config.windows.regions.get(r))
        .map(|r| &r.signal_end)
        .unwrap_or(&config.windows.signal_end);
    let model = regime
        .and_then(|r| config.gmm_selection.get(r))
        .map(String::as_str)
        .unwrap_or(cfg.model.as_str());

    let stats = stream.traces()[0].stats();
    let epi = event.epicentral_distance_km(stats.latitude, stats.longitude);

    for tr in stream.traces_mut() {
        let split = tr.signal_split().unwrap_or_else(|| tr.start_time());
        let (end, label) = end_time_for(cfg, model, event, split, epi, tr.end_time());
        tr.set_param(
            param_keys::SIGNAL_END,
            TraceParam::SignalEnd {
                end_time: end,
                method: label.into(),
            },
        );
    }
    Ok(())
}

// ─── Window checks ──────────────────────────────────────────────────

/// Fail the stream when the noise or signal window is too short.
pub fn windows_check(stream: &mut Stream, config: &Config) -> Result<()> {
    let checks = &config.windows.window_checks;
    if !checks.enabled {
        return Ok(());
    }
    let mut reasons: Vec<FailureReason> = Vec::new();
    for tr in stream.traces() {
        let Some(split) = tr.signal_split() else {
            reasons.push(FailureReason::new(
                FailureKind::MissingPrereq,
                "windows_check",
                format!("{}: no signal_split parameter", tr.id()),
            ));
            continue;
        };
        let noise_dur = duration_to_secs(split - tr.start_time());
        if noise_dur < checks.min_noise_duration {
            reasons.push(FailureReason::new(
                FailureKind::QaCheckFail,
                "windows_check",
                format!(
                    "{}: noise duration {noise_dur:.2}s below minimum {:.2}s",
                    tr.id(),
                    checks.min_noise_duration
                ),
            ));
        }
        let end = tr.signal_end().unwrap_or_else(|| tr.end_time());
        let signal_dur = duration_to_secs(end - split);
        if signal_dur < checks.min_signal_duration {
            reasons.push(FailureReason::new(
                FailureKind::QaCheckFail,
                "windows_check",
                format!(
                    "{}: signal duration {signal_dur:.2}s below minimum {:.2}s",
                    tr.id(),
                    checks.min_signal_duration
                ),
            ));
        }
    }
    for reason in reasons {
        stream.fail(reason);
    }
    Ok(())
}

// ─── Cut ────────────────────────────────────────────────────────────

/// Trim each trace to `[split - sec_before_split, signal_end]`.
///
/// Without `sec_before_split` the cut keeps the record start. The cut
/// start saturates at the record start; a split at the record start
/// then leaves no noise window, which the window checks report.
pub fn cut(stream: &mut Stream, sec_before_split: Option<f64>) -> Result<()> {
    let mut failures: Vec<(usize, FailureReason)> = Vec::new();
    for (i, tr) in stream.traces_mut().iter_mut().enumerate() {
        let end = tr.signal_end().unwrap_or_else(|| tr.end_time());
        let start = match (tr.signal_split(), sec_before_split) {
            (Some(split), Some(sec)) => (split - secs_to_duration(sec)).max(tr.start_time()),
            _ => tr.start_time(),
        };
        let old_start = tr.start_time();
        match tr.trim(start, end) {
            Ok(()) => {
                let new_start = tr.start_time();
                tr.record_activity(
                    "cut",
                    json!({
                        "new_start_time": new_start.to_rfc3339(),
                        "new_end_time": tr.end_time().to_rfc3339(),
                        "sec_before_split": sec_before_split,
                        "seconds_trimmed_from_start": duration_to_secs(new_start - old_start),
                    }),
                );
            }
            Err(err) => failures.push((i, FailureReason::from(&err))),
        }
    }
    for (i, reason) in failures {
        stream.traces_mut()[i].fail(reason);
    }
    Ok(())
}
