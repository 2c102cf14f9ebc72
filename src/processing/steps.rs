//! Step functions registered with the scheduler.
//!
//! Each function adapts the JSON parameter map of a program entry onto
//! the typed engine modules, records provenance for every mutation, and
//! converts errors into recorded failures. Signature contract: a step
//! receives a possibly-failed stream and must leave failed traces alone.

use serde_json::{Value, json};

use crate::checks;
use crate::config::Config;
use crate::corner::{
    self, AdjustHighpassOptions, FchpIntegration, RidderOptions,
};
use crate::dsp::detrend as dsp_detrend;
use crate::dsp::filter::{FilterBand, TaperSide, filter_frequency_domain, filter_time_domain, hann_taper, pad_length, strip_pad, zero_pad as dsp_zero_pad};
use crate::dsp::resample as dsp_resample;
use crate::error::{FailureKind, FailureReason, GmError, Result};
use crate::event::ScalarEvent;
use crate::response::{self, ResponseRemovalOptions};
use crate::snr::{self, MinFreq, SnrOptions};
use crate::stream::Stream;
use crate::trace::{Trace, TraceParam, UnitsType, param_keys, secs_to_duration};
use crate::windows;

// ─── Parameter helpers ──────────────────────────────────────────────

fn f64_param(params: &Value, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn usize_param(params: &Value, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

fn u32_param(params: &Value, key: &str, default: u32) -> u32 {
    params
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(default)
}

fn bool_param(params: &Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn str_param<'a>(params: &'a Value, key: &str, default: &'a str) -> &'a str {
    params.get(key).and_then(Value::as_str).unwrap_or(default)
}

// ─── QA check steps ─────────────────────────────────────────────────

pub fn check_free_field(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    checks::check_free_field(stream, bool_param(params, "reject_non_free_field", true))
}

pub fn check_instrument(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    checks::check_instrument(
        stream,
        usize_param(params, "n_max", 3),
        usize_param(params, "n_min", 2),
        bool_param(params, "require_two_horiz", true),
    )
}

pub fn min_sample_rate(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    checks::min_sample_rate(stream, f64_param(params, "min_sps", 20.0))
}

pub fn max_traces(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    checks::max_traces(stream, usize_param(params, "n_max", 3))
}

pub fn check_max_amplitude(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    checks::check_max_amplitude(
        stream,
        f64_param(params, "min", 5.0),
        f64_param(params, "max", 2e6),
    )
}

pub fn check_clipping(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    checks::check_clipping(stream, f64_param(params, "threshold", 0.2))
}

pub fn check_sta_lta(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    checks::check_sta_lta(
        stream,
        f64_param(params, "sta_length", 1.0),
        f64_param(params, "lta_length", 20.0),
        f64_param(params, "threshold", 3.0),
    )
}

pub fn check_zero_crossings(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    checks::check_zero_crossings(stream, f64_param(params, "min_crossings", 0.1))
}

pub fn check_tail(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    checks::check_tail(
        stream,
        f64_param(params, "duration", 5.0),
        f64_param(params, "max_vel_ratio", 0.3),
        f64_param(params, "max_dis_ratio", 0.9),
    )
}

pub fn trim_multiple_events(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    // Precomputed P arrivals of the other catalogued events, RFC3339
    let arrivals: Vec<chrono::DateTime<chrono::Utc>> = params
        .get("arrivals")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .filter_map(|s| s.parse().ok())
                .collect()
        })
        .unwrap_or_default();
    checks::trim_multiple_events(stream, &arrivals, f64_param(params, "pct_window_reject", 0.5))
}

// ─── Windowing steps ────────────────────────────────────────────────

pub fn signal_split(
    stream: &mut Stream,
    event: &ScalarEvent,
    _params: &Value,
    config: &Config,
) -> Result<()> {
    windows::signal_split(stream, event, config)
}

pub fn signal_end(
    stream: &mut Stream,
    event: &ScalarEvent,
    params: &Value,
    config: &Config,
) -> Result<()> {
    let region = params.get("region").and_then(Value::as_str);
    windows::signal_end(stream, event, config, region)
}

pub fn windows_check(
    stream: &mut Stream,
    _event: &ScalarEvent,
    _params: &Value,
    config: &Config,
) -> Result<()> {
    windows::windows_check(stream, config)
}

pub fn cut(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    let sec_before_split = params.get("sec_before_split").and_then(Value::as_f64);
    windows::cut(stream, sec_before_split)
}

// ─── SNR and corner steps ───────────────────────────────────────────

pub fn compute_snr(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    let opts = SnrOptions {
        bandwidth: f64_param(params, "bandwidth", 188.5),
    };
    snr::compute_snr(stream, &opts)
}

pub fn snr_check(
    stream: &mut Stream,
    event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    let min_freq = match params.get("min_freq") {
        Some(Value::String(s)) if s == "f0" => {
            let opts = params.get("f0_options").cloned().unwrap_or(Value::Null);
            MinFreq::BruneF0 {
                stress_drop: f64_param(&opts, "stress_drop", 10.0),
                shear_vel: f64_param(&opts, "shear_vel", 3.7),
                floor: f64_param(&opts, "floor", 0.1),
                ceiling: f64_param(&opts, "ceiling", 2.0),
            }
        }
        Some(v) => MinFreq::Fixed(v.as_f64().unwrap_or(0.2)),
        None => MinFreq::Fixed(0.2),
    };
    snr::snr_check(
        stream,
        event,
        f64_param(params, "threshold", 3.0),
        &min_freq,
        f64_param(params, "max_freq", 5.0),
    )
}

pub fn get_corner_frequencies(
    stream: &mut Stream,
    event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    match str_param(params, "method", "snr") {
        "constant" => {
            let sub = params.get("constant").cloned().unwrap_or(Value::Null);
            corner::corners_constant(
                stream,
                f64_param(&sub, "highpass", 0.08),
                f64_param(&sub, "lowpass", 20.0),
            )
        }
        "magnitude" => {
            let sub = params.get("magnitude").cloned().unwrap_or(Value::Null);
            let as_vec = |key: &str| -> Vec<f64> {
                sub.get(key)
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(Value::as_f64).collect())
                    .unwrap_or_default()
            };
            let (minmag, hp, lp) = (as_vec("minmag"), as_vec("highpass"), as_vec("lowpass"));
            if minmag.is_empty() || hp.is_empty() || lp.is_empty() {
                return Err(GmError::Config(
                    "get_corner_frequencies: magnitude method requires minmag/highpass/lowpass tables"
                        .into(),
                ));
            }
            corner::corners_magnitude(stream, event.magnitude, &minmag, &hp, &lp)
        }
        "snr" => {
            let sub = params.get("snr").cloned().unwrap_or(Value::Null);
            corner::corners_snr(
                stream,
                f64_param(&sub, "threshold", 3.0),
                bool_param(&sub, "same_horiz", true),
            )
        }
        other => Err(GmError::Config(format!(
            "get_corner_frequencies: unknown method '{other}'"
        ))),
    }
}

pub fn lowpass_max_frequency(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    corner::lowpass_max_frequency(
        stream,
        f64_param(params, "fn_fac", 0.75),
        f64_param(params, "lp_max", 40.0),
    )
}

pub fn ridder_fchp(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    let integration = match str_param(params, "integration", "time_domain_zero_init") {
        "frequency_domain" => FchpIntegration::FrequencyDomain,
        "time_domain_zero_mean" => FchpIntegration::TimeDomainZeroMean,
        _ => FchpIntegration::TimeDomainZeroInit,
    };
    let opts = RidderOptions {
        target: f64_param(params, "target", 0.02),
        tol: f64_param(params, "tol", 0.001),
        maxiter: usize_param(params, "maxiter", 30),
        maxfc: f64_param(params, "maxfc", 0.5),
        filter_order: u32_param(params, "filter_order", 5),
        integration,
    };
    corner::ridder_fchp(stream, &opts)
}

pub fn adjust_highpass_corner(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    let opts = AdjustHighpassOptions {
        max_final_displacement: f64_param(params, "max_final_displacement", 0.025),
        max_displacement_ratio: f64_param(params, "max_displacement_ratio", 0.2),
        step_factor: f64_param(params, "step_factor", 1.5),
        max_rounds: usize_param(params, "max_rounds", 6),
    };
    corner::adjust_highpass_corner(stream, &opts)
}

// ─── Detrend / taper / pad ──────────────────────────────────────────

pub fn detrend(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    let method = str_param(params, "detrending_method", "demean").to_string();
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        if let Err(err) = detrend_trace(tr, &method, params) {
            tr.fail(FailureReason::from(&err));
            continue;
        }
        tr.record_activity("detrend", json!({"detrending_method": method}));
        tr.check_finite("detrend");
    }
    Ok(())
}

fn detrend_trace(tr: &mut Trace, method: &str, params: &Value) -> Result<()> {
    let dt = tr.delta();
    match method {
        "demean" | "constant" => dsp_detrend::demean(tr.data_mut()),
        "linear" => dsp_detrend::detrend_linear(tr.data_mut()),
        "simple" => dsp_detrend::detrend_simple(tr.data_mut()),
        "polynomial" => {
            let order = usize_param(params, "order", 2);
            dsp_detrend::detrend_polynomial(tr.data_mut(), dt, order).ok_or_else(|| {
                GmError::Processing {
                    step: "detrend".into(),
                    text: format!("polynomial detrend of order {order} failed"),
                }
            })?;
        }
        "spline" => {
            let dspline = usize_param(params, "dspline", 1000);
            dsp_detrend::detrend_spline(tr.data_mut(), dspline).ok_or_else(|| {
                GmError::Processing {
                    step: "detrend".into(),
                    text: "record too short for spline detrend".into(),
                }
            })?;
        }
        "pre" => {
            let split = tr.signal_split().ok_or(GmError::MissingPrereq {
                step: "detrend".into(),
                param: param_keys::SIGNAL_SPLIT.into(),
            })?;
            let idx = tr.index_at_time(split);
            dsp_detrend::detrend_pre_event(tr.data_mut(), idx).ok_or_else(|| {
                GmError::Processing {
                    step: "detrend".into(),
                    text: "empty pre-event noise window".into(),
                }
            })?;
        }
        "baseline_sixth_order" => {
            let fit = dsp_detrend::baseline_sixth_order(tr.data_mut(), dt).ok_or_else(|| {
                GmError::Processing {
                    step: "detrend".into(),
                    text: "record too short for sixth-order baseline fit".into(),
                }
            })?;
            tr.set_param(
                param_keys::BASELINE_POLYNOMIAL,
                TraceParam::BaselinePolynomial {
                    coefficients: fit.coeffs.iter().rev().copied().collect(),
                },
            );
        }
        other => {
            return Err(GmError::Config(format!(
                "detrend: unknown detrending_method '{other}'"
            )));
        }
    }
    Ok(())
}

pub fn taper(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    let width = f64_param(params, "width", 0.05);
    let side = match str_param(params, "side", "both") {
        "left" => TaperSide::Left,
        "right" => TaperSide::Right,
        _ => TaperSide::Both,
    };
    let taper_type = str_param(params, "type", "hann").to_string();
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        hann_taper(tr.data_mut(), width, side);
        tr.record_activity(
            "taper",
            json!({"type": taper_type, "width": width, "side": str_param(params, "side", "both")}),
        );
    }
    Ok(())
}

pub fn zero_pad(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    let padding_factor = f64_param(params, "padding_factor", 1.5);
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let Some((fhp, _)) = tr.corner_frequencies() else {
            tr.fail(FailureReason::new(
                FailureKind::MissingPrereq,
                "zero_pad",
                "no corner_frequencies parameter",
            ));
            continue;
        };
        let pad = pad_length(tr.delta(), fhp, padding_factor);
        let padded = dsp_zero_pad(tr.data(), pad);
        let shift = secs_to_duration(pad as f64 * tr.delta());
        tr.stats_mut().start_time -= shift;
        tr.set_data(padded);
        tr.set_param("zero_pad", TraceParam::Other(json!({"pad_samples": pad})));
        tr.record_activity(
            "pad",
            json!({"pad_samples": pad, "padding_factor": padding_factor, "fhp": fhp}),
        );
    }
    Ok(())
}

pub fn strip_zero_pad(
    stream: &mut Stream,
    _event: &ScalarEvent,
    _params: &Value,
    _config: &Config,
) -> Result<()> {
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let Some(TraceParam::Other(meta)) = tr.param("zero_pad").cloned() else {
            continue; // never padded
        };
        let pad = meta
            .get("pad_samples")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        if pad == 0 || tr.npts() <= 2 * pad {
            continue;
        }
        let stripped = strip_pad(tr.data(), pad);
        let shift = secs_to_duration(pad as f64 * tr.delta());
        tr.stats_mut().start_time += shift;
        tr.set_data(stripped);
        tr.set_param("zero_pad", TraceParam::Other(json!({"pad_samples": 0})));
        tr.record_activity("strip_pad", json!({"pad_samples": pad}));
    }
    Ok(())
}

// ─── Filter steps ───────────────────────────────────────────────────

enum CornerSource {
    Highpass,
    Lowpass,
}

fn filter_step(
    stream: &mut Stream,
    params: &Value,
    step: &'static str,
    source: CornerSource,
) -> Result<()> {
    let order = u32_param(params, "filter_order", 5);
    let passes = u32_param(params, "number_of_passes", 2);
    let freq_domain = bool_param(params, "frequency_domain", true);
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let corner = params
            .get("corner_frequency")
            .and_then(Value::as_f64)
            .or_else(|| {
                tr.corner_frequencies().map(|(hp, lp)| match source {
                    CornerSource::Highpass => hp,
                    CornerSource::Lowpass => lp,
                })
            });
        let Some(fc) = corner else {
            tr.fail(FailureReason::from(&GmError::MissingPrereq {
                step: step.into(),
                param: param_keys::CORNER_FREQUENCIES.into(),
            }));
            continue;
        };
        let band = match source {
            CornerSource::Highpass => FilterBand::Highpass { fc },
            CornerSource::Lowpass => FilterBand::Lowpass { fc },
        };
        let dt = tr.delta();
        let out = if freq_domain {
            filter_frequency_domain(tr.data(), dt, band, order, passes)
        } else {
            filter_time_domain(tr.data(), dt, band, order, passes)
        };
        tr.set_data(out);
        tr.record_activity(
            step,
            json!({
                "corner_frequency": fc,
                "filter_order": order,
                "number_of_passes": passes,
                "frequency_domain": freq_domain,
            }),
        );
        tr.check_finite(step);
    }
    Ok(())
}

pub fn highpass_filter(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    filter_step(stream, params, "highpass_filter", CornerSource::Highpass)
}

pub fn lowpass_filter(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    filter_step(stream, params, "lowpass_filter", CornerSource::Lowpass)
}

fn band_filter_step(
    stream: &mut Stream,
    params: &Value,
    step: &'static str,
    stop: bool,
) -> Result<()> {
    let order = u32_param(params, "filter_order", 4);
    let passes = u32_param(params, "number_of_passes", 2);
    let freq_domain = bool_param(params, "frequency_domain", true);
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let (f1, f2) = match (
            params.get("freqmin").and_then(Value::as_f64),
            params.get("freqmax").and_then(Value::as_f64),
        ) {
            (Some(f1), Some(f2)) => (f1, f2),
            _ => match tr.corner_frequencies() {
                Some(pair) => pair,
                None => {
                    tr.fail(FailureReason::from(&GmError::MissingPrereq {
                        step: step.into(),
                        param: param_keys::CORNER_FREQUENCIES.into(),
                    }));
                    continue;
                }
            },
        };
        let band = if stop {
            FilterBand::Bandstop { f1, f2 }
        } else {
            FilterBand::Bandpass { f1, f2 }
        };
        let dt = tr.delta();
        let out = if freq_domain {
            filter_frequency_domain(tr.data(), dt, band, order, passes)
        } else {
            filter_time_domain(tr.data(), dt, band, order, passes)
        };
        tr.set_data(out);
        tr.record_activity(
            step,
            json!({
                "freqmin": f1,
                "freqmax": f2,
                "filter_order": order,
                "number_of_passes": passes,
                "frequency_domain": freq_domain,
            }),
        );
        tr.check_finite(step);
    }
    Ok(())
}

pub fn bandpass_filter(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    band_filter_step(stream, params, "bandpass_filter", false)
}

pub fn bandstop_filter(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    band_filter_step(stream, params, "bandstop_filter", true)
}

// ─── Instrument response ────────────────────────────────────────────

pub fn remove_response(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    let opts = ResponseRemovalOptions {
        water_level: params.get("water_level").and_then(Value::as_f64),
        pre_filt: params.get("pre_filt").and_then(Value::as_array).map(|a| {
            let mut band = [0.001, 0.005, 45.0, 50.0];
            for (slot, value) in band.iter_mut().zip(a.iter()) {
                if let Some(f) = value.as_f64() {
                    *slot = f;
                }
            }
            band
        }),
        gain_tolerance: f64_param(params, "gain_tolerance", 0.1),
    };
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let Some(resp) = tr.response().cloned() else {
            tr.fail(FailureReason::from(&GmError::ResponseMetadata(format!(
                "{}: no response metadata",
                tr.id()
            ))));
            continue;
        };
        let instrument = tr.stats().instrument_type();
        match response::remove_response(tr.data(), tr.delta(), &resp, instrument, &opts) {
            Ok((acc, method)) => {
                tr.set_data(acc);
                let stats = tr.stats_mut();
                stats.units = "cm/s^2".into();
                stats.units_type = UnitsType::Acceleration;
                tr.record_activity(
                    "remove_response",
                    json!({
                        "method": method,
                        "water_level": opts.water_level,
                        "pre_filt": opts.pre_filt,
                    }),
                );
                tr.check_finite("remove_response");
            }
            Err(err) => tr.fail(FailureReason::from(&err)),
        }
    }
    Ok(())
}

// ─── Integration / differentiation ──────────────────────────────────

/// Integrate each trace once, using the `integration` config section
/// (acceleration to velocity, velocity to displacement).
pub fn integrate(
    stream: &mut Stream,
    _event: &ScalarEvent,
    _params: &Value,
    config: &Config,
) -> Result<()> {
    let cfg = &config.integration;
    let opts = crate::dsp::integrate::IntegrationOptions {
        frequency: cfg.frequency,
        initial: cfg.initial,
        demean: cfg.demean,
    };
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        if cfg.taper.taper {
            hann_taper(
                tr.data_mut(),
                cfg.taper.width,
                match cfg.taper.side.as_str() {
                    "left" => TaperSide::Left,
                    "right" => TaperSide::Right,
                    _ => TaperSide::Both,
                },
            );
        }
        let out = crate::dsp::integrate::integrate(tr.data(), tr.delta(), opts);
        tr.set_data(out);
        let stats = tr.stats_mut();
        let (units, units_type) = match stats.units_type {
            UnitsType::Acceleration => ("cm/s", UnitsType::Velocity),
            UnitsType::Velocity => ("cm", UnitsType::Displacement),
            other => (stats.units.as_str(), other),
        };
        let units = units.to_string();
        stats.units = units;
        stats.units_type = units_type;
        tr.record_activity(
            "integrate",
            json!({"frequency": cfg.frequency, "initial": cfg.initial, "demean": cfg.demean}),
        );
        tr.check_finite("integrate");
    }
    Ok(())
}

/// Differentiate each trace once, using the `differentiation` config
/// section.
pub fn differentiate(
    stream: &mut Stream,
    _event: &ScalarEvent,
    _params: &Value,
    config: &Config,
) -> Result<()> {
    let frequency = config.differentiation.frequency;
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let out = if frequency {
            crate::dsp::integrate::differentiate_frequency(tr.data(), tr.delta())
        } else {
            crate::dsp::integrate::gradient(tr.data(), tr.delta())
        };
        tr.set_data(out);
        let stats = tr.stats_mut();
        let (units, units_type) = match stats.units_type {
            UnitsType::Displacement => ("cm/s", UnitsType::Velocity),
            UnitsType::Velocity => ("cm/s^2", UnitsType::Acceleration),
            other => (stats.units.as_str(), other),
        };
        let units = units.to_string();
        stats.units = units;
        stats.units_type = units_type;
        tr.record_activity("differentiate", json!({"frequency": frequency}));
        tr.check_finite("differentiate");
    }
    Ok(())
}

// ─── Resample ───────────────────────────────────────────────────────

pub fn resample(
    stream: &mut Stream,
    _event: &ScalarEvent,
    params: &Value,
    _config: &Config,
) -> Result<()> {
    let new_rate = f64_param(params, "new_sampling_rate", 100.0);
    let a = usize_param(params, "lanczos_a", 10);
    if new_rate <= 0.0 {
        return Err(GmError::Config(format!(
            "resample: non-positive sampling rate {new_rate}"
        )));
    }
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let old_rate = tr.sampling_rate();
        if (old_rate - new_rate).abs() < 1e-9 {
            continue;
        }
        let out = dsp_resample::resample(tr.data(), tr.delta(), 1.0 / new_rate, a);
        tr.stats_mut().delta = 1.0 / new_rate;
        tr.set_data(out);
        tr.record_activity(
            "resample",
            json!({"new_sampling_rate": new_rate, "method": "lanczos", "a": a}),
        );
        tr.check_finite("resample");
    }
    Ok(())
}
