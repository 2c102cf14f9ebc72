//! Waveform metric engine.
//!
//! Consumes processed streams (acceleration in cm/s^2) and produces a
//! [`MetricsCollection`]: one record per (station, metric type, component,
//! parameter set). Components cover the raw channels, the horizontal
//! means, and the orientation-independent RotD percentiles.
//!
//! Reported units: PGA/SA/PSA in g, PGV in cm/s, Arias and CAV in cm/s,
//! FAS in cm/s, durations in seconds.

pub mod duration;
pub mod fas;
pub mod rotd;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{MetricsConfig, TypeParameters};
use crate::dsp::filter::{FilterBand, filter_frequency_domain};
use crate::dsp::integrate::cumtrapz;
use crate::dsp::oscillator::sdof_response;
use crate::dsp::resample::{oscillator_interp_factor, upsample};
use crate::dsp::smoothing::log_frequency_grid;
use crate::error::Result;
use crate::stream::Stream;
use crate::trace::Trace;

use duration::GRAVITY_CM;

/// Value of one metric record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricValue {
    Scalar(f64),
    Spectrum {
        /// Frequencies (FAS) in Hz
        abscissa: Vec<f64>,
        ordinates: Vec<f64>,
    },
}

/// One computed metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// "NET.STA"
    pub station: String,
    /// Channel code, mean name, or "rotd"
    pub component: String,
    /// "pga", "pgv", "sa", "psa", "fas", "arias", "cav", "duration",
    /// "sorted_duration"
    pub metric_type: String,
    /// Everything needed to identify the metric uniquely (period,
    /// damping, percentile, smoothing, interval)
    pub parameters: Value,
    pub value: MetricValue,
    pub units: String,
}

/// All metrics of one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsCollection {
    pub event_id: String,
    pub records: Vec<MetricRecord>,
}

impl MetricsCollection {
    /// Records for one station.
    pub fn for_station(&self, station: &str) -> impl Iterator<Item = &MetricRecord> {
        self.records.iter().filter(move |r| r.station == station)
    }
}

// ─── Scalar evaluators ──────────────────────────────────────────────

/// Parameter expansion for a scalar metric type.
fn scalar_param_sets(ty: &str, tp: &TypeParameters) -> Vec<Value> {
    match ty {
        "sa" | "psa" => {
            let mut sets = Vec::new();
            for &damping in &tp.sa.damping {
                for &period in &tp.sa.periods {
                    sets.push(json!({"period": period, "damping": damping}));
                }
            }
            sets
        }
        "duration" => tp
            .duration
            .intervals
            .iter()
            .map(|i| json!({"interval": i}))
            .collect(),
        "sorted_duration" => tp
            .duration
            .intervals
            .iter()
            .map(|i| {
                json!({
                    "interval": i,
                    "highest_usable_frequency": tp.sorted_duration.highest_usable_frequency,
                })
            })
            .collect(),
        "cav" => vec![json!({"threshold": tp.cav.threshold})],
        _ => vec![json!({})],
    }
}

fn parse_interval(params: &Value) -> (f64, f64) {
    let text = params
        .get("interval")
        .and_then(Value::as_str)
        .unwrap_or("5-75");
    let mut parts = text.splitn(2, '-');
    let p1 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(5.0);
    let p2 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(75.0);
    (p1, p2)
}

/// Evaluate one scalar metric on an acceleration series in cm/s^2.
fn eval_scalar(ty: &str, params: &Value, series: &[f64], dt: f64) -> Option<f64> {
    match ty {
        "pga" => {
            let peak = series.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            Some(peak / GRAVITY_CM)
        }
        "pgv" => {
            let vel = cumtrapz(series, dt, 0.0);
            Some(vel.iter().fold(0.0_f64, |m, v| m.max(v.abs())))
        }
        "sa" | "psa" => {
            let period = params.get("period").and_then(Value::as_f64)?;
            let damping = params.get("damping").and_then(Value::as_f64).unwrap_or(0.05);
            // Short periods near Nyquist need a denser record
            let factor = oscillator_interp_factor(dt, period, 10.0);
            let (data, dt_eff) = if factor > 1 {
                (upsample(series, factor, 10), dt / factor as f64)
            } else {
                (series.to_vec(), dt)
            };
            let resp = sdof_response(&data, dt_eff, period, damping);
            let w = 2.0 * std::f64::consts::PI / period;
            let value = if ty == "psa" {
                let sd = resp
                    .displacement
                    .iter()
                    .fold(0.0_f64, |m, v| m.max(v.abs()));
                w * w * sd
            } else {
                // Absolute acceleration response
                resp.displacement
                    .iter()
                    .zip(resp.velocity.iter())
                    .fold(0.0_f64, |m, (u, v)| {
                        m.max((2.0 * damping * w * v + w * w * u).abs())
                    })
            };
            Some(value / GRAVITY_CM)
        }
        "arias" => Some(duration::arias_intensity(series, dt)),
        "cav" => {
            let threshold = params
                .get("threshold")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            Some(duration::cav(series, dt, threshold))
        }
        "duration" => {
            let (p1, p2) = parse_interval(params);
            duration::significant_duration(series, dt, p1, p2)
        }
        "sorted_duration" => {
            let (p1, p2) = parse_interval(params);
            // Band-limit to the highest usable frequency before sorting
            match params
                .get("highest_usable_frequency")
                .and_then(Value::as_f64)
            {
                Some(fmax) if fmax > 0.0 && fmax < 0.5 / dt => {
                    let filtered = filter_frequency_domain(
                        series,
                        dt,
                        FilterBand::Lowpass { fc: fmax },
                        5,
                        2,
                    );
                    duration::sorted_duration(&filtered, dt, p1, p2)
                }
                _ => duration::sorted_duration(series, dt, p1, p2),
            }
        }
        _ => None,
    }
}

fn units_of(ty: &str) -> &'static str {
    match ty {
        "pga" | "sa" | "psa" => "g",
        "pgv" | "arias" | "cav" | "fas" => "cm/s",
        "duration" | "sorted_duration" => "s",
        _ => "",
    }
}

fn is_scalar_type(ty: &str) -> bool {
    matches!(
        ty,
        "pga" | "pgv" | "sa" | "psa" | "arias" | "cav" | "duration" | "sorted_duration"
    )
}

// ─── Stream computation ─────────────────────────────────────────────

/// Compute the configured metrics for one passing stream.
pub fn compute_stream_metrics(stream: &Stream, config: &MetricsConfig) -> Result<Vec<MetricRecord>> {
    let mut records = Vec::new();
    let station = {
        let st = stream.traces()[0].stats();
        format!("{}.{}", st.network, st.station)
    };
    let tp = &config.type_parameters;

    let horizontals: Vec<&Trace> = stream
        .passed_traces()
        .filter(|t| t.stats().is_horizontal())
        .collect();
    let horizontal_pair = (horizontals.len() >= 2).then(|| (horizontals[0], horizontals[1]));

    for (component, types) in &config.components_and_types {
        for ty in types {
            match (component.as_str(), ty.as_str()) {
                ("channels", "fas") => {
                    let grid = fas_grid(tp);
                    for tr in stream.passed_traces() {
                        let spectrum = fas::fas(
                            tr.data(),
                            tr.delta(),
                            &grid,
                            tp.fas.smoothing_parameter,
                            tp.fas.allow_nans,
                        );
                        records.push(MetricRecord {
                            station: station.clone(),
                            component: tr.stats().channel.clone(),
                            metric_type: "fas".into(),
                            parameters: fas_params(tp),
                            value: MetricValue::Spectrum {
                                abscissa: grid.clone(),
                                ordinates: spectrum,
                            },
                            units: units_of("fas").into(),
                        });
                    }
                }
                ("quadratic_mean", "fas") => {
                    if let Some((h1, h2)) = horizontal_pair {
                        let grid = fas_grid(tp);
                        let spectrum = fas::fas_quadratic_mean(
                            h1.data(),
                            h2.data(),
                            h1.delta(),
                            &grid,
                            tp.fas.smoothing_parameter,
                            tp.fas.allow_nans,
                        );
                        records.push(MetricRecord {
                            station: station.clone(),
                            component: "quadratic_mean".into(),
                            metric_type: "fas".into(),
                            parameters: fas_params(tp),
                            value: MetricValue::Spectrum {
                                abscissa: grid,
                                ordinates: spectrum,
                            },
                            units: units_of("fas").into(),
                        });
                    }
                }
                ("channels", ty) if is_scalar_type(ty) => {
                    for tr in stream.passed_traces() {
                        for params in scalar_param_sets(ty, tp) {
                            if let Some(v) = eval_scalar(ty, &params, tr.data(), tr.delta()) {
                                records.push(MetricRecord {
                                    station: station.clone(),
                                    component: tr.stats().channel.clone(),
                                    metric_type: ty.into(),
                                    parameters: params,
                                    value: MetricValue::Scalar(v),
                                    units: units_of(ty).into(),
                                });
                            }
                        }
                    }
                }
                ("arithmetic_mean" | "geometric_mean" | "quadratic_mean", ty)
                    if is_scalar_type(ty) =>
                {
                    if let Some((h1, h2)) = horizontal_pair {
                        for params in scalar_param_sets(ty, tp) {
                            let a = eval_scalar(ty, &params, h1.data(), h1.delta());
                            let b = eval_scalar(ty, &params, h2.data(), h2.delta());
                            if let (Some(a), Some(b)) = (a, b) {
                                let combined = match component.as_str() {
                                    "geometric_mean" => (a * b).sqrt(),
                                    "quadratic_mean" => ((a * a + b * b) / 2.0).sqrt(),
                                    _ => 0.5 * (a + b),
                                };
                                records.push(MetricRecord {
                                    station: station.clone(),
                                    component: component.clone(),
                                    metric_type: ty.into(),
                                    parameters: params,
                                    value: MetricValue::Scalar(combined),
                                    units: units_of(ty).into(),
                                });
                            }
                        }
                    }
                }
                ("rotd", ty) if is_scalar_type(ty) => {
                    if let Some((h1, h2)) = horizontal_pair {
                        let dt = h1.delta();
                        for &percentile in &config.component_parameters.rotd.percentiles {
                            for params in scalar_param_sets(ty, tp) {
                                let value = rotd::rotd(h1.data(), h2.data(), percentile, |s| {
                                    eval_scalar(ty, &params, s, dt).unwrap_or(f64::NAN)
                                });
                                if value.is_finite() {
                                    let mut p = params.clone();
                                    p["percentile"] = json!(percentile);
                                    records.push(MetricRecord {
                                        station: station.clone(),
                                        component: "rotd".into(),
                                        metric_type: ty.into(),
                                        parameters: p,
                                        value: MetricValue::Scalar(value),
                                        units: units_of(ty).into(),
                                    });
                                }
                            }
                        }
                    }
                }
                (component, ty) => {
                    debug!("metric combination ({component}, {ty}) not supported; skipped");
                }
            }
        }
    }
    Ok(records)
}

fn fas_grid(tp: &TypeParameters) -> Vec<f64> {
    log_frequency_grid(
        tp.fas.frequencies.start.max(1e-6),
        tp.fas.frequencies.stop,
        tp.fas.frequencies.num.max(2),
    )
}

fn fas_params(tp: &TypeParameters) -> Value {
    json!({
        "smoothing_method": tp.fas.smoothing_method,
        "smoothing_parameter": tp.fas.smoothing_parameter,
    })
}

/// Compute metrics for every passing stream of an event.
pub fn compute_event_metrics(
    streams: &[Stream],
    event_id: &str,
    config: &MetricsConfig,
) -> Result<MetricsCollection> {
    let mut collection = MetricsCollection {
        event_id: event_id.to_string(),
        records: Vec::new(),
    };
    for stream in streams.iter().filter(|s| s.passed()) {
        collection
            .records
            .extend(compute_stream_metrics(stream, config)?);
    }
    Ok(collection)
}
