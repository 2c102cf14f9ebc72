//! P-wave arrival pickers.
//!
//! Five pickers produce candidate onset times which the windowing engine
//! aggregates: a travel-time estimate from a layered 1-D earth model, an
//! AR prediction-error picker with an Akaike criterion, a Baer-style
//! envelope trigger, a damped-oscillator energy picker, and a band-passed
//! power trigger. Candidates within a configured window of the
//! travel-time estimate combine by median.

use log::warn;

use crate::config::{
    ArAicConfig, BaerConfig, KalkanConfig, PickersConfig, PowerPickerConfig, TravelTimeConfig,
};
use crate::dsp::filter::{FilterBand, filter_time_domain};
use crate::dsp::oscillator::sdof_response;

/// A candidate onset, in seconds from the record start.
#[derive(Debug, Clone, PartialEq)]
pub struct Pick {
    pub seconds: f64,
    pub picker: &'static str,
}

// ─── Travel time ────────────────────────────────────────────────────

/// First P arrival through a horizontally layered model, in seconds.
///
/// Considers the straight-ray direct wave and head waves along every
/// interface below the source; returns the earliest.
pub fn p_travel_time(epi_dist_km: f64, depth_km: f64, model: &TravelTimeConfig) -> f64 {
    let mut velocities: Vec<f64> = model.layers.iter().map(|l| l.vp_km_s).collect();
    let mut thicknesses: Vec<f64> = model.layers.iter().map(|l| l.thickness_km).collect();
    // Halfspace as a terminal thick layer
    velocities.push(model.halfspace_vp_km_s);
    thicknesses.push(f64::INFINITY);

    // Straight ray from hypocentre to surface station: slowness-weighted
    // path length through each crossed layer.
    let direct = {
        let total = (epi_dist_km * epi_dist_km + depth_km * depth_km).sqrt().max(1e-9);
        let mut t = 0.0;
        let mut top = 0.0;
        for (v, h) in velocities.iter().zip(thicknesses.iter()) {
            let bottom = (top + h).min(depth_km);
            if bottom > top {
                let frac = (bottom - top) / depth_km.max(1e-9);
                t += frac * total / v;
            }
            top += h;
            if top >= depth_km {
                break;
            }
        }
        if depth_km <= 0.0 { total / velocities[0] } else { t }
    };

    // Head waves: refractor n needs v_n greater than every layer crossed.
    let mut best = direct;
    let mut interface_depth = 0.0;
    for n in 1..velocities.len() {
        interface_depth += thicknesses[n - 1];
        let vn = velocities[n];
        if velocities[..n].iter().any(|&v| v >= vn) {
            continue;
        }
        if interface_depth <= depth_km {
            // Source below the refractor: no up-dip head wave from it
            continue;
        }
        // Receiver leg crosses all layers above the refractor; source leg
        // only the part below the source depth.
        let mut intercept = 0.0;
        let mut top = 0.0;
        let mut valid = true;
        for i in 0..n {
            let eta = (1.0 / (velocities[i] * velocities[i]) - 1.0 / (vn * vn)).sqrt();
            if !eta.is_finite() {
                valid = false;
                break;
            }
            let bottom = top + thicknesses[i];
            // receiver leg: full layer thickness
            intercept += thicknesses[i] * eta;
            // source leg: only below the source
            let below_source = (bottom - depth_km.max(top)).max(0.0).min(thicknesses[i]);
            intercept += below_source * eta;
            top = bottom;
        }
        if valid {
            let t = epi_dist_km / vn + intercept;
            if t < best {
                best = t;
            }
        }
    }
    best
}

// ─── AR-AIC ─────────────────────────────────────────────────────────

/// AR prediction-error picker.
///
/// Fits an AR model to the leading noise via Levinson-Durbin, forms the
/// squared prediction error as a characteristic function, and picks the
/// Akaike-criterion minimum over it.
pub fn ar_aic_pick(data: &[f64], dt: f64, cfg: &ArAicConfig) -> Option<usize> {
    let n = data.len();
    let noise_len = ((cfg.lta_seconds / dt) as usize).clamp(cfg.order * 4, n / 2);
    if n < noise_len + 16 || cfg.order == 0 {
        return None;
    }
    let coeffs = levinson_durbin(&data[..noise_len], cfg.order)?;

    let mut cf = vec![0.0; n];
    for i in cfg.order..n {
        let mut pred = 0.0;
        for (k, &a) in coeffs.iter().enumerate() {
            pred += a * data[i - 1 - k];
        }
        let err = data[i] - pred;
        cf[i] = err * err;
    }
    aic_minimum(&cf[cfg.order..]).map(|idx| idx + cfg.order)
}

/// AR coefficients by Levinson-Durbin on the biased autocorrelation.
fn levinson_durbin(x: &[f64], order: usize) -> Option<Vec<f64>> {
    let n = x.len();
    if n <= order {
        return None;
    }
    let mut r = vec![0.0; order + 1];
    for (lag, rl) in r.iter_mut().enumerate() {
        for i in lag..n {
            *rl += x[i] * x[i - lag];
        }
        *rl /= n as f64;
    }
    if r[0] <= 0.0 {
        return None;
    }
    let mut a = vec![0.0; order];
    let mut e = r[0];
    for m in 0..order {
        let mut k = r[m + 1];
        for j in 0..m {
            k -= a[j] * r[m - j];
        }
        k /= e;
        a[m] = k;
        for j in 0..m / 2 + m % 2 {
            let tmp = a[j] - k * a[m - 1 - j];
            a[m - 1 - j] -= k * a[j];
            a[j] = tmp;
        }
        e *= 1.0 - k * k;
        if e <= 0.0 {
            return None;
        }
    }
    Some(a)
}

/// Index of the Akaike information criterion minimum of a series:
/// `AIC(k) = k*ln(var(x[..k])) + (n-k)*ln(var(x[k..]))`.
///
/// Prefix sums keep the scan linear in the record length.
fn aic_minimum(x: &[f64]) -> Option<usize> {
    let n = x.len();
    if n < 8 {
        return None;
    }
    let mut sum = vec![0.0; n + 1];
    let mut sumsq = vec![0.0; n + 1];
    for (i, &v) in x.iter().enumerate() {
        sum[i + 1] = sum[i] + v;
        sumsq[i + 1] = sumsq[i] + v * v;
    }
    let variance = |lo: usize, hi: usize| -> f64 {
        let len = (hi - lo) as f64;
        let mean = (sum[hi] - sum[lo]) / len;
        ((sumsq[hi] - sumsq[lo]) / len - mean * mean).max(1e-300)
    };
    let mut best = (0usize, f64::INFINITY);
    for k in 4..n - 4 {
        let aic = k as f64 * variance(0, k).ln() + (n - k) as f64 * variance(k, n).ln();
        if aic < best.1 {
            best = (k, aic);
        }
    }
    Some(best.0)
}

// ─── Baer ───────────────────────────────────────────────────────────

/// Baer-style envelope trigger.
///
/// Characteristic function `y^2 + (dy/dt)^2 / <(dy/dt)^2>`, standardized
/// by the leading-noise statistics; a trigger must stay up `tupevent`
/// samples, tolerating dips up to `tdownmax` samples.
pub fn baer_pick(data: &[f64], dt: f64, cfg: &BaerConfig) -> Option<usize> {
    let n = data.len();
    if n < cfg.preset_len + cfg.tupevent + 2 {
        return None;
    }
    // Envelope-squared characteristic function
    let mut deriv_sq_mean = 0.0;
    let mut sq_mean = 0.0;
    for i in 1..n {
        let d = (data[i] - data[i - 1]) / dt;
        deriv_sq_mean += d * d;
        sq_mean += data[i] * data[i];
    }
    deriv_sq_mean /= (n - 1) as f64;
    sq_mean /= (n - 1) as f64;
    if deriv_sq_mean <= 0.0 || sq_mean <= 0.0 {
        return None;
    }
    let cf: Vec<f64> = (1..n)
        .map(|i| {
            let d = (data[i] - data[i - 1]) / dt;
            let e = data[i] * data[i] / sq_mean + d * d / deriv_sq_mean;
            e * e
        })
        .collect();

    let noise = &cf[..cfg.preset_len.min(cf.len())];
    let mean = noise.iter().sum::<f64>() / noise.len() as f64;
    let std = (noise.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / noise.len() as f64)
        .sqrt()
        .max(1e-300);

    let mut candidate: Option<usize> = None;
    let mut up = 0usize;
    let mut down = 0usize;
    for (i, &v) in cf.iter().enumerate().skip(cfg.preset_len) {
        let snr = (v - mean) / std;
        if snr > cfg.thr1 {
            if candidate.is_none() {
                candidate = Some(i);
            }
            up += 1;
            down = 0;
            if up >= cfg.tupevent {
                return candidate.map(|c| c + 1); // cf is offset by one sample
            }
        } else if candidate.is_some() {
            down += 1;
            if down > cfg.tdownmax {
                candidate = None;
                up = 0;
                down = 0;
            }
        }
    }
    None
}

// ─── Kalkan ─────────────────────────────────────────────────────────

/// Damped-oscillator energy picker.
///
/// Drives a short-period, heavily damped oscillator with the record and
/// picks the onset of damping-energy accumulation.
pub fn kalkan_pick(data: &[f64], dt: f64, cfg: &KalkanConfig) -> Option<usize> {
    let n = data.len();
    if n < 32 {
        return None;
    }
    let resp = sdof_response(data, dt, cfg.period.max(2.0 * dt), cfg.damping);
    // Cumulative damping energy ~ integral of velocity squared
    let mut energy = Vec::with_capacity(n);
    let mut acc = 0.0;
    for v in &resp.velocity {
        acc += v * v * dt;
        energy.push(acc);
    }
    let total = *energy.last()?;
    if total <= 0.0 {
        return None;
    }
    // Onset: energy rate first exceeds noise rate by a wide margin
    let lead = (n / 10).max(8);
    let noise_rate = energy[lead] / lead as f64;
    let threshold = (noise_rate * 20.0).max(total / n as f64 * 0.05);
    for i in lead..n - 1 {
        let rate = energy[i + 1] - energy[i];
        if rate > threshold {
            return Some(i);
        }
    }
    None
}

// ─── Power ──────────────────────────────────────────────────────────

/// Band-passed short-window power trigger.
pub fn power_pick(data: &[f64], dt: f64, cfg: &PowerPickerConfig) -> Option<usize> {
    let n = data.len();
    let win = ((cfg.window_seconds / dt) as usize).max(4);
    if n < 4 * win {
        return None;
    }
    let nyq = 0.5 / dt;
    let band = FilterBand::Bandpass {
        f1: cfg.highpass.min(0.9 * nyq),
        f2: cfg.lowpass.min(0.95 * nyq),
    };
    let filtered = filter_time_domain(data, dt, band, 4, 1);

    // Noise power from the leading window
    let noise_power = filtered[..win].iter().map(|v| v * v).sum::<f64>() / win as f64;
    let floor = noise_power.max(1e-300);
    let mut power = 0.0;
    for i in 0..win {
        power += filtered[i] * filtered[i];
    }
    for i in win..n {
        power += filtered[i] * filtered[i] - filtered[i - win] * filtered[i - win];
        if power / win as f64 / floor > cfg.threshold {
            // Back up to the start of the window that tripped
            return Some(i - win + 1);
        }
    }
    None
}

// ─── Combination ────────────────────────────────────────────────────

/// Result of combining the configured pickers on one trace.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedPick {
    /// Onset in seconds from the record start
    pub seconds: f64,
    /// Candidates that entered the combination
    pub candidates: Vec<Pick>,
}

/// Run the configured pickers and combine candidates near the
/// travel-time estimate.
///
/// `travel_time_seconds` is the model arrival relative to the record
/// start. Returns `None` when no picker produces a usable candidate.
pub fn combine_picks(
    data: &[f64],
    dt: f64,
    travel_time_seconds: f64,
    cfg: &PickersConfig,
) -> Option<CombinedPick> {
    let mut candidates: Vec<Pick> = Vec::new();
    for method in &cfg.methods {
        let pick = match method.as_str() {
            "travel_time" => Some(Pick {
                seconds: travel_time_seconds,
                picker: "travel_time",
            }),
            "ar_aic" => ar_aic_pick(data, dt, &cfg.ar_aic).map(|i| Pick {
                seconds: i as f64 * dt,
                picker: "ar_aic",
            }),
            "baer" => baer_pick(data, dt, &cfg.baer).map(|i| Pick {
                seconds: i as f64 * dt,
                picker: "baer",
            }),
            "kalkan" => kalkan_pick(data, dt, &cfg.kalkan).map(|i| Pick {
                seconds: i as f64 * dt,
                picker: "kalkan",
            }),
            "power" => power_pick(data, dt, &cfg.power).map(|i| Pick {
                seconds: i as f64 * dt,
                picker: "power",
            }),
            other => {
                warn!("unknown picker '{other}' skipped");
                None
            }
        };
        if let Some(p) = pick {
            candidates.push(p);
        }
    }

    // Keep candidates near the model arrival and inside the record
    let record_end = (data.len().saturating_sub(1)) as f64 * dt;
    candidates.retain(|p| {
        (p.seconds - travel_time_seconds).abs() <= cfg.window
            && p.seconds >= 0.0
            && p.seconds <= record_end
    });
    if candidates.is_empty() {
        return None;
    }

    let mut seconds: Vec<f64> = candidates.iter().map(|p| p.seconds).collect();
    seconds.sort_by(|a, b| a.total_cmp(b));
    let combined = match cfg.combine.as_str() {
        "mean" => seconds.iter().sum::<f64>() / seconds.len() as f64,
        _ => {
            let mid = seconds.len() / 2;
            if seconds.len() % 2 == 1 {
                seconds[mid]
            } else {
                0.5 * (seconds[mid - 1] + seconds[mid])
            }
        }
    };

    // Disagreement with the model arrival warns but keeps the median.
    if (combined - travel_time_seconds).abs() > cfg.pick_travel_time_warning {
        warn!(
            "combined pick {combined:.2}s deviates from travel-time estimate \
             {travel_time_seconds:.2}s by more than {:.1}s",
            cfg.pick_travel_time_warning
        );
    }

    Some(CombinedPick {
        seconds: combined,
        candidates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PickersConfig;

    /// Gaussian-ish noise then a strong arrival at `onset` seconds.
    fn synthetic_record(dt: f64, total: f64, onset: f64) -> Vec<f64> {
        let n = (total / dt) as usize;
        let onset_idx = (onset / dt) as usize;
        // Deterministic pseudo-noise
        let mut state = 0x9e3779b97f4a7c15_u64;
        let mut rand = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as f64 / u64::MAX as f64) - 0.5
        };
        (0..n)
            .map(|i| {
                let noise = rand() * 0.01;
                if i >= onset_idx {
                    let t = (i - onset_idx) as f64 * dt;
                    noise
                        + 5.0
                            * (-t / 8.0).exp()
                            * (2.0 * std::f64::consts::PI * 3.0 * t).sin()
                } else {
                    noise
                }
            })
            .collect()
    }

    #[test]
    fn travel_time_increases_with_distance() {
        let model = TravelTimeConfig::default();
        let t10 = p_travel_time(10.0, 8.0, &model);
        let t60 = p_travel_time(60.0, 8.0, &model);
        let t200 = p_travel_time(200.0, 8.0, &model);
        assert!(t10 < t60 && t60 < t200);
    }

    #[test]
    fn travel_time_plausible_at_60_km() {
        // ~60 km, 8 km deep: crustal P should arrive in roughly 8-12 s
        let model = TravelTimeConfig::default();
        let t = p_travel_time(60.0, 8.0, &model);
        assert!((8.0..12.0).contains(&t), "got {t}");
    }

    #[test]
    fn head_wave_wins_at_large_distance() {
        let model = TravelTimeConfig::default();
        let x = 300.0;
        let t = p_travel_time(x, 8.0, &model);
        // Far-field apparent velocity approaches the halfspace speed
        let apparent = x / t;
        assert!(apparent > 6.8, "apparent velocity {apparent}");
    }

    #[test]
    fn ar_aic_finds_onset() {
        let dt = 0.01;
        let data = synthetic_record(dt, 60.0, 20.0);
        let idx = ar_aic_pick(&data, dt, &ArAicConfig::default()).unwrap();
        let t = idx as f64 * dt;
        assert!((t - 20.0).abs() < 1.0, "picked {t}");
    }

    #[test]
    fn baer_finds_onset() {
        let dt = 0.01;
        let data = synthetic_record(dt, 60.0, 20.0);
        let idx = baer_pick(&data, dt, &BaerConfig::default()).unwrap();
        let t = idx as f64 * dt;
        assert!((t - 20.0).abs() < 1.0, "picked {t}");
    }

    #[test]
    fn kalkan_finds_onset() {
        let dt = 0.01;
        let data = synthetic_record(dt, 60.0, 20.0);
        let idx = kalkan_pick(&data, dt, &KalkanConfig::default()).unwrap();
        let t = idx as f64 * dt;
        assert!((t - 20.0).abs() < 2.0, "picked {t}");
    }

    #[test]
    fn power_finds_onset() {
        let dt = 0.01;
        let data = synthetic_record(dt, 60.0, 20.0);
        let idx = power_pick(&data, dt, &PowerPickerConfig::default()).unwrap();
        let t = idx as f64 * dt;
        assert!((t - 20.0).abs() < 2.5, "picked {t}");
    }

    #[test]
    fn pure_noise_yields_no_baer_pick() {
        let dt = 0.01;
        // No arrival at all
        let data = synthetic_record(dt, 30.0, 1e9);
        assert!(baer_pick(&data, dt, &BaerConfig::default()).is_none());
    }

    #[test]
    fn combine_takes_median_within_window() {
        let dt = 0.01;
        let data = synthetic_record(dt, 60.0, 20.0);
        let cfg = PickersConfig::default();
        let combined = combine_picks(&data, dt, 19.5, &cfg).unwrap();
        assert!((combined.seconds - 20.0).abs() < 1.5, "combined {}", combined.seconds);
        assert!(combined.candidates.len() >= 3);
    }

    #[test]
    fn combine_discards_candidates_outside_window() {
        let dt = 0.01;
        let data = synthetic_record(dt, 60.0, 20.0);
        let mut cfg = PickersConfig::default();
        cfg.window = 2.0;
        // Travel-time estimate far from the true onset: data pickers fall
        // outside the window and only the model candidate survives
        let combined = combine_picks(&data, dt, 50.0, &cfg).unwrap();
        assert_eq!(combined.candidates.len(), 1);
        assert_eq!(combined.candidates[0].picker, "travel_time");
    }

    #[test]
    fn combine_rejects_model_arrival_outside_record() {
        // Flat record starting long after the predicted arrival: no
        // picker fires and the model candidate is out of bounds
        let cfg = PickersConfig::default();
        assert!(combine_picks(&vec![0.0; 1000], 0.01, -191.0, &cfg).is_none());
    }

    #[test]
    fn levinson_recovers_ar1() {
        // x[i] = 0.9 x[i-1] + e
        let mut x = vec![0.0_f64; 4000];
        let mut state = 0xdeadbeef_u64;
        for i in 1..4000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let e = (state as f64 / u64::MAX as f64) - 0.5;
            x[i] = 0.9 * x[i - 1] + e;
        }
        let a = levinson_durbin(&x, 1).unwrap();
        assert!((a[0] - 0.9).abs() < 0.05, "got {}", a[0]);
    }
}
