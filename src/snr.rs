//! Signal-to-noise ratio estimation and screening.
//!
//! The noise and signal windows defined by the split time are transformed
//! separately, their power spectra normalized by window duration, smoothed
//! with the Konno-Ohmachi kernel on a log-spaced grid, and divided. The
//! resulting SNR curve is stored on the trace and consumed by the SNR
//! check and the corner-frequency selection.

use serde_json::json;

use crate::dsp::fft::{next_pow2, rfft, rfftfreq};
use crate::dsp::smoothing::{konno_ohmachi_smooth, log_frequency_grid};
use crate::error::{FailureKind, FailureReason, GmError, Result};
use crate::event::ScalarEvent;
use crate::stream::Stream;
use crate::trace::{Trace, TraceParam, param_keys};
use crate::windows::brune_f0;

/// Number of points in the SNR evaluation grid.
const SNR_GRID_POINTS: usize = 301;

/// Parameters of the SNR computation step.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SnrOptions {
    /// Konno-Ohmachi bandwidth parameter
    pub bandwidth: f64,
}

impl Default for SnrOptions {
    fn default() -> Self {
        Self { bandwidth: 188.5 }
    }
}

/// Duration-normalized power spectrum of a window.
fn window_power(data: &[f64], dt: f64, grid_nfft: usize) -> Vec<f64> {
    let duration = dt * data.len() as f64;
    rfft(data, grid_nfft)
        .iter()
        .map(|c| c.norm_sqr() * dt * dt / duration)
        .collect()
}

/// Compute and store the smoothed SNR curve for one trace.
fn trace_snr(tr: &Trace, opts: &SnrOptions) -> Result<(Vec<f64>, Vec<f64>)> {
    let split = tr.signal_split().ok_or(GmError::MissingPrereq {
        step: "compute_snr".into(),
        param: param_keys::SIGNAL_SPLIT.into(),
    })?;
    let split_idx = tr.index_at_time(split);
    let end_idx = tr
        .signal_end()
        .map(|t| tr.index_at_time(t))
        .unwrap_or(tr.npts() - 1);
    if split_idx < 2 || end_idx <= split_idx + 2 {
        return Err(GmError::Processing {
            step: "compute_snr".into(),
            text: format!("{}: noise or signal window is empty", tr.id()),
        });
    }

    let dt = tr.delta();
    let noise = &tr.data()[..split_idx];
    let signal = &tr.data()[split_idx..=end_idx];

    // One transform length for both windows so the grids line up
    let nfft = next_pow2(noise.len().max(signal.len()));
    let freqs = rfftfreq(nfft, dt);
    let noise_power = window_power(noise, dt, nfft);
    let signal_power = window_power(signal, dt, nfft);

    let nyquist = 0.5 / dt;
    let fmin = (1.0 / (dt * signal.len() as f64)).max(0.01);
    let grid = log_frequency_grid(fmin, nyquist, SNR_GRID_POINTS);

    let smooth_signal = konno_ohmachi_smooth(&freqs, &signal_power, &grid, opts.bandwidth);
    let smooth_noise = konno_ohmachi_smooth(&freqs, &noise_power, &grid, opts.bandwidth);

    let snr: Vec<f64> = smooth_signal
        .iter()
        .zip(smooth_noise.iter())
        .map(|(s, n)| if *n > 0.0 { s / n } else { f64::INFINITY })
        .collect();
    Ok((grid, snr))
}

/// Compute SNR for every passing trace of the stream, storing the curves
/// as trace parameters.
pub fn compute_snr(stream: &mut Stream, opts: &SnrOptions) -> Result<()> {
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        match trace_snr(tr, opts) {
            Ok((freq, snr)) => {
                tr.set_param(param_keys::SNR, TraceParam::Snr { freq, snr });
                tr.record_activity(
                    "calculate_snr",
                    json!({"smoothing": "konno_ohmachi", "bandwidth": opts.bandwidth}),
                );
            }
            Err(err) => tr.fail(FailureReason::from(&err)),
        }
    }
    Ok(())
}

// ─── SNR check ──────────────────────────────────────────────────────

/// Lower frequency bound of the SNR check band.
#[derive(Debug, Clone, PartialEq)]
pub enum MinFreq {
    Fixed(f64),
    /// Brune corner of the event, clamped to `[floor, ceiling]`
    BruneF0 {
        stress_drop: f64,
        shear_vel: f64,
        floor: f64,
        ceiling: f64,
    },
}

impl MinFreq {
    pub fn resolve(&self, event: &ScalarEvent) -> f64 {
        match self {
            MinFreq::Fixed(f) => *f,
            MinFreq::BruneF0 {
                stress_drop,
                shear_vel,
                floor,
                ceiling,
            } => brune_f0(event.magnitude, *stress_drop, *shear_vel)
                .min(*ceiling)
                .max(*floor),
        }
    }
}

/// Fail traces whose SNR dips below `threshold` anywhere inside
/// `[min_freq, max_freq]`.
pub fn snr_check(
    stream: &mut Stream,
    event: &ScalarEvent,
    threshold: f64,
    min_freq: &MinFreq,
    max_freq: f64,
) -> Result<()> {
    let fmin = min_freq.resolve(event);
    for tr in stream.traces_mut() {
        if !tr.passed() {
            continue;
        }
        let Some(TraceParam::Snr { freq, snr }) = tr.param(param_keys::SNR).cloned() else {
            tr.fail(FailureReason::new(
                FailureKind::MissingPrereq,
                "snr_check",
                "no SNR parameter; compute_snr must run first",
            ));
            continue;
        };
        let worst = freq
            .iter()
            .zip(snr.iter())
            .filter(|(f, _)| **f >= fmin && **f <= max_freq)
            .map(|(_, s)| *s)
            .fold(f64::INFINITY, f64::min);
        if worst < threshold {
            tr.fail(FailureReason::new(
                FailureKind::QaCheckFail,
                "snr_check",
                format!(
                    "minimum SNR {worst:.2} in [{fmin:.3}, {max_freq:.3}] Hz below threshold {threshold:.2}"
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Trace;
    use crate::trace::tests::stats;
    use crate::trace::{TraceParam, param_keys};
    use chrono::TimeZone;
    use chrono::Utc;

    fn event() -> ScalarEvent {
        ScalarEvent::new(
            "test",
            Utc.with_ymd_and_hms(2019, 7, 6, 3, 19, 53).unwrap(),
            35.77,
            -117.60,
            8.0,
            6.4,
        )
    }

    /// 20 s of weak noise then 40 s of a strong 2 Hz tone.
    fn noisy_then_tone(tone_amp: f64) -> Trace {
        let dt = 0.01;
        let n = 6000;
        let split_idx = 2000;
        let st = stats("HNE", n, dt);
        let mut state = 0xc0ffee_u64;
        let data: Vec<f64> = (0..n)
            .map(|i| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let noise = ((state as f64 / u64::MAX as f64) - 0.5) * 0.02;
                if i >= split_idx {
                    let t = (i - split_idx) as f64 * dt;
                    noise + tone_amp * (2.0 * std::f64::consts::PI * 2.0 * t).sin()
                } else {
                    noise
                }
            })
            .collect();
        let mut tr = Trace::new(st, data).unwrap();
        let split = tr.time_at_index(split_idx);
        tr.set_param(
            param_keys::SIGNAL_SPLIT,
            TraceParam::SignalSplit {
                split_time: split,
                method: "p_pick".into(),
            },
        );
        tr
    }

    fn snr_at(tr: &Trace, f0: f64) -> f64 {
        let Some(TraceParam::Snr { freq, snr }) = tr.param(param_keys::SNR) else {
            panic!("no snr param");
        };
        let idx = freq
            .iter()
            .enumerate()
            .min_by(|a, b| {
                (a.1 - f0).abs().partial_cmp(&(b.1 - f0).abs()).unwrap()
            })
            .unwrap()
            .0;
        snr[idx]
    }

    #[test]
    fn snr_high_at_tone_frequency() {
        let tr = noisy_then_tone(1.0);
        let mut stream = Stream::new(vec![tr]).unwrap();
        compute_snr(&mut stream, &SnrOptions::default()).unwrap();
        let tr = &stream.traces()[0];
        assert!(tr.has_param(param_keys::SNR));
        assert!(snr_at(tr, 2.0) > 100.0, "snr {}", snr_at(tr, 2.0));
        // Far from the tone, the SNR is modest
        assert!(snr_at(tr, 30.0) < 50.0);
        assert_eq!(tr.provenance().activities("calculate_snr").count(), 1);
    }

    #[test]
    fn compute_snr_requires_split() {
        let dt = 0.01;
        let tr = Trace::new(stats("HNE", 1000, dt), vec![0.5; 1000]).unwrap();
        let mut stream = Stream::new(vec![tr]).unwrap();
        compute_snr(&mut stream, &SnrOptions::default()).unwrap();
        let tr = &stream.traces()[0];
        assert!(!tr.passed());
        assert_eq!(tr.failure().unwrap().kind, FailureKind::MissingPrereq);
    }

    #[test]
    fn snr_check_passes_strong_signal() {
        let tr = noisy_then_tone(1.0);
        let mut stream = Stream::new(vec![tr]).unwrap();
        compute_snr(&mut stream, &SnrOptions::default()).unwrap();
        snr_check(&mut stream, &event(), 3.0, &MinFreq::Fixed(1.5), 2.5).unwrap();
        assert!(stream.traces()[0].passed());
    }

    #[test]
    fn snr_check_fails_weak_band() {
        // Tone amplitude comparable to the noise: SNR in [0.5, 2.0] of a
        // quiet band fails
        let tr = noisy_then_tone(0.001);
        let mut stream = Stream::new(vec![tr]).unwrap();
        compute_snr(&mut stream, &SnrOptions::default()).unwrap();
        snr_check(&mut stream, &event(), 3.0, &MinFreq::Fixed(0.5), 2.0).unwrap();
        let tr = &stream.traces()[0];
        assert!(!tr.passed());
        assert_eq!(tr.failure().unwrap().kind, FailureKind::QaCheckFail);
        assert!(tr.failure().unwrap().text.contains("below threshold"));
    }

    #[test]
    fn snr_check_requires_snr_param() {
        let tr = noisy_then_tone(1.0);
        let mut stream = Stream::new(vec![tr]).unwrap();
        snr_check(&mut stream, &event(), 3.0, &MinFreq::Fixed(0.5), 2.0).unwrap();
        assert_eq!(
            stream.traces()[0].failure().unwrap().kind,
            FailureKind::MissingPrereq
        );
    }

    #[test]
    fn min_freq_f0_clamped() {
        let mf = MinFreq::BruneF0 {
            stress_drop: 10.0,
            shear_vel: 3.7,
            floor: 0.1,
            ceiling: 2.0,
        };
        let f = mf.resolve(&event());
        assert!((0.1..=2.0).contains(&f));
    }

    #[test]
    fn failed_trace_skipped_by_compute_snr() {
        let mut tr = noisy_then_tone(1.0);
        tr.fail(FailureReason::new(
            FailureKind::QaCheckFail,
            "check_sta_lta",
            "below threshold",
        ));
        let mut stream = Stream::new(vec![tr]).unwrap();
        compute_snr(&mut stream, &SnrOptions::default()).unwrap();
        assert!(!stream.traces()[0].has_param(param_keys::SNR));
    }

    #[test]
    fn snr_window_end_respects_signal_end() {
        let mut tr = noisy_then_tone(1.0);
        let end = tr.time_at_index(4000);
        tr.set_param(
            param_keys::SIGNAL_END,
            TraceParam::SignalEnd {
                end_time: end,
                method: "model".into(),
            },
        );
        let mut stream = Stream::new(vec![tr]).unwrap();
        compute_snr(&mut stream, &SnrOptions::default()).unwrap();
        assert!(stream.traces()[0].has_param(param_keys::SNR));
    }
}
