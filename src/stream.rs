//! Station-level multi-channel stream.
//!
//! A [`Stream`] owns one to three traces that belong to the same sensor
//! instance. Member traces must agree on network, station, location and
//! the band+instrument half of the channel code, and be sampled on the
//! same clock (identical interval, start times within half a sample,
//! sample counts within an integer-sample tolerance).

use crate::error::{FailureKind, FailureReason, GmError, Result};
use crate::trace::Trace;

/// Allowed sample-count disagreement between member traces.
pub const DEFAULT_NPTS_TOLERANCE: usize = 1;

/// A set of traces from one sensor instance, plus the stream-level
/// pass/fail state.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Stream {
    traces: Vec<Trace>,
    failures: Vec<FailureReason>,
}

impl Stream {
    /// Build a stream, enforcing the member consistency invariants with
    /// the default sample-count tolerance.
    pub fn new(traces: Vec<Trace>) -> Result<Self> {
        Self::with_tolerance(traces, DEFAULT_NPTS_TOLERANCE)
    }

    /// Build a stream with an explicit sample-count tolerance.
    pub fn with_tolerance(traces: Vec<Trace>, npts_tolerance: usize) -> Result<Self> {
        let first = traces
            .first()
            .ok_or_else(|| GmError::Data("stream with no traces".into()))?;
        let key = instrument_key(first);
        let delta = first.delta();
        let start = first.start_time();
        let npts = first.npts();
        for tr in &traces[1..] {
            if instrument_key(tr) != key {
                return Err(GmError::Data(format!(
                    "trace {} does not belong to stream {}",
                    tr.id(),
                    key
                )));
            }
            if (tr.delta() - delta).abs() > 1e-9 {
                return Err(GmError::Data(format!(
                    "{}: sampling interval {} differs from {}",
                    tr.id(),
                    tr.delta(),
                    delta
                )));
            }
            let dt_secs = crate::trace::duration_to_secs(tr.start_time() - start).abs();
            if dt_secs > delta / 2.0 {
                return Err(GmError::Data(format!(
                    "{}: start time differs by {dt_secs} s (more than half a sample)",
                    tr.id()
                )));
            }
            if tr.npts().abs_diff(npts) > npts_tolerance {
                return Err(GmError::Data(format!(
                    "{}: sample count {} outside tolerance of {}",
                    tr.id(),
                    tr.npts(),
                    npts
                )));
            }
        }
        Ok(Self {
            traces,
            failures: Vec::new(),
        })
    }

    /// "NET.STA.LOC.BI" identifier (band+instrument half of the channel
    /// code).
    pub fn id(&self) -> String {
        let st = self.traces[0].stats();
        let band_inst: String = st.channel.chars().take(2).collect();
        format!(
            "{}.{}.{}.{}",
            st.network, st.station, st.location, band_inst
        )
    }

    pub fn traces(&self) -> &[Trace] {
        &self.traces
    }

    pub fn traces_mut(&mut self) -> &mut [Trace] {
        &mut self.traces
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    // ─── Pass/fail state ────────────────────────────────────────────

    /// Record a stream-level failure.
    pub fn fail(&mut self, reason: FailureReason) {
        self.failures.push(reason);
    }

    /// True when neither the stream nor (via propagation) its traces have
    /// been failed.
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[FailureReason] {
        &self.failures
    }

    /// Traces that have not individually failed.
    pub fn passed_traces(&self) -> impl Iterator<Item = &Trace> {
        self.traces.iter().filter(|t| t.passed())
    }

    /// Fail the whole stream when any member trace has failed
    /// (`check_stream.any_trace_failures`).
    pub fn propagate_trace_failures(&mut self, step: &str) {
        if !self.passed() {
            return;
        }
        let failed: Vec<String> = self
            .traces
            .iter()
            .filter(|t| !t.passed())
            .map(|t| t.id())
            .collect();
        if !failed.is_empty() {
            self.fail(FailureReason::new(
                FailureKind::QaCheckFail,
                step,
                format!("trace failure(s): {}", failed.join(", ")),
            ));
        }
    }

    // ─── Component selection ────────────────────────────────────────

    pub fn horizontal_traces(&self) -> Vec<&Trace> {
        self.traces
            .iter()
            .filter(|t| t.stats().is_horizontal())
            .collect()
    }

    pub fn vertical_trace(&self) -> Option<&Trace> {
        self.traces.iter().find(|t| t.stats().is_vertical())
    }

    /// Two horizontals with (approximately) orthogonal azimuths.
    pub fn orthogonal_horizontals(&self) -> Option<(&Trace, &Trace)> {
        let horiz = self.horizontal_traces();
        for (i, a) in horiz.iter().enumerate() {
            for b in &horiz[i + 1..] {
                match (a.stats().azimuth, b.stats().azimuth) {
                    (Some(az1), Some(az2)) => {
                        let diff = (az1 - az2).rem_euclid(180.0);
                        if (diff - 90.0).abs() < 10.0 {
                            return Some((a, b));
                        }
                    }
                    // No azimuths recorded: trust the orientation codes
                    _ => return Some((a, b)),
                }
            }
        }
        None
    }
}

fn instrument_key(tr: &Trace) -> String {
    let st = tr.stats();
    let band_inst: String = st.channel.chars().take(2).collect();
    format!(
        "{}.{}.{}.{}",
        st.network, st.station, st.location, band_inst
    )
}
