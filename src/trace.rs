//! Single-channel waveform container.
//!
//! A [`Trace`] is one channel of evenly sampled data plus the metadata,
//! typed parameters and provenance log the pipeline accumulates around it.
//! Traces are created by readers, mutated in place by pipeline steps, and
//! read by the metric engine. A failed trace is retained for diagnostics
//! but skipped by downstream steps.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FailureReason, GmError, Result};
use crate::provenance::ProvenanceLog;
use crate::response::InstrumentResponse;

// ─── Metadata enums ─────────────────────────────────────────────────

/// Physical interpretation of the samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitsType {
    Acceleration,
    Velocity,
    Displacement,
    Counts,
}

/// Processing level of the record, ordered raw to corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProcessLevel {
    /// Raw counts
    V0,
    /// Converted to physical units, uncorrected
    V1,
    /// Corrected / processed
    V2,
}

/// Sensor class, derived from the channel code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    Accelerometer,
    Seismometer,
}

// ─── Stats ──────────────────────────────────────────────────────────

/// Per-channel metadata.
///
/// `delta` is the sampling interval in seconds; `npts` mirrors the sample
/// buffer length and is kept in sync by [`Trace`] mutators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStats {
    pub start_time: DateTime<Utc>,
    /// Sampling interval in seconds
    pub delta: f64,
    pub npts: usize,
    pub network: String,
    pub station: String,
    pub location: String,
    /// SEED channel code, e.g. "HNE"
    pub channel: String,
    /// Orientation azimuth in degrees clockwise from north
    #[serde(default)]
    pub azimuth: Option<f64>,
    /// Orientation dip in degrees down from horizontal
    #[serde(default)]
    pub dip: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub process_level: ProcessLevel,
    /// Units string, e.g. "counts", "cm/s^2"
    pub units: String,
    pub units_type: UnitsType,
    /// Reader that produced the record, e.g. "cosmos", "mseed"
    pub source_format: String,
    /// Structure code from the station metadata; `None` means free field
    #[serde(default)]
    pub structure_type: Option<String>,
    /// Format-specific metadata carried through opaquely
    #[serde(default)]
    pub format_specific: BTreeMap<String, Value>,
}

impl TraceStats {
    /// Sampling rate in Hz.
    pub fn sampling_rate(&self) -> f64 {
        1.0 / self.delta
    }

    /// "NET.STA.LOC.CHA" identifier.
    pub fn id(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }

    /// Sensor class from the channel instrument code (second character):
    /// 'N' marks an accelerometer, anything else a seismometer.
    pub fn instrument_type(&self) -> InstrumentType {
        match self.channel.as_bytes().get(1) {
            Some(b'N') => InstrumentType::Accelerometer,
            _ => InstrumentType::Seismometer,
        }
    }

    /// True when the channel records a horizontal component.
    ///
    /// Prefers the dip when present; falls back to the orientation code.
    pub fn is_horizontal(&self) -> bool {
        if let Some(dip) = self.dip {
            return dip.abs() < 30.0;
        }
        !matches!(self.channel.as_bytes().last(), Some(b'Z') | Some(b'3'))
    }

    pub fn is_vertical(&self) -> bool {
        !self.is_horizontal()
    }

    /// True unless the structure code marks a non-free-field installation.
    pub fn is_free_field(&self) -> bool {
        match self.structure_type.as_deref() {
            None | Some("") => true,
            // Free-field and reference station codes
            Some(code) => matches!(code, "free_field" | "reference" | "ground"),
        }
    }
}

// ─── Typed trace parameters ─────────────────────────────────────────

/// A structured value attached to a trace under a string key.
///
/// Pipeline steps communicate through these (corner frequencies, SNR
/// arrays, window times); the `Other` variant carries reader- or
/// user-specific payloads opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceParam {
    CornerFrequencies {
        highpass: f64,
        lowpass: f64,
        /// Selection method that produced the corners
        method: String,
    },
    Snr {
        /// Frequency grid in Hz
        freq: Vec<f64>,
        /// Smoothed signal/noise spectral ratio on `freq`
        snr: Vec<f64>,
    },
    SignalSplit {
        split_time: DateTime<Utc>,
        method: String,
    },
    SignalEnd {
        end_time: DateTime<Utc>,
        method: String,
    },
    BaselinePolynomial {
        /// Fit coefficients, highest order first
        coefficients: Vec<f64>,
    },
    Review {
        accepted: bool,
        #[serde(default)]
        reviewer: Option<String>,
    },
    Other(Value),
}

/// Well-known parameter keys.
pub mod param_keys {
    pub const CORNER_FREQUENCIES: &str = "corner_frequencies";
    pub const SNR: &str = "snr";
    pub const SIGNAL_SPLIT: &str = "signal_split";
    pub const SIGNAL_END: &str = "signal_end";
    pub const BASELINE_POLYNOMIAL: &str = "baseline_polynomial";
    pub const REVIEW: &str = "review";
}

// ─── Trace ──────────────────────────────────────────────────────────

/// One channel of evenly sampled data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    stats: TraceStats,
    data: Vec<f64>,
    #[serde(default)]
    response: Option<InstrumentResponse>,
    #[serde(default)]
    params: BTreeMap<String, TraceParam>,
    #[serde(default)]
    provenance: ProvenanceLog,
    #[serde(default)]
    failure: Option<FailureReason>,
}

impl Trace {
    /// Create a trace, enforcing the model invariants:
    /// non-empty data, `npts == data.len()`, positive sampling interval.
    pub fn new(stats: TraceStats, data: Vec<f64>) -> Result<Self> {
        if data.is_empty() {
            return Err(GmError::Data(format!("{}: zero-length trace", stats.id())));
        }
        if stats.delta <= 0.0 {
            return Err(GmError::Data(format!(
                "{}: non-positive sampling interval {}",
                stats.id(),
                stats.delta
            )));
        }
        if stats.npts != data.len() {
            return Err(GmError::Data(format!(
                "{}: npts {} disagrees with sample count {}",
                stats.id(),
                stats.npts,
                data.len()
            )));
        }
        Ok(Self {
            stats,
            data,
            response: None,
            params: BTreeMap::new(),
            provenance: ProvenanceLog::new(),
            failure: None,
        })
    }

    pub fn stats(&self) -> &TraceStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut TraceStats {
        &mut self.stats
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Replace the sample buffer, keeping `npts` in sync.
    pub fn set_data(&mut self, data: Vec<f64>) {
        self.stats.npts = data.len();
        self.data = data;
    }

    pub fn id(&self) -> String {
        self.stats.id()
    }

    pub fn npts(&self) -> usize {
        self.stats.npts
    }

    /// Sampling interval in seconds.
    pub fn delta(&self) -> f64 {
        self.stats.delta
    }

    pub fn sampling_rate(&self) -> f64 {
        self.stats.sampling_rate()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.stats.start_time
    }

    /// Time of the last sample.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.stats.start_time + secs_to_duration(self.stats.delta * (self.stats.npts - 1) as f64)
    }

    /// Record duration in seconds (first to last sample).
    pub fn duration_secs(&self) -> f64 {
        self.stats.delta * (self.stats.npts - 1) as f64
    }

    /// Index of the sample nearest to `t`, clamped to the record.
    pub fn index_at_time(&self, t: DateTime<Utc>) -> usize {
        let offset = duration_to_secs(t - self.stats.start_time);
        let idx = (offset / self.stats.delta).round();
        idx.clamp(0.0, (self.stats.npts - 1) as f64) as usize
    }

    /// Time of sample `i`.
    pub fn time_at_index(&self, i: usize) -> DateTime<Utc> {
        self.stats.start_time + secs_to_duration(self.stats.delta * i as f64)
    }

    /// Relative sample times in seconds from the record start.
    pub fn relative_times(&self) -> Vec<f64> {
        (0..self.stats.npts)
            .map(|i| i as f64 * self.stats.delta)
            .collect()
    }

    /// Trim the trace to `[start, end]` (inclusive, nearest samples).
    ///
    /// Callers append the matching `cut` provenance entry.
    pub fn trim(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        if end <= start {
            return Err(GmError::Data(format!(
                "{}: cut window end precedes start",
                self.id()
            )));
        }
        let i0 = self.index_at_time(start);
        let i1 = self.index_at_time(end);
        if i1 <= i0 {
            return Err(GmError::Data(format!(
                "{}: cut window shorter than one sample",
                self.id()
            )));
        }
        self.stats.start_time = self.time_at_index(i0);
        self.data = self.data[i0..=i1].to_vec();
        self.stats.npts = self.data.len();
        Ok(())
    }

    // ─── Failure handling ───────────────────────────────────────────

    /// Record a failure on this trace. The first failure wins; later
    /// failures on an already-failed trace are ignored.
    pub fn fail(&mut self, reason: FailureReason) {
        if self.failure.is_none() {
            self.failure = Some(reason);
        }
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    // ─── Parameters ─────────────────────────────────────────────────

    pub fn set_param(&mut self, key: &str, value: TraceParam) {
        self.params.insert(key.to_string(), value);
    }

    pub fn param(&self, key: &str) -> Option<&TraceParam> {
        self.params.get(key)
    }

    pub fn has_param(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn params(&self) -> &BTreeMap<String, TraceParam> {
        &self.params
    }

    /// Corner frequencies, if a selection step has run.
    pub fn corner_frequencies(&self) -> Option<(f64, f64)> {
        match self.params.get(param_keys::CORNER_FREQUENCIES) {
            Some(TraceParam::CornerFrequencies {
                highpass, lowpass, ..
            }) => Some((*highpass, *lowpass)),
            _ => None,
        }
    }

    /// Noise/signal boundary, if the windowing engine has run.
    pub fn signal_split(&self) -> Option<DateTime<Utc>> {
        match self.params.get(param_keys::SIGNAL_SPLIT) {
            Some(TraceParam::SignalSplit { split_time, .. }) => Some(*split_time),
            _ => None,
        }
    }

    pub fn signal_end(&self) -> Option<DateTime<Utc>> {
        match self.params.get(param_keys::SIGNAL_END) {
            Some(TraceParam::SignalEnd { end_time, .. }) => Some(*end_time),
            _ => None,
        }
    }

    // ─── Response / provenance ──────────────────────────────────────

    pub fn set_response(&mut self, response: InstrumentResponse) {
        self.response = Some(response);
    }

    pub fn response(&self) -> Option<&InstrumentResponse> {
        self.response.as_ref()
    }

    pub fn provenance(&self) -> &ProvenanceLog {
        &self.provenance
    }

    /// Append a provenance entry for a completed activity.
    pub fn record_activity(&mut self, activity: &str, parameters: Value) {
        self.provenance.append(activity, parameters);
    }

    /// Largest absolute sample value.
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
    }

    /// Fail the trace if any sample is non-finite after a numeric step.
    pub fn check_finite(&mut self, step: &str) -> bool {
        if self.data.iter().all(|v| v.is_finite()) {
            true
        } else {
            let reason = FailureReason::from(&GmError::Processing {
                step: step.to_string(),
                text: "non-finite samples after operation".into(),
            });
            self.fail(reason);
            false
        }
    }
}

/// Fractional seconds to a chrono duration (nanosecond resolution).
pub fn secs_to_duration(secs: f64) -> Duration {
    Duration::nanoseconds((secs * 1e9).round() as i64)
}

/// Chrono duration to fractional seconds.
pub fn duration_to_secs(d: Duration) -> f64 {
    d.num_nanoseconds().map(|n| n as f64 / 1e9).unwrap_or(0.0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn stats(channel: &str, npts: usize, delta: f64) -> TraceStats {
        TraceStats {
            start_time: Utc.with_ymd_and_hms(2019, 7, 6, 3, 20, 0).unwrap(),
            delta,
            npts,
            network: "CI".into(),
            station: "CLC".into(),
            location: "--".into(),
            channel: channel.into(),
            azimuth: Some(90.0),
            dip: Some(0.0),
            latitude: 35.8157,
            longitude: -117.5975,
            elevation: 775.0,
            process_level: ProcessLevel::V1,
            units: "cm/s^2".into(),
            units_type: UnitsType::Acceleration,
            source_format: "mseed".into(),
            structure_type: None,
            format_specific: BTreeMap::new(),
        }
    }

    fn trace(channel: &str, data: Vec<f64>) -> Trace {
        let n = data.len();
        Trace::new(stats(channel, n, 0.01), data).unwrap()
    }

    #[test]
    fn new_rejects_empty_data() {
        assert!(Trace::new(stats("HNE", 0, 0.01), vec![]).is_err());
    }

    #[test]
    fn new_rejects_npts_mismatch() {
        assert!(Trace::new(stats("HNE", 5, 0.01), vec![0.0; 4]).is_err());
    }

    #[test]
    fn new_rejects_bad_delta() {
        assert!(Trace::new(stats("HNE", 4, 0.0), vec![0.0; 4]).is_err());
    }

    #[test]
    fn end_time_and_duration() {
        let tr = trace("HNE", vec![0.0; 101]);
        assert!((tr.duration_secs() - 1.0).abs() < 1e-12);
        let dt = tr.end_time() - tr.start_time();
        assert_eq!(dt.num_milliseconds(), 1000);
    }

    #[test]
    fn index_time_roundtrip() {
        let tr = trace("HNE", vec![0.0; 1000]);
        let t = tr.time_at_index(250);
        assert_eq!(tr.index_at_time(t), 250);
    }

    #[test]
    fn index_at_time_clamps() {
        let tr = trace("HNE", vec![0.0; 100]);
        let before = tr.start_time() - Duration::seconds(10);
        let after = tr.end_time() + Duration::seconds(10);
        assert_eq!(tr.index_at_time(before), 0);
        assert_eq!(tr.index_at_time(after), 99);
    }

    #[test]
    fn trim_adjusts_start_and_npts() {
        let mut tr = trace("HNE", (0..1000).map(|i| i as f64).collect());
        let start = tr.time_at_index(100);
        let end = tr.time_at_index(499);
        tr.trim(start, end).unwrap();
        assert_eq!(tr.npts(), 400);
        assert_eq!(tr.data()[0], 100.0);
        assert_eq!(tr.start_time(), start);
    }

    #[test]
    fn trim_rejects_inverted_window() {
        let mut tr = trace("HNE", vec![0.0; 100]);
        let start = tr.time_at_index(50);
        let end = tr.time_at_index(10);
        assert!(tr.trim(start, end).is_err());
    }

    #[test]
    fn first_failure_wins() {
        let mut tr = trace("HNE", vec![0.0; 10]);
        tr.fail(FailureReason::new(
            crate::error::FailureKind::QaCheckFail,
            "check_sta_lta",
            "below threshold",
        ));
        tr.fail(FailureReason::new(
            crate::error::FailureKind::Processing,
            "detrend",
            "later failure",
        ));
        assert!(!tr.passed());
        assert_eq!(tr.failure().unwrap().step.as_deref(), Some("check_sta_lta"));
    }

    #[test]
    fn accelerometer_detection() {
        assert_eq!(
            trace("HNE", vec![0.0; 4]).stats().instrument_type(),
            InstrumentType::Accelerometer
        );
        assert_eq!(
            trace("HHZ", vec![0.0; 4]).stats().instrument_type(),
            InstrumentType::Seismometer
        );
    }

    #[test]
    fn horizontal_from_dip_overrides_code() {
        let mut st = stats("HNZ", 4, 0.01);
        st.dip = Some(0.0);
        let tr = Trace::new(st, vec![0.0; 4]).unwrap();
        assert!(tr.stats().is_horizontal());
    }

    #[test]
    fn vertical_from_code_when_no_dip() {
        let mut st = stats("HNZ", 4, 0.01);
        st.dip = None;
        let tr = Trace::new(st, vec![0.0; 4]).unwrap();
        assert!(tr.stats().is_vertical());
    }

    #[test]
    fn free_field_by_default_and_structure_code() {
        let tr = trace("HNE", vec![0.0; 4]);
        assert!(tr.stats().is_free_field());
        let mut st = stats("HNE", 4, 0.01);
        st.structure_type = Some("building".into());
        let tr = Trace::new(st, vec![0.0; 4]).unwrap();
        assert!(!tr.stats().is_free_field());
    }

    #[test]
    fn corner_frequency_param_accessor() {
        let mut tr = trace("HNE", vec![0.0; 4]);
        assert!(tr.corner_frequencies().is_none());
        tr.set_param(
            param_keys::CORNER_FREQUENCIES,
            TraceParam::CornerFrequencies {
                highpass: 0.08,
                lowpass: 20.0,
                method: "snr".into(),
            },
        );
        assert_eq!(tr.corner_frequencies(), Some((0.08, 20.0)));
    }

    #[test]
    fn check_finite_fails_on_nan() {
        let mut tr = trace("HNE", vec![0.0, f64::NAN, 1.0]);
        assert!(!tr.check_finite("lowpass_filter"));
        assert!(!tr.passed());
        assert_eq!(
            tr.failure().unwrap().step.as_deref(),
            Some("lowpass_filter")
        );
    }

    #[test]
    fn set_data_syncs_npts() {
        let mut tr = trace("HNE", vec![0.0; 10]);
        tr.set_data(vec![1.0; 25]);
        assert_eq!(tr.npts(), 25);
    }

    #[test]
    fn record_activity_appends_provenance() {
        let mut tr = trace("HNE", vec![0.0; 10]);
        tr.record_activity("detrend", serde_json::json!({"detrending_method": "linear"}));
        assert_eq!(tr.provenance().len(), 1);
        assert_eq!(tr.provenance().entries()[0].activity, "detrend");
    }
}
