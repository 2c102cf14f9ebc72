//! Per-trace provenance log.
//!
//! Every mutation of a trace appends one [`ProvenanceEntry`] describing the
//! activity, a stable provenance identifier, a timestamp, and the parameters
//! needed to reproduce the step. Identifiers follow the SEIS-PROV pattern
//! `seis_prov:sp<NNN>_<code>` where `<NNN>` is the 1-based position of the
//! entry in the trace's log and `<code>` is a short activity code, so runs
//! with identical inputs produce identical identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One recorded activity on a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    /// Activity name (e.g. "detrend", "lowpass_filter", "cut")
    pub activity: String,
    /// Stable identifier, e.g. "seis_prov:sp003_lp"
    pub prov_id: String,
    /// Wall-clock time the activity ran (not part of the identifier)
    pub timestamp: DateTime<Utc>,
    /// Parameters sufficient to reproduce the step
    pub parameters: Value,
}

/// Ordered, append-only activity log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceLog {
    entries: Vec<ProvenanceEntry>,
}

impl ProvenanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an activity. The provenance id is derived from the activity
    /// code and the entry's position, so it is stable across runs.
    pub fn append(&mut self, activity: &str, parameters: Value) -> &ProvenanceEntry {
        let seq = self.entries.len() + 1;
        let entry = ProvenanceEntry {
            activity: activity.to_string(),
            prov_id: format!("seis_prov:sp{:03}_{}", seq, activity_code(activity)),
            timestamp: Utc::now(),
            parameters,
        };
        self.entries.push(entry);
        self.entries.last().unwrap()
    }

    pub fn entries(&self) -> &[ProvenanceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries for a given activity name, in log order.
    pub fn activities(&self, activity: &str) -> impl Iterator<Item = &ProvenanceEntry> {
        self.entries.iter().filter(move |e| e.activity == activity)
    }
}

/// Short code used inside provenance identifiers.
fn activity_code(activity: &str) -> &'static str {
    match activity {
        "detrend" => "dt",
        "taper" => "tp",
        "cut" => "ct",
        "pad" => "pd",
        "strip_pad" => "sp",
        "lowpass_filter" => "lp",
        "highpass_filter" => "hp",
        "bandpass_filter" => "bp",
        "bandstop_filter" => "bs",
        "remove_response" => "rr",
        "integrate" => "ig",
        "differentiate" => "dv",
        "resample" => "rs",
        "calculate_snr" => "sn",
        "get_corner_frequencies" => "cf",
        "signal_split" => "ss",
        "signal_end" => "se",
        _ => "op",
    }
}
