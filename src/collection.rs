//! Grouping raw traces into station streams and resolving duplicates.
//!
//! Readers hand the engine a flat list of traces; grouping combines traces
//! that share a sensor instance into [`Stream`]s, drops duplicates coming
//! from multiple data sources, and optionally keeps only the preferred
//! instrument where a station hosts colocated sensors.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::error::Result;
use crate::event::{ScalarEvent, haversine_km};
use crate::stream::Stream;
use crate::trace::{ProcessLevel, Trace};

/// Tie-break preferences for duplicate streams, from the `duplicate`
/// config section.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DuplicatePrefs {
    /// Process levels, most preferred first
    pub process_levels: Vec<ProcessLevel>,
    /// Source formats, most preferred first
    pub formats: Vec<String>,
    /// Location codes, most preferred first
    pub location_codes: Vec<String>,
    /// Streams from stations closer than this are duplicate candidates
    pub spatial_tolerance_km: f64,
}

impl Default for DuplicatePrefs {
    fn default() -> Self {
        Self {
            process_levels: vec![ProcessLevel::V1, ProcessLevel::V0, ProcessLevel::V2],
            formats: vec!["cosmos".into(), "mseed".into()],
            location_codes: vec!["--".into(), "00".into(), "10".into()],
            spatial_tolerance_km: 0.1,
        }
    }
}

/// The streams of a single event.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StreamCollection {
    streams: Vec<Stream>,
}

impl StreamCollection {
    pub fn new(streams: Vec<Stream>) -> Self {
        Self { streams }
    }

    /// Group a flat list of raw traces into streams and resolve
    /// duplicates.
    ///
    /// Traces that cannot be combined into a consistent stream are
    /// returned as single-trace streams so their diagnostics survive.
    pub fn from_traces(traces: Vec<Trace>, prefs: &DuplicatePrefs) -> Self {
        let (streams, errors) = group_traces(traces);
        for err in &errors {
            warn!("inconsistent trace group split into single traces: {err}");
        }
        let mut collection = Self { streams };
        collection.resolve_duplicates(prefs);
        collection
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn streams_mut(&mut self) -> &mut [Stream] {
        &mut self.streams
    }

    pub fn into_streams(self) -> Vec<Stream> {
        self.streams
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn push(&mut self, stream: Stream) {
        self.streams.push(stream);
    }

    /// Streams that are still passing.
    pub fn passing(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter().filter(|s| s.passed())
    }

    /// Drop all but the best of each duplicate set.
    ///
    /// Two streams are duplicates when they share network and station,
    /// record the same band+instrument code, and their sensors lie within
    /// the spatial tolerance. The survivor is picked by the preference
    /// total order.
    pub fn resolve_duplicates(&mut self, prefs: &DuplicatePrefs) {
        let mut keep: Vec<Stream> = Vec::new();
        for stream in self.streams.drain(..) {
            match keep.iter_mut().find(|k| are_duplicates(k, &stream, prefs)) {
                Some(existing) => {
                    if preference_rank(&stream, prefs) < preference_rank(existing, prefs) {
                        debug!("duplicate: keeping {} over {}", stream.id(), existing.id());
                        *existing = stream;
                    } else {
                        debug!("duplicate: dropping {}", stream.id());
                    }
                }
                None => keep.push(stream),
            }
        }
        self.streams = keep;
    }

    /// Where a station hosts colocated instruments (e.g. HN and HH),
    /// keep only the most preferred instrument code.
    pub fn prefer_colocated(&mut self, preference: &[String]) {
        self.prefer_colocated_by(|_| preference);
    }

    /// Colocated preference with the optional magnitude/distance
    /// override: distant stations of large events switch to the
    /// alternative preference list (broadband sensors stay on scale
    /// there).
    pub fn apply_colocated(&mut self, cfg: &crate::config::ColocatedConfig, event: &ScalarEvent) {
        let Some(large_dist) = &cfg.large_dist else {
            self.prefer_colocated(&cfg.preference);
            return;
        };
        self.prefer_colocated_by(|stats| {
            let dist = event.epicentral_distance_km(stats.latitude, stats.longitude);
            let mut bin = None;
            for (i, &m) in large_dist.mag.iter().enumerate() {
                if event.magnitude >= m {
                    bin = Some(i);
                }
            }
            let threshold = bin
                .and_then(|i| large_dist.dist.get(i))
                .copied()
                .unwrap_or(f64::INFINITY);
            if dist > threshold {
                &large_dist.preference
            } else {
                &cfg.preference
            }
        });
    }

    fn prefer_colocated_by<'a, F>(&mut self, preference_for: F)
    where
        F: Fn(&crate::trace::TraceStats) -> &'a [String],
    {
        let rank_of = |stream: &Stream| -> (String, usize) {
            let st = stream.traces()[0].stats();
            let station = format!("{}.{}", st.network, st.station);
            let band_inst: String = st.channel.chars().take(2).collect();
            let preference = preference_for(st);
            let rank = preference
                .iter()
                .position(|p| *p == band_inst)
                .unwrap_or(preference.len());
            (station, rank)
        };
        let mut best: BTreeMap<String, usize> = BTreeMap::new();
        for stream in &self.streams {
            let (station, rank) = rank_of(stream);
            best.entry(station)
                .and_modify(|r| *r = (*r).min(rank))
                .or_insert(rank);
        }
        self.streams.retain(|stream| {
            let (station, rank) = rank_of(stream);
            let keep = best.get(&station).is_none_or(|&r| rank <= r);
            if !keep {
                debug!("colocated: dropping {}", stream.id());
            }
            keep
        });
    }
}

fn are_duplicates(a: &Stream, b: &Stream, prefs: &DuplicatePrefs) -> bool {
    let sa = a.traces()[0].stats();
    let sb = b.traces()[0].stats();
    if sa.network != sb.network || sa.station != sb.station {
        return false;
    }
    // Same recorded channel set (duplicates carry the same components)
    let mut chans_a: Vec<&str> = a.traces().iter().map(|t| t.stats().channel.as_str()).collect();
    let mut chans_b: Vec<&str> = b.traces().iter().map(|t| t.stats().channel.as_str()).collect();
    chans_a.sort_unstable();
    chans_b.sort_unstable();
    if chans_a != chans_b {
        return false;
    }
    haversine_km(sa.latitude, sa.longitude, sb.latitude, sb.longitude)
        <= prefs.spatial_tolerance_km
}

/// Total-order rank of a stream under the duplicate preferences; lower is
/// better. Ordering: process level, source format, earliest start, most
/// samples, highest rate, preferred location code.
fn preference_rank(
    stream: &Stream,
    prefs: &DuplicatePrefs,
) -> (usize, usize, i64, i64, i64, usize) {
    let st = stream.traces()[0].stats();
    let level = prefs
        .process_levels
        .iter()
        .position(|p| *p == st.process_level)
        .unwrap_or(prefs.process_levels.len());
    let format = prefs
        .formats
        .iter()
        .position(|f| *f == st.source_format)
        .unwrap_or(prefs.formats.len());
    let start = st.start_time.timestamp_nanos_opt().unwrap_or(i64::MAX);
    let npts = -(st.npts as i64);
    let rate = -((st.sampling_rate() * 1e6) as i64);
    let loc = prefs
        .location_codes
        .iter()
        .position(|l| *l == st.location)
        .unwrap_or(prefs.location_codes.len());
    (level, format, start, npts, rate, loc)
}

/// Group traces with pre-validation, reporting inconsistent groups.
///
/// Unlike [`StreamCollection::from_traces`] this returns the grouping
/// errors so callers can surface them.
pub fn group_traces(traces: Vec<Trace>) -> (Vec<Stream>, Vec<crate::error::GmError>) {
    let mut groups: BTreeMap<String, Vec<Trace>> = BTreeMap::new();
    for tr in traces {
        let st = tr.stats();
        let band_inst: String = st.channel.chars().take(2).collect();
        let key = format!(
            "{}.{}.{}.{}.{}",
            st.network, st.station, st.location, band_inst, st.source_format
        );
        groups.entry(key).or_default().push(tr);
    }
    let mut streams = Vec::new();
    let mut errors = Vec::new();
    for (_, members) in groups {
        let singles: Result<Stream> = Stream::new(members.clone());
        match singles {
            Ok(stream) => streams.push(stream),
            Err(err) => {
                errors.push(err);
                for tr in members {
                    if let Ok(stream) = Stream::new(vec![tr]) {
                        streams.push(stream);
                    }
                }
            }
        }
    }
    (streams, errors)
}
