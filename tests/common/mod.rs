//! Shared fixtures: synthetic strong-motion records with controllable
//! onset, bandwidth and instrument metadata.
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use strongmotion_rs::dsp::filter::{FilterBand, filter_frequency_domain};
use strongmotion_rs::response::{
    InstrumentResponse, InstrumentSensitivity, PolesZeros, ResponseStage, TransferFunctionType,
};
use strongmotion_rs::trace::{ProcessLevel, Trace, TraceStats, UnitsType};
use strongmotion_rs::{ScalarEvent, Stream};
use std::collections::BTreeMap;

/// M 6.4 event; the fixture station sits about 60 km away.
pub fn test_event() -> ScalarEvent {
    ScalarEvent::new(
        "ci38457511",
        Utc.with_ymd_and_hms(2019, 7, 6, 3, 19, 53).unwrap(),
        35.7695,
        -117.5993,
        8.0,
        6.4,
    )
}

/// Deterministic xorshift noise in [-0.5, 0.5].
pub struct NoiseGen(u64);

impl NoiseGen {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next(&mut self) -> f64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 as f64 / u64::MAX as f64) - 0.5
    }
}

/// Band-limited noise burst: quiet background, then an enveloped
/// broadband arrival at `onset` seconds. Peak of the signal part is
/// scaled to `peak`.
pub fn burst_record(
    dt: f64,
    total_secs: f64,
    onset_secs: f64,
    band: (f64, f64),
    peak: f64,
    noise_amp: f64,
    seed: u64,
) -> Vec<f64> {
    let n = (total_secs / dt) as usize;
    let onset = (onset_secs / dt) as usize;
    let mut rng = NoiseGen::new(seed);
    let white: Vec<f64> = (0..n).map(|_| rng.next()).collect();
    let banded = filter_frequency_domain(
        &white,
        dt,
        FilterBand::Bandpass {
            f1: band.0,
            f2: band.1,
        },
        4,
        2,
    );
    let mut signal: Vec<f64> = banded
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if i < onset {
                0.0
            } else {
                let t = (i - onset) as f64 * dt;
                v * (1.0 - (-t / 1.5).exp()) * (-t / 25.0).exp()
            }
        })
        .collect();
    let sig_peak = signal.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if sig_peak > 0.0 {
        for v in signal.iter_mut() {
            *v *= peak / sig_peak;
        }
    }
    let mut bg = NoiseGen::new(seed.wrapping_mul(31).wrapping_add(7));
    signal
        .iter()
        .map(|&v| v + bg.next() * 2.0 * noise_amp)
        .collect()
}

/// Flat accelerometer response: unity poles/zeros stage plus digitizer
/// stage whose gains multiply to `sensitivity` counts per m/s^2.
pub fn accelerometer_response(sensitivity: f64) -> InstrumentResponse {
    InstrumentResponse {
        sensitivity: Some(InstrumentSensitivity {
            value: sensitivity,
            frequency: 1.0,
            input_units: "M/S**2".into(),
            output_units: "COUNTS".into(),
        }),
        stages: vec![
            ResponseStage {
                number: 1,
                gain: sensitivity / 1000.0,
                gain_frequency: 1.0,
                input_units: "M/S**2".into(),
                output_units: "V".into(),
                poles_zeros: Some(PolesZeros {
                    transfer_function_type: TransferFunctionType::LaplaceRadiansPerSecond,
                    normalization_factor: 1.0,
                    normalization_frequency: 1.0,
                    zeros: vec![],
                    poles: vec![],
                }),
            },
            ResponseStage {
                number: 2,
                gain: 1000.0,
                gain_frequency: 1.0,
                input_units: "V".into(),
                output_units: "COUNTS".into(),
                poles_zeros: None,
            },
        ],
    }
}

pub struct StationSpec {
    pub network: &'static str,
    pub station: &'static str,
    pub latitude: f64,
    pub longitude: f64,
    pub source_format: &'static str,
    pub process_level: ProcessLevel,
}

impl Default for StationSpec {
    fn default() -> Self {
        // ~60 km north-east of the fixture epicentre
        Self {
            network: "CI",
            station: "CLC",
            latitude: 36.25,
            longitude: -117.35,
            source_format: "mseed",
            process_level: ProcessLevel::V1,
        }
    }
}

/// Build one raw-count trace carrying full response metadata.
pub fn counts_trace(
    spec: &StationSpec,
    channel: &str,
    azimuth: f64,
    dip: f64,
    counts: Vec<f64>,
    dt: f64,
    sensitivity: f64,
) -> Trace {
    let stats = TraceStats {
        start_time: test_event().origin_time,
        delta: dt,
        npts: counts.len(),
        network: spec.network.into(),
        station: spec.station.into(),
        location: "--".into(),
        channel: channel.into(),
        azimuth: Some(azimuth),
        dip: Some(dip),
        latitude: spec.latitude,
        longitude: spec.longitude,
        elevation: 700.0,
        process_level: spec.process_level,
        units: "counts".into(),
        units_type: UnitsType::Counts,
        source_format: spec.source_format.into(),
        structure_type: None,
        format_specific: BTreeMap::new(),
    };
    let mut tr = Trace::new(stats, counts).unwrap();
    tr.set_response(accelerometer_response(sensitivity));
    tr
}

/// Three-component strong-motion stream for the default station: 120 s
/// records at 100 Hz, broadband arrival near `onset_secs`, peak ground
/// acceleration about `peak_m_s2` m/s^2.
pub fn strong_motion_stream(onset_secs: f64, peak_m_s2: f64, band: (f64, f64)) -> Stream {
    let dt = 0.01;
    let sensitivity = 1.0e5; // counts per m/s^2
    let spec = StationSpec::default();
    let make = |channel: &str, azimuth: f64, dip: f64, seed: u64, amp: f64| {
        let acc = burst_record(dt, 120.0, onset_secs, band, amp, 2e-4, seed);
        let counts: Vec<f64> = acc.iter().map(|a| a * sensitivity).collect();
        counts_trace(&spec, channel, azimuth, dip, counts, dt, sensitivity)
    };
    Stream::new(vec![
        make("HNE", 90.0, 0.0, 0x1111_2222, peak_m_s2),
        make("HNN", 0.0, 0.0, 0x3333_4444, peak_m_s2 * 0.9),
        make("HNZ", 0.0, -90.0, 0x5555_6666, peak_m_s2 * 0.5),
    ])
    .unwrap()
}
