//! Pure Rust strong-motion waveform processing engine.
//!
//! `strongmotion-rs` turns raw seismometer and accelerometer recordings
//! of earthquakes into quality-controlled, filtered, instrument-corrected
//! ground-motion time series and derived intensity metrics (PGA/PGV,
//! response spectra, Fourier amplitude spectra, Arias intensity, CAV,
//! significant durations).
//!
//! # Pipeline
//!
//! | Stage | Module |
//! |-------|--------|
//! | Trace/stream model, grouping, duplicates | [`trace`], [`stream`], [`collection`] |
//! | Signal/noise windowing (P pick, signal end, cut) | [`windows`], [`pickers`] |
//! | SNR, corner selection, Ridder refinement | [`snr`], [`corner`] |
//! | Instrument response removal | [`response`] |
//! | Filtering, detrending, QA checks | [`dsp`], [`checks`] |
//! | Program scheduler | [`processing`] |
//! | Metrics and output document | [`metrics`], [`gmpacket`] |
//!
//! # Quick Start
//!
//! ```no_run
//! use strongmotion_rs::{Config, ScalarEvent, StreamCollection, processing};
//!
//! let config = Config::default_config();
//! # let event: ScalarEvent = todo!();
//! # let traces = vec![];
//! let mut collection = StreamCollection::from_traces(traces, &config.duplicate);
//! let summary =
//!     processing::run_program(collection.streams_mut(), &event, config).unwrap();
//! println!("{} passed, {} failed", summary.passed, summary.failed);
//! ```
//!
//! Failures are recorded on traces and streams rather than raised; only
//! configuration errors surface as `Err` before any stream is touched.

pub mod checks;
pub mod collection;
pub mod config;
pub mod corner;
pub mod dsp;
pub mod error;
pub mod event;
pub mod gmpacket;
pub mod metrics;
pub mod pickers;
pub mod processing;
pub mod provenance;
pub mod response;
pub mod snr;
pub mod stream;
pub mod trace;
pub mod windows;
pub mod workspace;

pub use collection::{DuplicatePrefs, StreamCollection};
pub use config::Config;
pub use error::{FailureKind, FailureReason, GmError, Result};
pub use event::ScalarEvent;
pub use gmpacket::{GmPacket, build_packet, failure_table};
pub use metrics::{MetricRecord, MetricValue, MetricsCollection, compute_event_metrics};
pub use processing::{ProcessingSummary, run_program, run_program_parallel};
pub use provenance::{ProvenanceEntry, ProvenanceLog};
pub use response::{InstrumentResponse, InstrumentSensitivity, PolesZeros, ResponseStage};
pub use stream::Stream;
pub use trace::{Trace, TraceParam, TraceStats};
pub use workspace::{MemoryWorkspace, Workspace};

/// Process one event end-to-end against a workspace: read the raw
/// streams, run the configured program, persist the processed streams,
/// and return the metrics together with the failure table.
pub fn process_event(
    workspace: &mut dyn Workspace,
    event_id: &str,
    input_label: &str,
    output_label: &str,
) -> Result<(MetricsCollection, Vec<gmpacket::FailureRow>)> {
    let event = workspace.event(event_id)?;
    let config = workspace.config().clone();
    let mut streams = workspace.streams(event_id, &[], input_label)?;
    run_program(&mut streams, &event, &config)?;
    let metrics = compute_event_metrics(&streams, event_id, &config.metrics)?;
    let failures = failure_table(&streams);
    workspace.set_streams(event_id, output_label, streams)?;
    let packet = build_packet(&event, &metrics);
    workspace.insert_aux("gmpacket", event_id, serde_json::to_vec(&packet)?)?;
    Ok((metrics, failures))
}
