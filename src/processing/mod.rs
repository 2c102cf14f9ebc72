//! Processing program scheduler.
//!
//! The program is the ordered `processing` list from the configuration.
//! Step names resolve through a registry built once at startup; unknown
//! names are a configuration error surfaced before any stream is touched.
//! Execution iterates the program, and for each step iterates streams,
//! skipping streams that have already failed. After every step, trace
//! failures optionally propagate to the stream
//! (`check_stream.any_trace_failures`).
//!
//! Streams are independent: the parallel driver partitions them across a
//! rayon pool, each worker running the full program sequentially on its
//! share. Cancellation is cooperative at step boundaries.

pub mod steps;

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::debug;
use rayon::prelude::*;
use serde_json::Value;

use crate::config::Config;
use crate::error::{GmError, Result};
use crate::event::ScalarEvent;
use crate::stream::Stream;

/// A registered processing step.
pub type StepFn = fn(&mut Stream, &ScalarEvent, &Value, &Config) -> Result<()>;

static REGISTRY: OnceLock<BTreeMap<&'static str, StepFn>> = OnceLock::new();

/// The step registry, built on first use.
pub fn registry() -> &'static BTreeMap<&'static str, StepFn> {
    REGISTRY.get_or_init(|| {
        let mut table: BTreeMap<&'static str, StepFn> = BTreeMap::new();
        table.insert("check_free_field", steps::check_free_field);
        table.insert("check_instrument", steps::check_instrument);
        table.insert("min_sample_rate", steps::min_sample_rate);
        table.insert("max_traces", steps::max_traces);
        table.insert("check_max_amplitude", steps::check_max_amplitude);
        table.insert("check_clipping", steps::check_clipping);
        table.insert("check_sta_lta", steps::check_sta_lta);
        table.insert("check_zero_crossings", steps::check_zero_crossings);
        table.insert("check_tail", steps::check_tail);
        table.insert("trim_multiple_events", steps::trim_multiple_events);
        table.insert("signal_split", steps::signal_split);
        table.insert("signal_end", steps::signal_end);
        table.insert("windows_check", steps::windows_check);
        table.insert("cut", steps::cut);
        table.insert("compute_snr", steps::compute_snr);
        table.insert("snr_check", steps::snr_check);
        table.insert("get_corner_frequencies", steps::get_corner_frequencies);
        table.insert("lowpass_max_frequency", steps::lowpass_max_frequency);
        table.insert("ridder_fchp", steps::ridder_fchp);
        table.insert("adjust_highpass_corner", steps::adjust_highpass_corner);
        table.insert("detrend", steps::detrend);
        table.insert("taper", steps::taper);
        table.insert("zero_pad", steps::zero_pad);
        table.insert("strip_zero_pad", steps::strip_zero_pad);
        table.insert("highpass_filter", steps::highpass_filter);
        table.insert("lowpass_filter", steps::lowpass_filter);
        table.insert("bandpass_filter", steps::bandpass_filter);
        table.insert("bandstop_filter", steps::bandstop_filter);
        table.insert("remove_response", steps::remove_response);
        table.insert("integrate", steps::integrate);
        table.insert("differentiate", steps::differentiate);
        table.insert("resample", steps::resample);
        table
    })
}

/// A validated program: every entry resolved against the registry.
#[derive(Debug)]
pub struct Program<'a> {
    entries: Vec<(&'static str, StepFn, &'a Value)>,
}

impl<'a> Program<'a> {
    /// Resolve the configured processing list. Unknown step names fail
    /// here, before any stream is touched.
    pub fn compile(config: &'a Config) -> Result<Self> {
        let table = registry();
        let mut entries = Vec::with_capacity(config.processing.len());
        for entry in &config.processing {
            match table.get_key_value(entry.name.as_str()) {
                Some((name, func)) => entries.push((*name, *func, &entry.params)),
                None => {
                    return Err(GmError::Config(format!(
                        "unknown processing step '{}'",
                        entry.name
                    )));
                }
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the whole program over one stream.
    ///
    /// Already-failed streams are skipped per step; trace failures
    /// propagate to the stream at the end of each step when configured.
    /// Cancellation is honoured between steps.
    pub fn run_on_stream(
        &self,
        stream: &mut Stream,
        event: &ScalarEvent,
        config: &Config,
        cancel: &AtomicBool,
    ) -> Result<()> {
        for (name, func, params) in &self.entries {
            if cancel.load(Ordering::Relaxed) {
                debug!("{}: cancelled before step {name}", stream.id());
                return Ok(());
            }
            if !stream.passed() {
                break;
            }
            func(stream, event, params, config)?;
            if config.check_stream.any_trace_failures {
                stream.propagate_trace_failures(name);
            }
        }
        Ok(())
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessingSummary {
    pub passed: usize,
    pub failed: usize,
}

/// Run the configured program over all streams, sequentially.
pub fn run_program(
    streams: &mut [Stream],
    event: &ScalarEvent,
    config: &Config,
) -> Result<ProcessingSummary> {
    let program = Program::compile(config)?;
    let cancel = AtomicBool::new(false);
    let mut summary = ProcessingSummary::default();
    for stream in streams.iter_mut() {
        program.run_on_stream(stream, event, config, &cancel)?;
        if stream.passed() {
            summary.passed += 1;
        } else {
            summary.failed += 1;
        }
    }
    Ok(summary)
}

/// Run the configured program with streams partitioned across the rayon
/// worker pool.
///
/// Each worker runs the full program sequentially on its streams, so
/// per-stream provenance ordering is identical to the sequential driver.
/// Setting `cancel` stops every worker at its next step boundary,
/// leaving partially processed streams behind (detectable from their
/// provenance logs).
pub fn run_program_parallel(
    streams: &mut [Stream],
    event: &ScalarEvent,
    config: &Config,
    cancel: &AtomicBool,
) -> Result<ProcessingSummary> {
    let program = Program::compile(config)?;
    let passed = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let results: Vec<Result<()>> = streams
        .par_iter_mut()
        .map(|stream| {
            program.run_on_stream(stream, event, config, cancel)?;
            if stream.passed() {
                passed.fetch_add(1, Ordering::Relaxed);
            } else {
                failed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        })
        .collect();
    for result in results {
        result?;
    }
    Ok(ProcessingSummary {
        passed: passed.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
    })
}
