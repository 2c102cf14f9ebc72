//! Persistence boundary.
//!
//! The engine reads events, streams and configuration from a
//! [`Workspace`] and writes labelled streams and auxiliary blobs back.
//! The trait mirrors the container interface (an ASDF file in
//! production); [`MemoryWorkspace`] is the in-memory reference
//! implementation used by the engine tests.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::{GmError, Result};
use crate::event::ScalarEvent;
use crate::stream::Stream;

/// Read/write boundary the engine runs against.
pub trait Workspace {
    fn event_ids(&self) -> Vec<String>;

    fn event(&self, event_id: &str) -> Result<ScalarEvent>;

    /// Streams of an event under a label ("unprocessed", "default", ...).
    /// `stations` filters by "NET.STA" when non-empty.
    fn streams(&self, event_id: &str, stations: &[String], label: &str) -> Result<Vec<Stream>>;

    fn config(&self) -> &Config;

    /// Store an auxiliary blob under `group/key`.
    fn insert_aux(&mut self, group: &str, key: &str, bytes: Vec<u8>) -> Result<()>;

    fn aux(&self, group: &str, key: &str) -> Option<&[u8]>;

    /// Persist streams (samples, metadata, parameters, provenance) under
    /// a label.
    fn set_streams(&mut self, event_id: &str, label: &str, streams: Vec<Stream>) -> Result<()>;
}

/// In-memory workspace.
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    events: BTreeMap<String, ScalarEvent>,
    /// (event_id, label) -> streams
    streams: BTreeMap<(String, String), Vec<Stream>>,
    aux: BTreeMap<(String, String), Vec<u8>>,
    config: Config,
}

impl MemoryWorkspace {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn add_event(&mut self, event: ScalarEvent) {
        self.events.insert(event.id.clone(), event);
    }
}

impl Workspace for MemoryWorkspace {
    fn event_ids(&self) -> Vec<String> {
        self.events.keys().cloned().collect()
    }

    fn event(&self, event_id: &str) -> Result<ScalarEvent> {
        self.events
            .get(event_id)
            .cloned()
            .ok_or_else(|| GmError::Data(format!("no event '{event_id}' in workspace")))
    }

    fn streams(&self, event_id: &str, stations: &[String], label: &str) -> Result<Vec<Stream>> {
        let streams = self
            .streams
            .get(&(event_id.to_string(), label.to_string()))
            .cloned()
            .unwrap_or_default();
        if stations.is_empty() {
            return Ok(streams);
        }
        Ok(streams
            .into_iter()
            .filter(|s| {
                let st = s.traces()[0].stats();
                let code = format!("{}.{}", st.network, st.station);
                stations.contains(&code)
            })
            .collect())
    }

    fn config(&self) -> &Config {
        &self.config
    }

    fn insert_aux(&mut self, group: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.aux
            .insert((group.to_string(), key.to_string()), bytes);
        Ok(())
    }

    fn aux(&self, group: &str, key: &str) -> Option<&[u8]> {
        self.aux
            .get(&(group.to_string(), key.to_string()))
            .map(|v| v.as_slice())
    }

    fn set_streams(&mut self, event_id: &str, label: &str, streams: Vec<Stream>) -> Result<()> {
        self.streams
            .insert((event_id.to_string(), label.to_string()), streams);
        Ok(())
    }
}
