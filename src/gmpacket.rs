//! Ground-motion-packet output document and the failure diagnostic
//! table.
//!
//! Passing streams contribute metric entries; failed streams contribute
//! one diagnostic row each (step, failure kind, text) and no metrics.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FailureKind;
use crate::event::ScalarEvent;
use crate::metrics::{MetricValue, MetricsCollection};
use crate::stream::Stream;

/// Schema version of the emitted document.
pub const SCHEMA_VERSION: &str = "0.1";

/// Top-level output document, one per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmPacket {
    pub schema_version: String,
    pub event: PacketEvent,
    pub stations: Vec<PacketStation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketEvent {
    pub id: String,
    pub time: String,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketStation {
    /// "NET.STA"
    pub station_code: String,
    pub metrics: Vec<PacketMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketMetric {
    pub name: String,
    pub component: String,
    pub parameters: Value,
    pub value: MetricValue,
    pub units: String,
}

/// Assemble the packet from an event and its computed metrics.
pub fn build_packet(event: &ScalarEvent, metrics: &MetricsCollection) -> GmPacket {
    let mut stations: Vec<PacketStation> = Vec::new();
    for record in &metrics.records {
        let station = match stations
            .iter_mut()
            .find(|s| s.station_code == record.station)
        {
            Some(s) => s,
            None => {
                stations.push(PacketStation {
                    station_code: record.station.clone(),
                    metrics: Vec::new(),
                });
                stations.last_mut().unwrap()
            }
        };
        station.metrics.push(PacketMetric {
            name: record.metric_type.clone(),
            component: record.component.clone(),
            parameters: record.parameters.clone(),
            value: record.value.clone(),
            units: record.units.clone(),
        });
    }
    GmPacket {
        schema_version: SCHEMA_VERSION.to_string(),
        event: PacketEvent {
            id: event.id.clone(),
            time: event.origin_time.to_rfc3339(),
            latitude: event.latitude,
            longitude: event.longitude,
            depth_km: event.depth_km,
            magnitude: event.magnitude,
        },
        stations,
    }
}

// ─── Failure table ──────────────────────────────────────────────────

/// One diagnostic row for a failed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRow {
    pub stream_id: String,
    pub step: Option<String>,
    pub kind: FailureKind,
    pub text: String,
}

/// Collect one diagnostic row per failed stream (first stream-level
/// failure, else the first trace-level failure).
pub fn failure_table(streams: &[Stream]) -> Vec<FailureRow> {
    let mut rows = Vec::new();
    for stream in streams {
        if stream.passed() {
            continue;
        }
        let reason = stream
            .failures()
            .first()
            .cloned()
            .or_else(|| stream.traces().iter().find_map(|t| t.failure().cloned()));
        if let Some(reason) = reason {
            rows.push(FailureRow {
                stream_id: stream.id(),
                step: reason.step,
                kind: reason.kind,
                text: reason.text,
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use crate::metrics::MetricRecord;
    use crate::trace::Trace;
    use crate::trace::tests::stats;
    use chrono::TimeZone;
    use chrono::Utc;
    use serde_json::json;

    fn event() -> ScalarEvent {
        ScalarEvent::new(
            "ci38457511",
            Utc.with_ymd_and_hms(2019, 7, 6, 3, 19, 53).unwrap(),
            35.7695,
            -117.5993,
            8.0,
            7.1,
        )
    }

    fn collection() -> MetricsCollection {
        MetricsCollection {
            event_id: "ci38457511".into(),
            records: vec![
                MetricRecord {
                    station: "CI.CLC".into(),
                    component: "HNE".into(),
                    metric_type: "pga".into(),
                    parameters: json!({}),
                    value: MetricValue::Scalar(0.12),
                    units: "g".into(),
                },
                MetricRecord {
                    station: "CI.CLC".into(),
                    component: "rotd".into(),
                    metric_type: "pga".into(),
                    parameters: json!({"percentile": 50.0}),
                    value: MetricValue::Scalar(0.11),
                    units: "g".into(),
                },
                MetricRecord {
                    station: "CI.WRC2".into(),
                    component: "HNN".into(),
                    metric_type: "pgv".into(),
                    parameters: json!({}),
                    value: MetricValue::Scalar(14.0),
                    units: "cm/s".into(),
                },
            ],
        }
    }

    #[test]
    fn packet_groups_by_station() {
        let packet = build_packet(&event(), &collection());
        assert_eq!(packet.schema_version, SCHEMA_VERSION);
        assert_eq!(packet.stations.len(), 2);
        let clc = packet
            .stations
            .iter()
            .find(|s| s.station_code == "CI.CLC")
            .unwrap();
        assert_eq!(clc.metrics.len(), 2);
    }

    #[test]
    fn packet_serializes_to_json() {
        let packet = build_packet(&event(), &collection());
        let text = serde_json::to_string_pretty(&packet).unwrap();
        assert!(text.contains("\"pga\""));
        assert!(text.contains("\"rotd\""));
        let back: GmPacket = serde_json::from_str(&text).unwrap();
        assert_eq!(back, packet);
    }

    #[test]
    fn failure_table_one_row_per_failed_stream() {
        let make = || {
            Stream::new(vec![
                Trace::new(stats("HNE", 100, 0.01), vec![0.0; 100]).unwrap(),
            ])
            .unwrap()
        };
        let passing = make();
        let mut failed = make();
        failed.fail(FailureReason::new(
            FailureKind::QaCheckFail,
            "snr_check",
            "below threshold",
        ));
        let rows = failure_table(&[passing, failed]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].step.as_deref(), Some("snr_check"));
        assert_eq!(rows[0].kind, FailureKind::QaCheckFail);
    }
}
