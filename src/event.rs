//! Scalar earthquake descriptor.
//!
//! A [`ScalarEvent`] is the minimal event view the engine needs: origin
//! time, hypocentre and magnitude. It is a shared read-only input to the
//! windowing engine, the corner-frequency subsystem and the metric engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in km (WGS84 authalic).
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A point-source earthquake description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    /// Event identifier (e.g. "us7000abcd")
    pub id: String,
    /// Origin time (UTC)
    pub origin_time: DateTime<Utc>,
    /// Hypocentre latitude in decimal degrees
    pub latitude: f64,
    /// Hypocentre longitude in decimal degrees
    pub longitude: f64,
    /// Hypocentre depth in km (positive down)
    pub depth_km: f64,
    /// Magnitude value
    pub magnitude: f64,
    /// Magnitude type (e.g. "mw", "ml")
    #[serde(default)]
    pub magnitude_type: Option<String>,
    /// Tectonic regime classification (e.g. "ActiveShallow",
    /// "SubductionInterface"), when known
    #[serde(default)]
    pub tectonic_regime: Option<String>,
}

impl ScalarEvent {
    pub fn new(
        id: impl Into<String>,
        origin_time: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        depth_km: f64,
        magnitude: f64,
    ) -> Self {
        Self {
            id: id.into(),
            origin_time,
            latitude,
            longitude,
            depth_km,
            magnitude,
            magnitude_type: None,
            tectonic_regime: None,
        }
    }

    /// Great-circle (epicentral) distance to a point, in km.
    pub fn epicentral_distance_km(&self, lat: f64, lon: f64) -> f64 {
        haversine_km(self.latitude, self.longitude, lat, lon)
    }

    /// Hypocentral distance to a surface point, in km.
    ///
    /// Sensor elevation is ignored; the depth term dominates at the
    /// distances the engine cares about.
    pub fn hypocentral_distance_km(&self, lat: f64, lon: f64) -> f64 {
        let epi = self.epicentral_distance_km(lat, lon);
        (epi * epi + self.depth_km * self.depth_km).sqrt()
    }
}

/// Haversine great-circle distance between two points in km.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}
