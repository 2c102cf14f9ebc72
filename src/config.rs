//! Layered configuration.
//!
//! A built-in default document ships embedded in the crate; user overlay
//! documents merge over it key-by-key (maps merge recursively, lists and
//! scalars replace wholesale, so the `processing` list can be reordered
//! as a unit). The merged document deserializes into the
//! typed sections consumed by the engine.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::DuplicatePrefs;
use crate::error::{GmError, Result};

const DEFAULT_CONFIG_JSON: &str = include_str!("../data/default_config.json");

static DEFAULT_CONFIG: OnceLock<Config> = OnceLock::new();

// ─── Top level ──────────────────────────────────────────────────────

/// Fully merged engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub processing: Vec<ProgramEntry>,
    pub check_stream: CheckStreamConfig,
    pub windows: WindowsConfig,
    pub pickers: PickersConfig,
    pub metrics: MetricsConfig,
    pub integration: IntegrationConfig,
    pub differentiation: DifferentiationConfig,
    pub colocated: ColocatedConfig,
    pub duplicate: DuplicatePrefs,
    /// Tectonic regime -> ground-motion model abbreviation
    pub gmm_selection: BTreeMap<String, String>,
}

impl Config {
    /// The built-in default configuration.
    pub fn default_config() -> &'static Config {
        DEFAULT_CONFIG.get_or_init(|| {
            serde_json::from_str(DEFAULT_CONFIG_JSON).expect("embedded default config is valid")
        })
    }

    /// Merge user overlay documents over the built-in default and
    /// deserialize.
    pub fn from_overlays(overlays: &[Value]) -> Result<Config> {
        let mut merged: Value = serde_json::from_str(DEFAULT_CONFIG_JSON)?;
        for overlay in overlays {
            merge_values(&mut merged, overlay);
        }
        let config: Config = serde_json::from_value(merged)
            .map_err(|e| GmError::Config(format!("invalid configuration: {e}")))?;
        Ok(config)
    }
}

/// Deep merge: maps merge key-by-key recursively; everything else (lists
/// included) replaces wholesale.
pub fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

// ─── Processing program ─────────────────────────────────────────────

/// One program entry: a step name and its parameter map.
///
/// Serialized as a single-key map, `{"detrend": {"detrending_method": "linear"}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramEntry {
    pub name: String,
    pub params: Value,
}

impl Serialize for ProgramEntry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serde_json::Map::new();
        map.insert(self.name.clone(), self.params.clone());
        Value::Object(map).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProgramEntry {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let map = serde_json::Map::deserialize(deserializer)?;
        if map.len() != 1 {
            return Err(serde::de::Error::custom(format!(
                "processing entry must have exactly one step name, got {}",
                map.len()
            )));
        }
        let (name, params) = map.into_iter().next().unwrap();
        Ok(ProgramEntry { name, params })
    }
}

// ─── Sections ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CheckStreamConfig {
    /// Fail the whole stream when any member trace fails
    pub any_trace_failures: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WindowsConfig {
    /// Place the split at the record start (no noise window)
    pub no_noise: bool,
    pub signal_end: SignalEndConfig,
    pub window_checks: WindowChecksConfig,
    /// Per-tectonic-regime signal-end overrides
    pub regions: BTreeMap<String, RegionWindows>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RegionWindows {
    pub signal_end: SignalEndConfig,
}

/// How the signal end time is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignalEndMethod {
    #[default]
    Model,
    SourcePath,
    Velocity,
    Magnitude,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalEndConfig {
    pub method: SignalEndMethod,
    /// Shaking-duration model abbreviation (`model` method)
    pub model: String,
    /// Number of standard deviations added to the duration model
    pub epsilon: f64,
    /// Minimum apparent velocity in km/s (`velocity` method)
    pub vmin: f64,
    /// Duration floor in seconds (`velocity` method)
    pub floor: f64,
    /// Stress drop in bars (`source_path` method)
    pub stress_drop: f64,
    /// Constant duration term in seconds (`source_path` method)
    pub dur0: f64,
    /// Distance duration coefficient in s/km (`source_path` method)
    pub dur1: f64,
}

impl Default for SignalEndConfig {
    fn default() -> Self {
        Self {
            method: SignalEndMethod::Model,
            model: "AS16".into(),
            epsilon: 3.0,
            vmin: 1.0,
            floor: 120.0,
            stress_drop: 10.0,
            dur0: 10.0,
            dur1: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowChecksConfig {
    pub enabled: bool,
    pub min_noise_duration: f64,
    pub min_signal_duration: f64,
}

impl Default for WindowChecksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_noise_duration: 1.0,
            min_signal_duration: 5.0,
        }
    }
}

// ─── Pickers ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickersConfig {
    /// Constant shift applied to the combined pick, seconds (negative
    /// moves the split earlier)
    pub p_arrival_shift: f64,
    /// Pickers to run, in order
    pub methods: Vec<String>,
    /// How candidate picks combine ("median" or "mean")
    pub combine: String,
    /// Candidates further than this from the travel-time estimate are
    /// discarded, seconds
    pub window: f64,
    /// Disagreement beyond this logs a warning, seconds
    pub pick_travel_time_warning: f64,
    pub travel_time: TravelTimeConfig,
    pub ar_aic: ArAicConfig,
    pub baer: BaerConfig,
    pub kalkan: KalkanConfig,
    pub power: PowerPickerConfig,
}

impl Default for PickersConfig {
    fn default() -> Self {
        Self {
            p_arrival_shift: -1.0,
            methods: vec![
                "travel_time".into(),
                "ar_aic".into(),
                "baer".into(),
                "power".into(),
                "kalkan".into(),
            ],
            combine: "median".into(),
            window: 10.0,
            pick_travel_time_warning: 3.0,
            travel_time: TravelTimeConfig::default(),
            ar_aic: ArAicConfig::default(),
            baer: BaerConfig::default(),
            kalkan: KalkanConfig::default(),
            power: PowerPickerConfig::default(),
        }
    }
}

/// Horizontally layered 1-D P-velocity model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelTimeConfig {
    pub layers: Vec<VelocityLayer>,
    pub halfspace_vp_km_s: f64,
}

impl Default for TravelTimeConfig {
    fn default() -> Self {
        Self {
            layers: vec![
                VelocityLayer {
                    thickness_km: 4.0,
                    vp_km_s: 5.0,
                },
                VelocityLayer {
                    thickness_km: 24.0,
                    vp_km_s: 6.3,
                },
                VelocityLayer {
                    thickness_km: 12.0,
                    vp_km_s: 6.7,
                },
            ],
            halfspace_vp_km_s: 8.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityLayer {
    pub thickness_km: f64,
    pub vp_km_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArAicConfig {
    /// AR model order fit on the leading noise
    pub order: usize,
    /// Characteristic-function high-pass corner, Hz
    pub f1: f64,
    /// Seconds of leading record assumed to be noise
    pub lta_seconds: f64,
}

impl Default for ArAicConfig {
    fn default() -> Self {
        Self {
            order: 4,
            f1: 1.0,
            lta_seconds: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaerConfig {
    /// Samples the CF may dip below threshold before the trigger resets
    pub tdownmax: usize,
    /// Samples the CF must stay above threshold to accept the trigger
    pub tupevent: usize,
    pub thr1: f64,
    pub thr2: f64,
    /// Leading samples used to estimate the noise statistics
    pub preset_len: usize,
}

impl Default for BaerConfig {
    fn default() -> Self {
        Self {
            tdownmax: 20,
            tupevent: 60,
            thr1: 7.0,
            thr2: 12.0,
            preset_len: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalkanConfig {
    /// Oscillator natural period, seconds
    pub period: f64,
    /// Oscillator damping ratio
    pub damping: f64,
}

impl Default for KalkanConfig {
    fn default() -> Self {
        Self {
            period: 0.01,
            damping: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerPickerConfig {
    pub highpass: f64,
    pub lowpass: f64,
    pub window_seconds: f64,
    pub threshold: f64,
}

impl Default for PowerPickerConfig {
    fn default() -> Self {
        Self {
            highpass: 1.4,
            lowpass: 6.0,
            window_seconds: 2.0,
            threshold: 5.0,
        }
    }
}

// ─── Metrics ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Component name -> metric types computed for it
    pub components_and_types: BTreeMap<String, Vec<String>>,
    pub component_parameters: ComponentParameters,
    pub type_parameters: TypeParameters,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let mut components_and_types = BTreeMap::new();
        components_and_types.insert(
            "channels".to_string(),
            vec!["pga".into(), "pgv".into(), "sa".into()],
        );
        components_and_types.insert("rotd".to_string(), vec!["pga".into(), "sa".into()]);
        Self {
            components_and_types,
            component_parameters: ComponentParameters::default(),
            type_parameters: TypeParameters::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ComponentParameters {
    pub rotd: RotDParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotDParameters {
    pub percentiles: Vec<f64>,
}

impl Default for RotDParameters {
    fn default() -> Self {
        Self {
            percentiles: vec![50.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TypeParameters {
    pub sa: SaParameters,
    pub fas: FasParameters,
    pub duration: DurationParameters,
    pub cav: CavParameters,
    pub sorted_duration: SortedDurationParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaParameters {
    /// Damping ratios (fraction of critical)
    pub damping: Vec<f64>,
    /// Oscillator periods in seconds
    pub periods: Vec<f64>,
}

impl Default for SaParameters {
    fn default() -> Self {
        Self {
            damping: vec![0.05],
            periods: vec![0.3, 1.0, 3.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FasParameters {
    pub smoothing_method: String,
    pub smoothing_parameter: f64,
    pub allow_nans: bool,
    pub frequencies: FrequencyGrid,
}

impl Default for FasParameters {
    fn default() -> Self {
        Self {
            smoothing_method: "konno_ohmachi".into(),
            smoothing_parameter: 20.0,
            // NaN ordinates do not survive JSON output; grid points
            // outside the usable band are zeroed instead
            allow_nans: false,
            frequencies: FrequencyGrid::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyGrid {
    pub start: f64,
    pub stop: f64,
    pub num: usize,
}

impl Default for FrequencyGrid {
    fn default() -> Self {
        Self {
            start: 0.001,
            stop: 100.0,
            num: 401,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationParameters {
    /// Arias-intensity intervals, e.g. "5-75"
    pub intervals: Vec<String>,
}

impl Default for DurationParameters {
    fn default() -> Self {
        Self {
            intervals: vec!["5-75".into(), "5-95".into()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CavParameters {
    /// Acceleration threshold in cm/s^2; samples below it do not
    /// accumulate
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SortedDurationParameters {
    pub highest_usable_frequency: Option<f64>,
}

// ─── Integration / differentiation ──────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IntegrationConfig {
    /// Frequency-domain integration instead of cumulative trapezoid
    pub frequency: bool,
    pub initial: f64,
    pub demean: bool,
    pub taper: TaperConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaperConfig {
    /// Apply the taper at all
    pub taper: bool,
    #[serde(rename = "type")]
    pub taper_type: String,
    pub width: f64,
    pub side: String,
}

impl Default for TaperConfig {
    fn default() -> Self {
        Self {
            taper: false,
            taper_type: "hann".into(),
            width: 0.05,
            side: "both".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentiationConfig {
    pub frequency: bool,
}

impl Default for DifferentiationConfig {
    fn default() -> Self {
        Self { frequency: true }
    }
}

// ─── Colocated ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColocatedConfig {
    /// Band+instrument codes, most preferred first
    pub preference: Vec<String>,
    /// Optional magnitude/distance dependent override
    pub large_dist: Option<LargeDistConfig>,
}

impl Default for ColocatedConfig {
    fn default() -> Self {
        Self {
            preference: vec!["HN".into(), "BN".into(), "HH".into(), "BH".into()],
            large_dist: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LargeDistConfig {
    pub preference: Vec<String>,
    /// Magnitude breakpoints
    pub mag: Vec<f64>,
    /// Distance thresholds in km, one per magnitude bin
    pub dist: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_default_parses() {
        let config = Config::default_config();
        assert!(!config.processing.is_empty());
        assert!(config.check_stream.any_trace_failures);
        assert_eq!(config.windows.signal_end.method, SignalEndMethod::Model);
        assert_eq!(config.pickers.methods.len(), 5);
    }

    #[test]
    fn program_entry_roundtrip() {
        let json = json!({"detrend": {"detrending_method": "linear"}});
        let entry: ProgramEntry = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(entry.name, "detrend");
        assert_eq!(entry.params["detrending_method"], "linear");
        assert_eq!(serde_json::to_value(&entry).unwrap(), json);
    }

    #[test]
    fn program_entry_rejects_multi_key() {
        let json = json!({"detrend": {}, "taper": {}});
        assert!(serde_json::from_value::<ProgramEntry>(json).is_err());
    }

    #[test]
    fn merge_maps_key_by_key() {
        let mut base = json!({"windows": {"no_noise": false, "signal_end": {"method": "model"}}});
        let overlay = json!({"windows": {"no_noise": true}});
        merge_values(&mut base, &overlay);
        assert_eq!(base["windows"]["no_noise"], true);
        // Sibling keys survive
        assert_eq!(base["windows"]["signal_end"]["method"], "model");
    }

    #[test]
    fn merge_replaces_lists_wholesale() {
        let mut base = json!({"processing": [{"detrend": {}}, {"taper": {}}]});
        let overlay = json!({"processing": [{"cut": {}}]});
        merge_values(&mut base, &overlay);
        assert_eq!(base["processing"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn overlay_reorders_processing_list() {
        let overlay = json!({
            "processing": [
                {"detrend": {"detrending_method": "demean"}},
                {"check_tail": {"duration": 10.0}}
            ]
        });
        let config = Config::from_overlays(&[overlay]).unwrap();
        assert_eq!(config.processing.len(), 2);
        assert_eq!(config.processing[0].name, "detrend");
        assert_eq!(config.processing[1].name, "check_tail");
        assert_eq!(config.processing[1].params["duration"], 10.0);
    }

    #[test]
    fn overlay_scalar_override_keeps_rest() {
        let overlay = json!({"windows": {"window_checks": {"min_signal_duration": 10.0}}});
        let config = Config::from_overlays(&[overlay]).unwrap();
        assert_eq!(config.windows.window_checks.min_signal_duration, 10.0);
        // Untouched sibling stays at the embedded default
        assert_eq!(config.windows.window_checks.min_noise_duration, 1.0);
        assert!(config.windows.window_checks.enabled);
    }

    #[test]
    fn later_overlays_win() {
        let first = json!({"check_stream": {"any_trace_failures": false}});
        let second = json!({"check_stream": {"any_trace_failures": true}});
        let config = Config::from_overlays(&[first, second]).unwrap();
        assert!(config.check_stream.any_trace_failures);
    }

    #[test]
    fn invalid_overlay_is_config_error() {
        let overlay = json!({"windows": {"signal_end": {"method": "nonsense"}}});
        let err = Config::from_overlays(&[overlay]).unwrap_err();
        assert!(matches!(err, GmError::Config(_)));
    }

    #[test]
    fn gmm_selection_present_in_default() {
        let config = Config::default_config();
        assert!(config.gmm_selection.contains_key("ActiveShallow"));
    }

    #[test]
    fn duplicate_prefs_deserialized() {
        let config = Config::default_config();
        assert_eq!(
            config.duplicate.process_levels.first(),
            Some(&crate::trace::ProcessLevel::V1)
        );
    }
}
