//! Instrument response description and removal.
//!
//! A response is either a sequence of stages (poles/zeros + gain +
//! input/output units per stage) plus a scalar overall sensitivity, or the
//! sensitivity alone. Removal picks between full pole-zero deconvolution
//! (with pre-filter band and water-level regularization) and
//! sensitivity-only correction, gated by the consistency checks of the
//! metadata QA.
//!
//! All corrected output is acceleration in cm/s^2; seismometer records are
//! deconvolved to velocity and then differentiated.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::dsp::fft::{irfft, next_pow2, rfft, rfftfreq};
use crate::dsp::filter::cosine_sac_taper;
use crate::dsp::integrate::gradient;
use crate::error::{GmError, Result};
use crate::trace::InstrumentType;

/// m/s^2 to cm/s^2.
pub const M_TO_CM: f64 = 100.0;

// ─── Model ──────────────────────────────────────────────────────────

/// Laplace-domain convention of a poles/zeros transfer function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferFunctionType {
    /// `s = i * 2*pi*f`
    LaplaceRadiansPerSecond,
    /// `s = i * f`
    LaplaceHertz,
}

/// Poles/zeros block of one response stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolesZeros {
    pub transfer_function_type: TransferFunctionType,
    /// A0 normalization factor
    pub normalization_factor: f64,
    /// Frequency at which A0 normalizes the stage to unit gain, Hz
    pub normalization_frequency: f64,
    pub zeros: Vec<Complex64>,
    pub poles: Vec<Complex64>,
}

impl PolesZeros {
    /// Evaluate the normalized transfer function at `f` Hz.
    pub fn evaluate(&self, f: f64) -> Complex64 {
        let s = match self.transfer_function_type {
            TransferFunctionType::LaplaceRadiansPerSecond => {
                Complex64::new(0.0, 2.0 * std::f64::consts::PI * f)
            }
            TransferFunctionType::LaplaceHertz => Complex64::new(0.0, f),
        };
        let mut num = Complex64::new(self.normalization_factor, 0.0);
        for z in &self.zeros {
            num *= s - z;
        }
        let mut den = Complex64::new(1.0, 0.0);
        for p in &self.poles {
            den *= s - p;
        }
        num / den
    }
}

/// One stage of the response chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseStage {
    pub number: u32,
    /// Stage gain at `gain_frequency`
    pub gain: f64,
    pub gain_frequency: f64,
    pub input_units: String,
    pub output_units: String,
    #[serde(default)]
    pub poles_zeros: Option<PolesZeros>,
}

/// Overall sensitivity of the instrument, counts per physical unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSensitivity {
    pub value: f64,
    pub frequency: f64,
    pub input_units: String,
    pub output_units: String,
}

/// Full response description carried on a trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentResponse {
    #[serde(default)]
    pub sensitivity: Option<InstrumentSensitivity>,
    #[serde(default)]
    pub stages: Vec<ResponseStage>,
}

impl InstrumentResponse {
    /// Product of the stage gains.
    pub fn gain_product(&self) -> Option<f64> {
        if self.stages.is_empty() {
            return None;
        }
        Some(self.stages.iter().map(|s| s.gain).product())
    }

    /// Input units of the whole chain (first stage, else sensitivity).
    pub fn input_units(&self) -> Option<String> {
        self.stages
            .first()
            .map(|s| normalize_units(&s.input_units))
            .or_else(|| {
                self.sensitivity
                    .as_ref()
                    .map(|s| normalize_units(&s.input_units))
            })
    }

    /// True when the stage chain can be deconvolved: at least one
    /// poles/zeros stage, all gains positive, and each stage's output units
    /// feed the next stage's input units.
    pub fn stages_complete(&self) -> bool {
        if self.stages.is_empty() || !self.stages.iter().any(|s| s.poles_zeros.is_some()) {
            return false;
        }
        if self.stages.iter().any(|s| s.gain <= 0.0) {
            return false;
        }
        self.stages.windows(2).all(|pair| {
            normalize_units(&pair[0].output_units) == normalize_units(&pair[1].input_units)
        })
    }

    /// Evaluate the full response (all PZ stages times overall
    /// sensitivity) at `f` Hz, in counts per input unit.
    pub fn evaluate(&self, f: f64) -> Complex64 {
        let mut resp = Complex64::new(1.0, 0.0);
        for stage in &self.stages {
            if let Some(pz) = &stage.poles_zeros {
                resp *= pz.evaluate(f);
            }
        }
        let scale = self
            .sensitivity
            .as_ref()
            .map(|s| s.value)
            .or_else(|| self.gain_product())
            .unwrap_or(1.0);
        resp * scale
    }
}

/// Canonical unit spelling: uppercase, `M/S^2` and `M/S2` fold to
/// `M/S**2`.
pub fn normalize_units(units: &str) -> String {
    let u = units.trim().to_uppercase();
    match u.as_str() {
        "M/S^2" | "M/S2" | "M/SEC**2" | "M/SEC^2" => "M/S**2".to_string(),
        "M/SEC" => "M/S".to_string(),
        "COUNT" => "COUNTS".to_string(),
        _ => u,
    }
}

/// Expected chain input units for a sensor class.
fn expected_input_units(instrument: InstrumentType) -> &'static str {
    match instrument {
        InstrumentType::Accelerometer => "M/S**2",
        InstrumentType::Seismometer => "M/S",
    }
}

// ─── Removal ────────────────────────────────────────────────────────

/// Parameters for response removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRemovalOptions {
    /// Water level in dB for pole-zero deconvolution. `None` forces the
    /// sensitivity-only path.
    pub water_level: Option<f64>,
    /// Pre-filter corner quadruple `[f1, f2, f3, f4]` in Hz
    pub pre_filt: Option<[f64; 4]>,
    /// Maximum relative disagreement between the stage-gain product and
    /// the overall sensitivity
    pub gain_tolerance: f64,
}

impl Default for ResponseRemovalOptions {
    fn default() -> Self {
        Self {
            water_level: Some(60.0),
            pre_filt: Some([0.001, 0.005, 45.0, 50.0]),
            gain_tolerance: 0.1,
        }
    }
}

/// Which correction strategy was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMethod {
    PolesZeros,
    SensitivityOnly,
}

/// Validate the response metadata against the sensor class.
///
/// Gate order matches the decision flow: sensitivity/gain-product
/// agreement first, then unit consistency.
pub fn check_response(
    response: &InstrumentResponse,
    instrument: InstrumentType,
    opts: &ResponseRemovalOptions,
) -> Result<()> {
    let sensitivity = response
        .sensitivity
        .as_ref()
        .ok_or_else(|| GmError::ResponseMetadata("no overall sensitivity".into()))?;
    if sensitivity.value <= 0.0 {
        return Err(GmError::ResponseMetadata(format!(
            "non-positive sensitivity {}",
            sensitivity.value
        )));
    }
    if let Some(product) = response.gain_product() {
        let rel = (product - sensitivity.value).abs() / sensitivity.value;
        if rel > opts.gain_tolerance {
            return Err(GmError::ResponseMetadata(format!(
                "sensitivity_mismatch: stage gain product {product:.6e} vs overall \
                 sensitivity {:.6e} (relative {rel:.3})",
                sensitivity.value
            )));
        }
    }
    let expected = expected_input_units(instrument);
    if let Some(units) = response.input_units() {
        if units != expected {
            return Err(GmError::ResponseMetadata(format!(
                "input units '{units}' inconsistent with instrument type (expected '{expected}')"
            )));
        }
    }
    if normalize_units(&sensitivity.input_units) != expected {
        return Err(GmError::ResponseMetadata(format!(
            "sensitivity input units '{}' inconsistent with instrument type (expected '{expected}')",
            sensitivity.input_units
        )));
    }
    Ok(())
}

/// Remove the instrument response from raw-count samples.
///
/// Returns the corrected samples as acceleration in cm/s^2 and the method
/// used. The caller owns updating trace metadata and provenance.
pub fn remove_response(
    data: &[f64],
    dt: f64,
    response: &InstrumentResponse,
    instrument: InstrumentType,
    opts: &ResponseRemovalOptions,
) -> Result<(Vec<f64>, CorrectionMethod)> {
    check_response(response, instrument, opts)?;

    if response.stages_complete() && opts.water_level.is_some() {
        let physical = deconvolve(data, dt, response, opts)?;
        // Seismometers deconvolve to velocity; differentiate to
        // acceleration before the unit conversion.
        let acc = match instrument {
            InstrumentType::Seismometer => gradient(&physical, dt),
            InstrumentType::Accelerometer => physical,
        };
        return Ok((
            acc.iter().map(|v| v * M_TO_CM).collect(),
            CorrectionMethod::PolesZeros,
        ));
    }

    if instrument == InstrumentType::Accelerometer {
        // check_response guarantees a usable sensitivity here
        let sens = response.sensitivity.as_ref().unwrap().value;
        let acc: Vec<f64> = data.iter().map(|v| v / sens * M_TO_CM).collect();
        return Ok((acc, CorrectionMethod::SensitivityOnly));
    }

    Err(GmError::ResponseMetadata(
        "bad_response_metadata: no usable correction strategy".into(),
    ))
}

/// Spectral division with water-level regularization and optional
/// pre-filter taper.
fn deconvolve(
    data: &[f64],
    dt: f64,
    response: &InstrumentResponse,
    opts: &ResponseRemovalOptions,
) -> Result<Vec<f64>> {
    let n = data.len();
    let nfft = next_pow2(2 * n);
    let mut spec = rfft(data, nfft);
    let freqs = rfftfreq(nfft, dt);

    let mut resp: Vec<Complex64> = freqs.iter().map(|&f| response.evaluate(f)).collect();

    // Water level: lift bins whose response magnitude falls below
    // max * 10^(-wl/20) so the division cannot blow up.
    let wl_db = opts.water_level.unwrap_or(60.0);
    let max_amp = resp.iter().map(|c| c.norm()).fold(0.0_f64, f64::max);
    if max_amp <= 0.0 || !max_amp.is_finite() {
        return Err(GmError::ResponseMetadata(
            "response evaluates to zero everywhere".into(),
        ));
    }
    let floor = max_amp * 10f64.powf(-wl_db / 20.0);
    for c in resp.iter_mut() {
        let a = c.norm();
        if a < floor {
            *c = if a > 0.0 {
                *c * (floor / a)
            } else {
                Complex64::new(floor, 0.0)
            };
        }
    }

    if let Some([f1, f2, f3, f4]) = opts.pre_filt {
        let taper = cosine_sac_taper(&freqs, f1, f2, f3, f4);
        for (c, w) in spec.iter_mut().zip(taper.iter()) {
            *c *= w;
        }
    }

    for (c, r) in spec.iter_mut().zip(resp.iter()) {
        *c /= r;
    }
    spec[0] = Complex64::new(0.0, 0.0);

    Ok(irfft(&spec, nfft, n))
}
