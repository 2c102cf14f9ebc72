//! Error types for strongmotion-rs.

use thiserror::Error;

/// All errors that can surface from the processing engine.
///
/// Only [`GmError::Config`] is returned to the caller before any stream is
/// touched. Every other variant is converted into a [`FailureReason`] and
/// recorded on the offending trace or stream; downstream steps inspect the
/// failure flag and skip.
#[derive(Debug, Error)]
pub enum GmError {
    /// Malformed processing program, unknown step, contradictory parameters.
    /// Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed input data (mismatched sample count, zero-length trace,
    /// missing required metadata).
    #[error("data error: {0}")]
    Data(String),

    /// Numerical failure during a step (non-finite samples, unstable filter,
    /// failed root search).
    #[error("processing error in step '{step}': {text}")]
    Processing { step: String, text: String },

    /// An explicit QA criterion was not met.
    #[error("QA check '{check}' failed: {text}")]
    QaCheckFail { check: String, text: String },

    /// Instrument metadata is inconsistent (stage gain product vs overall
    /// sensitivity, units vs instrument type, no usable correction strategy).
    #[error("response metadata error: {0}")]
    ResponseMetadata(String),

    /// A step requires a trace parameter not set by a previous step.
    #[error("missing prerequisite: step '{step}' requires parameter '{param}'")]
    MissingPrereq { step: String, param: String },

    /// Failed to parse JSON (configuration or aux data)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GmError>;

/// Classification of a recorded trace/stream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Data,
    Processing,
    QaCheckFail,
    ResponseMetadata,
    MissingPrereq,
}

/// A failure recorded on a trace or stream.
///
/// Failures are never raised; they are attached to the data they concern so
/// that diagnostics survive to the output stage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    /// Name of the pipeline step that recorded the failure, when known.
    pub step: Option<String>,
    pub text: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, step: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            step: Some(step.into()),
            text: text.into(),
        }
    }

    /// A failure not attributable to a specific step (e.g. grouping).
    pub fn unattributed(kind: FailureKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            step: None,
            text: text.into(),
        }
    }
}

impl From<&GmError> for FailureReason {
    fn from(err: &GmError) -> Self {
        match err {
            GmError::Data(text) => FailureReason::unattributed(FailureKind::Data, text.clone()),
            GmError::Processing { step, text } => {
                FailureReason::new(FailureKind::Processing, step.clone(), text.clone())
            }
            GmError::QaCheckFail { check, text } => {
                FailureReason::new(FailureKind::QaCheckFail, check.clone(), text.clone())
            }
            GmError::ResponseMetadata(text) => {
                FailureReason::unattributed(FailureKind::ResponseMetadata, text.clone())
            }
            GmError::MissingPrereq { step, param } => FailureReason::new(
                FailureKind::MissingPrereq,
                step.clone(),
                format!("missing parameter '{param}'"),
            ),
            other => FailureReason::unattributed(FailureKind::Processing, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_config() {
        let err = GmError::Config("unknown step 'frobnicate'".into());
        assert!(err.to_string().contains("unknown step"));
    }

    #[test]
    fn error_display_missing_prereq() {
        let err = GmError::MissingPrereq {
            step: "highpass_filter".into(),
            param: "corner_frequencies".into(),
        };
        assert!(err.to_string().contains("corner_frequencies"));
        assert!(err.to_string().contains("highpass_filter"));
    }

    #[test]
    fn failure_from_qa_error() {
        let err = GmError::QaCheckFail {
            check: "check_tail".into(),
            text: "max_vel_ratio_exceeded".into(),
        };
        let reason = FailureReason::from(&err);
        assert_eq!(reason.kind, FailureKind::QaCheckFail);
        assert_eq!(reason.step.as_deref(), Some("check_tail"));
        assert!(reason.text.contains("max_vel_ratio_exceeded"));
    }

    #[test]
    fn failure_from_io_falls_back_to_processing() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GmError = io_err.into();
        let reason = FailureReason::from(&err);
        assert_eq!(reason.kind, FailureKind::Processing);
        assert!(reason.text.contains("file not found"));
    }
}
