use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A result type for GPR-BMA algorithm
pub type Result<T> = std::result::Result<T, BmaError>;

/// An error when running GPR-BMA
///
/// The first four variants are local to one model: they are recorded as
/// [`SkippedModel`] and the run goes on without that model.
#[derive(Error, Debug)]
pub enum BmaError {
    /// When a predictor set references a field absent from the dataset
    #[error("Model {model}: predictor `{field}` is missing from the dataset")]
    MissingPredictor {
        /// Model identifier
        model: String,
        /// Missing field name
        field: String,
    },
    /// When a score can not be computed (non positive RSS, non finite value...)
    #[error("Model {model}: numeric degeneracy ({reason})")]
    NumericDegeneracy {
        /// Model identifier
        model: String,
        /// Explanation
        reason: String,
    },
    /// When the GP fitting procedure fails
    #[error("Model {model}: fit failure ({reason})")]
    FitFailure {
        /// Model identifier
        model: String,
        /// Explanation
        reason: String,
    },
    /// When a stored model predictors do not match the dataset at prediction time
    #[error("Model {model}: predictor `{field}` of the stored model does not match the dataset")]
    InclusionMismatch {
        /// Model identifier
        model: String,
        /// Offending field name
        field: String,
    },
    /// When no candidate predictor is given
    #[error("Candidate predictor list is empty")]
    EmptyCandidates,
    /// When subset sizes are not within 1..=K
    #[error("Invalid subset size range {min}..={max} for {n_candidates} candidates")]
    InvalidSizeRange {
        /// Smallest subset size
        min: usize,
        /// Largest subset size
        max: usize,
        /// Number of candidate predictors
        n_candidates: usize,
    },
    /// When a candidate predictor is listed twice
    #[error("Candidate predictor `{0}` is listed more than once")]
    DuplicateCandidate(String),
    /// When no model survived fitting and scoring
    #[error("No valid model to average over")]
    NoValidModel,
    /// When the run was interrupted
    #[error("Run cancelled")]
    Cancelled,
    /// When the input dataset is malformed
    #[error("Dataset error: {0}")]
    Dataset(String),
    /// When an IO operation fails
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// When reading or writing csv tables fails
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// When json (de)serialization fails
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// When binary serialization fails
    #[error("Save error: {0}")]
    SaveBinary(#[from] bincode::error::EncodeError),
    /// When binary deserialization fails
    #[error("Load error: {0}")]
    LoadBinary(#[from] bincode::error::DecodeError),
    /// When Gaussian Process fails
    #[error("GP error: {0}")]
    Gp(#[from] geobma_gp::GpError),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValue(String),
    /// When the run configuration is not valid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BmaError {
    /// Kind of the failure when it is local to one model, `None` when fatal to the run
    pub fn skip_kind(&self) -> Option<SkipKind> {
        match self {
            BmaError::MissingPredictor { .. } => Some(SkipKind::MissingPredictor),
            BmaError::NumericDegeneracy { .. } => Some(SkipKind::NumericDegeneracy),
            BmaError::FitFailure { .. } => Some(SkipKind::FitFailure),
            BmaError::InclusionMismatch { .. } => Some(SkipKind::InclusionMismatch),
            _ => None,
        }
    }
}

/// Why a model was left out of the averaging
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipKind {
    /// Subset references a field absent from the dataset
    MissingPredictor,
    /// GP fit failed
    FitFailure,
    /// Score could not be computed
    NumericDegeneracy,
    /// Stored predictors do not match the dataset
    InclusionMismatch,
    /// Not processed because the run was interrupted
    Cancelled,
}

impl fmt::Display for SkipKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SkipKind::MissingPredictor => "missing predictor",
            SkipKind::FitFailure => "fit failure",
            SkipKind::NumericDegeneracy => "numeric degeneracy",
            SkipKind::InclusionMismatch => "inclusion mismatch",
            SkipKind::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A model left out of the averaging, reported in the run summary
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkippedModel {
    /// Model identifier
    pub model: String,
    /// Failure kind
    pub kind: SkipKind,
    /// Failure message
    pub reason: String,
}

impl SkippedModel {
    /// Record a model-local error, returns the error back when it is fatal
    pub fn from_error(model: impl Into<String>, err: BmaError) -> Result<Self> {
        match err.skip_kind() {
            Some(kind) => Ok(SkippedModel {
                model: model.into(),
                kind,
                reason: err.to_string(),
            }),
            None => Err(err),
        }
    }

    /// A model not processed because of cancellation
    pub fn cancelled(model: impl Into<String>) -> Self {
        SkippedModel {
            model: model.into(),
            kind: SkipKind::Cancelled,
            reason: "run interrupted before this model was fitted".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_local_errors_are_skipped() {
        let err = BmaError::MissingPredictor {
            model: "m1_3".to_string(),
            field: "NOX".to_string(),
        };
        let skipped = SkippedModel::from_error("m1_3", err).unwrap();
        assert_eq!(skipped.kind, SkipKind::MissingPredictor);
        assert!(skipped.reason.contains("NOX"));
    }

    #[test]
    fn test_fatal_errors_are_returned() {
        let res = SkippedModel::from_error("m1_1", BmaError::NoValidModel);
        assert!(matches!(res, Err(BmaError::NoValidModel)));
    }
}
