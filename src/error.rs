use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Everything that can go wrong while measuring.
///
/// Errors fall in two groups. Request errors ([`HarnessError::UnsupportedMetric`],
/// [`HarnessError::EmptyRequest`], [`HarnessError::DuplicateLabel`],
/// [`HarnessError::InvalidTrialCount`], [`HarnessError::Config`]) are raised before
/// any operation runs and abort the whole comparison. Runtime errors belong to a
/// single operation; a [`crate::Comparison`] turns them into a failed row and
/// moves on to the next operation.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The untimed warm-up call failed.
    #[error("warm-up of `{label}` failed: {reason}")]
    Compilation { label: String, reason: String },

    /// The metric is unknown, or this platform cannot measure it.
    #[error("unsupported metric `{metric}`")]
    UnsupportedMetric { metric: String },

    /// A trial measured a zero duration twice in a row.
    #[error("`{label}` measured a non-positive duration on trial {trial}, even after a retry")]
    Measurement { label: String, trial: usize },

    /// The operation failed during a measured trial.
    #[error("`{label}` failed on trial {trial}: {reason}")]
    Operation {
        label: String,
        trial: usize,
        reason: String,
    },

    #[error("at least one metric must be requested")]
    EmptyRequest,

    #[error("operation label `{label}` is used more than once")]
    DuplicateLabel { label: String },

    #[error("trial count must be at least 1")]
    InvalidTrialCount,

    /// Opening, starting or reading hardware counters failed.
    #[error("hardware counter error: {0}")]
    Counter(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Which per-operation failure put a row into the failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Compilation,
    Measurement,
    Operation,
    Counter,
}

impl HarnessError {
    pub(crate) fn unsupported(metric: impl Into<String>) -> Self {
        Self::UnsupportedMetric {
            metric: metric.into(),
        }
    }

    /// `Some` for errors that are scoped to one operation and can be recorded as
    /// a failed row, `None` for errors that invalidate the whole request.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Compilation { .. } => Some(FailureKind::Compilation),
            Self::Measurement { .. } => Some(FailureKind::Measurement),
            Self::Operation { .. } => Some(FailureKind::Operation),
            Self::Counter(_) => Some(FailureKind::Counter),
            Self::UnsupportedMetric { .. }
            | Self::EmptyRequest
            | Self::DuplicateLabel { .. }
            | Self::InvalidTrialCount
            | Self::Config(_) => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.failure_kind().is_none()
    }
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
