use std::collections::BTreeMap;

use thiserror::Error;

/// Category -> message pairs queued for one session.
pub type FlashMap = BTreeMap<String, String>;

/// Failure of a single backend command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{op} failed: {reason}")]
pub struct BackendError {
    pub op: &'static str,
    pub reason: String,
}

impl BackendError {
    pub fn new(op: &'static str, reason: impl Into<String>) -> Self {
        Self { op, reason: reason.into() }
    }

    pub fn timeout(op: &'static str, after: std::time::Duration) -> Self {
        Self::new(op, format!("timed out after {}ms", after.as_millis()))
    }
}

/// Data already read from the backend when the clearing step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovered {
    Message(String),
    All(FlashMap),
}

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),
    /// The read succeeded but the delete did not; the value is returned here and
    /// may be delivered again by a later read.
    #[error("flash for session {session} read but not cleared: {cause}")]
    PartialConsumption {
        session: String,
        category: Option<String>,
        recovered: Recovered,
        cause: BackendError,
    },
    #[error("category must be a non-empty string")]
    InvalidCategory,
}

impl FlashError {
    /// Stable numeric code for external mapping/logging
    pub fn code(&self) -> u16 {
        match self {
            FlashError::BackendUnavailable(_) => 2001,
            FlashError::PartialConsumption { .. } => 2002,
            FlashError::InvalidCategory => 2101,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, FlashError::PartialConsumption { .. })
    }

    /// Value retrieved before the failure, if any.
    pub fn recovered(&self) -> Option<&Recovered> {
        match self {
            FlashError::PartialConsumption { recovered, .. } => Some(recovered),
            _ => None,
        }
    }
}
