use std::time::Duration;

use thiserror::Error;

/// Rejected parameter combinations. Raised before any page is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("gender must be 'M' or 'F', got '{0}'")]
    Gender(String),
    #[error("distance {0} is not valid")]
    Distance(u16),
    #[error("unknown stroke '{0}'")]
    Stroke(String),
    #[error("stroke {stroke} is not valid for distance {distance} (valid: {valid})")]
    Combination {
        distance: u16,
        stroke: String,
        valid: String,
    },
    #[error("unknown pool configuration '{0}'")]
    Pool(String),
    #[error("unknown times mode '{0}'")]
    TimesMode(String),
    #[error("date window starts after it ends ({start} > {end})")]
    Window { start: String, end: String },
}

/// Failures reported by a page view.
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("timed out after {timeout:?} waiting for '{selector}'")]
    Timeout { selector: String, timeout: Duration },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },
    #[error("control '{0}' is not interactable")]
    NotInteractable(String),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("column count mismatch for {table}: expected {expected}, got {got}")]
    Arity {
        table: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Errors that end a whole session. Row-level problems never surface here.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("page never became ready: {0}")]
    Navigation(ViewError),
    #[error("view failure: {0}")]
    View(ViewError),
    #[error("session cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ViewError> for SessionError {
    fn from(err: ViewError) -> Self {
        match err {
            ViewError::Cancelled => SessionError::Cancelled,
            ViewError::Timeout { .. } | ViewError::Navigation { .. } => {
                SessionError::Navigation(err)
            }
            other => SessionError::View(other),
        }
    }
}
