//! Error types for the unpyc core library.

use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use pyo3::PyErr;

/// Top-level error enum for the unpyc core library.
///
/// Everything below the directory fan-out returns these; the fan-out itself
/// converts them into failed outcomes so one artifact never aborts a run.
#[derive(Debug, thiserror::Error)]
pub enum UnpycError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt artifact: {0}")]
    Corrupt(String),

    #[error("Code object not found: {0}")]
    NotFound(String),

    #[error("Ambiguous lookup for {name}: {candidates:?}")]
    AmbiguousLookup {
        name: String,
        candidates: Vec<String>,
    },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend {0} timed out")]
    BackendTimeout(String),

    #[error("Backend {backend} crashed: {detail}")]
    BackendCrash { backend: String, detail: String },

    #[error("Syntax error: {0}")]
    SyntaxInvalid(String),

    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("Agent {0} timed out")]
    AgentTimeout(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<UnpycError> for PyErr {
    fn from(err: UnpycError) -> PyErr {
        match &err {
            UnpycError::UnsupportedFormat(_)
            | UnpycError::Corrupt(_)
            | UnpycError::NotFound(_)
            | UnpycError::AmbiguousLookup { .. }
            | UnpycError::SyntaxInvalid(_)
            | UnpycError::Config(_)
            | UnpycError::Json(_) => PyValueError::new_err(err.to_string()),
            UnpycError::BackendUnavailable(_)
            | UnpycError::BackendTimeout(_)
            | UnpycError::BackendCrash { .. }
            | UnpycError::AgentUnavailable(_)
            | UnpycError::AgentTimeout(_) => PyRuntimeError::new_err(err.to_string()),
            UnpycError::Io(_) => PyIOError::new_err(err.to_string()),
        }
    }
}

pub type UnpycResult<T> = Result<T, UnpycError>;
