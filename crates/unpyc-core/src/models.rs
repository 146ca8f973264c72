//! Shared typed models passed between pipeline stages and exposed to Python.

use std::collections::BTreeMap;

use pyo3::prelude::*;
use pyo3::types::PyDict;
use serde::Serialize;

use crate::guards::{FAILURE_ERROR, FAILURE_TOOL, MAX_GAPS};

// ---------------------------------------------------------------------------
// DecompileOutcome
// ---------------------------------------------------------------------------

/// Result of one pipeline stage for one artifact.
///
/// Stages never mutate an outcome; they return it unchanged or build a new
/// one whose backend id records the stage (`pycdc+bytecode+llm`).
#[pyclass(frozen, get_all)]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DecompileOutcome {
    pub source: String,
    pub backend: String,
    pub gaps: usize,
    pub error: Option<String>,
}

impl DecompileOutcome {
    pub fn new(source: impl Into<String>, backend: impl Into<String>, gaps: usize) -> Self {
        Self {
            source: source.into(),
            backend: backend.into(),
            gaps,
            error: None,
        }
    }

    /// Empty-text failure carrying the maximal gap count.
    pub fn failed(backend: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source: String::new(),
            backend: backend.into(),
            gaps: MAX_GAPS,
            error: Some(error.into()),
        }
    }

    /// Marker document written when every backend produced nothing.
    pub fn failure_document(artifact_name: &str) -> Self {
        Self {
            source: format!("# Decompilation failed for {artifact_name}\n"),
            backend: FAILURE_TOOL.to_string(),
            gaps: MAX_GAPS,
            error: Some(FAILURE_ERROR.to_string()),
        }
    }

    /// New outcome for text produced by a later stage.
    pub fn with_stage(&self, stage: &str, source: String, gaps: usize) -> Self {
        Self {
            source,
            backend: format!("{}+{stage}", self.backend),
            gaps,
            error: None,
        }
    }

    pub fn with_error(&self, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..self.clone()
        }
    }

    pub fn has_source(&self) -> bool {
        !self.source.trim().is_empty()
    }
}

#[pymethods]
impl DecompileOutcome {
    #[new]
    #[pyo3(signature = (source, backend, gaps, error=None))]
    fn py_new(source: String, backend: String, gaps: usize, error: Option<String>) -> Self {
        Self {
            source,
            backend,
            gaps,
            error,
        }
    }

    #[getter]
    pub fn is_complete(&self) -> bool {
        self.gaps == 0 && self.error.is_none()
    }

    fn __repr__(&self) -> String {
        format!(
            "DecompileOutcome(backend={:?}, gaps={}, error={:?}, source_len={})",
            self.backend,
            self.gaps,
            self.error,
            self.source.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Per-artifact status
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Complete,
    Incomplete,
    Failed,
}

impl ArtifactStatus {
    pub fn of(outcome: &DecompileOutcome) -> Self {
        if outcome.error.is_some() {
            ArtifactStatus::Failed
        } else if outcome.gaps == 0 {
            ArtifactStatus::Complete
        } else {
            ArtifactStatus::Incomplete
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            ArtifactStatus::Complete => '+',
            ArtifactStatus::Incomplete => '~',
            ArtifactStatus::Failed => 'x',
        }
    }
}

// ---------------------------------------------------------------------------
// RunStatistics
// ---------------------------------------------------------------------------

/// Aggregate counters for one directory run.
#[pyclass(frozen, get_all)]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub total: usize,
    pub complete: usize,
    pub incomplete: usize,
    pub failed: usize,
    pub by_backend: BTreeMap<String, usize>,
}

impl RunStatistics {
    pub fn record(&mut self, status: ArtifactStatus, backend: &str) {
        self.total += 1;
        match status {
            ArtifactStatus::Complete => self.complete += 1,
            ArtifactStatus::Incomplete => self.incomplete += 1,
            ArtifactStatus::Failed => self.failed += 1,
        }
        *self.by_backend.entry(backend.to_string()).or_insert(0) += 1;
    }

    /// Backend usage, most used first (ties by name).
    pub fn histogram(&self) -> Vec<(String, usize)> {
        let mut entries: Vec<(String, usize)> = self
            .by_backend
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

#[pymethods]
impl RunStatistics {
    pub fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict = PyDict::new(py);
        dict.set_item("total", self.total)?;
        dict.set_item("complete", self.complete)?;
        dict.set_item("incomplete", self.incomplete)?;
        dict.set_item("failed", self.failed)?;
        dict.set_item("by_tool", self.by_backend.clone())?;
        Ok(dict)
    }

    fn __repr__(&self) -> String {
        format!(
            "RunStatistics(total={}, complete={}, incomplete={}, failed={})",
            self.total, self.complete, self.incomplete, self.failed,
        )
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

pub fn register_models(m: &Bound<'_, pyo3::types::PyModule>) -> PyResult<()> {
    m.add("MAX_GAPS", MAX_GAPS)?;
    m.add("GAP_MARKER", crate::guards::GAP_MARKER)?;

    m.add_class::<DecompileOutcome>()?;
    m.add_class::<RunStatistics>()?;
    Ok(())
}
