//! Per-artifact pipeline: backends in priority order, each non-empty result
//! refined by bytecode repair and, when enabled, agent recovery.

use std::path::Path;

use pyo3::prelude::*;
use tracing::{debug, info};

use crate::analysis::completeness::count_gaps;
use crate::bytecode::BytecodeIndex;
use crate::config::DecompilerConfig;
use crate::errors::UnpycResult;
use crate::models::DecompileOutcome;
use crate::pipeline::backend::run_backend;
use crate::pipeline::llm::recovery;
use crate::pipeline::repair::repair;

fn load_index(path: &Path, config: &DecompilerConfig) -> Option<BytecodeIndex> {
    match BytecodeIndex::open(path, config.disassembler.as_ref()) {
        Ok(index) => Some(index),
        Err(e) => {
            info!(
                artifact = %path.display(),
                error = %e,
                "no bytecode index, repair and llm recovery skipped"
            );
            None
        }
    }
}

fn artifact_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Decompile one artifact. Never fails: when no backend produces text the
/// result is the failure marker document.
pub fn decompile_file(path: &Path, use_llm: bool, config: &DecompilerConfig) -> DecompileOutcome {
    // Loaded on first use and shared by every backend's refinement.
    let mut index_slot: Option<Option<BytecodeIndex>> = None;
    let mut best: Option<DecompileOutcome> = None;

    for spec in &config.backends {
        let raw = run_backend(spec, path, &config.gap_marker);
        if !raw.has_source() {
            continue;
        }
        let index = index_slot.get_or_insert_with(|| load_index(path, config)).as_ref();
        let gaps = count_gaps(&raw.source, index, config);
        let mut outcome = DecompileOutcome::new(raw.source, raw.backend, gaps);

        if !outcome.is_complete() {
            if let Some(index) = index {
                outcome = repair(&outcome, index, config);
                if !outcome.is_complete() && use_llm {
                    outcome = recovery::recover(&outcome, index, config);
                }
            }
        }
        if outcome.is_complete() {
            info!(artifact = %path.display(), backend = %outcome.backend, "complete");
            return outcome;
        }
        debug!(
            artifact = %path.display(),
            backend = %outcome.backend,
            gaps = outcome.gaps,
            "incomplete candidate"
        );
        if best.as_ref().map_or(true, |b| outcome.gaps < b.gaps) {
            best = Some(outcome);
        }
    }

    best.unwrap_or_else(|| DecompileOutcome::failure_document(&artifact_name(path)))
}

/// Decompile one artifact and write the text to `output` (parents created)
/// or return it for standard output.
pub fn decompile_single_file(
    path: &Path,
    output: Option<&Path>,
    use_llm: bool,
    config: &DecompilerConfig,
) -> UnpycResult<DecompileOutcome> {
    let outcome = decompile_file(path, use_llm, config);
    if let Some(output) = output {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, &outcome.source)?;
        info!(output = %output.display(), backend = %outcome.backend, "written");
    }
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Python entry points
// ---------------------------------------------------------------------------

#[pyfunction]
#[pyo3(name = "decompile_file", signature = (path, use_llm=false, config_json=None))]
pub fn py_decompile_file(
    py: Python<'_>,
    path: &str,
    use_llm: bool,
    config_json: Option<&str>,
) -> PyResult<DecompileOutcome> {
    let config = DecompilerConfig::from_optional_json(config_json)?;
    let path = Path::new(path);
    Ok(py.allow_threads(|| decompile_file(path, use_llm, &config)))
}

/// Returns the outcome; callers print `outcome.source` when `output` is
/// omitted.
#[pyfunction]
#[pyo3(name = "decompile_single_file", signature = (path, output=None, use_llm=false, config_json=None))]
pub fn py_decompile_single_file(
    py: Python<'_>,
    path: &str,
    output: Option<&str>,
    use_llm: bool,
    config_json: Option<&str>,
) -> PyResult<DecompileOutcome> {
    let config = DecompilerConfig::from_optional_json(config_json)?;
    let path = Path::new(path);
    let output = output.map(Path::new);
    Ok(py.allow_threads(|| decompile_single_file(path, output, use_llm, &config))?)
}
