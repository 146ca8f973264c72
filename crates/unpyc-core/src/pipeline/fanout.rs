//! Directory runs: discover artifacts, decompile them on a bounded worker
//! pool and mirror the results into the output tree.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::DecompilerConfig;
use crate::errors::{UnpycError, UnpycResult};
use crate::guards::{clamp_workers, FAILURE_TOOL, PROGRESS_INTERVAL, SYNTAX_ERROR_BANNER};
use crate::models::{ArtifactStatus, DecompileOutcome, RunStatistics};
use crate::pipeline::controller::decompile_file;
use crate::source::syntax::check_syntax;

/// All artifacts under `root` with the configured extension, sorted.
pub fn discover_artifacts(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == extension))
        .collect();
    found.sort();
    found
}

/// Output path for `artifact`, mirrored from `source_root` into `output_root`.
pub fn mirrored_path(artifact: &Path, source_root: &Path, output_root: &Path, extension: &str) -> PathBuf {
    let relative = artifact.strip_prefix(source_root).unwrap_or(artifact);
    output_root.join(relative).with_extension(extension)
}

/// Text that does not parse is kept, behind a banner, as a failure.
pub fn flag_invalid_syntax(outcome: DecompileOutcome) -> DecompileOutcome {
    if !outcome.has_source() {
        return outcome;
    }
    let Err(error) = check_syntax(&outcome.source) else {
        return outcome;
    };
    DecompileOutcome {
        source: format!("{SYNTAX_ERROR_BANNER}\n{}", outcome.source),
        gaps: outcome.gaps.max(1),
        error: Some(error.to_string()),
        backend: outcome.backend,
    }
}

fn recreate_dir(path: &Path) -> io::Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    std::fs::create_dir_all(path)
}

fn write_output(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)
}

struct RunContext<'a> {
    source_root: &'a Path,
    output_root: &'a Path,
    extension: &'a str,
    verbose: bool,
    total: usize,
    finished: AtomicUsize,
    stats: Mutex<RunStatistics>,
}

impl RunContext<'_> {
    fn process<F>(&self, artifact: &Path, runner: &F)
    where
        F: Fn(&Path) -> DecompileOutcome + Sync,
    {
        let outcome = match catch_unwind(AssertUnwindSafe(|| runner(artifact))) {
            Ok(outcome) => flag_invalid_syntax(outcome),
            Err(_) => {
                warn!(artifact = %artifact.display(), "pipeline panicked");
                DecompileOutcome::failed(FAILURE_TOOL, "Pipeline panicked")
            }
        };

        let target = mirrored_path(artifact, self.source_root, self.output_root, self.extension);
        let outcome = match write_output(&target, &outcome.source) {
            Ok(()) => outcome,
            Err(e) => {
                warn!(output = %target.display(), error = %e, "could not write output");
                outcome.with_error(format!("Write failed: {e}"))
            }
        };

        let status = ArtifactStatus::of(&outcome);
        let (complete, incomplete) = {
            let mut stats = self.stats.lock();
            stats.record(status, &outcome.backend);
            (stats.complete, stats.incomplete)
        };
        let finished = self.finished.fetch_add(1, Ordering::SeqCst) + 1;

        if self.verbose {
            let relative = target.strip_prefix(self.output_root).unwrap_or(&target);
            debug!(
                "{} {} [{}]{}",
                status.symbol(),
                relative.display(),
                outcome.backend,
                if outcome.gaps > 0 {
                    format!(" ({} gaps)", outcome.gaps)
                } else {
                    String::new()
                }
            );
        }
        if finished % PROGRESS_INTERVAL == 0 || finished == self.total {
            info!(finished, total = self.total, complete, incomplete, "progress");
        }
    }
}

/// Run `runner` over every artifact under `source_root`. The output root is
/// recreated first; each artifact is isolated so a panic only fails that
/// artifact.
pub fn run_directory<F>(
    source_root: &Path,
    output_root: &Path,
    verbose: bool,
    config: &DecompilerConfig,
    runner: F,
) -> UnpycResult<RunStatistics>
where
    F: Fn(&Path) -> DecompileOutcome + Sync,
{
    if !source_root.is_dir() {
        return Err(UnpycError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source directory not found: {}", source_root.display()),
        )));
    }
    recreate_dir(output_root)?;

    let artifacts = discover_artifacts(source_root, &config.artifact_extension);
    info!(
        source = %source_root.display(),
        artifacts = artifacts.len(),
        workers = config.workers,
        "decompiling directory"
    );
    let ctx = RunContext {
        source_root,
        output_root,
        extension: &config.output_extension,
        verbose,
        total: artifacts.len(),
        finished: AtomicUsize::new(0),
        stats: Mutex::new(RunStatistics::default()),
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build();
    match pool {
        Ok(pool) => pool.install(|| {
            artifacts.par_iter().for_each(|artifact| ctx.process(artifact, &runner));
        }),
        Err(e) => {
            warn!(error = %e, "worker pool unavailable, running sequentially");
            artifacts.iter().for_each(|artifact| ctx.process(artifact, &runner));
        }
    }

    let stats = ctx.stats.into_inner();
    info!(
        total = stats.total,
        complete = stats.complete,
        incomplete = stats.incomplete,
        failed = stats.failed,
        "directory finished"
    );
    for (backend, count) in stats.histogram() {
        info!(%backend, count, "backend usage");
    }
    Ok(stats)
}

pub fn decompile_directory(
    source_root: &Path,
    output_root: &Path,
    use_llm: bool,
    verbose: bool,
    config: &DecompilerConfig,
) -> UnpycResult<RunStatistics> {
    run_directory(source_root, output_root, verbose, config, |artifact| {
        decompile_file(artifact, use_llm, config)
    })
}

#[pyfunction]
#[pyo3(
    name = "decompile_directory",
    signature = (source, output, use_llm=false, verbose=false, workers=None, config_json=None)
)]
pub fn py_decompile_directory<'py>(
    py: Python<'py>,
    source: &str,
    output: &str,
    use_llm: bool,
    verbose: bool,
    workers: Option<i64>,
    config_json: Option<&str>,
) -> PyResult<Bound<'py, PyDict>> {
    let mut config = DecompilerConfig::from_optional_json(config_json)?;
    if let Some(workers) = workers {
        config.workers = clamp_workers(workers);
    }
    let (source, output) = (Path::new(source), Path::new(output));
    let stats = py.allow_threads(|| decompile_directory(source, output, use_llm, verbose, &config))?;
    stats.to_dict(py)
}
