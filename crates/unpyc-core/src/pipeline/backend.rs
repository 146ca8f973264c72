//! Decompiler backends run as isolated subprocesses.
//!
//! Output is never taken at face value: markers are counted literally and
//! the text is re-parsed no matter what the backend claims.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BackendSpec;
use crate::errors::{UnpycError, UnpycResult};
use crate::models::DecompileOutcome;
use crate::process::{run_with_timeout, ExitKind};
use crate::source::scan::count_markers;
use crate::source::syntax::is_valid;

pub const UNSUPPORTED_BANNER: &str = "Unsupported Python version";
const ERROR_SNIPPET_CHARS: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Decompyle3,
    Pycdc,
}

impl BackendKind {
    pub fn id(&self) -> &'static str {
        match self {
            BackendKind::Decompyle3 => "decompyle3",
            BackendKind::Pycdc => "pycdc",
        }
    }

    pub fn default_program(&self) -> &'static str {
        match self {
            BackendKind::Decompyle3 => "uv",
            BackendKind::Pycdc => "pycdc",
        }
    }

    pub fn default_args(&self) -> &'static [&'static str] {
        match self {
            BackendKind::Decompyle3 => &["run", "decompyle3"],
            BackendKind::Pycdc => &[],
        }
    }

    /// decompyle3 prints a banner instead of failing on versions it lacks.
    pub fn rejects_unsupported_banner(&self) -> bool {
        matches!(self, BackendKind::Decompyle3)
    }
}

fn snippet(text: &str) -> String {
    text.trim().chars().take(ERROR_SNIPPET_CHARS).collect()
}

/// Run the backend and return its raw stdout, or why it produced nothing.
fn invoke(spec: &BackendSpec, artifact: &Path) -> UnpycResult<String> {
    let mut args = spec.args();
    args.push(artifact.to_string_lossy().into_owned());
    let output = run_with_timeout(spec.program(), &args, spec.timeout()).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            UnpycError::BackendUnavailable(spec.program().to_string())
        } else {
            UnpycError::Io(e)
        }
    })?;

    let crash = |detail: String| UnpycError::BackendCrash {
        backend: spec.id().to_string(),
        detail,
    };
    match output.exit {
        ExitKind::TimedOut => return Err(UnpycError::BackendTimeout(spec.id().to_string())),
        ExitKind::Signaled => return Err(crash("terminated by signal".to_string())),
        ExitKind::Exited(_) => {}
    }
    if spec.rejects_unsupported_banner()
        && (output.stdout.contains(UNSUPPORTED_BANNER) || output.stderr.contains(UNSUPPORTED_BANNER))
    {
        return Err(UnpycError::UnsupportedFormat(UNSUPPORTED_BANNER.to_string()));
    }
    if (!output.success() && !spec.accept_nonzero_exit) || output.stdout.trim().is_empty() {
        let detail = if output.stderr.trim().is_empty() {
            "Empty output".to_string()
        } else {
            snippet(&output.stderr)
        };
        return Err(crash(detail));
    }
    Ok(output.stdout)
}

/// Classify raw backend text: comment-only output is a failure, otherwise
/// gaps are the literal marker count, at least 1 when the text does not
/// parse.
pub fn classify_output(backend: &str, stdout: String, marker: &str) -> DecompileOutcome {
    let has_code = stdout.lines().any(|line| {
        let trimmed = line.trim();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    });
    if !has_code {
        return DecompileOutcome::failed(backend, "Only comments in output");
    }
    let mut gaps = count_markers(&stdout, marker);
    if !is_valid(&stdout) {
        gaps = gaps.max(1);
    }
    DecompileOutcome::new(stdout, backend, gaps)
}

/// Run one backend on one artifact. Never fails: every problem becomes a
/// failed outcome carrying `MAX_GAPS`.
pub fn run_backend(spec: &BackendSpec, artifact: &Path, marker: &str) -> DecompileOutcome {
    match invoke(spec, artifact) {
        Ok(stdout) => {
            let outcome = classify_output(spec.id(), stdout, marker);
            debug!(
                artifact = %artifact.display(),
                backend = spec.id(),
                gaps = outcome.gaps,
                "backend finished"
            );
            outcome
        }
        Err(e) => {
            debug!(artifact = %artifact.display(), backend = spec.id(), error = %e, "backend failed");
            DecompileOutcome::failed(spec.id(), e.to_string())
        }
    }
}
