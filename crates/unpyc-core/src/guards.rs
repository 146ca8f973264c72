//! Shared guardrails: sentinel counts, analysis thresholds and worker bounds.

use pyo3::prelude::*;

// Outcome sentinels
pub const MAX_GAPS: usize = 999;
pub const GAP_MARKER: &str = "# WARNING: Decompyle incomplete";
pub const FAILURE_TOOL: &str = "none";
pub const FAILURE_ERROR: &str = "All tools failed";
pub const SYNTAX_ERROR_BANNER: &str = "# SYNTAX ERROR - Decompilation produced invalid Python";

// Completeness thresholds
pub const EMPTY_MAX_STACK: u32 = 1;
pub const EMPTY_MAX_CODE_BYTES: usize = 10;

// Text scanning
pub const MARKER_LOOKAHEAD_LINES: usize = 3;
pub const DEFAULT_CONTEXT_LINES: usize = 20;

// Bytecode walking
pub const MAX_OBJECT_DEPTH: usize = 200;
pub const MAX_TRACE_WINDOW: usize = 4096;

// Fan-out
pub const DEFAULT_WORKERS: usize = 10;
pub const MAX_WORKERS: usize = 64;
pub const PROGRESS_INTERVAL: usize = 50;

// Subprocesses
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 60;
pub const AGENT_JOIN_GRACE_SECS: u64 = 10;

#[pyfunction]
pub fn clamp_workers(value: i64) -> usize {
    value.clamp(1, MAX_WORKERS as i64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_workers() {
        assert_eq!(clamp_workers(0), 1);
        assert_eq!(clamp_workers(-5), 1);
        assert_eq!(clamp_workers(10), 10);
        assert_eq!(clamp_workers(10_000), MAX_WORKERS);
    }
}
