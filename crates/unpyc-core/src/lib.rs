//! unpyc core library: Python bytecode decompilation orchestration.
//!
//! External decompilers are tried in priority order; their output is checked
//! against the artifact's own bytecode, patched with stubs and recovered
//! constants, and optionally completed by coding agents. The crate is
//! compiled as a Python extension module (`_unpyc_core`) via PyO3 and drives
//! whole directories of artifacts in parallel.

pub mod analysis;
pub mod bytecode;
pub mod config;
pub mod errors;
pub mod guards;
pub mod models;
pub mod pipeline;
pub mod process;
pub mod source;

use pyo3::prelude::*;
use pyo3::wrap_pyfunction;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global tracing subscriber. `RUST_LOG` wins over the flags;
/// later calls are no-ops.
#[pyfunction]
#[pyo3(signature = (verbose=false, quiet=false))]
pub fn init_logging(verbose: bool, quiet: bool) -> bool {
    let fallback = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

// ---------------------------------------------------------------------------
// Top-level Python module: _unpyc_core
// ---------------------------------------------------------------------------

#[pymodule]
fn _unpyc_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // -- Models and constants ------------------------------------------------
    models::register_models(m)?;
    m.add("SYNTAX_ERROR_BANNER", guards::SYNTAX_ERROR_BANNER)?;
    m.add("DEFAULT_WORKERS", guards::DEFAULT_WORKERS)?;
    m.add_function(wrap_pyfunction!(guards::clamp_workers, m)?)?;

    // -- Environment ---------------------------------------------------------
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;
    m.add_function(wrap_pyfunction!(config::default_source_root, m)?)?;
    m.add_function(wrap_pyfunction!(pipeline::llm::agent::find_coding_agent, m)?)?;
    m.add_function(wrap_pyfunction!(pipeline::llm::agent::agents_available, m)?)?;

    // -- Text analysis -------------------------------------------------------
    m.add_function(wrap_pyfunction!(source::syntax::validate_syntax, m)?)?;

    // -- Pipeline ------------------------------------------------------------
    m.add_function(wrap_pyfunction!(pipeline::controller::py_decompile_file, m)?)?;
    m.add_function(wrap_pyfunction!(pipeline::controller::py_decompile_single_file, m)?)?;
    m.add_function(wrap_pyfunction!(pipeline::fanout::py_decompile_directory, m)?)?;

    Ok(())
}
