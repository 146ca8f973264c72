//! Run configuration: which backends, disassembler and coding agents to use
//! and how to treat their output.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pyo3::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::{UnpycError, UnpycResult};
use crate::guards::{
    clamp_workers, DEFAULT_BACKEND_TIMEOUT_SECS, DEFAULT_CONTEXT_LINES, DEFAULT_WORKERS,
    GAP_MARKER,
};
use crate::pipeline::backend::BackendKind;
use crate::pipeline::llm::agent::AgentKind;

/// Environment variable overriding the default input root.
pub const SOURCE_ENV_VAR: &str = "UNPYC_SOURCE";

const WELL_KNOWN_SOURCE_ROOTS: &[&str] = &[
    "/Applications/Ableton Live 12 Beta.app/Contents/App-Resources/MIDI Remote Scripts",
    "/Applications/Ableton Live 12 Suite.app/Contents/App-Resources/MIDI Remote Scripts",
    "/Applications/Ableton Live 12.app/Contents/App-Resources/MIDI Remote Scripts",
    "/Applications/Ableton Live 11 Suite.app/Contents/App-Resources/MIDI Remote Scripts",
];

fn default_timeout() -> u64 {
    DEFAULT_BACKEND_TIMEOUT_SECS
}

/// One decompiler backend. Invoked as `program args... <artifact>`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendSpec {
    pub kind: BackendKind,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Treat an "Unsupported Python version" banner as failure.
    #[serde(default)]
    pub reject_unsupported_banner: Option<bool>,
    /// Keep output from a process that exited non-zero.
    #[serde(default)]
    pub accept_nonzero_exit: bool,
}

impl BackendSpec {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            program: None,
            args: None,
            timeout_secs: DEFAULT_BACKEND_TIMEOUT_SECS,
            reject_unsupported_banner: None,
            accept_nonzero_exit: false,
        }
    }

    pub fn id(&self) -> &'static str {
        self.kind.id()
    }

    pub fn rejects_unsupported_banner(&self) -> bool {
        self.reject_unsupported_banner
            .unwrap_or_else(|| self.kind.rejects_unsupported_banner())
    }

    pub fn program(&self) -> &str {
        self.program
            .as_deref()
            .unwrap_or_else(|| self.kind.default_program())
    }

    pub fn args(&self) -> Vec<String> {
        match &self.args {
            Some(args) => args.clone(),
            None => self
                .kind
                .default_args()
                .iter()
                .map(|a| a.to_string())
                .collect(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The disassembler oracle. Invoked as `program args... <artifact>`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ToolCommand {
    fn default() -> Self {
        Self {
            program: "pycdas".to_string(),
            args: Vec::new(),
            timeout_secs: DEFAULT_BACKEND_TIMEOUT_SECS,
        }
    }
}

impl ToolCommand {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One coding agent.
///
/// `args` overrides the kind's argument layout; `{prompt}` and `{model}`
/// placeholders are substituted in each element.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentSpec {
    pub kind: AgentKind,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl AgentSpec {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            program: None,
            model: None,
            args: None,
            timeout_secs: None,
        }
    }

    pub fn program(&self) -> &str {
        self.program
            .as_deref()
            .unwrap_or_else(|| self.kind.default_program())
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.kind.default_model())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_secs
                .unwrap_or_else(|| self.kind.default_timeout_secs()),
        )
    }

    pub fn command_args(&self, prompt: &str) -> Vec<String> {
        let template: Vec<String> = match &self.args {
            Some(args) => args.clone(),
            None => self
                .kind
                .default_args()
                .iter()
                .map(|a| a.to_string())
                .collect(),
        };
        template
            .into_iter()
            .map(|arg| match arg.as_str() {
                "{prompt}" => prompt.to_string(),
                "{model}" => self.model().to_string(),
                _ => arg.replace("{model}", self.model()),
            })
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompilerConfig {
    /// Backends in priority order.
    pub backends: Vec<BackendSpec>,
    /// `None` disables the oracle; listings are then rendered from bytecode.
    pub disassembler: Option<ToolCommand>,
    /// Coding agents in tie-break order.
    pub agents: Vec<AgentSpec>,
    pub gap_marker: String,
    pub stub_placeholder: String,
    pub base_class_suffixes: Vec<String>,
    pub base_class_names: Vec<String>,
    pub context_lines: usize,
    pub workers: usize,
    pub artifact_extension: String,
    pub output_extension: String,
}

impl Default for DecompilerConfig {
    fn default() -> Self {
        Self {
            backends: vec![
                BackendSpec::new(BackendKind::Decompyle3),
                BackendSpec::new(BackendKind::Pycdc),
            ],
            disassembler: Some(ToolCommand::default()),
            agents: vec![
                AgentSpec::new(AgentKind::Claude),
                AgentSpec::new(AgentKind::Opencode),
            ],
            gap_marker: GAP_MARKER.to_string(),
            stub_placeholder: "pass  # TODO: Reconstruct".to_string(),
            base_class_suffixes: vec!["Base".to_string(), "Component".to_string()],
            base_class_names: vec!["ControlSurface".to_string()],
            context_lines: DEFAULT_CONTEXT_LINES,
            workers: DEFAULT_WORKERS,
            artifact_extension: "pyc".to_string(),
            output_extension: "py".to_string(),
        }
    }
}

impl DecompilerConfig {
    pub fn from_json_str(text: &str) -> UnpycResult<Self> {
        let config: DecompilerConfig = serde_json::from_str(text)?;
        config.validated()
    }

    pub fn from_json_file(path: &Path) -> UnpycResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse an optional JSON override, falling back to defaults.
    pub fn from_optional_json(text: Option<&str>) -> UnpycResult<Self> {
        match text {
            Some(text) => Self::from_json_str(text),
            None => Ok(Self::default()),
        }
    }

    fn validated(mut self) -> UnpycResult<Self> {
        if self.backends.is_empty() {
            return Err(UnpycError::Config("at least one backend is required".to_string()));
        }
        if self.gap_marker.trim().is_empty() {
            return Err(UnpycError::Config("gap_marker must not be empty".to_string()));
        }
        self.artifact_extension = self.artifact_extension.trim_start_matches('.').to_string();
        self.output_extension = self.output_extension.trim_start_matches('.').to_string();
        if self.artifact_extension.is_empty() {
            return Err(UnpycError::Config("artifact_extension must not be empty".to_string()));
        }
        self.workers = clamp_workers(self.workers as i64);
        Ok(self)
    }
}

/// Input root: `UNPYC_SOURCE` if set, else the first existing well-known
/// location, else the first candidate.
pub fn resolve_source_root() -> PathBuf {
    if let Some(path) = std::env::var_os(SOURCE_ENV_VAR) {
        return PathBuf::from(path);
    }
    WELL_KNOWN_SOURCE_ROOTS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from(WELL_KNOWN_SOURCE_ROOTS[0]))
}

#[pyfunction]
pub fn default_source_root() -> String {
    resolve_source_root().to_string_lossy().into_owned()
}
