//! Qualified-name index over every code object of one artifact.
//!
//! Keys are traversal paths from the module body (`<module>.Foo.bar`).
//! Lookups take exact paths or bare/partial names resolved by suffix; a
//! suffix shared by several code objects is reported, never guessed.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::bytecode::code::CodeUnit;
use crate::bytecode::disasm::{parse_report, render_unit};
use crate::bytecode::marshal::read_pyc;
use crate::bytecode::opcodes::Opcode;
use crate::bytecode::{PyVersion, UnitId};
use crate::config::ToolCommand;
use crate::errors::{UnpycError, UnpycResult};
use crate::process::run_with_timeout;

/// Class-body bindings the compiler emits on its own.
pub const STANDARD_CLASS_FIELDS: &[&str] = &[
    "__module__",
    "__qualname__",
    "__doc__",
    "__classcell__",
    "__static_attributes__",
    "__firstlineno__",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberKind {
    /// Bound to a function defined in the class body (code unit if known).
    Method(Option<UnitId>),
    /// Plain class attribute.
    Attribute,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassMember {
    pub name: String,
    pub kind: MemberKind,
}

struct Oracle {
    command: ToolCommand,
    artifact: PathBuf,
}

pub struct BytecodeIndex {
    version: PyVersion,
    units: Vec<CodeUnit>,
    root: UnitId,
    by_path: IndexMap<String, UnitId>,
    /// Report text per unit when the index was built from a report.
    report_slices: Option<Vec<String>>,
    oracle: Option<Oracle>,
    oracle_slices: OnceLock<Option<HashMap<String, String>>>,
}

impl std::fmt::Debug for BytecodeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BytecodeIndex")
            .field("version", &self.version)
            .field("units", &self.units.len())
            .finish()
    }
}

impl BytecodeIndex {
    /// Read a compiled artifact with the native loader.
    pub fn load(path: &Path) -> UnpycResult<Self> {
        let data = std::fs::read(path)?;
        let module = read_pyc(&data)?;
        debug!(artifact = %path.display(), units = module.units.len(), "loaded bytecode");
        Ok(Self::build(module.version, module.units, module.root, None))
    }

    /// Build an index from a disassembler report.
    pub fn from_report(report: &str) -> UnpycResult<Self> {
        let parsed = parse_report(report)?;
        Ok(Self::build(
            parsed.version,
            parsed.units,
            parsed.root,
            Some(parsed.slices),
        ))
    }

    /// Native loader first; on `UnsupportedFormat` fall back to the
    /// disassembler's report. The disassembler, when configured, also
    /// serves as the oracle for `disassembly`.
    pub fn open(path: &Path, disassembler: Option<&ToolCommand>) -> UnpycResult<Self> {
        match Self::load(path) {
            Ok(mut index) => {
                index.oracle = disassembler.map(|command| Oracle {
                    command: command.clone(),
                    artifact: path.to_path_buf(),
                });
                Ok(index)
            }
            Err(UnpycError::UnsupportedFormat(reason)) => {
                let Some(command) = disassembler else {
                    return Err(UnpycError::UnsupportedFormat(reason));
                };
                debug!(artifact = %path.display(), %reason, "native loader declined, using disassembler");
                let report = run_disassembler(command, path)?;
                Self::from_report(&report)
            }
            Err(other) => Err(other),
        }
    }

    fn build(
        version: PyVersion,
        mut units: Vec<CodeUnit>,
        root: UnitId,
        report_slices: Option<Vec<String>>,
    ) -> Self {
        let by_path = assign_paths(&mut units, root);
        Self {
            version,
            units,
            root,
            by_path,
            report_slices,
            oracle: None,
            oracle_slices: OnceLock::new(),
        }
    }

    pub fn version(&self) -> PyVersion {
        self.version
    }

    pub fn root(&self) -> &CodeUnit {
        &self.units[self.root.0]
    }

    pub fn root_id(&self) -> UnitId {
        self.root
    }

    pub fn unit(&self, id: UnitId) -> &CodeUnit {
        &self.units[id.0]
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.by_path.keys().map(String::as_str)
    }

    /// Unit stored under exactly `path`, including `#n` duplicate keys.
    pub fn unit_at(&self, path: &str) -> Option<UnitId> {
        self.by_path.get(path).copied()
    }

    pub fn lookup_id(&self, name: &str) -> UnpycResult<UnitId> {
        if name.contains('#') {
            if let Some(id) = self.unit_at(name) {
                return Ok(id);
            }
        }
        let exact: Vec<(&String, UnitId)> = self
            .by_path
            .iter()
            .filter(|(path, _)| plain_path(path) == name)
            .map(|(path, id)| (path, *id))
            .collect();
        if !exact.is_empty() {
            return single_match(name, exact);
        }
        let suffix = format!(".{name}");
        let candidates: Vec<(&String, UnitId)> = self
            .by_path
            .iter()
            .filter(|(path, _)| plain_path(path).ends_with(&suffix))
            .map(|(path, id)| (path, *id))
            .collect();
        single_match(name, candidates)
    }

    /// Exact path first, then a unique suffix match.
    pub fn lookup(&self, name: &str) -> UnpycResult<&CodeUnit> {
        self.lookup_id(name).map(|id| self.unit(id))
    }

    /// Resolve a definition found in source text. Methods try
    /// `Class.name` first; top-level definitions try the module path first.
    pub fn lookup_scoped(&self, name: &str, class: Option<&str>) -> UnpycResult<UnitId> {
        let scoped = match class {
            Some(class) => format!("{class}.{name}"),
            None => format!("{}.{name}", self.root().path),
        };
        match self.lookup_id(&scoped) {
            Err(UnpycError::NotFound(_)) => self.lookup_id(name),
            other => other,
        }
    }

    /// Members bound in a class body, excluding compiler-generated fields.
    ///
    /// With an instruction stream, members are the `STORE_NAME` targets of
    /// the body plus any nested function not stored by name. Without one
    /// (oracle reports lacking a listing) the names table stands in and
    /// every entry is treated as a method.
    pub fn class_members(&self, id: UnitId) -> Vec<ClassMember> {
        let unit = self.unit(id);
        let methods: HashMap<&str, UnitId> = unit
            .children
            .iter()
            .map(|child| (self.unit(*child).name.as_str(), *child))
            .filter(|(name, _)| !name.starts_with('<'))
            .collect();

        let mut members: Vec<ClassMember> = Vec::new();
        let mut push = |name: &str, kind: MemberKind| {
            if STANDARD_CLASS_FIELDS.contains(&name) || members.iter().any(|m| m.name == name) {
                return;
            }
            members.push(ClassMember {
                name: name.to_string(),
                kind,
            });
        };

        if unit.instructions.is_empty() {
            for name in unit.names.iter().filter(|n| n.as_str() != "__name__") {
                push(name, MemberKind::Method(methods.get(name.as_str()).copied()));
            }
            return members;
        }

        for ins in unit.instructions.iter().filter(|i| i.op == Opcode::StoreName) {
            if let Some(name) = unit.name_at(ins.arg) {
                let kind = match methods.get(name) {
                    Some(child) => MemberKind::Method(Some(*child)),
                    None => MemberKind::Attribute,
                };
                push(name, kind);
            }
        }
        for child in &unit.children {
            let name = self.unit(*child).name.as_str();
            if !name.starts_with('<') {
                push(name, MemberKind::Method(Some(*child)));
            }
        }
        members
    }

    /// Report text for one code object (children included).
    ///
    /// Report-built indexes return their own slice; otherwise the
    /// disassembler runs once per index and its slices are reused. Without
    /// a usable disassembler the listing is rendered from the code unit.
    pub fn disassembly(&self, name: &str) -> UnpycResult<String> {
        let id = self.lookup_id(name)?;
        Ok(self.disassembly_of(id))
    }

    pub fn disassembly_of(&self, id: UnitId) -> String {
        if let Some(slice) = self.report_slices.as_ref().and_then(|s| s.get(id.0)) {
            return slice.clone();
        }
        let path = &self.unit(id).path;
        if let Some(slice) = self
            .oracle_slices
            .get_or_init(|| self.load_oracle_slices())
            .as_ref()
            .and_then(|slices| slices.get(path))
        {
            return slice.clone();
        }
        render_unit(&self.units, id)
    }

    fn load_oracle_slices(&self) -> Option<HashMap<String, String>> {
        let oracle = self.oracle.as_ref()?;
        let report = match run_disassembler(&oracle.command, &oracle.artifact) {
            Ok(report) => report,
            Err(e) => {
                debug!(error = %e, "disassembler unavailable, rendering listings");
                return None;
            }
        };
        let parsed = match parse_report(&report) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "disassembler report did not parse");
                return None;
            }
        };
        let mut units = parsed.units;
        let paths = assign_paths(&mut units, parsed.root);
        Some(
            paths
                .into_iter()
                .filter_map(|(path, id)| parsed.slices.get(id.0).map(|s| (path, s.clone())))
                .collect(),
        )
    }
}

fn run_disassembler(command: &ToolCommand, artifact: &Path) -> UnpycResult<String> {
    let mut args = command.args.clone();
    args.push(artifact.to_string_lossy().into_owned());
    let output = run_with_timeout(&command.program, &args, command.timeout()).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            UnpycError::BackendUnavailable(command.program.clone())
        } else {
            UnpycError::Io(e)
        }
    })?;
    if !output.success() || output.stdout.trim().is_empty() {
        return Err(UnpycError::BackendCrash {
            backend: command.program.clone(),
            detail: format!("{:?}: {}", output.exit, output.stderr.trim()),
        });
    }
    Ok(output.stdout)
}

/// `path` with the `#n` duplicate tags removed from every segment.
fn plain_path(path: &str) -> Cow<'_, str> {
    if !path.contains('#') {
        return Cow::Borrowed(path);
    }
    let segments: Vec<&str> = path
        .split('.')
        .map(|segment| match segment.split_once('#') {
            Some((head, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => head,
            _ => segment,
        })
        .collect();
    Cow::Owned(segments.join("."))
}

fn single_match(name: &str, matches: Vec<(&String, UnitId)>) -> UnpycResult<UnitId> {
    match matches.as_slice() {
        [] => Err(UnpycError::NotFound(name.to_string())),
        [(_, id)] => Ok(*id),
        many => Err(UnpycError::AmbiguousLookup {
            name: name.to_string(),
            candidates: many.iter().map(|(p, _)| (*p).clone()).collect(),
        }),
    }
}

/// Assign traversal paths depth-first from `root`. Repeated paths get a
/// `#n` tag to keep keys unique; lookups still see them under the plain
/// name, so duplicates surface as ambiguity.
fn assign_paths(units: &mut [CodeUnit], root: UnitId) -> IndexMap<String, UnitId> {
    let mut by_path = IndexMap::new();
    let mut visited: HashSet<UnitId> = HashSet::new();
    let mut stack: Vec<(UnitId, Option<String>)> = vec![(root, None)];
    let root_name = units.get(root.0).map(|u| u.name.clone()).unwrap_or_default();

    while let Some((id, parent)) = stack.pop() {
        if id.0 >= units.len() || !visited.insert(id) {
            continue;
        }
        let name = units[id.0].name.clone();
        let base = match &parent {
            Some(parent) => format!("{parent}.{name}"),
            None => name.clone(),
        };
        let mut path = base.clone();
        let mut n = 2;
        while by_path.contains_key(&path) {
            path = format!("{base}#{n}");
            n += 1;
        }
        by_path.insert(path.clone(), id);

        let unit = &mut units[id.0];
        if parent.is_some() && unit.qualname == unit.name {
            let prefix = format!("{root_name}.");
            unit.qualname = base.strip_prefix(&prefix).unwrap_or(&base).to_string();
        }
        unit.path = path.clone();
        for child in unit.children.iter().rev() {
            stack.push((*child, Some(path.clone())));
        }
    }
    by_path
}
