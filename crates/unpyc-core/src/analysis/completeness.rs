//! Decide whether a stubbed definition in decompiled text hides lost code.
//!
//! The bytecode is ground truth: a `pass` body is only trusted when the
//! matching code object is itself trivially empty.

use tracing::debug;

use crate::bytecode::code::CodeUnit;
use crate::bytecode::{BytecodeIndex, UnitId};
use crate::config::DecompilerConfig;
use crate::errors::UnpycError;
use crate::guards::{EMPTY_MAX_CODE_BYTES, EMPTY_MAX_STACK, MAX_GAPS};
use crate::source::scan::{
    count_markers, flagged_definitions, pass_only_definitions, Definition, ItemKind,
};
use crate::source::syntax::is_valid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletenessVerdict {
    EmptyConfirmed,
    StubSuspected,
}

impl CompletenessVerdict {
    pub fn is_suspected(&self) -> bool {
        *self == CompletenessVerdict::StubSuspected
    }
}

/// Empty iff: no nested code, stack depth <= 1, no referenced names and an
/// instruction stream no longer than "load a constant, return it".
pub fn classify_function(unit: &CodeUnit) -> CompletenessVerdict {
    let empty = !unit.has_nested_code()
        && unit.stacksize <= EMPTY_MAX_STACK
        && unit.names.is_empty()
        && unit.code_size <= EMPTY_MAX_CODE_BYTES;
    if empty {
        CompletenessVerdict::EmptyConfirmed
    } else {
        CompletenessVerdict::StubSuspected
    }
}

/// Empty iff the class body binds nothing beyond compiler metadata.
pub fn classify_class(index: &BytecodeIndex, id: UnitId) -> CompletenessVerdict {
    if index.class_members(id).is_empty() {
        CompletenessVerdict::EmptyConfirmed
    } else {
        CompletenessVerdict::StubSuspected
    }
}

pub fn classify(index: &BytecodeIndex, id: UnitId, kind: ItemKind) -> CompletenessVerdict {
    match kind {
        ItemKind::Function => classify_function(index.unit(id)),
        ItemKind::Class => classify_class(index, id),
    }
}

// ---------------------------------------------------------------------------
// Incomplete items
// ---------------------------------------------------------------------------

/// A definition in decompiled text that needs reconstruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncompleteItem {
    pub name: String,
    pub kind: ItemKind,
    /// 0-based header line.
    pub start_line: usize,
    /// Exclusive; covers trailing gap markers.
    pub end_line: usize,
    pub indent: usize,
    pub enclosing_class: Option<String>,
    pub signature: String,
    pub bases: Vec<String>,
    /// Member names from bytecode (classes only).
    pub members: Vec<String>,
    pub unit: Option<UnitId>,
    /// Several code objects share this name; recovery leaves it alone.
    pub ambiguous: bool,
    pub marker_flagged: bool,
}

impl IncompleteItem {
    fn from_definition(def: Definition, index: Option<&BytecodeIndex>, resolution: Resolution) -> Self {
        let unit = resolution.unit();
        let members = match (def.kind, index, unit) {
            (ItemKind::Class, Some(index), Some(id)) => index
                .class_members(id)
                .into_iter()
                .map(|m| m.name)
                .collect(),
            _ => Vec::new(),
        };
        Self {
            name: def.name,
            kind: def.kind,
            start_line: def.start_line,
            end_line: def.end_line,
            indent: def.indent,
            enclosing_class: def.enclosing_class,
            signature: def.header,
            bases: def.bases,
            members,
            unit,
            ambiguous: matches!(resolution, Resolution::Ambiguous(_)),
            marker_flagged: def.marker_flagged,
        }
    }
}

/// How a definition in text maps onto code objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Unique(UnitId),
    Ambiguous(Vec<UnitId>),
    Missing,
}

impl Resolution {
    pub fn unit(&self) -> Option<UnitId> {
        match self {
            Resolution::Unique(id) => Some(*id),
            _ => None,
        }
    }
}

/// Resolve a text definition to its code object. Ambiguous names keep
/// their candidates but are never bound to one of them.
pub fn resolve(index: &BytecodeIndex, def: &Definition) -> Resolution {
    match index.lookup_scoped(&def.name, def.enclosing_class.as_deref()) {
        Ok(id) => Resolution::Unique(id),
        Err(UnpycError::AmbiguousLookup { name, candidates }) => {
            debug!(%name, candidates = candidates.len(), "ambiguous code object, recovery skipped");
            Resolution::Ambiguous(candidates.iter().filter_map(|path| index.unit_at(path)).collect())
        }
        Err(_) => Resolution::Missing,
    }
}

/// `pass`-only definitions whose bytecode says otherwise. Unresolvable
/// definitions are assumed to be genuinely empty; ambiguous ones count
/// when any candidate has content.
fn suspected_stubs(
    source: &str,
    index: &BytecodeIndex,
    config: &DecompilerConfig,
) -> Vec<(Definition, Resolution)> {
    pass_only_definitions(source, &config.gap_marker, &config.stub_placeholder)
        .into_iter()
        .filter_map(|def| {
            let resolution = resolve(index, &def);
            let suspected = match &resolution {
                Resolution::Unique(id) => classify(index, *id, def.kind).is_suspected(),
                Resolution::Ambiguous(ids) => ids
                    .iter()
                    .any(|id| classify(index, *id, def.kind).is_suspected()),
                Resolution::Missing => false,
            };
            suspected.then_some((def, resolution))
        })
        .collect()
}

/// Whether any `pass`-only definition in `source` hides bytecode content.
pub fn has_suspected_stubs(source: &str, index: &BytecodeIndex, config: &DecompilerConfig) -> bool {
    !suspected_stubs(source, index, config).is_empty()
}

/// Marker-flagged definitions plus bytecode-suspected `pass` stubs, sorted
/// by line with nested items dropped in favour of their container.
pub fn find_incomplete_items(
    source: &str,
    index: Option<&BytecodeIndex>,
    config: &DecompilerConfig,
) -> Vec<IncompleteItem> {
    let mut candidates: Vec<(Definition, Resolution)> = flagged_definitions(source, &config.gap_marker)
        .into_iter()
        .map(|def| {
            let resolution = index.map_or(Resolution::Missing, |index| resolve(index, &def));
            (def, resolution)
        })
        .collect();

    if let Some(index) = index {
        for (def, resolution) in suspected_stubs(source, index, config) {
            let covered = candidates
                .iter()
                .any(|(d, _)| d.start_line <= def.start_line && def.start_line < d.end_line);
            if !covered {
                candidates.push((def, resolution));
            }
        }
    }

    candidates.sort_by_key(|(d, _)| (d.start_line, std::cmp::Reverse(d.end_line)));
    let mut kept: Vec<(Definition, Resolution)> = Vec::new();
    for (def, resolution) in candidates {
        if kept.iter().any(|(outer, _)| outer.contains(&def)) {
            continue;
        }
        kept.push((def, resolution));
    }
    kept.into_iter()
        .map(|(def, resolution)| IncompleteItem::from_definition(def, index, resolution))
        .collect()
}

/// Unresolved gaps in `source`: backend markers plus suspected stubs not
/// already followed by a marker. At least 1 when the text does not parse,
/// `MAX_GAPS` when there is no text.
pub fn count_gaps(source: &str, index: Option<&BytecodeIndex>, config: &DecompilerConfig) -> usize {
    if source.trim().is_empty() {
        return MAX_GAPS;
    }
    let marker = config.gap_marker.as_str();
    let mut gaps = count_markers(source, marker);
    if let Some(index) = index {
        let lines: Vec<&str> = source.lines().collect();
        gaps += suspected_stubs(source, index, config)
            .iter()
            .filter(|(def, _)| !def.placeholder_body)
            .filter(|(def, _)| {
                !lines[def.start_line..def.end_line.min(lines.len())]
                    .iter()
                    .any(|l| l.contains(marker))
            })
            .count();
    }
    if !is_valid(source) {
        gaps = gaps.max(1);
    }
    gaps.min(MAX_GAPS)
}
