//! Bytecode repair: replace incomplete definitions with stubs rebuilt from
//! their code objects and append module constants the backend dropped.

use tracing::debug;

use crate::analysis::completeness::{count_gaps, find_incomplete_items, IncompleteItem};
use crate::analysis::constants::{find_missing_module_constants, format_constant, recover};
use crate::bytecode::index::MemberKind;
use crate::bytecode::{BytecodeIndex, UnitId};
use crate::config::DecompilerConfig;
use crate::models::DecompileOutcome;
use crate::source::scan::ItemKind;

pub const STAGE: &str = "bytecode";

const INIT_STUB: &str = "def __init__(self, *a, **k):\n    super().__init__(*a, **k)";

/// Prefix every non-blank line with `spaces` spaces.
pub fn indent_block(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn placeholder_comment(config: &DecompilerConfig) -> String {
    config
        .stub_placeholder
        .find('#')
        .map(|at| format!("  {}", &config.stub_placeholder[at..]))
        .unwrap_or_default()
}

fn method_stub(index: &BytecodeIndex, name: &str, unit: Option<UnitId>, config: &DecompilerConfig) -> String {
    if name == "__init__" {
        return INIT_STUB.to_string();
    }
    let header = match unit {
        Some(id) => index.unit(id).signature(name),
        None => format!("def {name}(self)"),
    };
    format!("{header}:\n    {}", config.stub_placeholder)
}

/// Base class for a stub: the one written in the text, else the first
/// referenced name that looks like a base, else `object`.
pub fn stub_base(item: &IncompleteItem, index: &BytecodeIndex, id: UnitId, config: &DecompilerConfig) -> String {
    if !item.bases.is_empty() {
        return item.bases.join(", ");
    }
    index
        .unit(id)
        .names
        .iter()
        .find(|name| {
            config.base_class_names.iter().any(|b| b == *name)
                || config
                    .base_class_suffixes
                    .iter()
                    .any(|suffix| name.ends_with(suffix.as_str()))
        })
        .cloned()
        .unwrap_or_else(|| "object".to_string())
}

pub fn class_stub(item: &IncompleteItem, index: &BytecodeIndex, id: UnitId, config: &DecompilerConfig) -> String {
    let comment = placeholder_comment(config);
    let members: Vec<String> = index
        .class_members(id)
        .into_iter()
        .map(|member| match member.kind {
            MemberKind::Method(unit) => method_stub(index, &member.name, unit, config),
            MemberKind::Attribute => format!("{} = None{comment}", member.name),
        })
        .map(|stub| indent_block(&stub, 4))
        .collect();
    let body = if members.is_empty() {
        "    pass".to_string()
    } else {
        members.join("\n\n")
    };
    format!("class {}({}):\n{body}", item.name, stub_base(item, index, id, config))
}

pub fn function_stub(item: &IncompleteItem, index: &BytecodeIndex, id: UnitId, config: &DecompilerConfig) -> String {
    if item.name == "__init__" && item.enclosing_class.is_some() {
        return INIT_STUB.to_string();
    }
    method_stub(index, &item.name, Some(id), config)
}

/// Stub text for an item at its original indentation, if its code object
/// is known.
pub fn build_stub(item: &IncompleteItem, index: &BytecodeIndex, config: &DecompilerConfig) -> Option<String> {
    let id = item.unit?;
    let stub = match item.kind {
        ItemKind::Function => function_stub(item, index, id, config),
        ItemKind::Class => class_stub(item, index, id, config),
    };
    Some(indent_block(&stub, item.indent))
}

/// Replace `lines[start..end]` with `replacement` split into lines.
pub fn splice(lines: &mut Vec<String>, start: usize, end: usize, replacement: &str) {
    let end = end.min(lines.len());
    let start = start.min(end);
    lines.splice(start..end, replacement.split('\n').map(str::to_string));
}

pub fn append_constants(source: &str, constants: &[String]) -> String {
    format!("{}\n\n{}\n", source.trim_end(), constants.join("\n\n"))
}

/// Patch `outcome` using bytecode. The result is accepted only when it
/// has no more gaps than the input and either has fewer gaps or differs.
pub fn repair(outcome: &DecompileOutcome, index: &BytecodeIndex, config: &DecompilerConfig) -> DecompileOutcome {
    if !outcome.has_source() {
        return outcome.clone();
    }
    let before = count_gaps(&outcome.source, Some(index), config);

    let mut lines: Vec<String> = outcome.source.split('\n').map(str::to_string).collect();
    let mut items = find_incomplete_items(&outcome.source, Some(index), config);
    items.sort_by_key(|item| std::cmp::Reverse(item.start_line));
    let mut stubbed = 0;
    for item in &items {
        if let Some(stub) = build_stub(item, index, config) {
            splice(&mut lines, item.start_line, item.end_line, &stub);
            stubbed += 1;
        }
    }
    let mut repaired = lines.join("\n");

    let missing = find_missing_module_constants(&repaired, index);
    let recovered = recover(index, &missing);
    if !recovered.is_empty() {
        let rendered: Vec<String> = recovered
            .iter()
            .map(|(name, value)| format_constant(name, value))
            .collect();
        repaired = append_constants(&repaired, &rendered);
    }

    let after = count_gaps(&repaired, Some(index), config);
    debug!(
        backend = %outcome.backend,
        before,
        after,
        stubbed,
        constants = recovered.len(),
        "bytecode repair"
    );
    if after <= before && (after < before || repaired != outcome.source) {
        outcome.with_stage(STAGE, repaired, after)
    } else {
        outcome.clone()
    }
}
