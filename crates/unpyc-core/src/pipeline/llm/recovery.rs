//! Agent-driven reconstruction of items the bytecode repair left behind.
//!
//! Each incomplete item moves `Pending -> Prompted -> Accepted | Rejected`.
//! Accepted code is spliced bottom-up; the document is committed only if
//! the final text parses, otherwise the input comes back untouched.

use tracing::{debug, info};

use crate::analysis::completeness::{count_gaps, find_incomplete_items, has_suspected_stubs, IncompleteItem};
use crate::bytecode::BytecodeIndex;
use crate::config::DecompilerConfig;
use crate::errors::UnpycError;
use crate::models::DecompileOutcome;
use crate::pipeline::llm::agent::best_response;
use crate::pipeline::llm::prompts::{class_prompt, function_prompt, syntax_fix_prompt, whole_file_prompt};
use crate::pipeline::repair::{indent_block, splice, stub_base};
use crate::source::scan::{count_markers, import_context, ItemKind};
use crate::source::syntax::{check_syntax, is_valid};

pub const STAGE: &str = "llm";

const UNSUPPORTED_OPCODE: &str = "Unsupported opcode:";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Prompted,
    Accepted,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryReport {
    pub source: String,
    /// Documents or items replaced with agent output.
    pub recovered: usize,
    /// Final state per item, in splice order.
    pub items: Vec<(String, ItemState)>,
}

impl RecoveryReport {
    fn unchanged(source: &str) -> Self {
        Self {
            source: source.to_string(),
            recovered: 0,
            items: Vec::new(),
        }
    }
}

fn item_prompt(item: &IncompleteItem, index: &BytecodeIndex, config: &DecompilerConfig, context: &str) -> Option<String> {
    if item.ambiguous {
        return None;
    }
    match item.kind {
        ItemKind::Function => {
            let id = item.unit?;
            let unit = index.unit(id);
            let context = match &item.enclosing_class {
                Some(class) => format!("{context}\n\nclass {class}:\n    # method context"),
                None => context.to_string(),
            };
            Some(function_prompt(
                &unit.signature(&item.name),
                &index.disassembly_of(id),
                &context,
            ))
        }
        ItemKind::Class => {
            let (base, listing) = match item.unit {
                Some(id) => (stub_base(item, index, id, config), index.disassembly_of(id)),
                None if !item.bases.is_empty() => (item.bases.join(", "), index.disassembly_of(index.root_id())),
                None => ("object".to_string(), index.disassembly_of(index.root_id())),
            };
            Some(class_prompt(&item.name, &base, &item.members, &listing, context))
        }
    }
}

/// Ask the agents for a whole document and keep it only if it parses.
fn whole_document(prompt: &str, config: &DecompilerConfig) -> Option<String> {
    best_response(&config.agents, prompt).filter(|code| is_valid(code))
}

/// Drop gap-marker lines and trailing `Unsupported opcode:` notes once
/// nothing in the document still looks stubbed.
pub fn strip_leftover_markers(source: &str, index: &BytecodeIndex, config: &DecompilerConfig) -> String {
    let marker = config.gap_marker.as_str();
    if !source.contains(marker) {
        return source.to_string();
    }
    let mut lines: Vec<&str> = source.split('\n').filter(|l| !l.contains(marker)).collect();
    loop {
        let Some(last) = lines.iter().rposition(|l| !l.trim().is_empty()) else {
            break;
        };
        let text = lines[last].trim().trim_start_matches('#').trim_start();
        if !text.starts_with(UNSUPPORTED_OPCODE) {
            break;
        }
        lines.remove(last);
    }
    let stripped = lines.join("\n");
    if is_valid(&stripped) && !has_suspected_stubs(&stripped, index, config) {
        stripped
    } else {
        source.to_string()
    }
}

/// Run the agents over one document.
pub fn recover_document(source: &str, index: &BytecodeIndex, config: &DecompilerConfig) -> RecoveryReport {
    let listing = index.disassembly_of(index.root_id());
    let mut working = source.to_string();
    let mut recovered = 0;

    if let Err(UnpycError::SyntaxInvalid(error)) = check_syntax(&working) {
        if let Some(fixed) = whole_document(&syntax_fix_prompt(&working, &error, &listing), config) {
            debug!("syntax fix accepted");
            working = fixed;
            recovered += 1;
        } else {
            return match whole_document(&whole_file_prompt(&working, &listing), config) {
                Some(code) => RecoveryReport {
                    source: code,
                    recovered: 1,
                    items: Vec::new(),
                },
                None => RecoveryReport::unchanged(source),
            };
        }
    }

    let mut items = find_incomplete_items(&working, Some(index), config);
    if items.is_empty() {
        if count_markers(&working, &config.gap_marker) > 0 {
            if let Some(code) = whole_document(&whole_file_prompt(&working, &listing), config)
                .filter(|code| !code.contains(config.gap_marker.as_str()))
            {
                recovered += 1;
                working = code;
            }
        }
        return RecoveryReport {
            source: working,
            recovered,
            items: Vec::new(),
        };
    }

    let context = import_context(&working, config.context_lines);
    let mut lines: Vec<String> = working.split('\n').map(str::to_string).collect();
    items.sort_by_key(|item| std::cmp::Reverse(item.start_line));
    let mut states: Vec<(String, ItemState)> = items
        .iter()
        .map(|item| (item.name.clone(), ItemState::Pending))
        .collect();
    for (item, (_, state)) in items.iter().zip(states.iter_mut()) {
        let Some(prompt) = item_prompt(item, index, config, &context) else {
            *state = ItemState::Rejected;
            continue;
        };
        *state = ItemState::Prompted;
        debug!(item = %item.name, kind = item.kind.label(), "prompting agents");
        *state = match best_response(&config.agents, &prompt) {
            Some(code) => {
                splice(&mut lines, item.start_line, item.end_line, &indent_block(&code, item.indent));
                recovered += 1;
                ItemState::Accepted
            }
            None => ItemState::Rejected,
        };
        debug!(item = %item.name, state = ?*state, "llm item settled");
    }

    let spliced = strip_leftover_markers(&lines.join("\n"), index, config);
    if !is_valid(&spliced) {
        debug!("recovered document does not parse, discarding");
        return RecoveryReport::unchanged(source);
    }
    RecoveryReport {
        source: spliced,
        recovered,
        items: states,
    }
}

/// LLM stage of the pipeline. Returns the input unless something was
/// recovered into a document that parses.
pub fn recover(outcome: &DecompileOutcome, index: &BytecodeIndex, config: &DecompilerConfig) -> DecompileOutcome {
    if !outcome.has_source() || config.agents.is_empty() {
        return outcome.clone();
    }
    let report = recover_document(&outcome.source, index, config);
    if report.recovered == 0 || report.source == outcome.source || !is_valid(&report.source) {
        return outcome.clone();
    }
    let gaps = count_gaps(&report.source, Some(index), config);
    info!(
        backend = %outcome.backend,
        recovered = report.recovered,
        before = outcome.gaps,
        after = gaps,
        "llm recovery"
    );
    outcome.with_stage(STAGE, report.source, gaps)
}
