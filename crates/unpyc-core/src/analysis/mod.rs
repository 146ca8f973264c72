//! Bytecode-backed analysis of decompiled text.

pub mod completeness;
pub mod constants;

pub use completeness::{
    classify, count_gaps, find_incomplete_items, CompletenessVerdict, IncompleteItem,
};
