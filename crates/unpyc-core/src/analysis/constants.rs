//! Recover module-level constants that a decompiler dropped.
//!
//! Candidates are names stored by the module body but not bound in the
//! decompiled text. Values are rebuilt from the instructions feeding each
//! store: a single constant load, or a run of literal-building ops replayed
//! on a small value stack. Anything else is left alone.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use tracing::debug;

use crate::bytecode::code::CodeUnit;
use crate::bytecode::opcodes::{Instruction, Opcode};
use crate::bytecode::value::dict_insert;
use crate::bytecode::{BytecodeIndex, PyValue};
use crate::guards::MAX_TRACE_WINDOW;
use crate::source::syntax::top_level_bindings;

/// Stored names that are never reported missing.
const SKIP_NAMES: &[&str] = &["annotations", "object", "type", "Exception", "BaseException"];

/// Names the module body stores that the decompiled text never binds.
/// Private and dotted names are skipped. Empty when `source` does not parse.
pub fn find_missing_module_constants(source: &str, index: &BytecodeIndex) -> Vec<String> {
    let Some(bound) = top_level_bindings(source) else {
        return Vec::new();
    };
    let missing: BTreeSet<&str> = index
        .root()
        .stored_names()
        .into_iter()
        .filter(|name| !bound.contains(*name))
        .filter(|name| !SKIP_NAMES.contains(name))
        .filter(|name| !name.starts_with('_') && !name.contains('.'))
        .collect();
    missing.into_iter().map(str::to_string).collect()
}

/// Reconstruct values for `names` from the module body.
///
/// When a name is stored more than once the last store decides; if that
/// store cannot be reconstructed the name is left out.
pub fn recover(index: &BytecodeIndex, names: &[String]) -> IndexMap<String, PyValue> {
    let root = index.root();
    let mut recovered: IndexMap<String, PyValue> = IndexMap::new();
    for (pos, ins) in root.instructions.iter().enumerate() {
        // `global X` at module level compiles to STORE_GLOBAL.
        if !matches!(ins.op, Opcode::StoreName | Opcode::StoreGlobal) {
            continue;
        }
        let Some(name) = root.name_at(ins.arg) else {
            continue;
        };
        if !names.iter().any(|n| n == name) {
            continue;
        }
        match trace_value(root, pos) {
            Some(value) => {
                recovered.insert(name.to_string(), value);
            }
            None => {
                debug!(name, offset = ins.offset, "store value not reconstructible");
                recovered.shift_remove(name);
            }
        }
    }
    recovered
}

/// Value consumed by the store at `store`, if it is a pure literal.
fn trace_value(unit: &CodeUnit, store: usize) -> Option<PyValue> {
    let instructions = &unit.instructions;
    let prev = instructions.get(store.checked_sub(1)?)?;
    if prev.op == Opcode::LoadConst {
        return unit.const_at(prev.arg).filter(|v| v.is_literal()).cloned();
    }

    let mut start = store;
    while start > 0
        && store - start < MAX_TRACE_WINDOW
        && instructions[start - 1].op.builds_literal()
    {
        start -= 1;
    }
    if start == store {
        return None;
    }

    let mut stack: Vec<PyValue> = Vec::new();
    for ins in &instructions[start..store] {
        step(unit, &mut stack, ins)?;
    }
    match stack.as_slice() {
        [value] if value.is_literal() => Some(value.clone()),
        _ => None,
    }
}

fn pop_n(stack: &mut Vec<PyValue>, n: usize) -> Option<Vec<PyValue>> {
    let at = stack.len().checked_sub(n)?;
    Some(stack.split_off(at))
}

/// The container `n` slots from the top (1 = top), as the `*_ADD`,
/// `*_UPDATE` and `*_EXTEND` ops address it.
fn peek_mut(stack: &mut [PyValue], n: usize) -> Option<&mut PyValue> {
    let len = stack.len();
    if n == 0 || n > len {
        return None;
    }
    stack.get_mut(len - n)
}

fn set_add(items: &mut Vec<PyValue>, value: PyValue) {
    if !items.contains(&value) {
        items.push(value);
    }
}

fn step(unit: &CodeUnit, stack: &mut Vec<PyValue>, ins: &Instruction) -> Option<()> {
    let n = ins.arg as usize;
    match ins.op {
        Opcode::LoadConst => stack.push(unit.const_at(ins.arg)?.clone()),
        Opcode::BuildTuple => {
            let items = pop_n(stack, n)?;
            stack.push(PyValue::Tuple(items));
        }
        Opcode::BuildList => {
            let items = pop_n(stack, n)?;
            stack.push(PyValue::List(items));
        }
        Opcode::BuildSet => {
            let mut items = Vec::new();
            for item in pop_n(stack, n)? {
                set_add(&mut items, item);
            }
            stack.push(PyValue::Set(items));
        }
        Opcode::BuildMap => {
            let flat = pop_n(stack, n.checked_mul(2)?)?;
            let mut pairs = Vec::new();
            let mut iter = flat.into_iter();
            while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                dict_insert(&mut pairs, key, value);
            }
            stack.push(PyValue::Dict(pairs));
        }
        Opcode::BuildConstKeyMap => {
            let keys = stack.pop()?;
            let keys = keys.items()?.to_vec();
            if keys.len() != n {
                return None;
            }
            let values = pop_n(stack, n)?;
            let mut pairs = Vec::new();
            for (key, value) in keys.into_iter().zip(values) {
                dict_insert(&mut pairs, key, value);
            }
            stack.push(PyValue::Dict(pairs));
        }
        Opcode::MapAdd => {
            let value = stack.pop()?;
            let key = stack.pop()?;
            let PyValue::Dict(pairs) = peek_mut(stack, n)? else {
                return None;
            };
            dict_insert(pairs, key, value);
        }
        Opcode::DictUpdate => {
            let PyValue::Dict(update) = stack.pop()? else {
                return None;
            };
            let PyValue::Dict(pairs) = peek_mut(stack, n)? else {
                return None;
            };
            for (key, value) in update {
                dict_insert(pairs, key, value);
            }
        }
        Opcode::ListExtend => {
            let source = stack.pop()?;
            let items = source.items()?.to_vec();
            let PyValue::List(list) = peek_mut(stack, n)? else {
                return None;
            };
            list.extend(items);
        }
        Opcode::SetUpdate => {
            let source = stack.pop()?;
            let items = source.items()?.to_vec();
            let PyValue::Set(set) = peek_mut(stack, n)? else {
                return None;
            };
            for item in items {
                set_add(set, item);
            }
        }
        Opcode::ListAppend => {
            let value = stack.pop()?;
            let PyValue::List(list) = peek_mut(stack, n)? else {
                return None;
            };
            list.push(value);
        }
        Opcode::SetAdd => {
            let value = stack.pop()?;
            let PyValue::Set(set) = peek_mut(stack, n)? else {
                return None;
            };
            set_add(set, value);
        }
        _ => return None,
    }
    Some(())
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Keys sort when they are all integers or all strings; otherwise the
/// encounter order is kept.
fn ordered_pairs(pairs: &[(PyValue, PyValue)]) -> Vec<&(PyValue, PyValue)> {
    let mut ordered: Vec<&(PyValue, PyValue)> = pairs.iter().collect();
    if pairs.iter().all(|(k, _)| matches!(k, PyValue::Int(_))) {
        ordered.sort_by_key(|(k, _)| match k {
            PyValue::Int(v) => *v,
            _ => 0,
        });
    } else if pairs.iter().all(|(k, _)| matches!(k, PyValue::Str(_))) {
        ordered.sort_by(|(a, _), (b, _)| a.as_str().cmp(&b.as_str()));
    }
    ordered
}

/// Render `name = value` as source. Non-empty dicts, lists and tuples of
/// tuples get one item per line; everything else is a single line.
pub fn format_constant(name: &str, value: &PyValue) -> String {
    match value {
        PyValue::Dict(pairs) if !pairs.is_empty() => {
            let mut lines = vec![format!("{name} = {{")];
            for (key, val) in ordered_pairs(pairs) {
                lines.push(format!("    {}: {},", key.repr(), val.repr()));
            }
            lines.push("}".to_string());
            lines.join("\n")
        }
        PyValue::Tuple(items) if matches!(items.first(), Some(PyValue::Tuple(_))) => {
            let mut lines = vec![format!("{name} = (")];
            lines.extend(items.iter().map(|item| format!("    {},", item.repr())));
            lines.push(")".to_string());
            lines.join("\n")
        }
        PyValue::List(items) if !items.is_empty() => {
            let mut lines = vec![format!("{name} = [")];
            lines.extend(items.iter().map(|item| format!("    {},", item.repr())));
            lines.push("]".to_string());
            lines.join("\n")
        }
        other => format!("{name} = {}", other.repr()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::index::tests::sample_index;
    use crate::bytecode::literal::parse_assignment;
    use crate::bytecode::marshal::testing::{build_pyc, CodeSpec, ConstSpec};
    use crate::bytecode::PyVersion;

    fn ins(op: Opcode, arg: u32) -> Instruction {
        Instruction { offset: 0, op, arg }
    }

    fn module(consts: Vec<PyValue>, names: &[&str], instructions: Vec<Instruction>) -> CodeUnit {
        let mut unit = CodeUnit::empty("<module>", PyVersion::new(3, 11));
        unit.consts = consts;
        unit.names = names.iter().map(|s| s.to_string()).collect();
        unit.instructions = instructions;
        unit
    }

    fn s(v: &str) -> PyValue {
        PyValue::Str(v.to_string())
    }

    /// Dicts compare as mappings; everything else structurally.
    fn same(a: &PyValue, b: &PyValue) -> bool {
        match (a, b) {
            (PyValue::Dict(x), PyValue::Dict(y)) => {
                x.len() == y.len()
                    && x.iter().all(|(k, v)| {
                        y.iter().any(|(k2, v2)| k == k2 && same(v, v2))
                    })
            }
            (PyValue::Tuple(x), PyValue::Tuple(y)) | (PyValue::List(x), PyValue::List(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(p, q)| same(p, q))
            }
            _ => a == b,
        }
    }

    #[test]
    fn test_missing_constants_and_tuple_recovery() {
        let index = sample_index();
        let source = "class Device:\n    def connect(self, port):\n        open(port)\n";
        let missing = find_missing_module_constants(source, &index);
        assert_eq!(missing, vec!["COLORS"]);
        let recovered = recover(&index, &missing);
        let value = PyValue::Tuple(vec![PyValue::Int(1), PyValue::Int(2), PyValue::Int(3)]);
        assert_eq!(recovered.get("COLORS"), Some(&value));
        assert_eq!(format_constant("COLORS", &value), "COLORS = (1, 2, 3)");
    }

    #[test]
    fn test_missing_constants_respects_bindings_and_skips() {
        let index = sample_index();
        assert!(find_missing_module_constants("class Device: pass\nCOLORS = ()\n", &index).is_empty());
        assert!(find_missing_module_constants("from palette import COLORS\nclass Device: pass\n", &index).is_empty());
        assert!(find_missing_module_constants("def broken(:\n", &index).is_empty());
    }

    #[test]
    fn test_const_key_map_with_dict_update() {
        // BUILD_MAP 0; v1 v2 ('a','b') BUILD_CONST_KEY_MAP 2; DICT_UPDATE 1;
        // 'a' 9 MAP_ADD 1; STORE_NAME TABLE
        let unit = module(
            vec![PyValue::Int(1), PyValue::Int(2), PyValue::Tuple(vec![s("a"), s("b")]), s("a"), PyValue::Int(9)],
            &["TABLE"],
            vec![
                ins(Opcode::BuildMap, 0),
                ins(Opcode::LoadConst, 0),
                ins(Opcode::LoadConst, 1),
                ins(Opcode::LoadConst, 2),
                ins(Opcode::BuildConstKeyMap, 2),
                ins(Opcode::DictUpdate, 1),
                ins(Opcode::LoadConst, 3),
                ins(Opcode::LoadConst, 4),
                ins(Opcode::MapAdd, 1),
                ins(Opcode::StoreName, 0),
            ],
        );
        let value = trace_value(&unit, 9).unwrap();
        assert_eq!(
            value,
            PyValue::Dict(vec![(s("a"), PyValue::Int(9)), (s("b"), PyValue::Int(2))])
        );
    }

    #[test]
    fn test_list_and_set_builders() {
        let unit = module(
            vec![
                PyValue::Tuple(vec![PyValue::Int(1), PyValue::Int(2)]),
                PyValue::FrozenSet(vec![s("x"), s("y")]),
            ],
            &["ITEMS", "TAGS"],
            vec![
                ins(Opcode::BuildList, 0),
                ins(Opcode::LoadConst, 0),
                ins(Opcode::ListExtend, 1),
                ins(Opcode::StoreName, 0),
                ins(Opcode::BuildSet, 0),
                ins(Opcode::LoadConst, 1),
                ins(Opcode::SetUpdate, 1),
                ins(Opcode::StoreName, 1),
            ],
        );
        assert_eq!(
            trace_value(&unit, 3),
            Some(PyValue::List(vec![PyValue::Int(1), PyValue::Int(2)]))
        );
        assert_eq!(trace_value(&unit, 7), Some(PyValue::Set(vec![s("x"), s("y")])));
    }

    #[test]
    fn test_non_literal_sources_are_skipped() {
        let unit = module(
            vec![PyValue::Int(1)],
            &["foo", "X", "Y"],
            vec![
                ins(Opcode::LoadName, 0),
                ins(Opcode::LoadConst, 0),
                ins(Opcode::BuildList, 2),
                ins(Opcode::StoreName, 1),
                ins(Opcode::LoadConst, 0),
                ins(Opcode::LoadConst, 0),
                ins(Opcode::BuildTuple, 1),
                ins(Opcode::StoreName, 2),
            ],
        );
        assert_eq!(trace_value(&unit, 3), None);
        // A value left under the result means the window is not one statement.
        assert_eq!(trace_value(&unit, 7), None);
        assert_eq!(trace_value(&unit, 0), None);
    }

    #[test]
    fn test_global_store_in_module_body() {
        let module = CodeSpec {
            name: "<module>".into(),
            stacksize: 1,
            // LOAD_CONST 0; STORE_GLOBAL LIMITS; LOAD_CONST 1; RETURN_VALUE
            code: vec![100, 0, 97, 0, 100, 1, 83, 0],
            consts: vec![
                ConstSpec::Value(PyValue::Tuple(vec![PyValue::Int(4), PyValue::Int(8)])),
                ConstSpec::Value(PyValue::None),
            ],
            names: vec!["LIMITS".into()],
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("globals.pyc");
        std::fs::write(&path, build_pyc(&module, PyVersion::new(3, 9))).unwrap();
        let index = BytecodeIndex::load(&path).unwrap();

        let missing = find_missing_module_constants("global LIMITS\n", &index);
        assert_eq!(missing, vec!["LIMITS"]);
        let recovered = recover(&index, &missing);
        assert_eq!(
            recovered.get("LIMITS"),
            Some(&PyValue::Tuple(vec![PyValue::Int(4), PyValue::Int(8)]))
        );
    }

    #[test]
    fn test_recovery_is_idempotent() {
        let index = sample_index();
        let names = vec!["COLORS".to_string(), "Device".to_string()];
        let first = recover(&index, &names);
        let second = recover(&index, &names);
        assert_eq!(first, second);
        assert!(!first.contains_key("Device"));
    }

    #[test]
    fn test_format_shapes() {
        let dict = PyValue::Dict(vec![(s("b"), PyValue::Int(2)), (s("a"), PyValue::Int(1))]);
        assert_eq!(format_constant("D", &dict), "D = {\n    'a': 1,\n    'b': 2,\n}");
        assert_eq!(format_constant("E", &PyValue::Dict(vec![])), "E = {}");
        let table = PyValue::Tuple(vec![
            PyValue::Tuple(vec![PyValue::Int(0), PyValue::Int(0)]),
            PyValue::Tuple(vec![PyValue::Int(255), PyValue::Int(0)]),
        ]);
        assert_eq!(format_constant("T", &table), "T = (\n    (0, 0),\n    (255, 0),\n)");
        assert_eq!(format_constant("L", &PyValue::List(vec![])), "L = []");
        assert_eq!(format_constant("U", &PyValue::Tuple(vec![])), "U = ()");
        assert_eq!(format_constant("N", &PyValue::None), "N = None");
        let mixed = PyValue::Dict(vec![(PyValue::Int(2), s("x")), (s("k"), PyValue::Int(1))]);
        assert_eq!(format_constant("M", &mixed), "M = {\n    2: 'x',\n    'k': 1,\n}");
    }

    #[test]
    fn test_formatted_values_parse_back() {
        let values = vec![
            PyValue::Dict(vec![
                (PyValue::Int(3), PyValue::Tuple(vec![PyValue::Int(1)])),
                (PyValue::Int(-1), s("it's")),
            ]),
            PyValue::Tuple(vec![
                PyValue::Tuple(vec![PyValue::Float(0.5), PyValue::Bool(true)]),
            ]),
            PyValue::List(vec![PyValue::None, PyValue::Bytes(b"\x00ab".to_vec())]),
            PyValue::Tuple(vec![s("solo")]),
        ];
        for value in values {
            let text = format_constant("V", &value);
            let (name, parsed) = parse_assignment(&text).unwrap();
            assert_eq!(name, "V");
            assert!(same(&parsed, &value), "{text}");
        }
    }
}
