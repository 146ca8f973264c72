//! Constant values held in code-object constant pools.
//!
//! `PyValue` covers everything the marshal format and the disassembler
//! report can express.  `repr()` renders a value the way CPython's `repr`
//! does so recovered constants can be written back as source literals.

use std::fmt::Write as _;

use crate::bytecode::UnitId;

#[derive(Clone, Debug, PartialEq)]
pub enum PyValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Complex(f64, f64),
    Str(String),
    Bytes(Vec<u8>),
    Ellipsis,
    Tuple(Vec<PyValue>),
    List(Vec<PyValue>),
    Set(Vec<PyValue>),
    FrozenSet(Vec<PyValue>),
    /// Key/value pairs in insertion order.
    Dict(Vec<(PyValue, PyValue)>),
    /// Nested code object, owned by the enclosing `BytecodeIndex`.
    Code(UnitId),
    /// Something we can carry around but never render (huge ints, unknown types).
    Opaque(String),
}

impl PyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_code(&self) -> Option<UnitId> {
        match self {
            PyValue::Code(id) => Some(*id),
            _ => None,
        }
    }

    /// Items of a sequence-like value.
    pub fn items(&self) -> Option<&[PyValue]> {
        match self {
            PyValue::Tuple(v) | PyValue::List(v) | PyValue::Set(v) | PyValue::FrozenSet(v) => {
                Some(v)
            }
            _ => None,
        }
    }

    /// True when `repr()` produces source that evaluates back to this value.
    pub fn is_literal(&self) -> bool {
        match self {
            PyValue::Code(_) | PyValue::Opaque(_) => false,
            PyValue::Tuple(v) | PyValue::List(v) | PyValue::Set(v) | PyValue::FrozenSet(v) => {
                v.iter().all(PyValue::is_literal)
            }
            PyValue::Dict(pairs) => pairs.iter().all(|(k, v)| k.is_literal() && v.is_literal()),
            _ => true,
        }
    }

    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out);
        out
    }

    fn write_repr(&self, out: &mut String) {
        match self {
            PyValue::None => out.push_str("None"),
            PyValue::Bool(true) => out.push_str("True"),
            PyValue::Bool(false) => out.push_str("False"),
            PyValue::Int(v) => {
                let _ = write!(out, "{v}");
            }
            PyValue::Float(v) => out.push_str(&float_repr(*v)),
            PyValue::Complex(re, im) => out.push_str(&complex_repr(*re, *im)),
            PyValue::Str(s) => out.push_str(&str_repr(s)),
            PyValue::Bytes(b) => out.push_str(&bytes_repr(b)),
            PyValue::Ellipsis => out.push_str("..."),
            PyValue::Tuple(items) => {
                out.push('(');
                write_items(out, items);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            PyValue::List(items) => {
                out.push('[');
                write_items(out, items);
                out.push(']');
            }
            PyValue::Set(items) => {
                if items.is_empty() {
                    out.push_str("set()");
                } else {
                    out.push('{');
                    write_items(out, items);
                    out.push('}');
                }
            }
            PyValue::FrozenSet(items) => {
                if items.is_empty() {
                    out.push_str("frozenset()");
                } else {
                    out.push_str("frozenset({");
                    write_items(out, items);
                    out.push_str("})");
                }
            }
            PyValue::Dict(pairs) => {
                out.push('{');
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out);
                    out.push_str(": ");
                    v.write_repr(out);
                }
                out.push('}');
            }
            PyValue::Code(id) => {
                let _ = write!(out, "<code object #{}>", id.0);
            }
            PyValue::Opaque(text) => out.push_str(text),
        }
    }
}

fn write_items(out: &mut String, items: &[PyValue]) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out);
    }
}

/// Insert into an insertion-ordered pair list; an existing key keeps its
/// position and takes the new value.
pub fn dict_insert(pairs: &mut Vec<(PyValue, PyValue)>, key: PyValue, value: PyValue) {
    if let Some(slot) = pairs.iter_mut().find(|(k, _)| *k == key) {
        slot.1 = value;
    } else {
        pairs.push((key, value));
    }
}

/// Shortest round-trip float text, matching CPython's `repr(float)`.
pub fn float_repr(v: f64) -> String {
    if v.is_nan() {
        return "float('nan')".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 {
            "float('inf')".to_string()
        } else {
            "-float('inf')".to_string()
        };
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let abs = v.abs();
    if !(1e-4..1e16).contains(&abs) {
        let text = format!("{v:e}");
        return match text.split_once('e') {
            Some((mantissa, exp)) => {
                let exp: i32 = exp.parse().unwrap_or(0);
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{mantissa}e{sign}{:02}", exp.abs())
            }
            None => text,
        };
    }
    let text = format!("{v}");
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

fn complex_repr(re: f64, im: f64) -> String {
    let imag = float_repr(im);
    let imag = imag.strip_suffix(".0").unwrap_or(&imag).to_string();
    if re == 0.0 && !re.is_sign_negative() {
        return format!("{imag}j");
    }
    let real = float_repr(re);
    let real = real.strip_suffix(".0").unwrap_or(&real).to_string();
    if imag.starts_with('-') {
        format!("({real}{imag}j)")
    } else {
        format!("({real}+{imag}j)")
    }
}

fn pick_quote(has_single: bool, has_double: bool) -> char {
    if has_single && !has_double {
        '"'
    } else {
        '\''
    }
}

pub fn str_repr(s: &str) -> String {
    let quote = pick_quote(s.contains('\''), s.contains('"'));
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() || (c.is_whitespace() && c != ' ') => {
                let code = c as u32;
                if code <= 0xff {
                    let _ = write!(out, "\\x{code:02x}");
                } else if code <= 0xffff {
                    let _ = write!(out, "\\u{code:04x}");
                } else {
                    let _ = write!(out, "\\U{code:08x}");
                }
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn bytes_repr(bytes: &[u8]) -> String {
    let quote = pick_quote(bytes.contains(&b'\''), bytes.contains(&b'"'));
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b as char == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_reprs() {
        assert_eq!(PyValue::None.repr(), "None");
        assert_eq!(PyValue::Bool(true).repr(), "True");
        assert_eq!(PyValue::Int(-42).repr(), "-42");
        assert_eq!(PyValue::Ellipsis.repr(), "...");
    }

    #[test]
    fn test_float_repr_matches_python() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.5), "0.5");
        assert_eq!(float_repr(-0.0), "-0.0");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(f64::INFINITY), "float('inf')");
    }

    #[test]
    fn test_complex_repr() {
        assert_eq!(PyValue::Complex(0.0, 1.0).repr(), "1j");
        assert_eq!(PyValue::Complex(1.0, 2.0).repr(), "(1+2j)");
        assert_eq!(PyValue::Complex(1.0, -2.5).repr(), "(1-2.5j)");
    }

    #[test]
    fn test_str_repr_quote_selection() {
        assert_eq!(str_repr("abc"), "'abc'");
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("both ' and \""), "'both \\' and \"'");
        assert_eq!(str_repr("tab\there\n"), "'tab\\there\\n'");
        assert_eq!(str_repr("\u{1}"), "'\\x01'");
        assert_eq!(str_repr("caf\u{e9}"), "'caf\u{e9}'");
    }

    #[test]
    fn test_bytes_repr() {
        assert_eq!(bytes_repr(b"ab\x00\xff"), "b'ab\\x00\\xff'");
    }

    #[test]
    fn test_container_reprs() {
        let single = PyValue::Tuple(vec![PyValue::Int(1)]);
        assert_eq!(single.repr(), "(1,)");
        let tuple = PyValue::Tuple(vec![PyValue::Int(1), PyValue::Int(2), PyValue::Int(3)]);
        assert_eq!(tuple.repr(), "(1, 2, 3)");
        assert_eq!(PyValue::Set(vec![]).repr(), "set()");
        assert_eq!(PyValue::FrozenSet(vec![PyValue::Int(1)]).repr(), "frozenset({1})");
        let dict = PyValue::Dict(vec![(PyValue::Str("a".into()), PyValue::Int(1))]);
        assert_eq!(dict.repr(), "{'a': 1}");
    }

    #[test]
    fn test_dict_insert_last_write_wins_keeps_position() {
        let mut pairs = Vec::new();
        dict_insert(&mut pairs, PyValue::Int(1), PyValue::Str("a".into()));
        dict_insert(&mut pairs, PyValue::Int(2), PyValue::Str("b".into()));
        dict_insert(&mut pairs, PyValue::Int(1), PyValue::Str("c".into()));
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], (PyValue::Int(1), PyValue::Str("c".into())));
    }

    #[test]
    fn test_code_values_are_not_literals() {
        let value = PyValue::Tuple(vec![PyValue::Int(1), PyValue::Code(UnitId(0))]);
        assert!(!value.is_literal());
        assert!(PyValue::Dict(vec![]).is_literal());
    }
}
