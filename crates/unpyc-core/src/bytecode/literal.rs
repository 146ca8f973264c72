//! Parser for Python literal expressions.
//!
//! Handles the subset of Python expression syntax that `PyValue::repr`
//! emits and that disassembler reports print for constants: numbers
//! (including complex and `float('inf')`), strings and bytes with prefixes,
//! `None`/`True`/`False`/`...`, tuples, lists, sets, dicts and `frozenset`.

use crate::bytecode::value::{dict_insert, PyValue};

/// Parse a complete literal; trailing non-whitespace is an error.
pub fn parse_literal(text: &str) -> Result<PyValue, String> {
    let mut parser = LiteralParser::new(text);
    let value = parser.parse_expr()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(format!(
            "unexpected trailing input at offset {}: {:?}",
            parser.pos,
            parser.rest().chars().take(16).collect::<String>()
        ));
    }
    Ok(value)
}

/// Parse `NAME = <literal>` (the value may span several lines).
pub fn parse_assignment(text: &str) -> Result<(String, PyValue), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(format!("invalid assignment target: {name:?}"));
    }
    Ok((name.to_string(), parse_literal(value)?))
}

struct LiteralParser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else if c == '#' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += c.len_utf8();
                }
            } else {
                break;
            }
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), String> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(format!("expected {token:?} at offset {}", self.pos))
        }
    }

    fn parse_expr(&mut self) -> Result<PyValue, String> {
        let first = self.parse_unary()?;
        // `1+2j` style complex literals.
        self.skip_ws();
        let sign = match self.peek() {
            Some('+') => 1.0,
            Some('-') => -1.0,
            _ => return Ok(first),
        };
        let save = self.pos;
        self.bump();
        let second = self.parse_unary()?;
        let real = match first {
            PyValue::Int(v) => v as f64,
            PyValue::Float(v) => v,
            PyValue::Complex(re, 0.0) => re,
            _ => {
                self.pos = save;
                return Err(format!("unsupported binary expression at offset {save}"));
            }
        };
        match second {
            PyValue::Complex(0.0, im) => Ok(PyValue::Complex(real, sign * im)),
            _ => Err(format!("unsupported binary expression at offset {save}")),
        }
    }

    fn parse_unary(&mut self) -> Result<PyValue, String> {
        self.skip_ws();
        match self.peek() {
            Some('-') => {
                self.bump();
                negate(self.parse_unary()?)
            }
            Some('+') => {
                self.bump();
                self.parse_unary()
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<PyValue, String> {
        self.skip_ws();
        let c = self.peek().ok_or_else(|| "unexpected end of input".to_string())?;
        match c {
            '(' => {
                self.bump();
                let (items, trailing_comma) = self.parse_items(")")?;
                if items.len() == 1 && !trailing_comma {
                    Ok(items.into_iter().next().unwrap_or(PyValue::None))
                } else {
                    Ok(PyValue::Tuple(items))
                }
            }
            '[' => {
                self.bump();
                let (items, _) = self.parse_items("]")?;
                Ok(PyValue::List(items))
            }
            '{' => {
                self.bump();
                self.parse_brace()
            }
            '.' if self.rest().starts_with("...") => {
                self.pos += 3;
                Ok(PyValue::Ellipsis)
            }
            c if c.is_ascii_digit() || c == '.' => self.parse_number(),
            '\'' | '"' => self.parse_string_literal(),
            c if c.is_alphabetic() || c == '_' => self.parse_word(),
            other => Err(format!("unexpected character {other:?} at offset {}", self.pos)),
        }
    }

    fn parse_items(&mut self, close: &str) -> Result<(Vec<PyValue>, bool), String> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            if self.eat(close) {
                return Ok((items, trailing_comma));
            }
            items.push(self.parse_expr()?);
            trailing_comma = false;
            if self.eat(",") {
                trailing_comma = true;
                continue;
            }
            self.expect(close)?;
            return Ok((items, trailing_comma));
        }
    }

    fn parse_brace(&mut self) -> Result<PyValue, String> {
        if self.eat("}") {
            return Ok(PyValue::Dict(Vec::new()));
        }
        let first = self.parse_expr()?;
        if self.eat(":") {
            let mut pairs = Vec::new();
            let value = self.parse_expr()?;
            dict_insert(&mut pairs, first, value);
            loop {
                if self.eat("}") {
                    return Ok(PyValue::Dict(pairs));
                }
                self.expect(",")?;
                if self.eat("}") {
                    return Ok(PyValue::Dict(pairs));
                }
                let key = self.parse_expr()?;
                self.expect(":")?;
                let value = self.parse_expr()?;
                dict_insert(&mut pairs, key, value);
            }
        }
        let mut items = vec![first];
        loop {
            if self.eat("}") {
                return Ok(PyValue::Set(items));
            }
            self.expect(",")?;
            if self.eat("}") {
                return Ok(PyValue::Set(items));
            }
            items.push(self.parse_expr()?);
        }
    }

    fn parse_word(&mut self) -> Result<PyValue, String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let word = &self.src[start..self.pos];
        // String prefixes: b'', r'', rb'', u'' ...
        if matches!(self.peek(), Some('\'') | Some('"'))
            && word.len() <= 2
            && word.chars().all(|c| matches!(c.to_ascii_lowercase(), 'b' | 'r' | 'u'))
        {
            self.pos = start;
            return self.parse_string_literal();
        }
        match word {
            "None" => Ok(PyValue::None),
            "True" => Ok(PyValue::Bool(true)),
            "False" => Ok(PyValue::Bool(false)),
            "Ellipsis" => Ok(PyValue::Ellipsis),
            "frozenset" | "set" => {
                self.expect("(")?;
                if self.eat(")") {
                    return Ok(if word == "set" {
                        PyValue::Set(Vec::new())
                    } else {
                        PyValue::FrozenSet(Vec::new())
                    });
                }
                let inner = self.parse_expr()?;
                self.expect(")")?;
                let items = match inner {
                    PyValue::Set(items)
                    | PyValue::Tuple(items)
                    | PyValue::List(items)
                    | PyValue::FrozenSet(items) => items,
                    PyValue::Dict(pairs) if pairs.is_empty() => Vec::new(),
                    other => return Err(format!("{word}() of non-iterable {other:?}")),
                };
                Ok(if word == "set" {
                    PyValue::Set(items)
                } else {
                    PyValue::FrozenSet(items)
                })
            }
            "float" => {
                self.expect("(")?;
                let arg = self.parse_expr()?;
                self.expect(")")?;
                match arg {
                    PyValue::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                        "inf" | "+inf" | "infinity" => Ok(PyValue::Float(f64::INFINITY)),
                        "-inf" | "-infinity" => Ok(PyValue::Float(f64::NEG_INFINITY)),
                        "nan" => Ok(PyValue::Float(f64::NAN)),
                        other => other
                            .parse::<f64>()
                            .map(PyValue::Float)
                            .map_err(|e| format!("float({other:?}): {e}")),
                    },
                    PyValue::Int(v) => Ok(PyValue::Float(v as f64)),
                    PyValue::Float(v) => Ok(PyValue::Float(v)),
                    other => Err(format!("float() of {other:?}")),
                }
            }
            "inf" => Ok(PyValue::Float(f64::INFINITY)),
            "nan" => Ok(PyValue::Float(f64::NAN)),
            other => Err(format!("unknown name {other:?} in literal")),
        }
    }

    fn parse_number(&mut self) -> Result<PyValue, String> {
        let start = self.pos;
        let rest = self.rest();
        let lower = rest.get(..2).map(|p| p.to_ascii_lowercase());
        let radix = match lower.as_deref() {
            Some("0x") => 16,
            Some("0o") => 8,
            Some("0b") => 2,
            _ => 10,
        };
        if radix != 10 {
            self.pos += 2;
            let digits_start = self.pos;
            while let Some(c) = self.peek() {
                if c.is_digit(radix) || c == '_' {
                    self.bump();
                } else {
                    break;
                }
            }
            let digits: String = self.src[digits_start..self.pos]
                .chars()
                .filter(|c| *c != '_')
                .collect();
            return i64::from_str_radix(&digits, radix)
                .map(PyValue::Int)
                .map_err(|e| format!("bad integer literal at offset {start}: {e}"));
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.bump();
            } else if c == '.' && !is_float {
                is_float = true;
                self.bump();
            } else if (c == 'e' || c == 'E') && self.pos > start {
                is_float = true;
                self.bump();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.bump();
                }
            } else {
                break;
            }
        }
        let text: String = self.src[start..self.pos]
            .chars()
            .filter(|c| *c != '_')
            .collect();
        if matches!(self.peek(), Some('j') | Some('J')) {
            self.bump();
            let imag = text
                .parse::<f64>()
                .map_err(|e| format!("bad imaginary literal at offset {start}: {e}"))?;
            return Ok(PyValue::Complex(0.0, imag));
        }
        if is_float {
            text.parse::<f64>()
                .map(PyValue::Float)
                .map_err(|e| format!("bad float literal at offset {start}: {e}"))
        } else {
            match text.parse::<i64>() {
                Ok(v) => Ok(PyValue::Int(v)),
                Err(_) => Ok(PyValue::Opaque(text)),
            }
        }
    }

    fn parse_string_literal(&mut self) -> Result<PyValue, String> {
        let mut result: Option<PyValue> = None;
        // Adjacent literals concatenate.
        loop {
            self.skip_ws();
            let start = self.pos;
            let mut prefix_bytes = false;
            let mut prefix_raw = false;
            while let Some(c) = self.peek() {
                match c.to_ascii_lowercase() {
                    'b' => prefix_bytes = true,
                    'r' => prefix_raw = true,
                    'u' => {}
                    _ => break,
                }
                self.bump();
            }
            let quote = match self.peek() {
                Some(q @ ('\'' | '"')) => q,
                _ => {
                    self.pos = start;
                    break;
                }
            };
            let triple: String = std::iter::repeat(quote).take(3).collect();
            let delim = if self.rest().starts_with(&triple) {
                triple
            } else {
                quote.to_string()
            };
            self.pos += delim.len();
            let body = self.read_string_body(&delim, prefix_raw)?;
            let chunk = if prefix_bytes {
                PyValue::Bytes(body.into_iter().map(|c| c as u8).collect())
            } else {
                PyValue::Str(body.into_iter().collect())
            };
            result = Some(match (result, chunk) {
                (None, chunk) => chunk,
                (Some(PyValue::Str(mut a)), PyValue::Str(b)) => {
                    a.push_str(&b);
                    PyValue::Str(a)
                }
                (Some(PyValue::Bytes(mut a)), PyValue::Bytes(b)) => {
                    a.extend(b);
                    PyValue::Bytes(a)
                }
                _ => return Err("cannot mix bytes and str literals".to_string()),
            });
            self.skip_ws();
            if !matches!(self.peek(), Some('\'' | '"' | 'b' | 'B' | 'r' | 'R' | 'u' | 'U')) {
                break;
            }
        }
        result.ok_or_else(|| format!("expected string literal at offset {}", self.pos))
    }

    fn read_string_body(&mut self, delim: &str, raw: bool) -> Result<Vec<char>, String> {
        let mut out = Vec::new();
        loop {
            if self.rest().starts_with(delim) {
                self.pos += delim.len();
                return Ok(out);
            }
            let c = self
                .bump()
                .ok_or_else(|| "unterminated string literal".to_string())?;
            if c != '\\' {
                out.push(c);
                continue;
            }
            let esc = self
                .bump()
                .ok_or_else(|| "unterminated escape sequence".to_string())?;
            if raw {
                out.push('\\');
                out.push(esc);
                continue;
            }
            match esc {
                '\n' => {}
                '\\' => out.push('\\'),
                '\'' => out.push('\''),
                '"' => out.push('"'),
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                'a' => out.push('\u{7}'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                'v' => out.push('\u{b}'),
                '0'..='7' => {
                    let mut value = esc.to_digit(8).unwrap_or(0);
                    for _ in 0..2 {
                        match self.peek().and_then(|c| c.to_digit(8)) {
                            Some(d) => {
                                value = value * 8 + d;
                                self.bump();
                            }
                            None => break,
                        }
                    }
                    out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
                }
                'x' => out.push(self.read_hex_escape(2)?),
                'u' => out.push(self.read_hex_escape(4)?),
                'U' => out.push(self.read_hex_escape(8)?),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn read_hex_escape(&mut self, digits: usize) -> Result<char, String> {
        let text = self
            .rest()
            .get(..digits)
            .ok_or_else(|| "truncated hex escape".to_string())?;
        let value =
            u32::from_str_radix(text, 16).map_err(|e| format!("bad hex escape {text:?}: {e}"))?;
        self.pos += digits;
        char::from_u32(value).ok_or_else(|| format!("invalid code point {value:#x}"))
    }
}

fn negate(value: PyValue) -> Result<PyValue, String> {
    match value {
        PyValue::Int(v) => Ok(PyValue::Int(-v)),
        PyValue::Float(v) => Ok(PyValue::Float(-v)),
        PyValue::Complex(re, im) => Ok(PyValue::Complex(-re, -im)),
        PyValue::Opaque(text) => Ok(PyValue::Opaque(format!("-{text}"))),
        other => Err(format!("cannot negate {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse_literal("None").unwrap(), PyValue::None);
        assert_eq!(parse_literal(" True ").unwrap(), PyValue::Bool(true));
        assert_eq!(parse_literal("-17").unwrap(), PyValue::Int(-17));
        assert_eq!(parse_literal("0x1F").unwrap(), PyValue::Int(31));
        assert_eq!(parse_literal("1_000").unwrap(), PyValue::Int(1000));
        assert_eq!(parse_literal("2.5").unwrap(), PyValue::Float(2.5));
        assert_eq!(parse_literal("1e+16").unwrap(), PyValue::Float(1e16));
        assert_eq!(parse_literal("...").unwrap(), PyValue::Ellipsis);
    }

    #[test]
    fn test_parse_complex() {
        assert_eq!(parse_literal("1j").unwrap(), PyValue::Complex(0.0, 1.0));
        assert_eq!(parse_literal("(1+2j)").unwrap(), PyValue::Complex(1.0, 2.0));
        assert_eq!(parse_literal("(1-2.5j)").unwrap(), PyValue::Complex(1.0, -2.5));
    }

    #[test]
    fn test_parse_strings() {
        assert_eq!(parse_literal("'abc'").unwrap(), PyValue::Str("abc".into()));
        assert_eq!(parse_literal("\"it's\"").unwrap(), PyValue::Str("it's".into()));
        assert_eq!(
            parse_literal(r"'a\nb\x41é'").unwrap(),
            PyValue::Str("a\nbA\u{e9}".into())
        );
        assert_eq!(parse_literal(r"r'\d+'").unwrap(), PyValue::Str("\\d+".into()));
        assert_eq!(
            parse_literal(r"b'\x00ab'").unwrap(),
            PyValue::Bytes(vec![0, b'a', b'b'])
        );
        assert_eq!(parse_literal("'ab' 'cd'").unwrap(), PyValue::Str("abcd".into()));
    }

    #[test]
    fn test_parse_containers() {
        assert_eq!(parse_literal("()").unwrap(), PyValue::Tuple(vec![]));
        assert_eq!(parse_literal("(1,)").unwrap(), PyValue::Tuple(vec![PyValue::Int(1)]));
        assert_eq!(parse_literal("(1)").unwrap(), PyValue::Int(1));
        assert_eq!(
            parse_literal("[1, 'a',]").unwrap(),
            PyValue::List(vec![PyValue::Int(1), PyValue::Str("a".into())])
        );
        assert_eq!(parse_literal("{}").unwrap(), PyValue::Dict(vec![]));
        assert_eq!(
            parse_literal("{1, 2}").unwrap(),
            PyValue::Set(vec![PyValue::Int(1), PyValue::Int(2)])
        );
        assert_eq!(
            parse_literal("frozenset({'x'})").unwrap(),
            PyValue::FrozenSet(vec![PyValue::Str("x".into())])
        );
        assert_eq!(parse_literal("set()").unwrap(), PyValue::Set(vec![]));
    }

    #[test]
    fn test_parse_dict_last_write_wins() {
        let value = parse_literal("{'a': 1, 'b': 2, 'a': 3}").unwrap();
        assert_eq!(
            value,
            PyValue::Dict(vec![
                (PyValue::Str("a".into()), PyValue::Int(3)),
                (PyValue::Str("b".into()), PyValue::Int(2)),
            ])
        );
    }

    #[test]
    fn test_parse_multiline_assignment() {
        let text = "TABLE = (\n    (0, 0, 0),\n    (255, 0, 0),\n)";
        let (name, value) = parse_assignment(text).unwrap();
        assert_eq!(name, "TABLE");
        assert_eq!(value.items().map(|i| i.len()), Some(2));
    }

    #[test]
    fn test_parse_special_floats() {
        match parse_literal("float('nan')").unwrap() {
            PyValue::Float(v) => assert!(v.is_nan()),
            other => panic!("expected float, got {other:?}"),
        }
        assert_eq!(
            parse_literal("-float('inf')").unwrap(),
            PyValue::Float(f64::NEG_INFINITY)
        );
    }

    #[test]
    fn test_rejects_trailing_garbage() {
        assert!(parse_literal("1 2").is_err());
        assert!(parse_literal("foo").is_err());
        assert!(parse_literal("'open").is_err());
    }
}
