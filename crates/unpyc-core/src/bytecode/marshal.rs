//! Native `.pyc` reader: header, magic-number version detection and the
//! marshal object stream.
//!
//! Code objects are flattened into an arena as they are read, children
//! before their parent, so the module body is always the last unit.

use tracing::debug;

use crate::bytecode::code::CodeUnit;
use crate::bytecode::opcodes::decode;
use crate::bytecode::value::{dict_insert, PyValue};
use crate::bytecode::{PyVersion, UnitId};
use crate::errors::{UnpycError, UnpycResult};
use crate::guards::MAX_OBJECT_DEPTH;

pub const HEADER_LEN: usize = 16;

const FLAG_REF: u8 = 0x80;

const CO_FAST_LOCAL: u8 = 0x20;
const CO_FAST_CELL: u8 = 0x40;
const CO_FAST_FREE: u8 = 0x80;

/// Result of reading one artifact.
pub struct LoadedModule {
    pub version: PyVersion,
    pub units: Vec<CodeUnit>,
    pub root: UnitId,
}

/// Map a `.pyc` magic number to the interpreter version that wrote it.
pub fn version_from_magic(magic: u16) -> Option<PyVersion> {
    match magic {
        3400..=3419 => Some(PyVersion::new(3, 8)),
        3420..=3429 => Some(PyVersion::new(3, 9)),
        3430..=3449 => Some(PyVersion::new(3, 10)),
        3450..=3499 => Some(PyVersion::new(3, 11)),
        3500..=3549 => Some(PyVersion::new(3, 12)),
        _ => None,
    }
}

pub fn read_pyc(data: &[u8]) -> UnpycResult<LoadedModule> {
    if data.len() < HEADER_LEN {
        return Err(UnpycError::Corrupt(format!(
            "artifact is {} bytes, shorter than the {HEADER_LEN}-byte header",
            data.len()
        )));
    }
    if &data[2..4] != b"\r\n" {
        return Err(UnpycError::UnsupportedFormat(
            "missing magic-number terminator".to_string(),
        ));
    }
    let magic = u16::from_le_bytes([data[0], data[1]]);
    let version = version_from_magic(magic).ok_or_else(|| {
        UnpycError::UnsupportedFormat(format!("unhandled magic number {magic}"))
    })?;
    debug!(magic, version = %version, "reading marshal stream");

    let mut reader = MarshalReader::new(&data[HEADER_LEN..], version);
    let root = match reader.read_object()? {
        PyValue::Code(id) => id,
        other => {
            return Err(UnpycError::Corrupt(format!(
                "top-level object is not a code object: {}",
                other.repr()
            )))
        }
    };
    Ok(LoadedModule {
        version,
        units: reader.units,
        root,
    })
}

struct MarshalReader<'a> {
    data: &'a [u8],
    pos: usize,
    version: PyVersion,
    refs: Vec<Option<PyValue>>,
    units: Vec<CodeUnit>,
    depth: usize,
}

impl<'a> MarshalReader<'a> {
    fn new(data: &'a [u8], version: PyVersion) -> Self {
        Self {
            data,
            pos: 0,
            version,
            refs: Vec::new(),
            units: Vec::new(),
            depth: 0,
        }
    }

    fn corrupt(&self, what: &str) -> UnpycError {
        UnpycError::Corrupt(format!("{what} at stream offset {}", self.pos))
    }

    fn take(&mut self, n: usize) -> UnpycResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| self.corrupt("truncated stream"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> UnpycResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> UnpycResult<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32(&mut self) -> UnpycResult<u32> {
        Ok(self.i32()? as u32)
    }

    fn f64(&mut self) -> UnpycResult<f64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(f64::from_le_bytes(raw))
    }

    /// A non-negative length that fits in what is left of the stream.
    fn read_len(&mut self) -> UnpycResult<usize> {
        let n = self.i32()?;
        if n < 0 || n as usize > self.data.len() - self.pos {
            return Err(self.corrupt(&format!("implausible length {n}")));
        }
        Ok(n as usize)
    }

    fn text(&mut self, n: usize) -> UnpycResult<String> {
        let bytes = self.take(n)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn float_text(&mut self) -> UnpycResult<f64> {
        let n = self.u8()? as usize;
        let text = self.text(n)?;
        text.trim()
            .parse::<f64>()
            .map_err(|_| self.corrupt(&format!("bad float text {text:?}")))
    }

    fn read_object(&mut self) -> UnpycResult<PyValue> {
        if self.depth >= MAX_OBJECT_DEPTH {
            return Err(self.corrupt("object nesting too deep"));
        }
        self.depth += 1;
        let result = self.read_object_inner();
        self.depth -= 1;
        result
    }

    fn read_object_inner(&mut self) -> UnpycResult<PyValue> {
        let byte = self.u8()?;
        let flag = byte & FLAG_REF != 0;
        let kind = byte & !FLAG_REF;

        // Slot is reserved before the content so nested refs index correctly.
        let slot = if flag {
            self.refs.push(None);
            Some(self.refs.len() - 1)
        } else {
            None
        };

        let value = match kind {
            b'N' => PyValue::None,
            b'F' => PyValue::Bool(false),
            b'T' => PyValue::Bool(true),
            b'S' => PyValue::Opaque("StopIteration".to_string()),
            b'.' => PyValue::Ellipsis,
            b'i' => PyValue::Int(self.i32()? as i64),
            b'I' => {
                let b = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                PyValue::Int(i64::from_le_bytes(raw))
            }
            b'l' => self.read_long()?,
            b'f' => PyValue::Float(self.float_text()?),
            b'g' => PyValue::Float(self.f64()?),
            b'x' => {
                let re = self.float_text()?;
                let im = self.float_text()?;
                PyValue::Complex(re, im)
            }
            b'y' => {
                let re = self.f64()?;
                let im = self.f64()?;
                PyValue::Complex(re, im)
            }
            b's' => {
                let n = self.read_len()?;
                PyValue::Bytes(self.take(n)?.to_vec())
            }
            b't' | b'u' | b'a' | b'A' => {
                let n = self.read_len()?;
                PyValue::Str(self.text(n)?)
            }
            b'z' | b'Z' => {
                let n = self.u8()? as usize;
                PyValue::Str(self.text(n)?)
            }
            b'(' => {
                let n = self.read_len()?;
                PyValue::Tuple(self.read_items(n)?)
            }
            b')' => {
                let n = self.u8()? as usize;
                PyValue::Tuple(self.read_items(n)?)
            }
            b'[' => {
                let n = self.read_len()?;
                PyValue::List(self.read_items(n)?)
            }
            b'<' => {
                let n = self.read_len()?;
                PyValue::Set(self.read_items(n)?)
            }
            b'>' => {
                let n = self.read_len()?;
                PyValue::FrozenSet(self.read_items(n)?)
            }
            b'{' => {
                let mut pairs = Vec::new();
                loop {
                    if self.data.get(self.pos) == Some(&b'0') {
                        self.pos += 1;
                        break;
                    }
                    let key = self.read_object()?;
                    let value = self.read_object()?;
                    dict_insert(&mut pairs, key, value);
                }
                PyValue::Dict(pairs)
            }
            b'r' => {
                let index = self.u32()? as usize;
                return match self.refs.get(index) {
                    Some(Some(value)) => Ok(value.clone()),
                    _ => Err(self.corrupt(&format!("dangling back-reference {index}"))),
                };
            }
            b'c' => PyValue::Code(self.read_code()?),
            other => {
                return Err(self.corrupt(&format!("unknown type code {:?}", other as char)));
            }
        };

        if let Some(slot) = slot {
            self.refs[slot] = Some(value.clone());
        }
        Ok(value)
    }

    fn read_items(&mut self, n: usize) -> UnpycResult<Vec<PyValue>> {
        let mut items = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            items.push(self.read_object()?);
        }
        Ok(items)
    }

    fn read_long(&mut self) -> UnpycResult<PyValue> {
        let n = self.i32()?;
        let count = n.unsigned_abs() as usize;
        if count * 2 > self.data.len() - self.pos {
            return Err(self.corrupt(&format!("implausible long size {n}")));
        }
        let mut acc: Option<i128> = Some(0);
        for i in 0..count {
            let b = self.take(2)?;
            let digit = u16::from_le_bytes([b[0], b[1]]) as i128;
            acc = acc.and_then(|a| {
                let shift = 15 * i as u32;
                if shift >= 120 {
                    if digit == 0 {
                        Some(a)
                    } else {
                        None
                    }
                } else {
                    a.checked_add(digit << shift)
                }
            });
        }
        let signed = acc.map(|a| if n < 0 { -a } else { a });
        Ok(match signed.and_then(|v| i64::try_from(v).ok()) {
            Some(v) => PyValue::Int(v),
            None => PyValue::Opaque(format!("<int of {count} digits>")),
        })
    }

    fn read_str(&mut self, what: &str) -> UnpycResult<String> {
        match self.read_object()? {
            PyValue::Str(s) => Ok(s),
            PyValue::Bytes(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
            other => Err(self.corrupt(&format!("{what} is not a string: {}", other.repr()))),
        }
    }

    fn read_bytes(&mut self, what: &str) -> UnpycResult<Vec<u8>> {
        match self.read_object()? {
            PyValue::Bytes(b) => Ok(b),
            other => Err(self.corrupt(&format!("{what} is not bytes: {}", other.repr()))),
        }
    }

    fn read_tuple(&mut self, what: &str) -> UnpycResult<Vec<PyValue>> {
        match self.read_object()? {
            PyValue::Tuple(items) => Ok(items),
            other => Err(self.corrupt(&format!("{what} is not a tuple: {}", other.repr()))),
        }
    }

    fn read_names(&mut self, what: &str) -> UnpycResult<Vec<String>> {
        self.read_tuple(what)?
            .into_iter()
            .map(|v| match v {
                PyValue::Str(s) => Ok(s),
                other => Err(self.corrupt(&format!("{what} entry is not a string: {}", other.repr()))),
            })
            .collect()
    }

    fn read_code(&mut self) -> UnpycResult<UnitId> {
        let modern = self.version.at_least(3, 11);
        let argcount = self.u32()?;
        let posonly_argcount = self.u32()?;
        let kwonly_argcount = self.u32()?;
        if !modern {
            let _nlocals = self.u32()?;
        }
        let stacksize = self.u32()?;
        let flags = self.u32()?;
        let code = self.read_bytes("co_code")?;
        let consts = self.read_tuple("co_consts")?;
        let names = self.read_names("co_names")?;

        let (varnames, freevars, cellvars) = if modern {
            let locals = self.read_names("co_localsplusnames")?;
            let kinds = self.read_bytes("co_localspluskinds")?;
            if kinds.len() != locals.len() {
                return Err(self.corrupt("localsplus names/kinds length mismatch"));
            }
            let pick = |bit: u8| -> Vec<String> {
                locals
                    .iter()
                    .zip(&kinds)
                    .filter(|(_, k)| **k & bit != 0)
                    .map(|(n, _)| n.clone())
                    .collect()
            };
            (pick(CO_FAST_LOCAL), pick(CO_FAST_FREE), pick(CO_FAST_CELL))
        } else {
            let varnames = self.read_names("co_varnames")?;
            let freevars = self.read_names("co_freevars")?;
            let cellvars = self.read_names("co_cellvars")?;
            (varnames, freevars, cellvars)
        };

        let filename = self.read_str("co_filename")?;
        let name = self.read_str("co_name")?;
        let qualname = if modern {
            self.read_str("co_qualname")?
        } else {
            name.clone()
        };
        let first_line = self.u32()?;
        let _linetable = self.read_object()?;
        if modern {
            let _exceptiontable = self.read_object()?;
        }

        let children = consts.iter().filter_map(PyValue::as_code).collect();
        let instructions = decode(&code, self.version);
        let unit = CodeUnit {
            name,
            qualname,
            path: String::new(),
            filename,
            version: self.version,
            first_line,
            argcount,
            posonly_argcount,
            kwonly_argcount,
            stacksize,
            flags,
            code_size: code.len(),
            code,
            instructions,
            consts,
            names,
            varnames,
            freevars,
            cellvars,
            children,
        };
        self.units.push(unit);
        Ok(UnitId(self.units.len() - 1))
    }
}

// ---------------------------------------------------------------------------
// Test support: a tiny marshal writer for building artifacts in tests.
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Minimal description of a code object for building test artifacts.
    #[derive(Clone, Default)]
    pub struct CodeSpec {
        pub name: String,
        pub argcount: u32,
        pub flags: u32,
        pub stacksize: u32,
        pub code: Vec<u8>,
        pub consts: Vec<ConstSpec>,
        pub names: Vec<String>,
        pub varnames: Vec<String>,
    }

    #[derive(Clone)]
    pub enum ConstSpec {
        Value(PyValue),
        Code(CodeSpec),
    }

    pub fn magic_for(version: PyVersion) -> u16 {
        match (version.major, version.minor) {
            (3, 8) => 3413,
            (3, 9) => 3425,
            (3, 10) => 3439,
            (3, 11) => 3495,
            _ => 3531,
        }
    }

    pub fn build_pyc(root: &CodeSpec, version: PyVersion) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&magic_for(version).to_le_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&[0u8; 12]);
        write_code(&mut out, root, version);
        out
    }

    fn write_i32(out: &mut Vec<u8>, v: i32) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    fn write_str(out: &mut Vec<u8>, s: &str) {
        out.push(b'u');
        write_i32(out, s.len() as i32);
        out.extend_from_slice(s.as_bytes());
    }

    fn write_bytes(out: &mut Vec<u8>, b: &[u8]) {
        out.push(b's');
        write_i32(out, b.len() as i32);
        out.extend_from_slice(b);
    }

    fn write_names(out: &mut Vec<u8>, names: &[String]) {
        out.push(b'(');
        write_i32(out, names.len() as i32);
        for n in names {
            write_str(out, n);
        }
    }

    pub fn write_value(out: &mut Vec<u8>, value: &PyValue) {
        match value {
            PyValue::None => out.push(b'N'),
            PyValue::Bool(true) => out.push(b'T'),
            PyValue::Bool(false) => out.push(b'F'),
            PyValue::Ellipsis => out.push(b'.'),
            PyValue::Int(v) => {
                out.push(b'I');
                out.extend_from_slice(&v.to_le_bytes());
            }
            PyValue::Float(v) => {
                out.push(b'g');
                out.extend_from_slice(&v.to_le_bytes());
            }
            PyValue::Complex(re, im) => {
                out.push(b'y');
                out.extend_from_slice(&re.to_le_bytes());
                out.extend_from_slice(&im.to_le_bytes());
            }
            PyValue::Str(s) => write_str(out, s),
            PyValue::Bytes(b) => write_bytes(out, b),
            PyValue::Tuple(items) | PyValue::List(items) | PyValue::Set(items) | PyValue::FrozenSet(items) => {
                out.push(match value {
                    PyValue::Tuple(_) => b'(',
                    PyValue::List(_) => b'[',
                    PyValue::Set(_) => b'<',
                    _ => b'>',
                });
                write_i32(out, items.len() as i32);
                for item in items {
                    write_value(out, item);
                }
            }
            PyValue::Dict(pairs) => {
                out.push(b'{');
                for (k, v) in pairs {
                    write_value(out, k);
                    write_value(out, v);
                }
                out.push(b'0');
            }
            PyValue::Code(_) | PyValue::Opaque(_) => out.push(b'N'),
        }
    }

    fn write_code(out: &mut Vec<u8>, spec: &CodeSpec, version: PyVersion) {
        let modern = version.at_least(3, 11);
        out.push(b'c');
        write_i32(out, spec.argcount as i32);
        write_i32(out, 0);
        write_i32(out, 0);
        if !modern {
            write_i32(out, spec.varnames.len() as i32);
        }
        write_i32(out, spec.stacksize as i32);
        write_i32(out, spec.flags as i32);
        write_bytes(out, &spec.code);
        out.push(b'(');
        write_i32(out, spec.consts.len() as i32);
        for c in &spec.consts {
            match c {
                ConstSpec::Value(v) => write_value(out, v),
                ConstSpec::Code(inner) => write_code(out, inner, version),
            }
        }
        write_names(out, &spec.names);
        if modern {
            write_names(out, &spec.varnames);
            write_bytes(out, &vec![CO_FAST_LOCAL; spec.varnames.len()]);
        } else {
            write_names(out, &spec.varnames);
            write_names(out, &[]);
            write_names(out, &[]);
        }
        write_str(out, "module.py");
        write_str(out, &spec.name);
        if modern {
            write_str(out, &spec.name);
        }
        write_i32(out, 1);
        write_bytes(out, &[]);
        if modern {
            write_bytes(out, &[]);
        }
    }
}
