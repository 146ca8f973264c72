//! One compiled code object.

use crate::bytecode::opcodes::{Instruction, Opcode};
use crate::bytecode::value::PyValue;
use crate::bytecode::{PyVersion, UnitId};

pub const CO_VARARGS: u32 = 0x04;
pub const CO_VARKEYWORDS: u32 = 0x08;
pub const CO_COROUTINE: u32 = 0x80;

/// A function, class body, comprehension or module body.
///
/// Owned by the `BytecodeIndex` that loaded it and never mutated after the
/// loader hands it over.
#[derive(Clone, Debug)]
pub struct CodeUnit {
    pub name: String,
    pub qualname: String,
    /// Traversal path used as the index key (`<module>.Foo.bar`).
    pub path: String,
    pub filename: String,
    pub version: PyVersion,
    pub first_line: u32,
    pub argcount: u32,
    pub posonly_argcount: u32,
    pub kwonly_argcount: u32,
    pub stacksize: u32,
    pub flags: u32,
    /// Raw instruction bytes (empty when loaded from a report).
    pub code: Vec<u8>,
    /// Length of the instruction stream in bytes.
    pub code_size: usize,
    pub instructions: Vec<Instruction>,
    pub consts: Vec<PyValue>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub freevars: Vec<String>,
    pub cellvars: Vec<String>,
    pub children: Vec<UnitId>,
}

impl CodeUnit {
    pub fn empty(name: &str, version: PyVersion) -> Self {
        Self {
            name: name.to_string(),
            qualname: name.to_string(),
            path: String::new(),
            filename: String::new(),
            version,
            first_line: 0,
            argcount: 0,
            posonly_argcount: 0,
            kwonly_argcount: 0,
            stacksize: 0,
            flags: 0,
            code: Vec::new(),
            code_size: 0,
            instructions: Vec::new(),
            consts: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            freevars: Vec::new(),
            cellvars: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn has_nested_code(&self) -> bool {
        !self.children.is_empty() || self.consts.iter().any(|c| c.as_code().is_some())
    }

    pub fn has_varargs(&self) -> bool {
        self.flags & CO_VARARGS != 0
    }

    pub fn has_varkeywords(&self) -> bool {
        self.flags & CO_VARKEYWORDS != 0
    }

    pub fn is_coroutine(&self) -> bool {
        self.flags & CO_COROUTINE != 0
    }

    pub fn name_at(&self, index: u32) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    pub fn const_at(&self, index: u32) -> Option<&PyValue> {
        self.consts.get(index as usize)
    }

    /// Targets of `STORE_NAME` and `STORE_GLOBAL`, in instruction order
    /// (duplicates kept).
    pub fn stored_names(&self) -> Vec<&str> {
        self.instructions
            .iter()
            .filter(|ins| matches!(ins.op, Opcode::StoreName | Opcode::StoreGlobal))
            .filter_map(|ins| self.name_at(ins.arg))
            .collect()
    }

    fn varname_or(&self, index: usize, fallback: &str) -> String {
        self.varnames
            .get(index)
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Parameter list text reconstructed from arity counts and flags:
    /// `a, b, /, c, *args, d, **kwargs`.
    pub fn parameter_list(&self) -> String {
        let argcount = self.argcount as usize;
        let posonly = (self.posonly_argcount as usize).min(argcount);
        let kwonly = self.kwonly_argcount as usize;
        let mut params: Vec<String> = Vec::new();

        for i in 0..argcount {
            params.push(self.varname_or(i, &format!("arg{i}")));
            if posonly > 0 && i + 1 == posonly {
                params.push("/".to_string());
            }
        }

        let mut next = argcount + kwonly;
        if self.has_varargs() {
            params.push(format!("*{}", self.varname_or(next, "args")));
            next += 1;
        } else if kwonly > 0 {
            params.push("*".to_string());
        }
        for i in argcount..argcount + kwonly {
            params.push(self.varname_or(i, &format!("kwarg{}", i - argcount)));
        }
        if self.has_varkeywords() {
            params.push(format!("**{}", self.varname_or(next, "kwargs")));
        }
        params.join(", ")
    }

    /// `def name(params)` / `async def name(params)` header without the colon.
    pub fn signature(&self, name: &str) -> String {
        let keyword = if self.is_coroutine() { "async def" } else { "def" };
        format!("{keyword} {name}({})", self.parameter_list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(argcount: u32, flags: u32, varnames: &[&str]) -> CodeUnit {
        let mut u = CodeUnit::empty("f", PyVersion::new(3, 8));
        u.argcount = argcount;
        u.flags = flags;
        u.varnames = varnames.iter().map(|s| s.to_string()).collect();
        u
    }

    #[test]
    fn test_plain_signature() {
        let u = unit(2, 0, &["self", "value", "tmp"]);
        assert_eq!(u.signature("set_value"), "def set_value(self, value)");
    }

    #[test]
    fn test_varargs_and_kwargs() {
        let u = unit(1, CO_VARARGS | CO_VARKEYWORDS, &["self", "a", "k"]);
        assert_eq!(u.parameter_list(), "self, *a, **k");
    }

    #[test]
    fn test_posonly_and_kwonly() {
        let mut u = unit(2, 0, &["a", "b", "c"]);
        u.posonly_argcount = 1;
        u.kwonly_argcount = 1;
        assert_eq!(u.parameter_list(), "a, /, b, *, c");

        let mut v = unit(1, CO_VARARGS, &["a", "c", "rest"]);
        v.kwonly_argcount = 1;
        assert_eq!(v.parameter_list(), "a, *rest, c");
    }

    #[test]
    fn test_async_and_missing_varnames() {
        let u = unit(2, CO_COROUTINE | CO_VARKEYWORDS, &[]);
        assert_eq!(u.signature("go"), "async def go(arg0, arg1, **kwargs)");
    }

    #[test]
    fn test_stored_names_in_order() {
        let mut u = unit(0, 0, &[]);
        u.names = vec!["A".into(), "B".into()];
        u.instructions = vec![
            Instruction { offset: 0, op: Opcode::LoadConst, arg: 0 },
            Instruction { offset: 2, op: Opcode::StoreName, arg: 1 },
            Instruction { offset: 4, op: Opcode::StoreName, arg: 0 },
            Instruction { offset: 6, op: Opcode::StoreName, arg: 1 },
        ];
        assert_eq!(u.stored_names(), vec!["B", "A", "B"]);
    }
}
