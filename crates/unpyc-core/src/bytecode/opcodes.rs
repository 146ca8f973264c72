//! The handful of opcodes constant recovery and class-member discovery care
//! about, plus a word-stream decoder.
//!
//! Everything else decodes to `Opcode::Other(n)` and is carried through
//! untouched.

use crate::bytecode::PyVersion;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Cache,
    Resume,
    LoadConst,
    LoadName,
    StoreName,
    StoreGlobal,
    BuildTuple,
    BuildList,
    BuildSet,
    BuildMap,
    BuildConstKeyMap,
    MapAdd,
    DictUpdate,
    ListExtend,
    SetUpdate,
    ListAppend,
    SetAdd,
    ReturnValue,
    ReturnConst,
    ExtendedArg,
    Other(u8),
}

/// Offset, opcode and (EXTENDED_ARG-accumulated) argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub offset: u32,
    pub op: Opcode,
    pub arg: u32,
}

impl Opcode {
    pub fn from_byte(byte: u8, version: PyVersion) -> Opcode {
        match byte {
            0 if version.at_least(3, 11) => Opcode::Cache,
            151 if version.at_least(3, 11) => Opcode::Resume,
            83 => Opcode::ReturnValue,
            90 => Opcode::StoreName,
            97 => Opcode::StoreGlobal,
            100 => Opcode::LoadConst,
            101 => Opcode::LoadName,
            102 => Opcode::BuildTuple,
            103 => Opcode::BuildList,
            104 => Opcode::BuildSet,
            105 => Opcode::BuildMap,
            121 if version.at_least(3, 12) => Opcode::ReturnConst,
            144 => Opcode::ExtendedArg,
            145 => Opcode::ListAppend,
            146 => Opcode::SetAdd,
            147 => Opcode::MapAdd,
            156 => Opcode::BuildConstKeyMap,
            162 if version.at_least(3, 9) => Opcode::ListExtend,
            163 if version.at_least(3, 9) => Opcode::SetUpdate,
            165 if version.at_least(3, 9) => Opcode::DictUpdate,
            other => Opcode::Other(other),
        }
    }

    /// Map a disassembler mnemonic back to an opcode.
    pub fn from_name(name: &str) -> Opcode {
        match name {
            "CACHE" => Opcode::Cache,
            "RESUME" => Opcode::Resume,
            "LOAD_CONST" => Opcode::LoadConst,
            "LOAD_NAME" => Opcode::LoadName,
            "STORE_NAME" => Opcode::StoreName,
            "STORE_GLOBAL" => Opcode::StoreGlobal,
            "BUILD_TUPLE" => Opcode::BuildTuple,
            "BUILD_LIST" => Opcode::BuildList,
            "BUILD_SET" => Opcode::BuildSet,
            "BUILD_MAP" => Opcode::BuildMap,
            "BUILD_CONST_KEY_MAP" => Opcode::BuildConstKeyMap,
            "MAP_ADD" => Opcode::MapAdd,
            "DICT_UPDATE" => Opcode::DictUpdate,
            "LIST_EXTEND" => Opcode::ListExtend,
            "SET_UPDATE" => Opcode::SetUpdate,
            "LIST_APPEND" => Opcode::ListAppend,
            "SET_ADD" => Opcode::SetAdd,
            "RETURN_VALUE" => Opcode::ReturnValue,
            "RETURN_CONST" => Opcode::ReturnConst,
            "EXTENDED_ARG" => Opcode::ExtendedArg,
            other => other
                .strip_prefix("OPCODE_")
                .and_then(|n| n.parse::<u8>().ok())
                .map(Opcode::Other)
                .unwrap_or(Opcode::Other(u8::MAX)),
        }
    }

    pub fn name(&self) -> String {
        let fixed = match self {
            Opcode::Cache => "CACHE",
            Opcode::Resume => "RESUME",
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::LoadName => "LOAD_NAME",
            Opcode::StoreName => "STORE_NAME",
            Opcode::StoreGlobal => "STORE_GLOBAL",
            Opcode::BuildTuple => "BUILD_TUPLE",
            Opcode::BuildList => "BUILD_LIST",
            Opcode::BuildSet => "BUILD_SET",
            Opcode::BuildMap => "BUILD_MAP",
            Opcode::BuildConstKeyMap => "BUILD_CONST_KEY_MAP",
            Opcode::MapAdd => "MAP_ADD",
            Opcode::DictUpdate => "DICT_UPDATE",
            Opcode::ListExtend => "LIST_EXTEND",
            Opcode::SetUpdate => "SET_UPDATE",
            Opcode::ListAppend => "LIST_APPEND",
            Opcode::SetAdd => "SET_ADD",
            Opcode::ReturnValue => "RETURN_VALUE",
            Opcode::ReturnConst => "RETURN_CONST",
            Opcode::ExtendedArg => "EXTENDED_ARG",
            Opcode::Other(n) => return format!("OPCODE_{n}"),
        };
        fixed.to_string()
    }

    /// True for the ops that only build literal values from the stack.
    pub fn builds_literal(&self) -> bool {
        matches!(
            self,
            Opcode::LoadConst
                | Opcode::BuildTuple
                | Opcode::BuildList
                | Opcode::BuildSet
                | Opcode::BuildMap
                | Opcode::BuildConstKeyMap
                | Opcode::MapAdd
                | Opcode::DictUpdate
                | Opcode::ListExtend
                | Opcode::SetUpdate
                | Opcode::ListAppend
                | Opcode::SetAdd
        )
    }
}

/// Decode a raw instruction stream (2-byte words).
///
/// `EXTENDED_ARG` prefixes are folded into the following instruction and
/// inline `CACHE` entries are dropped. The reported offset is the offset of
/// the first word of the instruction, prefixes included.
pub fn decode(code: &[u8], version: PyVersion) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(code.len() / 2);
    let mut extended: u32 = 0;
    let mut start: Option<u32> = None;
    for (i, word) in code.chunks_exact(2).enumerate() {
        let offset = (i * 2) as u32;
        let op = Opcode::from_byte(word[0], version);
        let arg = (extended << 8) | word[1] as u32;
        match op {
            Opcode::Cache => continue,
            Opcode::ExtendedArg => {
                extended = arg;
                start.get_or_insert(offset);
            }
            _ => {
                out.push(Instruction {
                    offset: start.take().unwrap_or(offset),
                    op,
                    arg,
                });
                extended = 0;
            }
        }
    }
    out
}
