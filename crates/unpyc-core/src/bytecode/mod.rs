//! Compiled-artifact model: constant values, code objects, the two loaders
//! (native marshal reader and disassembler-report parser) and the
//! qualified-name index built from them.

pub mod code;
pub mod disasm;
pub mod index;
pub mod literal;
pub mod marshal;
pub mod opcodes;
pub mod value;

use std::fmt;

/// Position of a code unit inside the arena owned by a `BytecodeIndex`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UnitId(pub usize);

/// Interpreter version an artifact was compiled for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PyVersion {
    pub major: u8,
    pub minor: u8,
}

impl PyVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn at_least(&self, major: u8, minor: u8) -> bool {
        *self >= PyVersion::new(major, minor)
    }
}

impl fmt::Display for PyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

pub use code::CodeUnit;
pub use index::BytecodeIndex;
pub use value::PyValue;
