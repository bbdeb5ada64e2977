//! Compiled function block layout.
//!
//! All fields after the header are `JSValue`s, so relocation and marking
//! treat them uniformly.

use crate::jsvalue::JSWord;
use crate::memblock::{MbHeader, MTag};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FunctionBytecodeHeader(MbHeader);

impl FunctionBytecodeHeader {
    const IS_ARROW_BIT: JSWord = 1 << 0;
    const HAS_COLUMN_BIT: JSWord = 1 << 1;
    const ARG_COUNT_SHIFT: u32 = 4;
    pub const ARG_COUNT_MASK: JSWord = 0xffff;

    pub fn new(is_arrow: bool, has_column: bool, arg_count: u16) -> Self {
        let mut payload = (arg_count as JSWord) << Self::ARG_COUNT_SHIFT;
        if is_arrow {
            payload |= Self::IS_ARROW_BIT;
        }
        if has_column {
            payload |= Self::HAS_COLUMN_BIT;
        }
        Self(MbHeader::with_payload(MTag::FunctionBytecode, payload))
    }

    pub const fn header(self) -> MbHeader {
        self.0
    }

    /// Arrow functions take `this` from their defining scope.
    pub const fn is_arrow(self) -> bool {
        self.0.payload() & Self::IS_ARROW_BIT != 0
    }

    /// The pc2line table records columns as well as lines.
    pub const fn has_column(self) -> bool {
        self.0.payload() & Self::HAS_COLUMN_BIT != 0
    }

    pub const fn arg_count(self) -> u16 {
        ((self.0.payload() >> Self::ARG_COUNT_SHIFT) & Self::ARG_COUNT_MASK) as u16
    }
}

impl From<MbHeader> for FunctionBytecodeHeader {
    fn from(header: MbHeader) -> Self {
        Self(header)
    }
}

pub const FB_FUNC_NAME: u32 = 1;
pub const FB_BYTE_CODE: u32 = 2;
pub const FB_CPOOL: u32 = 3;
pub const FB_VARS: u32 = 4;
pub const FB_CLOSURE_VARS: u32 = 5;
pub const FB_FILENAME: u32 = 6;
pub const FB_PC2LINE: u32 = 7;
/// Number of locals, as a short int.
pub const FB_VAR_COUNT: u32 = 8;
pub const FB_BLOCK_WORDS: u32 = 9;

/// Closure variable descriptor: where the enclosing function finds the
/// cell to capture. Encoded in the closure-vars array as a short int.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClosureVarSource {
    /// Argument slot of the enclosing frame.
    Arg(u16),
    /// Local slot of the enclosing frame.
    Local(u16),
    /// Captured cell of the enclosing closure.
    VarRef(u16),
}

impl ClosureVarSource {
    pub fn encode(self) -> i32 {
        match self {
            ClosureVarSource::Arg(idx) => (idx as i32) << 2,
            ClosureVarSource::Local(idx) => ((idx as i32) << 2) | 1,
            ClosureVarSource::VarRef(idx) => ((idx as i32) << 2) | 2,
        }
    }

    pub fn decode(raw: i32) -> Option<Self> {
        let idx = u16::try_from(raw >> 2).ok()?;
        match raw & 3 {
            0 => Some(ClosureVarSource::Arg(idx)),
            1 => Some(ClosureVarSource::Local(idx)),
            2 => Some(ClosureVarSource::VarRef(idx)),
            _ => None,
        }
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = FunctionBytecodeHeader::new(true, false, 513);
        assert!(header.is_arrow());
        assert!(!header.has_column());
        assert_eq!(header.arg_count(), 513);
        assert_eq!(header.header().tag(), MTag::FunctionBytecode);
    }

    #[test]
    fn closure_var_source_encoding() {
        for src in [
            ClosureVarSource::Arg(0),
            ClosureVarSource::Local(7),
            ClosureVarSource::VarRef(300),
        ] {
            assert_eq!(ClosureVarSource::decode(src.encode()), Some(src));
        }
        assert_eq!(ClosureVarSource::decode(3), None);
    }
}
