//! Heap block headers.
//!
//! Every heap block starts with one header word: bit 0 is the GC mark, bits
//! 1..=3 hold the block tag and the remaining bits are tag specific.

use crate::jsvalue::JSWord;

pub const JS_MTAG_BITS: u32 = 4;
pub const JS_MTAG_SHIFT: u32 = 1;
pub const JS_MTAG_WIDTH: u32 = JS_MTAG_BITS - 1;
pub const JS_MTAG_MASK: JSWord = (1 << JS_MTAG_WIDTH) - 1;
pub const JS_MTAG_FIELD_MASK: JSWord = JS_MTAG_MASK << JS_MTAG_SHIFT;

/// Largest payload that fits above the tag bits.
pub const JS_MB_PAYLOAD_MAX: JSWord = (1 << (32 - JS_MTAG_BITS)) - 1;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MTag {
    Free = 0,
    Object = 1,
    Float64 = 2,
    String = 3,
    FunctionBytecode = 4,
    ValueArray = 5,
    ByteArray = 6,
    VarRef = 7,
}

pub const JS_MTAG_COUNT: usize = 8;

impl MTag {
    pub const fn from_bits(bits: JSWord) -> Self {
        match bits & JS_MTAG_MASK {
            0 => MTag::Free,
            1 => MTag::Object,
            2 => MTag::Float64,
            3 => MTag::String,
            4 => MTag::FunctionBytecode,
            5 => MTag::ValueArray,
            6 => MTag::ByteArray,
            _ => MTag::VarRef,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MTag::Free => "free",
            MTag::Object => "object",
            MTag::Float64 => "float64",
            MTag::String => "string",
            MTag::FunctionBytecode => "function bytecode",
            MTag::ValueArray => "value array",
            MTag::ByteArray => "byte array",
            MTag::VarRef => "var ref",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MbHeader(JSWord);

impl MbHeader {
    pub const fn new(tag: MTag, gc_mark: bool) -> Self {
        Self(((tag as JSWord) << JS_MTAG_SHIFT) | gc_mark as JSWord)
    }

    pub const fn with_payload(tag: MTag, payload: JSWord) -> Self {
        Self(((tag as JSWord) << JS_MTAG_SHIFT) | (payload << JS_MTAG_BITS))
    }

    pub const fn from_word(word: JSWord) -> Self {
        Self(word)
    }

    pub const fn word(self) -> JSWord {
        self.0
    }

    pub const fn tag(self) -> MTag {
        MTag::from_bits((self.0 & JS_MTAG_FIELD_MASK) >> JS_MTAG_SHIFT)
    }

    pub const fn gc_mark(self) -> bool {
        self.0 & 1 != 0
    }

    pub const fn payload(self) -> JSWord {
        self.0 >> JS_MTAG_BITS
    }

    pub const fn with_gc_mark(self, mark: bool) -> Self {
        Self((self.0 & !1) | mark as JSWord)
    }
}

/// A free block records its total size in words, header included.
pub fn free_block_header(size_words: u32) -> MbHeader {
    debug_assert!(size_words >= 1);
    MbHeader::with_payload(MTag::Free, size_words)
}

/// Header word followed by the 8 little-endian bytes of the number.
pub const FLOAT64_BLOCK_WORDS: u32 = 3;

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn mtag_fields_roundtrip() {
        let header = MbHeader::new(MTag::String, true);
        assert_eq!(header.tag(), MTag::String);
        assert!(header.gc_mark());
        assert_eq!(MbHeader::new(MTag::Object, false).tag(), MTag::Object);
        assert!(!MbHeader::new(MTag::Object, false).gc_mark());
    }

    #[test]
    fn every_tag_fits_the_mask() {
        for raw in 0..JS_MTAG_COUNT as JSWord {
            let tag = MTag::from_bits(raw);
            assert_eq!(tag as JSWord, raw);
            assert_eq!(MbHeader::new(tag, false).tag(), tag);
        }
    }

    #[test]
    fn payload_survives_mark_toggle() {
        let header = free_block_header(0x1234);
        assert_eq!(header.tag(), MTag::Free);
        assert_eq!(header.payload(), 0x1234);
        let marked = header.with_gc_mark(true);
        assert!(marked.gc_mark());
        assert_eq!(marked.payload(), 0x1234);
        assert_eq!(marked.with_gc_mark(false), header);
    }
}
