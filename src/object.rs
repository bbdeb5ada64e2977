//! Object block layout.
//!
//! ```text
//! word 0   header (class id, extra size)
//! word 1   prototype
//! word 2   property table (value array or null)
//! word 3.. class payload, `extra_size` words
//! ```
//!
//! Every payload word is a `JSValue` (numbers are stored as short ints), so
//! the collector can scan all words after the header uniformly.

use crate::enums::JSObjectClass;
use crate::jsvalue::JSWord;
use crate::memblock::{MbHeader, MTag, JS_MTAG_BITS};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ObjectHeader(JSWord);

impl ObjectHeader {
    pub const CLASS_ID_BITS: u32 = 8;
    pub const CLASS_ID_SHIFT: u32 = JS_MTAG_BITS;
    pub const EXTRA_SIZE_SHIFT: u32 = JS_MTAG_BITS + Self::CLASS_ID_BITS;
    pub const EXTRA_SIZE_BITS: u32 = 32 - Self::EXTRA_SIZE_SHIFT;
    pub const CLASS_ID_MASK: JSWord = (1 << Self::CLASS_ID_BITS) - 1;
    pub const EXTRA_SIZE_MASK: JSWord = (1 << Self::EXTRA_SIZE_BITS) - 1;

    pub fn new(class_id: u8, extra_size: JSWord) -> Self {
        debug_assert!(extra_size <= Self::EXTRA_SIZE_MASK);
        let word = MbHeader::new(MTag::Object, false).word()
            | ((class_id as JSWord) << Self::CLASS_ID_SHIFT)
            | (extra_size << Self::EXTRA_SIZE_SHIFT);
        Self(word)
    }

    pub const fn from_word(word: JSWord) -> Self {
        Self(word)
    }

    pub const fn word(self) -> JSWord {
        self.0
    }

    pub const fn header(self) -> MbHeader {
        MbHeader::from_word(self.0)
    }

    pub const fn class_id(self) -> u8 {
        ((self.0 >> Self::CLASS_ID_SHIFT) & Self::CLASS_ID_MASK) as u8
    }

    pub fn class(self) -> JSObjectClass {
        JSObjectClass::from_id(self.class_id())
    }

    pub const fn extra_size(self) -> JSWord {
        (self.0 >> Self::EXTRA_SIZE_SHIFT) & Self::EXTRA_SIZE_MASK
    }

    pub const fn block_words(self) -> u32 {
        OBJ_PAYLOAD + self.extra_size()
    }
}

impl From<MbHeader> for ObjectHeader {
    fn from(header: MbHeader) -> Self {
        Self(header.word())
    }
}

// Word offsets from the start of the object block.
pub const OBJ_PROTO: u32 = 1;
pub const OBJ_PROPS: u32 = 2;
pub const OBJ_PAYLOAD: u32 = 3;

pub const ARRAY_TAB: u32 = OBJ_PAYLOAD;
pub const ARRAY_LEN: u32 = OBJ_PAYLOAD + 1;

pub const CFUNC_IDX: u32 = OBJ_PAYLOAD;
pub const CFUNC_PARAMS: u32 = OBJ_PAYLOAD + 1;

pub const CLOSURE_FUNC: u32 = OBJ_PAYLOAD;
pub const CLOSURE_VAR_REFS: u32 = OBJ_PAYLOAD + 1;

/// Number, Boolean, String wrappers and Date.
pub const PRIMITIVE_VALUE: u32 = OBJ_PAYLOAD;

pub const REGEXP_SOURCE: u32 = OBJ_PAYLOAD;
pub const REGEXP_FLAGS: u32 = OBJ_PAYLOAD + 1;

pub const ARRAY_BUFFER_BYTES: u32 = OBJ_PAYLOAD;

pub const TYPED_ARRAY_BUFFER: u32 = OBJ_PAYLOAD;
pub const TYPED_ARRAY_OFFSET: u32 = OBJ_PAYLOAD + 1;
pub const TYPED_ARRAY_LEN: u32 = OBJ_PAYLOAD + 2;

/// Index into the context's opaque slots, or -1.
pub const USER_OPAQUE_SLOT: u32 = OBJ_PAYLOAD;

/// Fixed payload size of a class. Closures add one word per captured
/// variable on top of this.
pub fn class_extra_size(class: JSObjectClass) -> u32 {
    match class {
        JSObjectClass::Object | JSObjectClass::TypedArray => 0,
        c if c.is_error() => 0,
        JSObjectClass::Array | JSObjectClass::CFunction | JSObjectClass::RegExp => 2,
        JSObjectClass::Closure => 1,
        JSObjectClass::Number
        | JSObjectClass::Boolean
        | JSObjectClass::String
        | JSObjectClass::Date
        | JSObjectClass::ArrayBuffer
        | JSObjectClass::User => 1,
        c if c.is_typed_array() => 3,
        _ => 0,
    }
}
