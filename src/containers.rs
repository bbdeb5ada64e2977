use crate::jsvalue::{JSWord, JSW};
use crate::memblock::{MbHeader, MTag, JS_MB_PAYLOAD_MAX, JS_MTAG_BITS};

const JS_STRING_FLAG_UNIQUE_SHIFT: u32 = JS_MTAG_BITS;
const JS_STRING_FLAG_ASCII_SHIFT: u32 = JS_MTAG_BITS + 1;
const JS_STRING_FLAG_NUMERIC_SHIFT: u32 = JS_MTAG_BITS + 2;
const JS_STRING_LEN_SHIFT: u32 = JS_MTAG_BITS + 3;

pub const JS_STRING_LEN_MAX: JSWord = (1 << (32 - JS_STRING_LEN_SHIFT)) - 1;
pub const JS_BYTE_ARRAY_SIZE_MAX: JSWord = JS_MB_PAYLOAD_MAX;
pub const JS_VALUE_ARRAY_SIZE_MAX: JSWord = JS_MB_PAYLOAD_MAX;

/// Conversions shared by every typed block header. Converting from a raw
/// [`MbHeader`] reinterprets the bits; callers check the tag first.
macro_rules! block_header {
    ($name:ident) => {
        impl $name {
            pub const fn header(self) -> MbHeader {
                self.0
            }
        }

        impl From<$name> for MbHeader {
            fn from(header: $name) -> Self {
                header.0
            }
        }

        impl From<MbHeader> for $name {
            fn from(header: MbHeader) -> Self {
                Self(header)
            }
        }
    };
}

/// String block header: UTF-8 bytes follow, padded to a word boundary.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StringHeader(MbHeader);

block_header!(StringHeader);

impl StringHeader {
    pub fn new(len: JSWord, is_unique: bool, is_ascii: bool, is_numeric: bool) -> Self {
        debug_assert!(len <= JS_STRING_LEN_MAX);
        let mut word = MbHeader::new(MTag::String, false).word();
        word |= (is_unique as JSWord) << JS_STRING_FLAG_UNIQUE_SHIFT;
        word |= (is_ascii as JSWord) << JS_STRING_FLAG_ASCII_SHIFT;
        word |= (is_numeric as JSWord) << JS_STRING_FLAG_NUMERIC_SHIFT;
        Self(MbHeader::from_word(word | (len << JS_STRING_LEN_SHIFT)))
    }

    pub const fn len(self) -> JSWord {
        self.0.word() >> JS_STRING_LEN_SHIFT
    }

    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub const fn is_unique(self) -> bool {
        (self.0.word() >> JS_STRING_FLAG_UNIQUE_SHIFT) & 1 != 0
    }

    pub const fn is_ascii(self) -> bool {
        (self.0.word() >> JS_STRING_FLAG_ASCII_SHIFT) & 1 != 0
    }

    pub const fn is_numeric(self) -> bool {
        (self.0.word() >> JS_STRING_FLAG_NUMERIC_SHIFT) & 1 != 0
    }

    pub fn with_unique(self, is_unique: bool, is_numeric: bool) -> Self {
        let mask = (1 << JS_STRING_FLAG_UNIQUE_SHIFT) | (1 << JS_STRING_FLAG_NUMERIC_SHIFT);
        let word = (self.0.word() & !mask)
            | ((is_unique as JSWord) << JS_STRING_FLAG_UNIQUE_SHIFT)
            | ((is_numeric as JSWord) << JS_STRING_FLAG_NUMERIC_SHIFT);
        Self(MbHeader::from_word(word))
    }
}

/// Words needed to store `len` payload bytes after a header word.
pub const fn bytes_block_words(len: JSWord) -> u32 {
    1 + len.div_ceil(JSW)
}

/// Raw byte storage (byte code, pc2line tables, array buffers).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ByteArrayHeader(MbHeader);

block_header!(ByteArrayHeader);

impl ByteArrayHeader {
    pub fn new(size: JSWord) -> Self {
        debug_assert!(size <= JS_BYTE_ARRAY_SIZE_MAX);
        Self(MbHeader::with_payload(MTag::ByteArray, size))
    }

    pub const fn size(self) -> JSWord {
        self.0.payload()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ValueArrayHeader(MbHeader);

block_header!(ValueArrayHeader);

impl ValueArrayHeader {
    pub fn new(size: JSWord) -> Self {
        debug_assert!(size <= JS_VALUE_ARRAY_SIZE_MAX);
        Self(MbHeader::with_payload(MTag::ValueArray, size))
    }

    pub const fn size(self) -> JSWord {
        self.0.payload()
    }
}

pub const fn value_array_block_words(size: JSWord) -> u32 {
    1 + size
}

/// Captured variable cell. While attached, word 1 is the address of the
/// frame slot it aliases; once detached it holds the value itself.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VarRefHeader(MbHeader);

block_header!(VarRefHeader);

pub const VARREF_BLOCK_WORDS: u32 = 2;

impl VarRefHeader {
    pub fn new(is_detached: bool) -> Self {
        Self(MbHeader::with_payload(MTag::VarRef, is_detached as JSWord))
    }

    pub const fn is_detached(self) -> bool {
        self.0.payload() & 1 != 0
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn string_header_roundtrip() {
        let header = StringHeader::new(42, true, false, true);
        assert_eq!(header.len(), 42);
        assert!(header.is_unique());
        assert!(!header.is_ascii());
        assert!(header.is_numeric());
        let plain = header.with_unique(false, false);
        assert!(!plain.is_unique());
        assert!(!plain.is_numeric());
        assert_eq!(plain.len(), 42);
    }

    #[test]
    fn block_words_round_up() {
        assert_eq!(bytes_block_words(0), 1);
        assert_eq!(bytes_block_words(1), 2);
        assert_eq!(bytes_block_words(4), 2);
        assert_eq!(bytes_block_words(5), 3);
        assert_eq!(value_array_block_words(3), 4);
    }

    #[test]
    fn byte_and_value_array_headers() {
        assert_eq!(ByteArrayHeader::new(128).size(), 128);
        assert_eq!(ValueArrayHeader::new(7).size(), 7);
        assert_eq!(ValueArrayHeader::new(7).header().tag(), MTag::ValueArray);
    }

    #[test]
    fn var_ref_header_roundtrip() {
        assert!(VarRefHeader::new(true).is_detached());
        assert!(!VarRefHeader::new(false).is_detached());
    }
}
