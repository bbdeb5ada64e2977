//! Tagged 32-bit value representation.
//!
//! Layout of the low bits:
//! - `xxx0`: 31-bit signed integer (`v << 1`).
//! - `xx01`: heap pointer, the address is `bits & !3`.
//! - `xx11`: special value; bits 2..=4 select the sub-tag and bits 5.. carry
//!   the payload. Booleans are sub-tag 0, so `3` is both the special class
//!   and the boolean tag.

pub type JSWord = u32;

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct JSValue(JSWord);

pub const JSW: JSWord = core::mem::size_of::<JSValue>() as JSWord;

pub const JS_TAG_INT: JSWord = 0;
pub const JS_TAG_PTR: JSWord = 1;
pub const JS_TAG_SPECIAL: JSWord = 3;
pub const JS_TAG_BOOL: JSWord = JS_TAG_SPECIAL | (0 << 2);
pub const JS_TAG_NULL: JSWord = JS_TAG_SPECIAL | (1 << 2);
pub const JS_TAG_UNDEFINED: JSWord = JS_TAG_SPECIAL | (2 << 2);
pub const JS_TAG_EXCEPTION: JSWord = JS_TAG_SPECIAL | (3 << 2);
pub const JS_TAG_SHORT_FUNC: JSWord = JS_TAG_SPECIAL | (4 << 2);
pub const JS_TAG_UNINITIALIZED: JSWord = JS_TAG_SPECIAL | (5 << 2);
pub const JS_TAG_STRING_CHAR: JSWord = JS_TAG_SPECIAL | (6 << 2);
pub const JS_TAG_CATCH_OFFSET: JSWord = JS_TAG_SPECIAL | (7 << 2);

pub const JS_TAG_SPECIAL_BITS: u32 = 5;
const JS_TAG_SPECIAL_MASK: JSWord = (1 << JS_TAG_SPECIAL_BITS) - 1;

pub const JS_NULL: JSValue = value_make_special(JS_TAG_NULL, 0);
pub const JS_UNDEFINED: JSValue = value_make_special(JS_TAG_UNDEFINED, 0);
pub const JS_UNINITIALIZED: JSValue = value_make_special(JS_TAG_UNINITIALIZED, 0);
pub const JS_FALSE: JSValue = value_make_special(JS_TAG_BOOL, 0);
pub const JS_TRUE: JSValue = value_make_special(JS_TAG_BOOL, 1);

pub const JS_EX_NORMAL: u32 = 0;
pub const JS_EX_CALL: u32 = 1;
pub const JS_EXCEPTION: JSValue = value_make_special(JS_TAG_EXCEPTION, JS_EX_NORMAL);
/// Returned by a native function that staged a call with `js_push_arg` and
/// wants the interpreter to perform it.
pub const JS_EXCEPTION_CALL: JSValue = value_make_special(JS_TAG_EXCEPTION, JS_EX_CALL);

pub const JS_SHORTINT_MIN: i32 = -(1 << 30);
pub const JS_SHORTINT_MAX: i32 = (1 << 30) - 1;

/// Largest code point representable in a `STRING_CHAR` payload.
pub const JS_STRING_CHAR_MAX: u32 = 0x10_ffff;

/// Closed view of a value, one variant per tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Int(i32),
    Ptr(u32),
    Bool(bool),
    Null,
    Undefined,
    Exception(u32),
    ShortFunc(u32),
    Uninitialized,
    StringChar(u32),
    CatchOffset(u32),
}

impl JSValue {
    pub const fn from_bits(bits: JSWord) -> Self {
        JSValue(bits)
    }

    pub const fn bits(self) -> JSWord {
        self.0
    }

    pub fn kind(self) -> ValueKind {
        if is_int(self) {
            return ValueKind::Int(value_get_int(self));
        }
        if is_ptr(self) {
            return ValueKind::Ptr(value_get_ptr(self));
        }
        let payload = (self.0 >> JS_TAG_SPECIAL_BITS) as u32;
        match value_get_special_tag(self) {
            JS_TAG_BOOL => ValueKind::Bool(payload != 0),
            JS_TAG_NULL => ValueKind::Null,
            JS_TAG_UNDEFINED => ValueKind::Undefined,
            JS_TAG_EXCEPTION => ValueKind::Exception(payload),
            JS_TAG_SHORT_FUNC => ValueKind::ShortFunc(payload),
            JS_TAG_UNINITIALIZED => ValueKind::Uninitialized,
            JS_TAG_STRING_CHAR => ValueKind::StringChar(payload),
            _ => ValueKind::CatchOffset(payload),
        }
    }

    pub fn is_int(self) -> bool {
        is_int(self)
    }

    pub fn is_ptr(self) -> bool {
        is_ptr(self)
    }

    pub fn is_bool(self) -> bool {
        is_bool(self)
    }

    pub fn is_null(self) -> bool {
        is_null(self)
    }

    pub fn is_undefined(self) -> bool {
        is_undefined(self)
    }

    pub fn is_exception(self) -> bool {
        is_exception(self)
    }

    pub fn get_int(self) -> i32 {
        value_get_int(self)
    }

    pub fn get_special_value(self) -> i32 {
        value_get_special_value(self)
    }
}

impl core::fmt::Debug for JSValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.kind() {
            ValueKind::Int(v) => write!(f, "Int({v})"),
            ValueKind::Ptr(addr) => write!(f, "Ptr({addr:#010x})"),
            ValueKind::Bool(b) => write!(f, "Bool({b})"),
            ValueKind::Null => f.write_str("Null"),
            ValueKind::Undefined => f.write_str("Undefined"),
            ValueKind::Exception(ex) => write!(f, "Exception({ex})"),
            ValueKind::ShortFunc(idx) => write!(f, "ShortFunc({idx})"),
            ValueKind::Uninitialized => f.write_str("Uninitialized"),
            ValueKind::StringChar(c) => write!(f, "StringChar({c:#x})"),
            ValueKind::CatchOffset(pc) => write!(f, "CatchOffset({pc})"),
        }
    }
}

pub const fn value_make_special(tag: JSWord, v: u32) -> JSValue {
    JSValue(tag | (v << JS_TAG_SPECIAL_BITS))
}

pub fn value_get_int(v: JSValue) -> i32 {
    (v.0 as i32) >> 1
}

pub fn value_get_special_value(v: JSValue) -> i32 {
    (v.0 as i32) >> JS_TAG_SPECIAL_BITS
}

pub fn value_get_special_tag(v: JSValue) -> JSWord {
    v.0 & JS_TAG_SPECIAL_MASK
}

/// `val` must fit in 31 bits; see [`fits_short_int`].
pub const fn new_short_int(val: i32) -> JSValue {
    debug_assert!(val >= JS_SHORTINT_MIN && val <= JS_SHORTINT_MAX);
    JSValue(((val as u32) << 1) | JS_TAG_INT)
}

pub fn fits_short_int(val: i64) -> bool {
    (JS_SHORTINT_MIN as i64..=JS_SHORTINT_MAX as i64).contains(&val)
}

pub const fn new_bool(val: bool) -> JSValue {
    value_make_special(JS_TAG_BOOL, val as u32)
}

pub fn new_string_char(c: u32) -> JSValue {
    debug_assert!(c <= JS_STRING_CHAR_MAX);
    value_make_special(JS_TAG_STRING_CHAR, c)
}

pub fn new_short_func(idx: u32) -> JSValue {
    value_make_special(JS_TAG_SHORT_FUNC, idx)
}

pub fn new_catch_offset(pc: u32) -> JSValue {
    value_make_special(JS_TAG_CATCH_OFFSET, pc)
}

pub fn is_int(v: JSValue) -> bool {
    (v.0 & 1) == JS_TAG_INT
}

pub fn is_ptr(v: JSValue) -> bool {
    (v.0 & (JSW - 1)) == JS_TAG_PTR
}

pub fn is_special(v: JSValue) -> bool {
    (v.0 & 3) == JS_TAG_SPECIAL
}

pub fn is_bool(v: JSValue) -> bool {
    value_get_special_tag(v) == JS_TAG_BOOL
}

pub fn is_null(v: JSValue) -> bool {
    v == JS_NULL
}

pub fn is_undefined(v: JSValue) -> bool {
    v == JS_UNDEFINED
}

pub fn is_uninitialized(v: JSValue) -> bool {
    v == JS_UNINITIALIZED
}

/// True for any exception-tagged value, whatever its marker payload.
pub fn is_exception(v: JSValue) -> bool {
    value_get_special_tag(v) == JS_TAG_EXCEPTION
}

pub fn is_string_char(v: JSValue) -> bool {
    value_get_special_tag(v) == JS_TAG_STRING_CHAR
}

pub fn is_short_func(v: JSValue) -> bool {
    value_get_special_tag(v) == JS_TAG_SHORT_FUNC
}

pub fn is_catch_offset(v: JSValue) -> bool {
    value_get_special_tag(v) == JS_TAG_CATCH_OFFSET
}

/// Builds a pointer value from a 4-byte aligned virtual address.
pub fn value_from_ptr(addr: u32) -> JSValue {
    debug_assert_eq!(addr & (JSW - 1), 0);
    JSValue(addr | JS_TAG_PTR)
}

pub fn value_get_ptr(v: JSValue) -> u32 {
    v.0 & !(JSW - 1)
}

pub fn value_to_ptr(v: JSValue) -> Option<u32> {
    is_ptr(v).then(|| value_get_ptr(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem;

    #[test]
    fn word_size_matches_value() {
        assert_eq!(JSW as usize, mem::size_of::<JSValue>());
        assert_eq!(JSW, 4);
    }

    #[test]
    fn tag_numbers_are_fixed() {
        let tags = [
            JS_TAG_INT,
            JS_TAG_PTR,
            JS_TAG_SPECIAL,
            JS_TAG_BOOL,
            JS_TAG_NULL,
            JS_TAG_UNDEFINED,
            JS_TAG_EXCEPTION,
            JS_TAG_SHORT_FUNC,
            JS_TAG_UNINITIALIZED,
            JS_TAG_STRING_CHAR,
            JS_TAG_CATCH_OFFSET,
        ];
        assert_eq!(tags, [0, 1, 3, 3, 7, 11, 15, 19, 23, 27, 31]);
    }

    #[test]
    fn special_tag_roundtrip() {
        let val = value_make_special(JS_TAG_STRING_CHAR, 0x1f642);
        assert_eq!(value_get_special_tag(val), JS_TAG_STRING_CHAR);
        assert_eq!(value_get_special_value(val), 0x1f642);
        assert_eq!(val.kind(), ValueKind::StringChar(0x1f642));
    }

    #[test]
    fn bool_values_match_tags() {
        assert!(is_bool(JS_FALSE));
        assert!(is_bool(JS_TRUE));
        assert!(is_special(JS_TRUE));
        assert_eq!(JS_FALSE.bits(), 3);
        assert_eq!(value_get_special_value(JS_TRUE), 1);
        assert_eq!(JS_TRUE.kind(), ValueKind::Bool(true));
    }

    #[test]
    fn null_undefined_uninitialized() {
        assert!(is_null(JS_NULL));
        assert!(is_undefined(JS_UNDEFINED));
        assert!(is_uninitialized(JS_UNINITIALIZED));
        assert!(!is_bool(JS_NULL));
    }

    #[test]
    fn exception_markers() {
        assert!(is_exception(JS_EXCEPTION));
        assert!(is_exception(JS_EXCEPTION_CALL));
        assert_ne!(JS_EXCEPTION, JS_EXCEPTION_CALL);
        assert_eq!(JS_EXCEPTION_CALL.kind(), ValueKind::Exception(JS_EX_CALL));
    }

    #[test]
    fn int_roundtrip() {
        let samples = [JS_SHORTINT_MIN, -1, 0, 1, 123, JS_SHORTINT_MAX];
        for &val in &samples {
            let tagged = new_short_int(val);
            assert!(is_int(tagged));
            assert_eq!(value_get_int(tagged), val);
        }
        assert!(!fits_short_int(JS_SHORTINT_MAX as i64 + 1));
        assert!(!fits_short_int(JS_SHORTINT_MIN as i64 - 1));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn wide_short_int_is_caught() {
        let _ = new_short_int(JS_SHORTINT_MAX + 1);
    }

    #[test]
    fn ptr_roundtrip() {
        let tagged = value_from_ptr(0x2000_0040);
        assert!(is_ptr(tagged));
        assert!(!is_int(tagged));
        assert_eq!(value_to_ptr(tagged), Some(0x2000_0040));
        assert_eq!(value_to_ptr(new_short_int(8)), None);
    }
}
