//! JavaScript strings.
//!
//! Strings are stored as UTF-8 in heap `String` blocks. Lone surrogates are
//! kept in their 3-byte encoded form, so every UTF-16 string round-trips.
//! A string of exactly one code point is never allocated: it is a
//! `STRING_CHAR` value. The empty string is a single shared atom.

use crate::atom::{parse_array_index, string_block_bytes};
use crate::containers::{bytes_block_words, StringHeader, JS_STRING_LEN_MAX};
use crate::context::JSContext;
use crate::cutils::{push_utf8, utf16_len, utf8_chars, utf8_decode};
use crate::exception::{Exception, JsResult};
use crate::jsvalue::{new_string_char, value_from_ptr, JSValue, ValueKind};
use crate::memblock::MTag;
use crate::memory::MemoryError;
use std::borrow::Cow;
use std::cmp::Ordering;

fn is_high_surrogate_utf8(bytes: &[u8]) -> bool {
    bytes.len() == 3 && bytes[0] == 0xed && (0xa0..=0xaf).contains(&bytes[1])
}

fn is_low_surrogate_utf8(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && bytes[0] == 0xed && (0xb0..=0xbf).contains(&bytes[1])
}

/// Concatenates two UTF-8 buffers, merging a trailing high surrogate with a
/// leading low surrogate into one 4-byte sequence.
fn concat_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    if a.len() >= 3 && is_high_surrogate_utf8(&a[a.len() - 3..]) && is_low_surrogate_utf8(b) {
        let (hi, _) = utf8_decode(&a[a.len() - 3..]);
        let (lo, _) = utf8_decode(&b[..3]);
        out.extend_from_slice(&a[..a.len() - 3]);
        push_utf8(&mut out, 0x10000 + ((hi - 0xd800) << 10) + (lo - 0xdc00));
        out.extend_from_slice(&b[3..]);
    } else {
        out.extend_from_slice(a);
        out.extend_from_slice(b);
    }
    out
}

/// Code point of `bytes` if it holds exactly one.
fn single_code_point(bytes: &[u8]) -> Option<u32> {
    let (c, len) = utf8_decode(bytes);
    (len == bytes.len() && len > 0).then_some(c)
}

impl<'a> JSContext<'a> {
    pub fn is_string(&self, val: JSValue) -> bool {
        match val.kind() {
            ValueKind::StringChar(_) => true,
            ValueKind::Ptr(addr) => self.block_tag(addr) == Some(MTag::String),
            _ => false,
        }
    }

    fn alloc_string(&mut self, bytes: &[u8], is_unique: bool) -> JsResult<JSValue> {
        if bytes.len() > JS_STRING_LEN_MAX as usize {
            return Err(self.throw_range_error("invalid string length"));
        }
        let len = bytes.len() as u32;
        let is_numeric = is_unique && parse_array_index(bytes).is_some();
        let header = StringHeader::new(len, is_unique, bytes.is_ascii(), is_numeric);
        let addr = self.alloc_block(header.header(), bytes_block_words(len))?;
        self.mem.bytes_mut(addr + 4, bytes.len())?.copy_from_slice(bytes);
        Ok(value_from_ptr(addr))
    }

    /// Creates a string value from UTF-8 bytes.
    pub fn new_string(&mut self, bytes: &[u8]) -> JsResult<JSValue> {
        if bytes.is_empty() {
            return Ok(self.roots.empty_string);
        }
        if let Some(c) = single_code_point(bytes) {
            return Ok(new_string_char(c));
        }
        self.alloc_string(bytes, false)
    }

    /// Returns the atom for `bytes`, creating a unique string if needed.
    pub fn intern(&mut self, bytes: &[u8]) -> JsResult<JSValue> {
        if bytes.is_empty() && self.roots.empty_string.is_ptr() {
            return Ok(self.roots.empty_string);
        }
        if let Some(c) = single_code_point(bytes) {
            return Ok(new_string_char(c));
        }
        if let Some(atom) = self.atoms.find(&self.mem, bytes)? {
            // Atoms are weak; the caller may not have stored it anywhere yet.
            self.keep_alive(atom);
            return Ok(atom);
        }
        let val = self.alloc_string(bytes, true)?;
        self.atoms.insert_unique(&self.mem, val)?;
        Ok(val)
    }

    /// Atom for a string value. Unique strings are returned as is.
    pub fn to_atom(&mut self, val: JSValue) -> JsResult<JSValue> {
        match val.kind() {
            ValueKind::StringChar(_) => Ok(val),
            ValueKind::Ptr(addr) => {
                let header = StringHeader::from(self.header_at(addr)?);
                if header.is_unique() {
                    return Ok(val);
                }
                let bytes = string_block_bytes(&self.mem, val)?.to_vec();
                self.intern(&bytes)
            }
            _ => Err(Exception::Memory(MemoryError::OutOfBounds(val.bits()))),
        }
    }

    pub fn is_atom(&self, val: JSValue) -> bool {
        match val.kind() {
            ValueKind::StringChar(_) => true,
            ValueKind::Ptr(addr) => self
                .header_at(addr)
                .map(|h| h.tag() == MTag::String && StringHeader::from(h).is_unique())
                .unwrap_or(false),
            _ => false,
        }
    }

    /// UTF-8 bytes of a string value.
    pub fn string_bytes(&self, val: JSValue) -> JsResult<Cow<'_, [u8]>> {
        match val.kind() {
            ValueKind::StringChar(c) => {
                let mut out = Vec::with_capacity(4);
                push_utf8(&mut out, c);
                Ok(Cow::Owned(out))
            }
            ValueKind::Ptr(_) => Ok(Cow::Borrowed(string_block_bytes(&self.mem, val)?)),
            _ => Err(Exception::Memory(MemoryError::OutOfBounds(val.bits()))),
        }
    }

    /// Lossy Rust copy of a string value.
    pub fn string_to_rust(&self, val: JSValue) -> JsResult<String> {
        Ok(String::from_utf8_lossy(&self.string_bytes(val)?).into_owned())
    }

    pub fn concat_strings(&mut self, a: JSValue, b: JSValue) -> JsResult<JSValue> {
        let bytes = concat_bytes(&self.string_bytes(a)?, &self.string_bytes(b)?);
        self.new_string(&bytes)
    }

    /// Length in UTF-16 code units.
    pub fn string_length(&self, val: JSValue) -> JsResult<u32> {
        match val.kind() {
            ValueKind::StringChar(c) => Ok(if c >= 0x10000 { 2 } else { 1 }),
            _ => Ok(utf16_len(&self.string_bytes(val)?) as u32),
        }
    }

    /// UTF-16 unit at `idx` as a one-character string, `None` past the end.
    pub fn string_char_at(&self, val: JSValue, idx: u32) -> JsResult<Option<JSValue>> {
        let bytes = self.string_bytes(val)?;
        let mut pos = 0u32;
        for c in utf8_chars(&bytes) {
            if c >= 0x10000 {
                let hi = 0xd800 + ((c - 0x10000) >> 10);
                let lo = 0xdc00 + ((c - 0x10000) & 0x3ff);
                if pos == idx {
                    return Ok(Some(new_string_char(hi)));
                }
                if pos + 1 == idx {
                    return Ok(Some(new_string_char(lo)));
                }
                pos += 2;
            } else {
                if pos == idx {
                    return Ok(Some(new_string_char(c)));
                }
                pos += 1;
            }
        }
        Ok(None)
    }

    pub fn compare_strings(&self, a: JSValue, b: JSValue) -> JsResult<Ordering> {
        Ok(self.string_bytes(a)?.as_ref().cmp(self.string_bytes(b)?.as_ref()))
    }

    pub fn strings_equal(&self, a: JSValue, b: JSValue) -> JsResult<bool> {
        if a == b {
            return Ok(true);
        }
        if a.kind() == b.kind() && !a.is_ptr() {
            return Ok(false);
        }
        Ok(self.compare_strings(a, b)? == Ordering::Equal)
    }
}
