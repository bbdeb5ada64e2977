//! Builds ROM tables in the layout a context maps at `JS_STDLIB_BASE`.
//!
//! ```text
//! [unique string blocks][sorted atom value array][global (name, value) pairs]
//! ```

use crate::atom::parse_array_index;
use crate::capi_defs::{JSCFinalizer, JSCFunctionDef};
use crate::containers::{bytes_block_words, StringHeader, ValueArrayHeader};
use crate::cutils::{get_u32, put_f64, put_u32, utf8_decode};
use crate::jsvalue::{
    fits_short_int, new_bool, new_short_func, new_short_int, new_string_char, value_from_ptr, JSValue,
    JSW, JS_NULL, JS_UNDEFINED,
};
use crate::memblock::{MbHeader, MTag, FLOAT64_BLOCK_WORDS};
use crate::memory::JS_STDLIB_BASE;
use crate::stdlib::stdlib_def::StdLibraryDef;
use std::collections::BTreeSet;

/// Value of a global property in the template.
#[derive(Clone, Debug, PartialEq)]
pub enum StdlibValue {
    /// Index into the C function table.
    CFunction(u32),
    Int(i32),
    Bool(bool),
    Null,
    Undefined,
    String(String),
}

#[derive(Debug, Default)]
pub struct StdlibBuilder {
    atoms: BTreeSet<Vec<u8>>,
    globals: Vec<(String, StdlibValue)>,
}

/// Output of [`StdlibBuilder::build`].
#[derive(Debug, Clone)]
pub struct StdlibTable {
    pub bytes: Vec<u8>,
    pub sorted_atoms_offset: u32,
    pub global_object_offset: u32,
}

impl StdlibTable {
    pub fn def<'a>(
        &'a self,
        c_function_table: &'a [JSCFunctionDef],
        c_finalizer_table: &'a [Option<JSCFinalizer>],
        class_count: u32,
    ) -> StdLibraryDef<'a> {
        StdLibraryDef {
            stdlib_table: &self.bytes,
            c_function_table,
            c_finalizer_table,
            stdlib_table_align: JSW,
            sorted_atoms_offset: Some(self.sorted_atoms_offset),
            global_object_offset: Some(self.global_object_offset),
            class_count,
        }
    }
}

fn is_inline_string(bytes: &[u8]) -> bool {
    let (_, len) = utf8_decode(bytes);
    len == bytes.len() && len > 0
}

impl StdlibBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn atom(&mut self, name: &str) -> &mut Self {
        if !is_inline_string(name.as_bytes()) {
            self.atoms.insert(name.as_bytes().to_vec());
        }
        self
    }

    pub fn global(&mut self, name: &str, value: StdlibValue) -> &mut Self {
        self.atom(name);
        if let StdlibValue::String(s) = &value {
            let s = s.clone();
            self.atom(&s);
        }
        self.globals.push((name.to_string(), value));
        self
    }

    pub fn build(&self) -> StdlibTable {
        let mut words: Vec<u32> = Vec::new();
        let mut offsets = Vec::with_capacity(self.atoms.len());
        for bytes in &self.atoms {
            let offset = words.len() as u32;
            offsets.push(offset);
            let len = bytes.len() as u32;
            let header = StringHeader::new(len, true, bytes.is_ascii(), parse_array_index(bytes).is_some());
            words.push(header.header().word());
            let mut padded = bytes.clone();
            padded.resize(((bytes_block_words(len) - 1) * JSW) as usize, 0);
            for chunk in padded.chunks(JSW as usize) {
                words.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
        }
        let addr_of = |offset: u32| JS_STDLIB_BASE + offset * JSW;
        let atom_value = |s: &[u8]| -> JSValue {
            if is_inline_string(s) {
                let (c, _) = utf8_decode(s);
                return new_string_char(c);
            }
            match self.atoms.iter().position(|a| a.as_slice() == s) {
                Some(i) => value_from_ptr(addr_of(offsets[i])),
                None => JS_UNDEFINED,
            }
        };

        let sorted_atoms_offset = words.len() as u32;
        words.push(ValueArrayHeader::new(offsets.len() as u32).header().word());
        for &offset in &offsets {
            words.push(value_from_ptr(addr_of(offset)).bits());
        }

        let global_object_offset = words.len() as u32;
        words.push(ValueArrayHeader::new(self.globals.len() as u32 * 2).header().word());
        // Integers too wide for a short int are boxed after the global table.
        let mut boxed = Vec::new();
        let boxed_base = global_object_offset + 1 + self.globals.len() as u32 * 2;
        for (name, value) in &self.globals {
            words.push(atom_value(name.as_bytes()).bits());
            let val = match value {
                StdlibValue::CFunction(idx) => new_short_func(*idx),
                StdlibValue::Int(v) if fits_short_int(*v as i64) => new_short_int(*v),
                StdlibValue::Int(v) => {
                    let offset = boxed_base + boxed.len() as u32 * FLOAT64_BLOCK_WORDS;
                    boxed.push(*v as f64);
                    value_from_ptr(addr_of(offset))
                }
                StdlibValue::Bool(b) => new_bool(*b),
                StdlibValue::Null => JS_NULL,
                StdlibValue::Undefined => JS_UNDEFINED,
                StdlibValue::String(s) => atom_value(s.as_bytes()),
            };
            words.push(val.bits());
        }
        for d in boxed {
            let mut raw = [0u8; 8];
            put_f64(&mut raw, d);
            words.push(MbHeader::new(MTag::Float64, false).word());
            words.push(get_u32(&raw[0..]));
            words.push(get_u32(&raw[4..]));
        }

        let mut bytes = vec![0u8; words.len() * JSW as usize];
        for (chunk, word) in bytes.chunks_mut(JSW as usize).zip(&words) {
            put_u32(chunk, *word);
        }
        StdlibTable {
            bytes,
            sorted_atoms_offset,
            global_object_offset,
        }
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::cutils::get_f64;
    use crate::jsvalue::value_to_ptr;

    #[test]
    fn atoms_are_sorted_and_inline_strings_skipped() {
        let mut builder = StdlibBuilder::new();
        builder.atom("zeta").atom("alpha").atom("x").atom("alpha");
        let table = builder.build();
        let header = MbHeader::from_word(get_u32(&table.bytes[table.sorted_atoms_offset as usize * 4..]));
        assert_eq!(header.tag(), MTag::ValueArray);
        assert_eq!(header.payload(), 2);
        // "alpha" comes first.
        let first = get_u32(&table.bytes[0..]);
        assert_eq!(StringHeader::from(MbHeader::from_word(first)).len(), 5);
    }

    #[test]
    fn globals_reference_rom_atoms() {
        let mut builder = StdlibBuilder::new();
        builder
            .global("print", StdlibValue::CFunction(0))
            .global("answer", StdlibValue::Int(42));
        let table = builder.build();
        let base = table.global_object_offset as usize * 4;
        let header = MbHeader::from_word(get_u32(&table.bytes[base..]));
        assert_eq!(header.payload(), 4);
        let name = JSValue::from_bits(get_u32(&table.bytes[base + 4..]));
        assert!(name.is_ptr());
        let func = JSValue::from_bits(get_u32(&table.bytes[base + 8..]));
        assert_eq!(func, new_short_func(0));
        let answer = JSValue::from_bits(get_u32(&table.bytes[base + 16..]));
        assert_eq!(answer, new_short_int(42));
    }

    #[test]
    fn wide_integers_are_boxed() {
        let mut builder = StdlibBuilder::new();
        builder
            .global("big", StdlibValue::Int(i32::MAX))
            .global("small", StdlibValue::Int(-3));
        let table = builder.build();
        let base = table.global_object_offset as usize * 4;
        let big = JSValue::from_bits(get_u32(&table.bytes[base + 8..]));
        assert!(big.is_ptr());
        let offset = (value_to_ptr(big).unwrap() - JS_STDLIB_BASE) as usize;
        let header = MbHeader::from_word(get_u32(&table.bytes[offset..]));
        assert_eq!(header.tag(), MTag::Float64);
        assert_eq!(get_f64(&table.bytes[offset + 4..]), i32::MAX as f64);
        assert_eq!(offset + 12, table.bytes.len());
        let small = JSValue::from_bits(get_u32(&table.bytes[base + 16..]));
        assert_eq!(small, new_short_int(-3));
    }
}
