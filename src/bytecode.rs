//! Relocatable bytecode images.
//!
//! ```text
//! offset 0   magic (u16) version (u16) base address (u32)
//! offset 8   unique string table (value) main function (value)
//! offset 16  memblocks ...
//! ```
//!
//! Every pointer in an image is an absolute address computed from the base
//! address recorded in the header; the header itself sits at that address.
//! An image prepared by [`JSContext::prepare_bytecode`] has base 0 and must
//! be relocated to the address it will be mapped at before it is loaded.
//! Loading maps the buffer read-only without copying it.

use crate::containers::{StringHeader, ValueArrayHeader};
use crate::context::JSContext;
use crate::cutils::{get_u16, get_u32, put_u16, put_u32};
use crate::exception::JsResult;
use crate::function_bytecode::FB_BLOCK_WORDS;
use crate::heap::mblock_words;
use crate::jsvalue::{value_from_ptr, value_to_ptr, JSValue, JSW, JS_NULL};
use crate::memblock::{MbHeader, MTag};
use crate::memory::JS_IMAGE_REGION_BASE;
use log::debug;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

pub const JS_BYTECODE_MAGIC: u16 = 0xacfb;
pub const JS_BYTECODE_VERSION: u16 = 1;
pub const JS_BYTECODE_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BytecodeError {
    #[error("buffer is smaller than a bytecode header")]
    BufferTooSmall,
    #[error("invalid bytecode magic {0:#06x}")]
    InvalidMagic(u16),
    #[error("unsupported bytecode version {0}")]
    InvalidVersion(u16),
    #[error("memblock at offset {0} runs past the end of the image")]
    Truncated(u32),
    #[error("{0:?} blocks cannot be stored in a bytecode image")]
    UnsupportedBlock(MTag),
    #[error("base address {0:#010x} is not usable for this image")]
    InvalidBase(u32),
    #[error("image is too large")]
    TooLarge,
    #[error("context was not created for bytecode preparation")]
    PrepareDisabled,
    #[error("value is not a function bytecode")]
    NotBytecode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytecodeHeader {
    pub magic: u16,
    pub version: u16,
    pub base_addr: u32,
    pub unique_strings: JSValue,
    pub main_func: JSValue,
}

impl BytecodeHeader {
    /// Decodes and validates the header at the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, BytecodeError> {
        if buf.len() < JS_BYTECODE_HEADER_SIZE {
            return Err(BytecodeError::BufferTooSmall);
        }
        let header = Self {
            magic: get_u16(&buf[0..]),
            version: get_u16(&buf[2..]),
            base_addr: get_u32(&buf[4..]),
            unique_strings: JSValue::from_bits(get_u32(&buf[8..])),
            main_func: JSValue::from_bits(get_u32(&buf[12..])),
        };
        if header.magic != JS_BYTECODE_MAGIC {
            return Err(BytecodeError::InvalidMagic(header.magic));
        }
        if header.version != JS_BYTECODE_VERSION {
            return Err(BytecodeError::InvalidVersion(header.version));
        }
        Ok(header)
    }

    pub fn write(&self, buf: &mut [u8]) {
        put_u16(&mut buf[0..], self.magic);
        put_u16(&mut buf[2..], self.version);
        put_u32(&mut buf[4..], self.base_addr);
        put_u32(&mut buf[8..], self.unique_strings.bits());
        put_u32(&mut buf[12..], self.main_func.bits());
    }
}

/// Maps unique strings of an image to atoms that already exist elsewhere.
pub trait BytecodeAtomResolver {
    /// Atom with the UTF-8 contents `bytes`, if one is known.
    fn resolve_unique_string(&self, bytes: &[u8]) -> Option<JSValue>;
}

impl BytecodeAtomResolver for JSContext<'_> {
    /// Only read-only atoms qualify: RAM atoms could be collected while the
    /// image still points at them.
    fn resolve_unique_string(&self, bytes: &[u8]) -> Option<JSValue> {
        self.atoms.find_rom(&self.mem, bytes).ok().flatten()
    }
}

/// True if `buf` starts with a bytecode header of this engine's version.
pub fn is_bytecode(buf: &[u8]) -> bool {
    BytecodeHeader::parse(buf).is_ok()
}

/// Word indices of the value slots of a block that may hold pointers.
fn value_slots(header: MbHeader) -> Result<core::ops::Range<u32>, BytecodeError> {
    match header.tag() {
        MTag::FunctionBytecode => Ok(1..FB_BLOCK_WORDS),
        MTag::ValueArray => Ok(1..1 + ValueArrayHeader::from(header).size()),
        MTag::String | MTag::ByteArray | MTag::Float64 => Ok(0..0),
        tag => Err(BytecodeError::UnsupportedBlock(tag)),
    }
}

/// Header and size in bytes of the image block at `offset`.
fn image_block(buf: &[u8], offset: usize) -> Result<(MbHeader, usize), BytecodeError> {
    let word = buf
        .get(offset..offset + 4)
        .map(get_u32)
        .ok_or(BytecodeError::Truncated(offset as u32))?;
    let header = MbHeader::from_word(word);
    let size = mblock_words(header) as usize * JSW as usize;
    if offset + size > buf.len() {
        return Err(BytecodeError::Truncated(offset as u32));
    }
    Ok((header, size))
}

/// Rewrites every pointer of the image from its recorded base address to
/// `new_base`. Pointers outside the image are left alone. With a resolver,
/// pointers to the image's unique strings are redirected to equal atoms the
/// resolver already knows.
pub fn relocate_bytecode(
    buf: &mut [u8],
    new_base: u32,
    resolver: Option<&dyn BytecodeAtomResolver>,
) -> Result<(), BytecodeError> {
    let mut header = BytecodeHeader::parse(buf)?;
    let len = u32::try_from(buf.len()).map_err(|_| BytecodeError::TooLarge)?;
    if new_base % JSW != 0 || new_base.checked_add(len).is_none() {
        return Err(BytecodeError::InvalidBase(new_base));
    }
    let old_base = header.base_addr;

    // Validate the whole block chain before touching anything.
    let mut slots = Vec::new();
    let mut offset = JS_BYTECODE_HEADER_SIZE;
    while offset < buf.len() {
        let (block, size) = image_block(buf, offset)?;
        for idx in value_slots(block)? {
            slots.push(offset + (idx * JSW) as usize);
        }
        offset += size;
    }

    let relocate = |buf: &[u8], val: JSValue| -> JSValue {
        let Some(addr) = value_to_ptr(val) else {
            return val;
        };
        if addr < old_base || addr - old_base >= len {
            return val;
        }
        let target = (addr - old_base) as usize;
        if let Some(resolver) = resolver {
            if let Some(atom) = image_unique_string(buf, target).and_then(|s| resolver.resolve_unique_string(s)) {
                return atom;
            }
        }
        value_from_ptr(new_base + target as u32)
    };

    for at in slots {
        let val = JSValue::from_bits(get_u32(&buf[at..]));
        let new_val = relocate(buf, val);
        put_u32(&mut buf[at..], new_val.bits());
    }
    header.unique_strings = relocate(buf, header.unique_strings);
    header.main_func = relocate(buf, header.main_func);
    header.base_addr = new_base;
    header.write(buf);
    debug!("relocated {len} byte bytecode image from {old_base:#010x} to {new_base:#010x}");
    Ok(())
}

/// Contents of the unique string block at `offset`, if that is one.
fn image_unique_string(buf: &[u8], offset: usize) -> Option<&[u8]> {
    let header = MbHeader::from_word(get_u32(buf.get(offset..offset + 4)?));
    if header.tag() != MTag::String {
        return None;
    }
    let header = StringHeader::from(header);
    if !header.is_unique() {
        return None;
    }
    buf.get(offset + 4..offset + 4 + header.len() as usize)
}

impl<'a> JSContext<'a> {
    /// Serializes the compiled unit `main` (a function bytecode value) and
    /// everything it references into an image with base address 0.
    pub fn prepare_bytecode(&mut self, main: JSValue) -> Result<Vec<u8>, BytecodeError> {
        if !self.prepare_compilation {
            return Err(BytecodeError::PrepareDisabled);
        }
        let main_addr = value_to_ptr(main)
            .filter(|&addr| self.block_tag(addr) == Some(MTag::FunctionBytecode))
            .ok_or(BytecodeError::NotBytecode)?;

        // Breadth-first layout of every reachable block.
        let mut order = Vec::new();
        let mut offsets = HashMap::new();
        let mut queue = VecDeque::from([main_addr]);
        let mut next = JS_BYTECODE_HEADER_SIZE as u32;
        while let Some(addr) = queue.pop_front() {
            if offsets.contains_key(&addr) {
                continue;
            }
            let header = self.header_at(addr).map_err(|_| BytecodeError::NotBytecode)?;
            offsets.insert(addr, next);
            order.push(addr);
            next = next
                .checked_add(mblock_words(header) * JSW)
                .ok_or(BytecodeError::TooLarge)?;
            for idx in value_slots(header)? {
                let val = self.mem.field(addr, idx).map_err(|_| BytecodeError::NotBytecode)?;
                if let Some(child) = value_to_ptr(val) {
                    queue.push_back(child);
                }
            }
        }

        let mut atoms: Vec<(Vec<u8>, u32)> = Vec::new();
        let mut buf = vec![0u8; next as usize];
        for &addr in &order {
            let header = self.header_at(addr).map_err(|_| BytecodeError::NotBytecode)?;
            let size = (mblock_words(header) * JSW) as usize;
            let offset = offsets[&addr] as usize;
            let src = self.mem.bytes(addr, size).map_err(|_| BytecodeError::NotBytecode)?;
            let dst = &mut buf[offset..offset + size];
            dst.copy_from_slice(src);
            put_u32(dst, header.with_gc_mark(false).word());
            for idx in value_slots(header)? {
                let at = (idx * JSW) as usize;
                let val = JSValue::from_bits(get_u32(&dst[at..]));
                if let Some(new_addr) = value_to_ptr(val).and_then(|a| offsets.get(&a)) {
                    put_u32(&mut dst[at..], value_from_ptr(*new_addr).bits());
                }
            }
            if header.tag() == MTag::String && StringHeader::from(header).is_unique() {
                let len = StringHeader::from(header).len() as usize;
                atoms.push((dst[4..4 + len].to_vec(), offset as u32));
            }
        }

        // Sorted unique string table, appended after the blocks.
        atoms.sort();
        let unique_strings = if atoms.is_empty() {
            JS_NULL
        } else {
            let table = buf.len();
            let header = ValueArrayHeader::new(atoms.len() as u32).header();
            buf.resize(table + (mblock_words(header) * JSW) as usize, 0);
            put_u32(&mut buf[table..], header.word());
            for (i, (_, offset)) in atoms.iter().enumerate() {
                put_u32(&mut buf[table + 4 * (i + 1)..], value_from_ptr(*offset).bits());
            }
            value_from_ptr(table as u32)
        };

        BytecodeHeader {
            magic: JS_BYTECODE_MAGIC,
            version: JS_BYTECODE_VERSION,
            base_addr: 0,
            unique_strings,
            main_func: value_from_ptr(offsets[&main_addr]),
        }
        .write(&mut buf);
        debug!(
            "prepared bytecode image: {} blocks, {} atoms, {} bytes",
            order.len(),
            atoms.len(),
            buf.len()
        );
        Ok(buf)
    }

    /// Relocates `buf` to the address the next [`JSContext::load_bytecode`]
    /// call will map it at, sharing atoms with what is already loaded.
    pub fn relocate_bytecode(&self, buf: &mut [u8]) -> Result<(), BytecodeError> {
        relocate_bytecode(buf, self.mem.next_image_base(), Some(self as &dyn BytecodeAtomResolver))
    }

    /// Maps a relocated image and returns its main function bytecode, to be
    /// run with [`JSContext::run`]. The buffer is used in place.
    pub fn load_bytecode(&mut self, buf: &'a [u8]) -> JsResult<JSValue> {
        let header = match self.check_image(buf) {
            Ok(header) => header,
            Err(err) => return Err(self.throw_type_error(err)),
        };
        let base = header.base_addr;
        if let Err(err) = self.mem.map_rom(base, buf) {
            return Err(self.throw_internal_error(err));
        }
        if let Some(table) = value_to_ptr(header.unique_strings) {
            let size = ValueArrayHeader::from(self.header_at(table)?).size();
            let end = base + buf.len() as u32;
            let mut atoms = Vec::with_capacity(size as usize);
            for idx in 1..=size {
                let atom = self.mem.field(table, idx)?;
                // Entries redirected to atoms of other images stay there.
                if value_to_ptr(atom).is_some_and(|a| a >= base && a < end) {
                    atoms.push(atom);
                }
            }
            self.atoms.add_rom_table(atoms);
        }
        debug!("loaded {} byte bytecode image at {base:#010x}", buf.len());
        Ok(header.main_func)
    }

    fn check_image(&self, buf: &[u8]) -> Result<BytecodeHeader, BytecodeError> {
        let header = BytecodeHeader::parse(buf)?;
        let base = header.base_addr;
        if base < JS_IMAGE_REGION_BASE || base % JSW != 0 {
            return Err(BytecodeError::InvalidBase(base));
        }
        let main = value_to_ptr(header.main_func).ok_or(BytecodeError::NotBytecode)?;
        let offset = main.wrapping_sub(base) as usize;
        let (block, _) = image_block(buf, offset)?;
        if offset < JS_BYTECODE_HEADER_SIZE || block.tag() != MTag::FunctionBytecode {
            return Err(BytecodeError::NotBytecode);
        }
        if let Some(table) = value_to_ptr(header.unique_strings) {
            let offset = table.wrapping_sub(base) as usize;
            let (block, _) = image_block(buf, offset)?;
            if offset < JS_BYTECODE_HEADER_SIZE || block.tag() != MTag::ValueArray {
                return Err(BytecodeError::NotBytecode);
            }
        }
        Ok(header)
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::capi_defs::JS_EVAL_RETVAL;
    use crate::context::{tests::new_context, ContextConfig};
    use crate::exception::Exception;
    use crate::function_bytecode::FB_BYTE_CODE;
    use crate::jsvalue::new_short_int;
    use crate::stdlib::StdLibraryDef;

    fn prepare(src: &str) -> Vec<u8> {
        let mut ctx = JSContext::new(ContextConfig {
            stdlib: &StdLibraryDef::EMPTY,
            memory_size: 64 * 1024,
            prepare_compilation: true,
        })
        .unwrap();
        let fb = ctx.parse(src.as_bytes(), "image.js", JS_EVAL_RETVAL).unwrap();
        ctx.prepare_bytecode(fb).unwrap()
    }

    /// Runtime context that may borrow images declared before it.
    fn runtime<'a>() -> JSContext<'a> {
        JSContext::new_runtime(&StdLibraryDef::EMPTY, 64 * 1024).unwrap()
    }

    #[test]
    fn prepare_needs_a_compilation_context() {
        let mut ctx = new_context();
        let fb = ctx.parse(b"1", "a.js", 0).unwrap();
        assert_eq!(ctx.prepare_bytecode(fb), Err(BytecodeError::PrepareDisabled));
    }

    #[test]
    fn header_checks() {
        let buf = prepare("1 + 1");
        assert!(is_bytecode(&buf));
        assert_eq!(get_u16(&buf), JS_BYTECODE_MAGIC);
        assert!(!is_bytecode(&buf[..JS_BYTECODE_HEADER_SIZE - 1]));
        let mut bad = buf.clone();
        bad[0] ^= 1;
        assert!(!is_bytecode(&bad));
        let mut bad = buf.clone();
        bad[2] = 9;
        assert_eq!(BytecodeHeader::parse(&bad), Err(BytecodeError::InvalidVersion(9)));
    }

    #[test]
    fn relocation_round_trips() {
        let orig = prepare("var s = 'hello'; function f(x) { return x + 1.5; } f(s.length)");
        let mut buf = orig.clone();
        relocate_bytecode(&mut buf, 0x4000_1000, None).unwrap();
        assert_ne!(buf, orig);
        assert_eq!(BytecodeHeader::parse(&buf).unwrap().base_addr, 0x4000_1000);
        relocate_bytecode(&mut buf, 0, None).unwrap();
        assert_eq!(buf, orig);
    }

    #[test]
    fn truncated_images_are_rejected() {
        let buf = prepare("'abc' + 'def'");
        let mut short = buf[..buf.len() - 4].to_vec();
        assert!(matches!(
            relocate_bytecode(&mut short, 0x4000_0000, None),
            Err(BytecodeError::Truncated(_))
        ));
    }

    #[test]
    fn loaded_images_run() {
        let mut buf = prepare("40 + 2");
        let mut ctx = runtime();
        ctx.relocate_bytecode(&mut buf).unwrap();
        let main = ctx.load_bytecode(&buf).unwrap();
        assert_eq!(ctx.run(main).unwrap(), new_short_int(42));
    }

    #[test]
    fn mistagged_blocks_are_rejected() {
        let mut buf = prepare("var s = 'abc'; s.length");
        let ctx = runtime();
        ctx.relocate_bytecode(&mut buf).unwrap();
        let mut header = BytecodeHeader::parse(&buf).unwrap();
        let main = value_to_ptr(header.main_func).unwrap();
        let main_offset = (main - header.base_addr) as usize;

        // Unique string table pointing at the main function.
        let mut bad_table = buf.clone();
        header.unique_strings = header.main_func;
        header.write(&mut bad_table);
        let mut ctx = runtime();
        assert!(ctx.load_bytecode(&bad_table).is_err());

        // Byte code slot pointing at the function block itself.
        let mut bad_code = buf.clone();
        let slot = main_offset + (FB_BYTE_CODE * JSW) as usize;
        put_u32(&mut bad_code[slot..], header.main_func.bits());
        let mut ctx = runtime();
        let main = ctx.load_bytecode(&bad_code).unwrap();
        assert_eq!(ctx.run(main), Err(Exception::InvalidBytecode));
    }

    #[test]
    fn unrelocated_images_do_not_load() {
        let buf = prepare("1");
        let mut ctx = runtime();
        assert!(ctx.load_bytecode(&buf).is_err());
    }

    #[test]
    fn images_share_atoms() {
        let mut first = prepare("var counter = 1; counter");
        let mut second = prepare("counter + 1");
        let mut ctx = runtime();
        ctx.relocate_bytecode(&mut first).unwrap();
        let base = BytecodeHeader::parse(&first).unwrap().base_addr;
        let end = base + first.len() as u32;
        let main = ctx.load_bytecode(&first).unwrap();
        assert_eq!(ctx.run(main).unwrap(), new_short_int(1));

        ctx.relocate_bytecode(&mut second).unwrap();
        let header = BytecodeHeader::parse(&second).unwrap();
        let table = (value_to_ptr(header.unique_strings).unwrap() - header.base_addr) as usize;
        let size = ValueArrayHeader::from(MbHeader::from_word(get_u32(&second[table..]))).size() as usize;
        let shared = (1..=size)
            .map(|i| value_to_ptr(JSValue::from_bits(get_u32(&second[table + 4 * i..]))).unwrap())
            .filter(|&addr| addr >= base && addr < end)
            .count();
        assert!(shared > 0);
        let main = ctx.load_bytecode(&second).unwrap();
        assert_eq!(ctx.run(main).unwrap(), new_short_int(2));
    }
}
