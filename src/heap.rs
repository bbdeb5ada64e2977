//! Arena layout and block allocation.
//!
//! ```text
//! heap_base        heap_free            sp          stack_top
//!     | blocks ... |   free space   ... | stack ... |
//! ```
//!
//! Blocks are carved from a first-fit free list (rebuilt by each sweep) and
//! otherwise bumped from `heap_free`. The value stack grows down from the
//! end of the arena; both sides keep `JS_STACK_SLACK` words apart.

use crate::containers::{
    bytes_block_words, value_array_block_words, ByteArrayHeader, StringHeader, ValueArrayHeader,
    VARREF_BLOCK_WORDS,
};
use crate::function_bytecode::FB_BLOCK_WORDS;
use crate::jsvalue::{JSValue, JSW};
use crate::memblock::{free_block_header, MbHeader, MTag, FLOAT64_BLOCK_WORDS};
use crate::memory::{Memory, MemoryError};
use crate::object::ObjectHeader;
use thiserror::Error;

/// Words kept free between the heap and the stack.
pub const JS_STACK_SLACK: u32 = 16;
/// Bytes that must remain free after an allocation before the collector is
/// asked to run.
pub const JS_MIN_FREE_SIZE: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("stack overflow")]
    StackOverflow,
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Size in words of the block described by `header`, header included.
pub fn mblock_words(header: MbHeader) -> u32 {
    match header.tag() {
        MTag::Free => header.payload().max(1),
        MTag::Object => ObjectHeader::from(header).block_words(),
        MTag::Float64 => FLOAT64_BLOCK_WORDS,
        MTag::String => bytes_block_words(StringHeader::from(header).len()),
        MTag::FunctionBytecode => FB_BLOCK_WORDS,
        MTag::ValueArray => value_array_block_words(ValueArrayHeader::from(header).size()),
        MTag::ByteArray => bytes_block_words(ByteArrayHeader::from(header).size()),
        MTag::VarRef => VARREF_BLOCK_WORDS,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    pub addr: u32,
    pub words: u32,
}

#[derive(Debug)]
pub struct Heap {
    heap_base: u32,
    heap_free: u32,
    stack_top: u32,
    sp: u32,
    free_list: Vec<FreeBlock>,
}

impl Heap {
    pub fn new(mem: &Memory<'_>) -> Self {
        Self {
            heap_base: mem.ram_base(),
            heap_free: mem.ram_base(),
            stack_top: mem.ram_end(),
            sp: mem.ram_end(),
            free_list: Vec::new(),
        }
    }

    pub fn heap_base(&self) -> u32 {
        self.heap_base
    }

    pub fn heap_free(&self) -> u32 {
        self.heap_free
    }

    pub fn stack_top(&self) -> u32 {
        self.stack_top
    }

    pub fn sp(&self) -> u32 {
        self.sp
    }

    pub fn free_list(&self) -> &[FreeBlock] {
        &self.free_list
    }

    /// Bytes available to the bump allocator, slack excluded.
    pub fn bump_space(&self) -> u32 {
        self.sp
            .saturating_sub(self.heap_free)
            .saturating_sub(JS_STACK_SLACK * JSW)
    }

    pub fn free_bytes(&self) -> u32 {
        self.bump_space() + self.free_list.iter().map(|b| b.words * JSW).sum::<u32>()
    }

    /// True when an allocation of `words` would eat into the reserve.
    pub fn under_pressure(&self, words: u32) -> bool {
        self.bump_space() < words * JSW + JS_MIN_FREE_SIZE
    }

    /// True if the free list can serve `words` without bumping.
    pub fn has_free_fit(&self, words: u32) -> bool {
        self.free_list.iter().any(|b| b.words >= words)
    }

    /// Bytes between the arena base and the bump pointer.
    pub fn used_bytes(&self) -> u32 {
        self.heap_free - self.heap_base
    }

    /// Allocates a block, writes `header` and zeroes the payload.
    pub fn alloc(&mut self, mem: &mut Memory<'_>, header: MbHeader, words: u32) -> Result<u32, HeapError> {
        debug_assert!(words >= 1);
        let addr = match self.take_free_block(mem, words)? {
            Some(addr) => addr,
            None => {
                if self.bump_space() < words * JSW {
                    return Err(HeapError::OutOfMemory);
                }
                let addr = self.heap_free;
                self.heap_free += words * JSW;
                addr
            }
        };
        mem.bytes_mut(addr, (words * JSW) as usize)?.fill(0);
        mem.write_u32(addr, header.word())?;
        Ok(addr)
    }

    fn take_free_block(&mut self, mem: &mut Memory<'_>, words: u32) -> Result<Option<u32>, HeapError> {
        let Some(pos) = self.free_list.iter().position(|b| b.words >= words) else {
            return Ok(None);
        };
        let block = self.free_list[pos];
        let rest = block.words - words;
        if rest == 0 {
            self.free_list.swap_remove(pos);
        } else {
            let rest_addr = block.addr + words * JSW;
            mem.write_u32(rest_addr, free_block_header(rest).word())?;
            self.free_list[pos] = FreeBlock {
                addr: rest_addr,
                words: rest,
            };
        }
        Ok(Some(block.addr))
    }

    /// Installs the free list computed by a sweep and trims the bump
    /// pointer back over a trailing free run.
    pub fn reset_after_sweep(&mut self, mut free_list: Vec<FreeBlock>) {
        if let Some(last) = free_list.last().copied() {
            if last.addr + last.words * JSW == self.heap_free {
                self.heap_free = last.addr;
                free_list.pop();
            }
        }
        self.free_list = free_list;
    }

    pub fn stack_depth(&self) -> u32 {
        (self.stack_top - self.sp) / JSW
    }

    /// True if `words` more stack words fit without touching the slack.
    pub fn stack_has_room(&self, words: u32) -> bool {
        let limit = self.heap_free as u64 + (JS_STACK_SLACK * JSW) as u64;
        (self.sp as u64).saturating_sub(words as u64 * JSW as u64) >= limit
    }

    pub fn push(&mut self, mem: &mut Memory<'_>, val: JSValue) -> Result<(), HeapError> {
        if !self.stack_has_room(1) {
            return Err(HeapError::StackOverflow);
        }
        self.sp -= JSW;
        mem.write_value(self.sp, val)?;
        Ok(())
    }

    pub fn pop(&mut self, mem: &Memory<'_>) -> Result<JSValue, HeapError> {
        debug_assert!(self.sp < self.stack_top);
        let val = mem.read_value(self.sp)?;
        self.sp += JSW;
        Ok(val)
    }

    /// Value `depth` slots below the top (0 is the top).
    pub fn peek(&self, mem: &Memory<'_>, depth: u32) -> Result<JSValue, HeapError> {
        Ok(mem.read_value(self.sp + depth * JSW)?)
    }

    pub fn poke(&self, mem: &mut Memory<'_>, depth: u32, val: JSValue) -> Result<(), HeapError> {
        Ok(mem.write_value(self.sp + depth * JSW, val)?)
    }

    /// Reserves `words` zeroed stack slots and returns the new `sp`.
    pub fn reserve(&mut self, mem: &mut Memory<'_>, words: u32) -> Result<u32, HeapError> {
        if !self.stack_has_room(words) {
            return Err(HeapError::StackOverflow);
        }
        self.sp -= words * JSW;
        mem.bytes_mut(self.sp, (words * JSW) as usize)?.fill(0);
        Ok(self.sp)
    }

    /// Empties the value stack.
    pub fn drop_stack(&mut self) {
        self.sp = self.stack_top;
    }

    /// Drops everything above `sp`. Only ever moves the stack pointer up.
    pub fn set_sp(&mut self, sp: u32) {
        debug_assert!(sp >= self.sp && sp <= self.stack_top);
        self.sp = sp;
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::jsvalue::new_short_int;
    use crate::memory::JS_RAM_BASE;

    #[test]
    fn bump_then_free_list() {
        let mut mem = Memory::new(1024);
        let mut heap = Heap::new(&mem);
        let a = heap
            .alloc(&mut mem, ValueArrayHeader::new(3).header(), 4)
            .unwrap();
        assert_eq!(a, JS_RAM_BASE);
        assert_eq!(heap.heap_free(), JS_RAM_BASE + 16);
        let b = heap.alloc(&mut mem, MbHeader::new(MTag::Float64, false), 3).unwrap();
        assert_eq!(b, JS_RAM_BASE + 16);

        mem.write_u32(a, free_block_header(4).word()).unwrap();
        heap.reset_after_sweep(vec![FreeBlock { addr: a, words: 4 }]);
        let c = heap.alloc(&mut mem, MbHeader::new(MTag::VarRef, false), 2).unwrap();
        assert_eq!(c, a);
        assert_eq!(heap.free_list(), &[FreeBlock { addr: a + 8, words: 2 }]);
        let header = MbHeader::from_word(mem.read_u32(a + 8).unwrap());
        assert_eq!(header.tag(), MTag::Free);
        assert_eq!(mblock_words(header), 2);
    }

    #[test]
    fn trailing_free_run_returns_to_bump() {
        let mut mem = Memory::new(1024);
        let mut heap = Heap::new(&mem);
        let a = heap.alloc(&mut mem, MbHeader::new(MTag::VarRef, false), 2).unwrap();
        heap.reset_after_sweep(vec![FreeBlock { addr: a, words: 2 }]);
        assert_eq!(heap.heap_free(), JS_RAM_BASE);
        assert!(heap.free_list().is_empty());
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut mem = Memory::new(128);
        let mut heap = Heap::new(&mem);
        assert_eq!(
            heap.alloc(&mut mem, ValueArrayHeader::new(31).header(), 32),
            Err(HeapError::OutOfMemory)
        );
    }

    #[test]
    fn stack_push_pop() {
        let mut mem = Memory::new(256);
        let mut heap = Heap::new(&mem);
        heap.push(&mut mem, new_short_int(1)).unwrap();
        heap.push(&mut mem, new_short_int(2)).unwrap();
        assert_eq!(heap.stack_depth(), 2);
        assert_eq!(heap.peek(&mem, 1).unwrap(), new_short_int(1));
        assert_eq!(heap.pop(&mem).unwrap(), new_short_int(2));
        assert_eq!(heap.pop(&mem).unwrap(), new_short_int(1));
        assert_eq!(heap.sp(), heap.stack_top());
    }

    #[test]
    fn stack_meets_slack() {
        let mut mem = Memory::new(128);
        let mut heap = Heap::new(&mem);
        let room = 128 / JSW - JS_STACK_SLACK;
        assert!(heap.stack_has_room(room));
        assert!(!heap.stack_has_room(room + 1));
        heap.reserve(&mut mem, room).unwrap();
        assert_eq!(heap.push(&mut mem, new_short_int(0)), Err(HeapError::StackOverflow));
    }
}
