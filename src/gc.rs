//! Precise, non-moving mark and sweep collector.
//!
//! Only RAM blocks are marked; ROM regions (stdlib table, loaded images) are
//! immutable and everything they reference is either ROM as well or kept
//! alive by the roots. Unique strings are weak: atoms nobody references are
//! dropped from the atom table before the sweep frees them.

use crate::containers::{ValueArrayHeader, VarRefHeader};
use crate::context::JSContext;
use crate::enums::JS_CLASS_USER;
use crate::function_bytecode::FB_BLOCK_WORDS;
use crate::heap::{mblock_words, FreeBlock};
use crate::jsvalue::{value_to_ptr, JSValue, JSW};
use crate::memblock::{free_block_header, MbHeader, MTag};
use crate::memory::Memory;
use crate::object::{ObjectHeader, USER_OPAQUE_SLOT};
use log::{trace, warn};

struct GcMarker<'m, 'a> {
    mem: &'m mut Memory<'a>,
    worklist: Vec<u32>,
}

impl<'m, 'a> GcMarker<'m, 'a> {
    fn new(mem: &'m mut Memory<'a>) -> Self {
        Self {
            mem,
            worklist: Vec::new(),
        }
    }

    fn mark_root(&mut self, val: JSValue) {
        let Some(addr) = value_to_ptr(val) else {
            return;
        };
        self.mark_addr(addr);
    }

    fn mark_addr(&mut self, addr: u32) {
        if !self.mem.is_ram(addr) {
            return;
        }
        let Ok(word) = self.mem.read_u32(addr) else {
            return;
        };
        let header = MbHeader::from_word(word);
        if header.gc_mark() || header.tag() == MTag::Free {
            return;
        }
        if self.mem.write_u32(addr, header.with_gc_mark(true).word()).is_ok() {
            self.worklist.push(addr);
        }
    }

    /// Words of the block at `addr` that hold values the collector follows.
    fn child_range(&self, addr: u32) -> core::ops::Range<u32> {
        let Ok(word) = self.mem.read_u32(addr) else {
            return 0..0;
        };
        let header = MbHeader::from_word(word);
        match header.tag() {
            MTag::Object => 1..ObjectHeader::from(header).block_words(),
            MTag::FunctionBytecode => 1..FB_BLOCK_WORDS,
            MTag::ValueArray => 1..ValueArrayHeader::from(header).size() + 1,
            // Attached refs hold a stack address, which reads as an int.
            MTag::VarRef if VarRefHeader::from(header).is_detached() => 1..2,
            _ => 0..0,
        }
    }

    fn drain(&mut self) {
        while let Some(addr) = self.worklist.pop() {
            for idx in self.child_range(addr) {
                if let Ok(val) = self.mem.field(addr, idx) {
                    self.mark_root(val);
                }
            }
        }
    }
}

fn is_marked(mem: &Memory<'_>, val: JSValue) -> bool {
    match value_to_ptr(val) {
        Some(addr) if mem.is_ram(addr) => mem
            .read_u32(addr)
            .map(|w| MbHeader::from_word(w).gc_mark())
            .unwrap_or(false),
        _ => true,
    }
}

/// A swept user object whose finalizer still has to run.
struct DeadUserObject {
    class_id: u8,
    opaque_slot: i32,
}

#[derive(Debug, Default, Clone, Copy)]
struct SweepStats {
    live_bytes: u32,
    freed_bytes: u32,
}

impl<'a> JSContext<'a> {
    /// Runs a full collection.
    pub fn gc(&mut self) {
        if self.in_gc {
            return;
        }
        self.in_gc = true;
        self.mark_roots();
        let sweep_atoms = {
            let mem = &self.mem;
            self.atoms.sweep_unique_strings(|v| is_marked(mem, v))
        };
        let (dead, stats) = self.sweep();
        trace!(
            "gc: {} bytes live, {} bytes freed, {} atoms, {} finalizers",
            stats.live_bytes,
            stats.freed_bytes,
            sweep_atoms,
            dead.len()
        );
        self.run_finalizers(dead);
        self.heap_free_at_gc = self.heap.heap_free();
        self.in_gc = false;
    }

    fn mark_roots(&mut self) {
        let stack: Vec<JSValue> = (self.heap.sp()..self.heap.stack_top())
            .step_by(JSW as usize)
            .filter_map(|addr| self.mem.read_value(addr).ok())
            .collect();
        let frame_refs: Vec<u32> = self
            .frames
            .iter()
            .flat_map(|f| f.open_var_refs.iter().copied())
            .collect();
        let frame_funcs: Vec<JSValue> = self.frames.iter().flat_map(|f| [f.func, f.fb]).collect();

        let mut marker = GcMarker::new(&mut self.mem);
        for val in self
            .roots
            .values()
            .chain(self.gc_refs.roots())
            .chain(self.temp_roots.iter().copied())
            .chain(stack)
            .chain(frame_funcs)
            .chain([self.current_exception])
        {
            marker.mark_root(val);
            marker.drain();
        }
        for addr in frame_refs {
            marker.mark_addr(addr);
            marker.drain();
        }
    }

    fn sweep(&mut self) -> (Vec<DeadUserObject>, SweepStats) {
        let mut dead = Vec::new();
        let mut stats = SweepStats::default();
        let mut free_list: Vec<FreeBlock> = Vec::new();
        let mut addr = self.heap.heap_base();
        let end = self.heap.heap_free();
        while addr < end {
            let Ok(word) = self.mem.read_u32(addr) else {
                break;
            };
            let header = MbHeader::from_word(word);
            let words = mblock_words(header);
            let size = words * JSW;
            if header.tag() != MTag::Free && header.gc_mark() {
                let _ = self.mem.write_u32(addr, header.with_gc_mark(false).word());
                stats.live_bytes += size;
                addr += size;
                continue;
            }
            if header.tag() == MTag::Object {
                let obj = ObjectHeader::from(header);
                if obj.class_id() >= JS_CLASS_USER {
                    let slot = self
                        .mem
                        .field(addr, USER_OPAQUE_SLOT)
                        .map(|v| if v.is_int() { v.get_int() } else { -1 })
                        .unwrap_or(-1);
                    dead.push(DeadUserObject {
                        class_id: obj.class_id(),
                        opaque_slot: slot,
                    });
                }
            }
            if header.tag() != MTag::Free {
                stats.freed_bytes += size;
            }
            match free_list.last_mut() {
                Some(last) if last.addr + last.words * JSW == addr => last.words += words,
                _ => free_list.push(FreeBlock { addr, words }),
            }
            addr += size;
        }
        for block in &free_list {
            let _ = self.mem.write_u32(block.addr, free_block_header(block.words).word());
        }
        self.heap.reset_after_sweep(free_list);
        (dead, stats)
    }

    fn run_finalizers(&mut self, dead: Vec<DeadUserObject>) {
        for obj in dead {
            let opaque = if obj.opaque_slot >= 0 {
                self.free_opaque_slot(obj.opaque_slot as u32)
            } else {
                core::ptr::null_mut()
            };
            match self.stdlib.finalizer(obj.class_id) {
                Some(finalizer) => finalizer(self, opaque),
                None if !opaque.is_null() => {
                    warn!("no finalizer for class {}, opaque data leaked", obj.class_id)
                }
                None => {}
            }
        }
    }

    /// True if `val` points at a RAM block that survived the last mark.
    #[cfg(test)]
    pub(crate) fn is_live_block(&self, val: JSValue) -> bool {
        let Some(addr) = value_to_ptr(val) else {
            return false;
        };
        let mut at = self.heap.heap_base();
        while at < self.heap.heap_free() {
            let Ok(header) = self.header_at(at) else {
                return false;
            };
            if at == addr {
                return header.tag() != MTag::Free;
            }
            at += mblock_words(header) * JSW;
        }
        false
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::capi_defs::JSCFinalizer;
    use crate::context::tests::new_context;
    use crate::context::JSContext;
    use crate::stdlib::StdLibraryDef;
    use core::ffi::c_void;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn unreachable_blocks_are_freed() {
        let mut ctx = new_context();
        ctx.temp_roots.clear();
        ctx.gc();
        let before = ctx.heap.free_bytes();
        let s = ctx.new_string(b"temporary string").unwrap();
        assert!(ctx.heap.free_bytes() < before);
        ctx.temp_roots.clear();
        ctx.gc();
        assert!(!ctx.is_live_block(s));
        assert_eq!(ctx.heap.free_bytes(), before);
    }

    #[test]
    fn gc_refs_keep_values_alive() {
        let mut ctx = new_context();
        let r = ctx.gc_refs.add_gc_ref();
        let s = ctx.new_string(b"rooted string").unwrap();
        *ctx.gc_refs.list_slot_mut(r).unwrap() = s;
        ctx.temp_roots.clear();
        ctx.gc();
        assert!(ctx.is_live_block(s));
        assert_eq!(ctx.string_to_rust(s).unwrap(), "rooted string");
        ctx.gc_refs.delete_gc_ref(r).unwrap();
        ctx.gc();
        assert!(!ctx.is_live_block(s));
    }

    #[test]
    fn unreferenced_atoms_are_dropped() {
        let mut ctx = new_context();
        let atom = ctx.intern(b"ephemeral").unwrap();
        ctx.temp_roots.clear();
        ctx.gc();
        assert!(!ctx.is_live_block(atom));
        assert!(ctx.atoms.find(&ctx.mem, b"ephemeral").unwrap().is_none());
        assert!(ctx.atoms.find(&ctx.mem, b"prototype").unwrap().is_some());
    }

    static FINALIZED: AtomicUsize = AtomicUsize::new(0);

    fn count_finalizer(_ctx: &mut JSContext<'_>, opaque: *mut c_void) {
        assert_eq!(opaque as usize, 0x1234);
        FINALIZED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn finalizers_run_for_dead_user_objects() {
        static TABLE: [Option<JSCFinalizer>; 1] = [Some(count_finalizer)];
        static DEF: StdLibraryDef<'static> = StdLibraryDef {
            c_finalizer_table: &TABLE,
            class_count: JS_CLASS_USER as u32 + 1,
            ..StdLibraryDef::EMPTY
        };
        let mut ctx = JSContext::new_runtime(&DEF, 64 * 1024).unwrap();
        let obj = ctx.new_object_user(JS_CLASS_USER, 0x1234 as *mut c_void).unwrap();
        ctx.temp_roots.clear();
        let before = FINALIZED.load(Ordering::SeqCst);
        ctx.gc();
        assert!(!ctx.is_live_block(obj));
        assert_eq!(FINALIZED.load(Ordering::SeqCst), before + 1);
    }
}
