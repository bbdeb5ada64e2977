use crate::atom::AtomTables;
use crate::capi_defs::{CallFlags, JSInterruptHandler, JSWriteFunc};
use crate::containers::ValueArrayHeader;
use crate::enums::{JSObjectClass, JS_CLASS_USER};
use crate::exception::{Exception, JsResult};
use crate::gc_ref::GcRefState;
use crate::heap::{Heap, HeapError};
use crate::interpreter::{Frame, JS_INTERRUPT_COUNTER_INIT};
use crate::jsvalue::{value_from_ptr, value_to_ptr, JSValue, JSW, JS_NULL, JS_UNDEFINED};
use crate::memblock::{MbHeader, MTag};
use crate::memory::{Memory, MemoryError, JS_RAM_SIZE_MAX, JS_STDLIB_BASE};
use crate::object::ObjectHeader;
use crate::stdlib::StdLibraryDef;
use core::ffi::c_void;
use log::debug;
use thiserror::Error;

/// Smallest arena a context accepts.
pub const JS_MIN_MEMORY_SIZE: usize = 4096;

const DEFAULT_RANDOM_SEED: u64 = 0x2545_f491_4f6c_dd1d;

/// Context creation parameters.
pub struct ContextConfig<'a> {
    pub stdlib: &'a StdLibraryDef<'a>,
    pub memory_size: usize,
    /// Enables `js_prepare_bytecode` on this context.
    pub prepare_compilation: bool,
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("memory size {actual} is below the minimum of {min} bytes")]
    MemoryTooSmall { min: usize, actual: usize },
    #[error("memory size {0} does not fit the RAM region")]
    MemoryTooLarge(usize),
    #[error("class count {0} is out of range")]
    ClassCount(u32),
    #[error("stdlib table alignment {0} is not supported")]
    StdlibAlign(u32),
    #[error("malformed stdlib table at word {0}")]
    MalformedStdlib(u32),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("out of memory while initializing the context")]
    OutOfMemory,
}

/// Atoms the engine looks up by identity.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WellKnownAtoms {
    pub length: JSValue,
    pub prototype: JSValue,
    pub constructor: JSValue,
    pub name: JSValue,
    pub message: JSValue,
    pub stack: JSValue,
    pub to_string: JSValue,
    pub value_of: JSValue,
}

impl WellKnownAtoms {
    const NAMES: [&'static str; 8] = [
        "length",
        "prototype",
        "constructor",
        "name",
        "message",
        "stack",
        "toString",
        "valueOf",
    ];

    fn from_values(v: [JSValue; 8]) -> Self {
        Self {
            length: v[0],
            prototype: v[1],
            constructor: v[2],
            name: v[3],
            message: v[4],
            stack: v[5],
            to_string: v[6],
            value_of: v[7],
        }
    }

    fn all(&self) -> [JSValue; 8] {
        [
            self.length,
            self.prototype,
            self.constructor,
            self.name,
            self.message,
            self.stack,
            self.to_string,
            self.value_of,
        ]
    }
}

/// Values that live as long as the context.
#[derive(Debug)]
pub(crate) struct ClassRoots {
    pub global: JSValue,
    pub empty_string: JSValue,
    /// Preallocated error thrown on allocation failure.
    pub oom_error: JSValue,
    /// Prototype per class id.
    pub protos: Vec<JSValue>,
    pub atoms: WellKnownAtoms,
}

impl ClassRoots {
    fn new(class_count: usize) -> Self {
        Self {
            global: JS_UNDEFINED,
            empty_string: JS_UNDEFINED,
            oom_error: JS_UNDEFINED,
            protos: vec![JS_NULL; class_count],
            atoms: WellKnownAtoms::from_values([JS_UNDEFINED; 8]),
        }
    }

    pub fn values(&self) -> impl Iterator<Item = JSValue> + '_ {
        [self.global, self.empty_string, self.oom_error]
            .into_iter()
            .chain(self.protos.iter().copied())
            .chain(self.atoms.all())
    }
}

/// One isolated engine instance.
///
/// Invariants:
/// - Every heap pointer held by the context refers to the RAM arena or to a
///   ROM region mapped in `mem`; ROM regions are borrowed for `'a`.
/// - `temp_roots` holds the blocks allocated and the values returned by
///   calls since the start of the current instruction (or API call when no
///   script is running). The collector treats them as roots.
pub struct JSContext<'a> {
    pub(crate) mem: Memory<'a>,
    pub(crate) heap: Heap,
    pub(crate) atoms: AtomTables,
    pub(crate) gc_refs: GcRefState,
    pub(crate) roots: ClassRoots,
    pub(crate) stdlib: &'a StdLibraryDef<'a>,
    pub(crate) class_count: u32,
    pub(crate) frames: Vec<Frame>,
    pub(crate) temp_roots: Vec<JSValue>,
    pub(crate) current_exception: JSValue,
    /// Set while an interruption unwinds; catch handlers are skipped.
    pub(crate) uncatchable: bool,
    pub(crate) in_gc: bool,
    /// Bump pointer right after the last collection.
    pub(crate) heap_free_at_gc: u32,
    pub(crate) call_depth: u32,
    /// Call staged by a native function returning `JS_EXCEPTION_CALL`.
    pub(crate) staged_call: Option<(u16, CallFlags)>,
    pub(crate) interrupt_handler: Option<JSInterruptHandler>,
    pub(crate) interrupt_counter: u32,
    pub(crate) opaque: *mut c_void,
    pub(crate) write_func: Option<JSWriteFunc>,
    opaque_slots: Vec<*mut c_void>,
    free_opaque_slots: Vec<u32>,
    random_state: u64,
    pub(crate) prepare_compilation: bool,
}

impl<'a> JSContext<'a> {
    pub fn new(config: ContextConfig<'a>) -> Result<Self, ContextError> {
        let mem_size = config.memory_size & !(JSW as usize - 1);
        if mem_size < JS_MIN_MEMORY_SIZE {
            return Err(ContextError::MemoryTooSmall {
                min: JS_MIN_MEMORY_SIZE,
                actual: mem_size,
            });
        }
        if mem_size > JS_RAM_SIZE_MAX {
            return Err(ContextError::MemoryTooLarge(mem_size));
        }
        let stdlib = config.stdlib;
        if stdlib.class_count < JS_CLASS_USER as u32 || stdlib.class_count > 256 {
            return Err(ContextError::ClassCount(stdlib.class_count));
        }
        if stdlib.stdlib_table_align != 0 && stdlib.stdlib_table_align % JSW != 0 {
            return Err(ContextError::StdlibAlign(stdlib.stdlib_table_align));
        }

        let mut mem = Memory::new(mem_size);
        if !stdlib.stdlib_table.is_empty() {
            mem.map_rom(JS_STDLIB_BASE, stdlib.stdlib_table)?;
        }
        let heap = Heap::new(&mem);
        let mut ctx = JSContext {
            mem,
            heap,
            atoms: AtomTables::new(),
            gc_refs: GcRefState::new(),
            roots: ClassRoots::new(stdlib.class_count as usize),
            stdlib,
            class_count: stdlib.class_count,
            frames: Vec::new(),
            temp_roots: Vec::new(),
            current_exception: JS_UNDEFINED,
            uncatchable: false,
            in_gc: false,
            heap_free_at_gc: 0,
            call_depth: 0,
            staged_call: None,
            interrupt_handler: None,
            interrupt_counter: JS_INTERRUPT_COUNTER_INIT,
            opaque: core::ptr::null_mut(),
            write_func: None,
            opaque_slots: Vec::new(),
            free_opaque_slots: Vec::new(),
            random_state: DEFAULT_RANDOM_SEED,
            prepare_compilation: config.prepare_compilation,
        };

        if let Some(offset) = stdlib.sorted_atoms_offset {
            let table = ctx.rom_value_array(offset)?;
            ctx.atoms.add_rom_table(table);
        }
        ctx.init_roots().map_err(|_| ContextError::OutOfMemory)?;
        if let Some(offset) = stdlib.global_object_offset {
            ctx.install_global_template(offset)?;
        }
        ctx.temp_roots.clear();
        debug!(
            "context created: {} bytes of RAM, {} classes, {} bytes free",
            mem_size,
            ctx.class_count,
            ctx.heap.free_bytes()
        );
        Ok(ctx)
    }

    /// Context without bytecode preparation support.
    pub fn new_runtime(stdlib: &'a StdLibraryDef<'a>, memory_size: usize) -> Result<Self, ContextError> {
        Self::new(ContextConfig {
            stdlib,
            memory_size,
            prepare_compilation: false,
        })
    }

    fn rom_value_array(&self, word_offset: u32) -> Result<Vec<JSValue>, ContextError> {
        let addr = JS_STDLIB_BASE + word_offset * JSW;
        let header = MbHeader::from_word(self.mem.read_u32(addr)?);
        if header.tag() != MTag::ValueArray {
            return Err(ContextError::MalformedStdlib(word_offset));
        }
        let size = ValueArrayHeader::from(header).size();
        (1..=size)
            .map(|i| self.mem.field(addr, i).map_err(ContextError::from))
            .collect()
    }

    fn init_roots(&mut self) -> JsResult<()> {
        self.roots.empty_string = self.intern(b"")?;
        let mut atoms = [JS_UNDEFINED; 8];
        for (slot, name) in atoms.iter_mut().zip(WellKnownAtoms::NAMES) {
            *slot = self.intern(name.as_bytes())?;
        }
        self.roots.atoms = WellKnownAtoms::from_values(atoms);

        let object_proto = self.new_object_class(JSObjectClass::Object as u8, JS_NULL, 0)?;
        self.roots.protos[JSObjectClass::Object as usize] = object_proto;
        let error_proto = self.new_object_class(JSObjectClass::Object as u8, object_proto, 0)?;
        self.roots.protos[JSObjectClass::Error as usize] = error_proto;
        let function_proto = self.new_object_class(JSObjectClass::Object as u8, object_proto, 0)?;

        for class_id in 1..self.class_count {
            let class = JSObjectClass::from_id(class_id as u8);
            let proto = match class {
                JSObjectClass::Error => continue,
                JSObjectClass::CFunction | JSObjectClass::Closure => function_proto,
                c if c.is_error() => self.new_object_class(JSObjectClass::Object as u8, error_proto, 0)?,
                JSObjectClass::User => object_proto,
                _ => self.new_object_class(JSObjectClass::Object as u8, object_proto, 0)?,
            };
            self.roots.protos[class_id as usize] = proto;
        }
        for class_id in JSObjectClass::Error as u8..=JSObjectClass::InternalError as u8 {
            let class = JSObjectClass::from_id(class_id);
            let proto = self.roots.protos[class_id as usize];
            let name = self.intern(class.name().as_bytes())?;
            self.define_prop(proto, self.roots.atoms.name, name)?;
            self.define_prop(proto, self.roots.atoms.message, self.roots.empty_string)?;
        }

        self.roots.global = self.new_object_class(JSObjectClass::Object as u8, object_proto, 0)?;
        self.roots.oom_error = self.new_error_object(JSObjectClass::InternalError, "out of memory", false)?;
        Ok(())
    }

    fn install_global_template(&mut self, word_offset: u32) -> Result<(), ContextError> {
        let pairs = self.rom_value_array(word_offset)?;
        if pairs.len() % 2 != 0 {
            return Err(ContextError::MalformedStdlib(word_offset));
        }
        let global = self.roots.global;
        for pair in pairs.chunks(2) {
            self.define_prop(global, pair[0], pair[1])
                .map_err(|_| ContextError::OutOfMemory)?;
        }
        Ok(())
    }

    /// Allocates a zeroed block. Collects first when the allocation would
    /// have to bump into the reserve kept for the stack, and once more if
    /// the arena is full.
    pub(crate) fn alloc_block(&mut self, header: MbHeader, words: u32) -> JsResult<u32> {
        if !self.in_gc
            && self.heap.under_pressure(words)
            && !self.heap.has_free_fit(words)
            && self.heap.heap_free() != self.heap_free_at_gc
        {
            self.gc();
        }
        let addr = match self.heap.alloc(&mut self.mem, header, words) {
            Ok(addr) => addr,
            Err(HeapError::OutOfMemory) if !self.in_gc => {
                self.gc();
                self.heap.alloc(&mut self.mem, header, words)?
            }
            Err(err) => return Err(err.into()),
        };
        self.temp_roots.push(value_from_ptr(addr));
        Ok(addr)
    }

    /// Makes room for `words` more stack slots, collecting once when the
    /// heap stands in the way. `live` holds values not yet on the stack.
    pub(crate) fn ensure_stack_room(&mut self, words: u32, live: &[JSValue]) -> JsResult<()> {
        if self.heap.stack_has_room(words) {
            return Ok(());
        }
        if !self.in_gc {
            for &val in live {
                self.keep_alive(val);
            }
            self.gc();
            if self.heap.stack_has_room(words) {
                return Ok(());
            }
        }
        // Blame the side of the arena that holds more.
        if self.heap.used_bytes() > self.heap.stack_depth() * JSW {
            Err(Exception::OutOfMemory)
        } else {
            Err(Exception::StackOverflow)
        }
    }

    /// Keeps `val` alive until the current instruction or API call ends.
    pub(crate) fn keep_alive(&mut self, val: JSValue) {
        if val.is_ptr() {
            self.temp_roots.push(val);
        }
    }

    /// Called at the start of every public entry point. Temporaries of a
    /// previous host-level call are released; nested calls from native
    /// functions keep those of the running instruction.
    pub(crate) fn enter_api(&mut self) {
        if self.frames.is_empty() && self.call_depth == 0 {
            self.temp_roots.clear();
        }
    }

    pub(crate) fn header_at(&self, addr: u32) -> Result<MbHeader, MemoryError> {
        Ok(MbHeader::from_word(self.mem.read_u32(addr)?))
    }

    /// Header of the block at `addr`, which must be tagged `tag`. Function
    /// blocks and their tables may come from a loaded image.
    pub(crate) fn typed_header<T: From<MbHeader>>(&self, addr: u32, tag: MTag) -> JsResult<T> {
        let header = self.header_at(addr)?;
        if header.tag() != tag {
            return Err(Exception::InvalidBytecode);
        }
        Ok(T::from(header))
    }

    pub(crate) fn block_tag(&self, addr: u32) -> Option<MTag> {
        self.header_at(addr).ok().map(|h| h.tag())
    }

    /// Address and header of an object value.
    pub(crate) fn object_header(&self, val: JSValue) -> Option<(u32, ObjectHeader)> {
        let addr = value_to_ptr(val)?;
        let header = self.header_at(addr).ok()?;
        (header.tag() == MTag::Object).then(|| (addr, ObjectHeader::from(header)))
    }

    pub fn is_object(&self, val: JSValue) -> bool {
        self.object_header(val).is_some()
    }

    pub fn get_class_id(&self, val: JSValue) -> Option<u8> {
        self.object_header(val).map(|(_, h)| h.class_id())
    }

    pub(crate) fn class_proto(&self, class_id: u8) -> JSValue {
        self.roots
            .protos
            .get(class_id as usize)
            .copied()
            .unwrap_or(self.roots.protos[JSObjectClass::Object as usize])
    }

    pub fn global_object(&self) -> JSValue {
        self.roots.global
    }

    pub fn set_opaque(&mut self, opaque: *mut c_void) {
        self.opaque = opaque;
    }

    pub fn opaque(&self) -> *mut c_void {
        self.opaque
    }

    pub fn set_interrupt_handler(&mut self, handler: Option<JSInterruptHandler>) {
        self.interrupt_handler = handler;
        self.interrupt_counter = JS_INTERRUPT_COUNTER_INIT;
    }

    pub fn set_log_func(&mut self, write_func: Option<JSWriteFunc>) {
        self.write_func = write_func;
    }

    pub(crate) fn write_log(&self, buf: &[u8]) {
        if let Some(write) = self.write_func {
            write(self.opaque, buf);
        }
    }

    pub fn set_random_seed(&mut self, seed: u64) {
        self.random_state = if seed == 0 { DEFAULT_RANDOM_SEED } else { seed };
    }

    /// Uniform value in `[0, 1)` from a xorshift64* generator.
    pub fn random(&mut self) -> f64 {
        let mut x = self.random_state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.random_state = x;
        let r = x.wrapping_mul(0x2545_f491_4f6c_dd1d);
        (r >> 11) as f64 / (1u64 << 53) as f64
    }

    pub(crate) fn alloc_opaque_slot(&mut self, opaque: *mut c_void) -> u32 {
        if let Some(idx) = self.free_opaque_slots.pop() {
            self.opaque_slots[idx as usize] = opaque;
            return idx;
        }
        self.opaque_slots.push(opaque);
        self.opaque_slots.len() as u32 - 1
    }

    pub(crate) fn opaque_slot(&self, idx: u32) -> Option<*mut c_void> {
        self.opaque_slots.get(idx as usize).copied()
    }

    pub(crate) fn set_opaque_slot(&mut self, idx: u32, opaque: *mut c_void) {
        if let Some(slot) = self.opaque_slots.get_mut(idx as usize) {
            *slot = opaque;
        }
    }

    pub(crate) fn free_opaque_slot(&mut self, idx: u32) -> *mut c_void {
        match self.opaque_slots.get_mut(idx as usize) {
            Some(slot) => {
                let opaque = core::mem::replace(slot, core::ptr::null_mut());
                self.free_opaque_slots.push(idx);
                opaque
            }
            None => core::ptr::null_mut(),
        }
    }

    pub fn stdlib(&self) -> &'a StdLibraryDef<'a> {
        self.stdlib
    }
}

impl Drop for JSContext<'_> {
    fn drop(&mut self) {
        // Finalize every user object that is still alive.
        self.frames.clear();
        self.temp_roots.clear();
        self.gc_refs = GcRefState::new();
        self.roots.global = JS_UNDEFINED;
        self.current_exception = JS_UNDEFINED;
        self.heap.drop_stack();
        self.gc();
    }
}
