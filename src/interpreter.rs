//! Bytecode interpreter.
//!
//! Calls between bytecode functions do not recurse on the native stack:
//! a call pushes a [`Frame`] and the dispatch loop continues in it. Native
//! functions, and getters, setters or conversions called from Rust, start
//! a nested loop; nesting is bounded by [`JS_MAX_CALL_RECURSION`].
//!
//! Frame layout on the value stack, from `base` upwards:
//!
//! ```text
//! base                this
//! base + 4            arg 0 .. arg n-1
//! base + 4 * (1 + n)  local 0 .. local m-1
//! ```
//!
//! The operand stack grows down from `base`. `catch` pushes a catch offset
//! marker; a throw unwinds to the nearest marker of the innermost frame
//! that has one, dropping everything above it.

use crate::capi_defs::{CallFlags, JSCFunctionType, FRAME_CF_ARGC_MASK};
use crate::containers::{ByteArrayHeader, ValueArrayHeader, VarRefHeader, VARREF_BLOCK_WORDS};
use crate::context::JSContext;
use crate::conversion::ToPrimitiveHint;
use crate::cutils::{get_u16, get_u32};
use crate::enums::JSObjectClass;
use crate::exception::{Exception, JsResult};
use crate::function_bytecode::{
    ClosureVarSource, FunctionBytecodeHeader, FB_BYTE_CODE, FB_CLOSURE_VARS, FB_CPOOL, FB_FILENAME,
    FB_FUNC_NAME, FB_PC2LINE, FB_VARS, FB_VAR_COUNT,
};
use crate::jsvalue::{
    is_uninitialized, new_bool, new_catch_offset, new_short_int, value_from_ptr, value_to_ptr,
    JSValue, ValueKind, JSW, JS_EXCEPTION_CALL, JS_FALSE, JS_NULL, JS_TRUE, JS_UNDEFINED,
    JS_UNINITIALIZED,
};
use crate::memblock::MTag;
use crate::object::{CFUNC_IDX, CFUNC_PARAMS, CLOSURE_FUNC, CLOSURE_VAR_REFS};
use crate::opcode::*;
use crate::parser::pc2line::find_line_col;
use crate::property::PropKey;
use log::{debug, trace};

/// Maximum number of nested calls.
pub const JS_MAX_CALL_RECURSION: u32 = 512;
/// Calls and backward jumps between two interrupt handler polls.
pub const JS_INTERRUPT_COUNTER_INIT: u32 = 10000;

const BACKTRACE_MAX_FRAMES: usize = 32;

/// An active call.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) func: JSValue,
    /// Function bytecode, `JS_NULL` for native functions.
    pub(crate) fb: JSValue,
    /// Attached var refs pointing into this frame.
    pub(crate) open_var_refs: Vec<u32>,
    code: Vec<u8>,
    cpool: u32,
    base: u32,
    arg_count: u32,
    saved_sp: u32,
    /// Operand words the caller drops when this frame returns.
    caller_pop: u32,
    pc: u32,
    insn_pc: u32,
    ctor: bool,
}

impl Frame {
    fn native(func: JSValue, base: u32, arg_count: u32, saved_sp: u32, ctor: bool) -> Self {
        Frame {
            func,
            fb: JS_NULL,
            open_var_refs: Vec::new(),
            code: Vec::new(),
            cpool: 0,
            base,
            arg_count,
            saved_sp,
            caller_pop: 0,
            pc: 0,
            insn_pc: 0,
            ctor,
        }
    }

    fn arg_addr(&self, idx: u32) -> u32 {
        self.base + JSW * (1 + idx)
    }

    fn local_addr(&self, idx: u32) -> u32 {
        self.base + JSW * (1 + self.arg_count + idx)
    }
}

#[derive(Clone, Copy, Debug)]
struct Insn {
    op: OpCode,
    arg: u32,
}

enum Step {
    Next,
    Return(JSValue),
}

enum Callee {
    Closure,
    Native { idx: u32, params: JSValue },
    NotCallable,
}

fn js_pow(x: f64, y: f64) -> f64 {
    if y.is_nan() || (x.abs() == 1.0 && y.is_infinite()) {
        f64::NAN
    } else {
        x.powf(y)
    }
}

impl<'a> JSContext<'a> {
    /// Runs a compiled script with the global object as `this`. Accepts a
    /// function bytecode value (as returned by `parse` or a loaded image) or
    /// a function.
    pub fn run(&mut self, val: JSValue) -> JsResult<JSValue> {
        let func = match value_to_ptr(val) {
            Some(addr) if self.block_tag(addr) == Some(MTag::FunctionBytecode) => self.new_closure(val)?,
            _ => val,
        };
        let global = self.roots.global;
        self.call_function(func, global, &[])
    }

    /// Calls `func` with `this_val` and `args`.
    pub fn call_function(&mut self, func: JSValue, this_val: JSValue, args: &[JSValue]) -> JsResult<JSValue> {
        self.invoke(func, this_val, args, false)
    }

    /// Pushes a value for [`JSContext::call_pushed`]: the arguments in
    /// reverse order, then the function, then `this`.
    pub fn push_arg(&mut self, val: JSValue) -> JsResult<()> {
        self.stack_push(val)
    }

    /// Calls the function pushed with [`JSContext::push_arg`]. The low 16
    /// bits of `call_flags` hold the argument count; `FRAME_CF_CTOR` makes
    /// it a constructor call. The pushed values are popped.
    pub fn call_pushed(&mut self, call_flags: u32) -> JsResult<JSValue> {
        let argc = call_flags & FRAME_CF_ARGC_MASK;
        self.call_stack_args(argc, CallFlags::from_bits_truncate(call_flags))
    }

    /// From a native function: has the interpreter call the function pushed
    /// with [`JSContext::push_arg`] once the native function returns the
    /// value returned here. The call result replaces the native result.
    pub fn stage_call(&mut self, call_flags: u32) -> JSValue {
        let argc = (call_flags & FRAME_CF_ARGC_MASK) as u16;
        self.staged_call = Some((argc, CallFlags::from_bits_truncate(call_flags)));
        JS_EXCEPTION_CALL
    }

    /// True inside a native function invoked with `new`.
    pub fn is_constructor_call(&self) -> bool {
        self.frames.last().is_some_and(|f| f.ctor)
    }

    /// Checks that `len` more values fit on the stack and that one more
    /// nested call is allowed. Otherwise a `RangeError` becomes the pending
    /// exception.
    pub fn stack_check(&mut self, len: u32) -> bool {
        if self.call_depth < JS_MAX_CALL_RECURSION && self.heap.stack_has_room(len) {
            return true;
        }
        self.materialize(Exception::StackOverflow);
        false
    }

    /// Calls `func`. Bytecode functions run in a nested dispatch loop.
    pub(crate) fn invoke(
        &mut self,
        func: JSValue,
        this_val: JSValue,
        args: &[JSValue],
        ctor: bool,
    ) -> JsResult<JSValue> {
        let res = match self.callee(func)? {
            Callee::Closure => {
                self.enter_closure(func, this_val, args, ctor, 0)?;
                let entry = self.frames.len() - 1;
                self.execute(entry)
            }
            Callee::Native { idx, params } => self.call_native(func, idx, params, this_val, args, ctor),
            Callee::NotCallable => Err(self.throw_type_error("not a function")),
        }?;
        self.keep_alive(res);
        Ok(res)
    }

    fn callee(&self, func: JSValue) -> JsResult<Callee> {
        if let ValueKind::ShortFunc(idx) = func.kind() {
            return Ok(Callee::Native {
                idx,
                params: JS_UNDEFINED,
            });
        }
        match self.get_class_id(func).map(JSObjectClass::from_id) {
            Some(JSObjectClass::Closure) => Ok(Callee::Closure),
            Some(JSObjectClass::CFunction) => Ok(Callee::Native {
                idx: self.object_field(func, CFUNC_IDX)?.get_int() as u32,
                params: self.object_field(func, CFUNC_PARAMS)?,
            }),
            _ => Ok(Callee::NotCallable),
        }
    }

    fn call_native(
        &mut self,
        func: JSValue,
        idx: u32,
        params: JSValue,
        this_val: JSValue,
        args: &[JSValue],
        ctor: bool,
    ) -> JsResult<JSValue> {
        let stdlib = self.stdlib;
        let Some(def) = stdlib.c_function(idx) else {
            return Err(self.throw_internal_error(format_args!("invalid C function index {idx}")));
        };
        if ctor && !def.func.is_constructor() {
            return Err(self.throw_type_error(format_args!("{} is not a constructor", def.name)));
        }
        if self.call_depth >= JS_MAX_CALL_RECURSION {
            return Err(Exception::StackOverflow);
        }
        self.poll_interrupt()?;

        let argc = args.len().max(def.arg_count as usize);
        let saved_sp = self.heap.sp();
        if !self.heap.stack_has_room(1 + argc as u32) {
            self.keep_alive(func);
            self.keep_alive(this_val);
            self.ensure_stack_room(1 + argc as u32, args)?;
        }
        let base = self.heap.reserve(&mut self.mem, 1 + argc as u32)?;
        // A constructor receives itself as `this` and creates the object.
        let this_val = if ctor { func } else { this_val };
        self.mem.write_value(base, this_val)?;
        let mut argv = Vec::with_capacity(argc);
        for i in 0..argc {
            let val = args.get(i).copied().unwrap_or(JS_UNDEFINED);
            self.mem.write_value(base + JSW * (1 + i as u32), val)?;
            argv.push(val);
        }
        self.frames.push(Frame::native(func, base, argc as u32, saved_sp, ctor));
        self.call_depth += 1;

        let mut this_slot = this_val;
        let ret = match def.func {
            JSCFunctionType::Generic(f) | JSCFunctionType::Constructor(f) => Ok(f(self, &mut this_slot, &argv)),
            JSCFunctionType::GenericMagic(f) | JSCFunctionType::ConstructorMagic(f) => {
                Ok(f(self, &mut this_slot, &argv, def.magic as i32))
            }
            JSCFunctionType::GenericParams(f) => Ok(f(self, &mut this_slot, &argv, params)),
            JSCFunctionType::FF(f) => {
                let x = argv.first().copied().unwrap_or(JS_UNDEFINED);
                match self.to_number(x) {
                    Ok(d) => self.new_float64(f(d)),
                    Err(err) => Err(err),
                }
            }
        };
        let res = match ret {
            Ok(val) if val == JS_EXCEPTION_CALL => self.call_staged(),
            Ok(val) if val.is_exception() => Err(Exception::Thrown),
            other => other,
        };
        self.leave_frame()?;
        res
    }

    fn call_staged(&mut self) -> JsResult<JSValue> {
        let Some((argc, flags)) = self.staged_call.take() else {
            return Err(self.throw_internal_error("no call was staged"));
        };
        self.call_stack_args(argc as u32, flags)
    }

    /// Calls with `[this, func, args...]` read from the stack top down.
    fn call_stack_args(&mut self, argc: u32, flags: CallFlags) -> JsResult<JSValue> {
        if self.heap.stack_depth() < argc + 2 {
            return Err(self.throw_internal_error("missing pushed call arguments"));
        }
        let sp = self.heap.sp();
        let this_val = self.stack_peek(0)?;
        let func = self.stack_peek(1)?;
        let args = (0..argc).map(|i| self.stack_peek(2 + i)).collect::<JsResult<Vec<_>>>()?;
        let res = self.invoke(func, this_val, &args, flags.contains(CallFlags::CTOR));
        self.heap.set_sp(sp + (argc + 2) * JSW);
        res
    }

    /// Pushes the frame of a bytecode function call.
    fn enter_closure(
        &mut self,
        func: JSValue,
        this_val: JSValue,
        args: &[JSValue],
        ctor: bool,
        caller_pop: u32,
    ) -> JsResult<()> {
        if self.call_depth >= JS_MAX_CALL_RECURSION {
            return Err(Exception::StackOverflow);
        }
        self.poll_interrupt()?;
        let fb = self.object_field(func, CLOSURE_FUNC)?;
        let fb_addr = value_to_ptr(fb).ok_or(Exception::InvalidBytecode)?;
        let header: FunctionBytecodeHeader = self.typed_header(fb_addr, MTag::FunctionBytecode)?;
        let this_val = if ctor {
            if header.is_arrow() {
                return Err(self.throw_type_error("not a constructor"));
            }
            let proto = self.get_prop(func, self.roots.atoms.prototype)?;
            let proto = if self.is_object(proto) {
                proto
            } else {
                self.class_proto(JSObjectClass::Object as u8)
            };
            self.new_object_class(JSObjectClass::Object as u8, proto, 0)?
        } else if !header.is_arrow() && (this_val.is_undefined() || this_val.is_null()) {
            self.roots.global
        } else {
            this_val
        };

        let code = match value_to_ptr(self.mem.field(fb_addr, FB_BYTE_CODE)?) {
            Some(addr) => {
                let len = self.typed_header::<ByteArrayHeader>(addr, MTag::ByteArray)?.size() as usize;
                self.mem.bytes(addr + JSW, len)?.to_vec()
            }
            None => Vec::new(),
        };
        let cpool = value_to_ptr(self.mem.field(fb_addr, FB_CPOOL)?).unwrap_or(0);
        let var_count = self.mem.field(fb_addr, FB_VAR_COUNT)?.get_int().max(0) as u32;
        let arg_count = (args.len() as u32).max(header.arg_count() as u32);

        let saved_sp = self.heap.sp();
        let words = 1 + arg_count + var_count;
        if !self.heap.stack_has_room(words) {
            self.keep_alive(func);
            self.keep_alive(this_val);
            self.ensure_stack_room(words, args)?;
        }
        let base = self.heap.reserve(&mut self.mem, words)?;
        self.mem.write_value(base, this_val)?;
        for i in 0..arg_count + var_count {
            let val = args.get(i as usize).copied().unwrap_or(JS_UNDEFINED);
            self.mem.write_value(base + JSW * (1 + i), val)?;
        }
        self.frames.push(Frame {
            func,
            fb,
            open_var_refs: Vec::new(),
            code,
            cpool,
            base,
            arg_count,
            saved_sp,
            caller_pop,
            pc: 0,
            insn_pc: 0,
            ctor,
        });
        self.call_depth += 1;
        Ok(())
    }

    /// Pops the top frame, restoring the stack and detaching the var refs
    /// that point into it.
    fn leave_frame(&mut self) -> JsResult<Frame> {
        let frame = self.frames.pop().ok_or(Exception::InvalidBytecode)?;
        self.heap.set_sp(frame.saved_sp);
        self.call_depth -= 1;
        for &var_ref in &frame.open_var_refs {
            self.close_var_ref(var_ref)?;
        }
        Ok(frame)
    }

    /// Runs until the frame at index `entry` returns.
    fn execute(&mut self, entry: usize) -> JsResult<JSValue> {
        let mark = self.temp_roots.len();
        loop {
            self.temp_roots.truncate(mark);
            let res = match self.fetch() {
                Ok(insn) => self.step(insn),
                Err(err) => Err(err),
            };
            match res {
                Ok(Step::Next) => {}
                Ok(Step::Return(val)) => {
                    let this_val = self.mem.read_value(self.frame()?.base)?;
                    let frame = self.leave_frame()?;
                    let val = if frame.ctor && !self.is_object(val) { this_val } else { val };
                    if self.frames.len() == entry {
                        return Ok(val);
                    }
                    let sp = self.heap.sp();
                    self.heap.set_sp(sp + frame.caller_pop * JSW);
                    self.stack_push(val)?;
                }
                Err(err) => self.unwind(err, entry)?,
            }
        }
    }

    /// Transfers control to the nearest catch handler at or above frame
    /// `entry`. Fails with the exception when there is none.
    fn unwind(&mut self, err: Exception, entry: usize) -> JsResult<()> {
        if err == Exception::Interrupted || self.uncatchable {
            while self.frames.len() > entry {
                self.leave_frame()?;
            }
            return Err(err);
        }
        let exc = self.materialize(err);
        loop {
            let base = self.frame()?.base;
            if let Some((marker, target)) = self.find_catch(base)? {
                trace!("exception caught, resuming at pc {target}");
                self.heap.set_sp(marker + JSW);
                self.current_exception = JS_UNDEFINED;
                self.stack_push(exc)?;
                self.frame_mut()?.pc = target;
                return Ok(());
            }
            self.leave_frame()?;
            if self.frames.len() == entry {
                return Err(Exception::Thrown);
            }
        }
    }

    /// Innermost catch marker of the operand stack below `base`.
    fn find_catch(&self, base: u32) -> JsResult<Option<(u32, u32)>> {
        let mut addr = self.heap.sp();
        while addr < base {
            if let ValueKind::CatchOffset(pc) = self.mem.read_value(addr)?.kind() {
                return Ok(Some((addr, pc)));
            }
            addr += JSW;
        }
        Ok(None)
    }

    fn poll_interrupt(&mut self) -> JsResult<()> {
        self.interrupt_counter = self.interrupt_counter.saturating_sub(1);
        if self.interrupt_counter > 0 {
            return Ok(());
        }
        self.interrupt_counter = JS_INTERRUPT_COUNTER_INIT;
        if let Some(handler) = self.interrupt_handler {
            let opaque = self.opaque;
            if handler(self, opaque) {
                debug!("execution interrupted");
                return Err(Exception::Interrupted);
            }
        }
        Ok(())
    }

    fn frame(&self) -> JsResult<&Frame> {
        self.frames.last().ok_or(Exception::InvalidBytecode)
    }

    fn frame_mut(&mut self) -> JsResult<&mut Frame> {
        self.frames.last_mut().ok_or(Exception::InvalidBytecode)
    }

    fn fetch(&mut self) -> JsResult<Insn> {
        let frame = self.frame_mut()?;
        let pc = frame.pc as usize;
        let op = OpCode(*frame.code.get(pc).ok_or(Exception::InvalidBytecode)?);
        let info = op.info().ok_or(Exception::InvalidBytecode)?;
        let operand = frame
            .code
            .get(pc + 1..pc + info.size as usize)
            .ok_or(Exception::InvalidBytecode)?;
        let arg = match info.fmt {
            OpCodeFormat::none => 0,
            OpCodeFormat::i8 => operand[0] as i8 as i32 as u32,
            OpCodeFormat::i32 | OpCodeFormat::label => get_u32(operand),
            _ => get_u16(operand) as u32,
        };
        frame.insn_pc = pc as u32;
        frame.pc = (pc + info.size as usize) as u32;
        Ok(Insn { op, arg })
    }

    fn stack_push(&mut self, val: JSValue) -> JsResult<()> {
        self.ensure_stack_room(1, &[val])?;
        self.heap.push(&mut self.mem, val)?;
        Ok(())
    }

    /// Pops a value, keeping it alive until the next instruction.
    fn stack_pop(&mut self) -> JsResult<JSValue> {
        let val = self.heap.pop(&self.mem)?;
        self.keep_alive(val);
        Ok(val)
    }

    fn stack_peek(&self, depth: u32) -> JsResult<JSValue> {
        Ok(self.heap.peek(&self.mem, depth)?)
    }

    fn stack_poke(&mut self, depth: u32, val: JSValue) -> JsResult<()> {
        Ok(self.heap.poke(&mut self.mem, depth, val)?)
    }

    fn stack_drop(&mut self, count: u32) {
        let sp = self.heap.sp();
        self.heap.set_sp(sp + count * JSW);
    }

    fn cpool_value(&self, idx: u32) -> JsResult<JSValue> {
        let cpool = self.frame()?.cpool;
        Ok(self.mem.field(cpool, 1 + idx)?)
    }

    fn jump(&mut self, target: u32) -> JsResult<()> {
        if target <= self.frame()?.insn_pc {
            self.poll_interrupt()?;
        }
        self.frame_mut()?.pc = target;
        Ok(())
    }

    fn step(&mut self, insn: Insn) -> JsResult<Step> {
        let arg = insn.arg;
        match insn.op {
            OP_PUSH_UNDEFINED => self.stack_push(JS_UNDEFINED)?,
            OP_PUSH_NULL => self.stack_push(JS_NULL)?,
            OP_PUSH_TRUE => self.stack_push(JS_TRUE)?,
            OP_PUSH_FALSE => self.stack_push(JS_FALSE)?,
            OP_PUSH_THIS => {
                let this_val = self.mem.read_value(self.frame()?.base)?;
                self.stack_push(this_val)?;
            }
            OP_PUSH_CALLEE => {
                let func = self.frame()?.func;
                self.stack_push(func)?;
            }
            OP_PUSH_I8 => self.stack_push(new_short_int(arg as i32))?,
            OP_PUSH_I32 => {
                let val = self.new_int32(arg as i32)?;
                self.stack_push(val)?;
            }
            OP_PUSH_CONST => {
                let val = self.cpool_value(arg)?;
                self.stack_push(val)?;
            }
            OP_FCLOSURE => {
                let fb = self.cpool_value(arg)?;
                let closure = self.new_closure(fb)?;
                self.stack_push(closure)?;
            }
            OP_OBJECT => {
                let obj = self.new_object()?;
                self.stack_push(obj)?;
            }
            OP_ARRAY_FROM => {
                let elems = (0..arg).rev().map(|i| self.stack_peek(i)).collect::<JsResult<Vec<_>>>()?;
                let arr = self.new_array(&elems)?;
                self.stack_drop(arg);
                self.stack_push(arr)?;
            }

            OP_GET_LOC | OP_GET_LOC_CHECK => {
                let val = self.mem.read_value(self.frame()?.local_addr(arg))?;
                if insn.op == OP_GET_LOC_CHECK && is_uninitialized(val) {
                    return Err(self.uninitialized_error(FB_VARS, arg));
                }
                self.stack_push(val)?;
            }
            OP_PUT_LOC | OP_SET_LOC | OP_PUT_LOC_CHECK => {
                let addr = self.frame()?.local_addr(arg);
                if insn.op == OP_PUT_LOC_CHECK && is_uninitialized(self.mem.read_value(addr)?) {
                    return Err(self.uninitialized_error(FB_VARS, arg));
                }
                let val = if insn.op == OP_SET_LOC {
                    self.stack_peek(0)?
                } else {
                    self.stack_pop()?
                };
                self.mem.write_value(addr, val)?;
            }
            OP_SET_LOC_UNINIT => {
                let addr = self.frame()?.local_addr(arg);
                self.mem.write_value(addr, JS_UNINITIALIZED)?;
            }
            OP_CLOSE_LOC => {
                let addr = self.frame()?.local_addr(arg);
                self.close_slot(addr)?;
            }
            OP_GET_ARG => {
                let frame = self.frame()?;
                let val = if arg < frame.arg_count {
                    self.mem.read_value(frame.arg_addr(arg))?
                } else {
                    JS_UNDEFINED
                };
                self.stack_push(val)?;
            }
            OP_PUT_ARG | OP_SET_ARG => {
                let val = if insn.op == OP_SET_ARG {
                    self.stack_peek(0)?
                } else {
                    self.stack_pop()?
                };
                let frame = self.frame()?;
                if arg < frame.arg_count {
                    let addr = frame.arg_addr(arg);
                    self.mem.write_value(addr, val)?;
                }
            }
            OP_GET_VAR_REF | OP_GET_VAR_REF_CHECK => {
                let val = self.mem.read_value(self.var_ref_slot(arg)?)?;
                if insn.op == OP_GET_VAR_REF_CHECK && is_uninitialized(val) {
                    return Err(self.uninitialized_error(FB_CLOSURE_VARS, arg));
                }
                self.stack_push(val)?;
            }
            OP_PUT_VAR_REF | OP_SET_VAR_REF | OP_PUT_VAR_REF_CHECK => {
                let slot = self.var_ref_slot(arg)?;
                if insn.op == OP_PUT_VAR_REF_CHECK && is_uninitialized(self.mem.read_value(slot)?) {
                    return Err(self.uninitialized_error(FB_CLOSURE_VARS, arg));
                }
                let val = if insn.op == OP_SET_VAR_REF {
                    self.stack_peek(0)?
                } else {
                    self.stack_pop()?
                };
                self.mem.write_value(slot, val)?;
            }

            OP_GET_GLOBAL | OP_GET_GLOBAL_UNDEF => {
                let atom = self.cpool_value(arg)?;
                let global = self.roots.global;
                let val = if self.has_property(global, PropKey::Atom(atom))? {
                    self.get_prop(global, atom)?
                } else if insn.op == OP_GET_GLOBAL_UNDEF {
                    JS_UNDEFINED
                } else {
                    let name = self.string_to_rust(atom)?;
                    return Err(self.throw_reference_error(format_args!("{name} is not defined")));
                };
                self.stack_push(val)?;
            }
            OP_PUT_GLOBAL => {
                let atom = self.cpool_value(arg)?;
                let val = self.stack_pop()?;
                self.set_prop(self.roots.global, atom, val)?;
            }
            OP_DEFINE_GLOBAL => {
                let atom = self.cpool_value(arg)?;
                let global = self.roots.global;
                if !self.has_property(global, PropKey::Atom(atom))? {
                    self.define_prop(global, atom, JS_UNDEFINED)?;
                }
            }

            OP_GET_FIELD => {
                let atom = self.cpool_value(arg)?;
                let obj = self.stack_pop()?;
                let val = self.get_prop(obj, atom)?;
                self.stack_push(val)?;
            }
            OP_GET_FIELD2 => {
                let atom = self.cpool_value(arg)?;
                let obj = self.stack_peek(0)?;
                let val = self.get_prop(obj, atom)?;
                self.stack_push(val)?;
            }
            OP_PUT_FIELD => {
                let atom = self.cpool_value(arg)?;
                let val = self.stack_pop()?;
                let obj = self.stack_pop()?;
                self.set_prop(obj, atom, val)?;
                self.stack_push(val)?;
            }
            OP_GET_ARRAY_EL | OP_GET_ARRAY_EL2 => {
                let key = self.stack_pop()?;
                let obj = if insn.op == OP_GET_ARRAY_EL {
                    self.stack_pop()?
                } else {
                    self.stack_peek(0)?
                };
                let key = self.to_property_key(key)?;
                let val = self.get_property(obj, key)?;
                self.stack_push(val)?;
            }
            OP_PUT_ARRAY_EL => {
                let val = self.stack_pop()?;
                let key = self.stack_pop()?;
                let obj = self.stack_pop()?;
                let key = self.to_property_key(key)?;
                self.set_property(obj, key, val)?;
                self.stack_push(val)?;
            }
            OP_DEFINE_FIELD => {
                let atom = self.cpool_value(arg)?;
                let val = self.stack_pop()?;
                let obj = self.stack_peek(0)?;
                self.define_prop(obj, atom, val)?;
            }
            OP_DEFINE_ARRAY_EL => {
                let val = self.stack_pop()?;
                let key = self.stack_pop()?;
                let obj = self.stack_peek(0)?;
                let key = self.to_property_key(key)?;
                self.define_property(obj, key, val)?;
            }
            OP_DEFINE_GETTER | OP_DEFINE_SETTER => {
                let atom = self.cpool_value(arg)?;
                let func = self.stack_pop()?;
                let obj = self.stack_peek(0)?;
                let (getter, setter) = if insn.op == OP_DEFINE_GETTER {
                    (func, JS_UNDEFINED)
                } else {
                    (JS_UNDEFINED, func)
                };
                self.define_getset(obj, PropKey::Atom(atom), getter, setter)?;
            }

            OP_DROP => self.stack_drop(1),
            OP_DUP => {
                let val = self.stack_peek(0)?;
                self.stack_push(val)?;
            }
            OP_DUP2 => {
                let a = self.stack_peek(1)?;
                let b = self.stack_peek(0)?;
                self.stack_push(a)?;
                self.stack_push(b)?;
            }
            OP_SWAP => {
                let a = self.stack_peek(1)?;
                let b = self.stack_peek(0)?;
                self.stack_poke(1, b)?;
                self.stack_poke(0, a)?;
            }
            OP_NIP => {
                let b = self.stack_pop()?;
                self.stack_poke(0, b)?;
            }
            OP_INSERT2 => {
                let b = self.stack_pop()?;
                let a = self.stack_pop()?;
                for val in [b, a, b] {
                    self.stack_push(val)?;
                }
            }
            OP_INSERT3 => {
                let c = self.stack_pop()?;
                let b = self.stack_pop()?;
                let a = self.stack_pop()?;
                for val in [c, a, b, c] {
                    self.stack_push(val)?;
                }
            }

            OP_CALL => self.op_call(arg, false)?,
            OP_CALL_CONSTRUCTOR => self.op_call(arg, true)?,
            OP_RETURN => return Ok(Step::Return(self.stack_pop()?)),
            OP_RETURN_UNDEF => return Ok(Step::Return(JS_UNDEFINED)),
            OP_THROW => {
                let val = self.stack_pop()?;
                return Err(self.throw(val));
            }
            OP_CATCH => self.stack_push(new_catch_offset(arg))?,
            OP_GOTO => self.jump(arg)?,
            OP_IF_FALSE | OP_IF_TRUE => {
                let val = self.stack_pop()?;
                if self.to_boolean(val) == (insn.op == OP_IF_TRUE) {
                    self.jump(arg)?;
                }
            }

            OP_NEG => {
                let val = self.stack_pop()?;
                let res = match val.kind() {
                    ValueKind::Int(i) if i != 0 => self.new_int64(-(i as i64))?,
                    _ => {
                        let d = self.to_number(val)?;
                        self.new_float64(-d)?
                    }
                };
                self.stack_push(res)?;
            }
            OP_PLUS => {
                let val = self.stack_pop()?;
                let res = self.to_number_value(val)?;
                self.stack_push(res)?;
            }
            OP_NOT => {
                let val = self.stack_pop()?;
                let i = self.to_int32(val)?;
                let res = self.new_int32(!i)?;
                self.stack_push(res)?;
            }
            OP_LNOT => {
                let val = self.stack_pop()?;
                let res = new_bool(!self.to_boolean(val));
                self.stack_push(res)?;
            }
            OP_TYPEOF => {
                let val = self.stack_pop()?;
                let name = self.intern(self.typeof_str(val).as_bytes())?;
                self.stack_push(name)?;
            }
            OP_DELETE => {
                let key = self.stack_pop()?;
                let obj = self.stack_pop()?;
                let key = self.to_property_key(key)?;
                let res = self.delete_property(obj, key)?;
                self.stack_push(new_bool(res))?;
            }
            OP_INC | OP_DEC => {
                let delta = if insn.op == OP_INC { 1 } else { -1 };
                let val = self.stack_pop()?;
                let res = match val.kind() {
                    ValueKind::Int(i) => self.new_int64(i as i64 + delta)?,
                    _ => {
                        let d = self.to_number(val)?;
                        self.new_float64(d + delta as f64)?
                    }
                };
                self.stack_push(res)?;
            }
            OP_TO_NUMERIC => {
                let val = self.stack_peek(0)?;
                let res = self.to_number_value(val)?;
                self.stack_poke(0, res)?;
            }

            OP_ADD => self.binary(|ctx, a, b| ctx.add_values(a, b))?,
            OP_SUB => self.binary(|ctx, a, b| ctx.arith(a, b, |x, y| x - y))?,
            OP_MUL => self.binary(|ctx, a, b| ctx.arith(a, b, |x, y| x * y))?,
            OP_DIV => self.binary(|ctx, a, b| ctx.arith(a, b, |x, y| x / y))?,
            OP_MOD => self.binary(|ctx, a, b| ctx.arith(a, b, |x, y| x % y))?,
            OP_POW => self.binary(|ctx, a, b| ctx.arith(a, b, js_pow))?,
            OP_SHL => self.binary(|ctx, a, b| ctx.int_op(a, b, |x, y| x.wrapping_shl(y)))?,
            OP_SAR => self.binary(|ctx, a, b| ctx.int_op(a, b, |x, y| x.wrapping_shr(y)))?,
            OP_AND => self.binary(|ctx, a, b| ctx.int_op(a, b, |x, y| x & y as i32))?,
            OP_OR => self.binary(|ctx, a, b| ctx.int_op(a, b, |x, y| x | y as i32))?,
            OP_XOR => self.binary(|ctx, a, b| ctx.int_op(a, b, |x, y| x ^ y as i32))?,
            OP_SHR => self.binary(|ctx, a, b| {
                let x = ctx.to_uint32(a)?;
                let y = ctx.to_uint32(b)?;
                ctx.new_uint32(x.wrapping_shr(y))
            })?,

            OP_LT | OP_LTE | OP_GT | OP_GTE => {
                let op = insn.op;
                self.binary(|ctx, a, b| ctx.relational(a, b, op).map(new_bool))?;
            }
            OP_EQ => self.binary(|ctx, a, b| ctx.loose_eq(a, b).map(new_bool))?,
            OP_NEQ => self.binary(|ctx, a, b| ctx.loose_eq(a, b).map(|r| new_bool(!r)))?,
            OP_STRICT_EQ => self.binary(|ctx, a, b| ctx.strict_eq(a, b).map(new_bool))?,
            OP_STRICT_NEQ => self.binary(|ctx, a, b| ctx.strict_eq(a, b).map(|r| new_bool(!r)))?,
            OP_INSTANCEOF => self.binary(|ctx, a, b| ctx.instance_of(a, b).map(new_bool))?,
            OP_IN => self.binary(|ctx, key, obj| {
                if !ctx.is_object(obj) {
                    return Err(ctx.throw_type_error("invalid 'in' operand"));
                }
                let key = ctx.to_property_key(key)?;
                ctx.has_property(obj, key).map(new_bool)
            })?,
            OP_IS_UNDEFINED_OR_NULL => {
                let val = self.stack_peek(0)?;
                self.stack_poke(0, new_bool(val.is_undefined() || val.is_null()))?;
            }

            OP_FOR_IN_START | OP_FOR_OF_START => {
                let obj = self.stack_pop()?;
                let iter = self.for_start(obj, insn.op == OP_FOR_OF_START)?;
                self.stack_push(iter)?;
            }
            OP_FOR_NEXT => {
                let iter = self.stack_peek(0)?;
                match self.for_next(iter)? {
                    Some(val) => self.stack_push(val)?,
                    None => self.jump(arg)?,
                }
            }
            OP_THROW_ERROR => {
                let msg = self.cpool_value(arg)?;
                let msg = self.string_to_rust(msg)?;
                return Err(self.throw_type_error(msg));
            }
            OP_NOP => {}
            _ => return Err(Exception::InvalidBytecode),
        }
        Ok(Step::Next)
    }

    /// Pops two operands and pushes `f(a, b)`.
    fn binary<F>(&mut self, f: F) -> JsResult<()>
    where
        F: FnOnce(&mut Self, JSValue, JSValue) -> JsResult<JSValue>,
    {
        let b = self.stack_pop()?;
        let a = self.stack_pop()?;
        let res = f(self, a, b)?;
        self.stack_push(res)
    }

    fn op_call(&mut self, argc: u32, ctor: bool) -> JsResult<()> {
        let func = self.stack_peek(argc)?;
        let this_val = if ctor { JS_UNDEFINED } else { self.stack_peek(argc + 1)? };
        let args = (0..argc).rev().map(|i| self.stack_peek(i)).collect::<JsResult<Vec<_>>>()?;
        let pop = argc + if ctor { 1 } else { 2 };
        match self.callee(func)? {
            Callee::Closure => self.enter_closure(func, this_val, &args, ctor, pop),
            _ => {
                let res = self.invoke(func, this_val, &args, ctor)?;
                self.stack_drop(pop);
                self.stack_push(res)
            }
        }
    }

    fn add_values(&mut self, a: JSValue, b: JSValue) -> JsResult<JSValue> {
        if let (ValueKind::Int(x), ValueKind::Int(y)) = (a.kind(), b.kind()) {
            return self.new_int64(x as i64 + y as i64);
        }
        let a = self.to_primitive(a, ToPrimitiveHint::Default)?;
        self.keep_alive(a);
        let b = self.to_primitive(b, ToPrimitiveHint::Default)?;
        self.keep_alive(b);
        if self.is_string(a) || self.is_string(b) {
            let a = self.to_string(a)?;
            self.keep_alive(a);
            let b = self.to_string(b)?;
            self.keep_alive(b);
            return self.concat_strings(a, b);
        }
        let x = self.to_number(a)?;
        let y = self.to_number(b)?;
        self.new_float64(x + y)
    }

    fn arith(&mut self, a: JSValue, b: JSValue, f: fn(f64, f64) -> f64) -> JsResult<JSValue> {
        let x = self.to_number(a)?;
        let y = self.to_number(b)?;
        self.new_float64(f(x, y))
    }

    fn int_op(&mut self, a: JSValue, b: JSValue, f: fn(i32, u32) -> i32) -> JsResult<JSValue> {
        let x = self.to_int32(a)?;
        let y = self.to_uint32(b)?;
        self.new_int32(f(x, y))
    }

    fn relational(&mut self, a: JSValue, b: JSValue, op: OpCode) -> JsResult<bool> {
        let a = self.to_primitive(a, ToPrimitiveHint::Number)?;
        self.keep_alive(a);
        let b = self.to_primitive(b, ToPrimitiveHint::Number)?;
        self.keep_alive(b);
        if self.is_string(a) && self.is_string(b) {
            let ord = self.compare_strings(a, b)?;
            return Ok(match op {
                OP_LT => ord.is_lt(),
                OP_LTE => ord.is_le(),
                OP_GT => ord.is_gt(),
                _ => ord.is_ge(),
            });
        }
        let x = self.to_number(a)?;
        let y = self.to_number(b)?;
        Ok(match op {
            OP_LT => x < y,
            OP_LTE => x <= y,
            OP_GT => x > y,
            _ => x >= y,
        })
    }

    /// Closure over `fb`, capturing from the running frame.
    fn new_closure(&mut self, fb: JSValue) -> JsResult<JSValue> {
        let fb_addr = value_to_ptr(fb).ok_or(Exception::InvalidBytecode)?;
        let cvars = value_to_ptr(self.mem.field(fb_addr, FB_CLOSURE_VARS)?);
        let count = match cvars {
            Some(addr) => self.typed_header::<ValueArrayHeader>(addr, MTag::ValueArray)?.size() / 2,
            None => 0,
        };
        let proto = self.class_proto(JSObjectClass::Closure as u8);
        let closure = self.new_object_class(JSObjectClass::Closure as u8, proto, count)?;
        self.set_object_field(closure, CLOSURE_FUNC, fb)?;
        let Some(cvars) = cvars else {
            return Ok(closure);
        };
        for i in 0..count {
            let raw = self.mem.field(cvars, 2 + 2 * i)?.get_int();
            let var_ref = match ClosureVarSource::decode(raw).ok_or(Exception::InvalidBytecode)? {
                ClosureVarSource::Arg(idx) => {
                    let addr = self.frame()?.arg_addr(idx as u32);
                    self.open_var_ref(addr)?
                }
                ClosureVarSource::Local(idx) => {
                    let addr = self.frame()?.local_addr(idx as u32);
                    self.open_var_ref(addr)?
                }
                ClosureVarSource::VarRef(idx) => {
                    let func = self.frame()?.func;
                    self.object_field(func, CLOSURE_VAR_REFS + idx as u32)?
                }
            };
            self.set_object_field(closure, CLOSURE_VAR_REFS + i, var_ref)?;
        }
        Ok(closure)
    }

    /// Attached var ref for the stack slot at `slot`, shared by every
    /// closure capturing it.
    fn open_var_ref(&mut self, slot: u32) -> JsResult<JSValue> {
        let found = self
            .frame()?
            .open_var_refs
            .iter()
            .copied()
            .find(|&vr| self.mem.field(vr, 1).map(|v| v.bits()) == Ok(slot));
        if let Some(vr) = found {
            return Ok(value_from_ptr(vr));
        }
        let vr = self.alloc_block(VarRefHeader::new(false).header(), VARREF_BLOCK_WORDS)?;
        self.mem.set_field(vr, 1, JSValue::from_bits(slot))?;
        self.frame_mut()?.open_var_refs.push(vr);
        Ok(value_from_ptr(vr))
    }

    /// Copies the variable into the var ref, which stops following the
    /// stack slot.
    fn close_var_ref(&mut self, vr: u32) -> JsResult<()> {
        let slot = self.mem.field(vr, 1)?.bits();
        let val = self.mem.read_value(slot)?;
        self.mem.set_field(vr, 1, val)?;
        self.mem.write_u32(vr, VarRefHeader::new(true).header().word())?;
        Ok(())
    }

    /// Detaches the var ref of a slot leaving scope. No-op when nothing
    /// captured it.
    fn close_slot(&mut self, slot: u32) -> JsResult<()> {
        let pos = self
            .frame()?
            .open_var_refs
            .iter()
            .position(|&vr| self.mem.field(vr, 1).map(|v| v.bits()) == Ok(slot));
        if let Some(pos) = pos {
            let vr = self.frame_mut()?.open_var_refs.swap_remove(pos);
            self.close_var_ref(vr)?;
        }
        Ok(())
    }

    /// Address of the value behind var ref `idx` of the running closure.
    fn var_ref_slot(&self, idx: u32) -> JsResult<u32> {
        let func = self.frame()?.func;
        let vr = value_to_ptr(self.object_field(func, CLOSURE_VAR_REFS + idx)?).ok_or(Exception::InvalidBytecode)?;
        if VarRefHeader::from(self.header_at(vr)?).is_detached() {
            Ok(vr + JSW)
        } else {
            Ok(self.mem.field(vr, 1)?.bits())
        }
    }

    /// `ReferenceError` for a binding read or written before its
    /// declaration ran. Names come from the local table (`FB_VARS`) or the
    /// closure variable table (`FB_CLOSURE_VARS`).
    fn uninitialized_error(&mut self, table_field: u32, idx: u32) -> Exception {
        let stride = if table_field == FB_CLOSURE_VARS { 2 } else { 1 };
        let name = self
            .frame()
            .ok()
            .and_then(|f| value_to_ptr(f.fb))
            .and_then(|fb| self.mem.field(fb, table_field).ok())
            .and_then(value_to_ptr)
            .and_then(|table| self.mem.field(table, 1 + stride * idx).ok())
            .and_then(|name| self.string_to_rust(name).ok())
            .unwrap_or_default();
        self.throw_reference_error(format_args!("{name} is not initialized"))
    }

    /// Iterator state: a value array `[index, object, keys]`. `keys` holds
    /// the `for in` key list and is `undefined` for `for of`.
    fn for_start(&mut self, obj: JSValue, is_of: bool) -> JsResult<JSValue> {
        let iter = self.new_value_array(3)?;
        self.mem.set_field(iter, 1, new_short_int(0))?;
        self.mem.set_field(iter, 2, obj)?;
        if is_of {
            let is_typed_array = self
                .get_class_id(obj)
                .is_some_and(|id| JSObjectClass::from_id(id).is_typed_array());
            if !self.is_string(obj) && !self.is_array(obj) && !is_typed_array {
                return Err(self.throw_type_error("value is not iterable"));
            }
        } else {
            let keys = if self.is_object(obj) {
                self.for_in_keys(obj)?
            } else {
                Vec::new()
            };
            let tab = self.new_value_array(keys.len() as u32)?;
            self.mem.set_field(iter, 3, value_from_ptr(tab))?;
            for (i, &key) in keys.iter().enumerate() {
                let key = if key.is_int() { self.to_string(key)? } else { key };
                self.mem.set_field(tab, 1 + i as u32, key)?;
            }
        }
        Ok(value_from_ptr(iter))
    }

    fn for_next(&mut self, iter: JSValue) -> JsResult<Option<JSValue>> {
        let it = value_to_ptr(iter).ok_or(Exception::InvalidBytecode)?;
        let mut idx = self.mem.field(it, 1)?.get_int() as u32;
        let obj = self.mem.field(it, 2)?;
        let next = match value_to_ptr(self.mem.field(it, 3)?) {
            Some(tab) => {
                let len = ValueArrayHeader::from(self.header_at(tab)?).size();
                let mut found = None;
                while idx < len && found.is_none() {
                    let key = self.mem.field(tab, 1 + idx)?;
                    idx += 1;
                    // Keys deleted during the loop are skipped.
                    let prop = self.to_property_key(key)?;
                    if self.has_property(obj, prop)? {
                        found = Some(key);
                    }
                }
                self.mem.set_field(it, 1, new_short_int(idx as i32))?;
                return Ok(found);
            }
            None if self.is_string(obj) => self.string_char_at(obj, idx)?,
            None if self.is_array(obj) => {
                let (tab, len) = self.array_parts(obj)?;
                if idx < len {
                    Some(self.mem.field(tab, 1 + idx)?)
                } else {
                    None
                }
            }
            None => self.typed_array_get(obj, idx)?,
        };
        if next.is_some() {
            self.mem.set_field(it, 1, new_short_int(idx as i32 + 1))?;
        }
        Ok(next)
    }

    /// One `"    at name (file:line:col)"` line per active call, innermost
    /// first.
    pub(crate) fn backtrace(&self) -> String {
        let mut out = String::new();
        for frame in self.frames.iter().rev().take(BACKTRACE_MAX_FRAMES) {
            let line = match value_to_ptr(frame.fb) {
                Some(fb) => self.bytecode_location(fb, frame.insn_pc),
                None => format!("{} (native)", self.native_name(frame.func)),
            };
            out.push_str("    at ");
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    fn bytecode_location(&self, fb: u32, pc: u32) -> String {
        let field_string = |idx| {
            self.mem
                .field(fb, idx)
                .ok()
                .filter(|v| self.is_string(*v))
                .and_then(|v| self.string_to_rust(v).ok())
        };
        let name = field_string(FB_FUNC_NAME).unwrap_or_else(|| "<anonymous>".to_string());
        let file = field_string(FB_FILENAME).unwrap_or_default();
        let has_column = self
            .header_at(fb)
            .map(|h| FunctionBytecodeHeader::from(h).has_column())
            .unwrap_or(false);
        let pos = self
            .mem
            .field(fb, FB_PC2LINE)
            .ok()
            .and_then(value_to_ptr)
            .and_then(|tab| {
                let len = ByteArrayHeader::from(self.header_at(tab).ok()?).size() as usize;
                find_line_col(self.mem.bytes(tab + JSW, len).ok()?, pc)
            });
        match pos {
            Some((line, col)) if has_column => format!("{name} ({file}:{line}:{col})"),
            Some((line, _)) => format!("{name} ({file}:{line})"),
            None => format!("{name} ({file})"),
        }
    }

    fn native_name(&self, func: JSValue) -> &'static str {
        let idx = match func.kind() {
            ValueKind::ShortFunc(idx) => Some(idx),
            _ => self.object_field(func, CFUNC_IDX).ok().map(|v| v.get_int() as u32),
        };
        idx.and_then(|i| self.stdlib.c_function(i))
            .map_or("<native>", |def| def.name)
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::capi_defs::{JSCFunctionDef, JS_EVAL_RETVAL};
    use crate::context::tests::new_context;
    use crate::jsvalue::JS_EXCEPTION;
    use crate::stdlib::StdLibraryDef;
    use core::ffi::c_void;

    fn eval(ctx: &mut JSContext<'_>, src: &str) -> JSValue {
        ctx.eval(src.as_bytes(), "<test>", JS_EVAL_RETVAL).unwrap()
    }

    fn eval_string(ctx: &mut JSContext<'_>, src: &str) -> String {
        let val = eval(ctx, src);
        ctx.to_rust_string(val).unwrap()
    }

    #[test]
    fn arithmetic_and_concatenation() {
        let mut ctx = new_context();
        assert_eq!(eval(&mut ctx, "1 + 2"), new_short_int(3));
        assert_eq!(eval_string(&mut ctx, "'a' + 1 + 2"), "a12");
        assert_eq!(eval_string(&mut ctx, "7 % 3 + 2 ** 10"), "1025");
        assert_eq!(eval_string(&mut ctx, "(-1 >>> 28) + (1 << 4) + (-16 >> 2)"), "27");
        assert_eq!(eval_string(&mut ctx, "1 / 0"), "Infinity");
        assert_eq!(eval_string(&mut ctx, "0.1 + 0.2"), "0.30000000000000004");
        assert_eq!(eval_string(&mut ctx, "'b' < 'ab'"), "false");
        assert_eq!(eval_string(&mut ctx, "typeof 1 + typeof 'x' + typeof null"), "numberstringobject");
    }

    #[test]
    fn closures_share_captured_variables() {
        let mut ctx = new_context();
        let src = "function counter() { var n = 0; \
                   return { inc: function () { return ++n; }, get: function () { return n; } }; } \
                   var c = counter(); c.inc(); c.inc(); c.get()";
        assert_eq!(eval(&mut ctx, src), new_short_int(2));
    }

    #[test]
    fn let_bindings_are_per_iteration() {
        let mut ctx = new_context();
        let src = "var fs = []; for (let i = 0; i < 3; i++) { fs[i] = function () { return i; }; } \
                   fs[0]() * 10 + fs[2]()";
        assert_eq!(eval(&mut ctx, src), new_short_int(2));
    }

    #[test]
    fn exceptions_reach_the_nearest_handler() {
        let mut ctx = new_context();
        let src = "var log = ''; \
                   function f() { try { throw 1; } finally { log += 'f'; } } \
                   try { f(); } catch (e) { log += e; } log";
        assert_eq!(eval_string(&mut ctx, src), "f1");
    }

    #[test]
    fn runtime_errors_have_the_right_class() {
        let mut ctx = new_context();
        let err = ctx.eval(b"var x; x.y", "<test>", 0).unwrap_err();
        assert_eq!(err, Exception::Thrown);
        let exc = ctx.get_exception();
        assert_eq!(ctx.get_class_id(exc), Some(JSObjectClass::TypeError as u8));
        let stack = ctx.get_prop(exc, ctx.roots.atoms.stack).unwrap();
        assert!(ctx.string_to_rust(stack).unwrap().contains("<test>:1"));

        assert!(ctx.eval(b"missing + 1", "<test>", 0).is_err());
        let exc = ctx.get_exception();
        assert_eq!(ctx.get_class_id(exc), Some(JSObjectClass::ReferenceError as u8));
        assert_eq!(ctx.error_to_string(exc).unwrap(), "ReferenceError: missing is not defined");
    }

    #[test]
    fn constructors_and_prototypes() {
        let mut ctx = new_context();
        let src = "function P(x) { this.x = x; } \
                   P.prototype.get = function () { return this.x; }; \
                   var p = new P(5); p.get() + (p instanceof P ? 1 : 0)";
        assert_eq!(eval(&mut ctx, src), new_short_int(6));
    }

    #[test]
    fn accessors_run_on_get_and_set() {
        let mut ctx = new_context();
        let src = "var o = { v: 1, get double() { return this.v * 2; }, \
                   set double(x) { this.v = x / 2; } }; o.double = 10; o.v + o.double";
        assert_eq!(eval(&mut ctx, src), new_short_int(15));
    }

    #[test]
    fn for_in_and_for_of() {
        let mut ctx = new_context();
        let src = "var s = ''; var o = { a: 1, b: 2 }; \
                   for (var k in o) s += k + o[k]; \
                   for (var v of [3, 4]) s += v; \
                   for (var c of 'xy') s += c; s";
        assert_eq!(eval_string(&mut ctx, src), "a1b234xy");
    }

    #[test]
    fn deep_recursion_is_a_range_error() {
        let mut ctx = new_context();
        let src = "function f(n) { return f(n + 1); } var m; \
                   try { f(0); } catch (e) { m = e.message; } m";
        assert_eq!(eval_string(&mut ctx, src), "stack overflow");
        assert_eq!(ctx.call_depth, 0);
    }

    fn always_interrupt(_ctx: &mut JSContext<'_>, _opaque: *mut c_void) -> bool {
        true
    }

    #[test]
    fn interrupts_are_not_catchable() {
        let mut ctx = new_context();
        ctx.set_interrupt_handler(Some(always_interrupt));
        let err = ctx.eval(b"try { for (;;) {} } catch (e) {}", "<test>", 0).unwrap_err();
        assert_eq!(err, Exception::Interrupted);
        assert!(ctx.frames.is_empty());
    }

    fn add(ctx: &mut JSContext<'_>, _this: &mut JSValue, args: &[JSValue]) -> JSValue {
        let res = ctx
            .to_number(args[0])
            .and_then(|a| ctx.to_number(args[1]).map(|b| a + b))
            .and_then(|sum| ctx.new_float64(sum));
        ctx.value_or_exception(res)
    }

    fn fail(ctx: &mut JSContext<'_>, _this: &mut JSValue, _args: &[JSValue]) -> JSValue {
        ctx.throw_range_error("bad argument");
        JS_EXCEPTION
    }

    /// `call(f, x)` calls `f(x)` through the staged call mechanism.
    fn call(ctx: &mut JSContext<'_>, _this: &mut JSValue, args: &[JSValue]) -> JSValue {
        for val in [args[1], args[0], JS_UNDEFINED] {
            if ctx.push_arg(val).is_err() {
                return JS_EXCEPTION;
            }
        }
        ctx.stage_call(1)
    }

    static NATIVES: [JSCFunctionDef; 4] = [
        JSCFunctionDef::new("add", JSCFunctionType::Generic(add), 2),
        JSCFunctionDef::new("fail", JSCFunctionType::Generic(fail), 0),
        JSCFunctionDef::new("call", JSCFunctionType::Generic(call), 2),
        JSCFunctionDef::new("sqrt", JSCFunctionType::FF(f64::sqrt), 1),
    ];

    #[test]
    fn native_functions() {
        let def = StdLibraryDef {
            c_function_table: &NATIVES,
            ..StdLibraryDef::EMPTY
        };
        let mut ctx = JSContext::new_runtime(&def, 64 * 1024).unwrap();
        let global = ctx.global_object();
        for (idx, native) in NATIVES.iter().enumerate() {
            let func = ctx.new_cfunction(idx as u32, JS_UNDEFINED).unwrap();
            let name = ctx.intern(native.name.as_bytes()).unwrap();
            ctx.define_prop(global, name, func).unwrap();
        }
        assert_eq!(eval(&mut ctx, "add(2, 3)"), new_short_int(5));
        assert_eq!(eval(&mut ctx, "sqrt(16)"), new_short_int(4));
        assert_eq!(eval(&mut ctx, "call(function (x) { return x * 2; }, 21)"), new_short_int(42));
        let m = eval_string(&mut ctx, "var m; try { fail(); } catch (e) { m = e.message; } m");
        assert_eq!(m, "bad argument");
        assert!(ctx.eval(b"new add(1, 2)", "<test>", 0).is_err());
        let exc = ctx.get_exception();
        assert_eq!(ctx.get_class_id(exc), Some(JSObjectClass::TypeError as u8));
    }

    #[test]
    fn pushed_calls_pop_their_arguments() {
        let mut ctx = new_context();
        let f = eval(&mut ctx, "(function (a, b) { return a - b; })");
        let sp = ctx.heap.sp();
        for val in [new_short_int(3), new_short_int(10), f, JS_UNDEFINED] {
            ctx.push_arg(val).unwrap();
        }
        assert_eq!(ctx.call_pushed(2).unwrap(), new_short_int(7));
        assert_eq!(ctx.heap.sp(), sp);
    }
}
