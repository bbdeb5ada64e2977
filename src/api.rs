//! Public API entry points.
//!
//! The `js_*` functions are the embedding surface of the engine. They follow
//! one error convention: operations producing a value return `JS_EXCEPTION`
//! on failure with the error pending in the context (fetch it with
//! [`js_get_exception`]); narrow checks return `bool`, `Option` or a typed
//! `Result` and never carry a value.
//!
//! Values returned by one call stay alive until the next API call made from
//! the host. Root them with the GC ref functions to keep them longer.

use crate::bytecode::{self, BytecodeAtomResolver, BytecodeError};
use crate::capi_defs::{DumpFlags, JSCStringBuf, JSInterruptHandler, JSWriteFunc};
use crate::context::JSContext;
use crate::enums::{JSObjectClass, JS_CLASS_USER};
use crate::exception::{Exception, JsResult};
use crate::gc_ref::{GcListRef, GcRefError, GcRoot, GcStackRef};
use crate::jsvalue::{JSValue, JS_EXCEPTION, JS_UNDEFINED};
use crate::object::USER_OPAQUE_SLOT;
use crate::property::PropKey;
use core::ffi::c_void;
use core::fmt::Display;

/// Starts an API call with `vals` kept alive for its duration.
fn enter(ctx: &mut JSContext<'_>, vals: &[JSValue]) {
    ctx.enter_api();
    for &val in vals {
        ctx.keep_alive(val);
    }
}

fn exception(ctx: &mut JSContext<'_>, err: Exception) -> JSValue {
    ctx.materialize(err);
    JS_EXCEPTION
}

fn status(ctx: &mut JSContext<'_>, res: JsResult<()>) -> JSValue {
    match res {
        Ok(()) => JS_UNDEFINED,
        Err(err) => exception(ctx, err),
    }
}

/// Parses and runs `source`. With `JS_EVAL_RETVAL` the value of the last
/// expression statement is returned, otherwise `undefined`.
pub fn js_eval(ctx: &mut JSContext<'_>, source: &[u8], filename: &str, eval_flags: u32) -> JSValue {
    enter(ctx, &[]);
    let res = ctx.eval(source, filename, eval_flags);
    ctx.value_or_exception(res)
}

/// Compiles `source` without running it. Syntax errors are thrown as
/// `SyntaxError` objects.
pub fn js_parse(ctx: &mut JSContext<'_>, source: &[u8], filename: &str, eval_flags: u32) -> JSValue {
    enter(ctx, &[]);
    let res = ctx.parse(source, filename, eval_flags);
    ctx.value_or_exception(res)
}

/// Runs a value returned by [`js_parse`] or [`js_load_bytecode`].
pub fn js_run(ctx: &mut JSContext<'_>, val: JSValue) -> JSValue {
    enter(ctx, &[val]);
    let res = ctx.run(val);
    ctx.value_or_exception(res)
}

/// Pushes a value for [`js_call`]: the arguments last to first, then the
/// function, then `this`. Returns `false` with a pending `RangeError` when
/// the stack is full; [`js_stack_check`] beforehand avoids that.
pub fn js_push_arg(ctx: &mut JSContext<'_>, val: JSValue) -> bool {
    match ctx.push_arg(val) {
        Ok(()) => true,
        Err(err) => {
            ctx.materialize(err);
            false
        }
    }
}

/// Calls the function set up with [`js_push_arg`]. The argument count is in
/// the low 16 bits of `call_flags`; `FRAME_CF_CTOR` makes it a `new` call.
pub fn js_call(ctx: &mut JSContext<'_>, call_flags: u32) -> JSValue {
    ctx.enter_api();
    let res = ctx.call_pushed(call_flags);
    ctx.value_or_exception(res)
}

/// Calls `func` with an argument slice.
pub fn js_call_function(ctx: &mut JSContext<'_>, func: JSValue, this_val: JSValue, args: &[JSValue]) -> JSValue {
    enter(ctx, &[func, this_val]);
    for &arg in args {
        ctx.keep_alive(arg);
    }
    let res = ctx.call_function(func, this_val, args);
    ctx.value_or_exception(res)
}

/// True when `len` more stack slots and one more nested call are
/// available. Otherwise a `RangeError` is pending.
pub fn js_stack_check(ctx: &mut JSContext<'_>, len: u32) -> bool {
    ctx.stack_check(len)
}

pub fn js_gc(ctx: &mut JSContext<'_>) {
    ctx.enter_api();
    ctx.gc();
}

/// Makes `val` the pending exception.
pub fn js_throw(ctx: &mut JSContext<'_>, val: JSValue) -> JSValue {
    let err = ctx.throw(val);
    exception(ctx, err)
}

/// Throws a new error of `class`. Classes that are not error classes throw
/// a plain `Error`.
pub fn js_throw_error(ctx: &mut JSContext<'_>, class: JSObjectClass, message: impl Display) -> JSValue {
    let class = if class.is_error() { class } else { JSObjectClass::Error };
    let err = ctx.throw_error(class, message);
    exception(ctx, err)
}

pub fn js_throw_type_error(ctx: &mut JSContext<'_>, message: impl Display) -> JSValue {
    js_throw_error(ctx, JSObjectClass::TypeError, message)
}

pub fn js_throw_range_error(ctx: &mut JSContext<'_>, message: impl Display) -> JSValue {
    js_throw_error(ctx, JSObjectClass::RangeError, message)
}

pub fn js_throw_reference_error(ctx: &mut JSContext<'_>, message: impl Display) -> JSValue {
    js_throw_error(ctx, JSObjectClass::ReferenceError, message)
}

pub fn js_throw_syntax_error(ctx: &mut JSContext<'_>, message: impl Display) -> JSValue {
    js_throw_error(ctx, JSObjectClass::SyntaxError, message)
}

pub fn js_throw_internal_error(ctx: &mut JSContext<'_>, message: impl Display) -> JSValue {
    js_throw_error(ctx, JSObjectClass::InternalError, message)
}

/// Throws the preallocated out-of-memory error without allocating.
pub fn js_throw_out_of_memory(ctx: &mut JSContext<'_>) -> JSValue {
    let err = ctx.throw_out_of_memory();
    exception(ctx, err)
}

/// Returns and clears the pending exception, `undefined` if there is none.
pub fn js_get_exception(ctx: &mut JSContext<'_>) -> JSValue {
    ctx.get_exception()
}

/// Takes the pending exception and formats it as `Name: message` followed
/// by its backtrace.
pub fn js_get_exception_str(ctx: &mut JSContext<'_>) -> String {
    let exc = ctx.get_exception();
    enter(ctx, &[exc]);
    let mut out = match ctx.error_to_string(exc) {
        Ok(s) => s,
        Err(_) => {
            ctx.get_exception();
            String::from("[exception]")
        }
    };
    if ctx.is_error(exc) {
        let stack = ctx.get_prop(exc, ctx.roots.atoms.stack);
        match stack {
            Ok(stack) if ctx.is_string(stack) => {
                if let Ok(stack) = ctx.string_to_rust(stack) {
                    out.push('\n');
                    out.push_str(stack.trim_end_matches('\n'));
                }
            }
            Ok(_) => {}
            Err(_) => {
                ctx.get_exception();
            }
        }
    }
    out
}

pub fn js_get_global_object(ctx: &JSContext<'_>) -> JSValue {
    ctx.global_object()
}

fn name_key(ctx: &mut JSContext<'_>, name: &str) -> JsResult<PropKey> {
    let atom = ctx.intern(name.as_bytes())?;
    ctx.to_property_key(atom)
}

/// `obj[name]`. Names that are array indices address elements.
pub fn js_get_property_str(ctx: &mut JSContext<'_>, obj: JSValue, name: &str) -> JSValue {
    enter(ctx, &[obj]);
    let res = name_key(ctx, name).and_then(|key| ctx.get_property(obj, key));
    ctx.value_or_exception(res)
}

/// `obj[name] = val`. Returns `undefined` or `JS_EXCEPTION`.
pub fn js_set_property_str(ctx: &mut JSContext<'_>, obj: JSValue, name: &str, val: JSValue) -> JSValue {
    enter(ctx, &[obj, val]);
    let res = name_key(ctx, name).and_then(|key| ctx.set_property(obj, key, val));
    status(ctx, res)
}

pub fn js_get_property_uint32(ctx: &mut JSContext<'_>, obj: JSValue, idx: u32) -> JSValue {
    enter(ctx, &[obj]);
    let res = ctx.get_property(obj, PropKey::Index(idx));
    ctx.value_or_exception(res)
}

/// `obj[idx] = val`. Returns `undefined` or `JS_EXCEPTION`.
pub fn js_set_property_uint32(ctx: &mut JSContext<'_>, obj: JSValue, idx: u32, val: JSValue) -> JSValue {
    enter(ctx, &[obj, val]);
    let res = ctx.set_property(obj, PropKey::Index(idx), val);
    status(ctx, res)
}

pub fn js_new_object(ctx: &mut JSContext<'_>) -> JSValue {
    enter(ctx, &[]);
    let res = ctx.new_object();
    ctx.value_or_exception(res)
}

/// Array of `len` `undefined` elements.
pub fn js_new_array(ctx: &mut JSContext<'_>, len: u32) -> JSValue {
    enter(ctx, &[]);
    let res = ctx.new_array(&vec![JS_UNDEFINED; len as usize]);
    ctx.value_or_exception(res)
}

/// Object of the embedder class `class_id` with a null opaque pointer.
pub fn js_new_object_class_user(ctx: &mut JSContext<'_>, class_id: u8) -> JSValue {
    enter(ctx, &[]);
    let res = ctx.new_object_user(class_id, core::ptr::null_mut());
    ctx.value_or_exception(res)
}

/// Function object calling entry `func_idx` of the C function table with
/// `params` as its closure data.
pub fn js_new_cfunction_params(ctx: &mut JSContext<'_>, func_idx: u32, params: JSValue) -> JSValue {
    enter(ctx, &[params]);
    let res = ctx.new_cfunction(func_idx, params);
    ctx.value_or_exception(res)
}

pub fn js_new_string(ctx: &mut JSContext<'_>, s: &str) -> JSValue {
    js_new_string_len(ctx, s.as_bytes())
}

/// String from WTF-8 bytes.
pub fn js_new_string_len(ctx: &mut JSContext<'_>, bytes: &[u8]) -> JSValue {
    enter(ctx, &[]);
    let res = ctx.new_string(bytes);
    ctx.value_or_exception(res)
}

pub fn js_new_int32(ctx: &mut JSContext<'_>, v: i32) -> JSValue {
    enter(ctx, &[]);
    let res = ctx.new_int32(v);
    ctx.value_or_exception(res)
}

pub fn js_new_uint32(ctx: &mut JSContext<'_>, v: u32) -> JSValue {
    enter(ctx, &[]);
    let res = ctx.new_uint32(v);
    ctx.value_or_exception(res)
}

pub fn js_new_int64(ctx: &mut JSContext<'_>, v: i64) -> JSValue {
    enter(ctx, &[]);
    let res = ctx.new_int64(v);
    ctx.value_or_exception(res)
}

pub fn js_new_float64(ctx: &mut JSContext<'_>, d: f64) -> JSValue {
    enter(ctx, &[]);
    let res = ctx.new_float64(d);
    ctx.value_or_exception(res)
}

/// Runs a numeric conversion; `None` means an exception is pending.
fn convert<T>(
    ctx: &mut JSContext<'_>,
    val: JSValue,
    f: impl FnOnce(&mut JSContext<'_>, JSValue) -> JsResult<T>,
) -> Option<T> {
    enter(ctx, &[val]);
    match f(ctx, val) {
        Ok(v) => Some(v),
        Err(err) => {
            ctx.materialize(err);
            None
        }
    }
}

pub fn js_to_number(ctx: &mut JSContext<'_>, val: JSValue) -> Option<f64> {
    convert(ctx, val, |ctx, v| ctx.to_number(v))
}

pub fn js_to_int32(ctx: &mut JSContext<'_>, val: JSValue) -> Option<i32> {
    convert(ctx, val, |ctx, v| ctx.to_int32(v))
}

pub fn js_to_uint32(ctx: &mut JSContext<'_>, val: JSValue) -> Option<u32> {
    convert(ctx, val, |ctx, v| ctx.to_uint32(v))
}

/// Like [`js_to_int32`] but clamps out-of-range numbers; NaN gives 0.
pub fn js_to_int32_sat(ctx: &mut JSContext<'_>, val: JSValue) -> Option<i32> {
    convert(ctx, val, |ctx, v| ctx.to_int32_sat(v))
}

pub fn js_to_string(ctx: &mut JSContext<'_>, val: JSValue) -> JSValue {
    enter(ctx, &[val]);
    let res = ctx.to_string(val);
    ctx.value_or_exception(res)
}

/// String conversion into `buf`, NUL terminator included. The slice is
/// valid until `buf` is reused.
pub fn js_to_cstring<'b>(ctx: &mut JSContext<'_>, val: JSValue, buf: &'b mut JSCStringBuf) -> Option<&'b [u8]> {
    js_to_cstring_len(ctx, val, buf)?;
    Some(buf.as_bytes_with_nul())
}

/// String conversion into `buf`, without the NUL terminator.
pub fn js_to_cstring_len<'b>(
    ctx: &mut JSContext<'_>,
    val: JSValue,
    buf: &'b mut JSCStringBuf,
) -> Option<&'b [u8]> {
    let s = convert(ctx, val, |ctx, v| ctx.to_string(v))?;
    match ctx.string_bytes(s) {
        Ok(bytes) => Some(buf.fill(&bytes)),
        Err(err) => {
            ctx.materialize(err);
            None
        }
    }
}

pub fn js_is_undefined(val: JSValue) -> bool {
    val.is_undefined()
}

pub fn js_is_null(val: JSValue) -> bool {
    val.is_null()
}

pub fn js_is_bool(val: JSValue) -> bool {
    val.is_bool()
}

pub fn js_is_exception(val: JSValue) -> bool {
    val.is_exception()
}

/// Short ints and boxed floats.
pub fn js_is_number(ctx: &JSContext<'_>, val: JSValue) -> bool {
    ctx.is_number(val)
}

pub fn js_is_string(ctx: &JSContext<'_>, val: JSValue) -> bool {
    ctx.is_string(val)
}

pub fn js_is_object(ctx: &JSContext<'_>, val: JSValue) -> bool {
    ctx.is_object(val)
}

pub fn js_is_function(ctx: &JSContext<'_>, val: JSValue) -> bool {
    ctx.is_function(val)
}

pub fn js_is_error(ctx: &JSContext<'_>, val: JSValue) -> bool {
    ctx.is_error(val)
}

/// Class id of an object, `None` for other values.
pub fn js_get_class_id(ctx: &JSContext<'_>, val: JSValue) -> Option<u8> {
    ctx.get_class_id(val)
}

fn user_opaque_slot(ctx: &JSContext<'_>, val: JSValue) -> Option<u32> {
    if ctx.get_class_id(val)? < JS_CLASS_USER {
        return None;
    }
    let slot = ctx.object_field(val, USER_OPAQUE_SLOT).ok()?;
    (slot.is_int() && slot.get_int() >= 0).then(|| slot.get_int() as u32)
}

/// Stores the native pointer of a user class object. Returns `false` for
/// other values.
pub fn js_set_opaque(ctx: &mut JSContext<'_>, val: JSValue, opaque: *mut c_void) -> bool {
    match user_opaque_slot(ctx, val) {
        Some(slot) => {
            ctx.set_opaque_slot(slot, opaque);
            true
        }
        None => false,
    }
}

/// Native pointer of a user class object, null for other values.
pub fn js_get_opaque(ctx: &JSContext<'_>, val: JSValue) -> *mut c_void {
    user_opaque_slot(ctx, val)
        .and_then(|slot| ctx.opaque_slot(slot))
        .unwrap_or(core::ptr::null_mut())
}

/// Roots a new `undefined` slot with stack discipline.
pub fn js_push_gc_ref(ctx: &mut JSContext<'_>) -> GcStackRef {
    ctx.gc_refs.push_gc_ref()
}

/// Unroots the most recent [`js_push_gc_ref`] slot and returns its value.
/// Any other handle is rejected and nothing is popped.
pub fn js_pop_gc_ref(ctx: &mut JSContext<'_>, reference: GcStackRef) -> Result<JSValue, GcRefError> {
    ctx.gc_refs.pop_gc_ref(reference)
}

/// The rooted slot behind a stack handle, for in-place updates.
pub fn js_gc_ref_slot<'c>(ctx: &'c mut JSContext<'_>, reference: GcStackRef) -> Result<&'c mut JSValue, GcRefError> {
    ctx.gc_refs.stack_slot_mut(reference)
}

/// Scoped form of [`js_push_gc_ref`]: `val` stays rooted until the guard is
/// dropped, including on early returns. The guard dereferences to the
/// context.
pub fn js_root_value<'c, 'a>(ctx: &'c mut JSContext<'a>, val: JSValue) -> GcRoot<'c, 'a> {
    ctx.root(val)
}

/// Roots a new `undefined` slot that can be released in any order.
pub fn js_add_gc_ref(ctx: &mut JSContext<'_>) -> GcListRef {
    ctx.gc_refs.add_gc_ref()
}

pub fn js_delete_gc_ref(ctx: &mut JSContext<'_>, reference: GcListRef) -> Result<JSValue, GcRefError> {
    ctx.gc_refs.delete_gc_ref(reference)
}

pub fn js_gc_list_ref_slot<'c>(
    ctx: &'c mut JSContext<'_>,
    reference: GcListRef,
) -> Result<&'c mut JSValue, GcRefError> {
    ctx.gc_refs.list_slot_mut(reference)
}

/// True if `buf` starts with a bytecode header of this engine's version.
pub fn js_is_bytecode(buf: &[u8]) -> bool {
    bytecode::is_bytecode(buf)
}

/// Serializes the compiled unit `val` into a relocatable image. Needs a
/// context created with `prepare_compilation`.
pub fn js_prepare_bytecode(ctx: &mut JSContext<'_>, val: JSValue) -> Result<Vec<u8>, BytecodeError> {
    enter(ctx, &[val]);
    ctx.prepare_bytecode(val)
}

/// Relocates `buf` in place for the next [`js_load_bytecode`] on `ctx`.
pub fn js_relocate_bytecode(ctx: &JSContext<'_>, buf: &mut [u8]) -> Result<(), BytecodeError> {
    ctx.relocate_bytecode(buf)
}

/// Relocates `buf` to `new_base`. With `update_atoms` the image's unique
/// strings are redirected to equal atoms `ctx` already has in ROM.
pub fn js_relocate_bytecode2(
    ctx: &JSContext<'_>,
    buf: &mut [u8],
    new_base: u32,
    update_atoms: bool,
) -> Result<(), BytecodeError> {
    let resolver = update_atoms.then_some(ctx as &dyn BytecodeAtomResolver);
    bytecode::relocate_bytecode(buf, new_base, resolver)
}

/// Maps a relocated image without copying it and returns its main
/// function, to be run with [`js_run`].
pub fn js_load_bytecode<'a>(ctx: &mut JSContext<'a>, buf: &'a [u8]) -> JSValue {
    enter(ctx, &[]);
    let res = ctx.load_bytecode(buf);
    ctx.value_or_exception(res)
}

pub fn js_set_log_func(ctx: &mut JSContext<'_>, write_func: Option<JSWriteFunc>) {
    ctx.set_log_func(write_func);
}

/// Installs the function polled by the interpreter; returning `true` from
/// it aborts the running script with an uncatchable error.
pub fn js_set_interrupt_handler(ctx: &mut JSContext<'_>, handler: Option<JSInterruptHandler>) {
    ctx.set_interrupt_handler(handler);
}

pub fn js_set_random_seed(ctx: &mut JSContext<'_>, seed: u64) {
    ctx.set_random_seed(seed);
}

/// Next value in `[0, 1)` of the context's generator.
pub fn js_random(ctx: &mut JSContext<'_>) -> f64 {
    ctx.random()
}

/// Pointer passed to the log, interrupt and finalizer callbacks.
pub fn js_set_context_opaque(ctx: &mut JSContext<'_>, opaque: *mut c_void) {
    ctx.set_opaque(opaque);
}

pub fn js_get_context_opaque(ctx: &JSContext<'_>) -> *mut c_void {
    ctx.opaque()
}

pub fn js_print_value(ctx: &mut JSContext<'_>, val: JSValue) {
    js_print_value_f(ctx, val, 0);
}

/// Prints with `JS_DUMP_LONG`/`JS_DUMP_NOQUOTE` flags.
pub fn js_print_value_f(ctx: &mut JSContext<'_>, val: JSValue, flags: u32) {
    ctx.print_value(val, DumpFlags::from_bits_truncate(flags));
}

pub fn js_dump_value(ctx: &mut JSContext<'_>, label: &str, val: JSValue) {
    js_dump_value_f(ctx, label, val, 0);
}

pub fn js_dump_value_f(ctx: &mut JSContext<'_>, label: &str, val: JSValue, flags: u32) {
    ctx.dump_value(label, val, DumpFlags::from_bits_truncate(flags));
}

/// Arena usage, per block tag with `is_long`.
pub fn js_dump_memory(ctx: &JSContext<'_>, is_long: bool) {
    ctx.dump_memory(is_long);
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::capi_defs::{FRAME_CF_CTOR, JS_DUMP_LONG, JS_DUMP_NOQUOTE, JS_EVAL_RETVAL};
    use crate::context::tests::new_context;
    use crate::jsvalue::{new_short_int, JS_NULL, JS_SHORTINT_MAX, JS_TRUE};
    use crate::stdlib::StdLibraryDef;
    use std::cell::RefCell;

    static USER_DEF: StdLibraryDef<'static> = StdLibraryDef {
        class_count: JS_CLASS_USER as u32 + 1,
        ..StdLibraryDef::EMPTY
    };

    thread_local! {
        static LOG: RefCell<String> = const { RefCell::new(String::new()) };
    }

    fn capture(_opaque: *mut c_void, buf: &[u8]) {
        LOG.with(|log| log.borrow_mut().push_str(&String::from_utf8_lossy(buf)));
    }

    fn take_log() -> String {
        LOG.with(|log| core::mem::take(&mut *log.borrow_mut()))
    }

    #[test]
    fn eval_returns_values_and_exceptions() {
        let mut ctx = new_context();
        let val = js_eval(&mut ctx, b"1 + 2", "<test>", JS_EVAL_RETVAL);
        assert_eq!(val, new_short_int(3));
        assert_eq!(js_eval(&mut ctx, b"1 + 2", "<test>", 0), JS_UNDEFINED);

        let val = js_eval(&mut ctx, b"var x; x.y", "<test>", 0);
        assert!(js_is_exception(val));
        let exc = js_get_exception(&mut ctx);
        assert_eq!(js_get_class_id(&ctx, exc), Some(JSObjectClass::TypeError as u8));
        assert_eq!(js_get_exception(&mut ctx), JS_UNDEFINED);
    }

    #[test]
    fn parse_then_run() {
        let mut ctx = new_context();
        let fb = js_parse(&mut ctx, b"var n = 20; n * 2 + 2", "<test>", JS_EVAL_RETVAL);
        assert!(!js_is_exception(fb));
        let global = js_get_global_object(&ctx);
        assert_eq!(js_get_property_str(&mut ctx, global, "n"), JS_UNDEFINED);
        assert_eq!(js_run(&mut ctx, fb), new_short_int(42));
        assert_eq!(js_get_property_str(&mut ctx, global, "n"), new_short_int(20));

        let bad = js_parse(&mut ctx, b"var = 1", "bad.js", 0);
        assert!(js_is_exception(bad));
        let msg = js_get_exception_str(&mut ctx);
        assert!(msg.starts_with("SyntaxError"), "{msg}");
        assert!(msg.contains("bad.js:1:"), "{msg}");
    }

    #[test]
    fn property_round_trip_keeps_every_value_class() {
        let mut ctx = new_context();
        let obj = js_new_object(&mut ctx);
        let s = js_new_string(&mut ctx, "str");
        let f = js_new_float64(&mut ctx, 1.5);
        for val in [new_short_int(7), JS_NULL, JS_TRUE, JS_UNDEFINED, JS_EXCEPTION, s, f, obj] {
            assert_eq!(js_set_property_str(&mut ctx, obj, "k", val), JS_UNDEFINED);
            assert_eq!(js_get_property_str(&mut ctx, obj, "k"), val);
        }
        assert_eq!(js_get_exception(&mut ctx), JS_UNDEFINED);
    }

    #[test]
    fn indexed_properties() {
        let mut ctx = new_context();
        let arr = js_new_array(&mut ctx, 2);
        assert_eq!(js_get_property_uint32(&mut ctx, arr, 1), JS_UNDEFINED);
        assert_eq!(js_set_property_uint32(&mut ctx, arr, 2, new_short_int(5)), JS_UNDEFINED);
        assert_eq!(js_get_property_str(&mut ctx, arr, "length"), new_short_int(3));
        assert_eq!(js_get_property_str(&mut ctx, arr, "2"), new_short_int(5));

        let res = js_set_property_uint32(&mut ctx, JS_UNDEFINED, 0, JS_NULL);
        assert!(js_is_exception(res));
        let exc = js_get_exception(&mut ctx);
        assert!(js_is_error(&ctx, exc));
    }

    #[test]
    fn numbers_and_conversions() {
        let mut ctx = new_context();
        let big = js_new_float64(&mut ctx, 1e300);
        assert!(js_is_number(&ctx, big));
        assert_eq!(js_to_int32_sat(&mut ctx, big), Some(i32::MAX));
        let neg = js_new_float64(&mut ctx, -1e300);
        assert_eq!(js_to_int32_sat(&mut ctx, neg), Some(i32::MIN));
        let max = js_new_int32(&mut ctx, JS_SHORTINT_MAX + 1);
        assert_eq!(js_to_number(&mut ctx, max), Some((JS_SHORTINT_MAX + 1) as f64));
        let u = js_new_uint32(&mut ctx, u32::MAX);
        assert_eq!(js_to_uint32(&mut ctx, u), Some(u32::MAX));
        assert_eq!(js_to_int32(&mut ctx, u), Some(-1));
        let l = js_new_int64(&mut ctx, 1 << 40);
        assert_eq!(js_to_number(&mut ctx, l), Some((1u64 << 40) as f64));

        let s = js_new_string(&mut ctx, " 12 ");
        assert_eq!(js_to_int32(&mut ctx, s), Some(12));
    }

    #[test]
    fn cstring_conversion_uses_the_scratch_buffer() {
        let mut ctx = new_context();
        let mut buf = JSCStringBuf::new();
        let d = js_new_float64(&mut ctx, 0.25);
        assert_eq!(js_to_cstring_len(&mut ctx, d, &mut buf), Some(&b"0.25"[..]));
        assert_eq!(js_to_cstring(&mut ctx, JS_TRUE, &mut buf), Some(&b"true\0"[..]));
        let s = js_new_string_len(&mut ctx, "h\u{e9}".as_bytes());
        assert_eq!(js_to_cstring_len(&mut ctx, s, &mut buf), Some("h\u{e9}".as_bytes()));
    }

    #[test]
    fn user_objects_carry_opaque_pointers() {
        let mut ctx = JSContext::new_runtime(&USER_DEF, 64 * 1024).unwrap();
        let obj = js_new_object_class_user(&mut ctx, JS_CLASS_USER);
        assert_eq!(js_get_class_id(&ctx, obj), Some(JS_CLASS_USER));
        assert!(js_get_opaque(&ctx, obj).is_null());
        let mut data = 5u32;
        let ptr = &mut data as *mut u32 as *mut c_void;
        assert!(js_set_opaque(&mut ctx, obj, ptr));
        assert_eq!(js_get_opaque(&ctx, obj), ptr);

        let plain = js_new_object(&mut ctx);
        assert!(!js_set_opaque(&mut ctx, plain, ptr));
        assert!(js_get_opaque(&ctx, plain).is_null());

        let bad = js_new_object_class_user(&mut ctx, JS_CLASS_USER + 1);
        assert!(js_is_exception(bad));
        js_get_exception(&mut ctx);
    }

    #[test]
    fn gc_ref_stack_pops_in_order() {
        let mut ctx = new_context();
        let a = js_push_gc_ref(&mut ctx);
        let b = js_push_gc_ref(&mut ctx);
        *js_gc_ref_slot(&mut ctx, b).unwrap() = new_short_int(2);
        assert_eq!(
            js_pop_gc_ref(&mut ctx, a),
            Err(GcRefError::OutOfOrder { top: 1, got: 0 })
        );
        assert_eq!(js_pop_gc_ref(&mut ctx, b), Ok(new_short_int(2)));
        assert_eq!(js_pop_gc_ref(&mut ctx, a), Ok(JS_UNDEFINED));
        assert_eq!(js_pop_gc_ref(&mut ctx, a), Err(GcRefError::StackEmpty));
    }

    #[test]
    fn rooted_objects_survive_collection() {
        let mut ctx = new_context();
        let root = js_add_gc_ref(&mut ctx);
        let obj = js_new_object(&mut ctx);
        *js_gc_list_ref_slot(&mut ctx, root).unwrap() = obj;
        let val = js_new_string(&mut ctx, "kept");
        assert_eq!(js_set_property_str(&mut ctx, obj, "s", val), JS_UNDEFINED);
        js_gc(&mut ctx);
        let s = js_get_property_str(&mut ctx, obj, "s");
        let mut buf = JSCStringBuf::new();
        assert_eq!(js_to_cstring_len(&mut ctx, s, &mut buf), Some(&b"kept"[..]));
        assert_eq!(js_delete_gc_ref(&mut ctx, root), Ok(obj));
        assert_eq!(js_delete_gc_ref(&mut ctx, root), Err(GcRefError::StaleHandle));
    }

    #[test]
    fn pushed_calls() {
        let mut ctx = new_context();
        let f = js_eval(&mut ctx, b"(function (a, b) { return a - b; })", "<test>", JS_EVAL_RETVAL);
        assert!(js_stack_check(&mut ctx, 4));
        for val in [new_short_int(3), new_short_int(10), f, JS_UNDEFINED] {
            assert!(js_push_arg(&mut ctx, val));
        }
        assert_eq!(js_call(&mut ctx, 2), new_short_int(7));

        let ctor = js_eval(&mut ctx, b"(function (v) { this.v = v; })", "<test>", JS_EVAL_RETVAL);
        for val in [new_short_int(1), ctor, JS_UNDEFINED] {
            assert!(js_push_arg(&mut ctx, val));
        }
        let obj = js_call(&mut ctx, 1 | FRAME_CF_CTOR);
        assert_eq!(js_get_property_str(&mut ctx, obj, "v"), new_short_int(1));

        let res = js_call_function(&mut ctx, new_short_int(1), JS_UNDEFINED, &[]);
        assert!(js_is_exception(res));
        assert!(js_get_exception_str(&mut ctx).starts_with("TypeError"));
    }

    #[test]
    fn throw_helpers_set_the_pending_exception() {
        let mut ctx = new_context();
        assert_eq!(js_throw_range_error(&mut ctx, format_args!("bad {}", 1)), JS_EXCEPTION);
        assert_eq!(js_get_exception_str(&mut ctx), "RangeError: bad 1");
        assert_eq!(js_throw(&mut ctx, new_short_int(3)), JS_EXCEPTION);
        assert_eq!(js_get_exception(&mut ctx), new_short_int(3));
        js_throw_error(&mut ctx, JSObjectClass::Array, "not an error class");
        let exc = js_get_exception(&mut ctx);
        assert_eq!(js_get_class_id(&ctx, exc), Some(JSObjectClass::Error as u8));
        assert_eq!(js_throw_out_of_memory(&mut ctx), JS_EXCEPTION);
        assert_eq!(js_get_exception_str(&mut ctx), "InternalError: out of memory");
    }

    #[test]
    fn context_settings() {
        let mut ctx = new_context();
        let mut tag = 0u8;
        let ptr = &mut tag as *mut u8 as *mut c_void;
        js_set_context_opaque(&mut ctx, ptr);
        assert_eq!(js_get_context_opaque(&ctx), ptr);

        js_set_random_seed(&mut ctx, 7);
        let first = [js_random(&mut ctx), js_random(&mut ctx)];
        js_set_random_seed(&mut ctx, 7);
        assert_eq!(first, [js_random(&mut ctx), js_random(&mut ctx)]);
        assert!(first.iter().all(|r| (0.0..1.0).contains(r)));
    }

    #[test]
    fn printing_goes_to_the_log_function() {
        let mut ctx = new_context();
        js_set_log_func(&mut ctx, Some(capture));
        take_log();
        let s = js_new_string(&mut ctx, "hi");
        js_print_value(&mut ctx, s);
        js_print_value_f(&mut ctx, s, JS_DUMP_NOQUOTE);
        assert_eq!(take_log(), "\"hi\"hi");
        let arr = js_eval(&mut ctx, b"[1, [2]]", "<test>", JS_EVAL_RETVAL);
        js_dump_value_f(&mut ctx, "arr", arr, JS_DUMP_LONG);
        assert_eq!(take_log(), "arr: [ 1, [ 2 ] ]\n");
        js_dump_value(&mut ctx, "arr", arr);
        assert_eq!(take_log(), "arr: [Array]\n");
        js_dump_memory(&ctx, false);
        assert!(take_log().starts_with("heap size="));
    }
}
