//! Integration tests for pocketjs evaluation, rooting and bytecode images.
//!
//! Everything here goes through the `js_*` API and the public context
//! constructors only.

use pocketjs::api::{
    js_add_gc_ref, js_delete_gc_ref, js_eval, js_gc, js_gc_list_ref_slot, js_gc_ref_slot,
    js_get_exception, js_get_exception_str, js_get_global_object, js_get_opaque,
    js_get_property_str, js_get_property_uint32, js_is_bytecode, js_is_exception,
    js_is_function, js_is_number, js_is_object, js_is_string, js_load_bytecode,
    js_new_object_class_user, js_new_string, js_parse, js_pop_gc_ref, js_prepare_bytecode,
    js_print_value_f, js_push_gc_ref, js_relocate_bytecode, js_root_value, js_relocate_bytecode2, js_run,
    js_set_interrupt_handler, js_set_log_func, js_set_opaque, js_set_property_str, js_to_cstring_len,
    js_to_number, js_get_class_id,
};
use pocketjs::bytecode::JS_BYTECODE_HEADER_SIZE;
use pocketjs::jsvalue::new_short_int;
use pocketjs::memory::JS_IMAGE_REGION_BASE;
use pocketjs::stdlib::StdlibValue;
use pocketjs::{
    ContextConfig, GcRefError, JSCFunctionDef, JSCFunctionType, JSCStringBuf, JSContext,
    JSObjectClass, JSValue, StdLibraryDef, StdlibBuilder, JS_CLASS_USER, JS_DUMP_NOQUOTE,
    JS_EVAL_JSON, JS_EVAL_RETVAL, JS_UNDEFINED,
};
use std::cell::{Cell, RefCell};
use std::ffi::c_void;

fn new_context() -> JSContext<'static> {
    JSContext::new_runtime(&StdLibraryDef::EMPTY, 256 * 1024).expect("context init")
}

fn compile_context() -> JSContext<'static> {
    JSContext::new(ContextConfig {
        stdlib: &StdLibraryDef::EMPTY,
        memory_size: 256 * 1024,
        prepare_compilation: true,
    })
    .expect("context init")
}

fn eval(ctx: &mut JSContext<'_>, code: &str) -> JSValue {
    js_eval(ctx, code.as_bytes(), "<test>", JS_EVAL_RETVAL)
}

fn eval_string(ctx: &mut JSContext<'_>, code: &str) -> String {
    let val = eval(ctx, code);
    assert!(!js_is_exception(val), "{}", js_get_exception_str(ctx));
    let mut buf = JSCStringBuf::new();
    let bytes = js_to_cstring_len(ctx, val, &mut buf).expect("string conversion");
    String::from_utf8(bytes.to_vec()).expect("utf-8")
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[test]
fn test_one_plus_two() {
    let mut ctx = new_context();
    let fb = js_parse(&mut ctx, b"1+2", "<test>", JS_EVAL_RETVAL);
    assert!(!js_is_exception(fb));
    let val = js_run(&mut ctx, fb);
    assert_eq!(val, new_short_int(3));
    assert!(val.is_int());
}

#[test]
fn test_member_of_undefined_is_type_error() {
    let mut ctx = new_context();
    let global = js_get_global_object(&ctx);
    assert_eq!(js_set_property_str(&mut ctx, global, "x", JS_UNDEFINED), JS_UNDEFINED);
    let fb = js_parse(&mut ctx, b"x.y", "<test>", 0);
    let val = js_run(&mut ctx, fb);
    assert!(js_is_exception(val));
    let exc = js_get_exception(&mut ctx);
    assert_eq!(js_get_class_id(&ctx, exc), Some(JSObjectClass::TypeError as u8));
}

#[test]
fn test_language_subset() {
    let mut ctx = new_context();
    let src = r#"
        function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); }
        var out = [];
        for (let i = 0; i < 3; i++) out[i] = function () { return i; };
        var obj = { a: 1, get b() { return this.a + 1; } };
        var keys = '';
        for (var k in obj) keys += k;
        var sum = 0;
        for (var v of [1, 2, 3]) sum += v;
        var caught;
        try { throw { code: 7 }; } catch (e) { caught = typeof e + e.code; } finally { sum += 10; }
        fib(10) + ',' + (out[0]() + out[2]()) + ',' + obj.b + ',' + keys + ',' + sum + ',' + caught
    "#;
    assert_eq!(eval_string(&mut ctx, src), "55,2,2,ab,16,object7");
}

#[test]
fn test_json_eval() {
    let mut ctx = new_context();
    let val = js_eval(&mut ctx, br#"{"x": [1, 2.5], "s": "hi"}"#, "<json>", JS_EVAL_JSON);
    assert!(js_is_object(&ctx, val));
    let x = js_get_property_str(&mut ctx, val, "x");
    let second = js_get_property_uint32(&mut ctx, x, 1);
    assert!(js_is_number(&ctx, second));
    assert_eq!(js_to_number(&mut ctx, second), Some(2.5));
    let s = js_get_property_str(&mut ctx, val, "s");
    assert!(js_is_string(&ctx, s));
}

#[test]
fn test_error_backtrace() {
    let mut ctx = new_context();
    let val = eval(&mut ctx, "function inner() { null.x; }\nfunction outer() { inner(); }\nouter();");
    assert!(js_is_exception(val));
    let msg = js_get_exception_str(&mut ctx);
    let lines: Vec<&str> = msg.lines().collect();
    assert_eq!(lines[0], "TypeError: cannot read property 'x' of null");
    assert!(lines[1].starts_with("    at inner (<test>:1"), "{msg}");
    assert!(lines[2].starts_with("    at outer (<test>:2"), "{msg}");
}

#[test]
fn test_stack_overflow_is_range_error() {
    let mut ctx = new_context();
    let val = eval(&mut ctx, "function f(n) { return f(n + 1) + 1; } f(0)");
    assert!(js_is_exception(val));
    let exc = js_get_exception(&mut ctx);
    assert_eq!(js_get_class_id(&ctx, exc), Some(JSObjectClass::RangeError as u8));
    assert_eq!(eval(&mut ctx, "2 * 3"), new_short_int(6));
}

#[test]
fn test_top_level_const_is_read_only() {
    let mut ctx = new_context();
    let val = eval(&mut ctx, "const q = 1; q = 2; q");
    assert!(js_is_exception(val));
    let msg = js_get_exception_str(&mut ctx);
    assert!(msg.starts_with("TypeError: 'q' is read-only"), "{msg}");
    assert_eq!(eval(&mut ctx, "q"), new_short_int(1));
    assert_eq!(eval(&mut ctx, "var r = 1; r = 2; r"), new_short_int(2));
}

#[test]
fn test_deep_nesting_is_a_syntax_error() {
    let mut ctx = new_context();
    for (open, close) in [("(", ")"), ("[", "]"), ("{", "}")] {
        let src = format!("{}1{}", open.repeat(2000), close.repeat(2000));
        let val = eval(&mut ctx, &src);
        assert!(js_is_exception(val), "{open}");
        let msg = js_get_exception_str(&mut ctx);
        assert!(msg.starts_with("SyntaxError: stack overflow"), "{msg}");
    }
    let src = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
    assert!(js_is_exception(eval(&mut ctx, &src)));
    let src = format!("{}7{}", "(".repeat(50), ")".repeat(50));
    assert_eq!(eval(&mut ctx, &src), new_short_int(7));
}

// ---------------------------------------------------------------------------
// Allocation pressure
// ---------------------------------------------------------------------------

fn small_context() -> JSContext<'static> {
    JSContext::new_runtime(&StdLibraryDef::EMPTY, 64 * 1024).expect("context init")
}

#[test]
fn test_long_loops_collect_garbage() {
    let mut ctx = small_context();
    let src = "var s = 0; for (var i = 0; i < 20000; i++) { var t = 'x' + i; s += t.length; } s";
    assert_eq!(eval(&mut ctx, src), new_short_int(108_890));

    let src = "var n = 0; for (var i = 0; i < 20000; i++) { var o = { a: i, b: [i, i] }; n += o.b[1] - o.a + 1; } n";
    assert_eq!(eval(&mut ctx, src), new_short_int(20_000));

    let src = r#"
        function make(i) { return { v: i, s: 'item' + i }; }
        var last;
        for (var i = 0; i < 20000; i++) last = make(i);
        last.s
    "#;
    assert_eq!(eval_string(&mut ctx, src), "item19999");
}

#[test]
fn test_exhausted_arena_is_out_of_memory() {
    let mut ctx = small_context();
    let val = eval(&mut ctx, "function fill() { var a = []; for (var i = 0; ; i++) a[i] = { v: i }; } fill()");
    assert!(js_is_exception(val));
    let msg = js_get_exception_str(&mut ctx);
    assert!(msg.starts_with("InternalError: out of memory"), "{msg}");
    // The array died with the frame.
    js_gc(&mut ctx);
    assert_eq!(eval(&mut ctx, "var k = 0; for (var i = 0; i < 5000; i++) k += ('y' + i).length; k"), new_short_int(23_890));
}

// ---------------------------------------------------------------------------
// Interrupts
// ---------------------------------------------------------------------------

thread_local! {
    static POLLS: Cell<u32> = const { Cell::new(0) };
}

fn stop_after_three_polls(_ctx: &mut JSContext<'_>, _opaque: *mut c_void) -> bool {
    POLLS.with(|p| {
        p.set(p.get() + 1);
        p.get() >= 3
    })
}

#[test]
fn test_interrupt_is_not_catchable() {
    let mut ctx = new_context();
    js_set_interrupt_handler(&mut ctx, Some(stop_after_three_polls));
    let val = eval(&mut ctx, "var n = 0; try { for (;;) n++; } catch (e) { n = -1; } n");
    assert!(js_is_exception(val));
    assert_eq!(js_get_exception_str(&mut ctx), "InternalError: interrupted");
    let global = js_get_global_object(&ctx);
    let n = js_get_property_str(&mut ctx, global, "n");
    assert!(js_to_number(&mut ctx, n).unwrap() > 0.0);

    js_set_interrupt_handler(&mut ctx, None);
    assert_eq!(eval(&mut ctx, "n = 5; n"), new_short_int(5));
}

// ---------------------------------------------------------------------------
// Native functions and user classes
// ---------------------------------------------------------------------------

thread_local! {
    static LOG: RefCell<String> = const { RefCell::new(String::new()) };
    static FINALIZED: Cell<usize> = const { Cell::new(0) };
}

fn capture(_opaque: *mut c_void, buf: &[u8]) {
    LOG.with(|log| log.borrow_mut().push_str(&String::from_utf8_lossy(buf)));
}

fn print(ctx: &mut JSContext<'_>, _this: &mut JSValue, args: &[JSValue]) -> JSValue {
    for &arg in args {
        js_print_value_f(ctx, arg, JS_DUMP_NOQUOTE);
    }
    JS_UNDEFINED
}

fn finalize(_ctx: &mut JSContext<'_>, opaque: *mut c_void) {
    FINALIZED.with(|f| f.set(opaque as usize));
}

static NATIVES: [JSCFunctionDef; 1] = [JSCFunctionDef::new("print", JSCFunctionType::Generic(print), 1)];
static FINALIZERS: [Option<pocketjs::capi_defs::JSCFinalizer>; 1] = [Some(finalize)];

#[test]
fn test_stdlib_globals_and_natives() {
    let mut builder = StdlibBuilder::new();
    builder
        .global("print", StdlibValue::CFunction(0))
        .global("answer", StdlibValue::Int(42));
    let table = builder.build();
    let def = table.def(&NATIVES, &FINALIZERS, JS_CLASS_USER as u32 + 1);
    let mut ctx = JSContext::new_runtime(&def, 256 * 1024).expect("context init");
    js_set_log_func(&mut ctx, Some(capture));

    let global = js_get_global_object(&ctx);
    let print_fn = js_get_property_str(&mut ctx, global, "print");
    assert!(js_is_function(&ctx, print_fn));
    let val = eval(&mut ctx, "print('answer=' + answer); answer");
    assert_eq!(val, new_short_int(42));
    assert_eq!(LOG.with(|log| log.borrow().clone()), "answer=42");

    let obj = js_new_object_class_user(&mut ctx, JS_CLASS_USER);
    assert!(js_set_opaque(&mut ctx, obj, 0x40 as *mut c_void));
    assert_eq!(js_get_opaque(&ctx, obj), 0x40 as *mut c_void);
    js_gc(&mut ctx);
    assert_eq!(FINALIZED.with(|f| f.get()), 0x40);
}

// ---------------------------------------------------------------------------
// GC roots
// ---------------------------------------------------------------------------

#[test]
fn test_gc_ref_stack_discipline() {
    let mut ctx = new_context();
    let refs: Vec<_> = (0..4).map(|_| js_push_gc_ref(&mut ctx)).collect();
    for (i, &r) in refs.iter().enumerate() {
        let s = js_new_string(&mut ctx, &format!("value {i}"));
        *js_gc_ref_slot(&mut ctx, r).unwrap() = s;
    }
    js_gc(&mut ctx);
    assert!(matches!(
        js_pop_gc_ref(&mut ctx, refs[0]),
        Err(GcRefError::OutOfOrder { .. })
    ));
    let mut buf = JSCStringBuf::new();
    for (i, &r) in refs.iter().enumerate().rev() {
        let val = js_pop_gc_ref(&mut ctx, r).unwrap();
        let bytes = js_to_cstring_len(&mut ctx, val, &mut buf).unwrap();
        assert_eq!(bytes, format!("value {i}").as_bytes());
    }
    assert_eq!(js_pop_gc_ref(&mut ctx, refs[0]), Err(GcRefError::StackEmpty));
}

#[test]
fn test_gc_ref_list_any_order() {
    let mut ctx = new_context();
    let a = js_add_gc_ref(&mut ctx);
    let b = js_add_gc_ref(&mut ctx);
    let obj = eval(&mut ctx, "({ tag: 'kept' })");
    *js_gc_list_ref_slot(&mut ctx, b).unwrap() = obj;
    assert_eq!(js_delete_gc_ref(&mut ctx, a), Ok(JS_UNDEFINED));
    for _ in 0..200 {
        eval(&mut ctx, "var g = []; for (var i = 0; i < 3; i++) g[i] = 'garbage' + i; g");
    }
    js_gc(&mut ctx);
    let tag = js_get_property_str(&mut ctx, obj, "tag");
    let mut buf = JSCStringBuf::new();
    assert_eq!(js_to_cstring_len(&mut ctx, tag, &mut buf), Some(&b"kept"[..]));
    assert_eq!(js_delete_gc_ref(&mut ctx, b), Ok(obj));
}

fn rooted_length(ctx: &mut JSContext<'_>, val: JSValue) -> Option<usize> {
    let mut root = js_root_value(ctx, val);
    for _ in 0..50 {
        eval(&mut root, "var g = []; for (var i = 0; i < 20; i++) g[i] = 'garbage' + i; g");
    }
    js_gc(&mut root);
    let kept = root.get();
    let text = js_get_property_str(&mut root, kept, "text");
    if !js_is_string(&root, text) {
        return None;
    }
    let mut buf = JSCStringBuf::new();
    let len = js_to_cstring_len(&mut root, text, &mut buf)?.len();
    Some(len)
}

#[test]
fn test_scoped_root_survives_collection() {
    let mut ctx = new_context();
    let obj = eval(&mut ctx, "({ text: 'rooted' })");
    let outer = js_push_gc_ref(&mut ctx);
    assert_eq!(rooted_length(&mut ctx, obj), Some(6));
    let missing = eval(&mut ctx, "({})");
    assert_eq!(rooted_length(&mut ctx, missing), None);
    // Both guards popped themselves, the early return included.
    assert_eq!(js_pop_gc_ref(&mut ctx, outer), Ok(JS_UNDEFINED));
}

// ---------------------------------------------------------------------------
// Bytecode images
// ---------------------------------------------------------------------------

fn prepare(src: &str) -> Vec<u8> {
    let mut ctx = compile_context();
    let fb = js_parse(&mut ctx, src.as_bytes(), "<image>", JS_EVAL_RETVAL);
    assert!(!js_is_exception(fb), "{}", js_get_exception_str(&mut ctx));
    js_prepare_bytecode(&mut ctx, fb).expect("prepare")
}

#[test]
fn test_relocated_image_runs() {
    let mut image = prepare("40+2");
    assert!(js_is_bytecode(&image));
    let mut ctx = new_context();
    js_relocate_bytecode(&ctx, &mut image).expect("relocate");
    let main = js_load_bytecode(&mut ctx, &image);
    assert!(!js_is_exception(main));
    assert_eq!(js_run(&mut ctx, main), new_short_int(42));
}

#[test]
fn test_image_relocation_round_trip() {
    let original = prepare("function sq(x) { return x * x; } sq(7) + ' squared'");
    let ctx = new_context();
    let mut image = original.clone();
    js_relocate_bytecode2(&ctx, &mut image, JS_IMAGE_REGION_BASE + 0x1000, false).unwrap();
    assert_ne!(image, original);
    js_relocate_bytecode2(&ctx, &mut image, 0, false).unwrap();
    assert_eq!(image[8..], original[8..]);
    assert_eq!(image[..4], original[..4]);
}

#[test]
fn test_is_bytecode_rejects_damaged_headers() {
    let image = prepare("1");
    assert!(js_is_bytecode(&image));
    for len in 0..JS_BYTECODE_HEADER_SIZE {
        assert!(!js_is_bytecode(&image[..len]));
    }
    for byte in 0..4 {
        let mut bad = image.clone();
        bad[byte] ^= 0x5a;
        assert!(!js_is_bytecode(&bad));
    }
}

#[test]
fn test_truncated_image_fails_to_relocate() {
    let image = prepare("var s = 'some text'; s + s");
    let ctx = new_context();
    let mut short = image[..image.len() - 4].to_vec();
    assert!(js_relocate_bytecode(&ctx, &mut short).is_err());
    assert_eq!(short, image[..image.len() - 4]);
}

#[test]
fn test_unrelocated_image_is_rejected() {
    let image = prepare("1");
    let mut ctx = new_context();
    let val = js_load_bytecode(&mut ctx, &image);
    assert!(js_is_exception(val));
    js_get_exception(&mut ctx);
}

#[test]
fn test_images_define_globals() {
    let mut first = prepare("function greet(n) { return 'hello ' + n; }");
    let mut second = prepare("greet('image')");
    let mut ctx = new_context();
    js_relocate_bytecode(&ctx, &mut first).unwrap();
    let main = js_load_bytecode(&mut ctx, &first);
    assert!(!js_is_exception(js_run(&mut ctx, main)));
    js_relocate_bytecode(&ctx, &mut second).unwrap();
    let main = js_load_bytecode(&mut ctx, &second);
    let val = js_run(&mut ctx, main);
    let mut buf = JSCStringBuf::new();
    assert_eq!(js_to_cstring_len(&mut ctx, val, &mut buf), Some(&b"hello image"[..]));
}
