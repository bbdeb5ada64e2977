//! A small embeddable JavaScript engine.
//!
//! Values are 32-bit tagged words living in a fixed arena owned by a
//! [`JSContext`]. Scripts are compiled to bytecode and run by a stack
//! interpreter; compiled units can be serialized into relocatable images
//! and mapped back without copying. The [`api`] module holds the `js_*`
//! embedding functions.
//!
//! ```no_run
//! use pocketjs::api::{js_eval, js_to_int32};
//! use pocketjs::{JSContext, StdLibraryDef, JS_EVAL_RETVAL};
//!
//! let mut ctx = JSContext::new_runtime(&StdLibraryDef::EMPTY, 64 * 1024).unwrap();
//! let val = js_eval(&mut ctx, b"1 + 2", "<eval>", JS_EVAL_RETVAL);
//! assert_eq!(js_to_int32(&mut ctx, val), Some(3));
//! ```

pub mod api;
pub mod atom;
pub mod bytecode;
pub mod capi_defs;
pub mod containers;
pub mod context;
pub mod conversion;
pub mod cutils;
pub mod dtoa;
pub mod enums;
pub mod exception;
pub mod function_bytecode;
pub mod gc;
pub mod gc_ref;
pub mod heap;
pub mod interpreter;
pub mod jsvalue;
pub mod memblock;
pub mod memory;
pub mod object;
pub mod opcode;
pub mod parser;
pub mod print;
pub mod property;
pub mod stdlib;
pub mod string;
pub mod typed_array;

pub use bytecode::{BytecodeError, BytecodeHeader, JS_BYTECODE_MAGIC, JS_BYTECODE_VERSION};
pub use capi_defs::{
    CallFlags, DumpFlags, JSCFunctionDef, JSCFunctionType, JSCStringBuf, FRAME_CF_CTOR,
    JS_DUMP_LONG, JS_DUMP_NOQUOTE, JS_EVAL_JSON, JS_EVAL_REGEXP, JS_EVAL_REGEXP_FLAGS_SHIFT,
    JS_EVAL_REPL, JS_EVAL_RETVAL, JS_EVAL_STRIP_COL,
};
pub use context::{ContextConfig, ContextError, JSContext};
pub use enums::{JSObjectClass, JS_CLASS_USER};
pub use exception::{Exception, JsResult};
pub use gc_ref::{GcListRef, GcRefError, GcRoot, GcStackRef};
pub use jsvalue::{JSValue, ValueKind, JS_EXCEPTION, JS_FALSE, JS_NULL, JS_TRUE, JS_UNDEFINED};
pub use property::PropKey;
pub use stdlib::{StdLibraryDef, StdlibBuilder};
