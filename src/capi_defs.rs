//! Embedding ABI: native callback signatures and flag constants.

use crate::context::JSContext;
use crate::jsvalue::JSValue;
use bitflags::bitflags;
use core::ffi::c_void;

/// Native function: `(ctx, this, args) -> result`. `args` is padded with
/// `undefined` up to the declared argument count.
pub type JSCFunction = fn(ctx: &mut JSContext<'_>, this_val: &mut JSValue, args: &[JSValue]) -> JSValue;

pub type JSCFunctionMagic =
    fn(ctx: &mut JSContext<'_>, this_val: &mut JSValue, args: &[JSValue], magic: i32) -> JSValue;

/// Native function bound to a parameter value with `js_new_cfunction_params`.
pub type JSCFunctionParams =
    fn(ctx: &mut JSContext<'_>, this_val: &mut JSValue, args: &[JSValue], params: JSValue) -> JSValue;

/// Called with the opaque pointer of a collected user-class object.
pub type JSCFinalizer = fn(ctx: &mut JSContext<'_>, opaque: *mut c_void);

/// Log sink. Receives the context opaque pointer.
pub type JSWriteFunc = fn(opaque: *mut c_void, buf: &[u8]);

/// Polled by the interpreter; returning `true` interrupts the running code.
pub type JSInterruptHandler = fn(ctx: &mut JSContext<'_>, opaque: *mut c_void) -> bool;

pub const JS_EVAL_RETVAL: u32 = 1 << 0;
pub const JS_EVAL_REPL: u32 = 1 << 1;
pub const JS_EVAL_STRIP_COL: u32 = 1 << 2;
pub const JS_EVAL_JSON: u32 = 1 << 3;
pub const JS_EVAL_REGEXP: u32 = 1 << 4;
/// RegExp flags (`JS_REGEXP_FLAG_*`) are stored from this bit in the eval flags.
pub const JS_EVAL_REGEXP_FLAGS_SHIFT: u32 = 8;

bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct EvalFlags: u32 {
        const RETVAL = JS_EVAL_RETVAL;
        const REPL = JS_EVAL_REPL;
        const STRIP_COL = JS_EVAL_STRIP_COL;
        const JSON = JS_EVAL_JSON;
        const REGEXP = JS_EVAL_REGEXP;
    }
}

impl EvalFlags {
    pub fn from_eval_bits(flags: u32) -> Self {
        Self::from_bits_truncate(flags & ((1 << JS_EVAL_REGEXP_FLAGS_SHIFT) - 1))
    }

    pub fn regexp_flags(flags: u32) -> u32 {
        flags >> JS_EVAL_REGEXP_FLAGS_SHIFT
    }

    pub fn wants_retval(self) -> bool {
        self.intersects(Self::RETVAL | Self::REPL)
    }
}

/// Low 16 bits of the `js_call` flags hold the argument count.
pub const FRAME_CF_ARGC_MASK: u32 = 0xffff;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct CallFlags: u32 {
        /// Constructor call (`new`).
        const CTOR = 1 << 16;
    }
}

pub const FRAME_CF_CTOR: u32 = CallFlags::CTOR.bits();

bitflags! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct DumpFlags: u32 {
        /// Quote strings and print nested objects and arrays.
        const LONG = 1 << 0;
        /// Never quote strings, even nested ones.
        const NOQUOTE = 1 << 1;
    }
}

pub const JS_DUMP_LONG: u32 = DumpFlags::LONG.bits();
pub const JS_DUMP_NOQUOTE: u32 = DumpFlags::NOQUOTE.bits();

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JSCFunctionDefKind {
    Generic = 0,
    GenericMagic = 1,
    Constructor = 2,
    ConstructorMagic = 3,
    GenericParams = 4,
    FF = 5,
}

/// Function pointer of a native function, tagged with its calling
/// convention.
#[derive(Copy, Clone, Debug)]
pub enum JSCFunctionType {
    Generic(JSCFunction),
    GenericMagic(JSCFunctionMagic),
    Constructor(JSCFunction),
    ConstructorMagic(JSCFunctionMagic),
    GenericParams(JSCFunctionParams),
    FF(fn(f64) -> f64),
}

impl JSCFunctionType {
    pub fn kind(&self) -> JSCFunctionDefKind {
        match self {
            JSCFunctionType::Generic(_) => JSCFunctionDefKind::Generic,
            JSCFunctionType::GenericMagic(_) => JSCFunctionDefKind::GenericMagic,
            JSCFunctionType::Constructor(_) => JSCFunctionDefKind::Constructor,
            JSCFunctionType::ConstructorMagic(_) => JSCFunctionDefKind::ConstructorMagic,
            JSCFunctionType::GenericParams(_) => JSCFunctionDefKind::GenericParams,
            JSCFunctionType::FF(_) => JSCFunctionDefKind::FF,
        }
    }

    pub fn is_constructor(&self) -> bool {
        matches!(
            self,
            JSCFunctionType::Constructor(_) | JSCFunctionType::ConstructorMagic(_)
        )
    }
}

/// Entry of the native function table.
#[derive(Copy, Clone, Debug)]
pub struct JSCFunctionDef {
    pub func: JSCFunctionType,
    pub name: &'static str,
    pub arg_count: u8,
    /// Discriminator passed to the magic variants.
    pub magic: i16,
}

impl JSCFunctionDef {
    pub const fn new(name: &'static str, func: JSCFunctionType, arg_count: u8) -> Self {
        Self {
            func,
            name,
            arg_count,
            magic: 0,
        }
    }

    pub const fn with_magic(mut self, magic: i16) -> Self {
        self.magic = magic;
        self
    }
}

/// Scratch space for `js_to_cstring`. The returned slice stays valid until
/// the buffer is reused.
#[derive(Debug, Default, Clone)]
pub struct JSCStringBuf {
    buf: Vec<u8>,
}

impl JSCStringBuf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the content with `bytes` plus a trailing NUL and returns the
    /// bytes without the NUL.
    pub(crate) fn fill(&mut self, bytes: &[u8]) -> &[u8] {
        self.buf.clear();
        self.buf.extend_from_slice(bytes);
        self.buf.push(0);
        &self.buf[..bytes.len()]
    }

    /// NUL-terminated view of the last conversion.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    fn nop(_ctx: &mut JSContext<'_>, _this: &mut JSValue, _args: &[JSValue]) -> JSValue {
        crate::jsvalue::JS_UNDEFINED
    }

    #[test]
    fn function_kind_discriminants() {
        assert_eq!(JSCFunctionDefKind::Generic as u8, 0);
        assert_eq!(JSCFunctionDefKind::ConstructorMagic as u8, 3);
        assert_eq!(JSCFunctionDefKind::FF as u8, 5);
        assert_eq!(JSCFunctionType::Constructor(nop).kind(), JSCFunctionDefKind::Constructor);
        assert!(JSCFunctionType::Constructor(nop).is_constructor());
        assert!(!JSCFunctionType::FF(f64::sqrt).is_constructor());
    }

    #[test]
    fn eval_flags_split_regexp_bits() {
        let raw = JS_EVAL_REGEXP | (0b101 << JS_EVAL_REGEXP_FLAGS_SHIFT);
        assert_eq!(EvalFlags::from_eval_bits(raw), EvalFlags::REGEXP);
        assert_eq!(EvalFlags::regexp_flags(raw), 0b101);
        assert!(EvalFlags::REPL.wants_retval());
        assert_eq!(JS_EVAL_RETVAL, 1);
        assert_eq!(JS_EVAL_STRIP_COL, 4);
    }

    #[test]
    fn cstring_buf_is_nul_terminated() {
        let mut buf = JSCStringBuf::new();
        assert_eq!(buf.fill(b"abc"), b"abc");
        assert_eq!(buf.as_bytes_with_nul(), b"abc\0");
        assert_eq!(buf.fill(b"x"), b"x");
        assert_eq!(buf.as_bytes_with_nul(), b"x\0");
    }
}
