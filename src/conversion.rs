//! Type conversions and comparisons.

use crate::atom::parse_array_index;
use crate::context::JSContext;
use crate::dtoa::{js_int_to_string, js_number_to_string, js_string_to_number};
use crate::enums::JSObjectClass;
use crate::exception::{Exception, JsResult};
use crate::function_bytecode::FB_FUNC_NAME;
use crate::interpreter::JS_MAX_CALL_RECURSION;
use crate::jsvalue::{fits_short_int, new_short_int, value_from_ptr, JSValue, ValueKind};
use crate::memblock::{MbHeader, MTag, FLOAT64_BLOCK_WORDS};
use crate::object::{CFUNC_IDX, CLOSURE_FUNC, PRIMITIVE_VALUE, REGEXP_FLAGS, REGEXP_SOURCE};
use crate::property::PropKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToPrimitiveHint {
    Default,
    Number,
    String,
}

/// ECMAScript ToInt32: wraps modulo 2^32.
pub fn js_to_int32(d: f64) -> i32 {
    if !d.is_finite() {
        return 0;
    }
    let m = d.trunc().rem_euclid(4_294_967_296.0);
    m as u32 as i32
}

/// Clamps to the `i32` range; NaN converts to 0.
pub fn js_to_int32_sat(d: f64) -> i32 {
    d as i32
}

impl<'a> JSContext<'a> {
    /// Number value, boxed in a heap block when it is not a short int.
    pub fn new_float64(&mut self, d: f64) -> JsResult<JSValue> {
        let i = d as i64;
        if i as f64 == d && fits_short_int(i) && !(d == 0.0 && d.is_sign_negative()) {
            return Ok(new_short_int(i as i32));
        }
        let addr = self.alloc_block(MbHeader::new(MTag::Float64, false), FLOAT64_BLOCK_WORDS)?;
        self.mem.write_f64(addr + 4, d)?;
        Ok(value_from_ptr(addr))
    }

    pub fn new_int32(&mut self, v: i32) -> JsResult<JSValue> {
        if fits_short_int(v as i64) {
            return Ok(new_short_int(v));
        }
        self.new_float64(v as f64)
    }

    pub fn new_uint32(&mut self, v: u32) -> JsResult<JSValue> {
        self.new_float64(v as f64)
    }

    pub fn new_int64(&mut self, v: i64) -> JsResult<JSValue> {
        if fits_short_int(v) {
            return Ok(new_short_int(v as i32));
        }
        self.new_float64(v as f64)
    }

    pub fn number_value(&self, val: JSValue) -> Option<f64> {
        match val.kind() {
            ValueKind::Int(i) => Some(i as f64),
            ValueKind::Ptr(addr) if self.block_tag(addr) == Some(MTag::Float64) => {
                self.mem.read_f64(addr + 4).ok()
            }
            _ => None,
        }
    }

    pub fn is_number(&self, val: JSValue) -> bool {
        self.number_value(val).is_some()
    }

    pub fn is_primitive(&self, val: JSValue) -> bool {
        !self.is_object(val)
    }

    pub fn to_primitive(&mut self, val: JSValue, hint: ToPrimitiveHint) -> JsResult<JSValue> {
        if !self.is_object(val) {
            return Ok(val);
        }
        let order = if hint == ToPrimitiveHint::String {
            [self.roots.atoms.to_string, self.roots.atoms.value_of]
        } else {
            [self.roots.atoms.value_of, self.roots.atoms.to_string]
        };
        let mut found_method = false;
        for name in order {
            let method = self.get_prop(val, name)?;
            if self.is_function(method) {
                found_method = true;
                let res = self.call_function(method, val, &[])?;
                if !self.is_object(res) {
                    return Ok(res);
                }
            }
        }
        if found_method {
            return Err(self.throw_type_error("cannot convert object to primitive value"));
        }
        self.default_primitive(val, hint)
    }

    /// Conversion of objects whose prototype chain has no `valueOf` or
    /// `toString`, as in contexts without a standard library.
    fn default_primitive(&mut self, val: JSValue, hint: ToPrimitiveHint) -> JsResult<JSValue> {
        let class = self
            .get_class_id(val)
            .map(JSObjectClass::from_id)
            .unwrap_or(JSObjectClass::Object);
        match class {
            JSObjectClass::Number | JSObjectClass::Boolean | JSObjectClass::String => {
                self.object_field(val, PRIMITIVE_VALUE)
            }
            JSObjectClass::Date if hint != ToPrimitiveHint::String => self.object_field(val, PRIMITIVE_VALUE),
            JSObjectClass::Array => self.array_join(val),
            c if c.is_error() => {
                let s = self.error_to_string(val)?;
                self.new_string(s.as_bytes())
            }
            JSObjectClass::Closure | JSObjectClass::CFunction => {
                let s = self.function_source_text(val)?;
                self.new_string(s.as_bytes())
            }
            JSObjectClass::RegExp => {
                let source = self.object_field(val, REGEXP_SOURCE)?;
                let flags = self.object_field(val, REGEXP_FLAGS)?;
                let s = format!("/{}/{}", self.string_to_rust(source)?, self.string_to_rust(flags)?);
                self.new_string(s.as_bytes())
            }
            _ => self.new_string(b"[object Object]"),
        }
    }

    fn array_join(&mut self, arr: JSValue) -> JsResult<JSValue> {
        if self.call_depth >= JS_MAX_CALL_RECURSION {
            return Err(Exception::StackOverflow);
        }
        self.call_depth += 1;
        let res = self.array_join_inner(arr);
        self.call_depth -= 1;
        res
    }

    fn array_join_inner(&mut self, arr: JSValue) -> JsResult<JSValue> {
        let len = self.array_parts(arr)?.1;
        let mut out = Vec::new();
        for i in 0..len {
            if i > 0 {
                out.push(b',');
            }
            let (tab, cur_len) = self.array_parts(arr)?;
            if i >= cur_len {
                continue;
            }
            let elem = self.mem.field(tab, 1 + i)?;
            if elem.is_undefined() || elem.is_null() {
                continue;
            }
            let s = self.to_string(elem)?;
            out.extend_from_slice(&self.string_bytes(s)?);
        }
        self.new_string(&out)
    }

    pub(crate) fn function_name(&mut self, func: JSValue) -> JsResult<String> {
        let name = match func.kind() {
            ValueKind::ShortFunc(idx) => self.stdlib.c_function(idx).map(|d| d.name.to_string()),
            _ => match self.get_class_id(func).map(JSObjectClass::from_id) {
                Some(JSObjectClass::Closure) => {
                    let fb = self.object_field(func, CLOSURE_FUNC)?;
                    let name = self.object_field(fb, FB_FUNC_NAME)?;
                    if self.is_string(name) {
                        Some(self.string_to_rust(name)?)
                    } else {
                        None
                    }
                }
                Some(JSObjectClass::CFunction) => {
                    let idx = self.object_field(func, CFUNC_IDX)?.get_int() as u32;
                    self.stdlib.c_function(idx).map(|d| d.name.to_string())
                }
                _ => None,
            },
        };
        Ok(name.unwrap_or_default())
    }

    fn function_source_text(&mut self, func: JSValue) -> JsResult<String> {
        Ok(format!("function {}() {{\n    [native code]\n}}", self.function_name(func)?))
    }

    pub fn to_number(&mut self, val: JSValue) -> JsResult<f64> {
        match val.kind() {
            ValueKind::Int(i) => Ok(i as f64),
            ValueKind::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            ValueKind::Null => Ok(0.0),
            ValueKind::StringChar(_) => Ok(js_string_to_number(&self.string_to_rust(val)?)),
            ValueKind::Ptr(addr) => match self.header_at(addr)?.tag() {
                MTag::Float64 => Ok(self.mem.read_f64(addr + 4)?),
                MTag::String => Ok(js_string_to_number(&self.string_to_rust(val)?)),
                MTag::Object => {
                    let prim = self.to_primitive(val, ToPrimitiveHint::Number)?;
                    self.to_number(prim)
                }
                _ => Ok(f64::NAN),
            },
            ValueKind::ShortFunc(_)
            | ValueKind::Undefined
            | ValueKind::Exception(_)
            | ValueKind::Uninitialized
            | ValueKind::CatchOffset(_) => Ok(f64::NAN),
        }
    }

    /// ToNumeric: numbers are returned as is.
    pub(crate) fn to_number_value(&mut self, val: JSValue) -> JsResult<JSValue> {
        if self.is_number(val) {
            return Ok(val);
        }
        let d = self.to_number(val)?;
        self.new_float64(d)
    }

    pub fn to_int32(&mut self, val: JSValue) -> JsResult<i32> {
        if let ValueKind::Int(i) = val.kind() {
            return Ok(i);
        }
        Ok(js_to_int32(self.to_number(val)?))
    }

    pub fn to_uint32(&mut self, val: JSValue) -> JsResult<u32> {
        Ok(self.to_int32(val)? as u32)
    }

    /// Like `to_int32` but clamps out-of-range numbers instead of wrapping.
    pub fn to_int32_sat(&mut self, val: JSValue) -> JsResult<i32> {
        if let ValueKind::Int(i) = val.kind() {
            return Ok(i);
        }
        Ok(js_to_int32_sat(self.to_number(val)?))
    }

    pub fn to_string(&mut self, val: JSValue) -> JsResult<JSValue> {
        match val.kind() {
            ValueKind::StringChar(_) => Ok(val),
            ValueKind::Int(i) => self.new_string(js_int_to_string(i).as_bytes()),
            ValueKind::Bool(b) => self.intern(if b { b"true" } else { b"false" }),
            ValueKind::Null => self.intern(b"null"),
            ValueKind::Undefined => self.intern(b"undefined"),
            ValueKind::ShortFunc(_) => {
                let s = self.function_source_text(val)?;
                self.new_string(s.as_bytes())
            }
            ValueKind::Ptr(addr) => match self.header_at(addr)?.tag() {
                MTag::String => Ok(val),
                MTag::Float64 => {
                    let d = self.mem.read_f64(addr + 4)?;
                    self.new_string(js_number_to_string(d).as_bytes())
                }
                MTag::Object => {
                    let prim = self.to_primitive(val, ToPrimitiveHint::String)?;
                    self.to_string(prim)
                }
                tag => self.new_string(format!("[{}]", tag.name()).as_bytes()),
            },
            ValueKind::Exception(_) => self.new_string(b"[exception]"),
            ValueKind::Uninitialized => self.new_string(b"[uninitialized]"),
            ValueKind::CatchOffset(_) => self.new_string(b"[catch offset]"),
        }
    }

    /// String conversion copied out to Rust.
    pub fn to_rust_string(&mut self, val: JSValue) -> JsResult<String> {
        let s = self.to_string(val)?;
        self.string_to_rust(s)
    }

    pub fn to_boolean(&self, val: JSValue) -> bool {
        match val.kind() {
            ValueKind::Int(i) => i != 0,
            ValueKind::Bool(b) => b,
            ValueKind::Null | ValueKind::Undefined | ValueKind::Uninitialized => false,
            ValueKind::StringChar(_) | ValueKind::ShortFunc(_) => true,
            ValueKind::Ptr(addr) => match self.block_tag(addr) {
                Some(MTag::Float64) => self
                    .mem
                    .read_f64(addr + 4)
                    .map(|d| d != 0.0 && !d.is_nan())
                    .unwrap_or(false),
                Some(MTag::String) => self.string_bytes(val).map(|b| !b.is_empty()).unwrap_or(false),
                _ => true,
            },
            ValueKind::Exception(_) | ValueKind::CatchOffset(_) => false,
        }
    }

    pub fn typeof_str(&self, val: JSValue) -> &'static str {
        match val.kind() {
            ValueKind::Int(_) => "number",
            ValueKind::Bool(_) => "boolean",
            ValueKind::Undefined | ValueKind::Uninitialized => "undefined",
            ValueKind::StringChar(_) => "string",
            ValueKind::ShortFunc(_) => "function",
            ValueKind::Ptr(addr) => match self.block_tag(addr) {
                Some(MTag::Float64) => "number",
                Some(MTag::String) => "string",
                Some(MTag::Object) if self.is_function(val) => "function",
                _ => "object",
            },
            ValueKind::Null | ValueKind::Exception(_) | ValueKind::CatchOffset(_) => "object",
        }
    }

    /// `===`
    pub fn strict_eq(&self, a: JSValue, b: JSValue) -> JsResult<bool> {
        if let (Some(x), Some(y)) = (self.number_value(a), self.number_value(b)) {
            return Ok(x == y);
        }
        if self.is_string(a) && self.is_string(b) {
            return self.strings_equal(a, b);
        }
        Ok(a == b)
    }

    /// `==`
    pub fn loose_eq(&mut self, a: JSValue, b: JSValue) -> JsResult<bool> {
        let nullish = |v: JSValue| v.is_null() || v.is_undefined();
        if nullish(a) || nullish(b) {
            return Ok(nullish(a) && nullish(b));
        }
        let (a_obj, b_obj) = (self.is_object(a), self.is_object(b));
        if a_obj && b_obj {
            return Ok(a == b);
        }
        if a_obj {
            let a = self.to_primitive(a, ToPrimitiveHint::Default)?;
            return self.loose_eq(a, b);
        }
        if b_obj {
            let b = self.to_primitive(b, ToPrimitiveHint::Default)?;
            return self.loose_eq(a, b);
        }
        if self.is_string(a) && self.is_string(b) {
            return self.strings_equal(a, b);
        }
        if a.is_bool() || b.is_bool() || self.is_number(a) || self.is_number(b) {
            return Ok(self.to_number(a)? == self.to_number(b)?);
        }
        Ok(a == b)
    }

    pub fn to_property_key(&mut self, val: JSValue) -> JsResult<PropKey> {
        if let ValueKind::Int(i) = val.kind() {
            if i >= 0 {
                return Ok(PropKey::Index(i as u32));
            }
        }
        if let Some(d) = self.number_value(val) {
            if d >= 0.0 && d < u32::MAX as f64 && d.fract() == 0.0 {
                return Ok(PropKey::Index(d as u32));
            }
        }
        let s = if self.is_string(val) {
            val
        } else {
            let prim = self.to_primitive(val, ToPrimitiveHint::String)?;
            self.to_string(prim)?
        };
        if let Some(idx) = parse_array_index(&self.string_bytes(s)?) {
            return Ok(PropKey::Index(idx));
        }
        Ok(PropKey::Atom(self.to_atom(s)?))
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::context::tests::new_context;
    use crate::jsvalue::{JS_NULL, JS_TRUE, JS_UNDEFINED};

    #[test]
    fn float64_prefers_short_ints() {
        let mut ctx = new_context();
        assert_eq!(ctx.new_float64(3.0).unwrap(), new_short_int(3));
        let neg_zero = ctx.new_float64(-0.0).unwrap();
        assert!(neg_zero.is_ptr());
        assert!(ctx.number_value(neg_zero).unwrap().is_sign_negative());
        let big = ctx.new_float64(1e300).unwrap();
        assert_eq!(ctx.number_value(big), Some(1e300));
        let wide = ctx.new_int64(1 << 40).unwrap();
        assert_eq!(ctx.number_value(wide), Some((1u64 << 40) as f64));
    }

    #[test]
    fn int32_conversions() {
        assert_eq!(js_to_int32(4_294_967_296.0 + 5.0), 5);
        assert_eq!(js_to_int32(2_147_483_648.0), i32::MIN);
        assert_eq!(js_to_int32(-1.5), -1);
        assert_eq!(js_to_int32(f64::NAN), 0);
        assert_eq!(js_to_int32_sat(1e300), i32::MAX);
        assert_eq!(js_to_int32_sat(-1e300), i32::MIN);
        assert_eq!(js_to_int32_sat(f64::NAN), 0);
    }

    #[test]
    fn string_conversions() {
        let mut ctx = new_context();
        let half = ctx.new_float64(0.5).unwrap();
        assert_eq!(ctx.to_rust_string(half).unwrap(), "0.5");
        assert_eq!(ctx.to_rust_string(JS_NULL).unwrap(), "null");
        assert_eq!(ctx.to_rust_string(new_short_int(-12)).unwrap(), "-12");
        let arr = ctx.new_array(&[new_short_int(1), JS_UNDEFINED, JS_TRUE]).unwrap();
        assert_eq!(ctx.to_rust_string(arr).unwrap(), "1,,true");
        let obj = ctx.new_object().unwrap();
        assert_eq!(ctx.to_rust_string(obj).unwrap(), "[object Object]");
    }

    #[test]
    fn number_conversions() {
        let mut ctx = new_context();
        let s = ctx.new_string(b" 0x10 ").unwrap();
        assert_eq!(ctx.to_number(s).unwrap(), 16.0);
        let bad = ctx.new_string(b"12px").unwrap();
        assert!(ctx.to_number(bad).unwrap().is_nan());
        assert!(ctx.to_number(JS_UNDEFINED).unwrap().is_nan());
        assert_eq!(ctx.to_number(JS_NULL).unwrap(), 0.0);
    }

    #[test]
    fn equality() {
        let mut ctx = new_context();
        let one = ctx.new_string(b"1").unwrap();
        assert!(ctx.loose_eq(one, new_short_int(1)).unwrap());
        assert!(!ctx.strict_eq(one, new_short_int(1)).unwrap());
        assert!(ctx.loose_eq(JS_NULL, JS_UNDEFINED).unwrap());
        assert!(!ctx.loose_eq(JS_NULL, new_short_int(0)).unwrap());
        let a = ctx.new_string(b"abc").unwrap();
        let b = ctx.new_string(b"abc").unwrap();
        assert!(ctx.strict_eq(a, b).unwrap());
        let nan = ctx.new_float64(f64::NAN).unwrap();
        assert!(!ctx.strict_eq(nan, nan).unwrap());
    }

    #[test]
    fn property_keys() {
        let mut ctx = new_context();
        assert_eq!(ctx.to_property_key(new_short_int(3)).unwrap(), PropKey::Index(3));
        let s = ctx.new_string(b"42").unwrap();
        assert_eq!(ctx.to_property_key(s).unwrap(), PropKey::Index(42));
        let neg = ctx.to_property_key(new_short_int(-1)).unwrap();
        let atom = ctx.intern(b"-1").unwrap();
        assert_eq!(neg, PropKey::Atom(atom));
    }

    #[test]
    fn typeof_names() {
        let mut ctx = new_context();
        let s = ctx.new_string(b"str").unwrap();
        assert_eq!(ctx.typeof_str(s), "string");
        assert_eq!(ctx.typeof_str(JS_NULL), "object");
        assert_eq!(ctx.typeof_str(new_short_int(0)), "number");
        assert_eq!(ctx.typeof_str(JS_UNDEFINED), "undefined");
    }
}
