//! Array buffers and typed-array element access.

use crate::containers::ByteArrayHeader;
use crate::cutils::{get_f64, get_u16, get_u32, put_f64, put_u16, put_u32};
use crate::context::JSContext;
use crate::conversion::js_to_int32;
use crate::enums::JSObjectClass;
use crate::exception::JsResult;
use crate::jsvalue::{new_short_int, value_from_ptr, value_to_ptr, JSValue};
use crate::object::{ARRAY_BUFFER_BYTES, TYPED_ARRAY_BUFFER, TYPED_ARRAY_LEN, TYPED_ARRAY_OFFSET};

/// View fields of a typed-array object.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TypedArray {
    buffer: JSValue,
    len: u32,
    offset: u32,
}

impl TypedArray {
    pub const fn new(buffer: JSValue, len: u32, offset: u32) -> Self {
        Self { buffer, len, offset }
    }

    pub const fn buffer(self) -> JSValue {
        self.buffer
    }

    pub const fn len(self) -> u32 {
        self.len
    }

    pub const fn is_empty(self) -> bool {
        self.len == 0
    }

    pub const fn offset(self) -> u32 {
        self.offset
    }
}

/// ToUint8Clamp: rounds half to even.
fn clamp_u8(d: f64) -> u8 {
    if d.is_nan() || d <= 0.0 {
        return 0;
    }
    if d >= 255.0 {
        return 255;
    }
    let f = d.floor();
    let diff = d - f;
    let r = if diff > 0.5 || (diff == 0.5 && f % 2.0 != 0.0) {
        f + 1.0
    } else {
        f
    };
    r as u8
}

impl<'a> JSContext<'a> {
    pub fn new_array_buffer(&mut self, len: u32) -> JsResult<JSValue> {
        let bytes = self.new_byte_array(&vec![0u8; len as usize])?;
        let proto = self.class_proto(JSObjectClass::ArrayBuffer as u8);
        let obj = self.new_object_class(JSObjectClass::ArrayBuffer as u8, proto, 0)?;
        self.set_object_field(obj, ARRAY_BUFFER_BYTES, value_from_ptr(bytes))?;
        Ok(obj)
    }

    /// Typed array of `class` viewing `len` elements of `buffer` from byte
    /// `offset`. A fresh buffer is allocated when `buffer` is undefined.
    pub fn new_typed_array(
        &mut self,
        class: JSObjectClass,
        buffer: JSValue,
        offset: u32,
        len: u32,
    ) -> JsResult<JSValue> {
        let Some(elem_size) = class.typed_array_elem_size() else {
            return Err(self.throw_type_error(format_args!("{} is not a typed array class", class.name())));
        };
        let byte_len = len
            .checked_mul(elem_size)
            .ok_or_else(|| self.throw_range_error("invalid typed array length"))?;
        let buffer = if buffer.is_undefined() {
            self.new_array_buffer(byte_len)?
        } else {
            if self.get_class_id(buffer) != Some(JSObjectClass::ArrayBuffer as u8) {
                return Err(self.throw_type_error("not an ArrayBuffer"));
            }
            buffer
        };
        if offset % elem_size != 0 {
            return Err(self.throw_range_error("invalid offset"));
        }
        let available = self.array_buffer_len(buffer)?;
        if offset.checked_add(byte_len).map_or(true, |end| end > available) {
            return Err(self.throw_range_error("invalid typed array length"));
        }
        let proto = self.class_proto(class as u8);
        let obj = self.new_object_class(class as u8, proto, 0)?;
        self.set_object_field(obj, TYPED_ARRAY_BUFFER, buffer)?;
        self.set_object_field(obj, TYPED_ARRAY_OFFSET, new_short_int(offset as i32))?;
        self.set_object_field(obj, TYPED_ARRAY_LEN, new_short_int(len as i32))?;
        Ok(obj)
    }

    pub(crate) fn array_buffer_len(&self, buffer: JSValue) -> JsResult<u32> {
        let bytes = self.object_field(buffer, ARRAY_BUFFER_BYTES)?;
        match value_to_ptr(bytes) {
            Some(addr) => Ok(ByteArrayHeader::from(self.header_at(addr)?).size()),
            None => Ok(0),
        }
    }

    fn typed_array_view(&self, obj: JSValue) -> JsResult<TypedArray> {
        Ok(TypedArray::new(
            self.object_field(obj, TYPED_ARRAY_BUFFER)?,
            self.object_field(obj, TYPED_ARRAY_LEN)?.get_int() as u32,
            self.object_field(obj, TYPED_ARRAY_OFFSET)?.get_int() as u32,
        ))
    }

    /// Address of element `idx`, or `None` when out of bounds.
    fn typed_array_elem_addr(&self, obj: JSValue, idx: u32) -> JsResult<Option<(JSObjectClass, u32)>> {
        let Some(class) = self.get_class_id(obj).map(JSObjectClass::from_id) else {
            return Ok(None);
        };
        let Some(size) = class.typed_array_elem_size() else {
            return Ok(None);
        };
        let view = self.typed_array_view(obj)?;
        if idx >= view.len() {
            return Ok(None);
        }
        let bytes = self.object_field(view.buffer(), ARRAY_BUFFER_BYTES)?;
        let Some(base) = value_to_ptr(bytes) else {
            return Ok(None);
        };
        Ok(Some((class, base + 4 + view.offset() + idx * size)))
    }

    pub(crate) fn typed_array_get(&mut self, obj: JSValue, idx: u32) -> JsResult<Option<JSValue>> {
        let Some((class, addr)) = self.typed_array_elem_addr(obj, idx)? else {
            return Ok(None);
        };
        let size = class.typed_array_elem_size().unwrap_or(1) as usize;
        let raw = self.mem.bytes(addr, size)?;
        let val = match class {
            JSObjectClass::Uint8CArray | JSObjectClass::Uint8Array => new_short_int(raw[0] as i32),
            JSObjectClass::Int8Array => new_short_int(raw[0] as i8 as i32),
            JSObjectClass::Int16Array => new_short_int(get_u16(raw) as i16 as i32),
            JSObjectClass::Uint16Array => new_short_int(get_u16(raw) as i32),
            JSObjectClass::Int32Array => {
                let v = get_u32(raw) as i32;
                self.new_int32(v)?
            }
            JSObjectClass::Uint32Array => {
                let v = get_u32(raw);
                self.new_uint32(v)?
            }
            JSObjectClass::Float32Array => {
                let v = f32::from_bits(get_u32(raw)) as f64;
                self.new_float64(v)?
            }
            _ => {
                let v = get_f64(raw);
                self.new_float64(v)?
            }
        };
        Ok(Some(val))
    }

    /// Out-of-bounds writes are ignored.
    pub(crate) fn typed_array_set(&mut self, obj: JSValue, idx: u32, val: JSValue) -> JsResult<()> {
        let d = self.to_number(val)?;
        let Some((class, addr)) = self.typed_array_elem_addr(obj, idx)? else {
            return Ok(());
        };
        let size = class.typed_array_elem_size().unwrap_or(1) as usize;
        let raw = self.mem.bytes_mut(addr, size)?;
        match class {
            JSObjectClass::Uint8CArray => raw[0] = clamp_u8(d),
            JSObjectClass::Int8Array | JSObjectClass::Uint8Array => raw[0] = js_to_int32(d) as u8,
            JSObjectClass::Int16Array | JSObjectClass::Uint16Array => put_u16(raw, js_to_int32(d) as u16),
            JSObjectClass::Int32Array | JSObjectClass::Uint32Array => put_u32(raw, js_to_int32(d) as u32),
            JSObjectClass::Float32Array => put_u32(raw, (d as f32).to_bits()),
            _ => put_f64(raw, d),
        }
        Ok(())
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::context::tests::new_context;
    use crate::property::PropKey;

    #[test]
    fn uint8_clamped_rounds_half_to_even() {
        assert_eq!(clamp_u8(-5.0), 0);
        assert_eq!(clamp_u8(300.0), 255);
        assert_eq!(clamp_u8(1.5), 2);
        assert_eq!(clamp_u8(2.5), 2);
        assert_eq!(clamp_u8(2.6), 3);
        assert_eq!(clamp_u8(f64::NAN), 0);
    }

    #[test]
    fn elements_wrap_to_their_type() {
        let mut ctx = new_context();
        let arr = ctx
            .new_typed_array(JSObjectClass::Int8Array, crate::jsvalue::JS_UNDEFINED, 0, 4)
            .unwrap();
        ctx.set_property(arr, PropKey::Index(0), new_short_int(200)).unwrap();
        assert_eq!(ctx.get_property(arr, PropKey::Index(0)).unwrap(), new_short_int(-56));
        assert_eq!(ctx.get_prop(arr, ctx.roots.atoms.length).unwrap(), new_short_int(4));
        assert!(ctx.get_property(arr, PropKey::Index(9)).unwrap().is_undefined());
    }

    #[test]
    fn views_share_their_buffer() {
        let mut ctx = new_context();
        let buf = ctx.new_array_buffer(8).unwrap();
        let words = ctx.new_typed_array(JSObjectClass::Uint32Array, buf, 0, 2).unwrap();
        let bytes = ctx.new_typed_array(JSObjectClass::Uint8Array, buf, 4, 4).unwrap();
        ctx.set_property(words, PropKey::Index(1), new_short_int(0x0102)).unwrap();
        assert_eq!(ctx.get_property(bytes, PropKey::Index(0)).unwrap(), new_short_int(2));
        assert_eq!(ctx.get_property(bytes, PropKey::Index(1)).unwrap(), new_short_int(1));
        let view = ctx.typed_array_view(bytes).unwrap();
        assert_eq!((view.len(), view.offset()), (4, 4));
    }

    #[test]
    fn views_must_fit_the_buffer() {
        let mut ctx = new_context();
        let buf = ctx.new_array_buffer(4).unwrap();
        assert!(ctx.new_typed_array(JSObjectClass::Float64Array, buf, 0, 1).is_err());
        assert!(ctx.new_typed_array(JSObjectClass::Uint16Array, buf, 1, 1).is_err());
    }
}
