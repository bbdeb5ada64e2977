//! Object creation and the property model.
//!
//! The property table of an object is a value array
//! `[count, (key, value, type)*]` searched linearly. Arrays keep their
//! elements densely in a separate value array; `length`, element access on
//! arrays, strings and typed arrays, and the `name`/`length`/`prototype`
//! properties of functions are virtual.

use crate::containers::{
    bytes_block_words, value_array_block_words, ByteArrayHeader, ValueArrayHeader,
    JS_VALUE_ARRAY_SIZE_MAX,
};
use crate::context::JSContext;
use crate::enums::{JSObjectClass, JSPropType, JS_CLASS_USER};
use crate::exception::JsResult;
use crate::function_bytecode::{FunctionBytecodeHeader, FB_FUNC_NAME};
use crate::jsvalue::{
    new_short_int, new_string_char, value_from_ptr, value_get_ptr, value_to_ptr, JSValue,
    ValueKind, JS_NULL, JS_UNDEFINED,
};
use crate::memblock::MTag;
use crate::object::{
    class_extra_size, ObjectHeader, ARRAY_LEN, ARRAY_TAB, CFUNC_IDX, CFUNC_PARAMS, CLOSURE_FUNC,
    OBJ_PAYLOAD, OBJ_PROPS, OBJ_PROTO, USER_OPAQUE_SLOT,
};
use core::ffi::c_void;

/// Property key after conversion: an array index or an atom.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropKey {
    Index(u32),
    Atom(JSValue),
}

const PROPS_MIN_CAPACITY: u32 = 4;
const ARRAY_MIN_CAPACITY: u32 = 4;

/// Field index of entry `i` of a property table.
const fn prop_key_field(i: u32) -> u32 {
    2 + 3 * i
}

/// Where a property was found.
#[derive(Clone, Copy, Debug)]
struct PropSlot {
    table: u32,
    index: u32,
}

impl<'a> JSContext<'a> {
    /// Allocates an object of `class_id` with `extra` payload words on top of
    /// the class's fixed payload.
    pub(crate) fn new_object_class(&mut self, class_id: u8, proto: JSValue, extra: u32) -> JsResult<JSValue> {
        let class = JSObjectClass::from_id(class_id);
        let extra_size = class_extra_size(class) + extra;
        let header = ObjectHeader::new(class_id, extra_size);
        let addr = self.alloc_block(header.header(), header.block_words())?;
        self.mem.set_field(addr, OBJ_PROTO, proto)?;
        self.mem.set_field(addr, OBJ_PROPS, JS_NULL)?;
        for idx in OBJ_PAYLOAD..header.block_words() {
            self.mem.set_field(addr, idx, JS_UNDEFINED)?;
        }
        match class {
            JSObjectClass::Array => {
                self.mem.set_field(addr, ARRAY_TAB, JS_NULL)?;
                self.mem.set_field(addr, ARRAY_LEN, new_short_int(0))?;
            }
            JSObjectClass::User => self.mem.set_field(addr, USER_OPAQUE_SLOT, new_short_int(-1))?,
            _ => {}
        }
        Ok(value_from_ptr(addr))
    }

    pub fn new_object(&mut self) -> JsResult<JSValue> {
        let proto = self.class_proto(JSObjectClass::Object as u8);
        self.new_object_class(JSObjectClass::Object as u8, proto, 0)
    }

    /// Object of an embedder class carrying `opaque`.
    pub fn new_object_user(&mut self, class_id: u8, opaque: *mut c_void) -> JsResult<JSValue> {
        if class_id < JS_CLASS_USER || class_id as u32 >= self.class_count {
            return Err(self.throw_type_error(format_args!("invalid class id {class_id}")));
        }
        let proto = self.class_proto(class_id);
        let obj = self.new_object_class(class_id, proto, 0)?;
        let slot = self.alloc_opaque_slot(opaque);
        self.set_object_field(obj, USER_OPAQUE_SLOT, new_short_int(slot as i32))?;
        Ok(obj)
    }

    pub fn new_array(&mut self, elems: &[JSValue]) -> JsResult<JSValue> {
        let proto = self.class_proto(JSObjectClass::Array as u8);
        let obj = self.new_object_class(JSObjectClass::Array as u8, proto, 0)?;
        if !elems.is_empty() {
            let tab = self.new_value_array(elems.len() as u32)?;
            for (i, &val) in elems.iter().enumerate() {
                self.mem.set_field(tab, 1 + i as u32, val)?;
            }
            self.set_object_field(obj, ARRAY_TAB, value_from_ptr(tab))?;
            self.set_object_field(obj, ARRAY_LEN, new_short_int(elems.len() as i32))?;
        }
        Ok(obj)
    }

    /// Native function object for entry `idx` of the C function table.
    pub fn new_cfunction(&mut self, idx: u32, params: JSValue) -> JsResult<JSValue> {
        if self.stdlib.c_function(idx).is_none() {
            return Err(self.throw_range_error(format_args!("invalid C function index {idx}")));
        }
        let proto = self.class_proto(JSObjectClass::CFunction as u8);
        let obj = self.new_object_class(JSObjectClass::CFunction as u8, proto, 0)?;
        self.set_object_field(obj, CFUNC_IDX, new_short_int(idx as i32))?;
        self.set_object_field(obj, CFUNC_PARAMS, params)?;
        Ok(obj)
    }

    /// Value array of `size` `undefined` elements. Returns its address.
    pub(crate) fn new_value_array(&mut self, size: u32) -> JsResult<u32> {
        if size > JS_VALUE_ARRAY_SIZE_MAX {
            return Err(self.throw_range_error("array too long"));
        }
        let addr = self.alloc_block(ValueArrayHeader::new(size).header(), value_array_block_words(size))?;
        for i in 1..=size {
            self.mem.set_field(addr, i, JS_UNDEFINED)?;
        }
        Ok(addr)
    }

    pub(crate) fn new_byte_array(&mut self, bytes: &[u8]) -> JsResult<u32> {
        let len = bytes.len() as u32;
        let addr = self.alloc_block(ByteArrayHeader::new(len).header(), bytes_block_words(len))?;
        self.mem.bytes_mut(addr + 4, bytes.len())?.copy_from_slice(bytes);
        Ok(addr)
    }

    pub(crate) fn object_field(&self, obj: JSValue, idx: u32) -> JsResult<JSValue> {
        Ok(self.mem.field(value_get_ptr(obj), idx)?)
    }

    pub(crate) fn set_object_field(&mut self, obj: JSValue, idx: u32, val: JSValue) -> JsResult<()> {
        Ok(self.mem.set_field(value_get_ptr(obj), idx, val)?)
    }

    pub fn get_prototype(&self, obj: JSValue) -> JsResult<JSValue> {
        match self.object_header(obj) {
            Some((addr, _)) => Ok(self.mem.field(addr, OBJ_PROTO)?),
            None => Ok(JS_NULL),
        }
    }

    /// Prototype used for property lookup on any value.
    fn lookup_proto(&self, val: JSValue) -> JsResult<JSValue> {
        let class = match val.kind() {
            ValueKind::Int(_) => JSObjectClass::Number,
            ValueKind::Bool(_) => JSObjectClass::Boolean,
            ValueKind::StringChar(_) => JSObjectClass::String,
            ValueKind::ShortFunc(_) => JSObjectClass::CFunction,
            ValueKind::Ptr(addr) => match self.header_at(addr)?.tag() {
                MTag::Object => return self.get_prototype(val),
                MTag::Float64 => JSObjectClass::Number,
                MTag::String => JSObjectClass::String,
                _ => return Ok(JS_NULL),
            },
            _ => return Ok(JS_NULL),
        };
        Ok(self.class_proto(class as u8))
    }

    /// Key identity, with a content comparison when either side lives in a
    /// ROM region whose atoms were not unified with this context.
    fn keys_equal(&self, a: JSValue, b: JSValue) -> JsResult<bool> {
        if a == b {
            return Ok(true);
        }
        let (Some(pa), Some(pb)) = (value_to_ptr(a), value_to_ptr(b)) else {
            return Ok(false);
        };
        if self.mem.is_ram(pa) && self.mem.is_ram(pb) {
            return Ok(false);
        }
        if !self.is_string(a) || !self.is_string(b) {
            return Ok(false);
        }
        self.strings_equal(a, b)
    }

    pub(crate) fn key_is(&self, key: PropKey, atom: JSValue) -> bool {
        match key {
            PropKey::Atom(k) => self.keys_equal(k, atom).unwrap_or(false),
            PropKey::Index(_) => false,
        }
    }

    /// Atom naming `key` in a property table.
    fn key_atom(&mut self, key: PropKey) -> JsResult<JSValue> {
        match key {
            PropKey::Atom(atom) => Ok(atom),
            PropKey::Index(idx) => self.intern(idx.to_string().as_bytes()),
        }
    }

    pub(crate) fn key_to_string(&self, key: PropKey) -> String {
        match key {
            PropKey::Index(idx) => idx.to_string(),
            PropKey::Atom(atom) => self
                .string_to_rust(atom)
                .unwrap_or_else(|_| String::from("?")),
        }
    }

    fn find_own(&mut self, obj_addr: u32, key: PropKey) -> JsResult<Option<PropSlot>> {
        let props = self.mem.field(obj_addr, OBJ_PROPS)?;
        let Some(table) = value_to_ptr(props) else {
            return Ok(None);
        };
        let atom = match key {
            PropKey::Atom(atom) => atom,
            PropKey::Index(idx) if idx < 10 => new_string_char('0' as u32 + idx),
            PropKey::Index(idx) => match self.atoms.find(&self.mem, idx.to_string().as_bytes())? {
                Some(atom) => atom,
                None => return Ok(None),
            },
        };
        let count = self.mem.field(table, 1)?.get_int() as u32;
        for index in 0..count {
            let k = self.mem.field(table, prop_key_field(index))?;
            if self.keys_equal(k, atom)? {
                return Ok(Some(PropSlot { table, index }));
            }
        }
        Ok(None)
    }

    fn slot_value(&self, slot: PropSlot) -> JsResult<(JSValue, JSPropType)> {
        let val = self.mem.field(slot.table, prop_key_field(slot.index) + 1)?;
        let ty = self.mem.field(slot.table, prop_key_field(slot.index) + 2)?;
        Ok((val, JSPropType::from_raw(ty.get_int()).unwrap_or(JSPropType::Normal)))
    }

    fn set_slot(&mut self, slot: PropSlot, val: JSValue, ty: JSPropType) -> JsResult<()> {
        self.mem.set_field(slot.table, prop_key_field(slot.index) + 1, val)?;
        self.mem
            .set_field(slot.table, prop_key_field(slot.index) + 2, new_short_int(ty as i32))?;
        Ok(())
    }

    /// Appends a property, growing the table as needed.
    fn add_own(&mut self, obj: JSValue, key: PropKey, val: JSValue, ty: JSPropType) -> JsResult<()> {
        let atom = self.key_atom(key)?;
        let obj_addr = value_get_ptr(obj);
        let props = self.mem.field(obj_addr, OBJ_PROPS)?;
        let (table, count) = match value_to_ptr(props) {
            Some(table) => {
                let count = self.mem.field(table, 1)?.get_int() as u32;
                let cap = (ValueArrayHeader::from(self.header_at(table)?).size() - 1) / 3;
                if count < cap {
                    (table, count)
                } else {
                    let new_table = self.new_value_array(1 + 3 * cap * 2)?;
                    for i in 1..=1 + 3 * count {
                        let v = self.mem.field(table, i)?;
                        self.mem.set_field(new_table, i, v)?;
                    }
                    self.mem.set_field(obj_addr, OBJ_PROPS, value_from_ptr(new_table))?;
                    (new_table, count)
                }
            }
            None => {
                let table = self.new_value_array(1 + 3 * PROPS_MIN_CAPACITY)?;
                self.mem.set_field(obj_addr, OBJ_PROPS, value_from_ptr(table))?;
                (table, 0)
            }
        };
        self.mem.set_field(table, prop_key_field(count), atom)?;
        self.set_slot(PropSlot { table, index: count }, val, ty)?;
        self.mem.set_field(table, 1, new_short_int(count as i32 + 1))?;
        Ok(())
    }

    /// Creates or overwrites an own data property without consulting
    /// setters or the prototype chain.
    pub(crate) fn define_prop(&mut self, obj: JSValue, atom: JSValue, val: JSValue) -> JsResult<()> {
        self.define_property(obj, PropKey::Atom(atom), val)
    }

    pub(crate) fn define_property(&mut self, obj: JSValue, key: PropKey, val: JSValue) -> JsResult<()> {
        let Some((addr, header)) = self.object_header(obj) else {
            return Err(self.throw_type_error("not an object"));
        };
        if let (JSObjectClass::Array, PropKey::Index(idx)) = (header.class(), key) {
            return self.array_set(obj, idx, val);
        }
        match self.find_own(addr, key)? {
            Some(slot) => self.set_slot(slot, val, JSPropType::Normal),
            None => self.add_own(obj, key, val, JSPropType::Normal),
        }
    }

    /// Installs an accessor. `undefined` leaves the existing half in place.
    pub(crate) fn define_getset(
        &mut self,
        obj: JSValue,
        key: PropKey,
        getter: JSValue,
        setter: JSValue,
    ) -> JsResult<()> {
        let Some((addr, _)) = self.object_header(obj) else {
            return Err(self.throw_type_error("not an object"));
        };
        if let Some(slot) = self.find_own(addr, key)? {
            if let (pair, JSPropType::GetSet) = self.slot_value(slot)? {
                let pair = value_get_ptr(pair);
                if !getter.is_undefined() {
                    self.mem.set_field(pair, 1, getter)?;
                }
                if !setter.is_undefined() {
                    self.mem.set_field(pair, 2, setter)?;
                }
                return Ok(());
            }
        }
        let pair = self.new_value_array(2)?;
        self.mem.set_field(pair, 1, getter)?;
        self.mem.set_field(pair, 2, setter)?;
        match self.find_own(addr, key)? {
            Some(slot) => self.set_slot(slot, value_from_ptr(pair), JSPropType::GetSet),
            None => self.add_own(obj, key, value_from_ptr(pair), JSPropType::GetSet),
        }
    }

    pub fn get_prop(&mut self, obj: JSValue, atom: JSValue) -> JsResult<JSValue> {
        self.get_property(obj, PropKey::Atom(atom))
    }

    pub fn get_property(&mut self, this_val: JSValue, key: PropKey) -> JsResult<JSValue> {
        if this_val.is_undefined() || this_val.is_null() {
            let name = self.key_to_string(key);
            let what = if this_val.is_null() { "null" } else { "undefined" };
            return Err(self.throw_type_error(format_args!("cannot read property '{name}' of {what}")));
        }
        if self.is_string(this_val) {
            if let PropKey::Index(idx) = key {
                if let Some(c) = self.string_char_at(this_val, idx)? {
                    return Ok(c);
                }
            } else if self.key_is(key, self.roots.atoms.length) {
                return Ok(new_short_int(self.string_length(this_val)? as i32));
            }
        }
        if let ValueKind::ShortFunc(idx) = this_val.kind() {
            if let Some(val) = self.cfunction_virtual_prop(idx, key)? {
                return Ok(val);
            }
        }
        let mut obj = if self.is_object(this_val) {
            this_val
        } else {
            self.lookup_proto(this_val)?
        };
        while let Some((addr, header)) = self.object_header(obj) {
            if let Some(val) = self.get_exotic(obj, header.class(), key)? {
                return Ok(val);
            }
            if let Some(slot) = self.find_own(addr, key)? {
                return match self.slot_value(slot)? {
                    (val, JSPropType::Normal) => Ok(val),
                    (pair, JSPropType::GetSet) => {
                        let getter = self.mem.field(value_get_ptr(pair), 1)?;
                        if getter.is_undefined() {
                            Ok(JS_UNDEFINED)
                        } else {
                            self.call_function(getter, this_val, &[])
                        }
                    }
                };
            }
            if let Some(val) = self.get_lazy(obj, header.class(), key)? {
                return Ok(val);
            }
            obj = self.mem.field(addr, OBJ_PROTO)?;
        }
        Ok(JS_UNDEFINED)
    }

    /// Virtual properties answered before the property table.
    fn get_exotic(&mut self, obj: JSValue, class: JSObjectClass, key: PropKey) -> JsResult<Option<JSValue>> {
        match class {
            JSObjectClass::Array => match key {
                PropKey::Index(idx) => {
                    let (tab, len) = self.array_parts(obj)?;
                    if idx < len {
                        return Ok(Some(self.mem.field(tab, 1 + idx)?));
                    }
                    Ok(Some(JS_UNDEFINED))
                }
                _ if self.key_is(key, self.roots.atoms.length) => {
                    Ok(Some(self.object_field(obj, ARRAY_LEN)?))
                }
                _ => Ok(None),
            },
            c if c.is_typed_array() => match key {
                PropKey::Index(idx) => Ok(Some(self.typed_array_get(obj, idx)?.unwrap_or(JS_UNDEFINED))),
                _ if self.key_is(key, self.roots.atoms.length) => {
                    Ok(Some(self.object_field(obj, crate::object::TYPED_ARRAY_LEN)?))
                }
                _ => Ok(None),
            },
            JSObjectClass::String => {
                let prim = self.object_field(obj, crate::object::PRIMITIVE_VALUE)?;
                match key {
                    PropKey::Index(idx) => self.string_char_at(prim, idx),
                    _ if self.key_is(key, self.roots.atoms.length) => {
                        Ok(Some(new_short_int(self.string_length(prim)? as i32)))
                    }
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    /// Function properties materialized on first read.
    fn get_lazy(&mut self, obj: JSValue, class: JSObjectClass, key: PropKey) -> JsResult<Option<JSValue>> {
        match class {
            JSObjectClass::Closure => {
                let fb = self.object_field(obj, CLOSURE_FUNC)?;
                let fb_addr = value_get_ptr(fb);
                let fb_header: FunctionBytecodeHeader = self.typed_header(fb_addr, MTag::FunctionBytecode)?;
                if self.key_is(key, self.roots.atoms.name) {
                    let name = self.mem.field(fb_addr, FB_FUNC_NAME)?;
                    return Ok(Some(if self.is_string(name) { name } else { self.roots.empty_string }));
                }
                if self.key_is(key, self.roots.atoms.length) {
                    return Ok(Some(new_short_int(fb_header.arg_count() as i32)));
                }
                if self.key_is(key, self.roots.atoms.prototype) && !fb_header.is_arrow() {
                    return self.create_prototype(obj).map(Some);
                }
                Ok(None)
            }
            JSObjectClass::CFunction => {
                let idx = self.object_field(obj, CFUNC_IDX)?.get_int() as u32;
                if let Some(val) = self.cfunction_virtual_prop(idx, key)? {
                    return Ok(Some(val));
                }
                let is_ctor = self
                    .stdlib
                    .c_function(idx)
                    .map(|def| def.func.is_constructor())
                    .unwrap_or(false);
                if is_ctor && self.key_is(key, self.roots.atoms.prototype) {
                    return self.create_prototype(obj).map(Some);
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn cfunction_virtual_prop(&mut self, idx: u32, key: PropKey) -> JsResult<Option<JSValue>> {
        let Some(def) = self.stdlib.c_function(idx) else {
            return Ok(None);
        };
        if self.key_is(key, self.roots.atoms.name) {
            return self.new_string(def.name.as_bytes()).map(Some);
        }
        if self.key_is(key, self.roots.atoms.length) {
            return Ok(Some(new_short_int(def.arg_count as i32)));
        }
        Ok(None)
    }

    /// Default `prototype` object of a constructible function.
    fn create_prototype(&mut self, func: JSValue) -> JsResult<JSValue> {
        let proto = self.new_object()?;
        self.define_prop(proto, self.roots.atoms.constructor, func)?;
        self.define_prop(func, self.roots.atoms.prototype, proto)?;
        Ok(proto)
    }

    pub fn set_prop(&mut self, obj: JSValue, atom: JSValue, val: JSValue) -> JsResult<()> {
        self.set_property(obj, PropKey::Atom(atom), val)
    }

    pub fn set_property(&mut self, this_val: JSValue, key: PropKey, val: JSValue) -> JsResult<()> {
        let Some((addr, header)) = self.object_header(this_val) else {
            if this_val.is_undefined() || this_val.is_null() {
                let name = self.key_to_string(key);
                let what = if this_val.is_null() { "null" } else { "undefined" };
                return Err(self.throw_type_error(format_args!("cannot set property '{name}' of {what}")));
            }
            // Writes to primitives are dropped.
            return Ok(());
        };
        match (header.class(), key) {
            (JSObjectClass::Array, PropKey::Index(idx)) => return self.array_set(this_val, idx, val),
            (JSObjectClass::Array, _) if self.key_is(key, self.roots.atoms.length) => {
                return self.array_set_length(this_val, val);
            }
            (c, PropKey::Index(idx)) if c.is_typed_array() => {
                return self.typed_array_set(this_val, idx, val);
            }
            _ => {}
        }
        if let Some(slot) = self.find_own(addr, key)? {
            return match self.slot_value(slot)? {
                (_, JSPropType::Normal) => self.set_slot(slot, val, JSPropType::Normal),
                (pair, JSPropType::GetSet) => self.call_setter(pair, this_val, key, val),
            };
        }
        let mut proto = self.mem.field(addr, OBJ_PROTO)?;
        while let Some((proto_addr, _)) = self.object_header(proto) {
            if let Some(slot) = self.find_own(proto_addr, key)? {
                if let (pair, JSPropType::GetSet) = self.slot_value(slot)? {
                    return self.call_setter(pair, this_val, key, val);
                }
                break;
            }
            proto = self.mem.field(proto_addr, OBJ_PROTO)?;
        }
        self.add_own(this_val, key, val, JSPropType::Normal)
    }

    fn call_setter(&mut self, pair: JSValue, this_val: JSValue, key: PropKey, val: JSValue) -> JsResult<()> {
        let setter = self.mem.field(value_get_ptr(pair), 2)?;
        if setter.is_undefined() {
            let name = self.key_to_string(key);
            return Err(self.throw_type_error(format_args!("no setter for property '{name}'")));
        }
        self.call_function(setter, this_val, &[val])?;
        Ok(())
    }

    pub fn delete_property(&mut self, obj: JSValue, key: PropKey) -> JsResult<bool> {
        let Some((addr, header)) = self.object_header(obj) else {
            if obj.is_undefined() || obj.is_null() {
                return Err(self.throw_type_error("cannot delete a property of undefined or null"));
            }
            return Ok(true);
        };
        if let (JSObjectClass::Array, PropKey::Index(idx)) = (header.class(), key) {
            let (tab, len) = self.array_parts(obj)?;
            if idx + 1 == len {
                self.set_object_field(obj, ARRAY_LEN, new_short_int(idx as i32))?;
            } else if idx < len {
                self.mem.set_field(tab, 1 + idx, JS_UNDEFINED)?;
            }
            return Ok(true);
        }
        let Some(slot) = self.find_own(addr, key)? else {
            return Ok(true);
        };
        let count = self.mem.field(slot.table, 1)?.get_int() as u32;
        let last = count - 1;
        if slot.index != last {
            for j in 0..3 {
                let v = self.mem.field(slot.table, prop_key_field(last) + j)?;
                self.mem.set_field(slot.table, prop_key_field(slot.index) + j, v)?;
            }
        }
        for j in 0..3 {
            self.mem.set_field(slot.table, prop_key_field(last) + j, JS_UNDEFINED)?;
        }
        self.mem.set_field(slot.table, 1, new_short_int(last as i32))?;
        Ok(true)
    }

    /// The `in` operator.
    pub fn has_property(&mut self, obj: JSValue, key: PropKey) -> JsResult<bool> {
        if !self.is_object(obj) {
            return Err(self.throw_type_error("invalid 'in' operand"));
        }
        let mut cur = obj;
        while let Some((addr, header)) = self.object_header(cur) {
            match (header.class(), key) {
                (JSObjectClass::Array, PropKey::Index(idx)) => {
                    if idx < self.array_parts(cur)?.1 {
                        return Ok(true);
                    }
                }
                (c, PropKey::Index(idx)) if c.is_typed_array() => {
                    if self.typed_array_get(cur, idx)?.is_some() {
                        return Ok(true);
                    }
                }
                (JSObjectClass::Array, _) if self.key_is(key, self.roots.atoms.length) => return Ok(true),
                _ => {}
            }
            if self.find_own(addr, key)?.is_some() {
                return Ok(true);
            }
            if header.class().is_function()
                && (self.key_is(key, self.roots.atoms.name) || self.key_is(key, self.roots.atoms.length))
            {
                return Ok(true);
            }
            cur = self.mem.field(addr, OBJ_PROTO)?;
        }
        Ok(false)
    }

    /// Own enumerable keys: array indices (as ints) then table keys.
    pub(crate) fn own_keys(&mut self, obj: JSValue) -> JsResult<Vec<JSValue>> {
        let mut keys = Vec::new();
        let Some((addr, header)) = self.object_header(obj) else {
            return Ok(keys);
        };
        match header.class() {
            JSObjectClass::Array => {
                let len = self.array_parts(obj)?.1;
                keys.extend((0..len).map(|i| new_short_int(i as i32)));
            }
            c if c.is_typed_array() => {
                let len = self.object_field(obj, crate::object::TYPED_ARRAY_LEN)?.get_int();
                keys.extend((0..len).map(new_short_int));
            }
            _ => {}
        }
        let props = self.mem.field(addr, OBJ_PROPS)?;
        if let Some(table) = value_to_ptr(props) {
            let count = self.mem.field(table, 1)?.get_int() as u32;
            for i in 0..count {
                keys.push(self.mem.field(table, prop_key_field(i))?);
            }
        }
        Ok(keys)
    }

    /// Keys visited by `for in`: own keys then inherited ones, stopping at
    /// the built-in prototypes. Shadowed keys appear once.
    pub(crate) fn for_in_keys(&mut self, obj: JSValue) -> JsResult<Vec<JSValue>> {
        let mut keys: Vec<JSValue> = Vec::new();
        let mut cur = obj;
        while self.is_object(cur) && !self.roots.protos.contains(&cur) {
            for key in self.own_keys(cur)? {
                let mut seen = false;
                for &k in &keys {
                    if k == key || (self.is_string(k) && self.is_string(key) && self.strings_equal(k, key)?) {
                        seen = true;
                        break;
                    }
                }
                if !seen {
                    keys.push(key);
                }
            }
            cur = self.get_prototype(cur)?;
        }
        Ok(keys)
    }

    pub fn is_function(&self, val: JSValue) -> bool {
        match val.kind() {
            ValueKind::ShortFunc(_) => true,
            _ => self
                .get_class_id(val)
                .map(|id| JSObjectClass::from_id(id).is_function())
                .unwrap_or(false),
        }
    }

    pub fn is_error(&self, val: JSValue) -> bool {
        self.get_class_id(val)
            .map(|id| JSObjectClass::from_id(id).is_error())
            .unwrap_or(false)
    }

    pub fn is_array(&self, val: JSValue) -> bool {
        self.get_class_id(val) == Some(JSObjectClass::Array as u8)
    }

    pub fn instance_of(&mut self, val: JSValue, ctor: JSValue) -> JsResult<bool> {
        if !self.is_function(ctor) {
            return Err(self.throw_type_error("invalid 'instanceof' right operand"));
        }
        let proto = self.get_prop(ctor, self.roots.atoms.prototype)?;
        if !self.is_object(proto) {
            return Err(self.throw_type_error("function has no valid prototype"));
        }
        if !self.is_object(val) {
            return Ok(false);
        }
        let mut cur = self.get_prototype(val)?;
        while self.is_object(cur) {
            if cur == proto {
                return Ok(true);
            }
            cur = self.get_prototype(cur)?;
        }
        Ok(false)
    }

    /// Element table address and length of an array.
    pub(crate) fn array_parts(&self, arr: JSValue) -> JsResult<(u32, u32)> {
        let tab = self.object_field(arr, ARRAY_TAB)?;
        let len = self.object_field(arr, ARRAY_LEN)?.get_int() as u32;
        Ok((value_to_ptr(tab).unwrap_or(0), len))
    }

    fn array_capacity(&self, tab: u32) -> JsResult<u32> {
        if tab == 0 {
            return Ok(0);
        }
        Ok(ValueArrayHeader::from(self.header_at(tab)?).size())
    }

    /// Grows the element table so `len` elements fit.
    fn array_reserve(&mut self, arr: JSValue, len: u32) -> JsResult<u32> {
        let (tab, cur_len) = self.array_parts(arr)?;
        let cap = self.array_capacity(tab)?;
        if len <= cap {
            return Ok(tab);
        }
        if len > JS_VALUE_ARRAY_SIZE_MAX / 2 {
            return Err(self.throw_range_error("invalid array length"));
        }
        let new_cap = len.max(cap + cap / 2).max(ARRAY_MIN_CAPACITY);
        let new_tab = self.new_value_array(new_cap)?;
        for i in 1..=cur_len {
            let v = self.mem.field(tab, i)?;
            self.mem.set_field(new_tab, i, v)?;
        }
        self.set_object_field(arr, ARRAY_TAB, value_from_ptr(new_tab))?;
        Ok(new_tab)
    }

    pub(crate) fn array_set(&mut self, arr: JSValue, idx: u32, val: JSValue) -> JsResult<()> {
        let (tab, len) = self.array_parts(arr)?;
        if idx < len {
            self.mem.set_field(tab, 1 + idx, val)?;
            return Ok(());
        }
        let tab = self.array_reserve(arr, idx + 1)?;
        for i in len..idx {
            self.mem.set_field(tab, 1 + i, JS_UNDEFINED)?;
        }
        self.mem.set_field(tab, 1 + idx, val)?;
        self.set_object_field(arr, ARRAY_LEN, new_short_int(idx as i32 + 1))?;
        Ok(())
    }

    pub(crate) fn array_push(&mut self, arr: JSValue, val: JSValue) -> JsResult<()> {
        let len = self.array_parts(arr)?.1;
        self.array_set(arr, len, val)
    }

    fn array_set_length(&mut self, arr: JSValue, val: JSValue) -> JsResult<()> {
        let n = self.to_number(val)?;
        let new_len = n as u32;
        if new_len as f64 != n {
            return Err(self.throw_range_error("invalid array length"));
        }
        let (tab, len) = self.array_parts(arr)?;
        if new_len > len {
            let tab = self.array_reserve(arr, new_len)?;
            for i in len..new_len {
                self.mem.set_field(tab, 1 + i, JS_UNDEFINED)?;
            }
        } else {
            for i in new_len..len {
                self.mem.set_field(tab, 1 + i, JS_UNDEFINED)?;
            }
        }
        self.set_object_field(arr, ARRAY_LEN, new_short_int(new_len as i32))
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::context::tests::new_context;
    use crate::jsvalue::{JS_EXCEPTION, JS_TRUE};

    #[test]
    fn set_then_get_roundtrips() {
        let mut ctx = new_context();
        let obj = ctx.new_object().unwrap();
        let k = ctx.intern(b"key").unwrap();
        for val in [new_short_int(7), JS_NULL, JS_UNDEFINED, JS_TRUE, JS_EXCEPTION] {
            ctx.set_prop(obj, k, val).unwrap();
            assert_eq!(ctx.get_prop(obj, k).unwrap(), val);
        }
        let missing = ctx.intern(b"missing").unwrap();
        assert_eq!(ctx.get_prop(obj, missing).unwrap(), JS_UNDEFINED);
    }

    #[test]
    fn table_grows_and_deletes_by_swapping() {
        let mut ctx = new_context();
        let obj = ctx.new_object().unwrap();
        let keys: Vec<JSValue> = (0..10)
            .map(|i| ctx.intern(format!("k{i}").as_bytes()).unwrap())
            .collect();
        for (i, &k) in keys.iter().enumerate() {
            ctx.set_prop(obj, k, new_short_int(i as i32)).unwrap();
        }
        assert!(ctx.delete_property(obj, PropKey::Atom(keys[2])).unwrap());
        assert_eq!(ctx.get_prop(obj, keys[2]).unwrap(), JS_UNDEFINED);
        assert_eq!(ctx.get_prop(obj, keys[9]).unwrap(), new_short_int(9));
        assert_eq!(ctx.own_keys(obj).unwrap().len(), 9);
    }

    #[test]
    fn arrays_are_dense() {
        let mut ctx = new_context();
        let arr = ctx.new_array(&[new_short_int(1)]).unwrap();
        ctx.set_property(arr, PropKey::Index(3), new_short_int(4)).unwrap();
        assert_eq!(ctx.array_parts(arr).unwrap().1, 4);
        assert_eq!(ctx.get_property(arr, PropKey::Index(2)).unwrap(), JS_UNDEFINED);
        let len = ctx.get_prop(arr, ctx.roots.atoms.length).unwrap();
        assert_eq!(len, new_short_int(4));
        ctx.set_prop(arr, ctx.roots.atoms.length, new_short_int(1)).unwrap();
        assert_eq!(ctx.get_property(arr, PropKey::Index(3)).unwrap(), JS_UNDEFINED);
    }

    #[test]
    fn prototype_chain_lookup() {
        let mut ctx = new_context();
        let proto = ctx.new_object().unwrap();
        let k = ctx.intern(b"inherited").unwrap();
        ctx.set_prop(proto, k, new_short_int(1)).unwrap();
        let obj = ctx.new_object_class(JSObjectClass::Object as u8, proto, 0).unwrap();
        assert_eq!(ctx.get_prop(obj, k).unwrap(), new_short_int(1));
        assert!(ctx.has_property(obj, PropKey::Atom(k)).unwrap());
        ctx.set_prop(obj, k, new_short_int(2)).unwrap();
        assert_eq!(ctx.get_prop(proto, k).unwrap(), new_short_int(1));
    }

    #[test]
    fn reading_from_undefined_throws_type_error() {
        let mut ctx = new_context();
        let k = ctx.intern(b"y").unwrap();
        assert!(ctx.get_prop(JS_UNDEFINED, k).is_err());
        let exc = ctx.get_exception();
        assert_eq!(ctx.get_class_id(exc), Some(JSObjectClass::TypeError as u8));
    }

    #[test]
    fn index_keys_on_plain_objects_use_decimal_atoms() {
        let mut ctx = new_context();
        let obj = ctx.new_object().unwrap();
        ctx.set_property(obj, PropKey::Index(5), JS_TRUE).unwrap();
        let five = ctx.intern(b"5").unwrap();
        assert_eq!(five, new_string_char('5' as u32));
        assert_eq!(ctx.get_prop(obj, five).unwrap(), JS_TRUE);
    }

    #[test]
    fn user_objects_need_a_user_class() {
        let mut ctx = new_context();
        assert!(ctx.new_object_user(JSObjectClass::Array as u8, core::ptr::null_mut()).is_err());
        ctx.get_exception();
    }
}
