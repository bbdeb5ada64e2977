/// Kind of a property slot in an object's property table.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JSPropType {
    Normal = 0,
    /// Value is a two-element value array `[getter, setter]`.
    GetSet = 1,
}

impl JSPropType {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Normal),
            1 => Some(Self::GetSet),
            _ => None,
        }
    }
}

/// Built-in object classes. Ids from `User` upwards belong to the embedder.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum JSObjectClass {
    Object = 0,
    Array = 1,
    CFunction = 2,
    Closure = 3,
    Number = 4,
    Boolean = 5,
    String = 6,
    Date = 7,
    RegExp = 8,
    Error = 9,
    EvalError = 10,
    RangeError = 11,
    ReferenceError = 12,
    SyntaxError = 13,
    TypeError = 14,
    UriError = 15,
    InternalError = 16,
    ArrayBuffer = 17,
    TypedArray = 18,
    Uint8CArray = 19,
    Int8Array = 20,
    Uint8Array = 21,
    Int16Array = 22,
    Uint16Array = 23,
    Int32Array = 24,
    Uint32Array = 25,
    Float32Array = 26,
    Float64Array = 27,
    User = 28,
}

pub const JS_CLASS_USER: u8 = JSObjectClass::User as u8;

const ALL_CLASSES: [JSObjectClass; 29] = [
    JSObjectClass::Object,
    JSObjectClass::Array,
    JSObjectClass::CFunction,
    JSObjectClass::Closure,
    JSObjectClass::Number,
    JSObjectClass::Boolean,
    JSObjectClass::String,
    JSObjectClass::Date,
    JSObjectClass::RegExp,
    JSObjectClass::Error,
    JSObjectClass::EvalError,
    JSObjectClass::RangeError,
    JSObjectClass::ReferenceError,
    JSObjectClass::SyntaxError,
    JSObjectClass::TypeError,
    JSObjectClass::UriError,
    JSObjectClass::InternalError,
    JSObjectClass::ArrayBuffer,
    JSObjectClass::TypedArray,
    JSObjectClass::Uint8CArray,
    JSObjectClass::Int8Array,
    JSObjectClass::Uint8Array,
    JSObjectClass::Int16Array,
    JSObjectClass::Uint16Array,
    JSObjectClass::Int32Array,
    JSObjectClass::Uint32Array,
    JSObjectClass::Float32Array,
    JSObjectClass::Float64Array,
    JSObjectClass::User,
];

impl JSObjectClass {
    /// Maps a raw class id to a built-in class. Any id at or above
    /// `JS_CLASS_USER` maps to `User`.
    pub fn from_id(id: u8) -> Self {
        if id >= JS_CLASS_USER {
            return JSObjectClass::User;
        }
        ALL_CLASSES[id as usize]
    }

    pub fn is_error(self) -> bool {
        (JSObjectClass::Error as u8..=JSObjectClass::InternalError as u8).contains(&(self as u8))
    }

    pub fn is_typed_array(self) -> bool {
        (JSObjectClass::Uint8CArray as u8..=JSObjectClass::Float64Array as u8)
            .contains(&(self as u8))
    }

    pub fn is_function(self) -> bool {
        matches!(self, JSObjectClass::CFunction | JSObjectClass::Closure)
    }

    /// Element size in bytes for typed-array classes.
    pub fn typed_array_elem_size(self) -> Option<u32> {
        let size = match self {
            JSObjectClass::Uint8CArray | JSObjectClass::Int8Array | JSObjectClass::Uint8Array => 1,
            JSObjectClass::Int16Array | JSObjectClass::Uint16Array => 2,
            JSObjectClass::Int32Array
            | JSObjectClass::Uint32Array
            | JSObjectClass::Float32Array => 4,
            JSObjectClass::Float64Array => 8,
            _ => return None,
        };
        Some(size)
    }

    pub fn name(self) -> &'static str {
        match self {
            JSObjectClass::Object => "Object",
            JSObjectClass::Array => "Array",
            JSObjectClass::CFunction | JSObjectClass::Closure => "Function",
            JSObjectClass::Number => "Number",
            JSObjectClass::Boolean => "Boolean",
            JSObjectClass::String => "String",
            JSObjectClass::Date => "Date",
            JSObjectClass::RegExp => "RegExp",
            JSObjectClass::Error => "Error",
            JSObjectClass::EvalError => "EvalError",
            JSObjectClass::RangeError => "RangeError",
            JSObjectClass::ReferenceError => "ReferenceError",
            JSObjectClass::SyntaxError => "SyntaxError",
            JSObjectClass::TypeError => "TypeError",
            JSObjectClass::UriError => "URIError",
            JSObjectClass::InternalError => "InternalError",
            JSObjectClass::ArrayBuffer => "ArrayBuffer",
            JSObjectClass::TypedArray => "TypedArray",
            JSObjectClass::Uint8CArray => "Uint8ClampedArray",
            JSObjectClass::Int8Array => "Int8Array",
            JSObjectClass::Uint8Array => "Uint8Array",
            JSObjectClass::Int16Array => "Int16Array",
            JSObjectClass::Uint16Array => "Uint16Array",
            JSObjectClass::Int32Array => "Int32Array",
            JSObjectClass::Uint32Array => "Uint32Array",
            JSObjectClass::Float32Array => "Float32Array",
            JSObjectClass::Float64Array => "Float64Array",
            JSObjectClass::User => "Object",
        }
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn prop_type_from_raw() {
        assert_eq!(JSPropType::from_raw(0), Some(JSPropType::Normal));
        assert_eq!(JSPropType::from_raw(1), Some(JSPropType::GetSet));
        assert_eq!(JSPropType::from_raw(7), None);
    }

    #[test]
    fn object_class_ids_are_stable() {
        for (id, class) in ALL_CLASSES.iter().enumerate() {
            assert_eq!(*class as usize, id);
            assert_eq!(JSObjectClass::from_id(id as u8), *class);
        }
        assert_eq!(JSObjectClass::from_id(200), JSObjectClass::User);
        assert_eq!(JSObjectClass::Error as u8, 9);
        assert_eq!(JSObjectClass::InternalError as u8, 16);
    }

    #[test]
    fn error_and_typed_array_ranges() {
        assert!(JSObjectClass::TypeError.is_error());
        assert!(!JSObjectClass::ArrayBuffer.is_error());
        assert!(JSObjectClass::Uint8CArray.is_typed_array());
        assert!(!JSObjectClass::TypedArray.is_typed_array());
        assert_eq!(JSObjectClass::Float64Array.typed_array_elem_size(), Some(8));
        assert_eq!(JSObjectClass::Object.typed_array_elem_size(), None);
    }
}
