//! Exceptions.
//!
//! Internally every fallible operation returns [`JsResult`]. The thrown
//! value itself is kept in the context as the pending exception; the error
//! variants that cannot allocate at the failure point (out of memory, stack
//! overflow, interruption) are turned into error objects when they reach a
//! catch handler or the public API.

use crate::context::JSContext;
use crate::enums::JSObjectClass;
use crate::heap::HeapError;
use crate::jsvalue::{JSValue, JS_EXCEPTION, JS_UNDEFINED};
use crate::memory::MemoryError;
use core::fmt::Display;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Exception {
    /// The pending exception of the context holds the thrown value.
    #[error("exception thrown")]
    Thrown,
    /// The interrupt handler requested termination. Not catchable.
    #[error("interrupted")]
    Interrupted,
    #[error("out of memory")]
    OutOfMemory,
    #[error("stack overflow")]
    StackOverflow,
    #[error("invalid bytecode")]
    InvalidBytecode,
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

pub type JsResult<T> = Result<T, Exception>;

impl From<HeapError> for Exception {
    fn from(err: HeapError) -> Self {
        match err {
            HeapError::OutOfMemory => Exception::OutOfMemory,
            HeapError::StackOverflow => Exception::StackOverflow,
            HeapError::Memory(err) => Exception::Memory(err),
        }
    }
}

impl<'a> JSContext<'a> {
    /// Makes `val` the pending exception.
    pub fn throw(&mut self, val: JSValue) -> Exception {
        self.current_exception = val;
        Exception::Thrown
    }

    /// Throws a new error object of `class` (one of the error classes).
    pub fn throw_error(&mut self, class: JSObjectClass, message: impl Display) -> Exception {
        let message = message.to_string();
        match self.new_error_object(class, &message, true) {
            Ok(obj) => self.throw(obj),
            Err(err) => err,
        }
    }

    pub fn throw_type_error(&mut self, message: impl Display) -> Exception {
        self.throw_error(JSObjectClass::TypeError, message)
    }

    pub fn throw_range_error(&mut self, message: impl Display) -> Exception {
        self.throw_error(JSObjectClass::RangeError, message)
    }

    pub fn throw_reference_error(&mut self, message: impl Display) -> Exception {
        self.throw_error(JSObjectClass::ReferenceError, message)
    }

    pub fn throw_syntax_error(&mut self, message: impl Display) -> Exception {
        self.throw_error(JSObjectClass::SyntaxError, message)
    }

    pub fn throw_internal_error(&mut self, message: impl Display) -> Exception {
        self.throw_error(JSObjectClass::InternalError, message)
    }

    /// Throws the preallocated out-of-memory error. Never allocates.
    pub fn throw_out_of_memory(&mut self) -> Exception {
        let oom = self.roots.oom_error;
        self.throw(oom)
    }

    pub(crate) fn new_error_object(
        &mut self,
        class: JSObjectClass,
        message: &str,
        with_stack: bool,
    ) -> JsResult<JSValue> {
        debug_assert!(class.is_error());
        let proto = self.class_proto(class as u8);
        let obj = self.new_object_class(class as u8, proto, 0)?;
        let msg = self.new_string(message.as_bytes())?;
        self.define_prop(obj, self.roots.atoms.message, msg)?;
        if with_stack {
            let stack = self.backtrace();
            if !stack.is_empty() {
                let stack = self.new_string(stack.as_bytes())?;
                self.define_prop(obj, self.roots.atoms.stack, stack)?;
            }
        }
        Ok(obj)
    }

    fn set_pending_error(&mut self, class: JSObjectClass, message: &str) -> JSValue {
        let val = self
            .new_error_object(class, message, true)
            .unwrap_or(self.roots.oom_error);
        self.current_exception = val;
        val
    }

    /// Turns `err` into the pending exception value and returns it.
    pub(crate) fn materialize(&mut self, err: Exception) -> JSValue {
        match err {
            Exception::Thrown => self.current_exception,
            Exception::OutOfMemory => {
                self.current_exception = self.roots.oom_error;
                self.current_exception
            }
            Exception::StackOverflow => self.set_pending_error(JSObjectClass::RangeError, "stack overflow"),
            Exception::Interrupted => {
                let val = self.set_pending_error(JSObjectClass::InternalError, "interrupted");
                self.uncatchable = true;
                val
            }
            Exception::InvalidBytecode => self.set_pending_error(JSObjectClass::InternalError, "invalid bytecode"),
            Exception::Memory(err) => {
                self.set_pending_error(JSObjectClass::InternalError, &err.to_string())
            }
        }
    }

    /// Converts an internal result into the value returned by the public
    /// API: the value itself or `JS_EXCEPTION` with the exception pending.
    pub(crate) fn value_or_exception(&mut self, res: JsResult<JSValue>) -> JSValue {
        match res {
            Ok(val) => val,
            Err(err) => {
                self.materialize(err);
                JS_EXCEPTION
            }
        }
    }

    /// Returns and clears the pending exception (`undefined` if none).
    pub fn get_exception(&mut self) -> JSValue {
        self.uncatchable = false;
        core::mem::replace(&mut self.current_exception, JS_UNDEFINED)
    }

    /// `"Name: message"` of an error value, or its string conversion.
    pub fn error_to_string(&mut self, val: JSValue) -> JsResult<String> {
        let is_error = self
            .get_class_id(val)
            .map(|id| JSObjectClass::from_id(id).is_error())
            .unwrap_or(false);
        if !is_error {
            return self.to_rust_string(val);
        }
        let name = self.get_prop(val, self.roots.atoms.name)?;
        let name = self.to_rust_string(name)?;
        let message = self.get_prop(val, self.roots.atoms.message)?;
        let message = self.to_rust_string(message)?;
        Ok(if message.is_empty() {
            name
        } else {
            format!("{name}: {message}")
        })
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::context::tests::new_context;

    #[test]
    fn throw_error_sets_pending_exception() {
        let mut ctx = new_context();
        let err = ctx.throw_type_error(format_args!("{} is not a function", "foo"));
        assert_eq!(err, Exception::Thrown);
        let exc = ctx.get_exception();
        assert_eq!(ctx.get_class_id(exc), Some(JSObjectClass::TypeError as u8));
        assert_eq!(ctx.error_to_string(exc).unwrap(), "TypeError: foo is not a function");
        assert_eq!(ctx.get_exception(), JS_UNDEFINED);
    }

    #[test]
    fn out_of_memory_does_not_allocate() {
        let mut ctx = new_context();
        let free = ctx.heap.free_bytes();
        let val = ctx.materialize(Exception::OutOfMemory);
        assert_eq!(val, ctx.roots.oom_error);
        assert_eq!(ctx.heap.free_bytes(), free);
        let _ = ctx.throw_out_of_memory();
        assert_eq!(ctx.get_exception(), ctx.roots.oom_error);
    }

    #[test]
    fn interruption_is_uncatchable_until_retrieved() {
        let mut ctx = new_context();
        let val = ctx.value_or_exception(Err(Exception::Interrupted));
        assert_eq!(val, JS_EXCEPTION);
        assert!(ctx.uncatchable);
        let exc = ctx.get_exception();
        assert_eq!(ctx.error_to_string(exc).unwrap(), "InternalError: interrupted");
        assert!(!ctx.uncatchable);
    }

    #[test]
    fn stack_overflow_becomes_range_error() {
        let mut ctx = new_context();
        let val = ctx.materialize(Exception::StackOverflow);
        assert_eq!(ctx.get_class_id(val), Some(JSObjectClass::RangeError as u8));
    }
}
