//! Roots held by native code.
//!
//! Two disciplines: a stack for strictly nested lifetimes (pop must match
//! the most recent push) and a handle list for lifetimes that end in any
//! order. Both hand out small handles instead of addresses; the slot behind
//! a handle can be read or updated in place through the state. [`GcRoot`]
//! wraps a stack slot in a guard that pops it on every exit path.

use crate::context::JSContext;
use crate::jsvalue::{JSValue, JS_UNDEFINED};
use core::ops::{Deref, DerefMut};
use slotmap::{new_key_type, SlotMap};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GcRefError {
    #[error("GC ref stack is empty")]
    StackEmpty,
    #[error("GC ref popped out of order (top is {top}, got {got})")]
    OutOfOrder { top: u32, got: u32 },
    #[error("GC ref handle is no longer linked")]
    StaleHandle,
}

/// Slot pushed with stack discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStackRef {
    depth: u32,
}

new_key_type! {
    /// Slot linked with list discipline. Deleted handles never alias a
    /// later slot.
    pub struct GcListRef;
}

#[derive(Debug, Default)]
pub struct GcRefState {
    stack: Vec<JSValue>,
    list: SlotMap<GcListRef, JSValue>,
}

impl GcRefState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a slot initialized to `undefined`.
    pub fn push_gc_ref(&mut self) -> GcStackRef {
        self.stack.push(JS_UNDEFINED);
        GcStackRef {
            depth: self.stack.len() as u32 - 1,
        }
    }

    /// Pops `reference`, which must be the most recent push. An out-of-order
    /// pop is rejected and leaves the stack untouched.
    pub fn pop_gc_ref(&mut self, reference: GcStackRef) -> Result<JSValue, GcRefError> {
        let top = match self.stack.len() {
            0 => return Err(GcRefError::StackEmpty),
            len => len as u32 - 1,
        };
        if reference.depth != top {
            return Err(GcRefError::OutOfOrder {
                top,
                got: reference.depth,
            });
        }
        self.stack.pop().ok_or(GcRefError::StackEmpty)
    }

    /// Pops `reference` together with every slot pushed after it.
    pub fn unwind_to(&mut self, reference: GcStackRef) {
        self.stack.truncate(reference.depth as usize);
    }

    pub fn stack_slot_mut(&mut self, reference: GcStackRef) -> Result<&mut JSValue, GcRefError> {
        self.stack
            .get_mut(reference.depth as usize)
            .ok_or(GcRefError::StaleHandle)
    }

    pub fn stack_get(&self, reference: GcStackRef) -> Result<JSValue, GcRefError> {
        self.stack
            .get(reference.depth as usize)
            .copied()
            .ok_or(GcRefError::StaleHandle)
    }

    /// Links a new slot initialized to `undefined`.
    pub fn add_gc_ref(&mut self) -> GcListRef {
        self.list.insert(JS_UNDEFINED)
    }

    /// Unlinks `reference` and returns the value it held.
    pub fn delete_gc_ref(&mut self, reference: GcListRef) -> Result<JSValue, GcRefError> {
        self.list.remove(reference).ok_or(GcRefError::StaleHandle)
    }

    pub fn list_slot_mut(&mut self, reference: GcListRef) -> Result<&mut JSValue, GcRefError> {
        self.list.get_mut(reference).ok_or(GcRefError::StaleHandle)
    }

    pub fn list_get(&self, reference: GcListRef) -> Result<JSValue, GcRefError> {
        self.list.get(reference).copied().ok_or(GcRefError::StaleHandle)
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn list_len(&self) -> usize {
        self.list.len()
    }

    /// Every rooted value, for the collector.
    pub fn roots(&self) -> impl Iterator<Item = JSValue> + '_ {
        self.stack.iter().copied().chain(self.list.values().copied())
    }
}

/// A stack root released when dropped.
///
/// The guard borrows the context mutably and dereferences to it, so nested
/// guards drop in reverse order of creation. Dropping a guard also pops any
/// slot pushed after it and not popped yet.
pub struct GcRoot<'c, 'a> {
    ctx: &'c mut JSContext<'a>,
    reference: GcStackRef,
}

impl<'c, 'a> GcRoot<'c, 'a> {
    pub fn get(&self) -> JSValue {
        self.ctx.gc_refs.stack_get(self.reference).unwrap_or(JS_UNDEFINED)
    }

    pub fn set(&mut self, val: JSValue) {
        if let Ok(slot) = self.ctx.gc_refs.stack_slot_mut(self.reference) {
            *slot = val;
        }
    }
}

impl<'a> Deref for GcRoot<'_, 'a> {
    type Target = JSContext<'a>;

    fn deref(&self) -> &Self::Target {
        &*self.ctx
    }
}

impl DerefMut for GcRoot<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.ctx
    }
}

impl Drop for GcRoot<'_, '_> {
    fn drop(&mut self) {
        self.ctx.gc_refs.unwind_to(self.reference);
    }
}

impl<'a> JSContext<'a> {
    /// Roots `val` until the returned guard goes out of scope.
    pub fn root<'c>(&'c mut self, val: JSValue) -> GcRoot<'c, 'a> {
        let reference = self.gc_refs.push_gc_ref();
        let mut root = GcRoot { ctx: self, reference };
        root.set(val);
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::new_context;
    use crate::exception::{Exception, JsResult};
    use crate::property::PropKey;
    use crate::jsvalue::{new_short_int, JS_FALSE, JS_TRUE};

    #[test]
    fn push_pop_gc_ref_roundtrips_value() {
        let mut state = GcRefState::new();
        let reference = state.push_gc_ref();
        assert_eq!(state.stack_get(reference), Ok(JS_UNDEFINED));
        *state.stack_slot_mut(reference).unwrap() = JS_TRUE;
        assert_eq!(state.pop_gc_ref(reference), Ok(JS_TRUE));
        assert_eq!(state.stack_len(), 0);
    }

    #[test]
    fn nested_pushes_restore_root_set() {
        let mut state = GcRefState::new();
        let outer = state.push_gc_ref();
        *state.stack_slot_mut(outer).unwrap() = JS_FALSE;
        let before: Vec<_> = state.roots().collect();

        let refs: Vec<_> = (0..4)
            .map(|i| {
                let r = state.push_gc_ref();
                *state.stack_slot_mut(r).unwrap() = new_short_int(i);
                r
            })
            .collect();
        for (i, r) in refs.into_iter().enumerate().rev() {
            assert_eq!(state.pop_gc_ref(r), Ok(new_short_int(i as i32)));
        }
        assert_eq!(state.roots().collect::<Vec<_>>(), before);
    }

    #[test]
    fn out_of_order_pop_is_rejected() {
        let mut state = GcRefState::new();
        let first = state.push_gc_ref();
        let second = state.push_gc_ref();
        assert_eq!(
            state.pop_gc_ref(first),
            Err(GcRefError::OutOfOrder { top: 1, got: 0 })
        );
        assert_eq!(state.stack_len(), 2);
        assert!(state.pop_gc_ref(second).is_ok());
        assert!(state.pop_gc_ref(first).is_ok());
        assert_eq!(state.pop_gc_ref(first), Err(GcRefError::StackEmpty));
    }

    #[test]
    fn add_delete_gc_ref_in_any_order() {
        let mut state = GcRefState::new();
        let a = state.add_gc_ref();
        let b = state.add_gc_ref();
        *state.list_slot_mut(a).unwrap() = JS_TRUE;
        *state.list_slot_mut(b).unwrap() = JS_FALSE;
        assert_eq!(state.list_len(), 2);
        assert_eq!(state.delete_gc_ref(a), Ok(JS_TRUE));
        assert_eq!(state.roots().collect::<Vec<_>>(), vec![JS_FALSE]);
        assert_eq!(state.delete_gc_ref(b), Ok(JS_FALSE));
        assert_eq!(state.list_len(), 0);
    }

    #[test]
    fn deleted_handle_is_stale() {
        let mut state = GcRefState::new();
        let a = state.add_gc_ref();
        state.delete_gc_ref(a).unwrap();
        let c = state.add_gc_ref();
        assert_eq!(state.delete_gc_ref(a), Err(GcRefError::StaleHandle));
        assert_eq!(state.list_get(a), Err(GcRefError::StaleHandle));
        assert_eq!(state.list_get(c), Ok(JS_UNDEFINED));
    }

    #[test]
    fn unwind_drops_later_pushes() {
        let mut state = GcRefState::new();
        let outer = state.push_gc_ref();
        let inner = state.push_gc_ref();
        state.push_gc_ref();
        state.unwind_to(inner);
        assert_eq!(state.stack_len(), 1);
        assert_eq!(state.pop_gc_ref(outer), Ok(JS_UNDEFINED));
    }

    fn rooted_then_fail(ctx: &mut JSContext<'_>, val: JSValue) -> JsResult<JSValue> {
        let mut root = ctx.root(val);
        root.temp_roots.clear();
        root.gc();
        assert!(root.is_live_block(val));
        // A slot pushed by hand and never popped.
        root.gc_refs.push_gc_ref();
        root.get_property(JS_UNDEFINED, PropKey::Index(0))?;
        Ok(root.get())
    }

    #[test]
    fn root_guard_releases_on_early_return() {
        let mut ctx = new_context();
        let s = ctx.new_string(b"guarded string").unwrap();
        assert_eq!(rooted_then_fail(&mut ctx, s), Err(Exception::Thrown));
        assert_eq!(ctx.gc_refs.stack_len(), 0);

        let r = ctx.gc_refs.push_gc_ref();
        assert_eq!(ctx.gc_refs.pop_gc_ref(r), Ok(JS_UNDEFINED));
        ctx.temp_roots.clear();
        ctx.gc();
        assert!(!ctx.is_live_block(s));
    }

    #[test]
    fn nested_root_guards() {
        let mut ctx = new_context();
        let a = ctx.new_string(b"outer value").unwrap();
        let b = ctx.new_string(b"inner value").unwrap();
        let mut outer = ctx.root(a);
        {
            let mut inner = outer.root(b);
            inner.temp_roots.clear();
            inner.gc();
            assert!(inner.is_live_block(a) && inner.is_live_block(b));
            assert_eq!(inner.get(), b);
            assert_eq!(inner.gc_refs.stack_len(), 2);
        }
        assert_eq!(outer.gc_refs.stack_len(), 1);
        outer.gc();
        assert!(outer.is_live_block(a));
        assert!(!outer.is_live_block(b));
        outer.set(JS_UNDEFINED);
        assert_eq!(outer.get(), JS_UNDEFINED);
    }
}
