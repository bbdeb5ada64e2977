use crate::capi_defs::{JSCFinalizer, JSCFunctionDef};
use crate::enums::JS_CLASS_USER;

/// Caller-owned description of the built-in environment of a context.
///
/// `stdlib_table` is mapped read-only into the context at `JS_STDLIB_BASE`
/// and must outlive it. Offsets are in 32-bit words from the start of the
/// table; `None` means the table has no such section.
#[derive(Copy, Clone, Debug)]
pub struct StdLibraryDef<'a> {
    pub stdlib_table: &'a [u8],
    pub c_function_table: &'a [JSCFunctionDef],
    /// Indexed by `class_id - JS_CLASS_USER`.
    pub c_finalizer_table: &'a [Option<JSCFinalizer>],
    pub stdlib_table_align: u32,
    pub sorted_atoms_offset: Option<u32>,
    pub global_object_offset: Option<u32>,
    /// Number of class ids, built-in classes included.
    pub class_count: u32,
}

impl StdLibraryDef<'static> {
    /// No ROM table, no native functions, built-in classes only.
    pub const EMPTY: StdLibraryDef<'static> = StdLibraryDef {
        stdlib_table: &[],
        c_function_table: &[],
        c_finalizer_table: &[],
        stdlib_table_align: 4,
        sorted_atoms_offset: None,
        global_object_offset: None,
        class_count: JS_CLASS_USER as u32,
    };
}

impl<'a> StdLibraryDef<'a> {
    pub fn c_function(&self, idx: u32) -> Option<&'a JSCFunctionDef> {
        self.c_function_table.get(idx as usize)
    }

    pub fn finalizer(&self, class_id: u8) -> Option<JSCFinalizer> {
        let idx = (class_id as usize).checked_sub(JS_CLASS_USER as usize)?;
        self.c_finalizer_table.get(idx).copied().flatten()
    }

    pub fn user_class_count(&self) -> u32 {
        self.class_count.saturating_sub(JS_CLASS_USER as u32)
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::context::JSContext;
    use core::ffi::c_void;

    fn fin(_ctx: &mut JSContext<'_>, _opaque: *mut c_void) {}

    #[test]
    fn finalizers_are_indexed_from_user_class() {
        let table = [None, Some(fin as JSCFinalizer)];
        let def = StdLibraryDef {
            c_finalizer_table: &table,
            class_count: JS_CLASS_USER as u32 + 2,
            ..StdLibraryDef::EMPTY
        };
        assert!(def.finalizer(JS_CLASS_USER).is_none());
        assert!(def.finalizer(JS_CLASS_USER + 1).is_some());
        assert!(def.finalizer(3).is_none());
        assert_eq!(def.user_class_count(), 2);
    }
}
