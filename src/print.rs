//! Value printing and heap dumps.
//!
//! Output goes to the write function installed with
//! [`JSContext::set_log_func`]. Printing never runs script code: objects
//! are formatted from their property tables, getters are shown as
//! `[Getter/Setter]` and `toString` methods are ignored.

use crate::capi_defs::DumpFlags;
use crate::context::JSContext;
use crate::dtoa::js_number_to_string;
use crate::enums::{JSObjectClass, JSPropType};
use crate::heap::mblock_words;
use crate::jsvalue::{value_to_ptr, JSValue, ValueKind, JSW};
use crate::memblock::{MbHeader, MTag, JS_MTAG_COUNT};
use crate::object::{OBJ_PROPS, PRIMITIVE_VALUE, REGEXP_FLAGS, REGEXP_SOURCE};
use core::fmt::Write;

/// Nesting shown by `JS_DUMP_LONG` before objects collapse to `[Object]`.
const DUMP_DEPTH_MAX: u32 = 4;
/// Elements or properties shown per object.
const DUMP_ITEMS_MAX: u32 = 32;

/// Per-tag block statistics gathered by [`JSContext::dump_memory`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockStats {
    pub count: u32,
    pub bytes: u32,
}

impl<'a> JSContext<'a> {
    /// Writes `val` to the log function.
    ///
    /// Without flags strings are quoted and objects print as a short
    /// `[Class]` tag. `JS_DUMP_LONG` expands arrays, objects and error
    /// stacks. `JS_DUMP_NOQUOTE` prints a top-level string verbatim.
    pub fn print_value(&mut self, val: JSValue, flags: DumpFlags) {
        let mut out = String::new();
        self.format_value(&mut out, val, flags, 0);
        self.write_log(out.as_bytes());
    }

    /// Writes `label: value` followed by a newline.
    pub fn dump_value(&mut self, label: &str, val: JSValue, flags: DumpFlags) {
        let mut out = format!("{label}: ");
        self.format_value(&mut out, val, flags, 0);
        out.push('\n');
        self.write_log(out.as_bytes());
    }

    /// Formats `val` the way [`JSContext::print_value`] writes it.
    pub fn format_value_string(&mut self, val: JSValue, flags: DumpFlags) -> String {
        let mut out = String::new();
        self.format_value(&mut out, val, flags, 0);
        out
    }

    fn format_value(&mut self, out: &mut String, val: JSValue, flags: DumpFlags, depth: u32) {
        match val.kind() {
            ValueKind::Int(i) => {
                let _ = write!(out, "{i}");
            }
            ValueKind::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            ValueKind::Null => out.push_str("null"),
            ValueKind::Undefined => out.push_str("undefined"),
            ValueKind::Exception(_) => out.push_str("[exception]"),
            ValueKind::Uninitialized => out.push_str("[uninitialized]"),
            ValueKind::CatchOffset(pc) => {
                let _ = write!(out, "[catch offset {pc}]");
            }
            ValueKind::ShortFunc(_) => {
                let name = self.function_name(val).unwrap_or_default();
                let _ = write!(out, "[Function {name}]");
            }
            ValueKind::StringChar(_) => self.format_string(out, val, flags, depth),
            ValueKind::Ptr(addr) => match self.block_tag(addr) {
                Some(MTag::String) => self.format_string(out, val, flags, depth),
                Some(MTag::Float64) => {
                    let d = self.mem.read_f64(addr + JSW).unwrap_or(f64::NAN);
                    out.push_str(&js_number_to_string(d));
                }
                Some(MTag::Object) => self.format_object(out, val, flags, depth),
                Some(tag) => {
                    let _ = write!(out, "[{}]", tag.name());
                }
                None => {
                    let _ = write!(out, "[invalid pointer {addr:#010x}]");
                }
            },
        }
    }

    fn format_string(&self, out: &mut String, val: JSValue, flags: DumpFlags, depth: u32) {
        let s = self.string_to_rust(val).unwrap_or_default();
        if depth == 0 && flags.contains(DumpFlags::NOQUOTE) {
            out.push_str(&s);
            return;
        }
        out.push('"');
        for c in s.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => {
                    let _ = write!(out, "\\x{:02x}", c as u32);
                }
                c => out.push(c),
            }
        }
        out.push('"');
    }

    fn format_object(&mut self, out: &mut String, obj: JSValue, flags: DumpFlags, depth: u32) {
        let Some(class) = self.get_class_id(obj).map(JSObjectClass::from_id) else {
            return;
        };
        if class.is_function() {
            let name = self.function_name(obj).unwrap_or_default();
            if name.is_empty() {
                out.push_str("[Function]");
            } else {
                let _ = write!(out, "[Function {name}]");
            }
            return;
        }
        if class.is_error() {
            self.format_error(out, obj, flags);
            return;
        }
        let long = flags.contains(DumpFlags::LONG);
        match class {
            JSObjectClass::Number | JSObjectClass::Boolean | JSObjectClass::String if long => {
                let prim = self.object_field(obj, PRIMITIVE_VALUE).unwrap_or_default();
                let _ = write!(out, "[{} ", class.name());
                self.format_value(out, prim, flags, depth + 1);
                out.push(']');
            }
            JSObjectClass::RegExp => {
                let field = |idx| {
                    self.object_field(obj, idx)
                        .and_then(|v| self.string_to_rust(v))
                        .unwrap_or_default()
                };
                let _ = write!(out, "/{}/{}", field(REGEXP_SOURCE), field(REGEXP_FLAGS));
            }
            JSObjectClass::Array if long && depth < DUMP_DEPTH_MAX => {
                let (tab, len) = self.array_parts(obj).unwrap_or((0, 0));
                out.push('[');
                for i in 0..len.min(DUMP_ITEMS_MAX) {
                    out.push_str(if i == 0 { " " } else { ", " });
                    let elem = self.mem.field(tab, 1 + i).unwrap_or_default();
                    self.format_value(out, elem, flags, depth + 1);
                }
                if len > DUMP_ITEMS_MAX {
                    out.push_str(", ...");
                }
                out.push_str(if len == 0 { "]" } else { " ]" });
            }
            JSObjectClass::Object | JSObjectClass::User if long && depth < DUMP_DEPTH_MAX => {
                let entries = self.own_entries(obj);
                out.push('{');
                for (i, &(key, val, kind)) in entries.iter().take(DUMP_ITEMS_MAX as usize).enumerate() {
                    out.push_str(if i == 0 { " " } else { ", " });
                    out.push_str(&self.string_to_rust(key).unwrap_or_default());
                    out.push_str(": ");
                    match kind {
                        JSPropType::GetSet => out.push_str("[Getter/Setter]"),
                        JSPropType::Normal => self.format_value(out, val, flags, depth + 1),
                    }
                }
                if entries.len() > DUMP_ITEMS_MAX as usize {
                    out.push_str(", ...");
                }
                out.push_str(if entries.is_empty() { "}" } else { " }" });
            }
            _ => {
                let _ = write!(out, "[{}]", class.name());
            }
        }
    }

    /// `Name: message`, plus the stack with `JS_DUMP_LONG`.
    fn format_error(&self, out: &mut String, obj: JSValue, flags: DumpFlags) {
        let mut name = None;
        let mut message = None;
        let mut stack = None;
        for (key, val, kind) in self.own_entries(obj) {
            if kind != JSPropType::Normal || !self.is_string(val) {
                continue;
            }
            if self.key_is(crate::property::PropKey::Atom(key), self.roots.atoms.name) {
                name = self.string_to_rust(val).ok();
            } else if self.key_is(crate::property::PropKey::Atom(key), self.roots.atoms.message) {
                message = self.string_to_rust(val).ok();
            } else if self.key_is(crate::property::PropKey::Atom(key), self.roots.atoms.stack) {
                stack = self.string_to_rust(val).ok();
            }
        }
        let class_name = self
            .get_class_id(obj)
            .map(|id| JSObjectClass::from_id(id).name())
            .unwrap_or("Error");
        out.push_str(name.as_deref().unwrap_or(class_name));
        match message.as_deref() {
            Some(m) if !m.is_empty() => {
                let _ = write!(out, ": {m}");
            }
            _ => {}
        }
        if let Some(stack) = stack.filter(|_| flags.contains(DumpFlags::LONG)) {
            out.push('\n');
            out.push_str(stack.trim_end_matches('\n'));
        }
    }

    /// `(key, value, type)` of each own property table entry.
    fn own_entries(&self, obj: JSValue) -> Vec<(JSValue, JSValue, JSPropType)> {
        let mut entries = Vec::new();
        let Some(table) = value_to_ptr(obj)
            .and_then(|addr| self.mem.field(addr, OBJ_PROPS).ok())
            .and_then(value_to_ptr)
        else {
            return entries;
        };
        let count = self.mem.field(table, 1).map(|v| v.get_int()).unwrap_or(0).max(0) as u32;
        for i in 0..count {
            let field = 2 + 3 * i;
            let (Ok(key), Ok(val), Ok(kind)) = (
                self.mem.field(table, field),
                self.mem.field(table, field + 1),
                self.mem.field(table, field + 2),
            ) else {
                break;
            };
            let kind = JSPropType::from_raw(kind.get_int()).unwrap_or(JSPropType::Normal);
            entries.push((key, val, kind));
        }
        entries
    }

    /// Walks the heap and returns the number and size of blocks per tag,
    /// indexed by `MTag as usize`.
    pub fn memory_stats(&self) -> [BlockStats; JS_MTAG_COUNT] {
        let mut stats = [BlockStats::default(); JS_MTAG_COUNT];
        let mut addr = self.heap.heap_base();
        let end = self.heap.heap_free();
        while addr < end {
            let Ok(word) = self.mem.read_u32(addr) else {
                break;
            };
            let header = MbHeader::from_word(word);
            let size = mblock_words(header) * JSW;
            if size == 0 {
                break;
            }
            let entry = &mut stats[header.tag() as usize];
            entry.count += 1;
            entry.bytes += size;
            addr += size;
        }
        stats
    }

    /// Writes arena usage to the log function. `is_long` adds one line per
    /// block tag.
    pub fn dump_memory(&self, is_long: bool) {
        let heap_used = self.heap.heap_free() - self.heap.heap_base();
        let total = self.heap.stack_top() - self.heap.heap_base();
        let stack_used = self.heap.stack_top() - self.heap.sp();
        let mut out = format!(
            "heap size={heap_used}/{total} stack_size={stack_used} free={}\n",
            self.heap.free_bytes()
        );
        if is_long {
            let stats = self.memory_stats();
            for (bits, entry) in stats.iter().enumerate() {
                if entry.count == 0 {
                    continue;
                }
                let tag = MTag::from_bits(bits as u32);
                let _ = writeln!(out, "  {:<18} {:>6} {:>8}", tag.name(), entry.count, entry.bytes);
            }
            let _ = writeln!(
                out,
                "  gc refs: {} stacked, {} listed",
                self.gc_refs.stack_len(),
                self.gc_refs.list_len()
            );
        }
        self.write_log(out.as_bytes());
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::capi_defs::JS_EVAL_RETVAL;
    use crate::context::tests::new_context;
    use core::ffi::c_void;
    use std::cell::RefCell;

    thread_local! {
        static LOG: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
    }

    fn capture(_opaque: *mut c_void, buf: &[u8]) {
        LOG.with(|log| log.borrow_mut().extend_from_slice(buf));
    }

    fn take_log() -> String {
        LOG.with(|log| String::from_utf8(log.borrow_mut().split_off(0)).unwrap())
    }

    fn eval(ctx: &mut JSContext<'_>, src: &str) -> JSValue {
        ctx.eval(src.as_bytes(), "<test>", JS_EVAL_RETVAL).unwrap()
    }

    #[test]
    fn primitives() {
        let mut ctx = new_context();
        let s = ctx.new_string(b"a\"b\n").unwrap();
        assert_eq!(ctx.format_value_string(s, DumpFlags::empty()), "\"a\\\"b\\n\"");
        assert_eq!(ctx.format_value_string(s, DumpFlags::NOQUOTE), "a\"b\n");
        let d = ctx.new_float64(0.5).unwrap();
        assert_eq!(ctx.format_value_string(d, DumpFlags::empty()), "0.5");
        assert_eq!(ctx.format_value_string(crate::jsvalue::JS_NULL, DumpFlags::LONG), "null");
    }

    #[test]
    fn long_form_expands_structure() {
        let mut ctx = new_context();
        let val = eval(&mut ctx, "({a: [1, 'x', {}], b: function f() {}})");
        assert_eq!(ctx.format_value_string(val, DumpFlags::empty()), "[Object]");
        assert_eq!(
            ctx.format_value_string(val, DumpFlags::LONG),
            "{ a: [ 1, \"x\", {} ], b: [Function f] }"
        );
    }

    #[test]
    fn errors_show_stack_when_long() {
        let mut ctx = new_context();
        let val = eval(&mut ctx, "function g() { try { null.x; } catch (e) { return e; } }\ng()");
        let short = ctx.format_value_string(val, DumpFlags::empty());
        assert_eq!(short, "TypeError: cannot read property 'x' of null");
        let long = ctx.format_value_string(val, DumpFlags::LONG);
        assert!(long.starts_with(&format!("{short}\n    at g")), "{long}");
    }

    #[test]
    fn output_goes_to_the_log_function() {
        let mut ctx = new_context();
        ctx.set_log_func(Some(capture));
        take_log();
        ctx.dump_value("n", crate::jsvalue::new_short_int(7), DumpFlags::empty());
        assert_eq!(take_log(), "n: 7\n");
        ctx.dump_memory(true);
        let dump = take_log();
        assert!(dump.starts_with("heap size="));
        assert!(dump.contains("object"));
    }

    #[test]
    fn memory_stats_cover_the_heap() {
        let mut ctx = new_context();
        let stats = ctx.memory_stats();
        let total: u32 = stats.iter().map(|s| s.bytes).sum();
        assert_eq!(total, ctx.heap.heap_free() - ctx.heap.heap_base());
        let before = stats[MTag::Object as usize].count;
        ctx.new_object().unwrap();
        assert_eq!(ctx.memory_stats()[MTag::Object as usize].count, before + 1);
    }
}
