//! Compilation entry points.
//!
//! `parse` turns source text into a heap `FunctionBytecode` value, or, with
//! the JSON and REGEXP eval flags, directly into the value the text
//! describes. Syntax errors are thrown as `SyntaxError` objects whose
//! `stack` names the source position.

use super::emit::{Const, Emitter, FunctionDef};
use super::error::{LineIndex, ParseError};
use super::json::{parse_json, JsonValue};
use super::parse::parse_script;
use super::regexp_flags::{check_regexp_pattern, parse_regexp_flags, regexp_flags_to_string};
use crate::capi_defs::EvalFlags;
use crate::context::JSContext;
use crate::enums::JSObjectClass;
use crate::exception::{Exception, JsResult};
use crate::function_bytecode::{
    FunctionBytecodeHeader, FB_BLOCK_WORDS, FB_BYTE_CODE, FB_CLOSURE_VARS, FB_CPOOL, FB_FILENAME,
    FB_FUNC_NAME, FB_PC2LINE, FB_VARS, FB_VAR_COUNT,
};
use crate::jsvalue::{new_short_int, value_from_ptr, JSValue, JS_FALSE, JS_NULL, JS_TRUE};
use crate::object::{REGEXP_FLAGS, REGEXP_SOURCE};
use log::debug;

impl<'a> JSContext<'a> {
    /// Compiles `source` without running it.
    ///
    /// Returns a function bytecode value for scripts (run it with
    /// [`JSContext::run`]), the parsed value with `JS_EVAL_JSON` and a RegExp
    /// object with `JS_EVAL_REGEXP`.
    pub fn parse(&mut self, source: &[u8], filename: &str, eval_flags: u32) -> JsResult<JSValue> {
        let flags = EvalFlags::from_eval_bits(eval_flags);
        if flags.contains(EvalFlags::JSON) {
            return match parse_json(source) {
                Ok(tree) => self.json_to_value(&tree),
                Err(err) => Err(self.throw_parse_error(&err, source, filename)),
            };
        }
        if flags.contains(EvalFlags::REGEXP) {
            return self.compile_regexp(source, EvalFlags::regexp_flags(eval_flags), filename);
        }
        let body = match parse_script(source) {
            Ok(body) => body,
            Err(err) => return Err(self.throw_parse_error(&err, source, filename)),
        };
        let emitter = Emitter::new(source, flags.contains(EvalFlags::STRIP_COL), flags.wants_retval());
        let def = match emitter.compile_script(&body) {
            Ok(def) => def,
            Err(err) => return Err(self.throw_parse_error(&err, source, filename)),
        };
        let filename = self.intern(filename.as_bytes())?;
        let fb = self.materialize_function(&def, filename)?;
        debug!(
            "compiled {} bytes of source: {} bytes of code, {} constants",
            source.len(),
            def.byte_code.len(),
            def.cpool.len()
        );
        Ok(fb)
    }

    /// Parses then runs `source`. JSON and regexp sources return the parsed
    /// value.
    pub fn eval(&mut self, source: &[u8], filename: &str, eval_flags: u32) -> JsResult<JSValue> {
        let val = self.parse(source, filename, eval_flags)?;
        let flags = EvalFlags::from_eval_bits(eval_flags);
        if flags.intersects(EvalFlags::JSON | EvalFlags::REGEXP) {
            return Ok(val);
        }
        self.run(val)
    }

    fn throw_parse_error(&mut self, err: &ParseError, source: &[u8], filename: &str) -> Exception {
        let (line, col) = LineIndex::new(source).line_col(source, err.position());
        let obj = match self.new_error_object(JSObjectClass::SyntaxError, err.message(), false) {
            Ok(obj) => obj,
            Err(e) => return e,
        };
        let stack = format!("    at {filename}:{line}:{col}\n");
        let res = self
            .new_string(stack.as_bytes())
            .and_then(|s| self.define_prop(obj, self.roots.atoms.stack, s));
        match res {
            Ok(()) => self.throw(obj),
            Err(e) => e,
        }
    }

    fn new_atom_array(&mut self, names: &[String]) -> JsResult<JSValue> {
        if names.is_empty() {
            return Ok(JS_NULL);
        }
        let arr = self.new_value_array(names.len() as u32)?;
        for (i, name) in names.iter().enumerate() {
            let atom = self.intern(name.as_bytes())?;
            self.mem.set_field(arr, 1 + i as u32, atom)?;
        }
        Ok(value_from_ptr(arr))
    }

    fn new_byte_array_value(&mut self, bytes: &[u8]) -> JsResult<JSValue> {
        if bytes.is_empty() {
            return Ok(JS_NULL);
        }
        Ok(value_from_ptr(self.new_byte_array(bytes)?))
    }

    /// Copies a compiled function and its nested functions into heap
    /// blocks.
    fn materialize_function(&mut self, def: &FunctionDef, filename: JSValue) -> JsResult<JSValue> {
        let header = FunctionBytecodeHeader::new(def.is_arrow, def.has_column, def.arg_count);
        let fb = self.alloc_block(header.header(), FB_BLOCK_WORDS)?;
        for idx in 1..FB_BLOCK_WORDS {
            self.mem.set_field(fb, idx, JS_NULL)?;
        }

        let name = match &def.name {
            Some(name) => self.intern(name.as_bytes())?,
            None => JS_NULL,
        };
        self.mem.set_field(fb, FB_FUNC_NAME, name)?;
        let code = self.new_byte_array_value(&def.byte_code)?;
        self.mem.set_field(fb, FB_BYTE_CODE, code)?;

        if !def.cpool.is_empty() {
            let cpool = self.new_value_array(def.cpool.len() as u32)?;
            self.mem.set_field(fb, FB_CPOOL, value_from_ptr(cpool))?;
            for (i, c) in def.cpool.iter().enumerate() {
                let val = match c {
                    Const::Number(d) => self.new_float64(*d)?,
                    Const::String(s) => self.intern(s)?,
                    Const::Function(f) => self.materialize_function(f, filename)?,
                };
                self.mem.set_field(cpool, 1 + i as u32, val)?;
            }
        }

        let vars = self.new_atom_array(&def.vars)?;
        self.mem.set_field(fb, FB_VARS, vars)?;

        if !def.closure_vars.is_empty() {
            let arr = self.new_value_array(2 * def.closure_vars.len() as u32)?;
            self.mem.set_field(fb, FB_CLOSURE_VARS, value_from_ptr(arr))?;
            for (i, cv) in def.closure_vars.iter().enumerate() {
                let name = self.intern(cv.name.as_bytes())?;
                self.mem.set_field(arr, 1 + 2 * i as u32, name)?;
                self.mem.set_field(arr, 2 + 2 * i as u32, new_short_int(cv.source.encode()))?;
            }
        }

        self.mem.set_field(fb, FB_FILENAME, filename)?;
        let pc2line = self.new_byte_array_value(&def.pc2line)?;
        self.mem.set_field(fb, FB_PC2LINE, pc2line)?;
        self.mem.set_field(fb, FB_VAR_COUNT, new_short_int(def.var_count() as i32))?;
        Ok(value_from_ptr(fb))
    }

    fn json_to_value(&mut self, v: &JsonValue) -> JsResult<JSValue> {
        match v {
            JsonValue::Null => Ok(JS_NULL),
            JsonValue::Bool(b) => Ok(if *b { JS_TRUE } else { JS_FALSE }),
            JsonValue::Number(d) => self.new_float64(*d),
            JsonValue::String(s) => self.new_string(s),
            JsonValue::Array(elems) => {
                let arr = self.new_array(&[])?;
                for elem in elems {
                    let val = self.json_to_value(elem)?;
                    self.array_push(arr, val)?;
                }
                Ok(arr)
            }
            JsonValue::Object(props) => {
                let obj = self.new_object()?;
                for (key, elem) in props {
                    let val = self.json_to_value(elem)?;
                    let key = self.new_string(key)?;
                    let key = self.to_property_key(key)?;
                    self.define_property(obj, key, val)?;
                }
                Ok(obj)
            }
        }
    }

    fn compile_regexp(&mut self, source: &[u8], flag_bits: u32, filename: &str) -> JsResult<JSValue> {
        if let Err(msg) = check_regexp_pattern(source) {
            return Err(self.throw_parse_error(&ParseError::new(msg, 0), source, filename));
        }
        // Round-trip through the letters to drop unknown bits.
        let letters = regexp_flags_to_string(flag_bits);
        let (flags, _) = parse_regexp_flags(letters.as_bytes());
        let proto = self.class_proto(JSObjectClass::RegExp as u8);
        let obj = self.new_object_class(JSObjectClass::RegExp as u8, proto, 0)?;
        let source = self.new_string(source)?;
        self.set_object_field(obj, REGEXP_SOURCE, source)?;
        let flags = self.new_string(regexp_flags_to_string(flags).as_bytes())?;
        self.set_object_field(obj, REGEXP_FLAGS, flags)?;
        Ok(obj)
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::capi_defs::{JS_EVAL_JSON, JS_EVAL_REGEXP, JS_EVAL_REGEXP_FLAGS_SHIFT, JS_EVAL_RETVAL};
    use crate::context::tests::new_context;
    use crate::jsvalue::value_get_ptr;
    use crate::memblock::MTag;
    use crate::parser::regexp_flags::{LRE_FLAG_GLOBAL, LRE_FLAG_IGNORECASE};

    #[test]
    fn scripts_compile_to_function_bytecode() {
        let mut ctx = new_context();
        let fb = ctx.parse(b"var x = 1; x + 1", "<test>", JS_EVAL_RETVAL).unwrap();
        assert_eq!(ctx.block_tag(value_get_ptr(fb)), Some(MTag::FunctionBytecode));
        let filename = ctx.object_field(fb, FB_FILENAME).unwrap();
        assert_eq!(ctx.string_to_rust(filename).unwrap(), "<test>");
    }

    #[test]
    fn syntax_errors_carry_the_position() {
        let mut ctx = new_context();
        let err = ctx.parse(b"var x = ;\n", "a.js", 0).unwrap_err();
        assert_eq!(err, Exception::Thrown);
        let exc = ctx.get_exception();
        assert_eq!(ctx.get_class_id(exc), Some(JSObjectClass::SyntaxError as u8));
        let stack = ctx.get_prop(exc, ctx.roots.atoms.stack).unwrap();
        assert!(ctx.string_to_rust(stack).unwrap().starts_with("    at a.js:1:"));
    }

    #[test]
    fn json_builds_values() {
        let mut ctx = new_context();
        let val = ctx.parse(br#"{"a": [1, "x"], "b": null}"#, "<json>", JS_EVAL_JSON).unwrap();
        let key = ctx.intern(b"a").unwrap();
        let a = ctx.get_prop(val, key).unwrap();
        assert!(ctx.is_array(a));
        let x = ctx.get_property(a, crate::property::PropKey::Index(1)).unwrap();
        assert_eq!(ctx.string_to_rust(x).unwrap(), "x");
        assert!(ctx.parse(b"{1}", "<json>", JS_EVAL_JSON).is_err());
    }

    #[test]
    fn regexp_source_keeps_canonical_flags() {
        let mut ctx = new_context();
        let flags = JS_EVAL_REGEXP | ((LRE_FLAG_IGNORECASE | LRE_FLAG_GLOBAL) << JS_EVAL_REGEXP_FLAGS_SHIFT);
        let re = ctx.parse(b"a(b|c)+", "<re>", flags).unwrap();
        assert_eq!(ctx.get_class_id(re), Some(JSObjectClass::RegExp as u8));
        let s = ctx.to_rust_string(re).unwrap();
        assert_eq!(s, "/a(b|c)+/gi");
        assert!(ctx.parse(b"a(b", "<re>", JS_EVAL_REGEXP).is_err());
    }
}
