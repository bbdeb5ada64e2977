//! Bytecode instruction set.
//!
//! Invariants:
//! - Operands follow the opcode byte, little-endian.
//! - Jump targets (`label`) are absolute byte offsets into the function's
//!   byte code, so catch markers can store them unchanged.
//! - `OPCODES[op].size` is the full instruction length, opcode included.

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum OpCodeFormat {
    none,
    i8,
    i32,
    /// Index into the constant pool.
    const16,
    /// Constant pool index of an atom.
    atom,
    loc,
    arg,
    var_ref,
    /// Argument or element count.
    npop,
    label,
}

impl OpCodeFormat {
    pub const fn operand_size(self) -> u8 {
        match self {
            OpCodeFormat::none => 0,
            OpCodeFormat::i8 => 1,
            OpCodeFormat::i32 | OpCodeFormat::label => 4,
            OpCodeFormat::const16
            | OpCodeFormat::atom
            | OpCodeFormat::loc
            | OpCodeFormat::arg
            | OpCodeFormat::var_ref
            | OpCodeFormat::npop => 2,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OpCodeInfo {
    pub name: &'static str,
    pub size: u8,
    pub fmt: OpCodeFormat,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct OpCode(pub u8);

impl OpCode {
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub fn info(self) -> Option<&'static OpCodeInfo> {
        OPCODES.get(self.as_usize())
    }
}

macro_rules! opcodes {
    ($($id:ident = $name:literal, $fmt:ident;)*) => {
        opcodes!(@consts 0u8, $($id,)*);
        pub const OPCODES: &[OpCodeInfo] = &[
            $(OpCodeInfo {
                name: $name,
                size: 1 + OpCodeFormat::$fmt.operand_size(),
                fmt: OpCodeFormat::$fmt,
            },)*
        ];
    };
    (@consts $n:expr, $id:ident, $($rest:ident,)*) => {
        pub const $id: OpCode = OpCode($n);
        opcodes!(@consts $n + 1u8, $($rest,)*);
    };
    (@consts $n:expr,) => {};
}

opcodes! {
    OP_INVALID = "invalid", none;
    OP_PUSH_UNDEFINED = "undefined", none;
    OP_PUSH_NULL = "null", none;
    OP_PUSH_TRUE = "push_true", none;
    OP_PUSH_FALSE = "push_false", none;
    OP_PUSH_THIS = "push_this", none;
    OP_PUSH_CALLEE = "push_callee", none;
    OP_PUSH_I8 = "push_i8", i8;
    OP_PUSH_I32 = "push_i32", i32;
    OP_PUSH_CONST = "push_const", const16;
    OP_FCLOSURE = "fclosure", const16;
    OP_OBJECT = "object", none;
    OP_ARRAY_FROM = "array_from", npop;

    OP_GET_LOC = "get_loc", loc;
    OP_PUT_LOC = "put_loc", loc;
    OP_SET_LOC = "set_loc", loc;
    OP_GET_LOC_CHECK = "get_loc_check", loc;
    OP_PUT_LOC_CHECK = "put_loc_check", loc;
    OP_SET_LOC_UNINIT = "set_loc_uninitialized", loc;
    OP_CLOSE_LOC = "close_loc", loc;
    OP_GET_ARG = "get_arg", arg;
    OP_PUT_ARG = "put_arg", arg;
    OP_SET_ARG = "set_arg", arg;
    OP_GET_VAR_REF = "get_var_ref", var_ref;
    OP_PUT_VAR_REF = "put_var_ref", var_ref;
    OP_SET_VAR_REF = "set_var_ref", var_ref;
    OP_GET_VAR_REF_CHECK = "get_var_ref_check", var_ref;
    OP_PUT_VAR_REF_CHECK = "put_var_ref_check", var_ref;

    OP_GET_GLOBAL = "get_global", atom;
    OP_GET_GLOBAL_UNDEF = "get_global_undef", atom;
    OP_PUT_GLOBAL = "put_global", atom;
    OP_DEFINE_GLOBAL = "define_global", atom;

    OP_GET_FIELD = "get_field", atom;
    OP_GET_FIELD2 = "get_field2", atom;
    OP_PUT_FIELD = "put_field", atom;
    OP_GET_ARRAY_EL = "get_array_el", none;
    OP_GET_ARRAY_EL2 = "get_array_el2", none;
    OP_PUT_ARRAY_EL = "put_array_el", none;
    OP_DEFINE_FIELD = "define_field", atom;
    OP_DEFINE_ARRAY_EL = "define_array_el", none;
    OP_DEFINE_GETTER = "define_getter", atom;
    OP_DEFINE_SETTER = "define_setter", atom;

    OP_DROP = "drop", none;
    OP_DUP = "dup", none;
    OP_DUP2 = "dup2", none;
    OP_SWAP = "swap", none;
    OP_NIP = "nip", none;
    OP_INSERT2 = "insert2", none;
    OP_INSERT3 = "insert3", none;

    OP_CALL = "call", npop;
    OP_CALL_CONSTRUCTOR = "call_constructor", npop;
    OP_RETURN = "return", none;
    OP_RETURN_UNDEF = "return_undef", none;
    OP_THROW = "throw", none;
    OP_CATCH = "catch", label;
    OP_GOTO = "goto", label;
    OP_IF_FALSE = "if_false", label;
    OP_IF_TRUE = "if_true", label;

    OP_NEG = "neg", none;
    OP_PLUS = "plus", none;
    OP_NOT = "not", none;
    OP_LNOT = "lnot", none;
    OP_TYPEOF = "typeof", none;
    OP_DELETE = "delete", none;
    OP_INC = "inc", none;
    OP_DEC = "dec", none;
    OP_TO_NUMERIC = "to_numeric", none;

    OP_ADD = "add", none;
    OP_SUB = "sub", none;
    OP_MUL = "mul", none;
    OP_DIV = "div", none;
    OP_MOD = "mod", none;
    OP_POW = "pow", none;
    OP_SHL = "shl", none;
    OP_SAR = "sar", none;
    OP_SHR = "shr", none;
    OP_AND = "and", none;
    OP_OR = "or", none;
    OP_XOR = "xor", none;

    OP_LT = "lt", none;
    OP_LTE = "lte", none;
    OP_GT = "gt", none;
    OP_GTE = "gte", none;
    OP_EQ = "eq", none;
    OP_NEQ = "neq", none;
    OP_STRICT_EQ = "strict_eq", none;
    OP_STRICT_NEQ = "strict_neq", none;
    OP_INSTANCEOF = "instanceof", none;
    OP_IN = "in", none;
    OP_IS_UNDEFINED_OR_NULL = "is_undefined_or_null", none;

    OP_FOR_IN_START = "for_in_start", none;
    OP_FOR_OF_START = "for_of_start", none;
    OP_FOR_NEXT = "for_next", label;
    // TypeError with the atom operand as message.
    OP_THROW_ERROR = "throw_error", atom;
    OP_NOP = "nop", none;
}

pub const OP_COUNT: usize = OPCODES.len();

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn opcode_metadata_matches_indices() {
        assert_eq!(OPCODES[OP_INVALID.as_usize()].name, "invalid");
        assert_eq!(OPCODES[OP_NOP.as_usize()].name, "nop");
        assert_eq!(OP_NOP.as_usize(), OP_COUNT - 1);
        assert_eq!(OP_PUSH_I32.info().unwrap().size, 5);
        assert_eq!(OP_GET_LOC.info().unwrap().size, 3);
        assert_eq!(OP_CATCH.info().unwrap().fmt, OpCodeFormat::label);
        assert!(OpCode(OP_COUNT as u8).info().is_none());
    }

    #[test]
    fn opcode_names_are_unique() {
        let mut names: Vec<_> = OPCODES.iter().map(|i| i.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), OP_COUNT);
    }

    #[test]
    fn get_put_ordering() {
        assert!(OP_PUT_LOC.as_usize() > OP_GET_LOC.as_usize());
        assert!(OP_PUT_ARG.as_usize() > OP_GET_ARG.as_usize());
        assert!(OP_IF_TRUE.as_usize() > OP_IF_FALSE.as_usize());
    }
}
