//! Bytecode emitter: turns the syntax tree into [`FunctionDef`]s.
//!
//! Each function keeps a stack of lexical scopes. Variables resolve to a
//! local slot, an argument, a captured variable of the enclosing function
//! (added to the closure variable list on first use) or a global. At
//! script level the outermost declarations are global object properties.
//!
//! Jumps are emitted against labels and patched when the function is
//! finished. `finally` blocks are inlined on every exit path.

use std::collections::HashMap;

use super::ast::*;
use super::error::{LineIndex, ParseError, ParseResult};
use super::pc2line::Pc2LineBuilder;
use super::stack_limit::StackLimit;
use crate::function_bytecode::ClosureVarSource;
use crate::jsvalue::fits_short_int;
use crate::opcode::*;

/// Constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Number(f64),
    /// String or atom, WTF-8.
    String(Vec<u8>),
    Function(Box<FunctionDef>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosureVarDef {
    pub name: String,
    pub source: ClosureVarSource,
}

/// A compiled function, before it is materialized on the heap.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub arg_count: u16,
    pub is_arrow: bool,
    pub has_column: bool,
    pub byte_code: Vec<u8>,
    pub cpool: Vec<Const>,
    /// Local names, indexed by slot.
    pub vars: Vec<String>,
    pub closure_vars: Vec<ClosureVarDef>,
    pub pc2line: Vec<u8>,
}

impl FunctionDef {
    pub fn var_count(&self) -> u16 {
        self.vars.len() as u16
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum BindingKind {
    Var,
    Let,
    Const,
    Function,
    Hidden,
}

impl BindingKind {
    fn from_var_kind(kind: VarKind) -> Self {
        match kind {
            VarKind::Var => BindingKind::Var,
            VarKind::Let => BindingKind::Let,
            VarKind::Const => BindingKind::Const,
        }
    }

    fn needs_tdz_check(self) -> bool {
        matches!(self, BindingKind::Let | BindingKind::Const)
    }
}

#[derive(Clone, Debug)]
struct Binding {
    name: String,
    local: u16,
    kind: BindingKind,
    captured: bool,
}

#[derive(Default, Debug)]
struct Scope {
    bindings: Vec<Binding>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Label(usize);

#[derive(Copy, Clone, Debug)]
enum Resolved {
    Local(u16, BindingKind),
    Arg(u16),
    VarRef(u16, BindingKind),
    Global,
}

#[derive(Clone, Copy)]
enum ControlKind<'n> {
    Loop { brk: Label, cont: Label },
    /// Labeled statement or `switch`.
    Break { brk: Label, is_switch: bool },
    Try { finally: Option<&'n [Stmt]> },
    /// Keeps a value on the stack while a `finally` runs.
    Hold,
}

struct Control<'n> {
    kind: ControlKind<'n>,
    labels: Vec<String>,
    /// Operand stack words owned by the entry.
    stack_items: u32,
    scope_depth: usize,
}

struct FuncState<'n> {
    name: Option<String>,
    is_arrow: bool,
    is_script: bool,
    arg_names: Vec<String>,
    code: Vec<u8>,
    cpool: Vec<Const>,
    strings: HashMap<Vec<u8>, u16>,
    local_names: Vec<String>,
    scopes: Vec<Scope>,
    closure_vars: Vec<(ClosureVarDef, BindingKind)>,
    labels: Vec<Option<u32>>,
    fixups: Vec<(usize, Label)>,
    control: Vec<Control<'n>>,
    pc2line: Pc2LineBuilder,
    last_pos: Option<Pos>,
    ret_local: Option<u16>,
    /// Labels waiting for the loop they name.
    pending_labels: Vec<String>,
}

impl<'n> FuncState<'n> {
    fn new(name: Option<String>, is_arrow: bool, is_script: bool, arg_names: Vec<String>) -> Self {
        Self {
            name,
            is_arrow,
            is_script,
            arg_names,
            code: Vec::new(),
            cpool: Vec::new(),
            strings: HashMap::new(),
            local_names: Vec::new(),
            // Scope 0 holds the name of a named function expression, scope
            // 1 the function body.
            scopes: vec![Scope::default(), Scope::default()],
            closure_vars: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            control: Vec::new(),
            pc2line: Pc2LineBuilder::new(),
            last_pos: None,
            ret_local: None,
            pending_labels: Vec::new(),
        }
    }

    /// `(scope, binding)` of the innermost visible binding of `name` in
    /// scopes from 1 on.
    fn find_scoped(&self, name: &str) -> Option<(usize, usize)> {
        (1..self.scopes.len()).rev().find_map(|s| {
            self.scopes[s]
                .bindings
                .iter()
                .rposition(|b| b.name == name)
                .map(|b| (s, b))
        })
    }

    fn find_arg(&self, name: &str) -> Option<u16> {
        self.arg_names.iter().rposition(|a| a == name).map(|i| i as u16)
    }
}

/// Collects the `var` names of a function body, nested blocks included.
fn collect_var_names(stmts: &[Stmt], out: &mut Vec<String>) {
    fn add(name: &str, out: &mut Vec<String>) {
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Var(VarKind::Var, decls) => decls.iter().for_each(|d| add(&d.name, out)),
            StmtKind::Block(body) => collect_var_names(body, out),
            StmtKind::If(_, then, otherwise) => {
                collect_var_names(core::slice::from_ref(&**then), out);
                if let Some(o) = otherwise {
                    collect_var_names(core::slice::from_ref(&**o), out);
                }
            }
            StmtKind::While(_, body) | StmtKind::DoWhile(body, _) | StmtKind::Labeled(_, body) => {
                collect_var_names(core::slice::from_ref(&**body), out)
            }
            StmtKind::For { init, body, .. } => {
                if let Some(ForInit::Decl(VarKind::Var, decls)) = init {
                    decls.iter().for_each(|d| add(&d.name, out));
                }
                collect_var_names(core::slice::from_ref(&**body), out);
            }
            StmtKind::ForIn { target, body, .. } => {
                if let ForTarget::Decl(VarKind::Var, name) = target {
                    add(name, out);
                }
                collect_var_names(core::slice::from_ref(&**body), out);
            }
            StmtKind::Try {
                block,
                catch,
                finally,
            } => {
                collect_var_names(block, out);
                if let Some(c) = catch {
                    collect_var_names(&c.body, out);
                }
                if let Some(f) = finally {
                    collect_var_names(f, out);
                }
            }
            StmtKind::Switch(_, cases) => {
                for case in cases {
                    collect_var_names(&case.body, out);
                }
            }
            _ => {}
        }
    }
}

fn binary_opcode(op: BinOp) -> OpCode {
    match op {
        BinOp::Add => OP_ADD,
        BinOp::Sub => OP_SUB,
        BinOp::Mul => OP_MUL,
        BinOp::Div => OP_DIV,
        BinOp::Mod => OP_MOD,
        BinOp::Pow => OP_POW,
        BinOp::Shl => OP_SHL,
        BinOp::Sar => OP_SAR,
        BinOp::Shr => OP_SHR,
        BinOp::BitAnd => OP_AND,
        BinOp::BitOr => OP_OR,
        BinOp::BitXor => OP_XOR,
        BinOp::Lt => OP_LT,
        BinOp::Lte => OP_LTE,
        BinOp::Gt => OP_GT,
        BinOp::Gte => OP_GTE,
        BinOp::Eq => OP_EQ,
        BinOp::Neq => OP_NEQ,
        BinOp::StrictEq => OP_STRICT_EQ,
        BinOp::StrictNeq => OP_STRICT_NEQ,
        BinOp::InstanceOf => OP_INSTANCEOF,
        BinOp::In => OP_IN,
    }
}

pub struct Emitter<'n, 's> {
    funcs: Vec<FuncState<'n>>,
    src: &'s [u8],
    lines: LineIndex,
    strip_col: bool,
    retval: bool,
    limit: StackLimit,
    /// Top-level `const` names of the script, stored as globals.
    global_consts: Vec<&'n str>,
}

impl<'n, 's> Emitter<'n, 's> {
    pub fn new(src: &'s [u8], strip_col: bool, retval: bool) -> Self {
        Self {
            funcs: Vec::new(),
            src,
            lines: LineIndex::new(src),
            strip_col,
            retval,
            limit: StackLimit::here(),
            global_consts: Vec::new(),
        }
    }

    fn f(&mut self) -> &mut FuncState<'n> {
        let last = self.funcs.len() - 1;
        &mut self.funcs[last]
    }

    fn fr(&self) -> &FuncState<'n> {
        &self.funcs[self.funcs.len() - 1]
    }

    // --- low level emission ---

    fn pc(&self) -> u32 {
        self.fr().code.len() as u32
    }

    fn op(&mut self, op: OpCode) {
        self.f().code.push(op.0);
    }

    fn op_u16(&mut self, op: OpCode, val: u16) {
        let code = &mut self.f().code;
        code.push(op.0);
        code.extend_from_slice(&val.to_le_bytes());
    }

    fn op_label(&mut self, op: OpCode, label: Label) {
        let f = self.f();
        f.code.push(op.0);
        f.fixups.push((f.code.len(), label));
        f.code.extend_from_slice(&[0; 4]);
    }

    fn new_label(&mut self) -> Label {
        let f = self.f();
        f.labels.push(None);
        Label(f.labels.len() - 1)
    }

    fn define_label(&mut self, label: Label) {
        let pc = self.pc();
        self.f().labels[label.0] = Some(pc);
    }

    fn set_pos(&mut self, pos: Pos) {
        if self.fr().last_pos == Some(pos) {
            return;
        }
        let (line, col) = self.lines.line_col(self.src, pos);
        let col = if self.strip_col { 0 } else { col };
        let pc = self.pc();
        let f = self.f();
        f.last_pos = Some(pos);
        f.pc2line.add(pc, line, col);
    }

    fn add_const(&mut self, c: Const, pos: Pos) -> ParseResult<u16> {
        let f = self.f();
        let idx = u16::try_from(f.cpool.len()).map_err(|_| ParseError::new("too many constants", pos))?;
        f.cpool.push(c);
        Ok(idx)
    }

    fn string_const(&mut self, s: &[u8], pos: Pos) -> ParseResult<u16> {
        if let Some(&idx) = self.fr().strings.get(s) {
            return Ok(idx);
        }
        let idx = self.add_const(Const::String(s.to_vec()), pos)?;
        self.f().strings.insert(s.to_vec(), idx);
        Ok(idx)
    }

    fn alloc_local(&mut self, name: &str, pos: Pos) -> ParseResult<u16> {
        let f = self.f();
        let idx = u16::try_from(f.local_names.len()).map_err(|_| ParseError::new("too many local variables", pos))?;
        f.local_names.push(name.to_string());
        Ok(idx)
    }

    /// Declares `name` in the innermost scope, reusing a binding of the same
    /// scope.
    fn declare(&mut self, name: &str, kind: BindingKind, pos: Pos) -> ParseResult<u16> {
        let scope = self.fr().scopes.len() - 1;
        if let Some(b) = self.f().scopes[scope].bindings.iter_mut().find(|b| b.name == name) {
            if kind == BindingKind::Function {
                b.kind = kind;
            }
            return Ok(b.local);
        }
        let local = self.alloc_local(name, pos)?;
        self.f().scopes[scope].bindings.push(Binding {
            name: name.to_string(),
            local,
            kind,
            captured: false,
        });
        Ok(local)
    }

    fn emit_number(&mut self, n: f64, pos: Pos) -> ParseResult<()> {
        let is_int = n.fract() == 0.0 && !(n == 0.0 && n.is_sign_negative());
        if is_int && n.abs() <= i32::MAX as f64 && fits_short_int(n as i64) {
            let v = n as i32;
            if let Ok(b) = i8::try_from(v) {
                let code = &mut self.f().code;
                code.push(OP_PUSH_I8.0);
                code.push(b as u8);
            } else {
                let code = &mut self.f().code;
                code.push(OP_PUSH_I32.0);
                code.extend_from_slice(&v.to_le_bytes());
            }
            return Ok(());
        }
        let idx = self.add_const(Const::Number(n), pos)?;
        self.op_u16(OP_PUSH_CONST, idx);
        Ok(())
    }

    // --- scopes and variables ---

    fn push_scope(&mut self) {
        self.f().scopes.push(Scope::default());
    }

    /// Leaves the innermost scope, detaching captured block variables.
    fn pop_scope(&mut self) {
        let Some(scope) = self.f().scopes.pop() else {
            return;
        };
        for b in scope.bindings.iter().filter(|b| b.captured) {
            self.op_u16(OP_CLOSE_LOC, b.local);
        }
    }

    /// Detaches every block variable of the scopes from `depth` on.
    fn close_scopes_from(&mut self, depth: usize) {
        let locals: Vec<u16> = self.fr().scopes[depth.max(2)..]
            .iter()
            .flat_map(|s| s.bindings.iter())
            .filter(|b| b.kind != BindingKind::Var)
            .map(|b| b.local)
            .collect();
        for local in locals {
            self.op_u16(OP_CLOSE_LOC, local);
        }
    }

    fn resolve(&mut self, level: usize, name: &str, pos: Pos) -> ParseResult<Resolved> {
        let f = &mut self.funcs[level];
        if let Some((s, b)) = f.find_scoped(name) {
            let binding = &f.scopes[s].bindings[b];
            return Ok(Resolved::Local(binding.local, binding.kind));
        }
        if let Some(idx) = f.find_arg(name) {
            return Ok(Resolved::Arg(idx));
        }
        if let Some(b) = f.scopes[0].bindings.iter().find(|b| b.name == name) {
            return Ok(Resolved::Local(b.local, b.kind));
        }
        if let Some(idx) = f.closure_vars.iter().position(|(cv, _)| cv.name == name) {
            return Ok(Resolved::VarRef(idx as u16, f.closure_vars[idx].1));
        }
        if level == 0 {
            return Ok(Resolved::Global);
        }
        let (source, kind) = match self.resolve(level - 1, name, pos)? {
            Resolved::Global => return Ok(Resolved::Global),
            Resolved::Local(idx, kind) => {
                self.mark_captured(level - 1, idx);
                (ClosureVarSource::Local(idx), kind)
            }
            Resolved::Arg(idx) => (ClosureVarSource::Arg(idx), BindingKind::Var),
            Resolved::VarRef(idx, kind) => (ClosureVarSource::VarRef(idx), kind),
        };
        let f = &mut self.funcs[level];
        let idx = u16::try_from(f.closure_vars.len()).map_err(|_| ParseError::new("too many closure variables", pos))?;
        f.closure_vars.push((
            ClosureVarDef {
                name: name.to_string(),
                source,
            },
            kind,
        ));
        Ok(Resolved::VarRef(idx, kind))
    }

    fn mark_captured(&mut self, level: usize, local: u16) {
        for scope in &mut self.funcs[level].scopes {
            for b in scope.bindings.iter_mut().filter(|b| b.local == local) {
                b.captured = true;
            }
        }
    }

    fn resolve_here(&mut self, name: &str, pos: Pos) -> ParseResult<Resolved> {
        let level = self.funcs.len() - 1;
        self.resolve(level, name, pos)
    }

    fn get_var(&mut self, name: &str, pos: Pos, for_typeof: bool) -> ParseResult<()> {
        match self.resolve_here(name, pos)? {
            Resolved::Local(idx, kind) if kind.needs_tdz_check() => self.op_u16(OP_GET_LOC_CHECK, idx),
            Resolved::Local(idx, _) => self.op_u16(OP_GET_LOC, idx),
            Resolved::Arg(idx) => self.op_u16(OP_GET_ARG, idx),
            Resolved::VarRef(idx, kind) if kind.needs_tdz_check() => self.op_u16(OP_GET_VAR_REF_CHECK, idx),
            Resolved::VarRef(idx, _) => self.op_u16(OP_GET_VAR_REF, idx),
            Resolved::Global => match name {
                "undefined" => self.op(OP_PUSH_UNDEFINED),
                "NaN" => self.emit_number(f64::NAN, pos)?,
                "Infinity" => self.emit_number(f64::INFINITY, pos)?,
                _ => {
                    let atom = self.string_const(name.as_bytes(), pos)?;
                    let op = if for_typeof { OP_GET_GLOBAL_UNDEF } else { OP_GET_GLOBAL };
                    self.op_u16(op, atom);
                }
            },
        }
        Ok(())
    }

    fn throw_const_assign(&mut self, name: &str, pos: Pos) -> ParseResult<()> {
        let msg = format!("'{name}' is read-only");
        let atom = self.string_const(msg.as_bytes(), pos)?;
        self.op_u16(OP_THROW_ERROR, atom);
        Ok(())
    }

    /// Stores the top of stack into `name`. With `keep` the value stays on
    /// the stack. `is_init` marks the declaration itself, which may write
    /// `const` bindings and skips the TDZ check.
    fn put_var(&mut self, name: &str, pos: Pos, keep: bool, is_init: bool) -> ParseResult<()> {
        match self.resolve_here(name, pos)? {
            Resolved::Local(_, BindingKind::Const) | Resolved::VarRef(_, BindingKind::Const) if !is_init => {
                self.throw_const_assign(name, pos)?;
            }
            Resolved::Local(idx, BindingKind::Let) if !is_init => {
                if keep {
                    self.op(OP_DUP);
                }
                self.op_u16(OP_PUT_LOC_CHECK, idx);
            }
            Resolved::Local(idx, _) => self.op_u16(if keep { OP_SET_LOC } else { OP_PUT_LOC }, idx),
            Resolved::Arg(idx) => self.op_u16(if keep { OP_SET_ARG } else { OP_PUT_ARG }, idx),
            Resolved::VarRef(idx, BindingKind::Let) if !is_init => {
                if keep {
                    self.op(OP_DUP);
                }
                self.op_u16(OP_PUT_VAR_REF_CHECK, idx);
            }
            Resolved::VarRef(idx, _) => self.op_u16(if keep { OP_SET_VAR_REF } else { OP_PUT_VAR_REF }, idx),
            Resolved::Global if !is_init && self.global_consts.iter().any(|c| *c == name) => {
                self.throw_const_assign(name, pos)?;
            }
            Resolved::Global => {
                if keep {
                    self.op(OP_DUP);
                }
                let atom = self.string_const(name.as_bytes(), pos)?;
                self.op_u16(OP_PUT_GLOBAL, atom);
            }
        }
        Ok(())
    }

    fn is_script_top_level(&self) -> bool {
        let f = self.fr();
        f.is_script && f.scopes.len() == 2
    }

    /// Declares the lexical bindings of a statement list and creates its
    /// hoisted functions.
    fn enter_block(&mut self, stmts: &'n [Stmt]) -> ParseResult<()> {
        let global = self.is_script_top_level();
        let mut funcs = Vec::new();
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Var(kind @ (VarKind::Let | VarKind::Const), decls) if !global => {
                    for d in decls {
                        let local = self.declare(&d.name, BindingKind::from_var_kind(*kind), d.pos)?;
                        self.op_u16(OP_SET_LOC_UNINIT, local);
                    }
                }
                StmtKind::Function(func) => funcs.push((&**func, stmt.pos)),
                _ => {}
            }
        }
        for (func, pos) in funcs {
            let Some(name) = func.name.as_deref() else {
                continue;
            };
            let local = if global {
                None
            } else {
                Some(self.declare(name, BindingKind::Function, pos)?)
            };
            let idx = self.compile_nested(func)?;
            self.op_u16(OP_FCLOSURE, idx);
            match local {
                Some(local) => self.op_u16(OP_PUT_LOC, local),
                None => {
                    let atom = self.string_const(name.as_bytes(), pos)?;
                    self.op_u16(OP_PUT_GLOBAL, atom);
                }
            }
        }
        Ok(())
    }

    fn block(&mut self, stmts: &'n [Stmt]) -> ParseResult<()> {
        self.push_scope();
        self.enter_block(stmts)?;
        for stmt in stmts {
            self.statement(stmt)?;
        }
        self.pop_scope();
        Ok(())
    }

    // --- functions ---

    fn compile_nested(&mut self, node: &'n FunctionNode) -> ParseResult<u16> {
        let def = self.compile_function(node)?;
        self.add_const(Const::Function(Box::new(def)), node.pos)
    }

    fn compile_function(&mut self, node: &'n FunctionNode) -> ParseResult<FunctionDef> {
        let arg_names = node.params.iter().map(|p| p.name.clone()).collect::<Vec<_>>();
        if arg_names.len() > u16::MAX as usize {
            return Err(ParseError::new("too many arguments", node.pos));
        }
        self.funcs
            .push(FuncState::new(node.name.clone(), node.is_arrow, false, arg_names));
        let res = self.function_body(node);
        let state = self.funcs.pop();
        res?;
        match state {
            Some(state) => self.finish(state, node.params.len() as u16),
            None => Err(ParseError::new("internal error", node.pos)),
        }
    }

    fn function_body(&mut self, node: &'n FunctionNode) -> ParseResult<()> {
        self.set_pos(node.pos);
        if node.binds_own_name {
            if let Some(name) = &node.name {
                let local = self.alloc_local(name, node.pos)?;
                self.f().scopes[0].bindings.push(Binding {
                    name: name.clone(),
                    local,
                    kind: BindingKind::Hidden,
                    captured: false,
                });
                self.op(OP_PUSH_CALLEE);
                self.op_u16(OP_PUT_LOC, local);
            }
        }
        self.bind_this_for_arrows(&node.body, node.is_arrow, node.pos)?;
        let mut vars = Vec::new();
        collect_var_names(&node.body, &mut vars);
        for name in vars {
            if self.fr().find_arg(&name).is_none() {
                self.declare(&name, BindingKind::Var, node.pos)?;
            }
        }
        for (i, param) in node.params.iter().enumerate() {
            let Some(default) = &param.default else {
                continue;
            };
            let skip = self.new_label();
            self.op_u16(OP_GET_ARG, i as u16);
            self.op(OP_PUSH_UNDEFINED);
            self.op(OP_STRICT_EQ);
            self.op_label(OP_IF_FALSE, skip);
            self.expr(default)?;
            self.op_u16(OP_PUT_ARG, i as u16);
            self.define_label(skip);
        }
        self.enter_block(&node.body)?;
        for stmt in &node.body {
            self.statement(stmt)?;
        }
        self.op(OP_RETURN_UNDEF);
        Ok(())
    }

    /// Non-arrow functions whose arrows use `this` keep it in a local the
    /// arrows capture.
    fn bind_this_for_arrows(&mut self, body: &[Stmt], is_arrow: bool, pos: Pos) -> ParseResult<()> {
        if !is_arrow && arrows_use_this(body) {
            let local = self.declare("this", BindingKind::Hidden, pos)?;
            self.op(OP_PUSH_THIS);
            self.op_u16(OP_PUT_LOC, local);
        }
        Ok(())
    }

    /// Compiles a whole script.
    pub fn compile_script(mut self, body: &'n [Stmt]) -> ParseResult<FunctionDef> {
        self.funcs.push(FuncState::new(None, false, true, Vec::new()));
        self.set_pos(0);
        self.bind_this_for_arrows(body, false, 0)?;
        if self.retval {
            let local = self.declare("<ret>", BindingKind::Hidden, 0)?;
            self.f().ret_local = Some(local);
        }
        let mut globals = Vec::new();
        collect_var_names(body, &mut globals);
        for stmt in body {
            if let StmtKind::Var(kind @ (VarKind::Let | VarKind::Const), decls) = &stmt.kind {
                for d in decls {
                    if *kind == VarKind::Const {
                        self.global_consts.push(&d.name);
                    }
                    if !globals.contains(&d.name) {
                        globals.push(d.name.clone());
                    }
                }
            }
        }
        for name in &globals {
            let atom = self.string_const(name.as_bytes(), 0)?;
            self.op_u16(OP_DEFINE_GLOBAL, atom);
        }
        self.enter_block(body)?;
        for stmt in body {
            self.statement(stmt)?;
        }
        match self.fr().ret_local {
            Some(local) => {
                self.op_u16(OP_GET_LOC, local);
                self.op(OP_RETURN);
            }
            None => self.op(OP_RETURN_UNDEF),
        }
        let state = self
            .funcs
            .pop()
            .ok_or_else(|| ParseError::new("internal error", 0))?;
        self.finish(state, 0)
    }

    fn finish(&self, state: FuncState<'n>, arg_count: u16) -> ParseResult<FunctionDef> {
        let mut code = state.code;
        for (at, label) in state.fixups {
            let Some(target) = state.labels[label.0] else {
                return Err(ParseError::new("internal error: undefined label", 0));
            };
            code[at..at + 4].copy_from_slice(&target.to_le_bytes());
        }
        Ok(FunctionDef {
            name: state.name,
            arg_count,
            is_arrow: state.is_arrow,
            has_column: !self.strip_col,
            byte_code: code,
            cpool: state.cpool,
            vars: state.local_names,
            closure_vars: state.closure_vars.into_iter().map(|(cv, _)| cv).collect(),
            pc2line: state.pc2line.finish(),
        })
    }

    // --- statements ---

    fn push_control(&mut self, kind: ControlKind<'n>, stack_items: u32) {
        let labels = core::mem::take(&mut self.f().pending_labels);
        let scope_depth = self.fr().scopes.len();
        self.f().control.push(Control {
            kind,
            labels,
            stack_items,
            scope_depth,
        });
    }

    fn pop_control(&mut self) {
        self.f().control.pop();
    }

    /// Leaves the control entries above `target` (all of them when
    /// `None`): drops their stack words and runs their `finally` blocks.
    fn unwind_to(&mut self, target: Option<usize>) -> ParseResult<()> {
        let start = target.map_or(0, |t| t + 1);
        let depth = target.map_or(2, |t| self.fr().control[t].scope_depth);
        self.close_scopes_from(depth);
        for i in (start..self.fr().control.len()).rev() {
            let (kind, items, scope_depth) = {
                let c = &self.fr().control[i];
                (c.kind, c.stack_items, c.scope_depth)
            };
            for _ in 0..items {
                self.op(OP_DROP);
            }
            if let ControlKind::Try { finally: Some(fin) } = kind {
                let saved_control = self.f().control.split_off(i);
                let saved_scopes = self.f().scopes.split_off(scope_depth);
                let res = self.block(fin);
                self.f().scopes.extend(saved_scopes);
                self.f().control.extend(saved_control);
                res?;
            }
        }
        Ok(())
    }

    fn jump_statement(&mut self, label: Option<&str>, is_break: bool, pos: Pos) -> ParseResult<()> {
        let control = &self.fr().control;
        let found = control.iter().rposition(|c| match (label, c.kind) {
            (Some(l), ControlKind::Loop { .. }) => c.labels.iter().any(|x| x == l),
            (Some(l), ControlKind::Break { .. }) => is_break && c.labels.iter().any(|x| x == l),
            (None, ControlKind::Loop { .. }) => true,
            (None, ControlKind::Break { is_switch, .. }) => is_break && is_switch,
            _ => false,
        });
        let Some(idx) = found else {
            let msg = match (label, is_break) {
                (Some(_), _) => "label not found",
                (None, true) => "break must be inside loop or switch",
                (None, false) => "continue must be inside loop",
            };
            return Err(ParseError::new(msg, pos));
        };
        let target = match (control[idx].kind, is_break) {
            (ControlKind::Loop { brk, .. }, true) | (ControlKind::Break { brk, .. }, true) => brk,
            (ControlKind::Loop { cont, .. }, false) => cont,
            _ => return Err(ParseError::new("continue must be inside loop", pos)),
        };
        self.unwind_to(Some(idx))?;
        self.op_label(OP_GOTO, target);
        Ok(())
    }

    fn statement(&mut self, stmt: &'n Stmt) -> ParseResult<()> {
        self.limit.enter(stmt.pos)?;
        let res = self.statement_inner(stmt);
        self.limit.leave();
        res
    }

    fn statement_inner(&mut self, stmt: &'n Stmt) -> ParseResult<()> {
        // Loops and switches claim the pending labels themselves.
        let claims_labels = matches!(
            stmt.kind,
            StmtKind::Labeled(..)
                | StmtKind::While(..)
                | StmtKind::DoWhile(..)
                | StmtKind::For { .. }
                | StmtKind::ForIn { .. }
                | StmtKind::Switch(..)
        );
        if !claims_labels {
            self.f().pending_labels.clear();
        }
        match &stmt.kind {
            StmtKind::Var(kind, decls) => {
                for d in decls {
                    self.set_pos(d.pos);
                    match &d.init {
                        Some(init) => self.expr(init)?,
                        None if *kind == VarKind::Var => continue,
                        None => self.op(OP_PUSH_UNDEFINED),
                    }
                    self.put_var(&d.name, d.pos, false, true)?;
                }
            }
            StmtKind::Function(_) | StmtKind::Empty => {}
            StmtKind::Expr(e) => {
                self.set_pos(stmt.pos);
                self.expr(e)?;
                let ret = self.fr().ret_local;
                match ret {
                    Some(local) => self.op_u16(OP_PUT_LOC, local),
                    None => self.op(OP_DROP),
                }
            }
            StmtKind::Block(body) => self.block(body)?,
            StmtKind::If(cond, then, otherwise) => {
                self.set_pos(stmt.pos);
                let l_else = self.new_label();
                self.expr(cond)?;
                self.op_label(OP_IF_FALSE, l_else);
                self.statement(then)?;
                match otherwise {
                    Some(o) => {
                        let l_end = self.new_label();
                        self.op_label(OP_GOTO, l_end);
                        self.define_label(l_else);
                        self.statement(o)?;
                        self.define_label(l_end);
                    }
                    None => self.define_label(l_else),
                }
            }
            StmtKind::While(cond, body) => {
                let (brk, cont) = (self.new_label(), self.new_label());
                self.define_label(cont);
                self.set_pos(stmt.pos);
                self.expr(cond)?;
                self.op_label(OP_IF_FALSE, brk);
                self.push_control(ControlKind::Loop { brk, cont }, 0);
                self.statement(body)?;
                self.pop_control();
                self.op_label(OP_GOTO, cont);
                self.define_label(brk);
            }
            StmtKind::DoWhile(body, cond) => {
                let (brk, cont, top) = (self.new_label(), self.new_label(), self.new_label());
                self.define_label(top);
                self.push_control(ControlKind::Loop { brk, cont }, 0);
                self.statement(body)?;
                self.pop_control();
                self.define_label(cont);
                self.set_pos(cond.pos);
                self.expr(cond)?;
                self.op_label(OP_IF_TRUE, top);
                self.define_label(brk);
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => self.for_statement(init.as_ref(), test.as_ref(), update.as_ref(), body, stmt.pos)?,
            StmtKind::ForIn {
                target,
                object,
                body,
                is_of,
            } => self.for_in_statement(target, object, body, *is_of, stmt.pos)?,
            StmtKind::Break(label) | StmtKind::Continue(label) => {
                let is_break = matches!(stmt.kind, StmtKind::Break(_));
                self.jump_statement(label.as_deref(), is_break, stmt.pos)?;
            }
            StmtKind::Return(value) => {
                self.set_pos(stmt.pos);
                let has_finally = self
                    .fr()
                    .control
                    .iter()
                    .any(|c| matches!(c.kind, ControlKind::Try { finally: Some(_) }));
                match value {
                    Some(v) => self.expr(v)?,
                    None => self.op(OP_PUSH_UNDEFINED),
                }
                if has_finally {
                    let tmp = self.alloc_local("<ret>", stmt.pos)?;
                    self.op_u16(OP_PUT_LOC, tmp);
                    self.unwind_to(None)?;
                    self.op_u16(OP_GET_LOC, tmp);
                }
                self.op(OP_RETURN);
            }
            StmtKind::Throw(value) => {
                self.set_pos(stmt.pos);
                self.expr(value)?;
                self.op(OP_THROW);
            }
            StmtKind::Try {
                block,
                catch,
                finally,
            } => self.try_statement(block, catch.as_ref(), finally.as_deref(), stmt.pos)?,
            StmtKind::Switch(disc, cases) => self.switch_statement(disc, cases, stmt.pos)?,
            StmtKind::Labeled(label, body) => {
                self.f().pending_labels.push(label.clone());
                let is_loop = matches!(
                    body.kind,
                    StmtKind::While(..)
                        | StmtKind::DoWhile(..)
                        | StmtKind::For { .. }
                        | StmtKind::ForIn { .. }
                        | StmtKind::Labeled(..)
                );
                if is_loop {
                    self.statement(body)?;
                } else {
                    let brk = self.new_label();
                    self.push_control(ControlKind::Break { brk, is_switch: false }, 0);
                    self.statement(body)?;
                    self.pop_control();
                    self.define_label(brk);
                }
            }
        }
        Ok(())
    }

    fn for_statement(
        &mut self,
        init: Option<&'n ForInit>,
        test: Option<&'n Expr>,
        update: Option<&'n Expr>,
        body: &'n Stmt,
        pos: Pos,
    ) -> ParseResult<()> {
        let labels = core::mem::take(&mut self.f().pending_labels);
        self.push_scope();
        self.set_pos(pos);
        match init {
            Some(ForInit::Decl(kind, decls)) => {
                if *kind != VarKind::Var {
                    for d in decls {
                        let local = self.declare(&d.name, BindingKind::from_var_kind(*kind), d.pos)?;
                        self.op_u16(OP_SET_LOC_UNINIT, local);
                    }
                }
                for d in decls {
                    match &d.init {
                        Some(e) => self.expr(e)?,
                        None if *kind == VarKind::Var => continue,
                        None => self.op(OP_PUSH_UNDEFINED),
                    }
                    self.put_var(&d.name, d.pos, false, true)?;
                }
            }
            Some(ForInit::Expr(e)) => {
                self.expr(e)?;
                self.op(OP_DROP);
            }
            None => {}
        }
        let (brk, cont, top) = (self.new_label(), self.new_label(), self.new_label());
        self.define_label(top);
        if let Some(test) = test {
            self.set_pos(test.pos);
            self.expr(test)?;
            self.op_label(OP_IF_FALSE, brk);
        }
        self.f().pending_labels = labels;
        self.push_control(ControlKind::Loop { brk, cont }, 0);
        self.statement(body)?;
        self.pop_control();
        self.define_label(cont);
        // Each iteration gets its own copy of the loop variables.
        let captured: Vec<u16> = self
            .fr()
            .scopes
            .last()
            .map(|s| s.bindings.iter().filter(|b| b.captured).map(|b| b.local).collect())
            .unwrap_or_default();
        for local in captured {
            self.op_u16(OP_CLOSE_LOC, local);
        }
        if let Some(update) = update {
            self.set_pos(update.pos);
            self.expr(update)?;
            self.op(OP_DROP);
        }
        self.op_label(OP_GOTO, top);
        self.define_label(brk);
        self.pop_scope();
        Ok(())
    }

    fn for_in_statement(
        &mut self,
        target: &'n ForTarget,
        object: &'n Expr,
        body: &'n Stmt,
        is_of: bool,
        pos: Pos,
    ) -> ParseResult<()> {
        let labels = core::mem::take(&mut self.f().pending_labels);
        self.set_pos(pos);
        self.expr(object)?;
        self.op(if is_of { OP_FOR_OF_START } else { OP_FOR_IN_START });
        let (brk, cont, next) = (self.new_label(), self.new_label(), self.new_label());
        self.define_label(next);
        self.op_label(OP_FOR_NEXT, brk);
        self.push_scope();
        match target {
            ForTarget::Decl(VarKind::Var, name) => self.put_var(name, pos, false, true)?,
            ForTarget::Decl(kind, name) => {
                let local = self.declare(name, BindingKind::from_var_kind(*kind), pos)?;
                self.op_u16(OP_PUT_LOC, local);
            }
            ForTarget::Expr(e) => self.assign_from_stack(e)?,
        }
        self.f().pending_labels = labels;
        self.push_control(ControlKind::Loop { brk, cont }, 1);
        self.statement(body)?;
        self.pop_control();
        self.define_label(cont);
        self.pop_scope();
        self.op_label(OP_GOTO, next);
        self.define_label(brk);
        self.op(OP_DROP);
        Ok(())
    }

    fn try_statement(
        &mut self,
        block: &'n [Stmt],
        catch: Option<&'n CatchClause>,
        finally: Option<&'n [Stmt]>,
        pos: Pos,
    ) -> ParseResult<()> {
        self.set_pos(pos);
        let (l_catch, l_end) = (self.new_label(), self.new_label());
        self.op_label(OP_CATCH, l_catch);
        self.push_control(ControlKind::Try { finally }, 1);
        self.block(block)?;
        self.pop_control();
        self.op(OP_DROP);
        if let Some(fin) = finally {
            self.block(fin)?;
        }
        self.op_label(OP_GOTO, l_end);

        // The exception is on the stack.
        self.define_label(l_catch);
        match catch {
            Some(clause) => {
                self.push_scope();
                match &clause.param {
                    Some(name) => {
                        let local = self.declare(name, BindingKind::Let, pos)?;
                        self.op_u16(OP_PUT_LOC, local);
                    }
                    None => self.op(OP_DROP),
                }
                match finally {
                    Some(fin) => {
                        let l_rethrow = self.new_label();
                        self.op_label(OP_CATCH, l_rethrow);
                        self.push_control(ControlKind::Try { finally }, 1);
                        self.block(&clause.body)?;
                        self.pop_control();
                        self.op(OP_DROP);
                        self.pop_scope();
                        self.block(fin)?;
                        self.op_label(OP_GOTO, l_end);
                        self.define_label(l_rethrow);
                        self.finally_then_rethrow(fin)?;
                    }
                    None => {
                        self.block(&clause.body)?;
                        self.pop_scope();
                    }
                }
            }
            None => {
                if let Some(fin) = finally {
                    self.finally_then_rethrow(fin)?;
                }
            }
        }
        self.define_label(l_end);
        Ok(())
    }

    fn finally_then_rethrow(&mut self, fin: &'n [Stmt]) -> ParseResult<()> {
        self.push_control(ControlKind::Hold, 1);
        self.block(fin)?;
        self.pop_control();
        self.op(OP_THROW);
        Ok(())
    }

    fn switch_statement(&mut self, disc: &'n Expr, cases: &'n [SwitchCase], pos: Pos) -> ParseResult<()> {
        let labels = core::mem::take(&mut self.f().pending_labels);
        self.set_pos(pos);
        self.expr(disc)?;
        let brk = self.new_label();
        let case_labels: Vec<Label> = cases.iter().map(|_| self.new_label()).collect();
        for (case, &label) in cases.iter().zip(&case_labels) {
            if let Some(test) = &case.test {
                self.op(OP_DUP);
                self.expr(test)?;
                self.op(OP_STRICT_EQ);
                self.op_label(OP_IF_TRUE, label);
            }
        }
        match cases.iter().position(|c| c.test.is_none()) {
            Some(idx) => self.op_label(OP_GOTO, case_labels[idx]),
            None => self.op_label(OP_GOTO, brk),
        }
        self.f().pending_labels = labels;
        self.push_control(ControlKind::Break { brk, is_switch: true }, 1);
        self.push_scope();
        let all: Vec<&'n Stmt> = cases.iter().flat_map(|c| c.body.iter()).collect();
        self.enter_switch_scope(&all)?;
        for (case, &label) in cases.iter().zip(&case_labels) {
            self.define_label(label);
            for stmt in &case.body {
                self.statement(stmt)?;
            }
        }
        self.pop_scope();
        self.pop_control();
        self.define_label(brk);
        self.op(OP_DROP);
        Ok(())
    }

    fn enter_switch_scope(&mut self, stmts: &[&'n Stmt]) -> ParseResult<()> {
        // Case bodies share one scope.
        for stmt in stmts {
            self.enter_block(core::slice::from_ref(*stmt))?;
        }
        Ok(())
    }

    /// Stores the value on top of the stack into an assignment target and
    /// pops it.
    fn assign_from_stack(&mut self, target: &'n Expr) -> ParseResult<()> {
        match &target.kind {
            ExprKind::Ident(name) => self.put_var(name, target.pos, false, false),
            ExprKind::Member(obj, name) => {
                let tmp = self.alloc_local("<tmp>", target.pos)?;
                self.op_u16(OP_PUT_LOC, tmp);
                self.expr(obj)?;
                self.op_u16(OP_GET_LOC, tmp);
                let atom = self.string_const(name, target.pos)?;
                self.op_u16(OP_PUT_FIELD, atom);
                self.op(OP_DROP);
                Ok(())
            }
            ExprKind::Index(obj, key) => {
                let tmp = self.alloc_local("<tmp>", target.pos)?;
                self.op_u16(OP_PUT_LOC, tmp);
                self.expr(obj)?;
                self.expr(key)?;
                self.op_u16(OP_GET_LOC, tmp);
                self.op(OP_PUT_ARRAY_EL);
                self.op(OP_DROP);
                Ok(())
            }
            _ => Err(ParseError::new("invalid assignment target", target.pos)),
        }
    }

    // --- expressions ---

    fn expr(&mut self, e: &'n Expr) -> ParseResult<()> {
        self.limit.enter(e.pos)?;
        let res = self.expr_inner(e);
        self.limit.leave();
        res
    }

    fn expr_inner(&mut self, e: &'n Expr) -> ParseResult<()> {
        match &e.kind {
            ExprKind::Number(n) => self.emit_number(*n, e.pos)?,
            ExprKind::Str(s) => {
                let idx = self.string_const(s, e.pos)?;
                self.op_u16(OP_PUSH_CONST, idx);
            }
            ExprKind::Ident(name) => {
                self.set_pos(e.pos);
                self.get_var(name, e.pos, false)?;
            }
            ExprKind::This => {
                if self.fr().is_arrow {
                    self.get_var("this", e.pos, false)?;
                } else {
                    match self.fr().find_scoped("this") {
                        Some((s, b)) => {
                            let local = self.fr().scopes[s].bindings[b].local;
                            self.op_u16(OP_GET_LOC, local);
                        }
                        None => self.op(OP_PUSH_THIS),
                    }
                }
            }
            ExprKind::Null => self.op(OP_PUSH_NULL),
            ExprKind::Bool(true) => self.op(OP_PUSH_TRUE),
            ExprKind::Bool(false) => self.op(OP_PUSH_FALSE),
            ExprKind::Array(elems) => {
                let count = u16::try_from(elems.len()).map_err(|_| ParseError::new("too many elements", e.pos))?;
                for elem in elems {
                    match elem {
                        Some(v) => self.expr(v)?,
                        None => self.op(OP_PUSH_UNDEFINED),
                    }
                }
                self.op_u16(OP_ARRAY_FROM, count);
            }
            ExprKind::Object(props) => self.object_literal(props, e.pos)?,
            ExprKind::Function(func) => {
                let idx = self.compile_nested(func)?;
                self.op_u16(OP_FCLOSURE, idx);
            }
            ExprKind::Unary(op, operand) => self.unary(*op, operand, e.pos)?,
            ExprKind::Update {
                increment,
                prefix,
                target,
            } => self.update(*increment, *prefix, target, e.pos)?,
            ExprKind::Binary(op, a, b) => {
                self.expr(a)?;
                self.expr(b)?;
                self.set_pos(e.pos);
                self.op(binary_opcode(*op));
            }
            ExprKind::Logical(op, a, b) => {
                let end = self.new_label();
                self.expr(a)?;
                self.op(OP_DUP);
                self.logical_skip(*op, end);
                self.op(OP_DROP);
                self.expr(b)?;
                self.define_label(end);
            }
            ExprKind::Conditional(cond, a, b) => {
                let (l_else, l_end) = (self.new_label(), self.new_label());
                self.expr(cond)?;
                self.op_label(OP_IF_FALSE, l_else);
                self.expr(a)?;
                self.op_label(OP_GOTO, l_end);
                self.define_label(l_else);
                self.expr(b)?;
                self.define_label(l_end);
            }
            ExprKind::Assign { op, target, value } => self.assign(*op, target, value, e.pos)?,
            ExprKind::Member(obj, name) => {
                self.expr(obj)?;
                let atom = self.string_const(name, e.pos)?;
                self.set_pos(e.pos);
                self.op_u16(OP_GET_FIELD, atom);
            }
            ExprKind::Index(obj, key) => {
                self.expr(obj)?;
                self.expr(key)?;
                self.set_pos(e.pos);
                self.op(OP_GET_ARRAY_EL);
            }
            ExprKind::Call(callee, args) => {
                match &callee.kind {
                    ExprKind::Member(obj, name) => {
                        self.expr(obj)?;
                        let atom = self.string_const(name, callee.pos)?;
                        self.set_pos(callee.pos);
                        self.op_u16(OP_GET_FIELD2, atom);
                    }
                    ExprKind::Index(obj, key) => {
                        self.expr(obj)?;
                        self.expr(key)?;
                        self.set_pos(callee.pos);
                        self.op(OP_GET_ARRAY_EL2);
                    }
                    _ => {
                        self.op(OP_PUSH_UNDEFINED);
                        self.expr(callee)?;
                    }
                }
                let argc = self.arguments(args, e.pos)?;
                self.set_pos(e.pos);
                self.op_u16(OP_CALL, argc);
            }
            ExprKind::New(callee, args) => {
                self.expr(callee)?;
                let argc = self.arguments(args, e.pos)?;
                self.set_pos(e.pos);
                self.op_u16(OP_CALL_CONSTRUCTOR, argc);
            }
            ExprKind::Sequence(list) => {
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        self.op(OP_DROP);
                    }
                    self.expr(item)?;
                }
            }
        }
        Ok(())
    }

    fn arguments(&mut self, args: &'n [Expr], pos: Pos) -> ParseResult<u16> {
        let argc = u16::try_from(args.len()).map_err(|_| ParseError::new("too many arguments", pos))?;
        for arg in args {
            self.expr(arg)?;
        }
        Ok(argc)
    }

    /// Jumps to `end` when the duplicated value on top already decides a
    /// logical operator. Pops the duplicate.
    fn logical_skip(&mut self, op: LogicalOp, end: Label) {
        match op {
            LogicalOp::And => self.op_label(OP_IF_FALSE, end),
            LogicalOp::Or => self.op_label(OP_IF_TRUE, end),
            LogicalOp::Nullish => {
                self.op(OP_IS_UNDEFINED_OR_NULL);
                self.op_label(OP_IF_FALSE, end);
            }
        }
    }

    fn object_literal(&mut self, props: &'n [PropDef], pos: Pos) -> ParseResult<()> {
        self.op(OP_OBJECT);
        for prop in props {
            match (&prop.name, &prop.value) {
                (PropName::Static(name), PropValue::Init(v)) => {
                    self.expr(v)?;
                    let atom = self.string_const(name, pos)?;
                    self.op_u16(OP_DEFINE_FIELD, atom);
                }
                (PropName::Computed(key), PropValue::Init(v)) => {
                    self.expr(key)?;
                    self.expr(v)?;
                    self.op(OP_DEFINE_ARRAY_EL);
                }
                (PropName::Static(name), PropValue::Getter(func) | PropValue::Setter(func)) => {
                    let idx = self.compile_nested(func)?;
                    self.op_u16(OP_FCLOSURE, idx);
                    let atom = self.string_const(name, pos)?;
                    let op = if matches!(prop.value, PropValue::Getter(_)) {
                        OP_DEFINE_GETTER
                    } else {
                        OP_DEFINE_SETTER
                    };
                    self.op_u16(op, atom);
                }
                (PropName::Computed(key), _) => {
                    return Err(ParseError::new("computed accessor names are not supported", key.pos));
                }
            }
        }
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp, operand: &'n Expr, pos: Pos) -> ParseResult<()> {
        match op {
            UnaryOp::Typeof => {
                if let ExprKind::Ident(name) = &operand.kind {
                    self.get_var(name, operand.pos, true)?;
                } else {
                    self.expr(operand)?;
                }
                self.op(OP_TYPEOF);
            }
            UnaryOp::Void => {
                self.expr(operand)?;
                self.op(OP_DROP);
                self.op(OP_PUSH_UNDEFINED);
            }
            UnaryOp::Delete => match &operand.kind {
                ExprKind::Member(obj, name) => {
                    self.expr(obj)?;
                    let atom = self.string_const(name, pos)?;
                    self.op_u16(OP_PUSH_CONST, atom);
                    self.set_pos(pos);
                    self.op(OP_DELETE);
                }
                ExprKind::Index(obj, key) => {
                    self.expr(obj)?;
                    self.expr(key)?;
                    self.set_pos(pos);
                    self.op(OP_DELETE);
                }
                ExprKind::Ident(_) => self.op(OP_PUSH_FALSE),
                _ => {
                    self.expr(operand)?;
                    self.op(OP_DROP);
                    self.op(OP_PUSH_TRUE);
                }
            },
            _ => {
                self.expr(operand)?;
                self.set_pos(pos);
                self.op(match op {
                    UnaryOp::Neg => OP_NEG,
                    UnaryOp::Plus => OP_PLUS,
                    UnaryOp::Not => OP_LNOT,
                    _ => OP_NOT,
                });
            }
        }
        Ok(())
    }

    fn update(&mut self, increment: bool, prefix: bool, target: &'n Expr, pos: Pos) -> ParseResult<()> {
        let step = if increment { OP_INC } else { OP_DEC };
        self.set_pos(pos);
        match &target.kind {
            ExprKind::Ident(name) => {
                self.get_var(name, target.pos, false)?;
                if prefix {
                    self.op(step);
                    self.put_var(name, target.pos, true, false)?;
                } else {
                    self.op(OP_TO_NUMERIC);
                    self.op(OP_DUP);
                    self.op(step);
                    self.put_var(name, target.pos, false, false)?;
                }
            }
            ExprKind::Member(obj, name) => {
                let atom = self.string_const(name, target.pos)?;
                self.expr(obj)?;
                self.op(OP_DUP);
                self.op_u16(OP_GET_FIELD, atom);
                if prefix {
                    self.op(step);
                    self.op_u16(OP_PUT_FIELD, atom);
                } else {
                    self.op(OP_TO_NUMERIC);
                    self.op(OP_INSERT2);
                    self.op(step);
                    self.op_u16(OP_PUT_FIELD, atom);
                    self.op(OP_DROP);
                }
            }
            ExprKind::Index(obj, key) => {
                self.expr(obj)?;
                self.expr(key)?;
                self.op(OP_DUP2);
                self.op(OP_GET_ARRAY_EL);
                if prefix {
                    self.op(step);
                    self.op(OP_PUT_ARRAY_EL);
                } else {
                    self.op(OP_TO_NUMERIC);
                    self.op(OP_INSERT3);
                    self.op(step);
                    self.op(OP_PUT_ARRAY_EL);
                    self.op(OP_DROP);
                }
            }
            _ => return Err(ParseError::new("invalid increment/decrement operand", pos)),
        }
        Ok(())
    }

    fn assign(&mut self, op: AssignOp, target: &'n Expr, value: &'n Expr, pos: Pos) -> ParseResult<()> {
        match (&target.kind, op) {
            (ExprKind::Ident(name), AssignOp::Assign) => {
                self.expr(value)?;
                self.set_pos(pos);
                self.put_var(name, target.pos, true, false)?;
            }
            (ExprKind::Ident(name), AssignOp::Compound(bin)) => {
                self.get_var(name, target.pos, false)?;
                self.expr(value)?;
                self.set_pos(pos);
                self.op(binary_opcode(bin));
                self.put_var(name, target.pos, true, false)?;
            }
            (ExprKind::Ident(name), AssignOp::Logical(lop)) => {
                let end = self.new_label();
                self.get_var(name, target.pos, false)?;
                self.op(OP_DUP);
                self.logical_skip(lop, end);
                self.op(OP_DROP);
                self.expr(value)?;
                self.put_var(name, target.pos, true, false)?;
                self.define_label(end);
            }
            (ExprKind::Member(obj, name), _) => {
                let atom = self.string_const(name, target.pos)?;
                self.expr(obj)?;
                match op {
                    AssignOp::Assign => {
                        self.expr(value)?;
                        self.set_pos(pos);
                        self.op_u16(OP_PUT_FIELD, atom);
                    }
                    AssignOp::Compound(bin) => {
                        self.op(OP_DUP);
                        self.op_u16(OP_GET_FIELD, atom);
                        self.expr(value)?;
                        self.set_pos(pos);
                        self.op(binary_opcode(bin));
                        self.op_u16(OP_PUT_FIELD, atom);
                    }
                    AssignOp::Logical(lop) => {
                        let (skip, end) = (self.new_label(), self.new_label());
                        self.op(OP_DUP);
                        self.op_u16(OP_GET_FIELD, atom);
                        self.op(OP_DUP);
                        self.logical_skip(lop, skip);
                        self.op(OP_DROP);
                        self.expr(value)?;
                        self.op_u16(OP_PUT_FIELD, atom);
                        self.op_label(OP_GOTO, end);
                        self.define_label(skip);
                        self.op(OP_NIP);
                        self.define_label(end);
                    }
                }
            }
            (ExprKind::Index(obj, key), _) => {
                self.expr(obj)?;
                self.expr(key)?;
                match op {
                    AssignOp::Assign => {
                        self.expr(value)?;
                        self.set_pos(pos);
                        self.op(OP_PUT_ARRAY_EL);
                    }
                    AssignOp::Compound(bin) => {
                        self.op(OP_DUP2);
                        self.op(OP_GET_ARRAY_EL);
                        self.expr(value)?;
                        self.set_pos(pos);
                        self.op(binary_opcode(bin));
                        self.op(OP_PUT_ARRAY_EL);
                    }
                    AssignOp::Logical(lop) => {
                        let (skip, end) = (self.new_label(), self.new_label());
                        self.op(OP_DUP2);
                        self.op(OP_GET_ARRAY_EL);
                        self.op(OP_DUP);
                        self.logical_skip(lop, skip);
                        self.op(OP_DROP);
                        self.expr(value)?;
                        self.op(OP_PUT_ARRAY_EL);
                        self.op_label(OP_GOTO, end);
                        self.define_label(skip);
                        self.op(OP_NIP);
                        self.op(OP_NIP);
                        self.define_label(end);
                    }
                }
            }
            _ => return Err(ParseError::new("invalid assignment left-hand side", pos)),
        }
        Ok(())
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use crate::parser::parse::parse_script;

    fn compile(src: &str, retval: bool) -> FunctionDef {
        let body = parse_script(src.as_bytes()).unwrap();
        Emitter::new(src.as_bytes(), false, retval).compile_script(&body).unwrap()
    }

    fn ops(code: &[u8]) -> Vec<&'static str> {
        let mut out = Vec::new();
        let mut pc = 0;
        while pc < code.len() {
            let info = OpCode(code[pc]).info().unwrap();
            out.push(info.name);
            pc += info.size as usize;
        }
        out
    }

    #[test]
    fn small_integers_use_short_forms() {
        let def = compile("1 + 300", true);
        let names = ops(&def.byte_code);
        assert_eq!(&names[..3], &["push_i8", "push_i32", "add"]);
        assert!(def.cpool.is_empty());
        let def = compile("1.5 + -0", true);
        assert_eq!(def.cpool.len(), 1);
    }

    #[test]
    fn globals_are_defined_up_front() {
        let def = compile("var a = 1; let b; function f() {}", false);
        let names = ops(&def.byte_code);
        assert_eq!(&names[..4], &["define_global", "define_global", "fclosure", "put_global"]);
        assert_eq!(names.last(), Some(&"return_undef"));
    }

    #[test]
    fn closures_capture_enclosing_locals() {
        let def = compile("function f(a) { let b = 1; return () => a + b; }", false);
        let Const::Function(f) = &def.cpool[0] else {
            panic!("expected function constant");
        };
        let Some(Const::Function(arrow)) = f.cpool.iter().find(|c| matches!(c, Const::Function(_))) else {
            panic!("expected nested arrow");
        };
        let sources: Vec<_> = arrow.closure_vars.iter().map(|cv| cv.source).collect();
        assert_eq!(sources, vec![ClosureVarSource::Arg(0), ClosureVarSource::Local(0)]);
        assert_eq!(f.vars, vec!["b".to_string()]);
    }

    #[test]
    fn const_assignment_throws() {
        let def = compile("function f() { const c = 1; c = 2; }", false);
        let Const::Function(f) = &def.cpool[0] else {
            panic!("expected function constant");
        };
        assert!(ops(&f.byte_code).contains(&"throw_error"));
    }

    #[test]
    fn top_level_const_is_read_only() {
        fn nested(def: &FunctionDef) -> &FunctionDef {
            match def.cpool.iter().find(|c| matches!(c, Const::Function(_))) {
                Some(Const::Function(f)) => f,
                _ => panic!("expected function constant"),
            }
        }
        let def = compile("const q = 1; function g() { q++; } q = 2;", false);
        assert!(ops(&def.byte_code).contains(&"throw_error"));
        assert!(ops(&nested(&def).byte_code).contains(&"throw_error"));

        let def = compile("const q = 1; function g(q) { q = 2; }", false);
        assert!(!ops(&def.byte_code).contains(&"throw_error"));
        assert!(!ops(&nested(&def).byte_code).contains(&"throw_error"));
    }

    #[test]
    fn jumps_are_patched() {
        let def = compile("var i = 0; while (i < 3) { if (i == 1) break; i++; }", false);
        let mut pc = 0;
        let code = &def.byte_code;
        while pc < code.len() {
            let info = OpCode(code[pc]).info().unwrap();
            if info.fmt == OpCodeFormat::label {
                let target = u32::from_le_bytes(code[pc + 1..pc + 5].try_into().unwrap());
                assert!((target as usize) <= code.len());
            }
            pc += info.size as usize;
        }
    }

    #[test]
    fn misplaced_jumps_are_errors() {
        let body = parse_script(b"break;").unwrap();
        assert!(Emitter::new(b"break;", false, false).compile_script(&body).is_err());
        let src = b"while (1) { continue nope; }";
        let body = parse_script(src).unwrap();
        assert!(Emitter::new(src, false, false).compile_script(&body).is_err());
    }

    #[test]
    fn positions_are_recorded() {
        let def = compile("1;\n  x.y;", false);
        assert!(!def.pc2line.is_empty());
        let stripped = {
            let body = parse_script(b"1;\nx;").unwrap();
            Emitter::new(b"1;\nx;", true, false).compile_script(&body).unwrap()
        };
        assert!(!stripped.has_column);
    }
}
