//! Syntax tree produced by the parser and consumed by the emitter.
//! Every node keeps the byte offset it starts at.

pub type Pos = usize;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    Typeof,
    Void,
    Delete,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Shl,
    Sar,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    StrictEq,
    StrictNeq,
    InstanceOf,
    In,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AssignOp {
    Assign,
    Compound(BinOp),
    Logical(LogicalOp),
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropName {
    Static(Vec<u8>),
    Computed(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    Init(Expr),
    Getter(Box<FunctionNode>),
    Setter(Box<FunctionNode>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropDef {
    pub name: PropName,
    pub value: PropValue,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Number(f64),
    Str(Vec<u8>),
    Ident(String),
    This,
    Null,
    Bool(bool),
    /// `None` elements are holes.
    Array(Vec<Option<Expr>>),
    Object(Vec<PropDef>),
    Function(Box<FunctionNode>),
    Unary(UnaryOp, Box<Expr>),
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Member(Box<Expr>, Vec<u8>),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    New(Box<Expr>, Vec<Expr>),
    Sequence(Vec<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
}

impl Expr {
    pub fn new(kind: ExprKind, pos: Pos) -> Self {
        Self { kind, pos }
    }

    pub fn is_assignable(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Ident(_) | ExprKind::Member(..) | ExprKind::Index(..)
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VarKind {
    Var,
    Let,
    Const,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub init: Option<Expr>,
    pub pos: Pos,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ForInit {
    Decl(VarKind, Vec<VarDecl>),
    Expr(Expr),
}

/// Left side of `for (x in/of o)`.
#[derive(Clone, Debug, PartialEq)]
pub enum ForTarget {
    Decl(VarKind, String),
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CatchClause {
    pub param: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
    /// `None` for `default`.
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StmtKind {
    Var(VarKind, Vec<VarDecl>),
    Function(Box<FunctionNode>),
    Expr(Expr),
    Block(Vec<Stmt>),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    While(Expr, Box<Stmt>),
    DoWhile(Box<Stmt>, Expr),
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForIn {
        target: ForTarget,
        object: Expr,
        body: Box<Stmt>,
        is_of: bool,
    },
    Break(Option<String>),
    Continue(Option<String>),
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        catch: Option<CatchClause>,
        finally: Option<Vec<Stmt>>,
    },
    Switch(Expr, Vec<SwitchCase>),
    Labeled(String, Box<Stmt>),
    Empty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Pos,
}

impl Stmt {
    pub fn new(kind: StmtKind, pos: Pos) -> Self {
        Self { kind, pos }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionNode {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub is_arrow: bool,
    /// Function expression whose name is bound inside its own body.
    pub binds_own_name: bool,
    pub pos: Pos,
}

/// Calls `f` on every function nested directly or indirectly in `stmts`,
/// without entering those functions.
pub fn for_each_nested_function<'n>(stmts: &'n [Stmt], f: &mut dyn FnMut(&'n FunctionNode)) {
    for stmt in stmts {
        visit_stmt(stmt, f);
    }
}

fn visit_stmt<'n>(stmt: &'n Stmt, f: &mut dyn FnMut(&'n FunctionNode)) {
    match &stmt.kind {
        StmtKind::Var(_, decls) => {
            for d in decls {
                if let Some(e) = &d.init {
                    visit_expr(e, f);
                }
            }
        }
        StmtKind::Function(func) => f(func),
        StmtKind::Expr(e) | StmtKind::Throw(e) => visit_expr(e, f),
        StmtKind::Block(body) => for_each_nested_function(body, f),
        StmtKind::If(c, t, e) => {
            visit_expr(c, f);
            visit_stmt(t, f);
            if let Some(e) = e {
                visit_stmt(e, f);
            }
        }
        StmtKind::While(c, b) | StmtKind::DoWhile(b, c) => {
            visit_expr(c, f);
            visit_stmt(b, f);
        }
        StmtKind::For {
            init,
            test,
            update,
            body,
        } => {
            match init {
                Some(ForInit::Decl(_, decls)) => {
                    for d in decls {
                        if let Some(e) = &d.init {
                            visit_expr(e, f);
                        }
                    }
                }
                Some(ForInit::Expr(e)) => visit_expr(e, f),
                None => {}
            }
            for e in [test, update].into_iter().flatten() {
                visit_expr(e, f);
            }
            visit_stmt(body, f);
        }
        StmtKind::ForIn {
            target,
            object,
            body,
            ..
        } => {
            if let ForTarget::Expr(e) = target {
                visit_expr(e, f);
            }
            visit_expr(object, f);
            visit_stmt(body, f);
        }
        StmtKind::Return(e) => {
            if let Some(e) = e {
                visit_expr(e, f);
            }
        }
        StmtKind::Try {
            block,
            catch,
            finally,
        } => {
            for_each_nested_function(block, f);
            if let Some(c) = catch {
                for_each_nested_function(&c.body, f);
            }
            if let Some(fin) = finally {
                for_each_nested_function(fin, f);
            }
        }
        StmtKind::Switch(d, cases) => {
            visit_expr(d, f);
            for case in cases {
                if let Some(t) = &case.test {
                    visit_expr(t, f);
                }
                for_each_nested_function(&case.body, f);
            }
        }
        StmtKind::Labeled(_, s) => visit_stmt(s, f),
        StmtKind::Break(_) | StmtKind::Continue(_) | StmtKind::Empty => {}
    }
}

fn visit_expr<'n>(expr: &'n Expr, f: &mut dyn FnMut(&'n FunctionNode)) {
    match &expr.kind {
        ExprKind::Function(func) => f(func),
        ExprKind::Array(elems) => {
            for e in elems.iter().flatten() {
                visit_expr(e, f);
            }
        }
        ExprKind::Object(props) => {
            for p in props {
                if let PropName::Computed(e) = &p.name {
                    visit_expr(e, f);
                }
                match &p.value {
                    PropValue::Init(e) => visit_expr(e, f),
                    PropValue::Getter(func) | PropValue::Setter(func) => f(func),
                }
            }
        }
        ExprKind::Unary(_, e) | ExprKind::Member(e, _) => visit_expr(e, f),
        ExprKind::Update { target, .. } => visit_expr(target, f),
        ExprKind::Binary(_, a, b) | ExprKind::Logical(_, a, b) | ExprKind::Index(a, b) => {
            visit_expr(a, f);
            visit_expr(b, f);
        }
        ExprKind::Assign { target, value, .. } => {
            visit_expr(target, f);
            visit_expr(value, f);
        }
        ExprKind::Conditional(a, b, c) => {
            visit_expr(a, f);
            visit_expr(b, f);
            visit_expr(c, f);
        }
        ExprKind::Call(callee, args) | ExprKind::New(callee, args) => {
            visit_expr(callee, f);
            for a in args {
                visit_expr(a, f);
            }
        }
        ExprKind::Sequence(list) => {
            for e in list {
                visit_expr(e, f);
            }
        }
        ExprKind::Number(_)
        | ExprKind::Str(_)
        | ExprKind::Ident(_)
        | ExprKind::This
        | ExprKind::Null
        | ExprKind::Bool(_) => {}
    }
}

/// True if `this` is used by an arrow function nested (at any depth of
/// arrows) in `body`.
pub fn arrows_use_this(body: &[Stmt]) -> bool {
    let mut found = false;
    for_each_nested_function(body, &mut |func| {
        if func.is_arrow && !found {
            found = uses_this(&func.body);
        }
    });
    found
}

/// True if `this` appears in `body` or in arrows nested in it.
fn uses_this(body: &[Stmt]) -> bool {
    body.iter().any(stmt_uses_this) || arrows_use_this(body)
}

fn stmt_uses_this(stmt: &Stmt) -> bool {
    let mut found = false;
    let mut check = |e: &Expr| found |= expr_uses_this(e);
    match &stmt.kind {
        StmtKind::Var(_, decls) => decls.iter().filter_map(|d| d.init.as_ref()).for_each(&mut check),
        StmtKind::Expr(e) | StmtKind::Throw(e) => check(e),
        StmtKind::Return(Some(e)) => check(e),
        StmtKind::Block(body) => return body.iter().any(stmt_uses_this),
        StmtKind::If(c, t, e) => {
            check(c);
            return found || stmt_uses_this(t) || e.as_deref().is_some_and(stmt_uses_this);
        }
        StmtKind::While(c, b) | StmtKind::DoWhile(b, c) => {
            check(c);
            return found || stmt_uses_this(b);
        }
        StmtKind::For {
            init,
            test,
            update,
            body,
        } => {
            match init {
                Some(ForInit::Decl(_, decls)) => {
                    decls.iter().filter_map(|d| d.init.as_ref()).for_each(&mut check)
                }
                Some(ForInit::Expr(e)) => check(e),
                None => {}
            }
            [test, update].into_iter().flatten().for_each(&mut check);
            return found || stmt_uses_this(body);
        }
        StmtKind::ForIn {
            target, object, body, ..
        } => {
            if let ForTarget::Expr(e) = target {
                check(e);
            }
            check(object);
            return found || stmt_uses_this(body);
        }
        StmtKind::Try {
            block,
            catch,
            finally,
        } => {
            return block.iter().any(stmt_uses_this)
                || catch.as_ref().is_some_and(|c| c.body.iter().any(stmt_uses_this))
                || finally.as_ref().is_some_and(|f| f.iter().any(stmt_uses_this));
        }
        StmtKind::Switch(d, cases) => {
            check(d);
            return found
                || cases.iter().any(|c| {
                    c.test.as_ref().is_some_and(expr_uses_this) || c.body.iter().any(stmt_uses_this)
                });
        }
        StmtKind::Labeled(_, s) => return stmt_uses_this(s),
        _ => {}
    }
    found
}

fn expr_uses_this(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::This => true,
        // Nested arrows are handled by `arrows_use_this`; other functions
        // have their own `this`.
        ExprKind::Function(_) => false,
        ExprKind::Array(elems) => elems.iter().flatten().any(expr_uses_this),
        ExprKind::Object(props) => props.iter().any(|p| {
            matches!(&p.name, PropName::Computed(e) if expr_uses_this(e))
                || matches!(&p.value, PropValue::Init(e) if expr_uses_this(e))
        }),
        ExprKind::Unary(_, e) | ExprKind::Member(e, _) => expr_uses_this(e),
        ExprKind::Update { target, .. } => expr_uses_this(target),
        ExprKind::Binary(_, a, b) | ExprKind::Logical(_, a, b) | ExprKind::Index(a, b) => {
            expr_uses_this(a) || expr_uses_this(b)
        }
        ExprKind::Assign { target, value, .. } => expr_uses_this(target) || expr_uses_this(value),
        ExprKind::Conditional(a, b, c) => expr_uses_this(a) || expr_uses_this(b) || expr_uses_this(c),
        ExprKind::Call(callee, args) | ExprKind::New(callee, args) => {
            expr_uses_this(callee) || args.iter().any(expr_uses_this)
        }
        ExprKind::Sequence(list) => list.iter().any(expr_uses_this),
        ExprKind::Number(_) | ExprKind::Str(_) | ExprKind::Ident(_) | ExprKind::Null | ExprKind::Bool(_) => {
            false
        }
    }
}
