//! Recursive-descent parser producing the syntax tree.

use super::ast::*;
use super::error::{ParseError, ParseResult};
use super::lexer::{Lexer, TokenInfo};
use super::stack_limit::StackLimit;
use super::tokens::{Keyword, Punct, Token};
use crate::dtoa::js_number_to_string;

pub struct Parser<'s> {
    lexer: Lexer<'s>,
    tok: TokenInfo,
    limit: StackLimit,
    /// Nesting of function bodies; `return` is only valid inside one.
    func_depth: u32,
}

fn binary_precedence(tok: &Token, no_in: bool) -> Option<(u8, BinOp)> {
    let op = match tok {
        Token::Punct(p) => match p {
            Punct::Pipe => (3, BinOp::BitOr),
            Punct::Caret => (4, BinOp::BitXor),
            Punct::Amp => (5, BinOp::BitAnd),
            Punct::Eq => (6, BinOp::Eq),
            Punct::Neq => (6, BinOp::Neq),
            Punct::StrictEq => (6, BinOp::StrictEq),
            Punct::StrictNeq => (6, BinOp::StrictNeq),
            Punct::Lt => (7, BinOp::Lt),
            Punct::Lte => (7, BinOp::Lte),
            Punct::Gt => (7, BinOp::Gt),
            Punct::Gte => (7, BinOp::Gte),
            Punct::Shl => (8, BinOp::Shl),
            Punct::Sar => (8, BinOp::Sar),
            Punct::Shr => (8, BinOp::Shr),
            Punct::Plus => (9, BinOp::Add),
            Punct::Minus => (9, BinOp::Sub),
            Punct::Star => (10, BinOp::Mul),
            Punct::Slash => (10, BinOp::Div),
            Punct::Percent => (10, BinOp::Mod),
            Punct::Pow => (11, BinOp::Pow),
            _ => return None,
        },
        Token::Keyword(Keyword::Instanceof) => (7, BinOp::InstanceOf),
        Token::Keyword(Keyword::In) if !no_in => (7, BinOp::In),
        _ => return None,
    };
    Some(op)
}

fn logical_precedence(tok: &Token) -> Option<(u8, LogicalOp)> {
    match tok {
        Token::Punct(Punct::LOr) => Some((1, LogicalOp::Or)),
        Token::Punct(Punct::Nullish) => Some((1, LogicalOp::Nullish)),
        Token::Punct(Punct::LAnd) => Some((2, LogicalOp::And)),
        _ => None,
    }
}

fn assign_op(tok: &Token) -> Option<AssignOp> {
    let Token::Punct(p) = tok else {
        return None;
    };
    let op = match p {
        Punct::Assign => AssignOp::Assign,
        Punct::PlusAssign => AssignOp::Compound(BinOp::Add),
        Punct::MinusAssign => AssignOp::Compound(BinOp::Sub),
        Punct::MulAssign => AssignOp::Compound(BinOp::Mul),
        Punct::DivAssign => AssignOp::Compound(BinOp::Div),
        Punct::ModAssign => AssignOp::Compound(BinOp::Mod),
        Punct::PowAssign => AssignOp::Compound(BinOp::Pow),
        Punct::ShlAssign => AssignOp::Compound(BinOp::Shl),
        Punct::SarAssign => AssignOp::Compound(BinOp::Sar),
        Punct::ShrAssign => AssignOp::Compound(BinOp::Shr),
        Punct::AndAssign => AssignOp::Compound(BinOp::BitAnd),
        Punct::OrAssign => AssignOp::Compound(BinOp::BitOr),
        Punct::XorAssign => AssignOp::Compound(BinOp::BitXor),
        Punct::LAndAssign => AssignOp::Logical(LogicalOp::And),
        Punct::LOrAssign => AssignOp::Logical(LogicalOp::Or),
        Punct::NullishAssign => AssignOp::Logical(LogicalOp::Nullish),
        _ => return None,
    };
    Some(op)
}

impl<'s> Parser<'s> {
    pub fn new(src: &'s [u8]) -> ParseResult<Self> {
        let mut lexer = Lexer::new(src);
        let tok = lexer.next_token()?;
        Ok(Self {
            lexer,
            tok,
            limit: StackLimit::here(),
            func_depth: 0,
        })
    }

    /// Parses a whole script.
    pub fn parse_program(mut self) -> ParseResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while self.tok.token != Token::Eof {
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn advance(&mut self) -> ParseResult<TokenInfo> {
        let next = self.lexer.next_token()?;
        Ok(core::mem::replace(&mut self.tok, next))
    }

    fn peek(&self) -> ParseResult<TokenInfo> {
        self.lexer.clone().next_token()
    }

    fn is(&self, p: Punct) -> bool {
        self.tok.token.is_punct(p)
    }

    fn is_kw(&self, kw: Keyword) -> bool {
        self.tok.token.is_keyword(kw)
    }

    fn eat(&mut self, p: Punct) -> ParseResult<bool> {
        if self.is(p) {
            self.advance()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn error<T>(&self, message: impl Into<String>) -> ParseResult<T> {
        Err(ParseError::new(message, self.tok.pos))
    }

    fn unexpected<T>(&self) -> ParseResult<T> {
        self.error(format!("unexpected {}", self.tok.token.describe()))
    }

    fn expect(&mut self, p: Punct) -> ParseResult<()> {
        if !self.eat(p)? {
            return self.error(format!("expecting '{}'", p.as_str()));
        }
        Ok(())
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        match &self.tok.token {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            _ => self.error("expecting identifier"),
        }
    }

    /// Automatic semicolon insertion.
    fn expect_semi(&mut self) -> ParseResult<()> {
        if self.eat(Punct::Semi)? {
            return Ok(());
        }
        if self.is(Punct::RBrace) || self.tok.token == Token::Eof || self.tok.got_lf {
            return Ok(());
        }
        self.error("expecting ';'")
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.limit.enter(self.tok.pos)
    }

    fn leave(&mut self) {
        self.limit.leave();
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        self.enter()?;
        let stmt = self.statement_inner();
        self.leave();
        stmt
    }

    fn statement_inner(&mut self) -> ParseResult<Stmt> {
        let pos = self.tok.pos;
        let kind = match &self.tok.token {
            Token::Punct(Punct::LBrace) => StmtKind::Block(self.block()?),
            Token::Punct(Punct::Semi) => {
                self.advance()?;
                StmtKind::Empty
            }
            Token::Keyword(Keyword::Var) | Token::Keyword(Keyword::Const) => {
                let kind = if self.is_kw(Keyword::Var) { VarKind::Var } else { VarKind::Const };
                self.advance()?;
                let decls = self.var_declarations(kind, false)?;
                self.expect_semi()?;
                StmtKind::Var(kind, decls)
            }
            Token::Keyword(Keyword::Let) => {
                self.advance()?;
                let decls = self.var_declarations(VarKind::Let, false)?;
                self.expect_semi()?;
                StmtKind::Var(VarKind::Let, decls)
            }
            Token::Keyword(Keyword::Function) => {
                self.advance()?;
                let func = self.function_rest(pos, true, false)?;
                StmtKind::Function(Box::new(func))
            }
            Token::Keyword(Keyword::If) => {
                self.advance()?;
                self.expect(Punct::LParen)?;
                let cond = self.expression(false)?;
                self.expect(Punct::RParen)?;
                let then = self.statement()?;
                let otherwise = if self.is_kw(Keyword::Else) {
                    self.advance()?;
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                StmtKind::If(cond, Box::new(then), otherwise)
            }
            Token::Keyword(Keyword::While) => {
                self.advance()?;
                self.expect(Punct::LParen)?;
                let cond = self.expression(false)?;
                self.expect(Punct::RParen)?;
                StmtKind::While(cond, Box::new(self.statement()?))
            }
            Token::Keyword(Keyword::Do) => {
                self.advance()?;
                let body = self.statement()?;
                if !self.is_kw(Keyword::While) {
                    return self.error("expecting 'while'");
                }
                self.advance()?;
                self.expect(Punct::LParen)?;
                let cond = self.expression(false)?;
                self.expect(Punct::RParen)?;
                self.eat(Punct::Semi)?;
                StmtKind::DoWhile(Box::new(body), cond)
            }
            Token::Keyword(Keyword::For) => self.for_statement()?,
            Token::Keyword(Keyword::Break) | Token::Keyword(Keyword::Continue) => {
                let is_break = self.is_kw(Keyword::Break);
                self.advance()?;
                let label = match &self.tok.token {
                    Token::Ident(name) if !self.tok.got_lf => {
                        let name = name.clone();
                        self.advance()?;
                        Some(name)
                    }
                    _ => None,
                };
                self.expect_semi()?;
                if is_break {
                    StmtKind::Break(label)
                } else {
                    StmtKind::Continue(label)
                }
            }
            Token::Keyword(Keyword::Return) => {
                if self.func_depth == 0 {
                    return self.error("return not in a function");
                }
                self.advance()?;
                let value = if self.is(Punct::Semi)
                    || self.is(Punct::RBrace)
                    || self.tok.got_lf
                    || self.tok.token == Token::Eof
                {
                    None
                } else {
                    Some(self.expression(false)?)
                };
                self.expect_semi()?;
                StmtKind::Return(value)
            }
            Token::Keyword(Keyword::Throw) => {
                self.advance()?;
                if self.tok.got_lf {
                    return self.error("line terminator not allowed after throw");
                }
                let value = self.expression(false)?;
                self.expect_semi()?;
                StmtKind::Throw(value)
            }
            Token::Keyword(Keyword::Try) => self.try_statement()?,
            Token::Keyword(Keyword::Switch) => self.switch_statement()?,
            Token::Keyword(Keyword::Debugger) => {
                self.advance()?;
                self.expect_semi()?;
                StmtKind::Empty
            }
            Token::Keyword(
                kw @ (Keyword::With
                | Keyword::Class
                | Keyword::Enum
                | Keyword::Export
                | Keyword::Import
                | Keyword::Super
                | Keyword::Yield),
            ) => {
                return self.error(format!("'{}' is not supported", kw.as_str()));
            }
            Token::Ident(name) if self.peek()?.token.is_punct(Punct::Colon) => {
                let label = name.clone();
                self.advance()?;
                self.advance()?;
                StmtKind::Labeled(label, Box::new(self.statement()?))
            }
            _ => {
                let expr = self.expression(false)?;
                self.expect_semi()?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt::new(kind, pos))
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(Punct::LBrace)?;
        let mut body = Vec::new();
        while !self.is(Punct::RBrace) {
            if self.tok.token == Token::Eof {
                return self.error("expecting '}'");
            }
            body.push(self.statement()?);
        }
        self.advance()?;
        Ok(body)
    }

    fn var_declarations(&mut self, kind: VarKind, no_in: bool) -> ParseResult<Vec<VarDecl>> {
        let mut decls = Vec::new();
        loop {
            let pos = self.tok.pos;
            let name = self.expect_ident()?;
            let init = if self.eat(Punct::Assign)? {
                Some(self.assignment(no_in)?)
            } else {
                None
            };
            if kind == VarKind::Const && init.is_none() && !no_in {
                return Err(ParseError::new("missing initializer for const variable", pos));
            }
            decls.push(VarDecl { name, init, pos });
            if !self.eat(Punct::Comma)? {
                return Ok(decls);
            }
        }
    }

    fn for_statement(&mut self) -> ParseResult<StmtKind> {
        self.advance()?;
        self.expect(Punct::LParen)?;
        let decl_kind = match &self.tok.token {
            Token::Keyword(Keyword::Var) => Some(VarKind::Var),
            Token::Keyword(Keyword::Let) => Some(VarKind::Let),
            Token::Keyword(Keyword::Const) => Some(VarKind::Const),
            _ => None,
        };
        let mut init = None;
        if let Some(kind) = decl_kind {
            self.advance()?;
            let decls = self.var_declarations(kind, true)?;
            if decls.len() == 1 && decls[0].init.is_none() {
                if let Some(is_of) = self.for_in_of_keyword() {
                    self.advance()?;
                    let target = ForTarget::Decl(kind, decls[0].name.clone());
                    return self.for_in_rest(target, is_of);
                }
            }
            if let Some(d) = decls.iter().find(|d| kind == VarKind::Const && d.init.is_none()) {
                return Err(ParseError::new("missing initializer for const variable", d.pos));
            }
            init = Some(ForInit::Decl(kind, decls));
        } else if !self.is(Punct::Semi) {
            let expr = self.expression(true)?;
            if let Some(is_of) = self.for_in_of_keyword() {
                if !expr.is_assignable() {
                    return self.error("invalid for in/of left hand-side");
                }
                self.advance()?;
                return self.for_in_rest(ForTarget::Expr(expr), is_of);
            }
            init = Some(ForInit::Expr(expr));
        }
        self.expect(Punct::Semi)?;
        let test = if self.is(Punct::Semi) {
            None
        } else {
            Some(self.expression(false)?)
        };
        self.expect(Punct::Semi)?;
        let update = if self.is(Punct::RParen) {
            None
        } else {
            Some(self.expression(false)?)
        };
        self.expect(Punct::RParen)?;
        let body = Box::new(self.statement()?);
        Ok(StmtKind::For {
            init,
            test,
            update,
            body,
        })
    }

    /// `Some(true)` on `of`, `Some(false)` on `in`.
    fn for_in_of_keyword(&self) -> Option<bool> {
        match &self.tok.token {
            Token::Keyword(Keyword::In) => Some(false),
            Token::Ident(name) if name == "of" => Some(true),
            _ => None,
        }
    }

    fn for_in_rest(&mut self, target: ForTarget, is_of: bool) -> ParseResult<StmtKind> {
        let object = if is_of {
            self.assignment(false)?
        } else {
            self.expression(false)?
        };
        self.expect(Punct::RParen)?;
        let body = Box::new(self.statement()?);
        Ok(StmtKind::ForIn {
            target,
            object,
            body,
            is_of,
        })
    }

    fn try_statement(&mut self) -> ParseResult<StmtKind> {
        self.advance()?;
        let block = self.block()?;
        let mut catch = None;
        let mut finally = None;
        if self.is_kw(Keyword::Catch) {
            self.advance()?;
            let param = if self.eat(Punct::LParen)? {
                let name = self.expect_ident()?;
                self.expect(Punct::RParen)?;
                Some(name)
            } else {
                None
            };
            let body = self.block()?;
            catch = Some(CatchClause { param, body });
        }
        if self.is_kw(Keyword::Finally) {
            self.advance()?;
            finally = Some(self.block()?);
        }
        if catch.is_none() && finally.is_none() {
            return self.error("expecting 'catch' or 'finally'");
        }
        Ok(StmtKind::Try {
            block,
            catch,
            finally,
        })
    }

    fn switch_statement(&mut self) -> ParseResult<StmtKind> {
        self.advance()?;
        self.expect(Punct::LParen)?;
        let disc = self.expression(false)?;
        self.expect(Punct::RParen)?;
        self.expect(Punct::LBrace)?;
        let mut cases = Vec::new();
        let mut has_default = false;
        while !self.eat(Punct::RBrace)? {
            let test = if self.is_kw(Keyword::Case) {
                self.advance()?;
                Some(self.expression(false)?)
            } else if self.is_kw(Keyword::Default) {
                if has_default {
                    return self.error("duplicate default");
                }
                has_default = true;
                self.advance()?;
                None
            } else {
                return self.unexpected();
            };
            self.expect(Punct::Colon)?;
            let mut body = Vec::new();
            while !self.is(Punct::RBrace)
                && !self.is_kw(Keyword::Case)
                && !self.is_kw(Keyword::Default)
            {
                if self.tok.token == Token::Eof {
                    return self.error("expecting '}'");
                }
                body.push(self.statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        Ok(StmtKind::Switch(disc, cases))
    }

    /// Parses the rest of a function after the `function` keyword.
    fn function_rest(&mut self, pos: Pos, is_decl: bool, is_method: bool) -> ParseResult<FunctionNode> {
        let name = match &self.tok.token {
            Token::Ident(name) if !is_method => {
                let name = name.clone();
                self.advance()?;
                Some(name)
            }
            _ if is_decl => return self.error("function name expected"),
            _ => None,
        };
        self.expect(Punct::LParen)?;
        let mut params = Vec::new();
        while !self.eat(Punct::RParen)? {
            let name = self.expect_ident()?;
            let default = if self.eat(Punct::Assign)? {
                Some(self.assignment(false)?)
            } else {
                None
            };
            params.push(Param { name, default });
            if !self.is(Punct::RParen) {
                self.expect(Punct::Comma)?;
            }
        }
        let body = self.function_body()?;
        Ok(FunctionNode {
            binds_own_name: !is_decl && name.is_some(),
            name,
            params,
            body,
            is_arrow: false,
            pos,
        })
    }

    fn function_body(&mut self) -> ParseResult<Vec<Stmt>> {
        self.func_depth += 1;
        let body = self.block();
        self.func_depth -= 1;
        body
    }

    pub(crate) fn expression(&mut self, no_in: bool) -> ParseResult<Expr> {
        let first = self.assignment(no_in)?;
        if !self.is(Punct::Comma) {
            return Ok(first);
        }
        let pos = first.pos;
        let mut list = vec![first];
        while self.eat(Punct::Comma)? {
            list.push(self.assignment(no_in)?);
        }
        Ok(Expr::new(ExprKind::Sequence(list), pos))
    }

    fn assignment(&mut self, no_in: bool) -> ParseResult<Expr> {
        self.enter()?;
        let expr = self.assignment_inner(no_in);
        self.leave();
        expr
    }

    fn assignment_inner(&mut self, no_in: bool) -> ParseResult<Expr> {
        if self.arrow_ahead()? {
            return self.arrow_function(no_in);
        }
        let target = self.conditional(no_in)?;
        let Some(op) = assign_op(&self.tok.token) else {
            return Ok(target);
        };
        if !target.is_assignable() {
            return self.error("invalid assignment left-hand side");
        }
        self.advance()?;
        let value = self.assignment(no_in)?;
        let pos = target.pos;
        Ok(Expr::new(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            pos,
        ))
    }

    /// Looks ahead for `ident =>` or `( ... ) =>`.
    fn arrow_ahead(&self) -> ParseResult<bool> {
        match &self.tok.token {
            Token::Ident(_) => {
                let next = self.peek()?;
                Ok(next.token.is_punct(Punct::Arrow) && !next.got_lf)
            }
            Token::Punct(Punct::LParen) => {
                let mut lexer = self.lexer.clone();
                let mut level = 1u32;
                while level > 0 {
                    let Ok(t) = lexer.next_token() else {
                        return Ok(false);
                    };
                    match t.token {
                        Token::Punct(Punct::LParen | Punct::LBracket | Punct::LBrace) => level += 1,
                        Token::Punct(Punct::RParen | Punct::RBracket | Punct::RBrace) => level -= 1,
                        Token::Eof => return Ok(false),
                        _ => {}
                    }
                }
                let next = lexer.next_token().ok();
                Ok(next.is_some_and(|t| t.token.is_punct(Punct::Arrow) && !t.got_lf))
            }
            _ => Ok(false),
        }
    }

    fn arrow_function(&mut self, no_in: bool) -> ParseResult<Expr> {
        let pos = self.tok.pos;
        let mut params = Vec::new();
        if self.eat(Punct::LParen)? {
            while !self.eat(Punct::RParen)? {
                let name = self.expect_ident()?;
                let default = if self.eat(Punct::Assign)? {
                    Some(self.assignment(false)?)
                } else {
                    None
                };
                params.push(Param { name, default });
                if !self.is(Punct::RParen) {
                    self.expect(Punct::Comma)?;
                }
            }
        } else {
            let name = self.expect_ident()?;
            params.push(Param { name, default: None });
        }
        self.expect(Punct::Arrow)?;
        let body = if self.is(Punct::LBrace) {
            self.function_body()?
        } else {
            let value = self.assignment(no_in)?;
            let value_pos = value.pos;
            vec![Stmt::new(StmtKind::Return(Some(value)), value_pos)]
        };
        let func = FunctionNode {
            name: None,
            params,
            body,
            is_arrow: true,
            binds_own_name: false,
            pos,
        };
        Ok(Expr::new(ExprKind::Function(Box::new(func)), pos))
    }

    fn conditional(&mut self, no_in: bool) -> ParseResult<Expr> {
        let cond = self.binary(0, no_in)?;
        if !self.eat(Punct::Question)? {
            return Ok(cond);
        }
        let then = self.assignment(false)?;
        self.expect(Punct::Colon)?;
        let otherwise = self.assignment(no_in)?;
        let pos = cond.pos;
        Ok(Expr::new(
            ExprKind::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)),
            pos,
        ))
    }

    /// Precedence climbing over binary and logical operators.
    fn binary(&mut self, min_prec: u8, no_in: bool) -> ParseResult<Expr> {
        let mut left = self.unary()?;
        loop {
            if let Some((prec, op)) = logical_precedence(&self.tok.token) {
                if prec < min_prec {
                    return Ok(left);
                }
                self.advance()?;
                let right = self.binary(prec + 1, no_in)?;
                let pos = left.pos;
                left = Expr::new(ExprKind::Logical(op, Box::new(left), Box::new(right)), pos);
                continue;
            }
            let Some((prec, op)) = binary_precedence(&self.tok.token, no_in) else {
                return Ok(left);
            };
            if prec < min_prec {
                return Ok(left);
            }
            self.advance()?;
            // `**` is right associative.
            let next_min = if op == BinOp::Pow { prec } else { prec + 1 };
            let right = self.binary(next_min, no_in)?;
            let pos = left.pos;
            left = Expr::new(ExprKind::Binary(op, Box::new(left), Box::new(right)), pos);
        }
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let expr = self.unary_inner();
        self.leave();
        expr
    }

    fn unary_inner(&mut self) -> ParseResult<Expr> {
        let pos = self.tok.pos;
        let op = match &self.tok.token {
            Token::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            Token::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            Token::Punct(Punct::Bang) => Some(UnaryOp::Not),
            Token::Punct(Punct::Tilde) => Some(UnaryOp::BitNot),
            Token::Keyword(Keyword::Typeof) => Some(UnaryOp::Typeof),
            Token::Keyword(Keyword::Void) => Some(UnaryOp::Void),
            Token::Keyword(Keyword::Delete) => Some(UnaryOp::Delete),
            Token::Punct(p @ (Punct::Inc | Punct::Dec)) => {
                let increment = *p == Punct::Inc;
                self.advance()?;
                let target = self.unary()?;
                if !target.is_assignable() {
                    return Err(ParseError::new("invalid increment/decrement operand", pos));
                }
                return Ok(Expr::new(
                    ExprKind::Update {
                        increment,
                        prefix: true,
                        target: Box::new(target),
                    },
                    pos,
                ));
            }
            _ => None,
        };
        if let Some(op) = op {
            self.advance()?;
            let operand = self.unary()?;
            return Ok(Expr::new(ExprKind::Unary(op, Box::new(operand)), pos));
        }
        let expr = self.call_member()?;
        if !self.tok.got_lf {
            if let Token::Punct(p @ (Punct::Inc | Punct::Dec)) = self.tok.token {
                if !expr.is_assignable() {
                    return self.error("invalid increment/decrement operand");
                }
                self.advance()?;
                return Ok(Expr::new(
                    ExprKind::Update {
                        increment: p == Punct::Inc,
                        prefix: false,
                        target: Box::new(expr),
                    },
                    pos,
                ));
            }
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect(Punct::LParen)?;
        let mut args = Vec::new();
        while !self.eat(Punct::RParen)? {
            args.push(self.assignment(false)?);
            if !self.is(Punct::RParen) {
                self.expect(Punct::Comma)?;
            }
        }
        Ok(args)
    }

    fn member_name(&mut self) -> ParseResult<Vec<u8>> {
        match self.tok.token.property_name() {
            Some(name) => {
                self.advance()?;
                Ok(name.into_bytes())
            }
            None => self.error("expecting field name"),
        }
    }

    fn call_member(&mut self) -> ParseResult<Expr> {
        let mut expr = if self.is_kw(Keyword::New) {
            self.new_expression()?
        } else {
            self.primary()?
        };
        loop {
            let pos = expr.pos;
            expr = match &self.tok.token {
                Token::Punct(Punct::Dot) => {
                    self.advance()?;
                    let name = self.member_name()?;
                    Expr::new(ExprKind::Member(Box::new(expr), name), pos)
                }
                Token::Punct(Punct::LBracket) => {
                    self.advance()?;
                    let index = self.expression(false)?;
                    self.expect(Punct::RBracket)?;
                    Expr::new(ExprKind::Index(Box::new(expr), Box::new(index)), pos)
                }
                Token::Punct(Punct::LParen) => {
                    let args = self.arguments()?;
                    Expr::new(ExprKind::Call(Box::new(expr), args), pos)
                }
                _ => return Ok(expr),
            };
        }
    }

    fn new_expression(&mut self) -> ParseResult<Expr> {
        let pos = self.tok.pos;
        self.advance()?;
        self.enter()?;
        let callee = if self.is_kw(Keyword::New) {
            self.new_expression()
        } else {
            self.primary()
        };
        self.leave();
        let mut callee = callee?;
        // Member accesses bind to the constructor, not to the result.
        loop {
            let cpos = callee.pos;
            callee = match &self.tok.token {
                Token::Punct(Punct::Dot) => {
                    self.advance()?;
                    let name = self.member_name()?;
                    Expr::new(ExprKind::Member(Box::new(callee), name), cpos)
                }
                Token::Punct(Punct::LBracket) => {
                    self.advance()?;
                    let index = self.expression(false)?;
                    self.expect(Punct::RBracket)?;
                    Expr::new(ExprKind::Index(Box::new(callee), Box::new(index)), cpos)
                }
                _ => break,
            };
        }
        let args = if self.is(Punct::LParen) {
            self.arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::new(ExprKind::New(Box::new(callee), args), pos))
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let pos = self.tok.pos;
        let kind = match &self.tok.token {
            Token::Number(n) => {
                let n = *n;
                self.advance()?;
                ExprKind::Number(n)
            }
            Token::Str(s) => {
                let s = s.clone();
                self.advance()?;
                ExprKind::Str(s)
            }
            Token::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                ExprKind::Ident(name)
            }
            Token::Keyword(Keyword::This) => {
                self.advance()?;
                ExprKind::This
            }
            Token::Keyword(Keyword::Null) => {
                self.advance()?;
                ExprKind::Null
            }
            Token::Keyword(Keyword::True) | Token::Keyword(Keyword::False) => {
                let val = self.is_kw(Keyword::True);
                self.advance()?;
                ExprKind::Bool(val)
            }
            Token::Keyword(Keyword::Function) => {
                self.advance()?;
                ExprKind::Function(Box::new(self.function_rest(pos, false, false)?))
            }
            Token::Punct(Punct::LParen) => {
                self.advance()?;
                let mut inner = self.expression(false)?;
                self.expect(Punct::RParen)?;
                inner.pos = pos;
                return Ok(inner);
            }
            Token::Punct(Punct::LBracket) => self.array_literal()?,
            Token::Punct(Punct::LBrace) => self.object_literal()?,
            _ => return self.unexpected(),
        };
        Ok(Expr::new(kind, pos))
    }

    fn array_literal(&mut self) -> ParseResult<ExprKind> {
        self.advance()?;
        let mut elems = Vec::new();
        while !self.eat(Punct::RBracket)? {
            if self.eat(Punct::Comma)? {
                elems.push(None);
                continue;
            }
            elems.push(Some(self.assignment(false)?));
            if !self.is(Punct::RBracket) {
                self.expect(Punct::Comma)?;
            }
        }
        Ok(ExprKind::Array(elems))
    }

    fn property_key(&mut self) -> ParseResult<PropName> {
        let name = match &self.tok.token {
            Token::Str(s) => s.clone(),
            Token::Number(n) => js_number_to_string(*n).into_bytes(),
            Token::Punct(Punct::LBracket) => {
                self.advance()?;
                let key = self.assignment(false)?;
                self.expect(Punct::RBracket)?;
                return Ok(PropName::Computed(Box::new(key)));
            }
            tok => match tok.property_name() {
                Some(name) => name.into_bytes(),
                None => return self.error("invalid property name"),
            },
        };
        self.advance()?;
        Ok(PropName::Static(name))
    }

    fn object_literal(&mut self) -> ParseResult<ExprKind> {
        self.advance()?;
        let mut props = Vec::new();
        while !self.eat(Punct::RBrace)? {
            let pos = self.tok.pos;
            let accessor = match &self.tok.token {
                Token::Ident(name) if name == "get" || name == "set" => {
                    let next = self.peek()?.token;
                    let plain = next.is_punct(Punct::Colon)
                        || next.is_punct(Punct::LParen)
                        || next.is_punct(Punct::Comma)
                        || next.is_punct(Punct::RBrace);
                    (!plain).then(|| name == "get")
                }
                _ => None,
            };
            if let Some(is_getter) = accessor {
                self.advance()?;
                let name = self.property_key()?;
                let func = Box::new(self.function_rest(pos, false, true)?);
                let value = if is_getter {
                    PropValue::Getter(func)
                } else {
                    PropValue::Setter(func)
                };
                props.push(PropDef { name, value });
            } else {
                let is_ident = matches!(self.tok.token, Token::Ident(_));
                let name = self.property_key()?;
                let value = if self.eat(Punct::Colon)? {
                    self.assignment(false)?
                } else if self.is(Punct::LParen) {
                    let mut func = self.function_rest(pos, false, true)?;
                    if let PropName::Static(n) = &name {
                        func.name = Some(String::from_utf8_lossy(n).into_owned());
                    }
                    Expr::new(ExprKind::Function(Box::new(func)), pos)
                } else if is_ident {
                    let PropName::Static(n) = &name else {
                        return self.unexpected();
                    };
                    Expr::new(ExprKind::Ident(String::from_utf8_lossy(n).into_owned()), pos)
                } else {
                    return self.error("expecting ':'");
                };
                props.push(PropDef {
                    name,
                    value: PropValue::Init(value),
                });
            }
            if !self.is(Punct::RBrace) {
                self.expect(Punct::Comma)?;
            }
        }
        Ok(ExprKind::Object(props))
    }
}

/// Parses `src` as a script.
pub fn parse_script(src: &[u8]) -> ParseResult<Vec<Stmt>> {
    Parser::new(src)?.parse_program()
}
