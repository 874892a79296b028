//! The recursive-descent parser: tokens to a typed AST.
//!
//! Types are assigned while parsing: every node leaves here with a computed
//! type, name references are resolved against the scope tree, pointer
//! arithmetic is scaled by the pointee size, and call arguments and
//! assignments are checked with the `fits` relation.

use if_chain::if_chain;
use smallvec::SmallVec;

use crate::symbol::{ScopeId, Scopes, Sym, SymKind};
use crate::token::{Token, TokenKind};
use crate::types::ast::{Binop, ExprArena, ExprId, ExprKind, Func, Stmt, Unit};
use crate::types::Ty;
use crate::Error;

/// The parser state: a cursor over the token slice plus the unit being
/// built.
pub struct Parser<'a> {
  file: &'a str,
  tokens: &'a [Token],
  pos: usize,
  scopes: Scopes,
  exprs: ExprArena,
  funcs: Vec<Func>,
  string_count: u32,
}

impl<'a> Parser<'a> {
  /// Create a parser over `tokens`, which must end with an `Eof` token.
  pub fn new(file: &'a str, tokens: &'a [Token]) -> Self {
    let mut scopes = Scopes::default();
    scopes.alloc(None);
    Parser {
      file,
      tokens,
      pos: 0,
      scopes,
      exprs: ExprArena::default(),
      funcs: Vec::new(),
      string_count: 0,
    }
  }

  /// Parse the whole unit.
  ///
  /// ```text
  /// lib := (ext_func | decl_stmt | func)*
  /// ```
  pub fn parse(mut self) -> Result<Unit, Error> {
    while self.peek().kind != TokenKind::Eof {
      match self.peek().kind {
        TokenKind::Extern => self.ext_func()?,
        TokenKind::Var => {
          self.decl_stmt(ScopeId::ROOT)?;
        }
        TokenKind::Fn => {
          let f = self.func()?;
          self.funcs.push(f);
        }
        _ => {
          let t = self.next();
          return Err(self.invalid_token(&t));
        }
      }
    }
    Ok(Unit { scopes: self.scopes, exprs: self.exprs, funcs: self.funcs })
  }

  /*
   * Cursor
   */
  fn peek(&self) -> &Token { &self.tokens[self.pos] }

  fn lookahead(&self, n: usize) -> &Token { &self.tokens[self.pos + n] }

  fn prev(&self) -> &Token { &self.tokens[self.pos - 1] }

  fn next(&mut self) -> Token {
    let t = self.tokens[self.pos].clone();
    self.pos += 1;
    t
  }

  fn accept(&mut self, kind: &TokenKind) -> bool {
    if self.peek().kind == *kind {
      self.pos += 1;
      true
    } else {
      false
    }
  }

  fn expect(&mut self, kind: TokenKind) -> Result<Token, Error> {
    let t = self.next();
    if t.kind == kind {
      Ok(t)
    } else {
      Err(self.expected(&t, &kind))
    }
  }

  fn expect_name(&mut self) -> Result<String, Error> {
    let t = self.next();
    match t.kind {
      TokenKind::Name(s) => Ok(s),
      _ => Err(self.expected(&t, &"NAME")),
    }
  }

  /*
   * Diagnostics
   */
  fn err_pos(&self, line: u32, col: u32, msg: String) -> Error {
    Error::Parse { file: self.file.to_owned(), line, col, msg }
  }

  fn err_at(&self, t: &Token, msg: String) -> Error {
    self.err_pos(t.line, t.col, msg)
  }

  fn expected(&self, t: &Token, what: &dyn std::fmt::Display) -> Error {
    self.err_at(t, format!("expected '{what}', got '{}'.", t.kind))
  }

  fn invalid_token(&self, t: &Token) -> Error {
    self.err_at(t, format!("invalid token '{}'.", t.kind))
  }

  fn type_error(&self, t: &Token, from: Ty, to: Ty) -> Error {
    self.err_at(t, format!("can't convert {from} to {to}."))
  }

  /*
   * Expressions
   */
  /// Build a binary node over `l` and `r` and wire the parent links.
  fn binop(&mut self, op: Binop, l: ExprId, r: ExprId, ty: Ty) -> ExprId {
    let id = self.exprs.push(ExprKind::Binop(op, l, r), ty);
    self.exprs.set_parent(l, id);
    self.exprs.set_parent(r, id);
    id
  }

  /// Wrap `e` in a multiplication by the constant `factor`, used to scale
  /// pointer arithmetic by the pointee size.
  fn scale(&mut self, e: ExprId, factor: i64) -> ExprId {
    let n = self.exprs.push(ExprKind::Number(factor), Ty::from_int(factor));
    let ty = self.exprs[e].ty;
    self.binop(Binop::Mul, e, n, ty)
  }

  /// ```text
  /// type := TYPE '*'*
  /// ```
  fn parse_type(&mut self) -> Result<Ty, Error> {
    let t = self.next();
    match t.kind {
      TokenKind::Type(mut ty) => {
        while self.accept(&TokenKind::Star) {
          ty = ty.to_ptr();
        }
        Ok(ty)
      }
      _ => Err(self.expected(&t, &"TYPE")),
    }
  }

  /// ```text
  /// primary_expr := NAME | NUMBER | STRING | '(' expr ')'
  /// ```
  fn primary_expr(&mut self, scope: ScopeId) -> Result<ExprId, Error> {
    let t = self.next();
    match t.kind {
      TokenKind::Name(name) => {
        let Some(sym) = self.scopes.get(scope, &name) else {
          return Err(self.err_pos(t.line, t.col, format!("couldn't find variable '{name}'.")));
        };
        let ty = sym.ty;
        Ok(self.exprs.push(ExprKind::Name(name), ty))
      }
      TokenKind::Number(n) => Ok(self.exprs.push(ExprKind::Number(n), Ty::from_int(n))),
      TokenKind::Str(s) => {
        let index = self.string_count;
        self.string_count += 1;
        let root = self.scopes.root(scope);
        let ty = Ty::S8.to_ptr();
        let mut sym = Sym::new(SymKind::Str, s, ty);
        sym.offset = index as i32;
        self.scopes.put(root, sym);
        Ok(self.exprs.push(ExprKind::Str(index), ty))
      }
      TokenKind::LParen => {
        let e = self.expr(scope)?;
        self.expect(TokenKind::RParen)?;
        Ok(e)
      }
      _ => Err(self.invalid_token(&t)),
    }
  }

  /// ```text
  /// postfix_expr := primary_expr
  ///               | postfix_expr '(' assign_expr? (',' assign_expr)* ')'
  ///               | postfix_expr '[' expr ']'
  /// ```
  fn postfix_expr(&mut self, scope: ScopeId) -> Result<ExprId, Error> {
    let e = self.primary_expr(scope)?;
    if self.accept(&TokenKind::LParen) {
      let ExprKind::Name(name) = &self.exprs[e].kind else {
        let t = self.prev().clone();
        return Err(self.expected(&t, &"NAME"));
      };
      let name = name.clone();
      // The callee resolved in primary_expr, so the symbol exists. A call
      // through a non-function symbol sees an empty parameter list.
      let sym = self.scopes.get(scope, &name).expect("callee resolved");
      let ret = sym.ty;
      let params: SmallVec<[Ty; 6]> = sym.params.clone();
      let mut args = Vec::with_capacity(params.len());
      for (i, &param) in params.iter().enumerate() {
        let arg = self.assign_expr(scope)?;
        let arg_ty = self.exprs[arg].ty;
        if !arg_ty.fits(param) {
          let t = self.prev().clone();
          return Err(self.type_error(&t, arg_ty, param));
        }
        args.push(arg);
        if i != params.len() - 1 {
          self.expect(TokenKind::Comma)?;
        }
      }
      self.expect(TokenKind::RParen)?;
      let id = self.exprs.push(ExprKind::Call { callee: e, args: args.clone() }, ret);
      self.exprs.set_parent(e, id);
      for &a in &args {
        self.exprs.set_parent(a, id);
      }
      Ok(id)
    } else if self.accept(&TokenKind::LBracket) {
      if !matches!(self.exprs[e].kind, ExprKind::Name(_)) {
        let t = self.prev().clone();
        return Err(self.expected(&t, &"NAME"));
      }
      let base_ty = self.exprs[e].ty;
      let t = self.prev().clone();
      let Some(elem_ty) = base_ty.pointee() else {
        return Err(self.err_at(&t, "can't dereference non-pointer.".into()));
      };
      let index = self.expr(scope)?;
      let scaled = self.scale(index, i64::from(elem_ty.size()));
      let sum = self.binop(Binop::Add, e, scaled, base_ty);
      let id = self.exprs.push(ExprKind::Deref(sum), elem_ty);
      self.exprs.set_parent(sum, id);
      self.expect(TokenKind::RBracket)?;
      Ok(id)
    } else {
      Ok(e)
    }
  }

  /// ```text
  /// unary_expr := postfix_expr | '*' cast_expr | 'sizeof' type
  /// ```
  fn unary_expr(&mut self, scope: ScopeId) -> Result<ExprId, Error> {
    match self.peek().kind {
      TokenKind::Star => {
        let t = self.next();
        let operand = self.cast_expr(scope)?;
        let Some(ty) = self.exprs[operand].ty.pointee() else {
          return Err(self.err_at(&t, "can't dereference non-pointer.".into()));
        };
        let id = self.exprs.push(ExprKind::Deref(operand), ty);
        self.exprs.set_parent(operand, id);
        Ok(id)
      }
      TokenKind::Sizeof => {
        self.next();
        let n = i64::from(self.parse_type()?.size());
        Ok(self.exprs.push(ExprKind::Number(n), Ty::from_int(n)))
      }
      _ => self.postfix_expr(scope),
    }
  }

  /// ```text
  /// cast_expr := unary_expr | '(' type ')' cast_expr
  /// ```
  fn cast_expr(&mut self, scope: ScopeId) -> Result<ExprId, Error> {
    if_chain! {
      if self.peek().kind == TokenKind::LParen;
      if let TokenKind::Type(_) = self.lookahead(1).kind;
      then {
        self.next();
        let ty = self.parse_type()?;
        self.expect(TokenKind::RParen)?;
        let operand = self.cast_expr(scope)?;
        let id = self.exprs.push(ExprKind::Cast(operand), ty);
        self.exprs.set_parent(operand, id);
        Ok(id)
      } else {
        self.unary_expr(scope)
      }
    }
  }

  /// ```text
  /// mul_expr := cast_expr (('*' | '/') cast_expr)*
  /// ```
  fn mul_expr(&mut self, scope: ScopeId) -> Result<ExprId, Error> {
    let mut e = self.cast_expr(scope)?;
    loop {
      let op = match self.peek().kind {
        TokenKind::Star => Binop::Mul,
        TokenKind::Slash => Binop::Div,
        _ => return Ok(e),
      };
      self.next();
      let right = self.cast_expr(scope)?;
      let ty = self.exprs[e].ty.bigger(self.exprs[right].ty);
      e = self.binop(op, e, right, ty);
    }
  }

  /// ```text
  /// add_expr := mul_expr (('+' | '-') mul_expr)*
  /// ```
  ///
  /// When exactly one operand is a pointer, the other is scaled by the
  /// pointee size and the result takes the pointer type.
  fn add_expr(&mut self, scope: ScopeId) -> Result<ExprId, Error> {
    let mut e = self.mul_expr(scope)?;
    loop {
      let op = match self.peek().kind {
        TokenKind::Plus => Binop::Add,
        TokenKind::Minus => Binop::Sub,
        _ => return Ok(e),
      };
      let t = self.next();
      let mut left = e;
      let mut right = self.mul_expr(scope)?;
      let (lt, rt) = (self.exprs[left].ty, self.exprs[right].ty);
      let ty = match (lt.pointee(), rt.pointee()) {
        (Some(_), Some(_)) => return Err(self.err_at(&t, "can't add two pointers.".into())),
        (Some(p), None) => {
          right = self.scale(right, i64::from(p.size()));
          lt
        }
        (None, Some(p)) => {
          left = self.scale(left, i64::from(p.size()));
          rt
        }
        (None, None) => lt.bigger(rt),
      };
      e = self.binop(op, left, right, ty);
    }
  }

  /// ```text
  /// shift_expr := add_expr (('<<' | '>>') add_expr)*
  /// ```
  fn shift_expr(&mut self, scope: ScopeId) -> Result<ExprId, Error> {
    let mut e = self.add_expr(scope)?;
    loop {
      let op = match self.peek().kind {
        TokenKind::Shl => Binop::Shl,
        TokenKind::Shr => Binop::Shr,
        _ => return Ok(e),
      };
      self.next();
      let right = self.add_expr(scope)?;
      let ty = self.exprs[e].ty;
      e = self.binop(op, e, right, ty);
    }
  }

  /// ```text
  /// rel_expr := shift_expr (('<' | '>' | '<=' | '>=') shift_expr)*
  /// ```
  fn rel_expr(&mut self, scope: ScopeId) -> Result<ExprId, Error> {
    let mut e = self.shift_expr(scope)?;
    loop {
      let op = match self.peek().kind {
        TokenKind::Lt => Binop::Lt,
        TokenKind::Gt => Binop::Gt,
        TokenKind::Le => Binop::Le,
        TokenKind::Ge => Binop::Ge,
        _ => return Ok(e),
      };
      self.next();
      let right = self.shift_expr(scope)?;
      e = self.binop(op, e, right, Ty::S8);
    }
  }

  /// ```text
  /// eq_expr := rel_expr (('==' | '!=') rel_expr)*
  /// ```
  fn eq_expr(&mut self, scope: ScopeId) -> Result<ExprId, Error> {
    let mut e = self.rel_expr(scope)?;
    loop {
      let op = match self.peek().kind {
        TokenKind::EqEq => Binop::Eq,
        TokenKind::Ne => Binop::Ne,
        _ => return Ok(e),
      };
      self.next();
      let right = self.rel_expr(scope)?;
      e = self.binop(op, e, right, Ty::S8);
    }
  }

  /// ```text
  /// and_expr := eq_expr ('&' eq_expr)*
  /// ```
  fn and_expr(&mut self, scope: ScopeId) -> Result<ExprId, Error> {
    let mut e = self.eq_expr(scope)?;
    while self.accept(&TokenKind::Amp) {
      let right = self.eq_expr(scope)?;
      let ty = self.exprs[e].ty;
      e = self.binop(Binop::And, e, right, ty);
    }
    Ok(e)
  }

  /// ```text
  /// or_expr := and_expr ('|' and_expr)*
  /// ```
  fn or_expr(&mut self, scope: ScopeId) -> Result<ExprId, Error> {
    let mut e = self.and_expr(scope)?;
    while self.accept(&TokenKind::Pipe) {
      let right = self.and_expr(scope)?;
      let ty = self.exprs[e].ty;
      e = self.binop(Binop::Or, e, right, ty);
    }
    Ok(e)
  }

  /// ```text
  /// assign_expr := or_expr | unary_expr '=' assign_expr
  /// ```
  ///
  /// Assignment is only offered when the parsed left side is a name or a
  /// dereference; the right side must fit the left side's type.
  fn assign_expr(&mut self, scope: ScopeId) -> Result<ExprId, Error> {
    let e = self.or_expr(scope)?;
    if_chain! {
      if matches!(self.exprs[e].kind, ExprKind::Name(_) | ExprKind::Deref(_));
      if self.peek().kind == TokenKind::Assign;
      then {
        let t = self.next();
        let rhs = self.assign_expr(scope)?;
        let (lt, rt) = (self.exprs[e].ty, self.exprs[rhs].ty);
        if !rt.fits(lt) {
          return Err(self.type_error(&t, lt, rt));
        }
        let id = self.exprs.push(ExprKind::Assign(e, rhs), lt);
        self.exprs.set_parent(e, id);
        self.exprs.set_parent(rhs, id);
        Ok(id)
      } else {
        Ok(e)
      }
    }
  }

  /// ```text
  /// expr := assign_expr
  /// ```
  fn expr(&mut self, scope: ScopeId) -> Result<ExprId, Error> {
    self.assign_expr(scope)
  }

  /*
   * Statements
   */
  /// ```text
  /// compound_stmt := '{' stmt* '}'
  /// ```
  fn compound_stmt(&mut self, parent: ScopeId) -> Result<Stmt, Error> {
    self.expect(TokenKind::LBrace)?;
    let scope = self.scopes.alloc(Some(parent));
    let mut stmts = Vec::new();
    while self.peek().kind != TokenKind::RBrace {
      stmts.push(self.stmt(scope)?);
    }
    self.expect(TokenKind::RBrace)?;
    Ok(Stmt::Compound { scope, stmts })
  }

  /// ```text
  /// sel_stmt := 'if' expr stmt ('else' stmt)?
  /// ```
  fn sel_stmt(&mut self, scope: ScopeId) -> Result<Stmt, Error> {
    self.next();
    let cond = self.expr(scope)?;
    let then = Box::new(self.stmt(scope)?);
    let els = if self.accept(&TokenKind::Else) {
      Some(Box::new(self.stmt(scope)?))
    } else {
      None
    };
    Ok(Stmt::If { cond, then, els })
  }

  /// ```text
  /// iter_stmt := 'while' expr stmt
  /// ```
  fn iter_stmt(&mut self, scope: ScopeId) -> Result<Stmt, Error> {
    self.next();
    let cond = self.expr(scope)?;
    let body = Box::new(self.stmt(scope)?);
    Ok(Stmt::While { cond, body })
  }

  /// ```text
  /// jump_stmt := 'return' expr? ';'
  /// ```
  fn jump_stmt(&mut self, scope: ScopeId) -> Result<Stmt, Error> {
    self.next();
    if self.accept(&TokenKind::Semi) {
      Ok(Stmt::Return(None))
    } else {
      let e = self.expr(scope)?;
      self.expect(TokenKind::Semi)?;
      Ok(Stmt::Return(Some(e)))
    }
  }

  /// ```text
  /// decl_stmt := 'var' NAME ':' type ('=' assign_expr)? ';'
  /// ```
  ///
  /// At the root scope this declares a global with offset 0 and produces no
  /// statement; the initializer branch only exists for locals, so a global
  /// initializer fails at the unexpected `=`. A local takes the next free
  /// (negative, aligned) frame offset; its initializer becomes a synthesized
  /// assignment statement. The symbol is inserted only after the
  /// initializer is parsed, so `var x: u32 = x;` does not resolve.
  fn decl_stmt(&mut self, scope: ScopeId) -> Result<Stmt, Error> {
    let is_root = self.scopes.root(scope) == scope;
    self.expect(TokenKind::Var)?;
    let name = self.expect_name()?;
    self.expect(TokenKind::Colon)?;
    let ty = self.parse_type()?;
    let kind = if is_root { SymKind::Global } else { SymKind::Local };
    let offset = if is_root { 0 } else { self.scopes.last_offset(scope) - ty.align() as i32 };

    let stmt = if kind == SymKind::Local && self.accept(&TokenKind::Assign) {
      let lhs = self.exprs.push(ExprKind::Name(name.clone()), ty);
      let rhs = self.assign_expr(scope)?;
      let id = self.exprs.push(ExprKind::Assign(lhs, rhs), ty);
      self.exprs.set_parent(lhs, id);
      self.exprs.set_parent(rhs, id);
      Stmt::Expr(id)
    } else {
      Stmt::Noop
    };
    self.expect(TokenKind::Semi)?;

    let mut sym = Sym::new(kind, name, ty);
    sym.offset = offset;
    self.scopes.put(scope, sym);
    Ok(stmt)
  }

  /// ```text
  /// expr_stmt := ';' | expr ';'
  /// ```
  fn expr_stmt(&mut self, scope: ScopeId) -> Result<Stmt, Error> {
    if self.accept(&TokenKind::Semi) {
      Ok(Stmt::Noop)
    } else {
      let e = self.expr(scope)?;
      self.expect(TokenKind::Semi)?;
      Ok(Stmt::Expr(e))
    }
  }

  /// ```text
  /// stmt := compound_stmt | sel_stmt | iter_stmt | jump_stmt | decl_stmt
  ///       | expr_stmt
  /// ```
  fn stmt(&mut self, scope: ScopeId) -> Result<Stmt, Error> {
    match self.peek().kind {
      TokenKind::LBrace => self.compound_stmt(scope),
      TokenKind::If => self.sel_stmt(scope),
      TokenKind::While => self.iter_stmt(scope),
      TokenKind::Return => self.jump_stmt(scope),
      TokenKind::Var => self.decl_stmt(scope),
      _ => self.expr_stmt(scope),
    }
  }

  /*
   * Top level
   */
  /// ```text
  /// ext_func := 'extern' 'fn' NAME '(' (type (',' type)*)? ')' (':' type)? ';'
  /// ```
  fn ext_func(&mut self) -> Result<(), Error> {
    self.expect(TokenKind::Extern)?;
    self.expect(TokenKind::Fn)?;
    let name = self.expect_name()?;
    self.expect(TokenKind::LParen)?;
    let mut params = SmallVec::new();
    while self.peek().kind != TokenKind::RParen {
      params.push(self.parse_type()?);
      self.accept(&TokenKind::Comma);
    }
    self.expect(TokenKind::RParen)?;
    let ret = if self.accept(&TokenKind::Colon) { self.parse_type()? } else { Ty::U0 };
    self.expect(TokenKind::Semi)?;
    let mut sym = Sym::new(SymKind::Func, name, ret);
    sym.params = params;
    self.scopes.put(ScopeId::ROOT, sym);
    Ok(())
  }

  /// ```text
  /// func := 'fn' NAME '(' (NAME ':' type (',' NAME ':' type)*)? ')'
  ///         (':' type)? stmt
  /// ```
  ///
  /// The function symbol is declared before the body is parsed, so
  /// recursive calls resolve.
  fn func(&mut self) -> Result<Func, Error> {
    self.expect(TokenKind::Fn)?;
    let name = self.expect_name()?;
    let scope = self.scopes.alloc(Some(ScopeId::ROOT));
    self.expect(TokenKind::LParen)?;
    let mut params = SmallVec::new();
    while self.peek().kind != TokenKind::RParen {
      let pname = self.expect_name()?;
      self.expect(TokenKind::Colon)?;
      let ty = self.parse_type()?;
      let mut sym = Sym::new(SymKind::Local, pname, ty);
      sym.offset = self.scopes.last_offset(scope) - ty.align() as i32;
      self.scopes.put(scope, sym);
      params.push(ty);
      self.accept(&TokenKind::Comma);
    }
    self.expect(TokenKind::RParen)?;
    let ret = if self.accept(&TokenKind::Colon) { self.parse_type()? } else { Ty::U0 };
    let mut sym = Sym::new(SymKind::Func, name.clone(), ret);
    sym.params = params;
    self.scopes.put(ScopeId::ROOT, sym);
    let body = self.stmt(scope)?;
    Ok(Func { name, ret, scope, body })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lexer::Lexer;

  fn parse(src: &str) -> Unit {
    let mut out = Vec::new();
    let tokens = Lexer::new("test", src.as_bytes(), &mut out).lex().unwrap();
    Parser::new("test", &tokens).parse().unwrap()
  }

  fn parse_err(src: &str) -> Error {
    let mut out = Vec::new();
    let tokens = Lexer::new("test", src.as_bytes(), &mut out).lex().unwrap();
    Parser::new("test", &tokens).parse().unwrap_err()
  }

  /// The expression of the `index`th statement in the first function body.
  fn body_expr(unit: &Unit, index: usize) -> ExprId {
    let Stmt::Compound { stmts, .. } = &unit.funcs[0].body else { panic!("not a compound body") };
    match &stmts[index] {
      Stmt::Expr(e) => *e,
      Stmt::Return(Some(e)) => *e,
      s => panic!("statement has no expression: {s:?}"),
    }
  }

  fn number(unit: &Unit, id: ExprId) -> i64 {
    let ExprKind::Number(n) = unit.exprs[id].kind else { panic!("expected a number") };
    n
  }

  #[test]
  fn indexing_scales_by_element_size() {
    let unit = parse("fn idx(p: u32*, i: u32): u32 { return p[i]; }");
    let e = body_expr(&unit, 0);
    let ExprKind::Deref(sum) = unit.exprs[e].kind else { panic!("expected deref") };
    assert_eq!(unit.exprs[e].ty, Ty::U32);
    let ExprKind::Binop(Binop::Add, base, scaled) = unit.exprs[sum].kind else { panic!("expected add") };
    assert_eq!(unit.exprs[base].ty, Ty::U32.to_ptr());
    let ExprKind::Binop(Binop::Mul, _, factor) = unit.exprs[scaled].kind else { panic!("expected mul") };
    assert_eq!(number(&unit, factor), 4);
  }

  #[test]
  fn pointer_add_scales_and_keeps_pointer_type() {
    let unit = parse("fn f(p: u64*): u64* { return p + 3; }");
    let e = body_expr(&unit, 0);
    let ExprKind::Binop(Binop::Add, _, right) = unit.exprs[e].kind else { panic!("expected add") };
    assert_eq!(unit.exprs[e].ty, Ty::U64.to_ptr());
    let ExprKind::Binop(Binop::Mul, _, factor) = unit.exprs[right].kind else { panic!("expected mul") };
    assert_eq!(number(&unit, factor), 8);
  }

  #[test]
  fn adding_two_pointers_is_rejected() {
    let err = parse_err("fn f(p: u8*, q: u8*): u8* { return p + q; }");
    assert!(err.to_string().contains("can't add two pointers."));
  }

  #[test]
  fn comparisons_are_signed_bytes() {
    let unit = parse("fn f(a: s32, b: s32): s8 { return a < b; }");
    let e = body_expr(&unit, 0);
    assert_eq!(unit.exprs[e].ty, Ty::S8);
  }

  #[test]
  fn sizeof_is_a_classified_number() {
    let unit = parse("fn f(): s8 { return sizeof u64*; }");
    let e = body_expr(&unit, 0);
    let ExprKind::Number(8) = unit.exprs[e].kind else { panic!("expected 8") };
    assert_eq!(unit.exprs[e].ty, Ty::S8);
  }

  #[test]
  fn undefined_name_is_an_error() {
    let err = parse_err("fn f(): u0 { x = 1; }");
    assert_eq!(err.to_string(), "test:1:14: error: couldn't find variable 'x'.");
  }

  #[test]
  fn call_argument_types_are_checked() {
    let err = parse_err("extern fn put(u8); fn f(x: u64): u0 { put(x); }");
    assert!(err.to_string().contains("can't convert u64 to u8."));
  }

  #[test]
  fn call_arity_must_match() {
    let err = parse_err("extern fn two(s8, s8); fn f(): u0 { two(1); }");
    assert!(err.to_string().contains("expected ','"));
    let err = parse_err("extern fn one(s8); fn f(): u0 { one(1, 2); }");
    assert!(err.to_string().contains("expected ')'"));
  }

  #[test]
  fn assignment_type_is_checked() {
    let err = parse_err("fn f(a: u8, b: u64): u0 { a = b; }");
    assert!(err.to_string().contains("can't convert u8 to u64."));
  }

  #[test]
  fn global_initializers_are_rejected() {
    let err = parse_err("var g: u32 = 1;");
    assert!(err.to_string().contains("expected ';'"));
  }

  #[test]
  fn local_offsets_descend_with_alignment() {
    let unit = parse("fn f(a: u32, b: u8): u0 { var c: u64; var d: u8; }");
    let scope = unit.funcs[0].scope;
    let syms = &unit.scopes[scope].syms;
    assert_eq!(syms[0].offset, -4);
    assert_eq!(syms[1].offset, -8);
    // Locals live in the block's child scope but extend the same frame.
    let Stmt::Compound { scope: block, .. } = &unit.funcs[0].body else { panic!() };
    let locals = &unit.scopes[*block].syms;
    assert_eq!(locals[0].offset, -16);
    assert_eq!(locals[1].offset, -20);
  }

  #[test]
  fn string_literals_become_root_symbols() {
    let unit = parse(r#"extern fn put(s8*); fn f(): u0 { put("hi"); put("yo"); }"#);
    let root: Vec<_> = unit.scopes[ScopeId::ROOT]
      .syms
      .iter()
      .filter(|s| s.kind == SymKind::Str)
      .collect();
    assert_eq!(root.len(), 2);
    assert_eq!((root[0].offset, root[0].name.as_str()), (0, "hi"));
    assert_eq!((root[1].offset, root[1].name.as_str()), (1, "yo"));
    assert_eq!(root[0].ty, Ty::S8.to_ptr());
  }

  #[test]
  fn every_node_has_consistent_parents() {
    let unit = parse(
      "var g: u64;
       fn f(p: u8**, n: u64): u0 {
         var x: u64 = n + 1;
         if x < g { **p = (u8) x; } else { g = x * 2; }
         while x { x = x - 1; }
       }",
    );
    for id in (0..unit.exprs.len()).map(|i| ExprId(i as u32)) {
      if let Some(parent) = unit.exprs[id].parent {
        let found = match &unit.exprs[parent].kind {
          ExprKind::Call { callee, args } => *callee == id || args.contains(&id),
          ExprKind::Cast(e) | ExprKind::Deref(e) => *e == id,
          ExprKind::Binop(_, l, r) | ExprKind::Assign(l, r) => *l == id || *r == id,
          _ => false,
        };
        assert!(found, "parent of {id:?} does not contain it");
      }
    }
  }
}
