//! The typed abstract syntax tree.
//!
//! Expressions live in an arena and refer to each other by [`ExprId`]
//! handles, including the parent back-handle used by lvalue reduction.
//! Statements own their children directly; they form a tree with no back
//! edges.

use std::ops::{Index, IndexMut};

use crate::symbol::{ScopeId, Scopes};
use crate::types::{mk_id, IdxVec, Ty};

mk_id! {
  /// A handle to an expression node in an [`ExprArena`].
  ExprId,
}

/// A binary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binop {
  /// `+`
  Add,
  /// `-`
  Sub,
  /// `*`
  Mul,
  /// `/`
  Div,
  /// `&`
  And,
  /// `|`
  Or,
  /// `<<`
  Shl,
  /// `>>`
  Shr,
  /// `==`
  Eq,
  /// `!=`
  Ne,
  /// `<`
  Lt,
  /// `>`
  Gt,
  /// `<=`
  Le,
  /// `>=`
  Ge,
}

impl Binop {
  /// The `setcc` mnemonic, for the six comparison operators.
  #[must_use] pub fn set_cc(self) -> Option<&'static str> {
    match self {
      Binop::Eq => Some("sete"),
      Binop::Ne => Some("setne"),
      Binop::Lt => Some("setl"),
      Binop::Gt => Some("setg"),
      Binop::Le => Some("setle"),
      Binop::Ge => Some("setge"),
      _ => None,
    }
  }
}

/// The payload of an expression node.
#[derive(Clone, Debug)]
pub enum ExprKind {
  /// An integer literal.
  Number(i64),
  /// A string literal, by string-pool index.
  Str(u32),
  /// A variable or function reference.
  Name(String),
  /// A function call.
  Call {
    /// The callee, always a [`ExprKind::Name`].
    callee: ExprId,
    /// The arguments, in source order.
    args: Vec<ExprId>,
  },
  /// A cast; the target type is the node's type.
  Cast(ExprId),
  /// A pointer dereference.
  Deref(ExprId),
  /// A binary operation.
  Binop(Binop, ExprId, ExprId),
  /// An assignment. The left side is a `Name` or a `Deref` chain.
  Assign(ExprId, ExprId),
}

/// A typed expression node.
#[derive(Clone, Debug)]
pub struct Expr {
  /// The payload.
  pub kind: ExprKind,
  /// The expression's computed type.
  pub ty: Ty,
  /// The enclosing expression, `None` for a statement root.
  pub parent: Option<ExprId>,
}

/// The expression arena of a translation unit.
#[derive(Clone, Debug, Default)]
pub struct ExprArena(IdxVec<ExprId, Expr>);

impl ExprArena {
  /// Allocate a node with no parent.
  pub fn push(&mut self, kind: ExprKind, ty: Ty) -> ExprId {
    self.0.push(Expr { kind, ty, parent: None })
  }

  /// Link `child` under `parent`.
  pub fn set_parent(&mut self, child: ExprId, parent: ExprId) {
    self.0[child].parent = Some(parent);
  }

  /// The number of allocated nodes.
  #[must_use] pub fn len(&self) -> usize { self.0.len() }

  /// Whether the arena is empty.
  #[must_use] pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl Index<ExprId> for ExprArena {
  type Output = Expr;
  fn index(&self, id: ExprId) -> &Expr { &self.0[id] }
}

impl IndexMut<ExprId> for ExprArena {
  fn index_mut(&mut self, id: ExprId) -> &mut Expr { &mut self.0[id] }
}

/// A statement.
#[derive(Clone, Debug)]
pub enum Stmt {
  /// `{ ... }` with its own scope.
  Compound {
    /// The block's scope.
    scope: ScopeId,
    /// The child statements in order.
    stmts: Vec<Stmt>,
  },
  /// `if cond then (else els)?`
  If {
    /// The condition.
    cond: ExprId,
    /// The then-branch.
    then: Box<Stmt>,
    /// The optional else-branch.
    els: Option<Box<Stmt>>,
  },
  /// `while cond body`
  While {
    /// The condition, re-evaluated each iteration.
    cond: ExprId,
    /// The loop body.
    body: Box<Stmt>,
  },
  /// `return expr? ;`
  Return(Option<ExprId>),
  /// An expression statement.
  Expr(ExprId),
  /// `;` or a declaration with no runtime effect.
  Noop,
}

/// A parsed function body.
#[derive(Clone, Debug)]
pub struct Func {
  /// The function name.
  pub name: String,
  /// The declared return type, `u0` when omitted.
  pub ret: Ty,
  /// The function scope, holding the parameters (and any locals declared
  /// directly in a non-compound body).
  pub scope: ScopeId,
  /// The body statement.
  pub body: Stmt,
}

/// A parsed translation unit: the scope tree, the expression arena, and the
/// function bodies in definition order.
#[derive(Clone, Debug)]
pub struct Unit {
  /// All scopes; [`ScopeId::ROOT`] holds globals, externs, strings, and
  /// function symbols.
  pub scopes: Scopes,
  /// All expression nodes.
  pub exprs: ExprArena,
  /// The defined functions, in source order.
  pub funcs: Vec<Func>,
}
