//! Symbol tables: a tree of scopes held in an index arena.
//!
//! Each scope is an ordered symbol list with a parent link; lookup walks
//! toward the root. Insertion order is semantically meaningful — a function
//! scope's parameters occupy its first slots, which the prologue uses to
//! index the argument registers.

use smallvec::SmallVec;

use crate::types::{mk_id, IdxVec, Ty};

mk_id! {
  /// A handle to a scope in the [`Scopes`] arena.
  ScopeId,
}

impl ScopeId {
  /// The root scope of a translation unit, holding globals, externs,
  /// string literals, and function symbols.
  pub const ROOT: ScopeId = ScopeId(0);
}

/// The kind of a symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymKind {
  /// A function, extern or defined.
  Func,
  /// A global variable.
  Global,
  /// A local variable or parameter.
  Local,
  /// A string literal, named by its contents.
  Str,
}

/// A named entity.
#[derive(Clone, Debug)]
pub struct Sym {
  /// What the symbol is.
  pub kind: SymKind,
  /// The identifier, or the literal contents for [`SymKind::Str`].
  pub name: String,
  /// The symbol's type; the return type for functions.
  pub ty: Ty,
  /// Frame offset for locals (strictly negative), string-pool index for
  /// string literals, 0 otherwise.
  pub offset: i32,
  /// Declared parameter types, in order. Empty for non-functions.
  pub params: SmallVec<[Ty; 6]>,
}

impl Sym {
  /// A fresh symbol with no offset and no parameters.
  #[must_use] pub fn new(kind: SymKind, name: String, ty: Ty) -> Sym {
    Sym { kind, name, ty, offset: 0, params: SmallVec::new() }
  }
}

/// A single scope.
#[derive(Clone, Debug)]
pub struct Scope {
  /// The enclosing scope, `None` for the root.
  pub parent: Option<ScopeId>,
  /// The symbols declared here, in declaration order.
  pub syms: Vec<Sym>,
}

/// The scope tree of a translation unit.
#[derive(Clone, Debug, Default)]
pub struct Scopes(IdxVec<ScopeId, Scope>);

impl Scopes {
  /// Allocate a fresh empty scope linked under `parent`.
  pub fn alloc(&mut self, parent: Option<ScopeId>) -> ScopeId {
    self.0.push(Scope { parent, syms: Vec::new() })
  }

  /// Append a symbol to `scope`. No deduplication or shadow check.
  pub fn put(&mut self, scope: ScopeId, sym: Sym) {
    self.0[scope].syms.push(sym);
  }

  /// Resolve `name`, searching `scope` and then its ancestors; the first
  /// match wins.
  #[must_use] pub fn get(&self, scope: ScopeId, name: &str) -> Option<&Sym> {
    let mut cur = Some(scope);
    while let Some(id) = cur {
      let sc = &self.0[id];
      if let Some(sym) = sc.syms.iter().find(|s| s.name == name) {
        return Some(sym);
      }
      cur = sc.parent;
    }
    None
  }

  /// The most negative frame offset across `scope` and all its ancestors,
  /// 0 if none is negative. Nested scopes share and extend the enclosing
  /// frame, so offsets stay monotone across compounds.
  #[must_use] pub fn last_offset(&self, scope: ScopeId) -> i32 {
    let mut offset = 0;
    let mut cur = Some(scope);
    while let Some(id) = cur {
      let sc = &self.0[id];
      for s in &sc.syms {
        offset = offset.min(s.offset);
      }
      cur = sc.parent;
    }
    offset
  }

  /// The root of the tree containing `scope`.
  #[must_use] pub fn root(&self, scope: ScopeId) -> ScopeId {
    let mut id = scope;
    while let Some(parent) = self.0[id].parent {
      id = parent;
    }
    id
  }
}

impl std::ops::Index<ScopeId> for Scopes {
  type Output = Scope;
  fn index(&self, id: ScopeId) -> &Scope { &self.0[id] }
}
