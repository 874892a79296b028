//! NASM code emission over the typed AST.
//!
//! Expressions are compiled by a stack-discipline walk: each subexpression
//! leaves its value in a pool register, binary operations consume their
//! right operand's register, and every statement ends with the pool drained.
//! Assignments produce no register; only statement roots (and the right
//! side of a synthesized return) ever observe that.

use std::io::Write;

use itertools::Itertools;
use tracing::debug;

use crate::arch::{ARG_REG32, ARG_REG64, ARG_REG_COUNT, Reg, RegFile};
use crate::symbol::{ScopeId, Sym, SymKind};
use crate::types::ast::{Binop, ExprId, ExprKind, Func, Stmt, Unit};
use crate::types::Ty;
use crate::Error;

/// The NASM size keyword for a memory operand of `ty`'s width.
fn size_name(ty: Ty) -> Result<&'static str, Error> {
  match ty.size() {
    1 => Ok("byte"),
    2 => Ok("word"),
    4 => Ok("dword"),
    8 => Ok("qword"),
    _ => Err(Error::Codegen(format!("invalid size for type '{ty}'."))),
  }
}

/// The mnemonic for loading a value of `ty`: plain `mov` for full-width
/// loads, sign- or zero-extension otherwise.
fn load_instr(ty: Ty) -> &'static str {
  if ty.size() == 8 { "mov" } else if ty.is_signed() { "movsx" } else { "movzx" }
}

/// The destination register name when loading a value of `ty` into `r`:
/// the 32-bit name for plain `u32`, the 64-bit name for everything else.
fn load_reg_name(r: Reg, ty: Ty) -> &'static str {
  if ty == Ty::U32 { r.d() } else { r.q() }
}

/// The register name for storing a value of `ty` out of `r`.
fn store_reg_name(r: Reg, ty: Ty) -> Result<&'static str, Error> {
  r.sized(ty.size())
    .ok_or_else(|| Error::Codegen(format!("invalid size for type '{ty}'.")))
}

/// The code generator: walks a [`Unit`] and writes NASM text.
pub struct CodeGen<'a, W> {
  unit: &'a Unit,
  out: W,
  regs: RegFile,
  labels: u32,
}

impl<'a, W: Write> CodeGen<'a, W> {
  /// Create a generator writing to `out`.
  pub fn new(unit: &'a Unit, out: W) -> Self {
    CodeGen { unit, out, regs: RegFile::default(), labels: 0 }
  }

  /// Emit the whole unit: every function in reverse definition order, then
  /// the data directives for globals and string literals.
  pub fn emit(mut self) -> Result<(), Error> {
    let unit = self.unit;
    for f in unit.funcs.iter().rev() {
      debug!(function = %f.name, "generating");
      self.func_pre(f)?;
      self.gen_stmt(&f.body, f.scope)?;
      self.func_post(f)?;
    }
    self.lib_post()
  }

  /*
   * Labels and branching
   */
  fn new_label(&mut self) -> u32 {
    let l = self.labels;
    self.labels += 1;
    l
  }

  fn decl_label(&mut self, l: u32) -> Result<(), Error> {
    writeln!(self.out, "L{l}:")?;
    Ok(())
  }

  fn jmp(&mut self, l: u32) -> Result<(), Error> {
    writeln!(self.out, "\tjmp L{l}")?;
    Ok(())
  }

  fn jmp_if_false(&mut self, l: u32, r: Reg) -> Result<(), Error> {
    writeln!(self.out, "\ttest {}, {}", r.q(), r.q())?;
    writeln!(self.out, "\tjz L{l}")?;
    Ok(())
  }

  /// Place argument `i`: the first six go to the System V argument
  /// registers, the rest are pushed.
  fn push_arg(&mut self, i: usize, r: Reg) -> Result<(), Error> {
    if i < ARG_REG_COUNT {
      writeln!(self.out, "\tmov {}, {}", ARG_REG64[i], r.q())?;
    } else {
      writeln!(self.out, "\tpush {}", r.q())?;
    }
    Ok(())
  }

  /// Return from the current function; with no register, the return value
  /// is 0.
  fn ret(&mut self, r: Option<Reg>) -> Result<(), Error> {
    match r {
      Some(r) => writeln!(self.out, "\tmov rax, {}", r.q())?,
      None => writeln!(self.out, "\tmov rax, 0")?,
    }
    writeln!(self.out, "\tleave")?;
    writeln!(self.out, "\tret")?;
    Ok(())
  }

  /*
   * Loads and stores
   */
  fn resolve(&self, scope: ScopeId, name: &str) -> Result<&'a Sym, Error> {
    self.unit.scopes.get(scope, name)
      .ok_or_else(|| Error::Codegen(format!("unknown name '{name}'.")))
  }

  fn load_name(&mut self, name: &str, scope: ScopeId) -> Result<Reg, Error> {
    let sym = self.resolve(scope, name)?;
    let (kind, ty, offset) = (sym.kind, sym.ty, sym.offset);
    let r = self.regs.alloc(&mut self.out)?;
    match kind {
      SymKind::Local => {
        writeln!(self.out, "\t{} {}, {} [rbp{}]",
          load_instr(ty), load_reg_name(r, ty), size_name(ty)?, offset)?;
      }
      SymKind::Global => {
        writeln!(self.out, "\t{} {}, {} [{}]",
          load_instr(ty), load_reg_name(r, ty), size_name(ty)?, name)?;
      }
      _ => return Err(Error::Codegen(format!("can't load symbol '{name}'."))),
    }
    Ok(r)
  }

  /// Replace the address in `r` with the value of `ty` it points to.
  fn load_addr(&mut self, r: Reg, ty: Ty) -> Result<Reg, Error> {
    writeln!(self.out, "\t{} {}, {} [{}]",
      load_instr(ty), load_reg_name(r, ty), size_name(ty)?, r.q())?;
    Ok(r)
  }

  fn store_name(&mut self, r: Reg, name: &str, scope: ScopeId) -> Result<(), Error> {
    let sym = self.resolve(scope, name)?;
    let (kind, ty, offset) = (sym.kind, sym.ty, sym.offset);
    match kind {
      SymKind::Local => writeln!(self.out, "\tmov [rbp{}], {}", offset, store_reg_name(r, ty)?)?,
      SymKind::Global => writeln!(self.out, "\tmov [{}], {}", name, store_reg_name(r, ty)?)?,
      _ => return Err(Error::Codegen(format!("can't store to symbol '{name}'."))),
    }
    Ok(())
  }

  /// Store the value in `src` through the address in `dst`, with the width
  /// of `ty`.
  fn store_addr(&mut self, src: Reg, dst: Reg, ty: Ty) -> Result<(), Error> {
    writeln!(self.out, "\tmov [{}], {}", dst.q(), store_reg_name(src, ty)?)?;
    Ok(())
  }

  /*
   * Expressions
   */
  /// Emit `e` and require a value-bearing register; assignments yield none.
  fn expr_value(&mut self, e: ExprId, scope: ScopeId) -> Result<Reg, Error> {
    self.gen_expr(e, scope)?
      .ok_or_else(|| Error::Codegen("expression has no value.".into()))
  }

  /// Emit `e` as an rvalue, returning the register holding the result, or
  /// `None` for an assignment.
  fn gen_expr(&mut self, e: ExprId, scope: ScopeId) -> Result<Option<Reg>, Error> {
    let unit = self.unit;
    let node = &unit.exprs[e];
    match &node.kind {
      ExprKind::Number(n) => {
        let r = self.regs.alloc(&mut self.out)?;
        writeln!(self.out, "\tmov {}, {}", r.q(), n)?;
        Ok(Some(r))
      }
      ExprKind::Str(i) => {
        let r = self.regs.alloc(&mut self.out)?;
        writeln!(self.out, "\tmov {}, LC{}", r.q(), i)?;
        Ok(Some(r))
      }
      ExprKind::Name(name) => self.load_name(name, scope).map(Some),
      ExprKind::Call { callee, args } => {
        self.regs.push_used(&mut self.out)?;
        for (i, &arg) in args.iter().enumerate().rev() {
          let r = self.expr_value(arg, scope)?;
          self.push_arg(i, r)?;
          self.regs.free(&mut self.out, r)?;
        }
        let ExprKind::Name(name) = &unit.exprs[*callee].kind else {
          return Err(Error::Codegen("call target is not a name.".into()));
        };
        writeln!(self.out, "\tcall {name}")?;
        self.regs.pop_used(&mut self.out)?;
        let r = self.regs.alloc(&mut self.out)?;
        writeln!(self.out, "\tmov {}, rax", r.q())?;
        Ok(Some(r))
      }
      ExprKind::Cast(inner) => {
        let r = self.expr_value(*inner, scope)?;
        // Narrow casts clear the single bit at the type's width, not the
        // high bytes.
        if node.ty.size() != 8 {
          writeln!(self.out, "\tand {}, {}", r.q(), !(1_i64 << (8 * node.ty.size())))?;
        }
        Ok(Some(r))
      }
      ExprKind::Deref(inner) => {
        let r = self.expr_value(*inner, scope)?;
        self.load_addr(r, node.ty).map(Some)
      }
      ExprKind::Binop(op, l, r) => {
        let r1 = self.expr_value(*l, scope)?;
        let r2 = self.expr_value(*r, scope)?;
        self.gen_binop(*op, r1, r2).map(Some)
      }
      ExprKind::Assign(lhs, rhs) => {
        match &unit.exprs[*lhs].kind {
          ExprKind::Name(name) => {
            let r = self.expr_value(*rhs, scope)?;
            self.store_name(r, name, scope)?;
          }
          ExprKind::Deref(inner) => {
            let src = self.expr_value(*rhs, scope)?;
            let dst = self.gen_lvalue(*inner, scope)?;
            self.store_addr(src, dst, unit.exprs[*lhs].ty.base())?;
          }
          _ => return Err(Error::Codegen("can't assign to expression.".into())),
        }
        Ok(None)
      }
    }
  }

  /// Reduce the dereference chain above `e` to the address it stores
  /// through: descend to the chain's leaf, emit it as an rvalue, then walk
  /// back up loading once per intermediate star. The outermost star is not
  /// loaded; its operand's value is the destination address.
  fn gen_lvalue(&mut self, e: ExprId, scope: ScopeId) -> Result<Reg, Error> {
    let unit = self.unit;
    let is_deref = |id: ExprId| matches!(unit.exprs[id].kind, ExprKind::Deref(_));
    let mut cur = e;
    while let ExprKind::Deref(inner) = unit.exprs[cur].kind {
      cur = inner;
    }
    let mut r = self.expr_value(cur, scope)?;
    while let Some(parent) = unit.exprs[cur].parent {
      if !is_deref(parent) { break }
      if unit.exprs[parent].parent.is_some_and(is_deref) {
        r = self.load_addr(r, unit.exprs[cur].ty)?;
      }
      cur = parent;
    }
    Ok(r)
  }

  /// Emit a binary operation into `r1`, consuming `r2`.
  fn gen_binop(&mut self, op: Binop, r1: Reg, r2: Reg) -> Result<Reg, Error> {
    if let Some(cc) = op.set_cc() {
      writeln!(self.out, "\tcmp {}, {}", r1.q(), r2.q())?;
      writeln!(self.out, "\t{} {}", cc, r1.b())?;
      writeln!(self.out, "\tand {}, 1", r1.q())?;
    } else {
      match op {
        Binop::Div => {
          self.regs.reserve_rax(&mut self.out)?;
          writeln!(self.out, "\tmov rax, {}", r1.q())?;
          writeln!(self.out, "\tcqo")?;
          writeln!(self.out, "\tidiv {}", r2.q())?;
          writeln!(self.out, "\tmov {}, rax", r1.q())?;
          self.regs.release_rax(&mut self.out)?;
        }
        Binop::Shl | Binop::Shr => {
          writeln!(self.out, "\tmov cl, {}", r2.b())?;
          let instr = if op == Binop::Shl { "shl" } else { "shr" };
          writeln!(self.out, "\t{} {}, cl", instr, r1.q())?;
        }
        _ => {
          let instr = match op {
            Binop::Add => "add",
            Binop::Sub => "sub",
            Binop::Mul => "imul",
            Binop::And => "and",
            Binop::Or => "or",
            _ => unreachable!("comparisons handled above"),
          };
          writeln!(self.out, "\t{} {}, {}", instr, r1.q(), r2.q())?;
        }
      }
    }
    self.regs.free(&mut self.out, r2)?;
    Ok(r1)
  }

  /*
   * Statements
   */
  fn gen_stmt(&mut self, s: &Stmt, scope: ScopeId) -> Result<(), Error> {
    match s {
      Stmt::Compound { scope: inner, stmts } => {
        for st in stmts {
          self.gen_stmt(st, *inner)?;
        }
      }
      Stmt::If { cond, then, els } => {
        if let Some(els) = els {
          let lelse = self.new_label();
          let lend = self.new_label();
          let r = self.expr_value(*cond, scope)?;
          self.jmp_if_false(lelse, r)?;
          self.gen_stmt(then, scope)?;
          self.jmp(lend)?;
          self.decl_label(lelse)?;
          self.gen_stmt(els, scope)?;
          self.decl_label(lend)?;
        } else {
          let lend = self.new_label();
          let r = self.expr_value(*cond, scope)?;
          self.jmp_if_false(lend, r)?;
          self.gen_stmt(then, scope)?;
          self.decl_label(lend)?;
        }
      }
      Stmt::While { cond, body } => {
        let lstart = self.new_label();
        let lend = self.new_label();
        self.decl_label(lstart)?;
        let r = self.expr_value(*cond, scope)?;
        self.jmp_if_false(lend, r)?;
        self.gen_stmt(body, scope)?;
        self.jmp(lstart)?;
        self.decl_label(lend)?;
      }
      Stmt::Return(e) => {
        let r = match e {
          Some(e) => self.gen_expr(*e, scope)?,
          None => None,
        };
        self.ret(r)?;
      }
      Stmt::Expr(e) => {
        self.gen_expr(*e, scope)?;
      }
      Stmt::Noop => {}
    }
    self.regs.free_all(&mut self.out)?;
    Ok(())
  }

  /*
   * Pre- and postambles
   */
  /// The frame bytes needed under `s`: the deepest `last_offset` over its
  /// compound scopes. A non-compound statement contributes nothing.
  fn frame_size(&self, s: &Stmt) -> i32 {
    let Stmt::Compound { scope, stmts } = s else { return 0 };
    let mut size = -self.unit.scopes.last_offset(*scope);
    for st in stmts {
      size = size.max(self.frame_size(st));
    }
    size
  }

  fn func_pre(&mut self, f: &Func) -> Result<(), Error> {
    let unit = self.unit;
    writeln!(self.out, "global {}", f.name)?;
    writeln!(self.out, "{}:", f.name)?;
    writeln!(self.out, "\tpush rbp")?;
    writeln!(self.out, "\tmov rbp, rsp")?;

    let frame = self.frame_size(&f.body);
    if frame > 0 {
      writeln!(self.out, "\tsub rsp, {frame}")?;
    }

    // Move the register-passed parameters into their stack slots. Byte and
    // word stores stage through eax.
    for (i, sym) in unit.scopes[f.scope].syms.iter().enumerate().take(ARG_REG_COUNT) {
      match sym.ty.size() {
        1 => {
          writeln!(self.out, "\tmov eax, {}", ARG_REG32[i])?;
          writeln!(self.out, "\tmov [rbp{}], al", sym.offset)?;
        }
        2 => {
          writeln!(self.out, "\tmov eax, {}", ARG_REG32[i])?;
          writeln!(self.out, "\tmov [rbp{}], ax", sym.offset)?;
        }
        4 => writeln!(self.out, "\tmov [rbp{}], {}", sym.offset, ARG_REG32[i])?,
        8 => writeln!(self.out, "\tmov [rbp{}], {}", sym.offset, ARG_REG64[i])?,
        _ => return Err(Error::Codegen(format!("bad parameter type {}.", sym.ty))),
      }
    }
    Ok(())
  }

  /// Functions without a return type fall off the end with an implicit
  /// `return`.
  fn func_post(&mut self, f: &Func) -> Result<(), Error> {
    if f.ret == Ty::U0 {
      self.ret(None)?;
    }
    Ok(())
  }

  fn lib_post(&mut self) -> Result<(), Error> {
    let unit = self.unit;
    for sym in &unit.scopes[ScopeId::ROOT].syms {
      match sym.kind {
        SymKind::Global => {
          let directive = match sym.ty.size() {
            1 => "db",
            2 => "dw",
            4 => "dd",
            8 => "dq",
            _ => return Err(Error::Codegen(format!("global '{}' has no storage.", sym.name))),
          };
          writeln!(self.out, "{} {} 0", sym.name, directive)?;
        }
        SymKind::Str => {
          writeln!(self.out, "LC{}: db {}", sym.offset,
            sym.name.bytes().chain(std::iter::once(0)).format(", "))?;
        }
        _ => {}
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lexer::Lexer;
  use crate::parser::Parser;

  fn compile(src: &str) -> String {
    let mut out = Vec::new();
    let tokens = Lexer::new("test", src.as_bytes(), &mut out).lex().unwrap();
    let unit = Parser::new("test", &tokens).parse().unwrap();
    CodeGen::new(&unit, &mut out).emit().unwrap();
    String::from_utf8(out).unwrap()
  }

  #[test]
  fn void_return() {
    let asm = compile("fn main(): u0 { return; }");
    let expected = "\
global main
main:
\tpush rbp
\tmov rbp, rsp
\tmov rax, 0
\tleave
\tret
\tmov rax, 0
\tleave
\tret
";
    assert_eq!(asm, expected);
  }

  #[test]
  fn add_two_arguments() {
    let asm = compile("fn f(a: u32, b: u32): u32 { return a + b; }");
    assert!(asm.contains("\tsub rsp, 8\n"));
    assert!(asm.contains("\tmov [rbp-4], edi\n"));
    assert!(asm.contains("\tmov [rbp-8], esi\n"));
    assert!(asm.contains("\tadd r10, r11\n"));
    assert!(asm.contains("\tmov rax, r10\n\tleave\n\tret\n"));
  }

  #[test]
  fn global_store_and_data() {
    let asm = compile("var g: u32; fn set(x: u32): u0 { g = x; }");
    assert!(asm.contains("\tmov [g], r10d\n"));
    assert!(asm.ends_with("g dd 0\n"));
  }

  #[test]
  fn indexing_scales_and_loads() {
    let asm = compile("fn idx(p: u32*, i: u32): u32 { return p[i]; }");
    assert!(asm.contains("\tmov r12, 4\n"));
    assert!(asm.contains("\timul r11, r12\n"));
    assert!(asm.contains("\tadd r10, r11\n"));
    assert!(asm.contains("\tmovzx r10d, dword [r10]\n"));
  }

  #[test]
  fn comparison_routes_through_rax() {
    let asm = compile("fn cmp(a: s32, b: s32): s8 { return a < b; }");
    assert!(asm.contains("\tmovsx r10, dword [rbp-4]\n"));
    assert!(asm.contains("\tcmp r10, r11\n"));
    assert!(asm.contains("\tsetl r10b\n"));
    assert!(asm.contains("\tand r10, 1\n"));
    assert!(asm.contains("\tmov rax, r10\n"));
  }

  #[test]
  fn while_loop_labels() {
    let asm = compile("fn w(): u0 { while 1 { } }");
    let expected = "\
global w
w:
\tpush rbp
\tmov rbp, rsp
L0:
\tmov r10, 1
\ttest r10, r10
\tjz L1
\tjmp L0
L1:
\tmov rax, 0
\tleave
\tret
";
    assert_eq!(asm, expected);
  }

  #[test]
  fn if_else_labels() {
    let asm = compile("fn f(a: s64): s64 { if a { return 1; } else { return 2; } }");
    assert!(asm.contains("\tjz L0\n"));
    assert!(asm.contains("\tjmp L1\n"));
    assert!(asm.contains("L0:\n"));
    assert!(asm.contains("L1:\n"));
  }

  #[test]
  fn functions_emit_in_reverse_order() {
    let asm = compile("fn a(): u0 { } fn b(): u0 { }");
    let pos_a = asm.find("global a").unwrap();
    let pos_b = asm.find("global b").unwrap();
    assert!(pos_b < pos_a);
  }

  #[test]
  fn call_spills_and_collects_rax() {
    let asm = compile("extern fn put(s8); fn f(): u0 { put(65); }");
    assert!(asm.contains("\tmov rdi, r10\n"));
    assert!(asm.contains("\tcall put\n"));
    assert!(asm.contains("\tmov r10, rax\n"));
  }

  #[test]
  fn extra_arguments_go_on_the_stack() {
    let asm = compile(
      "extern fn many(s8, s8, s8, s8, s8, s8, s8);
       fn f(): u0 { many(1, 2, 3, 4, 5, 6, 7); }",
    );
    // Arguments are evaluated right to left, so the seventh is pushed first.
    assert!(asm.contains("\tmov r10, 7\n\tpush r10\n"));
    assert!(asm.contains("\tmov r9, r10\n"));
    assert!(asm.contains("\tmov rdi, r10\n"));
  }

  #[test]
  fn division_stages_through_rax() {
    let asm = compile("fn f(a: s64, b: s64): s64 { return a / b; }");
    let expected = "\tmov rax, r10\n\tcqo\n\tidiv r11\n\tmov r10, rax\n";
    assert!(asm.contains(expected));
  }

  #[test]
  fn shifts_use_cl() {
    let asm = compile("fn f(a: u64, b: u8): u64 { return a << b; }");
    assert!(asm.contains("\tmov cl, r11b\n"));
    assert!(asm.contains("\tshl r10, cl\n"));
  }

  #[test]
  fn cast_masks_one_bit() {
    let asm = compile("fn f(a: u64): u8 { return (u8) a; }");
    assert!(asm.contains(&format!("\tand r10, {}\n", !(1_i64 << 8))));
    // Full-width casts emit nothing.
    let asm = compile("fn f(a: u8): u64 { return (u64) a; }");
    assert!(!asm.contains("\tand"));
  }

  #[test]
  fn string_literals_emit_labels_and_data() {
    let asm = compile(r#"extern fn put(s8*); fn f(): u0 { put("hi"); }"#);
    assert!(asm.contains("\tmov r10, LC0\n"));
    assert!(asm.ends_with("LC0: db 104, 105, 0\n"));
  }

  #[test]
  fn store_through_pointer_chain() {
    let asm = compile("fn f(pp: u8**, v: u8): u0 { **pp = v; }");
    // v loads first, then pp, then one reload for the intermediate star.
    assert!(asm.contains("\tmovzx r10, byte [rbp-12]\n"));
    assert!(asm.contains("\tmov r11, qword [rbp-8]\n"));
    assert!(asm.contains("\tmov r11, qword [r11]\n"));
    assert!(asm.contains("\tmov [r11], r10b\n"));
  }

  #[test]
  fn store_through_single_pointer_does_not_reload() {
    let asm = compile("fn f(p: u64*, v: u64): u0 { *p = v; }");
    assert!(asm.contains("\tmov r11, qword [rbp-8]\n"));
    assert!(asm.contains("\tmov [r11], r10\n"));
    assert!(!asm.contains("qword [r11]"));
  }

  #[test]
  fn assignment_as_return_value_yields_zero() {
    let asm = compile("fn f(a: s64): s64 { return a = 1; }");
    assert!(asm.contains("\tmov [rbp-8], r10\n"));
    assert!(asm.contains("\tmov rax, 0\n"));
  }
}
