//! The x86-64 register file and calling-convention registers.
//!
//! Eight general registers back an unbounded virtual register file: each
//! slot carries a use count, allocation picks the least-used slot, and a
//! slot that is re-allocated while live spills its holder to the stack.
//! Paired frees pop the spilled copies back, so the pool behaves as a stack
//! of real registers.

use std::io::{self, Write};

use tracing::warn;

/// Number of general registers in the allocation pool.
pub const REG_COUNT: usize = 8;
/// Number of System V argument registers.
pub const ARG_REG_COUNT: usize = 6;

const REG64: [&str; REG_COUNT] = ["r10", "r11", "r12", "r13", "r14", "r15", "rax", "rbx"];
const REG32: [&str; REG_COUNT] = ["r10d", "r11d", "r12d", "r13d", "r14d", "r15d", "eax", "ebx"];
const REG16: [&str; REG_COUNT] = ["r10w", "r11w", "r12w", "r13w", "r14w", "r15w", "ax", "bx"];
const REG8: [&str; REG_COUNT] = ["r10b", "r11b", "r12b", "r13b", "r14b", "r15b", "al", "bl"];

/// System V argument registers, 64-bit names.
pub const ARG_REG64: [&str; ARG_REG_COUNT] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
/// System V argument registers, 32-bit names.
pub const ARG_REG32: [&str; ARG_REG_COUNT] = ["edi", "esi", "edx", "ecx", "r8d", "r9d"];

/// A slot in the fixed allocation pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reg(u8);

impl Reg {
  /// The pool slot holding `rax`, which division clobbers.
  pub const RAX: Reg = Reg(6);

  /// The 64-bit register name.
  #[must_use] pub fn q(self) -> &'static str { REG64[self.0 as usize] }

  /// The 32-bit register name.
  #[must_use] pub fn d(self) -> &'static str { REG32[self.0 as usize] }

  /// The 8-bit register name.
  #[must_use] pub fn b(self) -> &'static str { REG8[self.0 as usize] }

  /// The register name for a value of `size` bytes, used when storing from
  /// this register.
  #[must_use] pub fn sized(self, size: u32) -> Option<&'static str> {
    match size {
      1 => Some(REG8[self.0 as usize]),
      2 => Some(REG16[self.0 as usize]),
      4 => Some(REG32[self.0 as usize]),
      8 => Some(REG64[self.0 as usize]),
      _ => None,
    }
  }
}

/// The use-counted register pool. Spill traffic is emitted to the writer
/// each method takes, so the pool's state and the generated code always
/// agree.
#[derive(Debug, Default)]
pub struct RegFile {
  used: [u32; REG_COUNT],
}

impl RegFile {
  /// Allocate the least-used register, spilling its current holder if it
  /// was live. Earliest slot wins ties.
  pub fn alloc(&mut self, out: &mut impl Write) -> io::Result<Reg> {
    let mut r = 0;
    for i in 1..REG_COUNT {
      if self.used[i] < self.used[r] {
        r = i;
      }
    }
    if self.used[r] > 0 {
      writeln!(out, "\tpush {}", REG64[r])?;
    }
    self.used[r] += 1;
    Ok(Reg(r as u8))
  }

  /// Release one use of `r`, restoring a spilled holder if one remains.
  /// Freeing an already free register is a diagnostic, not an error.
  pub fn free(&mut self, out: &mut impl Write, r: Reg) -> io::Result<()> {
    let i = r.0 as usize;
    if self.used[i] == 0 {
      warn!("attempting to free already free'd register {}", REG64[i]);
      return Ok(());
    }
    self.used[i] -= 1;
    if self.used[i] > 0 {
      writeln!(out, "\tpop {}", REG64[i])?;
    }
    Ok(())
  }

  /// Reset every use count to zero, popping any remaining spilled copies.
  /// Idempotent.
  pub fn free_all(&mut self, out: &mut impl Write) -> io::Result<()> {
    for i in 0..REG_COUNT {
      while self.used[i] > 1 {
        writeln!(out, "\tpop {}", REG64[i])?;
        self.used[i] -= 1;
      }
      self.used[i] = 0;
    }
    Ok(())
  }

  /// Save every live register before a call.
  pub fn push_used(&self, out: &mut impl Write) -> io::Result<()> {
    for i in 0..REG_COUNT {
      if self.used[i] > 0 {
        writeln!(out, "\tpush {}", REG64[i])?;
      }
    }
    Ok(())
  }

  /// Restore the registers saved by [`RegFile::push_used`], in reverse.
  pub fn pop_used(&self, out: &mut impl Write) -> io::Result<()> {
    for i in (0..REG_COUNT).rev() {
      if self.used[i] > 0 {
        writeln!(out, "\tpop {}", REG64[i])?;
      }
    }
    Ok(())
  }

  /// Take a manual use of `rax` for the duration of a division, spilling a
  /// live value first. Mirrored by [`RegFile::release_rax`].
  pub fn reserve_rax(&mut self, out: &mut impl Write) -> io::Result<()> {
    let i = Reg::RAX.0 as usize;
    if self.used[i] > 0 {
      writeln!(out, "\tpush rax")?;
    }
    self.used[i] += 1;
    Ok(())
  }

  /// Drop the manual `rax` use taken by [`RegFile::reserve_rax`].
  pub fn release_rax(&mut self, out: &mut impl Write) -> io::Result<()> {
    let i = Reg::RAX.0 as usize;
    self.used[i] -= 1;
    if self.used[i] > 0 {
      writeln!(out, "\tpop rax")?;
    }
    Ok(())
  }
}
