//! A single-pass, whole-program compiler from a small C-like source
//! language to textual x86-64 assembly (NASM syntax, System V AMD64 calling
//! convention).
//!
//! The pipeline is strictly sequential: [`lexer`] turns the source bytes
//! into tokens (streaming `asm { ... }` blocks straight to the output),
//! [`parser`] builds a fully typed AST over scoped symbol tables, and
//! [`codegen`] walks the AST emitting NASM text through a stack-backed
//! virtual register file. Any error aborts the compile; there is no
//! recovery and no warning channel.

pub mod arch;
pub mod codegen;
pub mod lexer;
pub mod parser;
pub mod symbol;
pub mod token;
pub mod types;

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

/// Any failure of the compilation pipeline. Every stage is fail-fast: the
/// first error aborts the compile.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// Failure opening, reading, or writing a file.
  #[error("{msg}")]
  Io {
    /// Human-readable description naming the path involved.
    msg: String,
    /// The underlying OS error.
    #[source]
    source: io::Error,
  },
  /// A lexical error, with the source position it was detected at.
  #[error("{file}:{line}:{col}: error: {msg}")]
  Lex {
    /// The input file name.
    file: String,
    /// 1-based source line.
    line: u32,
    /// Byte column within the line.
    col: u32,
    /// What went wrong.
    msg: String,
  },
  /// A parse or type error, with the offending token's position.
  #[error("{file}:{line}:{col}: error: {msg}")]
  Parse {
    /// The input file name.
    file: String,
    /// 1-based source line.
    line: u32,
    /// Byte column within the line.
    col: u32,
    /// What went wrong.
    msg: String,
  },
  /// A code-generator invariant violation. These never fire on well-typed
  /// ASTs but are retained as defensive traps.
  #[error("cg error: {0}")]
  Codegen(String),
}

impl From<io::Error> for Error {
  fn from(source: io::Error) -> Self {
    Error::Io { msg: "Error writing output file.".into(), source }
  }
}

/// The output path for `input`: the same path with the final character
/// overwritten by `s`.
#[must_use] pub fn output_path(input: &Path) -> PathBuf {
  let mut path = input.to_string_lossy().into_owned();
  path.pop();
  path.push('s');
  PathBuf::from(path)
}

/// Compile the source file at `input`, writing NASM text next to it.
/// Returns the output path.
pub fn compile_file(input: &Path) -> Result<PathBuf, Error> {
  let file = input.display().to_string();
  let src = fs::read(input).map_err(|source| Error::Io {
    msg: format!("Error opening file '{file}' for reading."),
    source,
  })?;

  let out_path = output_path(input);
  let out_file = fs::File::create(&out_path).map_err(|source| Error::Io {
    msg: format!("Error opening file '{}' for writing.", out_path.display()),
    source,
  })?;
  let mut out = BufWriter::new(out_file);

  let tokens = lexer::Lexer::new(&file, &src, &mut out).lex()?;
  debug!(tokens = tokens.len(), "lexed");
  let unit = parser::Parser::new(&file, &tokens).parse()?;
  debug!(functions = unit.funcs.len(), "parsed");
  codegen::CodeGen::new(&unit, &mut out).emit()?;
  out.flush()?;
  Ok(out_path)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn output_path_overwrites_last_character() {
    assert_eq!(output_path(Path::new("prog.c")), PathBuf::from("prog.s"));
    assert_eq!(output_path(Path::new("a/b/x.n")), PathBuf::from("a/b/x.s"));
    assert_eq!(output_path(Path::new("prog")), PathBuf::from("pros"));
  }
}
