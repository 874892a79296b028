//! The lexer: source bytes to tokens.
//!
//! The lexer also owns the inline-assembly passthrough: the bytes of an
//! `asm { ... }` block are streamed verbatim to the output writer at the
//! point the block is lexed, and the block yields no token.

use std::io::Write;

use crate::token::{Token, TokenKind};
use crate::types::Ty;
use crate::Error;

/// The digit value of `b` as a hexadecimal digit, for any base. Digit
/// acceptance is deliberately lax: the base only scales the accumulator.
fn digit_value(b: u8) -> Option<i64> {
  match b {
    b'0'..=b'9' => Some(i64::from(b - b'0')),
    b'a'..=b'f' => Some(i64::from(10 + b - b'a')),
    b'A'..=b'F' => Some(i64::from(10 + b - b'A')),
    _ => None,
  }
}

fn is_name_byte(b: u8) -> bool { b.is_ascii_alphanumeric() || b == b'_' }

/// A byte-stream lexer with one byte of lookahead and position tracking.
pub struct Lexer<'a, W> {
  file: &'a str,
  src: &'a [u8],
  pos: usize,
  line: u32,
  col: u32,
  out: &'a mut W,
}

impl<'a, W: Write> Lexer<'a, W> {
  /// Create a lexer over `src`. Inline-assembly bytes are written to `out`.
  pub fn new(file: &'a str, src: &'a [u8], out: &'a mut W) -> Self {
    Lexer { file, src, pos: 0, line: 1, col: 0, out }
  }

  /// Lex the whole input. The result ends with exactly one `Eof` token.
  pub fn lex(mut self) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    loop {
      let t = self.token()?;
      let done = t.kind == TokenKind::Eof;
      tokens.push(t);
      if done { return Ok(tokens) }
    }
  }

  fn err(&self, msg: String) -> Error {
    Error::Lex { file: self.file.to_owned(), line: self.line, col: self.col, msg }
  }

  fn next_byte(&mut self) -> Option<u8> {
    let b = *self.src.get(self.pos)?;
    self.pos += 1;
    self.col += 1;
    if b == b'\n' {
      self.line += 1;
      self.col = 0;
    }
    Some(b)
  }

  fn peek_byte(&self) -> Option<u8> { self.src.get(self.pos).copied() }

  fn accept(&mut self, b: u8) -> bool {
    if self.peek_byte() == Some(b) {
      self.next_byte();
      true
    } else {
      false
    }
  }

  fn expect(&mut self, b: u8) -> Result<(), Error> {
    if self.next_byte() == Some(b) {
      Ok(())
    } else {
      Err(self.err(format!("invalid character. expected '{}'.", b as char)))
    }
  }

  fn skip_ws(&mut self) -> Option<u8> {
    loop {
      let b = self.next_byte()?;
      if !matches!(b, b' ' | b'\t' | b'\n' | b'\r') { return Some(b) }
    }
  }

  /// Skip one comment whose opening `/` has already been consumed; the
  /// following byte decides the flavor. Returns false if `c` did not start
  /// a comment after all.
  fn skip_comment(&mut self) -> bool {
    if self.accept(b'/') {
      while let Some(b) = self.next_byte() {
        if b == b'\n' { break }
      }
      true
    } else if self.accept(b'*') {
      let mut depth = 1_u32;
      while depth > 0 {
        if self.accept(b'/') {
          if self.accept(b'*') { depth += 1; continue }
        } else if self.accept(b'*') {
          if self.accept(b'/') { depth -= 1; continue }
        }
        if self.next_byte().is_none() { break }
      }
      true
    } else {
      false
    }
  }

  fn lex_number(&mut self, first: Option<u8>, base: i64) -> i64 {
    let mut n = first.and_then(digit_value).unwrap_or(-1);
    while let Some(d) = self.peek_byte().and_then(digit_value) {
      self.next_byte();
      n = n.wrapping_mul(base).wrapping_add(d);
    }
    n
  }

  fn lex_word(&mut self, first: u8) -> String {
    let mut s = String::new();
    s.push(first as char);
    while let Some(b) = self.peek_byte() {
      if !is_name_byte(b) { break }
      self.next_byte();
      s.push(b as char);
    }
    s
  }

  fn lex_string(&mut self) -> Result<String, Error> {
    let mut buf = Vec::new();
    loop {
      let Some(b) = self.next_byte() else { return Err(self.err("invalid character. expected '\"'.".into())) };
      match b {
        b'"' => break,
        b'\\' => {
          let Some(e) = self.next_byte() else { return Err(self.err("invalid character. expected '\"'.".into())) };
          buf.push(if e == b'n' { b'\n' } else { e });
        }
        _ => buf.push(b),
      }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
  }

  fn char_literal(&mut self) -> Result<i64, Error> {
    let n = match self.next_byte() {
      Some(b'\\') => match self.next_byte() {
        Some(b'b') => 8,
        Some(b't') => 9,
        Some(b'n') => 10,
        Some(b'f') => 12,
        Some(b'r') => 13,
        _ => return Err(self.err("invalid escape sequence".into())),
      },
      Some(b) => i64::from(b),
      None => return Err(self.err("invalid character. expected '''.".into())),
    };
    self.expect(b'\'')?;
    Ok(n)
  }

  /// Stream the body of an `asm { ... }` block to the output.
  fn asm_passthrough(&mut self) -> Result<(), Error> {
    if self.skip_ws() != Some(b'{') {
      return Err(self.err("empty asm directive".into()));
    }
    self.accept(b'\n');
    while let Some(b) = self.next_byte() {
      if b == b'}' { break }
      self.out.write_all(&[b])?;
    }
    Ok(())
  }

  fn token(&mut self) -> Result<Token, Error> {
    let mut c = self.skip_ws();
    while c == Some(b'/') {
      if !self.skip_comment() { break }
      c = self.skip_ws();
    }

    let (line, col) = (self.line, self.col);
    let kind = match c {
      None => TokenKind::Eof,
      Some(b'\'') => TokenKind::Number(self.char_literal()?),
      Some(b'"') => TokenKind::Str(self.lex_string()?),
      Some(b'0') => TokenKind::Number(if self.accept(b'b') {
        let first = self.next_byte();
        self.lex_number(first, 2)
      } else if self.accept(b'o') {
        let first = self.next_byte();
        self.lex_number(first, 8)
      } else if self.accept(b'x') {
        let first = self.next_byte();
        self.lex_number(first, 16)
      } else {
        self.lex_number(Some(b'0'), 10)
      }),
      Some(c @ b'1'..=b'9') => TokenKind::Number(self.lex_number(Some(c), 10)),
      Some(b'>') => {
        if self.accept(b'=') { TokenKind::Ge }
        else if self.accept(b'>') {
          if self.accept(b'=') { TokenKind::ShrAssign } else { TokenKind::Shr }
        } else { TokenKind::Gt }
      }
      Some(b'<') => {
        if self.accept(b'=') { TokenKind::Le }
        else if self.accept(b'<') {
          if self.accept(b'=') { TokenKind::ShlAssign } else { TokenKind::Shl }
        } else { TokenKind::Lt }
      }
      Some(b'+') => {
        if self.accept(b'=') { TokenKind::AddAssign }
        else if self.accept(b'+') { TokenKind::Inc }
        else { TokenKind::Plus }
      }
      Some(b'-') => {
        if self.accept(b'=') { TokenKind::SubAssign }
        else if self.accept(b'-') { TokenKind::Dec }
        else { TokenKind::Minus }
      }
      Some(b'*') => if self.accept(b'=') { TokenKind::MulAssign } else { TokenKind::Star },
      Some(b'/') => if self.accept(b'=') { TokenKind::DivAssign } else { TokenKind::Slash },
      Some(b'&') => if self.accept(b'=') { TokenKind::AndAssign } else { TokenKind::Amp },
      Some(b'|') => if self.accept(b'=') { TokenKind::OrAssign } else { TokenKind::Pipe },
      Some(b'=') => if self.accept(b'=') { TokenKind::EqEq } else { TokenKind::Assign },
      Some(b'!') => if self.accept(b'=') { TokenKind::Ne } else { TokenKind::Bang },
      Some(b'{') => TokenKind::LBrace,
      Some(b'}') => TokenKind::RBrace,
      Some(b',') => TokenKind::Comma,
      Some(b':') => TokenKind::Colon,
      Some(b'[') => TokenKind::LBracket,
      Some(b']') => TokenKind::RBracket,
      Some(b'(') => TokenKind::LParen,
      Some(b')') => TokenKind::RParen,
      Some(b';') => TokenKind::Semi,
      Some(c) => {
        if !c.is_ascii_alphabetic() && c != b'_' {
          return Err(self.err(format!("invalid character '{}'.", c as char)));
        }
        let name = self.lex_word(c);
        if name == "asm" {
          self.asm_passthrough()?;
          return self.token();
        } else if let Some(kw) = TokenKind::keyword(&name) {
          kw
        } else if let Some(ty) = Ty::from_name(&name) {
          TokenKind::Type(ty)
        } else {
          TokenKind::Name(name)
        }
      }
    };
    Ok(Token { line, col, kind })
  }
}
