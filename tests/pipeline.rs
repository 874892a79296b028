//! End-to-end tests: real source files in, NASM files out.

use std::fs;

use nanoc::{compile_file, Error};

fn compile(name: &str, src: &str) -> (tempfile::TempDir, String) {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join(name);
  fs::write(&path, src).unwrap();
  let out = compile_file(&path).unwrap();
  let asm = fs::read_to_string(out).unwrap();
  (dir, asm)
}

#[test]
fn output_lands_next_to_the_input() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("main.n");
  fs::write(&path, "fn main(): u0 { return; }").unwrap();
  let out = compile_file(&path).unwrap();
  assert_eq!(out, dir.path().join("main.s"));
  assert!(out.exists());
}

#[test]
fn minimal_function() {
  let (_dir, asm) = compile("main.n", "fn main(): u0 { return; }");
  assert!(asm.starts_with("global main\nmain:\n\tpush rbp\n\tmov rbp, rsp\n"));
  assert!(asm.contains("\tmov rax, 0\n\tleave\n\tret\n"));
}

#[test]
fn whole_program_with_globals_strings_and_calls() {
  let src = r#"
extern fn write(s64, s8*, s64): s64;

var count: u64;

fn emit(msg: s8*, len: s64): u0 {
    count = count + 1;
    write(1, msg, len);
}

fn main(): s64 {
    var i: s64 = 0;
    while i < 3 {
        emit("hi\n", 3);
        i = i + 1;
    }
    return 0;
}
"#;
  let (_dir, asm) = compile("prog.n", src);
  // Functions come out in reverse definition order.
  let main_at = asm.find("global main").unwrap();
  let emit_at = asm.find("global emit").unwrap();
  assert!(main_at < emit_at);
  assert!(asm.contains("\tcall emit\n"));
  assert!(asm.contains("\tcall write\n"));
  // Data directives trail the code.
  assert!(asm.contains("count dq 0\n"));
  assert!(asm.contains("LC0: db 104, 105, 10, 0\n"));
}

#[test]
fn inline_asm_streams_ahead_of_generated_code() {
  let src = "fn start(): u0 {\n  asm {\n\tmov rax, 60\n\tsyscall\n  }\n}\n";
  let (_dir, asm) = compile("boot.n", src);
  // The whole file is lexed before any code is generated, so the
  // passthrough text precedes the prologue.
  let asm_at = asm.find("\tmov rax, 60\n").unwrap();
  let global_at = asm.find("global start").unwrap();
  assert!(asm_at < global_at);
}

#[test]
fn missing_input_reports_the_path() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("absent.n");
  let err = compile_file(&path).unwrap_err();
  assert!(matches!(err, Error::Io { .. }));
  assert!(err.to_string().contains("absent.n"));
  assert!(err.to_string().contains("for reading"));
}

#[test]
fn parse_errors_carry_file_line_and_column() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("bad.n");
  fs::write(&path, "fn f(): u0 {\n  missing = 1;\n}").unwrap();
  let err = compile_file(&path).unwrap_err();
  let msg = err.to_string();
  assert!(matches!(err, Error::Parse { line: 2, col: 3, .. }));
  assert!(msg.contains("bad.n:2:3: error: couldn't find variable 'missing'."));
}
