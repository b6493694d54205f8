use super::helpers::*;
use luna_compiler::compiler::compile;
use luna_compiler::error::ErrorKind;

#[test]
fn e2e_error_display_has_chunk_and_line() {
    let e = compile_error("x = 1\nx = = 2");
    assert_eq!(e.to_string(), "test:2: unexpected symbol near '='");
}

#[test]
fn e2e_error_chunk_id_for_files() {
    let e = compile(b"return )", "@scripts/main.lua").unwrap_err();
    assert!(e.to_string().starts_with("scripts/main.lua:1: "));
}

#[test]
fn e2e_error_chunk_id_for_strings() {
    let e = compile(b"return )", "return )").unwrap_err();
    assert_eq!(e.chunk, "[string \"return )\"]");
}

#[test]
fn e2e_error_unfinished_string() {
    let e = compile_error("local x = \"hello");
    assert_eq!(e.kind, ErrorKind::Lexical);
    assert_eq!(e.message, "unfinished string near <eof>");
}

#[test]
fn e2e_error_unfinished_string_at_newline() {
    let err = compile_str_err("local x = \"hello\nworld\"");
    assert_eq!(err, "unfinished string near '\"hello'");
}

#[test]
fn e2e_error_unfinished_long_string() {
    let err = compile_str_err("x = [[abc");
    assert!(err.starts_with("unfinished long string"));
}

#[test]
fn e2e_error_invalid_escape() {
    let err = compile_str_err("local x = \"\\q\"");
    assert!(err.starts_with("invalid escape sequence"));
}

#[test]
fn e2e_error_decimal_escape_too_large() {
    let err = compile_str_err("local x = \"\\300\"");
    assert!(err.starts_with("decimal escape too large"));
}

#[test]
fn e2e_error_malformed_number() {
    let e = compile_error("local x = 3e");
    assert_eq!(e.kind, ErrorKind::Lexical);
    assert!(e.message.starts_with("malformed number near '3e"));
}

#[test]
fn e2e_error_unexpected_symbol() {
    let e = compile_error("return )");
    assert_eq!(e.kind, ErrorKind::Syntax);
    assert_eq!(e.message, "unexpected symbol near ')'");
}

#[test]
fn e2e_error_missing_end() {
    let err = compile_str_err("if x then");
    assert_eq!(err, "'end' expected near <eof>");
}

#[test]
fn e2e_error_missing_end_other_line() {
    let err = compile_str_err("while x do\n  y()\n");
    assert_eq!(err, "'end' expected (to close 'while' at line 1) near <eof>");
}

#[test]
fn e2e_error_expected_then() {
    let err = compile_str_err("if x do end");
    assert_eq!(err, "'then' expected near 'do'");
}

#[test]
fn e2e_error_expression_not_statement() {
    let err = compile_str_err("x");
    assert_eq!(err, "syntax error near <eof>");
}

#[test]
fn e2e_error_vararg_outside_vararg_function() {
    let e = compile_error("function f() return ... end");
    assert_eq!(e.kind, ErrorKind::Semantic);
    assert!(e.message.starts_with("cannot use '...' outside a vararg function"));
}

#[test]
fn e2e_error_too_many_locals() {
    let names: Vec<String> = (0..201).map(|i| format!("v{i}")).collect();
    let source = format!("local {}", names.join(", "));
    let e = compile_error(&source);
    assert_eq!(e.kind, ErrorKind::Limit);
    assert!(e.message.contains("main function has more than 200 local variables"));
}

#[test]
fn e2e_error_too_many_syntax_levels() {
    let source = format!("x = {}1{}", "(".repeat(300), ")".repeat(300));
    let e = compile_error(&source);
    assert_eq!(e.kind, ErrorKind::Limit);
    assert!(e.message.contains("too many syntax levels"));
}

#[test]
fn e2e_error_limit_in_nested_function() {
    let names: Vec<String> = (0..201).map(|i| format!("v{i}")).collect();
    let source = format!("local function f()\n  local {}\nend", names.join(", "));
    let err = compile_str_err(&source);
    assert!(err.contains("function at line 1 has more than 200 local variables"));
}
