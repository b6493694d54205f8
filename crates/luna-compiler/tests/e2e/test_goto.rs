use super::helpers::*;
use luna_compiler::error::ErrorKind;
use luna_compiler::opcode::OpCode;

#[test]
fn e2e_goto_forward_into_enclosing_block() {
    let (p, _) = compile_str("do goto done end ::done:: x = 1");
    assert_eq!(opcodes(&p), vec![OpCode::Jmp, OpCode::SetTabUp, OpCode::Return]);
    assert_eq!(jump_target(&p, 0), 1);
}

#[test]
fn e2e_goto_over_local_rejected() {
    let e = compile_error("do goto done end local y ::done:: x = y");
    assert_eq!(e.kind, ErrorKind::Semantic);
    assert_eq!(e.message, "<goto done> at line 1 jumps into the scope of local 'y'");
}

#[test]
fn e2e_goto_into_local_scope() {
    let e = compile_error("goto done; local y; ::done::");
    assert_eq!(e.kind, ErrorKind::Semantic);
    assert_eq!(e.line, 1);
    assert_eq!(e.message, "<goto done> at line 1 jumps into the scope of local 'y'");
}

#[test]
fn e2e_goto_into_local_scope_with_statement_after_label() {
    let err = compile_str_err("goto done; local y; ::done:: print(y)");
    assert_eq!(err, "<goto done> at line 1 jumps into the scope of local 'y'");
}

#[test]
fn e2e_goto_out_of_block_past_its_locals() {
    let (p, _) = compile_str("do goto l; local x end ::l::");
    assert_eq!(opcodes(&p), vec![OpCode::Jmp, OpCode::LoadNil, OpCode::Return]);
    assert_eq!(jump_target(&p, 0), 2);
}

#[test]
fn e2e_goto_backward() {
    let (p, _) = compile_str("::top:: x = 1 goto top");
    let jmp = find_opcode(&p, OpCode::Jmp).unwrap();
    assert_eq!(jump_target(&p, jmp), 0);
}

#[test]
fn e2e_goto_continue_idiom() {
    let (p, _) = compile_str(
        "for i = 1, 3 do\n  if i == 2 then goto continue end\n  x = i\n  ::continue::\nend",
    );
    let forloop = find_opcode(&p, OpCode::ForLoop).unwrap();
    // The continue jump lands on the loop instruction.
    let gotos: Vec<_> = (0..p.code.len())
        .filter(|&pc| p.code[pc].opcode() == OpCode::Jmp && jump_target(&p, pc) == forloop)
        .collect();
    assert_eq!(gotos.len(), 1);
}

#[test]
fn e2e_duplicate_label() {
    let e = compile_error("::L:: x = 1\n::L::");
    assert_eq!(e.kind, ErrorKind::Semantic);
    assert_eq!(e.message, "label 'L' already defined on line 1");
}

#[test]
fn e2e_same_label_in_nested_block() {
    compile_str("::L:: do ::L:: end");
}

#[test]
fn e2e_goto_undefined_label() {
    let err = compile_str_err("goto nowhere");
    assert_eq!(err, "no visible label 'nowhere' for <goto> at line 1");
}

#[test]
fn e2e_goto_cannot_enter_nested_block() {
    let err = compile_str_err("goto inner do ::inner:: end");
    assert_eq!(err, "no visible label 'inner' for <goto> at line 1");
}

#[test]
fn e2e_goto_cannot_leave_function() {
    let err = compile_str_err("::l::\nlocal function f()\n  goto l\nend");
    assert_eq!(err, "no visible label 'l' for <goto> at line 3");
}

#[test]
fn e2e_break_outside_loop() {
    let err = compile_str_err("x = 1\nbreak");
    assert_eq!(err, "<break> at line 2 not inside a loop");
}

#[test]
fn e2e_break_inside_nested_blocks() {
    let (p, _) = compile_str("while x do do if y then break end end end");
    assert!(count_opcode(&p, OpCode::Jmp) >= 3);
}
