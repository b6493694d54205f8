use super::helpers::*;
use luna_compiler::opcode::OpCode;

#[test]
fn e2e_local_folded_addition() {
    let (p, _) = compile_str("local x = 1 + 2");
    assert_eq!(opcodes(&p), vec![OpCode::LoadK, OpCode::Return]);
    assert_eq!(p.code[0].a(), 0);
    assert_eq!(p.code[0].bx(), 0);
    assert_eq!(get_number_constant(&p, 0), 3.0);
    assert!(!has_opcode(&p, OpCode::Add));
}

#[test]
fn e2e_while_loop_layout() {
    let (p, strings) = compile_str("while a do b() end");
    assert_eq!(
        opcodes(&p),
        vec![
            OpCode::GetTabUp,
            OpCode::Test,
            OpCode::Jmp,
            OpCode::GetTabUp,
            OpCode::Call,
            OpCode::Jmp,
            OpCode::Return,
        ]
    );
    assert_eq!(get_string_constant(&p, 0, &strings), "a");
    assert_eq!(get_string_constant(&p, 1, &strings), "b");
    // Back jump to the loop head.
    assert_eq!(jump_target(&p, 5), 0);
    // Loop exit lands just after the back jump.
    assert_eq!(jump_target(&p, 2), 6);
}

#[test]
fn e2e_numeric_for_empty_body() {
    let (p, _) = compile_str("for i=1,10 do end");
    assert_eq!(
        opcodes(&p),
        vec![
            OpCode::LoadK,
            OpCode::LoadK,
            OpCode::LoadK,
            OpCode::ForPrep,
            OpCode::ForLoop,
            OpCode::Return,
        ]
    );
    assert_eq!(jump_target(&p, 3), 4);
    assert_eq!(jump_target(&p, 4), 4);
    // Step defaults to the constant 1 already in the pool.
    assert_eq!(p.constants.len(), 2);
}

#[test]
fn e2e_generic_for() {
    let (p, strings) = compile_str("for k, v in pairs(t) do print(k, v) end");
    assert!(has_opcode(&p, OpCode::TForCall));
    assert!(has_opcode(&p, OpCode::TForLoop));
    let call = find_opcode(&p, OpCode::TForCall).unwrap();
    assert_eq!(p.code[call].c(), 2);
    let names: Vec<_> = p
        .local_vars
        .iter()
        .map(|v| strings.get_str_lossy(v.name).into_owned())
        .collect();
    assert_eq!(
        names,
        vec!["(for generator)", "(for state)", "(for control)", "k", "v"]
    );
}

#[test]
fn e2e_repeat_until() {
    let (p, _) = compile_str("local i = 0 repeat i = i + 1 until i >= 10");
    assert!(has_opcode(&p, OpCode::Add));
    assert!(has_opcode(&p, OpCode::Le));
    let jmp = find_opcode(&p, OpCode::Jmp).unwrap();
    // The conditional jump loops back to the body start.
    assert_eq!(jump_target(&p, jmp), 1);
}

#[test]
fn e2e_if_elseif_else() {
    let (p, _) = compile_str("if a then x = 1 elseif b then x = 2 else x = 3 end");
    assert_eq!(count_opcode(&p, OpCode::SetTabUp), 3);
    assert_eq!(count_opcode(&p, OpCode::Test), 2);
    // Every escape jump after an arm lands on the final return.
    let ret = p.code.len() - 1;
    let escapes: Vec<_> = (0..p.code.len())
        .filter(|&pc| p.code[pc].opcode() == OpCode::Jmp && jump_target(&p, pc) == ret)
        .collect();
    assert_eq!(escapes.len(), 2);
}

#[test]
fn e2e_do_block_scopes_locals() {
    let (p, _) = compile_str("do local a = 1 end local b = 2");
    // `b` reuses the register freed when the block closed.
    assert_eq!(p.code[1].opcode(), OpCode::LoadK);
    assert_eq!(p.code[1].a(), 0);
    assert_eq!(p.local_vars[0].end_pc, 1);
}

#[test]
fn e2e_multiple_assignment() {
    let (p, _) = compile_str("local a, b, c = 1, 2");
    assert_eq!(
        opcodes(&p),
        vec![OpCode::LoadK, OpCode::LoadK, OpCode::LoadNil, OpCode::Return]
    );
    assert_eq!(p.code[2].a(), 2);
    assert_eq!(p.code[2].b(), 0);
}

#[test]
fn e2e_swap_assignment() {
    let (p, _) = compile_str("local a, b = 1, 2 a, b = b, a");
    assert_eq!(count_opcode(&p, OpCode::Move), 3);
}

#[test]
fn e2e_break_exits_innermost_loop() {
    let (p, _) = compile_str("while true do while true do break end x() end");
    // The inner break jumps over the inner back jump, to the call.
    let call_pc = find_opcode(&p, OpCode::GetTabUp).unwrap();
    let first_jmp = find_opcode(&p, OpCode::Jmp).unwrap();
    assert_eq!(jump_target(&p, first_jmp), call_pc);
}

#[test]
fn e2e_nested_table_constructor() {
    let (p, _) = compile_str("local t = {1, 2, {3}, x = {}}");
    assert_eq!(count_opcode(&p, OpCode::NewTable), 3);
    assert_eq!(count_opcode(&p, OpCode::SetList), 2);
    assert_eq!(count_opcode(&p, OpCode::SetTable), 1);
}

#[test]
fn e2e_method_definition() {
    let (p, strings) = compile_str("local obj = {} function obj:get() return self.v end");
    let child = &p.protos[0];
    assert_eq!(child.num_params, 1);
    assert_eq!(strings.get_str_lossy(child.local_vars[0].name), "self");
    assert!(has_opcode(&p, OpCode::SetTable));
}

#[test]
fn e2e_line_info_tracks_source_lines() {
    let (p, _) = compile_str("local a = 1\n\nlocal b = 2\n");
    assert_eq!(p.line_info, vec![1, 3, 3]);
}
