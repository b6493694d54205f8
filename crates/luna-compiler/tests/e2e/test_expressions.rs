use super::helpers::*;
use luna_compiler::opcode::{fb2int, is_k, OpCode};
use luna_compiler::proto::Constant;

#[test]
fn e2e_fold_power() {
    let (p, _) = compile_str("return 2^10");
    assert_eq!(opcodes(&p), vec![OpCode::LoadK, OpCode::Return, OpCode::Return]);
    assert_eq!(get_number_constant(&p, 0), 1024.0);
}

#[test]
fn e2e_no_fold_division_by_zero() {
    let (p, _) = compile_str("return 1/0");
    assert!(has_opcode(&p, OpCode::Div));
}

#[test]
fn e2e_no_fold_modulo_by_zero() {
    let (p, _) = compile_str("return 1%0");
    assert!(has_opcode(&p, OpCode::Mod));
}

#[test]
fn e2e_fold_unary_minus() {
    let (p, _) = compile_str("local x = -(3 - 5)");
    assert_eq!(opcodes(&p), vec![OpCode::LoadK, OpCode::Return]);
    assert_eq!(get_number_constant(&p, 0), 2.0);
    assert!(!has_opcode(&p, OpCode::Unm));
}

#[test]
fn e2e_arith_with_constant_operand() {
    let (p, _) = compile_str("local a = 1 local b = a + 10");
    let add = find_opcode(&p, OpCode::Add).unwrap();
    let inst = p.code[add];
    assert_eq!(inst.a(), 1);
    assert_eq!(inst.b(), 0);
    assert!(is_k(inst.c()));
}

#[test]
fn e2e_not_folds_constants() {
    let (p, _) = compile_str("local a = not nil");
    assert_eq!(opcodes(&p), vec![OpCode::LoadBool, OpCode::Return]);
    assert_eq!(p.code[0].b(), 1);
}

#[test]
fn e2e_not_on_register() {
    let (p, _) = compile_str("local a local b = not a");
    assert!(has_opcode(&p, OpCode::Not));
}

#[test]
fn e2e_length_and_unary_minus() {
    let (p, _) = compile_str("local t = {} local n = -#t");
    assert!(has_opcode(&p, OpCode::Len));
    assert!(has_opcode(&p, OpCode::Unm));
}

#[test]
fn e2e_concat_chain_is_single_instruction() {
    let (p, _) = compile_str("local s = a .. b .. c");
    assert_eq!(count_opcode(&p, OpCode::Concat), 1);
    let concat = find_opcode(&p, OpCode::Concat).unwrap();
    assert_eq!(p.code[concat].b(), 0);
    assert_eq!(p.code[concat].c(), 2);
}

#[test]
fn e2e_comparison_produces_boolean() {
    let (p, _) = compile_str("local a, b = 1, 2 local c = a < b");
    assert!(has_opcode(&p, OpCode::Lt));
    assert_eq!(count_opcode(&p, OpCode::LoadBool), 2);
}

#[test]
fn e2e_equality_with_constant() {
    let (p, _) = compile_str("local a = 1 if a == 'x' then a = 2 end");
    let eq = find_opcode(&p, OpCode::Eq).unwrap();
    assert!(is_k(p.code[eq].c()));
}

#[test]
fn e2e_and_or_short_circuit() {
    let (p, _) = compile_str("local a, b, c = 1, 2, 3 local d = a and b or c");
    assert!(count_opcode(&p, OpCode::Jmp) >= 2);
    assert!(!has_opcode(&p, OpCode::LoadBool));
}

#[test]
fn e2e_constants_deduplicated() {
    let (p, _) = compile_str("local a = 'k' local b = 'k' local c = 1 local d = 1");
    assert_eq!(p.constants.len(), 2);
}

#[test]
fn e2e_zero_and_negative_zero_are_distinct() {
    let (p, _) = compile_str("local a = 0 local b = -0");
    assert_eq!(p.constants.len(), 2);
    assert!(matches!(p.constants[1], Constant::Number(n) if n == 0.0 && n.is_sign_negative()));
}

#[test]
fn e2e_index_chain() {
    let (p, strings) = compile_str("local v = a.b.c");
    assert_eq!(
        opcodes(&p),
        vec![OpCode::GetTabUp, OpCode::GetTable, OpCode::GetTable, OpCode::Return]
    );
    assert_eq!(get_string_constant(&p, 1, &strings), "b");
}

#[test]
fn e2e_table_constructor_size_hints() {
    let (p, _) = compile_str("local t = {1, 2, 3, x = 1, y = 2}");
    let inst = p.code[0];
    assert_eq!(inst.opcode(), OpCode::NewTable);
    assert_eq!(fb2int(inst.b()), 3);
    assert_eq!(fb2int(inst.c()), 2);
}

#[test]
fn e2e_vararg_in_table() {
    let (p, _) = compile_str("local t = {...}");
    let va = find_opcode(&p, OpCode::VarArg).unwrap();
    assert_eq!(p.code[va].b(), 0);
    let setlist = find_opcode(&p, OpCode::SetList).unwrap();
    assert_eq!(p.code[setlist].b(), 0);
}

#[test]
fn e2e_string_escapes() {
    let (p, strings) = compile_str(r#"local s = "a\tb\65\x42\z
        c""#);
    assert_eq!(get_string_constant(&p, 0, &strings), "a\tbABc");
}

#[test]
fn e2e_long_string() {
    let (p, strings) = compile_str("local s = [==[\nline]]\n]==]");
    assert_eq!(get_string_constant(&p, 0, &strings), "line]]\n");
}

#[test]
fn e2e_hex_numbers() {
    let (p, _) = compile_str("local a = 0x10 local b = 0x1p4 local c = 0xA.8");
    assert_eq!(get_number_constant(&p, 0), 16.0);
    assert_eq!(p.constants.len(), 2);
    assert_eq!(get_number_constant(&p, 1), 10.5);
}
