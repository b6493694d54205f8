use super::helpers::*;
use luna_compiler::opcode::OpCode;

#[test]
fn e2e_global_call() {
    let (p, strings) = compile_str("print(\"hi\")");
    assert_eq!(
        opcodes(&p),
        vec![OpCode::GetTabUp, OpCode::LoadK, OpCode::Call, OpCode::Return]
    );
    assert_eq!(get_string_constant(&p, 0, &strings), "print");
    assert_eq!(get_string_constant(&p, 1, &strings), "hi");
    let call = p.code[2];
    assert_eq!((call.a(), call.b(), call.c()), (0, 2, 1));
}

#[test]
fn e2e_main_chunk_shape() {
    let (p, strings) = compile_str("");
    assert!(p.is_vararg);
    assert_eq!(p.num_params, 0);
    assert_eq!(p.max_stack_size, 2);
    assert_eq!(p.upvalues.len(), 1);
    assert!(p.upvalues[0].in_stack);
    assert_eq!(strings.get_str_lossy(p.upvalues[0].name.unwrap()), "_ENV");
    assert_eq!(strings.get_str_lossy(p.source.unwrap()), "=test");
}

#[test]
fn e2e_closure_captures_local() {
    let (p, strings) = compile_str("local a local function f() return a end");
    assert_eq!(p.protos.len(), 1);
    let child = &p.protos[0];
    assert_eq!(child.upvalues.len(), 1);
    assert!(child.upvalues[0].in_stack);
    assert_eq!(child.upvalues[0].index, 0);
    assert_eq!(strings.get_str_lossy(child.upvalues[0].name.unwrap()), "a");
    assert_eq!(child.code[0].opcode(), OpCode::GetUpval);
    assert_eq!(child.line_defined, 1);
    assert_eq!(child.last_line_defined, 1);
}

#[test]
fn e2e_upvalue_through_two_levels() {
    let (p, _) = compile_str("local a\nfunction f()\n  return function() return a end\nend");
    let middle = &p.protos[0];
    let inner = &middle.protos[0];
    assert!(middle.upvalues[0].in_stack);
    assert!(!inner.upvalues[0].in_stack);
    assert_eq!(inner.upvalues[0].index, 0);
    assert_eq!(middle.line_defined, 2);
    assert_eq!(middle.last_line_defined, 4);
}

#[test]
fn e2e_closure_global_uses_env_upvalue() {
    let (p, strings) = compile_str("local function f() return x end");
    let child = &p.protos[0];
    assert_eq!(strings.get_str_lossy(child.upvalues[0].name.unwrap()), "_ENV");
    // The main chunk holds _ENV as an upvalue, not a register.
    assert!(!child.upvalues[0].in_stack);
    assert_eq!(child.code[0].opcode(), OpCode::GetTabUp);
}

#[test]
fn e2e_assign_to_upvalue() {
    let (p, _) = compile_str("local a function f() a = 1 end");
    let child = &p.protos[0];
    assert_eq!(
        opcodes(child),
        vec![OpCode::LoadK, OpCode::SetUpval, OpCode::Return]
    );
}

#[test]
fn e2e_captured_loop_local_is_closed() {
    let (p, _) = compile_str("while true do local x f = function() return x end break end");
    // Leaving a block whose local was captured closes upvalues with a jump.
    assert!(p.code.iter().any(|i| i.opcode() == OpCode::Jmp && i.a() > 0));
}

#[test]
fn e2e_vararg_function() {
    let (p, _) = compile_str("local function f(a, ...) return ... end");
    let child = &p.protos[0];
    assert!(child.is_vararg);
    assert_eq!(child.num_params, 1);
    let va = child.code[0];
    assert_eq!(va.opcode(), OpCode::VarArg);
    assert_eq!(va.b(), 0);
    assert_eq!(child.code[1].opcode(), OpCode::Return);
    assert_eq!(child.code[1].b(), 0);
}

#[test]
fn e2e_tail_call() {
    let (p, _) = compile_str("local function f(n) return f(n) end");
    let child = &p.protos[0];
    assert!(has_opcode(child, OpCode::TailCall));
    assert!(!has_opcode(child, OpCode::Call));
}

#[test]
fn e2e_call_with_multiple_results_forwarded() {
    let (p, _) = compile_str("print(f())");
    let calls: Vec<_> = p.code.iter().filter(|i| i.opcode() == OpCode::Call).collect();
    assert_eq!(calls.len(), 2);
    // Inner call returns all its values, outer call takes them all.
    assert_eq!(calls[0].c(), 0);
    assert_eq!(calls[1].b(), 0);
}

#[test]
fn e2e_method_call_uses_self() {
    let (p, _) = compile_str("obj:method(1)");
    assert!(has_opcode(&p, OpCode::Self_));
    let call = find_opcode(&p, OpCode::Call).unwrap();
    assert_eq!(p.code[call].b(), 3);
}

#[test]
fn e2e_recursive_local_function() {
    let (p, _) = compile_str("local function fact(n) if n <= 1 then return 1 end return n * fact(n - 1) end");
    let child = &p.protos[0];
    assert_eq!(child.upvalues.len(), 1);
    assert!(child.upvalues[0].in_stack);
    assert!(has_opcode(child, OpCode::Mul));
}

#[test]
fn e2e_parameters_are_locals() {
    let (p, strings) = compile_str("function add(a, b) return a + b end");
    let child = &p.protos[0];
    assert_eq!(child.num_params, 2);
    let names: Vec<_> = child
        .local_vars
        .iter()
        .map(|v| strings.get_str_lossy(v.name).into_owned())
        .collect();
    assert_eq!(names, vec!["a", "b"]);
    let add = child.code[0];
    assert_eq!(add.opcode(), OpCode::Add);
    assert_eq!((add.b(), add.c()), (0, 1));
}
