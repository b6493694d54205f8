use luna_compiler::compiler::compile;
use luna_compiler::error::CompileError;
use luna_compiler::opcode::OpCode;
use luna_compiler::proto::{Constant, Proto};
use luna_core::string::StringInterner;

/// Compile a Lua source string and return the Proto + StringInterner.
pub fn compile_str(source: &str) -> (Proto, StringInterner) {
    compile(source.as_bytes(), "=test").unwrap_or_else(|e| {
        panic!("compile failed: {e}\nsource:\n{source}");
    })
}

/// Compile a Lua source string and expect an error.
pub fn compile_error(source: &str) -> CompileError {
    match compile(source.as_bytes(), "=test") {
        Err(e) => e,
        Ok(_) => panic!("expected compile error, got success\nsource:\n{source}"),
    }
}

/// Compile a Lua source string and return the error message.
pub fn compile_str_err(source: &str) -> String {
    compile_error(source).message
}

/// Opcodes of a Proto, in order.
pub fn opcodes(proto: &Proto) -> Vec<OpCode> {
    proto.code.iter().map(|i| i.opcode()).collect()
}

/// Check if a Proto contains a specific opcode.
pub fn has_opcode(proto: &Proto, op: OpCode) -> bool {
    proto.code.iter().any(|i| i.opcode() == op)
}

/// Count occurrences of an opcode in a Proto.
pub fn count_opcode(proto: &Proto, op: OpCode) -> usize {
    proto.code.iter().filter(|i| i.opcode() == op).count()
}

/// Find the first instruction with a given opcode.
#[allow(dead_code)]
pub fn find_opcode(proto: &Proto, op: OpCode) -> Option<usize> {
    proto.code.iter().position(|i| i.opcode() == op)
}

/// Absolute target of the jump-like instruction at `pc`.
#[allow(dead_code)]
pub fn jump_target(proto: &Proto, pc: usize) -> usize {
    (pc as i64 + 1 + proto.code[pc].sbx() as i64) as usize
}

/// Get string constant value by index.
pub fn get_string_constant(proto: &Proto, idx: usize, strings: &StringInterner) -> String {
    match &proto.constants[idx] {
        Constant::String(id) => String::from_utf8(strings.get_bytes(*id).to_vec()).unwrap(),
        other => panic!("expected string constant, got {other:?}"),
    }
}

/// Get numeric constant value by index.
#[allow(dead_code)]
pub fn get_number_constant(proto: &Proto, idx: usize) -> f64 {
    match &proto.constants[idx] {
        Constant::Number(n) => *n,
        other => panic!("expected number constant, got {other:?}"),
    }
}
