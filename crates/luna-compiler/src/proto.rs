//! Function prototype: holds compiled bytecode, constants, and debug info.

use crate::opcode::Instruction;
use luna_core::string::StringId;
use std::hash::{Hash, Hasher};

/// A constant value in the constant pool.
#[derive(Clone, Copy, Debug)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Number(f64),
    String(StringId),
}

// Numbers compare by bit pattern so that 0 and -0 keep separate slots.
impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Nil, Constant::Nil) => true,
            (Constant::Boolean(a), Constant::Boolean(b)) => a == b,
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Nil => {}
            Constant::Boolean(b) => b.hash(state),
            Constant::Number(n) => n.to_bits().hash(state),
            Constant::String(s) => s.hash(state),
        }
    }
}

/// Description of an upvalue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpvalDesc {
    /// Name of the upvalue (for debug info).
    pub name: Option<StringId>,
    /// True if this upvalue is in the enclosing function's stack (not another upvalue).
    pub in_stack: bool,
    /// Index: register index if in_stack, upvalue index in parent otherwise.
    pub index: u8,
}

/// A local variable debug entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVar {
    pub name: StringId,
    /// First PC where the variable is active.
    pub start_pc: u32,
    /// First PC where the variable is dead.
    pub end_pc: u32,
}

/// A compiled function prototype.
#[derive(Clone, Debug, Default)]
pub struct Proto {
    /// Bytecode instructions.
    pub code: Vec<Instruction>,
    /// Constant pool.
    pub constants: Vec<Constant>,
    /// Nested function prototypes.
    pub protos: Vec<Proto>,
    /// Upvalue descriptors.
    pub upvalues: Vec<UpvalDesc>,
    /// Number of fixed parameters.
    pub num_params: u8,
    /// Whether this function accepts varargs.
    pub is_vararg: bool,
    /// Maximum stack size needed.
    pub max_stack_size: u8,
    /// Line where the function definition starts (0 for the main chunk).
    pub line_defined: u32,
    /// Line of the closing `end` (0 for the main chunk).
    pub last_line_defined: u32,

    // --- Debug info ---
    /// Source name, as given to the compiler.
    pub source: Option<StringId>,
    /// Source line of each instruction.
    pub line_info: Vec<u32>,
    /// Local variable debug info.
    pub local_vars: Vec<LocalVar>,
}

impl Proto {
    /// Create a new empty prototype.
    pub fn new() -> Self {
        Proto {
            max_stack_size: 2, // minimum
            ..Default::default()
        }
    }

    /// Emit an instruction at the given source line.
    pub fn emit(&mut self, inst: Instruction, line: u32) -> usize {
        let pc = self.code.len();
        self.code.push(inst);
        self.line_info.push(line);
        pc
    }

    /// Get the line number for a given PC (0 when unknown).
    pub fn get_line(&self, pc: usize) -> u32 {
        self.line_info.get(pc).copied().unwrap_or(0)
    }

    /// Current code length.
    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Mutable access to an emitted instruction.
    pub fn get_mut(&mut self, pc: usize) -> &mut Instruction {
        &mut self.code[pc]
    }

    /// Release spare capacity once the function is complete.
    pub fn trim(&mut self) {
        self.code.shrink_to_fit();
        self.line_info.shrink_to_fit();
        self.constants.shrink_to_fit();
        self.protos.shrink_to_fit();
        self.upvalues.shrink_to_fit();
        self.local_vars.shrink_to_fit();
    }
}
