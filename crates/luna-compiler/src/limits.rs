//! Hard limits enforced while compiling.

/// Maximum number of registers a function may use.
pub const MAX_STACK: u32 = 250;

/// Maximum number of upvalues per function.
pub const MAX_UPVALUES: usize = 255;

/// Maximum number of active local variables per function.
pub const MAX_VARS: usize = 200;

/// Maximum nesting of syntactic constructs (blocks, expressions, calls).
pub const MAX_CCALLS: u32 = 200;

/// Maximum number of lines in a chunk.
pub const MAX_LINES: u32 = i32::MAX as u32;

/// Option for multiple returns in CALL/RETURN/VARARG.
pub const MULTRET: i32 = -1;

/// Marks the end of a patch list.
pub const NO_JUMP: i32 = -1;

/// Maximum length of a chunk id in diagnostics.
pub const MAX_SRC: usize = 80;
