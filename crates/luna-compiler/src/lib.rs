//! Luna compiler: lexer, single-pass parser and code generator for Lua 5.2,
//! plus a bytecode listing and a binary chunk dumper.

pub mod compiler;
pub mod disasm;
pub mod dump;
pub mod error;
pub mod lexer;
pub mod limits;
pub mod opcode;
pub mod proto;
pub mod token;

pub use compiler::compile;
pub use error::{CompileError, ErrorKind};
