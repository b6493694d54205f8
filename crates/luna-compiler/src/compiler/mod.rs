//! Single-pass Lua 5.2 compiler: source → Proto bytecode.
//!
//! There is no syntax tree. The recursive-descent parser drives the code
//! generator directly, one function state per nested function literal.

pub mod code;
pub mod expr;
pub mod parser;
pub mod scope;
pub mod statement;

use crate::error::{CompileError, ErrorKind};
use crate::lexer::Lexer;
use crate::limits::{MAX_CCALLS, NO_JUMP};
use crate::proto::{Constant, Proto, UpvalDesc};
use crate::token::Token;
use expr::{ExprDesc, ExprKind};
use indexmap::IndexSet;
use luna_core::string::{StringId, StringInterner};
use scope::{BlockCnt, Dyndata};

/// Compile a chunk into its main function prototype.
///
/// Returns the prototype tree together with the interner that owns every
/// string it references.
pub fn compile(source: &[u8], chunkname: &str) -> Result<(Proto, StringInterner), CompileError> {
    let mut compiler = Compiler::new(source, chunkname);
    let proto = compiler.main_func()?;
    log::debug!(
        "compiled {}: {} instructions, {} nested functions",
        compiler.lexer.chunk(),
        proto.code.len(),
        proto.protos.len()
    );
    Ok((proto, compiler.lexer.strings))
}

/// State for a single function being compiled.
#[derive(Default)]
struct FuncState {
    proto: Proto,
    /// Constant pool; insertion order gives the index.
    constants: IndexSet<Constant>,
    /// Block stack, innermost last.
    blocks: Vec<BlockCnt>,
    /// pc of the last jump target.
    last_target: usize,
    /// Jumps pending to the next emitted instruction.
    jpc: i32,
    /// Index of this function's first entry in `Dyndata::actvar`.
    first_local: usize,
    /// Number of active locals.
    nactvar: u32,
    /// First free register.
    free_reg: u32,
}

impl FuncState {
    fn new(source: StringId, line_defined: u32, first_local: usize) -> Self {
        let mut proto = Proto::new();
        proto.source = Some(source);
        proto.line_defined = line_defined;
        FuncState {
            proto,
            jpc: NO_JUMP,
            first_local,
            ..Default::default()
        }
    }

    /// Move the constant pool into the prototype and release spare capacity.
    fn finish(mut self) -> Proto {
        self.proto.constants = self.constants.into_iter().collect();
        self.proto.trim();
        self.proto
    }
}

/// The compiler: holds the lexer, the active function state and its parents.
pub struct Compiler<'a> {
    lexer: Lexer<'a>,
    /// Function currently being compiled.
    fs: FuncState,
    /// Enclosing functions, outermost first.
    enclosing: Vec<FuncState>,
    /// Locals, gotos and labels shared by the whole function stack.
    dyd: Dyndata,
    /// Current syntactic nesting depth.
    nccalls: u32,
    /// Chunk name as stored in every prototype.
    source: StringId,
    env_name: StringId,
    break_name: StringId,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a [u8], chunkname: &str) -> Self {
        let mut lexer = Lexer::new(source, chunkname);
        let source_id = lexer.strings.intern(chunkname.as_bytes());
        let env_name = lexer.strings.intern(b"_ENV");
        let break_name = lexer.strings.intern(b"break");
        Compiler {
            lexer,
            fs: FuncState::new(source_id, 0, 0),
            enclosing: Vec::new(),
            dyd: Dyndata::default(),
            nccalls: 0,
            source: source_id,
            env_name,
            break_name,
        }
    }

    /// Compile the main chunk: a vararg function with `_ENV` as its only upvalue.
    fn main_func(&mut self) -> Result<Proto, CompileError> {
        self.enter_block(false);
        self.fs.proto.is_vararg = true;
        self.fs.proto.upvalues.push(UpvalDesc {
            name: Some(self.env_name),
            in_stack: true,
            index: 0,
        });
        self.lexer.advance()?;
        self.statlist()?;
        self.check(&Token::Eof)?;
        self.close_func()
    }

    /// Start compiling a nested function defined at `line`.
    fn open_func(&mut self, line: u32) {
        let child = FuncState::new(self.source, line, self.dyd.actvar.len());
        let parent = std::mem::replace(&mut self.fs, child);
        self.enclosing.push(parent);
        self.enter_block(false);
    }

    /// Finish the active function and return to its parent.
    fn close_func(&mut self) -> Result<Proto, CompileError> {
        self.ret(0, 0)?;
        self.leave_block()?;
        let fs = match self.enclosing.pop() {
            Some(parent) => std::mem::replace(&mut self.fs, parent),
            None => std::mem::take(&mut self.fs),
        };
        let proto = fs.finish();
        log::debug!(
            "closed function at line {}: {} instructions, {} constants, {} upvalues, {} slots",
            proto.line_defined,
            proto.code.len(),
            proto.constants.len(),
            proto.upvalues.len(),
            proto.max_stack_size
        );
        Ok(proto)
    }

    // ---- Errors ----

    /// Syntax error pointing at the current token.
    fn syntax_error(&self, msg: &str) -> CompileError {
        self.lexer.error_near_current(ErrorKind::Syntax, msg)
    }

    /// Semantic error without a `near` part.
    fn sem_error(&self, msg: impl Into<String>) -> CompileError {
        self.lexer.error(ErrorKind::Semantic, msg)
    }

    fn error_expected(&self, token: &Token) -> CompileError {
        self.syntax_error(&format!("{token} expected"))
    }

    /// Limit error for the function defined at `line_defined`.
    fn error_limit(&self, line_defined: u32, limit: usize, what: &str) -> CompileError {
        let msg = if line_defined == 0 {
            format!("main function has more than {limit} {what}")
        } else {
            format!("function at line {line_defined} has more than {limit} {what}")
        };
        self.lexer.error(ErrorKind::Limit, msg)
    }

    fn check_limit(&self, value: usize, limit: usize, what: &str) -> Result<(), CompileError> {
        if value > limit {
            return Err(self.error_limit(self.fs.proto.line_defined, limit, what));
        }
        Ok(())
    }

    fn enter_level(&mut self) -> Result<(), CompileError> {
        self.nccalls += 1;
        if self.nccalls > MAX_CCALLS {
            return Err(self.lexer.error(ErrorKind::Limit, "chunk has too many syntax levels"));
        }
        Ok(())
    }

    fn leave_level(&mut self) {
        self.nccalls -= 1;
    }

    // ---- Token helpers ----

    fn token(&self) -> &Token {
        self.lexer.token()
    }

    fn line(&self) -> u32 {
        self.lexer.line()
    }

    fn next(&mut self) -> Result<(), CompileError> {
        self.lexer.advance()
    }

    fn check(&self, expected: &Token) -> Result<(), CompileError> {
        if self.token() != expected {
            return Err(self.error_expected(expected));
        }
        Ok(())
    }

    fn check_next(&mut self, expected: &Token) -> Result<(), CompileError> {
        self.check(expected)?;
        self.next()
    }

    fn test_next(&mut self, expected: &Token) -> Result<bool, CompileError> {
        if self.token() == expected {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Expect `what` closing `who` opened at `line`.
    fn check_match(&mut self, what: &Token, who: &Token, line: u32) -> Result<(), CompileError> {
        if self.test_next(what)? {
            return Ok(());
        }
        if line == self.line() {
            Err(self.error_expected(what))
        } else {
            Err(self.syntax_error(&format!("{what} expected (to close {who} at line {line})")))
        }
    }

    fn str_check_name(&mut self) -> Result<StringId, CompileError> {
        match *self.token() {
            Token::Name(id) => {
                self.next()?;
                Ok(id)
            }
            _ => Err(self.error_expected(&Token::Name(StringId(0)))),
        }
    }

    /// Read a name and turn it into a string constant expression.
    fn check_name(&mut self) -> Result<ExprDesc, CompileError> {
        let name = self.str_check_name()?;
        self.code_string(name)
    }

    fn code_string(&mut self, id: StringId) -> Result<ExprDesc, CompileError> {
        let k = self.string_k(id)?;
        Ok(ExprDesc::new(ExprKind::K(k)))
    }

    /// Returns true if the current token closes a block.
    fn block_follow(&self, with_until: bool) -> bool {
        match self.token() {
            Token::Else | Token::ElseIf | Token::End | Token::Eof => true,
            Token::Until => with_until,
            _ => false,
        }
    }
}
