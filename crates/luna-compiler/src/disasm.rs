//! Bytecode listings in the style of `luac -l` and `luac -l -l`.

use crate::opcode::{index_k, is_k, Instruction, InstructionFormat, OpArgMode, OpCode};
use crate::proto::{Constant, Proto};
use luna_core::number::fmt_number;
use luna_core::string::StringInterner;
use std::fmt::{self, Write};

/// Disassemble a prototype tree with constants, locals and upvalues.
pub fn disassemble(proto: &Proto, strings: &StringInterner) -> String {
    Listing::new(proto, strings).full(true).to_string()
}

/// A printable listing of a prototype and its nested functions.
pub struct Listing<'a> {
    proto: &'a Proto,
    strings: &'a StringInterner,
    full: bool,
}

impl<'a> Listing<'a> {
    pub fn new(proto: &'a Proto, strings: &'a StringInterner) -> Self {
        Listing { proto, strings, full: false }
    }

    /// Also list constants, locals and upvalues.
    pub fn full(mut self, full: bool) -> Self {
        self.full = full;
        self
    }

    fn write_function(&self, f: &mut fmt::Formatter<'_>, p: &Proto, is_main: bool) -> fmt::Result {
        self.write_header(f, p, is_main)?;
        for pc in 0..p.code.len() {
            self.write_instruction(f, p, pc)?;
        }
        if self.full {
            self.write_debug(f, p)?;
        }
        for child in &p.protos {
            self.write_function(f, child, false)?;
        }
        Ok(())
    }

    fn write_header(&self, f: &mut fmt::Formatter<'_>, p: &Proto, is_main: bool) -> fmt::Result {
        let source = match p.source {
            Some(id) => {
                let name = self.strings.get_str_lossy(id);
                match name.strip_prefix(&['@', '='][..]) {
                    Some(rest) => rest.to_string(),
                    None => "(string)".to_string(),
                }
            }
            None => "?".to_string(),
        };
        let n = p.code.len();
        writeln!(f)?;
        writeln!(
            f,
            "{} <{}:{},{}> ({} instruction{})",
            if is_main { "main" } else { "function" },
            source,
            p.line_defined,
            p.last_line_defined,
            n,
            plural(n)
        )?;
        writeln!(
            f,
            "{}{} param{}, {} slot{}, {} upvalue{}, {} local{}, {} constant{}, {} function{}",
            p.num_params,
            if p.is_vararg { "+" } else { "" },
            plural(p.num_params as usize),
            p.max_stack_size,
            plural(p.max_stack_size as usize),
            p.upvalues.len(),
            plural(p.upvalues.len()),
            p.local_vars.len(),
            plural(p.local_vars.len()),
            p.constants.len(),
            plural(p.constants.len()),
            p.protos.len(),
            plural(p.protos.len())
        )
    }

    fn write_instruction(&self, f: &mut fmt::Formatter<'_>, p: &Proto, pc: usize) -> fmt::Result {
        let inst = p.code[pc];
        let line = p.get_line(pc);
        write!(f, "\t{}\t", pc + 1)?;
        if line > 0 {
            write!(f, "[{line}]\t")?;
        } else {
            write!(f, "[-]\t")?;
        }
        if !inst.has_valid_opcode() {
            return writeln!(f, "<invalid {:#010x}>", inst.0);
        }
        let op = inst.opcode();
        write!(f, "{:<9}\t{}", op.name(), operands(inst))?;
        let comment = self.comment(p, pc, inst);
        if !comment.is_empty() {
            write!(f, "\t; {comment}")?;
        }
        writeln!(f)
    }

    /// The comment column: constants, upvalue names and jump targets.
    fn comment(&self, p: &Proto, pc: usize, inst: Instruction) -> String {
        let (a, b, c) = (inst.a(), inst.b(), inst.c());
        let mut out = String::new();
        match inst.opcode() {
            OpCode::LoadK => out = self.constant(p, inst.bx()),
            OpCode::GetUpval | OpCode::SetUpval => out = self.upvalue_name(p, b),
            OpCode::GetTabUp => {
                out = self.upvalue_name(p, b);
                if is_k(c) {
                    let _ = write!(out, " {}", self.constant(p, index_k(c)));
                }
            }
            OpCode::SetTabUp => {
                out = self.upvalue_name(p, a);
                for rk in [b, c] {
                    if is_k(rk) {
                        let _ = write!(out, " {}", self.constant(p, index_k(rk)));
                    }
                }
            }
            OpCode::GetTable | OpCode::Self_ => {
                if is_k(c) {
                    out = self.constant(p, index_k(c));
                }
            }
            OpCode::SetTable
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Eq
            | OpCode::Lt
            | OpCode::Le => {
                if is_k(b) || is_k(c) {
                    out = format!("{} {}", self.rk_text(p, b), self.rk_text(p, c));
                }
            }
            OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep | OpCode::TForLoop => {
                out = format!("to {}", pc as i32 + inst.sbx() + 2);
            }
            OpCode::Closure => out = format!("function [{}]", inst.bx()),
            OpCode::SetList => {
                if c == 0 {
                    let batch = p.code.get(pc + 1).map_or(0, |next| next.ax_field());
                    out = batch.to_string();
                } else {
                    out = c.to_string();
                }
            }
            _ => {}
        }
        out
    }

    fn rk_text(&self, p: &Proto, rk: u32) -> String {
        if is_k(rk) {
            self.constant(p, index_k(rk))
        } else {
            "-".to_string()
        }
    }

    fn constant(&self, p: &Proto, idx: u32) -> String {
        match p.constants.get(idx as usize) {
            Some(k) => format_constant(k, self.strings),
            None => "?".to_string(),
        }
    }

    fn upvalue_name(&self, p: &Proto, idx: u32) -> String {
        p.upvalues
            .get(idx as usize)
            .and_then(|uv| uv.name)
            .map_or_else(|| "-".to_string(), |id| self.strings.get_str_lossy(id).into_owned())
    }

    fn write_debug(&self, f: &mut fmt::Formatter<'_>, p: &Proto) -> fmt::Result {
        writeln!(f, "constants ({}):", p.constants.len())?;
        for (i, k) in p.constants.iter().enumerate() {
            writeln!(f, "\t{}\t{}", i + 1, format_constant(k, self.strings))?;
        }
        writeln!(f, "locals ({}):", p.local_vars.len())?;
        for (i, var) in p.local_vars.iter().enumerate() {
            writeln!(
                f,
                "\t{}\t{}\t{}\t{}",
                i,
                self.strings.get_str_lossy(var.name),
                var.start_pc + 1,
                var.end_pc + 1
            )?;
        }
        writeln!(f, "upvalues ({}):", p.upvalues.len())?;
        for (i, uv) in p.upvalues.iter().enumerate() {
            let name = uv
                .name
                .map_or_else(|| "-".to_string(), |id| self.strings.get_str_lossy(id).into_owned());
            writeln!(f, "\t{}\t{}\t{}\t{}", i, name, uv.in_stack as u8, uv.index)?;
        }
        Ok(())
    }
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_function(f, self.proto, true)
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Constants in RK positions are shown as `-1-k`.
fn rk_operand(x: u32) -> i64 {
    if is_k(x) {
        -1 - index_k(x) as i64
    } else {
        x as i64
    }
}

/// Operand column of an instruction.
fn operands(inst: Instruction) -> String {
    let op = inst.opcode();
    let mut out = String::new();
    match op.format() {
        InstructionFormat::IABC => {
            let _ = write!(out, "{}", inst.a());
            if op.b_mode() != OpArgMode::N {
                let b = if op.b_mode() == OpArgMode::K { rk_operand(inst.b()) } else { inst.b() as i64 };
                let _ = write!(out, " {b}");
            }
            if op.c_mode() != OpArgMode::N {
                let c = if op.c_mode() == OpArgMode::K { rk_operand(inst.c()) } else { inst.c() as i64 };
                let _ = write!(out, " {c}");
            }
        }
        InstructionFormat::IABx => {
            let _ = write!(out, "{}", inst.a());
            match op.b_mode() {
                OpArgMode::K => {
                    let _ = write!(out, " {}", -1 - inst.bx() as i64);
                }
                OpArgMode::U | OpArgMode::R => {
                    let _ = write!(out, " {}", inst.bx());
                }
                OpArgMode::N => {}
            }
        }
        InstructionFormat::IAsBx => {
            let _ = write!(out, "{} {}", inst.a(), inst.sbx());
        }
        InstructionFormat::IAx => {
            let _ = write!(out, "{}", -1 - inst.ax_field() as i64);
        }
    }
    out
}

/// Render a constant the way a listing shows it: strings quoted and escaped.
pub fn format_constant(k: &Constant, strings: &StringInterner) -> String {
    match k {
        Constant::Nil => "nil".to_string(),
        Constant::Boolean(b) => b.to_string(),
        Constant::Number(n) => fmt_number(*n),
        Constant::String(id) => quote_bytes(strings.get_bytes(*id)),
    }
}

fn quote_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x07 => out.push_str("\\a"),
            0x08 => out.push_str("\\b"),
            0x0c => out.push_str("\\f"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x0b => out.push_str("\\v"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{b:03}");
            }
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn listing(source: &str) -> String {
        let (p, strings) = compile(source.as_bytes(), "=test").unwrap();
        disassemble(&p, &strings)
    }

    #[test]
    fn test_header() {
        let out = listing("return");
        assert!(out.contains("main <test:0,0> (2 instructions)"));
        assert!(out.contains("0+ params, 2 slots, 1 upvalue, 0 locals, 0 constants, 0 functions"));
    }

    #[test]
    fn test_loadk_comment() {
        let out = listing("local x = 'hi'");
        assert!(out.contains("LOADK    \t0 -1\t; \"hi\""));
    }

    #[test]
    fn test_gettabup_comment() {
        let out = listing("print(1)");
        assert!(out.contains("GETTABUP \t0 0 -1\t; _ENV \"print\""));
    }

    #[test]
    fn test_jump_target() {
        let out = listing("while x do end");
        assert!(out.contains("JMP      \t0 -4\t; to 1"));
    }

    #[test]
    fn test_debug_sections() {
        let out = listing("local a = 1");
        assert!(out.contains("constants (1):\n\t1\t1\n"));
        assert!(out.contains("locals (1):\n\t0\ta\t2\t3\n"));
        assert!(out.contains("upvalues (1):\n\t0\t_ENV\t1\t0\n"));
    }

    #[test]
    fn test_short_listing_omits_debug() {
        let (p, strings) = compile(b"local a = 1", "=test").unwrap();
        let out = Listing::new(&p, &strings).to_string();
        assert!(out.contains("LOADK"));
        assert!(!out.contains("constants ("));
    }

    #[test]
    fn test_nested_function_listed() {
        let out = listing("local function f()\nend");
        assert!(out.contains("CLOSURE  \t0 0\t; function [0]"));
        assert!(out.contains("function <test:1,2> (1 instruction)"));
    }

    #[test]
    fn test_quote_bytes() {
        assert_eq!(quote_bytes(b"a\"b\n"), "\"a\\\"b\\n\"");
        assert_eq!(quote_bytes(&[0, 200]), "\"\\000\\200\"");
    }

    #[test]
    fn test_rk_operands() {
        let inst = Instruction::abc(OpCode::Add, 0, 256, 1);
        assert_eq!(operands(inst), "0 -1 1");
        let inst = Instruction::abc(OpCode::Return, 0, 1, 0);
        assert_eq!(operands(inst), "0 1");
    }
}
