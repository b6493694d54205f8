//! Expression parsing: precedence climbing over the binary operator table,
//! suffix chains, table constructors, calls and function bodies.

use super::expr::{BinOp, ExprDesc, ExprKind, UnOp, UNARY_PRIORITY};
use super::Compiler;
use crate::error::{CompileError, ErrorKind};
use crate::limits::MULTRET;
use crate::opcode::{int2fb, OpCode, LFIELDS_PER_FLUSH, MAX_BX};
use crate::token::Token;

/// Table constructor state.
struct ConsControl {
    /// Last list item read.
    v: ExprDesc,
    /// Register holding the table.
    table: u32,
    /// Number of record fields.
    nh: u32,
    /// Number of list items.
    na: u32,
    /// List items waiting for a SETLIST.
    tostore: u32,
}

impl<'a> Compiler<'a> {
    pub(super) fn expr(&mut self) -> Result<ExprDesc, CompileError> {
        let (v, _) = self.subexpr(0)?;
        Ok(v)
    }

    /// Parse operators binding tighter than `limit`; returns the expression
    /// and the first operator left untreated.
    fn subexpr(&mut self, limit: u8) -> Result<(ExprDesc, Option<BinOp>), CompileError> {
        self.enter_level()?;
        let mut v = match UnOp::from_token(self.token()) {
            Some(uop) => {
                let line = self.line();
                self.next()?;
                let (mut v, _) = self.subexpr(UNARY_PRIORITY)?;
                self.prefix(uop, &mut v, line)?;
                v
            }
            None => self.simple_exp()?,
        };
        let mut op = BinOp::from_token(self.token());
        while let Some(binop) = op {
            let (left, right) = binop.priority();
            if left <= limit {
                break;
            }
            let line = self.line();
            self.next()?;
            self.infix(binop, &mut v)?;
            let (mut v2, next_op) = self.subexpr(right)?;
            self.posfix(binop, &mut v, &mut v2, line)?;
            op = next_op;
        }
        self.leave_level();
        Ok((v, op))
    }

    fn simple_exp(&mut self) -> Result<ExprDesc, CompileError> {
        let v = match self.token().clone() {
            Token::Number(n) => ExprDesc::new(ExprKind::Number(n)),
            Token::String(id) => self.code_string(id)?,
            Token::Nil => ExprDesc::new(ExprKind::Nil),
            Token::True => ExprDesc::new(ExprKind::True),
            Token::False => ExprDesc::new(ExprKind::False),
            Token::DotDotDot => {
                if !self.fs.proto.is_vararg {
                    return Err(self.lexer.error_near_current(
                        ErrorKind::Semantic,
                        "cannot use '...' outside a vararg function",
                    ));
                }
                let pc = self.code_abc(OpCode::VarArg, 0, 1, 0)?;
                ExprDesc::new(ExprKind::VarArg(pc))
            }
            Token::LBrace => return self.constructor(),
            Token::Function => {
                self.next()?;
                let line = self.line();
                return self.body(false, line);
            }
            _ => return self.suffixed_exp(),
        };
        self.next()?;
        Ok(v)
    }

    fn primary_exp(&mut self) -> Result<ExprDesc, CompileError> {
        match self.token() {
            Token::LParen => {
                let line = self.line();
                self.next()?;
                let mut v = self.expr()?;
                self.check_match(&Token::RParen, &Token::LParen, line)?;
                // Parentheses truncate calls and varargs to one value.
                self.discharge_vars(&mut v)?;
                Ok(v)
            }
            Token::Name(_) => self.single_var(),
            _ => Err(self.syntax_error("unexpected symbol")),
        }
    }

    /// primaryexp { '.' NAME | '[' exp ']' | ':' NAME funcargs | funcargs }
    pub(super) fn suffixed_exp(&mut self) -> Result<ExprDesc, CompileError> {
        let line = self.line();
        let mut v = self.primary_exp()?;
        loop {
            match self.token() {
                Token::Dot => self.field_sel(&mut v)?,
                Token::LBracket => {
                    self.exp_to_any_reg_up(&mut v)?;
                    let mut key = self.yindex()?;
                    self.indexed(&mut v, &mut key)?;
                }
                Token::Colon => {
                    self.next()?;
                    let mut key = self.check_name()?;
                    self.code_self(&mut v, &mut key)?;
                    self.func_args(&mut v, line)?;
                }
                Token::LParen | Token::String(_) | Token::LBrace => {
                    self.exp_to_next_reg(&mut v)?;
                    self.func_args(&mut v, line)?;
                }
                _ => return Ok(v),
            }
        }
    }

    /// Resolve a name: local, upvalue, or `_ENV.name`.
    pub(super) fn single_var(&mut self) -> Result<ExprDesc, CompileError> {
        let name = self.str_check_name()?;
        if let Some(kind) = self.resolve_name(name)? {
            return Ok(ExprDesc::new(kind));
        }
        let env = self.resolve_name(self.env_name)?.unwrap_or(ExprKind::Upval(0));
        let mut var = ExprDesc::new(env);
        let mut key = self.code_string(name)?;
        self.indexed(&mut var, &mut key)?;
        Ok(var)
    }

    /// ['.' | ':'] NAME
    pub(super) fn field_sel(&mut self, v: &mut ExprDesc) -> Result<(), CompileError> {
        self.exp_to_any_reg_up(v)?;
        self.next()?;
        let mut key = self.check_name()?;
        self.indexed(v, &mut key)
    }

    /// '[' expr ']'
    fn yindex(&mut self) -> Result<ExprDesc, CompileError> {
        self.next()?;
        let mut v = self.expr()?;
        self.exp_to_val(&mut v)?;
        self.check_next(&Token::RBracket)?;
        Ok(v)
    }

    /// expr { ',' expr }; returns the last expression and the count.
    pub(super) fn explist(&mut self) -> Result<(ExprDesc, u32), CompileError> {
        let mut n = 1;
        let mut v = self.expr()?;
        while self.test_next(&Token::Comma)? {
            self.exp_to_next_reg(&mut v)?;
            v = self.expr()?;
            n += 1;
        }
        Ok((v, n))
    }

    fn func_args(&mut self, f: &mut ExprDesc, line: u32) -> Result<(), CompileError> {
        let mut args = match self.token().clone() {
            Token::LParen => {
                self.next()?;
                let args = if *self.token() == Token::RParen {
                    ExprDesc::void()
                } else {
                    let (args, _) = self.explist()?;
                    self.set_multret(&args)?;
                    args
                };
                self.check_match(&Token::RParen, &Token::LParen, line)?;
                args
            }
            Token::LBrace => self.constructor()?,
            Token::String(id) => {
                let args = self.code_string(id)?;
                self.next()?;
                args
            }
            _ => return Err(self.syntax_error("function arguments expected")),
        };
        let base = f.reg().unwrap_or(self.fs.nactvar);
        let nparams = if args.has_multret() {
            MULTRET
        } else {
            if args.kind != ExprKind::Void {
                self.exp_to_next_reg(&mut args)?;
            }
            (self.fs.free_reg - (base + 1)) as i32
        };
        let pc = self.code_abc(OpCode::Call, base, (nparams + 1) as u32, 2)?;
        f.kind = ExprKind::Call(pc);
        self.fix_line(line);
        // The call consumes the function and its arguments and leaves one result.
        self.fs.free_reg = base + 1;
        Ok(())
    }

    // ---- Table constructors ----

    fn constructor(&mut self) -> Result<ExprDesc, CompileError> {
        let line = self.line();
        let pc = self.code_abc(OpCode::NewTable, 0, 0, 0)?;
        let mut t = ExprDesc::new(ExprKind::Relocable(pc));
        self.exp_to_next_reg(&mut t)?;
        let mut cc = ConsControl {
            v: ExprDesc::void(),
            table: t.reg().unwrap_or(self.fs.free_reg - 1),
            nh: 0,
            na: 0,
            tostore: 0,
        };
        self.check_next(&Token::LBrace)?;
        loop {
            if *self.token() == Token::RBrace {
                break;
            }
            self.close_list_field(&mut cc)?;
            self.field(&mut cc)?;
            if !(self.test_next(&Token::Comma)? || self.test_next(&Token::Semi)?) {
                break;
            }
        }
        self.check_match(&Token::RBrace, &Token::LBrace, line)?;
        self.last_list_field(&mut cc)?;
        let inst = self.fs.proto.get_mut(pc);
        inst.set_b(int2fb(cc.na));
        inst.set_c(int2fb(cc.nh));
        Ok(t)
    }

    fn field(&mut self, cc: &mut ConsControl) -> Result<(), CompileError> {
        match self.token() {
            Token::Name(_) => {
                if *self.lexer.lookahead()? != Token::Assign {
                    self.list_field(cc)
                } else {
                    self.rec_field(cc)
                }
            }
            Token::LBracket => self.rec_field(cc),
            _ => self.list_field(cc),
        }
    }

    /// (NAME | '[' exp ']') '=' exp
    fn rec_field(&mut self, cc: &mut ConsControl) -> Result<(), CompileError> {
        let reg = self.fs.free_reg;
        let mut key = if matches!(self.token(), Token::Name(_)) {
            self.check_name()?
        } else {
            self.yindex()?
        };
        cc.nh += 1;
        self.check_next(&Token::Assign)?;
        let rk_key = self.exp_to_rk(&mut key)?;
        let mut val = self.expr()?;
        let rk_val = self.exp_to_rk(&mut val)?;
        self.code_abc(OpCode::SetTable, cc.table, rk_key, rk_val)?;
        self.fs.free_reg = reg;
        Ok(())
    }

    fn list_field(&mut self, cc: &mut ConsControl) -> Result<(), CompileError> {
        cc.v = self.expr()?;
        cc.na += 1;
        cc.tostore += 1;
        Ok(())
    }

    fn close_list_field(&mut self, cc: &mut ConsControl) -> Result<(), CompileError> {
        if cc.v.kind == ExprKind::Void {
            return Ok(());
        }
        self.exp_to_next_reg(&mut cc.v)?;
        cc.v = ExprDesc::void();
        if cc.tostore == LFIELDS_PER_FLUSH {
            self.set_list(cc.table, cc.na, cc.tostore as i32)?;
            cc.tostore = 0;
        }
        Ok(())
    }

    fn last_list_field(&mut self, cc: &mut ConsControl) -> Result<(), CompileError> {
        if cc.tostore == 0 {
            return Ok(());
        }
        if cc.v.has_multret() {
            self.set_multret(&cc.v)?;
            self.set_list(cc.table, cc.na, MULTRET)?;
            // The open item does not count towards the array size hint.
            cc.na -= 1;
        } else {
            if cc.v.kind != ExprKind::Void {
                self.exp_to_next_reg(&mut cc.v)?;
            }
            self.set_list(cc.table, cc.na, cc.tostore as i32)?;
        }
        Ok(())
    }

    // ---- Functions ----

    /// '(' parlist ')' block END, compiled as a nested function and loaded
    /// as a closure into the next register.
    pub(super) fn body(&mut self, is_method: bool, line: u32) -> Result<ExprDesc, CompileError> {
        self.check_limit(self.fs.proto.protos.len() + 1, MAX_BX as usize, "functions")?;
        self.open_func(line);
        self.check_next(&Token::LParen)?;
        if is_method {
            self.new_local_var_literal("self")?;
            self.adjust_local_vars(1);
        }
        self.par_list()?;
        self.check_next(&Token::RParen)?;
        self.statlist()?;
        self.fs.proto.last_line_defined = self.line();
        self.check_match(&Token::End, &Token::Function, line)?;
        let proto = self.close_func()?;
        self.fs.proto.protos.push(proto);
        let idx = self.fs.proto.protos.len() as u32 - 1;
        let pc = self.code_abx(OpCode::Closure, 0, idx)?;
        let mut e = ExprDesc::new(ExprKind::Relocable(pc));
        self.exp_to_next_reg(&mut e)?;
        Ok(e)
    }

    /// [ param { ',' param } ]
    fn par_list(&mut self) -> Result<(), CompileError> {
        let mut nparams = 0;
        self.fs.proto.is_vararg = false;
        if *self.token() != Token::RParen {
            loop {
                match *self.token() {
                    Token::Name(name) => {
                        self.next()?;
                        self.new_local_var(name)?;
                        nparams += 1;
                    }
                    Token::DotDotDot => {
                        self.next()?;
                        self.fs.proto.is_vararg = true;
                    }
                    _ => return Err(self.syntax_error("<name> or '...' expected")),
                }
                if self.fs.proto.is_vararg || !self.test_next(&Token::Comma)? {
                    break;
                }
            }
        }
        self.adjust_local_vars(nparams);
        self.fs.proto.num_params = self.fs.nactvar as u8;
        self.reserve_regs(self.fs.nactvar)
    }
}
