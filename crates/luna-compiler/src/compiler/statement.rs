//! Statement parsing: control flow, loops, assignments, declarations,
//! returns, gotos and labels.

use super::expr::{ExprDesc, ExprKind};
use super::Compiler;
use crate::error::CompileError;
use crate::limits::{MAX_CCALLS, MULTRET, NO_JUMP};
use crate::opcode::OpCode;
use crate::token::Token;
use luna_core::string::StringId;

impl<'a> Compiler<'a> {
    /// Statements up to the end of the enclosing block. `return` must be last.
    pub(super) fn statlist(&mut self) -> Result<(), CompileError> {
        while !self.block_follow(true) {
            if *self.token() == Token::Return {
                return self.statement();
            }
            self.statement()?;
        }
        Ok(())
    }

    fn statement(&mut self) -> Result<(), CompileError> {
        let line = self.line();
        self.enter_level()?;
        match self.token().clone() {
            Token::Semi => self.next()?,
            Token::If => self.if_stat(line)?,
            Token::While => self.while_stat(line)?,
            Token::Do => {
                self.next()?;
                self.block()?;
                self.check_match(&Token::End, &Token::Do, line)?;
            }
            Token::For => self.for_stat(line)?,
            Token::Repeat => self.repeat_stat(line)?,
            Token::Function => self.func_stat(line)?,
            Token::Local => {
                self.next()?;
                if self.test_next(&Token::Function)? {
                    self.local_func()?;
                } else {
                    self.local_stat()?;
                }
            }
            Token::DoubleColon => {
                self.next()?;
                let name = self.str_check_name()?;
                self.label_stat(name, line)?;
            }
            Token::Return => {
                self.next()?;
                self.ret_stat()?;
            }
            Token::Break | Token::Goto => {
                let j = self.jump()?;
                self.goto_stat(j)?;
            }
            _ => self.expr_stat()?,
        }
        debug_assert!(
            self.fs.proto.max_stack_size as u32 >= self.fs.free_reg
                && self.fs.free_reg >= self.fs.nactvar
        );
        // Statements leave no temporaries behind.
        self.fs.free_reg = self.fs.nactvar;
        self.leave_level();
        Ok(())
    }

    fn block(&mut self) -> Result<(), CompileError> {
        self.enter_block(false);
        self.statlist()?;
        self.leave_block()
    }

    /// Condition of a loop or branch; returns its false exit list.
    fn cond(&mut self) -> Result<i32, CompileError> {
        let mut v = self.expr()?;
        if v.kind == ExprKind::Nil {
            v.kind = ExprKind::False;
        }
        self.go_if_true(&mut v)?;
        Ok(v.f)
    }

    // ---- Control flow ----

    /// IF cond THEN block {ELSEIF cond THEN block} [ELSE block] END
    fn if_stat(&mut self, line: u32) -> Result<(), CompileError> {
        let mut escape = self.test_then_block(NO_JUMP)?;
        while *self.token() == Token::ElseIf {
            escape = self.test_then_block(escape)?;
        }
        if self.test_next(&Token::Else)? {
            self.block()?;
        }
        self.check_match(&Token::End, &Token::If, line)?;
        self.patch_to_here(escape)
    }

    /// [IF | ELSEIF] cond THEN block; returns the updated exit list.
    fn test_then_block(&mut self, escape: i32) -> Result<i32, CompileError> {
        self.next()?;
        let mut v = self.expr()?;
        self.check_next(&Token::Then)?;
        let jf;
        if matches!(self.token(), Token::Goto | Token::Break) {
            // `if c then goto l` jumps straight on the true condition.
            self.go_if_false(&mut v)?;
            self.enter_block(false);
            self.goto_stat(v.t)?;
            self.skip_noop_stat()?;
            if self.block_follow(false) {
                self.leave_block()?;
                return Ok(escape);
            }
            jf = self.jump()?;
        } else {
            self.go_if_true(&mut v)?;
            self.enter_block(false);
            jf = v.f;
        }
        self.statlist()?;
        self.leave_block()?;
        let escape = if matches!(self.token(), Token::Else | Token::ElseIf) {
            let j = self.jump()?;
            self.concat_jumps(escape, j)?
        } else {
            escape
        };
        self.patch_to_here(jf)?;
        Ok(escape)
    }

    /// WHILE cond DO block END
    fn while_stat(&mut self, line: u32) -> Result<(), CompileError> {
        self.next()?;
        let while_init = self.get_label();
        let cond_exit = self.cond()?;
        self.enter_block(true);
        self.check_next(&Token::Do)?;
        self.block()?;
        let back = self.jump()?;
        self.patch_list(back, while_init)?;
        self.check_match(&Token::End, &Token::While, line)?;
        self.leave_block()?;
        self.patch_to_here(cond_exit)
    }

    /// REPEAT block UNTIL cond
    fn repeat_stat(&mut self, line: u32) -> Result<(), CompileError> {
        let repeat_init = self.get_label();
        self.enter_block(true);
        self.enter_block(false);
        self.next()?;
        self.statlist()?;
        self.check_match(&Token::Until, &Token::Repeat, line)?;
        // The condition sees the body's locals.
        let cond_exit = self.cond()?;
        if let Some(scope) = self.fs.blocks.last().copied() {
            if scope.upval {
                self.patch_close(cond_exit, scope.nactvar);
            }
        }
        self.leave_block()?;
        self.patch_list(cond_exit, repeat_init)?;
        self.leave_block()
    }

    // ---- Loops ----

    /// FOR (fornum | forlist) END
    fn for_stat(&mut self, line: u32) -> Result<(), CompileError> {
        self.enter_block(true);
        self.next()?;
        let var_name = self.str_check_name()?;
        match self.token() {
            Token::Assign => self.for_num(var_name, line)?,
            Token::Comma | Token::In => self.for_list(var_name)?,
            _ => return Err(self.syntax_error("'=' or 'in' expected")),
        }
        self.check_match(&Token::End, &Token::For, line)?;
        self.leave_block()
    }

    /// NAME = exp1, exp1 [, exp1] forbody
    fn for_num(&mut self, var_name: StringId, line: u32) -> Result<(), CompileError> {
        let base = self.fs.free_reg;
        self.new_local_var_literal("(for index)")?;
        self.new_local_var_literal("(for limit)")?;
        self.new_local_var_literal("(for step)")?;
        self.new_local_var(var_name)?;
        self.check_next(&Token::Assign)?;
        self.exp1()?;
        self.check_next(&Token::Comma)?;
        self.exp1()?;
        if self.test_next(&Token::Comma)? {
            self.exp1()?;
        } else {
            let k = self.number_k(1.0)?;
            let reg = self.fs.free_reg;
            self.code_k(reg, k)?;
            self.reserve_regs(1)?;
        }
        self.for_body(base, line, 1, true)
    }

    /// NAME {, NAME} IN explist forbody
    fn for_list(&mut self, index_name: StringId) -> Result<(), CompileError> {
        let base = self.fs.free_reg;
        let mut nvars = 4;
        self.new_local_var_literal("(for generator)")?;
        self.new_local_var_literal("(for state)")?;
        self.new_local_var_literal("(for control)")?;
        self.new_local_var(index_name)?;
        while self.test_next(&Token::Comma)? {
            let name = self.str_check_name()?;
            self.new_local_var(name)?;
            nvars += 1;
        }
        self.check_next(&Token::In)?;
        let line = self.line();
        let (mut e, nexps) = self.explist()?;
        self.adjust_assign(3, nexps, &mut e)?;
        // Room for the generator call.
        self.check_stack(3)?;
        self.for_body(base, line, nvars - 3, false)
    }

    /// DO block, with the loop control instructions around it.
    fn for_body(&mut self, base: u32, line: u32, nvars: u32, is_num: bool) -> Result<(), CompileError> {
        self.adjust_local_vars(3);
        self.check_next(&Token::Do)?;
        let prep = if is_num {
            self.code_asbx(OpCode::ForPrep, base, NO_JUMP)? as i32
        } else {
            self.jump()?
        };
        self.enter_block(false);
        self.adjust_local_vars(nvars);
        self.reserve_regs(nvars)?;
        self.block()?;
        self.leave_block()?;
        self.patch_to_here(prep)?;
        let end_for = if is_num {
            self.code_asbx(OpCode::ForLoop, base, NO_JUMP)?
        } else {
            self.code_abc(OpCode::TForCall, base, 0, nvars)?;
            self.fix_line(line);
            self.code_asbx(OpCode::TForLoop, base + 2, NO_JUMP)?
        };
        self.patch_list(end_for as i32, prep as usize + 1)?;
        self.fix_line(line);
        Ok(())
    }

    /// One numeric loop control expression, in the next register.
    fn exp1(&mut self) -> Result<(), CompileError> {
        let mut e = self.expr()?;
        self.exp_to_next_reg(&mut e)
    }

    // ---- Declarations ----

    /// FUNCTION funcname body
    fn func_stat(&mut self, line: u32) -> Result<(), CompileError> {
        self.next()?;
        let (var, is_method) = self.func_name()?;
        let mut b = self.body(is_method, line)?;
        self.store_var(&var, &mut b)?;
        self.fix_line(line);
        Ok(())
    }

    /// NAME {'.' NAME} [':' NAME]
    fn func_name(&mut self) -> Result<(ExprDesc, bool), CompileError> {
        let mut v = self.single_var()?;
        while *self.token() == Token::Dot {
            self.field_sel(&mut v)?;
        }
        let is_method = *self.token() == Token::Colon;
        if is_method {
            self.field_sel(&mut v)?;
        }
        Ok((v, is_method))
    }

    /// LOCAL FUNCTION NAME body
    fn local_func(&mut self) -> Result<(), CompileError> {
        let name = self.str_check_name()?;
        self.new_local_var(name)?;
        // Visible inside its own body for recursion.
        self.adjust_local_vars(1);
        let line = self.line();
        let b = self.body(false, line)?;
        let reg = b.reg().unwrap_or(self.fs.nactvar - 1);
        let pc = self.pc();
        self.set_local_start(reg, pc);
        Ok(())
    }

    /// LOCAL NAME {',' NAME} ['=' explist]
    fn local_stat(&mut self) -> Result<(), CompileError> {
        let mut nvars = 0;
        loop {
            let name = self.str_check_name()?;
            self.new_local_var(name)?;
            nvars += 1;
            if !self.test_next(&Token::Comma)? {
                break;
            }
        }
        let (mut e, nexps) = if self.test_next(&Token::Assign)? {
            self.explist()?
        } else {
            (ExprDesc::void(), 0)
        };
        self.adjust_assign(nvars, nexps, &mut e)?;
        self.adjust_local_vars(nvars);
        Ok(())
    }

    /// Balance `nexps` values against `nvars` targets: extend the last open
    /// call or vararg, pad with nils, or leave extra values to be dropped.
    fn adjust_assign(&mut self, nvars: u32, nexps: u32, e: &mut ExprDesc) -> Result<(), CompileError> {
        let mut extra = nvars as i32 - nexps as i32;
        if e.has_multret() {
            extra = (extra + 1).max(0);
            self.set_returns(e, extra)?;
            if extra > 1 {
                self.reserve_regs(extra as u32 - 1)?;
            }
        } else {
            if e.kind != ExprKind::Void {
                self.exp_to_next_reg(e)?;
            }
            if extra > 0 {
                let reg = self.fs.free_reg;
                self.reserve_regs(extra as u32)?;
                self.code_nil(reg, extra as u32)?;
            }
        }
        Ok(())
    }

    // ---- Expression statements ----

    /// A call statement or an assignment.
    fn expr_stat(&mut self) -> Result<(), CompileError> {
        let v = self.suffixed_exp()?;
        if matches!(self.token(), Token::Assign | Token::Comma) {
            return self.assignment(v);
        }
        match v.kind {
            ExprKind::Call(pc) => {
                // Discard all results.
                self.fs.proto.get_mut(pc).set_c(1);
                Ok(())
            }
            _ => Err(self.syntax_error("syntax error")),
        }
    }

    /// target {',' target} '=' explist
    fn assignment(&mut self, first: ExprDesc) -> Result<(), CompileError> {
        let mut targets = vec![first];
        loop {
            let last = targets[targets.len() - 1];
            if !last.is_var() {
                return Err(self.syntax_error("syntax error"));
            }
            if !self.test_next(&Token::Comma)? {
                break;
            }
            let v = self.suffixed_exp()?;
            if !matches!(v.kind, ExprKind::Indexed { .. }) {
                self.check_conflict(&mut targets, &v)?;
            }
            self.check_limit(
                targets.len() + self.nccalls as usize,
                MAX_CCALLS as usize,
                "C levels",
            )?;
            targets.push(v);
        }
        self.check_next(&Token::Assign)?;
        let nvars = targets.len() as u32;
        let (mut e, nexps) = self.explist()?;
        let (rest, last) = targets.split_at(targets.len() - 1);
        if nexps == nvars {
            self.set_one_ret(&mut e);
            self.store_var(&last[0], &mut e)?;
        } else {
            self.adjust_assign(nvars, nexps, &mut e)?;
            if nexps > nvars {
                // Drop the extra values.
                self.fs.free_reg -= nexps - nvars;
            }
            let mut e = ExprDesc::new(ExprKind::NonReloc(self.fs.free_reg - 1));
            self.store_var(&last[0], &mut e)?;
        }
        for target in rest.iter().rev() {
            let mut e = ExprDesc::new(ExprKind::NonReloc(self.fs.free_reg - 1));
            self.store_var(target, &mut e)?;
        }
        Ok(())
    }

    /// If a later target `v` is a local or upvalue used as a table or key by
    /// an earlier indexed target, copy it to a fresh register first so the
    /// earlier store sees the old value.
    fn check_conflict(&mut self, targets: &mut [ExprDesc], v: &ExprDesc) -> Result<(), CompileError> {
        let (info, v_in_upval) = match v.kind {
            ExprKind::Local(reg) => (reg, false),
            ExprKind::Upval(idx) => (idx, true),
            _ => return Ok(()),
        };
        let extra = self.fs.free_reg;
        let mut conflict = false;
        for lh in targets.iter_mut() {
            if let ExprKind::Indexed { table, key, in_upval } = &mut lh.kind {
                if *in_upval == v_in_upval && *table == info {
                    conflict = true;
                    *in_upval = false;
                    *table = extra;
                }
                if !v_in_upval && *key == info {
                    conflict = true;
                    *key = extra;
                }
            }
        }
        if conflict {
            let op = if v_in_upval { OpCode::GetUpval } else { OpCode::Move };
            self.code_abc(op, extra, info, 0)?;
            self.reserve_regs(1)?;
        }
        Ok(())
    }

    // ---- Return ----

    /// RETURN [explist] [';']
    fn ret_stat(&mut self) -> Result<(), CompileError> {
        let (first, nret) = if self.block_follow(true) || *self.token() == Token::Semi {
            (0, 0)
        } else {
            let (mut e, n) = self.explist()?;
            if e.has_multret() {
                self.set_multret(&e)?;
                if let ExprKind::Call(pc) = e.kind {
                    if n == 1 {
                        self.fs.proto.get_mut(pc).set_opcode(OpCode::TailCall);
                    }
                }
                (self.fs.nactvar, MULTRET)
            } else if n == 1 {
                (self.exp_to_any_reg(&mut e)?, 1)
            } else {
                self.exp_to_next_reg(&mut e)?;
                debug_assert_eq!(n, self.fs.free_reg - self.fs.nactvar);
                (self.fs.nactvar, n as i32)
            }
        };
        self.ret(first, nret)?;
        self.test_next(&Token::Semi)?;
        Ok(())
    }

    // ---- Goto and labels ----

    /// GOTO NAME | BREAK, with `pc` the jump (or jump list) to resolve.
    fn goto_stat(&mut self, pc: i32) -> Result<(), CompileError> {
        let line = self.line();
        let label = if self.test_next(&Token::Goto)? {
            self.str_check_name()?
        } else {
            self.next()?;
            self.break_name
        };
        let g = self.new_goto_entry(label, line, pc);
        self.find_label(g)?;
        Ok(())
    }

    /// '::' NAME '::'
    fn label_stat(&mut self, label: StringId, line: u32) -> Result<(), CompileError> {
        self.check_repeated(label)?;
        self.check_next(&Token::DoubleColon)?;
        let pc = self.get_label();
        let l = self.new_label_entry(label, line, pc);
        self.find_gotos(l)
    }

    /// Skip statements that generate no code.
    fn skip_noop_stat(&mut self) -> Result<(), CompileError> {
        while matches!(self.token(), Token::Semi | Token::DoubleColon) {
            self.statement()?;
        }
        Ok(())
    }
}
