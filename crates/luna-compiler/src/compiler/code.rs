//! Code generation: instruction emission, jump lists, registers, constants
//! and expression discharge.
//!
//! Jump lists are threaded through the sBx fields of the pending JMP
//! instructions themselves; `NO_JUMP` terminates a list.

use super::expr::{BinOp, ExprDesc, ExprKind, UnOp};
use super::Compiler;
use crate::error::{CompileError, ErrorKind};
use crate::limits::{MAX_STACK, MULTRET, NO_JUMP};
use crate::opcode::{
    is_k, rk_as_k, Instruction, OpCode, LFIELDS_PER_FLUSH, MAX_AX, MAX_BX, MAX_C, MAX_INDEX_RK,
    MAX_SBX, NO_REG,
};
use crate::proto::Constant;
use luna_core::string::StringId;

impl<'a> Compiler<'a> {
    // ---- Emission ----

    /// Current pc (index of the next instruction).
    pub(super) fn pc(&self) -> usize {
        self.fs.proto.code_len()
    }

    fn code(&mut self, inst: Instruction) -> Result<usize, CompileError> {
        self.discharge_jpc()?;
        let line = self.lexer.lastline;
        log::trace!("emit {:?} at line {}", inst, line);
        Ok(self.fs.proto.emit(inst, line))
    }

    pub(super) fn code_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> Result<usize, CompileError> {
        self.code(Instruction::abc(op, a, b, c))
    }

    pub(super) fn code_abx(&mut self, op: OpCode, a: u32, bx: u32) -> Result<usize, CompileError> {
        self.code(Instruction::abx(op, a, bx))
    }

    pub(super) fn code_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> Result<usize, CompileError> {
        self.code(Instruction::asbx(op, a, sbx))
    }

    fn code_extra_arg(&mut self, ax: u32) -> Result<usize, CompileError> {
        self.code(Instruction::ax(OpCode::ExtraArg, ax))
    }

    /// Load constant `k` into `reg`, using LOADKX when the index does not fit Bx.
    pub(super) fn code_k(&mut self, reg: u32, k: u32) -> Result<usize, CompileError> {
        if k <= MAX_BX {
            self.code_abx(OpCode::LoadK, reg, k)
        } else {
            let pc = self.code_abx(OpCode::LoadKX, reg, 0)?;
            self.code_extra_arg(k)?;
            Ok(pc)
        }
    }

    /// Set `n` registers starting at `from` to nil, merging with a
    /// preceding LOADNIL when no jump targets the current pc.
    pub(super) fn code_nil(&mut self, from: u32, n: u32) -> Result<(), CompileError> {
        let pc = self.pc();
        let last = from + n - 1;
        if pc > self.fs.last_target {
            let prev = self.fs.proto.get_mut(pc - 1);
            if prev.opcode() == OpCode::LoadNil {
                let pfrom = prev.a();
                let plast = pfrom + prev.b();
                if (pfrom <= from && from <= plast + 1) || (from <= pfrom && pfrom <= last + 1) {
                    let new_from = pfrom.min(from);
                    let new_last = plast.max(last);
                    prev.set_a(new_from);
                    prev.set_b(new_last - new_from);
                    return Ok(());
                }
            }
        }
        self.code_abc(OpCode::LoadNil, from, n - 1, 0)?;
        Ok(())
    }

    pub(super) fn ret(&mut self, first: u32, nret: i32) -> Result<usize, CompileError> {
        self.code_abc(OpCode::Return, first, (nret + 1) as u32, 0)
    }

    /// Set the line of the last emitted instruction.
    pub(super) fn fix_line(&mut self, line: u32) {
        if let Some(last) = self.fs.proto.line_info.last_mut() {
            *last = line;
        }
    }

    // ---- Jump lists ----

    /// Emit an unconditional jump, absorbing any jumps pending to here.
    pub(super) fn jump(&mut self) -> Result<i32, CompileError> {
        let jpc = std::mem::replace(&mut self.fs.jpc, NO_JUMP);
        let j = self.code_asbx(OpCode::Jmp, 0, NO_JUMP)? as i32;
        self.concat_jumps(j, jpc)
    }

    fn cond_jump(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> Result<i32, CompileError> {
        self.code_abc(op, a, b, c)?;
        self.jump()
    }

    /// Mark the current pc as a jump target and return it.
    pub(super) fn get_label(&mut self) -> usize {
        self.fs.last_target = self.pc();
        self.fs.last_target
    }

    fn get_jump(&self, pc: usize) -> i32 {
        let offset = self.fs.proto.code[pc].sbx();
        if offset == NO_JUMP {
            NO_JUMP
        } else {
            pc as i32 + 1 + offset
        }
    }

    fn fix_jump(&mut self, pc: usize, dest: usize) -> Result<(), CompileError> {
        let offset = dest as i32 - (pc as i32 + 1);
        if offset.abs() > MAX_SBX {
            return Err(self.lexer.error_near_current(ErrorKind::Limit, "control structure too long"));
        }
        self.fs.proto.get_mut(pc).set_sbx(offset);
        Ok(())
    }

    /// The instruction controlling the jump at `pc`: its test, if any.
    fn jump_control(&self, pc: usize) -> usize {
        if pc >= 1 && self.fs.proto.code[pc - 1].opcode().is_test() {
            pc - 1
        } else {
            pc
        }
    }

    /// Append list `l2` to list `l1`, returning the combined list.
    pub(super) fn concat_jumps(&mut self, l1: i32, l2: i32) -> Result<i32, CompileError> {
        if l2 == NO_JUMP {
            return Ok(l1);
        }
        if l1 == NO_JUMP {
            return Ok(l2);
        }
        let mut list = l1 as usize;
        loop {
            let next = self.get_jump(list);
            if next == NO_JUMP {
                break;
            }
            list = next as usize;
        }
        self.fix_jump(list, l2 as usize)?;
        Ok(l1)
    }

    /// Returns true if some jump in the list needs a value in a register.
    fn need_value(&self, mut list: i32) -> bool {
        while list != NO_JUMP {
            let ctl = self.jump_control(list as usize);
            if self.fs.proto.code[ctl].opcode() != OpCode::TestSet {
                return true;
            }
            list = self.get_jump(list as usize);
        }
        false
    }

    /// Route a TESTSET's value to `reg`, or turn it into a TEST when there is
    /// no register to fill. Returns false if the jump is not a TESTSET.
    fn patch_test_reg(&mut self, node: usize, reg: u32) -> bool {
        let ctl = self.jump_control(node);
        let inst = self.fs.proto.get_mut(ctl);
        if inst.opcode() != OpCode::TestSet {
            return false;
        }
        if reg != NO_REG && reg != inst.b() {
            inst.set_a(reg);
        } else {
            *inst = Instruction::abc(OpCode::Test, inst.b(), 0, inst.c());
        }
        true
    }

    fn remove_values(&mut self, mut list: i32) {
        while list != NO_JUMP {
            self.patch_test_reg(list as usize, NO_REG);
            list = self.get_jump(list as usize);
        }
    }

    fn patch_list_aux(&mut self, mut list: i32, vtarget: usize, reg: u32, dtarget: usize) -> Result<(), CompileError> {
        while list != NO_JUMP {
            let node = list as usize;
            let next = self.get_jump(node);
            if self.patch_test_reg(node, reg) {
                self.fix_jump(node, vtarget)?;
            } else {
                self.fix_jump(node, dtarget)?;
            }
            list = next;
        }
        Ok(())
    }

    fn discharge_jpc(&mut self) -> Result<(), CompileError> {
        let jpc = std::mem::replace(&mut self.fs.jpc, NO_JUMP);
        let pc = self.pc();
        self.patch_list_aux(jpc, pc, NO_REG, pc)
    }

    /// Point every jump in `list` at `target`.
    pub(super) fn patch_list(&mut self, list: i32, target: usize) -> Result<(), CompileError> {
        if target == self.pc() {
            self.patch_to_here(list)
        } else {
            debug_assert!(target < self.pc());
            self.patch_list_aux(list, target, NO_REG, target)
        }
    }

    /// Point every jump in `list` at the next instruction emitted.
    pub(super) fn patch_to_here(&mut self, list: i32) -> Result<(), CompileError> {
        self.get_label();
        let jpc = self.fs.jpc;
        self.fs.jpc = self.concat_jumps(jpc, list)?;
        Ok(())
    }

    /// Make every jump in `list` close upvalues from register `level` up.
    pub(super) fn patch_close(&mut self, mut list: i32, level: u32) {
        let level = level + 1;
        while list != NO_JUMP {
            let node = list as usize;
            let next = self.get_jump(node);
            let inst = self.fs.proto.get_mut(node);
            debug_assert!(inst.opcode() == OpCode::Jmp && (inst.a() == 0 || inst.a() >= level));
            inst.set_a(level);
            list = next;
        }
    }

    // ---- Registers ----

    pub(super) fn check_stack(&mut self, n: u32) -> Result<(), CompileError> {
        let new_stack = self.fs.free_reg + n;
        if new_stack > self.fs.proto.max_stack_size as u32 {
            if new_stack >= MAX_STACK {
                return Err(self
                    .lexer
                    .error_near_current(ErrorKind::Limit, "function or expression too complex"));
            }
            self.fs.proto.max_stack_size = new_stack as u8;
        }
        Ok(())
    }

    pub(super) fn reserve_regs(&mut self, n: u32) -> Result<(), CompileError> {
        self.check_stack(n)?;
        self.fs.free_reg += n;
        Ok(())
    }

    fn free_register(&mut self, reg: u32) {
        if !is_k(reg) && reg >= self.fs.nactvar {
            self.fs.free_reg -= 1;
            debug_assert_eq!(reg, self.fs.free_reg);
        }
    }

    fn free_exp(&mut self, e: &ExprDesc) {
        if let ExprKind::NonReloc(reg) = e.kind {
            self.free_register(reg);
        }
    }

    // ---- Constants ----

    fn add_k(&mut self, k: Constant) -> Result<u32, CompileError> {
        if let Some(idx) = self.fs.constants.get_index_of(&k) {
            return Ok(idx as u32);
        }
        self.check_limit(self.fs.constants.len() + 1, MAX_AX as usize, "constants")?;
        let (idx, _) = self.fs.constants.insert_full(k);
        Ok(idx as u32)
    }

    pub(super) fn string_k(&mut self, id: StringId) -> Result<u32, CompileError> {
        self.add_k(Constant::String(id))
    }

    pub(super) fn number_k(&mut self, n: f64) -> Result<u32, CompileError> {
        self.add_k(Constant::Number(n))
    }

    fn bool_k(&mut self, b: bool) -> Result<u32, CompileError> {
        self.add_k(Constant::Boolean(b))
    }

    fn nil_k(&mut self) -> Result<u32, CompileError> {
        self.add_k(Constant::Nil)
    }

    // ---- Multiple results ----

    /// Fix the number of results of an open call or vararg.
    pub(super) fn set_returns(&mut self, e: &ExprDesc, nresults: i32) -> Result<(), CompileError> {
        match e.kind {
            ExprKind::Call(pc) => {
                self.fs.proto.get_mut(pc).set_c((nresults + 1) as u32);
            }
            ExprKind::VarArg(pc) => {
                let free = self.fs.free_reg;
                let inst = self.fs.proto.get_mut(pc);
                inst.set_b((nresults + 1) as u32);
                inst.set_a(free);
                self.reserve_regs(1)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub(super) fn set_multret(&mut self, e: &ExprDesc) -> Result<(), CompileError> {
        self.set_returns(e, MULTRET)
    }

    /// Restrict an open call or vararg to exactly one result.
    pub(super) fn set_one_ret(&mut self, e: &mut ExprDesc) {
        match e.kind {
            ExprKind::Call(pc) => {
                e.kind = ExprKind::NonReloc(self.fs.proto.code[pc].a());
            }
            ExprKind::VarArg(pc) => {
                self.fs.proto.get_mut(pc).set_b(2);
                e.kind = ExprKind::Relocable(pc);
            }
            _ => {}
        }
    }

    // ---- Discharge ----

    /// Turn variable references into values (emitting loads as needed).
    pub(super) fn discharge_vars(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        match e.kind {
            ExprKind::Local(reg) => e.kind = ExprKind::NonReloc(reg),
            ExprKind::Upval(idx) => {
                let pc = self.code_abc(OpCode::GetUpval, 0, idx, 0)?;
                e.kind = ExprKind::Relocable(pc);
            }
            ExprKind::Indexed { table, key, in_upval } => {
                self.free_register(key);
                let op = if in_upval {
                    OpCode::GetTabUp
                } else {
                    self.free_register(table);
                    OpCode::GetTable
                };
                let pc = self.code_abc(op, 0, table, key)?;
                e.kind = ExprKind::Relocable(pc);
            }
            ExprKind::Call(_) | ExprKind::VarArg(_) => self.set_one_ret(e),
            _ => {}
        }
        Ok(())
    }

    fn code_label(&mut self, a: u32, b: u32, jump: u32) -> Result<usize, CompileError> {
        self.get_label();
        self.code_abc(OpCode::LoadBool, a, b, jump)
    }

    fn discharge_to_reg(&mut self, e: &mut ExprDesc, reg: u32) -> Result<(), CompileError> {
        self.discharge_vars(e)?;
        match e.kind {
            ExprKind::Nil => self.code_nil(reg, 1)?,
            ExprKind::False => {
                self.code_abc(OpCode::LoadBool, reg, 0, 0)?;
            }
            ExprKind::True => {
                self.code_abc(OpCode::LoadBool, reg, 1, 0)?;
            }
            ExprKind::K(k) => {
                self.code_k(reg, k)?;
            }
            ExprKind::Number(n) => {
                let k = self.number_k(n)?;
                self.code_k(reg, k)?;
            }
            ExprKind::Relocable(pc) => self.fs.proto.get_mut(pc).set_a(reg),
            ExprKind::NonReloc(src) => {
                if src != reg {
                    self.code_abc(OpCode::Move, reg, src, 0)?;
                }
            }
            _ => return Ok(()),
        }
        e.kind = ExprKind::NonReloc(reg);
        Ok(())
    }

    fn discharge_to_any_reg(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        if !matches!(e.kind, ExprKind::NonReloc(_)) {
            self.reserve_regs(1)?;
            let reg = self.fs.free_reg - 1;
            self.discharge_to_reg(e, reg)?;
        }
        Ok(())
    }

    /// Put the final value of `e`, including its pending exits, in `reg`.
    fn exp_to_reg(&mut self, e: &mut ExprDesc, reg: u32) -> Result<(), CompileError> {
        self.discharge_to_reg(e, reg)?;
        if let ExprKind::Jmp(pc) = e.kind {
            e.t = self.concat_jumps(e.t, pc as i32)?;
        }
        if e.has_jumps() {
            let mut p_f = 0;
            let mut p_t = 0;
            if self.need_value(e.t) || self.need_value(e.f) {
                let fj = if matches!(e.kind, ExprKind::Jmp(_)) {
                    NO_JUMP
                } else {
                    self.jump()?
                };
                p_f = self.code_label(reg, 0, 1)?;
                p_t = self.code_label(reg, 1, 0)?;
                self.patch_to_here(fj)?;
            }
            let end = self.get_label();
            self.patch_list_aux(e.f, end, reg, p_f)?;
            self.patch_list_aux(e.t, end, reg, p_t)?;
        }
        e.t = NO_JUMP;
        e.f = NO_JUMP;
        e.kind = ExprKind::NonReloc(reg);
        Ok(())
    }

    /// Put `e` in the next free register.
    pub(super) fn exp_to_next_reg(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        self.discharge_vars(e)?;
        self.free_exp(e);
        self.reserve_regs(1)?;
        let reg = self.fs.free_reg - 1;
        self.exp_to_reg(e, reg)
    }

    /// Put `e` in some register and return it.
    pub(super) fn exp_to_any_reg(&mut self, e: &mut ExprDesc) -> Result<u32, CompileError> {
        self.discharge_vars(e)?;
        if let ExprKind::NonReloc(reg) = e.kind {
            if !e.has_jumps() {
                return Ok(reg);
            }
            if reg >= self.fs.nactvar {
                self.exp_to_reg(e, reg)?;
                return Ok(reg);
            }
        }
        self.exp_to_next_reg(e)?;
        match e.kind {
            ExprKind::NonReloc(reg) => Ok(reg),
            _ => Ok(self.fs.free_reg - 1),
        }
    }

    /// Like [`Compiler::exp_to_any_reg`], but leaves plain upvalues in place.
    pub(super) fn exp_to_any_reg_up(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        if !matches!(e.kind, ExprKind::Upval(_)) || e.has_jumps() {
            self.exp_to_any_reg(e)?;
        }
        Ok(())
    }

    pub(super) fn exp_to_val(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        if e.has_jumps() {
            self.exp_to_any_reg(e)?;
            Ok(())
        } else {
            self.discharge_vars(e)
        }
    }

    /// Encode `e` as an RK operand: a constant index when it fits, else a register.
    pub(super) fn exp_to_rk(&mut self, e: &mut ExprDesc) -> Result<u32, CompileError> {
        self.exp_to_val(e)?;
        match e.kind {
            ExprKind::True | ExprKind::False | ExprKind::Nil => {
                if self.fs.constants.len() <= MAX_INDEX_RK as usize {
                    let k = match e.kind {
                        ExprKind::Nil => self.nil_k()?,
                        kind => self.bool_k(kind == ExprKind::True)?,
                    };
                    e.kind = ExprKind::K(k);
                    return Ok(rk_as_k(k));
                }
            }
            ExprKind::Number(n) => {
                let k = self.number_k(n)?;
                e.kind = ExprKind::K(k);
                if k <= MAX_INDEX_RK {
                    return Ok(rk_as_k(k));
                }
            }
            ExprKind::K(k) => {
                if k <= MAX_INDEX_RK {
                    return Ok(rk_as_k(k));
                }
            }
            _ => {}
        }
        self.exp_to_any_reg(e)
    }

    // ---- Stores and indexing ----

    /// Assign the value of `ex` to the variable `var`.
    pub(super) fn store_var(&mut self, var: &ExprDesc, ex: &mut ExprDesc) -> Result<(), CompileError> {
        match var.kind {
            ExprKind::Local(reg) => {
                self.free_exp(ex);
                return self.exp_to_reg(ex, reg);
            }
            ExprKind::Upval(idx) => {
                let e = self.exp_to_any_reg(ex)?;
                self.code_abc(OpCode::SetUpval, e, idx, 0)?;
            }
            ExprKind::Indexed { table, key, in_upval } => {
                let op = if in_upval { OpCode::SetTabUp } else { OpCode::SetTable };
                let e = self.exp_to_rk(ex)?;
                self.code_abc(op, table, key, e)?;
            }
            _ => debug_assert!(false, "invalid assignment target {:?}", var.kind),
        }
        self.free_exp(ex);
        Ok(())
    }

    /// `e:key` method lookup: SELF leaves the function and the receiver in
    /// two consecutive registers.
    pub(super) fn code_self(&mut self, e: &mut ExprDesc, key: &mut ExprDesc) -> Result<(), CompileError> {
        let ereg = self.exp_to_any_reg(e)?;
        self.free_exp(e);
        let base = self.fs.free_reg;
        e.kind = ExprKind::NonReloc(base);
        self.reserve_regs(2)?;
        let rk = self.exp_to_rk(key)?;
        self.code_abc(OpCode::Self_, base, ereg, rk)?;
        self.free_exp(key);
        Ok(())
    }

    /// Turn `t` into `t[k]`.
    pub(super) fn indexed(&mut self, t: &mut ExprDesc, k: &mut ExprDesc) -> Result<(), CompileError> {
        debug_assert!(!t.has_jumps());
        let key = self.exp_to_rk(k)?;
        t.kind = match t.kind {
            ExprKind::Upval(idx) => ExprKind::Indexed { table: idx, key, in_upval: true },
            ExprKind::Local(reg) | ExprKind::NonReloc(reg) => {
                ExprKind::Indexed { table: reg, key, in_upval: false }
            }
            other => {
                debug_assert!(false, "indexing a non-register expression {other:?}");
                other
            }
        };
        Ok(())
    }

    // ---- Conditionals ----

    fn invert_jump(&mut self, pc: usize) {
        let ctl = self.jump_control(pc);
        let inst = self.fs.proto.get_mut(ctl);
        let a = inst.a();
        inst.set_a(if a == 0 { 1 } else { 0 });
    }

    fn jump_on_cond(&mut self, e: &mut ExprDesc, cond: bool) -> Result<i32, CompileError> {
        if let ExprKind::Relocable(pc) = e.kind {
            let inst = self.fs.proto.code[pc];
            if inst.opcode() == OpCode::Not {
                // Drop the NOT and test its operand with the inverted condition.
                self.fs.proto.code.pop();
                self.fs.proto.line_info.pop();
                return self.cond_jump(OpCode::Test, inst.b(), 0, (!cond) as u32);
            }
        }
        self.discharge_to_any_reg(e)?;
        self.free_exp(e);
        let reg = e.reg().unwrap_or(NO_REG);
        self.cond_jump(OpCode::TestSet, NO_REG, reg, cond as u32)
    }

    /// Fall through when `e` is true; jump (via `e.f`) when false.
    pub(super) fn go_if_true(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        self.discharge_vars(e)?;
        let pc = match e.kind {
            ExprKind::Jmp(pc) => {
                self.invert_jump(pc);
                pc as i32
            }
            ExprKind::K(_) | ExprKind::Number(_) | ExprKind::True => NO_JUMP,
            _ => self.jump_on_cond(e, false)?,
        };
        e.f = self.concat_jumps(e.f, pc)?;
        self.patch_to_here(e.t)?;
        e.t = NO_JUMP;
        Ok(())
    }

    /// Fall through when `e` is false; jump (via `e.t`) when true.
    pub(super) fn go_if_false(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        self.discharge_vars(e)?;
        let pc = match e.kind {
            ExprKind::Jmp(pc) => pc as i32,
            ExprKind::Nil | ExprKind::False => NO_JUMP,
            _ => self.jump_on_cond(e, true)?,
        };
        e.t = self.concat_jumps(e.t, pc)?;
        self.patch_to_here(e.f)?;
        e.f = NO_JUMP;
        Ok(())
    }

    fn code_not(&mut self, e: &mut ExprDesc) -> Result<(), CompileError> {
        self.discharge_vars(e)?;
        match e.kind {
            ExprKind::Nil | ExprKind::False => e.kind = ExprKind::True,
            ExprKind::K(_) | ExprKind::Number(_) | ExprKind::True => e.kind = ExprKind::False,
            ExprKind::Jmp(pc) => self.invert_jump(pc),
            ExprKind::Relocable(_) | ExprKind::NonReloc(_) => {
                self.discharge_to_any_reg(e)?;
                self.free_exp(e);
                let reg = e.reg().unwrap_or(0);
                let pc = self.code_abc(OpCode::Not, 0, reg, 0)?;
                e.kind = ExprKind::Relocable(pc);
            }
            other => debug_assert!(false, "cannot negate {other:?}"),
        }
        std::mem::swap(&mut e.t, &mut e.f);
        self.remove_values(e.f);
        self.remove_values(e.t);
        Ok(())
    }

    // ---- Operators ----

    /// Fold `e1 op e2` when both are numerals. Division and modulo by zero
    /// and NaN results are left to run time.
    fn const_folding(op: OpCode, e1: &mut ExprDesc, e2: &ExprDesc) -> bool {
        let (Some(a), Some(b)) = (e1.numeral(), e2.numeral()) else {
            return false;
        };
        if matches!(op, OpCode::Div | OpCode::Mod) && b == 0.0 {
            return false;
        }
        let r = match op {
            OpCode::Add => a + b,
            OpCode::Sub => a - b,
            OpCode::Mul => a * b,
            OpCode::Div => a / b,
            OpCode::Mod => a - (a / b).floor() * b,
            OpCode::Pow => a.powf(b),
            OpCode::Unm => -a,
            _ => return false,
        };
        if r.is_nan() {
            return false;
        }
        e1.kind = ExprKind::Number(r);
        true
    }

    fn code_arith(&mut self, op: OpCode, e1: &mut ExprDesc, e2: &mut ExprDesc, line: u32) -> Result<(), CompileError> {
        if Self::const_folding(op, e1, e2) {
            return Ok(());
        }
        let o2 = if op != OpCode::Unm && op != OpCode::Len {
            self.exp_to_rk(e2)?
        } else {
            0
        };
        let o1 = self.exp_to_rk(e1)?;
        if o1 > o2 {
            self.free_exp(e1);
            self.free_exp(e2);
        } else {
            self.free_exp(e2);
            self.free_exp(e1);
        }
        let pc = self.code_abc(op, 0, o1, o2)?;
        e1.kind = ExprKind::Relocable(pc);
        self.fix_line(line);
        Ok(())
    }

    fn code_comp(&mut self, op: OpCode, cond: bool, e1: &mut ExprDesc, e2: &mut ExprDesc) -> Result<(), CompileError> {
        let mut o1 = self.exp_to_rk(e1)?;
        let mut o2 = self.exp_to_rk(e2)?;
        self.free_exp(e2);
        self.free_exp(e1);
        let mut cond = cond;
        if !cond && op != OpCode::Eq {
            // a > b is b < a; a >= b is b <= a
            std::mem::swap(&mut o1, &mut o2);
            cond = true;
        }
        let pc = self.cond_jump(op, cond as u32, o1, o2)?;
        e1.kind = ExprKind::Jmp(pc as usize);
        Ok(())
    }

    /// Apply a unary operator.
    pub(super) fn prefix(&mut self, op: UnOp, e: &mut ExprDesc, line: u32) -> Result<(), CompileError> {
        let mut e2 = ExprDesc::new(ExprKind::Number(0.0));
        match op {
            UnOp::Minus => {
                if let Some(n) = e.numeral() {
                    e.kind = ExprKind::Number(-n);
                } else {
                    self.exp_to_any_reg(e)?;
                    self.code_arith(OpCode::Unm, e, &mut e2, line)?;
                }
            }
            UnOp::Not => self.code_not(e)?,
            UnOp::Len => {
                self.exp_to_any_reg(e)?;
                self.code_arith(OpCode::Len, e, &mut e2, line)?;
            }
        }
        Ok(())
    }

    /// Prepare the left operand before the right one is parsed.
    pub(super) fn infix(&mut self, op: BinOp, v: &mut ExprDesc) -> Result<(), CompileError> {
        match op {
            BinOp::And => self.go_if_true(v)?,
            BinOp::Or => self.go_if_false(v)?,
            BinOp::Concat => self.exp_to_next_reg(v)?,
            _ if op.is_arith() => {
                if v.numeral().is_none() {
                    self.exp_to_rk(v)?;
                }
            }
            _ => {
                self.exp_to_rk(v)?;
            }
        }
        Ok(())
    }

    /// Combine both operands of a binary operator into `e1`.
    pub(super) fn posfix(&mut self, op: BinOp, e1: &mut ExprDesc, e2: &mut ExprDesc, line: u32) -> Result<(), CompileError> {
        match op {
            BinOp::And => {
                debug_assert_eq!(e1.t, NO_JUMP);
                self.discharge_vars(e2)?;
                e2.f = self.concat_jumps(e2.f, e1.f)?;
                *e1 = *e2;
            }
            BinOp::Or => {
                debug_assert_eq!(e1.f, NO_JUMP);
                self.discharge_vars(e2)?;
                e2.t = self.concat_jumps(e2.t, e1.t)?;
                *e1 = *e2;
            }
            BinOp::Concat => {
                self.exp_to_val(e2)?;
                let chained = match e2.kind {
                    ExprKind::Relocable(pc) if self.fs.proto.code[pc].opcode() == OpCode::Concat => Some(pc),
                    _ => None,
                };
                match (chained, e1.kind) {
                    (Some(pc), ExprKind::NonReloc(reg)) => {
                        debug_assert_eq!(reg + 1, self.fs.proto.code[pc].b());
                        self.free_exp(e1);
                        self.fs.proto.get_mut(pc).set_b(reg);
                        e1.kind = ExprKind::Relocable(pc);
                    }
                    _ => {
                        self.exp_to_next_reg(e2)?;
                        self.code_arith(OpCode::Concat, e1, e2, line)?;
                    }
                }
            }
            BinOp::Add => self.code_arith(OpCode::Add, e1, e2, line)?,
            BinOp::Sub => self.code_arith(OpCode::Sub, e1, e2, line)?,
            BinOp::Mul => self.code_arith(OpCode::Mul, e1, e2, line)?,
            BinOp::Div => self.code_arith(OpCode::Div, e1, e2, line)?,
            BinOp::Mod => self.code_arith(OpCode::Mod, e1, e2, line)?,
            BinOp::Pow => self.code_arith(OpCode::Pow, e1, e2, line)?,
            BinOp::Eq => self.code_comp(OpCode::Eq, true, e1, e2)?,
            BinOp::Lt => self.code_comp(OpCode::Lt, true, e1, e2)?,
            BinOp::Le => self.code_comp(OpCode::Le, true, e1, e2)?,
            BinOp::Ne => self.code_comp(OpCode::Eq, false, e1, e2)?,
            BinOp::Gt => self.code_comp(OpCode::Lt, false, e1, e2)?,
            BinOp::Ge => self.code_comp(OpCode::Le, false, e1, e2)?,
        }
        Ok(())
    }

    // ---- Tables ----

    /// Store `tostore` pending list items into the table at `base`.
    pub(super) fn set_list(&mut self, base: u32, nelems: u32, tostore: i32) -> Result<(), CompileError> {
        let c = (nelems - 1) / LFIELDS_PER_FLUSH + 1;
        let b = if tostore == MULTRET { 0 } else { tostore as u32 };
        debug_assert!(tostore != 0);
        if c <= MAX_C {
            self.code_abc(OpCode::SetList, base, b, c)?;
        } else if c <= MAX_AX {
            self.code_abc(OpCode::SetList, base, b, 0)?;
            self.code_extra_arg(c)?;
        } else {
            return Err(self.lexer.error_near_current(ErrorKind::Limit, "constructor too long"));
        }
        self.fs.free_reg = base + 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::compile;
    use crate::opcode::{is_k, OpCode};
    use crate::proto::{Constant, Proto};

    fn compile_ok(source: &str) -> Proto {
        match compile(source.as_bytes(), "=test") {
            Ok((proto, _)) => proto,
            Err(e) => panic!("compile failed: {e}"),
        }
    }

    fn has_opcode(proto: &Proto, op: OpCode) -> bool {
        proto.code.iter().any(|i| i.opcode() == op)
    }

    #[test]
    fn test_fold_arith() {
        let p = compile_ok("local x = 2 * 3 + 4");
        assert_eq!(p.code[0].opcode(), OpCode::LoadK);
        assert_eq!(p.constants, vec![Constant::Number(10.0)]);
        assert!(!has_opcode(&p, OpCode::Add));
        assert!(!has_opcode(&p, OpCode::Mul));
    }

    #[test]
    fn test_no_fold_division_by_zero() {
        let p = compile_ok("local x = 1 / 0");
        assert!(has_opcode(&p, OpCode::Div));
        let p = compile_ok("local x = 1 % 0");
        assert!(has_opcode(&p, OpCode::Mod));
    }

    #[test]
    fn test_fold_negation() {
        let p = compile_ok("local x = -5");
        assert_eq!(p.constants, vec![Constant::Number(-5.0)]);
        assert!(!has_opcode(&p, OpCode::Unm));
    }

    #[test]
    fn test_no_fold_len() {
        let p = compile_ok("local t = {} local n = #t");
        assert!(has_opcode(&p, OpCode::Len));
    }

    #[test]
    fn test_fold_not_constant() {
        let p = compile_ok("local a = not nil");
        assert_eq!(p.code[0].opcode(), OpCode::LoadBool);
        assert_eq!(p.code[0].b(), 1);
        assert!(!has_opcode(&p, OpCode::Not));
    }

    #[test]
    fn test_loadnil_merge() {
        let p = compile_ok("local a, b\nlocal c");
        assert_eq!(p.code[0].opcode(), OpCode::LoadNil);
        assert_eq!((p.code[0].a(), p.code[0].b()), (0, 2));
        assert_eq!(p.code[1].opcode(), OpCode::Return);
    }

    #[test]
    fn test_rk_constant_operand() {
        let p = compile_ok("local a = ... local b = a + 1");
        let add = p.code.iter().find(|i| i.opcode() == OpCode::Add).unwrap();
        assert!(!is_k(add.b()));
        assert!(is_k(add.c()));
    }

    #[test]
    fn test_comparison_swaps_for_gt() {
        let p = compile_ok("local a, b = ... local c = a > b");
        let lt = p.code.iter().find(|i| i.opcode() == OpCode::Lt).unwrap();
        assert_eq!((lt.b(), lt.c()), (1, 0));
    }

    #[test]
    fn test_concat_chain_single_instruction() {
        let p = compile_ok("local a, b, c = ... local d = a .. b .. c");
        let n = p.code.iter().filter(|i| i.opcode() == OpCode::Concat).count();
        assert_eq!(n, 1);
        let concat = p.code.iter().find(|i| i.opcode() == OpCode::Concat).unwrap();
        assert_eq!(concat.c() - concat.b(), 2);
    }

    #[test]
    fn test_value_of_comparison_uses_loadbool_pair() {
        let p = compile_ok("local a, b = ... local c = a == b");
        let n = p.code.iter().filter(|i| i.opcode() == OpCode::LoadBool).count();
        assert_eq!(n, 2);
    }

    #[test]
    fn test_not_condition_becomes_test() {
        let p = compile_ok("local a = ... if not a then a = 1 end");
        assert!(has_opcode(&p, OpCode::Test));
        assert!(!has_opcode(&p, OpCode::Not));
    }

    #[test]
    fn test_many_constants_use_registers() {
        let mut src = String::from("local t = {}\n");
        for i in 0..300 {
            src.push_str(&format!("t.k{i} = {i}\n"));
        }
        let p = compile_ok(&src);
        assert!(p.constants.len() > 256);
        // Late keys and values no longer fit RK and go through LOADK.
        let last_set = p.code.iter().rev().find(|i| i.opcode() == OpCode::SetTable).unwrap();
        assert!(!is_k(last_set.b()));
        assert!(!is_k(last_set.c()));
    }

    #[test]
    fn test_max_stack_tracks_high_water_mark() {
        let p = compile_ok("local a, b, c, d = 1, 2, 3, 4");
        assert_eq!(p.max_stack_size, 4);
    }
}
