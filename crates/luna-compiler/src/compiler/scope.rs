//! Scope and variable management: blocks, locals, upvalues, gotos and labels.

use super::expr::ExprKind;
use super::Compiler;
use crate::error::CompileError;
use crate::limits::{MAX_UPVALUES, MAX_VARS};
use crate::proto::{LocalVar, UpvalDesc};
use luna_core::string::StringId;

/// Block scope tracking.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockCnt {
    /// Index of the first label of this block in `Dyndata::label`.
    pub first_label: usize,
    /// Index of the first pending goto of this block in `Dyndata::gt`.
    pub first_goto: usize,
    /// Active locals outside the block.
    pub nactvar: u32,
    /// Some local of this block is captured by a closure.
    pub upval: bool,
    /// Whether this block is a loop (for break).
    pub is_loop: bool,
}

/// A pending goto or a visible label.
#[derive(Clone, Copy, Debug)]
pub struct LabelDesc {
    pub name: StringId,
    /// Jump list of the goto, or the pc of the label.
    pub pc: i32,
    pub line: u32,
    /// Active locals at the goto or label.
    pub nactvar: u32,
}

/// Parse data shared by the whole function stack. Each function sees only
/// the entries past its own offsets.
#[derive(Debug, Default)]
pub struct Dyndata {
    /// Active locals: indexes into the owning function's `local_vars`.
    pub actvar: Vec<usize>,
    /// Pending gotos.
    pub gt: Vec<LabelDesc>,
    /// Visible labels.
    pub label: Vec<LabelDesc>,
}

impl<'a> Compiler<'a> {
    // ---- Locals ----

    /// Debug entry of the `i`-th active local of the current function.
    fn local_var_mut(&mut self, i: u32) -> Option<&mut LocalVar> {
        let idx = *self.dyd.actvar.get(self.fs.first_local + i as usize)?;
        self.fs.proto.local_vars.get_mut(idx)
    }

    fn local_var_name(&self, level: usize, i: u32) -> Option<StringId> {
        let fs = self.func_ref(level);
        let idx = *self.dyd.actvar.get(fs.first_local + i as usize)?;
        fs.proto.local_vars.get(idx).map(|v| v.name)
    }

    /// Declare a local; it becomes visible after [`Compiler::adjust_local_vars`].
    pub(super) fn new_local_var(&mut self, name: StringId) -> Result<(), CompileError> {
        let active = self.dyd.actvar.len() + 1 - self.fs.first_local;
        self.check_limit(active, MAX_VARS, "local variables")?;
        let idx = self.fs.proto.local_vars.len();
        self.fs.proto.local_vars.push(LocalVar {
            name,
            start_pc: 0,
            end_pc: 0,
        });
        self.dyd.actvar.push(idx);
        Ok(())
    }

    pub(super) fn new_local_var_literal(&mut self, name: &str) -> Result<(), CompileError> {
        let id = self.lexer.strings.intern(name.as_bytes());
        self.new_local_var(id)
    }

    /// Bring the last `nvars` declared locals into scope.
    pub(super) fn adjust_local_vars(&mut self, nvars: u32) {
        self.fs.nactvar += nvars;
        let pc = self.pc() as u32;
        for i in (self.fs.nactvar - nvars)..self.fs.nactvar {
            if let Some(var) = self.local_var_mut(i) {
                var.start_pc = pc;
            }
        }
    }

    /// Set the start pc of the `i`-th active local.
    pub(super) fn set_local_start(&mut self, i: u32, pc: usize) {
        if let Some(var) = self.local_var_mut(i) {
            var.start_pc = pc as u32;
        }
    }

    fn remove_vars(&mut self, to_level: u32) {
        let pc = self.pc() as u32;
        let removed = (self.fs.nactvar - to_level) as usize;
        while self.fs.nactvar > to_level {
            self.fs.nactvar -= 1;
            let i = self.fs.nactvar;
            if let Some(var) = self.local_var_mut(i) {
                var.end_pc = pc;
            }
        }
        let len = self.dyd.actvar.len();
        self.dyd.actvar.truncate(len - removed);
    }

    // ---- Name resolution ----

    /// Function state at nesting `level` (0 is the main chunk).
    fn func_ref(&self, level: usize) -> &super::FuncState {
        self.enclosing.get(level).unwrap_or(&self.fs)
    }

    fn func_mut(&mut self, level: usize) -> &mut super::FuncState {
        match self.enclosing.get_mut(level) {
            Some(fs) => fs,
            None => &mut self.fs,
        }
    }

    fn search_var(&self, level: usize, name: StringId) -> Option<u32> {
        let fs = self.func_ref(level);
        (0..fs.nactvar)
            .rev()
            .find(|&i| self.local_var_name(level, i) == Some(name))
    }

    fn search_upvalue(&self, level: usize, name: StringId) -> Option<u32> {
        self.func_ref(level)
            .proto
            .upvalues
            .iter()
            .position(|uv| uv.name == Some(name))
            .map(|i| i as u32)
    }

    /// Mark the block declaring local `var` as captured.
    fn mark_upval(&mut self, level: usize, var: u32) {
        let fs = self.func_mut(level);
        if let Some(bl) = fs.blocks.iter_mut().rev().find(|bl| bl.nactvar <= var) {
            bl.upval = true;
        }
    }

    fn new_upvalue(&mut self, level: usize, name: StringId, kind: ExprKind) -> Result<u32, CompileError> {
        let fs = self.func_ref(level);
        if fs.proto.upvalues.len() + 1 > MAX_UPVALUES {
            return Err(self.error_limit(fs.proto.line_defined, MAX_UPVALUES, "upvalues"));
        }
        let (in_stack, index) = match kind {
            ExprKind::Local(reg) => (true, reg),
            ExprKind::Upval(idx) => (false, idx),
            _ => (false, 0),
        };
        let fs = self.func_mut(level);
        fs.proto.upvalues.push(UpvalDesc {
            name: Some(name),
            in_stack,
            index: index as u8,
        });
        Ok(fs.proto.upvalues.len() as u32 - 1)
    }

    /// Resolve `name` at `level`: a local, an upvalue (created on the way
    /// back from an enclosing function), or `None` for a global.
    fn single_var_aux(&mut self, level: usize, name: StringId, base: bool) -> Result<Option<ExprKind>, CompileError> {
        if let Some(v) = self.search_var(level, name) {
            if !base {
                self.mark_upval(level, v);
            }
            return Ok(Some(ExprKind::Local(v)));
        }
        if let Some(idx) = self.search_upvalue(level, name) {
            return Ok(Some(ExprKind::Upval(idx)));
        }
        if level == 0 {
            return Ok(None);
        }
        match self.single_var_aux(level - 1, name, false)? {
            None => Ok(None),
            Some(kind) => {
                let idx = self.new_upvalue(level, name, kind)?;
                Ok(Some(ExprKind::Upval(idx)))
            }
        }
    }

    /// Resolve a variable name in the current function.
    pub(super) fn resolve_name(&mut self, name: StringId) -> Result<Option<ExprKind>, CompileError> {
        let level = self.enclosing.len();
        self.single_var_aux(level, name, true)
    }

    // ---- Blocks ----

    pub(super) fn enter_block(&mut self, is_loop: bool) {
        debug_assert_eq!(self.fs.free_reg, self.fs.nactvar);
        self.fs.blocks.push(BlockCnt {
            first_label: self.dyd.label.len(),
            first_goto: self.dyd.gt.len(),
            nactvar: self.fs.nactvar,
            upval: false,
            is_loop,
        });
    }

    pub(super) fn leave_block(&mut self) -> Result<(), CompileError> {
        let Some(&bl) = self.fs.blocks.last() else {
            return Ok(());
        };
        let inner = self.fs.blocks.len() > 1;
        if inner && bl.upval {
            // Jump to the next instruction, closing upvalues on the way.
            let j = self.jump()?;
            self.patch_close(j, bl.nactvar);
            self.patch_to_here(j)?;
        }
        if bl.is_loop {
            self.break_label()?;
        }
        self.fs.blocks.pop();
        self.remove_vars(bl.nactvar);
        debug_assert_eq!(bl.nactvar, self.fs.nactvar);
        self.fs.free_reg = self.fs.nactvar;
        self.dyd.label.truncate(bl.first_label);
        if inner {
            self.move_gotos_out(&bl)?;
        } else if let Some(gt) = self.dyd.gt.get(bl.first_goto) {
            return Err(self.undef_goto(gt));
        }
        Ok(())
    }

    // ---- Gotos and labels ----

    pub(super) fn new_goto_entry(&mut self, name: StringId, line: u32, pc: i32) -> usize {
        self.dyd.gt.push(LabelDesc {
            name,
            pc,
            line,
            nactvar: self.fs.nactvar,
        });
        self.dyd.gt.len() - 1
    }

    pub(super) fn new_label_entry(&mut self, name: StringId, line: u32, pc: usize) -> usize {
        self.dyd.label.push(LabelDesc {
            name,
            pc: pc as i32,
            line,
            nactvar: self.fs.nactvar,
        });
        self.dyd.label.len() - 1
    }

    /// Resolve pending goto `g` against `label` and drop it from the list.
    fn close_goto(&mut self, g: usize, label: &LabelDesc) -> Result<(), CompileError> {
        let gt = self.dyd.gt[g];
        debug_assert_eq!(gt.name, label.name);
        if gt.nactvar < label.nactvar {
            let level = self.enclosing.len();
            let vname = self
                .local_var_name(level, gt.nactvar)
                .map(|id| self.lexer.strings.get_str_lossy(id).into_owned())
                .unwrap_or_default();
            let msg = format!(
                "<goto {}> at line {} jumps into the scope of local '{}'",
                self.lexer.strings.get_str_lossy(gt.name),
                gt.line,
                vname
            );
            return Err(self.sem_error(msg));
        }
        self.patch_list(gt.pc, label.pc as usize)?;
        self.dyd.gt.remove(g);
        Ok(())
    }

    /// Try to close goto `g` with a label of the current block.
    pub(super) fn find_label(&mut self, g: usize) -> Result<bool, CompileError> {
        let Some(&bl) = self.fs.blocks.last() else {
            return Ok(false);
        };
        let gt = self.dyd.gt[g];
        let found = self.dyd.label[bl.first_label.min(self.dyd.label.len())..]
            .iter()
            .find(|lb| lb.name == gt.name)
            .copied();
        match found {
            Some(lb) => {
                if gt.nactvar > lb.nactvar {
                    self.patch_close(gt.pc, lb.nactvar);
                }
                self.close_goto(g, &lb)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every pending goto of the current block that targets label `l`.
    pub(super) fn find_gotos(&mut self, l: usize) -> Result<(), CompileError> {
        let lb = self.dyd.label[l];
        let mut i = self.fs.blocks.last().map_or(0, |bl| bl.first_goto);
        while i < self.dyd.gt.len() {
            if self.dyd.gt[i].name == lb.name {
                self.close_goto(i, &lb)?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    /// Hand the unresolved gotos of a finished block to the enclosing one.
    fn move_gotos_out(&mut self, bl: &BlockCnt) -> Result<(), CompileError> {
        let mut i = bl.first_goto;
        while i < self.dyd.gt.len() {
            let gt = self.dyd.gt[i];
            if gt.nactvar > bl.nactvar {
                if bl.upval {
                    self.patch_close(gt.pc, bl.nactvar);
                }
                self.dyd.gt[i].nactvar = bl.nactvar;
            }
            if !self.find_label(i)? {
                i += 1;
            }
        }
        Ok(())
    }

    /// Resolve pending `break`s at the end of a loop.
    fn break_label(&mut self) -> Result<(), CompileError> {
        let pc = self.pc();
        let l = self.new_label_entry(self.break_name, 0, pc);
        self.find_gotos(l)
    }

    fn undef_goto(&self, gt: &LabelDesc) -> CompileError {
        let msg = if gt.name == self.break_name {
            format!("<break> at line {} not inside a loop", gt.line)
        } else {
            format!(
                "no visible label '{}' for <goto> at line {}",
                self.lexer.strings.get_str_lossy(gt.name),
                gt.line
            )
        };
        self.sem_error(msg)
    }

    /// Reject a label already defined in the current block.
    pub(super) fn check_repeated(&self, name: StringId) -> Result<(), CompileError> {
        let first = self.fs.blocks.last().map_or(0, |bl| bl.first_label);
        if let Some(lb) = self.dyd.label.iter().skip(first).find(|lb| lb.name == name) {
            let msg = format!(
                "label '{}' already defined on line {}",
                self.lexer.strings.get_str_lossy(name),
                lb.line
            );
            return Err(self.sem_error(msg));
        }
        Ok(())
    }
}
