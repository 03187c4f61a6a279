//! Builder for emitting instructions during compilation.
//!
//! Tracks the current source location for the span table and manages
//! forward jumps through patch labels.

use std::rc::Rc;

use crate::exception::SourcePos;

use super::code::{Code, Const, FuncDef};
use super::op::Instr;

/// Index of an emitted jump instruction awaiting its target.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JumpLabel(usize);

#[derive(Debug, Default)]
pub(crate) struct CodeBuilder {
    instrs: Vec<Instr>,
    spans: Vec<SourcePos>,
    consts: Vec<Const>,
    defs: Vec<Rc<FuncDef>>,
    current_pos: SourcePos,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source location recorded for subsequent instructions.
    pub fn set_location(&mut self, pos: SourcePos) {
        self.current_pos = pos;
    }

    pub fn location(&self) -> SourcePos {
        self.current_pos
    }

    pub fn emit(&mut self, instr: Instr) -> usize {
        self.instrs.push(instr);
        self.spans.push(self.current_pos);
        self.instrs.len() - 1
    }

    /// Next instruction index; used as a backward jump target.
    pub fn here(&self) -> u32 {
        self.instrs.len() as u32
    }

    /// Emits a jump with a placeholder target to be patched later.
    pub fn emit_jump(&mut self, make: impl FnOnce(u32) -> Instr) -> JumpLabel {
        let index = self.emit(make(u32::MAX));
        JumpLabel(index)
    }

    /// Points a previously emitted jump at the current position.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.here();
        self.patch_jump_to(label, target);
    }

    pub fn patch_jump_to(&mut self, label: JumpLabel, target: u32) {
        match &mut self.instrs[label.0] {
            Instr::Jump(t)
            | Instr::JumpIfFalse(t)
            | Instr::JumpIfTrue(t)
            | Instr::JumpIfFalseOrPop(t)
            | Instr::JumpIfTrueOrPop(t)
            | Instr::IterNext(t)
            | Instr::ExcMatch(t)
            | Instr::UnwindJump { target: t, .. } => *t = target,
            Instr::EnterTry { .. } => unreachable!("EnterTry is patched via patch_try"),
            other => unreachable!("not a jump instruction: {other:?}"),
        }
    }

    /// Patches the handler targets of an `EnterTry`.
    pub fn patch_try(&mut self, label: JumpLabel, except_pc: u32, finally_pc: u32) {
        match &mut self.instrs[label.0] {
            Instr::EnterTry {
                except_pc: e,
                finally_pc: f,
            } => {
                *e = except_pc;
                *f = finally_pc;
            }
            other => unreachable!("not an EnterTry: {other:?}"),
        }
    }

    pub fn add_const(&mut self, c: Const) -> u16 {
        // Constant tables stay small; a linear scan keeps duplicates out.
        if let Some(i) = self.consts.iter().position(|x| *x == c) {
            return i as u16;
        }
        let index = self.consts.len();
        assert!(index <= u16::MAX as usize, "too many constants");
        self.consts.push(c);
        index as u16
    }

    pub fn add_def(&mut self, def: Rc<FuncDef>) -> u16 {
        let index = self.defs.len();
        assert!(index <= u16::MAX as usize, "too many nested definitions");
        self.defs.push(def);
        index as u16
    }

    pub fn build(self) -> Code {
        Code {
            instrs: self.instrs,
            spans: self.spans,
            consts: self.consts,
            defs: self.defs,
        }
    }
}
