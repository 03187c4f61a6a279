//! AST to bytecode compiler.
//!
//! Each function body compiles independently into a [`FuncDef`]. Slot
//! layout is parameters, then plain locals, then captured names; the
//! module body carries no slots at all since its names live in the
//! module's globals. Jump targets are fixed up through the builder's
//! patch labels in a single pass.

use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use crate::expressions::{
    AssignTarget, BinOp, BoolOp, CallArg, Expr, ExprNode, FuncDefExpr, Stat, StatKind, UnaryOp,
};
use crate::intern::{Interns, StringId};
use crate::lexer::LexResult;
use crate::parse;

use super::builder::{CodeBuilder, JumpLabel};
use super::code::{Const, FuncDef};
use super::op::{Instr, NO_TARGET};

/// Lexes, parses, and compiles a module body.
pub(crate) fn compile_source(
    interns: &mut Interns,
    module: &Rc<str>,
    source: &str,
    expression: bool,
) -> Result<Rc<FuncDef>, crate::exception::CodeError> {
    let lexed: LexResult = crate::lexer::lex(source)?;
    let func = if expression {
        parse::parse_expression_module(&lexed.root)?
    } else {
        parse::parse_module(&lexed.root)?
    };
    Ok(compile_funcdef(
        interns,
        module,
        lexed.lines,
        &func,
        FnKind::Module,
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FnKind {
    Module,
    Function,
    /// A class body: its locals become the instance template, and `def`
    /// statements directly inside it produce methods.
    ClassBody,
}

struct LoopCtx {
    continue_target: u32,
    break_patches: Vec<JumpLabel>,
    try_depth: u16,
}

struct FnCompiler<'a> {
    b: CodeBuilder,
    interns: &'a mut Interns,
    module: Rc<str>,
    source: Rc<[Box<str>]>,
    slots: AHashMap<StringId, u16>,
    captures: AHashSet<StringId>,
    kind: FnKind,
    loops: Vec<LoopCtx>,
    try_depth: u16,
}

pub(crate) fn compile_funcdef(
    interns: &mut Interns,
    module: &Rc<str>,
    source: Rc<[Box<str>]>,
    func: &FuncDefExpr,
    kind: FnKind,
) -> Rc<FuncDef> {
    let mut locals: Vec<StringId> = Vec::new();
    let mut push_local = |interns: &mut Interns, locals: &mut Vec<StringId>, name: &str| {
        let id = interns.intern(name);
        if !locals.contains(&id) {
            locals.push(id);
        }
        id
    };

    let params: Vec<StringId> = func
        .params
        .iter()
        .map(|p| push_local(interns, &mut locals, &p.name))
        .collect();
    let star_args = func
        .star_args
        .as_ref()
        .map(|n| push_local(interns, &mut locals, n));
    let star_kwargs = func
        .star_kwargs
        .as_ref()
        .map(|n| push_local(interns, &mut locals, n));
    for name in &func.locals {
        push_local(interns, &mut locals, name);
    }
    let mut capture_slots = Vec::new();
    for name in &func.local_captures {
        let id = push_local(interns, &mut locals, name);
        let slot = locals.iter().position(|n| *n == id).expect("just pushed") as u16;
        capture_slots.push((slot, id));
    }

    let mut compiler = FnCompiler {
        b: CodeBuilder::new(),
        interns,
        module: module.clone(),
        source: source.clone(),
        slots: locals
            .iter()
            .enumerate()
            .map(|(i, n)| (*n, i as u16))
            .collect(),
        captures: capture_slots.iter().map(|(_, n)| *n).collect(),
        kind,
        loops: Vec::new(),
        try_depth: 0,
    };

    compiler.b.set_location(func.pos);
    compiler.compile_block(&func.body);
    // Implicit `return None` at the end of every body.
    let none = compiler.b.add_const(Const::None);
    compiler.b.emit(Instr::LoadConst(none));
    compiler.b.emit(Instr::Return);

    let defaults_count = func.params.iter().filter(|p| p.default.is_some()).count();
    let name: Rc<str> = Rc::from(func.name.as_str());
    Rc::new(FuncDef {
        code: compiler.b.build(),
        name,
        module: module.clone(),
        pos: func.pos,
        params,
        defaults_count,
        star_args,
        star_kwargs,
        locals,
        capture_slots,
        is_module_body: kind == FnKind::Module,
        source,
    })
}

impl FnCompiler<'_> {
    fn intern(&mut self, name: &str) -> StringId {
        self.interns.intern(name)
    }

    fn load_name(&mut self, name: &str) {
        let id = self.intern(name);
        if self.kind == FnKind::Module {
            self.b.emit(Instr::LoadGlobal(id));
        } else if self.captures.contains(&id) {
            let slot = self.slots[&id];
            self.b.emit(Instr::LoadCapture { slot, name: id });
        } else if let Some(slot) = self.slots.get(&id) {
            self.b.emit(Instr::LoadLocal(*slot));
        } else {
            self.b.emit(Instr::LoadGlobal(id));
        }
    }

    fn store_name(&mut self, name: &str) {
        let id = self.intern(name);
        if self.kind == FnKind::Module {
            self.b.emit(Instr::StoreGlobal(id));
        } else if let Some(slot) = self.slots.get(&id) {
            self.b.emit(Instr::StoreLocal(*slot));
        } else {
            self.b.emit(Instr::StoreGlobal(id));
        }
    }

    fn compile_block(&mut self, body: &[Stat]) {
        for stat in body {
            self.compile_stat(stat);
        }
    }

    fn compile_stat(&mut self, stat: &Stat) {
        self.b.set_location(stat.pos);
        match &stat.kind {
            StatKind::Expr(e) => {
                self.compile_expr(e);
                self.b.emit(Instr::Pop);
            }
            StatKind::Pass => {}
            StatKind::If { cond, body, orelse } => {
                self.compile_expr(cond);
                let jf = self.b.emit_jump(Instr::JumpIfFalse);
                self.compile_block(body);
                if orelse.is_empty() {
                    self.b.patch_jump(jf);
                } else {
                    let jend = self.b.emit_jump(Instr::Jump);
                    self.b.patch_jump(jf);
                    self.compile_block(orelse);
                    self.b.patch_jump(jend);
                }
            }
            StatKind::While { cond, body, orelse } => {
                let start = self.b.here();
                self.compile_expr(cond);
                let jf = self.b.emit_jump(Instr::JumpIfFalse);
                self.loops.push(LoopCtx {
                    continue_target: start,
                    break_patches: Vec::new(),
                    try_depth: self.try_depth,
                });
                self.compile_block(body);
                self.b.emit(Instr::Jump(start));
                let ctx = self.loops.pop().expect("loop context");
                self.b.patch_jump(jf);
                self.compile_block(orelse);
                for label in ctx.break_patches {
                    self.b.patch_jump(label);
                }
            }
            StatKind::For {
                target,
                iterable,
                body,
                orelse,
            } => {
                self.compile_expr(iterable);
                self.b.emit(Instr::GetIter);
                let start = self.b.here();
                let next = self.b.emit_jump(Instr::IterNext);
                self.compile_store_target(target);
                self.loops.push(LoopCtx {
                    continue_target: start,
                    break_patches: Vec::new(),
                    try_depth: self.try_depth,
                });
                self.compile_block(body);
                self.b.emit(Instr::Jump(start));
                let ctx = self.loops.pop().expect("loop context");
                // Natural exhaustion pops the iterator and runs the else
                // clause; a user break skips the else clause but must still
                // drop the iterator.
                self.b.patch_jump(next);
                self.compile_block(orelse);
                if !ctx.break_patches.is_empty() {
                    let jend = self.b.emit_jump(Instr::Jump);
                    for label in ctx.break_patches {
                        self.b.patch_jump(label);
                    }
                    self.b.emit(Instr::Pop);
                    self.b.patch_jump(jend);
                }
            }
            StatKind::Break => {
                let ctx = self.loops.last().expect("parser rejects break outside loop");
                let try_depth = ctx.try_depth;
                let label = self
                    .b
                    .emit_jump(|t| Instr::UnwindJump { target: t, try_depth });
                self.loops
                    .last_mut()
                    .expect("loop context")
                    .break_patches
                    .push(label);
            }
            StatKind::Continue => {
                let ctx = self.loops.last().expect("parser rejects continue outside loop");
                self.b.emit(Instr::UnwindJump {
                    target: ctx.continue_target,
                    try_depth: ctx.try_depth,
                });
            }
            StatKind::Return(value) => {
                match value {
                    Some(v) => self.compile_expr(v),
                    None => {
                        let none = self.b.add_const(Const::None);
                        self.b.emit(Instr::LoadConst(none));
                    }
                }
                self.b.emit(Instr::Return);
            }
            StatKind::Def(f) => {
                self.compile_function(f, self.kind == FnKind::ClassBody);
                self.store_name(&f.name);
            }
            StatKind::Class { name, bases, body } => {
                for base in bases {
                    self.compile_expr(base);
                }
                let def = compile_funcdef(
                    self.interns,
                    &self.module,
                    self.source.clone(),
                    body,
                    FnKind::ClassBody,
                );
                let def = self.b.add_def(def);
                self.b.emit(Instr::MakeClass {
                    def,
                    bases: bases.len() as u16,
                });
                self.store_name(name);
            }
            StatKind::Try {
                body,
                excepts,
                finally,
            } => self.compile_try(body, excepts, finally),
            StatKind::Raise(value) => match value {
                Some(v) => {
                    self.compile_expr(v);
                    self.b.emit(Instr::Raise);
                }
                None => {
                    self.b.emit(Instr::Reraise);
                }
            },
            StatKind::Import { module, alias } => {
                let name = self.intern(module);
                let alias = match alias {
                    Some(a) => self.intern(a),
                    None => name,
                };
                self.b.emit(Instr::Import { name, alias });
            }
            StatKind::ImportFrom { module, names } => {
                let module = self.intern(module);
                for (name, alias) in names {
                    let name = self.intern(name);
                    let alias = match alias {
                        Some(a) => self.intern(a),
                        None => name,
                    };
                    self.b.emit(Instr::ImportFrom {
                        module,
                        name,
                        alias,
                    });
                }
            }
            StatKind::Global(_) | StatKind::Nonlocal(_) => {}
        }
    }

    fn compile_try(
        &mut self,
        body: &[Stat],
        excepts: &[crate::expressions::ExceptClause],
        finally: &[Stat],
    ) {
        let enter = self.b.emit_jump(|_| Instr::EnterTry {
            except_pc: NO_TARGET,
            finally_pc: NO_TARGET,
        });
        self.try_depth += 1;

        self.compile_block(body);
        self.b.emit(Instr::LeaveTry);
        let done_jump = self.b.emit_jump(Instr::Jump);
        let mut clause_done_jumps = vec![done_jump];

        let except_pc = if excepts.is_empty() {
            NO_TARGET
        } else {
            let pc = self.b.here();
            for clause in excepts {
                self.b.set_location(clause.pos);
                let no_match = clause.exc_type.as_ref().map(|texpr| {
                    self.compile_expr(texpr);
                    self.b.emit_jump(Instr::ExcMatch)
                });
                if let Some(binding) = &clause.binding {
                    self.b.emit(Instr::PushExc);
                    self.store_name(binding);
                }
                self.compile_block(&clause.body);
                self.b.emit(Instr::LeaveTry);
                clause_done_jumps.push(self.b.emit_jump(Instr::Jump));
                if let Some(label) = no_match {
                    self.b.patch_jump(label);
                }
            }
            // A default clause never falls through to here; without one,
            // an unmatched exception keeps propagating.
            if excepts.last().is_some_and(|c| c.exc_type.is_some()) {
                self.b.emit(Instr::Reraise);
            }
            pc
        };

        let finally_pc = if finally.is_empty() {
            NO_TARGET
        } else {
            let pc = self.b.here();
            self.compile_block(finally);
            self.b.emit(Instr::EndFinally);
            pc
        };

        // `done` sits right after EndFinally so a finally completing with
        // no pending action falls straight through.
        for label in clause_done_jumps {
            self.b.patch_jump(label);
        }
        self.b.patch_try(enter, except_pc, finally_pc);
        self.try_depth -= 1;
    }

    fn compile_function(&mut self, func: &FuncDefExpr, is_method: bool) {
        for param in &func.params {
            if let Some(default) = &param.default {
                self.compile_expr(default);
            }
        }
        let def = compile_funcdef(
            self.interns,
            &self.module,
            self.source.clone(),
            func,
            FnKind::Function,
        );
        let def = self.b.add_def(def);
        self.b.emit(Instr::MakeFunction { def, is_method });
    }

    fn compile_expr(&mut self, expr: &ExprNode) {
        self.b.set_location(expr.pos);
        match &expr.kind {
            Expr::Literal(lit) => {
                let c = match lit {
                    crate::expressions::Literal::None => Const::None,
                    crate::expressions::Literal::Bool(b) => Const::Bool(*b),
                    crate::expressions::Literal::Int(i) => Const::Int(*i),
                    crate::expressions::Literal::Float(f) => Const::Float(*f),
                    crate::expressions::Literal::Str(s) => Const::Str(self.interns.intern(s)),
                };
                let c = self.b.add_const(c);
                self.b.emit(Instr::LoadConst(c));
            }
            Expr::Var(name) => self.load_name(name),
            Expr::Tuple(items) => {
                for item in items {
                    self.compile_expr(item);
                }
                self.b.emit(Instr::BuildTuple(items.len() as u16));
            }
            Expr::List(items) => {
                for item in items {
                    self.compile_expr(item);
                }
                self.b.emit(Instr::BuildList(items.len() as u16));
            }
            Expr::Dict(entries) => {
                for (k, v) in entries {
                    self.compile_expr(k);
                    self.compile_expr(v);
                }
                self.b.emit(Instr::BuildDict(entries.len() as u16));
            }
            Expr::Set(items) => {
                for item in items {
                    self.compile_expr(item);
                }
                self.b.emit(Instr::BuildSet(items.len() as u16));
            }
            Expr::ListComp {
                expr_fn,
                bind_fn,
                iterable,
            } => {
                self.compile_function(expr_fn, false);
                self.compile_function(bind_fn, false);
                self.compile_expr(iterable);
                self.b.emit(Instr::ListComp);
            }
            Expr::Attr { obj, name } => {
                self.compile_expr(obj);
                let name = self.intern(name);
                self.b.emit(Instr::LoadAttr(name));
            }
            Expr::Index { obj, index } => {
                self.compile_expr(obj);
                self.compile_expr(index);
                self.b.emit(Instr::LoadIndex);
            }
            Expr::Slice { start, stop, step } => {
                for part in [start, stop, step] {
                    match part {
                        Some(e) => self.compile_expr(e),
                        None => {
                            let none = self.b.add_const(Const::None);
                            self.b.emit(Instr::LoadConst(none));
                        }
                    }
                }
                self.b.emit(Instr::BuildSlice);
            }
            Expr::Call { callee, args } => {
                self.compile_expr(callee);
                self.b.emit(Instr::BeginCall);
                for arg in args {
                    match arg {
                        CallArg::Pos(e) => self.compile_expr(e),
                        CallArg::Star(e) => {
                            self.compile_expr(e);
                            self.b.emit(Instr::SpreadArgs);
                        }
                        CallArg::Keyword(name, e) => {
                            self.compile_expr(e);
                            let name = self.intern(name);
                            self.b.emit(Instr::CollectKwarg(name));
                        }
                        CallArg::StarStar(e) => {
                            self.compile_expr(e);
                            self.b.emit(Instr::SpreadKwargs);
                        }
                    }
                }
                self.b.emit(Instr::Call);
            }
            Expr::Unary { op, operand } => {
                self.compile_expr(operand);
                self.b.emit(Instr::Unary(*op));
            }
            Expr::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs);
                self.compile_expr(rhs);
                self.b.emit(Instr::Binary(*op));
            }
            Expr::Compare { op, lhs, rhs } => {
                self.compile_expr(lhs);
                self.compile_expr(rhs);
                self.b.emit(Instr::Compare(*op));
            }
            Expr::Bool { op, lhs, rhs } => {
                self.compile_expr(lhs);
                let jump = match op {
                    BoolOp::And => self.b.emit_jump(Instr::JumpIfFalseOrPop),
                    BoolOp::Or => self.b.emit_jump(Instr::JumpIfTrueOrPop),
                };
                self.compile_expr(rhs);
                self.b.patch_jump(jump);
            }
            Expr::Ternary { cond, then, orelse } => {
                self.compile_expr(cond);
                let jf = self.b.emit_jump(Instr::JumpIfFalse);
                self.compile_expr(then);
                let jend = self.b.emit_jump(Instr::Jump);
                self.b.patch_jump(jf);
                self.compile_expr(orelse);
                self.b.patch_jump(jend);
            }
            Expr::Assign { target, value } => {
                self.compile_expr(value);
                self.b.emit(Instr::Dup);
                self.compile_store_target(target);
            }
            Expr::AugAssign { target, op, value } => {
                self.compile_load_target(target);
                self.compile_expr(value);
                self.b.emit(Instr::Binary(*op));
                self.b.emit(Instr::Dup);
                self.compile_store_target(target);
            }
            Expr::Function(f) => {
                self.compile_function(f, false);
            }
        }
    }

    /// Stores the value on top of stack into the target, consuming it.
    fn compile_store_target(&mut self, target: &AssignTarget) {
        match target {
            AssignTarget::Direct(name) => self.store_name(name),
            AssignTarget::Attr { obj, name } => {
                self.compile_expr(obj);
                let name = self.intern(name);
                self.b.emit(Instr::StoreAttr(name));
            }
            AssignTarget::Index { obj, index } => {
                self.compile_expr(obj);
                self.compile_expr(index);
                self.b.emit(Instr::StoreIndex);
            }
            AssignTarget::Pack(targets) => {
                self.b.emit(Instr::UnpackSequence(targets.len() as u16));
                for t in targets {
                    self.compile_store_target(t);
                }
            }
        }
    }

    fn compile_load_target(&mut self, target: &AssignTarget) {
        match target {
            AssignTarget::Direct(name) => self.load_name(name),
            AssignTarget::Attr { obj, name } => {
                self.compile_expr(obj);
                let name = self.intern(name);
                self.b.emit(Instr::LoadAttr(name));
            }
            AssignTarget::Index { obj, index } => {
                self.compile_expr(obj);
                self.compile_expr(index);
                self.b.emit(Instr::LoadIndex);
            }
            AssignTarget::Pack(_) => unreachable!("parser rejects compound pack targets"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(src: &str) -> Rc<FuncDef> {
        let mut interns = Interns::new();
        let module: Rc<str> = Rc::from("m");
        compile_source(&mut interns, &module, src, false).expect("compile failed")
    }

    /// Every jump operand must be patched; only EnterTry may keep an
    /// absent-handler sentinel.
    fn assert_fully_patched(def: &FuncDef) {
        let len = def.code.instrs.len() as u32;
        for instr in &def.code.instrs {
            let target = match instr {
                Instr::Jump(t)
                | Instr::JumpIfFalse(t)
                | Instr::JumpIfTrue(t)
                | Instr::JumpIfFalseOrPop(t)
                | Instr::JumpIfTrueOrPop(t)
                | Instr::IterNext(t)
                | Instr::ExcMatch(t)
                | Instr::UnwindJump { target: t, .. } => *t,
                _ => continue,
            };
            assert_ne!(target, NO_TARGET, "unpatched jump in {:?}", def.name);
            assert!(target <= len, "jump target out of range");
        }
        for def in &def.code.defs {
            assert_fully_patched(def);
        }
    }

    #[test]
    fn body_ends_with_implicit_return() {
        let def = compile("x = 1");
        assert!(matches!(def.code.instrs.last(), Some(Instr::Return)));
        assert_eq!(def.code.instrs.len(), def.code.spans.len());
    }

    #[test]
    fn jumps_are_patched() {
        let def = compile(
            "if a:\n    b = 1\nelif c:\n    b = 2\nelse:\n    b = 3\nwhile b:\n    if b == 2: break\n    b = b - 1\nfor i in [1, 2]:\n    continue\n",
        );
        assert_fully_patched(&def);
    }

    #[test]
    fn try_sections_are_wired() {
        let def = compile(
            "try:\n    x = 1\nexcept ValueError as e:\n    x = 2\nfinally:\n    x = 3\n",
        );
        assert_fully_patched(&def);
        let enter = def
            .code
            .instrs
            .iter()
            .find_map(|i| match i {
                Instr::EnterTry {
                    except_pc,
                    finally_pc,
                } => Some((*except_pc, *finally_pc)),
                _ => None,
            })
            .expect("try emits EnterTry");
        assert_ne!(enter.0, NO_TARGET);
        assert_ne!(enter.1, NO_TARGET);
        assert!(def.code.instrs.iter().any(|i| matches!(i, Instr::EndFinally)));
    }

    #[test]
    fn module_names_compile_as_globals() {
        let def = compile("x = 1\ny = x");
        assert!(def.is_module_body);
        assert!(
            def.code
                .instrs
                .iter()
                .any(|i| matches!(i, Instr::StoreGlobal(_)))
        );
        assert!(
            !def.code
                .instrs
                .iter()
                .any(|i| matches!(i, Instr::StoreLocal(_)))
        );
    }

    #[test]
    fn function_locals_get_slots_and_captures_get_capture_loads() {
        let def = compile("def mk():\n    x = 0\n    def inc(): nonlocal x; x += 1; return x\n    return inc\n");
        let mk = &def.code.defs[0];
        assert!(mk.slot_of(mk.locals[0]).is_some());
        let inc = &mk.code.defs[0];
        assert_eq!(inc.capture_slots.len(), 1);
        assert!(
            inc.code
                .instrs
                .iter()
                .any(|i| matches!(i, Instr::LoadCapture { .. }))
        );
    }
}
