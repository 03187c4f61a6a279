//! The stack machine executing compiled instruction vectors.
//!
//! Each activation is a [`Frame`] owned by the context (so its stack and
//! cells are GC roots). Control transfers that must run pending `finally`
//! blocks — return, break, continue, raise — are encoded as tagged
//! [`PendingAction`]s threaded through [`unwind`], never as native
//! unwinding.
//!
//! Instruction handlers follow one discipline throughout: operands are
//! read from the stack by peeking and only popped once the result is in
//! hand, so everything stays reachable across any allocation the handler
//! performs.

mod attr;
mod binary;
mod call;
mod collections;
mod compare;
mod protocol;

use std::rc::Rc;

use ahash::AHashMap;

pub(crate) use attr::{del_attr, get_attr, get_attr_from_base, get_attr_opt, set_attr};
pub(crate) use call::{call_class, call_value, materialize_exception};
pub(crate) use collections::{del_index, get_index, set_index};
pub(crate) use protocol::{
    get_iter, iter_next, py_eq, py_hash, py_len, py_lt, py_repr, py_str, py_truthy,
};

use crate::args::CallArgs;
use crate::context::Context;
use crate::exception::{ExcPayload, ExcType, RunError, RunResult, SourcePos, TraceFrame};
use crate::function::Func;
use crate::heap::{HeapData, HeapId};
use crate::intern::StringId;
use crate::types::{Dict, List, Set, Slice};
use crate::value::Value;

use super::code::{Const, FuncDef};
use super::op::{Instr, NO_TARGET};

/// One try statement's runtime bookkeeping.
#[derive(Debug)]
pub(crate) struct TryBlock {
    except_pc: u32,
    finally_pc: u32,
    /// Value-stack depth at `EnterTry`; unwinding truncates back to it.
    stack_depth: usize,
    state: BlockState,
}

#[derive(Debug)]
enum BlockState {
    /// The block is live; `handling` holds the exception object once the
    /// except section has been entered.
    Active { handling: Option<Value> },
    /// The finally body is running; the action resumes at `EndFinally`.
    InFinally(PendingAction),
}

/// A control transfer waiting for pending `finally` blocks to run.
#[derive(Debug)]
pub(crate) enum PendingAction {
    /// Nothing pending: the finally was entered from normal completion.
    None,
    /// A break or continue heading for `target`, keeping `try_depth`
    /// enclosing try blocks intact.
    Jump { target: u32, try_depth: u16 },
    Return(Value),
    Raise(RunError),
}

/// One activation of a compiled function.
#[derive(Debug)]
pub(crate) struct Frame {
    pub def: Rc<FuncDef>,
    /// One cell per local slot.
    pub locals: Vec<HeapId>,
    /// Cells created on demand when a closure captures a name this frame
    /// never mentions; shared by all closures made in this frame.
    pub extra_cells: AHashMap<StringId, HeapId>,
    pub stack: Vec<Value>,
    /// Argument-frame marks for calls being assembled.
    pub marks: Vec<usize>,
    /// Pending keyword arguments, parallel to `marks`.
    pub kwarg_scratch: Vec<Vec<(StringId, Value)>>,
    pub blocks: Vec<TryBlock>,
    pub pc: usize,
}

impl Frame {
    pub fn new(def: Rc<FuncDef>) -> Self {
        Self {
            def,
            locals: Vec::new(),
            extra_cells: AHashMap::new(),
            stack: Vec::new(),
            marks: Vec::new(),
            kwarg_scratch: Vec::new(),
            blocks: Vec::new(),
            pc: 0,
        }
    }

    /// Source position of the instruction currently executing.
    pub fn current_span(&self) -> SourcePos {
        let index = self.pc.saturating_sub(1);
        self.def
            .code
            .spans
            .get(index)
            .copied()
            .unwrap_or_default()
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        out.extend(self.locals.iter().copied());
        out.extend(self.extra_cells.values().copied());
        for v in &self.stack {
            if let Value::Ref(id) = v {
                out.push(*id);
            }
        }
        for kwargs in &self.kwarg_scratch {
            for (_, v) in kwargs {
                if let Value::Ref(id) = v {
                    out.push(*id);
                }
            }
        }
        for block in &self.blocks {
            match &block.state {
                BlockState::Active { handling } => {
                    if let Some(Value::Ref(id)) = handling {
                        out.push(*id);
                    }
                }
                BlockState::InFinally(action) => match action {
                    PendingAction::Return(Value::Ref(id)) => out.push(*id),
                    PendingAction::Raise(err) => {
                        if let ExcPayload::Object(Value::Ref(id)) = err.exc.payload {
                            out.push(id);
                        }
                    }
                    _ => {}
                },
            }
        }
    }
}

enum Flow {
    Continue,
    Return(Value),
}

macro_rules! frame {
    ($ctx:expr) => {
        $ctx.frames.last_mut().expect("a frame is active")
    };
}

/// Runs the top frame to completion.
pub(crate) fn run_frame(ctx: &mut Context) -> RunResult<Value> {
    loop {
        let frame = frame!(ctx);
        let Some(instr) = frame.def.code.instrs.get(frame.pc).copied() else {
            // Instruction exhaustion: implicit None.
            return Ok(Value::Null);
        };
        frame.pc += 1;
        match execute(ctx, instr) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Return(v)) => return Ok(v),
            Err(err) => match unwind(ctx, PendingAction::Raise(err))? {
                Flow::Continue => {}
                Flow::Return(v) => return Ok(v),
            },
        }
    }
}

/// Routes a pending control transfer through the frame's try blocks,
/// running finally bodies along the way.
fn unwind(ctx: &mut Context, action: PendingAction) -> RunResult<Flow> {
    match action {
        PendingAction::None => Ok(Flow::Continue),
        PendingAction::Jump { target, try_depth } => {
            loop {
                let frame = frame!(ctx);
                if frame.blocks.len() <= try_depth as usize {
                    frame.pc = target as usize;
                    return Ok(Flow::Continue);
                }
                let block = frame.blocks.pop().expect("checked non-empty");
                frame.stack.truncate(block.stack_depth);
                if let BlockState::Active { .. } = block.state {
                    if block.finally_pc != NO_TARGET {
                        frame.pc = block.finally_pc as usize;
                        frame.blocks.push(TryBlock {
                            state: BlockState::InFinally(PendingAction::Jump {
                                target,
                                try_depth,
                            }),
                            ..block
                        });
                        return Ok(Flow::Continue);
                    }
                }
                // Stale finally bookkeeping or a plain except block: drop it.
            }
        }
        PendingAction::Return(v) => {
            loop {
                let frame = frame!(ctx);
                let Some(block) = frame.blocks.pop() else {
                    return Ok(Flow::Return(v));
                };
                frame.stack.truncate(block.stack_depth);
                if let BlockState::Active { .. } = block.state {
                    if block.finally_pc != NO_TARGET {
                        frame.pc = block.finally_pc as usize;
                        frame.blocks.push(TryBlock {
                            state: BlockState::InFinally(PendingAction::Return(v)),
                            ..block
                        });
                        return Ok(Flow::Continue);
                    }
                }
            }
        }
        PendingAction::Raise(mut err) => {
            if frame!(ctx).blocks.is_empty() {
                return Err(err);
            }
            // Materialize once so handler entry stores a real object.
            let exc_value = match &err.exc.payload {
                ExcPayload::Object(v) => *v,
                ExcPayload::Simple { exc_type, message } => {
                    let exc_type = *exc_type;
                    let message = message.clone();
                    let v = materialize_exception(ctx, exc_type, message)?;
                    err.exc.payload = ExcPayload::Object(v);
                    v
                }
            };
            enum Step {
                Handle,
                Finally,
                Drop,
                Propagate,
            }
            loop {
                let frame = frame!(ctx);
                let step = match frame.blocks.last() {
                    None => Step::Propagate,
                    Some(b) => match &b.state {
                        BlockState::Active { handling }
                            if b.except_pc != NO_TARGET && handling.is_none() =>
                        {
                            Step::Handle
                        }
                        BlockState::Active { .. } if b.finally_pc != NO_TARGET => Step::Finally,
                        _ => Step::Drop,
                    },
                };
                match step {
                    Step::Propagate => return Err(err),
                    Step::Drop => {
                        frame.blocks.pop();
                    }
                    Step::Handle => {
                        let block = frame.blocks.last_mut().expect("checked above");
                        block.state = BlockState::Active {
                            handling: Some(exc_value),
                        };
                        let (pc, depth) = (block.except_pc, block.stack_depth);
                        frame.stack.truncate(depth);
                        frame.pc = pc as usize;
                        return Ok(Flow::Continue);
                    }
                    Step::Finally => {
                        let block = frame.blocks.last_mut().expect("checked above");
                        let (pc, depth) = (block.finally_pc, block.stack_depth);
                        block.state = BlockState::InFinally(PendingAction::Raise(err));
                        frame.stack.truncate(depth);
                        frame.pc = pc as usize;
                        return Ok(Flow::Continue);
                    }
                }
            }
        }
    }
}

/// The exception object currently being handled by the innermost except
/// section, if any.
fn current_handled_exception(ctx: &Context) -> Option<Value> {
    let frame = ctx.frames.last()?;
    frame.blocks.iter().rev().find_map(|b| match &b.state {
        BlockState::Active { handling } => *handling,
        BlockState::InFinally(_) => None,
    })
}

fn execute(ctx: &mut Context, instr: Instr) -> RunResult<Flow> {
    match instr {
        Instr::LoadConst(index) => {
            let c = frame!(ctx).def.code.consts[index as usize];
            let v = match c {
                Const::None => Value::Null,
                Const::Bool(b) => Value::Bool(b),
                Const::Int(i) => Value::Int(i),
                Const::Float(f) => Value::Float(f),
                Const::Str(id) => {
                    let s = ctx.interns.get(id).to_string();
                    ctx.alloc(HeapData::Str(s.into_boxed_str()))?
                }
            };
            frame!(ctx).stack.push(v);
        }
        Instr::LoadLocal(slot) => {
            let frame = frame!(ctx);
            let cell = frame.locals[slot as usize];
            let HeapData::Cell(v) = ctx.heap.get(cell) else {
                unreachable!("local slots hold cells");
            };
            let v = *v;
            if matches!(v, Value::Undefined) {
                let name = frame!(ctx).def.locals[slot as usize];
                return Err(ExcType::name_error(ctx.interns.get(name)));
            }
            frame!(ctx).stack.push(v);
        }
        Instr::LoadCapture { slot, name } => {
            let cell = frame!(ctx).locals[slot as usize];
            let HeapData::Cell(v) = ctx.heap.get(cell) else {
                unreachable!("local slots hold cells");
            };
            let v = *v;
            if matches!(v, Value::Undefined) {
                // Unassigned capture: resolve as a global of the defining
                // module, falling back to the builtins.
                let module = frame!(ctx).def.module.clone();
                match ctx.lookup_global(&module, name) {
                    Some(v) => frame!(ctx).stack.push(v),
                    None => return Err(ExcType::name_error(ctx.interns.get(name))),
                }
            } else {
                frame!(ctx).stack.push(v);
            }
        }
        Instr::StoreLocal(slot) => {
            let frame = frame!(ctx);
            let v = frame.stack.pop().expect("store operand");
            let cell = frame.locals[slot as usize];
            *ctx.heap.get_mut(cell) = HeapData::Cell(v);
        }
        Instr::LoadGlobal(name) => {
            let module = frame!(ctx).def.module.clone();
            match ctx.lookup_global(&module, name) {
                Some(v) => frame!(ctx).stack.push(v),
                None => return Err(ExcType::name_error(ctx.interns.get(name))),
            }
        }
        Instr::StoreGlobal(name) => {
            let module = frame!(ctx).def.module.clone();
            let v = *frame!(ctx).stack.last().expect("store operand");
            ctx.set_global_value(&module, name, v)?;
            frame!(ctx).stack.pop();
        }
        Instr::Pop => {
            frame!(ctx).stack.pop();
        }
        Instr::Dup => {
            let frame = frame!(ctx);
            let v = *frame.stack.last().expect("dup operand");
            frame.stack.push(v);
        }
        Instr::Binary(op) => {
            let frame = frame!(ctx);
            let n = frame.stack.len();
            let (lhs, rhs) = (frame.stack[n - 2], frame.stack[n - 1]);
            let result = binary::binary_op(ctx, op, lhs, rhs)?;
            let frame = frame!(ctx);
            frame.stack.truncate(n - 2);
            frame.stack.push(result);
        }
        Instr::Compare(op) => {
            let frame = frame!(ctx);
            let n = frame.stack.len();
            let (lhs, rhs) = (frame.stack[n - 2], frame.stack[n - 1]);
            let result = compare::compare_op(ctx, op, lhs, rhs)?;
            let frame = frame!(ctx);
            frame.stack.truncate(n - 2);
            frame.stack.push(result);
        }
        Instr::Unary(op) => {
            let v = *frame!(ctx).stack.last().expect("unary operand");
            let result = binary::unary_op(ctx, op, v)?;
            let frame = frame!(ctx);
            frame.stack.pop();
            frame.stack.push(result);
        }
        Instr::LoadAttr(name) => {
            let obj = *frame!(ctx).stack.last().expect("attr object");
            let v = attr::get_attr(ctx, obj, name)?;
            let frame = frame!(ctx);
            frame.stack.pop();
            frame.stack.push(v);
        }
        Instr::StoreAttr(name) => {
            let frame = frame!(ctx);
            let n = frame.stack.len();
            let (value, obj) = (frame.stack[n - 2], frame.stack[n - 1]);
            attr::set_attr(ctx, obj, name, value)?;
            frame!(ctx).stack.truncate(n - 2);
        }
        Instr::LoadIndex => {
            let frame = frame!(ctx);
            let n = frame.stack.len();
            let (obj, index) = (frame.stack[n - 2], frame.stack[n - 1]);
            let v = collections::get_index(ctx, obj, index)?;
            let frame = frame!(ctx);
            frame.stack.truncate(n - 2);
            frame.stack.push(v);
        }
        Instr::StoreIndex => {
            let frame = frame!(ctx);
            let n = frame.stack.len();
            let (value, obj, index) = (frame.stack[n - 3], frame.stack[n - 2], frame.stack[n - 1]);
            collections::set_index(ctx, obj, index, value)?;
            frame!(ctx).stack.truncate(n - 3);
        }
        Instr::BuildTuple(count) => {
            let frame = frame!(ctx);
            let n = frame.stack.len();
            let items: Box<[Value]> = frame.stack[n - count as usize..].into();
            let v = ctx.alloc(HeapData::Tuple(items))?;
            let frame = frame!(ctx);
            frame.stack.truncate(n - count as usize);
            frame.stack.push(v);
        }
        Instr::BuildList(count) => {
            let frame = frame!(ctx);
            let n = frame.stack.len();
            let items: Vec<Value> = frame.stack[n - count as usize..].to_vec();
            let v = ctx.alloc(HeapData::List(List::new(items)))?;
            let frame = frame!(ctx);
            frame.stack.truncate(n - count as usize);
            frame.stack.push(v);
        }
        Instr::BuildDict(pairs) => {
            let dict = ctx.alloc(HeapData::Dict(Dict::new()))?;
            let Value::Ref(dict_id) = dict else {
                unreachable!("alloc returns a heap reference");
            };
            frame!(ctx).stack.push(dict);
            let n = frame!(ctx).stack.len();
            let base = n - 1 - 2 * pairs as usize;
            for i in 0..pairs as usize {
                let frame = frame!(ctx);
                let key = frame.stack[base + 2 * i];
                let value = frame.stack[base + 2 * i + 1];
                crate::types::dict::dict_set(ctx, dict_id, key, value)?;
            }
            let frame = frame!(ctx);
            frame.stack.drain(base..n - 1);
            debug_assert_eq!(*frame.stack.last().expect("dict on stack"), dict);
        }
        Instr::BuildSet(count) => {
            let set = ctx.alloc(HeapData::Set(Set::new()))?;
            let Value::Ref(set_id) = set else {
                unreachable!("alloc returns a heap reference");
            };
            frame!(ctx).stack.push(set);
            let n = frame!(ctx).stack.len();
            let base = n - 1 - count as usize;
            for i in 0..count as usize {
                let key = frame!(ctx).stack[base + i];
                crate::types::set::set_add(ctx, set_id, key)?;
            }
            frame!(ctx).stack.drain(base..n - 1);
        }
        Instr::BuildSlice => {
            let frame = frame!(ctx);
            let n = frame.stack.len();
            let slice = Slice {
                start: frame.stack[n - 3],
                stop: frame.stack[n - 2],
                step: frame.stack[n - 1],
            };
            let v = ctx.alloc(HeapData::Slice(slice))?;
            let frame = frame!(ctx);
            frame.stack.truncate(n - 3);
            frame.stack.push(v);
        }
        Instr::UnpackSequence(count) => {
            let seq = *frame!(ctx).stack.last().expect("unpack operand");
            let items: Vec<Value> = match seq {
                Value::Ref(id) => match ctx.heap.get(id) {
                    HeapData::Tuple(items) => items.to_vec(),
                    HeapData::List(list) => list.items.clone(),
                    other => {
                        return Err(ExcType::type_error(format!(
                            "cannot unpack '{}' object",
                            other.type_of().name()
                        )));
                    }
                },
                _ => {
                    return Err(ExcType::type_error(format!(
                        "cannot unpack '{}' object",
                        seq.type_name(&ctx.heap)
                    )));
                }
            };
            if items.len() != count as usize {
                return Err(ExcType::value_error(format!(
                    "expected {} values to unpack, got {}",
                    count,
                    items.len()
                )));
            }
            let frame = frame!(ctx);
            frame.stack.pop();
            frame.stack.extend(items.into_iter().rev());
        }
        Instr::Jump(target) => {
            frame!(ctx).pc = target as usize;
        }
        Instr::JumpIfFalse(target) => {
            let v = *frame!(ctx).stack.last().expect("condition");
            let truthy = protocol::py_truthy(ctx, v)?;
            let frame = frame!(ctx);
            frame.stack.pop();
            if !truthy {
                frame.pc = target as usize;
            }
        }
        Instr::JumpIfTrue(target) => {
            let v = *frame!(ctx).stack.last().expect("condition");
            let truthy = protocol::py_truthy(ctx, v)?;
            let frame = frame!(ctx);
            frame.stack.pop();
            if truthy {
                frame.pc = target as usize;
            }
        }
        Instr::JumpIfFalseOrPop(target) => {
            let v = *frame!(ctx).stack.last().expect("condition");
            let truthy = protocol::py_truthy(ctx, v)?;
            let frame = frame!(ctx);
            if truthy {
                frame.stack.pop();
            } else {
                frame.pc = target as usize;
            }
        }
        Instr::JumpIfTrueOrPop(target) => {
            let v = *frame!(ctx).stack.last().expect("condition");
            let truthy = protocol::py_truthy(ctx, v)?;
            let frame = frame!(ctx);
            if truthy {
                frame.pc = target as usize;
            } else {
                frame.stack.pop();
            }
        }
        Instr::BeginCall => {
            let frame = frame!(ctx);
            frame.marks.push(frame.stack.len());
            frame.kwarg_scratch.push(Vec::new());
        }
        Instr::CollectKwarg(name) => {
            let frame = frame!(ctx);
            let v = frame.stack.pop().expect("keyword argument value");
            frame
                .kwarg_scratch
                .last_mut()
                .expect("open call")
                .push((name, v));
        }
        Instr::SpreadArgs => {
            let seq = *frame!(ctx).stack.last().expect("spread operand");
            let items: Vec<Value> = match seq {
                Value::Ref(id) => match ctx.heap.get(id) {
                    HeapData::Tuple(items) => items.to_vec(),
                    HeapData::List(list) => list.items.clone(),
                    other => {
                        return Err(ExcType::type_error(format!(
                            "argument unpacking requires a tuple or list, not '{}'",
                            other.type_of().name()
                        )));
                    }
                },
                _ => {
                    return Err(ExcType::type_error(format!(
                        "argument unpacking requires a tuple or list, not '{}'",
                        seq.type_name(&ctx.heap)
                    )));
                }
            };
            let frame = frame!(ctx);
            frame.stack.pop();
            frame.stack.extend(items);
        }
        Instr::SpreadKwargs => {
            let v = *frame!(ctx).stack.last().expect("spread operand");
            let pairs: Vec<(Value, Value)> = match v {
                Value::Ref(id) => match ctx.heap.get(id) {
                    HeapData::Dict(d) => d.entries.iter().map(|e| (e.key, e.value)).collect(),
                    other => {
                        return Err(ExcType::type_error(format!(
                            "keyword argument unpacking requires a dict, not '{}'",
                            other.type_of().name()
                        )));
                    }
                },
                _ => {
                    return Err(ExcType::type_error(
                        "keyword argument unpacking requires a dict",
                    ));
                }
            };
            let mut named = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                let Value::Ref(id) = key else {
                    return Err(ExcType::type_error("keywords must be strings"));
                };
                let HeapData::Str(s) = ctx.heap.get(id) else {
                    return Err(ExcType::type_error("keywords must be strings"));
                };
                let name = s.to_string();
                named.push((ctx.interns.intern(&name), value));
            }
            let frame = frame!(ctx);
            frame.stack.pop();
            frame
                .kwarg_scratch
                .last_mut()
                .expect("open call")
                .extend(named);
        }
        Instr::Call => {
            let frame = frame!(ctx);
            let mark = frame.marks.pop().expect("open call");
            let kwargs = frame.kwarg_scratch.pop().expect("open call");
            let pos: smallvec::SmallVec<[Value; 4]> = frame.stack[mark..].iter().copied().collect();
            let callee = frame.stack[mark - 1];
            let result = call::call_value(ctx, callee, CallArgs { pos, kwargs })?;
            let frame = frame!(ctx);
            frame.stack.truncate(mark - 1);
            frame.stack.push(result);
        }
        Instr::MakeFunction { def, is_method } => {
            call::make_function(ctx, def, is_method)?;
        }
        Instr::MakeClass { def, bases } => {
            call::make_class(ctx, def, bases)?;
        }
        Instr::GetIter => {
            let v = *frame!(ctx).stack.last().expect("iterable");
            let it = protocol::get_iter(ctx, v)?;
            let frame = frame!(ctx);
            frame.stack.pop();
            frame.stack.push(it);
        }
        Instr::IterNext(target) => {
            let it = *frame!(ctx).stack.last().expect("iterator");
            match protocol::iter_next(ctx, it)? {
                Some(v) => frame!(ctx).stack.push(v),
                None => {
                    let frame = frame!(ctx);
                    frame.stack.pop();
                    frame.pc = target as usize;
                }
            }
        }
        Instr::ListComp => {
            collections::list_comp(ctx)?;
        }
        Instr::EnterTry {
            except_pc,
            finally_pc,
        } => {
            let frame = frame!(ctx);
            let stack_depth = frame.stack.len();
            frame.blocks.push(TryBlock {
                except_pc,
                finally_pc,
                stack_depth,
                state: BlockState::Active { handling: None },
            });
        }
        Instr::LeaveTry => {
            let frame = frame!(ctx);
            let block = frame.blocks.last_mut().expect("open try block");
            if block.finally_pc == NO_TARGET {
                frame.blocks.pop();
            } else {
                let finally_pc = block.finally_pc;
                let depth = block.stack_depth;
                block.state = BlockState::InFinally(PendingAction::None);
                frame.stack.truncate(depth);
                frame.pc = finally_pc as usize;
            }
        }
        Instr::EndFinally => {
            let frame = frame!(ctx);
            let block = frame.blocks.pop().expect("open try block");
            let BlockState::InFinally(action) = block.state else {
                unreachable!("EndFinally outside a finally body");
            };
            return unwind(ctx, action);
        }
        Instr::Raise => {
            let v = *frame!(ctx).stack.last().expect("raise operand");
            let err = call::normalize_raise(ctx, v)?;
            frame!(ctx).stack.pop();
            return Err(err);
        }
        Instr::Reraise => {
            match current_handled_exception(ctx) {
                Some(exc) => return Err(RunError::object(exc)),
                None => {
                    return Err(ExcType::runtime_error("no active exception to re-raise"));
                }
            }
        }
        Instr::ExcMatch(target) => {
            let class = *frame!(ctx).stack.last().expect("except class");
            let exc =
                current_handled_exception(ctx).expect("ExcMatch runs inside an except section");
            let matches = call::exception_matches(ctx, exc, class)?;
            let frame = frame!(ctx);
            frame.stack.pop();
            if !matches {
                frame.pc = target as usize;
            }
        }
        Instr::PushExc => {
            let exc =
                current_handled_exception(ctx).expect("PushExc runs inside an except section");
            frame!(ctx).stack.push(exc);
        }
        Instr::Return => {
            let v = frame!(ctx).stack.pop().expect("return value");
            if frame!(ctx).blocks.is_empty() {
                return Ok(Flow::Return(v));
            }
            return unwind(ctx, PendingAction::Return(v));
        }
        Instr::UnwindJump { target, try_depth } => {
            return unwind(ctx, PendingAction::Jump { target, try_depth });
        }
        Instr::Import { name, alias } => {
            crate::modules::import_module(ctx, name, alias)?;
        }
        Instr::ImportFrom {
            module,
            name,
            alias,
        } => {
            crate::modules::import_from_module(ctx, module, name, alias)?;
        }
    }
    Ok(Flow::Continue)
}

/// Executes a compiled definition in a fresh frame.
///
/// `collect_locals` is used by class construction: the returned snapshot
/// of the body's locals becomes the class's instance template.
pub(crate) fn execute_def(
    ctx: &mut Context,
    def: &Rc<FuncDef>,
    captures: &Rc<[(StringId, HeapId)]>,
    defaults: &Rc<[Value]>,
    args: CallArgs,
    collect_locals: bool,
) -> RunResult<(Value, Option<Vec<(StringId, Value)>>)> {
    if ctx.trace.len() >= ctx.max_recursion {
        return Err(ExcType::recursion_error());
    }
    ctx.trace.push((def.module.clone(), def.name.clone()));
    ctx.frames.push(Frame::new(def.clone()));

    let result = call::bind_frame(ctx, def, captures, defaults, args)
        .and_then(|()| run_frame(ctx));

    let snapshot = if collect_locals && result.is_ok() {
        let frame = ctx.frames.last().expect("frame still active");
        let mut locals = Vec::with_capacity(frame.locals.len());
        for (i, cell) in frame.locals.iter().enumerate() {
            if let HeapData::Cell(v) = ctx.heap.get(*cell) {
                if !matches!(v, Value::Undefined) {
                    locals.push((frame.def.locals[i], *v));
                }
            }
        }
        Some(locals)
    } else {
        None
    };

    let error_span = ctx
        .frames
        .last()
        .map(Frame::current_span)
        .unwrap_or_default();
    ctx.frames.pop();
    ctx.trace.pop();

    match result {
        Ok(v) => Ok((v, snapshot)),
        Err(mut err) => {
            let line_text = def
                .source
                .get(error_span.line as usize)
                .map(|l| Box::from(&**l));
            err.push_frame(TraceFrame {
                pos: error_span,
                line_text,
                module: def.module.clone(),
                function: def.name.clone(),
                syntax_error: false,
            });
            Err(err)
        }
    }
}

/// Shared short-circuit comparison used by `in` checks on sequences.
pub(crate) fn sequence_contains(
    ctx: &mut Context,
    items: &[Value],
    needle: Value,
) -> RunResult<bool> {
    for item in items {
        if protocol::py_eq(ctx, needle, *item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Creates a bound method object over a plain function value.
pub(crate) fn bind_method(ctx: &mut Context, func: &Func, receiver: Value) -> RunResult<Value> {
    ctx.alloc(HeapData::Func(func.bind(receiver)))
}
