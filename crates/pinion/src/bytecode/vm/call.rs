//! Call dispatch: native functions, builtin type methods, script
//! functions, class construction, and raise normalization.

use std::rc::Rc;

use ahash::AHashMap;

use crate::args::CallArgs;
use crate::attrs::{AttrNode, AttrTable};
use crate::context::Context;
use crate::exception::{ExcType, RunError, RunResult};
use crate::function::{Func, FuncKind};
use crate::heap::{HeapData, HeapId};
use crate::intern::{StringId, Sym};
use crate::types::{Class, Dict, Instance, class};
use crate::value::Value;

use super::{attr, execute_def};

/// Calls any callable value with the given arguments.
///
/// The caller keeps every argument value reachable (on a frame stack or in
/// the temporary roots) for the duration of the call.
pub(crate) fn call_value(ctx: &mut Context, callee: Value, args: CallArgs) -> RunResult<Value> {
    let Value::Ref(id) = callee else {
        return Err(ExcType::type_error_not_callable(&callee.type_name(&ctx.heap)));
    };
    match ctx.heap.get(id) {
        HeapData::Func(func) => {
            let func = func.clone();
            call_func(ctx, &func, args)
        }
        HeapData::Class(_) => call_class(ctx, id, args),
        HeapData::Instance(_) => {
            // Callable instances go through their __call__ method.
            match attr::get_attr_opt(ctx, callee, Sym::Call.id())? {
                Some(method) => call_value(ctx, method, args),
                None => Err(ExcType::type_error_not_callable(
                    &callee.type_name(&ctx.heap),
                )),
            }
        }
        other => Err(ExcType::type_error_not_callable(other.type_of().name())),
    }
}

fn call_func(ctx: &mut Context, func: &Func, mut args: CallArgs) -> RunResult<Value> {
    if let Some(receiver) = func.bound_self {
        args.pos.insert(0, receiver);
    }
    match &func.kind {
        FuncKind::Native(f) => {
            let f = f.clone();
            f(ctx, &args)
        }
        FuncKind::TypeMethod(method) => {
            let receiver = args.pos[0];
            let rest = CallArgs {
                pos: args.pos[1..].iter().copied().collect(),
                kwargs: args.kwargs,
            };
            crate::types::methods::call_type_method(ctx, *method, receiver, &rest)
        }
        FuncKind::Def {
            def,
            captures,
            defaults,
        } => execute_def(ctx, def, captures, defaults, args, false).map(|(v, _)| v),
    }
}

/// Allocates the frame's cells and binds call arguments to parameters.
///
/// Positionals are consumed first, keywords fill by name, defaults fill
/// trailing gaps, surplus positionals go to `*args`, unmatched keywords to
/// `**kwargs`; anything else is a `TypeError`.
pub(super) fn bind_frame(
    ctx: &mut Context,
    def: &Rc<crate::bytecode::FuncDef>,
    captures: &Rc<[(StringId, HeapId)]>,
    defaults: &Rc<[Value]>,
    args: CallArgs,
) -> RunResult<()> {
    let capture_map: AHashMap<StringId, HeapId> = captures.iter().copied().collect();

    // Cells first; captured slots share the closure's cells, everything
    // else gets a fresh one. The frame shell is already pushed, so cells
    // become roots the moment they land in `locals`.
    for name in &def.locals {
        let cell = match capture_map.get(name) {
            Some(cell) => *cell,
            None => {
                let v = ctx.alloc(HeapData::Cell(Value::Undefined))?;
                let Value::Ref(cell) = v else {
                    unreachable!("alloc returns a heap reference");
                };
                cell
            }
        };
        ctx.frames
            .last_mut()
            .expect("frame just pushed")
            .locals
            .push(cell);
    }

    let nparams = def.params.len();
    let npos = args.pos.len();
    let fn_name = def.name.clone();
    let mut bound = vec![false; nparams];

    for i in 0..npos.min(nparams) {
        set_local(ctx, i, args.pos[i]);
        bound[i] = true;
    }

    match def.star_args {
        Some(star) => {
            let rest: Box<[Value]> = if npos > nparams {
                args.pos[nparams..].into()
            } else {
                Box::from([])
            };
            let tuple = ctx.alloc(HeapData::Tuple(rest))?;
            let slot = def.slot_of(star).expect("star slot exists");
            set_local(ctx, slot as usize, tuple);
        }
        None if npos > nparams => {
            return Err(ExcType::type_error_arg_count(&fn_name, nparams, npos));
        }
        None => {}
    }

    let mut extra_kwargs: Vec<(StringId, Value)> = Vec::new();
    for (name, value) in &args.kwargs {
        match def.params.iter().position(|p| p == name) {
            Some(i) => {
                if bound[i] {
                    return Err(ExcType::type_error(format!(
                        "{fn_name}() got multiple values for argument '{}'",
                        ctx.interns.get(*name)
                    )));
                }
                set_local(ctx, i, *value);
                bound[i] = true;
            }
            None if def.star_kwargs.is_some() => extra_kwargs.push((*name, *value)),
            None => {
                return Err(ExcType::type_error(format!(
                    "{fn_name}() got an unexpected keyword argument '{}'",
                    ctx.interns.get(*name)
                )));
            }
        }
    }

    let first_default = nparams - defaults.len();
    for i in 0..nparams {
        if !bound[i] {
            if i >= first_default {
                set_local(ctx, i, defaults[i - first_default]);
            } else {
                return Err(ExcType::type_error(format!(
                    "{fn_name}() missing required argument '{}'",
                    ctx.interns.get(def.params[i])
                )));
            }
        }
    }

    if let Some(star_kwargs) = def.star_kwargs {
        let dict = ctx.alloc(HeapData::Dict(Dict::new()))?;
        let Value::Ref(dict_id) = dict else {
            unreachable!("alloc returns a heap reference");
        };
        let slot = def.slot_of(star_kwargs).expect("kwargs slot exists");
        set_local(ctx, slot as usize, dict);
        for (name, value) in extra_kwargs {
            let key_text = ctx.interns.get(name).to_string();
            let key = ctx.alloc(HeapData::Str(key_text.into_boxed_str()))?;
            crate::types::dict::dict_set(ctx, dict_id, key, value)?;
        }
    }

    Ok(())
}

fn set_local(ctx: &mut Context, slot: usize, value: Value) {
    let cell = ctx.frames.last().expect("frame active").locals[slot];
    *ctx.heap.get_mut(cell) = HeapData::Cell(value);
}

/// Resolves a captured name to a cell in the current frame.
///
/// In the module body captures bind the module's global cells directly;
/// in a function they bind the frame's slot cell, or an on-demand cell
/// shared by every closure this frame creates.
fn resolve_capture_cell(ctx: &mut Context, name: StringId) -> RunResult<HeapId> {
    let frame = ctx.frames.last().expect("frame active");
    if frame.def.is_module_body {
        let module = frame.def.module.clone();
        return ctx.get_or_create_global_cell(&module, name);
    }
    if let Some(slot) = frame.def.slot_of(name) {
        return Ok(frame.locals[slot as usize]);
    }
    if let Some(cell) = frame.extra_cells.get(&name) {
        return Ok(*cell);
    }
    let v = ctx.alloc(HeapData::Cell(Value::Undefined))?;
    let Value::Ref(cell) = v else {
        unreachable!("alloc returns a heap reference");
    };
    ctx.frames
        .last_mut()
        .expect("frame active")
        .extra_cells
        .insert(name, cell);
    Ok(cell)
}

/// `MakeFunction`: pops default values, captures cells, pushes the
/// function object.
pub(super) fn make_function(ctx: &mut Context, def_index: u16, is_method: bool) -> RunResult<()> {
    let def = ctx.frames.last().expect("frame active").def.code.defs[def_index as usize].clone();

    let mut captures = Vec::with_capacity(def.capture_slots.len());
    for (_, name) in &def.capture_slots {
        let cell = resolve_capture_cell(ctx, *name)?;
        captures.push((*name, cell));
    }

    let n = def.defaults_count;
    let frame = ctx.frames.last().expect("frame active");
    let len = frame.stack.len();
    let defaults: Rc<[Value]> = frame.stack[len - n..].into();

    let func = Func {
        kind: FuncKind::Def {
            def: def.clone(),
            captures: captures.into(),
            defaults,
        },
        bound_self: None,
        is_method,
        module: def.module.clone(),
        name: def.name.clone(),
    };
    let v = ctx.alloc(HeapData::Func(func))?;
    let frame = ctx.frames.last_mut().expect("frame active");
    frame.stack.truncate(len - n);
    frame.stack.push(v);
    Ok(())
}

/// `MakeClass`: pops base classes, executes the body definition, and
/// pushes the class whose instance template holds the body's locals.
pub(super) fn make_class(ctx: &mut Context, def_index: u16, base_count: u16) -> RunResult<()> {
    let def = ctx.frames.last().expect("frame active").def.code.defs[def_index as usize].clone();

    let (base_ids, parent_templates) = {
        let frame = ctx.frames.last().expect("frame active");
        let len = frame.stack.len();
        let mut base_ids = Vec::with_capacity(base_count as usize);
        let mut parents = Vec::with_capacity(base_count as usize);
        for v in &frame.stack[len - base_count as usize..] {
            let Value::Ref(id) = v else {
                return Err(ExcType::type_error("class bases must be classes"));
            };
            let HeapData::Class(base) = ctx.heap.get(*id) else {
                return Err(ExcType::type_error("class bases must be classes"));
            };
            base_ids.push(*id);
            parents.push(base.template.clone());
        }
        (base_ids, parents)
    };

    let template = AttrNode::with_parents(parent_templates);
    let class = Class {
        name: def.name.clone(),
        module: def.module.clone(),
        bases: base_ids,
        template: template.clone(),
        ctor: None,
        exc_type: None,
    };
    let class_value = ctx.alloc(HeapData::Class(class))?;
    ctx.frames
        .last_mut()
        .expect("frame active")
        .stack
        .push(class_value);

    // Run the class body; its locals become the instance template.
    let mut captures = Vec::with_capacity(def.capture_slots.len());
    for (_, name) in &def.capture_slots {
        // The class value sits on the stack, so cell allocation here is safe.
        let cell = resolve_capture_cell(ctx, *name)?;
        captures.push((*name, cell));
    }
    let captures: Rc<[(StringId, HeapId)]> = captures.into();
    let no_defaults: Rc<[Value]> = Rc::from([]);
    let (_, locals) = execute_def(ctx, &def, &captures, &no_defaults, CallArgs::empty(), true)?;
    {
        let mut node = template.borrow_mut();
        for (name, value) in locals.expect("collect_locals was requested") {
            node.entries.insert(name, value);
        }
    }

    // Drop the bases, keeping the class on top.
    let frame = ctx.frames.last_mut().expect("frame active");
    let n = frame.stack.len();
    frame.stack.drain(n - 1 - base_count as usize..n - 1);
    Ok(())
}

/// Calls a class object: either its native constructor or the default
/// construct-then-`__init__` sequence.
pub(crate) fn call_class(ctx: &mut Context, class_id: HeapId, args: CallArgs) -> RunResult<Value> {
    let HeapData::Class(class) = ctx.heap.get(class_id) else {
        unreachable!("call_class takes a class id");
    };
    if let Some(ctor) = &class.ctor {
        let ctor = ctor.clone();
        return ctor(ctx, &args);
    }
    let template = class.template.clone();

    let instance = ctx.alloc(HeapData::Instance(Instance {
        class: class_id,
        attrs: AttrTable::from_template(template.clone()),
    }))?;

    let init = template.borrow().get(Sym::Init.id());
    if let Some(init) = init {
        let mark = ctx.temp_roots_mark();
        ctx.temp_roots_push(instance);
        let mut init_args = args;
        init_args.pos.insert(0, instance);
        let result = call_value(ctx, init, init_args);
        ctx.temp_roots_reset(mark);
        result?;
    }
    Ok(instance)
}

/// Builds an exception instance for a native raise.
pub(crate) fn materialize_exception(
    ctx: &mut Context,
    exc_type: ExcType,
    message: Option<String>,
) -> RunResult<Value> {
    let Some(class_id) = ctx.builtins.exc_class(exc_type) else {
        // Bootstrap is not finished; surface without an object.
        return Ok(Value::Null);
    };
    let text = message.unwrap_or_default();
    let msg = ctx.alloc(HeapData::Str(text.into_boxed_str()))?;
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(msg);
    let result = call_class(ctx, class_id, CallArgs::one(msg));
    ctx.temp_roots_reset(mark);
    result
}

/// Validates and normalizes the operand of a `raise` statement.
///
/// Raising a class instantiates it with no arguments; the result must be
/// an instance deriving from `BaseException`.
pub(super) fn normalize_raise(ctx: &mut Context, value: Value) -> RunResult<RunError> {
    let exc = match value {
        Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Class(_)) => {
            call_class(ctx, id, CallArgs::empty())?
        }
        other => other,
    };
    let Some(class_id) = class::instance_class(&ctx.heap, exc) else {
        return Err(ExcType::type_error("exceptions must derive from BaseException"));
    };
    let Some(base_exception) = ctx.builtins.exc_class(ExcType::BaseException) else {
        return Err(ExcType::type_error("exceptions must derive from BaseException"));
    };
    if !class::is_subclass(&ctx.heap, class_id, base_exception) {
        return Err(ExcType::type_error("exceptions must derive from BaseException"));
    }
    Ok(RunError::object(exc))
}

/// Whether the handled exception matches an `except` clause's class.
pub(super) fn exception_matches(
    ctx: &mut Context,
    exc: Value,
    class_value: Value,
) -> RunResult<bool> {
    let Value::Ref(class_id) = class_value else {
        return Err(ExcType::type_error(
            "catching classes that do not derive from BaseException is not allowed",
        ));
    };
    if !matches!(ctx.heap.get(class_id), HeapData::Class(_)) {
        return Err(ExcType::type_error(
            "catching classes that do not derive from BaseException is not allowed",
        ));
    }
    let Some(instance_class) = class::instance_class(&ctx.heap, exc) else {
        return Ok(false);
    };
    Ok(class::is_subclass(&ctx.heap, instance_class, class_id))
}
