//! Attribute access: instance/class/module tables and builtin method
//! binding.

use crate::context::Context;
use crate::exception::{ExcType, RunResult};
use crate::function::{Func, FuncKind};
use crate::heap::{HeapData, HeapId};
use crate::intern::{StringId, Sym};
use crate::types::methods;
use crate::value::Value;

use super::bind_method;

/// Attribute lookup; raises `AttributeError` when the name is missing.
pub(crate) fn get_attr(ctx: &mut Context, obj: Value, name: StringId) -> RunResult<Value> {
    match get_attr_opt(ctx, obj, name)? {
        Some(v) => Ok(v),
        None => {
            let type_name = obj.type_name(&ctx.heap);
            Err(ExcType::attribute_error(type_name, ctx.interns.get(name)))
        }
    }
}

/// Attribute lookup returning `None` for a missing name, so callers can
/// distinguish absence from deeper failures.
pub(crate) fn get_attr_opt(
    ctx: &mut Context,
    obj: Value,
    name: StringId,
) -> RunResult<Option<Value>> {
    if let Value::Ref(id) = obj {
        match ctx.heap.get(id) {
            HeapData::Instance(inst) => {
                if name == Sym::Class.id() {
                    return Ok(Some(Value::Ref(inst.class)));
                }
                let Some(found) = inst.attrs.get(name) else {
                    return Ok(None);
                };
                return bind_if_method(ctx, found, obj).map(Some);
            }
            HeapData::Class(class) => {
                if name == Sym::Name.id() {
                    let text = class.name.to_string();
                    let v = ctx.alloc(HeapData::Str(text.into_boxed_str()))?;
                    return Ok(Some(v));
                }
                if name == Sym::Bases.id() {
                    let bases: Box<[Value]> =
                        class.bases.iter().map(|b| Value::Ref(*b)).collect();
                    let v = ctx.alloc(HeapData::Tuple(bases))?;
                    return Ok(Some(v));
                }
                // Unbound lookup through the instance template chain.
                return Ok(class.template.borrow().get(name));
            }
            HeapData::Module(module) => {
                return Ok(module.attrs.get(&name).copied());
            }
            HeapData::Slice(slice) => {
                if name == Sym::Start.id() {
                    return Ok(Some(slice.start));
                }
                if name == Sym::Stop.id() {
                    return Ok(Some(slice.stop));
                }
                if name == Sym::Step.id() {
                    return Ok(Some(slice.step));
                }
            }
            _ => {}
        }
    }

    // Builtin values: the class pseudo-attribute plus the native method
    // table for the value's type.
    if name == Sym::Class.id() {
        let class = ctx.builtins.class_of(&ctx.heap, obj);
        return Ok(class.map(Value::Ref));
    }
    let type_ = obj.type_of(&ctx.heap);
    let name_str = ctx.interns.get(name);
    let Some(method) = methods::lookup_type_method(type_, name_str) else {
        return Ok(None);
    };
    let func = Func {
        kind: FuncKind::TypeMethod(method),
        bound_self: Some(obj),
        is_method: true,
        module: std::rc::Rc::from("__builtins__"),
        name: std::rc::Rc::from(name_str),
    };
    ctx.alloc(HeapData::Func(func)).map(Some)
}

/// Binds functions marked as methods to their receiver on access.
fn bind_if_method(ctx: &mut Context, found: Value, receiver: Value) -> RunResult<Value> {
    if let Value::Ref(fid) = found {
        if let HeapData::Func(func) = ctx.heap.get(fid) {
            if func.is_method && func.bound_self.is_none() {
                let func = func.clone();
                return bind_method(ctx, &func, receiver);
            }
        }
    }
    Ok(found)
}

/// Attribute lookup that starts the walk at an explicit base class's
/// template, binding methods to the object as usual.
pub(crate) fn get_attr_from_base(
    ctx: &mut Context,
    obj: Value,
    name: StringId,
    base: Value,
) -> RunResult<Value> {
    let Value::Ref(base_id) = base else {
        return Err(ExcType::type_error("base must be a class"));
    };
    let HeapData::Class(class) = ctx.heap.get(base_id) else {
        return Err(ExcType::type_error("base must be a class"));
    };
    let found = class.template.borrow().get(name);
    match found {
        Some(v) => bind_if_method(ctx, v, obj),
        None => {
            let type_name = obj.type_name(&ctx.heap);
            Err(ExcType::attribute_error(type_name, ctx.interns.get(name)))
        }
    }
}

pub(crate) fn set_attr(
    ctx: &mut Context,
    obj: Value,
    name: StringId,
    value: Value,
) -> RunResult<()> {
    let Value::Ref(id) = obj else {
        return Err(ExcType::type_error(format!(
            "cannot set attributes on '{}' object",
            obj.type_name(&ctx.heap)
        )));
    };
    match ctx.heap.get_mut(id) {
        HeapData::Instance(inst) => {
            inst.attrs.set(name, value);
            Ok(())
        }
        HeapData::Class(class) => {
            // Class attribute writes land on the instance template, so
            // existing instances observe them until they shadow.
            class.template.borrow_mut().entries.insert(name, value);
            Ok(())
        }
        HeapData::Module(module) => {
            module.attrs.insert(name, value);
            Ok(())
        }
        other => Err(ExcType::type_error(format!(
            "cannot set attributes on '{}' object",
            other.type_of().name()
        ))),
    }
}

/// Deletes from the object's own override map only; entries inherited
/// through the template chain are untouched.
pub(crate) fn del_attr(ctx: &mut Context, obj: Value, name: StringId) -> RunResult<()> {
    let missing = |ctx: &Context, id: HeapId| {
        let type_name = ctx.heap.get(id).type_name(&ctx.heap).into_owned();
        Err(ExcType::attribute_error(type_name, ctx.interns.get(name)))
    };
    let Value::Ref(id) = obj else {
        return Err(ExcType::type_error(format!(
            "cannot delete attributes on '{}' object",
            obj.type_name(&ctx.heap)
        )));
    };
    match ctx.heap.get_mut(id) {
        HeapData::Instance(inst) => match inst.attrs.remove(name) {
            Some(_) => Ok(()),
            None => missing(ctx, id),
        },
        HeapData::Module(module) => match module.attrs.shift_remove(&name) {
            Some(_) => Ok(()),
            None => missing(ctx, id),
        },
        other => Err(ExcType::type_error(format!(
            "cannot delete attributes on '{}' object",
            other.type_of().name()
        ))),
    }
}
