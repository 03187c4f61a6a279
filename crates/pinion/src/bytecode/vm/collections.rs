//! Index operations and the list-comprehension driver.

use crate::args::CallArgs;
use crate::context::Context;
use crate::exception::{ExcType, RunResult};
use crate::heap::{HeapData, HeapId};
use crate::intern::Sym;
use crate::types::slice::normalize_index;
use crate::types::{List, Slice};
use crate::value::Value;

use super::{call, protocol};

fn as_index(v: Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(i),
        Value::Bool(b) => Some(i64::from(b)),
        _ => None,
    }
}

pub(crate) fn get_index(ctx: &mut Context, obj: Value, index: Value) -> RunResult<Value> {
    let Value::Ref(id) = obj else {
        return Err(ExcType::type_error_not_subscriptable(
            &obj.type_name(&ctx.heap),
        ));
    };
    match ctx.heap.get(id) {
        HeapData::Str(s) => {
            let s = s.to_string();
            str_index(ctx, &s, index)
        }
        HeapData::Tuple(items) => {
            let items = items.to_vec();
            match sequence_index(ctx, &items, index, "tuple")? {
                SeqIndex::One(v) => Ok(v),
                SeqIndex::Slice(values) => {
                    ctx.alloc(HeapData::Tuple(values.into_boxed_slice()))
                }
            }
        }
        HeapData::List(list) => {
            let items = list.items.clone();
            match sequence_index(ctx, &items, index, "list")? {
                SeqIndex::One(v) => Ok(v),
                SeqIndex::Slice(values) => ctx.alloc(HeapData::List(List::new(values))),
            }
        }
        HeapData::Dict(_) => match crate::types::dict::dict_find(ctx, id, index)? {
            Some((_, value)) => Ok(value),
            None => {
                let repr = protocol::py_repr(ctx, index)?;
                Err(ExcType::key_error(repr))
            }
        },
        HeapData::Instance(_) => {
            protocol::call_method(ctx, obj, Sym::GetItem.id(), CallArgs::one(index))
        }
        other => Err(ExcType::type_error_not_subscriptable(other.type_of().name())),
    }
}

enum SeqIndex {
    One(Value),
    Slice(Vec<Value>),
}

fn sequence_index(
    ctx: &mut Context,
    items: &[Value],
    index: Value,
    kind: &str,
) -> RunResult<SeqIndex> {
    if let Some(i) = as_index(index) {
        let i = normalize_index(i, items.len(), kind)?;
        return Ok(SeqIndex::One(items[i]));
    }
    if let Some(slice) = as_slice(ctx, index) {
        let resolved = slice.resolve(items.len())?;
        let values: Vec<Value> = resolved.indices().into_iter().map(|i| items[i]).collect();
        return Ok(SeqIndex::Slice(values));
    }
    Err(ExcType::type_error(format!(
        "{kind} indices must be integers or slices"
    )))
}

fn as_slice(ctx: &Context, v: Value) -> Option<Slice> {
    match v {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Slice(s) => Some(*s),
            _ => None,
        },
        _ => None,
    }
}

fn str_index(ctx: &mut Context, s: &str, index: Value) -> RunResult<Value> {
    if let Some(i) = as_index(index) {
        let chars: Vec<char> = s.chars().collect();
        let i = normalize_index(i, chars.len(), "string")?;
        let ch = chars[i].to_string();
        return ctx.alloc(HeapData::Str(ch.into_boxed_str()));
    }
    if let Some(slice) = as_slice(ctx, index) {
        let chars: Vec<char> = s.chars().collect();
        let resolved = slice.resolve(chars.len())?;
        let text: String = resolved.indices().into_iter().map(|i| chars[i]).collect();
        return ctx.alloc(HeapData::Str(text.into_boxed_str()));
    }
    Err(ExcType::type_error("string indices must be integers or slices"))
}

pub(crate) fn set_index(
    ctx: &mut Context,
    obj: Value,
    index: Value,
    value: Value,
) -> RunResult<()> {
    let Value::Ref(id) = obj else {
        return Err(no_item_assignment(ctx, obj));
    };
    match ctx.heap.get(id) {
        HeapData::List(list) => {
            let len = list.items.len();
            if let Some(i) = as_index(index) {
                let i = normalize_index(i, len, "list")?;
                let HeapData::List(list) = ctx.heap.get_mut(id) else {
                    unreachable!("checked above");
                };
                list.items[i] = value;
                return Ok(());
            }
            if let Some(slice) = as_slice(ctx, index) {
                return splice_list(ctx, id, slice, value);
            }
            Err(ExcType::type_error("list indices must be integers or slices"))
        }
        HeapData::Dict(_) => crate::types::dict::dict_set(ctx, id, index, value),
        HeapData::Instance(_) => {
            protocol::call_method(ctx, obj, Sym::SetItem.id(), CallArgs::two(index, value))?;
            Ok(())
        }
        _ => Err(no_item_assignment(ctx, obj)),
    }
}

fn splice_list(ctx: &mut Context, list_id: HeapId, slice: Slice, value: Value) -> RunResult<()> {
    let replacement: Vec<Value> = match value {
        Value::Ref(vid) => match ctx.heap.get(vid) {
            HeapData::List(l) => l.items.clone(),
            HeapData::Tuple(t) => t.to_vec(),
            _ => return Err(ExcType::type_error("can only assign a list or tuple to a slice")),
        },
        _ => return Err(ExcType::type_error("can only assign a list or tuple to a slice")),
    };
    let HeapData::List(list) = ctx.heap.get_mut(list_id) else {
        unreachable!("splice target is a list");
    };
    let resolved = slice.resolve(list.items.len())?;
    if resolved.step != 1 {
        return Err(ExcType::type_error("slice assignment requires step 1"));
    }
    let start = resolved.start.max(0) as usize;
    let stop = resolved.stop.max(resolved.start).max(0) as usize;
    list.items.splice(start..stop, replacement);
    Ok(())
}

pub(crate) fn del_index(ctx: &mut Context, obj: Value, index: Value) -> RunResult<()> {
    let Value::Ref(id) = obj else {
        return Err(no_item_assignment(ctx, obj));
    };
    match ctx.heap.get(id) {
        HeapData::List(list) => {
            let len = list.items.len();
            let Some(i) = as_index(index) else {
                return Err(ExcType::type_error("list indices must be integers"));
            };
            let i = normalize_index(i, len, "list")?;
            let HeapData::List(list) = ctx.heap.get_mut(id) else {
                unreachable!("checked above");
            };
            list.items.remove(i);
            Ok(())
        }
        HeapData::Dict(_) => match crate::types::dict::dict_remove(ctx, id, index)? {
            Some(_) => Ok(()),
            None => {
                let repr = protocol::py_repr(ctx, index)?;
                Err(ExcType::key_error(repr))
            }
        },
        HeapData::Instance(_) => {
            protocol::call_method(ctx, obj, Sym::DelItem.id(), CallArgs::one(index))?;
            Ok(())
        }
        _ => Err(no_item_assignment(ctx, obj)),
    }
}

fn no_item_assignment(ctx: &Context, obj: Value) -> crate::exception::RunError {
    ExcType::type_error(format!(
        "'{}' object does not support item assignment",
        obj.type_name(&ctx.heap)
    ))
}

/// The list-comprehension instruction: drives the iteration protocol over
/// the iterable, calling the binding closure with each element and
/// appending the expression closure's result.
///
/// Stack on entry: `[expr_fn, bind_fn, iterable]`; on exit: `[list]`.
/// Everything live stays on the frame stack so collections triggered by
/// the closures cannot reclaim it.
pub(super) fn list_comp(ctx: &mut Context) -> RunResult<()> {
    let frame = ctx.frames.last_mut().expect("frame active");
    let base = frame.stack.len();
    let iterable = frame.stack[base - 1];
    let expr_fn = frame.stack[base - 3];
    let bind_fn = frame.stack[base - 2];

    let it = protocol::get_iter(ctx, iterable)?;
    ctx.frames.last_mut().expect("frame active").stack.push(it);
    let list = ctx.alloc(HeapData::List(List::new(Vec::new())))?;
    let Value::Ref(list_id) = list else {
        unreachable!("alloc returns a heap reference");
    };
    ctx.frames.last_mut().expect("frame active").stack.push(list);
    // Stack: [expr_fn, bind_fn, iterable, it, list]

    loop {
        let Some(v) = protocol::iter_next(ctx, it)? else {
            break;
        };
        let frame = ctx.frames.last_mut().expect("frame active");
        frame.stack.push(v);
        call::call_value(ctx, bind_fn, CallArgs::one(v))?;
        ctx.frames.last_mut().expect("frame active").stack.pop();

        let element = call::call_value(ctx, expr_fn, CallArgs::empty())?;
        ctx.frames
            .last_mut()
            .expect("frame active")
            .stack
            .push(element);
        let HeapData::List(l) = ctx.heap.get_mut(list_id) else {
            unreachable!("comprehension result is a list");
        };
        l.items.push(element);
        ctx.frames.last_mut().expect("frame active").stack.pop();
    }

    let frame = ctx.frames.last_mut().expect("frame active");
    frame.stack.truncate(base - 3);
    frame.stack.push(list);
    Ok(())
}
