//! Owned value trees for crossing the embedding boundary.
//!
//! [`Object`] owns all its data and needs no heap: hosts build inputs from
//! it and read results back without holding live handles across
//! collections.

use crate::context::Context;
use crate::exception::{ExcType, RunResult};
use crate::heap::HeapData;
use crate::types::{Dict, List, Set};
use crate::value::Value;

/// A value that can be passed to or returned from the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Object>),
    List(Vec<Object>),
    /// Key/value pairs in insertion order.
    Dict(Vec<(Object, Object)>),
    Set(Vec<Object>),
    /// Output-only: a value with no structural mapping, shown by repr.
    Repr(String),
}

/// Conversion depth cap; cyclic structures degrade to `Repr`.
const MAX_DEPTH: usize = 32;

pub(crate) fn value_to_object(ctx: &mut Context, v: Value, depth: usize) -> RunResult<Object> {
    if depth > MAX_DEPTH {
        return Ok(Object::Repr(crate::bytecode::vm::py_repr(ctx, v)?));
    }
    Ok(match v {
        Value::Undefined => Object::None,
        Value::Null => Object::None,
        Value::Bool(b) => Object::Bool(b),
        Value::Int(i) => Object::Int(i),
        Value::Float(f) => Object::Float(f),
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Str(s) => Object::Str(s.to_string()),
            HeapData::Tuple(items) => {
                let items = items.to_vec();
                Object::Tuple(values_to_objects(ctx, &items, depth)?)
            }
            HeapData::List(list) => {
                let items = list.items.clone();
                Object::List(values_to_objects(ctx, &items, depth)?)
            }
            HeapData::Dict(dict) => {
                let pairs: Vec<(Value, Value)> =
                    dict.entries.iter().map(|e| (e.key, e.value)).collect();
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    out.push((
                        value_to_object(ctx, k, depth + 1)?,
                        value_to_object(ctx, v, depth + 1)?,
                    ));
                }
                Object::Dict(out)
            }
            HeapData::Set(set) => {
                let keys: Vec<Value> = set.entries.iter().map(|e| e.key).collect();
                Object::Set(values_to_objects(ctx, &keys, depth)?)
            }
            _ => Object::Repr(crate::bytecode::vm::py_repr(ctx, v)?),
        },
    })
}

fn values_to_objects(ctx: &mut Context, items: &[Value], depth: usize) -> RunResult<Vec<Object>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(value_to_object(ctx, *item, depth + 1)?);
    }
    Ok(out)
}

pub(crate) fn object_to_value(ctx: &mut Context, obj: &Object) -> RunResult<Value> {
    Ok(match obj {
        Object::None => Value::Null,
        Object::Bool(b) => Value::Bool(*b),
        Object::Int(i) => Value::Int(*i),
        Object::Float(f) => Value::Float(*f),
        Object::Str(s) => ctx.alloc(HeapData::Str(s.clone().into_boxed_str()))?,
        Object::Tuple(items) => {
            let mark = ctx.temp_roots_mark();
            let result = objects_to_pinned_values(ctx, items)
                .and_then(|values| ctx.alloc(HeapData::Tuple(values.into_boxed_slice())));
            ctx.temp_roots_reset(mark);
            result?
        }
        Object::List(items) => {
            let mark = ctx.temp_roots_mark();
            let result = objects_to_pinned_values(ctx, items)
                .and_then(|values| ctx.alloc(HeapData::List(List::new(values))));
            ctx.temp_roots_reset(mark);
            result?
        }
        Object::Dict(pairs) => {
            let dict = ctx.alloc(HeapData::Dict(Dict::new()))?;
            let Value::Ref(dict_id) = dict else {
                unreachable!("alloc returns a heap reference");
            };
            let mark = ctx.temp_roots_mark();
            ctx.temp_roots_push(dict);
            let result = (|ctx: &mut Context| {
                for (k, v) in pairs {
                    let key = object_to_value(ctx, k)?;
                    ctx.temp_roots_push(key);
                    let value = object_to_value(ctx, v)?;
                    ctx.temp_roots_push(value);
                    crate::types::dict::dict_set(ctx, dict_id, key, value)?;
                }
                Ok(dict)
            })(ctx);
            ctx.temp_roots_reset(mark);
            result?
        }
        Object::Set(items) => {
            let set = ctx.alloc(HeapData::Set(Set::new()))?;
            let Value::Ref(set_id) = set else {
                unreachable!("alloc returns a heap reference");
            };
            let mark = ctx.temp_roots_mark();
            ctx.temp_roots_push(set);
            let result = (|ctx: &mut Context| {
                for item in items {
                    let value = object_to_value(ctx, item)?;
                    ctx.temp_roots_push(value);
                    crate::types::set::set_add(ctx, set_id, value)?;
                }
                Ok(set)
            })(ctx);
            ctx.temp_roots_reset(mark);
            result?
        }
        Object::Repr(_) => {
            return Err(ExcType::type_error("repr objects cannot be converted to values"));
        }
    })
}

fn objects_to_pinned_values(ctx: &mut Context, items: &[Object]) -> RunResult<Vec<Value>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let v = object_to_value(ctx, item)?;
        ctx.temp_roots_push(v);
        out.push(v);
    }
    Ok(out)
}
