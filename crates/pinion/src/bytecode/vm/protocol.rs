//! Value protocols: truthiness, equality, ordering, hashing, string
//! conversion, and iteration.
//!
//! Builtin types take structural fast paths; instances dispatch to their
//! well-known methods, and a comparison method that returns a non-boolean
//! is a `TypeError`.

use std::fmt::Write as _;
use std::hash::{Hash, Hasher};

use crate::args::CallArgs;
use crate::context::Context;
use crate::exception::{ExcType, RunError, RunResult};
use crate::heap::{HeapData, HeapId};
use crate::intern::{StringId, Sym};
use crate::types::iter::{DictIterKind, NativeIter};
use crate::types::{Type, str_ops};
use crate::value::Value;

use super::{attr, call};

pub(crate) fn call_method(
    ctx: &mut Context,
    obj: Value,
    name: StringId,
    args: CallArgs,
) -> RunResult<Value> {
    let method = attr::get_attr(ctx, obj, name)?;
    call::call_value(ctx, method, args)
}

fn call_method_opt(
    ctx: &mut Context,
    obj: Value,
    name: StringId,
    args: CallArgs,
) -> RunResult<Option<Value>> {
    match attr::get_attr_opt(ctx, obj, name)? {
        Some(method) => call::call_value(ctx, method, args).map(Some),
        None => Ok(None),
    }
}

/// The bool protocol: `__bool__` (or the legacy `__nonzero__`), falling
/// back to `__len__`, defaulting to true.
pub(crate) fn py_truthy(ctx: &mut Context, v: Value) -> RunResult<bool> {
    match v {
        Value::Undefined => unreachable!("undefined values never reach the stack"),
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        Value::Int(i) => Ok(i != 0),
        Value::Float(f) => Ok(f != 0.0),
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Str(s) => Ok(!s.is_empty()),
            HeapData::Tuple(items) => Ok(!items.is_empty()),
            HeapData::List(list) => Ok(!list.items.is_empty()),
            HeapData::Dict(dict) => Ok(!dict.is_empty()),
            HeapData::Set(set) => Ok(set.len() != 0),
            HeapData::Instance(_) => {
                for sym in [Sym::Bool, Sym::Nonzero] {
                    if let Some(result) = call_method_opt(ctx, v, sym.id(), CallArgs::empty())? {
                        let Value::Bool(b) = result else {
                            return Err(ExcType::type_error(format!(
                                "{} should return bool",
                                sym.as_str()
                            )));
                        };
                        return Ok(b);
                    }
                }
                if let Some(result) = call_method_opt(ctx, v, Sym::Len.id(), CallArgs::empty())? {
                    let Value::Int(n) = result else {
                        return Err(ExcType::type_error("__len__() should return an integer"));
                    };
                    return Ok(n != 0);
                }
                Ok(true)
            }
            _ => Ok(true),
        },
    }
}

fn as_number(v: Value) -> Option<f64> {
    match v {
        Value::Bool(b) => Some(f64::from(i32::from(b))),
        Value::Int(i) => Some(i as f64),
        Value::Float(f) => Some(f),
        _ => None,
    }
}

/// The equality protocol. Numbers compare across int/float/bool; strings,
/// tuples, and lists compare structurally; instances dispatch `__eq__`
/// and otherwise fall back to identity.
pub(crate) fn py_eq(ctx: &mut Context, a: Value, b: Value) -> RunResult<bool> {
    if let (Value::Ref(x), Value::Ref(y)) = (a, b) {
        if x == y {
            return Ok(true);
        }
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Int(x), Value::Int(y)) => Ok(x == y),
        _ => {
            if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
                return Ok(x == y);
            }
            let (Value::Ref(x), Value::Ref(y)) = (a, b) else {
                return instance_eq_fallback(ctx, a, b);
            };
            match (ctx.heap.get(x), ctx.heap.get(y)) {
                (HeapData::Str(s1), HeapData::Str(s2)) => Ok(s1 == s2),
                (HeapData::Tuple(t1), HeapData::Tuple(t2)) => {
                    let (t1, t2) = (t1.to_vec(), t2.to_vec());
                    sequence_eq(ctx, &t1, &t2)
                }
                (HeapData::List(l1), HeapData::List(l2)) => {
                    let (l1, l2) = (l1.items.clone(), l2.items.clone());
                    sequence_eq(ctx, &l1, &l2)
                }
                (HeapData::Dict(d1), HeapData::Dict(d2)) => {
                    if d1.len() != d2.len() {
                        return Ok(false);
                    }
                    let pairs: Vec<(Value, Value)> =
                        d1.entries.iter().map(|e| (e.key, e.value)).collect();
                    for (key, value) in pairs {
                        match crate::types::dict::dict_get(ctx, y, key)? {
                            Some(other) if py_eq(ctx, value, other)? => {}
                            _ => return Ok(false),
                        }
                    }
                    Ok(true)
                }
                (HeapData::Set(s1), HeapData::Set(s2)) => {
                    if s1.len() != s2.len() {
                        return Ok(false);
                    }
                    let keys: Vec<Value> = s1.entries.iter().map(|e| e.key).collect();
                    for key in keys {
                        if !crate::types::set::set_contains(ctx, y, key)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                _ => instance_eq_fallback(ctx, a, b),
            }
        }
    }
}

fn instance_eq_fallback(ctx: &mut Context, a: Value, b: Value) -> RunResult<bool> {
    if matches!(a, Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Instance(_))) {
        if let Some(result) = call_method_opt(ctx, a, Sym::Eq.id(), CallArgs::one(b))? {
            let Value::Bool(eq) = result else {
                return Err(ExcType::type_error("__eq__() should return bool"));
            };
            return Ok(eq);
        }
    }
    Ok(a.is_identical(b))
}

fn sequence_eq(ctx: &mut Context, a: &[Value], b: &[Value]) -> RunResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !py_eq(ctx, *x, *y)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// The `<` protocol: numbers, strings, and sequences order naturally;
/// instances dispatch `__lt__`, which must return a bool.
pub(crate) fn py_lt(ctx: &mut Context, a: Value, b: Value) -> RunResult<bool> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return Ok(x < y);
    }
    if let (Value::Ref(x), Value::Ref(y)) = (a, b) {
        match (ctx.heap.get(x), ctx.heap.get(y)) {
            (HeapData::Str(s1), HeapData::Str(s2)) => return Ok(s1 < s2),
            (HeapData::Tuple(t1), HeapData::Tuple(t2)) => {
                let (t1, t2) = (t1.to_vec(), t2.to_vec());
                return sequence_lt(ctx, &t1, &t2);
            }
            (HeapData::List(l1), HeapData::List(l2)) => {
                let (l1, l2) = (l1.items.clone(), l2.items.clone());
                return sequence_lt(ctx, &l1, &l2);
            }
            _ => {}
        }
    }
    if matches!(a, Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Instance(_))) {
        if let Some(result) = call_method_opt(ctx, a, Sym::Lt.id(), CallArgs::one(b))? {
            let Value::Bool(lt) = result else {
                return Err(ExcType::type_error("__lt__() should return bool"));
            };
            return Ok(lt);
        }
    }
    Err(ExcType::type_error(format!(
        "'<' not supported between instances of '{}' and '{}'",
        a.type_name(&ctx.heap),
        b.type_name(&ctx.heap)
    )))
}

fn sequence_lt(ctx: &mut Context, a: &[Value], b: &[Value]) -> RunResult<bool> {
    for (x, y) in a.iter().zip(b) {
        if py_lt(ctx, *x, *y)? {
            return Ok(true);
        }
        if !py_eq(ctx, *x, *y)? {
            return Ok(false);
        }
    }
    Ok(a.len() < b.len())
}

fn hash_u64(write: impl FnOnce(&mut ahash::AHasher)) -> u64 {
    let mut hasher = ahash::AHasher::default();
    write(&mut hasher);
    hasher.finish()
}

/// The hash protocol. Equal numbers hash equally across int, bool, and
/// integral floats; tuples hash structurally; instances dispatch
/// `__hash__` (which must return an int) and default to identity; the
/// mutable containers are unhashable.
pub(crate) fn py_hash(ctx: &mut Context, v: Value) -> RunResult<u64> {
    match v {
        Value::Undefined => unreachable!("undefined values never reach the stack"),
        Value::Null => Ok(hash_u64(|h| 0u8.hash(h))),
        Value::Bool(b) => Ok(hash_int(i64::from(b))),
        Value::Int(i) => Ok(hash_int(i)),
        Value::Float(f) => {
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(hash_int(f as i64))
            } else {
                Ok(hash_u64(|h| f.to_bits().hash(h)))
            }
        }
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Str(s) => {
                let s = s.clone();
                Ok(hash_u64(|h| s.hash(h)))
            }
            HeapData::Tuple(items) => {
                let items = items.to_vec();
                let mut acc: u64 = 0x345678;
                for item in items {
                    let h = py_hash(ctx, item)?;
                    acc = acc.wrapping_mul(1_000_003).wrapping_add(h);
                }
                Ok(acc)
            }
            HeapData::List(_) | HeapData::Dict(_) | HeapData::Set(_) => {
                Err(ExcType::type_error_unhashable(
                    ctx.heap.get(id).type_of().name(),
                ))
            }
            HeapData::Instance(_) => {
                if let Some(result) = call_method_opt(ctx, v, Sym::Hash.id(), CallArgs::empty())? {
                    let Value::Int(h) = result else {
                        return Err(ExcType::type_error(
                            "__hash__() returned a non integer type",
                        ));
                    };
                    return Ok(h as u64);
                }
                Ok(hash_int(id.index() as i64))
            }
            _ => Ok(hash_int(id.index() as i64)),
        },
    }
}

fn hash_int(i: i64) -> u64 {
    hash_u64(|h| i.hash(h))
}

pub(crate) fn float_repr(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        ryu::Buffer::new().format_finite(f).to_string()
    }
}

/// The str protocol: strings pass through, instances dispatch `__str__`
/// (falling back to `__repr__`), everything else uses its repr.
pub(crate) fn py_str(ctx: &mut Context, v: Value) -> RunResult<String> {
    match v {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Str(s) => Ok(s.to_string()),
            HeapData::Instance(_) => {
                for sym in [Sym::Str, Sym::Repr] {
                    if let Some(result) = call_method_opt(ctx, v, sym.id(), CallArgs::empty())? {
                        let Value::Ref(rid) = result else {
                            return Err(ExcType::type_error(format!(
                                "{}() returned a non string type",
                                sym.as_str()
                            )));
                        };
                        let HeapData::Str(s) = ctx.heap.get(rid) else {
                            return Err(ExcType::type_error(format!(
                                "{}() returned a non string type",
                                sym.as_str()
                            )));
                        };
                        return Ok(s.to_string());
                    }
                }
                py_repr(ctx, v)
            }
            _ => py_repr(ctx, v),
        },
        _ => py_repr(ctx, v),
    }
}

/// The repr protocol, with a cycle guard rendering self-referential
/// containers as `[...]` / `(...)` / `{...}`.
pub(crate) fn py_repr(ctx: &mut Context, v: Value) -> RunResult<String> {
    match v {
        Value::Undefined => unreachable!("undefined values never reach the stack"),
        Value::Null => Ok("None".to_string()),
        Value::Bool(true) => Ok("True".to_string()),
        Value::Bool(false) => Ok("False".to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(float_repr(f)),
        Value::Ref(id) => {
            if ctx.repr_guard.contains(&id) {
                return Ok(match ctx.heap.get(id).type_of() {
                    Type::Tuple => "(...)".to_string(),
                    Type::Dict | Type::Set => "{...}".to_string(),
                    _ => "[...]".to_string(),
                });
            }
            match ctx.heap.get(id) {
                HeapData::Str(s) => Ok(str_ops::str_repr(s)),
                HeapData::Tuple(items) => {
                    let items = items.to_vec();
                    ctx.repr_guard.push(id);
                    let result = repr_sequence(ctx, &items, "(", ")", items.len() == 1);
                    ctx.repr_guard.pop();
                    result
                }
                HeapData::List(list) => {
                    let items = list.items.clone();
                    ctx.repr_guard.push(id);
                    let result = repr_sequence(ctx, &items, "[", "]", false);
                    ctx.repr_guard.pop();
                    result
                }
                HeapData::Dict(dict) => {
                    let pairs: Vec<(Value, Value)> =
                        dict.entries.iter().map(|e| (e.key, e.value)).collect();
                    ctx.repr_guard.push(id);
                    let result = (|| {
                        let mut out = String::from("{");
                        for (i, (k, val)) in pairs.iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            let _ = write!(out, "{}: {}", py_repr(ctx, *k)?, py_repr(ctx, *val)?);
                        }
                        out.push('}');
                        Ok(out)
                    })();
                    ctx.repr_guard.pop();
                    result
                }
                HeapData::Set(set) => {
                    let keys: Vec<Value> = set.entries.iter().map(|e| e.key).collect();
                    if keys.is_empty() {
                        return Ok("set()".to_string());
                    }
                    ctx.repr_guard.push(id);
                    let result = repr_sequence(ctx, &keys, "{", "}", false);
                    ctx.repr_guard.pop();
                    result
                }
                HeapData::Slice(slice) => {
                    let (start, stop, step) = (slice.start, slice.stop, slice.step);
                    Ok(format!(
                        "slice({}, {}, {})",
                        py_repr(ctx, start)?,
                        py_repr(ctx, stop)?,
                        py_repr(ctx, step)?
                    ))
                }
                HeapData::Func(f) => Ok(format!("<function {}>", f.name)),
                HeapData::Class(c) => Ok(format!("<class '{}'>", c.name)),
                HeapData::Module(m) => Ok(format!("<module '{}'>", m.name)),
                HeapData::Cell(_) => Ok("<cell>".to_string()),
                HeapData::Iter(_) => Ok("<iterator>".to_string()),
                HeapData::File(f) => Ok(format!("<file '{}'>", f.path)),
                HeapData::Instance(_) => {
                    if let Some(result) =
                        call_method_opt(ctx, v, Sym::Repr.id(), CallArgs::empty())?
                    {
                        let Value::Ref(rid) = result else {
                            return Err(ExcType::type_error(
                                "__repr__() returned a non string type",
                            ));
                        };
                        let HeapData::Str(s) = ctx.heap.get(rid) else {
                            return Err(ExcType::type_error(
                                "__repr__() returned a non string type",
                            ));
                        };
                        return Ok(s.to_string());
                    }
                    Ok(format!("<{} object>", v.type_name(&ctx.heap)))
                }
            }
        }
    }
}

fn repr_sequence(
    ctx: &mut Context,
    items: &[Value],
    open: &str,
    close: &str,
    trailing_comma: bool,
) -> RunResult<String> {
    let mut out = String::from(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&py_repr(ctx, *item)?);
    }
    if trailing_comma {
        out.push(',');
    }
    out.push_str(close);
    Ok(out)
}

/// The length protocol.
pub(crate) fn py_len(ctx: &mut Context, v: Value) -> RunResult<i64> {
    match v {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Str(s) => Ok(s.chars().count() as i64),
            HeapData::Tuple(items) => Ok(items.len() as i64),
            HeapData::List(list) => Ok(list.items.len() as i64),
            HeapData::Dict(dict) => Ok(dict.len() as i64),
            HeapData::Set(set) => Ok(set.len() as i64),
            HeapData::Instance(_) => {
                let result = call_method(ctx, v, Sym::Len.id(), CallArgs::empty())?;
                let Value::Int(n) = result else {
                    return Err(ExcType::type_error("__len__() returned a non integer type"));
                };
                if n < 0 {
                    return Err(ExcType::value_error("__len__() returned a negative value"));
                }
                Ok(n)
            }
            other => Err(ExcType::type_error(format!(
                "object of type '{}' has no len()",
                other.type_of().name()
            ))),
        },
        _ => Err(ExcType::type_error(format!(
            "object of type '{}' has no len()",
            v.type_name(&ctx.heap)
        ))),
    }
}

/// The iteration protocol entry: `__iter__`.
///
/// Lists, tuples, and strings iterate through the prelude's index-based
/// iterator class; dicts and sets get native generation-checked iterators.
pub(crate) fn get_iter(ctx: &mut Context, v: Value) -> RunResult<Value> {
    match v {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::List(_) | HeapData::Tuple(_) | HeapData::Str(_) => {
                let class = ctx.builtins.default_iter_class()?;
                call::call_class(ctx, class, CallArgs::one(v))
            }
            HeapData::Dict(dict) => {
                let version = dict.version;
                ctx.alloc(HeapData::Iter(NativeIter::Dict {
                    dict: id,
                    kind: DictIterKind::Keys,
                    index: 0,
                    version,
                }))
            }
            HeapData::Set(set) => {
                let version = set.version;
                ctx.alloc(HeapData::Iter(NativeIter::Set {
                    set: id,
                    index: 0,
                    version,
                }))
            }
            HeapData::File(_) => ctx.alloc(HeapData::Iter(NativeIter::File { file: id })),
            HeapData::Iter(_) => Ok(v),
            HeapData::Instance(_) => call_method(ctx, v, Sym::Iter.id(), CallArgs::empty()),
            other => Err(ExcType::type_error_not_iterable(other.type_of().name())),
        },
        _ => Err(ExcType::type_error_not_iterable(&v.type_name(&ctx.heap))),
    }
}

/// Advances an iterator, consuming `StopIteration` as the exhaustion
/// signal rather than letting it propagate.
pub(crate) fn iter_next(ctx: &mut Context, it: Value) -> RunResult<Option<Value>> {
    if let Value::Ref(id) = it {
        if matches!(ctx.heap.get(id), HeapData::Iter(_)) {
            return native_iter_next(ctx, id);
        }
    }
    match call_method(ctx, it, Sym::Next.id(), CallArgs::empty()) {
        Ok(v) => Ok(Some(v)),
        Err(err) if is_stop_iteration(ctx, &err) => Ok(None),
        Err(err) => Err(err),
    }
}

pub(crate) fn native_iter_next(ctx: &mut Context, iter_id: HeapId) -> RunResult<Option<Value>> {
    let HeapData::Iter(iter) = ctx.heap.get(iter_id) else {
        unreachable!("native_iter_next takes an iterator id");
    };
    match *iter {
        NativeIter::Dict {
            dict,
            kind,
            index,
            version,
        } => {
            let HeapData::Dict(d) = ctx.heap.get(dict) else {
                unreachable!("dict iterator over a dict");
            };
            if d.version != version {
                return Err(crate::types::dict::dict_changed_error());
            }
            let Some(entry) = d.entries.get(index) else {
                return Ok(None);
            };
            let (key, value) = (entry.key, entry.value);
            advance_native_iter(ctx, iter_id);
            match kind {
                DictIterKind::Keys => Ok(Some(key)),
                DictIterKind::Values => Ok(Some(value)),
                DictIterKind::Items => {
                    let pair = ctx.alloc(HeapData::Tuple(Box::from([key, value])))?;
                    Ok(Some(pair))
                }
            }
        }
        NativeIter::Set {
            set,
            index,
            version,
        } => {
            let HeapData::Set(s) = ctx.heap.get(set) else {
                unreachable!("set iterator over a set");
            };
            if s.version != version {
                return Err(crate::types::set::set_changed_error());
            }
            let Some(entry) = s.entries.get(index) else {
                return Ok(None);
            };
            let key = entry.key;
            advance_native_iter(ctx, iter_id);
            Ok(Some(key))
        }
        NativeIter::File { file } => {
            let HeapData::File(f) = ctx.heap.get_mut(file) else {
                unreachable!("file iterator over a file");
            };
            match f.read_line()? {
                Some(line) => ctx.alloc(HeapData::Str(line.into_boxed_str())).map(Some),
                None => Ok(None),
            }
        }
    }
}

fn advance_native_iter(ctx: &mut Context, iter_id: HeapId) {
    if let HeapData::Iter(iter) = ctx.heap.get_mut(iter_id) {
        match iter {
            NativeIter::Dict { index, .. } | NativeIter::Set { index, .. } => *index += 1,
            NativeIter::File { .. } => {}
        }
    }
}

/// Whether an error is the iteration-exhaustion signal.
pub(crate) fn is_stop_iteration(ctx: &Context, err: &RunError) -> bool {
    match &err.exc.payload {
        crate::exception::ExcPayload::Simple { exc_type, .. } => {
            *exc_type == ExcType::StopIteration
        }
        crate::exception::ExcPayload::Object(v) => {
            let Some(class_id) = crate::types::class::instance_class(&ctx.heap, *v) else {
                return false;
            };
            let Some(stop) = ctx.builtins.exc_class(ExcType::StopIteration) else {
                return false;
            };
            crate::types::class::is_subclass(&ctx.heap, class_id, stop)
        }
    }
}
