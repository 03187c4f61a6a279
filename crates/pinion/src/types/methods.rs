//! Native methods of the builtin types.
//!
//! Attribute access on a builtin value resolves through
//! [`lookup_type_method`]; the returned marker is wrapped in a bound
//! function object and dispatched here when called.

use crate::args::CallArgs;
use crate::bytecode::vm;
use crate::context::Context;
use crate::exception::{ExcType, RunResult};
use crate::heap::{HeapData, HeapId};
use crate::intern::Sym;
use crate::types::iter::{DictIterKind, NativeIter};
use crate::types::{List, Type, dict, list, set, str_ops};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeMethod {
    // Protocol methods shared across builtin types.
    Len,
    Iter,
    Next,
    Contains,
    GetItem,
    SetItem,
    Hash,
    Repr,
    Str,
    Bool,
    Abs,
    Reversed,
    // int
    IntBitLength,
    IntBitCount,
    // float
    FloatIsInteger,
    // str
    StrSplit,
    StrSplitlines,
    StrJoin,
    StrStrip,
    StrLstrip,
    StrRstrip,
    StrFormat,
    StrStartswith,
    StrEndswith,
    StrFind,
    StrRfind,
    StrIndex,
    StrRindex,
    StrCount,
    StrReplace,
    StrLower,
    StrUpper,
    StrCapitalize,
    StrCasefold,
    StrCenter,
    StrLjust,
    StrRjust,
    StrZfill,
    StrIsAlnum,
    StrIsAlpha,
    StrIsAscii,
    StrIsDecimal,
    StrIsDigit,
    StrIsIdentifier,
    StrIsLower,
    StrIsUpper,
    StrIsNumeric,
    StrIsPrintable,
    StrIsSpace,
    // list
    ListAppend,
    ListExtend,
    ListInsert,
    ListPop,
    ListRemove,
    ListClear,
    ListCopy,
    ListIndex,
    ListCount,
    ListReverse,
    ListSort,
    // dict
    DictGet,
    DictKeys,
    DictValues,
    DictItems,
    DictPop,
    DictPopitem,
    DictSetdefault,
    DictClear,
    DictCopy,
    DictUpdate,
    // set
    SetAdd,
    SetRemove,
    SetDiscard,
    SetClear,
    SetPop,
    SetCopy,
    SetUpdate,
    SetUnion,
    SetIntersection,
    SetDifference,
    SetSymmetricDifference,
    SetIssubset,
    SetIssuperset,
    SetIsdisjoint,
    // tuple
    TupleCount,
    TupleIndex,
    // file
    FileRead,
    FileReadline,
    FileWrite,
    FileClose,
}

/// Maps `(receiver type, name)` to a native method.
pub(crate) fn lookup_type_method(type_: Type, name: &str) -> Option<TypeMethod> {
    use TypeMethod as M;
    // Protocol methods first; they apply to several types.
    let shared = match name {
        "__len__" => Some(M::Len),
        "__iter__" => Some(M::Iter),
        "__next__" => Some(M::Next),
        "__contains__" => Some(M::Contains),
        "__getitem__" => Some(M::GetItem),
        "__setitem__" => Some(M::SetItem),
        "__hash__" => Some(M::Hash),
        "__repr__" => Some(M::Repr),
        "__str__" => Some(M::Str),
        "__bool__" | "__nonzero__" => Some(M::Bool),
        "__abs__" => Some(M::Abs),
        "__reversed__" => Some(M::Reversed),
        _ => None,
    };
    if let Some(m) = shared {
        let applies = match m {
            M::Len | M::Contains | M::GetItem => matches!(
                type_,
                Type::Str | Type::Tuple | Type::List | Type::Dict | Type::Set
            ),
            M::SetItem => matches!(type_, Type::List | Type::Dict),
            M::Iter => matches!(
                type_,
                Type::Str | Type::Tuple | Type::List | Type::Dict | Type::Set | Type::Iter | Type::File
            ),
            M::Next => matches!(type_, Type::Iter),
            M::Abs => matches!(type_, Type::Int | Type::Float | Type::Bool),
            M::Reversed => matches!(type_, Type::Str | Type::Tuple | Type::List),
            M::Hash | M::Repr | M::Str | M::Bool => true,
            _ => unreachable!("`shared` only ever produces the protocol-method variants"),
        };
        return applies.then_some(m);
    }

    match type_ {
        Type::Int | Type::Bool => match name {
            "bit_length" => Some(M::IntBitLength),
            "bit_count" => Some(M::IntBitCount),
            _ => None,
        },
        Type::Float => match name {
            "is_integer" => Some(M::FloatIsInteger),
            _ => None,
        },
        Type::Str => match name {
            "split" => Some(M::StrSplit),
            "splitlines" => Some(M::StrSplitlines),
            "join" => Some(M::StrJoin),
            "strip" => Some(M::StrStrip),
            "lstrip" => Some(M::StrLstrip),
            "rstrip" => Some(M::StrRstrip),
            "format" => Some(M::StrFormat),
            "startswith" => Some(M::StrStartswith),
            "endswith" => Some(M::StrEndswith),
            "find" => Some(M::StrFind),
            "rfind" => Some(M::StrRfind),
            "index" => Some(M::StrIndex),
            "rindex" => Some(M::StrRindex),
            "count" => Some(M::StrCount),
            "replace" => Some(M::StrReplace),
            "lower" => Some(M::StrLower),
            "upper" => Some(M::StrUpper),
            "capitalize" => Some(M::StrCapitalize),
            "casefold" => Some(M::StrCasefold),
            "center" => Some(M::StrCenter),
            "ljust" => Some(M::StrLjust),
            "rjust" => Some(M::StrRjust),
            "zfill" => Some(M::StrZfill),
            "isalnum" => Some(M::StrIsAlnum),
            "isalpha" => Some(M::StrIsAlpha),
            "isascii" => Some(M::StrIsAscii),
            "isdecimal" => Some(M::StrIsDecimal),
            "isdigit" => Some(M::StrIsDigit),
            "isidentifier" => Some(M::StrIsIdentifier),
            "islower" => Some(M::StrIsLower),
            "isupper" => Some(M::StrIsUpper),
            "isnumeric" => Some(M::StrIsNumeric),
            "isprintable" => Some(M::StrIsPrintable),
            "isspace" => Some(M::StrIsSpace),
            _ => None,
        },
        Type::List => match name {
            "append" => Some(M::ListAppend),
            "extend" => Some(M::ListExtend),
            "insert" => Some(M::ListInsert),
            "pop" => Some(M::ListPop),
            "remove" => Some(M::ListRemove),
            "clear" => Some(M::ListClear),
            "copy" => Some(M::ListCopy),
            "index" => Some(M::ListIndex),
            "count" => Some(M::ListCount),
            "reverse" => Some(M::ListReverse),
            "sort" => Some(M::ListSort),
            _ => None,
        },
        Type::Dict => match name {
            "get" => Some(M::DictGet),
            "keys" => Some(M::DictKeys),
            "values" => Some(M::DictValues),
            "items" => Some(M::DictItems),
            "pop" => Some(M::DictPop),
            "popitem" => Some(M::DictPopitem),
            "setdefault" => Some(M::DictSetdefault),
            "clear" => Some(M::DictClear),
            "copy" => Some(M::DictCopy),
            "update" => Some(M::DictUpdate),
            _ => None,
        },
        Type::Set => match name {
            "add" => Some(M::SetAdd),
            "remove" => Some(M::SetRemove),
            "discard" => Some(M::SetDiscard),
            "clear" => Some(M::SetClear),
            "pop" => Some(M::SetPop),
            "copy" => Some(M::SetCopy),
            "update" => Some(M::SetUpdate),
            "union" => Some(M::SetUnion),
            "intersection" => Some(M::SetIntersection),
            "difference" => Some(M::SetDifference),
            "symmetric_difference" => Some(M::SetSymmetricDifference),
            "issubset" => Some(M::SetIssubset),
            "issuperset" => Some(M::SetIssuperset),
            "isdisjoint" => Some(M::SetIsdisjoint),
            _ => None,
        },
        Type::Tuple => match name {
            "count" => Some(M::TupleCount),
            "index" => Some(M::TupleIndex),
            _ => None,
        },
        Type::File => match name {
            "read" => Some(M::FileRead),
            "readline" => Some(M::FileReadline),
            "write" => Some(M::FileWrite),
            "close" => Some(M::FileClose),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn call_type_method(
    ctx: &mut Context,
    method: TypeMethod,
    recv: Value,
    args: &CallArgs,
) -> RunResult<Value> {
    use TypeMethod as M;
    match method {
        M::Len => {
            args.check_zero_args("__len__")?;
            vm::py_len(ctx, recv).map(Value::Int)
        }
        M::Iter => {
            args.check_zero_args("__iter__")?;
            vm::get_iter(ctx, recv)
        }
        M::Next => {
            args.check_zero_args("__next__")?;
            match vm::iter_next(ctx, recv)? {
                Some(v) => Ok(v),
                None => Err(ExcType::stop_iteration()),
            }
        }
        M::Contains => {
            let needle = args.get_one_arg("__contains__")?;
            let mark = ctx.temp_roots_mark();
            ctx.temp_roots_push(recv);
            ctx.temp_roots_push(needle);
            let result = contains_impl(ctx, recv, needle);
            ctx.temp_roots_reset(mark);
            result.map(Value::Bool)
        }
        M::GetItem => {
            let index = args.get_one_arg("__getitem__")?;
            vm::get_index(ctx, recv, index)
        }
        M::SetItem => {
            let (index, value) = args.get_two_args("__setitem__")?;
            vm::set_index(ctx, recv, index, value)?;
            Ok(Value::Null)
        }
        M::Hash => {
            args.check_zero_args("__hash__")?;
            vm::py_hash(ctx, recv).map(|h| Value::Int(h as i64))
        }
        M::Repr => {
            args.check_zero_args("__repr__")?;
            let text = vm::py_repr(ctx, recv)?;
            ctx.alloc(HeapData::Str(text.into_boxed_str()))
        }
        M::Str => {
            args.check_zero_args("__str__")?;
            let text = vm::py_str(ctx, recv)?;
            ctx.alloc(HeapData::Str(text.into_boxed_str()))
        }
        M::Bool => {
            args.check_zero_args("__bool__")?;
            vm::py_truthy(ctx, recv).map(Value::Bool)
        }
        M::Abs => {
            args.check_zero_args("__abs__")?;
            match recv {
                Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                _ => Err(ExcType::type_error("bad operand type for abs()")),
            }
        }
        M::Reversed => {
            args.check_zero_args("__reversed__")?;
            let class = ctx.builtins.default_reverse_iter_class()?;
            vm::call_class(ctx, class, CallArgs::one(recv))
        }

        M::IntBitLength => {
            args.check_zero_args("bit_length")?;
            let n = int_of(ctx, recv, "bit_length")? as u64;
            Ok(Value::Int(64 - i64::from(n.leading_zeros())))
        }
        M::IntBitCount => {
            args.check_zero_args("bit_count")?;
            let n = int_of(ctx, recv, "bit_count")? as u64;
            Ok(Value::Int(i64::from(n.count_ones())))
        }
        M::FloatIsInteger => {
            args.check_zero_args("is_integer")?;
            let Value::Float(f) = recv else {
                return Err(ExcType::type_error("is_integer() expected a float"));
            };
            Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
        }

        M::StrSplit => {
            let sep = args.get_zero_one_arg("split")?;
            let s = str_of(ctx, recv, "split")?;
            let sep = match sep {
                None | Some(Value::Null) => None,
                Some(v) => Some(str_of(ctx, v, "split")?),
            };
            let parts = str_ops::split(&s, sep.as_deref());
            alloc_str_list(ctx, parts)
        }
        M::StrJoin => {
            let seq = args.get_one_arg("join")?;
            let sep = str_of(ctx, recv, "join")?;
            let items = sequence_items(ctx, seq, "join")?;
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                parts.push(str_of(ctx, item, "join")?);
            }
            let joined = parts.join(&sep);
            ctx.alloc(HeapData::Str(joined.into_boxed_str()))
        }
        M::StrStrip | M::StrLstrip | M::StrRstrip => {
            let (name, mode) = match method {
                M::StrLstrip => ("lstrip", str_ops::StripMode::Left),
                M::StrRstrip => ("rstrip", str_ops::StripMode::Right),
                _ => ("strip", str_ops::StripMode::Both),
            };
            let chars = args.get_zero_one_arg(name)?;
            let s = str_of(ctx, recv, name)?;
            let chars = match chars {
                None | Some(Value::Null) => None,
                Some(v) => Some(str_of(ctx, v, name)?),
            };
            let stripped = str_ops::strip(&s, chars.as_deref(), mode);
            ctx.alloc(HeapData::Str(stripped.into_boxed_str()))
        }
        M::StrSplitlines => {
            let keepends = match args.get_zero_one_arg("splitlines")? {
                None => false,
                Some(v) => vm::py_truthy(ctx, v)?,
            };
            let s = str_of(ctx, recv, "splitlines")?;
            alloc_str_list(ctx, str_ops::splitlines(&s, keepends))
        }
        M::StrCapitalize => {
            args.check_zero_args("capitalize")?;
            let s = str_of(ctx, recv, "capitalize")?;
            ctx.alloc(HeapData::Str(str_ops::capitalize(&s).into_boxed_str()))
        }
        M::StrCasefold => {
            args.check_zero_args("casefold")?;
            let s = str_of(ctx, recv, "casefold")?;
            ctx.alloc(HeapData::Str(s.to_lowercase().into_boxed_str()))
        }
        M::StrCenter | M::StrLjust | M::StrRjust => {
            let name = match method {
                M::StrCenter => "center",
                M::StrLjust => "ljust",
                _ => "rjust",
            };
            let (width, fill) = args.get_one_two_args(name)?;
            let Value::Int(width) = width else {
                return Err(ExcType::type_error(format!("{name}() width must be an integer")));
            };
            let fill = match fill {
                None => ' ',
                Some(v) => {
                    let fill = str_of(ctx, v, name)?;
                    let mut chars = fill.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => c,
                        _ => {
                            return Err(ExcType::type_error(
                                "the fill character must be exactly one character long",
                            ));
                        }
                    }
                }
            };
            let s = str_of(ctx, recv, name)?;
            let padded = match method {
                M::StrCenter => str_ops::center(&s, width, fill),
                M::StrLjust => str_ops::pad(&s, width, fill, true),
                _ => str_ops::pad(&s, width, fill, false),
            };
            ctx.alloc(HeapData::Str(padded.into_boxed_str()))
        }
        M::StrZfill => {
            let width = args.get_one_arg("zfill")?;
            let Value::Int(width) = width else {
                return Err(ExcType::type_error("zfill() width must be an integer"));
            };
            let s = str_of(ctx, recv, "zfill")?;
            ctx.alloc(HeapData::Str(str_ops::zfill(&s, width).into_boxed_str()))
        }
        M::StrCount => {
            let sub = args.get_one_arg("count")?;
            let s = str_of(ctx, recv, "count")?;
            let sub = str_of(ctx, sub, "count")?;
            Ok(Value::Int(str_ops::count_occurrences(&s, &sub)))
        }
        M::StrIndex | M::StrRindex => {
            let name = if method == M::StrIndex { "index" } else { "rindex" };
            let sub = args.get_one_arg(name)?;
            let s = str_of(ctx, recv, name)?;
            let sub = str_of(ctx, sub, name)?;
            let found = if method == M::StrIndex {
                s.find(&sub).map(|p| s[..p].chars().count() as i64)
            } else {
                str_ops::rfind(&s, &sub)
            };
            match found {
                Some(i) => Ok(Value::Int(i)),
                None => Err(ExcType::value_error("substring not found")),
            }
        }
        M::StrRfind => {
            let sub = args.get_one_arg("rfind")?;
            let s = str_of(ctx, recv, "rfind")?;
            let sub = str_of(ctx, sub, "rfind")?;
            Ok(Value::Int(str_ops::rfind(&s, &sub).unwrap_or(-1)))
        }
        M::StrIsAlnum
        | M::StrIsAlpha
        | M::StrIsAscii
        | M::StrIsDecimal
        | M::StrIsDigit
        | M::StrIsIdentifier
        | M::StrIsLower
        | M::StrIsUpper
        | M::StrIsNumeric
        | M::StrIsPrintable
        | M::StrIsSpace => {
            let name = predicate_name(method);
            args.check_zero_args(name)?;
            let s = str_of(ctx, recv, name)?;
            Ok(Value::Bool(str_predicate(method, &s)))
        }
        M::StrFormat => {
            let template = str_of(ctx, recv, "format")?;
            let pieces = str_ops::parse_format(&template)?;
            let mut out = String::new();
            let mut next_auto = 0usize;
            for piece in pieces {
                match piece {
                    str_ops::FormatPiece::Literal(text) => out.push_str(&text),
                    str_ops::FormatPiece::Auto => {
                        let Some(v) = args.pos.get(next_auto) else {
                            return Err(ExcType::value_error(
                                "format index out of range",
                            ));
                        };
                        next_auto += 1;
                        out.push_str(&vm::py_str(ctx, *v)?);
                    }
                    str_ops::FormatPiece::Manual(i) => {
                        let Some(v) = args.pos.get(i) else {
                            return Err(ExcType::value_error("format index out of range"));
                        };
                        out.push_str(&vm::py_str(ctx, *v)?);
                    }
                }
            }
            ctx.alloc(HeapData::Str(out.into_boxed_str()))
        }
        M::StrStartswith => {
            let prefix = args.get_one_arg("startswith")?;
            let s = str_of(ctx, recv, "startswith")?;
            let prefix = str_of(ctx, prefix, "startswith")?;
            Ok(Value::Bool(s.starts_with(&prefix)))
        }
        M::StrEndswith => {
            let suffix = args.get_one_arg("endswith")?;
            let s = str_of(ctx, recv, "endswith")?;
            let suffix = str_of(ctx, suffix, "endswith")?;
            Ok(Value::Bool(s.ends_with(&suffix)))
        }
        M::StrFind => {
            let sub = args.get_one_arg("find")?;
            let s = str_of(ctx, recv, "find")?;
            let sub = str_of(ctx, sub, "find")?;
            match s.find(&sub) {
                Some(byte_pos) => Ok(Value::Int(s[..byte_pos].chars().count() as i64)),
                None => Ok(Value::Int(-1)),
            }
        }
        M::StrReplace => {
            let (old, new) = args.get_two_args("replace")?;
            let s = str_of(ctx, recv, "replace")?;
            let old = str_of(ctx, old, "replace")?;
            let new = str_of(ctx, new, "replace")?;
            let replaced = s.replace(&old, &new);
            ctx.alloc(HeapData::Str(replaced.into_boxed_str()))
        }
        M::StrLower => {
            args.check_zero_args("lower")?;
            let s = str_of(ctx, recv, "lower")?;
            ctx.alloc(HeapData::Str(s.to_lowercase().into_boxed_str()))
        }
        M::StrUpper => {
            args.check_zero_args("upper")?;
            let s = str_of(ctx, recv, "upper")?;
            ctx.alloc(HeapData::Str(s.to_uppercase().into_boxed_str()))
        }

        M::ListAppend => {
            let v = args.get_one_arg("append")?;
            let id = list_id(ctx, recv)?;
            let HeapData::List(l) = ctx.heap.get_mut(id) else {
                unreachable!("checked by list_id");
            };
            l.items.push(v);
            Ok(Value::Null)
        }
        M::ListExtend => {
            let seq = args.get_one_arg("extend")?;
            let id = list_id(ctx, recv)?;
            let items = sequence_items(ctx, seq, "extend")?;
            let HeapData::List(l) = ctx.heap.get_mut(id) else {
                unreachable!("checked by list_id");
            };
            l.items.extend(items);
            Ok(Value::Null)
        }
        M::ListInsert => {
            let (index, v) = args.get_two_args("insert")?;
            let Value::Int(index) = index else {
                return Err(ExcType::type_error("insert index must be an integer"));
            };
            let id = list_id(ctx, recv)?;
            let HeapData::List(l) = ctx.heap.get_mut(id) else {
                unreachable!("checked by list_id");
            };
            let len = l.items.len() as i64;
            let at = index.clamp(-len, len);
            let at = if at < 0 { at + len } else { at } as usize;
            l.items.insert(at, v);
            Ok(Value::Null)
        }
        M::ListPop => {
            let index = args.get_zero_one_arg("pop")?;
            let id = list_id(ctx, recv)?;
            let HeapData::List(l) = ctx.heap.get_mut(id) else {
                unreachable!("checked by list_id");
            };
            if l.items.is_empty() {
                return Err(ExcType::index_error("pop from empty list"));
            }
            let i = match index {
                None => l.items.len() - 1,
                Some(Value::Int(i)) => {
                    crate::types::slice::normalize_index(i, l.items.len(), "list")?
                }
                Some(_) => return Err(ExcType::type_error("pop index must be an integer")),
            };
            Ok(l.items.remove(i))
        }
        M::ListRemove => {
            let needle = args.get_one_arg("remove")?;
            let id = list_id(ctx, recv)?;
            match position_of(ctx, id, needle)? {
                Some(i) => {
                    let HeapData::List(l) = ctx.heap.get_mut(id) else {
                        unreachable!("checked by list_id");
                    };
                    l.items.remove(i);
                    Ok(Value::Null)
                }
                None => Err(ExcType::value_error("list.remove(x): x not in list")),
            }
        }
        M::ListClear => {
            args.check_zero_args("clear")?;
            let id = list_id(ctx, recv)?;
            let HeapData::List(l) = ctx.heap.get_mut(id) else {
                unreachable!("checked by list_id");
            };
            l.items.clear();
            Ok(Value::Null)
        }
        M::ListIndex => {
            let needle = args.get_one_arg("index")?;
            let id = list_id(ctx, recv)?;
            match position_of(ctx, id, needle)? {
                Some(i) => Ok(Value::Int(i as i64)),
                None => Err(ExcType::value_error("value not in list")),
            }
        }
        M::ListCount => {
            let needle = args.get_one_arg("count")?;
            let id = list_id(ctx, recv)?;
            let items = match ctx.heap.get(id) {
                HeapData::List(l) => l.items.clone(),
                _ => unreachable!("checked by list_id"),
            };
            let mut count = 0i64;
            for item in items {
                if vm::py_eq(ctx, needle, item)? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        M::ListReverse => {
            args.check_zero_args("reverse")?;
            let id = list_id(ctx, recv)?;
            let HeapData::List(l) = ctx.heap.get_mut(id) else {
                unreachable!("checked by list_id");
            };
            l.items.reverse();
            Ok(Value::Null)
        }
        M::ListSort => {
            let id = list_id(ctx, recv)?;
            let key = args.kwarg(Sym::Key.id());
            let reverse = match args.kwarg(Sym::Reverse.id()) {
                None | Some(Value::Bool(false)) => false,
                Some(Value::Bool(true)) => true,
                Some(v) => vm::py_truthy(ctx, v)?,
            };
            list::sort(ctx, id, key, reverse)?;
            Ok(Value::Null)
        }
        M::ListCopy => {
            args.check_zero_args("copy")?;
            let id = list_id(ctx, recv)?;
            let items = match ctx.heap.get(id) {
                HeapData::List(l) => l.items.clone(),
                _ => unreachable!("checked by list_id"),
            };
            ctx.alloc(HeapData::List(List::new(items)))
        }

        M::DictGet => {
            let (key, default) = args.get_one_two_args("get")?;
            let id = dict_id(ctx, recv)?;
            match dict::dict_get(ctx, id, key)? {
                Some(v) => Ok(v),
                None => Ok(default.unwrap_or(Value::Null)),
            }
        }
        M::DictKeys => dict_iter(ctx, recv, args, DictIterKind::Keys, "keys"),
        M::DictValues => dict_iter(ctx, recv, args, DictIterKind::Values, "values"),
        M::DictItems => dict_iter(ctx, recv, args, DictIterKind::Items, "items"),
        M::DictPop => {
            let (key, default) = args.get_one_two_args("pop")?;
            let id = dict_id(ctx, recv)?;
            match dict::dict_remove(ctx, id, key)? {
                Some(v) => Ok(v),
                None => match default {
                    Some(v) => Ok(v),
                    None => {
                        let repr = vm::py_repr(ctx, key)?;
                        Err(ExcType::key_error(repr))
                    }
                },
            }
        }
        M::DictClear => {
            args.check_zero_args("clear")?;
            let id = dict_id(ctx, recv)?;
            let HeapData::Dict(d) = ctx.heap.get_mut(id) else {
                unreachable!("checked by dict_id");
            };
            // Preserve the generation so live iterators notice the change.
            let version = d.version;
            *d = dict::Dict::new();
            d.version = version + 1;
            Ok(Value::Null)
        }
        M::DictUpdate => {
            let other = args.get_one_arg("update")?;
            let id = dict_id(ctx, recv)?;
            let Value::Ref(other_id) = other else {
                return Err(ExcType::type_error("update() requires a dict"));
            };
            let pairs: Vec<(Value, Value)> = match ctx.heap.get(other_id) {
                HeapData::Dict(d) => d.entries.iter().map(|e| (e.key, e.value)).collect(),
                _ => return Err(ExcType::type_error("update() requires a dict")),
            };
            for (k, v) in pairs {
                dict::dict_set(ctx, id, k, v)?;
            }
            Ok(Value::Null)
        }
        M::DictSetdefault => {
            let (key, default) = args.get_one_two_args("setdefault")?;
            let id = dict_id(ctx, recv)?;
            match dict::dict_get(ctx, id, key)? {
                Some(v) => Ok(v),
                None => {
                    let default = default.unwrap_or(Value::Null);
                    dict::dict_set(ctx, id, key, default)?;
                    Ok(default)
                }
            }
        }
        M::DictPopitem => {
            args.check_zero_args("popitem")?;
            let id = dict_id(ctx, recv)?;
            let last = match ctx.heap.get(id) {
                HeapData::Dict(d) => d.entries.last().map(|e| (e.key, e.value)),
                _ => unreachable!("checked by dict_id"),
            };
            let Some((key, value)) = last else {
                return Err(ExcType::key_error("popitem(): dictionary is empty".to_string()));
            };
            dict::dict_remove(ctx, id, key)?;
            let mark = ctx.temp_roots_mark();
            ctx.temp_roots_push(key);
            ctx.temp_roots_push(value);
            let pair = ctx.alloc(HeapData::Tuple(Box::from([key, value])));
            ctx.temp_roots_reset(mark);
            pair
        }
        M::DictCopy => {
            args.check_zero_args("copy")?;
            let id = dict_id(ctx, recv)?;
            let pairs: Vec<(Value, Value)> = match ctx.heap.get(id) {
                HeapData::Dict(d) => d.entries.iter().map(|e| (e.key, e.value)).collect(),
                _ => unreachable!("checked by dict_id"),
            };
            let out = ctx.alloc(HeapData::Dict(dict::Dict::new()))?;
            let Value::Ref(out_id) = out else {
                unreachable!("alloc returns a heap reference");
            };
            let mark = ctx.temp_roots_mark();
            ctx.temp_roots_push(out);
            let result = (|ctx: &mut Context| {
                for (k, v) in pairs {
                    dict::dict_set(ctx, out_id, k, v)?;
                }
                Ok(out)
            })(ctx);
            ctx.temp_roots_reset(mark);
            result
        }

        M::SetAdd => {
            let v = args.get_one_arg("add")?;
            let id = set_id(ctx, recv)?;
            set::set_add(ctx, id, v)?;
            Ok(Value::Null)
        }
        M::SetRemove => {
            let v = args.get_one_arg("remove")?;
            let id = set_id(ctx, recv)?;
            if set::set_remove(ctx, id, v)? {
                Ok(Value::Null)
            } else {
                let repr = vm::py_repr(ctx, v)?;
                Err(ExcType::key_error(repr))
            }
        }
        M::SetDiscard => {
            let v = args.get_one_arg("discard")?;
            let id = set_id(ctx, recv)?;
            set::set_remove(ctx, id, v)?;
            Ok(Value::Null)
        }
        M::SetClear => {
            args.check_zero_args("clear")?;
            let id = set_id(ctx, recv)?;
            let HeapData::Set(s) = ctx.heap.get_mut(id) else {
                unreachable!("checked by set_id");
            };
            let version = s.version;
            *s = set::Set::new();
            s.version = version + 1;
            Ok(Value::Null)
        }
        M::SetPop => {
            args.check_zero_args("pop")?;
            let id = set_id(ctx, recv)?;
            let first = match ctx.heap.get(id) {
                HeapData::Set(s) => s.entries.first().map(|e| e.key),
                _ => unreachable!("checked by set_id"),
            };
            let Some(key) = first else {
                return Err(ExcType::key_error("pop from an empty set".to_string()));
            };
            set::set_remove(ctx, id, key)?;
            Ok(key)
        }
        M::SetCopy => {
            args.check_zero_args("copy")?;
            let id = set_id(ctx, recv)?;
            let keys = set_keys(ctx, id);
            build_set(ctx, &keys)
        }
        M::SetUpdate => {
            let other = args.get_one_arg("update")?;
            let id = set_id(ctx, recv)?;
            let items = sequence_items(ctx, other, "update")?;
            for item in items {
                set::set_add(ctx, id, item)?;
            }
            Ok(Value::Null)
        }
        M::SetUnion => {
            let other = args.get_one_arg("union")?;
            let id = set_id(ctx, recv)?;
            let mut keys = set_keys(ctx, id);
            keys.extend(sequence_items(ctx, other, "union")?);
            build_set(ctx, &keys)
        }
        M::SetIntersection | M::SetDifference => {
            let name = if method == M::SetIntersection {
                "intersection"
            } else {
                "difference"
            };
            let other = args.get_one_arg(name)?;
            let id = set_id(ctx, recv)?;
            let others = sequence_items(ctx, other, name)?;
            let mut keys = Vec::new();
            for key in set_keys(ctx, id) {
                let in_other = vm::sequence_contains(ctx, &others, key)?;
                if in_other == (method == M::SetIntersection) {
                    keys.push(key);
                }
            }
            build_set(ctx, &keys)
        }
        M::SetSymmetricDifference => {
            let other = args.get_one_arg("symmetric_difference")?;
            let id = set_id(ctx, recv)?;
            let ours = set_keys(ctx, id);
            let theirs = sequence_items(ctx, other, "symmetric_difference")?;
            let mut keys = Vec::new();
            for key in &ours {
                if !vm::sequence_contains(ctx, &theirs, *key)? {
                    keys.push(*key);
                }
            }
            for key in &theirs {
                if !vm::sequence_contains(ctx, &ours, *key)? {
                    keys.push(*key);
                }
            }
            build_set(ctx, &keys)
        }
        M::SetIssubset | M::SetIssuperset | M::SetIsdisjoint => {
            let name = match method {
                M::SetIssubset => "issubset",
                M::SetIssuperset => "issuperset",
                _ => "isdisjoint",
            };
            let other = args.get_one_arg(name)?;
            let id = set_id(ctx, recv)?;
            let ours = set_keys(ctx, id);
            let theirs = sequence_items(ctx, other, name)?;
            let result = match method {
                M::SetIssubset => {
                    let mut all = true;
                    for key in &ours {
                        if !vm::sequence_contains(ctx, &theirs, *key)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                M::SetIssuperset => {
                    let mut all = true;
                    for key in &theirs {
                        if !vm::sequence_contains(ctx, &ours, *key)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                _ => {
                    let mut disjoint = true;
                    for key in &ours {
                        if vm::sequence_contains(ctx, &theirs, *key)? {
                            disjoint = false;
                            break;
                        }
                    }
                    disjoint
                }
            };
            Ok(Value::Bool(result))
        }

        M::TupleCount | M::TupleIndex => {
            let needle = args.get_one_arg("count")?;
            let Value::Ref(id) = recv else {
                unreachable!("tuple method on a tuple");
            };
            let items = match ctx.heap.get(id) {
                HeapData::Tuple(t) => t.to_vec(),
                _ => unreachable!("tuple method on a tuple"),
            };
            if method == M::TupleCount {
                let mut count = 0i64;
                for item in items {
                    if vm::py_eq(ctx, needle, item)? {
                        count += 1;
                    }
                }
                Ok(Value::Int(count))
            } else {
                for (i, item) in items.iter().enumerate() {
                    if vm::py_eq(ctx, needle, *item)? {
                        return Ok(Value::Int(i as i64));
                    }
                }
                Err(ExcType::value_error("value not in tuple"))
            }
        }

        M::FileRead => {
            args.check_zero_args("read")?;
            let id = file_id(ctx, recv)?;
            let HeapData::File(f) = ctx.heap.get_mut(id) else {
                unreachable!("checked by file_id");
            };
            let text = f.read_all()?;
            ctx.alloc(HeapData::Str(text.into_boxed_str()))
        }
        M::FileReadline => {
            args.check_zero_args("readline")?;
            let id = file_id(ctx, recv)?;
            let HeapData::File(f) = ctx.heap.get_mut(id) else {
                unreachable!("checked by file_id");
            };
            let line = f.read_line()?.unwrap_or_default();
            ctx.alloc(HeapData::Str(line.into_boxed_str()))
        }
        M::FileWrite => {
            let text = args.get_one_arg("write")?;
            let text = str_of(ctx, text, "write")?;
            let id = file_id(ctx, recv)?;
            let HeapData::File(f) = ctx.heap.get_mut(id) else {
                unreachable!("checked by file_id");
            };
            f.write_str(&text)?;
            Ok(Value::Int(text.chars().count() as i64))
        }
        M::FileClose => {
            args.check_zero_args("close")?;
            let id = file_id(ctx, recv)?;
            let HeapData::File(f) = ctx.heap.get_mut(id) else {
                unreachable!("checked by file_id");
            };
            f.close();
            Ok(Value::Null)
        }
    }
}

fn contains_impl(ctx: &mut Context, container: Value, needle: Value) -> RunResult<bool> {
    match container {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Str(s) => {
                let s = s.to_string();
                let sub = str_of(ctx, needle, "__contains__")?;
                Ok(s.contains(&sub))
            }
            HeapData::Tuple(items) => {
                let items = items.to_vec();
                vm::sequence_contains(ctx, &items, needle)
            }
            HeapData::List(l) => {
                let items = l.items.clone();
                vm::sequence_contains(ctx, &items, needle)
            }
            HeapData::Dict(_) => Ok(dict::dict_find(ctx, id, needle)?.is_some()),
            HeapData::Set(_) => set::set_contains(ctx, id, needle),
            _ => Err(ExcType::type_error("argument is not a container")),
        },
        _ => Err(ExcType::type_error("argument is not a container")),
    }
}

fn dict_iter(
    ctx: &mut Context,
    recv: Value,
    args: &CallArgs,
    kind: DictIterKind,
    name: &str,
) -> RunResult<Value> {
    args.check_zero_args(name)?;
    let id = dict_id(ctx, recv)?;
    let HeapData::Dict(d) = ctx.heap.get(id) else {
        unreachable!("checked by dict_id");
    };
    let version = d.version;
    ctx.alloc(HeapData::Iter(NativeIter::Dict {
        dict: id,
        kind,
        index: 0,
        version,
    }))
}

fn predicate_name(method: TypeMethod) -> &'static str {
    use TypeMethod as M;
    match method {
        M::StrIsAlnum => "isalnum",
        M::StrIsAlpha => "isalpha",
        M::StrIsAscii => "isascii",
        M::StrIsDecimal => "isdecimal",
        M::StrIsDigit => "isdigit",
        M::StrIsIdentifier => "isidentifier",
        M::StrIsLower => "islower",
        M::StrIsUpper => "isupper",
        M::StrIsNumeric => "isnumeric",
        M::StrIsPrintable => "isprintable",
        M::StrIsSpace => "isspace",
        _ => unreachable!("not a string predicate"),
    }
}

fn str_predicate(method: TypeMethod, s: &str) -> bool {
    use TypeMethod as M;
    match method {
        // The empty string is ascii and printable but nothing else.
        M::StrIsAscii => s.is_ascii(),
        M::StrIsPrintable => s.chars().all(|c| !c.is_control()),
        M::StrIsIdentifier => str_ops::is_identifier(s),
        M::StrIsAlpha => !s.is_empty() && s.chars().all(char::is_alphabetic),
        M::StrIsAlnum => !s.is_empty() && s.chars().all(char::is_alphanumeric),
        M::StrIsDigit | M::StrIsDecimal => !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
        M::StrIsNumeric => !s.is_empty() && s.chars().all(char::is_numeric),
        M::StrIsSpace => !s.is_empty() && s.chars().all(char::is_whitespace),
        M::StrIsLower => s.chars().any(char::is_lowercase) && !s.chars().any(char::is_uppercase),
        M::StrIsUpper => s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase),
        _ => unreachable!("not a string predicate"),
    }
}

fn int_of(ctx: &Context, v: Value, method: &str) -> RunResult<i64> {
    match v {
        Value::Int(i) => Ok(i),
        Value::Bool(b) => Ok(i64::from(b)),
        _ => Err(ExcType::type_error(format!(
            "{method}() expected an integer, got '{}'",
            v.type_name(&ctx.heap)
        ))),
    }
}

fn set_keys(ctx: &Context, id: HeapId) -> Vec<Value> {
    match ctx.heap.get(id) {
        HeapData::Set(s) => s.entries.iter().map(|e| e.key).collect(),
        _ => unreachable!("set_keys takes a set id"),
    }
}

/// Builds a new set from keys that are still rooted through their source
/// containers.
fn build_set(ctx: &mut Context, keys: &[Value]) -> RunResult<Value> {
    let out = ctx.alloc(HeapData::Set(set::Set::new()))?;
    let Value::Ref(out_id) = out else {
        unreachable!("alloc returns a heap reference");
    };
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(out);
    let result = (|ctx: &mut Context| {
        for key in keys {
            set::set_add(ctx, out_id, *key)?;
        }
        Ok(out)
    })(ctx);
    ctx.temp_roots_reset(mark);
    result
}

fn str_of(ctx: &Context, v: Value, method: &str) -> RunResult<String> {
    match v {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Str(s) => Ok(s.to_string()),
            other => Err(ExcType::type_error(format!(
                "{method}() expected a string, got '{}'",
                other.type_of().name()
            ))),
        },
        _ => Err(ExcType::type_error(format!(
            "{method}() expected a string, got '{}'",
            v.type_name(&ctx.heap)
        ))),
    }
}

fn sequence_items(ctx: &Context, v: Value, method: &str) -> RunResult<Vec<Value>> {
    match v {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::List(l) => Ok(l.items.clone()),
            HeapData::Tuple(t) => Ok(t.to_vec()),
            HeapData::Set(s) => Ok(s.entries.iter().map(|e| e.key).collect()),
            other => Err(ExcType::type_error(format!(
                "{method}() expected a sequence, got '{}'",
                other.type_of().name()
            ))),
        },
        _ => Err(ExcType::type_error(format!(
            "{method}() expected a sequence, got '{}'",
            v.type_name(&ctx.heap)
        ))),
    }
}

fn alloc_str_list(ctx: &mut Context, parts: Vec<String>) -> RunResult<Value> {
    let list = ctx.alloc(HeapData::List(List::new(Vec::new())))?;
    let Value::Ref(list_id) = list else {
        unreachable!("alloc returns a heap reference");
    };
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(list);
    for part in parts {
        let s = ctx.alloc(HeapData::Str(part.into_boxed_str()));
        match s {
            Ok(s) => {
                let HeapData::List(l) = ctx.heap.get_mut(list_id) else {
                    unreachable!("list just allocated");
                };
                l.items.push(s);
            }
            Err(e) => {
                ctx.temp_roots_reset(mark);
                return Err(e);
            }
        }
    }
    ctx.temp_roots_reset(mark);
    Ok(list)
}

fn list_id(ctx: &Context, v: Value) -> RunResult<HeapId> {
    match v {
        Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::List(_)) => Ok(id),
        _ => Err(ExcType::type_error("expected a list")),
    }
}

fn dict_id(ctx: &Context, v: Value) -> RunResult<HeapId> {
    match v {
        Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Dict(_)) => Ok(id),
        _ => Err(ExcType::type_error("expected a dict")),
    }
}

fn set_id(ctx: &Context, v: Value) -> RunResult<HeapId> {
    match v {
        Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Set(_)) => Ok(id),
        _ => Err(ExcType::type_error("expected a set")),
    }
}

fn file_id(ctx: &Context, v: Value) -> RunResult<HeapId> {
    match v {
        Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::File(_)) => Ok(id),
        _ => Err(ExcType::type_error("expected a file")),
    }
}

fn position_of(ctx: &mut Context, list: HeapId, needle: Value) -> RunResult<Option<usize>> {
    let items = match ctx.heap.get(list) {
        HeapData::List(l) => l.items.clone(),
        _ => unreachable!("position_of takes a list id"),
    };
    for (i, item) in items.iter().enumerate() {
        if vm::py_eq(ctx, needle, *item)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}
