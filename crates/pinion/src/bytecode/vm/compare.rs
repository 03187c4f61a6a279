//! Comparison operators, identity, and membership.
//!
//! `in` swaps its operands and asks the container's `__contains__`;
//! `not in` negates the result. Comparison methods on instances must
//! return a boolean.

use crate::args::CallArgs;
use crate::context::Context;
use crate::exception::{ExcType, RunResult};
use crate::expressions::CmpOp;
use crate::heap::HeapData;
use crate::intern::Sym;
use crate::value::Value;

use super::{attr, call, protocol, sequence_contains};

pub(super) fn compare_op(ctx: &mut Context, op: CmpOp, lhs: Value, rhs: Value) -> RunResult<Value> {
    let result = match op {
        CmpOp::Is => lhs.is_identical(rhs),
        CmpOp::IsNot => !lhs.is_identical(rhs),
        CmpOp::Eq => protocol::py_eq(ctx, lhs, rhs)?,
        CmpOp::Ne => {
            // Instances may define __ne__; everything else negates ==.
            if is_instance(ctx, lhs) {
                if let Some(method) = attr::get_attr_opt(ctx, lhs, Sym::Ne.id())? {
                    let v = call::call_value(ctx, method, CallArgs::one(rhs))?;
                    let Value::Bool(b) = v else {
                        return Err(ExcType::type_error("__ne__() should return bool"));
                    };
                    return Ok(Value::Bool(b));
                }
            }
            !protocol::py_eq(ctx, lhs, rhs)?
        }
        CmpOp::Lt => ordered(ctx, Sym::Lt, lhs, rhs)?,
        CmpOp::Le => ordered(ctx, Sym::Le, lhs, rhs)?,
        CmpOp::Gt => ordered(ctx, Sym::Gt, lhs, rhs)?,
        CmpOp::Ge => ordered(ctx, Sym::Ge, lhs, rhs)?,
        CmpOp::In => contains(ctx, rhs, lhs)?,
        CmpOp::NotIn => !contains(ctx, rhs, lhs)?,
    };
    Ok(Value::Bool(result))
}

fn is_instance(ctx: &Context, v: Value) -> bool {
    matches!(v, Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Instance(_)))
}

fn ordered(ctx: &mut Context, sym: Sym, lhs: Value, rhs: Value) -> RunResult<bool> {
    if is_instance(ctx, lhs) {
        let Some(method) = attr::get_attr_opt(ctx, lhs, sym.id())? else {
            return Err(order_type_error(ctx, sym, lhs, rhs));
        };
        let v = call::call_value(ctx, method, CallArgs::one(rhs))?;
        let Value::Bool(b) = v else {
            return Err(ExcType::type_error(format!(
                "{}() should return bool",
                sym.as_str()
            )));
        };
        return Ok(b);
    }
    match sym {
        Sym::Lt => protocol::py_lt(ctx, lhs, rhs),
        Sym::Le => Ok(protocol::py_lt(ctx, lhs, rhs)? || protocol::py_eq(ctx, lhs, rhs)?),
        Sym::Gt => protocol::py_lt(ctx, rhs, lhs),
        Sym::Ge => Ok(protocol::py_lt(ctx, rhs, lhs)? || protocol::py_eq(ctx, lhs, rhs)?),
        _ => unreachable!("ordered handles ordering operators only"),
    }
}

fn order_type_error(ctx: &Context, sym: Sym, lhs: Value, rhs: Value) -> crate::exception::RunError {
    let symbol = match sym {
        Sym::Lt => "<",
        Sym::Le => "<=",
        Sym::Gt => ">",
        Sym::Ge => ">=",
        _ => "?",
    };
    ExcType::type_error(format!(
        "'{symbol}' not supported between instances of '{}' and '{}'",
        lhs.type_name(&ctx.heap),
        rhs.type_name(&ctx.heap)
    ))
}

/// Membership: dispatches `__contains__` on the container.
fn contains(ctx: &mut Context, container: Value, needle: Value) -> RunResult<bool> {
    match container {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Str(haystack) => {
                let haystack = haystack.to_string();
                let Value::Ref(nid) = needle else {
                    return Err(ExcType::type_error(
                        "'in <string>' requires string as left operand",
                    ));
                };
                let HeapData::Str(sub) = ctx.heap.get(nid) else {
                    return Err(ExcType::type_error(
                        "'in <string>' requires string as left operand",
                    ));
                };
                Ok(haystack.contains(&**sub))
            }
            HeapData::Tuple(items) => {
                let items = items.to_vec();
                sequence_contains(ctx, &items, needle)
            }
            HeapData::List(list) => {
                let items = list.items.clone();
                sequence_contains(ctx, &items, needle)
            }
            HeapData::Dict(_) => {
                Ok(crate::types::dict::dict_find(ctx, id, needle)?.is_some())
            }
            HeapData::Set(_) => crate::types::set::set_contains(ctx, id, needle),
            HeapData::Instance(_) => {
                let result =
                    protocol::call_method(ctx, container, Sym::Contains.id(), CallArgs::one(needle))?;
                protocol::py_truthy(ctx, result)
            }
            other => Err(ExcType::type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_of().name()
            ))),
        },
        _ => Err(ExcType::type_error(format!(
            "argument of type '{}' is not iterable",
            container.type_name(&ctx.heap)
        ))),
    }
}
