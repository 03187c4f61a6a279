//! Binary and unary operator dispatch.
//!
//! Integer arithmetic is 64-bit two's complement with wrap-around; `//`
//! floors toward negative infinity and `%` follows the divisor's sign;
//! `/` always produces a float; shifting by a negative count raises
//! `ValueError` and shifts clamp to the word width. Operators on class
//! instances lower to a method call on the left operand.

use num_integer::Integer;

use crate::args::CallArgs;
use crate::context::Context;
use crate::exception::{ExcType, RunResult};
use crate::expressions::{BinOp, UnaryOp};
use crate::heap::HeapData;
use crate::intern::Sym;
use crate::types::List;
use crate::value::Value;

use super::{attr, call, protocol};

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
    }
}

fn op_dunder(op: BinOp) -> Sym {
    match op {
        BinOp::Add => Sym::Add,
        BinOp::Sub => Sym::Sub,
        BinOp::Mul => Sym::Mul,
        BinOp::Div => Sym::TrueDiv,
        BinOp::FloorDiv => Sym::FloorDiv,
        BinOp::Mod => Sym::Mod,
        BinOp::Pow => Sym::Pow,
        BinOp::BitAnd => Sym::BitAnd,
        BinOp::BitOr => Sym::BitOr,
        BinOp::BitXor => Sym::BitXor,
        BinOp::Shl => Sym::Shl,
        BinOp::Shr => Sym::Shr,
    }
}

/// Either of the operand representations arithmetic works on.
enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(v: Value) -> Option<Num> {
    match v {
        Value::Bool(b) => Some(Num::Int(i64::from(b))),
        Value::Int(i) => Some(Num::Int(i)),
        Value::Float(f) => Some(Num::Float(f)),
        _ => None,
    }
}

pub(super) fn binary_op(ctx: &mut Context, op: BinOp, lhs: Value, rhs: Value) -> RunResult<Value> {
    // Instances dispatch to the well-known method on the left operand.
    if is_instance(ctx, lhs) {
        return dispatch_binary(ctx, op, lhs, rhs);
    }

    if let (Some(a), Some(b)) = (as_num(lhs), as_num(rhs)) {
        return numeric_op(op, a, b);
    }

    match (lhs, rhs) {
        (Value::Ref(x), Value::Ref(y)) => {
            match (ctx.heap.get(x), ctx.heap.get(y), op) {
                (HeapData::Str(a), HeapData::Str(b), BinOp::Add) => {
                    let joined = format!("{a}{b}");
                    return ctx.alloc(HeapData::Str(joined.into_boxed_str()));
                }
                (HeapData::List(a), HeapData::List(b), BinOp::Add) => {
                    let mut items = a.items.clone();
                    items.extend(b.items.iter().copied());
                    return ctx.alloc(HeapData::List(List::new(items)));
                }
                (HeapData::Tuple(a), HeapData::Tuple(b), BinOp::Add) => {
                    let items: Box<[Value]> =
                        a.iter().chain(b.iter()).copied().collect();
                    return ctx.alloc(HeapData::Tuple(items));
                }
                _ => {}
            }
        }
        (Value::Ref(x), Value::Int(n)) | (Value::Int(n), Value::Ref(x)) => {
            if op == BinOp::Mul {
                let count = n.max(0) as usize;
                match ctx.heap.get(x) {
                    HeapData::Str(s) => {
                        let repeated = s.repeat(count);
                        return ctx.alloc(HeapData::Str(repeated.into_boxed_str()));
                    }
                    HeapData::List(list) => {
                        let mut items = Vec::with_capacity(list.items.len() * count);
                        for _ in 0..count {
                            items.extend(list.items.iter().copied());
                        }
                        return ctx.alloc(HeapData::List(List::new(items)));
                    }
                    HeapData::Tuple(tuple) => {
                        let mut items = Vec::with_capacity(tuple.len() * count);
                        for _ in 0..count {
                            items.extend(tuple.iter().copied());
                        }
                        return ctx.alloc(HeapData::Tuple(items.into_boxed_slice()));
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }

    Err(ExcType::type_error_unsupported_operand(
        op_symbol(op),
        &lhs.type_name(&ctx.heap),
        &rhs.type_name(&ctx.heap),
    ))
}

fn is_instance(ctx: &Context, v: Value) -> bool {
    matches!(v, Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Instance(_)))
}

fn dispatch_binary(ctx: &mut Context, op: BinOp, lhs: Value, rhs: Value) -> RunResult<Value> {
    let name = op_dunder(op).id();
    match attr::get_attr_opt(ctx, lhs, name)? {
        Some(method) => call::call_value(ctx, method, CallArgs::one(rhs)),
        None => Err(ExcType::type_error_unsupported_operand(
            op_symbol(op),
            &lhs.type_name(&ctx.heap),
            &rhs.type_name(&ctx.heap),
        )),
    }
}

fn numeric_op(op: BinOp, a: Num, b: Num) -> RunResult<Value> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => int_op(op, x, y),
        (Num::Int(x), Num::Float(y)) => float_op(op, x as f64, y),
        (Num::Float(x), Num::Int(y)) => float_op(op, x, y as f64),
        (Num::Float(x), Num::Float(y)) => float_op(op, x, y),
    }
}

fn int_op(op: BinOp, x: i64, y: i64) -> RunResult<Value> {
    Ok(match op {
        BinOp::Add => Value::Int(x.wrapping_add(y)),
        BinOp::Sub => Value::Int(x.wrapping_sub(y)),
        BinOp::Mul => Value::Int(x.wrapping_mul(y)),
        BinOp::Div => {
            if y == 0 {
                return Err(ExcType::zero_division_error("division by zero"));
            }
            Value::Float(x as f64 / y as f64)
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(ExcType::zero_division_error(
                    "integer division or modulo by zero",
                ));
            }
            Value::Int(Integer::div_floor(&x, &y))
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(ExcType::zero_division_error(
                    "integer division or modulo by zero",
                ));
            }
            Value::Int(Integer::mod_floor(&x, &y))
        }
        BinOp::Pow => {
            if y < 0 {
                Value::Float((x as f64).powf(y as f64))
            } else {
                Value::Int(wrapping_int_pow(x, y as u64))
            }
        }
        BinOp::BitAnd => Value::Int(x & y),
        BinOp::BitOr => Value::Int(x | y),
        BinOp::BitXor => Value::Int(x ^ y),
        BinOp::Shl => {
            let shift = shift_count(y)?;
            if shift >= 64 {
                Value::Int(0)
            } else {
                Value::Int(((x as u64) << shift) as i64)
            }
        }
        BinOp::Shr => {
            let shift = shift_count(y)?;
            if shift >= 64 {
                Value::Int(if x < 0 { -1 } else { 0 })
            } else {
                Value::Int(x >> shift)
            }
        }
    })
}

fn shift_count(y: i64) -> RunResult<u32> {
    if y < 0 {
        return Err(ExcType::value_error("negative shift count"));
    }
    Ok(y.min(64) as u32)
}

fn wrapping_int_pow(mut base: i64, mut exp: u64) -> i64 {
    let mut acc: i64 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exp >>= 1;
    }
    acc
}

fn float_op(op: BinOp, x: f64, y: f64) -> RunResult<Value> {
    Ok(match op {
        BinOp::Add => Value::Float(x + y),
        BinOp::Sub => Value::Float(x - y),
        BinOp::Mul => Value::Float(x * y),
        BinOp::Div => {
            if y == 0.0 {
                return Err(ExcType::zero_division_error("float division by zero"));
            }
            Value::Float(x / y)
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(ExcType::zero_division_error("float floor division by zero"));
            }
            Value::Float((x / y).floor())
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(ExcType::zero_division_error("float modulo"));
            }
            // Result takes the divisor's sign, as for integers.
            Value::Float(x - y * (x / y).floor())
        }
        BinOp::Pow => Value::Float(x.powf(y)),
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
            return Err(ExcType::type_error_unsupported_operand(
                op_symbol(op),
                "float",
                "float",
            ));
        }
    })
}

pub(super) fn unary_op(ctx: &mut Context, op: UnaryOp, v: Value) -> RunResult<Value> {
    match op {
        UnaryOp::Not => {
            let truthy = protocol::py_truthy(ctx, v)?;
            Ok(Value::Bool(!truthy))
        }
        UnaryOp::Neg => match v {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Bool(b) => Ok(Value::Int(-i64::from(b))),
            _ if is_instance(ctx, v) => {
                match attr::get_attr_opt(ctx, v, Sym::Neg.id())? {
                    Some(method) => call::call_value(ctx, method, CallArgs::empty()),
                    None => Err(unary_type_error(ctx, "-", v)),
                }
            }
            _ => Err(unary_type_error(ctx, "-", v)),
        },
        UnaryOp::Pos => match v {
            Value::Int(_) | Value::Float(_) => Ok(v),
            Value::Bool(b) => Ok(Value::Int(i64::from(b))),
            _ => Err(unary_type_error(ctx, "+", v)),
        },
        UnaryOp::Invert => match v {
            Value::Int(i) => Ok(Value::Int(!i)),
            Value::Bool(b) => Ok(Value::Int(!i64::from(b))),
            _ => Err(unary_type_error(ctx, "~", v)),
        },
    }
}

fn unary_type_error(ctx: &Context, op: &str, v: Value) -> crate::exception::RunError {
    ExcType::type_error(format!(
        "bad operand type for unary {op}: '{}'",
        v.type_name(&ctx.heap)
    ))
}
