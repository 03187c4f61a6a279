//! The `random` module: native generator primitives plus a small script
//! blob for the derived helpers.

use std::rc::Rc;

use rand::{Rng, SeedableRng};

use crate::args::CallArgs;
use crate::bytecode::vm;
use crate::context::Context;
use crate::exception::{ExcType, Exception, RunResult};
use crate::function::Func;
use crate::heap::HeapData;
use crate::value::Value;

const CODE: &str = "
def choice(seq):
\tt = tuple(seq)
\treturn t[randint(0, len(t) - 1)]

def getrandbits(n):
\tx = 0
\tfor i in range(n):
\t\tx <<= 1
\t\tif random() < 0.5:
\t\t\tx |= 1
\treturn x

def randrange(*args):
\treturn choice(range(*args))
";

pub(crate) fn load(ctx: &mut Context) -> Result<(), Exception> {
    load_inner(ctx).map_err(|e| ctx.surface(e))
}

fn load_inner(ctx: &mut Context) -> RunResult<()> {
    let module: Rc<str> = Rc::from("random");
    for (name, f) in [
        ("seed", fn_seed as fn(&mut Context, &CallArgs) -> RunResult<Value>),
        ("random", fn_random),
        ("randint", fn_randint),
        ("uniform", fn_uniform),
    ] {
        let func = Func::native(name, module.clone(), Rc::new(f));
        let v = ctx.alloc(HeapData::Func(func))?;
        let mark = ctx.temp_roots_mark();
        ctx.temp_roots_push(v);
        let name_id = ctx.interns.intern(name);
        let result = ctx.set_global_value(&module, name_id, v);
        ctx.temp_roots_reset(mark);
        result?;
    }

    let blob = ctx.compile_inner(CODE, "random", false)?;
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(blob.0);
    let result = vm::call_value(ctx, blob.0, CallArgs::empty());
    ctx.temp_roots_reset(mark);
    result.map(|_| ())
}

fn fn_seed(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let Value::Int(seed) = args.get_one_arg("seed")? else {
        return Err(ExcType::type_error("seed() expects an integer"));
    };
    ctx.rng = rand::rngs::StdRng::seed_from_u64(seed as u64);
    Ok(Value::Null)
}

fn fn_random(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    args.check_zero_args("random")?;
    Ok(Value::Float(ctx.rng.r#gen::<f64>()))
}

fn fn_randint(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let (lo, hi) = args.get_two_args("randint")?;
    let (Value::Int(lo), Value::Int(hi)) = (lo, hi) else {
        return Err(ExcType::type_error("randint() expects integers"));
    };
    if lo > hi {
        return Err(ExcType::value_error("empty range for randint()"));
    }
    Ok(Value::Int(ctx.rng.gen_range(lo..=hi)))
}

fn fn_uniform(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let (lo, hi) = args.get_two_args("uniform")?;
    let to_f = |v: Value| match v {
        Value::Int(i) => Ok(i as f64),
        Value::Float(f) => Ok(f),
        _ => Err(ExcType::type_error("uniform() expects numbers")),
    };
    let (lo, hi) = (to_f(lo)?, to_f(hi)?);
    Ok(Value::Float(lo + (hi - lo) * ctx.rng.r#gen::<f64>()))
}
