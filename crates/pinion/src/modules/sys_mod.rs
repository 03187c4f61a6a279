//! The `sys` module: `exit` and `argv`.

use std::rc::Rc;

use crate::args::CallArgs;
use crate::context::Context;
use crate::exception::{ExcType, Exception, RunError, RunResult};
use crate::function::Func;
use crate::heap::HeapData;
use crate::types::List;
use crate::value::Value;

pub(crate) fn load(ctx: &mut Context) -> Result<(), Exception> {
    load_inner(ctx).map_err(|e| ctx.surface(e))
}

fn load_inner(ctx: &mut Context) -> RunResult<()> {
    let module: Rc<str> = Rc::from("sys");

    let exit = Func::native("exit", module.clone(), Rc::new(fn_exit));
    let v = ctx.alloc(HeapData::Func(exit))?;
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(v);
    let name_id = ctx.interns.intern("exit");
    let result = ctx.set_global_value(&module, name_id, v);
    ctx.temp_roots_reset(mark);
    result?;

    // argv: one string per configured argument.
    let argv_strings = ctx.argv.clone();
    let list = ctx.alloc(HeapData::List(List::new(Vec::new())))?;
    let Value::Ref(list_id) = list else {
        unreachable!("alloc returns a heap reference");
    };
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(list);
    for arg in argv_strings {
        let s = ctx.alloc(HeapData::Str(arg.into_boxed_str()));
        match s {
            Ok(s) => {
                let HeapData::List(l) = ctx.heap.get_mut(list_id) else {
                    unreachable!("argv is a list");
                };
                l.items.push(s);
            }
            Err(e) => {
                ctx.temp_roots_reset(mark);
                return Err(e);
            }
        }
    }
    let name_id = ctx.interns.intern("argv");
    let result = ctx.set_global_value(&module, name_id, list);
    ctx.temp_roots_reset(mark);
    result
}

fn fn_exit(_ctx: &mut Context, _args: &CallArgs) -> RunResult<Value> {
    Err(RunError::simple(ExcType::SystemExit, String::new()))
}
