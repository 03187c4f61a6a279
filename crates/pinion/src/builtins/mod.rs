//! Builtin bootstrap.
//!
//! Context creation builds the class hierarchy natively in a strict
//! order — object, function, NoneType, tuple (so `__bases__` can point at
//! an empty tuple), bool, int, float, str, list, dict, set, slice, the
//! iterator class, module, file — registers the native builtins (`print`,
//! `getattr`, `isinstance`, `open`, and the type constructors), then
//! executes the embedded prelude, which defines the remaining builtins and
//! the exception class tree in the language itself. The prelude's classes
//! are fetched back into the [`Builtins`] table afterwards.

use std::rc::Rc;

use ahash::AHashMap;

use crate::args::CallArgs;
use crate::attrs::AttrNode;
use crate::bytecode::vm;
use crate::context::Context;
use crate::exception::{ExcType, RunResult};
use crate::function::{Func, NativeFn};
use crate::heap::{Heap, HeapData, HeapId};
use crate::intern::Sym;
use crate::types::{Class, Dict, FileObject, Instance, List, Set, Slice, Type};
use crate::value::Value;

const PRELUDE: &str = include_str!("prelude.py");

/// Interned references to the builtin classes and singletons.
#[derive(Debug)]
pub(crate) struct Builtins {
    pub object: HeapId,
    pub function: HeapId,
    pub none_type: HeapId,
    pub tuple: HeapId,
    pub bool_: HeapId,
    pub int: HeapId,
    pub float: HeapId,
    pub str_: HeapId,
    pub list: HeapId,
    pub dict: HeapId,
    pub set: HeapId,
    pub slice: HeapId,
    pub iterator: HeapId,
    pub module: HeapId,
    pub file: HeapId,
    /// Prelude-defined sequence iterator classes, filled after the prelude
    /// has run.
    pub default_iter: Option<HeapId>,
    pub default_reverse_iter: Option<HeapId>,
    /// Prelude-defined wrapper class returned by `compile`.
    pub code_object: Option<HeapId>,
    /// Prelude-defined exception classes by builtin kind.
    pub exc: AHashMap<ExcType, HeapId>,
    /// Pre-allocated `MemoryError` raised when allocation itself fails.
    pub memory_error_instance: Value,
}

impl Builtins {
    /// Allocates the native class objects. Runs before the context exists,
    /// so it works on the bare heap; the allocation cap is applied only
    /// after bootstrap.
    pub fn create(heap: &mut Heap) -> Self {
        let class = |heap: &mut Heap, name: &str, bases: Vec<HeapId>, ctor: Option<NativeFn>| {
            let parents = bases
                .iter()
                .map(|b| match heap.get(*b) {
                    HeapData::Class(c) => c.template.clone(),
                    _ => unreachable!("bases are classes"),
                })
                .collect();
            heap.alloc(HeapData::Class(Class {
                name: Rc::from(name),
                module: Rc::from("__builtins__"),
                bases,
                template: AttrNode::with_parents(parents),
                ctor,
                exc_type: None,
            }))
            .expect("bootstrap allocation")
        };

        let object = class(heap, "object", vec![], Some(Rc::new(ctor_object)));
        let function = class(heap, "function", vec![], None);
        let none_type = class(heap, "NoneType", vec![], Some(Rc::new(ctor_none)));
        let tuple = class(heap, "tuple", vec![], Some(Rc::new(ctor_tuple)));
        let int = class(heap, "int", vec![], Some(Rc::new(ctor_int)));
        let bool_ = class(heap, "bool", vec![int], Some(Rc::new(ctor_bool)));
        let float = class(heap, "float", vec![], Some(Rc::new(ctor_float)));
        let str_ = class(heap, "str", vec![], Some(Rc::new(ctor_str)));
        let list = class(heap, "list", vec![], Some(Rc::new(ctor_list)));
        let dict = class(heap, "dict", vec![], Some(Rc::new(ctor_dict)));
        let set = class(heap, "set", vec![], Some(Rc::new(ctor_set)));
        let slice = class(heap, "slice", vec![], Some(Rc::new(ctor_slice)));
        let iterator = class(heap, "iterator", vec![], None);
        let module = class(heap, "module", vec![], None);
        let file = class(heap, "file", vec![], None);

        Self {
            object,
            function,
            none_type,
            tuple,
            bool_,
            int,
            float,
            str_,
            list,
            dict,
            set,
            slice,
            iterator,
            module,
            file,
            default_iter: None,
            default_reverse_iter: None,
            code_object: None,
            exc: AHashMap::new(),
            memory_error_instance: Value::Null,
        }
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        out.extend([
            self.object,
            self.function,
            self.none_type,
            self.tuple,
            self.bool_,
            self.int,
            self.float,
            self.str_,
            self.list,
            self.dict,
            self.set,
            self.slice,
            self.iterator,
            self.module,
            self.file,
        ]);
        out.extend(self.default_iter);
        out.extend(self.default_reverse_iter);
        out.extend(self.code_object);
        out.extend(self.exc.values().copied());
        if let Value::Ref(id) = self.memory_error_instance {
            out.push(id);
        }
    }

    pub fn exc_class(&self, exc_type: ExcType) -> Option<HeapId> {
        self.exc.get(&exc_type).copied()
    }

    pub fn default_iter_class(&self) -> RunResult<HeapId> {
        self.default_iter
            .ok_or_else(|| ExcType::runtime_error("builtins are not initialized"))
    }

    pub fn default_reverse_iter_class(&self) -> RunResult<HeapId> {
        self.default_reverse_iter
            .ok_or_else(|| ExcType::runtime_error("builtins are not initialized"))
    }

    /// The class object of any value.
    pub fn class_of(&self, heap: &Heap, v: Value) -> Option<HeapId> {
        Some(match v {
            Value::Undefined => return None,
            Value::Null => self.none_type,
            Value::Bool(_) => self.bool_,
            Value::Int(_) => self.int,
            Value::Float(_) => self.float,
            Value::Ref(id) => match heap.get(id) {
                HeapData::Str(_) => self.str_,
                HeapData::Tuple(_) => self.tuple,
                HeapData::List(_) => self.list,
                HeapData::Dict(_) => self.dict,
                HeapData::Set(_) => self.set,
                HeapData::Slice(_) => self.slice,
                HeapData::Func(_) => self.function,
                HeapData::Class(_) => self.object,
                HeapData::Instance(inst) => inst.class,
                HeapData::Module(_) => self.module,
                HeapData::Iter(_) => self.iterator,
                HeapData::File(_) => self.file,
                HeapData::Cell(_) => return None,
            },
        })
    }

    /// The builtin kind a class maps to, walking its bases.
    pub fn exc_type_of_class(&self, heap: &Heap, class_id: HeapId) -> Option<ExcType> {
        if let HeapData::Class(class) = heap.get(class_id) {
            if let Some(et) = class.exc_type {
                return Some(et);
            }
            for base in &class.bases {
                if let Some(et) = self.exc_type_of_class(heap, *base) {
                    return Some(et);
                }
            }
        }
        None
    }
}

/// Registers the native builtins and runs the prelude.
pub(crate) fn install(ctx: &mut Context) -> RunResult<()> {
    let module: Rc<str> = Rc::from("__builtins__");

    let classes = [
        ("object", ctx.builtins.object),
        ("tuple", ctx.builtins.tuple),
        ("bool", ctx.builtins.bool_),
        ("int", ctx.builtins.int),
        ("float", ctx.builtins.float),
        ("str", ctx.builtins.str_),
        ("list", ctx.builtins.list),
        ("dict", ctx.builtins.dict),
        ("set", ctx.builtins.set),
        ("slice", ctx.builtins.slice),
    ];
    for (name, id) in classes {
        let name_id = ctx.interns.intern(name);
        ctx.set_global_value(&module, name_id, Value::Ref(id))?;
    }

    def_builtin(ctx, &module, "print", Rc::new(builtin_print))?;
    def_builtin(ctx, &module, "getattr", Rc::new(builtin_getattr))?;
    def_builtin(ctx, &module, "setattr", Rc::new(builtin_setattr))?;
    def_builtin(ctx, &module, "isinstance", Rc::new(builtin_isinstance))?;
    def_builtin(ctx, &module, "callable", Rc::new(builtin_callable))?;
    def_builtin(ctx, &module, "id", Rc::new(builtin_id))?;
    def_builtin(ctx, &module, "chr", Rc::new(builtin_chr))?;
    def_builtin(ctx, &module, "ord", Rc::new(builtin_ord))?;
    def_builtin(ctx, &module, "bin", Rc::new(builtin_bin))?;
    def_builtin(ctx, &module, "oct", Rc::new(builtin_oct))?;
    def_builtin(ctx, &module, "hex", Rc::new(builtin_hex))?;
    def_builtin(ctx, &module, "compile", Rc::new(builtin_compile))?;
    def_builtin(ctx, &module, "eval", Rc::new(builtin_eval))?;
    def_builtin(ctx, &module, "exec", Rc::new(builtin_exec))?;
    def_builtin(ctx, &module, "input", Rc::new(builtin_input))?;
    def_builtin(ctx, &module, "open", Rc::new(builtin_open))?;

    // The prelude defines the remaining builtins in the language itself.
    let prelude = ctx.compile_inner(PRELUDE, "__builtins__", false)?;
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(prelude.0);
    let result = vm::call_value(ctx, prelude.0, CallArgs::empty());
    ctx.temp_roots_reset(mark);
    result?;

    ctx.builtins.default_iter = fetch_class(ctx, "__DefaultIter");
    ctx.builtins.default_reverse_iter = fetch_class(ctx, "__DefaultReverseIter");
    ctx.builtins.code_object = fetch_class(ctx, "__CodeObject");
    for exc_type in ExcType::all() {
        let Some(class_id) = fetch_class(ctx, exc_type.to_string().as_str()) else {
            continue;
        };
        if let HeapData::Class(class) = ctx.heap.get_mut(class_id) {
            class.exc_type = Some(*exc_type);
        }
        ctx.builtins.exc.insert(*exc_type, class_id);
    }

    let memory_error =
        vm::materialize_exception(ctx, ExcType::MemoryError, Some("out of memory".to_string()))?;
    if let Value::Ref(id) = memory_error {
        ctx.heap.protect(id);
    }
    ctx.builtins.memory_error_instance = memory_error;
    Ok(())
}

fn def_builtin(ctx: &mut Context, module: &Rc<str>, name: &str, f: NativeFn) -> RunResult<()> {
    let func = Func::native(name, module.clone(), f);
    let v = ctx.alloc(HeapData::Func(func))?;
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(v);
    let name_id = ctx.interns.intern(name);
    let result = ctx.set_global_value(module, name_id, v);
    ctx.temp_roots_reset(mark);
    result
}

fn fetch_class(ctx: &Context, name: &str) -> Option<HeapId> {
    let name_id = ctx.interns.lookup(name)?;
    let value = ctx.lookup_global("__builtins__", name_id)?;
    let id = value.as_ref_id()?;
    matches!(ctx.heap.get(id), HeapData::Class(_)).then_some(id)
}

// --- Native builtin functions -------------------------------------------

fn builtin_print(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let sep = match args.kwarg(Sym::Sep.id()) {
        None => " ".to_string(),
        Some(v) => vm::py_str(ctx, v)?,
    };
    let end = match args.kwarg(Sym::End.id()) {
        None => "\n".to_string(),
        Some(v) => vm::py_str(ctx, v)?,
    };
    let mut out = String::new();
    for (i, v) in args.pos.iter().enumerate() {
        if i > 0 {
            out.push_str(&sep);
        }
        out.push_str(&vm::py_str(ctx, *v)?);
    }
    out.push_str(&end);
    ctx.print.write(&out);
    Ok(Value::Null)
}

fn builtin_getattr(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let (obj, name, default) = match args.pos.as_slice() {
        [obj, name] => (*obj, *name, None),
        [obj, name, default] => (*obj, *name, Some(*default)),
        other => return Err(ExcType::type_error_arg_count("getattr", 2, other.len())),
    };
    let Value::Ref(id) = name else {
        return Err(ExcType::type_error("attribute name must be a string"));
    };
    let HeapData::Str(s) = ctx.heap.get(id) else {
        return Err(ExcType::type_error("attribute name must be a string"));
    };
    let name_text = s.to_string();
    let name_id = ctx.interns.intern(&name_text);
    match vm::get_attr_opt(ctx, obj, name_id)? {
        Some(v) => Ok(v),
        None => match default {
            Some(v) => Ok(v),
            None => {
                let type_name = obj.type_name(&ctx.heap);
                Err(ExcType::attribute_error(type_name, &name_text))
            }
        },
    }
}

fn builtin_setattr(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let [obj, name, value] = args.pos.as_slice() else {
        return Err(ExcType::type_error_arg_count("setattr", 3, args.pos.len()));
    };
    let name = expect_str(ctx, *name, "setattr")?;
    let name_id = ctx.interns.intern(&name);
    vm::set_attr(ctx, *obj, name_id, *value)?;
    Ok(Value::Null)
}

fn builtin_callable(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let v = args.get_one_arg("callable")?;
    let callable = match v {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Func(_) | HeapData::Class(_) => true,
            HeapData::Instance(_) => vm::get_attr_opt(ctx, v, Sym::Call.id())?.is_some(),
            _ => false,
        },
        _ => false,
    };
    Ok(Value::Bool(callable))
}

/// Identity as an integer: the arena slot for heap objects, the value's
/// own encoding for immediates (consistent with `is`).
fn builtin_id(_ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let v = args.get_one_arg("id")?;
    Ok(Value::Int(match v {
        Value::Undefined | Value::Null => 0,
        Value::Bool(b) => 1 + i64::from(b),
        Value::Int(i) => i,
        Value::Float(f) => f.to_bits() as i64,
        Value::Ref(id) => id.index() as i64,
    }))
}

fn builtin_chr(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let v = args.get_one_arg("chr")?;
    let code = match v {
        Value::Int(i) => i,
        Value::Bool(b) => i64::from(b),
        _ => return Err(ExcType::type_error("chr() expects an integer")),
    };
    let ch = u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| ExcType::value_error("chr() arg not in range(0x110000)"))?;
    ctx.alloc(HeapData::Str(ch.to_string().into_boxed_str()))
}

fn builtin_ord(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let v = args.get_one_arg("ord")?;
    let s = expect_str(ctx, v, "ord")?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(i64::from(c as u32))),
        (None, _) => Err(ExcType::value_error("ord() arg is an empty string")),
        _ => Err(ExcType::value_error("ord() arg is not a single character")),
    }
}

/// Shared body of `bin`/`oct`/`hex`: sign, radix prefix, digits.
fn base_str(ctx: &mut Context, args: &CallArgs, name: &str, radix: u32) -> RunResult<Value> {
    let v = args.get_one_arg(name)?;
    let i = match v {
        Value::Int(i) => i,
        Value::Bool(b) => i64::from(b),
        _ => {
            return Err(ExcType::type_error(format!(
                "{name}() expects an integer, got '{}'",
                v.type_name(&ctx.heap)
            )));
        }
    };
    let sign = if i < 0 { "-" } else { "" };
    let magnitude = i128::from(i).unsigned_abs();
    let digits = match radix {
        2 => format!("{magnitude:b}"),
        8 => format!("{magnitude:o}"),
        _ => format!("{magnitude:x}"),
    };
    let prefix = match radix {
        2 => "0b",
        8 => "0o",
        _ => "0x",
    };
    let text = format!("{sign}{prefix}{digits}");
    ctx.alloc(HeapData::Str(text.into_boxed_str()))
}

fn builtin_bin(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    base_str(ctx, args, "bin", 2)
}

fn builtin_oct(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    base_str(ctx, args, "oct", 8)
}

fn builtin_hex(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    base_str(ctx, args, "hex", 16)
}

/// The module whose globals dynamically compiled code executes against.
fn eval_module(ctx: &Context) -> Rc<str> {
    match ctx.frames.last() {
        Some(frame) => frame.def.module.clone(),
        None => ctx.current_module(),
    }
}

/// The compiled function wrapped by a code object, if `v` is one.
fn code_object_function(ctx: &mut Context, v: Value) -> RunResult<Option<Value>> {
    let Some(code_class) = ctx.builtins.code_object else {
        return Ok(None);
    };
    if crate::types::class::instance_class(&ctx.heap, v) != Some(code_class) {
        return Ok(None);
    }
    let f_id = ctx.interns.intern("f");
    vm::get_attr(ctx, v, f_id).map(Some)
}

fn builtin_compile(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let [source, filename, mode] = args.pos.as_slice() else {
        return Err(ExcType::type_error_arg_count("compile", 3, args.pos.len()));
    };
    let source = expect_str(ctx, *source, "compile")?;
    let filename = expect_str(ctx, *filename, "compile")?;
    let mode = expect_str(ctx, *mode, "compile")?;
    let expression = match mode.as_str() {
        "exec" => false,
        "eval" => true,
        _ => {
            return Err(ExcType::value_error("compile() mode must be 'exec' or 'eval'"));
        }
    };
    let Some(code_class) = ctx.builtins.code_object else {
        return Err(ExcType::runtime_error("builtins are not initialized"));
    };
    let func = ctx.compile_inner(&source, &filename, expression)?;
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(func.0);
    let result = vm::call_class(ctx, code_class, CallArgs::one(func.0));
    ctx.temp_roots_reset(mark);
    result
}

fn builtin_eval(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let v = args.get_one_arg("eval")?;
    if let Some(func) = code_object_function(ctx, v)? {
        let mark = ctx.temp_roots_mark();
        ctx.temp_roots_push(func);
        let result = vm::call_value(ctx, func, CallArgs::empty());
        ctx.temp_roots_reset(mark);
        return result;
    }
    let source = expect_str(ctx, v, "eval")?;
    let module = eval_module(ctx);
    let func = ctx.compile_inner(&source, &module, true)?;
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(func.0);
    let result = vm::call_value(ctx, func.0, CallArgs::empty());
    ctx.temp_roots_reset(mark);
    result
}

fn builtin_exec(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let v = args.get_one_arg("exec")?;
    if let Some(func) = code_object_function(ctx, v)? {
        let mark = ctx.temp_roots_mark();
        ctx.temp_roots_push(func);
        let result = vm::call_value(ctx, func, CallArgs::empty());
        ctx.temp_roots_reset(mark);
        result?;
        return Ok(Value::Null);
    }
    let source = expect_str(ctx, v, "exec")?;
    let module = eval_module(ctx);
    let func = ctx.compile_inner(&source, &module, false)?;
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(func.0);
    let result = vm::call_value(ctx, func.0, CallArgs::empty());
    ctx.temp_roots_reset(mark);
    result?;
    Ok(Value::Null)
}

fn builtin_input(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    if let Some(prompt) = args.get_zero_one_arg("input")? {
        let text = vm::py_str(ctx, prompt)?;
        ctx.print.write(&text);
    }
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| ExcType::os_error(e))?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    ctx.alloc(HeapData::Str(line.into_boxed_str()))
}

fn builtin_isinstance(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let (value, classinfo) = args.get_two_args("isinstance")?;
    let classes: Vec<HeapId> = match classinfo {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Class(_) => vec![id],
            HeapData::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    match item {
                        Value::Ref(cid)
                            if matches!(ctx.heap.get(*cid), HeapData::Class(_)) =>
                        {
                            out.push(*cid);
                        }
                        _ => {
                            return Err(ExcType::type_error(
                                "isinstance() arg 2 must be a class or tuple of classes",
                            ));
                        }
                    }
                }
                out
            }
            _ => {
                return Err(ExcType::type_error(
                    "isinstance() arg 2 must be a class or tuple of classes",
                ));
            }
        },
        _ => {
            return Err(ExcType::type_error(
                "isinstance() arg 2 must be a class or tuple of classes",
            ));
        }
    };
    let Some(value_class) = ctx.builtins.class_of(&ctx.heap, value) else {
        return Ok(Value::Bool(false));
    };
    let result = classes
        .iter()
        .any(|c| crate::types::class::is_subclass(&ctx.heap, value_class, *c));
    Ok(Value::Bool(result))
}

fn builtin_open(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let (path, mode) = args.get_one_two_args("open")?;
    let path = expect_str(ctx, path, "open")?;
    let mode = match mode {
        None => "r".to_string(),
        Some(v) => expect_str(ctx, v, "open")?,
    };
    let file = FileObject::open(&path, &mode)?;
    ctx.alloc(HeapData::File(file))
}

fn expect_str(ctx: &Context, v: Value, func: &str) -> RunResult<String> {
    match v {
        Value::Ref(id) => match ctx.heap.get(id) {
            HeapData::Str(s) => Ok(s.to_string()),
            other => Err(ExcType::type_error(format!(
                "{func}() expected a string, got '{}'",
                other.type_of().name()
            ))),
        },
        _ => Err(ExcType::type_error(format!(
            "{func}() expected a string, got '{}'",
            v.type_name(&ctx.heap)
        ))),
    }
}

// --- Native type constructors -------------------------------------------

fn ctor_object(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    args.check_zero_args("object")?;
    let class_id = ctx.builtins.object;
    let template = match ctx.heap.get(class_id) {
        HeapData::Class(c) => c.template.clone(),
        _ => unreachable!("object is a class"),
    };
    ctx.alloc(HeapData::Instance(Instance {
        class: class_id,
        attrs: crate::attrs::AttrTable::from_template(template),
    }))
}

fn ctor_none(_ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    args.check_zero_args("NoneType")?;
    Ok(Value::Null)
}

fn ctor_bool(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    match args.get_zero_one_arg("bool")? {
        None => Ok(Value::Bool(false)),
        Some(v) => vm::py_truthy(ctx, v).map(Value::Bool),
    }
}

fn ctor_int(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    match args.get_zero_one_arg("int")? {
        None => Ok(Value::Int(0)),
        Some(Value::Int(i)) => Ok(Value::Int(i)),
        Some(Value::Bool(b)) => Ok(Value::Int(i64::from(b))),
        Some(Value::Float(f)) => {
            if f.is_nan() || f.is_infinite() {
                return Err(ExcType::value_error("cannot convert float to integer"));
            }
            Ok(Value::Int(f.trunc() as i64))
        }
        Some(v @ Value::Ref(_)) => {
            let text = expect_str(ctx, v, "int")?;
            text.trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| {
                    ExcType::value_error(format!(
                        "invalid literal for int(): '{}'",
                        text
                    ))
                })
        }
        Some(v) => Err(ExcType::type_error(format!(
            "int() argument must be a number or string, not '{}'",
            v.type_name(&ctx.heap)
        ))),
    }
}

fn ctor_float(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    match args.get_zero_one_arg("float")? {
        None => Ok(Value::Float(0.0)),
        Some(Value::Float(f)) => Ok(Value::Float(f)),
        Some(Value::Int(i)) => Ok(Value::Float(i as f64)),
        Some(Value::Bool(b)) => Ok(Value::Float(f64::from(i32::from(b)))),
        Some(v @ Value::Ref(_)) => {
            let text = expect_str(ctx, v, "float")?;
            text.trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| {
                    ExcType::value_error(format!("could not convert string to float: '{text}'"))
                })
        }
        Some(v) => Err(ExcType::type_error(format!(
            "float() argument must be a number or string, not '{}'",
            v.type_name(&ctx.heap)
        ))),
    }
}

fn ctor_str(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    match args.get_zero_one_arg("str")? {
        None => ctx.alloc(HeapData::Str(Box::from(""))),
        Some(v) => {
            let text = vm::py_str(ctx, v)?;
            ctx.alloc(HeapData::Str(text.into_boxed_str()))
        }
    }
}

fn ctor_tuple(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    match args.get_zero_one_arg("tuple")? {
        None => ctx.alloc(HeapData::Tuple(Box::from([]))),
        Some(v) => {
            let mark = ctx.temp_roots_mark();
            let result = iterate_to_vec_pinned(ctx, v)
                .and_then(|items| ctx.alloc(HeapData::Tuple(items.into_boxed_slice())));
            ctx.temp_roots_reset(mark);
            result
        }
    }
}

fn ctor_list(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    match args.get_zero_one_arg("list")? {
        None => ctx.alloc(HeapData::List(List::new(Vec::new()))),
        Some(v) => {
            let mark = ctx.temp_roots_mark();
            let result = iterate_to_vec_pinned(ctx, v)
                .and_then(|items| ctx.alloc(HeapData::List(List::new(items))));
            ctx.temp_roots_reset(mark);
            result
        }
    }
}

fn ctor_dict(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    match args.get_zero_one_arg("dict")? {
        None => ctx.alloc(HeapData::Dict(Dict::new())),
        Some(Value::Ref(id)) if matches!(ctx.heap.get(id), HeapData::Dict(_)) => {
            let pairs: Vec<(Value, Value)> = match ctx.heap.get(id) {
                HeapData::Dict(d) => d.entries.iter().map(|e| (e.key, e.value)).collect(),
                _ => unreachable!("checked above"),
            };
            let out = ctx.alloc(HeapData::Dict(Dict::new()))?;
            let Value::Ref(out_id) = out else {
                unreachable!("alloc returns a heap reference");
            };
            let mark = ctx.temp_roots_mark();
            ctx.temp_roots_push(out);
            for (k, v) in pairs {
                if let Err(e) = crate::types::dict::dict_set(ctx, out_id, k, v) {
                    ctx.temp_roots_reset(mark);
                    return Err(e);
                }
            }
            ctx.temp_roots_reset(mark);
            Ok(out)
        }
        Some(v) => Err(ExcType::type_error(format!(
            "dict() argument must be a dict, not '{}'",
            v.type_name(&ctx.heap)
        ))),
    }
}

fn ctor_set(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    match args.get_zero_one_arg("set")? {
        None => ctx.alloc(HeapData::Set(Set::new())),
        Some(v) => {
            let mark = ctx.temp_roots_mark();
            let result = (|ctx: &mut Context| {
                let items = iterate_to_vec_pinned(ctx, v)?;
                let out = ctx.alloc(HeapData::Set(Set::new()))?;
                let Value::Ref(out_id) = out else {
                    unreachable!("alloc returns a heap reference");
                };
                ctx.temp_roots_push(out);
                for item in items {
                    crate::types::set::set_add(ctx, out_id, item)?;
                }
                Ok(out)
            })(ctx);
            ctx.temp_roots_reset(mark);
            result
        }
    }
}

fn ctor_slice(ctx: &mut Context, args: &CallArgs) -> RunResult<Value> {
    let (start, stop, step) = match args.pos.as_slice() {
        [stop] => (Value::Null, *stop, Value::Null),
        [start, stop] => (*start, *stop, Value::Null),
        [start, stop, step] => (*start, *stop, *step),
        other => return Err(ExcType::type_error_arg_count("slice", 1, other.len())),
    };
    ctx.alloc(HeapData::Slice(Slice { start, stop, step }))
}

/// Drains an iterable into a vector honoring the iteration protocol.
///
/// Every element is left pinned on the context's temporary root stack;
/// the caller resets its own mark once the values are stored somewhere
/// reachable.
pub(crate) fn iterate_to_vec_pinned(ctx: &mut Context, v: Value) -> RunResult<Vec<Value>> {
    ctx.temp_roots_push(v);
    let it = vm::get_iter(ctx, v)?;
    ctx.temp_roots_push(it);
    let start = ctx.temp_roots_mark();
    while let Some(item) = vm::iter_next(ctx, it)? {
        ctx.temp_roots_push(item);
    }
    Ok(ctx.temp_roots[start..].to_vec())
}
