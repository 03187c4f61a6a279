//! Module host: import resolution, registered native loaders, and the
//! source-file loader.
//!
//! Importing a module that is not yet loaded reserves its global scope,
//! pushes it as the current module, and invokes either a registered native
//! loader or the source loader (`<import_path>/<name>.py`, compiled and
//! called with no arguments). On failure the reservation is removed and
//! `ImportError` raised. A module object is then built by copying the
//! module's globals into its attributes.

pub(crate) mod random_mod;
pub(crate) mod sys_mod;

use std::rc::Rc;

use crate::args::CallArgs;
use crate::bytecode::vm;
use crate::context::Context;
use crate::exception::{ExcPayload, ExcType, RunError, RunResult};
use crate::heap::HeapData;
use crate::intern::StringId;
use crate::types::Module;
use crate::value::Value;

pub(crate) fn register_builtin_modules(ctx: &mut Context) {
    ctx.register_module("random", random_mod::load);
    ctx.register_module("sys", sys_mod::load);
}

/// `import name [as alias]`: load if needed, then bind a module object
/// under the alias in the current module's globals.
pub(crate) fn import_module(ctx: &mut Context, name: StringId, alias: StringId) -> RunResult<()> {
    ensure_loaded(ctx, name)?;
    let module_obj = build_module_object(ctx, name)?;
    let current = current_module(ctx);
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(module_obj);
    let result = ctx.set_global_value(&current, alias, module_obj);
    ctx.temp_roots_reset(mark);
    result
}

/// `from name import symbol [as alias]`: load if needed, then bind just
/// the symbol; a missing symbol is an `ImportError`.
pub(crate) fn import_from_module(
    ctx: &mut Context,
    module: StringId,
    name: StringId,
    alias: StringId,
) -> RunResult<()> {
    ensure_loaded(ctx, module)?;
    let module_name = ctx.interns.get(module).to_string();
    // Only the module's own scope counts; the builtins fallback does not
    // apply to `from ... import`.
    let value = ctx
        .globals
        .get(module_name.as_str())
        .and_then(|scope| scope.get(&name))
        .and_then(|cell| match ctx.heap.get(*cell) {
            crate::heap::HeapData::Cell(v) if !matches!(v, Value::Undefined) => Some(*v),
            _ => None,
        });
    let Some(value) = value else {
        return Err(ExcType::import_error(format!(
            "cannot import name '{}' from '{module_name}'",
            ctx.interns.get(name)
        )));
    };
    let current = current_module(ctx);
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(value);
    let result = ctx.set_global_value(&current, alias, value);
    ctx.temp_roots_reset(mark);
    result
}

/// The module whose globals an import binds into: the module of the
/// currently executing frame, or the host's current module.
fn current_module(ctx: &Context) -> Rc<str> {
    match ctx.frames.last() {
        Some(frame) => frame.def.module.clone(),
        None => ctx.current_module(),
    }
}

fn ensure_loaded(ctx: &mut Context, name: StringId) -> RunResult<()> {
    let module_name: Rc<str> = Rc::from(ctx.interns.get(name));
    if ctx.loaded_modules.contains(&module_name) {
        return Ok(());
    }
    if ctx.loading_modules.contains(&module_name) {
        // Circular import: the partially initialized scope is visible,
        // matching the reference behavior.
        return Ok(());
    }

    // Reserve the module's global scope before running its loader.
    ctx.globals.entry(module_name.clone()).or_default();
    ctx.loading_modules.insert(module_name.clone());
    ctx.module_stack.push(module_name.clone());

    let result = run_loader(ctx, &module_name);

    ctx.module_stack.pop();
    ctx.loading_modules.remove(&module_name);

    match result {
        Ok(()) => {
            ctx.loaded_modules.insert(module_name);
            Ok(())
        }
        Err(err) => {
            ctx.globals.remove(&module_name);
            Err(as_import_error(&module_name, err))
        }
    }
}

fn run_loader(ctx: &mut Context, module_name: &Rc<str>) -> RunResult<()> {
    if let Some(loader) = ctx.loaders.get(&**module_name).cloned() {
        return loader(ctx).map_err(|e| {
            RunError::simple(
                e.kind().unwrap_or(ExcType::ImportError),
                e.message().unwrap_or_default().to_string(),
            )
        });
    }

    let path = ctx.import_path.join(format!("{module_name}.py"));
    let source = std::fs::read_to_string(&path).map_err(|_| {
        ExcType::import_error(format!("no module named '{module_name}'"))
    })?;
    let func = ctx.compile_inner(&source, module_name, false)?;
    let mark = ctx.temp_roots_mark();
    ctx.temp_roots_push(func.0);
    let result = vm::call_value(ctx, func.0, CallArgs::empty());
    ctx.temp_roots_reset(mark);
    result.map(|_| ())
}

fn as_import_error(module_name: &str, err: RunError) -> RunError {
    match &err.exc.payload {
        ExcPayload::Simple {
            exc_type: ExcType::ImportError,
            ..
        } => err,
        ExcPayload::Simple { exc_type, message } => ExcType::import_error(format!(
            "loading module '{module_name}' failed: {exc_type}{}",
            message
                .as_deref()
                .map(|m| format!(": {m}"))
                .unwrap_or_default()
        )),
        ExcPayload::Object(_) => {
            ExcType::import_error(format!("loading module '{module_name}' failed"))
        }
    }
}

/// Builds a module object by copying the module's globals into attributes.
fn build_module_object(ctx: &mut Context, name: StringId) -> RunResult<Value> {
    let module_name: Rc<str> = Rc::from(ctx.interns.get(name));
    let mut attrs = indexmap::IndexMap::new();
    if let Some(scope) = ctx.globals.get(&module_name) {
        for (var, cell) in scope {
            if let HeapData::Cell(v) = ctx.heap.get(*cell) {
                if !matches!(v, Value::Undefined) {
                    attrs.insert(*var, *v);
                }
            }
        }
    }
    ctx.alloc(HeapData::Module(Module {
        name: module_name,
        attrs,
    }))
}
