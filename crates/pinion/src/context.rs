//! The interpreter context: one isolated instance of the runtime.
//!
//! A context owns the heap, the intern table, per-module global scopes,
//! the builtins, the stack of live activations, and the embedding
//! configuration. Everything is strictly per-context; contexts may be
//! used from different threads as long as each context stays on one.
//!
//! Allocation goes through [`Context::alloc`], which is the only place a
//! garbage collection can trigger (besides the host's explicit
//! `collect_garbage`). Roots are the protect set, the builtins, every
//! module's global cells, the current exception, the temporary root
//! stack, and every live activation's stacks and cells.

use std::path::PathBuf;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::args::CallArgs;
use crate::builtins::Builtins;
use crate::bytecode::vm::{self, Frame};
use crate::exception::{
    ExcPayload, ExcType, Exception, RunError, RunResult, StackFrame, TraceFrame,
};
use crate::function::{Func, FuncKind};
use crate::heap::{Heap, HeapData, HeapId, DEFAULT_GC_RUN_FACTOR};
use crate::intern::{Interns, StringId, Sym};
use crate::io::{PrintWriter, StdPrint};
use crate::object::Object;
use crate::types::{Class, List};
use crate::value::Value;

/// Default recursion cap; deep enough for real programs, shallow enough
/// to surface a `RecursionError` before the native stack is at risk.
pub const DEFAULT_MAX_RECURSION: usize = 400;

/// Configuration for a new [`Context`].
pub struct Config {
    /// Hard cap on live heap objects; `None` means unlimited.
    pub max_alloc: Option<usize>,
    pub max_recursion: usize,
    /// A collection runs when the live count reaches this factor times the
    /// live count after the previous collection.
    pub gc_run_factor: f64,
    /// Directory searched for `<name>.py` source modules.
    pub import_path: PathBuf,
    /// Exposed as `sys.argv`.
    pub argv: Vec<String>,
    pub print: Box<dyn PrintWriter>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_alloc: None,
            max_recursion: DEFAULT_MAX_RECURSION,
            gc_run_factor: DEFAULT_GC_RUN_FACTOR,
            import_path: PathBuf::from("."),
            argv: Vec::new(),
            print: Box::new(StdPrint),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("max_alloc", &self.max_alloc)
            .field("max_recursion", &self.max_recursion)
            .field("gc_run_factor", &self.gc_run_factor)
            .finish_non_exhaustive()
    }
}

/// An opaque handle to a live runtime value.
///
/// Handles are not GC roots: a value only survives collections while it is
/// reachable from a root, so pin anything held across script execution
/// with [`Context::protect`].
#[derive(Debug, Clone, Copy)]
pub struct ValueRef(pub(crate) Value);

/// Native module loader invoked on first import.
pub type ModuleLoader = Rc<dyn Fn(&mut Context) -> Result<(), Exception>>;

/// The exception most recently surfaced to the host, with its owned trace.
#[derive(Debug)]
pub(crate) struct CurrentExc {
    pub value: Value,
    pub frames: Vec<TraceFrame>,
}

pub struct Context {
    pub(crate) heap: Heap,
    pub(crate) interns: Interns,
    /// Per-module globals: module name -> variable name -> cell.
    pub(crate) globals: AHashMap<Rc<str>, AHashMap<StringId, HeapId>>,
    pub(crate) loaded_modules: AHashSet<Rc<str>>,
    /// Modules whose loaders are currently running, for circular-import
    /// detection.
    pub(crate) loading_modules: AHashSet<Rc<str>>,
    pub(crate) builtins: Builtins,
    /// Live activations; these are GC roots.
    pub(crate) frames: Vec<Frame>,
    /// Active call names, for recursion accounting and diagnostics.
    pub(crate) trace: Vec<(Rc<str>, Rc<str>)>,
    pub(crate) module_stack: Vec<Rc<str>>,
    pub(crate) loaders: AHashMap<String, ModuleLoader>,
    pub(crate) import_path: PathBuf,
    pub(crate) argv: Vec<String>,
    pub(crate) print: Box<dyn PrintWriter>,
    /// Pin stack for native code holding values across allocations.
    pub(crate) temp_roots: Vec<Value>,
    /// Objects being repr'd, for cycle detection.
    pub(crate) repr_guard: Vec<HeapId>,
    pub(crate) max_recursion: usize,
    pub(crate) current_exception: Option<CurrentExc>,
    pub(crate) rng: StdRng,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("heap", &self.heap)
            .field("modules", &self.globals.len())
            .field("frames", &self.frames.len())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Creates a context: builds the builtin class hierarchy, registers the
    /// native builtins, and executes the embedded prelude.
    pub fn new(config: Config) -> Result<Self, Exception> {
        // The cap is applied after bootstrap so it only limits user code.
        let max_alloc = config.max_alloc;
        let mut heap = Heap::new(config.gc_run_factor, None);
        let interns = Interns::new();
        let builtins = Builtins::create(&mut heap);

        let mut ctx = Self {
            heap,
            interns,
            globals: AHashMap::new(),
            loaded_modules: AHashSet::new(),
            loading_modules: AHashSet::new(),
            builtins,
            frames: Vec::new(),
            trace: Vec::new(),
            module_stack: vec![Rc::from("__main__")],
            loaders: AHashMap::new(),
            import_path: config.import_path,
            argv: config.argv,
            print: config.print,
            temp_roots: Vec::new(),
            repr_guard: Vec::new(),
            max_recursion: config.max_recursion,
            current_exception: None,
            rng: StdRng::from_entropy(),
        };

        crate::builtins::install(&mut ctx).map_err(|e| ctx.surface(e))?;
        crate::modules::register_builtin_modules(&mut ctx);
        ctx.heap.set_max_alloc(max_alloc);
        Ok(ctx)
    }

    // --- Allocation and collection ---------------------------------------

    /// Allocates a heap object, running a collection first when the
    /// trigger policy calls for one. When the allocation cap is exceeded a
    /// collection is forced; if the heap is still over cap the
    /// pre-allocated `MemoryError` instance is raised.
    pub(crate) fn alloc(&mut self, data: HeapData) -> RunResult<Value> {
        if self.heap.should_collect() {
            self.collect_garbage_internal();
        }
        match self.heap.alloc(data) {
            Ok(id) => Ok(Value::Ref(id)),
            Err(_) => {
                self.collect_garbage_internal();
                // The payload was consumed by the failed attempt; it held
                // no heap references worth preserving mid-OOM.
                Err(self.memory_error())
            }
        }
    }

    pub(crate) fn memory_error(&self) -> RunError {
        match self.builtins.memory_error_instance {
            Value::Ref(_) => RunError::object(self.builtins.memory_error_instance),
            _ => RunError::simple(ExcType::MemoryError, "out of memory".to_string()),
        }
    }

    pub(crate) fn collect_garbage_internal(&mut self) {
        let mut roots: Vec<HeapId> = Vec::new();
        self.builtins.trace(&mut roots);
        for module in self.globals.values() {
            roots.extend(module.values().copied());
        }
        for frame in &self.frames {
            frame.trace(&mut roots);
        }
        for v in &self.temp_roots {
            if let Value::Ref(id) = v {
                roots.push(*id);
            }
        }
        if let Some(exc) = &self.current_exception {
            if let Value::Ref(id) = exc.value {
                roots.push(id);
            }
        }
        self.heap.collect(&roots);
    }

    pub(crate) fn temp_roots_mark(&self) -> usize {
        self.temp_roots.len()
    }

    pub(crate) fn temp_roots_push(&mut self, v: Value) {
        self.temp_roots.push(v);
    }

    pub(crate) fn temp_roots_reset(&mut self, mark: usize) {
        self.temp_roots.truncate(mark);
    }

    // --- Globals ---------------------------------------------------------

    pub(crate) fn current_module(&self) -> Rc<str> {
        self.module_stack
            .last()
            .cloned()
            .unwrap_or_else(|| Rc::from("__main__"))
    }

    pub(crate) fn get_or_create_global_cell(
        &mut self,
        module: &Rc<str>,
        name: StringId,
    ) -> RunResult<HeapId> {
        if let Some(cell) = self.globals.get(module).and_then(|m| m.get(&name)) {
            return Ok(*cell);
        }
        let cell = self.alloc(HeapData::Cell(Value::Undefined))?;
        let Value::Ref(cell_id) = cell else {
            unreachable!("alloc returns a heap reference");
        };
        self.globals
            .entry(module.clone())
            .or_default()
            .insert(name, cell_id);
        Ok(cell_id)
    }

    /// Reads a global in `module`, falling back to the builtins module.
    pub(crate) fn lookup_global(&self, module: &str, name: StringId) -> Option<Value> {
        for scope in [module, "__builtins__"] {
            if let Some(cell) = self.globals.get(scope).and_then(|m| m.get(&name)) {
                if let HeapData::Cell(v) = self.heap.get(*cell) {
                    if !matches!(v, Value::Undefined) {
                        return Some(*v);
                    }
                }
            }
        }
        None
    }

    pub(crate) fn set_global_value(
        &mut self,
        module: &Rc<str>,
        name: StringId,
        value: Value,
    ) -> RunResult<()> {
        let cell = self.get_or_create_global_cell(module, name)?;
        *self.heap.get_mut(cell) = HeapData::Cell(value);
        Ok(())
    }

    // --- Error surfacing -------------------------------------------------

    /// Converts an internal error into the public exception type, storing
    /// it as the context's current exception along the way.
    pub(crate) fn surface(&mut self, mut err: RunError) -> Exception {
        // Materialize native raises so the host sees a real object. When
        // the exception classes are not available (bootstrap failures) the
        // payload stays simple and the kind is taken from it directly.
        let value = match &err.exc.payload {
            ExcPayload::Object(v) => *v,
            ExcPayload::Simple { exc_type, message } => {
                let exc_type = *exc_type;
                let message = message.clone();
                match vm::materialize_exception(self, exc_type, message) {
                    Ok(v @ Value::Ref(_)) => {
                        err.exc.payload = ExcPayload::Object(v);
                        v
                    }
                    Ok(_) | Err(_) => Value::Null,
                }
            }
        };

        let (type_name, kind) = self.exception_kind(value, &err);
        let message = self.exception_message(value, &err);

        let mut frames: Vec<StackFrame> = err
            .exc
            .frames
            .iter()
            .map(|f| StackFrame {
                line: f.pos.line + 1,
                column: f.pos.col,
                module: f.module.to_string(),
                function: f.function.to_string(),
                line_text: f.line_text.as_ref().map(|t| t.to_string()),
                is_syntax: f.syntax_error,
            })
            .collect();
        // Internal frames are innermost-first; tracebacks read outermost
        // first.
        frames.reverse();

        self.current_exception = Some(CurrentExc {
            value,
            frames: err.exc.frames.clone(),
        });
        Exception::new(type_name, kind, message, frames)
    }

    fn exception_kind(&self, value: Value, err: &RunError) -> (String, Option<ExcType>) {
        if let Some(exc_type) = err.simple_type() {
            return (exc_type.to_string(), Some(exc_type));
        }
        if let Some(class_id) = crate::types::class::instance_class(&self.heap, value) {
            let kind = self.builtins.exc_type_of_class(&self.heap, class_id);
            if let HeapData::Class(class) = self.heap.get(class_id) {
                return (class.name.to_string(), kind);
            }
        }
        ("Exception".to_string(), None)
    }

    fn exception_message(&self, value: Value, err: &RunError) -> Option<String> {
        if let ExcPayload::Simple { message, .. } = &err.exc.payload {
            return message.clone();
        }
        if let Value::Ref(id) = value {
            if let HeapData::Instance(inst) = self.heap.get(id) {
                if let Some(Value::Ref(msg)) = inst.attrs.get(Sym::Message.id()) {
                    if let HeapData::Str(s) = self.heap.get(msg) {
                        return Some(s.to_string());
                    }
                }
            }
        }
        None
    }

    // --- Compile and invoke ----------------------------------------------

    /// Compiles source text in statement mode into a callable module body.
    pub fn compile(&mut self, source: &str, module: &str) -> Result<ValueRef, Exception> {
        self.compile_inner(source, module, false)
            .map_err(|e| self.surface(e))
    }

    /// Compiles a single expression into a callable returning its value.
    pub fn compile_expression(&mut self, source: &str, module: &str) -> Result<ValueRef, Exception> {
        self.compile_inner(source, module, true)
            .map_err(|e| self.surface(e))
    }

    pub(crate) fn compile_inner(
        &mut self,
        source: &str,
        module: &str,
        expression: bool,
    ) -> RunResult<ValueRef> {
        let module: Rc<str> = Rc::from(module);
        let def = crate::bytecode::compiler::compile_source(
            &mut self.interns,
            &module,
            source,
            expression,
        )
        .map_err(|err| {
            let line_text = source
                .lines()
                .nth(err.pos.line as usize)
                .map(Box::from);
            let mut run_err = RunError::simple(ExcType::SyntaxError, err.message);
            run_err.push_frame(TraceFrame {
                pos: err.pos,
                line_text,
                module: module.clone(),
                function: Rc::from("<module>"),
                syntax_error: true,
            });
            run_err
        })?;
        let func = self.alloc(HeapData::Func(Func {
            kind: FuncKind::Def {
                def,
                captures: Rc::from([]),
                defaults: Rc::from([]),
            },
            bound_self: None,
            is_method: false,
            module,
            name: Rc::from("<module>"),
        }))?;
        Ok(ValueRef(func))
    }

    /// Invokes a callable with positional arguments and optional keyword
    /// arguments.
    pub fn invoke(
        &mut self,
        callable: ValueRef,
        args: &[ValueRef],
        kwargs: &[(&str, ValueRef)],
    ) -> Result<ValueRef, Exception> {
        let mark = self.temp_roots_mark();
        self.temp_roots_push(callable.0);
        for arg in args {
            self.temp_roots_push(arg.0);
        }
        for (_, v) in kwargs {
            self.temp_roots_push(v.0);
        }
        let call_args = CallArgs {
            pos: args.iter().map(|a| a.0).collect(),
            kwargs: kwargs
                .iter()
                .map(|(k, v)| (self.interns.intern(k), v.0))
                .collect(),
        };
        let result = vm::call_value(self, callable.0, call_args);
        self.temp_roots_reset(mark);
        result.map(ValueRef).map_err(|e| self.surface(e))
    }

    /// Looks up and calls a method on a value.
    pub fn call_method(
        &mut self,
        obj: ValueRef,
        name: &str,
        args: &[ValueRef],
    ) -> Result<ValueRef, Exception> {
        let method = self.get_attribute(obj, name)?;
        self.invoke(method, args, &[])
    }

    // --- Attributes and items --------------------------------------------

    pub fn get_attribute(&mut self, obj: ValueRef, name: &str) -> Result<ValueRef, Exception> {
        let name = self.interns.intern(name);
        vm::get_attr(self, obj.0, name)
            .map(ValueRef)
            .map_err(|e| self.surface(e))
    }

    /// Attribute lookup starting at a given base class rather than the
    /// object's own class; methods found this way bind the object.
    pub fn get_attribute_from_base(
        &mut self,
        obj: ValueRef,
        name: &str,
        base: ValueRef,
    ) -> Result<ValueRef, Exception> {
        let name = self.interns.intern(name);
        vm::get_attr_from_base(self, obj.0, name, base.0)
            .map(ValueRef)
            .map_err(|e| self.surface(e))
    }

    pub fn set_attribute(
        &mut self,
        obj: ValueRef,
        name: &str,
        value: ValueRef,
    ) -> Result<(), Exception> {
        let name = self.interns.intern(name);
        vm::set_attr(self, obj.0, name, value.0).map_err(|e| self.surface(e))
    }

    /// Removes an attribute from the object's own override map. Entries
    /// inherited from the class template are unaffected.
    pub fn delete_attribute(&mut self, obj: ValueRef, name: &str) -> Result<(), Exception> {
        let name = self.interns.intern(name);
        vm::del_attr(self, obj.0, name).map_err(|e| self.surface(e))
    }

    pub fn get_item(&mut self, obj: ValueRef, index: ValueRef) -> Result<ValueRef, Exception> {
        vm::get_index(self, obj.0, index.0)
            .map(ValueRef)
            .map_err(|e| self.surface(e))
    }

    pub fn set_item(
        &mut self,
        obj: ValueRef,
        index: ValueRef,
        value: ValueRef,
    ) -> Result<(), Exception> {
        vm::set_index(self, obj.0, index.0, value.0).map_err(|e| self.surface(e))
    }

    pub fn delete_item(&mut self, obj: ValueRef, index: ValueRef) -> Result<(), Exception> {
        vm::del_index(self, obj.0, index.0).map_err(|e| self.surface(e))
    }

    /// Drives the iteration protocol over `obj`, calling `f` per element
    /// until it returns `false` or iteration is exhausted.
    pub fn iterate(
        &mut self,
        obj: ValueRef,
        mut f: impl FnMut(&mut Self, ValueRef) -> Result<bool, Exception>,
    ) -> Result<(), Exception> {
        let mark = self.temp_roots_mark();
        self.temp_roots_push(obj.0);
        let result = (|ctx: &mut Self| -> Result<(), Exception> {
            let it = vm::get_iter(ctx, obj.0).map_err(|e| ctx.surface(e))?;
            ctx.temp_roots_push(it);
            loop {
                let next = vm::iter_next(ctx, it).map_err(|e| ctx.surface(e))?;
                let Some(v) = next else {
                    return Ok(());
                };
                ctx.temp_roots_push(v);
                let keep_going = f(ctx, ValueRef(v))?;
                ctx.temp_roots.pop();
                if !keep_going {
                    return Ok(());
                }
            }
        })(self);
        self.temp_roots_reset(mark);
        result
    }

    // --- Value construction and inspection -------------------------------

    #[must_use]
    pub fn none(&self) -> ValueRef {
        ValueRef(Value::Null)
    }

    #[must_use]
    pub fn bool_value(&self, v: bool) -> ValueRef {
        ValueRef(Value::Bool(v))
    }

    #[must_use]
    pub fn int_value(&self, v: i64) -> ValueRef {
        ValueRef(Value::Int(v))
    }

    #[must_use]
    pub fn float_value(&self, v: f64) -> ValueRef {
        ValueRef(Value::Float(v))
    }

    pub fn str_value(&mut self, v: &str) -> Result<ValueRef, Exception> {
        self.alloc(HeapData::Str(Box::from(v)))
            .map(ValueRef)
            .map_err(|e| self.surface(e))
    }

    pub fn new_list(&mut self, items: &[ValueRef]) -> Result<ValueRef, Exception> {
        let items: Vec<Value> = items.iter().map(|v| v.0).collect();
        self.alloc(HeapData::List(List::new(items)))
            .map(ValueRef)
            .map_err(|e| self.surface(e))
    }

    pub fn new_tuple(&mut self, items: &[ValueRef]) -> Result<ValueRef, Exception> {
        let items: Box<[Value]> = items.iter().map(|v| v.0).collect();
        self.alloc(HeapData::Tuple(items))
            .map(ValueRef)
            .map_err(|e| self.surface(e))
    }

    pub fn new_dict(&mut self) -> Result<ValueRef, Exception> {
        self.alloc(HeapData::Dict(crate::types::Dict::new()))
            .map(ValueRef)
            .map_err(|e| self.surface(e))
    }

    pub fn new_set(&mut self) -> Result<ValueRef, Exception> {
        self.alloc(HeapData::Set(crate::types::Set::new()))
            .map(ValueRef)
            .map_err(|e| self.surface(e))
    }

    /// Registers a native function value.
    pub fn new_function(
        &mut self,
        name: &str,
        f: impl Fn(&mut Self, &[ValueRef]) -> Result<ValueRef, Exception> + 'static,
    ) -> Result<ValueRef, Exception> {
        let module = self.current_module();
        let func = Func::native(
            name,
            module,
            Rc::new(move |ctx: &mut Self, args: &CallArgs| {
                let refs: Vec<ValueRef> = args.pos.iter().map(|v| ValueRef(*v)).collect();
                match f(ctx, &refs) {
                    Ok(v) => Ok(v.0),
                    Err(e) => Err(RunError::simple(
                        e.kind().unwrap_or(ExcType::RuntimeError),
                        e.message().unwrap_or_default().to_string(),
                    )),
                }
            }),
        );
        self.alloc(HeapData::Func(func))
            .map(ValueRef)
            .map_err(|e| self.surface(e))
    }

    /// Creates a class with the given bases and the default constructor.
    pub fn new_class(&mut self, name: &str, bases: &[ValueRef]) -> Result<ValueRef, Exception> {
        let mut base_ids = Vec::new();
        let mut parents = Vec::new();
        for base in bases {
            match base.0 {
                Value::Ref(id) => match self.heap.get(id) {
                    HeapData::Class(class) => {
                        base_ids.push(id);
                        parents.push(class.template.clone());
                    }
                    _ => {
                        let err = ExcType::type_error("bases must be classes");
                        return Err(self.surface(err));
                    }
                },
                _ => {
                    let err = ExcType::type_error("bases must be classes");
                    return Err(self.surface(err));
                }
            }
        }
        let module = self.current_module();
        let class = Class {
            name: Rc::from(name),
            module,
            bases: base_ids,
            template: crate::attrs::AttrNode::with_parents(parents),
            ctor: None,
            exc_type: None,
        };
        self.alloc(HeapData::Class(class))
            .map(ValueRef)
            .map_err(|e| self.surface(e))
    }

    /// Attaches a finalizer invoked when the collector frees the object.
    /// Finalizers must not allocate.
    pub fn set_finalizer(&mut self, obj: ValueRef, finalizer: Box<dyn FnMut()>) {
        match obj.0 {
            Value::Ref(id) => self.heap.set_finalizer(id, finalizer),
            _ => crate::report_host_error("set_finalizer called on an immediate value"),
        }
    }

    #[must_use]
    pub fn is_none(&self, v: ValueRef) -> bool {
        matches!(v.0, Value::Null)
    }

    #[must_use]
    pub fn as_bool(&self, v: ValueRef) -> Option<bool> {
        match v.0 {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self, v: ValueRef) -> Option<i64> {
        match v.0 {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self, v: ValueRef) -> Option<f64> {
        match v.0 {
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self, v: ValueRef) -> Option<String> {
        match v.0 {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(s) => Some(s.to_string()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Truthiness per the language's bool protocol.
    pub fn truthy(&mut self, v: ValueRef) -> Result<bool, Exception> {
        vm::py_truthy(self, v.0).map_err(|e| self.surface(e))
    }

    /// The `str()` of a value.
    pub fn to_string_value(&mut self, v: ValueRef) -> Result<String, Exception> {
        vm::py_str(self, v.0).map_err(|e| self.surface(e))
    }

    /// The `repr()` of a value.
    pub fn to_repr(&mut self, v: ValueRef) -> Result<String, Exception> {
        vm::py_repr(self, v.0).map_err(|e| self.surface(e))
    }

    /// Converts a live value into an owned [`Object`] tree.
    pub fn to_object(&mut self, v: ValueRef) -> Result<Object, Exception> {
        crate::object::value_to_object(self, v.0, 0).map_err(|e| self.surface(e))
    }

    /// Builds a live value from an owned [`Object`] tree.
    pub fn from_object(&mut self, obj: &Object) -> Result<ValueRef, Exception> {
        crate::object::object_to_value(self, obj)
            .map(ValueRef)
            .map_err(|e| self.surface(e))
    }

    // --- Exceptions ------------------------------------------------------

    /// Builds a public exception of a builtin kind, for native callables
    /// that need to fail.
    #[must_use]
    pub fn make_exception(&self, kind: ExcType, message: &str) -> Exception {
        Exception::new(kind.to_string(), Some(kind), Some(message.to_string()), Vec::new())
    }

    /// The exception from the most recent failed host call, if any.
    #[must_use]
    pub fn current_exception(&self) -> Option<ValueRef> {
        self.current_exception.as_ref().map(|e| ValueRef(e.value))
    }

    /// Formatted traceback of the current exception.
    #[must_use]
    pub fn traceback_string(&self) -> Option<String> {
        let exc = self.current_exception.as_ref()?;
        let mut frames: Vec<StackFrame> = exc
            .frames
            .iter()
            .map(|f| StackFrame {
                line: f.pos.line + 1,
                column: f.pos.col,
                module: f.module.to_string(),
                function: f.function.to_string(),
                line_text: f.line_text.as_ref().map(|t| t.to_string()),
                is_syntax: f.syntax_error,
            })
            .collect();
        frames.reverse();
        let (type_name, kind) = (
            self.heap_exception_name(exc.value),
            None::<ExcType>,
        );
        let message = self.exception_message(
            exc.value,
            &RunError::object(exc.value),
        );
        let e = Exception::new(type_name, kind, message, frames);
        Some(e.traceback())
    }

    fn heap_exception_name(&self, value: Value) -> String {
        match crate::types::class::instance_class(&self.heap, value) {
            Some(class_id) => match self.heap.get(class_id) {
                HeapData::Class(class) => class.name.to_string(),
                _ => "Exception".to_string(),
            },
            None => "Exception".to_string(),
        }
    }

    pub fn clear_exception(&mut self) {
        self.current_exception = None;
    }

    // --- Modules ---------------------------------------------------------

    /// Registers a native module loader under a name.
    pub fn register_module(
        &mut self,
        name: &str,
        loader: impl Fn(&mut Self) -> Result<(), Exception> + 'static,
    ) {
        self.loaders.insert(name.to_string(), Rc::new(loader));
    }

    pub fn set_import_path(&mut self, path: impl Into<PathBuf>) {
        self.import_path = path.into();
    }

    /// Imports a module, binding it in the current module's globals.
    pub fn import_module(&mut self, name: &str, alias: Option<&str>) -> Result<(), Exception> {
        let name_id = self.interns.intern(name);
        let alias_id = match alias {
            Some(a) => self.interns.intern(a),
            None => name_id,
        };
        crate::modules::import_module(self, name_id, alias_id).map_err(|e| self.surface(e))
    }

    /// Imports a single symbol from a module under an alias.
    pub fn import_from_module(
        &mut self,
        name: &str,
        symbol: &str,
        alias: Option<&str>,
    ) -> Result<(), Exception> {
        let module_id = self.interns.intern(name);
        let symbol_id = self.interns.intern(symbol);
        let alias_id = match alias {
            Some(a) => self.interns.intern(a),
            None => symbol_id,
        };
        crate::modules::import_from_module(self, module_id, symbol_id, alias_id)
            .map_err(|e| self.surface(e))
    }

    /// Reads a global from a module's scope.
    pub fn get_global(&mut self, module: &str, name: &str) -> Option<ValueRef> {
        let name = self.interns.intern(name);
        self.lookup_global(module, name).map(ValueRef)
    }

    /// Sets a global in the current module's scope.
    pub fn set_global(&mut self, name: &str, value: ValueRef) -> Result<(), Exception> {
        let module = self.current_module();
        let name = self.interns.intern(name);
        self.set_global_value(&module, name, value.0)
            .map_err(|e| self.surface(e))
    }

    // --- GC --------------------------------------------------------------

    /// Pins a value so no collection frees it; pins nest.
    pub fn protect(&mut self, v: ValueRef) {
        if let Value::Ref(id) = v.0 {
            self.heap.protect(id);
        }
    }

    pub fn unprotect(&mut self, v: ValueRef) {
        if let Value::Ref(id) = v.0 {
            self.heap.unprotect(id);
        }
    }

    /// Forces a full collection.
    pub fn collect_garbage(&mut self) {
        self.collect_garbage_internal();
    }

    /// Number of live heap objects.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.heap.live_count()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // Teardown runs every remaining finalizer.
        self.heap.run_all_finalizers();
    }
}
