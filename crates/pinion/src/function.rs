//! Function records: native callables, builtin type methods, and
//! script-defined functions with their captured cells.

use std::fmt;
use std::rc::Rc;

use crate::args::CallArgs;
use crate::bytecode::FuncDef;
use crate::context::Context;
use crate::exception::RunResult;
use crate::heap::HeapId;
use crate::intern::StringId;
use crate::types::TypeMethod;
use crate::value::Value;

/// A host-provided native callable.
pub(crate) type NativeFn = Rc<dyn Fn(&mut Context, &CallArgs) -> RunResult<Value>>;

#[derive(Clone)]
pub(crate) enum FuncKind {
    /// Native function registered by the host or the builtins bootstrap.
    Native(NativeFn),
    /// A method of a builtin type; the receiver sits in `bound_self`.
    TypeMethod(TypeMethod),
    /// A script-defined function: compiled definition, captured cells,
    /// and default parameter values evaluated at definition time.
    Def {
        def: Rc<FuncDef>,
        captures: Rc<[(StringId, HeapId)]>,
        defaults: Rc<[Value]>,
    },
}

impl fmt::Debug for FuncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Native"),
            Self::TypeMethod(m) => write!(f, "TypeMethod({m:?})"),
            Self::Def { def, .. } => write!(f, "Def({})", def.name),
        }
    }
}

/// A function object.
#[derive(Debug, Clone)]
pub(crate) struct Func {
    pub kind: FuncKind,
    /// Receiver of a bound method.
    pub bound_self: Option<Value>,
    /// Set for functions defined in a class body; attribute access from an
    /// instance binds these to the receiver.
    pub is_method: bool,
    pub module: Rc<str>,
    pub name: Rc<str>,
}

impl Func {
    pub fn native(name: impl Into<Rc<str>>, module: impl Into<Rc<str>>, f: NativeFn) -> Self {
        Self {
            kind: FuncKind::Native(f),
            bound_self: None,
            is_method: false,
            module: module.into(),
            name: name.into(),
        }
    }

    /// A copy of this function with the receiver slot populated.
    pub fn bind(&self, receiver: Value) -> Self {
        Self {
            kind: self.kind.clone(),
            bound_self: Some(receiver),
            is_method: self.is_method,
            module: self.module.clone(),
            name: self.name.clone(),
        }
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        if let Some(Value::Ref(id)) = self.bound_self {
            out.push(id);
        }
        if let FuncKind::Def {
            captures, defaults, ..
        } = &self.kind
        {
            out.extend(captures.iter().map(|(_, cell)| *cell));
            for v in defaults.iter() {
                if let Value::Ref(id) = v {
                    out.push(*id);
                }
            }
        }
    }
}
