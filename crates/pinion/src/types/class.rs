//! Class records and instances.

use std::rc::Rc;

use crate::attrs::{AttrNodeRef, AttrTable};
use crate::exception::ExcType;
use crate::function::NativeFn;
use crate::heap::{Heap, HeapData, HeapId};
use crate::value::Value;

/// A class object.
///
/// The instance-attribute template is the node cloned (copy-on-write) onto
/// every new instance; its parents are the base classes' templates, so
/// method resolution is the ordinary attribute-table parent walk.
pub(crate) struct Class {
    pub name: Rc<str>,
    pub module: Rc<str>,
    pub bases: Vec<HeapId>,
    pub template: AttrNodeRef,
    /// Native constructor; when absent, calling the class performs the
    /// default construct-then-`__init__` sequence.
    pub ctor: Option<NativeFn>,
    /// Set on the builtin exception classes so native raises can be
    /// matched against script-level handler classes.
    pub exc_type: Option<ExcType>,
}

impl std::fmt::Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("bases", &self.bases)
            .finish_non_exhaustive()
    }
}

impl Class {
    pub fn trace(&self, out: &mut Vec<HeapId>) {
        out.extend(self.bases.iter().copied());
        self.template.borrow().trace(out);
    }
}

/// An instance: its class plus a copy-on-write attribute table cloned from
/// the class template.
#[derive(Debug)]
pub(crate) struct Instance {
    pub class: HeapId,
    pub attrs: AttrTable,
}

impl Instance {
    pub fn trace(&self, out: &mut Vec<HeapId>) {
        out.push(self.class);
        self.attrs.trace(out);
    }
}

/// Whether class `c` is `base` or derives from it, walking bases depth
/// first.
pub(crate) fn is_subclass(heap: &Heap, c: HeapId, base: HeapId) -> bool {
    if c == base {
        return true;
    }
    let HeapData::Class(class) = heap.get(c) else {
        return false;
    };
    class.bases.iter().any(|b| is_subclass(heap, *b, base))
}

/// The class of an instance value, if it is one.
pub(crate) fn instance_class(heap: &Heap, value: Value) -> Option<HeapId> {
    match value {
        Value::Ref(id) => match heap.get(id) {
            HeapData::Instance(inst) => Some(inst.class),
            _ => None,
        },
        _ => None,
    }
}
