//! Module objects: a named snapshot of a module's globals.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::heap::HeapId;
use crate::intern::StringId;
use crate::value::Value;

#[derive(Debug)]
pub(crate) struct Module {
    pub name: Rc<str>,
    /// Attributes in insertion order, copied from the module's globals
    /// when the module object was constructed.
    pub attrs: IndexMap<StringId, Value>,
}

impl Module {
    pub fn trace(&self, out: &mut Vec<HeapId>) {
        for v in self.attrs.values() {
            if let Value::Ref(id) = v {
                out.push(*id);
            }
        }
    }
}
