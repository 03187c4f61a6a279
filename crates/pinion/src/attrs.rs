//! Copy-on-write attribute tables.
//!
//! An attribute table is a small node holding a flat entries map plus an
//! ordered list of parent nodes. Lookup walks self-then-parents depth
//! first; the first hit wins. A class's instance template is such a node,
//! with the base classes' templates as parents; cloning it onto a new
//! instance is O(1) — the instance starts with an empty private override
//! map layered over the shared node, and writes always go to the override
//! map.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::heap::HeapId;
use crate::intern::StringId;
use crate::value::Value;

pub(crate) type AttrNodeRef = Rc<RefCell<AttrNode>>;

/// A shared attribute node: entries plus ordered parent chain.
#[derive(Debug, Default)]
pub(crate) struct AttrNode {
    pub entries: AHashMap<StringId, Value>,
    pub parents: Vec<AttrNodeRef>,
}

impl AttrNode {
    pub fn new_ref() -> AttrNodeRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn with_parents(parents: Vec<AttrNodeRef>) -> AttrNodeRef {
        Rc::new(RefCell::new(Self {
            entries: AHashMap::new(),
            parents,
        }))
    }

    /// Depth-first lookup through self and parents; first hit wins.
    pub fn get(&self, name: StringId) -> Option<Value> {
        if let Some(v) = self.entries.get(&name) {
            return Some(*v);
        }
        for parent in &self.parents {
            if let Some(v) = parent.borrow().get(name) {
                return Some(v);
            }
        }
        None
    }

    /// Collects every heap reference held by this node and its parents.
    pub fn trace(&self, out: &mut Vec<HeapId>) {
        for v in self.entries.values() {
            if let Value::Ref(id) = v {
                out.push(*id);
            }
        }
        for parent in &self.parents {
            parent.borrow().trace(out);
        }
    }
}

/// An object's attribute table: a private override map over an optional
/// shared snapshot node.
#[derive(Debug, Default)]
pub(crate) struct AttrTable {
    own: AHashMap<StringId, Value>,
    base: Option<AttrNodeRef>,
}

impl AttrTable {
    /// The cheap clone of a class template onto a new instance.
    pub fn from_template(template: AttrNodeRef) -> Self {
        Self {
            own: AHashMap::new(),
            base: Some(template),
        }
    }

    pub fn get(&self, name: StringId) -> Option<Value> {
        if let Some(v) = self.own.get(&name) {
            return Some(*v);
        }
        self.base.as_ref().and_then(|b| b.borrow().get(name))
    }

    /// Whether the name resolves through the shared snapshot rather than
    /// the private override map. Methods found this way bind their receiver.
    pub fn is_inherited(&self, name: StringId) -> bool {
        !self.own.contains_key(&name)
    }

    pub fn set(&mut self, name: StringId, value: Value) {
        self.own.insert(name, value);
    }

    /// Removes from the private override map only; the shared snapshot is
    /// never mutated through an instance handle.
    pub fn remove(&mut self, name: StringId) -> Option<Value> {
        self.own.remove(&name)
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        for v in self.own.values() {
            if let Value::Ref(id) = v {
                out.push(*id);
            }
        }
        if let Some(base) = &self.base {
            base.borrow().trace(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interns;

    #[test]
    fn lookup_walks_parents_depth_first() {
        let mut interns = Interns::new();
        let a = interns.intern("a");
        let b = interns.intern("b");

        let grandparent = AttrNode::new_ref();
        grandparent.borrow_mut().entries.insert(a, Value::Int(1));
        grandparent.borrow_mut().entries.insert(b, Value::Int(2));
        let parent = AttrNode::with_parents(vec![grandparent]);
        parent.borrow_mut().entries.insert(a, Value::Int(10));

        let table = AttrTable::from_template(parent);
        assert_eq!(table.get(a), Some(Value::Int(10)));
        assert_eq!(table.get(b), Some(Value::Int(2)));
    }

    #[test]
    fn writes_shadow_without_mutating_the_template() {
        let mut interns = Interns::new();
        let a = interns.intern("a");

        let template = AttrNode::new_ref();
        template.borrow_mut().entries.insert(a, Value::Int(1));

        let mut first = AttrTable::from_template(template.clone());
        let second = AttrTable::from_template(template.clone());

        first.set(a, Value::Int(99));
        assert_eq!(first.get(a), Some(Value::Int(99)));
        assert_eq!(second.get(a), Some(Value::Int(1)));
        assert_eq!(template.borrow().entries.get(&a), Some(&Value::Int(1)));
    }

    #[test]
    fn template_mutation_is_visible_until_shadowed() {
        let mut interns = Interns::new();
        let a = interns.intern("a");

        let template = AttrNode::new_ref();
        let table = AttrTable::from_template(template.clone());
        assert_eq!(table.get(a), None);

        template.borrow_mut().entries.insert(a, Value::Int(5));
        assert_eq!(table.get(a), Some(Value::Int(5)));
    }

    #[test]
    fn remove_touches_only_the_override_map() {
        let mut interns = Interns::new();
        let a = interns.intern("a");

        let template = AttrNode::new_ref();
        template.borrow_mut().entries.insert(a, Value::Int(1));
        let mut table = AttrTable::from_template(template);

        assert_eq!(table.remove(a), None);
        table.set(a, Value::Int(2));
        assert_eq!(table.remove(a), Some(Value::Int(2)));
        // The template entry is still visible afterwards.
        assert_eq!(table.get(a), Some(Value::Int(1)));
    }
}
