//! Heap arena and the tracing garbage collector.
//!
//! Objects live in slots addressed by stable `HeapId`s; a collection never
//! moves anything, it only frees unreachable slots. Collection is
//! mark-sweep: the context gathers its roots (protected objects, builtins,
//! module global cells, the current exception, and every live activation's
//! stacks and cells), the heap marks everything reachable, then sweeps.
//! Finalizers of dead objects run during the sweep; they must not
//! allocate.
//!
//! A collection may only be triggered from an allocation site or from the
//! host's explicit collect call. Code holding `Value`s in Rust locals
//! across an allocation must keep them reachable (typically by leaving
//! them on a frame stack or pushing them onto the context's temporary
//! roots).

use std::borrow::Cow;

use ahash::AHashMap;

use crate::function::Func;
use crate::types::{
    Class, Dict, FileObject, Instance, List, Module, NativeIter, Set, Slice, Type,
};
use crate::value::Value;

/// Stable handle to a heap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct HeapId(u32);

impl HeapId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Heap object payloads.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(Box<str>),
    Tuple(Box<[Value]>),
    List(List),
    Dict(Dict),
    Set(Set),
    Slice(Slice),
    /// A shared, mutable single-slot holder enabling closure capture.
    Cell(Value),
    Func(Func),
    Class(Class),
    Instance(Instance),
    Module(Module),
    Iter(NativeIter),
    File(FileObject),
}

impl HeapData {
    pub fn type_of(&self) -> Type {
        match self {
            Self::Str(_) => Type::Str,
            Self::Tuple(_) => Type::Tuple,
            Self::List(_) => Type::List,
            Self::Dict(_) => Type::Dict,
            Self::Set(_) => Type::Set,
            Self::Slice(_) => Type::Slice,
            Self::Cell(_) => Type::Cell,
            Self::Func(_) => Type::Function,
            Self::Class(_) => Type::Class,
            Self::Instance(_) => Type::Instance,
            Self::Module(_) => Type::Module,
            Self::Iter(_) => Type::Iter,
            Self::File(_) => Type::File,
        }
    }

    pub fn type_name(&self, heap: &Heap) -> Cow<'static, str> {
        match self {
            Self::Instance(inst) => match heap.get(inst.class) {
                HeapData::Class(class) => Cow::Owned(class.name.to_string()),
                _ => Cow::Borrowed("object"),
            },
            other => Cow::Borrowed(other.type_of().name()),
        }
    }

    /// Pushes every heap reference this object owns.
    fn trace(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::Str(_) | Self::File(_) => {}
            Self::Tuple(items) => {
                for v in items.iter() {
                    if let Value::Ref(id) = v {
                        out.push(*id);
                    }
                }
            }
            Self::List(list) => list.trace(out),
            Self::Dict(dict) => dict.trace(out),
            Self::Set(set) => set.trace(out),
            Self::Slice(slice) => slice.trace(out),
            Self::Cell(v) => {
                if let Value::Ref(id) = v {
                    out.push(*id);
                }
            }
            Self::Func(func) => func.trace(out),
            Self::Class(class) => class.trace(out),
            Self::Instance(inst) => inst.trace(out),
            Self::Module(module) => module.trace(out),
            Self::Iter(iter) => iter.trace(out),
        }
    }
}

/// Finalizer invoked when the collector frees an object. Must not allocate
/// on the heap; there is no safe way to do so mid-sweep.
pub type Finalizer = Box<dyn FnMut()>;

/// Raised internally when the allocation cap is hit; the context forces a
/// collection and retries before surfacing the pre-allocated MemoryError.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AllocExhausted;

struct Slot {
    data: Option<HeapData>,
    mark: bool,
}

/// Collections run when the live count reaches this factor times the count
/// left by the previous collection.
pub const DEFAULT_GC_RUN_FACTOR: f64 = 2.0;

/// Floor below which the trigger heuristic never fires.
const MIN_GC_THRESHOLD: usize = 256;

pub(crate) struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    /// Live count after the previous collection.
    last_live: usize,
    gc_run_factor: f64,
    max_alloc: Option<usize>,
    /// Pin multiset: object id -> pin count.
    protected: AHashMap<u32, u32>,
    finalizers: AHashMap<u32, Finalizer>,
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("live", &self.live)
            .field("slots", &self.slots.len())
            .field("protected", &self.protected.len())
            .finish_non_exhaustive()
    }
}

impl Heap {
    pub fn new(gc_run_factor: f64, max_alloc: Option<usize>) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            last_live: 0,
            gc_run_factor,
            max_alloc,
            protected: AHashMap::new(),
            finalizers: AHashMap::new(),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Applies the allocation cap; deferred until after bootstrap so a
    /// tight cap cannot break context creation.
    pub fn set_max_alloc(&mut self, max_alloc: Option<usize>) {
        self.max_alloc = max_alloc;
    }

    /// Whether the trigger policy calls for a collection before the next
    /// allocation.
    pub fn should_collect(&self) -> bool {
        let threshold =
            ((self.gc_run_factor * self.last_live as f64) as usize).max(MIN_GC_THRESHOLD);
        self.live >= threshold
    }

    pub fn alloc(&mut self, data: HeapData) -> Result<HeapId, AllocExhausted> {
        if let Some(cap) = self.max_alloc {
            if self.live >= cap {
                return Err(AllocExhausted);
            }
        }
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.data.is_none());
            slot.data = Some(data);
            slot.mark = false;
            Ok(HeapId(index))
        } else {
            let index = u32::try_from(self.slots.len()).expect("heap exhausted");
            self.slots.push(Slot {
                data: Some(data),
                mark: false,
            });
            Ok(HeapId(index))
        }
    }

    pub fn get(&self, id: HeapId) -> &HeapData {
        self.slots[id.index()]
            .data
            .as_ref()
            .expect("use of collected object")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.slots[id.index()]
            .data
            .as_mut()
            .expect("use of collected object")
    }

    pub fn is_live(&self, id: HeapId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|s| s.data.is_some())
    }

    /// Pins an object; pins nest.
    pub fn protect(&mut self, id: HeapId) {
        *self.protected.entry(id.0).or_insert(0) += 1;
    }

    pub fn unprotect(&mut self, id: HeapId) {
        match self.protected.get_mut(&id.0) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.protected.remove(&id.0);
            }
            None => crate::report_host_error("unprotect called on an object that is not protected"),
        }
    }

    pub fn set_finalizer(&mut self, id: HeapId, finalizer: Finalizer) {
        self.finalizers.insert(id.0, finalizer);
    }

    /// Mark-sweep collection from the given roots plus the protect set.
    /// Returns the number of objects freed.
    pub fn collect(&mut self, roots: &[HeapId]) -> usize {
        for slot in &mut self.slots {
            slot.mark = false;
        }

        let mut worklist: Vec<HeapId> = Vec::with_capacity(roots.len() + self.protected.len());
        worklist.extend(roots.iter().copied());
        worklist.extend(self.protected.keys().map(|id| HeapId(*id)));

        while let Some(id) = worklist.pop() {
            let slot = &mut self.slots[id.index()];
            if slot.mark {
                continue;
            }
            slot.mark = true;
            if let Some(data) = &self.slots[id.index()].data {
                data.trace(&mut worklist);
            }
        }

        // Finalizers of unreachable objects run before any slot is freed,
        // while the whole object graph is still intact.
        let mut dead_finalizers = Vec::new();
        for (id, _) in self.finalizers.iter() {
            let slot = &self.slots[*id as usize];
            if slot.data.is_some() && !slot.mark {
                dead_finalizers.push(*id);
            }
        }
        for id in dead_finalizers {
            if let Some(mut finalizer) = self.finalizers.remove(&id) {
                finalizer();
            }
        }

        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.data.is_some() && !slot.mark {
                slot.data = None;
                self.free.push(index as u32);
                freed += 1;
            }
        }
        self.live -= freed;
        self.last_live = self.live;
        freed
    }

    /// Runs every remaining finalizer; called at context teardown.
    pub fn run_all_finalizers(&mut self) {
        let ids: Vec<u32> = self.finalizers.keys().copied().collect();
        for id in ids {
            if let Some(mut finalizer) = self.finalizers.remove(&id) {
                finalizer();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn heap() -> Heap {
        Heap::new(DEFAULT_GC_RUN_FACTOR, None)
    }

    fn alloc_str(heap: &mut Heap, s: &str) -> HeapId {
        heap.alloc(HeapData::Str(Box::from(s))).unwrap()
    }

    #[test]
    fn collect_frees_unreachable() {
        let mut heap = heap();
        let a = alloc_str(&mut heap, "a");
        let b = alloc_str(&mut heap, "b");
        assert_eq!(heap.live_count(), 2);
        let freed = heap.collect(&[a]);
        assert_eq!(freed, 1);
        assert!(heap.is_live(a));
        assert!(!heap.is_live(b));
    }

    #[test]
    fn protect_pins_and_nests() {
        let mut heap = heap();
        let a = alloc_str(&mut heap, "a");
        heap.protect(a);
        heap.protect(a);
        heap.collect(&[]);
        assert!(heap.is_live(a));
        heap.unprotect(a);
        heap.collect(&[]);
        assert!(heap.is_live(a));
        heap.unprotect(a);
        heap.collect(&[]);
        assert!(!heap.is_live(a));
    }

    #[test]
    fn cycles_are_collected() {
        let mut heap = heap();
        let a = heap
            .alloc(HeapData::List(List::new(Vec::new())))
            .unwrap();
        let b = heap
            .alloc(HeapData::List(List::new(vec![Value::Ref(a)])))
            .unwrap();
        match heap.get_mut(a) {
            HeapData::List(list) => list.items.push(Value::Ref(b)),
            _ => unreachable!(),
        }
        assert_eq!(heap.live_count(), 2);
        let freed = heap.collect(&[]);
        assert_eq!(freed, 2);
    }

    #[test]
    fn slots_are_reused() {
        let mut heap = heap();
        let a = alloc_str(&mut heap, "a");
        heap.collect(&[]);
        let b = alloc_str(&mut heap, "b");
        assert_eq!(a, b);
    }

    #[test]
    fn finalizers_run_on_sweep() {
        let mut heap = heap();
        let ran = Rc::new(Cell::new(false));
        let a = alloc_str(&mut heap, "a");
        let flag = ran.clone();
        heap.set_finalizer(a, Box::new(move || flag.set(true)));
        heap.collect(&[a]);
        assert!(!ran.get());
        heap.collect(&[]);
        assert!(ran.get());
    }

    #[test]
    fn allocation_cap() {
        let mut heap = Heap::new(DEFAULT_GC_RUN_FACTOR, Some(2));
        alloc_str(&mut heap, "a");
        alloc_str(&mut heap, "b");
        assert_eq!(
            heap.alloc(HeapData::Str(Box::from("c"))),
            Err(AllocExhausted)
        );
    }
}
