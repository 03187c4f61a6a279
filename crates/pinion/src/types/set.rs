//! Set with hash-identity semantics, sharing the dict storage design.

use hashbrown::HashTable;

use crate::context::Context;
use crate::exception::{ExcType, RunResult};
use crate::heap::{HeapData, HeapId};
use crate::value::Value;

#[derive(Debug)]
pub(crate) struct SetEntry {
    pub hash: u64,
    pub key: Value,
}

#[derive(Debug, Default)]
pub(crate) struct Set {
    indices: HashTable<usize>,
    pub entries: Vec<SetEntry>,
    pub version: u64,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        for entry in &self.entries {
            if let Value::Ref(id) = entry.key {
                out.push(id);
            }
        }
    }

    fn candidates(&self, hash: u64) -> Vec<usize> {
        self.indices.iter_hash(hash).copied().collect()
    }

    fn insert_index(&mut self, hash: u64, index: usize) {
        let entries = &self.entries;
        self.indices
            .insert_unique(hash, index, |&i| entries[i].hash);
    }

    fn remove_index(&mut self, hash: u64, index: usize) {
        if let Ok(entry) = self.indices.find_entry(hash, |&i| i == index) {
            entry.remove();
        }
        for slot in self.indices.iter_mut() {
            if *slot > index {
                *slot -= 1;
            }
        }
    }
}

pub(crate) fn set_add(ctx: &mut Context, set: HeapId, key: Value) -> RunResult<()> {
    let hash = crate::bytecode::vm::py_hash(ctx, key)?;
    if set_probe(ctx, set, hash, key)?.is_some() {
        return Ok(());
    }
    let HeapData::Set(s) = ctx.heap.get_mut(set) else {
        unreachable!("set id must hold a set");
    };
    let index = s.entries.len();
    s.entries.push(SetEntry { hash, key });
    s.insert_index(hash, index);
    s.version += 1;
    Ok(())
}

pub(crate) fn set_contains(ctx: &mut Context, set: HeapId, key: Value) -> RunResult<bool> {
    let hash = crate::bytecode::vm::py_hash(ctx, key)?;
    Ok(set_probe(ctx, set, hash, key)?.is_some())
}

pub(crate) fn set_remove(ctx: &mut Context, set: HeapId, key: Value) -> RunResult<bool> {
    let hash = crate::bytecode::vm::py_hash(ctx, key)?;
    let Some(index) = set_probe(ctx, set, hash, key)? else {
        return Ok(false);
    };
    let HeapData::Set(s) = ctx.heap.get_mut(set) else {
        unreachable!("set id must hold a set");
    };
    s.entries.remove(index);
    s.remove_index(hash, index);
    s.version += 1;
    Ok(true)
}

fn set_probe(ctx: &mut Context, set: HeapId, hash: u64, key: Value) -> RunResult<Option<usize>> {
    let candidates: Vec<(usize, Value)> = {
        let HeapData::Set(s) = ctx.heap.get(set) else {
            unreachable!("set id must hold a set");
        };
        s.candidates(hash)
            .into_iter()
            .map(|i| (i, s.entries[i].key))
            .collect()
    };
    for (index, candidate) in candidates {
        if crate::bytecode::vm::py_eq(ctx, key, candidate)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

pub(crate) fn set_changed_error() -> crate::exception::RunError {
    ExcType::runtime_error("set changed size during iteration")
}
