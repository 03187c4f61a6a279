//! Dict with hash-identity semantics preserving insertion order.
//!
//! Keys are hashed by the language's hash protocol and compared by its
//! equality protocol; both can invoke script code and can raise, which
//! rules out `std` maps. Storage follows the dense-entries design: a
//! `HashTable<usize>` maps key hashes to indices into an insertion-ordered
//! entries vector.
//!
//! Every structural mutation bumps `version`; live iterators snapshot the
//! version and raise `RuntimeError` when it moves under them.

use hashbrown::HashTable;

use crate::context::Context;
use crate::exception::{ExcType, RunResult};
use crate::heap::{HeapData, HeapId};
use crate::value::Value;

#[derive(Debug)]
pub(crate) struct DictEntry {
    pub hash: u64,
    pub key: Value,
    pub value: Value,
}

#[derive(Debug, Default)]
pub(crate) struct Dict {
    indices: HashTable<usize>,
    pub entries: Vec<DictEntry>,
    pub version: u64,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        for entry in &self.entries {
            if let Value::Ref(id) = entry.key {
                out.push(id);
            }
            if let Value::Ref(id) = entry.value {
                out.push(id);
            }
        }
    }

    /// Entry indices whose hash matches, in probe order.
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
        // Entries after the removed one shift down by one.
        for slot in self.indices.iter_mut() {
            if *slot > index {
                *slot -= 1;
            }
        }
    }
}

/// Looks up `key`, returning its value if present.
pub(crate) fn dict_get(ctx: &mut Context, dict: HeapId, key: Value) -> RunResult<Option<Value>> {
    Ok(dict_find(ctx, dict, key)?.map(|(_, v)| v))
}

/// Inserts or replaces `key`.
pub(crate) fn dict_set(ctx: &mut Context, dict: HeapId, key: Value, value: Value) -> RunResult<()> {
    let hash = crate::bytecode::vm::py_hash(ctx, key)?;
    if let Some(index) = dict_probe(ctx, dict, hash, key)? {
        let HeapData::Dict(d) = ctx.heap.get_mut(dict) else {
            unreachable!("dict id must hold a dict");
        };
        d.entries[index].value = value;
        return Ok(());
    }
    let HeapData::Dict(d) = ctx.heap.get_mut(dict) else {
        unreachable!("dict id must hold a dict");
    };
    let index = d.entries.len();
    d.entries.push(DictEntry { hash, key, value });
    d.insert_index(hash, index);
    d.version += 1;
    Ok(())
}

/// Removes `key`, returning its value if it was present.
pub(crate) fn dict_remove(ctx: &mut Context, dict: HeapId, key: Value) -> RunResult<Option<Value>> {
    let hash = crate::bytecode::vm::py_hash(ctx, key)?;
    let Some(index) = dict_probe(ctx, dict, hash, key)? else {
        return Ok(None);
    };
    let HeapData::Dict(d) = ctx.heap.get_mut(dict) else {
        unreachable!("dict id must hold a dict");
    };
    let entry = d.entries.remove(index);
    d.remove_index(hash, index);
    d.version += 1;
    Ok(Some(entry.value))
}

/// Finds the entry equal to `key`, returning `(index, value)`.
pub(crate) fn dict_find(
    ctx: &mut Context,
    dict: HeapId,
    key: Value,
) -> RunResult<Option<(usize, Value)>> {
    let hash = crate::bytecode::vm::py_hash(ctx, key)?;
    match dict_probe(ctx, dict, hash, key)? {
        Some(index) => {
            let HeapData::Dict(d) = ctx.heap.get(dict) else {
                unreachable!("dict id must hold a dict");
            };
            Ok(Some((index, d.entries[index].value)))
        }
        None => Ok(None),
    }
}

/// Probes for an entry with equal key among the hash's candidates.
///
/// Equality may dispatch to script code, so candidate keys are collected
/// first and the dict borrow released before comparing.
fn dict_probe(ctx: &mut Context, dict: HeapId, hash: u64, key: Value) -> RunResult<Option<usize>> {
    let candidates: Vec<(usize, Value)> = {
        let HeapData::Dict(d) = ctx.heap.get(dict) else {
            unreachable!("dict id must hold a dict");
        };
        d.candidates(hash)
            .into_iter()
            .map(|i| (i, d.entries[i].key))
            .collect()
    };
    for (index, candidate) in candidates {
        if crate::bytecode::vm::py_eq(ctx, key, candidate)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Raises the canonical error for a dict mutated while being iterated.
pub(crate) fn dict_changed_error() -> crate::exception::RunError {
    ExcType::runtime_error("dictionary changed size during iteration")
}
