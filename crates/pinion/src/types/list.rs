//! The mutable list type and its stable sort.

use crate::args::CallArgs;
use crate::context::Context;
use crate::exception::RunResult;
use crate::heap::{HeapData, HeapId};
use crate::value::Value;

#[derive(Debug, Default)]
pub(crate) struct List {
    pub items: Vec<Value>,
}

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }

    pub fn trace(&self, out: &mut Vec<HeapId>) {
        for v in &self.items {
            if let Value::Ref(id) = v {
                out.push(*id);
            }
        }
    }
}

/// Stable keyed sort.
///
/// The key callable runs once per element; comparisons dispatch through
/// `__lt__` and propagate any exception they raise. Key results are pinned
/// in the context's temporary roots while the sort runs, since comparisons
/// may call script code that allocates.
pub(crate) fn sort(
    ctx: &mut Context,
    list_id: HeapId,
    key: Option<Value>,
    reverse: bool,
) -> RunResult<()> {
    let items = match ctx.heap.get(list_id) {
        HeapData::List(list) => list.items.clone(),
        _ => unreachable!("sort target must be a list"),
    };

    let mark = ctx.temp_roots_mark();
    let result = sort_inner(ctx, &items, key, reverse);
    ctx.temp_roots_reset(mark);
    let order = result?;

    let sorted: Vec<Value> = order.into_iter().map(|i| items[i]).collect();
    match ctx.heap.get_mut(list_id) {
        HeapData::List(list) => list.items = sorted,
        _ => unreachable!("sort target must be a list"),
    }
    Ok(())
}

fn sort_inner(
    ctx: &mut Context,
    items: &[Value],
    key: Option<Value>,
    reverse: bool,
) -> RunResult<Vec<usize>> {
    let mut keys = Vec::with_capacity(items.len());
    for item in items {
        let k = match key {
            Some(Value::Null) | None => *item,
            Some(f) => {
                let k = crate::bytecode::vm::call_value(ctx, f, CallArgs::one(*item))?;
                ctx.temp_roots_push(k);
                k
            }
        };
        keys.push(k);
    }

    let indices: Vec<usize> = (0..items.len()).collect();
    merge_sort(ctx, indices, &keys, reverse)
}

/// Bottom-up stable merge sort over element indices with a fallible
/// comparator.
fn merge_sort(
    ctx: &mut Context,
    mut indices: Vec<usize>,
    keys: &[Value],
    reverse: bool,
) -> RunResult<Vec<usize>> {
    let n = indices.len();
    let mut buffer = vec![0usize; n];
    let mut width = 1;
    while width < n {
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            merge(ctx, &indices[start..mid], &indices[mid..end], keys, reverse, &mut buffer[start..end])?;
            start = end;
        }
        indices[..].copy_from_slice(&buffer[..]);
        width *= 2;
    }
    Ok(indices)
}

fn merge(
    ctx: &mut Context,
    left: &[usize],
    right: &[usize],
    keys: &[Value],
    reverse: bool,
    out: &mut [usize],
) -> RunResult<()> {
    let mut i = 0;
    let mut j = 0;
    let mut k = 0;
    while i < left.len() && j < right.len() {
        // For a reverse sort compare the other way around; equal keys keep
        // their original order either way, preserving stability.
        let take_right = if reverse {
            crate::bytecode::vm::py_lt(ctx, keys[left[i]], keys[right[j]])?
        } else {
            crate::bytecode::vm::py_lt(ctx, keys[right[j]], keys[left[i]])?
        };
        if take_right {
            out[k] = right[j];
            j += 1;
        } else {
            out[k] = left[i];
            i += 1;
        }
        k += 1;
    }
    while i < left.len() {
        out[k] = left[i];
        i += 1;
        k += 1;
    }
    while j < right.len() {
        out[k] = right[j];
        j += 1;
        k += 1;
    }
    Ok(())
}
