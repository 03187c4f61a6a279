//! Slice objects and index arithmetic for sequence subscripts.

use crate::exception::{ExcType, RunResult};
use crate::heap::HeapId;
use crate::value::Value;

/// `start:stop:step` with absent components stored as `Null`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Slice {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

impl Slice {
    pub fn trace(&self, out: &mut Vec<HeapId>) {
        for v in [self.start, self.stop, self.step] {
            if let Value::Ref(id) = v {
                out.push(id);
            }
        }
    }

    /// Resolves against a sequence length into concrete indices, clamping
    /// out-of-range bounds the way the reference language does.
    pub fn resolve(&self, len: usize) -> RunResult<ResolvedSlice> {
        let step = match self.step {
            Value::Null => 1,
            Value::Int(0) => return Err(ExcType::value_error("slice step cannot be zero")),
            Value::Int(s) => s,
            _ => return Err(ExcType::type_error("slice indices must be integers or None")),
        };
        let len = len as i64;
        let (default_start, default_stop) = if step > 0 { (0, len) } else { (len - 1, -1) };
        let start = resolve_bound(self.start, len, step, default_start)?;
        let stop = resolve_bound(self.stop, len, step, default_stop)?;
        Ok(ResolvedSlice { start, stop, step })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedSlice {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl ResolvedSlice {
    /// Iterates the selected indices in order.
    pub fn indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut i = self.start;
        if self.step > 0 {
            while i < self.stop {
                out.push(i as usize);
                i += self.step;
            }
        } else {
            while i > self.stop {
                out.push(i as usize);
                i += self.step;
            }
        }
        out
    }
}

fn resolve_bound(v: Value, len: i64, step: i64, default: i64) -> RunResult<i64> {
    let raw = match v {
        Value::Null => return Ok(default),
        Value::Int(i) => i,
        _ => return Err(ExcType::type_error("slice indices must be integers or None")),
    };
    let adjusted = if raw < 0 { raw + len } else { raw };
    // Clamp differently for forward and backward steps so an empty range
    // falls out naturally.
    Ok(if step > 0 {
        adjusted.clamp(0, len)
    } else {
        adjusted.clamp(-1, len - 1)
    })
}

/// Normalizes an integer subscript, supporting negative indexing.
pub(crate) fn normalize_index(index: i64, len: usize, kind: &str) -> RunResult<usize> {
    let len = len as i64;
    let adjusted = if index < 0 { index + len } else { index };
    if adjusted < 0 || adjusted >= len {
        return Err(ExcType::index_error(&format!("{kind} index out of range")));
    }
    Ok(adjusted as usize)
}
