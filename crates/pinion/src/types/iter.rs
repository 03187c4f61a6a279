//! Native iterators for dicts, sets, and files.
//!
//! Lists, tuples, and strings iterate through the prelude's index-based
//! iterator classes; dict and set iteration is native so it can revalidate
//! against the container's mutation generation on every step.

use crate::heap::HeapId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DictIterKind {
    Keys,
    Values,
    Items,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum NativeIter {
    Dict {
        dict: HeapId,
        kind: DictIterKind,
        index: usize,
        /// Generation of the dict when iteration began.
        version: u64,
    },
    Set {
        set: HeapId,
        index: usize,
        version: u64,
    },
    File {
        file: HeapId,
    },
}

impl NativeIter {
    pub fn trace(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::Dict { dict, .. } => out.push(*dict),
            Self::Set { set, .. } => out.push(*set),
            Self::File { file } => out.push(*file),
        }
    }
}
