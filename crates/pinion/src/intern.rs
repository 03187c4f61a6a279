//! String interning for identifiers and attribute names.
//!
//! Attribute tables, global scopes, and the compiler all key their maps by
//! `StringId` rather than owned strings. The well-known names the runtime
//! dispatches on (`__add__`, `__iter__`, ...) are pre-interned via [`Sym`]
//! so they can be referenced as constants without a table lookup.

use ahash::AHashMap;
use strum::IntoEnumIterator;

/// Identifier for an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct StringId(u32);

impl StringId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Well-known names used by the interpreter itself.
///
/// These are interned first, in declaration order, so that
/// `Sym::id()` can map a variant to its `StringId` without touching the
/// intern table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumIter, strum::IntoStaticStr)]
pub(crate) enum Sym {
    #[strum(serialize = "__init__")]
    Init,
    #[strum(serialize = "__iter__")]
    Iter,
    #[strum(serialize = "__next__")]
    Next,
    #[strum(serialize = "__add__")]
    Add,
    #[strum(serialize = "__sub__")]
    Sub,
    #[strum(serialize = "__mul__")]
    Mul,
    #[strum(serialize = "__truediv__")]
    TrueDiv,
    #[strum(serialize = "__floordiv__")]
    FloorDiv,
    #[strum(serialize = "__mod__")]
    Mod,
    #[strum(serialize = "__pow__")]
    Pow,
    #[strum(serialize = "__and__")]
    BitAnd,
    #[strum(serialize = "__or__")]
    BitOr,
    #[strum(serialize = "__xor__")]
    BitXor,
    #[strum(serialize = "__lshift__")]
    Shl,
    #[strum(serialize = "__rshift__")]
    Shr,
    #[strum(serialize = "__neg__")]
    Neg,
    #[strum(serialize = "__pos__")]
    Pos,
    #[strum(serialize = "__invert__")]
    Invert,
    #[strum(serialize = "__eq__")]
    Eq,
    #[strum(serialize = "__ne__")]
    Ne,
    #[strum(serialize = "__lt__")]
    Lt,
    #[strum(serialize = "__le__")]
    Le,
    #[strum(serialize = "__gt__")]
    Gt,
    #[strum(serialize = "__ge__")]
    Ge,
    #[strum(serialize = "__contains__")]
    Contains,
    #[strum(serialize = "__getitem__")]
    GetItem,
    #[strum(serialize = "__setitem__")]
    SetItem,
    #[strum(serialize = "__delitem__")]
    DelItem,
    #[strum(serialize = "__bool__")]
    Bool,
    #[strum(serialize = "__nonzero__")]
    Nonzero,
    #[strum(serialize = "__hash__")]
    Hash,
    #[strum(serialize = "__str__")]
    Str,
    #[strum(serialize = "__repr__")]
    Repr,
    #[strum(serialize = "__len__")]
    Len,
    #[strum(serialize = "__call__")]
    Call,
    #[strum(serialize = "__enter__")]
    Enter,
    #[strum(serialize = "__exit__")]
    Exit,
    #[strum(serialize = "__index__")]
    Index,
    #[strum(serialize = "__abs__")]
    Abs,
    #[strum(serialize = "__reversed__")]
    Reversed,
    #[strum(serialize = "__class__")]
    Class,
    #[strum(serialize = "__bases__")]
    Bases,
    #[strum(serialize = "__name__")]
    Name,
    #[strum(serialize = "_message")]
    Message,
    #[strum(serialize = "start")]
    Start,
    #[strum(serialize = "stop")]
    Stop,
    #[strum(serialize = "step")]
    Step,
    #[strum(serialize = "sep")]
    Sep,
    #[strum(serialize = "end")]
    End,
    #[strum(serialize = "key")]
    Key,
    #[strum(serialize = "reverse")]
    Reverse,
    #[strum(serialize = "default")]
    Default,
}

impl Sym {
    /// The `StringId` this symbol was pre-interned under.
    pub fn id(self) -> StringId {
        StringId(self as u32)
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Intern table mapping strings to stable ids.
///
/// Ids are never reused; the table only grows. One table is owned per
/// context and shared by the compiler and the runtime.
#[derive(Debug)]
pub(crate) struct Interns {
    map: AHashMap<Box<str>, StringId>,
    strings: Vec<Box<str>>,
}

impl Interns {
    pub fn new() -> Self {
        let mut interns = Self {
            map: AHashMap::new(),
            strings: Vec::new(),
        };
        for sym in Sym::iter() {
            let id = interns.intern(sym.as_str());
            debug_assert_eq!(id, sym.id());
        }
        interns
    }

    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(id) = self.map.get(s) {
            return *id;
        }
        let id = StringId(u32::try_from(self.strings.len()).expect("intern table overflow"));
        self.strings.push(s.into());
        self.map.insert(s.into(), id);
        id
    }

    /// Looks up a string without interning it.
    pub fn lookup(&self, s: &str) -> Option<StringId> {
        self.map.get(s).copied()
    }

    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sym_ids_match_preinterned_strings() {
        let interns = Interns::new();
        assert_eq!(interns.get(Sym::Add.id()), "__add__");
        assert_eq!(interns.get(Sym::Message.id()), "_message");
        assert_eq!(interns.lookup("__iter__"), Some(Sym::Iter.id()));
    }

    #[test]
    fn intern_is_stable() {
        let mut interns = Interns::new();
        let a = interns.intern("spam");
        let b = interns.intern("spam");
        assert_eq!(a, b);
        assert_eq!(interns.get(a), "spam");
        let c = interns.intern("eggs");
        assert_ne!(a, c);
    }
}
