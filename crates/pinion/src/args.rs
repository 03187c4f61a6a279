//! Call argument bundles passed to native callables.

use smallvec::SmallVec;

use crate::exception::{ExcType, RunResult};
use crate::intern::StringId;
use crate::value::Value;

/// Positional and keyword arguments of one call.
///
/// Values inside a `CallArgs` are not GC roots by themselves; callers keep
/// the originals reachable (on a frame stack or in the context's temporary
/// root stack) for the duration of the call.
#[derive(Debug, Default)]
pub(crate) struct CallArgs {
    pub pos: SmallVec<[Value; 4]>,
    pub kwargs: Vec<(StringId, Value)>,
}

impl CallArgs {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            pos: values.into_iter().collect(),
            kwargs: Vec::new(),
        }
    }

    pub fn one(value: Value) -> Self {
        Self::positional([value])
    }

    pub fn two(first: Value, second: Value) -> Self {
        Self::positional([first, second])
    }

    pub fn len(&self) -> usize {
        self.pos.len()
    }

    pub fn kwarg(&self, name: StringId) -> Option<Value> {
        self.kwargs
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
    }

    pub fn check_zero_args(&self, name: &str) -> RunResult<()> {
        if self.pos.is_empty() {
            Ok(())
        } else {
            Err(ExcType::type_error(format!(
                "{name}() takes no arguments but {} {} given",
                self.pos.len(),
                if self.pos.len() == 1 { "was" } else { "were" }
            )))
        }
    }

    pub fn get_one_arg(&self, name: &str) -> RunResult<Value> {
        match self.pos.as_slice() {
            [v] => Ok(*v),
            other => Err(ExcType::type_error_arg_count(name, 1, other.len())),
        }
    }

    pub fn get_two_args(&self, name: &str) -> RunResult<(Value, Value)> {
        match self.pos.as_slice() {
            [a, b] => Ok((*a, *b)),
            other => Err(ExcType::type_error_arg_count(name, 2, other.len())),
        }
    }

    pub fn get_one_two_args(&self, name: &str) -> RunResult<(Value, Option<Value>)> {
        match self.pos.as_slice() {
            [a] => Ok((*a, None)),
            [a, b] => Ok((*a, Some(*b))),
            other => Err(ExcType::type_error(format!(
                "{name}() takes 1 or 2 arguments but {} were given",
                other.len()
            ))),
        }
    }

    pub fn get_zero_one_arg(&self, name: &str) -> RunResult<Option<Value>> {
        match self.pos.as_slice() {
            [] => Ok(None),
            [v] => Ok(Some(*v)),
            other => Err(ExcType::type_error(format!(
                "{name}() takes at most 1 argument but {} were given",
                other.len()
            ))),
        }
    }
}
