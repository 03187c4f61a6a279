//! Exception kinds, runtime errors, and traceback plumbing.
//!
//! Failures exist on two layers. Inside the pipeline everything is a
//! [`RunError`] threaded through `RunResult<T>`: either a cheap
//! native raise (exception kind plus message, no heap traffic) or a raised
//! exception object living on the heap. At the embedding boundary a
//! `RunError` is rendered into the public [`Exception`] together with the
//! trace frames collected while it unwound.

use std::fmt::{self, Write};
use std::rc::Rc;

use strum::{Display, EnumString, IntoStaticStr};

use crate::value::Value;

/// Result type alias for operations that can produce a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// A source position as (0-based) line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePos {
    pub line: u32,
    pub col: u32,
}

impl SourcePos {
    pub(crate) fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

/// A lex or parse failure: one message with the position it occurred at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CodeError {
    pub message: String,
    pub pos: SourcePos,
}

impl CodeError {
    pub fn new(message: impl Into<String>, pos: SourcePos) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

/// Exception kinds raised natively by the interpreter.
///
/// The string representation matches the class name exactly, so
/// `ExcType::TypeError.to_string() == "TypeError"`. Script-defined
/// exception classes are not represented here; they are ordinary class
/// objects deriving from the prelude's `BaseException`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ExcType {
    BaseException,
    SystemExit,
    Exception,
    StopIteration,
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,
    AttributeError,
    ImportError,
    LookupError,
    IndexError,
    KeyError,
    MemoryError,
    NameError,
    OSError,
    RuntimeError,
    NotImplementedError,
    RecursionError,
    SyntaxError,
    TypeError,
    ValueError,
}

impl ExcType {
    /// The direct base class in the builtin exception hierarchy.
    ///
    /// `BaseException` is the root and has no base.
    pub fn base(self) -> Option<Self> {
        match self {
            Self::BaseException => None,
            Self::SystemExit | Self::Exception => Some(Self::BaseException),
            Self::OverflowError | Self::ZeroDivisionError => Some(Self::ArithmeticError),
            Self::IndexError | Self::KeyError => Some(Self::LookupError),
            Self::NotImplementedError | Self::RecursionError => Some(Self::RuntimeError),
            _ => Some(Self::Exception),
        }
    }

    /// Whether `except handler:` with this handler kind catches `self`.
    pub fn is_subclass_of(self, handler: Self) -> bool {
        let mut cur = Some(self);
        while let Some(t) = cur {
            if t == handler {
                return true;
            }
            cur = t.base();
        }
        false
    }

    /// All kinds, in hierarchy bootstrap order.
    pub(crate) fn all() -> &'static [Self] {
        &[
            Self::BaseException,
            Self::SystemExit,
            Self::Exception,
            Self::StopIteration,
            Self::ArithmeticError,
            Self::OverflowError,
            Self::ZeroDivisionError,
            Self::AttributeError,
            Self::ImportError,
            Self::LookupError,
            Self::IndexError,
            Self::KeyError,
            Self::MemoryError,
            Self::NameError,
            Self::OSError,
            Self::RuntimeError,
            Self::NotImplementedError,
            Self::RecursionError,
            Self::SyntaxError,
            Self::TypeError,
            Self::ValueError,
        ]
    }

    pub(crate) fn type_error(msg: impl fmt::Display) -> RunError {
        RunError::simple(Self::TypeError, msg.to_string())
    }

    pub(crate) fn type_error_unsupported_operand(op: &str, lhs: &str, rhs: &str) -> RunError {
        Self::type_error(format!(
            "unsupported operand type(s) for {op}: '{lhs}' and '{rhs}'"
        ))
    }

    pub(crate) fn type_error_not_callable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    pub(crate) fn type_error_not_iterable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not iterable"))
    }

    pub(crate) fn type_error_unhashable(type_name: &str) -> RunError {
        Self::type_error(format!("unhashable type: '{type_name}'"))
    }

    pub(crate) fn type_error_not_subscriptable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not subscriptable"))
    }

    pub(crate) fn attribute_error(type_name: impl fmt::Display, attr: &str) -> RunError {
        RunError::simple(
            Self::AttributeError,
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
    }

    pub(crate) fn name_error(name: &str) -> RunError {
        RunError::simple(Self::NameError, format!("name '{name}' is not defined"))
    }

    pub(crate) fn value_error(msg: impl fmt::Display) -> RunError {
        RunError::simple(Self::ValueError, msg.to_string())
    }

    pub(crate) fn index_error(msg: &str) -> RunError {
        RunError::simple(Self::IndexError, msg.to_string())
    }

    pub(crate) fn key_error(key_repr: String) -> RunError {
        RunError::simple(Self::KeyError, key_repr)
    }

    pub(crate) fn zero_division_error(msg: &str) -> RunError {
        RunError::simple(Self::ZeroDivisionError, msg.to_string())
    }

    pub(crate) fn runtime_error(msg: impl fmt::Display) -> RunError {
        RunError::simple(Self::RuntimeError, msg.to_string())
    }

    pub(crate) fn import_error(msg: impl fmt::Display) -> RunError {
        RunError::simple(Self::ImportError, msg.to_string())
    }

    pub(crate) fn os_error(msg: impl fmt::Display) -> RunError {
        RunError::simple(Self::OSError, msg.to_string())
    }

    pub(crate) fn recursion_error() -> RunError {
        RunError::simple(Self::RecursionError, "maximum recursion depth exceeded".to_string())
    }

    pub(crate) fn stop_iteration() -> RunError {
        RunError {
            exc: Box::new(RaisedException {
                payload: ExcPayload::Simple {
                    exc_type: Self::StopIteration,
                    message: None,
                },
                frames: Vec::new(),
            }),
        }
    }

    pub(crate) fn type_error_arg_count(name: &str, expected: usize, actual: usize) -> RunError {
        Self::type_error(format!(
            "{name}() takes {expected} argument(s) but {actual} {} given",
            if actual == 1 { "was" } else { "were" }
        ))
    }
}

/// One frame of traceback state, captured when an exception unwinds
/// through a script-level call.
#[derive(Debug, Clone)]
pub(crate) struct TraceFrame {
    pub pos: SourcePos,
    /// Snapshot of the offending source line, if available.
    pub line_text: Option<Box<str>>,
    pub module: Rc<str>,
    pub function: Rc<str>,
    pub syntax_error: bool,
}

/// What is propagating: a native raise or a raised exception object.
#[derive(Debug, Clone)]
pub(crate) enum ExcPayload {
    /// A native raise: kind plus optional message, not yet materialized as
    /// an object. Materialized only when bound by an `except ... as` clause
    /// or surfaced to the host.
    Simple {
        exc_type: ExcType,
        message: Option<String>,
    },
    /// A raised exception instance on the heap.
    Object(Value),
}

/// A propagating exception together with the trace frames collected so far.
///
/// Frames are appended innermost-first while the error unwinds through
/// activations, matching the context trace at raise time.
#[derive(Debug, Clone)]
pub(crate) struct RaisedException {
    pub payload: ExcPayload,
    pub frames: Vec<TraceFrame>,
}

/// Internal runtime error carried through `RunResult`.
#[derive(Debug, Clone)]
pub(crate) struct RunError {
    pub exc: Box<RaisedException>,
}

impl RunError {
    pub fn simple(exc_type: ExcType, message: String) -> Self {
        Self {
            exc: Box::new(RaisedException {
                payload: ExcPayload::Simple {
                    exc_type,
                    message: Some(message),
                },
                frames: Vec::new(),
            }),
        }
    }

    pub fn object(value: Value) -> Self {
        Self {
            exc: Box::new(RaisedException {
                payload: ExcPayload::Object(value),
                frames: Vec::new(),
            }),
        }
    }

    pub fn push_frame(&mut self, frame: TraceFrame) {
        self.exc.frames.push(frame);
    }

    /// The builtin kind if this is a native raise.
    pub fn simple_type(&self) -> Option<ExcType> {
        match &self.exc.payload {
            ExcPayload::Simple { exc_type, .. } => Some(*exc_type),
            ExcPayload::Object(_) => None,
        }
    }
}

/// One rendered traceback frame of a public [`Exception`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// 1-based source line.
    pub line: u32,
    pub column: u32,
    pub module: String,
    pub function: String,
    /// The source line text, stripped of indentation.
    pub line_text: Option<String>,
    pub is_syntax: bool,
}

/// A failure surfaced to the embedder.
///
/// Carries the exception class name, the builtin kind when the class is one
/// of the builtin exception types, the message, and the traceback. Use
/// [`Exception::is_system_exit`] to distinguish a script calling `exit()`
/// from an ordinary error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    type_name: String,
    kind: Option<ExcType>,
    message: Option<String>,
    frames: Vec<StackFrame>,
}

impl Exception {
    pub(crate) fn new(
        type_name: String,
        kind: Option<ExcType>,
        message: Option<String>,
        frames: Vec<StackFrame>,
    ) -> Self {
        Self {
            type_name,
            kind,
            message,
            frames,
        }
    }

    /// The exception class name, e.g. `"TypeError"`.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The builtin exception kind, if the class is a builtin one.
    #[must_use]
    pub fn kind(&self) -> Option<ExcType> {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Traceback frames, outermost call first.
    #[must_use]
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Whether this is a `SystemExit` unwinding to the host.
    #[must_use]
    pub fn is_system_exit(&self) -> bool {
        self.kind == Some(ExcType::SystemExit)
    }

    /// Renders the full traceback in the interpreter's standard format.
    #[must_use]
    pub fn traceback(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in &self.frames {
            // Prelude internals are hidden from user tracebacks.
            if frame.module == "__builtins__" {
                continue;
            }
            let _ = write!(out, "  Module {}, Line {}", frame.module, frame.line);
            if frame.function != "<module>" {
                let _ = write!(out, ", Function {}()", frame.function);
            }
            out.push('\n');
            if let Some(text) = &frame.line_text {
                let _ = writeln!(out, "    {}", text.trim());
            }
        }
        out.push_str(&self.type_name);
        if let Some(msg) = &self.message {
            if !msg.is_empty() {
                let _ = write!(out, ": {msg}");
            }
        }
        out.push('\n');
        out
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name)?;
        if let Some(msg) = &self.message {
            if !msg.is_empty() {
                write!(f, ": {msg}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy() {
        assert!(ExcType::KeyError.is_subclass_of(ExcType::LookupError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::BaseException));
        assert!(!ExcType::KeyError.is_subclass_of(ExcType::IndexError));
        assert!(ExcType::SystemExit.is_subclass_of(ExcType::BaseException));
        assert!(!ExcType::SystemExit.is_subclass_of(ExcType::Exception));
        assert!(ExcType::RecursionError.is_subclass_of(ExcType::RuntimeError));
    }

    #[test]
    fn names_round_trip() {
        assert_eq!(ExcType::ZeroDivisionError.to_string(), "ZeroDivisionError");
        assert_eq!("ValueError".parse::<ExcType>().unwrap(), ExcType::ValueError);
    }
}
