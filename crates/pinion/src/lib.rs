//! An embeddable interpreter for a dynamically typed,
//! indentation-structured, object-oriented scripting language.
//!
//! The pipeline is lexer → parser/desugarer → bytecode compiler → stack
//! interpreter, over a tagged value model with copy-on-write attribute
//! tables and a tracing mark-sweep collector. Everything is per-context;
//! the only process-wide state is the error-callback registration.
//!
//! ```
//! use pinion::{CollectStringPrint, Config, Context};
//!
//! let print = CollectStringPrint::new();
//! let output = print.handle();
//! let mut ctx = Context::new(Config {
//!     print: Box::new(print),
//!     ..Config::default()
//! })
//! .unwrap();
//! let program = ctx.compile("print(6 * 7)", "__main__").unwrap();
//! ctx.invoke(program, &[], &[]).unwrap();
//! assert_eq!(output.borrow().as_str(), "42\n");
//! ```

use std::sync::Mutex;

mod args;
mod attrs;
mod builtins;
mod bytecode;
mod context;
mod exception;
mod expressions;
mod function;
mod heap;
mod intern;
mod io;
mod lexer;
mod modules;
mod object;
mod parse;
mod types;
mod value;

pub use crate::context::{Config, Context, ModuleLoader, ValueRef, DEFAULT_MAX_RECURSION};
pub use crate::exception::{ExcType, Exception, SourcePos, StackFrame};
pub use crate::heap::DEFAULT_GC_RUN_FACTOR;
pub use crate::io::{CollectStringPrint, PrintWriter, StdPrint};
pub use crate::object::Object;

/// Process-wide sink for host programmer-error diagnostics, guarded by a
/// mutex; this is the only state shared between contexts.
static ERROR_CALLBACK: Mutex<Option<Box<dyn Fn(&str) + Send>>> = Mutex::new(None);

/// Registers a callback receiving out-of-band diagnostics about invalid
/// host API usage.
pub fn set_error_callback(callback: impl Fn(&str) + Send + 'static) {
    if let Ok(mut slot) = ERROR_CALLBACK.lock() {
        *slot = Some(Box::new(callback));
    }
}

/// Clears the process-wide error callback.
pub fn clear_error_callback() {
    if let Ok(mut slot) = ERROR_CALLBACK.lock() {
        *slot = None;
    }
}

pub(crate) fn report_host_error(message: &str) {
    if let Ok(slot) = ERROR_CALLBACK.lock() {
        if let Some(callback) = slot.as_ref() {
            callback(message);
        }
    }
}
