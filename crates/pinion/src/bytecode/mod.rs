//! Bytecode representation, compiler, and virtual machine.
//!
//! The compiler walks the AST and produces a flat instruction vector per
//! function; the VM executes it against a value stack with a try-frame
//! stack for exception routing.

pub(crate) mod builder;
pub(crate) mod code;
pub(crate) mod compiler;
pub(crate) mod op;
pub(crate) mod vm;

pub(crate) use code::{Code, Const, FuncDef};
pub(crate) use op::Instr;
