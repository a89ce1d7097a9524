//! Restricted execution for generated tools.
//!
//! Tools created at runtime are written in "toolscript", a small
//! Python-like language. This crate parses it into an AST, runs it in a
//! tree-walking interpreter that exposes only an allowlisted set of builtins
//! and modules, and enforces per-call resource budgets.
//!
//! ```text
//! source ──► pest grammar ──► AST builders ──► Module ──┬──► analysis (CodeFacts)
//!                                                       └──► Sandbox::load ──► SandboxedFunction::call
//!                                                                               │
//!                                                  fresh Interpreter + Budget ◄─┘
//!                                                  (operations, wall time, memory, depth)
//! ```
//!
//! Nothing the interpreter runs can reach the filesystem, the network,
//! processes or the host environment: there are no builtins for it.

pub mod analysis;
pub mod ast;
mod builtins;
pub mod error;
mod format;
mod interpreter;
pub mod limits;
mod ops;
pub mod parser;
pub mod program;
pub mod value;

pub use analysis::{CodeFacts, analyze, cyclomatic_complexity};
pub use ast::{FunctionDef, Module};
pub use error::{SandboxError, SandboxResult};
pub use limits::ResourceLimits;
pub use parser::parse;
pub use program::{Sandbox, SandboxedFunction};
