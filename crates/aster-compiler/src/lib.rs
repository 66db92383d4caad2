#![forbid(unsafe_code)]

//! The Aster middle-end: extended AST, name resolution, type checking,
//! and lowering to the core AST.
//!
//! The parser is an external collaborator: it builds an [`ast::Ast`]
//! arena setting only node kinds, children, and leaf data. The passes
//! here annotate that arena in place (`resolve`, `typecheck`) and then
//! produce the next IR (`lower`). Each pass returns a discriminated
//! result; no pass recovers from its errors.

pub mod ast;
pub mod lower;
pub mod resolve;
pub mod scope;
pub mod stdlib;
pub mod typeck;

pub use ast::{Ast, Identifier, NodeId, NodeKind};
pub use lower::{lower, LowerError};
pub use resolve::{resolve, ResolveError};
pub use stdlib::{install_prelude, ModuleRegistry};
pub use typeck::{typecheck, TypeError};
