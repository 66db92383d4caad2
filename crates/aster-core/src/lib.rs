#![forbid(unsafe_code)]
#![cfg_attr(not(feature = "std"), no_std)]

//! Aster core AST: the lowered IR between the typed extended AST and the
//! bytecode generator.
//!
//! The core AST keeps only what code generation needs: blocks with
//! results, assignment-as-store, explicit labels and jumps for control
//! flow, calls by fully-qualified name, and type annotations where layout
//! or width matters. Identifiers are already resolved to
//! `(scope_distance, offsets)` access patterns; the variable name is
//! preserved only for diagnostics.

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod types;

pub use types::{IntKind, Type};

/// A VM-provided native operation that a prelude function binds to.
/// Native chunks carry one of these instead of bytecode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NativeOp {
    Print,
    Println,
}

/// A control-flow label, unique within one function body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Label(pub u32);

/// A resolved variable access: ascend `distance` scopes, then apply the
/// positional `offsets` through product layouts.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Access {
    pub distance: u32,
    pub offsets: Vec<u32>,
}

impl Access {
    pub fn local() -> Access {
        Access {
            distance: 0,
            offsets: Vec::new(),
        }
    }
}

/// A lowered module: metadata plus its hoisted functions.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Module {
    /// Declared module path, if the unit carried a module declaration.
    pub name: Option<Vec<String>>,
    /// Imported module paths, in declaration order.
    pub imports: Vec<Vec<String>>,
    /// Functions in lowering order; the entry function comes first.
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// A function after hoisting, addressable by fully-qualified dotted name.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Function {
    pub name: String,
    /// Formal parameter tuple, in declaration order.
    pub params: Vec<Param>,
    pub ret: Type,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

/// A block: statements followed by an optional result expression.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub result: Option<Box<Expr>>,
}

/// A lowered statement.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Stmt {
    /// Reserve storage for a named binding in the current scope.
    Declare { name: String, ty: Type },
    /// Store a value into an already-declared binding.
    Set {
        target: Access,
        name: String,
        value: Expr,
    },
    /// Evaluate `cond`; jump to `on_zero` when it is zero.
    Branch { cond: Expr, on_zero: Label },
    Jump(Label),
    /// Definition point of a label.
    Mark(Label),
    /// Evaluate for effect, discarding the value.
    Eval(Expr),
}

/// A lowered expression. Every expression carries enough type information
/// for the generator to lay out registers without re-deriving types.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Expr {
    Block(Block),
    Var {
        access: Access,
        name: String,
        ty: Type,
    },
    Lit(Lit),
    Binary {
        op: BinOp,
        /// Operand width; comparisons still produce a boolean.
        kind: IntKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        /// Fully-qualified dotted callee name.
        callee: String,
        arg: Box<Expr>,
        arg_ty: Type,
        ret_ty: Type,
    },
    Tuple {
        items: Vec<Expr>,
        ty: Type,
    },
    ArrayValue {
        items: Vec<Expr>,
        elem_ty: Type,
    },
    /// Constant-index projection out of an array value.
    ArrayIndex {
        base: Box<Expr>,
        index: u32,
        elem_ty: Type,
    },
    /// `&e`: a pointer-width, single-slot view of the evaluated operand.
    Reference { inner: Box<Expr> },
}

impl Expr {
    /// The elaborated type of this expression.
    pub fn ty(&self) -> Type {
        match self {
            Expr::Block(block) => block
                .result
                .as_ref()
                .map(|r| r.ty())
                .unwrap_or(Type::Void),
            Expr::Var { ty, .. } => ty.clone(),
            Expr::Lit(lit) => lit.ty(),
            Expr::Binary { op, kind, .. } => {
                if op.is_comparison() {
                    Type::Bool
                } else {
                    Type::Int(*kind)
                }
            }
            Expr::Call { ret_ty, .. } => ret_ty.clone(),
            Expr::Tuple { ty, .. } => ty.clone(),
            Expr::ArrayValue { items, elem_ty } => Type::array(elem_ty.clone(), items.len()),
            Expr::ArrayIndex { elem_ty, .. } => elem_ty.clone(),
            Expr::Reference { inner } => Type::Reference(Box::new(inner.ty())),
        }
    }
}

/// A literal load.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Lit {
    Int { value: i64, kind: IntKind },
    Str(String),
    Bool(bool),
}

impl Lit {
    pub fn ty(&self) -> Type {
        match self {
            Lit::Int { kind, .. } => Type::Int(*kind),
            Lit::Str(_) => Type::Str,
            Lit::Bool(_) => Type::Bool,
        }
    }
}

/// A primitive binary operator on same-width integer operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Gt | BinOp::Gte | BinOp::Lt | BinOp::Lte
        )
    }
}
