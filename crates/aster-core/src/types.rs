//! Structural types shared between the checker and the backend.
//!
//! Types are plain values: `Clone` performs a deep copy and `PartialEq` is
//! deep structural equality. [`Type::Nominal`] wraps a structural type in a
//! named equivalence class; two nominals are equal only when both the name
//! and the wrapped type match, and a nominal never decays to its inner type
//! during comparison.

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An integer primitive width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IntKind {
    I8,
    Ui8,
    I16,
    Ui16,
    I32,
    Ui32,
    I64,
    Ui64,
}

impl IntKind {
    /// Width of the primitive in bits.
    pub fn bits(self) -> u32 {
        match self {
            IntKind::I8 | IntKind::Ui8 => 8,
            IntKind::I16 | IntKind::Ui16 => 16,
            IntKind::I32 | IntKind::Ui32 => 32,
            IntKind::I64 | IntKind::Ui64 => 64,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntKind::I8 | IntKind::I16 | IntKind::I32 | IntKind::I64)
    }

    /// Whether `value` is representable in this width.
    pub fn fits(self, value: i64) -> bool {
        match self {
            IntKind::I8 => i8::try_from(value).is_ok(),
            IntKind::Ui8 => u8::try_from(value).is_ok(),
            IntKind::I16 => i16::try_from(value).is_ok(),
            IntKind::Ui16 => u16::try_from(value).is_ok(),
            IntKind::I32 => i32::try_from(value).is_ok(),
            IntKind::Ui32 => u32::try_from(value).is_ok(),
            IntKind::I64 => true,
            IntKind::Ui64 => value >= 0,
        }
    }
}

impl fmt::Display for IntKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntKind::I8 => "i8",
            IntKind::Ui8 => "ui8",
            IntKind::I16 => "i16",
            IntKind::Ui16 => "ui16",
            IntKind::I32 => "i32",
            IntKind::Ui32 => "ui32",
            IntKind::I64 => "i64",
            IntKind::Ui64 => "ui64",
        };
        write!(f, "std.{name}")
    }
}

/// A fully-elaborated structural type.
///
/// `Unset` is the placeholder carried by every not-yet-typed node; it is
/// equal only to itself and must not survive the type checker on
/// expression nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Type {
    Int(IntKind),
    Str,
    Bool,
    Void,
    Unset,
    /// Positional element tuple.
    Product(Vec<Type>),
    /// Alternative of nominal members.
    Sum(Vec<Type>),
    Function {
        from: Box<Type>,
        to: Box<Type>,
    },
    Array {
        elem: Box<Type>,
        count: usize,
    },
    Reference(Box<Type>),
    /// A named equivalence class wrapping a structural type.
    Nominal {
        name: String,
        inner: Box<Type>,
    },
}

impl Type {
    pub fn function(from: Type, to: Type) -> Type {
        Type::Function {
            from: Box::new(from),
            to: Box::new(to),
        }
    }

    pub fn array(elem: Type, count: usize) -> Type {
        Type::Array {
            elem: Box::new(elem),
            count,
        }
    }

    pub fn nominal(name: impl Into<String>, inner: Type) -> Type {
        Type::Nominal {
            name: name.into(),
            inner: Box::new(inner),
        }
    }

    pub fn int_kind(&self) -> Option<IntKind> {
        match self {
            Type::Int(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Type::Unset)
    }

    /// Number of 64-bit register slots a value of this type occupies.
    ///
    /// Strings and references are single-slot handles. `Void` and `Unset`
    /// occupy no slots.
    pub fn slot_count(&self) -> usize {
        match self {
            Type::Int(_) | Type::Str | Type::Bool | Type::Reference(_) | Type::Function { .. } => 1,
            Type::Void | Type::Unset => 0,
            Type::Product(elems) => elems.iter().map(Type::slot_count).sum(),
            Type::Sum(members) => {
                // Tag slot plus the widest member.
                1 + members.iter().map(Type::slot_count).max().unwrap_or(0)
            }
            Type::Array { elem, count } => elem.slot_count() * count,
            Type::Nominal { inner, .. } => inner.slot_count(),
        }
    }

    /// Register offset of positional element `index` inside a product
    /// (looking through a nominal wrapper), with the element's type.
    pub fn project(&self, index: usize) -> Option<(usize, &Type)> {
        let elems = match self {
            Type::Product(elems) => elems,
            Type::Nominal { inner, .. } => match inner.as_ref() {
                Type::Product(elems) => elems,
                _ => return None,
            },
            _ => return None,
        };
        let elem = elems.get(index)?;
        let offset = elems[..index].iter().map(Type::slot_count).sum();
        Some((offset, elem))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int(kind) => write!(f, "{kind}"),
            Type::Str => write!(f, "std.str"),
            Type::Bool => write!(f, "boolean"),
            Type::Void => write!(f, "void"),
            Type::Unset => write!(f, "unset"),
            Type::Product(elems) => {
                write!(f, "(")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ")")
            }
            Type::Sum(members) => {
                write!(f, "(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, ")")
            }
            Type::Function { from, to } => write!(f, "{from} -> {to}"),
            Type::Array { elem, count } => write!(f, "[{elem}; {count}]"),
            Type::Reference(inner) => write!(f, "&{inner}"),
            Type::Nominal { name, inner } => write!(f, "{name}({inner})"),
        }
    }
}
