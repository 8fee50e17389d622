// Copyright (c) 2017-2021 Fabian Schuiki

//! Types of values.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use self::TypeKind::*;

/// An interned type.
pub type Type = Arc<TypeKind>;

/// The different kinds of types.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    /// The `void` type.
    VoidType,
    /// Integer types like `i32`.
    IntType(usize),
}

impl std::fmt::Display for TypeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            VoidType => write!(f, "void"),
            IntType(w) => write!(f, "i{}", w),
        }
    }
}

impl TypeKind {
    /// Check if this is the void type.
    pub fn is_void(&self) -> bool {
        *self == VoidType
    }

    /// Check if this is an integer type.
    pub fn is_int(&self) -> bool {
        match *self {
            IntType(..) => true,
            _ => false,
        }
    }

    /// Unwrap the width of the integer type, or panic.
    pub fn unwrap_int(&self) -> usize {
        match *self {
            IntType(w) => w,
            _ => panic!("unwrap_int called on {}", self),
        }
    }
}

/// Create a void type.
pub fn void_ty() -> Type {
    Type::new(VoidType)
}

/// Create an integer type of the requested width.
pub fn int_ty(width: usize) -> Type {
    Type::new(IntType(width))
}
