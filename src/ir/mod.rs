// Copyright (c) 2017-2021 Fabian Schuiki

//! Representation of functions in SSA form.
//!
//! This module implements the intermediate representation around which the
//! rest of the library is built: a function is a control flow graph of basic
//! blocks, each holding a list of instructions in SSA form.

use crate::{impl_table_key, ty::Type};
use serde::{Deserialize, Serialize};

mod cfg;
mod dfg;
mod function;
mod inst;
mod layout;
mod module;
pub mod prelude;
mod sig;

pub use self::cfg::*;
pub use self::dfg::*;
pub use self::function::*;
pub use self::inst::*;
pub use self::layout::*;
pub use self::module::*;
pub use self::sig::*;

impl_table_key! {
    /// An instruction.
    struct Inst(u32) as "i";

    /// A value.
    struct Value(u32) as "v";

    /// A basic block.
    struct Block(u32) as "bb";

    /// An argument of a `Function`.
    struct Arg(u32) as "arg";

    /// A function in a `Module`.
    struct Func(u32) as "func";
}

impl Value {
    /// A placeholder for invalid values.
    ///
    /// This is used for unused instruction arguments.
    pub(crate) fn invalid() -> Self {
        <Self as crate::table::TableKey>::invalid()
    }
}

/// Internal table storage for values.
#[derive(Debug, Serialize, Deserialize)]
pub enum ValueData {
    /// The value is the result of an instruction.
    Inst { ty: Type, inst: Inst },
    /// The value is an argument of the `Function`.
    Arg { ty: Type, arg: Arg },
    /// The value is a placeholder. Used during PHI node construction.
    Placeholder { ty: Type },
}

impl ValueData {
    /// Check whether the value is a placeholder.
    pub fn is_placeholder(&self) -> bool {
        match self {
            ValueData::Placeholder { .. } => true,
            _ => false,
        }
    }
}

/// Internal table storage for basic blocks.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BlockData {
    /// The name of the block.
    pub name: Option<String>,
}
