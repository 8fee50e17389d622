// Copyright (c) 2017-2021 Fabian Schuiki

//! Representation of the arguments and return type of a function.

use crate::{table::PrimaryTable, ir::Arg, ty::Type};
use serde::{Deserialize, Serialize};

/// A description of the arguments and return type of a function.
#[derive(Default, Clone, Serialize, Deserialize)]
pub struct Signature {
    args: PrimaryTable<Arg, ArgData>,
    order: Vec<Arg>,
    retty: Option<Type>,
}

/// A single argument of a `Function`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ArgData {
    ty: Type,
    num: u16,
}

impl Signature {
    /// Create a new signature.
    pub fn new() -> Self {
        Default::default()
    }

    /// Add an input argument.
    pub fn add_input(&mut self, ty: Type) -> Arg {
        let arg = self.args.add(ArgData {
            ty,
            num: self.order.len() as u16,
        });
        self.order.push(arg);
        arg
    }

    /// Set the return type of the signature.
    pub fn set_return_type(&mut self, ty: Type) {
        self.retty = Some(ty);
    }

    /// Get the return type of the signature.
    pub fn return_type(&self) -> Type {
        self.retty.clone().unwrap()
    }

    /// Check whether the signature has a return type.
    pub fn has_return_type(&self) -> bool {
        self.retty
            .as_ref()
            .map(|ty| !ty.is_void())
            .unwrap_or(false)
    }

    /// Return an iterator over the arguments of the signature.
    pub fn args<'a>(&'a self) -> impl Iterator<Item = Arg> + 'a {
        self.order.iter().cloned()
    }

    /// Get the number of arguments in the signature.
    pub fn num_args(&self) -> usize {
        self.order.len()
    }

    /// Get the type of an argument.
    pub fn arg_type(&self, arg: Arg) -> Type {
        self.args[arg].ty.clone()
    }

    /// Get the position of an argument.
    pub fn arg_num(&self, arg: Arg) -> usize {
        self.args[arg].num as usize
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "(")?;
        let mut comma = false;
        for arg in self.args() {
            if comma {
                write!(f, ", ")?;
            }
            write!(f, "{}", self.arg_type(arg))?;
            comma = true;
        }
        write!(f, ")")?;
        if let Some(ref retty) = self.retty {
            write!(f, " {}", retty)?;
        }
        Ok(())
    }
}
