// Copyright (c) 2017-2021 Fabian Schuiki

//! Representation of a collection of functions.

use crate::{
    impl_table_indexing,
    ir::{Func, Function},
    table::PrimaryTable,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A module of functions.
#[derive(Default, Serialize, Deserialize)]
pub struct Module {
    /// The functions in the module.
    pub(crate) functions: PrimaryTable<Func, Function>,
}

impl_table_indexing!(Module, functions, Func, Function);

impl Module {
    /// Create a new empty module.
    pub fn new() -> Self {
        Default::default()
    }

    /// Add a function to the module.
    pub fn add_function(&mut self, func: Function) -> Func {
        self.functions.add(func)
    }

    /// Remove a function from the module.
    pub fn remove_function(&mut self, func: Func) {
        self.functions.remove(func)
    }

    /// Return an iterator over the functions in the module.
    pub fn functions<'a>(&'a self) -> impl Iterator<Item = (Func, &'a Function)> + 'a {
        self.functions.iter()
    }

    /// Return an iterator over the mutable functions in the module.
    pub fn functions_mut<'a>(&'a mut self) -> impl Iterator<Item = (Func, &'a mut Function)> + 'a {
        self.functions.iter_mut()
    }

    /// Return a parallel iterator over the mutable functions in the module.
    pub fn par_functions_mut<'a>(
        &'a mut self,
    ) -> impl ParallelIterator<Item = &'a mut Function> + 'a {
        self.functions.storage.par_iter_mut().map(|(_, v)| v)
    }

    /// Locate a function by name.
    pub fn function_by_name(&self, name: &str) -> Option<Func> {
        self.functions
            .iter()
            .find(|(_, f)| f.name() == name)
            .map(|(k, _)| k)
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut sep = false;
        for (_, func) in self.functions() {
            if sep {
                writeln!(f)?;
            }
            writeln!(f, "{}", func)?;
            sep = true;
        }
        Ok(())
    }
}
