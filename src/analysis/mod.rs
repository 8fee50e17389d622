// Copyright (c) 2017-2021 Fabian Schuiki

//! Analyses of the intermediate representation.

mod domtree;
mod preds;

pub use self::domtree::*;
pub use self::preds::*;
