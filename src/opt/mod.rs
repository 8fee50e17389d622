// Copyright (c) 2017-2021 Fabian Schuiki

//! Optimization infrastructure.
//!
//! This module implements infrastructure used by the optimization system which
//! operates on the IR.

mod pass;

pub use pass::*;

pub mod prelude {
    pub use super::pass::*;
}
