// Copyright (c) 2017-2021 Fabian Schuiki

//! Partial redundancy elimination on SSA form.
//!
//! This library provides a small scalar SSA intermediate representation
//! together with the analyses and rewriting passes needed to perform partial
//! redundancy elimination following Chow, Chan, Kennedy, Liu, Lo, and Tu,
//! "A new algorithm for partial redundancy elimination based on SSA form".

pub mod analysis;
pub mod ir;
pub mod opt;
pub mod pass;
pub mod table;
mod ty;
mod value;
pub mod verifier;

pub use crate::{ty::*, value::*};
