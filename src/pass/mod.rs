// Copyright (c) 2017-2021 Fabian Schuiki

//! Optimization and analysis passes on the IR.
//!
//! This module implements various passes that analyze or mutate the
//! intermediate representation.

pub mod pre;
pub mod simplify;
pub mod split_edges;

pub use pre::PartialRedundancyElim;
pub use split_edges::SplitCriticalEdges;
