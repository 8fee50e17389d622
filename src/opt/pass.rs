// Copyright (c) 2017-2021 Fabian Schuiki

use crate::ir::prelude::*;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An optimization pass.
///
/// The optimization infrastructure will always call `run_on_module()`.
/// However, implementors of the trait should override the function at their
/// desired level of granularity. The `Pass` trait provides a sane default for
/// all `run_*()` functions.
pub trait Pass {
    /// Run this pass on an entire module.
    fn run_on_module(ctx: &PassContext, module: &mut Module) -> bool {
        module
            .par_functions_mut()
            .map(|func| Self::run_on_function(ctx, func))
            .reduce(|| false, |a, b| a || b)
    }

    /// Run this pass on an entire function.
    fn run_on_function(ctx: &PassContext, func: &mut Function) -> bool {
        let mut modified = false;
        let insts: Vec<_> = func
            .layout()
            .blocks()
            .flat_map(|bb| func.layout().insts(bb))
            .collect();
        let mut builder = FunctionBuilder::new(func);
        for inst in insts {
            modified |= Self::run_on_inst(ctx, inst, &mut builder);
        }
        modified
    }

    /// Run this pass on an instruction.
    #[allow(unused_variables)]
    fn run_on_inst(ctx: &PassContext, inst: Inst, builder: &mut FunctionBuilder) -> bool {
        false
    }
}

/// Additional context and configuration for optimizations.
#[derive(Default)]
pub struct PassContext {
    /// Statistics collected while the passes run.
    pub stats: Stats,
}

impl PassContext {
    /// Create a new pass context.
    pub fn new() -> Self {
        Default::default()
    }
}

/// Statistics counters maintained by the passes.
///
/// The counters are atomic such that a parallel module pass can bump them
/// without further coordination.
#[derive(Default)]
pub struct Stats {
    /// Number of instructions substituted.
    pub insts_substituted: AtomicUsize,
    /// Number of instructions inserted.
    pub insts_inserted: AtomicUsize,
    /// Number of instructions deleted.
    pub insts_killed: AtomicUsize,
    /// Number of phi nodes inserted.
    pub phis_inserted: AtomicUsize,
    /// Number of phi nodes deleted.
    pub phis_killed: AtomicUsize,
    /// Number of critical edges split.
    pub edges_split: AtomicUsize,
}

impl Stats {
    /// Bump a counter by one.
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter.
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }
}
