// Copyright (c) 2017-2021 Fabian Schuiki

//! Basic block predecessor and successor tables.

use crate::ir::{Block, Function};
use std::collections::HashMap;

/// A table of basic block predecessors.
///
/// Predecessor and successor lists are kept in a fixed, deterministic order:
/// the layout order of the predecessor blocks, and within a terminator the
/// order of its target operands. An edge that occurs multiple times is listed
/// multiple times.
#[derive(Debug, Clone)]
pub struct PredecessorTable {
    pred: HashMap<Block, Vec<Block>>,
    succ: HashMap<Block, Vec<Block>>,
}

impl PredecessorTable {
    /// Compute the predecessor table for a function.
    pub fn new(func: &Function) -> Self {
        let mut pred: HashMap<Block, Vec<Block>> = HashMap::new();
        let mut succ: HashMap<Block, Vec<Block>> = HashMap::new();
        for bb in func.layout().blocks() {
            pred.insert(bb, Vec::new());
        }
        for bb in func.layout().blocks() {
            if let Some(term) = func.layout().last_inst(bb) {
                let targets = func.dfg()[term].blocks().to_vec();
                for &to_bb in &targets {
                    pred.get_mut(&to_bb).unwrap().push(bb);
                }
                succ.insert(bb, targets);
            } else {
                succ.insert(bb, Default::default());
            }
        }
        Self { pred, succ }
    }

    /// Get the predecessors of a block.
    pub fn pred_set(&self, bb: Block) -> &[Block] {
        &self.pred[&bb]
    }

    /// Get the successors of a block.
    pub fn succ_set(&self, bb: Block) -> &[Block] {
        &self.succ[&bb]
    }

    /// Get the predecessors of a block.
    pub fn pred(&self, bb: Block) -> impl Iterator<Item = Block> + Clone + '_ {
        self.pred[&bb].iter().cloned()
    }

    /// Get the successors of a block.
    pub fn succ(&self, bb: Block) -> impl Iterator<Item = Block> + Clone + '_ {
        self.succ[&bb].iter().cloned()
    }

    /// Get the number of predecessor edges of a block.
    pub fn num_preds(&self, bb: Block) -> usize {
        self.pred[&bb].len()
    }

    /// Check if a block is a join point, i.e. has multiple predecessor edges.
    pub fn is_join(&self, bb: Block) -> bool {
        self.num_preds(bb) > 1
    }

    /// Check if a block is the sole predecessor of another block.
    pub fn is_sole_pred(&self, bb: Block, pred_of: Block) -> bool {
        self.pred(pred_of).all(|x| x == bb)
    }

    /// Check if a block is the sole successor of another block.
    pub fn is_sole_succ(&self, bb: Block, succ_of: Block) -> bool {
        self.succ(succ_of).all(|x| x == bb)
    }
}
