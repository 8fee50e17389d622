// Copyright (c) 2017-2021 Fabian Schuiki

//! Critical Edge Splitting

use crate::analysis::PredecessorTable;
use crate::ir::prelude::*;
use crate::ir::InstData;
use crate::opt::prelude::*;
use crate::opt::Stats;
use log::debug;

/// Critical Edge Splitting
///
/// This pass splits every critical edge of the control flow graph, i.e. every
/// edge whose source block has multiple successor edges and whose target block
/// has multiple predecessor edges. Passes that insert computations on edges,
/// such as partial redundancy elimination, require this.
pub struct SplitCriticalEdges;

impl Pass for SplitCriticalEdges {
    fn run_on_function(ctx: &PassContext, func: &mut Function) -> bool {
        let pt = PredecessorTable::new(func);

        // Collect the edges to split before mutating the graph.
        let mut splits = Vec::new();
        for bb in func.layout().blocks() {
            let term = match func.layout().last_inst(bb) {
                Some(term) => term,
                None => continue,
            };
            let targets = func.dfg()[term].blocks();
            if targets.len() < 2 {
                continue;
            }
            for (slot, &target) in targets.iter().enumerate() {
                if pt.num_preds(target) > 1 {
                    splits.push((bb, term, slot, target));
                }
            }
        }

        let mut modified = false;
        for (bb, term, slot, target) in splits {
            let mut builder = FunctionBuilder::new(func);
            let mid = builder.block();
            builder.append_to(mid);
            builder.ins().br(target);
            debug!(
                "Split edge {} -> {} through {}",
                bb.dump(func),
                target.dump(func),
                mid.dump(func)
            );

            // Retarget the edge and the corresponding phi entries.
            func.dfg_mut()[term].blocks_mut()[slot] = mid;
            let phis: Vec<_> = func
                .layout()
                .insts(target)
                .take_while(|&inst| func.dfg()[inst].opcode().is_phi())
                .collect();
            for phi in phis {
                if let InstData::Phi { bbs, .. } = &mut func.dfg_mut()[phi] {
                    if let Some(entry) = bbs.iter_mut().find(|entry| **entry == bb) {
                        *entry = mid;
                    }
                }
            }

            Stats::bump(&ctx.stats.edges_split);
            modified = true;
        }
        modified
    }
}
