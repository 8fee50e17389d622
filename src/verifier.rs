// Copyright (c) 2017-2021 Fabian Schuiki

//! Verification of the structural invariants of the IR.

use crate::{
    analysis::{DominatorTree, PredecessorTable},
    ir::{Function, InstData},
};

/// A verifier of the IR invariants.
///
/// Checks that terminators are placed properly, that phi nodes agree with the
/// predecessors of their block, and that every use is dominated by its
/// definition.
#[derive(Default)]
pub struct Verifier {
    errors: Vec<String>,
}

impl Verifier {
    /// Create a new verifier.
    pub fn new() -> Self {
        Default::default()
    }

    /// Verify the integrity of a function.
    pub fn verify_function(&mut self, func: &Function) {
        if func.layout().first_block().is_none() {
            self.errors.push(format!("{}: no entry block", func.name()));
            return;
        }
        let pt = PredecessorTable::new(func);
        let dt = DominatorTree::new(func, &pt);

        for bb in func.layout().blocks() {
            let mut seen_non_phi = false;
            let term = match func.layout().last_inst(bb) {
                Some(term) if func.dfg()[term].opcode().is_terminator() => term,
                _ => {
                    self.errors
                        .push(format!("{}: missing terminator", bb.dump(func)));
                    continue;
                }
            };

            for inst in func.layout().insts(bb) {
                let data = &func.dfg()[inst];

                // Terminators only in the last position.
                if data.opcode().is_terminator() && inst != term {
                    self.errors.push(format!(
                        "{}: terminator {} not at end of block",
                        bb.dump(func),
                        inst.dump(func)
                    ));
                }

                // Phis grouped at the start of the block, one entry per
                // predecessor edge.
                if data.opcode().is_phi() {
                    if seen_non_phi {
                        self.errors.push(format!(
                            "{}: phi {} after non-phi instruction",
                            bb.dump(func),
                            inst.dump(func)
                        ));
                    }
                    let mut incoming: Vec<_> = data.blocks().to_vec();
                    let mut preds: Vec<_> = pt.pred(bb).collect();
                    incoming.sort();
                    preds.sort();
                    if incoming != preds {
                        self.errors.push(format!(
                            "{}: phi {} does not match predecessors",
                            bb.dump(func),
                            inst.dump(func)
                        ));
                    }
                } else {
                    seen_non_phi = true;
                }

                // No placeholders, and every use dominated by its definition.
                for (idx, &arg) in data.args().iter().enumerate() {
                    if arg == crate::ir::Value::invalid() {
                        self.errors.push(format!(
                            "{}: instruction {} has invalid operand",
                            bb.dump(func),
                            inst.dump(func)
                        ));
                        continue;
                    }
                    if func.dfg()[arg].is_placeholder() {
                        self.errors.push(format!(
                            "{}: instruction {} uses placeholder value",
                            bb.dump(func),
                            inst.dump(func)
                        ));
                        continue;
                    }
                    let dominated = if let InstData::Phi { bbs, .. } = data {
                        let pred = bbs[idx];
                        func.dfg()
                            .get_value_inst(arg)
                            .map(|def| {
                                dt.inst_dominates_inst(func, def, func.layout().terminator(pred))
                            })
                            .unwrap_or(true)
                    } else {
                        dt.value_dominates_inst(func, arg, inst)
                    };
                    if !dominated && dt.is_reachable(bb) {
                        self.errors.push(format!(
                            "{}: use of {} in {} not dominated by its definition",
                            bb.dump(func),
                            arg.dump(func),
                            inst.dump(func)
                        ));
                    }
                }
            }
        }
    }

    /// Finish verification.
    ///
    /// Returns all errors that were encountered.
    pub fn finish(self) -> Result<(), Vec<String>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    /// Finish verification and panic on errors.
    pub fn finish_panic(self) {
        match self.finish() {
            Ok(()) => (),
            Err(errs) => panic!("verification failed:\n{}", errs.join("\n")),
        }
    }
}

/// Verify a function, panicking on the first violation.
pub fn verify(func: &Function) {
    let mut verifier = Verifier::new();
    verifier.verify_function(func);
    verifier.finish_panic();
}
