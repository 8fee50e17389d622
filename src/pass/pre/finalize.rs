// Copyright (c) 2017-2021 Fabian Schuiki

//! Resolution of every occurrence to its dominating available definition.

use super::{Expr, Pre};
use std::collections::HashMap;

impl<'a, 'ctx> Pre<'a, 'ctx> {
    /// Walk the dominator tree and bind every versioned expression to the
    /// available definition of its class and version, recording substitutions
    /// where a dominating definition exists.
    pub(super) fn finalize(&mut self) {
        // Available definition per class and version.
        let mut avail: HashMap<Expr, HashMap<i64, Expr>> = HashMap::new();
        for &pe in &self.pexprs {
            avail.insert(pe, HashMap::new());
        }

        for bb in self.dfs_blocks.clone() {
            for fe in self.block_factors.get(&bb).cloned().unwrap_or_default() {
                let fd = self.exprs.factor(fe);
                if fd.will_be_avail() || fd.any_cycles() || fd.materialized {
                    let pe = fd.pexpr;
                    let version = self.exprs.version(fe);
                    avail.entry(pe).or_default().insert(version, fe);
                }
            }

            for inst in self.func.layout().insts(bb).collect::<Vec<_>>() {
                // Every operand definition is referenced by this instruction.
                for op in self.func.dfg()[inst].args().to_vec() {
                    if let Some(&e) = self.value_to_expr.get(&op) {
                        self.exprs.add_save(e);
                    }
                }

                let ve = self.inst_to_vexpr[&inst];
                if self.exprs.is_ignored(ve) {
                    continue;
                }

                // Restore the substitution after rename. There might be
                // records binding an expression to a factor that is not
                // available in any way; cycled operands stay available, so
                // nothing achieved in rename is lost.
                self.add_substitution(ve, ve);

                // A phi reduced to a single operand forwards that operand.
                if self.func.dfg()[inst].opcode().is_phi()
                    && self.func.dfg()[inst].args().len() == 1
                {
                    let op = self.func.dfg()[inst].args()[0];
                    let op_ve = self.value_to_expr[&op];
                    self.add_substitution_full(ve, op_ve, true, true);
                }

                let pe = self.pexpr_of(ve);
                let version = self.exprs.version(ve);
                let def = avail.entry(pe).or_default().get(&version).cloned();

                // If there was no occurrence before, or it was an operand
                // definition, or it does not strictly dominate this
                // occurrence, this occurrence becomes the available
                // definition. Otherwise it is the same expression of the same
                // version and the substitution is recorded.
                let install = match def {
                    None => true,
                    Some(def) => {
                        self.exprs.is_bottom_or_var_or_const(def)
                            || !self.not_strictly_dominates(def, ve)
                    }
                };
                if install {
                    avail.entry(pe).or_default().insert(version, ve);
                } else {
                    let def = def.unwrap();
                    self.add_substitution(ve, def);
                }
            }
        }
        self.dump_factors("factors after finalize");
    }
}
