// Copyright (c) 2017-2021 Fabian Schuiki

//! Factor insertion.
//!
//! Factors come into existence in two ways: phis that the accurate token
//! solver proves to merge occurrences of one class become materialized
//! factors, and every class gets non-materialized factors on the iterated
//! dominance frontier of its defining blocks.

use super::solver::{SolverMode, TokenSolver};
use super::{Expr, Pre};
use log::trace;

impl<'a, 'ctx> Pre<'a, 'ctx> {
    pub(super) fn insert_factors(&mut self) {
        self.insert_factors_materialized();
        self.dump_factors("factors after materialized insertion");

        self.insert_factors_regular();
        self.dump_factors("factors after regular insertion");
    }

    fn insert_factors_materialized(&mut self) {
        let mut solver = TokenSolver::new(SolverMode::Accurate);
        solver.solve(self);

        // Process the proven-to-be materialized factor phis.
        for (phi, fe) in solver.live_factors() {
            let token = solver.token_for(phi);
            if token == Expr::top() || token == Expr::bottom() || self.exprs.is_ignored(token) {
                continue;
            }
            let block = self.func.layout().inst_block(phi).unwrap();

            // Wire up the already known expression versions.
            let data = &self.func.dfg()[phi];
            let entries: Vec<_> = data
                .args()
                .iter()
                .cloned()
                .zip(data.blocks().iter().cloned())
                .collect();
            for (op, pred) in entries {
                // An edge from an unreachable block contributed a bottom; it
                // better agree with what flows in.
                if let Some(oo) = self.exprs.factor(fe).operand_for_pred(pred) {
                    if self.value_to_expr.get(&op) != Some(&oo) {
                        panic!("conflicting values along multiple edges into a factored phi");
                    }
                }

                let op_phi = self
                    .func
                    .dfg()
                    .get_value_inst(op)
                    .filter(|&i| self.func.dfg()[i].opcode().is_phi());
                let operand = if let Some(op_phi) = op_phi {
                    if solver.has_factor_for(op_phi) {
                        // The phi is a back-branched factor.
                        solver.factor_for(op_phi)
                    } else if let Some(&other) = self.phi_to_factor.get(&op_phi) {
                        // Or it was already processed.
                        other
                    } else {
                        // If none of the above, use the phi expression.
                        self.value_to_expr
                            .get(&op)
                            .cloned()
                            .unwrap_or(Expr::bottom())
                    }
                } else {
                    self.value_to_expr
                        .get(&op)
                        .cloned()
                        .unwrap_or(Expr::bottom())
                };
                self.exprs.factor_mut(fe).set_operand_for_pred(pred, operand);
            }

            trace!("materializing factor {} for phi {}", fe, phi);
            self.add_factor(fe, token, block);
            self.materialize_factor(fe, phi);
        }
    }

    fn insert_factors_regular(&mut self) {
        // Each occurrence's dominance frontier requires a factor, which is
        // much like a phi but for expressions.
        for pe in self.pexprs.clone() {
            if self.exprs.is_ignored(pe) || self.exprs.is_phi(pe) {
                continue;
            }
            let defs = match self.pexpr_blocks.get(&pe) {
                Some(blocks) => blocks.clone(),
                None => continue,
            };
            let idf = self.dt.iterated_dominance_frontier(&self.pt, defs);

            for block in idf {
                // A non-materialized factor for this class may already exist
                // here. A materialized one does not count: its operands are
                // not known before rename, so the comparison is left to the
                // rename cleanup.
                let exists = self
                    .block_factors
                    .get(&block)
                    .map(|list| {
                        list.iter().any(|&f| {
                            let fd = self.exprs.factor(f);
                            fd.pexpr == pe && !fd.materialized
                        })
                    })
                    .unwrap_or(false);

                if !exists {
                    let fe = self.create_factor_expression(pe, block);
                    self.add_factor(fe, pe, block);
                }
            }
        }
    }
}
