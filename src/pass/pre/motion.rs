// Copyright (c) 2017-2021 Fabian Schuiki

//! Code motion.
//!
//! Materializes the analysis results: walks the factor graph bottom-up and
//! top-down inserting, replacing, and deleting factors, turns the surviving
//! factors into real phi nodes, applies the recorded substitutions to the IR,
//! and deletes everything that became dead.

use super::{Expr, ExprKind, Pre};
use crate::ir::prelude::*;
use crate::table::TableKey;
use hibitset::BitSet;
use itertools::Itertools;
use log::{debug, trace};
use std::collections::HashMap;

impl<'a, 'ctx> Pre<'a, 'ctx> {
    pub(super) fn code_motion(&mut self) -> bool {
        let mut changed = false;

        changed |= self.factor_graph_walk_bottom_up();
        self.dump_factors("factors after bottom-up walk");

        changed |= self.factor_graph_walk_top_down();
        self.dump_factors("factors after top-down walk");

        changed |= self.phi_insertion();
        changed |= self.apply_substitutions();
        changed |= self.kill_em_all();

        changed
    }

    // ----- Factor graph walks ------------------------------------------------

    /// Process the factors innermost-first.
    ///
    /// The bottom-up order is required for correctness of the cycle handling:
    /// an inner cycle must be resolved before the cycle enclosing it.
    fn factor_graph_walk_bottom_up(&mut self) -> bool {
        let mut changed = false;

        for &bb in self.join_blocks.clone().iter().rev() {
            for fe in self.block_factors.get(&bb).cloned().unwrap_or_default() {
                if !self.is_live_factor(fe) {
                    continue;
                }
                let pe = self.exprs.factor(fe).pexpr;

                if self.exprs.factor(fe).any_cycles() {
                    changed |= self.process_cycled_factor(fe, pe);
                    continue;
                }

                if self.exprs.factor(fe).down_safe {
                    let (wba, materialized, later) = {
                        let fd = self.exprs.factor(fe);
                        (fd.will_be_avail(), fd.materialized, fd.later)
                    };
                    if wba && !materialized {
                        // Insert the computation into every predecessor that
                        // does not provide the value.
                        changed |= self.insert_at_missing_operands(fe, pe);
                    } else if materialized && later {
                        // A materialized factor whose value should come later
                        // is useless; replace it with a real computation.
                        let proto_args = self.pexpr_protos[&pe].args().to_vec();
                        if self.operands_dominate(&proto_args, fe, false) {
                            let first = self.func.first_non_phi(bb).unwrap();
                            let inst = self.clone_proto_before(pe, first);
                            let ve = self.create_expression(inst);
                            self.add_expression(pe, ve, inst, bb);
                            self.set_order_before(inst, first);
                            self.set_all_operands_save(inst);
                            self.bump(&self.stats().insts_inserted);
                            debug!("lowering {} into {}", fe, inst.dump(self.func));

                            self.replace_factor(fe, ve, false, false);
                            changed = true;
                            continue;
                        }
                    }
                }

                self.factor_cleanup(fe);
            }
        }

        changed
    }

    /// Handle a factor with cycled operands.
    ///
    /// A cycled operand always matches the factor's own version; the goal is
    /// to move the unchanging computation out of the cycle. That is possible
    /// when there is a unique non-cycled predecessor providing a real
    /// expression, or nothing at all.
    fn process_cycled_factor(&mut self, fe: Expr, pe: Expr) -> bool {
        let fd = self.exprs.factor(fe);
        let mut cycled: Vec<Expr> = Vec::new();
        let mut cycled_hru = false;
        let mut entry: Option<(Block, Expr)> = None;
        let mut should_stay = false;
        for i in 0..fd.operands.len() {
            let v = fd.operands[i];
            if fd.is_cycle[i] {
                cycled_hru |= fd.has_real_use[i];
                cycled.push(v);
                continue;
            }
            // Multiple non-cycled predecessors force this factor to stay.
            if entry.is_some() {
                should_stay = true;
            }
            entry = Some((fd.preds[i], v));
        }

        // An incoming non-cycled value that is not a real expression forces
        // the factor to stay as well: whether the cycle is ever entered is
        // unknown, so precomputing on the entry edge could lengthen paths.
        let stay = match entry {
            None => true,
            Some((_, ve)) => {
                should_stay
                    || self.exprs.is_variable_or_constant(ve)
                    || self.exprs.is_factor(ve)
            }
        };
        if stay {
            // The cycled expressions point at the factor by now; since it
            // stays, they stay as well.
            for ce in cycled {
                if !ce.is_invalid() && !self.exprs.is_top(ce) && !self.exprs.is_bottom(ce) {
                    self.add_substitution_direct(ce, ce);
                }
            }
            return false;
        }
        let (pred, ve) = entry.unwrap();

        // The cycled side is never used and nothing below anticipates the
        // value.
        if !cycled_hru && !self.exprs.factor(fe).down_safe {
            return self.replace_factor(fe, Expr::bottom(), false, false);
        }

        let term = self.func.layout().terminator(pred);
        let term_ve = self.inst_to_vexpr[&term];

        // Make sure the operands are available at the predecessor block end.
        let proto_args = self.pexpr_protos[&pe].args().to_vec();
        if !self.operands_dominate(&proto_args, term_ve, true) {
            return false;
        }

        // At this point the only concern is whether the non-cycled expression
        // exists. Even a variable or constant is unused here thanks to the
        // guard above, so a fresh computation goes into the predecessor; this
        // is the hoist.
        let mut hru = self.exprs.factor(fe).has_real_use_of(ve);
        let mut ve = ve;
        if self.exprs.is_bottom_or_var_or_const(ve) {
            let inst = self.clone_proto_before(pe, term);
            let nve = self.create_expression(inst);
            self.add_expression(pe, nve, inst, pred);
            self.set_order_before(inst, term);
            self.set_all_operands_save(inst);
            self.bump(&self.stats().insts_inserted);
            debug!("hoisting {} as {}", fe, inst.dump(self.func));
            hru = false;
            ve = nve;
        }

        self.replace_factor(fe, ve, hru, true);
        true
    }

    /// Insert the proto computation into every predecessor whose operand is
    /// bottom or an unavailable factor without a real use.
    fn insert_at_missing_operands(&mut self, fe: Expr, pe: Expr) -> bool {
        let preds = self.exprs.factor(fe).preds.clone();
        for pred in preds {
            let o = match self.exprs.factor(fe).operand_for_pred(pred) {
                Some(o) => o,
                None => Expr::bottom(),
            };

            let needs_insert = o == Expr::bottom()
                || (!self.exprs.factor(fe).has_real_use_of(o)
                    && self.exprs.is_factor(o)
                    && !self.exprs.factor(o).will_be_avail());
            if !needs_insert {
                continue;
            }

            let proto_args = self.pexpr_protos[&pe].args().to_vec();
            if !self.operands_dominate(&proto_args, fe, false) {
                break;
            }

            let term = self.func.layout().terminator(pred);
            let inst = self.clone_proto_before(pe, term);
            let ve = self.create_expression(inst);
            self.exprs.factor_mut(fe).set_operand_for_pred(pred, ve);
            self.add_expression(pe, ve, inst, pred);
            self.set_order_before(inst, term);
            self.set_all_operands_save(inst);
            self.bump(&self.stats().insts_inserted);
            debug!("inserting {} for {}", inst.dump(self.func), fe);
        }
        true
    }

    /// Run the factor cleanup once more to close the substitution chains
    /// discovered during the bottom-up walk.
    fn factor_graph_walk_top_down(&mut self) -> bool {
        for bb in self.join_blocks.clone() {
            for fe in self.block_factors.get(&bb).cloned().unwrap_or_default() {
                if self.is_live_factor(fe) && !self.exprs.factor(fe).materialized {
                    self.factor_cleanup(fe);
                }
            }
        }
        false
    }

    /// Dissolve a factor that turned out to be unnecessary.
    ///
    /// Returns true if the factor was replaced.
    fn factor_cleanup(&mut self, fe: Expr) -> bool {
        if !self.is_live_factor(fe) {
            return false;
        }

        // If all operands resolve to one expression the factor merges
        // nothing.
        let fd = self.exprs.factor(fe);
        let operands = fd.operands.clone();
        let mut hru = false;
        for i in 0..operands.len() {
            hru |= self.exprs.factor(fe).has_real_use[i];
        }
        let mut resolved: Option<Expr> = None;
        let mut same = true;
        for &p in &operands {
            let ps = self.substitution_of(p);
            if let Some(o) = resolved {
                if o != ps {
                    same = false;
                    break;
                }
            }
            resolved = Some(ps);
        }

        if same {
            let o = resolved.expect("factor must have operands");
            // A materialized factor's replacement is delayed until the
            // substitution step.
            if self.exprs.factor(fe).materialized {
                self.add_substitution(fe, o);
                return false;
            }
            self.replace_factor(fe, o, hru, false);
            return true;
        }

        // Check whether all the arguments are still present; a bottom or top
        // kills the factor.
        let mut killed = false;
        for i in 0..operands.len() {
            let se = self.substitution_of(operands[i]);
            if self.exprs.is_bottom(se) || self.exprs.is_top(se) {
                killed = true;
                break;
            }
            // Save the substitution.
            self.exprs.factor_mut(fe).operands[i] = se;
        }

        if killed {
            self.replace_factor(fe, Expr::top(), false, false);
            return true;
        }

        let (down_safe, wba, materialized) = {
            let fd = self.exprs.factor(fe);
            (fd.down_safe, fd.will_be_avail(), fd.materialized)
        };
        if !down_safe && !materialized {
            self.replace_factor(fe, Expr::bottom(), false, false);
            return true;
        }
        if !wba && !materialized {
            // This forces all the expressions that point at this factor to
            // point at the previous expression or themselves.
            self.replace_factor(fe, Expr::top(), false, false);
            return true;
        }
        false
    }

    // ----- Phi insertion -----------------------------------------------------

    /// Turn every surviving non-materialized factor into a real phi node.
    ///
    /// Operands that are factors not yet materialized leave a patch point
    /// behind, resolved once the operand factor gets its phi.
    fn phi_insertion(&mut self) -> bool {
        let mut changed = false;
        // Patches waiting for a factor: the phi and the placeholder to swap.
        let mut patches: HashMap<Expr, Vec<(Inst, Value)>> = HashMap::new();

        for bb in self.join_blocks.clone() {
            for fe in self.block_factors.get(&bb).cloned().unwrap_or_default() {
                if !self.is_live_factor(fe) || self.exprs.factor(fe).materialized {
                    continue;
                }

                let ty = self.exprs[fe].ty.clone();
                let preds = self.exprs.factor(fe).preds.clone();
                let operands = self.exprs.factor(fe).operands.clone();

                let mut args = Vec::with_capacity(preds.len());
                let mut pending: Vec<(Expr, Value)> = Vec::new();
                for (i, &pred) in preds.iter().enumerate() {
                    let ve = operands[i];
                    let deferred = self.exprs.is_factor(ve)
                        && !self.exprs.factor(ve).materialized;
                    let arg = if deferred {
                        let ph = self.func.dfg_mut().add_placeholder(ty.clone());
                        pending.push((ve, ph));
                        ph
                    } else {
                        self.phi_operand_value(ve, pred)
                    };
                    args.push(arg);

                    // The factor is live now, so its operands are too.
                    self.exprs.add_save(ve);
                }

                let first = self.func.first_non_phi(bb).unwrap();
                let phi = {
                    let mut builder = FunctionBuilder::new(self.func);
                    builder.insert_before(first);
                    let result = builder.ins().name("pre_phi").phi(args, preds.clone());
                    builder.dfg().value_inst(result)
                };
                self.bump(&self.stats().phis_inserted);
                trace!("materialized {} as {}", fe, phi.dump(self.func));

                for (ve, ph) in pending {
                    patches.entry(ve).or_default().push((phi, ph));
                }

                // Resolve patch points awaiting this factor.
                if let Some(waiters) = patches.remove(&fe) {
                    let result = self.func.dfg().inst_result(phi);
                    for (wphi, ph) in waiters {
                        self.func.dfg_mut().replace_value_within_inst(ph, result, wphi);
                        self.func.dfg_mut().remove_placeholder(ph);
                    }
                }

                self.materialize_factor(fe, phi);
                changed = true;
            }
        }

        // Late patches: factors materialized before their waiters registered.
        for (fe, waiters) in patches {
            let phi = self.factor_to_phi[&fe];
            let result = self.func.dfg().inst_result(phi);
            for (wphi, ph) in waiters {
                self.func.dfg_mut().replace_value_within_inst(ph, result, wphi);
                self.func.dfg_mut().remove_placeholder(ph);
            }
        }

        changed
    }

    /// The value a factor operand contributes along an edge.
    ///
    /// Constants without a dominating definition are rematerialized at the
    /// end of the predecessor.
    fn phi_operand_value(&mut self, ve: Expr, pred: Block) -> Value {
        if let Some(&inst) = self.vexpr_to_inst.get(&ve) {
            return self.func.dfg().inst_result(inst);
        }
        match self.exprs[ve].kind {
            ExprKind::Variable { value } => value,
            ExprKind::Constant { ref value, source } => {
                let term = self.func.layout().terminator(pred);
                if let Some(source) = source {
                    if self.dt.value_dominates_inst(self.func, source, term) {
                        return source;
                    }
                }
                let imm = value.clone();
                let mut builder = FunctionBuilder::new(self.func);
                builder.insert_before(term);
                let c = builder.ins().const_int(imm.clone());
                let ce = self.intern_constant(imm, c);
                self.value_to_expr.insert(c, ce);
                c
            }
            _ => panic!("factor operand {} has no value", ve),
        }
    }

    // ----- Substitution application ------------------------------------------

    /// The value that stands in for an expression after substitution.
    fn substitute_value(&mut self, e: Expr, at: Inst) -> Value {
        if let ExprKind::Factor(ref f) = self.exprs[e].kind {
            if f.materialized {
                let phi = self.factor_to_phi[&e];
                return self.func.dfg().inst_result(phi);
            }
            unreachable!("substitution resolves to an unmaterialized factor");
        }
        match self.exprs[e].kind {
            ExprKind::Variable { value } => value,
            ExprKind::Constant { ref value, source } => {
                if let Some(source) = source {
                    if self.dt.value_dominates_inst(self.func, source, at) {
                        return source;
                    }
                }
                // Keep the phis at the front of their block intact.
                let mut at = at;
                if self.func.dfg()[at].opcode().is_phi() {
                    let bb = self.func.layout().inst_block(at).unwrap();
                    at = self.func.first_non_phi(bb).unwrap();
                }
                let imm = value.clone();
                let mut builder = FunctionBuilder::new(self.func);
                builder.insert_before(at);
                let c = builder.ins().const_int(imm.clone());
                let ce = self.intern_constant(imm, c);
                self.value_to_expr.insert(c, ce);
                c
            }
            _ => self.expr_value(e),
        }
    }

    fn is_to_be_killed(&self, inst: Inst) -> bool {
        self.kill_list.contains(&inst)
    }

    fn all_users_killed(&self, inst: Inst) -> bool {
        let result = match self.func.dfg().get_inst_result(inst) {
            Some(r) => r,
            None => return true,
        };
        for u in self.func.dfg().uses(result) {
            if self.func.layout().inst_block(u).is_some() && !self.is_to_be_killed(u) {
                return false;
            }
        }
        true
    }

    /// Rewrite the IR according to the recorded substitution chains.
    fn apply_substitutions(&mut self) -> bool {
        let mut changed = false;

        let pairs: Vec<(Expr, Inst)> = self
            .vexpr_to_inst
            .iter()
            .map(|(&e, &i)| (e, i))
            .sorted_by_key(|&(e, _)| e.index())
            .collect();

        for (ve, vi) in pairs {
            // A simplification result replaces the real instruction.
            if self.exprs.is_variable_or_constant(ve) {
                let target = self.substitute_value(ve, vi);
                if let Some(result) = self.func.dfg().get_inst_result(vi) {
                    self.func.dfg_mut().replace_use(result, target);
                }
                self.bump(&self.stats().insts_substituted);
                self.kill_list.push(vi);
                continue;
            }

            if self.exprs.is_ignored(ve) {
                continue;
            }

            let se = self.substitution_of(ve);

            // Top forces the instruction to stay as is, provided it has uses.
            if self.exprs.is_top(se) {
                let unused = self
                    .func
                    .dfg()
                    .get_inst_result(vi)
                    .map(|r| !self.func.dfg().has_uses(r))
                    .unwrap_or(true);
                if unused {
                    self.kill_list.push(vi);
                }
                continue;
            }

            if self.exprs.is_bottom(se) || se == ve {
                // Standard case: the instruction is not replaced by anything.
                // The only way to be substituted with a bottom is through a
                // factor deleted for uselessness.
                if !self.exprs.is_factor(ve) && self.exprs.saves(ve) == 0 {
                    debug_assert!(self.all_users_killed(vi));
                    self.kill_list.push(vi);
                }
                continue;
            }

            debug_assert!(
                self.vexpr_to_inst
                    .get(&se)
                    .map(|&si| !self.is_to_be_killed(si))
                    .unwrap_or(true),
                "substituting with an expression scheduled to die"
            );

            let si = self.substitute_value(se, vi);

            // Clear the save count of the original instruction.
            self.exprs.clr_saves(ve);

            // Count the remaining real uses of this instruction.
            let real_uses = self
                .func
                .dfg()
                .get_inst_result(vi)
                .map(|r| {
                    self.func
                        .dfg()
                        .uses(r)
                        .filter(|&u| self.func.layout().inst_block(u).is_some())
                        .count()
                })
                .unwrap_or(0);

            // Without real uses the direct substitution loses a reference.
            if real_uses == 0 {
                let ds = self.substitution_direct(ve);
                self.exprs.rem_save(ds);
                if self.exprs.saves(ds) == 0 {
                    if let Some(&di) = self.vexpr_to_inst.get(&ds) {
                        if !self.is_to_be_killed(di) {
                            self.kill_list.push(di);
                        }
                    }
                }
            }

            self.exprs.add_saves(se, real_uses);
            if let Some(result) = self.func.dfg().get_inst_result(vi) {
                self.func.dfg_mut().replace_use(result, si);
            }
            self.bump(&self.stats().insts_substituted);
            trace!("substituted {} with {}", vi.dump(self.func), si.dump(self.func));

            self.kill_list.push(vi);
            changed = true;
        }

        changed
    }

    // ----- Killing -----------------------------------------------------------

    /// Erase the instructions on the kill list, cascading into operands whose
    /// save counts drop to zero.
    fn kill_em_all(&mut self) -> bool {
        let mut changed = false;

        // Guard against enqueueing an instruction twice.
        let mut enqueued = BitSet::new();
        for &inst in &self.kill_list {
            enqueued.add(inst.index() as u32);
        }

        let mut i = 0;
        while i < self.kill_list.len() {
            let inst = self.kill_list[i];
            i += 1;

            debug_assert!(
                self.all_users_killed(inst),
                "killed instruction has live users"
            );

            // Account for the disappearing operand references.
            for op in self.func.dfg()[inst].args().to_vec() {
                if op == Value::invalid() {
                    continue;
                }
                let oe = match self.value_to_expr.get(&op) {
                    Some(&oe) => oe,
                    None => continue,
                };
                if self.exprs.is_ignored(oe) {
                    continue;
                }
                self.exprs.rem_save(oe);
                if self.exprs.saves(oe) == 0 {
                    if let Some(&oi) = self.vexpr_to_inst.get(&oe) {
                        if !enqueued.add(oi.index() as u32) {
                            self.kill_list.push(oi);
                        }
                    }
                }
            }

            // Just drop the references for now.
            self.func.dfg_mut().drop_inst_references(inst);
        }

        // Remove the instructions completely.
        while let Some(inst) = self.kill_list.pop() {
            if self.func.layout().inst_block(inst).is_none() {
                continue;
            }
            let is_phi = self.func.dfg()[inst].opcode().is_phi();
            trace!("killing {}", inst.dump(self.func));
            self.func.layout_mut().remove_inst(inst);
            self.func.dfg_mut().remove_inst(inst);
            if is_phi {
                self.bump(&self.stats().phis_killed);
            } else {
                self.bump(&self.stats().insts_killed);
            }
            changed = true;
        }

        changed
    }
}
