// Copyright (c) 2017-2021 Fabian Schuiki

//! The renaming walk.
//!
//! Assigns SSA versions to three kinds of expressions: real occurrences,
//! factors, and factor operands. The walk follows the dominator tree in DFS
//! order; per-class stacks of `(SDFS, expression)` pairs shrink whenever the
//! traversal ascends the tree. The walk also seeds the DownSafe and
//! HasRealUse flags that the later fixpoints start from.

use super::solver::{SolverMode, TokenSolver};
use super::{Expr, Pre};
use crate::ir::Block;
use crate::table::TableKey;
use log::trace;
use std::collections::{HashMap, HashSet};

impl<'a, 'ctx> Pre<'a, 'ctx> {
    pub(super) fn rename(&mut self) {
        self.rename_pass();
        self.dump_factors("factors after rename");
        self.rename_cleanup();
        self.dump_factors("factors after rename cleanup");
        self.rename_inductivity();
        self.dump_factors("factors after induction pass");
    }

    fn rename_pass(&mut self) {
        // Version counters and stacks, one per class.
        let mut counters: HashMap<Expr, i64> = HashMap::new();
        let mut stacks: HashMap<Expr, Vec<(u64, Expr)>> = HashMap::new();
        for &pe in &self.pexprs {
            if self.exprs.is_ignored(pe) {
                continue;
            }
            counters.insert(pe, 0);
            stacks.insert(pe, Vec::new());
        }

        // The path of blocks the walk is currently inside of.
        let mut path: Vec<Block> = Vec::new();

        for bb in self.dfs_blocks.clone() {
            // Factors live outside basic blocks; they order as the first
            // instruction of theirs.
            let first = self.func.layout().first_inst(bb).unwrap();
            let fsdfs = self.instr_sdfs[&first];

            // Backtrack the path if necessary.
            while let Some(&pb) = path.last() {
                let pb_first = self.func.layout().first_inst(pb).unwrap();
                if self.instr_sdfs[&pb_first] > fsdfs {
                    path.pop();
                } else {
                    break;
                }
            }
            path.push(bb);

            // Stack the non-materialized factors first, then the materialized
            // ones, so that real occurrences assume the materialized versions.
            let factors = self.block_factors.get(&bb).cloned().unwrap_or_default();
            for &pass_materialized in &[false, true] {
                for &fe in &factors {
                    if self.exprs.factor(fe).materialized != pass_materialized {
                        continue;
                    }
                    let pe = self.exprs.factor(fe).pexpr;
                    let counter = counters.entry(pe).or_insert(0);
                    let version = *counter;
                    *counter += 1;
                    self.exprs.set_version(fe, version);
                    stacks.entry(pe).or_default().push((fsdfs, fe));
                }
            }

            // And the rest of the instructions.
            for inst in self.func.layout().insts(bb).collect::<Vec<_>>() {
                // Phis were already handled above.
                if self.func.dfg()[inst].opcode().is_phi() {
                    continue;
                }

                let ve = self.inst_to_vexpr[&inst];
                let pe = self.pexpr_of(ve);
                let sdfs = self.instr_sdfs[&inst];

                // Backtrack every stack if we jumped up the tree.
                for stack in stacks.values_mut() {
                    while stack.last().map(|&(d, _)| d > sdfs).unwrap_or(false) {
                        stack.pop();
                    }
                }

                // Nothing to do for ignored expressions.
                if self.exprs.is_ignored(ve) {
                    continue;
                }

                let top = stacks
                    .get(&pe)
                    .and_then(|s| s.last())
                    .map(|&(_, e)| e);

                match top {
                    // Stack is empty: this defines a new version.
                    None => {
                        let version = Self::bump_counter(&mut counters, pe);
                        self.exprs.set_version(ve, version);
                        stacks.entry(pe).or_default().push((sdfs, ve));
                    }

                    // A factor on top of the stack.
                    Some(t) if self.exprs.is_factor(t) => {
                        // If every operand's definition dominates the factor
                        // we are dealing with the same expression and it
                        // assumes the factor's version. Substitutions are
                        // recorded right away so that later expressions in
                        // this block can prove their operands dominate the
                        // factor as well; without that, tightly coupled code
                        // cannot move out of loops together.
                        let args = self.func.dfg()[inst].args().to_vec();
                        if self.operands_dominate(&args, t, false) {
                            let version = self.exprs.version(t);
                            self.exprs.set_version(ve, version);
                            self.add_substitution(ve, t);
                        } else {
                            // The operands were defined in this block; this is
                            // a new version, and the factor's result is not
                            // anticipated along this path.
                            let version = Self::bump_counter(&mut counters, pe);
                            self.exprs.set_version(ve, version);
                            stacks.entry(pe).or_default().push((sdfs, ve));

                            if !self.factor_has_real_use_before(t, &path, ve) {
                                self.exprs.factor_mut(t).down_safe = false;
                            }
                        }
                    }

                    // A real occurrence on top of the stack.
                    Some(t) => {
                        // Compare all operand versions; a mismatch means a new
                        // expression version.
                        let same_versions = self
                            .exprs
                            .args(ve)
                            .iter()
                            .zip(self.exprs.args(t).iter())
                            .all(|(&a, &b)| {
                                let ea = self.value_to_expr.get(&a);
                                let eb = self.value_to_expr.get(&b);
                                match (ea, eb) {
                                    (Some(&ea), Some(&eb)) => {
                                        self.exprs.version(ea) == self.exprs.version(eb)
                                    }
                                    _ => false,
                                }
                            });

                        if same_versions {
                            let version = self.exprs.version(t);
                            self.exprs.set_version(ve, version);
                            self.add_substitution(ve, t);
                        } else {
                            let version = Self::bump_counter(&mut counters, pe);
                            self.exprs.set_version(ve, version);
                            stacks.entry(pe).or_default().push((sdfs, ve));
                        }
                    }
                }

                let version = self.exprs.version(ve);
                self.pexpr_versions
                    .entry(pe)
                    .or_default()
                    .entry(version)
                    .or_default()
                    .push(ve);
            }

            // Visit every CFG successor of this block to update its factor
            // operands.
            let term = self.func.layout().terminator(bb);
            let term_ve = self.inst_to_vexpr[&term];
            for succ in self.pt.succ(bb).collect::<Vec<_>>() {
                for fe in self
                    .block_factors
                    .get(&succ)
                    .cloned()
                    .unwrap_or_default()
                {
                    let pe = self.exprs.factor(fe).pexpr;
                    let top = stacks
                        .get(&pe)
                        .and_then(|s| s.last())
                        .map(|&(_, e)| e);

                    let ve = if self.exprs.factor(fe).materialized {
                        // A linked factor's operands are already versioned.
                        self.exprs
                            .factor(fe)
                            .operand_for_pred(bb)
                            .unwrap_or(Expr::bottom())
                    } else {
                        let ve = top.unwrap_or(Expr::bottom());
                        self.exprs.factor_mut(fe).set_operand_for_pred(bb, ve);
                        ve
                    };

                    if self.exprs.is_bottom_or_var_or_const(ve) {
                        continue;
                    }

                    // Whether the operand version is actually used on the
                    // walked path decides several of the later fixpoints.
                    let hru = match top {
                        Some(t) if self.exprs.is_factor(t) => {
                            self.factor_has_real_use_before(t, &path, term_ve)
                        }
                        Some(t) if self.exprs.is_basic(t) => {
                            self.has_real_use_before(t, &path, term_ve)
                        }
                        _ => false,
                    };
                    self.exprs.factor_mut(fe).set_has_real_use_of(ve, hru);
                }
            }

            // A factor on top of a stack at a program exit whose version was
            // never used is not down-safe.
            if self.pt.succ(bb).next().is_none() {
                let tops: Vec<Expr> = stacks
                    .values()
                    .filter_map(|s| s.last().map(|&(_, e)| e))
                    .collect();
                for t in tops {
                    if self.exprs.is_factor(t)
                        && !self.factor_has_real_use_before(t, &path, term_ve)
                    {
                        self.exprs.factor_mut(t).down_safe = false;
                    }
                }
            }
        }
    }

    fn bump_counter(counters: &mut HashMap<Expr, i64>, pe: Expr) -> i64 {
        let counter = counters.entry(pe).or_insert(0);
        let version = *counter;
        *counter += 1;
        version
    }

    /// Eliminate factors that duplicate an existing phi.
    ///
    /// Only non-materialized factors are compared; if a phi would have been a
    /// factor it already is one. Matching factors are killed and substituted
    /// with top, meaning "use the phi as is".
    fn rename_cleanup(&mut self) {
        let mut kill_list: Vec<Expr> = Vec::new();
        let mut kill_set: HashSet<Expr> = HashSet::new();

        let mut solver = TokenSolver::new(SolverMode::Approximate);
        solver.solve(self);

        for b in self.join_blocks.clone() {
            for fe in self.block_factors.get(&b).cloned().unwrap_or_default() {
                if self.exprs.factor(fe).materialized || kill_set.contains(&fe) {
                    continue;
                }

                for inst in self.func.layout().insts(b).collect::<Vec<_>>() {
                    if !self.func.dfg()[inst].opcode().is_phi() {
                        break;
                    }
                    let phi = inst;
                    if self.func.dfg()[phi].args().len() != self.exprs.factor(fe).operands.len() {
                        continue;
                    }

                    // The solver may answer bottom for a phi whose factor it
                    // killed during its pass.
                    let pf = solver.token_for(phi);
                    if pf != Expr::bottom() && pf != self.exprs.factor(fe).pexpr {
                        continue;
                    }

                    let mut skip = false;
                    let mut kill = true;
                    let entries: Vec<(crate::ir::Value, Block)> = {
                        let data = &self.func.dfg()[phi];
                        data.args()
                            .iter()
                            .cloned()
                            .zip(data.blocks().iter().cloned())
                            .collect()
                    };
                    for (pv, pred) in entries {
                        let fve = self
                            .exprs
                            .factor(fe)
                            .operand_for_pred(pred)
                            .unwrap_or(Expr::bottom());

                        let pv_var_const = self.func.dfg().get_value_arg(pv).is_some()
                            || self.func.dfg().get_const_int(pv).is_some();
                        let pv_phi = self
                            .func
                            .dfg()
                            .get_value_inst(pv)
                            .map(|i| self.func.dfg()[i].opcode().is_phi())
                            .unwrap_or(false);

                        // While assigning versioned expressions to a factor we
                        // cannot infer that a variable or a constant is coming
                        // from the predecessor and assign bottom, but a linked
                        // factor knows for sure. Treat the positions as
                        // compatible.
                        if (pv_var_const || pv_phi)
                            && (fve == Expr::bottom() || self.exprs.is_factor(fve))
                        {
                            continue;
                        }

                        // If only one side is a constant, variable, or bottom,
                        // it is clearly a mismatch.
                        if pv_var_const || fve == Expr::bottom() {
                            skip = true;
                            break;
                        }

                        // Since the same version is not put back on the stack
                        // it is possible for a factor to be an operand of
                        // itself along a back branch; treat it as bottom and
                        // move on.
                        if fve == fe {
                            continue;
                        }

                        let pive = self.value_to_expr.get(&pv).cloned();
                        if let Some(pive) = pive {
                            if fve == pive
                                || self.exprs.version(fve) == self.exprs.version(pive)
                            {
                                continue;
                            }
                        }

                        kill = false;
                        break;
                    }

                    if skip {
                        continue;
                    }
                    if kill {
                        if kill_set.insert(fe) {
                            kill_list.push(fe);
                        }
                        break;
                    }
                }
            }
        }

        for fe in kill_list {
            trace!("rename cleanup kills {}", fe);
            self.kill_factor(fe, true);
            self.add_substitution(fe, Expr::top());
        }
    }

    /// Kill factors that merge induction steps.
    ///
    /// A factor whose operand computes on the factor's own materialized phi
    /// cannot be moved. Neither can any factor in the same loop header that
    /// shares its class or transitively computes on it.
    fn rename_inductivity(&mut self) {
        let mut inductions: Vec<(Block, Expr)> = Vec::new();
        let mut kill_list: Vec<Expr> = Vec::new();
        let mut kill_set: HashSet<Expr> = HashSet::new();

        // Determine cyclic factors of what is left.
        for fe in self.fexprs.clone() {
            if kill_set.contains(&fe) {
                continue;
            }
            for ve in self.exprs.factor(fe).operands.clone() {
                if ve.is_invalid() {
                    continue;
                }

                if self.is_induction_expression(fe, ve) {
                    // This collects the initial induction classes and header
                    // blocks; the propagation below finds more classes but no
                    // new headers.
                    let header = self.exprs.factor(fe).block;
                    let pe = self.pexpr_of(ve);
                    inductions.push((header, pe));
                    if kill_set.insert(fe) {
                        kill_list.push(fe);
                    }
                    self.add_substitution(ve, ve);

                    // Kill every factor of the same class within the cycle,
                    // i.e. between the header and the induction step.
                    let hfirst = self.func.layout().first_inst(header).unwrap();
                    let hdfs = self.instr_dfs[&hfirst];
                    let idfs = self.instr_dfs[&self.vexpr_to_inst[&ve]];
                    for other in self.fexprs.clone() {
                        if self.exprs.factor(other).pexpr != pe {
                            continue;
                        }
                        let ob = self.exprs.factor(other).block;
                        let ofirst = self.func.layout().first_inst(ob).unwrap();
                        let odfs = self.instr_dfs[&ofirst];
                        if odfs < hdfs || odfs > idfs {
                            continue;
                        }
                        if kill_set.insert(other) {
                            kill_list.push(other);
                        }
                    }
                    break;
                }

                // The factor is contained inside a cycle without a change in
                // the expression's operands along it.
                let fv = self.exprs.version(fe);
                if fv == self.exprs.version(ve) {
                    self.exprs.factor_mut(fe).set_is_cycle_of(ve, true);
                }
            }
        }

        // Propagate: factors in an induction header whose class computes on an
        // induction class are inductive themselves.
        let mut i = 0;
        while i < inductions.len() {
            let (header, ipe) = inductions[i];
            i += 1;

            for fe in self.block_factors.get(&header).cloned().unwrap_or_default() {
                let fpe = self.exprs.factor(fe).pexpr;
                if fpe == ipe {
                    continue;
                }
                let proto_args = match self.pexpr_protos.get(&fpe) {
                    Some(proto) => proto.args().to_vec(),
                    None => continue,
                };
                for arg in proto_args {
                    let arg_expr = match self.value_to_expr.get(&arg) {
                        Some(&e) => e,
                        None => continue,
                    };
                    if self.exprs.is_ignored(arg_expr) {
                        continue;
                    }
                    if self.pexpr_of(arg_expr) != ipe {
                        continue;
                    }
                    if kill_set.insert(fe) {
                        kill_list.push(fe);
                    }
                    inductions.push((header, fpe));
                    break;
                }
            }
        }

        // Remove all related factors.
        for fe in kill_list {
            trace!("induction pass kills {}", fe);
            let rep = self
                .factor_to_phi
                .get(&fe)
                .map(|phi| self.inst_to_vexpr[phi])
                .unwrap_or(Expr::top());
            self.kill_factor(fe, true);
            self.add_substitution_full(fe, rep, true, true);
        }
    }
}
