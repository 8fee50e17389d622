// Copyright (c) 2017-2021 Fabian Schuiki

//! The token propagation solver.
//!
//! Decides which of the phi nodes already present in the IR are factors in
//! disguise. A token is the meet of the classes flowing into a phi: either a
//! single proto-expression, or one of the lattice sentinels. Phis whose
//! operands come in over a back branch get a propagation record; once the
//! forward-known phis are finished, their tokens are pushed into the
//! dependents.

use super::{Expr, Pre};
use crate::ir::Inst;
use std::collections::HashMap;

/// The mode the solver runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SolverMode {
    /// Guarantees that every factor it keeps has the correct class token.
    /// Constants and variables poison the meet.
    Accurate,
    /// Treats constants and variables optimistically as top. Useful to match
    /// non-materialized factors against phis, preventing superfluous factor
    /// insertion, but must not be used to materialize.
    Approximate,
}

/// Rules:
///   T    ^ T    = T      Exp  ^ T    = Exp
///   Exp  ^ Exp  = Exp    ExpX ^ ExpY = F
///   Exp  ^ F    = F      F    ^ T    = F
///   F    ^ F    = F
fn meet(a: Expr, b: Expr) -> Expr {
    if a == b {
        return a;
    }
    let a_sentinel = a == Expr::top() || a == Expr::bottom();
    let b_sentinel = b == Expr::top() || b == Expr::bottom();
    if a == Expr::top() && !b_sentinel {
        return b;
    }
    if b == Expr::top() && !a_sentinel {
        return a;
    }
    Expr::bottom()
}

/// The solver state.
///
/// The solver supports exactly one back-branch predecessor per phi; functions
/// with more are not handled and trip an assertion.
pub(super) struct TokenSolver {
    mode: SolverMode,
    /// Phis with a factor, in discovery order.
    order: Vec<Inst>,
    factors: HashMap<Inst, Expr>,
    tokens: HashMap<Inst, Expr>,
    props: HashMap<Inst, Vec<(Expr, Inst)>>,
    kill: HashMap<Inst, bool>,
    finished: HashMap<Inst, bool>,
}

impl TokenSolver {
    pub(super) fn new(mode: SolverMode) -> Self {
        Self {
            mode,
            order: Vec::new(),
            factors: HashMap::new(),
            tokens: HashMap::new(),
            props: HashMap::new(),
            kill: HashMap::new(),
            finished: HashMap::new(),
        }
    }

    pub(super) fn has_factor_for(&self, phi: Inst) -> bool {
        self.factors.contains_key(&phi)
    }

    pub(super) fn factor_for(&self, phi: Inst) -> Expr {
        self.factors[&phi]
    }

    pub(super) fn is_finished(&self, phi: Inst) -> bool {
        self.finished.get(&phi).cloned().unwrap_or(false)
    }

    /// The token of a phi, or bottom if the solver discarded it.
    pub(super) fn token_for(&self, phi: Inst) -> Expr {
        if self.has_factor_for(phi) {
            self.tokens.get(&phi).cloned().unwrap_or(Expr::bottom())
        } else {
            Expr::bottom()
        }
    }

    /// The surviving factors, in discovery order.
    pub(super) fn live_factors(&self) -> Vec<(Inst, Expr)> {
        self.order
            .iter()
            .filter(|phi| !self.kill.get(phi).cloned().unwrap_or(false))
            .map(|&phi| (phi, self.factors[&phi]))
            .collect()
    }

    fn create_factor(&mut self, pre: &mut Pre, phi: Inst, token: Expr) {
        assert!(!self.has_factor_for(phi), "factor already exists");
        let block = pre.func.layout().inst_block(phi).unwrap();
        let fe = pre.create_factor_expression(token, block);
        self.order.push(phi);
        self.factors.insert(phi, fe);
        self.kill.insert(phi, false);
        self.finished.insert(phi, false);
    }

    fn add_propagation(&mut self, pre: &mut Pre, token: Expr, src: Inst, dst: Inst) {
        if !self.has_factor_for(src) {
            self.create_factor(pre, src, token);
        }
        if !self.has_factor_for(dst) {
            self.create_factor(pre, dst, token);
        }
        self.kill.insert(dst, token == Expr::bottom());
        self.props.entry(src).or_default().push((token, dst));
    }

    fn finish_propagation(&mut self, pre: &mut Pre, token: Expr, phi: Inst) {
        assert!(
            !self.kill.get(&phi).cloned().unwrap_or(false),
            "the factor is already killed"
        );

        if !self.has_factor_for(phi) {
            self.create_factor(pre, phi, token);
        }
        self.tokens.insert(phi, token);

        // Either top or bottom results in deletion of the factor.
        self.kill
            .insert(phi, token == Expr::top() || token == Expr::bottom());

        self.finished.insert(phi, true);

        // Recursively finish every propagation.
        if let Some(props) = self.props.get(&phi).cloned() {
            for (ptok, dst) in props {
                let t = meet(token, ptok);
                self.finish_propagation(pre, t, dst);
            }
        }
    }

    /// Top-down walk over the join blocks, calculating the token of each phi.
    ///
    /// If some operand of a phi is produced by another phi we have yet to meet
    /// (a back branch), a propagation record stores the partial token and both
    /// phis. Tokens that are known immediately are finished and pushed into
    /// the dependents recursively. By the end of the walk every factor has
    /// either a legal token or a bottom as its class.
    pub(super) fn solve(&mut self, pre: &mut Pre) {
        for b in pre.join_blocks.clone() {
            for inst in pre.func.layout().insts(b).collect::<Vec<_>>() {
                // When we reach the first non-phi instruction we stop.
                if !pre.func.dfg()[inst].opcode().is_phi() {
                    break;
                }
                let phi = inst;
                let phi_ve = pre.inst_to_vexpr[&phi];

                // The token is the meet of all the phi's operands,
                // optimistically starting from top.
                let mut token = Expr::top();

                // Back branch source.
                let mut back_branch: Option<Inst> = None;

                let args = pre.func.dfg()[phi].args().to_vec();
                for op in args {
                    let mut op = op;
                    let mut ove = pre.value_to_expr.get(&op).cloned();

                    // Chains of single-operand phis can remain after other
                    // passes; look through them.
                    while let Some(op_inst) = pre.func.dfg().get_value_inst(op) {
                        if !pre.func.dfg()[op_inst].opcode().is_phi()
                            || pre.func.dfg()[op_inst].args().len() != 1
                        {
                            break;
                        }
                        op = pre.func.dfg()[op_inst].args()[0];
                        ove = pre.value_to_expr.get(&op).cloned();
                    }

                    let ove = match ove {
                        Some(ove) => ove,
                        None => {
                            // Defined in an unreachable block.
                            token = Expr::bottom();
                            break;
                        }
                    };

                    // A self-loop gives an optimistic top value.
                    if ove == phi_ve {
                        token = Expr::top();
                        continue;
                    }

                    // Ignored expressions produce a bottom value right away.
                    if matches!(
                        pre.exprs[ove].kind,
                        super::ExprKind::Ignored | super::ExprKind::Unknown
                    ) {
                        token = Expr::bottom();
                        break;
                    }

                    // A variable or a constant is regarded as bottom, unless
                    // the solver approximates.
                    if pre.exprs.is_variable_or_constant(ove) {
                        let t = match self.mode {
                            SolverMode::Approximate => Expr::top(),
                            SolverMode::Accurate => Expr::bottom(),
                        };
                        token = meet(token, t);
                        continue;
                    }

                    let op_phi = pre
                        .func
                        .dfg()
                        .get_value_inst(op)
                        .filter(|&i| pre.func.dfg()[i].opcode().is_phi());
                    if let Some(op_phi) = op_phi {
                        if !self.has_factor_for(op_phi) {
                            token = meet(token, Expr::top());

                            // The solver can be extended to handle multiple
                            // back branches, but blocks with more than one
                            // have yet to be encountered.
                            assert!(
                                back_branch.is_none(),
                                "must not be a second back branch"
                            );
                            back_branch = Some(op_phi);
                        } else {
                            let t = if self.is_finished(op_phi) {
                                self.token_for(op_phi)
                            } else {
                                Expr::top()
                            };
                            token = meet(token, t);
                        }
                        continue;
                    }

                    // Otherwise use whatever class this expression belongs to.
                    token = meet(token, pre.pexpr_of(ove));
                }

                if let Some(back) = back_branch {
                    // Even with the back branch a bottom token cannot change
                    // and the propagation finishes right now.
                    if token == Expr::bottom() {
                        self.finish_propagation(pre, token, phi);
                    } else {
                        self.add_propagation(pre, token, back, phi);
                    }
                } else {
                    self.finish_propagation(pre, token, phi);
                }
            }
        }

        self.cleanup();
    }

    /// Erase all killed factors before the results are consumed.
    fn cleanup(&mut self) {
        let killed: Vec<Inst> = self
            .kill
            .iter()
            .filter(|&(_, &k)| k)
            .map(|(&phi, _)| phi)
            .collect();
        for phi in killed {
            self.factors.remove(&phi);
            self.tokens.remove(&phi);
        }
        let factors = &self.factors;
        self.order.retain(|phi| factors.contains_key(phi));
    }
}
