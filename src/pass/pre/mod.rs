// Copyright (c) 2017-2021 Fabian Schuiki

//! Partial Redundancy Elimination
//!
//! This pass removes computations that are redundant on some but not all
//! paths, inserting and deleting computations such that each one is performed
//! exactly once on every path. It follows Chow, Chan, Kennedy, Liu, Lo, and
//! Tu, "A new algorithm for partial redundancy elimination based on SSA form":
//! occurrences of equal computations are grouped into classes, factors (the
//! expression-level phi) are placed on the iterated dominance frontier of each
//! class, a renaming walk assigns SSA versions to the occurrences, a handful
//! of fixpoints over the factor graph decide where the value will be
//! available, and a final code motion step rewrites the function.
//!
//! Critical edges must be split before this pass runs, see
//! [`SplitCriticalEdges`](crate::pass::SplitCriticalEdges).

mod dataflow;
mod expr;
mod factor;
mod finalize;
mod motion;
mod rename;
mod solver;

pub use expr::{Expr, ExprData, ExprKind, Exprs, FactorData};

use crate::analysis::{DominatorTree, PredecessorTable};
use crate::ir::prelude::*;
use crate::ir::InstData;
use crate::opt::prelude::*;
use crate::opt::Stats;
use crate::pass::simplify::{simplify_inst, Simplified};
use crate::table::TableKey;
use crate::ty::void_ty;
use crate::value::IntValue;
use expr::{VR_CONSTANT_LO, VR_IGNORED_LO, VR_UNSET, VR_VARIABLE_LO};
use log::{debug, info, trace};
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;

/// Partial Redundancy Elimination
pub struct PartialRedundancyElim;

impl Pass for PartialRedundancyElim {
    fn run_on_function(ctx: &PassContext, func: &mut Function) -> bool {
        if func.layout().first_block().is_none() {
            return false;
        }
        info!("PRE [{}]", func.name());
        let mut pre = Pre::new(ctx, func);
        pre.run()
    }
}

/// Per-instruction numbering step. Leaves room to slot in a handful of
/// inserted instructions without renumbering.
const ORDER_STEP: u64 = 16;
/// Per-block numbering gap.
const ORDER_GROWTH: u64 = 100_000;

/// The per-run state of the pass.
///
/// All of it, including the expression arena, lives for exactly one run on
/// one function and is torn down when the run finishes.
pub(crate) struct Pre<'a, 'ctx> {
    ctx: &'ctx PassContext,
    pub(crate) func: &'a mut Function,
    pub(crate) pt: PredecessorTable,
    pub(crate) dt: DominatorTree,
    /// Blocks reachable from the entry, in reverse post-order.
    pub(crate) rpo: Vec<Block>,
    rpo_index: HashMap<Block, usize>,
    /// Dominator tree pre-order with children sorted into RPO.
    pub(crate) dfs_blocks: Vec<Block>,
    num_args: usize,

    pub(crate) exprs: Exprs,
    next_variable_version: i64,
    next_constant_version: i64,
    next_ignored_version: i64,

    /// Blocks with more than one predecessor edge.
    pub(crate) join_blocks: Vec<Block>,
    pub(crate) value_to_expr: HashMap<Value, Expr>,
    pub(crate) expr_to_value: HashMap<Expr, Value>,
    const_pool: HashMap<IntValue, Expr>,
    pub(crate) inst_to_vexpr: HashMap<Inst, Expr>,
    pub(crate) vexpr_to_inst: HashMap<Expr, Inst>,
    pub(crate) expr_to_pexpr: HashMap<Expr, Expr>,
    /// Proto-expressions in creation order.
    pub(crate) pexprs: Vec<Expr>,
    pub(crate) pexpr_protos: HashMap<Expr, InstData>,
    pub(crate) pexpr_vexprs: HashMap<Expr, Vec<Expr>>,
    pub(crate) pexpr_insts: HashMap<Expr, Vec<Inst>>,
    pub(crate) pexpr_blocks: HashMap<Expr, Vec<Block>>,
    pub(crate) pexpr_versions: HashMap<Expr, HashMap<i64, Vec<Expr>>>,
    /// Live factors in creation order.
    pub(crate) fexprs: Vec<Expr>,
    pub(crate) block_factors: HashMap<Block, Vec<Expr>>,
    pub(crate) factor_to_phi: HashMap<Expr, Inst>,
    pub(crate) phi_to_factor: HashMap<Inst, Expr>,
    /// Substitution chains, keyed by proto-expression.
    substitutions: HashMap<Expr, HashMap<Expr, Expr>>,
    pub(crate) kill_list: Vec<Inst>,
    pub(crate) instr_dfs: HashMap<Inst, u64>,
    pub(crate) instr_sdfs: HashMap<Inst, u64>,
}

impl<'a, 'ctx> Pre<'a, 'ctx> {
    pub(crate) fn new(ctx: &'ctx PassContext, func: &'a mut Function) -> Self {
        let pt = PredecessorTable::new(func);
        let dt = DominatorTree::new(func, &pt);
        let rpo = Self::compute_rpo(func, &pt);
        let rpo_index = rpo.iter().enumerate().map(|(i, &bb)| (bb, i)).collect();
        let num_args = func.sig().num_args();
        Self {
            ctx,
            func,
            pt,
            dt,
            rpo,
            rpo_index,
            dfs_blocks: Vec::new(),
            num_args,
            exprs: Exprs::new(),
            next_variable_version: VR_VARIABLE_LO,
            next_constant_version: VR_CONSTANT_LO,
            next_ignored_version: VR_IGNORED_LO,
            join_blocks: Vec::new(),
            value_to_expr: HashMap::new(),
            expr_to_value: HashMap::new(),
            const_pool: HashMap::new(),
            inst_to_vexpr: HashMap::new(),
            vexpr_to_inst: HashMap::new(),
            expr_to_pexpr: HashMap::new(),
            pexprs: Vec::new(),
            pexpr_protos: HashMap::new(),
            pexpr_vexprs: HashMap::new(),
            pexpr_insts: HashMap::new(),
            pexpr_blocks: HashMap::new(),
            pexpr_versions: HashMap::new(),
            fexprs: Vec::new(),
            block_factors: HashMap::new(),
            factor_to_phi: HashMap::new(),
            phi_to_factor: HashMap::new(),
            substitutions: HashMap::new(),
            kill_list: Vec::new(),
            instr_dfs: HashMap::new(),
            instr_sdfs: HashMap::new(),
        }
    }

    /// Run the pass. Returns true if the function was modified.
    pub(crate) fn run(&mut self) -> bool {
        self.init();
        self.insert_factors();
        self.rename();
        self.down_safety();
        self.will_be_avail();
        self.finalize();
        self.code_motion()
        // All state, arena included, is dropped with `self`.
    }

    fn compute_rpo(func: &Function, pt: &PredecessorTable) -> Vec<Block> {
        let mut order = Vec::new();
        let mut discovered = std::collections::HashSet::new();
        let mut finished = std::collections::HashSet::new();
        let mut stack = vec![func.layout().entry()];
        while let Some(&next) = stack.last() {
            if discovered.insert(next) {
                for succ in pt.succ(next) {
                    if !discovered.contains(&succ) {
                        stack.push(succ);
                    }
                }
            } else {
                stack.pop();
                if finished.insert(next) {
                    order.push(next);
                }
            }
        }
        order.reverse();
        order
    }

    // ----- Init --------------------------------------------------------------

    fn init(&mut self) {
        // Number the function arguments as variables.
        for v in self.func.args().collect::<Vec<_>>() {
            let version = self.next_variable_version;
            self.next_variable_version -= 1;
            let ty = self.func.value_type(v);
            let e = self.exprs.add(ExprData {
                opcode: None,
                ty,
                version,
                saves: 0,
                kind: ExprKind::Variable { value: v },
            });
            self.value_to_expr.insert(v, e);
            self.expr_to_value.insert(e, v);
            self.expr_to_pexpr.insert(e, e);
        }

        // Walk the blocks in RPO, collecting join blocks and building the
        // proto- and versioned expressions.
        for bb in self.rpo.clone() {
            if self.pt.is_join(bb) {
                self.join_blocks.push(bb);
            }
            for inst in self.func.layout().insts(bb).collect::<Vec<_>>() {
                self.register_inst(inst, bb);
            }
        }

        self.assign_orders();
        trace!("PRE init: {} classes, {} joins", self.pexprs.len(), self.join_blocks.len());
        self.dump_expressions();
    }

    /// Dump the expression classes for debugging.
    fn dump_expressions(&self) {
        for &pe in &self.pexprs {
            if self.exprs.is_ignored(pe) {
                continue;
            }
            let vexprs = self.pexpr_vexprs.get(&pe).map(Vec::as_slice).unwrap_or(&[]);
            let insts = self.pexpr_insts.get(&pe).map(Vec::as_slice).unwrap_or(&[]);
            trace!(
                "  class {} ({:?}): {} occurrences {:?}",
                pe,
                self.exprs[pe].opcode,
                vexprs.len(),
                insts,
            );
        }
    }

    fn register_inst(&mut self, inst: Inst, bb: Block) {
        // Constants are interned per value so equal constants share one
        // expression and therefore one version.
        if let InstData::ConstInt { imm, .. } = &self.func.dfg()[inst] {
            let imm = imm.clone();
            let result = self.func.dfg().inst_result(inst);
            let ce = self.intern_constant(imm, result);
            self.inst_to_vexpr.insert(inst, ce);
            self.value_to_expr.insert(result, ce);
            return;
        }

        let candidate = self.create_expression(inst);
        let mut pe = candidate;
        for &p in &self.pexprs {
            if self.exprs.equal(p, candidate) {
                pe = p;
                break;
            }
        }
        if pe == candidate {
            self.pexprs.push(pe);
        }
        if !self.pexpr_protos.contains_key(&pe) && !self.exprs.is_ignored(pe) {
            self.pexpr_protos.insert(pe, self.func.dfg()[inst].clone());
        }

        // This is the real versioned expression.
        let ve = self.create_expression(inst);
        self.add_expression(pe, ve, inst, bb);
        self.pexpr_versions.entry(pe).or_default();
    }

    /// Intern a constant, creating its expression on first sight.
    fn intern_constant(&mut self, imm: IntValue, source: Value) -> Expr {
        if let Some(&e) = self.const_pool.get(&imm) {
            return e;
        }
        let version = self.next_constant_version;
        self.next_constant_version -= 1;
        let e = self.exprs.add(ExprData {
            opcode: None,
            ty: imm.ty(),
            version,
            saves: 0,
            kind: ExprKind::Constant {
                value: imm.clone(),
                source: Some(source),
            },
        });
        self.const_pool.insert(imm, e);
        self.value_to_expr.insert(source, e);
        self.expr_to_value.insert(e, source);
        self.expr_to_pexpr.insert(e, e);
        e
    }

    /// Map a value to its canonical representative.
    ///
    /// Equal constants are represented by the first definition encountered.
    fn canonical_value(&mut self, v: Value) -> Value {
        if let Some(imm) = self.func.dfg().get_const_int(v) {
            let imm = imm.clone();
            let ce = self.intern_constant(imm, v);
            return self.expr_to_value[&ce];
        }
        v
    }

    // ----- Expression creation -----------------------------------------------

    /// Create a fresh expression for an instruction.
    pub(crate) fn create_expression(&mut self, inst: Inst) -> Expr {
        let opcode = self.func.dfg()[inst].opcode();
        if opcode.is_terminator() {
            return self.create_ignored_expression(inst);
        }
        match opcode {
            Opcode::Phi => self.create_phi_expression(inst),
            Opcode::Call => self.create_unknown_expression(inst),
            Opcode::ConstInt => {
                let imm = self.func.dfg()[inst].get_const_int().unwrap().clone();
                let result = self.func.dfg().inst_result(inst);
                self.intern_constant(imm, result)
            }
            _ => self.create_basic_expression(inst),
        }
    }

    fn create_ignored_expression(&mut self, inst: Inst) -> Expr {
        let version = self.next_ignored_version;
        self.next_ignored_version -= 1;
        let opcode = self.func.dfg()[inst].opcode();
        self.exprs.add(ExprData {
            opcode: Some(opcode),
            ty: void_ty(),
            version,
            saves: 0,
            kind: ExprKind::Ignored,
        })
    }

    fn create_unknown_expression(&mut self, inst: Inst) -> Expr {
        let version = self.next_ignored_version;
        self.next_ignored_version -= 1;
        let opcode = self.func.dfg()[inst].opcode();
        self.exprs.add(ExprData {
            opcode: Some(opcode),
            ty: self.func.dfg().inst_type(inst),
            version,
            saves: 0,
            kind: ExprKind::Unknown,
        })
    }

    fn create_phi_expression(&mut self, inst: Inst) -> Expr {
        let block = self.func.layout().inst_block(inst).unwrap();
        let raw_args = self.func.dfg()[inst].args().to_vec();
        let args = raw_args
            .into_iter()
            .map(|a| self.canonical_value(a))
            .collect();
        self.exprs.add(ExprData {
            opcode: Some(Opcode::Phi),
            ty: self.func.dfg().inst_type(inst),
            version: VR_UNSET,
            saves: 0,
            kind: ExprKind::Phi { block, args },
        })
    }

    fn create_basic_expression(&mut self, inst: Inst) -> Expr {
        let mut opcode = self.func.dfg()[inst].opcode();
        let raw_args = self.func.dfg()[inst].args().to_vec();
        let mut args: Vec<Value> = raw_args
            .into_iter()
            .map(|a| self.canonical_value(a))
            .collect();

        // Commutative instructions that only differ by a permutation of their
        // operands must map to the same class, so their operands are sorted by
        // rank. Comparisons get their predicate swapped along with the
        // operands.
        if opcode.is_commutative() && args.len() == 2 {
            if self.should_swap_operands(args[0], args[1]) {
                args.swap(0, 1);
            }
        } else if opcode.is_compare() {
            if self.should_swap_operands(args[0], args[1]) {
                args.swap(0, 1);
                opcode = opcode.swapped_predicate();
            }
        }

        // Opportunistic simplification. The interesting outcomes are the ones
        // that turn the computation into a constant or a free variable; the
        // expression is then no candidate for redundancy elimination at all.
        match simplify_inst(self.func.dfg(), opcode, &args) {
            Some(Simplified::Value(v)) => {
                if self.func.dfg().get_value_arg(v).is_some() {
                    let version = self.next_variable_version;
                    self.next_variable_version -= 1;
                    let ty = self.func.value_type(v);
                    return self.exprs.add(ExprData {
                        opcode: None,
                        ty,
                        version,
                        saves: 0,
                        kind: ExprKind::Variable { value: v },
                    });
                }
                if let Some(imm) = self.func.dfg().get_const_int(v) {
                    let imm = imm.clone();
                    let version = self.next_constant_version;
                    self.next_constant_version -= 1;
                    return self.exprs.add(ExprData {
                        opcode: None,
                        ty: imm.ty(),
                        version,
                        saves: 0,
                        kind: ExprKind::Constant {
                            value: imm,
                            source: Some(v),
                        },
                    });
                }
                // The simplifier pointed at another computation; keep the
                // expression as it is and let the main algorithm deal with it.
            }
            Some(Simplified::Const(imm)) => {
                let version = self.next_constant_version;
                self.next_constant_version -= 1;
                return self.exprs.add(ExprData {
                    opcode: None,
                    ty: imm.ty(),
                    version,
                    saves: 0,
                    kind: ExprKind::Constant {
                        value: imm,
                        source: None,
                    },
                });
            }
            None => (),
        }

        self.exprs.add(ExprData {
            opcode: Some(opcode),
            ty: self.func.dfg().inst_type(inst),
            version: VR_UNSET,
            saves: 0,
            kind: ExprKind::Basic { args },
        })
    }

    /// Register a versioned expression occurrence.
    pub(crate) fn add_expression(&mut self, pe: Expr, ve: Expr, inst: Inst, bb: Block) {
        if let Some(result) = self.func.dfg().get_inst_result(inst) {
            self.expr_to_value.insert(ve, result);
            self.value_to_expr.insert(result, ve);
        }
        self.inst_to_vexpr.insert(inst, ve);
        self.vexpr_to_inst.insert(ve, inst);
        self.expr_to_pexpr.insert(ve, pe);
        if !self.pexprs.contains(&pe) {
            self.pexprs.push(pe);
        }
        self.pexpr_vexprs.entry(pe).or_default().push(ve);
        self.pexpr_insts.entry(pe).or_default().push(inst);
        let blocks = self.pexpr_blocks.entry(pe).or_default();
        if !blocks.contains(&bb) {
            blocks.push(bb);
        }
        self.pexpr_versions.entry(pe).or_default();
        // Must be the last.
        self.add_substitution(ve, ve);
    }

    // ----- Operand ranking ---------------------------------------------------

    /// Rank a value for the purpose of operand canonicalization.
    fn rank(&self, v: Value) -> u64 {
        if self.func.dfg().get_const_int(v).is_some() {
            return 1;
        }
        if let Some(arg) = self.func.dfg().get_value_arg(v) {
            return 2 + self.func.sig().arg_num(arg) as u64;
        }
        // Need to shift the instruction order by the number of arguments to
        // account for the ranking above.
        if let Some(inst) = self.func.dfg().get_value_inst(v) {
            if let Some(&dfs) = self.instr_dfs.get(&inst) {
                return 3 + self.num_args as u64 + dfs;
            }
        }
        // Unreachable or something else, just return a really large number.
        std::u64::MAX
    }

    /// Decide whether a commutative operand pair should be swapped.
    ///
    /// Ranks give a strict weak ordering for everything but constants; the
    /// arena index breaks the remaining ties.
    fn should_swap_operands(&self, a: Value, b: Value) -> bool {
        (self.rank(a), a.index()) > (self.rank(b), b.index())
    }

    // ----- DFS / SDFS numbering ----------------------------------------------

    /// Pre-order of the dominator tree with children sorted into RPO, or into
    /// reverse RPO when `reverse` is set.
    fn dt_preorder(&self, reverse: bool) -> Vec<Block> {
        let mut out = Vec::with_capacity(self.rpo.len());
        let mut stack = vec![self.func.layout().entry()];
        while let Some(bb) = stack.pop() {
            out.push(bb);
            let mut children: Vec<Block> = self
                .dt
                .children(bb)
                .iter()
                .cloned()
                .filter(|c| self.rpo_index.contains_key(c))
                .collect();
            children.sort_by_key(|c| self.rpo_index[c]);
            if reverse {
                children.reverse();
            }
            // Push in reverse so the first child is visited first.
            for &c in children.iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// Assign each instruction its two orderings.
    ///
    /// The DFS order walks the dominator tree with siblings in RPO and is the
    /// main traversal order. The SDFS order uses reversed siblings; a drop in
    /// SDFS signals that the traversal has ascended the tree, which is what
    /// the renaming stacks key their backtracking on. Both leave gaps so that
    /// inserted instructions can be given valid intermediate numbers.
    fn assign_orders(&mut self) {
        self.dfs_blocks = self.dt_preorder(false);
        let mut count = ORDER_GROWTH;
        for &bb in &self.dfs_blocks {
            for inst in self.func.layout().insts(bb) {
                self.instr_dfs.insert(inst, count);
                count += ORDER_STEP;
            }
            count += ORDER_GROWTH;
        }

        let sdfs_blocks = self.dt_preorder(true);
        let mut count = ORDER_GROWTH;
        for &bb in &sdfs_blocks {
            for inst in self.func.layout().insts(bb) {
                self.instr_sdfs.insert(inst, count);
                count += ORDER_STEP;
            }
            count += ORDER_GROWTH;
        }
    }

    /// Slot a freshly inserted instruction into the order just before another.
    pub(crate) fn set_order_before(&mut self, inst: Inst, before: Inst) {
        let dfs = self.instr_dfs[&before];
        self.instr_dfs.insert(inst, dfs);
        self.instr_dfs.insert(before, dfs + 1);
        let sdfs = self.instr_sdfs[&before];
        self.instr_sdfs.insert(inst, sdfs);
        self.instr_sdfs.insert(before, sdfs + 1);
    }

    // ----- Substitutions -----------------------------------------------------

    /// The proto-expression of an expression, or the expression itself if it
    /// is its own class.
    pub(crate) fn pexpr_of(&self, e: Expr) -> Expr {
        self.expr_to_pexpr.get(&e).cloned().unwrap_or(e)
    }

    /// Record a substitution `e -> s`.
    pub(crate) fn add_substitution(&mut self, e: Expr, s: Expr) {
        self.add_substitution_full(e, s, false, false)
    }

    /// Record a substitution without chasing `s` to its fixpoint first.
    pub(crate) fn add_substitution_direct(&mut self, e: Expr, s: Expr) {
        self.add_substitution_full(e, s, true, false)
    }

    pub(crate) fn add_substitution_full(&mut self, e: Expr, s: Expr, direct: bool, force: bool) {
        assert!(
            force
                || self.pexpr_of(e) == self.pexpr_of(s)
                || self.exprs.is_bottom_or_var_or_const(s)
                || self.exprs.is_top(s),
            "substituting expression must be of the same class, top, or bottom"
        );
        let pe = self.pexpr_of(e);
        if e == s {
            self.substitutions.entry(pe).or_default().insert(e, s);
            return;
        }
        let s = if direct { s } else { self.substitution_of(s) };
        let prev = self.substitutions.entry(pe).or_default().insert(e, s);
        if !self.exprs.is_factor(e) && prev != Some(s) {
            self.exprs.add_save(s);
        }
    }

    /// Remove the substitution record of an expression.
    pub(crate) fn rem_substitution(&mut self, e: Expr) {
        let pe = self.pexpr_of(e);
        if let Some(map) = self.substitutions.get_mut(&pe) {
            map.remove(&e);
        }
    }

    /// The direct substitution of an expression, or the expression itself.
    pub(crate) fn substitution_direct(&self, e: Expr) -> Expr {
        if self.exprs.is_bottom_or_var_or_const(e) || self.exprs.is_top(e) {
            return e;
        }
        let pe = self.pexpr_of(e);
        self.substitutions
            .get(&pe)
            .and_then(|m| m.get(&e))
            .cloned()
            .unwrap_or(e)
    }

    /// Chase the substitution chain of an expression to its fixpoint.
    ///
    /// The fixpoint is the expression itself, another expression, or one of
    /// the lattice sentinels.
    pub(crate) fn substitution_of(&self, e: Expr) -> Expr {
        let mut cur = e;
        let mut fuel = 1_000_000u32;
        loop {
            let next = self.substitution_direct(cur);
            if self.exprs.is_top(next) || self.exprs.is_bottom(next) {
                return next;
            }
            if next == cur {
                return cur;
            }
            cur = next;
            fuel -= 1;
            assert!(fuel > 0, "substitution chain does not terminate");
        }
    }

    /// Chase the substitution chain, but stop at the last real expression
    /// before a lattice sentinel.
    pub(crate) fn substitution_of_real(&self, e: Expr) -> Expr {
        let mut cur = e;
        let mut fuel = 1_000_000u32;
        loop {
            let next = self.substitution_direct(cur);
            if next == cur || self.exprs.is_top(next) || self.exprs.is_bottom(next) {
                return cur;
            }
            cur = next;
            fuel -= 1;
            assert!(fuel > 0, "substitution chain does not terminate");
        }
    }

    /// Resolve the value an expression stands for.
    pub(crate) fn expr_value(&self, e: Expr) -> Value {
        if let Some(&v) = self.expr_to_value.get(&e) {
            return v;
        }
        match self.exprs[e].kind {
            ExprKind::Variable { value } => value,
            ExprKind::Constant {
                source: Some(source),
                ..
            } => source,
            _ => panic!("expression {} has no value", e),
        }
    }

    // ----- Dominance ---------------------------------------------------------

    /// The instruction that stands in for an expression in dominance queries.
    ///
    /// There is a certain dominance trickery with factored and non-factored
    /// phis: a factor occurs at the entry of its block, before any real
    /// instruction, so it is represented by the terminator of the immediate
    /// dominator. A plain phi is represented by the first instruction of its
    /// block.
    fn dom_representative(&self, e: Expr) -> Inst {
        match self.exprs[e].kind {
            ExprKind::Factor(ref f) => {
                let idom = self.dt.dominator(f.block);
                self.func.layout().terminator(idom)
            }
            ExprKind::Phi { .. } => {
                let inst = self.vexpr_to_inst[&e];
                let bb = self.func.layout().inst_block(inst).unwrap();
                self.func.layout().first_inst(bb).unwrap()
            }
            _ => self.vexpr_to_inst[&e],
        }
    }

    /// Check if the definition of `def` strictly dominates `use_`.
    pub(crate) fn strictly_dominates(&self, def: Expr, use_: Expr) -> bool {
        let idef = self.dom_representative(def);
        let iuse = self.dom_representative(use_);
        if idef == iuse {
            return false;
        }
        self.dt.inst_dominates_inst(self.func, idef, iuse)
    }

    /// Check if the definition of `def` dominates `use_`, counting a shared
    /// representative as dominating.
    pub(crate) fn not_strictly_dominates(&self, def: Expr, use_: Expr) -> bool {
        let idef = self.dom_representative(def);
        let iuse = self.dom_representative(use_);
        if idef == iuse {
            return true;
        }
        self.dt.inst_dominates_inst(self.func, idef, iuse)
    }

    /// Check whether all operand definitions dominate `use_`.
    ///
    /// The earliest occurrence of each operand is what counts, so operands are
    /// chased through their substitutions first. Variables and constants occur
    /// indefinitely before any expression.
    pub(crate) fn operands_dominate(&self, args: &[Value], use_: Expr, strict: bool) -> bool {
        for &op in args {
            let e = match self.value_to_expr.get(&op) {
                Some(&e) => e,
                None => continue,
            };
            if self.exprs.is_variable_or_constant(e) {
                continue;
            }
            let e = self.substitution_of_real(e);
            if self.exprs.is_variable_or_constant(e) {
                continue;
            }
            let ok = if strict {
                self.strictly_dominates(e, use_)
            } else {
                self.not_strictly_dominates(e, use_)
            };
            if !ok {
                return false;
            }
        }
        true
    }

    // ----- Real-use queries --------------------------------------------------

    /// The expressions sharing the class and version of `e`.
    pub(crate) fn same_version_exprs(&self, e: Expr) -> Vec<Expr> {
        let pe = self.pexpr_of(e);
        self.pexpr_versions
            .get(&pe)
            .and_then(|m| m.get(&self.exprs.version(e)))
            .cloned()
            .unwrap_or_default()
    }

    fn users_on_path_before(&self, inst: Inst, path: &[Block], edfs: u64) -> bool {
        let result = match self.func.dfg().get_inst_result(inst) {
            Some(r) => r,
            None => return false,
        };
        for u in self.func.dfg().uses(result) {
            // Phis that play the role of a factor are handled by the main
            // algorithm, not as plain users.
            if self.phi_to_factor.contains_key(&u) {
                continue;
            }
            let ub = match self.func.layout().inst_block(u) {
                Some(b) => b,
                None => continue,
            };
            if path.contains(&ub) && self.instr_dfs.get(&u).map(|&d| d <= edfs).unwrap_or(false) {
                return true;
            }
        }
        false
    }

    /// Check whether some expression of the version of `s` is used on the
    /// walked path before `e`.
    pub(crate) fn has_real_use_before(&self, s: Expr, path: &[Block], e: Expr) -> bool {
        let edfs = self.instr_dfs[&self.vexpr_to_inst[&e]];
        for v in self.same_version_exprs(s) {
            if let Some(&inst) = self.vexpr_to_inst.get(&v) {
                if self.users_on_path_before(inst, path, edfs) {
                    return true;
                }
            }
        }
        false
    }

    /// Check whether the version of factor `f` is used on the walked path
    /// before `e`.
    pub(crate) fn factor_has_real_use_before(&self, f: Expr, path: &[Block], e: Expr) -> bool {
        let edfs = self.instr_dfs[&self.vexpr_to_inst[&e]];
        // A materialized factor is used through its phi.
        if let Some(&phi) = self.factor_to_phi.get(&f) {
            if self.users_on_path_before(phi, path, edfs) {
                return true;
            }
        }
        // Every expression of the same version follows the factor by
        // definition.
        for v in self.same_version_exprs(f) {
            if let Some(&inst) = self.vexpr_to_inst.get(&v) {
                if self.users_on_path_before(inst, path, edfs) {
                    return true;
                }
            }
        }
        false
    }

    // ----- Factor bookkeeping ------------------------------------------------

    /// Create a factor expression for a class at the entry of a block.
    ///
    /// Registration happens separately through `add_factor`.
    pub(crate) fn create_factor_expression(&mut self, pexpr: Expr, block: Block) -> Expr {
        let mut fd = FactorData::new(pexpr, block);
        // The order of the predecessor list is fixed here.
        for p in self.pt.pred(block).collect::<Vec<_>>() {
            fd.add_pred(p);
            // Make sure unreachable predecessors contribute a bottom.
            let reachable = self
                .func
                .layout()
                .last_inst(p)
                .map(|term| self.inst_to_vexpr.contains_key(&term))
                .unwrap_or(false);
            if !reachable {
                fd.set_operand_for_pred(p, Expr::bottom());
            }
        }
        let ty = if self.exprs.is_top(pexpr) || self.exprs.is_bottom(pexpr) {
            void_ty()
        } else {
            self.exprs[pexpr].ty.clone()
        };
        let e = self.exprs.add(ExprData {
            opcode: None,
            ty,
            version: VR_UNSET,
            saves: 0,
            kind: ExprKind::Factor(fd),
        });
        self.expr_to_pexpr.insert(e, pexpr);
        e
    }

    /// Register a factor with its class and block.
    pub(crate) fn add_factor(&mut self, fe: Expr, pexpr: Expr, block: Block) {
        assert!(fe != pexpr);
        self.exprs.factor_mut(fe).pexpr = pexpr;
        let ty = self.exprs[pexpr].ty.clone();
        self.exprs[fe].ty = ty;
        self.expr_to_pexpr.insert(fe, pexpr);
        self.block_factors.entry(block).or_default().push(fe);
        self.fexprs.push(fe);
        // Must be the last.
        self.add_substitution(fe, fe);
    }

    /// Check whether a factor is still registered.
    pub(crate) fn is_live_factor(&self, fe: Expr) -> bool {
        self.fexprs.contains(&fe)
    }

    /// Remove a factor from all records.
    pub(crate) fn kill_factor(&mut self, fe: Expr, bottom_substitute: bool) {
        // Must be the first.
        if bottom_substitute {
            self.add_substitution(fe, Expr::bottom());
        }

        let block = self.exprs.factor(fe).block;
        if let Some(list) = self.block_factors.get_mut(&block) {
            list.retain(|&f| f != fe);
        }
        self.fexprs.retain(|&f| f != fe);
        self.vexpr_to_inst.remove(&fe);
        self.expr_to_value.remove(&fe);

        if self.exprs.factor(fe).materialized {
            self.exprs.factor_mut(fe).materialized = false;
            let phi = self.factor_to_phi.remove(&fe).unwrap();
            self.phi_to_factor.remove(&phi);

            // The phi goes back to being a plain phi expression.
            let bb = self.func.layout().inst_block(phi).unwrap();
            let e = self.create_expression(phi);
            let p = self.create_expression(phi);
            self.add_expression(p, e, phi, bb);
        }
    }

    /// Bind a factor to the real phi that plays its role.
    pub(crate) fn materialize_factor(&mut self, fe: Expr, phi: Inst) {
        self.exprs.factor_mut(fe).materialized = true;

        // These may not exist if the phi was just created.
        let pve = self.inst_to_vexpr.get(&phi).cloned();

        if let Some(pve) = pve {
            if let Some(ppe) = self.expr_to_pexpr.get(&pve).cloned() {
                // Remove anything related to the phi's original class; before
                // the phi was proven to be a factor it was grouped on its own
                // phi proto.
                self.pexpr_vexprs.remove(&ppe);
                self.pexpr_insts.remove(&ppe);
                self.pexpr_blocks.remove(&ppe);
                self.pexpr_versions.remove(&ppe);
                self.pexpr_protos.remove(&ppe);
                self.pexprs.retain(|&p| p != ppe);
            }

            self.rem_substitution(pve);
            self.expr_to_value.remove(&pve);
            self.vexpr_to_inst.remove(&pve);
            self.expr_to_pexpr.remove(&pve);

            // If there is a factor that uses this phi as operand, it now uses
            // the factor instead.
            for f in self.fexprs.clone() {
                if self.exprs.factor(f).has_operand(pve) {
                    self.exprs.factor_mut(f).replace_operand(pve, fe);
                }
            }
        }

        self.factor_to_phi.insert(fe, phi);
        self.phi_to_factor.insert(phi, fe);
        self.inst_to_vexpr.insert(phi, fe);
        self.vexpr_to_inst.insert(fe, phi);
        if let Some(result) = self.func.dfg().get_inst_result(phi) {
            self.expr_to_value.insert(fe, result);
            self.value_to_expr.insert(result, fe);
        }
    }

    /// Replace a factor with another expression.
    ///
    /// Returns true if the IR changed, which is the case for materialized
    /// factors whose phi is retired.
    pub(crate) fn replace_factor(&mut self, fe: Expr, ve: Expr, hru: bool, direct: bool) -> bool {
        if self.exprs.factor(fe).materialized {
            self.replace_factor_materialized(fe, ve, hru, direct);
            true
        } else {
            self.replace_factor_finalize(fe, ve, hru, direct);
            false
        }
    }

    fn replace_factor_materialized(&mut self, fe: Expr, ve: Expr, hru: bool, direct: bool) {
        // We want the most recent expression.
        let ve = if direct { ve } else { self.substitution_of(ve) };
        let top_or_bot = self.exprs.is_top(ve) || self.exprs.is_bottom(ve);

        let phi = self.factor_to_phi[&fe];
        let phi_result = self.func.dfg().inst_result(phi);

        // Add a save for every real use of the phi.
        for u in self.func.dfg().uses(phi_result).collect::<Vec<_>>() {
            if self.func.layout().inst_block(u).is_none() {
                continue;
            }
            if top_or_bot && !self.kill_list.contains(&u) {
                let factor_user = self
                    .inst_to_vexpr
                    .get(&u)
                    .map(|&ue| self.exprs.is_factor(ue))
                    .unwrap_or(false);
                if !factor_user {
                    unreachable!("cannot replace a factor with a sentinel for a live user");
                }
            }
            self.exprs.add_save(ve);
        }

        // Replace the phi uses with a real instruction result only.
        let unbound_factor =
            self.exprs.is_factor(ve) && !self.factor_to_phi.contains_key(&ve);
        if !top_or_bot && !unbound_factor {
            let v = self.expr_value(ve);
            self.func.dfg_mut().replace_use(phi_result, v);
            Stats::bump(&self.ctx.stats.insts_substituted);
        }

        self.exprs.factor_mut(fe).materialized = false;
        self.factor_to_phi.remove(&fe);
        self.phi_to_factor.remove(&phi);

        self.kill_list.push(phi);

        // The rest is the same as for a non-materialized factor.
        self.replace_factor_finalize(fe, ve, hru, direct);
    }

    fn replace_factor_finalize(&mut self, fe: Expr, ve: Expr, hru: bool, direct: bool) {
        // We want the most recent expression.
        let ve = if direct { ve } else { self.substitution_of(ve) };

        // Replace all factor uses. No saves here: factors do not use their
        // operands before they are materialized.
        for f in self.fexprs.clone() {
            if f == fe || !self.is_live_factor(f) {
                continue;
            }
            if !self.exprs.factor(f).has_operand(fe) {
                continue;
            }
            {
                let fd = self.exprs.factor_mut(f);
                for i in 0..fd.operands.len() {
                    if fd.operands[i] == fe {
                        fd.operands[i] = ve;
                        fd.is_cycle[i] = false;
                    }
                }
                fd.set_has_real_use_of(ve, hru);
            }

            // If the replacement assumes the same version we create a cycle.
            if self.exprs.version(f) == self.exprs.version(ve) {
                // An induction operand makes the factor immovable; kill it
                // right away.
                if self.is_induction_expression(f, ve) {
                    self.kill_factor(f, true);
                } else {
                    self.exprs.factor_mut(f).set_is_cycle_of(ve, true);
                }
            }
        }

        // Any expression of the same version follows this factor occurrence
        // by definition and can use the replacement as well.
        for v in self.same_version_exprs(fe) {
            self.add_substitution_full(v, ve, direct, false);
        }

        // A newly created replacement inherits the factor's version.
        if self.exprs.version(ve) == VR_UNSET {
            let version = self.exprs.version(fe);
            self.exprs.set_version(ve, version);
        }

        self.kill_factor(fe, false);

        // Other expressions may still reference the factor itself.
        self.add_substitution_full(fe, ve, direct, false);
    }

    // ----- Induction ---------------------------------------------------------

    /// Check whether `e` computes on a phi that is the materialization of the
    /// factor `f`, i.e. whether it is an induction step through `f`.
    pub(crate) fn is_induction_expression(&self, f: Expr, e: Expr) -> bool {
        if !self.exprs.is_basic(e) {
            return false;
        }
        let inst = match self.vexpr_to_inst.get(&e) {
            Some(&inst) => inst,
            None => return false,
        };
        for &op in self.func.dfg()[inst].args() {
            if let Some(op_inst) = self.func.dfg().get_value_inst(op) {
                if self.func.dfg()[op_inst].opcode().is_phi()
                    && self.phi_to_factor.get(&op_inst) == Some(&f)
                {
                    return true;
                }
            }
        }
        false
    }

    // ----- Instruction insertion ---------------------------------------------

    /// Clone the proto computation of a class and insert it before an
    /// instruction.
    ///
    /// Constant operands whose definition does not dominate the insertion
    /// point are rematerialized right before the clone.
    pub(crate) fn clone_proto_before(&mut self, pe: Expr, before: Inst) -> Inst {
        let mut data = self.pexpr_protos[&pe].clone();
        let ty = self.exprs[pe].ty.clone();
        for i in 0..data.args().len() {
            let arg = data.args()[i];
            let imm = match self.func.dfg().get_const_int(arg) {
                Some(imm) => imm.clone(),
                None => continue,
            };
            if self.dt.value_dominates_inst(self.func, arg, before) {
                continue;
            }
            let mut builder = FunctionBuilder::new(self.func);
            builder.insert_before(before);
            let c = builder.ins().const_int(imm.clone());
            let ce = self.intern_constant(imm, c);
            self.value_to_expr.insert(c, ce);
            data.args_mut()[i] = c;
        }
        let mut builder = FunctionBuilder::new(self.func);
        builder.insert_before(before);
        builder.build_inst(data, ty)
    }

    /// Bump the save count of each operand's expression.
    pub(crate) fn set_all_operands_save(&mut self, inst: Inst) {
        for op in self.func.dfg()[inst].args().to_vec() {
            if let Some(&e) = self.value_to_expr.get(&op) {
                self.exprs.add_save(e);
            }
        }
    }

    // ----- Statistics --------------------------------------------------------

    pub(crate) fn bump(&self, counter: &AtomicUsize) {
        Stats::bump(counter);
    }

    pub(crate) fn stats(&self) -> &crate::opt::Stats {
        &self.ctx.stats
    }

    // ----- Debugging ---------------------------------------------------------

    /// Dump the factors for debugging.
    pub(crate) fn dump_factors(&self, caption: &str) {
        debug!("{}:", caption);
        for &fe in &self.fexprs {
            let fd = self.exprs.factor(fe);
            debug!(
                "  {} in {}: class {} version {} ds={} cba={} later={} mat={} ops={:?}",
                fe,
                fd.block,
                fd.pexpr,
                self.exprs.version(fe),
                fd.down_safe,
                fd.can_be_avail,
                fd.later,
                fd.materialized,
                fd.operands,
            );
        }
    }
}
