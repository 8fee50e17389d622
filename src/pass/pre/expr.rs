// Copyright (c) 2017-2021 Fabian Schuiki

//! The expression model of the partial redundancy elimination pass.
//!
//! Expressions abstract instructions into equivalence classes: a
//! proto-expression stands for a whole class of computations that are equal
//! modulo operand value numbers, and every occurrence of the class in the
//! program is a versioned expression. Factors are the expression-level
//! analogue of phi nodes. All expressions live in an arena that is torn down
//! when the pass finishes.

use crate::impl_table_key;
use crate::ir::{Block, Opcode, Value};
use crate::table::{PrimaryTable, TableKey};
use crate::ty::{void_ty, Type};
use crate::value::IntValue;

impl_table_key! {
    /// An expression in the arena.
    struct Expr(u32) as "x";
}

impl Expr {
    /// The slot reserved for the lattice top element.
    pub fn top() -> Expr {
        Expr::new(0)
    }

    /// The slot reserved for the lattice bottom element.
    pub fn bottom() -> Expr {
        Expr::new(1)
    }
}

/// Version number of an expression that was never assigned one.
pub const VR_UNSET: i64 = std::i64::MIN;
/// Version reserved for the lattice top element.
pub const VR_TOP: i64 = -2;
/// Version reserved for the lattice bottom element.
pub const VR_BOTTOM: i64 = -3;
/// First version of the descending range assigned to variables.
pub const VR_VARIABLE_LO: i64 = -1_000_000;
/// First version of the descending range assigned to constants.
pub const VR_CONSTANT_LO: i64 = -2_000_000;
/// First version of the descending range assigned to ignored expressions.
pub const VR_IGNORED_LO: i64 = -3_000_000;

/// An expression.
///
/// The header fields are shared by all kinds; the payload distinguishes them.
#[derive(Debug)]
pub struct ExprData {
    /// The opcode of the underlying instruction, if any.
    pub opcode: Option<Opcode>,
    /// The type of the value the expression produces.
    pub ty: Type,
    /// The SSA version of the expression.
    pub version: i64,
    /// The number of live references to the expression's value.
    pub saves: usize,
    /// The payload.
    pub kind: ExprKind,
}

/// The different kinds of expressions.
#[derive(Debug)]
pub enum ExprKind {
    /// The lattice top element.
    Top,
    /// The lattice bottom element.
    Bottom,
    /// An instruction invisible to the pass, e.g. a terminator.
    Ignored,
    /// An instruction the pass must not touch, e.g. a call.
    Unknown,
    /// A function argument or other free value.
    Variable {
        /// The value the expression stands for.
        value: Value,
    },
    /// A constant.
    Constant {
        /// The constant itself.
        value: IntValue,
        /// The value carrying the constant, if one exists in the IR.
        source: Option<Value>,
    },
    /// A computation with operand values.
    Basic {
        /// The canonicalized operands.
        args: Vec<Value>,
    },
    /// A phi node.
    Phi {
        /// The block containing the phi.
        block: Block,
        /// The incoming values.
        args: Vec<Value>,
    },
    /// A factor, the expression-level phi.
    Factor(FactorData),
}

/// The state of a factor expression.
#[derive(Debug)]
pub struct FactorData {
    /// The proto-expression the factor merges occurrences of.
    pub pexpr: Expr,
    /// The block at whose entry the factor occurs.
    pub block: Block,
    /// The predecessor edges, in the order fixed at construction.
    pub preds: Vec<Block>,
    /// The versioned expression reaching the factor along each edge.
    pub operands: Vec<Expr>,
    /// Whether the operand version is actually used along the edge.
    pub has_real_use: Vec<bool>,
    /// Whether the edge closes a cycle of the factor's own version.
    pub is_cycle: Vec<bool>,
    /// The value of the factor is used on every path from here.
    pub down_safe: bool,
    /// The value can be made available here without extra computations.
    pub can_be_avail: bool,
    /// Availability should be deferred to successors.
    pub later: bool,
    /// A real phi node stands in for this factor.
    pub materialized: bool,
}

impl FactorData {
    /// Create the state for a factor in `block` merging `pexpr`.
    pub fn new(pexpr: Expr, block: Block) -> Self {
        Self {
            pexpr,
            block,
            preds: Vec::new(),
            operands: Vec::new(),
            has_real_use: Vec::new(),
            is_cycle: Vec::new(),
            down_safe: true,
            can_be_avail: true,
            later: false,
            materialized: false,
        }
    }

    /// Add a predecessor edge slot.
    pub fn add_pred(&mut self, block: Block) {
        self.preds.push(block);
        self.operands.push(Expr::invalid());
        self.has_real_use.push(false);
        self.is_cycle.push(false);
    }

    /// Get the operand along the edge from `block`, if it was set.
    pub fn operand_for_pred(&self, block: Block) -> Option<Expr> {
        self.preds
            .iter()
            .position(|&p| p == block)
            .map(|idx| self.operands[idx])
            .filter(|e| !e.is_invalid())
    }

    /// Set the operand along every edge from `block`.
    pub fn set_operand_for_pred(&mut self, block: Block, expr: Expr) {
        for (idx, &p) in self.preds.iter().enumerate() {
            if p == block {
                self.operands[idx] = expr;
            }
        }
    }

    /// Check whether some operand slot holds `expr`.
    pub fn has_operand(&self, expr: Expr) -> bool {
        self.operands.iter().any(|&o| o == expr)
    }

    /// Replace every operand slot holding `old` with `new`.
    pub fn replace_operand(&mut self, old: Expr, new: Expr) {
        for o in &mut self.operands {
            if *o == old {
                *o = new;
            }
        }
    }

    /// Check whether the operand `expr` has a real use along some edge.
    pub fn has_real_use_of(&self, expr: Expr) -> bool {
        self.operands
            .iter()
            .zip(self.has_real_use.iter())
            .any(|(&o, &hru)| o == expr && hru)
    }

    /// Record whether the operand `expr` has a real use.
    pub fn set_has_real_use_of(&mut self, expr: Expr, hru: bool) {
        for (idx, &o) in self.operands.iter().enumerate() {
            if o == expr {
                self.has_real_use[idx] = hru;
            }
        }
    }

    /// Check whether the operand `expr` closes a cycle.
    pub fn is_cycle_of(&self, expr: Expr) -> bool {
        self.operands
            .iter()
            .zip(self.is_cycle.iter())
            .any(|(&o, &c)| o == expr && c)
    }

    /// Record whether the operand `expr` closes a cycle.
    pub fn set_is_cycle_of(&mut self, expr: Expr, cycle: bool) {
        for (idx, &o) in self.operands.iter().enumerate() {
            if o == expr {
                self.is_cycle[idx] = cycle;
            }
        }
    }

    /// Check whether any operand closes a cycle.
    pub fn any_cycles(&self) -> bool {
        self.is_cycle.iter().any(|&c| c)
    }

    /// Number of edges arriving from `block`.
    pub fn pred_mult(&self, block: Block) -> usize {
        self.preds.iter().filter(|&&p| p == block).count()
    }

    /// The factor becomes a real phi node.
    pub fn will_be_avail(&self) -> bool {
        self.can_be_avail && !self.later
    }
}

/// The expression arena.
///
/// The arena owns every expression created during one run of the pass. The
/// lattice sentinels occupy two reserved slots so they are comparable by key.
pub struct Exprs {
    table: PrimaryTable<Expr, ExprData>,
}

impl Exprs {
    /// Create a new arena with the lattice sentinels in place.
    pub fn new() -> Self {
        let mut table = PrimaryTable::new();
        let top = table.add(ExprData {
            opcode: None,
            ty: void_ty(),
            version: VR_TOP,
            saves: 0,
            kind: ExprKind::Top,
        });
        let bottom = table.add(ExprData {
            opcode: None,
            ty: void_ty(),
            version: VR_BOTTOM,
            saves: 0,
            kind: ExprKind::Bottom,
        });
        assert_eq!(top, Expr::top());
        assert_eq!(bottom, Expr::bottom());
        Self { table }
    }

    /// Add an expression to the arena.
    pub fn add(&mut self, data: ExprData) -> Expr {
        self.table.add(data)
    }

    /// Check if an expression is the lattice top.
    pub fn is_top(&self, e: Expr) -> bool {
        e == Expr::top()
    }

    /// Check if an expression is the lattice bottom.
    pub fn is_bottom(&self, e: Expr) -> bool {
        e == Expr::bottom()
    }

    /// Check if an expression is a variable or a constant.
    pub fn is_variable_or_constant(&self, e: Expr) -> bool {
        match self[e].kind {
            ExprKind::Variable { .. } | ExprKind::Constant { .. } => true,
            _ => false,
        }
    }

    /// Check if an expression is bottom, a variable, or a constant.
    pub fn is_bottom_or_var_or_const(&self, e: Expr) -> bool {
        self.is_bottom(e) || self.is_variable_or_constant(e)
    }

    /// Check if an expression does not participate in redundancy elimination.
    pub fn is_ignored(&self, e: Expr) -> bool {
        match self[e].kind {
            ExprKind::Ignored
            | ExprKind::Unknown
            | ExprKind::Variable { .. }
            | ExprKind::Constant { .. } => true,
            _ => false,
        }
    }

    /// Check if an expression is a factor.
    pub fn is_factor(&self, e: Expr) -> bool {
        match self[e].kind {
            ExprKind::Factor(..) => true,
            _ => false,
        }
    }

    /// Check if an expression is a basic computation.
    pub fn is_basic(&self, e: Expr) -> bool {
        match self[e].kind {
            ExprKind::Basic { .. } => true,
            _ => false,
        }
    }

    /// Check if an expression is a phi.
    pub fn is_phi(&self, e: Expr) -> bool {
        match self[e].kind {
            ExprKind::Phi { .. } => true,
            _ => false,
        }
    }

    /// Get the version of an expression.
    pub fn version(&self, e: Expr) -> i64 {
        self[e].version
    }

    /// Set the version of an expression.
    pub fn set_version(&mut self, e: Expr, version: i64) {
        self[e].version = version;
    }

    /// Get the save count of an expression.
    pub fn saves(&self, e: Expr) -> usize {
        self[e].saves
    }

    /// Add saves to an expression. The sentinels never own anything.
    pub fn add_saves(&mut self, e: Expr, n: usize) {
        if self.is_top(e) || self.is_bottom(e) {
            return;
        }
        self[e].saves += n;
    }

    /// Add one save to an expression.
    pub fn add_save(&mut self, e: Expr) {
        self.add_saves(e, 1);
    }

    /// Remove one save from an expression.
    pub fn rem_save(&mut self, e: Expr) {
        if self.is_top(e) || self.is_bottom(e) {
            return;
        }
        let saves = &mut self[e].saves;
        *saves = saves.saturating_sub(1);
    }

    /// Clear the save count of an expression.
    pub fn clr_saves(&mut self, e: Expr) {
        if self.is_top(e) || self.is_bottom(e) {
            return;
        }
        self[e].saves = 0;
    }

    /// Access the factor state of an expression.
    pub fn factor(&self, e: Expr) -> &FactorData {
        match self[e].kind {
            ExprKind::Factor(ref f) => f,
            _ => panic!("{} is not a factor", e),
        }
    }

    /// Mutable access to the factor state of an expression.
    pub fn factor_mut(&mut self, e: Expr) -> &mut FactorData {
        match self[e].kind {
            ExprKind::Factor(ref mut f) => f,
            _ => panic!("{} is not a factor", e),
        }
    }

    /// Get the operand values of a basic or phi expression.
    pub fn args(&self, e: Expr) -> &[Value] {
        match self[e].kind {
            ExprKind::Basic { ref args } => args,
            ExprKind::Phi { ref args, .. } => args,
            _ => &[],
        }
    }

    /// Check whether two expressions are structurally equal.
    ///
    /// Structural equality is used only to deduplicate proto-expressions;
    /// afterwards the arena key is the identity.
    pub fn equal(&self, a: Expr, b: Expr) -> bool {
        if a == b {
            return true;
        }
        let (da, db) = (&self[a], &self[b]);
        if da.opcode != db.opcode || da.ty != db.ty {
            return false;
        }
        match (&da.kind, &db.kind) {
            (ExprKind::Variable { value: va }, ExprKind::Variable { value: vb }) => va == vb,
            (ExprKind::Constant { value: va, .. }, ExprKind::Constant { value: vb, .. }) => {
                va == vb
            }
            (ExprKind::Basic { args: aa }, ExprKind::Basic { args: ab }) => aa == ab,
            (
                ExprKind::Phi {
                    block: ba,
                    args: aa,
                },
                ExprKind::Phi {
                    block: bb,
                    args: ab,
                },
            ) => ba == bb && aa == ab,
            _ => false,
        }
    }
}

impl std::ops::Index<Expr> for Exprs {
    type Output = ExprData;

    fn index(&self, idx: Expr) -> &ExprData {
        &self.table[idx]
    }
}

impl std::ops::IndexMut<Expr> for Exprs {
    fn index_mut(&mut self, idx: Expr) -> &mut ExprData {
        &mut self.table[idx]
    }
}
