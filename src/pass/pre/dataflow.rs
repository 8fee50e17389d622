// Copyright (c) 2017-2021 Fabian Schuiki

//! The fixpoints over the factor graph.
//!
//! Three monotone propagations refine the flags seeded during rename:
//! DownSafety, CanBeAvail, and Later. A factor will become a real phi iff
//! `CanBeAvail && !Later`.

use super::{Expr, Pre};

impl<'a, 'ctx> Pre<'a, 'ctx> {
    /// Propagate the DownSafe flag initialized during rename up the factor
    /// graph.
    pub(super) fn down_safety(&mut self) {
        for fe in self.fexprs.clone() {
            if !self.is_live_factor(fe) || self.exprs.factor(fe).down_safe {
                continue;
            }
            for ve in self.exprs.factor(fe).operands.clone() {
                self.reset_down_safety(fe, ve);
            }
        }
        self.dump_factors("factors after down safety");
    }

    fn reset_down_safety(&mut self, fe: Expr, e: Expr) {
        if self.exprs.factor(fe).has_real_use_of(e) || !self.exprs.is_factor(e) {
            return;
        }
        if !self.exprs.factor(e).down_safe {
            return;
        }
        self.exprs.factor_mut(e).down_safe = false;
        for ve in self.exprs.factor(e).operands.clone() {
            self.reset_down_safety(e, ve);
        }
    }

    /// Compute CanBeAvail and Later.
    pub(super) fn will_be_avail(&mut self) {
        self.compute_can_be_avail();
        self.compute_later();
        self.dump_factors("factors after will be avail");
    }

    fn compute_can_be_avail(&mut self) {
        for fe in self.fexprs.clone() {
            if !self.is_live_factor(fe) {
                continue;
            }
            let fd = self.exprs.factor(fe);
            if !fd.down_safe && fd.can_be_avail {
                let has_bottom = fd.operands.iter().any(|&v| v == Expr::bottom());
                if has_bottom {
                    self.reset_can_be_avail(fe);
                }
            }
        }
    }

    fn reset_can_be_avail(&mut self, g: Expr) {
        self.exprs.factor_mut(g).can_be_avail = false;
        for fe in self.fexprs.clone() {
            if !self.is_live_factor(fe) {
                continue;
            }
            let fd = self.exprs.factor(fe);
            if !fd.has_operand(g) || fd.has_real_use_of(g) {
                continue;
            }

            // The operand ceases to exist; a cycle through it does too.
            {
                let fd = self.exprs.factor_mut(fe);
                if fd.is_cycle_of(g) {
                    fd.set_is_cycle_of(g, false);
                }
                fd.replace_operand(g, Expr::bottom());
            }

            let fd = self.exprs.factor(fe);
            if !fd.down_safe && fd.can_be_avail {
                self.reset_can_be_avail(fe);
            }
        }
    }

    fn compute_later(&mut self) {
        for fe in self.fexprs.clone() {
            let cba = self.exprs.factor(fe).can_be_avail;
            self.exprs.factor_mut(fe).later = cba;
        }
        for fe in self.fexprs.clone() {
            if !self.is_live_factor(fe) || !self.exprs.factor(fe).later {
                continue;
            }
            let fd = self.exprs.factor(fe);
            let anticipated = fd
                .operands
                .iter()
                .enumerate()
                .any(|(i, &v)| {
                    (fd.has_real_use[i] || fd.is_cycle[i]) && v != Expr::bottom()
                });
            if anticipated {
                self.reset_later(fe);
            }
        }
    }

    fn reset_later(&mut self, g: Expr) {
        self.exprs.factor_mut(g).later = false;
        for fe in self.fexprs.clone() {
            if !self.is_live_factor(fe) {
                continue;
            }
            if self.exprs.factor(fe).has_operand(g) && self.exprs.factor(fe).later {
                self.reset_later(fe);
            }
        }
    }
}
