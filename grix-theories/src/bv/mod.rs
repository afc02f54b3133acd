//! Bitvector theory plugin.
//!
//! Word-level interval propagation over bounded integer bitvectors with
//! comparison literals and an operator DAG, plus on-demand bit-blasting
//! of a bitvector's cone to CNF.
//!
//! The store ([`BvCore`]) is shared behind `Rc<RefCell<_>>` between the
//! plugin adapter registered with the engine and the graph plugin,
//! which reads intervals of bitvector-valued edge weights and bounds.

mod bitblast;
mod solver;

pub use bitblast::{bitblast, encode_comparison_now};
pub use solver::{BvCore, BvId, BvOp, CmpOp, CmpRhs, Interval, mask};

use grix_core::{Lit, Theory, TheoryConflict, TheoryId, TheoryView, Var};
use std::cell::RefCell;
use std::rc::Rc;

/// Shared handle to a bitvector store.
pub type BvHandle = Rc<RefCell<BvCore>>;

/// The plugin adapter registered with the engine; delegates to the
/// shared [`BvCore`].
pub struct BvTheory {
    core: BvHandle,
}

impl BvTheory {
    /// Create a plugin adapter around a shared store.
    #[must_use]
    pub fn new(core: BvHandle) -> Self {
        Self { core }
    }

    /// Another handle to the shared store.
    #[must_use]
    pub fn handle(&self) -> BvHandle {
        Rc::clone(&self.core)
    }
}

impl Theory for BvTheory {
    fn id(&self) -> TheoryId {
        self.core.borrow().theory_id()
    }

    fn name(&self) -> &str {
        "bv"
    }

    fn owns_var(&self, var: Var) -> bool {
        self.core.borrow().owns_var(var)
    }

    fn enqueue_theory(&mut self, lit: Lit, level: u32) {
        self.core.borrow_mut().enqueue_theory(lit, level);
    }

    fn propagate(&mut self, view: &mut dyn TheoryView) -> Result<(), TheoryConflict> {
        self.core.borrow_mut().propagate(view)
    }

    fn explain(&mut self, token: u32) -> Vec<Lit> {
        self.core.borrow().explain(token)
    }

    fn backtrack(&mut self, level: u32) {
        self.core.borrow_mut().backtrack(level);
    }

    fn check_satisfied(&mut self, _view: &mut dyn TheoryView) -> bool {
        let ok = self.core.borrow().check_satisfied();
        if ok {
            // Keep the model approximations across the post-solve
            // backtrack to level 0.
            self.core.borrow_mut().snapshot_model();
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grix_core::LBool;
    use grix_core::LazyReason;

    /// A fixed assignment backing a test view.
    struct TestView {
        values: Vec<LBool>,
        level: u32,
        enqueued: Vec<(Lit, LazyReason)>,
    }

    impl TestView {
        fn new(n: usize) -> Self {
            Self {
                values: vec![LBool::Undef; n],
                level: 1,
                enqueued: Vec::new(),
            }
        }

        fn assign(&mut self, lit: Lit) {
            self.values[lit.var().index()] = LBool::from_bool(!lit.sign());
        }
    }

    impl TheoryView for TestView {
        fn value(&self, lit: Lit) -> LBool {
            self.values[lit.var().index()].xor(lit.sign())
        }

        fn decision_level(&self) -> u32 {
            self.level
        }

        fn enqueue(&mut self, lit: Lit, reason: LazyReason) {
            self.enqueued.push((lit, reason));
        }
    }

    #[test]
    fn test_add_interval_wraps() {
        // a, b width 8; c = a + b; a ≥ 200, b ≥ 100 gives c ∈ [44, 254].
        let core = Rc::new(RefCell::new(BvCore::new(TheoryId(0))));
        let mut view = TestView::new(4);
        let (a, b, c, ge_a, ge_b);
        {
            let mut bv = core.borrow_mut();
            a = bv.new_anon(8).unwrap();
            b = bv.new_anon(8).unwrap();
            c = bv.new_anon(8).unwrap();
            bv.define(c, BvOp::Add(a, b)).unwrap();
            ge_a = Lit::pos(Var(0));
            ge_b = Lit::pos(Var(1));
            bv.add_comparison(CmpOp::Geq, a, CmpRhs::Const(200), ge_a)
                .unwrap();
            bv.add_comparison(CmpOp::Geq, b, CmpRhs::Const(100), ge_b)
                .unwrap();
        }
        view.assign(ge_a);
        view.assign(ge_b);
        let mut theory = BvTheory::new(Rc::clone(&core));
        theory.enqueue_theory(ge_a, 1);
        theory.enqueue_theory(ge_b, 1);
        theory.propagate(&mut view).unwrap();
        let iv = core.borrow().interval(c);
        assert_eq!((iv.lo, iv.hi), (44, 254));
    }

    #[test]
    fn test_comparison_implied_and_explained() {
        // a width 4, a ≥ 10 assigned; (a > 8) must be implied true.
        let core = Rc::new(RefCell::new(BvCore::new(TheoryId(0))));
        let mut view = TestView::new(2);
        let (geq, gt, a);
        {
            let mut bv = core.borrow_mut();
            a = bv.new_anon(4).unwrap();
            geq = Lit::pos(Var(0));
            gt = Lit::pos(Var(1));
            bv.add_comparison(CmpOp::Geq, a, CmpRhs::Const(10), geq)
                .unwrap();
            bv.add_comparison(CmpOp::Gt, a, CmpRhs::Const(8), gt).unwrap();
        }
        view.assign(geq);
        let mut theory = BvTheory::new(Rc::clone(&core));
        theory.enqueue_theory(geq, 1);
        theory.propagate(&mut view).unwrap();
        let (lit, reason) = *view
            .enqueued
            .iter()
            .find(|(l, _)| l.var() == gt.var())
            .expect("gt literal implied");
        assert_eq!(lit, gt);
        // The materialized reason is a clause with the implied literal
        // first and the (negated) support behind it.
        let clause = theory.explain(reason.token);
        assert_eq!(clause[0], gt);
        assert!(clause.contains(&!geq));
    }

    #[test]
    fn test_conflicting_bounds_raise_conflict() {
        // a ≤ 3 and a ≥ 10 conflict.
        let core = Rc::new(RefCell::new(BvCore::new(TheoryId(0))));
        let mut view = TestView::new(2);
        let (leq, geq);
        {
            let mut bv = core.borrow_mut();
            let a = bv.new_anon(4).unwrap();
            leq = Lit::pos(Var(0));
            geq = Lit::pos(Var(1));
            bv.add_comparison(CmpOp::Leq, a, CmpRhs::Const(3), leq)
                .unwrap();
            bv.add_comparison(CmpOp::Geq, a, CmpRhs::Const(10), geq)
                .unwrap();
        }
        view.assign(leq);
        view.assign(geq);
        let mut theory = BvTheory::new(core);
        theory.enqueue_theory(leq, 1);
        theory.enqueue_theory(geq, 1);
        let conflict = theory.propagate(&mut view).unwrap_err();
        assert!(conflict.clause.contains(&!leq));
        assert!(conflict.clause.contains(&!geq));
    }

    #[test]
    fn test_backtrack_restores_intervals() {
        let core = Rc::new(RefCell::new(BvCore::new(TheoryId(0))));
        let mut view = TestView::new(1);
        let (a, leq);
        {
            let mut bv = core.borrow_mut();
            a = bv.new_anon(8).unwrap();
            leq = Lit::pos(Var(0));
            bv.add_comparison(CmpOp::Leq, a, CmpRhs::Const(7), leq)
                .unwrap();
        }
        let before = core.borrow().interval(a);
        view.assign(leq);
        let mut theory = BvTheory::new(Rc::clone(&core));
        theory.enqueue_theory(leq, 1);
        theory.propagate(&mut view).unwrap();
        assert_eq!(core.borrow().interval(a).hi, 7);
        theory.backtrack(0);
        assert_eq!(core.borrow().interval(a), before);
    }

    #[test]
    fn test_ite_condition_drives_output() {
        let core = Rc::new(RefCell::new(BvCore::new(TheoryId(0))));
        let mut view = TestView::new(1);
        let (out, cond);
        {
            let mut bv = core.borrow_mut();
            let t = bv.new_const(8, 5).unwrap();
            let e = bv.new_const(8, 9).unwrap();
            out = bv.new_anon(8).unwrap();
            cond = Lit::pos(Var(0));
            bv.define(
                out,
                BvOp::Ite {
                    cond,
                    then_bv: t,
                    else_bv: e,
                },
            )
            .unwrap();
        }
        let mut theory = BvTheory::new(Rc::clone(&core));
        theory.propagate(&mut view).unwrap();
        // Condition undecided: the hull of both branches.
        let iv = core.borrow().interval(out);
        assert_eq!((iv.lo, iv.hi), (5, 9));
        view.assign(!cond);
        theory.enqueue_theory(!cond, 1);
        theory.propagate(&mut view).unwrap();
        let iv = core.borrow().interval(out);
        assert_eq!((iv.lo, iv.hi), (9, 9));
    }
}
