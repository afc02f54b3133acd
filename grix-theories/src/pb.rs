//! Pseudo-Boolean theory plugin.
//!
//! Constraints `Σ cᵢ·lᵢ ⋈ rhs` are normalized at construction into rows
//! of the single shape `Σ cᵢ·lᵢ ≤ k` with positive coefficients
//! (flipping literals converts a `≥`). Propagation is counting-based:
//! once the true literals of a row exceed its budget the row conflicts,
//! and any literal whose coefficient no longer fits is implied false.

use grix_core::error::TheoryError;
use grix_core::{LBool, LazyReason, Lit, Theory, TheoryConflict, TheoryId, TheoryView, Var};
use rustc_hash::FxHashSet;

/// Comparison operator of a pseudo-Boolean constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PbOp {
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Leq,
    /// Equal (decomposed into `≤ ∧ ≥`).
    Eq,
    /// Greater than or equal.
    Geq,
    /// Strictly greater than.
    Gt,
}

#[derive(Debug, Clone)]
struct Row {
    /// Positive-coefficient terms.
    terms: Vec<(i64, Lit)>,
    /// Budget: Σ of true terms must stay ≤ this.
    budget: i64,
}

/// The pseudo-Boolean plugin: a bag of normalized rows.
pub struct PbTheory {
    id: TheoryId,
    rows: Vec<Row>,
    owned: FxHashSet<Var>,
    reasons: Vec<(u32, Vec<Lit>)>,
}

impl PbTheory {
    /// Create an empty plugin.
    #[must_use]
    pub fn new(id: TheoryId) -> Self {
        Self {
            id,
            rows: Vec::new(),
            owned: FxHashSet::default(),
            reasons: Vec::new(),
        }
    }

    /// Add `Σ coefficients·literals ⋈ rhs`.
    ///
    /// Coefficients must be positive; the row is rejected if the sum of
    /// coefficients overflows.
    pub fn add_constraint(
        &mut self,
        lits: &[Lit],
        coefficients: &[i64],
        rhs: i64,
        op: PbOp,
    ) -> Result<(), TheoryError> {
        debug_assert_eq!(lits.len(), coefficients.len());
        if coefficients.iter().any(|&c| c <= 0) {
            return Err(TheoryError::PbOverflow);
        }
        let mut total: i64 = 0;
        for &c in coefficients {
            total = total.checked_add(c).ok_or(TheoryError::PbOverflow)?;
        }
        let terms: Vec<(i64, Lit)> = coefficients.iter().copied().zip(lits.iter().copied()).collect();
        match op {
            PbOp::Leq => self.push_row(terms, rhs),
            PbOp::Lt => self.push_row(terms, rhs.saturating_sub(1)),
            PbOp::Geq => self.push_flipped(terms, total, rhs),
            PbOp::Gt => self.push_flipped(terms, total, rhs.saturating_add(1)),
            PbOp::Eq => {
                self.push_row(terms.clone(), rhs);
                self.push_flipped(terms, total, rhs);
            }
        }
        Ok(())
    }

    /// `Σ c·l ≥ k` becomes `Σ c·¬l ≤ total - k`.
    fn push_flipped(&mut self, terms: Vec<(i64, Lit)>, total: i64, k: i64) {
        let flipped = terms.into_iter().map(|(c, l)| (c, !l)).collect();
        self.push_row(flipped, total - k);
    }

    fn push_row(&mut self, terms: Vec<(i64, Lit)>, budget: i64) {
        for &(_, l) in &terms {
            self.owned.insert(l.var());
        }
        self.rows.push(Row { terms, budget });
    }

    /// Number of normalized rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }
}

impl Theory for PbTheory {
    fn id(&self) -> TheoryId {
        self.id
    }

    fn name(&self) -> &str {
        "pb"
    }

    fn owns_var(&self, var: Var) -> bool {
        self.owned.contains(&var)
    }

    fn enqueue_theory(&mut self, _lit: Lit, _level: u32) {
        // Row sums are recomputed from the view during propagation.
    }

    fn propagate(&mut self, view: &mut dyn TheoryView) -> Result<(), TheoryConflict> {
        for ri in 0..self.rows.len() {
            let row = self.rows[ri].clone();
            let mut sum_true: i64 = 0;
            let mut true_lits: Vec<Lit> = Vec::new();
            for &(c, l) in &row.terms {
                if view.value(l).is_true() {
                    sum_true += c;
                    true_lits.push(l);
                }
            }
            if sum_true > row.budget {
                return Err(TheoryConflict::new(
                    true_lits.iter().map(|&l| !l).collect(),
                ));
            }
            for &(c, l) in &row.terms {
                if view.value(l).is_undef() && sum_true + c > row.budget {
                    let mut clause = vec![!l];
                    clause.extend(true_lits.iter().map(|&t| !t));
                    let token = self.reasons.len() as u32;
                    self.reasons.push((view.decision_level(), clause));
                    view.enqueue(
                        !l,
                        LazyReason {
                            theory: self.id,
                            token,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn explain(&mut self, token: u32) -> Vec<Lit> {
        self.reasons[token as usize].1.clone()
    }

    fn backtrack(&mut self, level: u32) {
        while self.reasons.last().is_some_and(|r| r.0 > level) {
            self.reasons.pop();
        }
    }

    fn check_satisfied(&mut self, view: &mut dyn TheoryView) -> bool {
        self.rows.iter().all(|row| {
            let sum: i64 = row
                .terms
                .iter()
                .filter(|&&(_, l)| view.value(l) == LBool::True)
                .map(|&(c, _)| c)
                .sum();
            sum <= row.budget
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestView {
        values: Vec<LBool>,
        enqueued: Vec<Lit>,
    }

    impl TheoryView for TestView {
        fn value(&self, lit: Lit) -> LBool {
            self.values[lit.var().index()].xor(lit.sign())
        }

        fn decision_level(&self) -> u32 {
            1
        }

        fn enqueue(&mut self, lit: Lit, _reason: LazyReason) {
            self.enqueued.push(lit);
        }
    }

    fn lits(n: u32) -> Vec<Lit> {
        (0..n).map(|i| Lit::pos(Var(i))).collect()
    }

    #[test]
    fn test_budget_implies_negations() {
        // 2a + 2b + 3c ≤ 4 with a, b true: c must be false.
        let mut pb = PbTheory::new(TheoryId(0));
        pb.add_constraint(&lits(3), &[2, 2, 3], 4, PbOp::Leq).unwrap();
        let mut view = TestView {
            values: vec![LBool::True, LBool::True, LBool::Undef],
            enqueued: Vec::new(),
        };
        pb.propagate(&mut view).unwrap();
        assert_eq!(view.enqueued, vec![Lit::neg(Var(2))]);
    }

    #[test]
    fn test_overspend_conflicts() {
        let mut pb = PbTheory::new(TheoryId(0));
        pb.add_constraint(&lits(2), &[3, 3], 4, PbOp::Leq).unwrap();
        let mut view = TestView {
            values: vec![LBool::True, LBool::True],
            enqueued: Vec::new(),
        };
        let conflict = pb.propagate(&mut view).unwrap_err();
        assert_eq!(conflict.clause.len(), 2);
    }

    #[test]
    fn test_geq_normalization() {
        // a + b ≥ 2 ⇔ ¬a + ¬b ≤ 0: a false forces a conflictless
        // implication of b only after a is flipped... with a false the
        // flipped row has one true term and budget 0, so b is implied
        // true (¬b implied false).
        let mut pb = PbTheory::new(TheoryId(0));
        pb.add_constraint(&lits(2), &[1, 1], 2, PbOp::Geq).unwrap();
        let mut view = TestView {
            values: vec![LBool::Undef, LBool::Undef],
            enqueued: Vec::new(),
        };
        pb.propagate(&mut view).unwrap();
        // Budget 0: both negated literals are implied false, i.e. both
        // variables implied true.
        assert_eq!(view.enqueued, vec![Lit::pos(Var(0)), Lit::pos(Var(1))]);
    }

    #[test]
    fn test_nonpositive_coefficient_rejected() {
        let mut pb = PbTheory::new(TheoryId(0));
        assert!(pb.add_constraint(&lits(1), &[0], 1, PbOp::Leq).is_err());
        assert!(pb.add_constraint(&lits(1), &[-2], 1, PbOp::Leq).is_err());
    }

    #[test]
    fn test_coefficient_overflow_rejected() {
        let mut pb = PbTheory::new(TheoryId(0));
        assert!(
            pb.add_constraint(&lits(2), &[i64::MAX, 1], 1, PbOp::Leq)
                .is_err()
        );
    }
}
