//! At-most-one theory plugin.
//!
//! Watches a set of variables and enforces that at most one of them is
//! true: as soon as one is assigned true, every other member is implied
//! false, with the true member as the pairwise reason. Cheaper than a
//! quadratic CNF encoding for large sets.

use grix_core::{LBool, LazyReason, Lit, Theory, TheoryConflict, TheoryId, TheoryView, Var};
use rustc_hash::FxHashSet;

/// An at-most-one constraint over a set of variables.
pub struct AmoTheory {
    id: TheoryId,
    vars: Vec<Var>,
    var_set: FxHashSet<Var>,
    reasons: Vec<(u32, Vec<Lit>)>,
}

impl AmoTheory {
    /// Create an empty constraint.
    #[must_use]
    pub fn new(id: TheoryId) -> Self {
        Self {
            id,
            vars: Vec::new(),
            var_set: FxHashSet::default(),
            reasons: Vec::new(),
        }
    }

    /// Add a variable to the set.
    pub fn add_var(&mut self, var: Var) {
        if self.var_set.insert(var) {
            self.vars.push(var);
        }
    }

    /// Number of watched variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl Theory for AmoTheory {
    fn id(&self) -> TheoryId {
        self.id
    }

    fn name(&self) -> &str {
        "amo"
    }

    fn owns_var(&self, var: Var) -> bool {
        self.var_set.contains(&var)
    }

    fn enqueue_theory(&mut self, _lit: Lit, _level: u32) {
        // State is read back from the view during propagation.
    }

    fn propagate(&mut self, view: &mut dyn TheoryView) -> Result<(), TheoryConflict> {
        let mut first_true: Option<Var> = None;
        for &v in &self.vars {
            if view.value(Lit::pos(v)).is_true() {
                if let Some(prev) = first_true {
                    return Err(TheoryConflict::new(vec![Lit::neg(prev), Lit::neg(v)]));
                }
                first_true = Some(v);
            }
        }
        if let Some(t) = first_true {
            for &v in &self.vars {
                if v != t && view.value(Lit::pos(v)).is_undef() {
                    let token = self.reasons.len() as u32;
                    self.reasons.push((
                        view.decision_level(),
                        vec![Lit::neg(v), Lit::neg(t)],
                    ));
                    view.enqueue(
                        Lit::neg(v),
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
        self.vars
            .iter()
            .filter(|&&v| view.value(Lit::pos(v)) == LBool::True)
            .count()
            <= 1
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

    #[test]
    fn test_one_true_forces_rest_false() {
        let mut amo = AmoTheory::new(TheoryId(0));
        for i in 0..3 {
            amo.add_var(Var(i));
        }
        let mut view = TestView {
            values: vec![LBool::True, LBool::Undef, LBool::Undef],
            enqueued: Vec::new(),
        };
        amo.propagate(&mut view).unwrap();
        assert_eq!(view.enqueued, vec![Lit::neg(Var(1)), Lit::neg(Var(2))]);
    }

    #[test]
    fn test_two_true_conflict() {
        let mut amo = AmoTheory::new(TheoryId(0));
        amo.add_var(Var(0));
        amo.add_var(Var(1));
        let mut view = TestView {
            values: vec![LBool::True, LBool::True],
            enqueued: Vec::new(),
        };
        let conflict = amo.propagate(&mut view).unwrap_err();
        assert_eq!(conflict.clause, vec![Lit::neg(Var(0)), Lit::neg(Var(1))]);
        assert!(!amo.check_satisfied(&mut view));
    }
}
