//! Root-level preprocessing: subsumption and bounded variable
//! elimination.
//!
//! Runs only at decision level 0 with an empty learned-clause database.
//! Frozen variables (assumption literals, theory-owned literals,
//! literals with simplification disallowed) are never touched. Each
//! eliminated variable's original clauses are kept on a substitution
//! stack replayed during model reconstruction.

use grix_core::{LBool, Lit, Var};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::clause::CRef;
use crate::solver::{Reason, SatSolver};

/// Configuration for preprocessing.
#[derive(Debug, Clone)]
pub struct SimplifyConfig {
    /// Maximum clause size to consider during elimination.
    pub max_clause_size: usize,
    /// Maximum occurrences of each polarity of an elimination candidate.
    pub max_occurrences: usize,
    /// Allow at most this many extra clauses per eliminated variable.
    pub grow: usize,
}

impl Default for SimplifyConfig {
    fn default() -> Self {
        Self {
            max_clause_size: 20,
            max_occurrences: 10,
            grow: 0,
        }
    }
}

/// Preprocessing statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplifyStats {
    /// Variables eliminated.
    pub vars_eliminated: usize,
    /// Clauses removed by subsumption.
    pub subsumed: usize,
    /// Literals removed by self-subsuming resolution.
    pub strengthened: usize,
}

/// The preprocessor, owning the substitution stack across solves.
#[derive(Debug, Default)]
pub struct Simplifier {
    /// Configuration.
    pub config: SimplifyConfig,
    /// Statistics.
    pub stats: SimplifyStats,
    /// Clauses of eliminated variables, in elimination order.
    elim_stack: Vec<(Var, Vec<Vec<Lit>>)>,
}

impl Simplifier {
    /// Create a preprocessor with the given configuration.
    #[must_use]
    pub fn new(config: SimplifyConfig) -> Self {
        Self {
            config,
            stats: SimplifyStats::default(),
            elim_stack: Vec::new(),
        }
    }

    /// Run one subsumption + elimination pass.
    ///
    /// Returns `false` if preprocessing discovered root
    /// unsatisfiability.
    pub fn simplify(&mut self, solver: &mut SatSolver) -> bool {
        debug_assert_eq!(solver.decision_level(), 0);
        if !solver.is_ok() || solver.clauses.num_learnt > 0 {
            return solver.is_ok();
        }
        let mut occurrences = self.build_occurrences(solver);
        if !self.subsume(solver, &mut occurrences) {
            return false;
        }
        if !self.eliminate(solver, &mut occurrences) {
            return false;
        }
        solver.rebuild_watches();
        debug!(
            eliminated = self.stats.vars_eliminated,
            subsumed = self.stats.subsumed,
            strengthened = self.stats.strengthened,
            "preprocessing pass complete"
        );
        true
    }

    fn build_occurrences(&self, solver: &SatSolver) -> FxHashMap<Lit, Vec<CRef>> {
        let mut occ: FxHashMap<Lit, Vec<CRef>> = FxHashMap::default();
        for cref in solver.clauses.iter_refs() {
            for &l in &solver.clauses.get(cref).lits {
                occ.entry(l).or_default().push(cref);
            }
        }
        occ
    }

    /// Forward subsumption and self-subsuming resolution.
    ///
    /// Returns `false` on discovered root unsatisfiability.
    fn subsume(&mut self, solver: &mut SatSolver, occ: &mut FxHashMap<Lit, Vec<CRef>>) -> bool {
        let crefs: Vec<CRef> = solver.clauses.iter_refs().collect();
        for cref in crefs {
            let c = solver.clauses.get(cref);
            if c.deleted || c.len() > self.config.max_clause_size {
                continue;
            }
            let lits: SmallVec<[Lit; 4]> = c.lits.clone();
            // Scan candidates through the least-occurring literal.
            let best = lits
                .iter()
                .min_by_key(|l| occ.get(l).map_or(0, Vec::len))
                .copied()
                .expect("clause is non-empty");
            let candidates: Vec<CRef> = occ.get(&best).cloned().unwrap_or_default();
            for other in candidates {
                if other == cref || solver.clauses.get(other).deleted {
                    continue;
                }
                match subsumes(&lits, &solver.clauses.get(other).lits) {
                    Subsumption::Subsumes => {
                        solver.clauses.free(other);
                        self.stats.subsumed += 1;
                    }
                    Subsumption::Strengthen(l) => {
                        let oc = solver.clauses.get_mut(other);
                        oc.lits.retain(|q| *q != l);
                        self.stats.strengthened += 1;
                        if let Some(list) = occ.get_mut(&l) {
                            list.retain(|&c2| c2 != other);
                        }
                        // Strengthening may leave a unit behind.
                        if solver.clauses.get(other).len() == 1 {
                            let unit = solver.clauses.get(other).lits[0];
                            solver.clauses.free(other);
                            match solver.value(unit) {
                                LBool::True => {}
                                LBool::False => return false,
                                LBool::Undef => {
                                    solver.unchecked_enqueue(unit, Reason::None);
                                }
                            }
                        } else if solver.clauses.get(other).is_empty() {
                            return false;
                        }
                    }
                    Subsumption::None => {}
                }
            }
        }
        true
    }

    /// Bounded variable elimination by resolution.
    fn eliminate(&mut self, solver: &mut SatSolver, occ: &mut FxHashMap<Lit, Vec<CRef>>) -> bool {
        let n = solver.n_vars();
        for vi in 0..n {
            let v = Var(vi as u32);
            if solver.frozen[vi]
                || solver.eliminated[vi]
                || !solver.var_value(v).is_undef()
                || !solver.is_decision_var(v)
            {
                continue;
            }
            let pos: Vec<CRef> = live(solver, occ.get(&Lit::pos(v)));
            let neg: Vec<CRef> = live(solver, occ.get(&Lit::neg(v)));
            if pos.is_empty() && neg.is_empty() {
                continue;
            }
            if pos.len() > self.config.max_occurrences || neg.len() > self.config.max_occurrences {
                continue;
            }
            if pos
                .iter()
                .chain(&neg)
                .any(|&c| solver.clauses.get(c).len() > self.config.max_clause_size)
            {
                continue;
            }
            // Count non-tautological resolvents first.
            let mut resolvents: Vec<Vec<Lit>> = Vec::new();
            let mut too_many = false;
            'outer: for &p in &pos {
                for &q in &neg {
                    if let Some(r) =
                        resolve(&solver.clauses.get(p).lits, &solver.clauses.get(q).lits, v)
                    {
                        resolvents.push(r);
                        if resolvents.len() > pos.len() + neg.len() + self.config.grow {
                            too_many = true;
                            break 'outer;
                        }
                    }
                }
            }
            if too_many {
                continue;
            }
            // Commit: store originals for model reconstruction, remove
            // them, add the resolvents.
            let mut originals = Vec::new();
            for &c in pos.iter().chain(&neg) {
                originals.push(solver.clauses.get(c).lits.to_vec());
                solver.clauses.free(c);
            }
            self.elim_stack.push((v, originals));
            solver.eliminated[vi] = true;
            solver.set_decision_var(v, false);
            self.stats.vars_eliminated += 1;
            for r in resolvents {
                match r.len() {
                    0 => return false,
                    1 => {
                        match solver.value(r[0]) {
                            LBool::True => {}
                            LBool::False => return false,
                            LBool::Undef => solver.unchecked_enqueue(r[0], Reason::None),
                        }
                    }
                    _ => {
                        let cref = solver
                            .clauses
                            .alloc(crate::clause::Clause::new(SmallVec::from_vec(r), false));
                        for &l in &solver.clauses.get(cref).lits {
                            occ.entry(l).or_default().push(cref);
                        }
                    }
                }
            }
            occ.remove(&Lit::pos(v));
            occ.remove(&Lit::neg(v));
        }
        true
    }

    /// Replay the substitution stack, assigning eliminated variables so
    /// every removed clause is satisfied by the extended model.
    pub fn extend_model(&self, solver: &mut SatSolver) {
        for (v, clauses) in self.elim_stack.iter().rev() {
            let mut value = LBool::False;
            for clause in clauses {
                let satisfied = clause.iter().any(|&l| {
                    l.var() != *v && solver.model_value(l).is_true()
                });
                if !satisfied {
                    let own = clause
                        .iter()
                        .find(|l| l.var() == *v)
                        .expect("stored clause mentions its variable");
                    value = LBool::from_bool(!own.sign());
                }
            }
            solver.set_model_value(*v, value);
        }
    }
}

fn live(solver: &SatSolver, refs: Option<&Vec<CRef>>) -> Vec<CRef> {
    refs.map(|v| {
        v.iter()
            .copied()
            .filter(|&c| !solver.clauses.get(c).deleted)
            .collect()
    })
    .unwrap_or_default()
}

enum Subsumption {
    /// `a ⊆ b`: b is redundant.
    Subsumes,
    /// `a` subsumes `b` except for one literal flipped in `b`; that
    /// literal can be removed from `b`.
    Strengthen(Lit),
    /// No relation.
    None,
}

fn subsumes(a: &[Lit], b: &[Lit]) -> Subsumption {
    if a.len() > b.len() {
        return Subsumption::None;
    }
    let mut flipped: Option<Lit> = None;
    for &l in a {
        if b.contains(&l) {
            continue;
        }
        if b.contains(&!l) {
            if flipped.is_some() {
                return Subsumption::None;
            }
            flipped = Some(!l);
            continue;
        }
        return Subsumption::None;
    }
    match flipped {
        None => Subsumption::Subsumes,
        Some(l) => Subsumption::Strengthen(l),
    }
}

fn resolve(a: &[Lit], b: &[Lit], pivot: Var) -> Option<Vec<Lit>> {
    let mut out: Vec<Lit> = Vec::with_capacity(a.len() + b.len() - 2);
    for &l in a.iter().chain(b) {
        if l.var() == pivot {
            continue;
        }
        out.push(l);
    }
    out.sort_unstable_by_key(|arg0: &Lit| Lit::code(*arg0));
    out.dedup();
    // Tautology check: adjacent codes are the two polarities.
    for w in out.windows(2) {
        if w[0].var() == w[1].var() {
            return None;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{NoTheories, SolveResult};
    use grix_core::SolverOptions;

    #[test]
    fn test_subsumes_relation() {
        let a = [Lit::pos(Var(0)), Lit::pos(Var(1))];
        let b = [Lit::pos(Var(0)), Lit::pos(Var(1)), Lit::pos(Var(2))];
        assert!(matches!(subsumes(&a, &b), Subsumption::Subsumes));
        let c = [Lit::pos(Var(0)), Lit::neg(Var(1)), Lit::pos(Var(2))];
        match subsumes(&a, &c) {
            Subsumption::Strengthen(l) => assert_eq!(l, Lit::neg(Var(1))),
            _ => panic!("expected strengthening"),
        }
        assert!(matches!(subsumes(&b, &a), Subsumption::None));
    }

    #[test]
    fn test_resolution_drops_pivot_and_tautologies() {
        let a = [Lit::pos(Var(0)), Lit::pos(Var(1))];
        let b = [Lit::neg(Var(0)), Lit::pos(Var(2))];
        let r = resolve(&a, &b, Var(0)).unwrap();
        assert_eq!(r, vec![Lit::pos(Var(1)), Lit::pos(Var(2))]);
        let c = [Lit::neg(Var(0)), Lit::neg(Var(1))];
        assert!(resolve(&a, &c, Var(0)).is_none());
    }

    #[test]
    fn test_elimination_preserves_satisfiability() {
        let mut s = SatSolver::new(SolverOptions::default());
        let vs: Vec<Var> = (0..4).map(|_| s.new_var()).collect();
        // x0 is an internal connective: (x1 → x0), (x0 → x2 ∨ x3).
        s.add_clause(&[Lit::neg(vs[1]), Lit::pos(vs[0])]);
        s.add_clause(&[Lit::neg(vs[0]), Lit::pos(vs[2]), Lit::pos(vs[3])]);
        s.add_clause(&[Lit::pos(vs[1])]);
        s.add_clause(&[Lit::neg(vs[2])]);
        let mut simp = Simplifier::default();
        assert!(simp.simplify(&mut s));
        assert_eq!(s.solve_with(&mut NoTheories, &[]), SolveResult::Sat);
        simp.extend_model(&mut s);
        // The eliminated variable's value must satisfy its clauses.
        assert!(s.model_value(Lit::pos(vs[1])).is_true());
        assert!(s.model_value(Lit::pos(vs[3])).is_true());
        if simp.stats.vars_eliminated > 0 {
            assert!(!s.model_value(Lit::pos(vs[0])).is_undef());
        }
    }

    #[test]
    fn test_frozen_vars_survive() {
        let mut s = SatSolver::new(SolverOptions::default());
        let a = s.new_var();
        let b = s.new_var();
        s.add_clause(&[Lit::neg(a), Lit::pos(b)]);
        s.add_clause(&[Lit::pos(a), Lit::neg(b)]);
        s.freeze(a);
        s.freeze(b);
        let mut simp = Simplifier::default();
        assert!(simp.simplify(&mut s));
        assert_eq!(simp.stats.vars_eliminated, 0);
    }
}
