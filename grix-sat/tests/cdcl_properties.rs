//! Property tests for the CDCL engine against brute-force enumeration.

use grix_core::{Lit, SolverOptions, Var};
use grix_sat::{NoTheories, SatSolver, SolveResult};
use proptest::prelude::*;

const N_VARS: u32 = 8;

/// A random clause as (var, sign) pairs.
fn clause_strategy() -> impl Strategy<Value = Vec<(u32, bool)>> {
    proptest::collection::vec((0..N_VARS, any::<bool>()), 1..4)
}

fn to_lits(clause: &[(u32, bool)]) -> Vec<Lit> {
    clause
        .iter()
        .map(|&(v, neg)| Lit::new(Var(v), neg))
        .collect()
}

fn brute_force_sat(clauses: &[Vec<Lit>]) -> bool {
    for assignment in 0u32..(1 << N_VARS) {
        let value = |l: Lit| {
            let bit = assignment >> l.var().0 & 1 == 1;
            bit != l.sign()
        };
        if clauses.iter().all(|c| c.iter().any(|&l| value(l))) {
            return true;
        }
    }
    false
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn solver_agrees_with_enumeration(
        raw in proptest::collection::vec(clause_strategy(), 1..20)
    ) {
        let clauses: Vec<Vec<Lit>> = raw.iter().map(|c| to_lits(c)).collect();
        let mut solver = SatSolver::new(SolverOptions::default());
        for _ in 0..N_VARS {
            solver.new_var();
        }
        let mut ok = true;
        for c in &clauses {
            ok &= solver.add_clause(c);
        }
        let result = if ok {
            solver.solve_with(&mut NoTheories, &[])
        } else {
            SolveResult::Unsat
        };
        let expected = brute_force_sat(&clauses);
        prop_assert_eq!(result == SolveResult::Sat, expected);
        if result == SolveResult::Sat {
            // The model satisfies every clause.
            for c in &clauses {
                prop_assert!(c.iter().any(|&l| solver.model_value(l).is_true()));
            }
        }
    }

    #[test]
    fn unsat_cores_are_sound(
        raw in proptest::collection::vec(clause_strategy(), 1..16),
        picks in proptest::collection::vec(0..N_VARS, 1..4)
    ) {
        let clauses: Vec<Vec<Lit>> = raw.iter().map(|c| to_lits(c)).collect();
        let mut solver = SatSolver::new(SolverOptions::default());
        for _ in 0..N_VARS {
            solver.new_var();
        }
        let mut ok = true;
        for c in &clauses {
            ok &= solver.add_clause(c);
        }
        prop_assume!(ok);
        let mut assumptions: Vec<Lit> = picks.iter().map(|&v| Lit::pos(Var(v))).collect();
        assumptions.sort_unstable();
        assumptions.dedup();
        if solver.solve_with(&mut NoTheories, &assumptions) == SolveResult::Unsat {
            let core: Vec<Lit> = solver.conflict_clause().iter().map(|&l| !l).collect();
            // The core is a subset of the assumptions.
            for l in &core {
                prop_assert!(assumptions.contains(l));
            }
            // Re-solving under only the core stays UNSAT.
            prop_assert_eq!(
                solver.solve_with(&mut NoTheories, &core),
                SolveResult::Unsat
            );
        }
    }
}
